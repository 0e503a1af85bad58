//! Transpose bit-matrices fast.
//!
//! Matrices are stored row-major with LSB-first bit order inside each byte.
#![allow(unsafe_code)]

#[cfg(target_arch = "x86_64")]
mod avx2;
mod portable;

#[cfg(target_arch = "x86_64")]
cpufeatures::new!(target_feature_avx2, "avx2");

/// Returns `true` if the AVX2 transpose kernel can be used on this machine.
pub(crate) fn has_avx2() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        target_feature_avx2::get()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

/// Transpose a bit matrix with `rows` rows.
///
/// # Panics
/// If `input.len() != output.len()`
/// If the number of rows is less than 128 or not a multiple of 128.
/// If `input.len()` is not divisible by rows.
/// If the number of columns (= input.len() * 8 / rows) is not a multiple of 8
/// or less than 16.
pub(crate) fn transpose_bitmatrix(input: &[u8], output: &mut [u8], rows: usize) {
    assert_eq!(input.len(), output.len());
    assert!(rows >= 128, "Number of rows must be >= 128.");
    assert_eq!(0, input.len() % rows, "input.len() must be divisble by rows");
    assert_eq!(0, rows % 128, "Number of rows must be a multiple of 128.");
    let cols = input.len() * 8 / rows;
    assert_eq!(0, cols % 8, "Number of columns must be a multiple of 8.");
    assert!(cols >= 16, "columns must be at least 16. Columns {cols}");

    #[cfg(target_arch = "x86_64")]
    if target_feature_avx2::get() {
        // SAFETY: The avx2 feature is available
        unsafe { avx2::transpose_bitmatrix(input, output, rows) };
        return;
    }
    portable::transpose_bitmatrix(input, output, rows);
}

#[cfg(test)]
mod tests {
    use rand::{RngCore, SeedableRng, rngs::StdRng};

    use super::transpose_bitmatrix;

    #[test]
    fn transposes_single_bits() {
        let rows = 128;
        let cols = 256;
        let mut input = vec![0_u8; rows * cols / 8];
        // set (row 3, col 200)
        input[3 * cols / 8 + 200 / 8] |= 1 << (200 % 8);
        let mut output = vec![0_u8; input.len()];
        transpose_bitmatrix(&input, &mut output, rows);
        // now (row 200, col 3) in a 256 x 128 matrix
        let idx = 200 * rows / 8 + 3 / 8;
        assert_eq!(1 << 3, output[idx]);
        assert_eq!(1, output.iter().map(|b| b.count_ones()).sum::<u32>());
    }

    #[test]
    fn dispatch_matches_portable() {
        let rows = 256;
        let mut input = vec![0_u8; rows * 384 / 8];
        StdRng::seed_from_u64(3).fill_bytes(&mut input);
        let mut dispatched = vec![0; input.len()];
        let mut portable = vec![0; input.len()];
        transpose_bitmatrix(&input, &mut dispatched, rows);
        super::portable::transpose_bitmatrix(&input, &mut portable, rows);
        assert_eq!(portable, dispatched);
    }
}
