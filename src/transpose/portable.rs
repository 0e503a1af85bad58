//! Portable bit-matrix transpose based on 16x8 sub-blocks and `move_mask`.
use wide::{i8x16, i64x2};

/// Transpose a bit matrix.
///
/// # Panics
/// - If `rows < 16` or `rows` is not divisible by 16
/// - If `input.len()` is not divisible by `rows`
/// - If the number of columns is less than 16 or not divisible by 8
pub fn transpose_bitmatrix(input: &[u8], output: &mut [u8], rows: usize) {
    assert!(rows >= 16, "rows must be at least 16");
    assert_eq!(0, rows % 16, "rows must be divisible by 16");
    assert_eq!(0, input.len() % rows, "input.len() must be divisible by rows");
    let cols = input.len() * 8 / rows;
    assert!(cols >= 16, "columns must be at least 16. Columns {cols}");
    assert_eq!(0, cols % 8, "columns must be divisible by 8. Columns {cols}");

    for row in (0..rows).step_by(16) {
        for col in (0..cols).step_by(8) {
            // byte `col / 8` of the rows `row..row + 16`
            let mut v = i8x16::from(std::array::from_fn(|i| {
                input[(row + i) * cols / 8 + col / 8] as i8
            }));
            // The msb of every byte is column `col + 7` of the 16 rows, which is one
            // 16-bit piece of output row `col + 7`. Shifting moves the next column
            // into the msb position.
            for offset in (0..8).rev() {
                let msbs = v.move_mask().to_le_bytes();
                let idx = (col + offset) * rows / 8 + row / 8;
                output[idx..idx + 2].copy_from_slice(&msbs[..2]);

                // bits shifted into neighbouring bytes are never read
                let v: &mut i64x2 = bytemuck::must_cast_mut(&mut v);
                *v = *v << 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn arbitrary_bitmat(max_row: usize, max_col: usize) -> BoxedStrategy<(Vec<u8>, usize, usize)> {
        (
            (16..max_row).prop_map(|row| row / 16 * 16),
            (16..max_col).prop_map(|col| col / 16 * 16),
        )
            .prop_flat_map(|(rows, cols)| {
                (vec![any::<u8>(); rows * cols / 8], Just(rows), Just(cols))
            })
            .boxed()
    }

    proptest! {
        #[test]
        fn double_transpose_is_identity((v, rows, cols) in arbitrary_bitmat(16 * 20, 16 * 20)) {
            let mut transposed = vec![0; v.len()];
            let mut double_transposed = vec![0; v.len()];
            transpose_bitmatrix(&v, &mut transposed, rows);
            transpose_bitmatrix(&transposed, &mut double_transposed, cols);
            prop_assert_eq!(v, double_transposed);
        }
    }
}
