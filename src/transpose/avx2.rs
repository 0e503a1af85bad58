//! AVX2 bit-matrix transpose working on 128x128 squares, after the libOTe kernel.
use std::arch::x86_64::*;

use bytemuck::{must_cast_slice, must_cast_slice_mut};
use seq_macro::seq;

/// Transposes the 2x2 bit sub-matrices formed by neighbouring rows of `x` and `y`.
#[inline]
#[target_feature(enable = "avx2")]
fn transpose_2x2_matrices(x: &mut __m256i, y: &mut __m256i) {
    // u holds the low lanes of x and y, v the high lanes
    let u = _mm256_permute2x128_si256(*x, *y, 0x20);
    let v = _mm256_permute2x128_si256(*x, *y, 0x31);
    // odd bits of the upper row that differ from the even bits of the lower row
    let mut diff = _mm256_xor_si256(u, _mm256_slli_epi16(v, 1));
    diff = _mm256_and_si256(diff, _mm256_set1_epi16(0b1010101010101010_u16 as i16));
    let u = _mm256_xor_si256(u, diff);
    let v = _mm256_xor_si256(v, _mm256_srli_epi16(diff, 1));
    *x = _mm256_permute2x128_si256(u, v, 0x20);
    *y = _mm256_permute2x128_si256(u, v, 0x31);
}

/// Swaps the off-diagonal `SHIFT x SHIFT` sub-matrices selected by `MASK`.
#[inline]
#[target_feature(enable = "avx2")]
fn partial_swap_sub_matrices<const SHIFT: i32, const MASK: u64>(x: &mut __m256i, y: &mut __m256i) {
    let mut diff = _mm256_xor_si256(*x, _mm256_slli_epi64::<SHIFT>(*y));
    diff = _mm256_and_si256(diff, _mm256_set1_epi64x(MASK as i64));
    *x = _mm256_xor_si256(*x, diff);
    *y = _mm256_xor_si256(*y, _mm256_srli_epi64::<SHIFT>(diff));
}

/// Swaps the upper right and lower left 64x64 quadrants.
#[inline]
#[target_feature(enable = "avx2")]
fn partial_swap_64x64_matrices(x: &mut __m256i, y: &mut __m256i) {
    let out_x = _mm256_unpacklo_epi64(*x, *y);
    let out_y = _mm256_unpackhi_epi64(*x, *y);
    *x = out_x;
    *y = out_y;
}

/// Repeats `pattern` of `pattern_len` bits until it fills a `u64`.
const fn mask(pattern: u64, pattern_len: u32) -> u64 {
    let mut mask = pattern;
    let mut len = pattern_len;
    while len < 64 {
        mask |= mask << len;
        len *= 2;
    }
    mask
}

/// Transposes a 128x128 bit matrix in place.
///
/// Divide and conquer: transpose all 2x2 sub-matrices, then swap the
/// off-diagonal halves of the 4x4, 8x8, ..., 128x128 sub-matrices.
#[target_feature(enable = "avx2")]
fn avx_transpose128x128(in_out: &mut [__m256i; 64]) {
    for chunk in in_out.chunks_exact_mut(2) {
        if let [x, y] = chunk {
            transpose_2x2_matrices(x, y);
        }
    }

    seq!(N in 1..=5 {
        const SHIFT_~N: i32 = 1 << N;
        const MASK_~N: u64 = match N {
            1 => mask(0b1100, 4),
            2 => mask(0b11110000, 8),
            3 => mask(0b1111111100000000, 16),
            4 => mask(0b11111111111111110000000000000000, 32),
            _ => 0xffffffff00000000,
        };
        #[allow(clippy::eq_op)]
        const OFFSET~N: usize = 1 << (N - 1);

        for chunk in in_out.chunks_exact_mut(2 * OFFSET~N) {
            let (x_chunk, y_chunk) = chunk.split_at_mut(OFFSET~N);
            for (x, y) in x_chunk.iter_mut().zip(y_chunk.iter_mut()) {
                partial_swap_sub_matrices::<SHIFT_~N, MASK_~N>(x, y);
            }
        }
    });

    for chunk in in_out.chunks_exact_mut(64) {
        let (x_chunk, y_chunk) = chunk.split_at_mut(32);
        for (x, y) in x_chunk.iter_mut().zip(y_chunk.iter_mut()) {
            partial_swap_64x64_matrices(x, y);
        }
    }
}

/// Transpose a bit matrix using AVX2, one 128x128 square at a time.
///
/// Columns that do not fill a whole square are zero-padded in the square buffer.
///
/// # Safety
/// AVX2 instruction set must be available.
#[target_feature(enable = "avx2")]
pub(super) fn transpose_bitmatrix(input: &[u8], output: &mut [u8], rows: usize) {
    let cols = input.len() * 8 / rows;
    let in_stride = cols / 8;
    let out_stride = rows / 8;

    let mut buf = [_mm256_setzero_si256(); 64];
    for i in 0..rows / 128 {
        for j in 0..cols.div_ceil(128) {
            let width = (cols - j * 128).min(128) / 8;
            buf.fill(_mm256_setzero_si256());
            let buf_bytes: &mut [u8] = must_cast_slice_mut(&mut buf);
            for k in 0..128 {
                let src = (i * 128 + k) * in_stride + j * 16;
                buf_bytes[k * 16..k * 16 + width].copy_from_slice(&input[src..src + width]);
            }

            avx_transpose128x128(&mut buf);

            let buf_bytes: &[u8] = must_cast_slice(&buf);
            for k in 0..width * 8 {
                let dst = (j * 128 + k) * out_stride + i * 16;
                output[dst..dst + 16].copy_from_slice(&buf_bytes[k * 16..(k + 1) * 16]);
            }
        }
    }
}
