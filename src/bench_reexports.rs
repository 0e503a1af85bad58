//! Reexports of private internals for benchmarking - DO NOT USE!
//!
//! This module requires the internal `__bench` feature to be enabled.
//! Criterion can only benchmark public functions, as it is used from a
//! `benches/` file which is compiled as a separate crate.
//!
//! If you're a user of polyprep, do not enable the `__bench` feature or use
//! these APIs exposed here.
#![allow(missing_docs)]

pub fn transpose_bitmatrix(input: &[u8], output: &mut [u8], rows: usize) {
    crate::transpose::transpose_bitmatrix(input, output, rows)
}

pub fn has_avx2() -> bool {
    crate::transpose::has_avx2()
}
