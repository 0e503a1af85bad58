//! A 128-bit [`Block`] type, the unit of all OT and bit-matrix operations.
//!
//! Bit `i` of a block is bit `i % 8` of byte `i / 8` (LSB first), which is the
//! order used by the bit-matrix transpose and by [`crate::bit_vector::BitVector`].
use std::ops::{BitAnd, BitAndAssign, BitXor, BitXorAssign, Not};

use aes::cipher::{self, array::sizes};
use bytemuck::{Pod, Zeroable};
use rand::{Rng, distr::StandardUniform, prelude::Distribution};
use serde::{Deserialize, Serialize};
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};
use wide::u8x16;

mod gf128;

/// A 128-bit block. Uses SIMD operations where available.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, Pod, Zeroable)]
#[repr(transparent)]
pub struct Block(u8x16);

impl Block {
    /// All bits set to 0.
    pub const ZERO: Self = Self(u8x16::ZERO);
    /// All bits set to 1.
    pub const ONES: Self = Self(u8x16::MAX);
    /// Lsb set to 1, all others zero.
    pub const ONE: Self = Self::new(1_u128.to_ne_bytes());

    /// 16 bytes in a Block.
    pub const BYTES: usize = 16;
    /// 128 bits in a block.
    pub const BITS: usize = 128;

    /// Create a new block from bytes.
    #[inline]
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(u8x16::new(bytes))
    }

    /// Bytes of the block.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_array_ref()
    }

    /// Least significant bit of the block.
    #[inline]
    pub fn lsb(&self) -> bool {
        self.as_bytes()[0] & 1 == 1
    }

    /// Bit `i` of the block.
    ///
    /// # Panics
    /// If `i >= 128`.
    #[inline]
    pub fn bit(&self, i: usize) -> bool {
        (self.as_bytes()[i / 8] >> (i % 8)) & 1 == 1
    }

    /// Computes `self * b` for a bit `b` in constant time.
    #[inline]
    pub fn const_mul(&self, b: Choice) -> Block {
        Block::conditional_select(&Block::ZERO, self, b)
    }
}

impl AsRef<[u8]> for Block {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl AsMut<[u8]> for Block {
    #[inline]
    fn as_mut(&mut self) -> &mut [u8] {
        bytemuck::bytes_of_mut(self)
    }
}

impl BitAnd for Block {
    type Output = Self;

    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for Block {
    #[inline]
    fn bitand_assign(&mut self, rhs: Self) {
        *self = *self & rhs;
    }
}

impl BitXor for Block {
    type Output = Self;

    #[inline]
    fn bitxor(self, rhs: Self) -> Self {
        Self(self.0 ^ rhs.0)
    }
}

impl BitXorAssign for Block {
    #[inline]
    fn bitxor_assign(&mut self, rhs: Self) {
        *self = *self ^ rhs;
    }
}

impl Not for Block {
    type Output = Self;

    #[inline]
    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        let a: u128 = (*self).into();
        let b: u128 = (*other).into();
        a.ct_eq(&b).into()
    }
}

impl Eq for Block {}

impl Distribution<Block> for StandardUniform {
    #[inline]
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Block {
        let mut bytes = [0; 16];
        rng.fill_bytes(&mut bytes);
        Block::new(bytes)
    }
}

impl From<Block> for cipher::Array<u8, sizes::U16> {
    #[inline]
    fn from(value: Block) -> Self {
        Self(*value.as_bytes())
    }
}

impl From<cipher::Array<u8, sizes::U16>> for Block {
    #[inline]
    fn from(value: cipher::Array<u8, sizes::U16>) -> Self {
        Self::new(value.0)
    }
}

// Blocks are interpreted as little-endian integers so that bit `i` of the
// integer is bit `i` of the block on every platform.
impl From<Block> for u128 {
    #[inline]
    fn from(value: Block) -> Self {
        u128::from_le_bytes(*value.as_bytes())
    }
}

impl From<&Block> for u128 {
    #[inline]
    fn from(value: &Block) -> Self {
        u128::from_le_bytes(*value.as_bytes())
    }
}

impl From<u128> for Block {
    #[inline]
    fn from(value: u128) -> Self {
        Self::new(value.to_le_bytes())
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod from_arch_impls {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::*;
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::*;

    use super::Block;

    impl From<&Block> for __m128i {
        #[inline]
        fn from(value: &Block) -> Self {
            bytemuck::must_cast(*value)
        }
    }

    impl From<__m128i> for Block {
        #[inline]
        fn from(value: __m128i) -> Self {
            bytemuck::must_cast(value)
        }
    }
}

impl ConditionallySelectable for Block {
    #[inline]
    fn conditional_select(a: &Self, b: &Self, choice: Choice) -> Self {
        // mask is all zeros for choice = 0 and all ones for choice = 1
        let mask = Block::new((-(choice.unwrap_u8() as i128)).to_le_bytes());
        *a ^ (mask & (*a ^ *b))
    }
}
