//! Binary fields: GF(2) for TinyOT-style bit triples and GF(2^128) for their MACs.
use std::ops::{Add, Mul, Neg, Sub};

use rand::Rng;
use serde::{Deserialize, Serialize};
use subtle::{Choice, ConditionallySelectable};

use super::{Field, RingElement, le_bytes};
use crate::{block::Block, error::Error};

/// GF(2^128) with the modulus `x^128 + x^7 + x^2 + x + 1`.
///
/// Bit `i` of the integer representation is the coefficient of `X^i`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gf2n128(u128);

impl Gf2n128 {
    /// Creates the element with the coefficients given by the bits of `x`.
    pub const fn new(x: u128) -> Self {
        Self(x)
    }

    /// The coefficients as an integer.
    pub fn value(&self) -> u128 {
        self.0
    }
}

impl Add for Gf2n128 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(self.0 ^ rhs.0)
    }
}

impl Sub for Gf2n128 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 ^ rhs.0)
    }
}

impl Neg for Gf2n128 {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        self
    }
}

impl Mul for Gf2n128 {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self(Block::from(self.0).gf_mul(&Block::from(rhs.0)).into())
    }
}

impl_assign_ops!(Gf2n128);

impl ConditionallySelectable for Gf2n128 {
    fn conditional_select(a: &Self, b: &Self, choice: Choice) -> Self {
        Self(u128::conditional_select(&a.0, &b.0, choice))
    }
}

impl RingElement for Gf2n128 {
    const BITS: usize = 128;
    const BYTES: usize = 16;
    const NAME: &'static str = "2n128";
    const ZERO: Self = Self(0);
    const ONE: Self = Self(1);

    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.random())
    }

    fn bit(&self, i: usize) -> bool {
        (self.0 >> i) & 1 == 1
    }

    fn basis(i: usize) -> Self {
        Self(1 << i)
    }

    fn from_block(block: Block) -> Self {
        Self(block.into())
    }

    fn pack(&self, out: &mut Vec<u8>) {
        out.extend(self.0.to_le_bytes());
    }

    fn unpack(bytes: &[u8]) -> Result<Self, Error> {
        Ok(Self(u128::from_le_bytes(le_bytes(bytes, "Gf2n128")?)))
    }
}

impl Field for Gf2n128 {
    fn inverse(&self) -> Option<Self> {
        Block::from(self.0).gf_inverse().map(|inv| Self(inv.into()))
    }
}

/// The field with two elements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Gf2(u8);

impl Gf2 {
    /// The element `b as u8`.
    pub const fn new(b: bool) -> Self {
        Self(b as u8)
    }

    /// `true` for one.
    pub fn value(&self) -> bool {
        self.0 == 1
    }
}

impl TryFrom<u8> for Gf2 {
    type Error = Error;

    fn try_from(x: u8) -> Result<Self, Error> {
        if x < 2 {
            Ok(Self(x))
        } else {
            Err(Error::InvalidEncoding("Gf2"))
        }
    }
}

impl From<Gf2> for u8 {
    fn from(x: Gf2) -> u8 {
        x.0
    }
}

impl Add for Gf2 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(self.0 ^ rhs.0)
    }
}

impl Sub for Gf2 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 ^ rhs.0)
    }
}

impl Neg for Gf2 {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        self
    }
}

impl Mul for Gf2 {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl_assign_ops!(Gf2);

impl ConditionallySelectable for Gf2 {
    fn conditional_select(a: &Self, b: &Self, choice: Choice) -> Self {
        Self(u8::conditional_select(&a.0, &b.0, choice))
    }
}

impl RingElement for Gf2 {
    const BITS: usize = 1;
    const BYTES: usize = 1;
    const NAME: &'static str = "2";
    const ZERO: Self = Self(0);
    const ONE: Self = Self(1);

    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::new(rng.random())
    }

    fn bit(&self, i: usize) -> bool {
        i == 0 && self.0 == 1
    }

    fn basis(_: usize) -> Self {
        Self::ONE
    }

    fn from_block(block: Block) -> Self {
        Self::new(block.lsb())
    }

    fn pack(&self, out: &mut Vec<u8>) {
        out.push(self.0);
    }

    fn unpack(bytes: &[u8]) -> Result<Self, Error> {
        Self::try_from(u8::from_le_bytes(le_bytes(bytes, "Gf2")?))
    }
}

impl Field for Gf2 {
    fn inverse(&self) -> Option<Self> {
        self.value().then_some(Self::ONE)
    }
}

/// Embeds GF(2) into GF(2^128), used for the MACs of bit triples.
impl From<Gf2> for Gf2n128 {
    fn from(x: Gf2) -> Self {
        Self(x.0 as u128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gf2n128_inverse_of_x() {
        let x = Gf2n128::basis(1);
        let inv = x.inverse().unwrap();
        assert_eq!(Gf2n128::ONE, x * inv);
        // x^-1 = x^127 + x^6 + x + 1 for this modulus
        assert_eq!(Gf2n128::new(1 << 127 | 1 << 6 | 1 << 1 | 1), inv);
    }

    #[test]
    fn gf2_embedding_is_a_homomorphism() {
        for a in [Gf2::ZERO, Gf2::ONE] {
            for b in [Gf2::ZERO, Gf2::ONE] {
                assert_eq!(Gf2n128::from(a * b), Gf2n128::from(a) * Gf2n128::from(b));
                assert_eq!(Gf2n128::from(a + b), Gf2n128::from(a) + Gf2n128::from(b));
            }
        }
    }

    #[test]
    fn gf2_rejects_invalid_bytes() {
        assert!(Gf2::unpack(&[2]).is_err());
        assert!(bincode::deserialize::<Gf2>(&[3]).is_err());
    }
}
