//! Prime fields with Mersenne moduli.
//!
//! [`Gfp127`] is the MASCOT field; [`Gfp61`] is small enough to make failure
//! cases of statistical checks observable in tests. Elements are always kept in
//! canonical form `0 <= x < p`.
use std::ops::{Add, Mul, Neg, Sub};

use rand::Rng;
use serde::{Deserialize, Serialize};
use subtle::{Choice, ConditionallySelectable};

use super::{Field, PrimeField, RingElement, le_bytes};
use crate::{block::Block, error::Error};

/// The prime field with modulus `2^61 - 1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Gfp61(u64);

impl Gfp61 {
    /// The modulus `2^61 - 1`.
    pub const MODULUS: u64 = (1 << 61) - 1;

    /// Reduces `x` modulo `p`.
    pub const fn new(x: u64) -> Self {
        Self(reduce61(x as u128))
    }

    /// The canonical representative.
    pub fn value(&self) -> u64 {
        self.0
    }

    fn pow(self, mut exp: u64) -> Self {
        let mut acc = Self::ONE;
        let mut base = self;
        while exp != 0 {
            if exp & 1 == 1 {
                acc = acc * base;
            }
            base = base * base;
            exp >>= 1;
        }
        acc
    }
}

/// Folds `x < 2^128` into `[0, 2^61 - 1)` using `2^61 = 1 mod p`.
const fn reduce61(x: u128) -> u64 {
    const P: u128 = Gfp61::MODULUS as u128;
    let x = (x & P) + (x >> 61);
    let x = (x & P) + (x >> 61);
    let x = x as u64;
    if x >= Gfp61::MODULUS {
        x - Gfp61::MODULUS
    } else {
        x
    }
}

impl TryFrom<u64> for Gfp61 {
    type Error = Error;

    fn try_from(x: u64) -> Result<Self, Error> {
        if x < Self::MODULUS {
            Ok(Self(x))
        } else {
            Err(Error::InvalidEncoding("Gfp61"))
        }
    }
}

impl From<Gfp61> for u64 {
    fn from(x: Gfp61) -> u64 {
        x.0
    }
}

impl Add for Gfp61 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        // both < 2^61, no overflow
        let sum = self.0 + rhs.0;
        Self(if sum >= Self::MODULUS { sum - Self::MODULUS } else { sum })
    }
}

impl Sub for Gfp61 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self + -rhs
    }
}

impl Neg for Gfp61 {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        if self.0 == 0 { self } else { Self(Self::MODULUS - self.0) }
    }
}

impl Mul for Gfp61 {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self(reduce61(self.0 as u128 * rhs.0 as u128))
    }
}

impl_assign_ops!(Gfp61);

impl ConditionallySelectable for Gfp61 {
    fn conditional_select(a: &Self, b: &Self, choice: Choice) -> Self {
        Self(u64::conditional_select(&a.0, &b.0, choice))
    }
}

impl RingElement for Gfp61 {
    const BITS: usize = 61;
    const BYTES: usize = 8;
    const NAME: &'static str = "p61";
    const ZERO: Self = Self(0);
    const ONE: Self = Self(1);

    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        loop {
            let x = rng.random::<u64>() & Self::MODULUS;
            if x < Self::MODULUS {
                return Self(x);
            }
        }
    }

    fn bit(&self, i: usize) -> bool {
        (self.0 >> i) & 1 == 1
    }

    fn basis(i: usize) -> Self {
        Self(1 << i)
    }

    fn from_block(block: Block) -> Self {
        Self(reduce61(block.into()))
    }

    fn pack(&self, out: &mut Vec<u8>) {
        out.extend(self.0.to_le_bytes());
    }

    fn unpack(bytes: &[u8]) -> Result<Self, Error> {
        Self::try_from(u64::from_le_bytes(le_bytes(bytes, "Gfp61")?))
    }
}

impl Field for Gfp61 {
    fn inverse(&self) -> Option<Self> {
        (!self.is_zero()).then(|| self.pow(Self::MODULUS - 2))
    }
}

impl PrimeField for Gfp61 {
    fn sqrt(&self) -> Option<Self> {
        // p = 3 mod 4
        let root = self.pow(Self::MODULUS.div_ceil(4));
        (root * root == *self).then_some(root)
    }
}

/// The prime field with modulus `2^127 - 1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u128", into = "u128")]
pub struct Gfp127(u128);

impl Gfp127 {
    /// The modulus `2^127 - 1`.
    pub const MODULUS: u128 = (1 << 127) - 1;

    /// Reduces `x` modulo `p`.
    pub const fn new(x: u128) -> Self {
        Self(reduce127(x))
    }

    /// The canonical representative.
    pub fn value(&self) -> u128 {
        self.0
    }

    fn pow(self, mut exp: u128) -> Self {
        let mut acc = Self::ONE;
        let mut base = self;
        while exp != 0 {
            if exp & 1 == 1 {
                acc = acc * base;
            }
            base = base * base;
            exp >>= 1;
        }
        acc
    }
}

/// Folds `x` into `[0, 2^127 - 1)`.
const fn reduce127(x: u128) -> u128 {
    let x = (x & Gfp127::MODULUS) + (x >> 127);
    if x >= Gfp127::MODULUS {
        x - Gfp127::MODULUS
    } else {
        x
    }
}

/// Full 256-bit product of two 128-bit values as `(low, high)`.
fn mul_wide(a: u128, b: u128) -> (u128, u128) {
    const LOW: u128 = u64::MAX as u128;
    let (a0, a1) = (a & LOW, a >> 64);
    let (b0, b1) = (b & LOW, b >> 64);
    let p00 = a0 * b0;
    let p01 = a0 * b1;
    let p10 = a1 * b0;
    let p11 = a1 * b1;
    // at most 3 * (2^64 - 1), no overflow
    let mid = (p00 >> 64) + (p01 & LOW) + (p10 & LOW);
    let low = (p00 & LOW) | (mid << 64);
    let high = p11 + (p01 >> 64) + (p10 >> 64) + (mid >> 64);
    (low, high)
}

impl TryFrom<u128> for Gfp127 {
    type Error = Error;

    fn try_from(x: u128) -> Result<Self, Error> {
        if x < Self::MODULUS {
            Ok(Self(x))
        } else {
            Err(Error::InvalidEncoding("Gfp127"))
        }
    }
}

impl From<Gfp127> for u128 {
    fn from(x: Gfp127) -> u128 {
        x.0
    }
}

impl Add for Gfp127 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        // both < 2^127, no overflow
        let sum = self.0 + rhs.0;
        Self(if sum >= Self::MODULUS { sum - Self::MODULUS } else { sum })
    }
}

impl Sub for Gfp127 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self + -rhs
    }
}

impl Neg for Gfp127 {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        if self.0 == 0 { self } else { Self(Self::MODULUS - self.0) }
    }
}

impl Mul for Gfp127 {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        let (low, high) = mul_wide(self.0, rhs.0);
        // high * 2^128 + low = 2 * high + (low >> 127) + (low & p) mod p,
        // with high < 2^126 the sum stays below 2^128
        let folded = (low & Self::MODULUS) + (low >> 127) + (high << 1);
        Self(reduce127(folded))
    }
}

impl_assign_ops!(Gfp127);

impl ConditionallySelectable for Gfp127 {
    fn conditional_select(a: &Self, b: &Self, choice: Choice) -> Self {
        Self(u128::conditional_select(&a.0, &b.0, choice))
    }
}

impl RingElement for Gfp127 {
    const BITS: usize = 127;
    const BYTES: usize = 16;
    const NAME: &'static str = "p127";
    const ZERO: Self = Self(0);
    const ONE: Self = Self(1);

    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        loop {
            let x = rng.random::<u128>() & Self::MODULUS;
            if x < Self::MODULUS {
                return Self(x);
            }
        }
    }

    fn bit(&self, i: usize) -> bool {
        (self.0 >> i) & 1 == 1
    }

    fn basis(i: usize) -> Self {
        Self(1 << i)
    }

    fn from_block(block: Block) -> Self {
        Self(reduce127(block.into()))
    }

    fn pack(&self, out: &mut Vec<u8>) {
        out.extend(self.0.to_le_bytes());
    }

    fn unpack(bytes: &[u8]) -> Result<Self, Error> {
        Self::try_from(u128::from_le_bytes(le_bytes(bytes, "Gfp127")?))
    }
}

impl Field for Gfp127 {
    fn inverse(&self) -> Option<Self> {
        (!self.is_zero()).then(|| self.pow(Self::MODULUS - 2))
    }
}

impl PrimeField for Gfp127 {
    fn sqrt(&self) -> Option<Self> {
        // p = 3 mod 4, so x^((p + 1) / 4) is a root of every quadratic residue
        let root = self.pow(Self::MODULUS.div_ceil(4));
        (root * root == *self).then_some(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_wide_matches_small_products() {
        assert_eq!((6, 0), mul_wide(2, 3));
        assert_eq!((0, 1), mul_wide(1 << 64, 1 << 64));
        let max = u128::MAX;
        // (2^128 - 1)^2 = 2^256 - 2^129 + 1
        assert_eq!((1, max - 1), mul_wide(max, max));
    }

    #[test]
    fn gfp127_wraps_around() {
        let minus_one = -Gfp127::ONE;
        assert_eq!(Gfp127::MODULUS - 1, minus_one.value());
        assert_eq!(Gfp127::ONE, minus_one * minus_one);
        assert_eq!(Gfp127::ZERO, Gfp127::new(Gfp127::MODULUS));
        assert_eq!(Gfp127::new(5), Gfp127::new(Gfp127::MODULUS + 5));
    }

    #[test]
    fn non_canonical_encodings_are_rejected() {
        let mut bytes = vec![];
        bytes.extend(Gfp127::MODULUS.to_le_bytes());
        assert!(Gfp127::unpack(&bytes).is_err());
        assert!(bincode::deserialize::<Gfp127>(&bytes).is_err());
        assert!(Gfp61::unpack(&Gfp61::MODULUS.to_le_bytes()).is_err());
    }

    #[test]
    fn sqrt_of_non_residue() {
        // -1 is not a square for p = 3 mod 4
        assert!((-Gfp127::ONE).sqrt().is_none());
        assert!((-Gfp61::ONE).sqrt().is_none());
        let root = Gfp61::new(9).sqrt().unwrap();
        assert!(root == Gfp61::new(3) || root == -Gfp61::new(3));
    }
}
