//! Integers modulo `2^64` and `2^128` with wrapping arithmetic.
use std::ops::{Add, Mul, Neg, Sub};

use rand::Rng;
use serde::{Deserialize, Serialize};
use subtle::{Choice, ConditionallySelectable};

use super::{RingElement, le_bytes};
use crate::{block::Block, error::Error};

macro_rules! z2k {
    ($name:ident, $int:ty, $bits:expr, $label:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name($int);

        impl $name {
            /// Creates an element from its representative.
            pub const fn new(x: $int) -> Self {
                Self(x)
            }

            /// The representative in `[0, 2^k)`.
            pub fn value(&self) -> $int {
                self.0
            }
        }

        impl Add for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: Self) -> Self {
                Self(self.0.wrapping_add(rhs.0))
            }
        }

        impl Sub for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: Self) -> Self {
                Self(self.0.wrapping_sub(rhs.0))
            }
        }

        impl Neg for $name {
            type Output = Self;

            #[inline]
            fn neg(self) -> Self {
                Self(self.0.wrapping_neg())
            }
        }

        impl Mul for $name {
            type Output = Self;

            #[inline]
            fn mul(self, rhs: Self) -> Self {
                Self(self.0.wrapping_mul(rhs.0))
            }
        }

        impl_assign_ops!($name);

        impl ConditionallySelectable for $name {
            fn conditional_select(a: &Self, b: &Self, choice: Choice) -> Self {
                Self(<$int>::conditional_select(&a.0, &b.0, choice))
            }
        }

        impl RingElement for $name {
            const BITS: usize = $bits;
            const BYTES: usize = $bits / 8;
            const NAME: &'static str = $label;
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
                Self(u128::from(block) as $int)
            }

            fn pack(&self, out: &mut Vec<u8>) {
                out.extend(self.0.to_le_bytes());
            }

            fn unpack(bytes: &[u8]) -> Result<Self, Error> {
                Ok(Self(<$int>::from_le_bytes(le_bytes(bytes, $label)?)))
            }
        }
    };
}

z2k!(Z64, u64, 64, "Z64", "The ring of integers modulo `2^64`.");
z2k!(Z128, u128, 128, "Z128", "The ring of integers modulo `2^128`.");

/// Lifts a `Z64` representative into `Z128`, used for SPDZ2k-style MACs.
impl From<Z64> for Z128 {
    fn from(x: Z64) -> Self {
        Self(x.0 as u128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping() {
        assert_eq!(Z64::ZERO, Z64::new(u64::MAX) + Z64::ONE);
        assert_eq!(Z128::new(u128::MAX), -Z128::ONE);
        assert_eq!(Z64::new(6), Z64::new(2) * Z64::new(3));
    }

    #[test]
    fn lift_keeps_representative() {
        let x = Z64::new(u64::MAX);
        assert_eq!(u64::MAX as u128, Z128::from(x).value());
        // the lift is additive only modulo 2^64
        let sum = Z128::from(x) + Z128::from(Z64::ONE);
        assert_eq!(1 << 64, sum.value());
    }
}
