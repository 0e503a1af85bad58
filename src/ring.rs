//! The rings and fields that preprocessing data lives in.
//!
//! Every ring exposes a bit decomposition ([`RingElement::bit`] and
//! [`RingElement::basis`]) with `x = Σ_j basis(j) * bit_j(x)`. The Gilboa
//! multiplication and the VOLE use it to turn one product into [`RingElement::BITS`]
//! oblivious transfers.
//!
//! | type        | ring                    | bits |
//! |-------------|-------------------------|------|
//! | [`Gfp61`]   | integers mod `2^61 - 1` | 61   |
//! | [`Gfp127`]  | integers mod `2^127 - 1`| 127  |
//! | [`Gf2n128`] | GF(2^128)               | 128  |
//! | [`Gf2`]     | GF(2)                   | 1    |
//! | [`Z64`]     | integers mod `2^64`     | 64   |
//! | [`Z128`]    | integers mod `2^128`    | 128  |
use std::{
    fmt,
    ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign},
};

use rand::Rng;
use serde::{Serialize, de::DeserializeOwned};
use subtle::ConditionallySelectable;

use crate::{block::Block, error::Error};

/// Implements the assigning operators and `Sum` in terms of the binary operators.
macro_rules! impl_assign_ops {
    ($t:ty) => {
        impl std::ops::AddAssign for $t {
            #[inline]
            fn add_assign(&mut self, rhs: Self) {
                *self = *self + rhs;
            }
        }

        impl std::ops::SubAssign for $t {
            #[inline]
            fn sub_assign(&mut self, rhs: Self) {
                *self = *self - rhs;
            }
        }

        impl std::ops::MulAssign for $t {
            #[inline]
            fn mul_assign(&mut self, rhs: Self) {
                *self = *self * rhs;
            }
        }

        impl std::iter::Sum for $t {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                iter.fold(<$t as $crate::ring::RingElement>::ZERO, |acc, x| acc + x)
            }
        }
    };
}

mod gf2n;
mod gfp;
mod z2k;

pub use gf2n::{Gf2, Gf2n128};
pub use gfp::{Gfp61, Gfp127};
pub use z2k::{Z64, Z128};

/// An element of a finite commutative ring with a fixed-width encoding.
pub trait RingElement:
    Copy
    + fmt::Debug
    + Default
    + PartialEq
    + Eq
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + ConditionallySelectable
    + Serialize
    + DeserializeOwned
{
    /// Number of bits of the bit decomposition.
    const BITS: usize;
    /// Length of the packed encoding in bytes.
    const BYTES: usize;
    /// Short name used in the signature of preprocessing files.
    const NAME: &'static str;
    /// The additive identity.
    const ZERO: Self;
    /// The multiplicative identity.
    const ONE: Self;

    /// A uniformly random element.
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self;

    /// Bit `i` of the decomposition, `i < BITS`.
    fn bit(&self, i: usize) -> bool;

    /// The element with only bit `i` set: `2^i` for integer rings, `X^i` for
    /// binary extension fields.
    fn basis(i: usize) -> Self;

    /// Maps a uniformly random block to a (statistically close to) uniform element.
    fn from_block(block: Block) -> Self;

    /// Appends the little-endian encoding of exactly `BYTES` bytes to `out`.
    fn pack(&self, out: &mut Vec<u8>);

    /// Decodes an element from exactly `BYTES` bytes, rejecting non-canonical
    /// encodings.
    fn unpack(bytes: &[u8]) -> Result<Self, Error>;

    /// `true` for the additive identity.
    fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

/// A ring in which every non-zero element is invertible.
pub trait Field: RingElement {
    /// The multiplicative inverse, `None` for zero.
    fn inverse(&self) -> Option<Self>;
}

/// A prime field with `p = 3 mod 4`, where square roots are a single exponentiation.
pub trait PrimeField: Field {
    /// A square root, `None` if `self` is not a quadratic residue.
    fn sqrt(&self) -> Option<Self>;
}

/// Reads the fixed-width little-endian bytes of an element.
pub(crate) fn le_bytes<const N: usize>(bytes: &[u8], name: &'static str) -> Result<[u8; N], Error> {
    bytes.try_into().map_err(|_| Error::InvalidEncoding(name))
}

/// Composes an element from its bit decomposition.
pub fn from_bits<T: RingElement>(bits: impl IntoIterator<Item = bool>) -> T {
    bits.into_iter()
        .enumerate()
        .filter(|(_, b)| *b)
        .map(|(j, _)| T::basis(j))
        .fold(T::ZERO, |acc, x| acc + x)
}
