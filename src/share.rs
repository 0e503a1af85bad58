//! Additively secret-shared values with information-theoretic MACs.
//!
//! A value `x` is shared as `x = Σ_i x_i` and authenticated under the global
//! MAC key `α = Σ_i α_i` by shares `m_i` with `Σ_i m_i = α * x`. For SPDZ2k-style
//! sharing the MAC ring `M` is larger than the value ring `T` and values are
//! lifted with `M::from`.
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::{error::Error, ring::RingElement};

/// One party's share of an authenticated value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Share<T: RingElement, M: RingElement = T> {
    /// Additive share of the value.
    pub value: T,
    /// Additive share of the MAC.
    pub mac: M,
}

impl<T: RingElement, M: RingElement + From<T>> Share<T, M> {
    /// Creates a share from its parts.
    pub fn new(value: T, mac: M) -> Self {
        Self { value, mac }
    }

    /// Multiplies the shared value with a public constant.
    pub fn mul_public(self, c: T) -> Self {
        Self {
            value: self.value * c,
            mac: self.mac * M::from(c),
        }
    }

    /// Adds a public constant to the shared value.
    ///
    /// Only party 0 changes its value share, every party adjusts its MAC share by
    /// `α_i * c`.
    pub fn add_public(self, c: T, mac_key_share: M, my_num: usize) -> Self {
        Self {
            value: if my_num == 0 { self.value + c } else { self.value },
            mac: self.mac + mac_key_share * M::from(c),
        }
    }
}

impl<T: RingElement, M: RingElement> Add for Share<T, M> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            value: self.value + rhs.value,
            mac: self.mac + rhs.mac,
        }
    }
}

impl<T: RingElement, M: RingElement> Sub for Share<T, M> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            value: self.value - rhs.value,
            mac: self.mac - rhs.mac,
        }
    }
}

impl<T: RingElement, M: RingElement> Neg for Share<T, M> {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            value: -self.value,
            mac: -self.mac,
        }
    }
}

impl<T: RingElement, M: RingElement> AddAssign for Share<T, M> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<T: RingElement, M: RingElement> SubAssign for Share<T, M> {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

/// One party's share of a Beaver triple `c = a * b`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Triple<T: RingElement, M: RingElement = T> {
    /// Share of the first factor.
    pub a: Share<T, M>,
    /// Share of the second factor.
    pub b: Share<T, M>,
    /// Share of the product.
    pub c: Share<T, M>,
}

/// One party's share of a triple without MACs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct PlainTriple<T: RingElement> {
    /// Share of the first factor.
    pub a: T,
    /// Share of the second factor.
    pub b: T,
    /// Share of the product.
    pub c: T,
}

/// One party's share of a private input together with the clear value, which only
/// the owner of the input knows (all other parties store zero).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct InputTuple<T: RingElement, M: RingElement = T> {
    /// Share of the input mask.
    pub share: Share<T, M>,
    /// The input mask in the clear for the owner, zero for everyone else.
    pub value: T,
}

/// Data with a fixed-width binary encoding that can be stored in preprocessing files.
pub trait Persist: Sized {
    /// Length of the encoding in bytes.
    const PACKED_LEN: usize;

    /// A string identifying the data type, stored in the file header.
    fn signature() -> String;

    /// Appends exactly [`Persist::PACKED_LEN`] bytes to `out`.
    fn pack(&self, out: &mut Vec<u8>);

    /// Decodes one item from exactly [`Persist::PACKED_LEN`] bytes.
    fn unpack(bytes: &[u8]) -> Result<Self, Error>;
}

impl<T: RingElement, M: RingElement> Persist for Share<T, M> {
    const PACKED_LEN: usize = T::BYTES + M::BYTES;

    fn signature() -> String {
        format!("Share<{},{}>", T::NAME, M::NAME)
    }

    fn pack(&self, out: &mut Vec<u8>) {
        self.value.pack(out);
        self.mac.pack(out);
    }

    fn unpack(bytes: &[u8]) -> Result<Self, Error> {
        crate::error::check_len(Self::PACKED_LEN, bytes.len())?;
        let (value, mac) = bytes.split_at(T::BYTES);
        Ok(Self {
            value: T::unpack(value)?,
            mac: M::unpack(mac)?,
        })
    }
}

impl<T: RingElement, M: RingElement> Persist for Triple<T, M> {
    const PACKED_LEN: usize = 3 * <Share<T, M> as Persist>::PACKED_LEN;

    fn signature() -> String {
        format!("Triple({})", <Share<T, M> as Persist>::signature())
    }

    fn pack(&self, out: &mut Vec<u8>) {
        self.a.pack(out);
        self.b.pack(out);
        self.c.pack(out);
    }

    fn unpack(bytes: &[u8]) -> Result<Self, Error> {
        crate::error::check_len(Self::PACKED_LEN, bytes.len())?;
        let len = <Share<T, M> as Persist>::PACKED_LEN;
        Ok(Self {
            a: Share::unpack(&bytes[..len])?,
            b: Share::unpack(&bytes[len..2 * len])?,
            c: Share::unpack(&bytes[2 * len..])?,
        })
    }
}

impl<T: RingElement> Persist for PlainTriple<T> {
    const PACKED_LEN: usize = 3 * T::BYTES;

    fn signature() -> String {
        format!("PlainTriple({})", T::NAME)
    }

    fn pack(&self, out: &mut Vec<u8>) {
        self.a.pack(out);
        self.b.pack(out);
        self.c.pack(out);
    }

    fn unpack(bytes: &[u8]) -> Result<Self, Error> {
        crate::error::check_len(Self::PACKED_LEN, bytes.len())?;
        Ok(Self {
            a: T::unpack(&bytes[..T::BYTES])?,
            b: T::unpack(&bytes[T::BYTES..2 * T::BYTES])?,
            c: T::unpack(&bytes[2 * T::BYTES..])?,
        })
    }
}

impl<T: RingElement, M: RingElement> Persist for InputTuple<T, M> {
    const PACKED_LEN: usize = <Share<T, M> as Persist>::PACKED_LEN + T::BYTES;

    fn signature() -> String {
        format!("Input({})", <Share<T, M> as Persist>::signature())
    }

    fn pack(&self, out: &mut Vec<u8>) {
        self.share.pack(out);
        self.value.pack(out);
    }

    fn unpack(bytes: &[u8]) -> Result<Self, Error> {
        crate::error::check_len(Self::PACKED_LEN, bytes.len())?;
        let (share, value) = bytes.split_at(<Share<T, M> as Persist>::PACKED_LEN);
        Ok(Self {
            share: Share::unpack(share)?,
            value: T::unpack(value)?,
        })
    }
}

/// Pairs of shares, used for squares `(a, a^2)` and inverses `(a, a^-1)`.
impl<T: RingElement, M: RingElement> Persist for (Share<T, M>, Share<T, M>) {
    const PACKED_LEN: usize = 2 * <Share<T, M> as Persist>::PACKED_LEN;

    fn signature() -> String {
        format!("Pair({})", <Share<T, M> as Persist>::signature())
    }

    fn pack(&self, out: &mut Vec<u8>) {
        self.0.pack(out);
        self.1.pack(out);
    }

    fn unpack(bytes: &[u8]) -> Result<Self, Error> {
        crate::error::check_len(Self::PACKED_LEN, bytes.len())?;
        let (first, second) = bytes.split_at(Self::PACKED_LEN / 2);
        Ok((Share::unpack(first)?, Share::unpack(second)?))
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::ring::{Gf2, Gf2n128, Gfp127, Z64, Z128};

    fn random_share<T: RingElement, M: RingElement>(rng: &mut StdRng) -> Share<T, M> {
        Share {
            value: T::random(rng),
            mac: M::random(rng),
        }
    }

    #[test]
    fn public_operations_keep_macs_valid() {
        let mut rng = StdRng::seed_from_u64(5);
        let alpha = [Gfp127::random(&mut rng), Gfp127::random(&mut rng)];
        let x = Gfp127::random(&mut rng);
        let x0 = Gfp127::random(&mut rng);
        let m0 = Gfp127::random(&mut rng);
        let shares = [
            Share::new(x0, m0),
            Share::new(x - x0, (alpha[0] + alpha[1]) * x - m0),
        ];
        let c = Gfp127::new(17);
        let added: Vec<_> = (0..2).map(|i| shares[i].add_public(c, alpha[i], i)).collect();
        let scaled: Vec<_> = shares.iter().map(|s| s.mul_public(c)).collect();
        for (sh, expected) in [(added, x + c), (scaled, x * c)] {
            let value = sh[0].value + sh[1].value;
            let mac = sh[0].mac + sh[1].mac;
            assert_eq!(expected, value);
            assert_eq!((alpha[0] + alpha[1]) * value, mac);
        }
    }

    #[test]
    fn persist_round_trips() {
        let mut rng = StdRng::seed_from_u64(9);
        let t: Triple<Z64, Z128> = Triple {
            a: random_share(&mut rng),
            b: random_share(&mut rng),
            c: random_share(&mut rng),
        };
        let mut bytes = vec![];
        t.pack(&mut bytes);
        assert_eq!(Triple::<Z64, Z128>::PACKED_LEN, bytes.len());
        assert_eq!(t, Triple::unpack(&bytes).unwrap());

        let pair: (Share<Gf2, Gf2n128>, Share<Gf2, Gf2n128>) =
            (random_share(&mut rng), random_share(&mut rng));
        let mut bytes = vec![];
        pair.pack(&mut bytes);
        assert_eq!(34, bytes.len());
        assert_eq!(pair, <(Share<Gf2, Gf2n128>, Share<Gf2, Gf2n128>)>::unpack(&bytes).unwrap());
        assert!(Share::<Gf2, Gf2n128>::unpack(&bytes[..16]).is_err());
    }

    #[test]
    fn signatures_differ_between_types() {
        assert_ne!(
            <Triple<Gfp127> as Persist>::signature(),
            <Triple<Z64, Z128> as Persist>::signature()
        );
        assert_eq!("Triple(Share<p127,p127>)", <Triple<Gfp127> as Persist>::signature());
    }
}
