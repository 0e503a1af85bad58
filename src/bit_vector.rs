//! Packed bit vectors, used for OT choice bits and base-OT choices.
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{block::Block, error::Error};

/// A vector of bits, packed LSB first into bytes.
///
/// Bits beyond `len` in the last byte are always zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitVector {
    bytes: Vec<u8>,
    len: usize,
}

impl BitVector {
    /// A vector of `len` zero bits.
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0; len.div_ceil(8)],
            len,
        }
    }

    /// A vector of `len` uniformly random bits.
    pub fn random<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Self {
        let mut v = Self::new(len);
        rng.fill_bytes(&mut v.bytes);
        v.clear_padding();
        v
    }

    /// Packs a slice of bools.
    pub fn from_bools(bits: &[bool]) -> Self {
        let mut v = Self::new(bits.len());
        for (i, b) in bits.iter().enumerate() {
            v.bytes[i / 8] |= u8::from(*b) << (i % 8);
        }
        v
    }

    /// The `len` first bits of `bytes`.
    pub fn from_bytes(mut bytes: Vec<u8>, len: usize) -> Result<Self, Error> {
        crate::error::check_len(len.div_ceil(8), bytes.len())?;
        bytes.truncate(len.div_ceil(8));
        let mut v = Self { bytes, len };
        v.clear_padding();
        Ok(v)
    }

    /// The number of bits.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` if the vector holds no bits.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bit `i`.
    ///
    /// # Panics
    /// If `i >= len`.
    #[inline]
    pub fn get(&self, i: usize) -> bool {
        assert!(i < self.len, "bit index {i} out of range");
        (self.bytes[i / 8] >> (i % 8)) & 1 == 1
    }

    /// Sets bit `i` to `bit`.
    ///
    /// # Panics
    /// If `i >= len`.
    #[inline]
    pub fn set(&mut self, i: usize, bit: bool) {
        assert!(i < self.len, "bit index {i} out of range");
        let byte = &mut self.bytes[i / 8];
        *byte = (*byte & !(1 << (i % 8))) | (u8::from(bit) << (i % 8));
    }

    /// The packed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bits `128 * i .. 128 * (i + 1)` as a block, zero-padded past the end.
    pub fn get_block(&self, i: usize) -> Block {
        let mut bytes = [0; 16];
        let start = (16 * i).min(self.bytes.len());
        let end = (16 * (i + 1)).min(self.bytes.len());
        bytes[..end - start].copy_from_slice(&self.bytes[start..end]);
        Block::new(bytes)
    }

    /// Bits `64 * i .. 64 * (i + 1)` as a word, zero-padded past the end.
    pub fn get_word(&self, i: usize) -> u64 {
        let mut bytes = [0; 8];
        let start = (8 * i).min(self.bytes.len());
        let end = (8 * (i + 1)).min(self.bytes.len());
        bytes[..end - start].copy_from_slice(&self.bytes[start..end]);
        u64::from_le_bytes(bytes)
    }

    /// Iterates over the bits.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|i| self.get(i))
    }

    /// Changes the length, new bits are zero.
    pub fn resize(&mut self, len: usize) {
        self.bytes.resize(len.div_ceil(8), 0);
        self.len = len;
        self.clear_padding();
    }

    /// Appends the bits of `other`.
    pub fn extend(&mut self, other: &BitVector) {
        let offset = self.len;
        self.resize(self.len + other.len);
        for (i, bit) in other.iter().enumerate() {
            if bit {
                self.set(offset + i, true);
            }
        }
    }

    /// XORs `other` into `self`.
    ///
    /// # Panics
    /// If the lengths differ.
    pub fn xor_assign(&mut self, other: &BitVector) {
        assert_eq!(self.len, other.len, "bit vectors must have the same length");
        crate::utils::xor_inplace(&mut self.bytes, &other.bytes);
    }

    /// Appends `u64 LE length || packed bytes` to `out`.
    pub fn pack(&self, out: &mut Vec<u8>) {
        out.extend((self.len as u64).to_le_bytes());
        out.extend_from_slice(&self.bytes);
    }

    /// Reads a vector written by [`BitVector::pack`], returns it and the number of
    /// bytes consumed.
    pub fn unpack(bytes: &[u8]) -> Result<(Self, usize), Error> {
        let len_bytes = bytes.get(..8).ok_or(Error::InvalidEncoding("BitVector"))?;
        let len = u64::from_le_bytes(crate::ring::le_bytes(len_bytes, "BitVector")?) as usize;
        let n_bytes = len.div_ceil(8);
        let data = bytes
            .get(8..8 + n_bytes)
            .ok_or(Error::InvalidEncoding("BitVector"))?;
        let v = Self::from_bytes(data.to_vec(), len)?;
        if v.bytes != data {
            // non-zero padding bits
            return Err(Error::InvalidEncoding("BitVector"));
        }
        Ok((v, 8 + n_bytes))
    }

    fn clear_padding(&mut self) {
        if self.len % 8 != 0 {
            if let Some(last) = self.bytes.last_mut() {
                *last &= (1 << (self.len % 8)) - 1;
            }
        }
    }
}

impl FromIterator<bool> for BitVector {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let bits: Vec<bool> = iter.into_iter().collect();
        Self::from_bools(&bits)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn get_set() {
        let mut v = BitVector::new(20);
        v.set(3, true);
        v.set(19, true);
        assert!(v.get(3) && v.get(19) && !v.get(4));
        v.set(3, false);
        assert_eq!(
            vec![19],
            v.iter()
                .enumerate()
                .filter(|(_, b)| *b)
                .map(|(i, _)| i)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn random_has_clean_padding() {
        let v = BitVector::random(13, &mut StdRng::seed_from_u64(1));
        assert_eq!(0, v.as_bytes()[1] >> 5);
    }

    #[test]
    fn blocks_and_words() {
        let mut v = BitVector::new(200);
        v.set(130, true);
        v.set(64, true);
        assert_eq!(Block::from(1_u128 << 2), v.get_block(1));
        assert_eq!(1, v.get_word(1));
        assert_eq!(Block::ZERO, v.get_block(5));
    }

    #[test]
    fn extend_appends() {
        let mut a = BitVector::from_bools(&[true, false, true]);
        a.extend(&BitVector::from_bools(&[false, true]));
        assert_eq!(BitVector::from_bools(&[true, false, true, false, true]), a);
    }

    #[test]
    fn unpack_rejects_dirty_padding() {
        let mut bytes = vec![];
        BitVector::from_bools(&[true; 3]).pack(&mut bytes);
        *bytes.last_mut().unwrap() |= 0x80;
        assert!(BitVector::unpack(&bytes).is_err());
    }

    proptest! {
        #[test]
        fn pack_unpack(bits in proptest::collection::vec(any::<bool>(), 0..300)) {
            let v = BitVector::from_bools(&bits);
            let mut bytes = vec![];
            v.pack(&mut bytes);
            let (u, consumed) = BitVector::unpack(&bytes).unwrap();
            prop_assert_eq!(bytes.len(), consumed);
            prop_assert_eq!(v, u);
        }
    }
}
