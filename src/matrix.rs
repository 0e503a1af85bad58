//! Bit matrices for the OT extension and ring-element matrices for multiplication.
//!
//! A [`BitMatrix`] is a vertical stack of [`Square128`] tiles. During the OT
//! extension it is first filled column by column (tile `s`, row `j` holds bits
//! `128 * s .. 128 * (s + 1)` of the PRG output of base OT `j`) and then transposed
//! tile by tile, after which row `l` of the stack is the 128-bit string of extended
//! OT `l`.
use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use subtle::Choice;

use crate::{
    bit_vector::BitVector,
    block::Block,
    crypto::AesRng,
    error::{Error, check_len},
    transpose::transpose_bitmatrix,
};

mod rectangle;

pub use rectangle::{Rectangle, Row, RowExpr};

/// A 128 x 128 bit matrix, one [`Block`] per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct Square128(pub [Block; 128]);

impl Default for Square128 {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl Square128 {
    /// Number of bytes of a square.
    pub const BYTES: usize = 128 * Block::BYTES;

    /// A uniformly random square.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut sq = Self::zeroed();
        rng.fill_bytes(bytemuck::bytes_of_mut(&mut sq));
        sq
    }

    /// Entry `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> bool {
        self.0[row].bit(col)
    }

    /// The transposed square, `t.get(i, j) == self.get(j, i)`.
    pub fn transpose(&self) -> Self {
        let mut out = Self::zeroed();
        transpose_bitmatrix(
            bytemuck::bytes_of(self),
            bytemuck::bytes_of_mut(&mut out),
            128,
        );
        out
    }

    /// XORs row `j` of `other` into row `j` of `self` wherever bit `j` of `choice`
    /// is set, without branching on `choice`.
    pub fn conditional_add(&mut self, choice: Block, other: &Self) {
        for (j, (row, o)) in self.0.iter_mut().zip(&other.0).enumerate() {
            *row ^= o.const_mul(Choice::from(u8::from(choice.bit(j))));
        }
    }

    /// XORs `other` into `self`.
    pub fn xor_assign(&mut self, other: &Self) {
        crate::utils::xor_inplace(&mut self.0, &other.0);
    }
}

impl Serialize for Square128 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytemuck::bytes_of(self))
    }
}

impl<'de> Deserialize<'de> for Square128 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        if bytes.len() != Self::BYTES {
            return Err(de::Error::invalid_length(bytes.len(), &"2048 bytes"));
        }
        let mut sq = Self::zeroed();
        bytemuck::bytes_of_mut(&mut sq).copy_from_slice(&bytes);
        Ok(sq)
    }
}

/// A bit matrix with a multiple of 128 rows and 128 columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitMatrix {
    squares: Vec<Square128>,
}

impl BitMatrix {
    /// A zero matrix with at least `n_rows` rows, rounded up to a multiple of 128.
    pub fn new(n_rows: usize) -> Self {
        Self {
            squares: vec![Square128::zeroed(); n_rows.div_ceil(128)],
        }
    }

    /// The number of rows.
    pub fn n_rows(&self) -> usize {
        self.squares.len() * 128
    }

    /// The tiles of the matrix.
    pub fn squares(&self) -> &[Square128] {
        &self.squares
    }

    /// The contiguous tiles `range`, covering rows `128 * range.start .. 128 * range.end`.
    pub fn slice(&self, range: Range<usize>) -> Result<&[Square128], Error> {
        self.squares.get(range).ok_or(Error::Bug("bit matrix slice out of range"))
    }

    /// All rows, in order.
    pub fn rows(&self) -> &[Block] {
        bytemuck::cast_slice(&self.squares)
    }

    /// Row `l`.
    pub fn row(&self, l: usize) -> Block {
        self.rows()[l]
    }

    /// Fills the matrix in column form: row `j` of every tile is taken from
    /// `rngs[j]`, tile after tile.
    pub fn expand(&mut self, rngs: &mut [AesRng]) -> Result<(), Error> {
        check_len(128, rngs.len())?;
        for (j, rng) in rngs.iter_mut().enumerate() {
            for sq in &mut self.squares {
                sq.0[j] = rng.random();
            }
        }
        Ok(())
    }

    /// XORs the choice bits into every column-form row: tile `s` gets bits
    /// `128 * s .. 128 * (s + 1)` of `choices`.
    pub fn xor_choice_bits(&mut self, choices: &BitVector) -> Result<(), Error> {
        check_len(self.n_rows(), choices.len())?;
        for (s, sq) in self.squares.iter_mut().enumerate() {
            let r = choices.get_block(s);
            sq.0.iter_mut().for_each(|row| *row ^= r);
        }
        Ok(())
    }

    /// [`Square128::conditional_add`] for every tile.
    pub fn conditional_add(&mut self, choice: Block, other: &BitMatrix) -> Result<(), Error> {
        check_len(self.squares.len(), other.squares.len())?;
        for (sq, o) in self.squares.iter_mut().zip(&other.squares) {
            sq.conditional_add(choice, o);
        }
        Ok(())
    }

    /// XORs `other` into `self`.
    pub fn xor_assign(&mut self, other: &BitMatrix) -> Result<(), Error> {
        check_len(self.squares.len(), other.squares.len())?;
        for (sq, o) in self.squares.iter_mut().zip(&other.squares) {
            sq.xor_assign(o);
        }
        Ok(())
    }

    /// Transposes every tile in place.
    pub fn transpose(&mut self) {
        for sq in &mut self.squares {
            *sq = sq.transpose();
        }
    }

    /// Flips the entry `(row, col)`.
    #[cfg(test)]
    pub(crate) fn flip_bit(&mut self, row: usize, col: usize) {
        let block = &mut bytemuck::cast_slice_mut::<Square128, Block>(&mut self.squares)[row];
        *block ^= Block::from(1_u128 << col);
    }

    /// Appends `u64 LE number of tiles || tiles` to `out`.
    pub fn pack(&self, out: &mut Vec<u8>) {
        out.extend((self.squares.len() as u64).to_le_bytes());
        out.extend_from_slice(bytemuck::cast_slice(&self.squares));
    }

    /// Reads a matrix written by [`BitMatrix::pack`], returns it and the number of
    /// bytes consumed.
    pub fn unpack(bytes: &[u8]) -> Result<(Self, usize), Error> {
        let len = bytes.get(..8).ok_or(Error::InvalidEncoding("BitMatrix"))?;
        let n = u64::from_le_bytes(crate::ring::le_bytes(len, "BitMatrix")?) as usize;
        let end = n
            .checked_mul(Square128::BYTES)
            .and_then(|len| len.checked_add(8))
            .ok_or(Error::InvalidEncoding("BitMatrix"))?;
        let data = bytes.get(8..end).ok_or(Error::InvalidEncoding("BitMatrix"))?;
        let mut squares = vec![Square128::zeroed(); n];
        bytemuck::cast_slice_mut::<Square128, u8>(&mut squares).copy_from_slice(data);
        Ok((Self { squares }, end))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;

    fn square_from_seed(seed: u64) -> Square128 {
        Square128::random(&mut StdRng::seed_from_u64(seed))
    }

    proptest! {
        #[test]
        fn transpose_is_an_involution(seed in any::<u64>()) {
            let sq = square_from_seed(seed);
            prop_assert_eq!(sq, sq.transpose().transpose());
        }

        #[test]
        fn transpose_swaps_indices(seed in any::<u64>(), i in 0..128_usize, j in 0..128_usize) {
            let sq = square_from_seed(seed);
            prop_assert_eq!(sq.get(i, j), sq.transpose().get(j, i));
        }
    }

    #[test]
    fn conditional_add_selects_rows() {
        let mut a = Square128::zeroed();
        let b = square_from_seed(2);
        let choice = Block::from(0b101_u128);
        a.conditional_add(choice, &b);
        assert_eq!(b.0[0], a.0[0]);
        assert_eq!(Block::ZERO, a.0[1]);
        assert_eq!(b.0[2], a.0[2]);
        assert!(a.0[3..].iter().all(|row| *row == Block::ZERO));
    }

    #[test]
    fn expand_is_deterministic_per_column() -> Result<(), Error> {
        let seeds: Vec<Block> = (0..128_u128).map(Block::from).collect();
        let mut rngs: Vec<AesRng> = seeds.iter().map(|s| AesRng::from_seed(*s)).collect();
        let mut m = BitMatrix::new(300);
        assert_eq!(384, m.n_rows());
        m.expand(&mut rngs)?;
        let mut rng = AesRng::from_seed(seeds[7]);
        for s in 0..3 {
            assert_eq!(rng.random::<Block>(), m.squares()[s].0[7]);
        }
        assert!(m.expand(&mut rngs[..5]).is_err());
        Ok(())
    }

    #[test]
    fn choice_bits_become_columns_after_transpose() -> Result<(), Error> {
        let mut rng = StdRng::seed_from_u64(4);
        let choices = BitVector::random(256, &mut rng);
        let mut m = BitMatrix::new(256);
        m.xor_choice_bits(&choices)?;
        m.transpose();
        for l in 0..256 {
            let expected = if choices.get(l) { Block::ONES } else { Block::ZERO };
            assert_eq!(expected, m.row(l));
        }
        Ok(())
    }

    #[test]
    fn pack_unpack() -> Result<(), Error> {
        let mut rng = StdRng::seed_from_u64(8);
        let m = BitMatrix {
            squares: (0..3).map(|_| Square128::random(&mut rng)).collect(),
        };
        let mut bytes = vec![];
        m.pack(&mut bytes);
        let (u, consumed) = BitMatrix::unpack(&bytes)?;
        assert_eq!(bytes.len(), consumed);
        assert_eq!(m, u);
        assert!(BitMatrix::unpack(&bytes[..100]).is_err());

        let decoded: BitMatrix = bincode::deserialize(&bincode::serialize(&m).unwrap()).unwrap();
        assert_eq!(m, decoded);
        Ok(())
    }
}
