//! Matrices and vectors of ring elements.
use std::{
    marker::PhantomData,
    ops::{Add, AddAssign, Sub, SubAssign},
};

use rand::Rng;
use serde::{Deserialize, Serialize};
use subtle::{Choice, ConditionallySelectable};

use crate::{
    block::Block,
    error::{Error, check_len},
    ring::{RingElement, from_bits},
};

/// A `U::BITS x V::BITS` bit matrix stored as `U::BITS` rows of `V` elements, one row
/// per bit of a `U` element.
///
/// In the Gilboa multiplication the rows are the OT outputs for the bits of one
/// factor and [`Rectangle::compose`] recombines them into a share of the product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "", try_from = "Vec<V>", into = "Vec<V>")]
pub struct Rectangle<U: RingElement, V: RingElement> {
    rows: Vec<V>,
    _bits: PhantomData<U>,
}

impl<U: RingElement, V: RingElement> TryFrom<Vec<V>> for Rectangle<U, V> {
    type Error = Error;

    fn try_from(rows: Vec<V>) -> Result<Self, Error> {
        Self::from_rows(rows)
    }
}

impl<U: RingElement, V: RingElement> From<Rectangle<U, V>> for Vec<V> {
    fn from(rect: Rectangle<U, V>) -> Self {
        rect.rows
    }
}

impl<U: RingElement, V: RingElement> Default for Rectangle<U, V> {
    fn default() -> Self {
        Self {
            rows: vec![V::ZERO; U::BITS],
            _bits: PhantomData,
        }
    }
}

impl<U: RingElement, V: RingElement> Rectangle<U, V> {
    /// The number of bytes of [`Rectangle::pack`].
    pub const PACKED_LEN: usize = U::BITS * V::BYTES;

    /// Creates a rectangle from exactly `U::BITS` rows.
    pub fn from_rows(rows: Vec<V>) -> Result<Self, Error> {
        check_len(U::BITS, rows.len())?;
        Ok(Self {
            rows,
            _bits: PhantomData,
        })
    }

    /// Maps `U::BITS` random blocks (OT outputs) to rows.
    pub fn from_blocks(blocks: &[Block]) -> Result<Self, Error> {
        Self::from_rows(blocks.iter().map(|b| V::from_block(*b)).collect())
    }

    /// A rectangle with uniformly random rows.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            rows: (0..U::BITS).map(|_| V::random(rng)).collect(),
            _bits: PhantomData,
        }
    }

    /// The rows.
    pub fn rows(&self) -> &[V] {
        &self.rows
    }

    /// Adds row `j` of `other` to row `j` of `self` wherever bit `j` of `choice` is
    /// set, without branching on `choice`.
    pub fn conditional_add(&mut self, choice: U, other: &Self) {
        for (j, (row, o)) in self.rows.iter_mut().zip(&other.rows).enumerate() {
            *row += V::conditional_select(&V::ZERO, o, Choice::from(u8::from(choice.bit(j))));
        }
    }

    /// `Σ_j basis(j) * row_j`, the inverse of splitting a `V` value into its bits.
    ///
    /// Requires `U::BITS <= V::BITS`.
    pub fn compose(&self) -> V {
        self.rows
            .iter()
            .enumerate()
            .map(|(j, row)| V::basis(j) * *row)
            .fold(V::ZERO, |acc, x| acc + x)
    }

    /// The bit-level transpose.
    ///
    /// Row `i` of the result has bit `j` equal to bit `i` of row `j` of `self`. This is
    /// exact for rings in which every bit pattern of `BITS` bits is an element (the
    /// binary fields and `Z_2^k`).
    pub fn transpose(&self) -> Rectangle<V, U> {
        Rectangle {
            rows: (0..V::BITS)
                .map(|i| from_bits::<U>(self.rows.iter().map(|row| row.bit(i))))
                .collect(),
            _bits: PhantomData,
        }
    }

    /// Appends the packed rows, exactly [`Rectangle::PACKED_LEN`] bytes.
    pub fn pack(&self, out: &mut Vec<u8>) {
        self.rows.iter().for_each(|row| row.pack(out));
    }

    /// Decodes a rectangle from exactly [`Rectangle::PACKED_LEN`] bytes.
    pub fn unpack(bytes: &[u8]) -> Result<Self, Error> {
        check_len(Self::PACKED_LEN, bytes.len())?;
        Self::from_rows(
            bytes
                .chunks_exact(V::BYTES)
                .map(V::unpack)
                .collect::<Result<_, _>>()?,
        )
    }
}

impl<U: RingElement, V: RingElement> AddAssign<&Rectangle<U, V>> for Rectangle<U, V> {
    fn add_assign(&mut self, rhs: &Rectangle<U, V>) {
        self.rows.iter_mut().zip(&rhs.rows).for_each(|(a, b)| *a += *b);
    }
}

impl<U: RingElement, V: RingElement> SubAssign<&Rectangle<U, V>> for Rectangle<U, V> {
    fn sub_assign(&mut self, rhs: &Rectangle<U, V>) {
        self.rows.iter_mut().zip(&rhs.rows).for_each(|(a, b)| *a -= *b);
    }
}

/// A vector of ring elements, one column of a VOLE.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Row<T: RingElement> {
    values: Vec<T>,
}

impl<T: RingElement> From<Vec<T>> for Row<T> {
    fn from(values: Vec<T>) -> Self {
        Self { values }
    }
}

impl<T: RingElement> Row<T> {
    /// A row of `len` zeros.
    pub fn new(len: usize) -> Self {
        Self {
            values: vec![T::ZERO; len],
        }
    }

    /// A row of `len` pseudorandom elements drawn from `rng`.
    pub fn random<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Self {
        Self {
            values: (0..len).map(|_| T::from_block(rng.random())).collect(),
        }
    }

    /// The number of elements.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` if the row has no elements.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The elements.
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Returns the elements.
    pub fn into_vec(self) -> Vec<T> {
        self.values
    }

    /// Adds `other` to `self` if `choice` is set, without branching on `choice`.
    pub fn conditional_add(&mut self, choice: Choice, other: &Row<T>) {
        for (a, b) in self.values.iter_mut().zip(&other.values) {
            *a += T::conditional_select(&T::ZERO, b, choice);
        }
    }

    /// `self += c * other`.
    pub fn add_multiple(&mut self, c: T, other: &Row<T>) {
        for (a, b) in self.values.iter_mut().zip(&other.values) {
            *a += c * *b;
        }
    }

    /// Feeds the packed elements into `hasher`.
    pub fn hash_into(&self, hasher: &mut blake3::Hasher) {
        let mut buf = Vec::with_capacity(T::BYTES);
        for x in &self.values {
            buf.clear();
            x.pack(&mut buf);
            hasher.update(&buf);
        }
    }

    /// Appends `u64 LE length || packed elements` to `out`.
    pub fn pack(&self, out: &mut Vec<u8>) {
        out.extend((self.values.len() as u64).to_le_bytes());
        self.values.iter().for_each(|x| x.pack(out));
    }

    /// Reads a row written by [`Row::pack`], returns it and the number of bytes
    /// consumed.
    pub fn unpack(bytes: &[u8]) -> Result<(Self, usize), Error> {
        let len = bytes.get(..8).ok_or(Error::InvalidEncoding("Row"))?;
        let n = u64::from_le_bytes(crate::ring::le_bytes(len, "Row")?) as usize;
        let end = n
            .checked_mul(T::BYTES)
            .and_then(|len| len.checked_add(8))
            .ok_or(Error::InvalidEncoding("Row"))?;
        let data = bytes.get(8..end).ok_or(Error::InvalidEncoding("Row"))?;
        let values = data
            .chunks_exact(T::BYTES)
            .map(T::unpack)
            .collect::<Result<_, _>>()?;
        Ok((Self { values }, end))
    }
}

impl<T: RingElement> AddAssign<&Row<T>> for Row<T> {
    fn add_assign(&mut self, rhs: &Row<T>) {
        self.values.iter_mut().zip(&rhs.values).for_each(|(a, b)| *a += *b);
    }
}

impl<T: RingElement> SubAssign<&Row<T>> for Row<T> {
    fn sub_assign(&mut self, rhs: &Row<T>) {
        self.values.iter_mut().zip(&rhs.values).for_each(|(a, b)| *a -= *b);
    }
}

/// A sum or difference of two rows that has not been computed yet.
///
/// Nothing is allocated until the expression is evaluated with [`RowExpr::eval`] or
/// hashed with [`RowExpr::hash_into`].
#[derive(Debug, Clone, Copy)]
pub enum RowExpr<'a, T: RingElement> {
    /// `a + b`
    Add(&'a Row<T>, &'a Row<T>),
    /// `a - b`
    Sub(&'a Row<T>, &'a Row<T>),
}

impl<T: RingElement> RowExpr<'_, T> {
    fn operands(&self) -> (&Row<T>, &Row<T>) {
        match self {
            RowExpr::Add(a, b) | RowExpr::Sub(a, b) => (a, b),
        }
    }

    fn elements(&self) -> impl Iterator<Item = T> + '_ {
        let (a, b) = self.operands();
        let add = matches!(self, RowExpr::Add(..));
        a.values
            .iter()
            .zip(&b.values)
            .map(move |(x, y)| if add { *x + *y } else { *x - *y })
    }

    /// Computes the row.
    pub fn eval(&self) -> Row<T> {
        Row {
            values: self.elements().collect(),
        }
    }

    /// Writes the row into `dest`, reusing its allocation.
    pub fn eval_into(&self, dest: &mut Row<T>) {
        dest.values.clear();
        dest.values.extend(self.elements());
    }

    /// Feeds the packed elements of the row into `hasher`.
    pub fn hash_into(&self, hasher: &mut blake3::Hasher) {
        let mut buf = Vec::with_capacity(T::BYTES);
        for x in self.elements() {
            buf.clear();
            x.pack(&mut buf);
            hasher.update(&buf);
        }
    }
}

impl<'a, T: RingElement> Add for &'a Row<T> {
    type Output = RowExpr<'a, T>;

    fn add(self, rhs: Self) -> RowExpr<'a, T> {
        RowExpr::Add(self, rhs)
    }
}

impl<'a, T: RingElement> Sub for &'a Row<T> {
    type Output = RowExpr<'a, T>;

    fn sub(self, rhs: Self) -> RowExpr<'a, T> {
        RowExpr::Sub(self, rhs)
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::ring::{Gf2, Gf2n128, Gfp127, Z64, Z128};

    #[test]
    fn gilboa_product_via_compose() {
        let mut rng = StdRng::seed_from_u64(1);
        let (a, b) = (Gfp127::random(&mut rng), Gfp127::random(&mut rng));
        // random OT outputs m0, m1 and the correction u = m0 - m1 + a
        let m0 = Rectangle::<Gfp127, Gfp127>::random(&mut rng);
        let m1 = Rectangle::<Gfp127, Gfp127>::random(&mut rng);
        let mut u = m0.clone();
        u -= &m1;
        u.rows.iter_mut().for_each(|row| *row += a);
        // the receiver knows m_{b_j} for every bit j of b
        let mut received = Rectangle::<Gfp127, Gfp127>::from_rows(
            (0..127)
                .map(|j| if b.bit(j) { m1.rows[j] } else { m0.rows[j] })
                .collect(),
        )
        .unwrap();
        received.conditional_add(b, &u);
        assert_eq!(a * b, received.compose() - m0.compose());
    }

    #[test]
    fn transpose_is_exact_for_binary_rings() {
        let mut rng = StdRng::seed_from_u64(2);
        let r = Rectangle::<Z64, Z128>::random(&mut rng);
        let t = r.transpose();
        assert_eq!(128, t.rows().len());
        assert_eq!(r, t.transpose());
        for (i, row) in t.rows().iter().enumerate().take(5) {
            for j in 0..64 {
                assert_eq!(r.rows()[j].bit(i), row.bit(j));
            }
        }
    }

    #[test]
    fn rectangle_pack_unpack() {
        let mut rng = StdRng::seed_from_u64(3);
        let r = Rectangle::<Gf2, Gf2n128>::random(&mut rng);
        let mut bytes = vec![];
        r.pack(&mut bytes);
        assert_eq!(Rectangle::<Gf2, Gf2n128>::PACKED_LEN, bytes.len());
        assert_eq!(r, Rectangle::unpack(&bytes).unwrap());
        assert!(Rectangle::<Gf2, Gf2n128>::unpack(&bytes[1..]).is_err());
    }

    #[test]
    fn deserialize_rejects_wrong_row_count() {
        let mut rng = StdRng::seed_from_u64(6);
        let r = Rectangle::<Z64, Gfp127>::random(&mut rng);
        let bytes = bincode::serialize(&r).unwrap();
        assert_eq!(r, bincode::deserialize(&bytes).unwrap());

        let short = bincode::serialize(&vec![Gfp127::ONE; 3]).unwrap();
        assert!(bincode::deserialize::<Rectangle<Z64, Gfp127>>(&short).is_err());
        let long = bincode::serialize(&vec![Gfp127::ONE; 65]).unwrap();
        assert!(bincode::deserialize::<Rectangle<Z64, Gfp127>>(&long).is_err());
    }

    #[test]
    fn deferred_expressions_match_eager_arithmetic() {
        let mut rng = StdRng::seed_from_u64(4);
        let a = Row::<Gfp127>::random(10, &mut rng);
        let b = Row::<Gfp127>::random(10, &mut rng);
        let sum = (&a + &b).eval();
        let mut diff = Row::new(3);
        (&a - &b).eval_into(&mut diff);
        for j in 0..10 {
            assert_eq!(a.values()[j] + b.values()[j], sum.values()[j]);
            assert_eq!(a.values()[j] - b.values()[j], diff.values()[j]);
        }

        let mut eager = blake3::Hasher::new();
        sum.hash_into(&mut eager);
        let mut lazy = blake3::Hasher::new();
        (&a + &b).hash_into(&mut lazy);
        assert_eq!(eager.finalize(), lazy.finalize());
    }

    #[test]
    fn row_operations() {
        let mut rng = StdRng::seed_from_u64(5);
        let a = Row::<Z64>::random(4, &mut rng);
        let mut acc = Row::new(4);
        acc.conditional_add(Choice::from(0), &a);
        assert_eq!(Row::new(4), acc);
        acc.conditional_add(Choice::from(1), &a);
        acc.add_multiple(Z64::new(2), &a);
        acc -= &a;
        let mut expected = a.clone();
        expected += &a;
        assert_eq!(expected, acc);

        let mut bytes = vec![];
        a.pack(&mut bytes);
        let (u, consumed) = Row::<Z64>::unpack(&bytes).unwrap();
        assert_eq!((a, bytes.len()), (u, consumed));
    }
}
