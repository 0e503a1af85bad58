//! Arithmetic in GF(2^128) with the modulus `x^128 + x^7 + x^2 + x + 1`.
//!
//! Used by the KOS correlation check (unreduced carry-less products) and by the
//! [`crate::ring::Gf2n128`] MAC ring.
#![allow(unsafe_code)]

use super::Block;

/// Low part of the reduction polynomial.
const MOD: u64 = 0b10000111;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
cpufeatures::new!(target_feature_pclmulqdq, "pclmulqdq");

impl Block {
    /// Carry-less multiplication of two blocks as polynomials over GF(2).
    ///
    /// Returns the `(low, high)` halves of the 256-bit product. Uses pclmulqdq if
    /// it is available at runtime.
    #[inline]
    pub fn clmul(&self, rhs: &Self) -> (Self, Self) {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        if target_feature_pclmulqdq::get() {
            // SAFETY: pclmulqdq is available
            let (low, high) = unsafe { clmul::clmul128(self.into(), rhs.into()) };
            return (low.into(), high.into());
        }
        let (low, high) = scalar::clmul128(self.into(), rhs.into());
        (low.into(), high.into())
    }

    /// Multiplication in GF(2^128).
    #[inline]
    pub fn gf_mul(&self, rhs: &Self) -> Self {
        let (low, high) = self.clmul(rhs);
        Self::gf_reduce(&low, &high)
    }

    /// Reduces a 256-bit polynomial given as `(low, high)` modulo the field polynomial.
    #[inline]
    pub fn gf_reduce(low: &Self, high: &Self) -> Self {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        if target_feature_pclmulqdq::get() {
            // SAFETY: pclmulqdq is available
            return unsafe { clmul::gf128_reduce(low.into(), high.into()) }.into();
        }
        scalar::gf128_reduce(low.into(), high.into()).into()
    }

    /// Exponentiation in GF(2^128) by square-and-multiply.
    pub fn gf_pow(&self, mut exp: u128) -> Block {
        let mut acc = Block::ONE;
        let mut base = *self;
        while exp != 0 {
            if exp & 1 != 0 {
                acc = acc.gf_mul(&base);
            }
            base = base.gf_mul(&base);
            exp >>= 1;
        }
        acc
    }

    /// Multiplicative inverse in GF(2^128), `None` for zero.
    ///
    /// Computed as `self^(2^128 - 2)`.
    pub fn gf_inverse(&self) -> Option<Block> {
        if *self == Block::ZERO {
            None
        } else {
            Some(self.gf_pow(u128::MAX - 1))
        }
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod clmul {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::*;
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::*;

    use super::MOD;

    /// Carry-less multiply of two 128-bit values, returns `(low, high)`.
    #[target_feature(enable = "pclmulqdq")]
    #[inline]
    pub fn clmul128(a: __m128i, b: __m128i) -> (__m128i, __m128i) {
        let ab_low = _mm_clmulepi64_si128::<0x00>(a, b);
        let ab_high = _mm_clmulepi64_si128::<0x11>(a, b);
        let ab_mid = _mm_xor_si128(
            _mm_clmulepi64_si128::<0x01>(a, b),
            _mm_clmulepi64_si128::<0x10>(a, b),
        );
        let low = _mm_xor_si128(ab_low, _mm_slli_si128::<8>(ab_mid));
        let high = _mm_xor_si128(ab_high, _mm_srli_si128::<8>(ab_mid));
        (low, high)
    }

    /// Reduction modulo `x^128 + x^7 + x^2 + x + 1` with two folding steps.
    #[target_feature(enable = "pclmulqdq")]
    #[inline]
    pub fn gf128_reduce(mut low: __m128i, mut high: __m128i) -> __m128i {
        let modulus = [MOD, 0];
        // SAFETY: pointer to modulus is valid for 8 bytes, pclmulqdq implies sse2
        let modulus = unsafe { _mm_loadu_si64(modulus.as_ptr().cast()) };

        // fold the upper 64 bits of high into the lower 192 bits
        let tmp = _mm_clmulepi64_si128::<0x01>(high, modulus);
        let tmp_shifted = _mm_slli_si128::<8>(tmp);
        low = _mm_xor_si128(low, tmp_shifted);
        high = _mm_xor_si128(high, tmp_shifted);
        let tmp = _mm_clmulepi64_si128::<0x01>(tmp, modulus);
        low = _mm_xor_si128(low, tmp);

        // fold the remaining lower 64 bits of high
        let tmp = _mm_clmulepi64_si128::<0x00>(high, modulus);
        _mm_xor_si128(low, tmp)
    }
}

mod scalar {
    /// Carry-less multiply of two 128-bit values (Karatsuba), returns `(low, high)`.
    #[inline]
    pub fn clmul128(a: u128, b: u128) -> (u128, u128) {
        let (a_low, a_high) = (a as u64, (a >> 64) as u64);
        let (b_low, b_high) = (b as u64, (b >> 64) as u64);

        let ab_low = clmul64(a_low, b_low);
        let ab_high = clmul64(a_high, b_high);
        let ab_mid = clmul64(a_low ^ a_high, b_low ^ b_high) ^ ab_low ^ ab_high;
        (ab_low ^ (ab_mid << 64), ab_high ^ (ab_mid >> 64))
    }

    /// Constant-time 64x64 carry-less multiply using integer multiplication with
    /// "holes" every four bits so that carries never reach a result bit.
    ///
    /// See <https://www.bearssl.org/constanttime.html#ghash-for-gcm>.
    #[inline]
    fn clmul64(x: u64, y: u64) -> u128 {
        const M: [u64; 4] = [
            0x1111_1111_1111_1111,
            0x2222_2222_2222_2222,
            0x4444_4444_4444_4444,
            0x8888_8888_8888_8888,
        ];
        let xs = M.map(|m| (x & m) as u128);
        let ys = M.map(|m| (y & m) as u128);

        let mut z = 0;
        for k in 0..4 {
            // sum over all i + j = k (mod 4)
            let zk = (0..4).fold(0, |acc, i| acc ^ (xs[i] * ys[(k + 4 - i) % 4]));
            let mask = (M[k] as u128) | ((M[k] as u128) << 64);
            z |= zk & mask;
        }
        z
    }

    /// Reduces `high * x^128 + low` using `x^128 = x^7 + x^2 + x + 1`.
    #[inline]
    pub fn gf128_reduce(low: u128, high: u128) -> u128 {
        // bits of high shifted beyond x^127 by the multiplication with x^7 + x^2 + x
        let overflow = (high >> (128 - 7)) ^ (high >> (128 - 2)) ^ (high >> (128 - 1));
        let folded = (high << 7) ^ (high << 2) ^ (high << 1) ^ high;
        let overflow = (overflow << 7) ^ (overflow << 2) ^ (overflow << 1) ^ overflow;
        low ^ folded ^ overflow
    }

}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::scalar;
    use crate::block::Block;

    #[test]
    fn dispatch_matches_scalar() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let (a, b): (u128, u128) = rng.random();
            let (low, high) = Block::from(a).clmul(&Block::from(b));
            let dispatched: (u128, u128) = (low.into(), high.into());
            assert_eq!(scalar::clmul128(a, b), dispatched);
            let (sl, sh) = scalar::clmul128(a, b);
            assert_eq!(
                scalar::gf128_reduce(sl, sh),
                u128::from(Block::from(a).gf_mul(&Block::from(b)))
            );
        }
    }

    #[test]
    fn pow_and_inverse() {
        let b: Block = 24646523424323_u128.into();
        assert_eq!(Block::ONE, b.gf_pow(0));
        assert_eq!(b.gf_mul(&b).gf_mul(&b), b.gf_pow(3));
        let inv = b.gf_inverse().unwrap();
        assert_eq!(Block::ONE, b.gf_mul(&inv));
        assert!(Block::ZERO.gf_inverse().is_none());
    }
}
