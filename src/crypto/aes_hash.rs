//! Tweakable correlation robust hash from fixed-key AES (TMMO of
//! <https://eprint.iacr.org/2019/074>).
//!
//! The OT extension hashes row `l` of the extended matrix with tweak `l`, which
//! turns correlated OTs (`q = t ^ r * delta`) into random OTs.
use std::sync::LazyLock;

use aes::{
    Aes128,
    cipher::{BlockCipherEncrypt, Key, KeyInit},
};

use crate::{block::Block, crypto::AES_PAR_BLOCKS};

/// AES accelerated hashing of [`Block`]s.
#[derive(Clone)]
pub(crate) struct AesHash {
    aes: Aes128,
}

impl AesHash {
    /// Create a new `AesHash` with the given key.
    pub(crate) fn new(key: &Key<Aes128>) -> Self {
        Self {
            aes: Aes128::new(key),
        }
    }

    /// Calculates `π(π(x) ^ tweak) ^ π(x)` for a single block.
    pub(crate) fn tccr_hash_block(&self, tweak: Block, x: Block) -> Block {
        let mut x_enc = x.into();
        self.aes.encrypt_block(&mut x_enc);
        let mut masked = (Block::from(x_enc) ^ tweak).into();
        self.aes.encrypt_block(&mut masked);
        Block::from(masked) ^ Block::from(x_enc)
    }

    /// Calculates `π(π(x) ^ tweak(i)) ^ π(x)` in-place, `i` being the index in `x`.
    ///
    /// Processes [`AES_PAR_BLOCKS`] blocks at a time to use AES instruction-level
    /// parallelism.
    pub(crate) fn tccr_hash_slice_mut(
        &self,
        x: &mut [Block],
        mut tweak_fn: impl FnMut(usize) -> Block,
    ) {
        let mut tmp = [aes::Block::default(); AES_PAR_BLOCKS];
        for (chunk_idx, chunk) in x.chunks_mut(AES_PAR_BLOCKS).enumerate() {
            let tmp = &mut tmp[..chunk.len()];
            for (enc, x) in tmp.iter_mut().zip(chunk.iter()) {
                *enc = (*x).into();
            }
            // π(x)
            self.aes.encrypt_blocks(tmp);
            // π(x) ^ tweak
            for (idx, (dest, x_enc)) in chunk.iter_mut().zip(tmp.iter()).enumerate() {
                *dest = Block::from(*x_enc) ^ tweak_fn(chunk_idx * AES_PAR_BLOCKS + idx);
            }
            self.aes.encrypt_blocks(bytemuck::cast_slice_mut(chunk));
            for (dest, x_enc) in chunk.iter_mut().zip(tmp.iter()) {
                *dest ^= Block::from(*x_enc);
            }
        }
    }
}

/// An `AesHash` with a fixed, public key.
pub(crate) static FIXED_KEY_HASH: LazyLock<AesHash> = LazyLock::new(|| {
    let key = 0x5c3e_91a7_0d24_f6b8_43e1_7a90_c2d5_1f68_u128
        .to_le_bytes()
        .into();
    AesHash::new(&key)
});

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::FIXED_KEY_HASH;
    use crate::block::Block;

    #[test]
    fn slice_hash_matches_single_block_hash() {
        let mut rng = StdRng::seed_from_u64(11);
        let blocks: Vec<Block> = (0..50).map(|_| rng.random()).collect();
        let mut hashed = blocks.clone();
        FIXED_KEY_HASH.tccr_hash_slice_mut(&mut hashed, |i| Block::from(i as u128 + 1000));
        for (i, (x, h)) in blocks.iter().zip(&hashed).enumerate() {
            assert_eq!(FIXED_KEY_HASH.tccr_hash_block(Block::from(i as u128 + 1000), *x), *h);
        }
    }

    #[test]
    fn tweak_separates_equal_inputs() {
        let x = Block::ONES;
        assert_ne!(
            FIXED_KEY_HASH.tccr_hash_block(Block::from(0_u128), x),
            FIXED_KEY_HASH.tccr_hash_block(Block::from(1_u128), x)
        );
    }
}
