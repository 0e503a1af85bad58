//! PRG based on AES-128 in counter mode.
//!
//! Base-OT outputs are used as [`AesRng`] seeds; the OT extension and the VOLE
//! expand every seed into one row (or column) of their correlation matrices. Two
//! parties holding the same seed get the same stream on every platform, since
//! the counter is encoded little-endian.
use std::mem;

use aes::{
    Aes128,
    cipher::{BlockCipherEncrypt, KeyInit},
};
use rand::rand_core::block::{BlockRng, BlockRngCore, CryptoBlockRng};
use rand::{CryptoRng, RngCore, SeedableRng};

use crate::block::Block;

/// AES-CTR random number generator.
#[derive(Clone, Debug)]
pub struct AesRng(BlockRng<AesRngCore>);

impl RngCore for AesRng {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }

    #[inline]
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let block_size = mem::size_of::<aes::Block>();
        let block_len = dest.len() / block_size * block_size;
        let (block_bytes, rest_bytes) = dest.split_at_mut(block_len);
        // encrypt whole blocks directly into dest
        let blocks = bytemuck::cast_slice_mut::<_, aes::Block>(block_bytes);
        for chunk in blocks.chunks_mut(AES_PAR_BLOCKS) {
            for block in chunk.iter_mut() {
                *block = aes::cipher::Array(self.0.core.state.to_le_bytes());
                self.0.core.state += 1;
            }
            self.0.core.aes.encrypt_blocks(chunk);
        }
        self.0.fill_bytes(rest_bytes)
    }
}

impl SeedableRng for AesRng {
    type Seed = Block;

    #[inline]
    fn from_seed(seed: Self::Seed) -> Self {
        AesRng(BlockRng::<AesRngCore>::from_seed(seed))
    }
}

impl CryptoRng for AesRng {}


/// The core of `AesRng`, used with `BlockRng`.
#[derive(Clone)]
pub struct AesRngCore {
    aes: Aes128,
    state: u128,
}

impl std::fmt::Debug for AesRngCore {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "AesRngCore {{}}")
    }
}

impl BlockRngCore for AesRngCore {
    type Item = u32;
    type Results = hidden::ParBlockWrapper;

    /// Encrypts the next [`AES_PAR_BLOCKS`] counter values.
    #[inline]
    fn generate(&mut self, results: &mut Self::Results) {
        let blocks = bytemuck::cast_slice_mut::<_, aes::Block>(results.as_mut());
        for blk in blocks.iter_mut() {
            *blk = aes::cipher::Array(self.state.to_le_bytes());
            self.state += 1;
        }
        self.aes.encrypt_blocks(blocks);
    }
}

mod hidden {
    use super::AES_PAR_BLOCKS;

    /// `[aes::Block; AES_PAR_BLOCKS]` as `u32` words, large arrays don't impl Default.
    #[derive(Copy, Clone)]
    pub struct ParBlockWrapper([u32; AES_PAR_BLOCKS * 4]);

    impl Default for ParBlockWrapper {
        fn default() -> Self {
            Self([0; AES_PAR_BLOCKS * 4])
        }
    }

    impl AsMut<[u32]> for ParBlockWrapper {
        fn as_mut(&mut self) -> &mut [u32] {
            &mut self.0
        }
    }

    impl AsRef<[u32]> for ParBlockWrapper {
        fn as_ref(&self) -> &[u32] {
            &self.0
        }
    }
}

impl SeedableRng for AesRngCore {
    type Seed = Block;

    #[inline]
    fn from_seed(seed: Self::Seed) -> Self {
        AesRngCore {
            aes: Aes128::new(&seed.into()),
            state: 0,
        }
    }
}

impl CryptoBlockRng for AesRngCore {}

/// Number of Blocks for which hardware accelerated AES can make use of ILP.
///
/// Only a performance knob: it never influences the generated stream or any
/// network message.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub(crate) const AES_PAR_BLOCKS: usize = 9;
#[cfg(target_arch = "aarch64")]
pub(crate) const AES_PAR_BLOCKS: usize = 21;
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
pub(crate) const AES_PAR_BLOCKS: usize = 4;
