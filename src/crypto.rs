//! Symmetric primitives: the fixed-key AES hash used to break OT correlations
//! and the AES-CTR PRG that expands base-OT seeds.
mod aes_hash;
mod aes_rng;

pub(crate) use aes_hash::FIXED_KEY_HASH;
pub use aes_rng::AesRng;
pub(crate) use aes_rng::AES_PAR_BLOCKS;
