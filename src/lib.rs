//! Maliciously secure preprocessing for secret-sharing MPC from oblivious transfer,
//! following [MASCOT](https://eprint.iacr.org/2016/505).
//!
//! Every party generates authenticated Beaver triples (and squares, bits,
//! inverses and input masks) together with all other parties. The building blocks,
//! from the bottom up:
//!
//! * [`base_ot`]: Chou-Orlandi base OTs between two parties.
//! * [`ot_ext`]: the KOS OT extension with its correlation check.
//! * [`vole`]: vector OLE over extended OTs, used to compute MACs.
//! * [`multiplier`]: pairwise Gilboa multiplication and authentication.
//! * [`generator`]: the n-party generator, one multiplier per peer.
//! * [`sacrifice`] and [`mac_check`]: checking the generated data.
//! * [`prep_files`]: storing the checked data on disk.
//!
//! ## Example
//!
//! ```ignore
//! use polyprep::{
//!     config::Config, generator::NPartyTripleGenerator, player::Player,
//!     ring::Gfp127, sacrifice::sacrifice_triples,
//! };
//!
//! let player = Player::connect_tcp(&config, &addrs)?;
//! let mut generator = NPartyTripleGenerator::<_, Gfp127>::new(player, &config)?;
//! let candidates = generator.generate_triples(2 * 1024)?;
//! let key = generator.mac_key().expect("MACs are enabled");
//! let mut player = generator.into_player()?;
//! let triples = sacrifice_triples(&mut player, key, &config, candidates)?;
//! ```
//!
//! All protocols are blocking and every pair of parties has to call the same
//! operations in the same order; there is no version negotiation on the wire.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod base_ot;
pub mod bit_vector;
pub mod block;
pub mod channel;
pub mod config;
pub mod crypto;
pub mod error;
pub mod generator;
pub mod mac_check;
pub mod matrix;
pub mod multiplier;
pub mod ot_ext;
pub mod player;
pub mod prep_files;
pub mod ring;
pub mod sacrifice;
pub mod setup;
pub mod share;
pub mod vole;

mod commit;
mod transpose;
mod utils;

#[cfg(feature = "__bench")]
pub mod bench_reexports;

pub use error::Error;
