//! Parameters of a preprocessing run.
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::Error, transpose};

/// The number of base OTs of the OT extension, one per bit of the correlation Δ.
pub const BASE_OTS: usize = 128;

/// The number of triple pairs checked together in one sacrifice batch.
pub const DEFAULT_AMORTIZE: usize = 512;

/// Configuration shared by all protocols of one party.
///
/// A `Config` is created once and passed by reference, nothing changes it after
/// [`Config::validate`] succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of parties.
    pub n_parties: usize,
    /// Index of this party.
    pub my_num: usize,
    /// Number of triples a multiplier produces per job.
    pub batch_size: usize,
    /// Number of triple pairs per sacrifice batch.
    pub amortize: usize,
    /// Number of base OTs per OT extension.
    pub n_base_ots: usize,
    /// Skip all checks that only protect against malicious parties.
    pub passive: bool,
    /// Authenticate the generated data with MACs.
    pub generate_macs: bool,
    /// Run one OS thread per peer instead of processing peers in the caller.
    pub multi_threaded: bool,
    /// Fail instead of using the portable bit-matrix transpose.
    pub require_avx2: bool,
    /// Directory of the preprocessing files.
    pub prep_dir: Option<PathBuf>,
    /// How long to keep retrying to connect to another party.
    pub connect_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            n_parties: 2,
            my_num: 0,
            batch_size: 1024,
            amortize: DEFAULT_AMORTIZE,
            n_base_ots: BASE_OTS,
            passive: false,
            generate_macs: true,
            multi_threaded: true,
            require_avx2: false,
            prep_dir: None,
            connect_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Malicious-secure defaults for party `my_num` of `n_parties`.
    pub fn new(n_parties: usize, my_num: usize) -> Self {
        Self {
            n_parties,
            my_num,
            ..Default::default()
        }
    }

    /// Defaults for semi-honest triple generation without MACs.
    pub fn semi_honest(n_parties: usize, my_num: usize) -> Self {
        Self {
            passive: true,
            generate_macs: false,
            ..Self::new(n_parties, my_num)
        }
    }

    /// Upper bound for the length of one message between two parties.
    ///
    /// The largest messages are the OT extension and VOLE corrections of one
    /// multiplier job and the openings of one sacrifice batch. For elements of up to
    /// 128 bits both stay below `2 * 128 * 16` bytes per item.
    pub fn max_frame_len(&self) -> u64 {
        const PER_ITEM: u64 = 2 * 128 * 16;
        const FIXED: u64 = 1 << 16;
        let items = self.batch_size.max(self.amortize) as u64;
        PER_ITEM.saturating_mul(items).saturating_add(FIXED)
    }

    /// Checks that the parameters are usable on this machine.
    pub fn validate(&self) -> Result<(), Error> {
        if self.n_parties < 2 {
            return Err(Error::Config(format!(
                "at least 2 parties are required, got {}",
                self.n_parties
            )));
        }
        if self.my_num >= self.n_parties {
            return Err(Error::Config(format!(
                "party {} does not exist in a {}-party computation",
                self.my_num, self.n_parties
            )));
        }
        if self.n_base_ots != BASE_OTS {
            return Err(Error::Config(format!(
                "the OT extension needs exactly {BASE_OTS} base OTs, got {}",
                self.n_base_ots
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must not be 0".to_string()));
        }
        if self.amortize == 0 {
            return Err(Error::Config("amortize must not be 0".to_string()));
        }
        if !self.passive && !self.generate_macs {
            return Err(Error::Config(
                "malicious security requires MACs, set `passive` or `generate_macs`".to_string(),
            ));
        }
        if self.require_avx2 && !transpose::has_avx2() {
            return Err(Error::Config(
                "AVX2 is required but not supported by this CPU".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() -> Result<(), Error> {
        Config::default().validate()?;
        Config::semi_honest(3, 2).validate()?;
        Ok(())
    }

    #[test]
    fn invalid_parameters() {
        assert!(Config::new(1, 0).validate().is_err());
        assert!(Config::new(3, 3).validate().is_err());
        let config = Config {
            n_base_ots: 64,
            ..Config::default()
        };
        assert!(config.validate().is_err());
        let config = Config {
            generate_macs: false,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn frame_limit_grows_with_batches() {
        let small = Config {
            batch_size: 16,
            amortize: 16,
            ..Config::default()
        };
        assert!(small.max_frame_len() < Config::default().max_frame_len());
        assert!(Config::default().max_frame_len() <= crate::channel::DEFAULT_MAX_FRAME_LEN);
        let huge = Config {
            batch_size: usize::MAX,
            ..Config::default()
        };
        assert_eq!(u64::MAX, huge.max_frame_len());
    }

    #[test]
    fn avx2_requirement_matches_detection() {
        let config = Config {
            require_avx2: true,
            ..Config::default()
        };
        assert_eq!(transpose::has_avx2(), config.validate().is_ok());
    }

    #[test]
    fn bincode_round_trip() {
        let bytes = bincode::serialize(&Config::new(4, 1)).unwrap();
        let config: Config = bincode::deserialize(&bytes).unwrap();
        assert_eq!(Config::new(4, 1), config);
    }
}
