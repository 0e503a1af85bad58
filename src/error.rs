//! The error type shared by all preprocessing protocols.
//!
//! Errors are grouped the way they have to be handled at the process boundary:
//! connection problems, detected cheating, failed sacrifices, configuration and
//! data-shape problems and missing or mismatching preprocessing data. None of them
//! is retried at this layer (apart from the bounded connection backoff in
//! [`crate::channel::TcpChannel::connect`]); a failed check discards the whole
//! batch that was in flight.
use std::path::PathBuf;

use thiserror::Error;

use crate::channel;

/// The kind of cheating that a consistency check detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Cheat {
    /// The KOS correlation check of the OT extension failed.
    #[error("OT extension correlation check failed")]
    OtCorrelationCheck,
    /// The consistency check of the vector OLE failed.
    #[error("VOLE consistency check failed")]
    VoleConsistency,
    /// Opened values did not match their MACs.
    #[error("MAC check of opened values failed")]
    MacCheck,
    /// A commitment could not be opened.
    #[error("commitment could not be opened")]
    Commitment,
    /// A broadcast message differed between the receiving parties.
    #[error("inconsistent broadcast")]
    InconsistentBroadcast,
}

/// Errors occurring during preprocessing.
#[derive(Debug, Error)]
pub enum Error {
    /// A message could not be sent, received or (de-)serialized.
    #[error("channel error: {0}")]
    Channel(#[from] channel::Error),
    /// A peer deviated from the protocol.
    #[error("malicious behavior detected: {0}")]
    MaliciousBehavior(Cheat),
    /// At least one triple of a sacrifice batch was wrong.
    ///
    /// `index` is the global index of the first failing pair (counted over the kept
    /// half of the candidates).
    #[error("sacrifice check failed in batch {batch} (first bad pair: {index})")]
    OfflineCheck {
        /// Number of the batch that failed.
        batch: usize,
        /// Index of the first pair whose check value was not zero.
        index: usize,
    },
    /// The configuration is invalid for this protocol or platform.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A vector did not have the expected number of elements.
    #[error("expected {expected} elements, got {actual}")]
    InvalidLength {
        /// The expected number of elements.
        expected: usize,
        /// The number of elements that was actually provided.
        actual: usize,
    },
    /// A received base OT message is not a valid group element.
    #[error("invalid base OT data")]
    InvalidOtData,
    /// A packed ring element or share could not be decoded.
    #[error("invalid encoding of {0}")]
    InvalidEncoding(&'static str),
    /// A preprocessing file was written for a different data type.
    #[error("signature mismatch in {path:?}: expected {expected:?}, found {found:?}")]
    SignatureMismatch {
        /// The file that was opened.
        path: PathBuf,
        /// The signature of the requested data type.
        expected: String,
        /// The signature stored in the file.
        found: String,
    },
    /// A preprocessing file ran out of data.
    #[error("insufficient preprocessing in {0:?}, re-run the offline phase")]
    InsufficientPreprocessing(PathBuf),
    /// An I/O error while reading or writing preprocessing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The worker thread of the multiplier for the given peer stopped.
    #[error("multiplier for party {0} terminated")]
    WorkerTerminated(usize),
    /// An internal invariant was violated.
    #[error("bug: {0}")]
    Bug(&'static str),
}

impl From<Cheat> for Error {
    fn from(cheat: Cheat) -> Self {
        Self::MaliciousBehavior(cheat)
    }
}

/// Fails with [`Error::InvalidLength`] unless `actual == expected`.
pub(crate) fn check_len(expected: usize, actual: usize) -> Result<(), Error> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::InvalidLength { expected, actual })
    }
}
