//! Error types for sorted-coo

use thiserror::Error;

/// Result type alias using the crate's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by collective construction and configuration.
///
/// Hot-path contract violations (a corrupt slot, an unregistered handle)
/// are not represented here: they are checked with debug assertions and
/// abort the run.
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration value was rejected
    #[error("Invalid configuration '{field}': {reason}")]
    InvalidConfig {
        /// The offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// A row id cannot be used as a local array offset
    #[error("Row {row} cannot be indexed on this platform")]
    RowOutOfRange {
        /// The row id
        row: u64,
    },

    /// An OS call failed while building the shared-memory cache
    #[error("Shared memory {op} failed for '{name}': {source}")]
    SharedMemory {
        /// The failing call
        op: &'static str,
        /// Name of the shared-memory object
        name: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// A sibling region does not have the expected layout
    #[error("Shared region '{name}' rejected: {reason}")]
    RegionMismatch {
        /// Name of the shared-memory object
        name: String,
        /// What did not match
        reason: String,
    },

    /// Another rank failed a step of a collective construction
    #[error("Rank {rank} failed during {stage}")]
    PeerFailed {
        /// First rank that reported failure
        rank: usize,
        /// Construction step
        stage: &'static str,
    },

    /// The requested feature is not available on this target
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),
}

impl Error {
    pub(crate) fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    #[cfg(unix)]
    pub(crate) fn last_os(op: &'static str, name: &str) -> Self {
        Error::SharedMemory {
            op,
            name: name.to_string(),
            source: std::io::Error::last_os_error(),
        }
    }
}
