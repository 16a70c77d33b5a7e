//! DecompError: Unified error type for gmy-decomp public APIs
//!
//! Every variant is fatal for a decomposition run. Consistency problems that
//! are only detected in validation mode are logged instead and never show up
//! here.

use crate::partitioning::error::PartitionError;
use thiserror::Error;

/// Unified error type for geometry loading and decomposition.
#[derive(Debug, Error)]
pub enum DecompError {
    /// The geometry file does not match the expected layout (magic numbers,
    /// version, truncated sections, malformed site records).
    #[error("Format error: {0}")]
    Format(String),
    /// A compressed block could not be inflated to its declared length.
    #[error("Decompression error for block {block}: {reason}")]
    Decompression { block: usize, reason: String },
    /// The graph partitioner terminated abnormally.
    #[error("Partitioner failure: {0}")]
    Partition(#[from] PartitionError),
    /// A point-to-point or collective operation with `neighbor` failed.
    #[error("Communication with rank {neighbor} failed: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A message arrived with an unexpected byte length.
    #[error("Buffer size mismatch from rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// Reading the geometry file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration values that cannot drive a decomposition.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// An index that should refer to local data does not.
    #[error("Lookup failed: {0}")]
    Lookup(String),
}

impl DecompError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        DecompError::Format(msg.into())
    }

    pub(crate) fn comm(neighbor: usize, msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        DecompError::CommError {
            neighbor,
            source: msg.into(),
        }
    }
}
