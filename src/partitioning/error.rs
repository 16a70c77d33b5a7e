//! Partitioning errors for gmy-decomp

use thiserror::Error;

/// Errors from graph construction and partitioner back ends.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// CSR arrays do not describe a valid graph.
    #[error("Malformed graph: {0}")]
    MalformedGraph(String),
    /// The partitioner returned a part outside `0..n_parts`.
    #[error("Partition {part} for vertex {vertex} is outside 0..{n_parts}")]
    PartOutOfRange {
        vertex: usize,
        part: usize,
        n_parts: usize,
    },
    /// The partitioner returned the wrong number of entries.
    #[error("Partition vector has {got} entries, expected {expected}")]
    LengthMismatch { expected: usize, got: usize },
    /// Gathering the distributed graph failed.
    #[error("Graph exchange failed: {0}")]
    Exchange(String),
    /// Other errors (e.g. METIS wrapper failures)
    #[error("Partitioner error: {0}")]
    Other(String),
}
