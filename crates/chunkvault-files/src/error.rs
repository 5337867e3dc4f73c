//! Error types for chunk processing.

use crate::hasher::ChunkDigest;
use std::io;
use thiserror::Error;

/// Errors raised by the chunking, tree and reassembly primitives
#[derive(Debug, Error)]
pub enum FilesError {
    /// Chunk size must be non-zero
    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(usize),

    /// Filter constructed with unusable parameters
    #[error("invalid filter parameters: {0}")]
    InvalidFilterParams(&'static str),

    /// Digest text could not be decoded
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// A hash tree needs at least one leaf
    #[error("cannot build a hash tree over zero leaves")]
    EmptyTree,

    /// Reassembly attempted with chunk indices missing
    #[error("incomplete chunk set: missing {} chunk(s) {:?}", .missing.len(), .missing)]
    Incomplete {
        /// Missing chunk indices, ascending
        missing: Vec<u64>,
    },

    /// Recomputed root does not match the stored root
    #[error("integrity mismatch: expected root {expected}, computed {actual}")]
    IntegrityMismatch {
        /// Root hash recorded at backup time
        expected: ChunkDigest,
        /// Root hash recomputed from the supplied chunks
        actual: ChunkDigest,
    },

    /// Chunk index outside the expected range
    #[error("unexpected chunk index {index} (file has {total} chunks)")]
    UnexpectedChunk {
        /// Offending index
        index: u64,
        /// Expected chunk count
        total: u64,
    },

    /// Same chunk index supplied twice
    #[error("duplicate chunk index {0}")]
    DuplicateChunk(u64),

    /// Underlying byte source failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for chunk processing
pub type Result<T> = std::result::Result<T, FilesError>;
