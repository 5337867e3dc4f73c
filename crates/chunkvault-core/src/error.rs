//! Error types for the backup pipeline
//!
//! Errors are typed so callers can decide between retrying, aborting and
//! reporting to the user without parsing messages.
//!
//! # Error Categories
//!
//! - **Input**: rejected before any work begins, never retried
//! - **Transient storage**: blob store failures, retried up to a bound
//! - **Integrity**: a restored file does not match its recorded root hash
//! - **Incomplete data**: chunks of a restored file are missing
//!
//! # Example
//!
//! ```
//! use chunkvault_core::PipelineError;
//!
//! fn handle_error(err: &PipelineError) -> &'static str {
//!     if err.is_transient() {
//!         "retry later"
//!     } else {
//!         "report to user"
//!     }
//! }
//!
//! assert_eq!(handle_error(&PipelineError::Cancelled), "report to user");
//! ```

use chunkvault_files::{ChunkDigest, FilesError};
use std::borrow::Cow;
use thiserror::Error;

/// Errors reported by blob and metadata stores
#[derive(Debug, Error, Clone)]
pub enum StorageError {
    /// No blob stored under this digest
    #[error("Blob not found: {0}")]
    NotFound(ChunkDigest),

    /// Store temporarily unreachable
    #[error("Storage unavailable: {0}")]
    Unavailable(Cow<'static, str>),

    /// I/O failure in the store backend
    #[error("Storage I/O error: {0}")]
    Io(String),

    /// Store refused the operation and will keep refusing it
    #[error("Storage rejected request: {0}")]
    Rejected(Cow<'static, str>),

    /// Stored record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Returns true if the operation may succeed when retried
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::Io(_))
    }

    /// Create an unavailable error with static context (zero allocation)
    #[must_use]
    pub const fn unavailable(context: &'static str) -> Self {
        StorageError::Unavailable(Cow::Borrowed(context))
    }

    /// Create a rejected error with static context (zero allocation)
    #[must_use]
    pub const fn rejected(context: &'static str) -> Self {
        StorageError::Rejected(Cow::Borrowed(context))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Invalid input detected before any work started
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    /// Zero-length file
    #[error("File is empty: {0}")]
    EmptyFile(String),

    /// Missing file name
    #[error("File name is empty")]
    EmptyFileName,

    /// Manifest fields are inconsistent
    #[error("Malformed manifest: {0}")]
    MalformedManifest(Cow<'static, str>),

    /// Supplied chunk set does not describe the manifest's file
    #[error("Malformed chunk sequence: {0}")]
    MalformedChunks(String),
}

/// Errors that can occur while backing up or restoring files
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input rejected before any work began
    #[error("Invalid input: {0}")]
    Input(#[from] InputError),

    /// Chunks still failing after the retry bound
    #[error("Upload failed for {file_name}: chunks {failed_chunk_indices:?}")]
    UploadFailed {
        /// File being backed up
        file_name: String,
        /// Indices of chunks that reached the terminal failed state
        failed_chunk_indices: Vec<u64>,
    },

    /// Restored bytes do not match the recorded root hash
    #[error("Integrity check failed for {file_name}: expected root {expected}, computed {actual}")]
    Integrity {
        /// File being restored
        file_name: String,
        /// Root hash from the manifest
        expected: ChunkDigest,
        /// Root hash recomputed from the fetched chunks
        actual: ChunkDigest,
    },

    /// Chunks missing from the store
    #[error("Incomplete data for {file_name}: missing chunks {missing:?}")]
    IncompleteData {
        /// File being restored
        file_name: String,
        /// Missing chunk indices, ascending
        missing: Vec<u64>,
    },

    /// Blob or metadata store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Chunk processing failure (reading the source, building the tree)
    #[error("Chunk processing error: {0}")]
    Files(#[from] FilesError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Operation cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Hashing task panicked or was aborted
    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl PipelineError {
    /// Returns true if this error is transient and may succeed on retry
    ///
    /// Transient errors include:
    /// - Unavailable or failing storage
    /// - Uploads that exhausted their retry bound
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Storage(e) => e.is_transient(),
            PipelineError::UploadFailed { .. } => true,
            _ => false,
        }
    }

    /// Returns true if this error is permanent and will not succeed on retry
    ///
    /// Permanent errors include:
    /// - Invalid input or configuration
    /// - Integrity mismatches (data corruption)
    /// - Missing chunks
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            PipelineError::Input(_)
            | PipelineError::Integrity { .. }
            | PipelineError::IncompleteData { .. }
            | PipelineError::InvalidConfig(_) => true,
            PipelineError::Storage(e) => !e.is_transient(),
            _ => false,
        }
    }

    /// Create an invalid config error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_config(context: &'static str) -> Self {
        PipelineError::InvalidConfig(Cow::Borrowed(context))
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type for store operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;
