//! Pipeline configuration

use crate::error::{PipelineError, Result};
use chunkvault_files::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};

/// Largest accepted chunk size (16 MiB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Backup pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Attempts per chunk (upload or fetch) before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Number of distinct chunks the session filter is sized for
    #[serde(default = "default_filter_expected_items")]
    pub filter_expected_items: usize,

    /// Probes per digest in the session filter
    #[serde(default = "default_filter_hash_functions")]
    pub filter_hash_functions: u32,

    /// Chunks memoized by the session hasher (0 disables the cache)
    #[serde(default = "default_hash_cache_entries")]
    pub hash_cache_entries: usize,

    /// Chunks hashed concurrently per file
    #[serde(default = "default_hash_workers")]
    pub hash_workers: usize,
}

// Default values

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_attempts() -> u32 {
    3
}

fn default_filter_expected_items() -> usize {
    10_000
}

fn default_filter_hash_functions() -> u32 {
    3
}

fn default_hash_cache_entries() -> usize {
    64
}

fn default_hash_workers() -> usize {
    4
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_attempts: default_max_attempts(),
            filter_expected_items: default_filter_expected_items(),
            filter_hash_functions: default_filter_hash_functions(),
            hash_cache_entries: default_hash_cache_entries(),
            hash_workers: default_hash_workers(),
        }
    }
}

impl PipelineConfig {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(PipelineError::invalid_config(
                "chunk size must be between 1 byte and 16 MiB",
            ));
        }

        if self.max_attempts == 0 {
            return Err(PipelineError::invalid_config("max attempts must be at least 1"));
        }

        if self.filter_expected_items == 0 {
            return Err(PipelineError::invalid_config(
                "filter expected items must be non-zero",
            ));
        }

        if self.filter_hash_functions == 0 || self.filter_hash_functions > 32 {
            return Err(PipelineError::invalid_config(
                "filter hash functions must be between 1 and 32",
            ));
        }

        if self.hash_workers == 0 {
            return Err(PipelineError::invalid_config("hash workers must be at least 1"));
        }

        Ok(())
    }
}
