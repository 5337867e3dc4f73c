//! Backup session state
//!
//! A session owns the state shared by every file backed up through one
//! [`Pipeline`](crate::Pipeline): the membership filter of digests already
//! made durable, the memoizing content hasher and running statistics. It is
//! created explicitly and handed around by reference; starting a new session
//! starts with an empty filter and cache.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use chunkvault_files::{ContentHasher, MembershipFilter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// State shared by all backups in one session
#[derive(Debug)]
pub struct BackupSession {
    filter: MembershipFilter,
    hasher: ContentHasher,
    stats: SessionStats,
}

impl BackupSession {
    /// Create a session sized from `config`
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the filter parameters are rejected.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let filter =
            MembershipFilter::new(config.filter_expected_items, config.filter_hash_functions)
                .map_err(|e| PipelineError::InvalidConfig(e.to_string().into()))?;

        let hasher = if config.hash_cache_entries == 0 {
            ContentHasher::uncached()
        } else {
            ContentHasher::new(config.hash_cache_entries)
        };

        tracing::debug!(
            "New backup session: filter {} bits, {} hash functions, cache {} entries",
            filter.num_bits(),
            filter.hash_functions(),
            config.hash_cache_entries
        );

        Ok(Self {
            filter,
            hasher,
            stats: SessionStats::default(),
        })
    }

    /// Digests recorded as durable during this session
    pub fn filter(&self) -> &MembershipFilter {
        &self.filter
    }

    /// Session content hasher
    pub fn hasher(&self) -> &ContentHasher {
        &self.hasher
    }

    /// Running counters
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}

/// Session counters
#[derive(Debug, Default)]
pub struct SessionStats {
    files_backed_up: AtomicU64,
    chunks_hashed: AtomicU64,
    chunks_uploaded: AtomicU64,
    chunks_deduplicated: AtomicU64,
    false_positives: AtomicU64,
    bytes_uploaded: AtomicU64,
}

impl SessionStats {
    pub(crate) fn record_file(&self) {
        self.files_backed_up.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hashed(&self, chunks: u64) {
        self.chunks_hashed.fetch_add(chunks, Ordering::Relaxed);
    }

    pub(crate) fn record_uploads(&self, chunks: u64, bytes: u64) {
        self.chunks_uploaded.fetch_add(chunks, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_dedup(&self) {
        self.chunks_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_false_positive(&self) {
        self.false_positives.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            files_backed_up: self.files_backed_up.load(Ordering::Relaxed),
            chunks_hashed: self.chunks_hashed.load(Ordering::Relaxed),
            chunks_uploaded: self.chunks_uploaded.load(Ordering::Relaxed),
            chunks_deduplicated: self.chunks_deduplicated.load(Ordering::Relaxed),
            false_positives: self.false_positives.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
        }
    }
}

/// Session statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Files whose backup completed
    pub files_backed_up: u64,

    /// Chunks hashed
    pub chunks_hashed: u64,

    /// Chunks written to the blob store
    pub chunks_uploaded: u64,

    /// Chunks skipped because the store already held them
    pub chunks_deduplicated: u64,

    /// Filter hits the blob store did not confirm
    pub false_positives: u64,

    /// Bytes written to the blob store
    pub bytes_uploaded: u64,
}

impl SessionSnapshot {
    /// Fraction of processed chunks that were deduplicated (0.0 to 1.0)
    pub fn dedup_ratio(&self) -> f64 {
        let total = self.chunks_uploaded + self.chunks_deduplicated;
        if total == 0 {
            0.0
        } else {
            self.chunks_deduplicated as f64 / total as f64
        }
    }
}

/// Cooperative cancellation flag
///
/// Clones share the flag. Work checks it between chunk operations, so a
/// cancelled operation never leaves a chunk half-applied.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create an uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
