//! Probabilistic membership filter for chunk digests.
//!
//! A Bloom filter answering "has this digest probably been stored during this
//! session?". It has no false negatives: `might_contain` only returns `false`
//! for digests that were never added. A `true` answer may be a false positive
//! and must be confirmed against the blob store before an upload is skipped.
//!
//! The bit array is a slice of atomic words updated with `fetch_or`, so `add`
//! and `might_contain` can be called concurrently through a shared reference
//! without losing updates. There is no removal and no resizing.

use crate::error::{FilesError, Result};
use crate::hasher::ChunkDigest;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bits allocated per expected item by [`MembershipFilter::new`]
pub const BITS_PER_ITEM: usize = 16;

/// Smallest bit array a filter will allocate
pub const MIN_BITS: u64 = 64;

/// Upper bound on hash functions derived from a target false-positive rate
const MAX_HASH_FUNCTIONS: u32 = 16;

/// Bloom filter over [`ChunkDigest`]s
pub struct MembershipFilter {
    words: Box<[AtomicU64]>,
    num_bits: u64,
    hash_functions: u32,
    insertions: AtomicU64,
}

impl MembershipFilter {
    /// Create a filter sized for `expected_items` with `hash_functions` probes
    ///
    /// Allocates [`BITS_PER_ITEM`] bits per expected item.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::InvalidFilterParams`] if either argument is zero.
    pub fn new(expected_items: usize, hash_functions: u32) -> Result<Self> {
        if expected_items == 0 {
            return Err(FilesError::InvalidFilterParams("expected items must be non-zero"));
        }
        let num_bits = (expected_items as u64).saturating_mul(BITS_PER_ITEM as u64);
        Self::with_params(num_bits, hash_functions)
    }

    /// Create a filter with optimal sizing for a target false-positive rate
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::InvalidFilterParams`] if `expected_items` is zero
    /// or `false_positive_rate` is not strictly between 0 and 1.
    pub fn with_false_positive_rate(expected_items: usize, false_positive_rate: f64) -> Result<Self> {
        if expected_items == 0 {
            return Err(FilesError::InvalidFilterParams("expected items must be non-zero"));
        }
        if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
            return Err(FilesError::InvalidFilterParams(
                "false positive rate must be in (0, 1)",
            ));
        }

        let n = expected_items as f64;
        let ln2 = std::f64::consts::LN_2;
        let m = (-n * false_positive_rate.ln() / (ln2 * ln2)).ceil();
        let k = ((m / n) * ln2).round().clamp(1.0, f64::from(MAX_HASH_FUNCTIONS));

        Self::with_params(m as u64, k as u32)
    }

    /// Create a filter with an explicit bit count and hash function count
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::InvalidFilterParams`] if either argument is zero.
    pub fn with_params(num_bits: u64, hash_functions: u32) -> Result<Self> {
        if num_bits == 0 {
            return Err(FilesError::InvalidFilterParams("bit count must be non-zero"));
        }
        if hash_functions == 0 {
            return Err(FilesError::InvalidFilterParams(
                "hash function count must be non-zero",
            ));
        }

        let num_bits = num_bits.max(MIN_BITS);
        let words = (0..num_bits.div_ceil(64))
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            words,
            num_bits,
            hash_functions,
            insertions: AtomicU64::new(0),
        })
    }

    /// Record a digest
    ///
    /// Returns `true` if at least one bit was newly set, i.e. the digest was
    /// definitely not present before.
    pub fn add(&self, digest: &ChunkDigest) -> bool {
        let mut changed = false;
        for bit in self.bit_positions(digest) {
            let (word, mask) = Self::locate(bit);
            let previous = self.words[word].fetch_or(mask, Ordering::AcqRel);
            changed |= previous & mask == 0;
        }
        self.insertions.fetch_add(1, Ordering::Relaxed);
        changed
    }

    /// One-sided membership test
    ///
    /// `false` means the digest was never added. `true` means it probably was.
    pub fn might_contain(&self, digest: &ChunkDigest) -> bool {
        self.bit_positions(digest).all(|bit| {
            let (word, mask) = Self::locate(bit);
            self.words[word].load(Ordering::Acquire) & mask != 0
        })
    }

    /// Number of `add` calls so far
    pub fn insertions(&self) -> u64 {
        self.insertions.load(Ordering::Relaxed)
    }

    /// Size of the bit array
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Number of probes per digest
    pub fn hash_functions(&self) -> u32 {
        self.hash_functions
    }

    /// Number of bits currently set
    pub fn set_bits(&self) -> u64 {
        self.words
            .iter()
            .map(|w| u64::from(w.load(Ordering::Relaxed).count_ones()))
            .sum()
    }

    /// Current false-positive probability estimated from the fill ratio
    pub fn estimated_false_positive_rate(&self) -> f64 {
        let fill = self.set_bits() as f64 / self.num_bits as f64;
        fill.powi(self.hash_functions as i32)
    }

    /// Double hashing over the digest: `h1 + i * h2 (mod m)`
    ///
    /// The digest is already uniformly distributed, so its first two words
    /// serve as independent base hashes.
    fn bit_positions(&self, digest: &ChunkDigest) -> impl Iterator<Item = u64> {
        let bytes = digest.as_bytes();
        let mut first = [0u8; 8];
        let mut second = [0u8; 8];
        first.copy_from_slice(&bytes[0..8]);
        second.copy_from_slice(&bytes[8..16]);

        let h1 = u64::from_le_bytes(first);
        // Odd step so probes never collapse onto a single bit
        let h2 = u64::from_le_bytes(second) | 1;
        let num_bits = self.num_bits;

        (0..u64::from(self.hash_functions))
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % num_bits)
    }

    fn locate(bit: u64) -> (usize, u64) {
        ((bit / 64) as usize, 1u64 << (bit % 64))
    }
}

impl fmt::Debug for MembershipFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MembershipFilter")
            .field("num_bits", &self.num_bits)
            .field("hash_functions", &self.hash_functions)
            .field("insertions", &self.insertions())
            .finish()
    }
}
