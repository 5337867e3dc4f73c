//! BLAKE3 content hashing for chunks.
//!
//! The chunk digest is both the deduplication key (content address) and the
//! leaf of the file's integrity tree.

use crate::DIGEST_SIZE;
use crate::error::FilesError;
use dashmap::DashMap;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// 256-bit BLAKE3 digest of a chunk's bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkDigest([u8; DIGEST_SIZE]);

impl ChunkDigest {
    /// Wrap raw digest bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Lowercase hex encoding
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::InvalidDigest`] if the text is not 32 hex-encoded bytes.
    pub fn from_hex(text: &str) -> Result<Self, FilesError> {
        let mut bytes = [0u8; DIGEST_SIZE];
        hex::decode_to_slice(text, &mut bytes)
            .map_err(|e| FilesError::InvalidDigest(format!("{text:?}: {e}")))?;
        Ok(Self(bytes))
    }
}

impl From<blake3::Hash> for ChunkDigest {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Display for ChunkDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChunkDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkDigest({})", hex::encode(&self.0[..8]))
    }
}

impl FromStr for ChunkDigest {
    type Err = FilesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for ChunkDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChunkDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_hex(&text).map_err(de::Error::custom)
    }
}

/// Hash a chunk
pub fn hash_chunk(data: &[u8]) -> ChunkDigest {
    blake3::hash(data).into()
}

/// Verify a chunk against its expected hash
pub fn verify_chunk(data: &[u8], expected: &ChunkDigest) -> bool {
    hash_chunk(data) == *expected
}

/// Default number of entries kept by the memoizing cache
pub const DEFAULT_CACHE_ENTRIES: usize = 64;

/// Chunk hasher with an optional memoizing cache
///
/// The cache is keyed by the exact chunk bytes, so a hit can only ever return
/// the digest of identical content. Once `capacity` entries are cached new
/// results are simply not memoized.
pub struct ContentHasher {
    cache: Option<DashMap<Box<[u8]>, ChunkDigest>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ContentHasher {
    /// Create a hasher caching up to `capacity` chunks (0 disables caching)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: (capacity > 0).then(DashMap::new),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create a hasher without a cache
    #[must_use]
    pub fn uncached() -> Self {
        Self::new(0)
    }

    /// Hash chunk bytes, consulting the cache first
    pub fn hash(&self, data: &[u8]) -> ChunkDigest {
        let Some(cache) = &self.cache else {
            return hash_chunk(data);
        };

        if let Some(digest) = cache.get(data) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return *digest;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let digest = hash_chunk(data);
        if cache.len() < self.capacity {
            cache.insert(data.into(), digest);
        }
        digest
    }

    /// Number of cached entries
    pub fn cached_entries(&self) -> usize {
        self.cache.as_ref().map_or(0, DashMap::len)
    }

    /// Cache hits so far
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Cache misses so far
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_ENTRIES)
    }
}

impl fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentHasher")
            .field("capacity", &self.capacity)
            .field("cached_entries", &self.cached_entries())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}
