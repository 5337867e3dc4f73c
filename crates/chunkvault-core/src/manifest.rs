//! Backup manifests
//!
//! A manifest is the per-file record persisted by the metadata store after a
//! completed backup. It carries everything restore needs: the ordered chunk
//! digests (the chunks' content addresses) and the root hash they must
//! reproduce.

use crate::error::InputError;
use chunkvault_files::ChunkDigest;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-file backup record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// File name as supplied at backup time
    pub file_name: String,

    /// File size in bytes
    pub file_size: u64,

    /// MIME type as supplied at backup time
    pub mime_type: String,

    /// Number of chunks
    pub chunk_count: u64,

    /// Chunk size used to split the file
    pub chunk_size: u64,

    /// Root of the hash tree over `chunk_digests`
    pub root_hash: ChunkDigest,

    /// Chunk digests in index order
    pub chunk_digests: Vec<ChunkDigest>,

    /// Owner of the backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    /// Free-form caption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,

    /// Mood tag set by the uploader
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,

    /// Creation time (seconds since the Unix epoch)
    pub created_at: u64,
}

impl BackupManifest {
    /// Check the manifest's fields agree with each other
    ///
    /// # Errors
    ///
    /// Returns [`InputError::MalformedManifest`] describing the inconsistency.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.chunk_count == 0 {
            return Err(malformed("manifest lists zero chunks"));
        }
        if self.chunk_digests.len() as u64 != self.chunk_count {
            return Err(InputError::MalformedManifest(Cow::Owned(format!(
                "chunk count {} but {} digests",
                self.chunk_count,
                self.chunk_digests.len()
            ))));
        }
        if self.chunk_size == 0 {
            return Err(malformed("chunk size is zero"));
        }
        if self.file_size.div_ceil(self.chunk_size) != self.chunk_count {
            return Err(InputError::MalformedManifest(Cow::Owned(format!(
                "{} bytes at chunk size {} cannot yield {} chunks",
                self.file_size, self.chunk_size, self.chunk_count
            ))));
        }
        Ok(())
    }
}

fn malformed(reason: &'static str) -> InputError {
    InputError::MalformedManifest(Cow::Borrowed(reason))
}

/// Identifier assigned by a metadata store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(String);

impl ManifestId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random identifier (16 random bytes, hex encoded)
    ///
    /// # Errors
    ///
    /// Returns an error if the system random source is unavailable.
    pub fn generate() -> Result<Self, getrandom::Error> {
        let mut id = [0u8; 16];
        getrandom::getrandom(&mut id)?;
        Ok(Self(hex::encode(id)))
    }

    /// Identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for ManifestId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Manifest as stored by a metadata store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredManifest {
    /// Store-assigned identifier
    pub id: ManifestId,

    /// Manifest contents
    #[serde(flatten)]
    pub manifest: BackupManifest,
}

/// Current time in seconds since the Unix epoch
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
