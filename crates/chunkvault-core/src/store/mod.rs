//! Storage collaborators
//!
//! The pipeline talks to two external stores:
//!
//! - a **blob store** holding chunk bytes keyed by their digest, and
//! - a **metadata store** holding one manifest per backed-up file.
//!
//! Both are async traits so that implementations may block on the network or
//! disk. In-memory implementations back the tests; filesystem implementations
//! back the command-line tool.

mod fs;
mod memory;

pub use fs::{FsBlobStore, FsMetadataStore};
pub use memory::{MemoryBlobStore, MemoryMetadataStore};

use crate::error::StorageResult;
use crate::manifest::{BackupManifest, ManifestId, StoredManifest};
use async_trait::async_trait;
use chunkvault_files::ChunkDigest;
use std::sync::Arc;

/// Content-addressed chunk storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Durably store `data` under `digest`
    ///
    /// Storing the same digest twice is allowed and idempotent.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails. Transient errors are retried
    /// by the upload scheduler.
    async fn put(&self, digest: &ChunkDigest, data: &[u8]) -> StorageResult<()>;

    /// Authoritative existence check
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be queried.
    async fn exists(&self, digest: &ChunkDigest) -> StorageResult<bool>;

    /// Fetch the bytes stored under `digest`
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if nothing is stored under `digest`.
    async fn get(&self, digest: &ChunkDigest) -> StorageResult<Vec<u8>>;
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    async fn put(&self, digest: &ChunkDigest, data: &[u8]) -> StorageResult<()> {
        (**self).put(digest, data).await
    }

    async fn exists(&self, digest: &ChunkDigest) -> StorageResult<bool> {
        (**self).exists(digest).await
    }

    async fn get(&self, digest: &ChunkDigest) -> StorageResult<Vec<u8>> {
        (**self).get(digest).await
    }
}

/// Record of completed backups
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persist a manifest and return its identifier
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the manifest cannot be written.
    async fn save_manifest(&self, manifest: &BackupManifest) -> StorageResult<ManifestId>;

    /// List manifests, newest first
    ///
    /// With `owner_id` set only that owner's manifests are returned.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn list_manifests(&self, owner_id: Option<&str>) -> StorageResult<Vec<StoredManifest>>;

    /// Fetch a single manifest
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn get_manifest(&self, id: &ManifestId) -> StorageResult<Option<StoredManifest>>;
}

/// Source of chunk bytes during restore
///
/// Every [`BlobStore`] is a chunk provider that looks chunks up by digest.
/// Other providers (caches, peers, test doubles) may also use the index.
#[async_trait]
pub trait ChunkProvider: Send + Sync {
    /// Fetch chunk `index` whose content address is `digest`
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the chunk is unavailable.
    async fn fetch_chunk(&self, index: u64, digest: &ChunkDigest) -> StorageResult<Vec<u8>>;
}

#[async_trait]
impl<B: BlobStore + ?Sized> ChunkProvider for B {
    async fn fetch_chunk(&self, _index: u64, digest: &ChunkDigest) -> StorageResult<Vec<u8>> {
        self.get(digest).await
    }
}

/// Order stored manifests newest first, breaking ties by identifier
pub(crate) fn sort_newest_first(manifests: &mut [StoredManifest]) {
    manifests.sort_by(|a, b| {
        b.manifest
            .created_at
            .cmp(&a.manifest.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}
