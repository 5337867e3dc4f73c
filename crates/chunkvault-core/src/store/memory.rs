//! In-memory stores

use super::{BlobStore, MetadataStore, sort_newest_first};
use crate::error::{StorageError, StorageResult};
use crate::manifest::{BackupManifest, ManifestId, StoredManifest};
use async_trait::async_trait;
use chunkvault_files::ChunkDigest;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Blob store backed by a concurrent hash map
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<ChunkDigest, Vec<u8>>,
    puts: AtomicU64,
}

impl MemoryBlobStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs stored
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether the store holds no blobs
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Number of successful `put` calls, including repeated digests
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Overwrite the bytes stored under `digest` without re-hashing
    ///
    /// Simulates at-rest corruption; restore must detect it.
    pub fn overwrite(&self, digest: &ChunkDigest, data: Vec<u8>) {
        self.blobs.insert(*digest, data);
    }

    /// Drop a blob
    pub fn remove(&self, digest: &ChunkDigest) -> Option<Vec<u8>> {
        self.blobs.remove(digest).map(|(_, data)| data)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, digest: &ChunkDigest, data: &[u8]) -> StorageResult<()> {
        self.blobs
            .entry(*digest)
            .or_insert_with(|| data.to_vec());
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn exists(&self, digest: &ChunkDigest) -> StorageResult<bool> {
        Ok(self.blobs.contains_key(digest))
    }

    async fn get(&self, digest: &ChunkDigest) -> StorageResult<Vec<u8>> {
        self.blobs
            .get(digest)
            .map(|entry| entry.value().clone())
            .ok_or(StorageError::NotFound(*digest))
    }
}

/// Metadata store keeping manifests in a vector
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    manifests: RwLock<Vec<StoredManifest>>,
    next_id: AtomicU64,
}

impl MemoryMetadataStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored manifests
    pub async fn len(&self) -> usize {
        self.manifests.read().await.len()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn save_manifest(&self, manifest: &BackupManifest) -> StorageResult<ManifestId> {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let id = ManifestId::new(format!("{seq:016x}"));

        self.manifests.write().await.push(StoredManifest {
            id: id.clone(),
            manifest: manifest.clone(),
        });
        Ok(id)
    }

    async fn list_manifests(&self, owner_id: Option<&str>) -> StorageResult<Vec<StoredManifest>> {
        let mut manifests: Vec<StoredManifest> = self
            .manifests
            .read()
            .await
            .iter()
            .filter(|m| owner_id.is_none() || m.manifest.owner_id.as_deref() == owner_id)
            .cloned()
            .collect();
        sort_newest_first(&mut manifests);
        Ok(manifests)
    }

    async fn get_manifest(&self, id: &ManifestId) -> StorageResult<Option<StoredManifest>> {
        Ok(self
            .manifests
            .read()
            .await
            .iter()
            .find(|m| &m.id == id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkvault_files::hash_chunk;

    fn manifest(name: &str, owner: Option<&str>, created_at: u64) -> BackupManifest {
        let digest = hash_chunk(name.as_bytes());
        BackupManifest {
            file_name: name.into(),
            file_size: 10,
            mime_type: "text/plain".into(),
            chunk_count: 1,
            chunk_size: 1024,
            root_hash: digest,
            chunk_digests: vec![digest],
            owner_id: owner.map(String::from),
            caption: None,
            mood: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_blob_roundtrip() {
        let store = MemoryBlobStore::new();
        let data = b"chunk".to_vec();
        let digest = hash_chunk(&data);

        assert!(!store.exists(&digest).await.unwrap());
        store.put(&digest, &data).await.unwrap();
        assert!(store.exists(&digest).await.unwrap());
        assert_eq!(store.get(&digest).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_blob_put_idempotent() {
        let store = MemoryBlobStore::new();
        let digest = hash_chunk(b"x");
        store.put(&digest, b"x").await.unwrap();
        store.put(&digest, b"x").await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.put_count(), 2);
    }

    #[tokio::test]
    async fn test_blob_not_found() {
        let store = MemoryBlobStore::new();
        let digest = hash_chunk(b"missing");
        assert!(matches!(
            store.get(&digest).await,
            Err(StorageError::NotFound(d)) if d == digest
        ));
    }

    #[tokio::test]
    async fn test_overwrite_and_remove() {
        let store = MemoryBlobStore::new();
        let digest = hash_chunk(b"orig");
        store.put(&digest, b"orig").await.unwrap();

        store.overwrite(&digest, b"evil".to_vec());
        assert_eq!(store.get(&digest).await.unwrap(), b"evil");

        assert!(store.remove(&digest).is_some());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_manifest_listing() {
        let store = MemoryMetadataStore::new();
        let a = store.save_manifest(&manifest("a", Some("alice"), 100)).await.unwrap();
        let b = store.save_manifest(&manifest("b", Some("bob"), 200)).await.unwrap();
        let c = store.save_manifest(&manifest("c", Some("alice"), 300)).await.unwrap();

        let alice = store.list_manifests(Some("alice")).await.unwrap();
        let ids: Vec<_> = alice.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec![c.clone(), a.clone()]);

        let all = store.list_manifests(None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].id, b);

        let fetched = store.get_manifest(&a).await.unwrap().unwrap();
        assert_eq!(fetched.manifest.file_name, "a");
        assert!(store.get_manifest(&ManifestId::new("nope")).await.unwrap().is_none());
        assert_eq!(store.len().await, 3);
    }
}
