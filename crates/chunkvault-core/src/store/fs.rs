//! Local filesystem stores
//!
//! Blobs are laid out as `<root>/<first two hex chars>/<full hex digest>`.
//! Manifests are stored one JSON document per file, `<root>/<id>.json`.
//! Both stores write to a temporary file first and rename it into place so a
//! crash never leaves a truncated blob or manifest behind.

use super::{BlobStore, MetadataStore, sort_newest_first};
use crate::error::{StorageError, StorageResult};
use crate::manifest::{BackupManifest, ManifestId, StoredManifest};
use async_trait::async_trait;
use chunkvault_files::ChunkDigest;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Write `data` to `path` via a sibling temporary file
async fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let suffix = ManifestId::generate()
        .map_err(|e| StorageError::Io(format!("random source unavailable: {e}")))?;
    let tmp = path.with_extension(format!("tmp-{suffix}"));

    if let Err(e) = fs::write(&tmp, data).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Blob store rooted at a local directory
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (creating if needed) a blob store at `root`
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a digest is stored at
    pub fn blob_path(&self, digest: &ChunkDigest) -> PathBuf {
        let hex = digest.to_hex();
        self.root.join(&hex[..2]).join(hex)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, digest: &ChunkDigest, data: &[u8]) -> StorageResult<()> {
        let path = self.blob_path(digest);
        if fs::try_exists(&path).await? {
            return Ok(());
        }
        write_atomic(&path, data).await
    }

    async fn exists(&self, digest: &ChunkDigest) -> StorageResult<bool> {
        Ok(fs::try_exists(self.blob_path(digest)).await?)
    }

    async fn get(&self, digest: &ChunkDigest) -> StorageResult<Vec<u8>> {
        match fs::read(self.blob_path(digest)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(*digest)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Metadata store keeping one JSON file per manifest
#[derive(Debug, Clone)]
pub struct FsMetadataStore {
    root: PathBuf,
}

impl FsMetadataStore {
    /// Open (creating if needed) a manifest directory at `root`
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn manifest_path(&self, id: &ManifestId) -> StorageResult<PathBuf> {
        let id = id.as_str();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(StorageError::Rejected(
                format!("invalid manifest id {id:?}").into(),
            ));
        }
        Ok(self.root.join(format!("{id}.json")))
    }

    async fn read_manifest(path: &Path) -> StorageResult<StoredManifest> {
        let data = fs::read(path).await?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[async_trait]
impl MetadataStore for FsMetadataStore {
    async fn save_manifest(&self, manifest: &BackupManifest) -> StorageResult<ManifestId> {
        let id = ManifestId::generate()
            .map_err(|e| StorageError::Io(format!("random source unavailable: {e}")))?;
        let stored = StoredManifest {
            id: id.clone(),
            manifest: manifest.clone(),
        };
        let data = serde_json::to_vec_pretty(&stored)?;
        write_atomic(&self.manifest_path(&id)?, &data).await?;
        Ok(id)
    }

    async fn list_manifests(&self, owner_id: Option<&str>) -> StorageResult<Vec<StoredManifest>> {
        let mut manifests = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let stored = match Self::read_manifest(&path).await {
                Ok(stored) => stored,
                Err(e) => {
                    tracing::warn!("Skipping unreadable manifest {}: {}", path.display(), e);
                    continue;
                }
            };

            if owner_id.is_none() || stored.manifest.owner_id.as_deref() == owner_id {
                manifests.push(stored);
            }
        }

        sort_newest_first(&mut manifests);
        Ok(manifests)
    }

    async fn get_manifest(&self, id: &ManifestId) -> StorageResult<Option<StoredManifest>> {
        let path = self.manifest_path(id)?;
        match Self::read_manifest(&path).await {
            Ok(stored) => Ok(Some(stored)),
            Err(StorageError::Io(_)) if !fs::try_exists(&path).await? => Ok(None),
            Err(e) => Err(e),
        }
    }
}
