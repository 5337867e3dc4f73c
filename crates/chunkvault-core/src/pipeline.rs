//! Backup and restore pipeline
//!
//! Backup drives a byte source through the chunker, the session hasher and
//! the membership filter into an [`UploadScheduler`], builds the integrity
//! tree over the chunk digests and yields a [`BackupManifest`]. Restore
//! fetches each chunk by its content address, reassembles the file and checks
//! the recomputed root against the manifest.
//!
//! # Deduplication
//!
//! A chunk is skipped only when the session filter reports it as possibly
//! present *and* the blob store confirms it exists. A negative filter result,
//! an unconfirmed positive or a failed existence check all lead to an upload.

use crate::config::PipelineConfig;
use crate::error::{InputError, PipelineError, Result, StorageError, StorageResult};
use crate::manifest::{BackupManifest, ManifestId, StoredManifest, unix_now};
use crate::progress::{ProgressSender, ProgressStage, UploadProgress, emit};
use crate::scheduler::{UploadJob, UploadScheduler};
use crate::session::{BackupSession, CancelToken};
use crate::store::{BlobStore, ChunkProvider, MetadataStore};
use chunkvault_files::{
    ByteSource, Chunk, ChunkAssembler, ChunkDigest, FileChunker, FilesError, IntegrityTree,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Mood recorded when a backup names none
pub const DEFAULT_MOOD: &str = "neutral";

/// Chunks read, hashed and uploaded per window, per hash worker
const WINDOW_PER_WORKER: usize = 4;

/// What admission decided for each distinct digest of one file
#[derive(Debug, Default)]
struct Admission {
    seen: HashMap<ChunkDigest, Seen>,
}

#[derive(Debug)]
enum Seen {
    /// Confirmed present in the store before this backup
    Stored,
    /// Upload job created; later indices with the same content wait on it
    Queued { repeats: Vec<u64> },
}

/// Optional inputs to a backup
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Owner recorded in the manifest
    pub owner_id: Option<String>,

    /// Caption recorded in the manifest
    pub caption: Option<String>,

    /// Mood recorded in the manifest, [`DEFAULT_MOOD`] if unset
    pub mood: Option<String>,

    /// Receives upload progress
    pub progress: Option<ProgressSender>,

    /// Checked between chunk operations
    pub cancel: Option<CancelToken>,
}

impl BackupOptions {
    /// Set the owner
    #[must_use]
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Set the caption
    #[must_use]
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Set the mood
    #[must_use]
    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood = Some(mood.into());
        self
    }

    /// Report progress on `sender`
    #[must_use]
    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Stop when `cancel` fires
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Optional inputs to a restore
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Receives restore progress
    pub progress: Option<ProgressSender>,

    /// Checked between chunk fetches
    pub cancel: Option<CancelToken>,
}

/// A file restored by [`Pipeline::restore_all`]
#[derive(Debug, Clone)]
pub struct RestoredFile {
    /// Manifest identifier
    pub id: ManifestId,

    /// File name from the manifest
    pub file_name: String,

    /// Reconstructed bytes
    pub data: Vec<u8>,
}

/// A file [`Pipeline::restore_all`] could not restore
#[derive(Debug)]
pub struct RestoreFailure {
    /// Manifest identifier
    pub id: ManifestId,

    /// File name from the manifest
    pub file_name: String,

    /// Why the restore failed
    pub error: PipelineError,
}

/// Outcome of restoring several files
#[derive(Debug, Default)]
pub struct BatchRestoreReport {
    /// Files reconstructed and verified
    pub restored: Vec<RestoredFile>,

    /// Files that failed; the others are unaffected
    pub failed: Vec<RestoreFailure>,
}

impl BatchRestoreReport {
    /// Whether every file was restored
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Content-addressed backup pipeline
pub struct Pipeline {
    config: PipelineConfig,
    blobs: Arc<dyn BlobStore>,
    session: Arc<BackupSession>,
}

impl Pipeline {
    /// Create a pipeline with a fresh session
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `config` is invalid.
    pub fn new(config: PipelineConfig, blobs: Arc<dyn BlobStore>) -> Result<Self> {
        config.validate()?;
        let session = Arc::new(BackupSession::new(&config)?);
        Ok(Self {
            config,
            blobs,
            session,
        })
    }

    /// Create a pipeline sharing an existing session
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `config` is invalid.
    pub fn with_session(
        config: PipelineConfig,
        blobs: Arc<dyn BlobStore>,
        session: Arc<BackupSession>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            blobs,
            session,
        })
    }

    /// Pipeline configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Blob store chunks are written to
    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Current session
    pub fn session(&self) -> &Arc<BackupSession> {
        &self.session
    }

    /// End the current session and start a new one
    ///
    /// The new session starts with an empty filter and hash cache.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the session cannot be built.
    pub fn renew_session(&mut self) -> Result<Arc<BackupSession>> {
        let fresh = Arc::new(BackupSession::new(&self.config)?);
        let previous = std::mem::replace(&mut self.session, fresh);
        tracing::info!(
            "Backup session ended: {:?}",
            previous.stats().snapshot()
        );
        Ok(previous)
    }

    /// Back up one file
    ///
    /// # Errors
    ///
    /// See [`Pipeline::backup_file_with`].
    pub async fn backup_file<S>(
        &self,
        source: &S,
        file_name: &str,
        mime_type: &str,
    ) -> Result<BackupManifest>
    where
        S: ByteSource + Sync + ?Sized,
    {
        self.backup_file_with(source, file_name, mime_type, BackupOptions::default())
            .await
    }

    /// Back up one file with owner, caption, progress and cancellation
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Input`] for an empty file or file name (no work is done)
    /// - [`PipelineError::Files`] if the source cannot be read
    /// - [`PipelineError::UploadFailed`] if chunks still fail after the retry bound
    /// - [`PipelineError::Cancelled`] if `options.cancel` fired
    pub async fn backup_file_with<S>(
        &self,
        source: &S,
        file_name: &str,
        mime_type: &str,
        options: BackupOptions,
    ) -> Result<BackupManifest>
    where
        S: ByteSource + Sync + ?Sized,
    {
        if file_name.is_empty() {
            return Err(InputError::EmptyFileName.into());
        }
        let file_size = source.byte_len();
        if file_size == 0 {
            return Err(InputError::EmptyFile(file_name.to_string()).into());
        }

        let chunker = FileChunker::with_chunk_size(self.config.chunk_size)?;
        let file_id: Arc<str> = Arc::from(file_name);
        let cancel = options.cancel.as_ref();

        tracing::debug!(
            "Backing up {} ({} bytes, {} chunks)",
            file_name,
            file_size,
            chunker.chunk_count(file_size)
        );

        let mut scheduler = UploadScheduler::new(self.config.max_attempts);
        if let Some(progress) = options.progress.clone() {
            scheduler = scheduler.with_progress(progress);
        }

        // Chunks flow through in windows so memory stays bounded by the window,
        // not the file.
        let window = self.config.hash_workers.saturating_mul(WINDOW_PER_WORKER);
        let mut chunks = chunker.chunks(source, Arc::clone(&file_id));
        let mut digests = Vec::new();
        let mut admission = Admission::default();

        loop {
            let batch: Vec<_> = chunks.by_ref().take(window).collect();
            if batch.is_empty() {
                break;
            }

            let hashed = self.hash_chunks(batch, cancel).await?;
            digests.extend(hashed.iter().map(|(_, digest)| *digest));
            self.admit_chunks(&scheduler, hashed, &file_id, &mut admission, cancel)
                .await?;

            if scheduler
                .drain(self.blobs.as_ref(), self.session.filter(), cancel)
                .await
            {
                return Err(PipelineError::Cancelled);
            }
        }

        let tree = IntegrityTree::build(digests)?;
        let report = scheduler.take_report(false);

        let stats = self.session.stats();
        let mut failed_chunk_indices = Vec::new();
        let mut failed_digests = HashSet::new();
        if let Some(file) = report.file(file_name) {
            stats.record_uploads(file.durable.len() as u64, file.bytes_uploaded);
            failed_chunk_indices = file.failed_indices();
            failed_digests.extend(file.failed.iter().map(|f| f.digest));
        }

        for (digest, seen) in admission.seen {
            let Seen::Queued { repeats } = seen else {
                continue;
            };
            if failed_digests.contains(&digest) {
                failed_chunk_indices.extend(repeats);
            } else {
                for _ in &repeats {
                    stats.record_dedup();
                }
            }
        }

        if !failed_chunk_indices.is_empty() {
            failed_chunk_indices.sort_unstable();
            return Err(PipelineError::UploadFailed {
                file_name: file_name.to_string(),
                failed_chunk_indices,
            });
        }
        stats.record_file();

        let manifest = BackupManifest {
            file_name: file_name.to_string(),
            file_size,
            mime_type: mime_type.to_string(),
            chunk_count: tree.leaf_count() as u64,
            chunk_size: chunker.chunk_size() as u64,
            root_hash: tree.root(),
            chunk_digests: tree.into_leaves(),
            owner_id: options.owner_id,
            caption: options.caption,
            mood: Some(options.mood.unwrap_or_else(|| DEFAULT_MOOD.to_string())),
            created_at: unix_now(),
        };

        tracing::info!(
            "Backed up {} ({} bytes, {} chunks, root {})",
            manifest.file_name,
            manifest.file_size,
            manifest.chunk_count,
            manifest.root_hash
        );
        Ok(manifest)
    }

    /// Back up one file and record its manifest
    ///
    /// # Errors
    ///
    /// See [`Pipeline::backup_file_with`]; also fails if the manifest cannot be saved.
    pub async fn backup_and_record<S, M>(
        &self,
        metadata: &M,
        source: &S,
        file_name: &str,
        mime_type: &str,
        options: BackupOptions,
    ) -> Result<StoredManifest>
    where
        S: ByteSource + Sync + ?Sized,
        M: MetadataStore + ?Sized,
    {
        let manifest = self
            .backup_file_with(source, file_name, mime_type, options)
            .await?;
        let id = metadata.save_manifest(&manifest).await?;
        tracing::debug!("Recorded manifest {} for {}", id, manifest.file_name);
        Ok(StoredManifest { id, manifest })
    }

    /// Hash a batch of chunks on the blocking pool, at most `hash_workers` at a time
    ///
    /// Returns chunks paired with their digests in batch order.
    async fn hash_chunks(
        &self,
        batch: Vec<chunkvault_files::Result<Chunk>>,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<(Chunk, ChunkDigest)>> {
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<(Chunk, ChunkDigest)>> = Vec::with_capacity(batch.len());
        slots.resize_with(batch.len(), || None);

        for (position, chunk) in batch.into_iter().enumerate() {
            check_cancel(cancel)?;
            let chunk = chunk?;

            while tasks.len() >= self.config.hash_workers {
                if let Some(joined) = tasks.join_next().await {
                    place(&mut slots, joined)?;
                }
            }

            let session = Arc::clone(&self.session);
            tasks.spawn_blocking(move || {
                let digest = session.hasher().hash(chunk.data());
                (position, chunk, digest)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            place(&mut slots, joined)?;
        }

        self.session.stats().record_hashed(slots.len() as u64);
        slots
            .into_iter()
            .enumerate()
            .map(|(position, slot)| {
                slot.ok_or_else(|| {
                    PipelineError::TaskJoin(format!("chunk at position {position} was never hashed"))
                })
            })
            .collect()
    }

    /// Decide per chunk whether it needs uploading and enqueue it if so
    async fn admit_chunks(
        &self,
        scheduler: &UploadScheduler,
        hashed: Vec<(Chunk, ChunkDigest)>,
        file_id: &Arc<str>,
        admission: &mut Admission,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        let filter = self.session.filter();
        let stats = self.session.stats();

        for (chunk, digest) in hashed {
            check_cancel(cancel)?;

            match admission.seen.get_mut(&digest) {
                Some(Seen::Stored) => {
                    tracing::debug!("{} chunk {}: repeats a stored chunk", file_id, chunk.index());
                    stats.record_dedup();
                    continue;
                }
                Some(Seen::Queued { repeats }) => {
                    tracing::debug!("{} chunk {}: repeats a queued chunk", file_id, chunk.index());
                    repeats.push(chunk.index());
                    continue;
                }
                None => {}
            }

            if filter.might_contain(&digest) {
                match self.blobs.exists(&digest).await {
                    Ok(true) => {
                        tracing::debug!("{} chunk {}: already stored", file_id, chunk.index());
                        stats.record_dedup();
                        admission.seen.insert(digest, Seen::Stored);
                        continue;
                    }
                    Ok(false) => {
                        tracing::warn!(
                            "{} chunk {}: filter false positive for {}",
                            file_id,
                            chunk.index(),
                            digest
                        );
                        stats.record_false_positive();
                    }
                    Err(e) => {
                        tracing::warn!(
                            "{} chunk {}: existence check failed ({}), uploading",
                            file_id,
                            chunk.index(),
                            e
                        );
                    }
                }
            }

            admission.seen.insert(digest, Seen::Queued { repeats: Vec::new() });
            scheduler.enqueue(UploadJob::new(chunk, digest, Arc::clone(file_id)));
        }

        Ok(())
    }

    /// Restore one file
    ///
    /// # Errors
    ///
    /// See [`Pipeline::restore_file_with`].
    pub async fn restore_file<P>(&self, manifest: &BackupManifest, provider: &P) -> Result<Vec<u8>>
    where
        P: ChunkProvider + ?Sized,
    {
        self.restore_file_with(manifest, provider, &RestoreOptions::default())
            .await
    }

    /// Restore one file with progress and cancellation
    ///
    /// Chunks are fetched by digest in index order. Transient read errors are
    /// retried up to `max_attempts`; chunks the provider does not have are
    /// collected and reported together.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Input`] if the manifest is malformed
    /// - [`PipelineError::IncompleteData`] listing every missing chunk index
    /// - [`PipelineError::Integrity`] if the recomputed root differs
    /// - [`PipelineError::Storage`] if a fetch keeps failing
    /// - [`PipelineError::Cancelled`] if `options.cancel` fired
    pub async fn restore_file_with<P>(
        &self,
        manifest: &BackupManifest,
        provider: &P,
        options: &RestoreOptions,
    ) -> Result<Vec<u8>>
    where
        P: ChunkProvider + ?Sized,
    {
        manifest.validate()?;

        let file_name: Arc<str> = Arc::from(manifest.file_name.as_str());
        let mut assembler = ChunkAssembler::new(manifest.chunk_count);
        let mut missing = Vec::new();
        let mut fetched = 0u64;

        for (index, digest) in (0u64..).zip(&manifest.chunk_digests) {
            check_cancel(options.cancel.as_ref())?;

            match self.fetch_with_retry(provider, index, digest).await {
                Ok(data) => {
                    assembler.insert_bytes(index, data)?;
                    fetched += 1;
                    emit(
                        options.progress.as_ref(),
                        UploadProgress {
                            file_name: Arc::clone(&file_name),
                            stage: ProgressStage::Restoring,
                            processed: fetched,
                            total: manifest.chunk_count,
                        },
                    );
                }
                Err(StorageError::NotFound(_)) => {
                    tracing::warn!("{}: chunk {} ({}) not found", file_name, index, digest);
                    missing.push(index);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !missing.is_empty() {
            tracing::error!("{}: {} chunk(s) missing", file_name, missing.len());
            return Err(PipelineError::IncompleteData {
                file_name: manifest.file_name.clone(),
                missing,
            });
        }

        let data = assembler
            .finish(&manifest.root_hash)
            .map_err(|e| file_error(&manifest.file_name, e))?;
        tracing::info!("Restored {} ({} bytes)", file_name, data.len());
        Ok(data)
    }

    /// Reassemble a file from chunks already in hand, in any order
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Input`] if the manifest is malformed or a chunk index
    ///   is out of range or repeated
    /// - [`PipelineError::IncompleteData`] listing missing indices
    /// - [`PipelineError::Integrity`] if the recomputed root differs
    pub fn restore_from_chunks(
        &self,
        manifest: &BackupManifest,
        chunks: Vec<Chunk>,
    ) -> Result<Vec<u8>> {
        manifest.validate()?;

        let mut assembler = ChunkAssembler::new(manifest.chunk_count);
        for chunk in chunks {
            assembler
                .insert(chunk)
                .map_err(|e| InputError::MalformedChunks(e.to_string()))?;
        }

        assembler
            .finish(&manifest.root_hash)
            .map_err(|e| file_error(&manifest.file_name, e))
    }

    /// Restore every manifest of `owner_id` (or all manifests)
    ///
    /// Each file succeeds or fails on its own; an integrity failure in one
    /// file does not stop the others.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] only if the manifests cannot be listed.
    pub async fn restore_all<M, P>(
        &self,
        metadata: &M,
        owner_id: Option<&str>,
        provider: &P,
    ) -> Result<BatchRestoreReport>
    where
        M: MetadataStore + ?Sized,
        P: ChunkProvider + ?Sized,
    {
        let manifests = metadata.list_manifests(owner_id).await?;
        let mut report = BatchRestoreReport::default();

        for stored in manifests {
            let file_name = stored.manifest.file_name.clone();
            match self.restore_file(&stored.manifest, provider).await {
                Ok(data) => report.restored.push(RestoredFile {
                    id: stored.id,
                    file_name,
                    data,
                }),
                Err(error) => {
                    tracing::error!("Restore of {} ({}) failed: {}", file_name, stored.id, error);
                    report.failed.push(RestoreFailure {
                        id: stored.id,
                        file_name,
                        error,
                    });
                }
            }
        }

        tracing::info!(
            "Batch restore: {} restored, {} failed",
            report.restored.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn fetch_with_retry<P>(
        &self,
        provider: &P,
        index: u64,
        digest: &ChunkDigest,
    ) -> StorageResult<Vec<u8>>
    where
        P: ChunkProvider + ?Sized,
    {
        let mut attempt = 1;
        loop {
            match provider.fetch_chunk(index, digest).await {
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    tracing::warn!(
                        "Fetch of chunk {} failed (attempt {}/{}): {}",
                        index,
                        attempt,
                        self.config.max_attempts,
                        e
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

fn check_cancel(cancel: Option<&CancelToken>) -> Result<()> {
    if cancel.is_some_and(CancelToken::is_cancelled) {
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

fn place(
    slots: &mut [Option<(Chunk, ChunkDigest)>],
    joined: std::result::Result<(usize, Chunk, ChunkDigest), tokio::task::JoinError>,
) -> Result<()> {
    let (position, chunk, digest) = joined.map_err(|e| PipelineError::TaskJoin(e.to_string()))?;
    let slot = slots.get_mut(position).ok_or_else(|| {
        PipelineError::TaskJoin(format!("chunk {} hashed outside its batch", chunk.index()))
    })?;
    *slot = Some((chunk, digest));
    Ok(())
}

/// Attach the file name to reassembly failures
fn file_error(file_name: &str, err: FilesError) -> PipelineError {
    match err {
        FilesError::IntegrityMismatch { expected, actual } => PipelineError::Integrity {
            file_name: file_name.to_string(),
            expected,
            actual,
        },
        FilesError::Incomplete { missing } => PipelineError::IncompleteData {
            file_name: file_name.to_string(),
            missing,
        },
        other => PipelineError::Files(other),
    }
}
