//! # chunkvault core
//!
//! Backup and restore pipeline built on the primitives in `chunkvault-files`.
//!
//! This crate provides:
//! - The error taxonomy (input, transient storage, integrity, incomplete data)
//! - Pipeline configuration
//! - Backup sessions owning the membership filter, hash cache and statistics
//! - Blob and metadata store traits with in-memory and filesystem backends
//! - A FIFO upload scheduler with bounded retries and per-file progress
//! - The [`Pipeline`] driving backup and restore
//!
//! ## Example
//!
//! ```no_run
//! use chunkvault_core::{MemoryBlobStore, Pipeline, PipelineConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> chunkvault_core::Result<()> {
//! let store = Arc::new(MemoryBlobStore::new());
//! let pipeline = Pipeline::new(PipelineConfig::default(), store.clone())?;
//!
//! let data = b"hello, chunkvault".to_vec();
//! let manifest = pipeline.backup_file(&data, "hello.txt", "text/plain").await?;
//! let restored = pipeline.restore_file(&manifest, store.as_ref()).await?;
//! assert_eq!(restored, data);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod store;

pub use config::PipelineConfig;
pub use error::{InputError, PipelineError, Result, StorageError, StorageResult};
pub use manifest::{BackupManifest, ManifestId, StoredManifest};
pub use pipeline::{
    BackupOptions, BatchRestoreReport, DEFAULT_MOOD, Pipeline, RestoreFailure, RestoreOptions,
    RestoredFile,
};
pub use progress::{ProgressReceiver, ProgressSender, ProgressStage, UploadProgress, progress_channel};
pub use scheduler::{FailedJob, FileUploadReport, JobState, SchedulerReport, UploadJob, UploadScheduler};
pub use session::{BackupSession, CancelToken, SessionSnapshot, SessionStats};
pub use store::{
    BlobStore, ChunkProvider, FsBlobStore, FsMetadataStore, MemoryBlobStore, MemoryMetadataStore,
    MetadataStore,
};
