//! Per-file progress events
//!
//! The scheduler emits an [`UploadProgress`] after every durable chunk write
//! and restore emits one after every chunk fetched. Events travel over an
//! unbounded tokio channel so that emitting never blocks the pipeline; a
//! dropped receiver simply discards them.

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Pipeline stage a progress event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    /// Chunks being written to the blob store
    Uploading,
    /// Chunks being fetched for reconstruction
    Restoring,
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uploading => write!(f, "Uploading"),
            Self::Restoring => write!(f, "Restoring"),
        }
    }
}

/// Progress of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProgress {
    /// File the event refers to
    pub file_name: Arc<str>,

    /// Stage
    pub stage: ProgressStage,

    /// Chunks completed so far
    pub processed: u64,

    /// Chunks to complete for this file
    pub total: u64,
}

impl UploadProgress {
    /// Completed fraction (0.0 to 1.0)
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }

    /// Completed percentage (0.0 to 100.0)
    pub fn percent(&self) -> f64 {
        self.fraction() * 100.0
    }

    /// Whether every chunk is done
    pub fn is_complete(&self) -> bool {
        self.processed >= self.total
    }
}

/// Sending half of a progress channel
pub type ProgressSender = mpsc::UnboundedSender<UploadProgress>;

/// Receiving half of a progress channel
pub type ProgressReceiver = mpsc::UnboundedReceiver<UploadProgress>;

/// Create a progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

pub(crate) fn emit(sender: Option<&ProgressSender>, event: UploadProgress) {
    if let Some(sender) = sender {
        // Receiver gone: nobody is rendering progress any more.
        let _ = sender.send(event);
    }
}
