//! Upload scheduler
//!
//! FIFO queue of chunk upload jobs driven against a [`BlobStore`].
//!
//! Each job moves through `Pending -> InFlight -> Durable`; a failed attempt
//! moves it to `Failed` and, while attempts remain, back to `Pending` at the
//! tail of the queue so one broken chunk cannot starve the others. After
//! `max_attempts` attempts (or on a permanent storage error) the job stays
//! `Failed` and is reported to the caller.
//!
//! Several producers may [`enqueue`](UploadScheduler::enqueue) concurrently;
//! order within one producer is preserved. [`run`](UploadScheduler::run) is
//! the consumer.

use crate::error::StorageError;
use crate::progress::{ProgressSender, ProgressStage, UploadProgress, emit};
use crate::session::CancelToken;
use crate::store::BlobStore;
use chunkvault_files::{Chunk, ChunkDigest, MembershipFilter};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Upload job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Queued, waiting for an attempt
    Pending,
    /// Being written to the store
    InFlight,
    /// Durably stored
    Durable,
    /// Last attempt failed
    Failed,
}

/// One chunk waiting to be uploaded
#[derive(Debug)]
pub struct UploadJob {
    chunk: Chunk,
    digest: ChunkDigest,
    file_name: Arc<str>,
    attempts: u32,
    state: JobState,
}

impl UploadJob {
    /// Create a pending job
    pub fn new(chunk: Chunk, digest: ChunkDigest, file_name: impl Into<Arc<str>>) -> Self {
        Self {
            chunk,
            digest,
            file_name: file_name.into(),
            attempts: 0,
            state: JobState::Pending,
        }
    }

    /// Chunk to upload
    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// Content address of the chunk
    pub fn digest(&self) -> &ChunkDigest {
        &self.digest
    }

    /// File the chunk belongs to
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Current state
    pub fn state(&self) -> JobState {
        self.state
    }

    fn transition(&mut self, next: JobState) {
        tracing::trace!(
            "{} chunk {}: {:?} -> {:?}",
            self.file_name,
            self.chunk.index(),
            self.state,
            next
        );
        self.state = next;
    }
}

/// A job that reached the terminal failed state
#[derive(Debug, Clone)]
pub struct FailedJob {
    /// Chunk index within its file
    pub chunk_index: u64,

    /// Content address of the chunk
    pub digest: ChunkDigest,

    /// Attempts made
    pub attempts: u32,

    /// Error from the last attempt
    pub error: StorageError,
}

/// Outcome of the jobs admitted for one file
#[derive(Debug, Clone)]
pub struct FileUploadReport {
    /// File name
    pub file_name: Arc<str>,

    /// Jobs admitted for this file
    pub admitted: u64,

    /// Indices of chunks durably stored, in completion order
    pub durable: Vec<u64>,

    /// Bytes durably stored
    pub bytes_uploaded: u64,

    /// Jobs that failed permanently
    pub failed: Vec<FailedJob>,
}

impl FileUploadReport {
    fn new(file_name: Arc<str>) -> Self {
        Self {
            file_name,
            admitted: 0,
            durable: Vec::new(),
            bytes_uploaded: 0,
            failed: Vec::new(),
        }
    }

    /// Indices of permanently failed chunks, ascending
    pub fn failed_indices(&self) -> Vec<u64> {
        let mut indices: Vec<u64> = self.failed.iter().map(|f| f.chunk_index).collect();
        indices.sort_unstable();
        indices
    }

    /// Whether every admitted job has finished (durable or failed)
    pub fn is_settled(&self) -> bool {
        self.durable.len() as u64 + self.failed.len() as u64 >= self.admitted
    }
}

/// Outcome of a scheduler run
#[derive(Debug, Clone, Default)]
pub struct SchedulerReport {
    /// Per-file outcomes, in order of first admission
    pub files: Vec<FileUploadReport>,

    /// Whether the run stopped on cancellation
    pub cancelled: bool,

    /// Jobs still queued when the run returned
    pub remaining: usize,
}

impl SchedulerReport {
    /// Outcome for one file
    pub fn file(&self, file_name: &str) -> Option<&FileUploadReport> {
        self.files.iter().find(|f| &*f.file_name == file_name)
    }

    /// Whether every job became durable
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.remaining == 0 && self.files.iter().all(|f| f.failed.is_empty())
    }

    /// Total jobs that failed permanently
    pub fn failed_count(&self) -> usize {
        self.files.iter().map(|f| f.failed.len()).sum()
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    queue: VecDeque<UploadJob>,
    files: Vec<FileUploadReport>,
    by_name: HashMap<Arc<str>, usize>,
}

impl SchedulerState {
    fn file_mut(&mut self, file_name: &Arc<str>) -> &mut FileUploadReport {
        let slot = match self.by_name.get(file_name) {
            Some(&slot) => slot,
            None => {
                self.files.push(FileUploadReport::new(file_name.clone()));
                let slot = self.files.len() - 1;
                self.by_name.insert(file_name.clone(), slot);
                slot
            }
        };
        &mut self.files[slot]
    }
}

/// FIFO upload scheduler with bounded retries
#[derive(Debug)]
pub struct UploadScheduler {
    state: Mutex<SchedulerState>,
    max_attempts: u32,
    progress: Option<ProgressSender>,
}

impl UploadScheduler {
    /// Create a scheduler giving each job at most `max_attempts` attempts
    ///
    /// A bound of zero is treated as one attempt.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(SchedulerState::default()),
            max_attempts: max_attempts.max(1),
            progress: None,
        }
    }

    /// Emit progress events on `sender`
    #[must_use]
    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Attempt bound per job
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        // State is consistent between statements; a panicking holder cannot
        // leave a half-applied update behind.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a job at the tail of the queue
    pub fn enqueue(&self, mut job: UploadJob) {
        job.state = JobState::Pending;
        let mut state = self.lock();
        state.file_mut(&job.file_name).admitted += 1;
        state.queue.push_back(job);
    }

    /// Number of queued jobs
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Drain the queue against `store`
    ///
    /// Durable digests are recorded in `filter`. The run stops early if
    /// `cancel` is triggered; jobs not yet attempted stay queued and a later
    /// run picks them up. Files whose jobs have all settled are removed from
    /// the scheduler and reported.
    pub async fn run<B>(
        &self,
        store: &B,
        filter: &MembershipFilter,
        cancel: Option<&CancelToken>,
    ) -> SchedulerReport
    where
        B: BlobStore + ?Sized,
    {
        let cancelled = self.drain(store, filter, cancel).await;
        self.take_report(cancelled)
    }

    /// Drain the queue without settling per-file reports
    ///
    /// Outcomes accumulate across calls, so a producer can admit jobs in
    /// batches and drain after each one; [`UploadScheduler::take_report`]
    /// collects the totals. Returns `true` if `cancel` stopped the drain.
    pub async fn drain<B>(
        &self,
        store: &B,
        filter: &MembershipFilter,
        cancel: Option<&CancelToken>,
    ) -> bool
    where
        B: BlobStore + ?Sized,
    {
        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                tracing::info!("Upload run cancelled with {} jobs queued", self.len());
                return true;
            }

            let Some(mut job) = self.lock().queue.pop_front() else {
                return false;
            };

            job.transition(JobState::InFlight);
            job.attempts += 1;

            match store.put(&job.digest, job.chunk.data()).await {
                Ok(()) => {
                    job.transition(JobState::Durable);
                    filter.add(&job.digest);
                    self.record_durable(&job);
                }
                Err(e) => {
                    job.transition(JobState::Failed);
                    self.record_failure(job, e);
                }
            }
        }
    }

    fn record_durable(&self, job: &UploadJob) {
        let event = {
            let mut state = self.lock();
            let file = state.file_mut(&job.file_name);
            file.durable.push(job.chunk.index());
            file.bytes_uploaded += job.chunk.size() as u64;
            UploadProgress {
                file_name: job.file_name.clone(),
                stage: ProgressStage::Uploading,
                processed: file.durable.len() as u64,
                total: file.admitted,
            }
        };

        tracing::debug!(
            "Stored chunk {} of {} ({}/{})",
            job.chunk.index(),
            job.file_name,
            event.processed,
            event.total
        );
        emit(self.progress.as_ref(), event);
    }

    fn record_failure(&self, mut job: UploadJob, error: StorageError) {
        let mut state = self.lock();

        if error.is_transient() && job.attempts < self.max_attempts {
            tracing::warn!(
                "Upload of chunk {} of {} failed (attempt {}/{}): {}; re-queueing",
                job.chunk.index(),
                job.file_name,
                job.attempts,
                self.max_attempts,
                error
            );
            job.transition(JobState::Pending);
            state.queue.push_back(job);
            return;
        }

        tracing::error!(
            "Upload of chunk {} of {} failed permanently after {} attempt(s): {}",
            job.chunk.index(),
            job.file_name,
            job.attempts,
            error
        );
        state.file_mut(&job.file_name).failed.push(FailedJob {
            chunk_index: job.chunk.index(),
            digest: job.digest,
            attempts: job.attempts,
            error,
        });
    }

    /// Report every file seen so far and forget the settled ones
    pub fn take_report(&self, cancelled: bool) -> SchedulerReport {
        let mut state = self.lock();
        let files = state.files.clone();

        let pending: Vec<FileUploadReport> = std::mem::take(&mut state.files)
            .into_iter()
            .filter(|f| !f.is_settled())
            .collect();
        state.by_name = pending
            .iter()
            .enumerate()
            .map(|(slot, f)| (f.file_name.clone(), slot))
            .collect();
        state.files = pending;

        SchedulerReport {
            files,
            cancelled,
            remaining: state.queue.len(),
        }
    }
}
