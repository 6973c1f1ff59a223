//! Job orchestration: fingerprint → cache lookup → separate → persist
//!
//! One background task per submitted upload. The task owns the upload's
//! temporary file and the job's cancellation token; progress goes through a
//! per-job unbounded queue into a single relay task, which forwards to the
//! [`ProgressHub`] in production order.
//!
//! # Single-flight
//! A job that misses the cache takes a per-fingerprint lock before separating
//! and re-checks the cache once it holds it. An identical upload submitted
//! while the first is still separating therefore waits and completes from
//! cache instead of running the separator again.

use riff_common::events::{CompletionData, ServerMessage};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cache_store::{CacheError, CacheStore};
use super::fingerprinter::Fingerprinter;
use super::progress_hub::ProgressHub;
use super::separator::{ProgressSender, SeparationContext, SeparationError, StemSeparator};
use super::stem_writer::StemWriter;
use crate::models::{ClientId, Fingerprint, JobSnapshot, JobState, JobTracker, StemPaths};

/// Status labels for the progress milestones
pub mod status {
    pub const FINGERPRINTING: &str = "Fingerprinting";
    pub const WAITING: &str = "Waiting for identical upload";
    pub const LOADING: &str = "Loading audio file...";
    pub const SEPARATING: &str = "Running stem separation...";
    pub const SAVING: &str = "Saving stems...";
    pub const COMPLETE: &str = "Complete";
    pub const CACHED: &str = "Loaded from cache";
    pub const CANCELLED_REASON: &str = "Cancelled by user";
}

/// Job failure causes
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Failed to fingerprint upload: {0}")]
    Fingerprint(riff_common::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Separation(SeparationError),

    #[error("Failed to save stems: {0}")]
    Save(io::Error),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Job {0} is already running")]
    Duplicate(ClientId),
}

/// An accepted upload, spooled to disk
///
/// Dropping the `TempPath` removes the file, so it is removed even if the job
/// task is aborted.
pub struct Upload {
    pub filename: String,
    pub path: TempPath,
}

/// How a job ended (failures are `Err(JobError)`)
#[derive(Debug)]
enum JobOutcome {
    Completed {
        fingerprint: Fingerprint,
        paths: StemPaths,
        cached: bool,
    },
    Cancelled,
}

struct JobEntry {
    tracker: JobTracker,
    token: CancellationToken,
}

struct OrchestratorInner {
    jobs: RwLock<HashMap<ClientId, JobEntry>>,
    in_flight: Mutex<HashMap<Fingerprint, Arc<Mutex<()>>>>,
    cache: CacheStore,
    hub: ProgressHub,
    separator: Arc<dyn StemSeparator>,
    fingerprinter: Fingerprinter,
    writer: StemWriter,
    work_dir: PathBuf,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

/// Tracks jobs and drives each through its lifecycle
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl JobOrchestrator {
    /// `work_dir` receives per-job staging directories for written stems
    pub fn new(
        cache: CacheStore,
        hub: ProgressHub,
        separator: Arc<dyn StemSeparator>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                jobs: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                cache,
                hub,
                separator,
                fingerprinter: Fingerprinter::new(),
                writer: StemWriter::new(),
                work_dir: work_dir.into(),
                tasks: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn hub(&self) -> &ProgressHub {
        &self.inner.hub
    }

    /// Register a QUEUED job under a fresh id and start its background task
    pub async fn submit(&self, upload: Upload) -> ClientId {
        let client_id = Uuid::new_v4();
        let token = {
            let mut jobs = self.inner.jobs.write().await;
            self.register_job(&mut jobs, client_id, &upload.filename)
        };
        self.start_job(client_id, upload, token);
        client_id
    }

    /// Like [`submit`](Self::submit), under an id the client chose
    ///
    /// Lets a client open its progress socket before uploading, so no early
    /// event is missed. Fails if a job with that id is still tracked.
    pub async fn submit_as(
        &self,
        client_id: ClientId,
        upload: Upload,
    ) -> Result<ClientId, JobError> {
        let token = {
            let mut jobs = self.inner.jobs.write().await;
            if jobs.contains_key(&client_id) {
                return Err(JobError::Duplicate(client_id));
            }
            self.register_job(&mut jobs, client_id, &upload.filename)
        };
        self.start_job(client_id, upload, token);
        Ok(client_id)
    }

    fn register_job(
        &self,
        jobs: &mut HashMap<ClientId, JobEntry>,
        client_id: ClientId,
        filename: &str,
    ) -> CancellationToken {
        let token = self.inner.shutdown.child_token();
        jobs.insert(
            client_id,
            JobEntry {
                tracker: JobTracker::new(client_id, filename.to_string()),
                token: token.clone(),
            },
        );

        info!(
            client_id = %client_id,
            filename = %filename,
            separator = self.inner.separator.name(),
            "Job queued"
        );
        token
    }

    fn start_job(&self, client_id: ClientId, upload: Upload, token: CancellationToken) {
        let (tx, rx) = mpsc::unbounded_channel();
        let relay = self
            .inner
            .tasks
            .spawn(relay_events(Arc::clone(&self.inner), client_id, rx));

        let this = self.clone();
        self.inner.tasks.spawn(async move {
            this.run_job(client_id, upload, token, ProgressSender::new(tx))
                .await;
            if let Err(e) = relay.await {
                warn!(client_id = %client_id, error = %e, "Progress relay task failed");
            }
            debug!(client_id = %client_id, "Job task finished");
        });
    }

    /// Request cancellation; false if no job is tracked under `client_id`
    pub async fn cancel(&self, client_id: ClientId) -> bool {
        let jobs = self.inner.jobs.read().await;
        match jobs.get(&client_id) {
            Some(entry) if !entry.tracker.state.is_terminal() => {
                entry.token.cancel();
                info!(client_id = %client_id, state = ?entry.tracker.state, "Cancellation requested");
                true
            }
            _ => false,
        }
    }

    pub async fn snapshot(&self, client_id: ClientId) -> Option<JobSnapshot> {
        self.inner
            .jobs
            .read()
            .await
            .get(&client_id)
            .map(|entry| entry.tracker.snapshot())
    }

    pub async fn active_jobs(&self) -> usize {
        self.inner.jobs.read().await.len()
    }

    /// Cancel every tracked job and wait for their tasks to finish
    pub async fn shutdown(&self) {
        let active = self.active_jobs().await;
        info!(active, "Cancelling in-flight jobs");
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    async fn run_job(
        &self,
        client_id: ClientId,
        upload: Upload,
        token: CancellationToken,
        progress: ProgressSender,
    ) {
        let result = self.process(client_id, &upload.path, &token, &progress).await;

        let (state, terminal) = match result {
            Ok(JobOutcome::Completed {
                fingerprint,
                paths,
                cached,
            }) => {
                let label = if cached {
                    status::CACHED
                } else {
                    status::COMPLETE
                };
                progress.report(100.0, label);
                info!(
                    client_id = %client_id,
                    fingerprint = %fingerprint,
                    cached,
                    "Job completed"
                );
                (
                    JobState::Completed,
                    ServerMessage::Complete(CompletionData {
                        stems: paths.to_wire(),
                        fingerprint: fingerprint.to_string(),
                        cached,
                    }),
                )
            }
            Ok(JobOutcome::Cancelled) => {
                info!(client_id = %client_id, "Job cancelled");
                (
                    JobState::Cancelled,
                    ServerMessage::cancelled(status::CANCELLED_REASON),
                )
            }
            Err(e) => {
                error!(client_id = %client_id, error = %e, "Job failed");
                (JobState::Failed, ServerMessage::error(e.to_string()))
            }
        };

        self.finish(client_id, state).await;

        let upload_path = upload.path;
        let removal = tokio::task::spawn_blocking(move || upload_path.close()).await;
        match removal {
            Ok(Ok(())) => debug!(client_id = %client_id, "Upload removed"),
            Ok(Err(e)) => warn!(client_id = %client_id, error = %e, "Failed to remove upload"),
            Err(e) => warn!(client_id = %client_id, error = %e, "Upload removal task failed"),
        }

        progress.emit(terminal);
    }

    /// Enter the terminal state and drop the job from the registry
    async fn finish(&self, client_id: ClientId, state: JobState) {
        let mut jobs = self.inner.jobs.write().await;
        if let Some(mut entry) = jobs.remove(&client_id) {
            match entry.tracker.transition_to(state) {
                Ok(t) => debug!(
                    client_id = %client_id,
                    from = ?t.old_state,
                    to = ?t.new_state,
                    "Job state changed"
                ),
                Err(e) => warn!(client_id = %client_id, error = %e, "Rejected job transition"),
            }
        }
    }

    async fn transition(&self, client_id: ClientId, state: JobState) {
        let mut jobs = self.inner.jobs.write().await;
        if let Some(entry) = jobs.get_mut(&client_id) {
            match entry.tracker.transition_to(state) {
                Ok(t) => debug!(
                    client_id = %client_id,
                    from = ?t.old_state,
                    to = ?t.new_state,
                    "Job state changed"
                ),
                Err(e) => warn!(client_id = %client_id, error = %e, "Rejected job transition"),
            }
        }
    }

    async fn set_fingerprint(&self, client_id: ClientId, fingerprint: &Fingerprint) {
        if let Some(entry) = self.inner.jobs.write().await.get_mut(&client_id) {
            entry.tracker.fingerprint = Some(fingerprint.clone());
        }
    }

    async fn process(
        &self,
        client_id: ClientId,
        input: &Path,
        token: &CancellationToken,
        progress: &ProgressSender,
    ) -> Result<JobOutcome, JobError> {
        progress.report(5.0, status::FINGERPRINTING);
        let fingerprint = self
            .inner
            .fingerprinter
            .fingerprint_file(input)
            .await
            .map_err(JobError::Fingerprint)?;
        self.set_fingerprint(client_id, &fingerprint).await;
        debug!(client_id = %client_id, fingerprint = %fingerprint, "Upload fingerprinted");

        if let Some(paths) = self.inner.cache.get(&fingerprint).await? {
            return Ok(JobOutcome::Completed {
                fingerprint,
                paths,
                cached: true,
            });
        }

        let Some(flight) = self
            .acquire_flight(client_id, &fingerprint, token, progress)
            .await
        else {
            return Ok(JobOutcome::Cancelled);
        };

        let outcome = self
            .separate_and_store(client_id, input, fingerprint.clone(), token, progress)
            .await;

        drop(flight);
        self.release_flight(&fingerprint).await;
        outcome
    }

    async fn separate_and_store(
        &self,
        client_id: ClientId,
        input: &Path,
        fingerprint: Fingerprint,
        token: &CancellationToken,
        progress: &ProgressSender,
    ) -> Result<JobOutcome, JobError> {
        // An identical upload may have finished while we waited
        if let Some(paths) = self.inner.cache.get(&fingerprint).await? {
            return Ok(JobOutcome::Completed {
                fingerprint,
                paths,
                cached: true,
            });
        }

        if token.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }

        self.transition(client_id, JobState::Running).await;
        progress.report(10.0, status::LOADING);
        progress.report(20.0, status::SEPARATING);

        let separator = Arc::clone(&self.inner.separator);
        let ctx = SeparationContext::new(token.clone(), progress.clone());
        let input = input.to_path_buf();
        let result = tokio::task::spawn_blocking(move || separator.separate(&input, &ctx))
            .await
            .map_err(|e| JobError::Worker(e.to_string()))?;

        let output = match result {
            Ok(output) => output,
            Err(SeparationError::Cancelled) => return Ok(JobOutcome::Cancelled),
            Err(e) => return Err(JobError::Separation(e)),
        };

        if token.is_cancelled() {
            info!(client_id = %client_id, "Cancelled during separation, discarding result");
            return Ok(JobOutcome::Cancelled);
        }

        progress.report(80.0, status::SAVING);

        let writer = self.inner.writer;
        let work_dir = self.inner.work_dir.clone();
        let staging = tokio::task::spawn_blocking(move || -> io::Result<tempfile::TempDir> {
            std::fs::create_dir_all(&work_dir)?;
            let staging = tempfile::Builder::new()
                .prefix("riff-stems-")
                .tempdir_in(&work_dir)?;
            writer.write_all(&output, staging.path())?;
            Ok(staging)
        })
        .await
        .map_err(|e| JobError::Worker(e.to_string()))?
        .map_err(JobError::Save)?;

        let paths = self.inner.cache.put(&fingerprint, staging.path()).await;

        tokio::task::spawn_blocking(move || {
            if let Err(e) = staging.close() {
                warn!(error = %e, "Failed to remove stem staging directory");
            }
        })
        .await
        .map_err(|e| JobError::Worker(e.to_string()))?;

        Ok(JobOutcome::Completed {
            fingerprint,
            paths: paths?,
            cached: false,
        })
    }

    /// Take the fingerprint's single-flight lock; `None` if cancelled while waiting
    async fn acquire_flight(
        &self,
        client_id: ClientId,
        fingerprint: &Fingerprint,
        token: &CancellationToken,
        progress: &ProgressSender,
    ) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut in_flight = self.inner.in_flight.lock().await;
            Arc::clone(
                in_flight
                    .entry(fingerprint.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        if let Ok(guard) = Arc::clone(&lock).try_lock_owned() {
            return Some(guard);
        }

        info!(client_id = %client_id, fingerprint = %fingerprint, "Identical upload in flight, waiting");
        progress.report(5.0, status::WAITING);

        let acquired = tokio::select! {
            guard = lock.lock_owned() => Some(guard),
            _ = token.cancelled() => None,
        };
        if acquired.is_none() {
            self.release_flight(fingerprint).await;
        }
        acquired
    }

    /// Forget the fingerprint's lock once nobody holds or awaits it
    async fn release_flight(&self, fingerprint: &Fingerprint) {
        let mut in_flight = self.inner.in_flight.lock().await;
        if let Some(lock) = in_flight.get(fingerprint) {
            if Arc::strong_count(lock) == 1 {
                in_flight.remove(fingerprint);
            }
        }
    }
}

/// Forward one job's events to its subscriber, in order
///
/// Percentages are clamped to 0-100 and never go backwards; nothing is
/// forwarded after the terminal event.
async fn relay_events(
    inner: Arc<OrchestratorInner>,
    client_id: ClientId,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
) {
    let mut last_progress = 0.0_f64;
    let mut finished = false;

    while let Some(message) = rx.recv().await {
        if finished {
            debug!(client_id = %client_id, kind = message.kind(), "Event after terminal dropped");
            continue;
        }

        let message = match message {
            ServerMessage::Progress(mut data) => {
                data.progress = data.progress.clamp(0.0, 100.0).max(last_progress);
                last_progress = data.progress;
                if let Some(entry) = inner.jobs.write().await.get_mut(&client_id) {
                    entry.tracker.record_progress(data.progress, &data.status);
                }
                ServerMessage::Progress(data)
            }
            other => {
                finished = other.is_terminal();
                other
            }
        };

        inner.hub.send(client_id, message).await;
    }
}
