//! Job controller for Rerun Encoder
//!
//! Owns the lifecycle of one encode-and-publish job at a time: optional
//! transcode, slot reservation, upload, confirmation, and the compensating
//! cancel of a reservation when a later stage fails.

use crate::events::{JobEvent, ProgressFn};
use crate::publish::{PublishApi, PublishError, RemoteVideo};
use crate::session::{Session, SessionError, SessionProvider};
use crate::transcode::{derive_output_path, needs_transcode, TranscodeError, Transcoder};
use crate::upload::{UploadError, UploadTransport};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Error type for a job that reached its failure state
#[derive(Debug, Error)]
pub enum JobError {
    /// Session could not be resolved at job start
    #[error("Session Error: {0}")]
    Session(#[from] SessionError),

    /// Transcoding engine failed
    #[error("Encode Error: {0}")]
    Transcode(TranscodeError),

    /// Artifact could not be inspected
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote API rejected the slot request
    #[error("Reservation Error: {0}")]
    Reservation(PublishError),

    /// Byte transfer failed
    #[error("Upload Error: {0}")]
    Upload(UploadError),

    /// Remote API rejected confirmation of uploaded bytes
    #[error("Confirm Error: {0}")]
    Confirm(PublishError),

    /// Cancellation observed at a checkpoint
    #[error("aborted")]
    Aborted,
}

/// Error returned by [`JobController::submit`]
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Job {active} is still running")]
    Busy { active: String },
}

/// Position of the active job in the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Started,
    Transcoding,
    Transcoded,
    SkipTranscode,
    ReservingSlot,
    NoUploadNeeded,
    Uploading,
    Confirming,
    Done,
    Cancelling,
    Failed(String),
}

impl JobState {
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Started => "started",
            JobState::Transcoding => "transcoding",
            JobState::Transcoded => "transcoded",
            JobState::SkipTranscode => "skip_transcode",
            JobState::ReservingSlot => "reserving_slot",
            JobState::NoUploadNeeded => "no_upload_needed",
            JobState::Uploading => "uploading",
            JobState::Confirming => "confirming",
            JobState::Done => "done",
            JobState::Cancelling => "cancelling",
            JobState::Failed(_) => "failed",
        }
    }
}

/// Publishing options chosen by the user
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOptions {
    pub title: String,
    pub publish_on_complete: bool,
}

/// One transcode-and-publish request
///
/// The transcode output path is derived when the job starts, from the
/// container of the encode settings read for that job.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub input_path: PathBuf,
    pub options: PublishOptions,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        input_path: impl Into<PathBuf>,
        options: PublishOptions,
    ) -> Self {
        Self {
            id: id.into(),
            input_path: input_path.into(),
            options,
        }
    }
}

/// Point-in-time view of the active job
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub id: String,
    pub state: JobState,
}

/// Handle to a submitted job; resolves after its terminal event was emitted
pub type JobHandle = JoinHandle<Result<RemoteVideo, JobError>>;

struct ActiveJob {
    id: String,
    state: JobState,
    cancel: CancellationToken,
}

struct Inner {
    transcoder: Arc<dyn Transcoder>,
    uploader: Arc<dyn UploadTransport>,
    publisher: Arc<dyn PublishApi>,
    sessions: Arc<dyn SessionProvider>,
    events: mpsc::UnboundedSender<JobEvent>,
    active: Mutex<Option<ActiveJob>>,
}

/// Runs at most one job at a time and reports its lifecycle as [`JobEvent`]s
#[derive(Clone)]
pub struct JobController {
    inner: Arc<Inner>,
}

impl JobController {
    /// Create a controller and the receiving end of its event stream
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        uploader: Arc<dyn UploadTransport>,
        publisher: Arc<dyn PublishApi>,
        sessions: Arc<dyn SessionProvider>,
    ) -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            transcoder,
            uploader,
            publisher,
            sessions,
            events,
            active: Mutex::new(None),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Start `job` in the background
    ///
    /// Emits `Started` before returning. Fails without side effects while
    /// another job is active. Must be called inside a tokio runtime.
    pub fn submit(&self, job: Job) -> Result<JobHandle, SubmitError> {
        let cancel = CancellationToken::new();
        {
            let mut active = self.inner.slot();
            if let Some(current) = active.as_ref() {
                return Err(SubmitError::Busy {
                    active: current.id.clone(),
                });
            }
            *active = Some(ActiveJob {
                id: job.id.clone(),
                state: JobState::Started,
                cancel: cancel.clone(),
            });
            // Sent under the slot lock so it cannot overtake the previous
            // job's terminal event
            self.inner.emit(JobEvent::Started { id: job.id.clone() });
        }

        let inner = self.inner.clone();
        Ok(tokio::spawn(async move { inner.run(job, cancel).await }))
    }

    /// Request cancellation of the active job
    ///
    /// Idempotent and non-blocking; the job still ends with a `Failed` event.
    pub fn cancel(&self) {
        let mut active = self.inner.slot();
        let Some(job) = active.as_mut() else {
            return;
        };

        if !job.cancel.is_cancelled() {
            info!(job = %job.id, "cancellation requested");
            job.cancel.cancel();
            job.state = JobState::Cancelling;
        }
        self.inner.transcoder.kill();
    }

    pub fn active_job(&self) -> Option<JobSnapshot> {
        self.inner.slot().as_ref().map(|job| JobSnapshot {
            id: job.id.clone(),
            state: job.state.clone(),
        })
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<ActiveJob>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: JobEvent) {
        // Receiver may be gone; the job still runs to completion
        let _ = self.events.send(event);
    }

    fn set_state(&self, id: &str, state: JobState) {
        let mut active = self.slot();
        if let Some(job) = active.as_mut().filter(|job| job.id == id) {
            if job.state != JobState::Cancelling {
                job.state = state;
            }
        }
    }

    /// Free the slot and emit the terminal event under the same lock
    ///
    /// A listener may submit the next job as soon as it sees `event`; that
    /// submit waits for the lock and then finds the slot empty.
    fn finish(&self, id: &str, event: JobEvent) {
        let mut active = self.slot();
        if active.as_ref().is_some_and(|job| job.id == id) {
            *active = None;
        }
        self.emit(event);
    }

    fn checkpoint(&self, cancel: &CancellationToken) -> Result<(), JobError> {
        if cancel.is_cancelled() {
            return Err(JobError::Aborted);
        }
        Ok(())
    }

    fn progress_sink(&self, id: &str, upload: bool) -> ProgressFn {
        let events = self.events.clone();
        let id = id.to_string();
        Box::new(move |percent| {
            let percent = percent.clamp(0.0, 100.0);
            let event = if upload {
                JobEvent::UploadProgress {
                    id: id.clone(),
                    percent,
                }
            } else {
                JobEvent::EncodeProgress {
                    id: id.clone(),
                    percent,
                }
            };
            let _ = events.send(event);
        })
    }

    async fn run(&self, job: Job, cancel: CancellationToken) -> Result<RemoteVideo, JobError> {
        info!(
            job = %job.id,
            input = %job.input_path.display(),
            title = %job.options.title,
            publish_on_complete = job.options.publish_on_complete,
            "job started"
        );

        let result = self.pipeline(&job, &cancel).await;

        match &result {
            Ok(record) => {
                self.set_state(&job.id, JobState::Done);
                info!(job = %job.id, record = %record.id, "job complete");
            }
            Err(e) => {
                self.set_state(&job.id, JobState::Failed(e.to_string()));
                warn!(job = %job.id, error = %e, "job failed");
            }
        }

        let terminal = match &result {
            Ok(record) => JobEvent::UploadComplete {
                id: job.id.clone(),
                record: record.clone(),
            },
            Err(e) => JobEvent::Failed {
                id: job.id.clone(),
                message: e.to_string(),
            },
        };
        self.finish(&job.id, terminal);

        result
    }

    async fn pipeline(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<RemoteVideo, JobError> {
        let session = self.sessions.session()?;
        let output = &session.output;

        let artifact = if needs_transcode(&job.input_path, &output.container) {
            let output_path = derive_output_path(&job.input_path, &output.container);
            self.set_state(&job.id, JobState::Transcoding);
            let result = self
                .transcoder
                .run(
                    &job.input_path,
                    &output_path,
                    output,
                    cancel.clone(),
                    self.progress_sink(&job.id, false),
                )
                .await;
            match result {
                Ok(()) => {}
                Err(_) if cancel.is_cancelled() => return Err(JobError::Aborted),
                Err(e) => return Err(JobError::Transcode(e)),
            }
            self.set_state(&job.id, JobState::Transcoded);
            output_path
        } else {
            info!(job = %job.id, "input already in target container, skipping transcode");
            self.set_state(&job.id, JobState::SkipTranscode);
            job.input_path.clone()
        };

        self.checkpoint(cancel)?;
        self.set_state(&job.id, JobState::ReservingSlot);
        let size = tokio::fs::metadata(&artifact).await?.len();
        let record = self
            .publisher
            .reserve(&session, &job.options.title, size)
            .await
            .map_err(JobError::Reservation)?;
        info!(job = %job.id, record = %record.id, bytes = size, "upload slot reserved");

        let Some(target) = record.upload_url.clone() else {
            info!(job = %job.id, record = %record.id, "no upload required");
            self.set_state(&job.id, JobState::NoUploadNeeded);
            return Ok(record);
        };

        match self
            .upload_and_confirm(job, &session, &record, &target, &artifact, cancel)
            .await
        {
            Ok(confirmed) => Ok(confirmed),
            Err(e) => {
                self.compensate(&session, &record).await;
                Err(e)
            }
        }
    }

    async fn upload_and_confirm(
        &self,
        job: &Job,
        session: &Session,
        record: &RemoteVideo,
        target: &str,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> Result<RemoteVideo, JobError> {
        self.checkpoint(cancel)?;
        self.set_state(&job.id, JobState::Uploading);
        let result = self
            .uploader
            .upload(
                target,
                artifact,
                self.progress_sink(&job.id, true),
                cancel.clone(),
            )
            .await;
        match result {
            Ok(()) => {}
            Err(UploadError::Aborted) => return Err(JobError::Aborted),
            Err(_) if cancel.is_cancelled() => return Err(JobError::Aborted),
            Err(e) => return Err(JobError::Upload(e)),
        }

        self.checkpoint(cancel)?;
        self.set_state(&job.id, JobState::Confirming);
        self.publisher
            .confirm(session, &record.id)
            .await
            .map_err(JobError::Confirm)
    }

    /// Best-effort cancel of a reservation; its own failure is only logged
    async fn compensate(&self, session: &Session, record: &RemoteVideo) {
        warn!(record = %record.id, "cancelling reservation after failure");
        if let Err(e) = self.publisher.cancel_reservation(session, &record.id).await {
            warn!(record = %record.id, error = %e, "failed to cancel reservation");
        }
    }
}
