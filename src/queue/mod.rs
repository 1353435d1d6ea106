//! Transcription job queue.
//!
//! Durable FIFO of mix-then-transcribe jobs. Jobs may be enqueued at any
//! time, including while another is processing; the single worker (see
//! `worker`) drains them strictly in order. Every transition is persisted so
//! terminal outcomes survive a restart, and each one is broadcast as a
//! `JobEvent` for the API layer.

pub mod worker;

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::info;
use uuid::Uuid;

use crate::db::{self, JobRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Mixing,
    Transcribing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Mixing => "mixing",
            Self::Transcribing => "transcribing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "mixing" => Some(Self::Mixing),
            "transcribing" => Some(Self::Transcribing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One durable unit of work: mix the per-stream recordings of an event,
/// then transcribe the result.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionJob {
    pub job_id: String,
    pub event_id: String,
    pub system_audio_path: Option<PathBuf>,
    pub mic_audio_path: Option<PathBuf>,
    pub model: String,
    pub status: JobStatus,
    pub mixed_audio_path: Option<PathBuf>,
    pub transcript: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TranscriptionJob {
    pub fn new(
        event_id: &str,
        system_audio_path: Option<PathBuf>,
        mic_audio_path: Option<PathBuf>,
        model: &str,
    ) -> Self {
        let now = db::now_rfc3339();
        Self {
            job_id: Uuid::new_v4().to_string(),
            event_id: event_id.to_string(),
            system_audio_path,
            mic_audio_path,
            model: model.to_string(),
            status: JobStatus::Queued,
            mixed_audio_path: None,
            transcript: None,
            error: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Status transitions and progress, broadcast to whoever listens.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Status {
        job_id: String,
        event_id: String,
        status: JobStatus,
        transcript: Option<String>,
        error: Option<String>,
    },
    Progress {
        job_id: String,
        event_id: String,
        pct: u8,
    },
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {0} is not in a terminal state")]
    NotTerminal(String),
    #[error("no recoverable audio for job {0}: the source recordings were deleted")]
    NoRecoverableAudio(String),
    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

struct QueueState {
    queue: VecDeque<TranscriptionJob>,
    busy: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    wakeup: Notify,
    events: broadcast::Sender<JobEvent>,
    db_path: PathBuf,
    work_dir: PathBuf,
    keep_raw_on_failure: bool,
}

/// Cheap-to-clone handle; all clones share one queue.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    pub fn new(db_path: PathBuf, work_dir: PathBuf, keep_raw_on_failure: bool) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    busy: false,
                }),
                wakeup: Notify::new(),
                events,
                db_path,
                work_dir,
                keep_raw_on_failure,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Append a new job: persisted first, then queued, then the worker is
    /// nudged. Returns the job as enqueued.
    pub async fn enqueue(
        &self,
        event_id: &str,
        system_audio_path: Option<PathBuf>,
        mic_audio_path: Option<PathBuf>,
        model: &str,
    ) -> Result<TranscriptionJob, QueueError> {
        let job = TranscriptionJob::new(event_id, system_audio_path, mic_audio_path, model);

        let conn = db::open(&self.inner.db_path)?;
        JobRepository::insert(&conn, &job)?;

        self.push(job.clone()).await;
        self.emit_status(&job);
        info!("Job {} queued for event {}", job.job_id, job.event_id);

        Ok(job)
    }

    /// Retry a terminal job as a brand-new job referencing whichever source
    /// recordings still exist on disk.
    pub async fn retry(&self, job_id: &str) -> Result<TranscriptionJob, QueueError> {
        let conn = db::open(&self.inner.db_path)?;
        let old = JobRepository::get(&conn, job_id)?
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;

        if !old.status.is_terminal() {
            return Err(QueueError::NotTerminal(job_id.to_string()));
        }

        let system = old.system_audio_path.filter(|p| p.exists());
        let mic = old.mic_audio_path.filter(|p| p.exists());
        if system.is_none() && mic.is_none() {
            return Err(QueueError::NoRecoverableAudio(job_id.to_string()));
        }

        let job = TranscriptionJob::new(&old.event_id, system, mic, &old.model);
        JobRepository::insert(&conn, &job)?;

        self.push(job.clone()).await;
        self.emit_status(&job);
        info!("Job {} retried as {}", job_id, job.job_id);

        Ok(job)
    }

    /// Re-admit jobs recovered from the database at startup, preserving
    /// their order. Rows are already persisted; nothing is re-inserted.
    pub async fn restore(&self, jobs: Vec<TranscriptionJob>) {
        if jobs.is_empty() {
            return;
        }
        info!("Restoring {} queued job(s) from a previous run", jobs.len());
        let mut state = self.inner.state.lock().await;
        for job in jobs {
            state.queue.push_back(job);
        }
        drop(state);
        self.inner.wakeup.notify_one();
    }

    pub async fn pending(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    pub async fn is_busy(&self) -> bool {
        self.inner.state.lock().await.busy
    }

    async fn push(&self, job: TranscriptionJob) {
        let mut state = self.inner.state.lock().await;
        state.queue.push_back(job);
        drop(state);
        self.inner.wakeup.notify_one();
    }

    /// Pop the next job and mark the queue busy. The busy flag is the sole
    /// mutual exclusion for "at most one job processing".
    pub(crate) async fn claim_next(&self) -> Option<TranscriptionJob> {
        let mut state = self.inner.state.lock().await;
        if state.busy {
            return None;
        }
        let job = state.queue.pop_front()?;
        state.busy = true;
        Some(job)
    }

    pub(crate) async fn release(&self) {
        let mut state = self.inner.state.lock().await;
        state.busy = false;
        drop(state);
        // There may be queued work that arrived while busy.
        self.inner.wakeup.notify_one();
    }

    pub(crate) async fn wait_for_work(&self) {
        self.inner.wakeup.notified().await;
    }

    pub(crate) fn db_path(&self) -> &Path {
        &self.inner.db_path
    }

    pub(crate) fn work_dir(&self) -> &Path {
        &self.inner.work_dir
    }

    pub(crate) fn keep_raw_on_failure(&self) -> bool {
        self.inner.keep_raw_on_failure
    }

    pub(crate) fn emit_status(&self, job: &TranscriptionJob) {
        let _ = self.inner.events.send(JobEvent::Status {
            job_id: job.job_id.clone(),
            event_id: job.event_id.clone(),
            status: job.status,
            transcript: job.transcript.clone(),
            error: job.error.clone(),
        });
    }

    pub(crate) fn emit_progress(&self, job_id: &str, event_id: &str, pct: u8) {
        let _ = self.inner.events.send(JobEvent::Progress {
            job_id: job_id.to_string(),
            event_id: event_id.to_string(),
            pct,
        });
    }
}
