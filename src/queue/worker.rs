//! The queue worker.
//!
//! A single background task that drains the job queue in FIFO order:
//! mixing → transcribing → completed | failed. Stage failures are terminal
//! for the job (retry means a new job) and never tear the loop down; the
//! worker always proceeds to the next queued job. Persistence failures are
//! logged and tolerated; the in-memory pipeline keeps going.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::{self, JobRepository, RecordingRepository};
use crate::mixer::Mixer;
use crate::queue::{JobQueue, JobStatus, TranscriptionJob};
use crate::transcriber::Transcriber;

pub fn spawn(
    queue: JobQueue,
    mixer: Arc<dyn Mixer>,
    transcriber: Arc<dyn Transcriber>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Transcription worker started");
        loop {
            match queue.claim_next().await {
                Some(job) => {
                    process_job(&queue, mixer.as_ref(), transcriber.as_ref(), job).await;
                    queue.release().await;
                }
                None => queue.wait_for_work().await,
            }
        }
    })
}

async fn process_job(
    queue: &JobQueue,
    mixer: &dyn Mixer,
    transcriber: &dyn Transcriber,
    mut job: TranscriptionJob,
) {
    info!("Processing job {} (event {})", job.job_id, job.event_id);

    // Stage: mixing
    set_status(queue, &mut job, JobStatus::Mixing);

    let mixed_path = queue.work_dir().join(format!("{}.wav", job.job_id));
    let mix_result = mixer
        .mix(
            job.system_audio_path.as_deref(),
            job.mic_audio_path.as_deref(),
            &mixed_path,
        )
        .await;

    if let Err(err) = mix_result {
        // A mixing failure short-circuits straight to failed; the
        // transcriber is never invoked. ffmpeg may have left a partial
        // output behind.
        if mixed_path.exists() {
            let _ = std::fs::remove_file(&mixed_path);
        }
        fail_job(queue, &mut job, &err.to_string());
        cleanup(queue, &job);
        return;
    }

    job.mixed_audio_path = Some(mixed_path.clone());
    persist(queue, &job, |conn| {
        JobRepository::set_mixed_path(conn, &job.job_id, &mixed_path)
    });

    // Stage: transcribing
    set_status(queue, &mut job, JobStatus::Transcribing);

    let progress_queue = queue.clone();
    let progress_job_id = job.job_id.clone();
    let progress_event_id = job.event_id.clone();
    let on_progress = Box::new(move |pct: u8| {
        progress_queue.emit_progress(&progress_job_id, &progress_event_id, pct);
    });

    match transcriber.transcribe(&mixed_path, on_progress).await {
        Ok(transcript) => {
            job.status = JobStatus::Completed;
            job.transcript = Some(transcript.clone());
            persist(queue, &job, |conn| {
                JobRepository::complete(conn, &job.job_id, &transcript)?;
                RecordingRepository::set_transcript(conn, &job.event_id, &transcript)
            });
            queue.emit_status(&job);
            info!(
                "Job {} completed ({} chars)",
                job.job_id,
                transcript.len()
            );
        }
        Err(err) => {
            fail_job(queue, &mut job, &err.to_string());
        }
    }

    cleanup(queue, &job);
}

fn set_status(queue: &JobQueue, job: &mut TranscriptionJob, status: JobStatus) {
    job.status = status;
    persist(queue, job, |conn| {
        JobRepository::update_status(conn, &job.job_id, status)
    });
    queue.emit_status(job);
}

fn fail_job(queue: &JobQueue, job: &mut TranscriptionJob, message: &str) {
    error!("Job {} failed: {}", job.job_id, message);
    job.status = JobStatus::Failed;
    job.error = Some(message.to_string());
    persist(queue, job, |conn| {
        JobRepository::fail(conn, &job.job_id, message)
    });
    queue.emit_status(job);
}

fn persist<F>(queue: &JobQueue, job: &TranscriptionJob, op: F)
where
    F: FnOnce(&rusqlite::Connection) -> anyhow::Result<()>,
{
    match db::open(queue.db_path()) {
        Ok(conn) => {
            if let Err(err) = op(&conn) {
                error!("Failed to persist job {}: {}", job.job_id, err);
            }
        }
        Err(err) => error!("Failed to open job store: {}", err),
    }
}

/// Delete the job's temp artifacts once it is terminal. The mixed file is
/// always removed, since only the original per-stream files are useful for a
/// manual retry, and those survive a failure unless configured otherwise.
fn cleanup(queue: &JobQueue, job: &TranscriptionJob) {
    let mut doomed: Vec<&PathBuf> = Vec::new();

    if let Some(mixed) = &job.mixed_audio_path {
        doomed.push(mixed);
    }

    let delete_raw = match job.status {
        JobStatus::Completed => true,
        JobStatus::Failed => !queue.keep_raw_on_failure(),
        _ => false,
    };
    if delete_raw {
        if let Some(path) = &job.system_audio_path {
            doomed.push(path);
        }
        if let Some(path) = &job.mic_audio_path {
            doomed.push(path);
        }
    }

    for path in doomed {
        if !path.exists() {
            continue;
        }
        if let Err(err) = std::fs::remove_file(path) {
            warn!("Failed to delete temp file {:?}: {}", path, err);
        }
    }
}
