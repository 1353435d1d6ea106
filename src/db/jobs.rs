//! Transcription job persistence.
//!
//! Raw SQL with rusqlite, no ORM. The worker persists every status
//! transition through here so the queue can be reconstructed after a
//! restart.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};
use std::path::PathBuf;
use tracing::info;

use crate::db::now_rfc3339;
use crate::queue::{JobStatus, TranscriptionJob};

pub struct JobRepository;

impl JobRepository {
    pub fn insert(conn: &Connection, job: &TranscriptionJob) -> Result<()> {
        conn.execute(
            "INSERT INTO jobs (job_id, event_id, system_audio_path, mic_audio_path, model, \
             status, mixed_audio_path, transcript, error, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                job.job_id,
                job.event_id,
                job.system_audio_path.as_ref().map(path_str),
                job.mic_audio_path.as_ref().map(path_str),
                job.model,
                job.status.as_str(),
                job.mixed_audio_path.as_ref().map(path_str),
                job.transcript,
                job.error,
                job.created_at,
                job.updated_at,
            ],
        )
        .context("Failed to insert job")?;
        Ok(())
    }

    pub fn update_status(conn: &Connection, job_id: &str, status: JobStatus) -> Result<()> {
        conn.execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE job_id = ?3",
            params![status.as_str(), now_rfc3339(), job_id],
        )
        .context("Failed to update job status")?;
        Ok(())
    }

    pub fn set_mixed_path(conn: &Connection, job_id: &str, path: &PathBuf) -> Result<()> {
        conn.execute(
            "UPDATE jobs SET mixed_audio_path = ?1, updated_at = ?2 WHERE job_id = ?3",
            params![path_str(path), now_rfc3339(), job_id],
        )
        .context("Failed to set mixed audio path")?;
        Ok(())
    }

    pub fn complete(conn: &Connection, job_id: &str, transcript: &str) -> Result<()> {
        conn.execute(
            "UPDATE jobs SET status = ?1, transcript = ?2, updated_at = ?3 WHERE job_id = ?4",
            params![
                JobStatus::Completed.as_str(),
                transcript,
                now_rfc3339(),
                job_id
            ],
        )
        .context("Failed to complete job")?;
        Ok(())
    }

    pub fn fail(conn: &Connection, job_id: &str, error: &str) -> Result<()> {
        conn.execute(
            "UPDATE jobs SET status = ?1, error = ?2, updated_at = ?3 WHERE job_id = ?4",
            params![JobStatus::Failed.as_str(), error, now_rfc3339(), job_id],
        )
        .context("Failed to mark job as failed")?;
        Ok(())
    }

    pub fn get(conn: &Connection, job_id: &str) -> Result<Option<TranscriptionJob>> {
        let mut stmt = conn
            .prepare(&format!("{SELECT_JOB} WHERE job_id = ?1"))
            .context("Failed to prepare job query")?;

        let mut rows = stmt
            .query_map(params![job_id], job_from_row)
            .context("Failed to query job")?;

        match rows.next() {
            Some(Ok(job)) => Ok(Some(job)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// List jobs, newest first.
    pub fn list_recent(conn: &Connection, limit: usize) -> Result<Vec<TranscriptionJob>> {
        let mut stmt = conn
            .prepare(&format!(
                "{SELECT_JOB} ORDER BY created_at DESC, rowid DESC LIMIT ?1"
            ))
            .context("Failed to prepare jobs list query")?;

        let rows = stmt
            .query_map(params![limit as i64], job_from_row)
            .context("Failed to list jobs")?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    /// Startup pass after an unclean shutdown: jobs caught mid-stage become
    /// failed (their worker died with them); still-queued jobs are returned
    /// in FIFO order for re-admission.
    pub fn recover(conn: &Connection) -> Result<Vec<TranscriptionJob>> {
        let interrupted = conn
            .execute(
                "UPDATE jobs SET status = ?1, error = ?2, updated_at = ?3 \
                 WHERE status IN ('mixing', 'transcribing')",
                params![
                    JobStatus::Failed.as_str(),
                    "interrupted by shutdown",
                    now_rfc3339(),
                ],
            )
            .context("Failed to fail interrupted jobs")?;
        if interrupted > 0 {
            info!("Marked {} interrupted job(s) as failed", interrupted);
        }

        let mut stmt = conn
            .prepare(&format!(
                "{SELECT_JOB} WHERE status = 'queued' ORDER BY created_at ASC, rowid ASC"
            ))
            .context("Failed to prepare recovery query")?;

        let rows = stmt
            .query_map([], job_from_row)
            .context("Failed to load queued jobs")?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }
}

const SELECT_JOB: &str = "SELECT job_id, event_id, system_audio_path, mic_audio_path, model, \
     status, mixed_audio_path, transcript, error, created_at, updated_at FROM jobs";

fn path_str(path: &PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

fn job_from_row(row: &Row) -> rusqlite::Result<TranscriptionJob> {
    let status: String = row.get(5)?;
    Ok(TranscriptionJob {
        job_id: row.get(0)?,
        event_id: row.get(1)?,
        system_audio_path: row.get::<_, Option<String>>(2)?.map(PathBuf::from),
        mic_audio_path: row.get::<_, Option<String>>(3)?.map(PathBuf::from),
        model: row.get(4)?,
        status: JobStatus::parse(&status).ok_or(rusqlite::Error::InvalidQuery)?,
        mixed_audio_path: row.get::<_, Option<String>>(6)?.map(PathBuf::from),
        transcript: row.get(7)?,
        error: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    fn test_job(event_id: &str) -> TranscriptionJob {
        TranscriptionJob::new(
            event_id,
            Some(PathBuf::from("/tmp/sys.webm")),
            Some(PathBuf::from("/tmp/mic.webm")),
            "base.en",
        )
    }

    #[test]
    fn test_insert_and_get() {
        let conn = setup_db();
        let job = test_job("evt-1");
        JobRepository::insert(&conn, &job).unwrap();

        let stored = JobRepository::get(&conn, &job.job_id).unwrap().unwrap();
        assert_eq!(stored.event_id, "evt-1");
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.system_audio_path, Some(PathBuf::from("/tmp/sys.webm")));
        assert!(stored.mixed_audio_path.is_none());
    }

    #[test]
    fn test_get_missing_job() {
        let conn = setup_db();
        assert!(JobRepository::get(&conn, "absent").unwrap().is_none());
    }

    #[test]
    fn test_stage_updates() {
        let conn = setup_db();
        let job = test_job("evt-1");
        JobRepository::insert(&conn, &job).unwrap();

        JobRepository::update_status(&conn, &job.job_id, JobStatus::Mixing).unwrap();
        JobRepository::set_mixed_path(&conn, &job.job_id, &PathBuf::from("/tmp/mixed.wav"))
            .unwrap();
        JobRepository::update_status(&conn, &job.job_id, JobStatus::Transcribing).unwrap();

        let stored = JobRepository::get(&conn, &job.job_id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Transcribing);
        assert_eq!(stored.mixed_audio_path, Some(PathBuf::from("/tmp/mixed.wav")));
    }

    #[test]
    fn test_complete_job() {
        let conn = setup_db();
        let job = test_job("evt-1");
        JobRepository::insert(&conn, &job).unwrap();

        JobRepository::complete(&conn, &job.job_id, "hello world").unwrap();

        let stored = JobRepository::get(&conn, &job.job_id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.transcript, Some("hello world".to_string()));
        assert!(stored.error.is_none());
    }

    #[test]
    fn test_fail_job() {
        let conn = setup_db();
        let job = test_job("evt-1");
        JobRepository::insert(&conn, &job).unwrap();

        JobRepository::fail(&conn, &job.job_id, "ffmpeg failed: bad input").unwrap();

        let stored = JobRepository::get(&conn, &job.job_id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error, Some("ffmpeg failed: bad input".to_string()));
    }

    #[test]
    fn test_list_recent_newest_first() {
        let conn = setup_db();
        for i in 0..3 {
            let mut job = test_job(&format!("evt-{i}"));
            // Force distinct, ordered timestamps
            job.created_at = format!("2026-01-0{}T00:00:00+00:00", i + 1);
            JobRepository::insert(&conn, &job).unwrap();
        }

        let jobs = JobRepository::list_recent(&conn, 2).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].event_id, "evt-2");
        assert_eq!(jobs[1].event_id, "evt-1");
    }

    #[test]
    fn test_recover_fails_in_flight_and_requeues_queued() {
        let conn = setup_db();

        let mut queued_old = test_job("evt-old");
        queued_old.created_at = "2026-01-01T00:00:00+00:00".to_string();
        let mut queued_new = test_job("evt-new");
        queued_new.created_at = "2026-01-02T00:00:00+00:00".to_string();
        let stuck = test_job("evt-stuck");

        JobRepository::insert(&conn, &queued_new).unwrap();
        JobRepository::insert(&conn, &queued_old).unwrap();
        JobRepository::insert(&conn, &stuck).unwrap();
        JobRepository::update_status(&conn, &stuck.job_id, JobStatus::Mixing).unwrap();

        let requeued = JobRepository::recover(&conn).unwrap();
        assert_eq!(requeued.len(), 2);
        // FIFO by creation time
        assert_eq!(requeued[0].event_id, "evt-old");
        assert_eq!(requeued[1].event_id, "evt-new");

        let failed = JobRepository::get(&conn, &stuck.job_id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error, Some("interrupted by shutdown".to_string()));
    }
}
