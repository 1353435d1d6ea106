//! Per-event recording persistence.
//!
//! One row per calendar event: the raw per-stream paths and, once a job
//! completes, the transcript. The raw paths are kept here so a retry is
//! possible even after the job rows themselves are pruned.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::db::now_rfc3339;

#[derive(Debug, Clone, Serialize)]
pub struct RecordingRecord {
    pub event_id: String,
    pub system_audio_path: Option<String>,
    pub mic_audio_path: Option<String>,
    pub transcript: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct RecordingRepository;

impl RecordingRepository {
    /// Insert or refresh the raw stream paths for an event. A re-recorded
    /// event replaces its previous paths and clears any stale transcript.
    pub fn upsert_paths(
        conn: &Connection,
        event_id: &str,
        system_audio_path: Option<&str>,
        mic_audio_path: Option<&str>,
    ) -> Result<()> {
        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO recordings (event_id, system_audio_path, mic_audio_path, transcript, \
             created_at, updated_at) VALUES (?1, ?2, ?3, NULL, ?4, ?4) \
             ON CONFLICT(event_id) DO UPDATE SET \
             system_audio_path = ?2, mic_audio_path = ?3, transcript = NULL, updated_at = ?4",
            params![event_id, system_audio_path, mic_audio_path, now],
        )
        .context("Failed to upsert recording")?;
        Ok(())
    }

    pub fn set_transcript(conn: &Connection, event_id: &str, transcript: &str) -> Result<()> {
        conn.execute(
            "UPDATE recordings SET transcript = ?1, updated_at = ?2 WHERE event_id = ?3",
            params![transcript, now_rfc3339(), event_id],
        )
        .context("Failed to store transcript")?;
        Ok(())
    }

    pub fn get(conn: &Connection, event_id: &str) -> Result<Option<RecordingRecord>> {
        let mut stmt = conn
            .prepare(
                "SELECT event_id, system_audio_path, mic_audio_path, transcript, \
                 created_at, updated_at FROM recordings WHERE event_id = ?1",
            )
            .context("Failed to prepare recording query")?;

        let mut rows = stmt
            .query_map(params![event_id], |row| {
                Ok(RecordingRecord {
                    event_id: row.get(0)?,
                    system_audio_path: row.get(1)?,
                    mic_audio_path: row.get(2)?,
                    transcript: row.get(3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            })
            .context("Failed to query recording")?;

        match rows.next() {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }
}
