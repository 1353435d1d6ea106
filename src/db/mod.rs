use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

pub mod jobs;
pub mod recordings;

pub use jobs::JobRepository;
pub use recordings::{RecordingRecord, RecordingRepository};

/// Open (and migrate) the default application database.
pub fn init_db() -> Result<Connection> {
    open(&crate::global::db_file()?)
}

/// Open (and migrate) a database at an explicit path.
pub fn open(db_path: &Path) -> Result<Connection> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let conn = Connection::open(db_path).context("Failed to open database connection")?;

    migrate(&conn)?;

    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL,
            system_audio_path TEXT,
            mic_audio_path TEXT,
            model TEXT NOT NULL,
            status TEXT NOT NULL,
            mixed_audio_path TEXT,
            transcript TEXT,
            error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create jobs table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at)",
        [],
    )
    .context("Failed to create index on jobs.created_at")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS recordings (
            event_id TEXT PRIMARY KEY,
            system_audio_path TEXT,
            mic_audio_path TEXT,
            transcript TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create recordings table")?;

    Ok(())
}

/// Timestamp format used for all persisted rows.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
