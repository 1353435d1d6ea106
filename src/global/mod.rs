use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

const APP_DIR: &str = "tabscribe";

pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .context("Unable to determine config directory")
}

pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = dirs::data_dir() {
        return Ok(dir.join(APP_DIR));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".local").join("share").join(APP_DIR));
    }
    Err(anyhow!("Unable to determine data directory"))
}

/// Directory where finalized per-stream recordings land.
pub fn recordings_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("recordings"))
}

/// Scratch directory for mixed-audio intermediates; files here are deleted
/// once their job reaches a terminal state.
pub fn work_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("work"))
}

pub fn db_file() -> Result<PathBuf> {
    Ok(data_dir()?.join("tabscribe.db"))
}
