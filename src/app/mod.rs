//! Service wiring and the host control loop.
//!
//! One event-driven loop owns the session controller; the transcription
//! worker runs as its own task so a multi-minute mix+transcribe never blocks
//! session transitions or relay traffic.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::{ApiCommand, ApiServer, ApiState};
use crate::config::Config;
use crate::db::{self, JobRepository};
use crate::global;
use crate::mixer::FfmpegMixer;
use crate::process::{ProcessRunner, TokioProcessRunner};
use crate::queue::{worker, JobEvent, JobQueue};
use crate::relay::RelayServer;
use crate::session::{AlwaysGranted, SessionController, SessionStatusHandle, SystemOpener};
use crate::transcriber::WhisperTranscriber;

pub async fn run_service() -> Result<()> {
    info!("Starting tabscribe service");

    let config = Config::load()?;

    let recordings_dir = global::recordings_dir()?;
    let work_dir = global::work_dir()?;
    std::fs::create_dir_all(&recordings_dir).context("Failed to create recordings directory")?;
    std::fs::create_dir_all(&work_dir).context("Failed to create work directory")?;

    let db_path = global::db_file()?;

    // Unclean-shutdown pass: fail jobs that died mid-stage, reload the rest.
    let requeued = {
        let conn = db::open(&db_path)?;
        JobRepository::recover(&conn)?
    };

    let queue = JobQueue::new(
        db_path.clone(),
        work_dir,
        config.behavior.keep_raw_on_failure,
    );
    queue.restore(requeued).await;

    let runner: Arc<dyn ProcessRunner> =
        Arc::new(TokioProcessRunner::new(config.tools.timeout_seconds));
    let mixer = Arc::new(build_mixer(&config, runner.clone()));
    let transcriber = Arc::new(build_transcriber(&config, runner)?);

    worker::spawn(queue.clone(), mixer, transcriber);
    spawn_job_event_logger(&queue);

    let (relay_tx, mut relay_rx) = mpsc::channel(256);
    let relay = RelayServer::new(relay_tx, config.relay.base_port, config.relay.scan_window);

    let status = SessionStatusHandle::default();
    let mut controller = SessionController::new(
        relay,
        Box::new(AlwaysGranted),
        Box::new(SystemOpener),
        queue.clone(),
        status.clone(),
        recordings_dir,
        db_path.clone(),
        config.tools.model.clone(),
    );

    let (api_tx, mut api_rx) = mpsc::channel::<ApiCommand>(16);
    let api_server = ApiServer::new(
        config.api.port,
        ApiState {
            tx: api_tx,
            session_status: status,
            queue,
            db_path,
        },
    );
    tokio::spawn(async move {
        if let Err(e) = api_server.start().await {
            error!("API server failed: {}", e);
        }
    });

    info!("tabscribe is ready");

    loop {
        tokio::select! {
            command = api_rx.recv() => match command {
                Some(ApiCommand::StartSession { event_id, reply }) => {
                    let result = controller.start(&event_id).await;
                    let _ = reply.send(result);
                }
                Some(ApiCommand::StopSession { reply }) => {
                    let result = controller.stop().await;
                    let _ = reply.send(result);
                }
                None => break,
            },
            event = relay_rx.recv() => match event {
                Some(event) => controller.handle_relay_event(event).await,
                None => break,
            },
        }
    }

    Ok(())
}

/// Resolve a tool path: explicit config first, then PATH discovery. Falls
/// back to the bare name so a missing tool surfaces as a clear spawn error
/// at job time instead of blocking startup.
pub fn resolve_tool(configured: Option<&str>, candidates: &[&str]) -> PathBuf {
    if let Some(path) = configured {
        return PathBuf::from(path);
    }
    for name in candidates {
        if let Ok(found) = which::which(name) {
            debug!("Found {} at {:?}", name, found);
            return found;
        }
    }
    warn!(
        "{} not found on PATH; configure [tools] in the config file",
        candidates[0]
    );
    PathBuf::from(candidates[0])
}

pub fn build_mixer(config: &Config, runner: Arc<dyn ProcessRunner>) -> FfmpegMixer {
    let ffmpeg = resolve_tool(config.tools.ffmpeg_path.as_deref(), &["ffmpeg"]);
    FfmpegMixer::new(runner, ffmpeg)
}

pub fn build_transcriber(
    config: &Config,
    runner: Arc<dyn ProcessRunner>,
) -> Result<WhisperTranscriber> {
    let command = resolve_tool(
        config.tools.whisper_path.as_deref(),
        &["whisper-cli", "whisper-cpp"],
    );
    let model_path = match &config.tools.model_path {
        Some(path) => PathBuf::from(path),
        None => global::data_dir()?
            .join("models")
            .join(format!("ggml-{}.bin", config.tools.model)),
    };
    WhisperTranscriber::new(runner, command, model_path, config.tools.language.clone())
}

fn spawn_job_event_logger(queue: &JobQueue) {
    let mut events = queue.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(JobEvent::Status {
                    job_id,
                    status,
                    error,
                    ..
                }) => match error {
                    Some(error) => warn!("Job {} -> {}: {}", job_id, status.as_str(), error),
                    None => info!("Job {} -> {}", job_id, status.as_str()),
                },
                Ok(JobEvent::Progress { job_id, pct, .. }) => {
                    debug!("Job {} progress: {}%", job_id, pct);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Job event logger lagged, skipped {} events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
