//! One-shot transcription command.
//!
//! Mixes the given recordings into a temp file and transcribes it in the
//! foreground, with an indicatif progress bar fed by the engine's progress
//! markers. Useful for re-processing recordings without the service.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

use crate::app;
use crate::config::Config;
use crate::mixer::Mixer;
use crate::process::TokioProcessRunner;
use crate::transcriber::Transcriber;

use super::args::TranscribeCliArgs;

pub async fn handle_transcribe_command(args: TranscribeCliArgs) -> Result<()> {
    let config = Config::load()?;
    let runner = Arc::new(TokioProcessRunner::new(config.tools.timeout_seconds));
    let mixer = app::build_mixer(&config, runner.clone());
    let transcriber = app::build_transcriber(&config, runner)?;

    let mixed = tempfile::Builder::new()
        .prefix("tabscribe-")
        .suffix(".wav")
        .tempfile()
        .context("Failed to create temp file for mixed audio")?;

    eprintln!("Mixing audio...");
    mixer
        .mix(
            Some(&args.system_audio),
            args.mic_audio.as_deref(),
            mixed.path(),
        )
        .await?;

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message("transcribing");

    let bar_for_progress = bar.clone();
    let transcript = transcriber
        .transcribe(
            mixed.path(),
            Box::new(move |pct| bar_for_progress.set_position(pct as u64)),
        )
        .await?;

    bar.finish_and_clear();

    match &args.output {
        Some(path) => {
            std::fs::write(path, &transcript).context("Failed to write transcript file")?;
            eprintln!("Transcript written to {}", path.display());
        }
        None => println!("{transcript}"),
    }

    Ok(())
}
