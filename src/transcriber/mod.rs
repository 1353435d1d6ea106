//! Speech-to-text adapter.
//!
//! Drives a whisper.cpp-style CLI over the mixed audio file. Progress
//! percentages are parsed from the engine's stderr (see `progress`); the
//! transcript is collected from stdout. An empty transcript with a zero exit
//! is a valid outcome: silence transcribes to nothing.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::process::{tail, ProcessError, ProcessRunner};

pub mod progress;

use progress::ProgressParser;

/// Callback for progress percentages, 0–100, strictly increasing.
pub type ProgressFn = Box<dyn FnMut(u8) + Send>;

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("audio file missing: {path}")]
    MissingAudio { path: PathBuf },
    #[error("model file missing: {path}")]
    MissingModel { path: PathBuf },
    #[error("transcription failed: {stderr_excerpt}")]
    Tool { stderr_excerpt: String },
    #[error("could not run transcriber: {0}")]
    Launch(#[source] ProcessError),
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: &Path,
        on_progress: ProgressFn,
    ) -> Result<String, TranscribeError>;
}

pub struct WhisperTranscriber {
    runner: Arc<dyn ProcessRunner>,
    command: PathBuf,
    model_path: PathBuf,
    language: String,
    timestamp_regex: Regex,
    progress_regex: Regex,
}

impl WhisperTranscriber {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        command: PathBuf,
        model_path: PathBuf,
        language: String,
    ) -> Result<Self> {
        // Matches timestamps like [00:00:00.000 --> 00:00:03.280] or [00:00:00:000 --> 00:00:03:280]
        let timestamp_regex =
            Regex::new(r"\[\d{2}:\d{2}:\d{2}[:.]\d{3}\s*-->\s*\d{2}:\d{2}:\d{2}[:.]\d{3}\]\s*")?;
        let progress_regex = Regex::new(r"(\d{1,3})%")?;

        Ok(Self {
            runner,
            command,
            model_path,
            language,
            timestamp_regex,
            progress_regex,
        })
    }

    fn build_args(&self, audio: &Path) -> Vec<String> {
        vec![
            "-m".to_string(),
            self.model_path.to_string_lossy().into_owned(),
            "-f".to_string(),
            audio.to_string_lossy().into_owned(),
            "-l".to_string(),
            self.language.clone(),
            // progress markers on stderr, one NN% token per step
            "--print-progress".to_string(),
        ]
    }

    /// Strip the engine's per-line timestamp brackets and join the remaining
    /// text with single spaces.
    fn normalize(&self, raw_output: &str) -> String {
        let mut cleaned = String::new();
        for line in raw_output.lines() {
            let line_cleaned = self.timestamp_regex.replace_all(line, "");
            let line_trimmed = line_cleaned.trim();
            if !line_trimmed.is_empty() {
                if !cleaned.is_empty() {
                    cleaned.push(' ');
                }
                cleaned.push_str(line_trimmed);
            }
        }

        cleaned.trim().to_string()
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        mut on_progress: ProgressFn,
    ) -> Result<String, TranscribeError> {
        if !audio.exists() {
            return Err(TranscribeError::MissingAudio {
                path: audio.to_path_buf(),
            });
        }
        if !self.model_path.exists() {
            return Err(TranscribeError::MissingModel {
                path: self.model_path.clone(),
            });
        }

        let args = self.build_args(audio);
        debug!("Transcribing {:?} with model {:?}", audio, self.model_path);

        let mut parser = ProgressParser::from_regex(self.progress_regex.clone());
        let observer = Box::new(move |line: &str| {
            if let Some(pct) = parser.observe(line) {
                on_progress(pct);
            }
        });

        let output = match self.runner.run(&self.command, &args, observer).await {
            Ok(output) => output,
            Err(ProcessError::NonZeroExit { stderr, .. }) => {
                return Err(TranscribeError::Tool {
                    stderr_excerpt: tail(&stderr, 512),
                });
            }
            Err(err) => return Err(TranscribeError::Launch(err)),
        };

        let transcript = self.normalize(&output.stdout);
        info!("Transcription complete: {} chars", transcript.len());
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessOutput;
    use std::io::Write;
    use std::sync::Mutex;

    struct ScriptedRunner {
        stdout: String,
        stderr_lines: Vec<String>,
        fail: bool,
        args_seen: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(stdout: &str, stderr_lines: &[&str]) -> Self {
            Self {
                stdout: stdout.to_string(),
                stderr_lines: stderr_lines.iter().map(|s| s.to_string()).collect(),
                fail: false,
                args_seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                stdout: String::new(),
                stderr_lines: vec!["error: failed to initialize whisper context".to_string()],
                fail: true,
                args_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn run(
            &self,
            _program: &Path,
            args: &[String],
            mut on_stderr_line: crate::process::StderrObserver,
        ) -> Result<ProcessOutput, ProcessError> {
            *self.args_seen.lock().unwrap() = args.to_vec();
            for line in &self.stderr_lines {
                on_stderr_line(line);
            }
            if self.fail {
                return Err(ProcessError::NonZeroExit {
                    program: "whisper-cli".to_string(),
                    code: 1,
                    stderr: self.stderr_lines.join("\n"),
                });
            }
            Ok(ProcessOutput {
                stdout: self.stdout.clone(),
                stderr: self.stderr_lines.join("\n"),
            })
        }
    }

    fn fixtures(dir: &tempfile::TempDir) -> (PathBuf, PathBuf) {
        let audio = dir.path().join("mixed.wav");
        let model = dir.path().join("ggml-base.en.bin");
        std::fs::File::create(&audio)
            .unwrap()
            .write_all(b"RIFF")
            .unwrap();
        std::fs::File::create(&model)
            .unwrap()
            .write_all(b"ggml")
            .unwrap();
        (audio, model)
    }

    fn transcriber(runner: Arc<dyn ProcessRunner>, model: PathBuf) -> WhisperTranscriber {
        WhisperTranscriber::new(runner, PathBuf::from("whisper-cli"), model, "en".to_string())
            .unwrap()
    }

    #[tokio::test]
    async fn test_transcript_normalized_from_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let (audio, model) = fixtures(&dir);
        let runner = Arc::new(ScriptedRunner::new(
            "[00:00:00.000 --> 00:00:03.280]  Hello everyone\n[00:00:03.280 --> 00:00:05.000]  welcome back\n",
            &[],
        ));

        let text = transcriber(runner, model)
            .transcribe(&audio, Box::new(|_| {}))
            .await
            .unwrap();
        assert_eq!(text, "Hello everyone welcome back");
    }

    #[tokio::test]
    async fn test_progress_reported_monotonically() {
        let dir = tempfile::tempdir().unwrap();
        let (audio, model) = fixtures(&dir);
        let runner = Arc::new(ScriptedRunner::new(
            "",
            &[
                "whisper_print_progress_callback: progress =  10%",
                "whisper_print_progress_callback: progress =  10%",
                "whisper_print_progress_callback: progress =   5%",
                "whisper_print_progress_callback: progress =  40%",
            ],
        ));

        let (tx, rx) = std::sync::mpsc::channel();
        transcriber(runner, model)
            .transcribe(
                &audio,
                Box::new(move |pct| {
                    let _ = tx.send(pct);
                }),
            )
            .await
            .unwrap();

        let reported: Vec<u8> = rx.try_iter().collect();
        assert_eq!(reported, vec![10, 40]);
    }

    #[tokio::test]
    async fn test_empty_transcript_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let (audio, model) = fixtures(&dir);
        let runner = Arc::new(ScriptedRunner::new("", &[]));

        let text = transcriber(runner, model)
            .transcribe(&audio, Box::new(|_| {}))
            .await
            .unwrap();
        assert_eq!(text, "");
    }

    #[tokio::test]
    async fn test_tool_failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let (audio, model) = fixtures(&dir);
        let runner = Arc::new(ScriptedRunner::failing());

        let err = transcriber(runner, model)
            .transcribe(&audio, Box::new(|_| {}))
            .await
            .unwrap_err();
        match err {
            TranscribeError::Tool { stderr_excerpt } => {
                assert!(stderr_excerpt.contains("whisper context"));
            }
            other => panic!("expected Tool, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_audio_rejected_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let (_, model) = fixtures(&dir);
        let runner = Arc::new(ScriptedRunner::new("", &[]));

        let err = transcriber(runner.clone(), model)
            .transcribe(&dir.path().join("absent.wav"), Box::new(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscribeError::MissingAudio { .. }));
        assert!(runner.args_seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_model_rejected_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let (audio, _) = fixtures(&dir);
        let runner = Arc::new(ScriptedRunner::new("", &[]));

        let err = transcriber(runner, dir.path().join("absent.bin"))
            .transcribe(&audio, Box::new(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscribeError::MissingModel { .. }));
    }

    #[test]
    fn test_normalize_with_colon_millis() {
        let dir = tempfile::tempdir().unwrap();
        let (_, model) = fixtures(&dir);
        let t = transcriber(Arc::new(ScriptedRunner::new("", &[])), model);
        assert_eq!(
            t.normalize("[00:00:00:000 --> 00:00:03:280] This is me talking"),
            "This is me talking"
        );
    }

    #[test]
    fn test_normalize_plain_text_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (_, model) = fixtures(&dir);
        let t = transcriber(Arc::new(ScriptedRunner::new("", &[])), model);
        assert_eq!(t.normalize("  plain line\n\nsecond  "), "plain line second");
    }
}
