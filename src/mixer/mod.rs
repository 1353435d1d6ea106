//! Audio mixer adapter.
//!
//! Merges the two per-stream recordings (system/tab audio and microphone)
//! into the single format the speech-to-text engine expects: mono, 16 kHz,
//! 16-bit PCM WAV. Backed by the external ffmpeg binary via the process
//! wrapper. No retry here; retry policy belongs to the queue worker.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::process::{tail, ProcessError, ProcessRunner};

#[derive(Debug, Error)]
pub enum MixError {
    #[error("input audio file missing or empty: {path}")]
    MissingInput { path: PathBuf },
    #[error("no input audio streams to mix")]
    NoInputs,
    #[error("ffmpeg failed: {stderr_excerpt}")]
    Tool { stderr_excerpt: String },
    #[error("ffmpeg reported success but produced no output at {path}")]
    OutputMissing { path: PathBuf },
    #[error("could not run ffmpeg: {0}")]
    Launch(#[source] ProcessError),
}

#[async_trait]
pub trait Mixer: Send + Sync {
    /// Mix the available input streams into `output`. Either input may be
    /// absent (a session that captured only one stream); at least one is
    /// required. Returns the output path on success.
    async fn mix(
        &self,
        system_audio: Option<&Path>,
        mic_audio: Option<&Path>,
        output: &Path,
    ) -> Result<PathBuf, MixError>;
}

pub struct FfmpegMixer {
    runner: Arc<dyn ProcessRunner>,
    ffmpeg: PathBuf,
}

impl FfmpegMixer {
    pub fn new(runner: Arc<dyn ProcessRunner>, ffmpeg: PathBuf) -> Self {
        Self { runner, ffmpeg }
    }

    /// Build the ffmpeg argument list for the given inputs.
    ///
    /// Two inputs go through an amix graph; a single input is just converted.
    /// Either way the output is mono 16 kHz 16-bit PCM, the transcriber's
    /// target format.
    fn build_args(inputs: &[&Path], output: &Path) -> Vec<String> {
        let mut args = Vec::new();

        for input in inputs {
            // -i: input file
            args.push("-i".to_string());
            args.push(input.to_string_lossy().into_owned());
        }

        if inputs.len() > 1 {
            // amix: merge both streams, padding the shorter one
            args.push("-filter_complex".to_string());
            args.push(format!("amix=inputs={}:duration=longest", inputs.len()));
        }

        // -ac 1: downmix to a single channel
        args.push("-ac".to_string());
        args.push("1".to_string());
        // -ar 16000: resample to 16 kHz
        args.push("-ar".to_string());
        args.push("16000".to_string());
        // pcm_s16le: uncompressed 16-bit PCM
        args.push("-c:a".to_string());
        args.push("pcm_s16le".to_string());
        // -y: overwrite output without asking
        args.push("-y".to_string());
        args.push(output.to_string_lossy().into_owned());

        args
    }

    fn check_input(path: &Path) -> Result<(), MixError> {
        let nonempty = std::fs::metadata(path)
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);
        if !nonempty {
            return Err(MixError::MissingInput {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Mixer for FfmpegMixer {
    async fn mix(
        &self,
        system_audio: Option<&Path>,
        mic_audio: Option<&Path>,
        output: &Path,
    ) -> Result<PathBuf, MixError> {
        let inputs: Vec<&Path> = [system_audio, mic_audio].into_iter().flatten().collect();
        if inputs.is_empty() {
            return Err(MixError::NoInputs);
        }
        for input in &inputs {
            Self::check_input(input)?;
        }

        let args = Self::build_args(&inputs, output);
        debug!("Mixing {} stream(s) into {:?}", inputs.len(), output);

        match self.runner.run(&self.ffmpeg, &args, Box::new(|_| {})).await {
            Ok(_) => {}
            Err(ProcessError::NonZeroExit { stderr, .. }) => {
                return Err(MixError::Tool {
                    stderr_excerpt: tail(&stderr, 512),
                });
            }
            Err(err) => return Err(MixError::Launch(err)),
        }

        // A zero exit with no file on disk is a tool-level inconsistency,
        // not something to pass along silently.
        if !output.exists() {
            return Err(MixError::OutputMissing {
                path: output.to_path_buf(),
            });
        }

        info!("Mixed audio written to {:?}", output);
        Ok(output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessOutput;
    use std::io::Write;
    use std::sync::Mutex;

    /// Runner that records invocations and optionally creates the output file
    /// named by the final argument, standing in for a real ffmpeg run.
    struct RecordingRunner {
        calls: Mutex<Vec<Vec<String>>>,
        create_output: bool,
        fail_with: Option<i32>,
    }

    impl RecordingRunner {
        fn ok() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                create_output: true,
                fail_with: None,
            }
        }

        fn failing(code: i32) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                create_output: false,
                fail_with: Some(code),
            }
        }

        fn silent_success() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                create_output: false,
                fail_with: None,
            }
        }
    }

    #[async_trait]
    impl ProcessRunner for RecordingRunner {
        async fn run(
            &self,
            _program: &Path,
            args: &[String],
            _on_stderr_line: crate::process::StderrObserver,
        ) -> Result<ProcessOutput, ProcessError> {
            self.calls.lock().unwrap().push(args.to_vec());
            if let Some(code) = self.fail_with {
                return Err(ProcessError::NonZeroExit {
                    program: "ffmpeg".to_string(),
                    code,
                    stderr: "Invalid data found when processing input".to_string(),
                });
            }
            if self.create_output {
                if let Some(out) = args.last() {
                    std::fs::write(out, b"RIFF").unwrap();
                }
            }
            Ok(ProcessOutput {
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    fn temp_input(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"fake audio bytes").unwrap();
        path
    }

    #[test]
    fn test_two_input_args_use_amix() {
        let args = FfmpegMixer::build_args(
            &[Path::new("/tmp/sys.webm"), Path::new("/tmp/mic.webm")],
            Path::new("/tmp/out.wav"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-i /tmp/sys.webm -i /tmp/mic.webm"));
        assert!(joined.contains("amix=inputs=2:duration=longest"));
        assert!(joined.contains("-ac 1"));
        assert!(joined.contains("-ar 16000"));
        assert!(joined.contains("-c:a pcm_s16le"));
        assert!(joined.ends_with("-y /tmp/out.wav"));
    }

    #[test]
    fn test_single_input_args_skip_filter() {
        let args =
            FfmpegMixer::build_args(&[Path::new("/tmp/mic.webm")], Path::new("/tmp/out.wav"));
        let joined = args.join(" ");
        assert!(!joined.contains("amix"));
        assert!(joined.contains("-ac 1"));
        assert!(joined.contains("-ar 16000"));
    }

    #[tokio::test]
    async fn test_mix_two_streams() {
        let dir = tempfile::tempdir().unwrap();
        let sys = temp_input(&dir, "sys.webm");
        let mic = temp_input(&dir, "mic.webm");
        let out = dir.path().join("out.wav");

        let mixer = FfmpegMixer::new(Arc::new(RecordingRunner::ok()), PathBuf::from("ffmpeg"));
        let result = mixer.mix(Some(&sys), Some(&mic), &out).await.unwrap();
        assert_eq!(result, out);
        assert!(out.exists());
    }

    #[tokio::test]
    async fn test_missing_input_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let sys = temp_input(&dir, "sys.webm");
        let missing = dir.path().join("mic.webm");
        let out = dir.path().join("out.wav");

        let runner = Arc::new(RecordingRunner::ok());
        let mixer = FfmpegMixer::new(runner.clone(), PathBuf::from("ffmpeg"));
        let err = mixer.mix(Some(&sys), Some(&missing), &out).await.unwrap_err();

        match err {
            MixError::MissingInput { path } => assert_eq!(path, missing),
            other => panic!("expected MissingInput, got {other:?}"),
        }
        // Validation failed before any process ran
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_inputs_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mixer = FfmpegMixer::new(Arc::new(RecordingRunner::ok()), PathBuf::from("ffmpeg"));
        let err = mixer
            .mix(None, None, &dir.path().join("out.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, MixError::NoInputs));
    }

    #[tokio::test]
    async fn test_tool_failure_carries_stderr_excerpt() {
        let dir = tempfile::tempdir().unwrap();
        let sys = temp_input(&dir, "sys.webm");
        let out = dir.path().join("out.wav");

        let mixer =
            FfmpegMixer::new(Arc::new(RecordingRunner::failing(1)), PathBuf::from("ffmpeg"));
        let err = mixer.mix(Some(&sys), None, &out).await.unwrap_err();
        match err {
            MixError::Tool { stderr_excerpt } => {
                assert!(stderr_excerpt.contains("Invalid data"));
            }
            other => panic!("expected Tool, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_zero_exit_without_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sys = temp_input(&dir, "sys.webm");
        let out = dir.path().join("out.wav");

        let mixer = FfmpegMixer::new(
            Arc::new(RecordingRunner::silent_success()),
            PathBuf::from("ffmpeg"),
        );
        let err = mixer.mix(Some(&sys), None, &out).await.unwrap_err();
        assert!(matches!(err, MixError::OutputMissing { .. }));
    }
}
