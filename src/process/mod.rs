//! External process wrapper.
//!
//! Runs a command-line tool to completion, streaming its stderr line by line
//! to an observer (the transcriber parses progress out of it) while collecting
//! stdout. The child is always reaped, including on the timeout path.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Observer invoked for every stderr line as it arrives.
pub type StderrObserver = Box<dyn FnMut(&str) + Send>;

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with status {code}: {stderr}")]
    NonZeroExit {
        program: String,
        code: i32,
        stderr: String,
    },
    #[error("{program} did not finish within {seconds}s and was killed")]
    TimedOut { program: String, seconds: u64 },
    #[error("i/o error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// A non-zero exit is reported through the `Err` variant but is an expected
/// outcome, not a panic-worthy one. Callers branch on it.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        on_stderr_line: StderrObserver,
    ) -> Result<ProcessOutput, ProcessError>;
}

/// Runner backed by `tokio::process`.
pub struct TokioProcessRunner {
    timeout: Option<Duration>,
}

impl TokioProcessRunner {
    /// `timeout_seconds` bounds every invocation; 0 disables the bound.
    pub fn new(timeout_seconds: u64) -> Self {
        let timeout = if timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(timeout_seconds))
        };
        Self { timeout }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        mut on_stderr_line: StderrObserver,
    ) -> Result<ProcessOutput, ProcessError> {
        let name = program.display().to_string();
        debug!("Running {} {}", name, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: name.clone(),
                source,
            })?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let stdout_task = async {
            let mut collected = String::new();
            if let Some(mut pipe) = stdout_pipe {
                let _ = pipe.read_to_string(&mut collected).await;
            }
            collected
        };

        let stderr_task = async {
            let mut collected = String::new();
            if let Some(pipe) = stderr_pipe {
                let mut lines = BufReader::new(pipe).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    on_stderr_line(&line);
                    collected.push_str(&line);
                    collected.push('\n');
                }
            }
            collected
        };

        let finished = {
            let run = async {
                let (stdout, stderr) = tokio::join!(stdout_task, stderr_task);
                let status = child.wait().await;
                (stdout, stderr, status)
            };

            match self.timeout {
                Some(bound) => tokio::time::timeout(bound, run).await.ok(),
                None => Some(run.await),
            }
        };

        let (stdout, stderr, status) = match finished {
            Some(parts) => parts,
            None => {
                warn!("{} timed out, killing", name);
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ProcessError::TimedOut {
                    program: name,
                    seconds: self.timeout.map(|d| d.as_secs()).unwrap_or(0),
                });
            }
        };

        let status = status.map_err(|source| ProcessError::Io {
            program: name.clone(),
            source,
        })?;

        if !status.success() {
            return Err(ProcessError::NonZeroExit {
                program: name,
                code: status.code().unwrap_or(-1),
                stderr: tail(&stderr, 2048),
            });
        }

        Ok(ProcessOutput { stdout, stderr })
    }
}

/// Last `max` bytes of a stream, for error excerpts.
pub fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.trim().to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].trim().to_string()
}
