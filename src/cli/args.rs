use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tabscribe")]
#[command(about = "Meeting capture relay and offline transcription", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run the capture and transcription service (the default)
    Serve,
    /// Mix and transcribe existing audio files without the service
    Transcribe(TranscribeCliArgs),
    /// Inspect or retry transcription jobs
    Jobs(JobsCliArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct TranscribeCliArgs {
    /// System/tab audio file
    pub system_audio: PathBuf,
    /// Microphone audio file (optional; single-stream input is accepted)
    pub mic_audio: Option<PathBuf>,
    /// Write the transcript to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct JobsCliArgs {
    #[command(subcommand)]
    pub command: JobsCommand,
}

#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// List recent jobs, newest first
    List {
        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Re-queue a terminal job as a brand-new job
    Retry {
        /// ID of the job to retry
        job_id: String,
    },
}
