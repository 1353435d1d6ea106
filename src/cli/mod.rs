mod args;
mod jobs;
mod transcribe;

pub use args::{Cli, CliCommand, JobsCliArgs, JobsCommand, TranscribeCliArgs};
pub use jobs::handle_jobs_command;
pub use transcribe::handle_transcribe_command;
