//! Job inspection and retry from the command line.

use anyhow::Result;

use crate::db::{self, JobRepository};
use crate::global;
use crate::queue::JobQueue;

use super::args::{JobsCliArgs, JobsCommand};

pub async fn handle_jobs_command(args: JobsCliArgs) -> Result<()> {
    match args.command {
        JobsCommand::List { limit } => list_jobs(limit),
        JobsCommand::Retry { job_id } => retry_job(&job_id).await,
    }
}

fn list_jobs(limit: usize) -> Result<()> {
    let conn = db::init_db()?;
    let jobs = JobRepository::list_recent(&conn, limit)?;

    if jobs.is_empty() {
        println!("No jobs recorded.");
        return Ok(());
    }

    for job in jobs {
        let detail = match (&job.error, &job.transcript) {
            (Some(error), _) => format!("error: {error}"),
            (None, Some(transcript)) => format!("{} chars", transcript.len()),
            (None, None) => String::new(),
        };
        println!(
            "{}  {:<12}  event={}  {}",
            job.job_id,
            job.status.as_str(),
            job.event_id,
            detail
        );
    }

    Ok(())
}

async fn retry_job(job_id: &str) -> Result<()> {
    let queue = JobQueue::new(global::db_file()?, global::work_dir()?, true);
    let job = queue.retry(job_id).await?;
    // The new row is durable; the service re-admits it on its next startup
    // recovery pass. Use POST /jobs/:id/retry against a running service.
    println!(
        "Job {} re-queued as {}; it will run on the next service start.",
        job_id, job.job_id
    );
    Ok(())
}
