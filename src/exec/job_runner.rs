// src/exec/job_runner.rs

//! Runs a single job attempt and reports its outcome.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::context::RunContext;
use crate::dag::{JobContext, JobOutcome, JobOutput, ScheduledJob};
use crate::engine::RuntimeEvent;
use crate::errors::JobError;

/// Run one attempt of `job` and send exactly one `JobCompleted` event.
///
/// The body runs in its own Tokio task so a panic is contained and
/// reported as [`JobError::Panicked`]. When a timeout is set and exceeded,
/// the body task is aborted and dropped (killing any processes it started)
/// before the timeout is reported.
pub async fn run_job(job: ScheduledJob, run: Arc<RunContext>, runtime_tx: mpsc::Sender<RuntimeEvent>) {
    let handle = job.handle;
    let attempt = job.attempt;
    let label = job.label.clone();

    let started = Instant::now();
    let result = execute(job, run).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let outcome = match result {
        Ok(output) => {
            info!(job = %label, attempt, elapsed_ms, "job succeeded");
            JobOutcome::Success(output)
        }
        Err(err) => {
            warn!(job = %label, attempt, elapsed_ms, error = %err, "job attempt failed");
            JobOutcome::Failed(err)
        }
    };

    if runtime_tx
        .send(RuntimeEvent::JobCompleted {
            handle,
            attempt,
            outcome,
        })
        .await
        .is_err()
    {
        error!(job = %label, "runtime is gone; dropping job completion");
    }
}

async fn execute(job: ScheduledJob, run: Arc<RunContext>) -> Result<JobOutput, JobError> {
    let sample = match &job.sample {
        Some(name) => Some(run.sample(name).cloned().ok_or_else(|| {
            JobError::failed(format!("sample '{}' is not in the samples file", name))
        })?),
        None => None,
    };

    info!(
        job = %job.label,
        attempt = job.attempt,
        resources = %job.resources,
        "starting job"
    );

    let ctx = JobContext::new(
        job.handle,
        job.label.clone(),
        job.attempt,
        job.resources,
        run,
        sample,
        job.inputs,
    );

    let mut task = tokio::spawn(job.body.call(ctx));

    let joined = match job.timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                // Wait for the aborted body to be dropped, which kills its
                // processes, before the job's reservation is released.
                task.abort();
                let _ = task.await;
                return Err(JobError::Timeout(limit));
            }
        },
        None => task.await,
    };

    joined.map_err(join_error)?
}

fn join_error(err: JoinError) -> JobError {
    if err.is_panic() {
        JobError::Panicked(panic_message(err.into_panic()))
    } else {
        JobError::failed("job task was cancelled")
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
