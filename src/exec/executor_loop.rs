// src/exec/executor_loop.rs

//! Main executor loop that owns the running job tasks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::dag::{JobHandle, ScheduledJob};
use crate::engine::RuntimeEvent;
use crate::exec::job_runner::run_job;

/// Spawn the background executor loop.
///
/// The returned sender is what `RealExecutorBackend` forwards scheduled
/// jobs to. Each job attempt runs in its own Tokio task, and **a given
/// attempt of a job runs at most once**: a repeated dispatch of an attempt
/// that is still running is refused with a warning.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    run: Arc<RunContext>,
) -> mpsc::Sender<ScheduledJob> {
    let (tx, mut rx) = mpsc::channel::<ScheduledJob>(64);

    tokio::spawn(async move {
        info!("executor loop started");

        let mut active: HashMap<JobHandle, (u32, JoinHandle<()>)> = HashMap::new();

        while let Some(job) = rx.recv().await {
            active.retain(|_, (_, handle)| !handle.is_finished());
            handle_scheduled_job(job, &mut active, &runtime_tx, &run);
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

fn handle_scheduled_job(
    job: ScheduledJob,
    active: &mut HashMap<JobHandle, (u32, JoinHandle<()>)>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    run: &Arc<RunContext>,
) {
    // The previous attempt's task may still be unwinding after it reported
    // its completion, so only the same attempt counts as a duplicate.
    if let Some((attempt, existing)) = active.get(&job.handle) {
        if *attempt == job.attempt && !existing.is_finished() {
            warn!(
                job = %job.label,
                attempt = job.attempt,
                "attempt already running; refusing duplicate dispatch"
            );
            return;
        }
    }

    let handle = job.handle;
    let attempt = job.attempt;
    let label = job.label.clone();
    let rt_tx = runtime_tx.clone();
    let run = Arc::clone(run);

    let task = tokio::spawn(async move {
        run_job(job, run, rt_tx).await;
        debug!(job = %label, "job runner future finished");
    });

    active.insert(handle, (attempt, task));
}
