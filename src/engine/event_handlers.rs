// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::{error, info};

use crate::checkpoint::CheckpointEntry;
use crate::dag::{JobHandle, JobOutcome, ScheduledJob, Scheduler, SchedulerStep};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these jobs to the executor.
    DispatchJobs(Vec<ScheduledJob>),
    /// Persist results of jobs that just succeeded.
    RecordCheckpoint(Vec<(String, CheckpointEntry)>),
    /// Every job is terminal; the shell should stop.
    RequestExit,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Kick off the run.
pub fn handle_start(scheduler: &mut Scheduler) -> CoreStep {
    let step = scheduler.start();
    into_core_step(scheduler, step)
}

/// Handle completion of one job attempt.
pub fn handle_job_completion(
    scheduler: &mut Scheduler,
    handle: JobHandle,
    attempt: u32,
    outcome: JobOutcome,
) -> CoreStep {
    let step = scheduler.step_completion(handle, attempt, outcome);
    into_core_step(scheduler, step)
}

/// Handle a shutdown request: cancel what has not started, keep waiting for
/// what is running.
pub fn handle_shutdown(scheduler: &mut Scheduler) -> CoreStep {
    info!(
        running = scheduler.running_count(),
        "shutdown requested; waiting for running jobs to finish"
    );
    let step = scheduler.cancel_pending();
    into_core_step(scheduler, step)
}

/// Translate a scheduler step into shell commands.
fn into_core_step(scheduler: &mut Scheduler, mut step: SchedulerStep) -> CoreStep {
    // Nothing running, nothing dispatched, yet jobs remain: no future event
    // can make progress.
    if step.newly_scheduled.is_empty()
        && scheduler.running_count() == 0
        && !scheduler.is_finished()
    {
        error!("scheduler stalled with no running jobs; cancelling the rest");
        let cancelled = scheduler.cancel_pending();
        step.newly_failed.extend(cancelled.newly_failed);
        step.run_just_finished |= cancelled.run_just_finished;
    }

    let mut commands = Vec::new();

    let entries: Vec<(String, CheckpointEntry)> = step
        .newly_succeeded
        .iter()
        .filter_map(|&h| {
            scheduler
                .checkpoint_entry(h)
                .map(|entry| (scheduler.graph().label(h).to_string(), entry))
        })
        .collect();
    if !entries.is_empty() {
        commands.push(CoreCommand::RecordCheckpoint(entries));
    }

    if !step.newly_scheduled.is_empty() {
        commands.push(CoreCommand::DispatchJobs(step.newly_scheduled));
    }

    let finished = step.run_just_finished || scheduler.is_finished();
    if finished {
        commands.push(CoreCommand::RequestExit);
    }

    CoreStep {
        commands,
        keep_running: !finished,
    }
}
