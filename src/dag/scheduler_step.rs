// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::job::JobHandle;
use crate::dag::state::ScheduledJob;

/// Structured result of a single scheduler "step".
///
/// Tests drive the scheduler by hand and assert on what changed; the core
/// runtime turns it into commands.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Jobs dispatched as a result of this step.
    pub newly_scheduled: Vec<ScheduledJob>,
    /// Jobs that reached `Succeeded` in this step.
    pub newly_succeeded: Vec<JobHandle>,
    /// Jobs newly marked `Failed`, including skipped dependents.
    pub newly_failed: Vec<JobHandle>,
    /// Jobs whose failed attempt will be retried.
    pub retried: Vec<JobHandle>,
    /// Jobs spliced into the graph by a spawning job.
    pub spawned: Vec<JobHandle>,
    /// Whether this step made every job terminal.
    pub run_just_finished: bool,
}
