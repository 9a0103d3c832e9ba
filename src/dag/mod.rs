// src/dag/mod.rs

//! Job graph construction and scheduling.
//!
//! - [`job`] defines handles, inputs, promises and the job body trait.
//! - [`graph`] holds the arena-backed job graph with child, follow-on and
//!   spawn edges.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   jobs are ready, which fit the budget, and what happens on failure.
//! - [`state`] provides per-job run state and dispatched job types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages readiness, failure propagation and joins.
//! - [`resources`] and [`results`] hold the budget and the promise values.

pub mod graph;
pub mod job;
pub mod report;
pub mod resources;
pub mod results;
pub mod scheduler;
pub mod scheduler_step;
pub mod state;
pub mod state_manager;

pub use graph::JobGraph;
pub use job::{
    EdgeKind, FnJob, Input, JobContext, JobFn, JobFuture, JobHandle, JobOutput, JobSpec,
    JobValue, Promise, job_fn, noop,
};
pub use report::{JobReport, RunResult, RunStatus};
pub use resources::ResourcePool;
pub use results::ResultsTable;
pub use scheduler::{JobOutcome, Scheduler, SchedulerOptions};
pub use scheduler_step::SchedulerStep;
pub use state::{FailureKind, JobStatus, ScheduledJob};
