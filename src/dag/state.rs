// src/dag/state.rs

//! Per-job run state and the description of a dispatched job.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::dag::job::{JobFn, JobHandle, JobSpec, JobValue};
use crate::errors::JobError;
use crate::types::Resources;

/// Lifecycle of a job within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Waiting on prerequisites.
    Pending,
    /// Prerequisites satisfied; waiting for a worker and resources.
    Ready,
    /// Dispatched to the executor.
    Running,
    /// Body finished and spawned jobs; waiting for the spawned subtree.
    Joining,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Ready => "ready",
            JobStatus::Running => "running",
            JobStatus::Joining => "joining",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a job ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The body failed (or timed out) on its last permitted attempt.
    Execution(JobError),
    /// The job asks for more than the whole budget; it can never run.
    ResourceExhaustion {
        requested: Resources,
        budget: Resources,
    },
    /// Skipped because an upstream job failed.
    DependencyFailure { upstream: String },
    /// A job spawned by this one failed.
    SpawnedSubtree { failed: String },
    /// Never started because the run was shut down.
    Cancelled,
}

impl FailureKind {
    /// Whether the job was skipped rather than attempted and failed.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            FailureKind::DependencyFailure { .. } | FailureKind::Cancelled
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Execution(err) => write!(f, "{}", err),
            FailureKind::ResourceExhaustion { requested, budget } => write!(
                f,
                "requested {} exceeds the run budget of {}",
                requested, budget
            ),
            FailureKind::DependencyFailure { upstream } => {
                write!(f, "skipped: upstream job '{}' failed", upstream)
            }
            FailureKind::SpawnedSubtree { failed } => {
                write!(f, "spawned job '{}' failed", failed)
            }
            FailureKind::Cancelled => write!(f, "cancelled before it started"),
        }
    }
}

/// Mutable per-job state held by the scheduler, parallel to the graph's
/// job arena.
#[derive(Debug, Clone)]
pub(crate) struct JobState {
    pub status: JobStatus,
    /// Number of times the body has been dispatched.
    pub attempts: u32,
    pub failure: Option<FailureKind>,
    /// Jobs this job spawned (its join set).
    pub spawned: Vec<JobHandle>,
    /// The spawning job whose join set contains this job.
    pub joined_by: Option<JobHandle>,
    /// Satisfied from a checkpoint instead of running.
    pub restored: bool,
}

impl Default for JobState {
    fn default() -> Self {
        Self {
            status: JobStatus::Pending,
            attempts: 0,
            failure: None,
            spawned: Vec::new(),
            joined_by: None,
            restored: false,
        }
    }
}

/// A job the scheduler wants the executor to run now.
#[derive(Clone)]
pub struct ScheduledJob {
    pub handle: JobHandle,
    pub label: String,
    /// 1-based attempt number; completions must echo it back.
    pub attempt: u32,
    pub resources: Resources,
    /// Inputs with promises already resolved.
    pub inputs: Vec<JobValue>,
    pub timeout: Option<Duration>,
    pub sample: Option<String>,
    pub body: Arc<dyn JobFn>,
}

impl ScheduledJob {
    pub fn from_spec(handle: JobHandle, spec: &JobSpec, attempt: u32, inputs: Vec<JobValue>) -> Self {
        Self {
            handle,
            label: spec.label.clone(),
            attempt,
            resources: spec.resources,
            inputs,
            timeout: spec.timeout,
            sample: spec.sample.clone(),
            body: Arc::clone(&spec.body),
        }
    }
}

impl fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("handle", &self.handle)
            .field("label", &self.label)
            .field("attempt", &self.attempt)
            .field("resources", &self.resources)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}
