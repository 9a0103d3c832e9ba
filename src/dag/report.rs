// src/dag/report.rs

//! End-of-run reporting.

use std::fmt;

use crate::dag::job::JobHandle;
use crate::dag::state::{FailureKind, JobStatus};
use crate::types::Resources;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every job succeeded.
    Succeeded,
    /// At least one job failed, was skipped, or never finished.
    PartialFailure,
}

/// Final state of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub handle: JobHandle,
    pub label: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub restored: bool,
    pub failure: Option<FailureKind>,
}

/// Outcome of a whole run.
///
/// Job lists are ordered by handle, so two runs of the same graph with the
/// same job outcomes compare equal regardless of dispatch interleaving
/// (ignoring `dispatches`, which depends on retries).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub status: RunStatus,
    pub succeeded: Vec<JobReport>,
    /// Jobs that were attempted (or could not be attempted) and failed.
    pub failed: Vec<JobReport>,
    /// Jobs that never ran because of an upstream failure or shutdown.
    pub skipped: Vec<JobReport>,
    /// Jobs still non-terminal when the run stopped.
    pub unfinished: Vec<JobReport>,
    /// Total number of body dispatches, retries included.
    pub dispatches: usize,
    pub peak_usage: Resources,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Labels of every job that did not succeed.
    pub fn failed_jobs(&self) -> Vec<&str> {
        self.failed
            .iter()
            .chain(self.skipped.iter())
            .chain(self.unfinished.iter())
            .map(|r| r.label.as_str())
            .collect()
    }

    pub fn report(&self, label: &str) -> Option<&JobReport> {
        self.succeeded
            .iter()
            .chain(self.failed.iter())
            .chain(self.skipped.iter())
            .chain(self.unfinished.iter())
            .find(|r| r.label == label)
    }

    /// Process exit code: 0 on full success, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Succeeded => 0,
            RunStatus::PartialFailure => 1,
        }
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let restored = self.succeeded.iter().filter(|r| r.restored).count();
        writeln!(
            f,
            "run {}: {} succeeded ({} from checkpoint), {} failed, {} skipped, {} unfinished; {} dispatches, peak {}",
            match self.status {
                RunStatus::Succeeded => "succeeded",
                RunStatus::PartialFailure => "finished with failures",
            },
            self.succeeded.len(),
            restored,
            self.failed.len(),
            self.skipped.len(),
            self.unfinished.len(),
            self.dispatches,
            self.peak_usage,
        )?;

        for r in &self.failed {
            let reason = r
                .failure
                .as_ref()
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unknown failure".to_string());
            writeln!(f, "  FAILED   {} (attempts: {}): {}", r.label, r.attempts, reason)?;
        }
        for r in &self.skipped {
            let reason = r
                .failure
                .as_ref()
                .map(|k| k.to_string())
                .unwrap_or_default();
            writeln!(f, "  SKIPPED  {}: {}", r.label, reason)?;
        }
        for r in &self.unfinished {
            writeln!(f, "  UNFINISHED {} ({})", r.label, r.status)?;
        }
        Ok(())
    }
}
