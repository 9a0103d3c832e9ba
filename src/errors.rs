// src/errors.rs

//! Crate-wide error types.
//!
//! [`NgsflowError`] covers everything that aborts a run before (or instead
//! of) scheduling: bad configuration, invalid graphs, IO. Failures of
//! individual jobs are *not* errors at this level; they are recorded on the
//! job as a [`JobError`] and reported in the run summary.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NgsflowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Cycle detected in job graph: {0}")]
    Cycle(String),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why a single job attempt failed.
///
/// This is what a job body returns on failure; the scheduler decides
/// whether the failure is retried or terminal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("command `{command}` exited with code {code}")]
    Command { command: String, code: i32 },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("job body panicked: {0}")]
    Panicked(String),

    #[error("invalid input #{index}: {reason}")]
    Input { index: usize, reason: String },

    #[error("could not build spawned jobs: {0}")]
    Spawn(String),

    #[error("{0}")]
    Failed(String),
}

impl JobError {
    pub fn failed(msg: impl Into<String>) -> Self {
        JobError::Failed(msg.into())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, NgsflowError>;
