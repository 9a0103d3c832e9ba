// src/exec/mod.rs

//! Job execution layer.
//!
//! This module runs dispatched jobs as Tokio tasks and reports back to the
//! orchestration runtime via `RuntimeEvent`s.
//!
//! - [`backend`] provides the `ExecutorBackend` trait and the concrete
//!   `RealExecutorBackend` used in production, which tests can replace with
//!   a fake implementation.
//! - [`executor_loop`] owns the loop that receives dispatched jobs.
//! - [`job_runner`] runs one attempt with timeout and panic handling.
//! - [`command`] is the job body for external tools (`sh -c`).

pub mod backend;
pub mod command;
pub mod executor_loop;
pub mod job_runner;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use command::ShellCommand;
pub use executor_loop::spawn_executor;
