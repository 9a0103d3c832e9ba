// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender.
//! This makes it easy to swap in a fake executor in tests while keeping the
//! production executor implementation in [`executor_loop`](super::executor_loop).
//!
//! - `RealExecutorBackend` is the default implementation. It wraps the
//!   `spawn_executor` loop and forwards scheduled jobs over an mpsc channel.
//! - Tests can provide their own `ExecutorBackend` that, for example,
//!   records which jobs were scheduled and directly emits `JobCompleted`
//!   events.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::context::RunContext;
use crate::dag::ScheduledJob;
use crate::engine::RuntimeEvent;
use crate::errors::{Error, Result};

use super::executor_loop::spawn_executor;

/// Trait abstracting how scheduled jobs are executed.
pub trait ExecutorBackend: Send {
    /// Dispatch the given jobs for execution. Each dispatched job must
    /// eventually produce exactly one `JobCompleted` event.
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real executor backend used in production.
///
/// The runtime calls `spawn_ready_jobs`, which forwards the jobs to the
/// background executor loop; each job body then runs in its own Tokio task.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ScheduledJob>,
}

impl RealExecutorBackend {
    /// Create a new real executor backend, wiring it to the given runtime
    /// event sender. Must be called inside a Tokio runtime: the background
    /// executor loop is spawned immediately.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, run: Arc<RunContext>) -> Self {
        let tx = spawn_executor(runtime_tx, run);
        Self { tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for job in jobs {
                tx.send(job).await.map_err(Error::from)?;
            }
            Ok(())
        })
    }
}
