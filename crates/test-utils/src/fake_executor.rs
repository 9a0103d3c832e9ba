use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use ngsflow::dag::{JobOutput, ScheduledJob};
use ngsflow::engine::{JobOutcome, RuntimeEvent};
use ngsflow::errors::{JobError, Result};
use ngsflow::exec::ExecutorBackend;

/// A fake executor that:
/// - records which jobs were "run" (label and attempt), in dispatch order
/// - never calls job bodies
/// - immediately reports `JobCompleted`: failure for labels listed in
///   `failing`, success with the label as value otherwise.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<(String, u32)>>>,
    failing: HashSet<String>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        executed: Arc<Mutex<Vec<(String, u32)>>>,
    ) -> Self {
        Self {
            runtime_tx,
            executed,
            failing: HashSet::new(),
        }
    }

    /// Report every attempt of `label` as failed.
    pub fn failing(mut self, label: &str) -> Self {
        self.failing.insert(label.to_string());
        self
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let failing = self.failing.clone();

        Box::pin(async move {
            for job in jobs {
                {
                    let mut guard = executed.lock().unwrap();
                    guard.push((job.label.clone(), job.attempt));
                }

                let outcome = if failing.contains(&job.label) {
                    JobOutcome::Failed(JobError::failed(format!("{} failed", job.label)))
                } else {
                    JobOutcome::Success(JobOutput::value(job.label.clone()))
                };

                tx.send(RuntimeEvent::JobCompleted {
                    handle: job.handle,
                    attempt: job.attempt,
                    outcome,
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }
}
