// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointEntry, CheckpointStore};
use crate::dag::{RunResult, ScheduledJob};
use crate::errors::Result;
use crate::exec::ExecutorBackend;

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent};

/// Drives the job scheduler in response to `RuntimeEvent`s, and delegates
/// actual job execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. This struct handles async IO: reading events from
/// channels, dispatching jobs to the executor and persisting checkpoints.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    checkpoint: Option<Box<dyn CheckpointStore>>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("checkpoint", &self.checkpoint.is_some())
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(core: CoreRuntime, event_rx: mpsc::Receiver<RuntimeEvent>, executor: E) -> Self {
        Self {
            core,
            event_rx,
            executor,
            checkpoint: None,
        }
    }

    /// Persist successful results to `store`.
    pub fn with_checkpoint(mut self, store: Box<dyn CheckpointStore>) -> Self {
        self.checkpoint = Some(store);
        self
    }

    /// Main event loop.
    ///
    /// - Starts the run and dispatches the initial ready jobs.
    /// - Consumes `RuntimeEvent`s from `event_rx` and feeds them into the
    ///   core runtime.
    /// - Executes commands returned by the core until every job is terminal.
    pub async fn run(mut self) -> Result<RunResult> {
        info!("ngsflow runtime started");

        let start = self.core.start();
        let mut keep_running = start.keep_running;
        for command in start.commands {
            self.execute_command(command).await?;
        }

        while keep_running {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    warn!("runtime event channel closed before all jobs finished");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event);
            for command in step.commands {
                self.execute_command(command).await?;
            }

            if !step.keep_running {
                info!("all jobs terminal; stopping runtime");
                keep_running = false;
            }
        }

        let result = self.core.result();
        info!(
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            skipped = result.skipped.len(),
            "runtime exiting"
        );
        Ok(result)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchJobs(jobs) => {
                self.spawn_ready(jobs).await?;
            }
            CoreCommand::RecordCheckpoint(entries) => {
                self.record_checkpoint(entries);
            }
            CoreCommand::RequestExit => {
                debug!("core issued RequestExit command");
            }
        }
        Ok(())
    }

    async fn spawn_ready(&mut self, jobs: Vec<ScheduledJob>) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }

        let labels: Vec<_> = jobs.iter().map(|j| j.label.as_str()).collect();
        debug!(?labels, "spawning ready jobs");

        self.executor.spawn_ready_jobs(jobs).await
    }

    /// A failed checkpoint write costs a re-run later, not this run.
    fn record_checkpoint(&mut self, entries: Vec<(String, CheckpointEntry)>) {
        let Some(store) = self.checkpoint.as_mut() else {
            return;
        };
        for (label, entry) in entries {
            if let Err(e) = store.save(&label, entry) {
                warn!(job = %label, error = %e, "could not record checkpoint entry");
            }
        }
    }
}
