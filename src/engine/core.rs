// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::Runtime`) is responsible for reading
//! events from channels, sending `ScheduledJob`s to the executor, writing
//! checkpoints and handling Ctrl+C.
//!
//! The core can be driven in tests without Tokio, channels, or processes.

use crate::dag::{RunResult, Scheduler};
use crate::engine::RuntimeEvent;
use crate::engine::event_handlers::{
    CoreStep, handle_job_completion, handle_shutdown, handle_start,
};

/// Pure core runtime state. Owns the scheduler; performs no IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    started: bool,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            started: false,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Start the run. Calling it twice returns an empty, still-running step.
    pub fn start(&mut self) -> CoreStep {
        if self.started {
            return CoreStep {
                commands: Vec::new(),
                keep_running: !self.scheduler.is_finished(),
            };
        }
        self.started = true;
        handle_start(&mut self.scheduler)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::JobCompleted {
                handle,
                attempt,
                outcome,
            } => handle_job_completion(&mut self.scheduler, handle, attempt, outcome),
            RuntimeEvent::ShutdownRequested => handle_shutdown(&mut self.scheduler),
        }
    }

    pub fn result(&self) -> RunResult {
        self.scheduler.run_result()
    }
}
