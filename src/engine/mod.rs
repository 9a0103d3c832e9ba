// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties the job scheduler to the outside world. The runtime
//! event loop reacts to:
//!   - job completion events from the executor
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use crate::dag::JobHandle;

pub use crate::dag::JobOutcome;

/// Events flowing into the runtime from the executor and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// One attempt of a job finished.
    JobCompleted {
        handle: JobHandle,
        attempt: u32,
        outcome: JobOutcome,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
