// src/config/mod.rs

//! Configuration loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed runtime configuration (`model.rs`).
//! - Load files from disk (`loader.rs`).
//! - Validate raw values into typed settings (`validate.rs`).
//! - Parse the samples file (`samples.rs`).

pub mod loader;
pub mod model;
pub mod samples;
pub mod validate;

pub use loader::{
    default_config_path, load_from_path, load_runtime_config, load_samples,
    parse_runtime_config,
};
pub use model::{
    MemorySpec, PipelineSection, RawRuntimeConfig, RawStageConfig, RuntimeConfig,
    SchedulerSection, SchedulerSettings, StageConfig,
};
pub use samples::{SampleRecord, SampleSheet, parse_samples};
