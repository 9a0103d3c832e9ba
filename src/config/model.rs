// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::dag::SchedulerOptions;
use crate::types::{Resources, RetryPolicy};

/// Runtime configuration exactly as read from TOML.
///
/// ```toml
/// [scheduler]
/// max_workers = 8
/// cores = 16
/// memory = "64G"
/// max_attempts = 2
/// retry_policy = "per-group"
///
/// [vars]
/// reference = "/data/ref/GRCh37.fa"
///
/// [pipeline]
/// callers = ["freebayes", "mutect"]
///
/// [stage.star]
/// num_cores = 8
/// max_mem = 32
/// cmd = "STAR --runThreadN {cores} --genomeDir {index} --readFilesIn {fastq1} {fastq2}"
/// output_ext = "bam"
///
/// [stage.star.params]
/// index = "/data/star-index"
/// ```
///
/// All sections are optional. Use [`RuntimeConfig`] (via `TryFrom`) for
/// validated values.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawRuntimeConfig {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    /// Global template variables (reference genomes, annotation databases).
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Per-stage settings from `[stage.<name>]`.
    #[serde(default)]
    pub stage: BTreeMap<String, RawStageConfig>,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSection {
    /// Upper bound on concurrently running jobs. Defaults to the core budget.
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Core budget. Defaults to the machine's available parallelism.
    #[serde(default)]
    pub cores: Option<u32>,

    /// Memory budget. Unlimited when absent.
    #[serde(default)]
    pub memory: Option<MemorySpec>,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Default wall-clock limit for every job, e.g. `"6h"`.
    #[serde(default)]
    pub job_timeout: Option<String>,

    /// Checkpoint file. Relative paths are resolved against the workdir.
    #[serde(default)]
    pub checkpoint: Option<PathBuf>,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_workers: None,
            cores: None,
            memory: None,
            max_attempts: default_max_attempts(),
            retry_policy: RetryPolicy::default(),
            job_timeout: None,
            checkpoint: None,
        }
    }
}

/// Memory given either as whole GiB (`max_mem = 32`) or as a size string
/// (`max_mem = "512M"`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MemorySpec {
    Gib(u64),
    Size(String),
}

/// `[pipeline]` section: knobs of the pipeline definitions themselves.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    /// Variant callers run per sample by the variant-calling pipeline.
    #[serde(default = "default_callers")]
    pub callers: Vec<String>,
}

fn default_callers() -> Vec<String> {
    ["freebayes", "mutect", "vardict", "scalpel", "platypus", "pindel"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            callers: default_callers(),
        }
    }
}

/// `[stage.<name>]` section as written.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStageConfig {
    #[serde(default = "default_num_cores")]
    pub num_cores: u32,

    #[serde(default)]
    pub max_mem: Option<MemorySpec>,

    /// Command template; see [`crate::template`].
    #[serde(default)]
    pub cmd: Option<String>,

    /// Extension of the stage's well-known output file.
    #[serde(default)]
    pub output_ext: Option<String>,

    #[serde(default)]
    pub timeout: Option<String>,

    /// Retry group for `retry_policy = "per-group"`. May use sample
    /// placeholders such as `{library}`.
    #[serde(default)]
    pub retry_group: Option<String>,

    /// Stage-specific template variables.
    #[serde(default)]
    pub params: BTreeMap<String, toml::Value>,
}

fn default_num_cores() -> u32 {
    1
}

/// Validated runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerSettings,
    pub vars: BTreeMap<String, String>,
    pub pipeline: PipelineSection,
    pub stages: BTreeMap<String, StageConfig>,
}

/// Validated `[scheduler]` settings with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub max_workers: usize,
    pub budget: Resources,
    pub max_attempts: u32,
    pub retry_policy: RetryPolicy,
    pub job_timeout: Option<Duration>,
    pub checkpoint: Option<PathBuf>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let cores = default_cores();
        Self {
            max_workers: cores as usize,
            budget: Resources::new(cores, u64::MAX),
            max_attempts: default_max_attempts(),
            retry_policy: RetryPolicy::default(),
            job_timeout: None,
            checkpoint: None,
        }
    }
}

impl SchedulerSettings {
    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions::new(self.budget)
            .max_workers(self.max_workers)
            .max_attempts(self.max_attempts)
            .retry_policy(self.retry_policy)
    }
}

pub(crate) fn default_cores() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

/// Validated `[stage.<name>]` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfig {
    pub name: String,
    pub resources: Resources,
    pub cmd: Option<String>,
    pub output_ext: String,
    pub timeout: Option<Duration>,
    pub retry_group: Option<String>,
    /// Params rendered to strings, ready for templating.
    pub params: BTreeMap<String, String>,
}

impl StageConfig {
    /// A stage with one core, no memory reservation and no command.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Resources::new(1, 0),
            cmd: None,
            output_ext: "out".to_string(),
            timeout: None,
            retry_group: None,
            params: BTreeMap::new(),
        }
    }
}
