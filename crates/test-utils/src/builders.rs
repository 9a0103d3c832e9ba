#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::Value;

use ngsflow::config::{RuntimeConfig, SampleRecord, SampleSheet, parse_runtime_config};
use ngsflow::context::RunContext;
use ngsflow::dag::{JobGraph, JobOutput, JobSpec, RunResult, SchedulerOptions, job_fn};
use ngsflow::errors::JobError;
use ngsflow::types::Resources;

const GIB: u64 = 1024 * 1024 * 1024;

/// Scheduler options with the given budget; workers default to the cores.
pub fn options(cores: u32, memory_gib: u64) -> SchedulerOptions {
    SchedulerOptions::new(Resources::gib(cores, memory_gib))
}

/// A job that succeeds with its own label as value.
pub fn ok_job(label: &str) -> JobSpec {
    let value = label.to_string();
    value_job(label, Value::String(value))
}

/// A job that succeeds with `value`.
pub fn value_job(label: &str, value: Value) -> JobSpec {
    JobSpec::new(
        label,
        job_fn(format!("value:{}", label), move |_ctx| {
            let value = value.clone();
            async move { Ok(JobOutput::value(value)) }
        }),
    )
}

/// A job whose body always fails.
pub fn failing_job(label: &str) -> JobSpec {
    let name = label.to_string();
    JobSpec::new(
        label,
        job_fn(format!("fail:{}", label), move |_ctx| {
            let name = name.clone();
            async move { Err(JobError::failed(format!("{} failed on purpose", name))) }
        }),
    )
}

/// A job that fails its first `failures` attempts, then succeeds.
pub fn flaky_job(label: &str, failures: u32) -> JobSpec {
    JobSpec::new(
        label,
        job_fn(format!("flaky:{}", label), move |ctx| async move {
            if ctx.attempt <= failures {
                Err(JobError::failed(format!("attempt {} failed", ctx.attempt)))
            } else {
                Ok(JobOutput::value(ctx.attempt))
            }
        }),
    )
}

/// A job that sleeps, then succeeds with its label.
pub fn sleep_job(label: &str, millis: u64) -> JobSpec {
    let value = label.to_string();
    JobSpec::new(
        label,
        job_fn(format!("sleep:{}:{}", label, millis), move |_ctx| {
            let value = value.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(JobOutput::value(value))
            }
        }),
    )
}

/// A job whose body panics.
pub fn panicking_job(label: &str) -> JobSpec {
    JobSpec::new(
        label,
        job_fn(format!("panic:{}", label), |_ctx| async move {
            if true {
                panic!("boom");
            }
            Ok(JobOutput::empty())
        }),
    )
}

/// A job that joins its string inputs with `+` and appends its label.
pub fn concat_job(label: &str) -> JobSpec {
    let name = label.to_string();
    JobSpec::new(
        label,
        job_fn(format!("concat:{}", label), move |ctx| {
            let name = name.clone();
            async move {
                let mut parts: Vec<String> = ctx
                    .inputs()
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect();
                parts.push(name);
                Ok(JobOutput::value(parts.join("+")))
            }
        }),
    )
}

/// Tracks how many cores job bodies hold at once.
#[derive(Debug, Clone, Default)]
pub struct CoreProbe {
    current: Arc<AtomicU32>,
    peak: Arc<AtomicU32>,
}

impl CoreProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peak(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }

    /// A job reserving `cores` that holds them in the probe for `millis`.
    pub fn job(&self, label: &str, cores: u32, millis: u64) -> JobSpec {
        let probe = self.clone();
        JobSpec::new(
            label,
            job_fn(format!("probe:{}", label), move |_ctx| {
                let probe = probe.clone();
                async move {
                    let now = probe.current.fetch_add(cores, Ordering::SeqCst) + cores;
                    probe.peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    probe.current.fetch_sub(cores, Ordering::SeqCst);
                    Ok(JobOutput::empty())
                }
            }),
        )
        .cores(cores)
    }
}

/// Run `graph` with the real executor and an empty run context.
pub async fn run_graph(graph: JobGraph, options: SchedulerOptions) -> RunResult {
    ngsflow::execute_graph(graph, options, Arc::new(RunContext::default()), None)
        .await
        .expect("run should start")
}

/// Runtime configuration with a `[stage.<name>]` section for each stage,
/// whose command echoes the stage name and its inputs.
pub fn stage_config(stages: &[&str]) -> RuntimeConfig {
    parse_runtime_config(&stage_config_toml(stages)).expect("stage config should parse")
}

pub fn stage_config_toml(stages: &[&str]) -> String {
    let mut toml = String::from("[scheduler]\ncores = 4\nmemory = \"16G\"\n\n");
    for stage in stages {
        toml.push_str(&format!(
            "[stage.{stage}]\nnum_cores = 1\nmax_mem = 1\ncmd = \"echo {stage} {{output}}\"\noutput_ext = \"txt\"\n\n"
        ));
    }
    toml
}

/// Samples named `LIB-1..` with matching sample names.
pub fn sample_sheet(names: &[&str]) -> SampleSheet {
    let records = names
        .iter()
        .map(|n| SampleRecord::new(*n, format!("sample-{}", n)))
        .collect();
    SampleSheet::new(records).expect("sample names should be unique")
}

/// Run context for pipeline tests.
pub fn pipeline_context(stages: &[&str], samples: &[&str]) -> RunContext {
    RunContext::new(stage_config(stages), sample_sheet(samples), "/work")
}

pub fn gib(n: u64) -> u64 {
    n * GIB
}
