// src/config/validate.rs

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::model::{
    MemorySpec, RawRuntimeConfig, RawStageConfig, RuntimeConfig, SchedulerSection,
    SchedulerSettings, StageConfig, default_cores,
};
use crate::errors::{NgsflowError, Result};
use crate::types::{Resources, parse_duration, parse_memory};

const GIB: u64 = 1024 * 1024 * 1024;

impl TryFrom<RawRuntimeConfig> for RuntimeConfig {
    type Error = NgsflowError;

    fn try_from(raw: RawRuntimeConfig) -> std::result::Result<Self, Self::Error> {
        let scheduler = validate_scheduler(&raw.scheduler)?;
        validate_pipeline(&raw)?;

        let mut stages = BTreeMap::new();
        for (name, stage) in raw.stage {
            let validated = validate_stage(&name, stage)?;
            stages.insert(name, validated);
        }

        Ok(RuntimeConfig {
            scheduler,
            vars: raw.vars,
            pipeline: raw.pipeline,
            stages,
        })
    }
}

fn validate_scheduler(section: &SchedulerSection) -> Result<SchedulerSettings> {
    let cores = section.cores.unwrap_or_else(default_cores);
    if cores == 0 {
        return Err(NgsflowError::Config(
            "[scheduler].cores must be >= 1 (got 0)".to_string(),
        ));
    }

    let memory = match &section.memory {
        Some(spec) => memory_bytes(spec, "[scheduler].memory")?,
        None => u64::MAX,
    };

    let max_workers = section.max_workers.unwrap_or(cores as usize);
    if max_workers == 0 {
        return Err(NgsflowError::Config(
            "[scheduler].max_workers must be >= 1 (got 0)".to_string(),
        ));
    }

    if section.max_attempts == 0 {
        return Err(NgsflowError::Config(
            "[scheduler].max_attempts must be >= 1 (got 0)".to_string(),
        ));
    }

    let job_timeout = section
        .job_timeout
        .as_deref()
        .map(|s| duration(s, "[scheduler].job_timeout"))
        .transpose()?;

    Ok(SchedulerSettings {
        max_workers,
        budget: Resources::new(cores, memory),
        max_attempts: section.max_attempts,
        retry_policy: section.retry_policy,
        job_timeout,
        checkpoint: section.checkpoint.clone(),
    })
}

fn validate_pipeline(raw: &RawRuntimeConfig) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for caller in &raw.pipeline.callers {
        if caller.trim().is_empty() {
            return Err(NgsflowError::Config(
                "[pipeline].callers contains an empty name".to_string(),
            ));
        }
        if !seen.insert(caller.as_str()) {
            return Err(NgsflowError::Config(format!(
                "[pipeline].callers lists '{}' more than once",
                caller
            )));
        }
    }
    Ok(())
}

fn validate_stage(name: &str, raw: RawStageConfig) -> Result<StageConfig> {
    let ctx = format!("[stage.{}]", name);

    if raw.num_cores == 0 {
        return Err(NgsflowError::Config(format!(
            "{}.num_cores must be >= 1 (got 0)",
            ctx
        )));
    }

    let memory = match &raw.max_mem {
        Some(spec) => memory_bytes(spec, &format!("{}.max_mem", ctx))?,
        None => 0,
    };

    let timeout = raw
        .timeout
        .as_deref()
        .map(|s| duration(s, &format!("{}.timeout", ctx)))
        .transpose()?;

    if let Some(cmd) = &raw.cmd {
        if cmd.trim().is_empty() {
            return Err(NgsflowError::Config(format!("{}.cmd is empty", ctx)));
        }
    }

    let output_ext = raw
        .output_ext
        .map(|e| e.trim_start_matches('.').to_string())
        .unwrap_or_else(|| "out".to_string());
    if output_ext.is_empty() {
        return Err(NgsflowError::Config(format!("{}.output_ext is empty", ctx)));
    }

    let mut params = BTreeMap::new();
    for (key, value) in raw.params {
        let rendered = match value {
            toml::Value::String(s) => s,
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            other => {
                return Err(NgsflowError::Config(format!(
                    "{}.params.{} must be a string, number or boolean (got {})",
                    ctx,
                    key,
                    other.type_str()
                )));
            }
        };
        params.insert(key, rendered);
    }

    Ok(StageConfig {
        name: name.to_string(),
        resources: Resources::new(raw.num_cores, memory),
        cmd: raw.cmd,
        output_ext,
        timeout,
        retry_group: raw.retry_group,
        params,
    })
}

fn memory_bytes(spec: &MemorySpec, field: &str) -> Result<u64> {
    match spec {
        MemorySpec::Gib(gib) => gib
            .checked_mul(GIB)
            .ok_or_else(|| NgsflowError::Config(format!("{} is too large", field))),
        MemorySpec::Size(s) => {
            parse_memory(s).map_err(|e| NgsflowError::Config(format!("{}: {}", field, e)))
        }
    }
}

fn duration(s: &str, field: &str) -> Result<Duration> {
    parse_duration(s).map_err(|e| NgsflowError::Config(format!("{}: {}", field, e)))
}
