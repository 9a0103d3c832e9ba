// src/context.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::{RuntimeConfig, SampleRecord, SampleSheet, StageConfig};
use crate::errors::{NgsflowError, Result};

/// Run-wide configuration shared by every job.
///
/// Created once before the run and handed to jobs behind an `Arc`; nothing
/// mutates it afterwards.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: RuntimeConfig,
    pub samples: SampleSheet,
    /// Directory all well-known output files are written to.
    pub workdir: PathBuf,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            config: RuntimeConfig::default(),
            samples: SampleSheet::default(),
            workdir: PathBuf::from("."),
        }
    }
}

impl RunContext {
    pub fn new(config: RuntimeConfig, samples: SampleSheet, workdir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            samples,
            workdir: workdir.into(),
        }
    }

    pub fn sample(&self, name: &str) -> Option<&SampleRecord> {
        self.samples.get(name)
    }

    pub fn stage(&self, name: &str) -> Result<&StageConfig> {
        self.config.stages.get(name).ok_or_else(|| {
            NgsflowError::Config(format!("missing [stage.{}] section", name))
        })
    }

    /// `<workdir>/<library>.<stage>.<ext>`, or `<workdir>/<stage>.<ext>` for
    /// run-wide stages.
    pub fn output_path(&self, library: Option<&str>, stage: &str, ext: &str) -> PathBuf {
        let file = match library {
            Some(lib) => format!("{}.{}.{}", lib, stage, ext),
            None => format!("{}.{}", stage, ext),
        };
        self.workdir.join(file)
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Template variables for a stage, most specific last: `[vars]`, the
    /// sample record, stage params, then the built-ins.
    pub fn stage_vars(
        &self,
        stage: &StageConfig,
        sample: Option<&SampleRecord>,
        output: &Path,
    ) -> HashMap<String, String> {
        let mut vars: HashMap<String, String> = self
            .config
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(record) = sample {
            vars.extend(record.vars());
        }
        vars.extend(stage.params.iter().map(|(k, v)| (k.clone(), v.clone())));

        vars.insert("stage".to_string(), stage.name.clone());
        vars.insert("cores".to_string(), stage.resources.cores.to_string());
        vars.insert(
            "memory_gb".to_string(),
            stage.resources.memory_gib().to_string(),
        );
        vars.insert("output".to_string(), output.display().to_string());
        vars.insert("workdir".to_string(), self.workdir.display().to_string());
        vars
    }
}
