// src/pipelines/mod.rs

//! Pipeline definitions.
//!
//! Each pipeline turns the run context (runtime configuration plus samples)
//! into a [`JobGraph`]. Tool invocations are described by `[stage.<name>]`
//! sections; a pipeline only decides which stages run per sample and how
//! they depend on each other.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use clap::ValueEnum;

use crate::config::SampleRecord;
use crate::context::RunContext;
use crate::dag::{Input, JobGraph, JobSpec};
use crate::errors::{NgsflowError, Result};
use crate::exec::ShellCommand;
use crate::template::{render, render_partial};

pub mod coverage;
pub mod rna;
pub mod variant;

/// The pipelines this crate knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Pipeline {
    /// STAR alignment and Cufflinks quantification, then Cuffmerge and
    /// per-sample Cuffquant.
    RnaStarCufflinks,
    /// STAR, Bowtie on the unmapped reads, merge, then Cufflinks.
    KshvRnaStar,
    /// Fan-out variant callers, normalisation, merge and annotation.
    VariantCalling,
    /// One run-wide sambamba coverage summary.
    CoverageSummary,
}

impl Pipeline {
    pub fn build(self, ctx: &RunContext) -> Result<JobGraph> {
        match self {
            Pipeline::RnaStarCufflinks => rna::star_cufflinks(ctx),
            Pipeline::KshvRnaStar => rna::kshv_star(ctx),
            Pipeline::VariantCalling => variant::variant_calling(ctx),
            Pipeline::CoverageSummary => coverage::coverage_summary(ctx),
        }
    }

    /// Stages the pipeline reads from the runtime configuration.
    pub fn stages(self, ctx: &RunContext) -> Vec<String> {
        let fixed: &[&str] = match self {
            Pipeline::RnaStarCufflinks => &["star", "cufflinks", "cuffmerge", "cuffquant"][..],
            Pipeline::KshvRnaStar => &["star", "bowtie", "picard-merge", "cufflinks"][..],
            Pipeline::VariantCalling => &variant::DOWNSTREAM_STAGES[..],
            Pipeline::CoverageSummary => &[coverage::STAGE][..],
        };
        let mut stages: Vec<String> = fixed.iter().map(|s| s.to_string()).collect();
        if self == Pipeline::VariantCalling {
            stages.extend(ctx.config.pipeline.callers.iter().cloned());
        }
        stages
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_possible_value() {
            Some(v) => f.write_str(v.get_name()),
            None => write!(f, "{:?}", self),
        }
    }
}

/// Builder for a job that runs one configured stage.
///
/// The job label is the output file stem: `<library>.<stem>` for a
/// per-sample job, `<stem>` for a run-wide one. The stem defaults to the
/// stage name.
pub struct StageJob<'a> {
    ctx: &'a RunContext,
    stage: &'a str,
    sample: Option<&'a SampleRecord>,
    stem: Option<String>,
    vars: HashMap<String, String>,
    inputs: Vec<Input>,
    retry_group: Option<String>,
}

impl<'a> StageJob<'a> {
    pub fn new(ctx: &'a RunContext, stage: &'a str) -> Self {
        Self {
            ctx,
            stage,
            sample: None,
            stem: None,
            vars: HashMap::new(),
            inputs: Vec::new(),
            retry_group: None,
        }
    }

    pub fn sample(mut self, sample: &'a SampleRecord) -> Self {
        self.sample = Some(sample);
        self
    }

    /// Output stem when it differs from the stage name (e.g. one
    /// normalisation stage producing `<library>.<caller>.normalized.vcf`).
    pub fn stem(mut self, stem: impl Into<String>) -> Self {
        self.stem = Some(stem.into());
        self
    }

    /// Extra template variable for this job only.
    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn input(mut self, input: impl Into<Input>) -> Self {
        self.inputs.push(input.into());
        self
    }

    /// Retry group used when the stage configuration names none.
    pub fn default_retry_group(mut self, group: impl Into<String>) -> Self {
        self.retry_group = Some(group.into());
        self
    }

    pub fn build(self) -> Result<JobSpec> {
        let stage = self.ctx.stage(self.stage)?;
        let stem = self.stem.unwrap_or_else(|| stage.name.clone());
        let library = self.sample.map(|s| s.library_name.as_str());
        let output: PathBuf = self.ctx.output_path(library, &stem, &stage.output_ext);

        let mut vars = self.ctx.stage_vars(stage, self.sample, &output);
        vars.extend(self.vars);

        let template = stage.cmd.as_deref().ok_or_else(|| {
            NgsflowError::Config(format!("[stage.{}] has no cmd", stage.name))
        })?;
        let command = render_partial(template, &vars)?;

        let retry_group = match &stage.retry_group {
            Some(group) => Some(render(group, &vars)?),
            None => self.retry_group,
        };

        let label = match library {
            Some(lib) => format!("{}.{}", lib, stem),
            None => stem,
        };

        let body = ShellCommand::new(command)
            .output(output)
            .workdir(self.ctx.workdir.clone());

        let mut spec = JobSpec::new(label, Arc::new(body))
            .resources(stage.resources)
            .timeout(stage.timeout.or(self.ctx.config.scheduler.job_timeout))
            .retry_group(retry_group);
        if let Some(sample) = self.sample {
            spec = spec.sample(sample.name.clone());
        }
        for input in self.inputs {
            spec = spec.input(input);
        }
        Ok(spec)
    }
}

/// Per-sample well-known input path that comes from outside the graph
/// (e.g. the recalibrated BAM a variant-calling run starts from).
pub(crate) fn sample_file(ctx: &RunContext, sample: &SampleRecord, suffix: &str) -> String {
    ctx.workdir
        .join(format!("{}.{}", sample.library_name, suffix))
        .display()
        .to_string()
}
