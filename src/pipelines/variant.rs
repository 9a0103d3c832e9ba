// src/pipelines/variant.rs

//! Variant calling: every configured caller runs on each sample's
//! recalibrated BAM, each call set is normalised, and the normalised sets
//! are merged and annotated.
//!
//! Callers and normalisations are batch-spawned at run time:
//!
//! ```text
//! root ──> <lib>.spawn-callers ══spawn══> <lib>.<caller>            (each caller)
//!               └─follow-on─> <lib>.spawn-normalization ══spawn══> <lib>.<caller>.normalized
//!                                  └─follow-on─> <lib>.merge-variants ──> gatk-annotate
//!                                                    ──> gatk-filter ──> snpeff ──> vcfanno
//! ```
//!
//! The follow-on edges make each stage wait until the whole spawned fan-out
//! of the previous one succeeded.

use std::path::PathBuf;

use serde_json::json;

use crate::config::SampleRecord;
use crate::context::RunContext;
use crate::dag::{Input, JobGraph, JobHandle, JobOutput, JobSpec, job_fn, noop};
use crate::errors::{NgsflowError, Result};
use crate::pipelines::{StageJob, sample_file};

pub const NORMALIZE_STAGE: &str = "vt-normalize";

pub const DOWNSTREAM_STAGES: [&str; 6] = [
    NORMALIZE_STAGE,
    "merge-variants",
    "gatk-annotate",
    "gatk-filter",
    "snpeff",
    "vcfanno",
];

pub fn variant_calling(ctx: &RunContext) -> Result<JobGraph> {
    let callers = &ctx.config.pipeline.callers;
    if callers.is_empty() {
        return Err(NgsflowError::Config(
            "[pipeline].callers is empty; nothing to call variants with".to_string(),
        ));
    }

    let mut graph = JobGraph::new();
    let root = graph.add_job(JobSpec::new("root", noop()));

    for sample in ctx.samples.iter() {
        let library = sample.library_name.as_str();

        let calls = caller_graph(ctx, sample)?;
        let spawn_callers = graph.add_job(spawner(
            format!("{}.spawn-callers", library),
            format!("variant-callers:{}", callers.join(",")),
            calls,
        ));
        graph.add_child(root, spawn_callers)?;

        let (normalizations, normalized) = normalization_graph(ctx, sample)?;
        let spawn_norm = graph.add_job(spawner(
            format!("{}.spawn-normalization", library),
            format!("{}:{}", NORMALIZE_STAGE, callers.join(",")),
            normalizations,
        ));
        graph.add_follow_on(spawn_callers, spawn_norm)?;

        let merge = graph.add_job(
            StageJob::new(ctx, "merge-variants")
                .sample(sample)
                .var("callers", callers.join(","))
                .input(Input::literal(json!(normalized)))
                .build()?,
        );
        graph.add_follow_on(spawn_norm, merge)?;

        annotation_chain(ctx, sample, &mut graph, merge)?;
    }

    Ok(graph)
}

/// A job whose only work is to splice `sub` into the running graph.
fn spawner(label: String, description: String, sub: JobGraph) -> JobSpec {
    let body = job_fn(description, move |_ctx| {
        let sub = sub.clone();
        async move { Ok(JobOutput::spawn(sub)) }
    });
    JobSpec::new(label, body)
}

/// One job per caller, all reading the sample's recalibrated BAM.
fn caller_graph(ctx: &RunContext, sample: &SampleRecord) -> Result<JobGraph> {
    let bam = sample_file(ctx, sample, "recalibrated.sorted.bam");
    let group = format!("{}.variant-callers", sample.library_name);

    let mut graph = JobGraph::new();
    for caller in &ctx.config.pipeline.callers {
        graph.add_job(
            StageJob::new(ctx, caller)
                .sample(sample)
                .var("bam", bam.clone())
                .input(Input::literal(bam.clone()))
                .default_retry_group(group.clone())
                .build()?,
        );
    }
    graph.validate()?;
    Ok(graph)
}

/// One normalisation per caller output. Returns the graph and the
/// normalised VCF paths in caller order.
fn normalization_graph(ctx: &RunContext, sample: &SampleRecord) -> Result<(JobGraph, Vec<String>)> {
    let library = sample.library_name.as_str();
    let ext = ctx.stage(NORMALIZE_STAGE)?.output_ext.clone();
    let group = format!("{}.{}", library, NORMALIZE_STAGE);

    let mut graph = JobGraph::new();
    let mut normalized = Vec::new();
    for caller in &ctx.config.pipeline.callers {
        let calls = caller_output(ctx, library, caller)?;
        let stem = format!("{}.normalized", caller);
        normalized.push(
            ctx.output_path(Some(library), &stem, &ext)
                .display()
                .to_string(),
        );
        graph.add_job(
            StageJob::new(ctx, NORMALIZE_STAGE)
                .sample(sample)
                .stem(stem)
                .var("caller", caller.clone())
                .input(Input::literal(calls.display().to_string()))
                .default_retry_group(group.clone())
                .build()?,
        );
    }
    graph.validate()?;
    Ok((graph, normalized))
}

fn caller_output(ctx: &RunContext, library: &str, caller: &str) -> Result<PathBuf> {
    let stage = ctx.stage(caller)?;
    Ok(ctx.output_path(Some(library), caller, &stage.output_ext))
}

/// merge ──> gatk-annotate ──> gatk-filter ──> snpeff ──> vcfanno, each
/// consuming the previous output path.
fn annotation_chain(
    ctx: &RunContext,
    sample: &SampleRecord,
    graph: &mut JobGraph,
    merge: JobHandle,
) -> Result<()> {
    let bam = sample_file(ctx, sample, "recalibrated.sorted.bam");
    let mut previous = merge;
    for stage in ["gatk-annotate", "gatk-filter", "snpeff", "vcfanno"] {
        let spec = StageJob::new(ctx, stage)
            .sample(sample)
            .var("bam", bam.clone())
            .input(graph.promise::<String>(previous))
            .build()?;
        previous = graph.add_job(spec);
    }
    Ok(())
}
