// src/pipelines/rna.rs

//! RNA-seq pipelines.

use tracing::debug;

use crate::context::RunContext;
use crate::dag::{JobGraph, JobSpec, noop};
use crate::errors::Result;
use crate::pipelines::StageJob;

/// Paired-end STAR alignment + Cufflinks per sample. Once every sample is
/// quantified, Cuffmerge builds the merged assembly and Cuffquant
/// re-quantifies each sample against it.
///
/// ```text
/// root ──child──> <lib>.star ──> <lib>.cufflinks      (per sample)
///   └──follow-on──> cuffmerge ──> <lib>.cuffquant     (per sample)
/// ```
pub fn star_cufflinks(ctx: &RunContext) -> Result<JobGraph> {
    let mut graph = JobGraph::new();
    let root = graph.add_job(JobSpec::new("root", noop()));

    for sample in ctx.samples.iter() {
        let align = graph.add_job(StageJob::new(ctx, "star").sample(sample).build()?);
        let spec = StageJob::new(ctx, "cufflinks")
            .sample(sample)
            .input(graph.promise::<String>(align))
            .build()?;
        let quantify = graph.add_job(spec);
        graph.add_child(root, align)?;
        debug!(sample = %sample.name, ?align, ?quantify, "added STAR/Cufflinks jobs");
    }

    let cuffmerge = graph.add_job(StageJob::new(ctx, "cuffmerge").build()?);
    graph.add_follow_on(root, cuffmerge)?;

    for sample in ctx.samples.iter() {
        let spec = StageJob::new(ctx, "cuffquant")
            .sample(sample)
            .input(graph.promise::<String>(cuffmerge))
            .build()?;
        graph.add_job(spec);
    }

    Ok(graph)
}

/// Single-end STAR alignment; reads STAR could not map go to Bowtie
/// (against the viral genome), the two alignments are merged and then
/// quantified with Cufflinks.
///
/// ```text
/// root ──> <lib>.star ──> <lib>.bowtie ──> <lib>.picard-merge ──> <lib>.cufflinks
///                 └──────────────────────────────┘
/// ```
pub fn kshv_star(ctx: &RunContext) -> Result<JobGraph> {
    let mut graph = JobGraph::new();
    let root = graph.add_job(JobSpec::new("root", noop()));

    for sample in ctx.samples.iter() {
        let align = graph.add_job(StageJob::new(ctx, "star").sample(sample).build()?);
        graph.add_child(root, align)?;

        // STAR's output root; bowtie reads `<root>Unmapped.out.mate1`.
        let spec = StageJob::new(ctx, "bowtie")
            .sample(sample)
            .input(graph.promise::<String>(align))
            .build()?;
        let bowtie = graph.add_job(spec);

        let spec = StageJob::new(ctx, "picard-merge")
            .sample(sample)
            .input(graph.promise::<String>(align))
            .input(graph.promise::<String>(bowtie))
            .build()?;
        let merge = graph.add_job(spec);

        let spec = StageJob::new(ctx, "cufflinks")
            .sample(sample)
            .input(graph.promise::<String>(merge))
            .build()?;
        graph.add_job(spec);
    }

    Ok(graph)
}
