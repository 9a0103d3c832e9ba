// src/pipelines/coverage.rs

use crate::context::RunContext;
use crate::dag::{JobGraph, JobSpec, noop};
use crate::errors::Result;
use crate::pipelines::{StageJob, sample_file};

pub const STAGE: &str = "sambamba-summary";

/// One run-wide job summarising the coverage of every sample. The command
/// sees `{libraries}` (space separated) and `{bams}` (the recalibrated BAM
/// of each sample).
pub fn coverage_summary(ctx: &RunContext) -> Result<JobGraph> {
    let mut graph = JobGraph::new();
    let root = graph.add_job(JobSpec::new("root", noop()));

    let libraries: Vec<&str> = ctx.samples.iter().map(|s| s.library_name.as_str()).collect();
    let bams: Vec<String> = ctx
        .samples
        .iter()
        .map(|s| sample_file(ctx, s, "recalibrated.sorted.bam"))
        .collect();

    let summary = graph.add_job(
        StageJob::new(ctx, STAGE)
            .var("libraries", libraries.join(" "))
            .var("bams", bams.join(" "))
            .build()?,
    );
    graph.add_child(root, summary)?;

    Ok(graph)
}
