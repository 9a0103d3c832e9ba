// tests/pipelines.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::tempdir;

use ngsflow::config::parse_runtime_config;
use ngsflow::context::RunContext;
use ngsflow::dag::{EdgeKind, Input, JobContext, JobGraph};
use ngsflow::errors::NgsflowError;
use ngsflow::pipelines::{Pipeline, StageJob};
use ngsflow::types::Resources;
use ngsflow_test_utils::builders::{pipeline_context, sample_sheet, stage_config_toml};
use ngsflow_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

const RNA_STAGES: [&str; 4] = ["star", "cufflinks", "cuffmerge", "cuffquant"];
const KSHV_STAGES: [&str; 4] = ["star", "bowtie", "picard-merge", "cufflinks"];
const VARIANT_STAGES: [&str; 8] = [
    "freebayes",
    "mutect",
    "vt-normalize",
    "merge-variants",
    "gatk-annotate",
    "gatk-filter",
    "snpeff",
    "vcfanno",
];

fn variant_context(workdir: &str) -> Result<RunContext, Box<dyn Error>> {
    let toml = format!(
        "{}[pipeline]\ncallers = [\"freebayes\", \"mutect\"]\n",
        stage_config_toml(&VARIANT_STAGES)
    );
    let config = parse_runtime_config(&toml)?;
    Ok(RunContext::new(config, sample_sheet(&["LIB-1", "LIB-2"]), workdir))
}

fn handle(graph: &JobGraph, label: &str) -> ngsflow::dag::JobHandle {
    graph
        .find(label)
        .unwrap_or_else(|| panic!("job {label} not in graph"))
}

#[test]
fn star_cufflinks_shape() -> TestResult {
    let ctx = pipeline_context(&RNA_STAGES, &["LIB-1", "LIB-2"]);
    let graph = Pipeline::RnaStarCufflinks.build(&ctx)?;
    graph.validate()?;

    assert_eq!(graph.len(), 8);
    let root = handle(&graph, "root");
    let star = handle(&graph, "LIB-1.star");
    let cufflinks = handle(&graph, "LIB-1.cufflinks");
    let cuffmerge = handle(&graph, "cuffmerge");
    let cuffquant = handle(&graph, "LIB-2.cuffquant");

    assert_eq!(graph.roots(), vec![root]);
    assert_eq!(graph.successors(root, EdgeKind::FollowOn), vec![cuffmerge]);
    assert_eq!(
        graph.job(cufflinks).map(|j| j.inputs.clone()),
        Some(vec![Input::Promise(star)])
    );
    assert_eq!(
        graph.job(cuffquant).map(|j| j.inputs.clone()),
        Some(vec![Input::Promise(cuffmerge)])
    );

    // Cuffmerge waits for every sample's alignment and quantification.
    let pre = graph.prerequisites_of(cuffmerge);
    for label in ["root", "LIB-1.star", "LIB-1.cufflinks", "LIB-2.star", "LIB-2.cufflinks"] {
        assert!(pre.contains(&handle(&graph, label)), "{label} should gate cuffmerge");
    }

    let spec = graph.job(star).expect("star job");
    assert_eq!(spec.body.describe(), "sh:echo star /work/LIB-1.star.txt");
    assert_eq!(spec.sample.as_deref(), Some("LIB-1"));
    assert_eq!(spec.resources, Resources::gib(1, 1));
    Ok(())
}

#[test]
fn kshv_star_shape() -> TestResult {
    let ctx = pipeline_context(&KSHV_STAGES, &["LIB-1"]);
    let graph = Pipeline::KshvRnaStar.build(&ctx)?;

    assert_eq!(graph.len(), 5);
    let star = handle(&graph, "LIB-1.star");
    let bowtie = handle(&graph, "LIB-1.bowtie");
    let merge = handle(&graph, "LIB-1.picard-merge");
    let cufflinks = handle(&graph, "LIB-1.cufflinks");

    assert_eq!(
        graph.job(merge).map(|j| j.inputs.clone()),
        Some(vec![Input::Promise(star), Input::Promise(bowtie)])
    );
    assert_eq!(graph.prerequisites_of(merge), vec![star, bowtie]);
    assert_eq!(graph.prerequisites_of(cufflinks), vec![merge]);
    Ok(())
}

#[test]
fn variant_calling_shape() -> TestResult {
    let ctx = variant_context("/work")?;
    let graph = Pipeline::VariantCalling.build(&ctx)?;
    graph.validate()?;

    // root + 7 jobs per sample; callers and normalisations are spawned later.
    assert_eq!(graph.len(), 15);

    let spawn_callers = handle(&graph, "LIB-1.spawn-callers");
    let spawn_norm = handle(&graph, "LIB-1.spawn-normalization");
    let merge = handle(&graph, "LIB-1.merge-variants");
    let vcfanno = handle(&graph, "LIB-1.vcfanno");

    assert_eq!(graph.successors(spawn_callers, EdgeKind::FollowOn), vec![spawn_norm]);
    assert_eq!(graph.successors(spawn_norm, EdgeKind::FollowOn), vec![merge]);
    assert_eq!(
        graph.job(merge).map(|j| j.inputs.clone()),
        Some(vec![Input::literal(json!([
            "/work/LIB-1.freebayes.normalized.txt",
            "/work/LIB-1.mutect.normalized.txt"
        ]))])
    );
    assert_eq!(
        graph.prerequisites_of(vcfanno),
        vec![handle(&graph, "LIB-1.snpeff")]
    );
    Ok(())
}

#[tokio::test]
async fn variant_spawner_builds_one_job_per_caller() -> TestResult {
    let ctx = Arc::new(variant_context("/work")?);
    let graph = Pipeline::VariantCalling.build(&ctx)?;
    let spawner = handle(&graph, "LIB-2.spawn-callers");
    let spec = graph.job(spawner).expect("spawner");

    let job_ctx = JobContext::new(
        spawner,
        spec.label.clone(),
        1,
        spec.resources,
        Arc::clone(&ctx),
        None,
        Vec::new(),
    );
    let output = spec.body.call(job_ctx).await?;
    let spawned = output.spawned.expect("callers are spawned");

    assert_eq!(spawned.len(), 2);
    let freebayes = spawned.find("LIB-2.freebayes").expect("freebayes job");
    let job = spawned.job(freebayes).expect("freebayes spec");
    assert_eq!(job.retry_group.as_deref(), Some("LIB-2.variant-callers"));
    assert_eq!(
        job.inputs,
        vec![Input::literal("/work/LIB-2.recalibrated.sorted.bam")]
    );
    Ok(())
}

#[tokio::test]
async fn variant_calling_runs_end_to_end() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let ctx = variant_context(&dir.path().display().to_string())?;
    let graph = Pipeline::VariantCalling.build(&ctx)?;
    let options = ctx.config.scheduler.scheduler_options();

    let result = with_timeout(ngsflow::execute_graph(graph, options, Arc::new(ctx), None)).await?;
    assert!(result.is_success(), "{result}");

    // 15 static jobs, plus 2 callers and 2 normalisations per sample.
    assert_eq!(result.succeeded.len(), 23);
    assert!(result.report("LIB-1.mutect.normalized").is_some());
    assert!(result.report("LIB-2.freebayes").is_some());
    Ok(())
}

#[test]
fn coverage_summary_sees_every_sample() -> TestResult {
    let config = parse_runtime_config(
        "[stage.sambamba-summary]\nnum_cores = 4\ncmd = \"sambamba summary {libraries} :: {bams} > {output}\"\noutput_ext = \"tsv\"\n",
    )?;
    let ctx = RunContext::new(config, sample_sheet(&["A", "B"]), "/w");
    let graph = Pipeline::CoverageSummary.build(&ctx)?;

    assert_eq!(graph.len(), 2);
    let summary = graph.job(handle(&graph, "sambamba-summary")).expect("summary");
    assert_eq!(
        summary.body.describe(),
        "sh:sambamba summary A B :: /w/A.recalibrated.sorted.bam /w/B.recalibrated.sorted.bam > /w/sambamba-summary.tsv"
    );
    assert_eq!(summary.sample, None);
    assert_eq!(summary.resources.cores, 4);
    Ok(())
}

#[test]
fn missing_stage_section_is_a_config_error() {
    let ctx = pipeline_context(&["star", "cufflinks", "cuffquant"], &["LIB-1"]);
    match Pipeline::RnaStarCufflinks.build(&ctx) {
        Err(NgsflowError::Config(msg)) => assert!(msg.contains("[stage.cuffmerge]"), "{msg}"),
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn stage_without_cmd_is_a_config_error() -> TestResult {
    let config = parse_runtime_config("[stage.star]\nnum_cores = 2\n")?;
    let ctx = RunContext::new(config, sample_sheet(&["LIB-1"]), "/w");
    let sample = ctx.sample("LIB-1").expect("sample");
    let result = StageJob::new(&ctx, "star").sample(sample).build();
    assert!(matches!(result, Err(NgsflowError::Config(msg)) if msg.contains("no cmd")));
    Ok(())
}

#[test]
fn empty_caller_list_is_a_config_error() -> TestResult {
    let toml = format!("{}[pipeline]\ncallers = []\n", stage_config_toml(&VARIANT_STAGES));
    let ctx = RunContext::new(parse_runtime_config(&toml)?, sample_sheet(&["LIB-1"]), "/w");
    assert!(matches!(
        Pipeline::VariantCalling.build(&ctx),
        Err(NgsflowError::Config(msg)) if msg.contains("callers")
    ));
    Ok(())
}

#[test]
fn stage_job_renders_retry_group_and_default_timeout() -> TestResult {
    let config = parse_runtime_config(
        r#"
[scheduler]
job_timeout = "2h"

[vars]
reference = "/ref/hg19.fa"

[stage.gatk-filter]
num_cores = 2
max_mem = "6G"
cmd = "gatk -Xmx{memory_gb}g -R {reference} -V {in:0} -o {output} --sample {sample_name}"
output_ext = "vcf"
retry_group = "{library}.annotation"
"#,
    )?;
    let ctx = RunContext::new(config, sample_sheet(&["LIB-9"]), "/w");
    let sample = ctx.sample("LIB-9").expect("sample");

    let spec = StageJob::new(&ctx, "gatk-filter").sample(sample).build()?;
    assert_eq!(spec.label, "LIB-9.gatk-filter");
    assert_eq!(spec.retry_group.as_deref(), Some("LIB-9.annotation"));
    assert_eq!(spec.timeout, Some(Duration::from_secs(7200)));
    assert_eq!(
        spec.body.describe(),
        "sh:gatk -Xmx6g -R /ref/hg19.fa -V {in:0} -o /w/LIB-9.gatk-filter.vcf --sample sample-LIB-9"
    );
    Ok(())
}

#[test]
fn pipeline_names_and_stage_lists() {
    let ctx = pipeline_context(&[], &[]);
    assert_eq!(Pipeline::RnaStarCufflinks.to_string(), "rna-star-cufflinks");
    assert_eq!(Pipeline::CoverageSummary.to_string(), "coverage-summary");
    assert_eq!(
        Pipeline::KshvRnaStar.stages(&ctx),
        vec!["star", "bowtie", "picard-merge", "cufflinks"]
    );
    let variant = Pipeline::VariantCalling.stages(&ctx);
    assert!(variant.contains(&"vcfanno".to_string()));
    assert!(variant.contains(&"freebayes".to_string()));
}
