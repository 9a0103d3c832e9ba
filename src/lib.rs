// src/lib.rs

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod context;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod pipelines;
pub mod template;
pub mod types;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::cli::CliArgs;
use crate::config::{RuntimeConfig, SchedulerSettings, default_config_path, load_runtime_config, load_samples};
use crate::context::RunContext;
use crate::dag::{EdgeKind, JobGraph, RunResult, Scheduler, SchedulerOptions};
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent};
use crate::exec::RealExecutorBackend;
use crate::types::parse_memory;

/// High-level entry point used by `main.rs`. Returns the process exit code
/// (0 when every job succeeded, 1 otherwise); `Err` means the run could not
/// start.
///
/// This wires together:
/// - config and samples loading
/// - pipeline graph construction
/// - checkpoint store
/// - scheduler / runtime / executor
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config.scheduler, &args)?;

    let samples = load_samples(&args.samples)?;
    if samples.is_empty() {
        warn!(path = ?args.samples, "samples file lists no samples");
    }

    let workdir = args.workdir.clone().unwrap_or_else(|| PathBuf::from("."));
    let ctx = RunContext::new(config, samples, workdir.clone());
    let graph = args.pipeline.build(&ctx)?;
    graph.validate()?;

    info!(
        pipeline = %args.pipeline,
        samples = ctx.samples.len(),
        jobs = graph.len(),
        "built job graph"
    );

    if args.dry_run {
        print_dry_run(&graph, &ctx.config.scheduler);
        return Ok(0);
    }

    fs::create_dir_all(&workdir)
        .with_context(|| format!("creating work directory {:?}", workdir))?;

    let mut store = FileCheckpointStore::new(checkpoint_path(
        &workdir,
        ctx.config.scheduler.checkpoint.as_deref(),
    ));
    if args.fresh {
        store.clear()?;
    }

    let store: Box<dyn CheckpointStore> = Box::new(store);
    let options = ctx.config.scheduler.scheduler_options();
    let result = execute_graph(graph, options, Arc::new(ctx), Some(store)).await?;

    println!("{}", result);
    Ok(result.exit_code())
}

/// Run `graph` to completion with the real executor.
///
/// Jobs already recorded in `checkpoint` (same label and fingerprint) are
/// not re-run; newly succeeded jobs are recorded. Ctrl-C cancels jobs that
/// have not started and waits for the running ones.
pub async fn execute_graph(
    graph: JobGraph,
    options: SchedulerOptions,
    ctx: Arc<RunContext>,
    checkpoint: Option<Box<dyn CheckpointStore>>,
) -> crate::errors::Result<RunResult> {
    let mut scheduler = Scheduler::new(graph, options)?;

    if let Some(store) = &checkpoint {
        match store.load_all() {
            Ok(entries) if !entries.is_empty() => {
                let restored = scheduler.restore_from(entries)?;
                info!(restored, "resuming from checkpoint");
            }
            Ok(_) => debug!("checkpoint is empty"),
            Err(e) => warn!(error = %e, "could not read checkpoint; running every job"),
        }
    }

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let executor = RealExecutorBackend::new(rt_tx.clone(), ctx);

    // Ctrl-C → graceful shutdown.
    let signal_task = {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        })
    };
    drop(rt_tx);

    let mut runtime = Runtime::new(CoreRuntime::new(scheduler), rt_rx, executor);
    if let Some(store) = checkpoint {
        runtime = runtime.with_checkpoint(store);
    }
    let result = runtime.run().await;

    signal_task.abort();
    result
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(p) => Ok(load_runtime_config(p)?),
        None => {
            let default = default_config_path();
            if default.exists() {
                Ok(load_runtime_config(&default)?)
            } else {
                warn!(
                    path = ?default,
                    "no runtime configuration found; using defaults"
                );
                Ok(RuntimeConfig::default())
            }
        }
    }
}

/// CLI flags win over the `[scheduler]` section.
fn apply_overrides(settings: &mut SchedulerSettings, args: &CliArgs) -> Result<()> {
    if let Some(cores) = args.cores {
        anyhow::ensure!(cores > 0, "--cores must be >= 1");
        settings.budget.cores = cores;
    }
    if let Some(memory) = &args.memory {
        settings.budget.memory =
            parse_memory(memory).map_err(|e| anyhow::anyhow!("--memory: {e}"))?;
    }
    if let Some(workers) = args.workers {
        anyhow::ensure!(workers > 0, "--workers must be >= 1");
        settings.max_workers = workers;
    }
    if let Some(attempts) = args.max_attempts {
        anyhow::ensure!(attempts > 0, "--max-attempts must be >= 1");
        settings.max_attempts = attempts;
    }
    if let Some(policy) = args.retry_policy {
        settings.retry_policy = policy;
    }
    if let Some(path) = &args.checkpoint {
        settings.checkpoint = Some(path.clone());
    }
    Ok(())
}

fn checkpoint_path(workdir: &Path, configured: Option<&Path>) -> PathBuf {
    match configured {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => workdir.join(p),
        None => workdir.join(checkpoint::CHECKPOINT_FILE_PATH),
    }
}

/// Simple dry-run output: jobs, their resources and edges.
fn print_dry_run(graph: &JobGraph, settings: &SchedulerSettings) {
    println!("ngsflow dry-run");
    println!("  budget = {}", settings.budget);
    println!("  max_workers = {}", settings.max_workers);
    println!(
        "  max_attempts = {} ({:?})",
        settings.max_attempts, settings.retry_policy
    );
    println!();

    println!("jobs ({}):", graph.len());
    for handle in graph.handles() {
        let Some(job) = graph.job(handle) else {
            continue;
        };
        println!("  - {} [{}]", job.label, job.resources);
        println!("      run: {}", job.body.describe());
        for kind in [EdgeKind::Child, EdgeKind::FollowOn] {
            let targets: Vec<&str> = graph
                .successors(handle, kind)
                .into_iter()
                .map(|h| graph.label(h))
                .collect();
            if !targets.is_empty() {
                println!("      {}: {:?}", kind, targets);
            }
        }
        if let Some(group) = &job.retry_group {
            println!("      retry_group: {group}");
        }
        if let Some(timeout) = job.timeout {
            println!("      timeout: {timeout:?}");
        }
    }

    debug!("dry-run complete (no execution)");
}
