// src/dag/scheduler.rs

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointEntry;
use crate::dag::graph::JobGraph;
use crate::dag::job::{Input, JobHandle, JobOutput, JobValue};
use crate::dag::report::{JobReport, RunResult, RunStatus};
use crate::dag::resources::ResourcePool;
use crate::dag::results::ResultsTable;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state::{FailureKind, JobState, JobStatus, ScheduledJob};
use crate::dag::state_manager::{DependencyIndex, StateManager, deps_satisfied};
use crate::errors::{JobError, NgsflowError, Result};
use crate::types::{Resources, RetryPolicy};

/// Run-wide scheduling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Total cores/memory that running jobs may reserve at once.
    pub budget: Resources,
    /// Maximum number of concurrently running jobs.
    pub max_workers: usize,
    /// Attempts per job (1 = no retries).
    pub max_attempts: u32,
    pub retry_policy: RetryPolicy,
}

impl SchedulerOptions {
    pub fn new(budget: Resources) -> Self {
        Self {
            budget,
            max_workers: (budget.cores as usize).max(1),
            max_attempts: 1,
            retry_policy: RetryPolicy::PerJob,
        }
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Outcome of one attempt, as reported by the executor.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Success(JobOutput),
    Failed(JobError),
}

/// Scheduler holds the job graph plus all mutable run state.
///
/// It is a synchronous state machine: callers feed it completions and it
/// answers with the jobs to dispatch next. It is responsible for:
/// - deciding when a job is ready (all prerequisites succeeded)
/// - choosing which ready jobs fit the resource budget and worker bound
/// - retrying failed attempts within the retry policy
/// - skipping dependents of failed jobs
/// - splicing spawned subgraphs and completing their joins
/// - holding the results table that promises resolve from
#[derive(Debug)]
pub struct Scheduler {
    graph: JobGraph,
    index: DependencyIndex,
    states: Vec<JobState>,
    pool: ResourcePool,
    results: ResultsTable,
    options: SchedulerOptions,
    /// Retries consumed per retry group (`RetryPolicy::PerGroup`).
    group_retries: HashMap<String, u32>,
    /// Checkpointed results that newly added jobs may be restored from.
    checkpoint: BTreeMap<String, CheckpointEntry>,
    dispatches: usize,
    /// Set by [`Scheduler::cancel_pending`]; nothing new is dispatched.
    draining: bool,
    finished: bool,
}

impl Scheduler {
    /// Validate `graph` and prepare a run over it.
    pub fn new(graph: JobGraph, options: SchedulerOptions) -> Result<Self> {
        if options.max_workers == 0 {
            return Err(NgsflowError::Config(
                "max_workers must be >= 1 (got 0)".to_string(),
            ));
        }
        if options.max_attempts == 0 {
            return Err(NgsflowError::Config(
                "max_attempts must be >= 1 (got 0)".to_string(),
            ));
        }
        if options.budget.cores == 0 {
            return Err(NgsflowError::Config(
                "resource budget must include at least one core".to_string(),
            ));
        }

        graph.validate()?;

        let index = DependencyIndex::build(&graph);
        let states = vec![JobState::default(); graph.len()];

        Ok(Self {
            graph,
            index,
            states,
            pool: ResourcePool::new(options.budget, options.max_workers),
            results: ResultsTable::new(),
            options,
            group_retries: HashMap::new(),
            checkpoint: BTreeMap::new(),
            dispatches: 0,
            draining: false,
            finished: false,
        })
    }

    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    pub fn status_of(&self, handle: JobHandle) -> Option<JobStatus> {
        self.states.get(handle.index()).map(|s| s.status)
    }

    pub fn failure_of(&self, handle: JobHandle) -> Option<&FailureKind> {
        self.states.get(handle.index())?.failure.as_ref()
    }

    pub fn attempts_of(&self, handle: JobHandle) -> Option<u32> {
        self.states.get(handle.index()).map(|s| s.attempts)
    }

    /// Resolved promise value of `handle`, if its body has succeeded.
    pub fn result_of(&self, handle: JobHandle) -> Option<&JobValue> {
        self.results.get(handle)
    }

    /// Whether all prerequisites of `handle` have succeeded.
    ///
    /// Returns `None` if the handle is unknown.
    pub fn deps_satisfied(&self, handle: JobHandle) -> Option<bool> {
        self.states.get(handle.index())?;
        Some(deps_satisfied(&self.index, &self.states, handle))
    }

    /// Reservations of currently running jobs.
    pub fn in_use(&self) -> Resources {
        self.pool.in_use()
    }

    pub fn running_count(&self) -> usize {
        self.pool.running()
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatches
    }

    /// Handles of jobs currently in `status`.
    pub fn jobs_with_status(&self, status: JobStatus) -> Vec<JobHandle> {
        self.graph
            .handles()
            .filter(|h| self.states[h.index()].status == status)
            .collect()
    }

    /// Whether every job is terminal.
    pub fn is_finished(&self) -> bool {
        self.states.iter().all(|s| s.status.is_terminal())
    }

    /// Offer checkpointed results. Jobs whose label and fingerprint match an
    /// entry, and whose prerequisites were all restored too, are marked
    /// succeeded without running. Spawned jobs are matched when they are
    /// spliced in.
    ///
    /// Must be called before [`Scheduler::start`]. Returns the number of
    /// restored jobs.
    pub fn restore_from(&mut self, entries: BTreeMap<String, CheckpointEntry>) -> Result<usize> {
        if self.dispatches > 0 {
            warn!("restore_from called after jobs were dispatched; ignoring");
            return Ok(0);
        }
        self.checkpoint = entries;
        let order = self.graph.topological_order()?;
        Ok(self.restore_jobs(&order))
    }

    /// Restore the given jobs (in prerequisite order) from the checkpoint.
    fn restore_jobs(&mut self, order: &[JobHandle]) -> usize {
        if self.checkpoint.is_empty() {
            return 0;
        }

        let mut restored = 0;
        for &handle in order {
            if self.states[handle.index()].status != JobStatus::Pending {
                continue;
            }
            let label = self.graph.label(handle);
            let Some(entry) = self.checkpoint.get(label) else {
                continue;
            };
            let all_pre_restored = self
                .index
                .prerequisites(handle)
                .iter()
                .all(|p| self.states[p.index()].restored);
            if !all_pre_restored {
                continue;
            }
            if entry.fingerprint != self.graph.fingerprint(handle) {
                debug!(job = %label, "checkpoint entry is stale (fingerprint changed)");
                continue;
            }

            info!(job = %label, "restored from checkpoint; will not re-run");
            self.results.resolve(handle, entry.value.clone());
            let state = &mut self.states[handle.index()];
            state.status = JobStatus::Succeeded;
            state.restored = true;
            restored += 1;
        }
        restored
    }

    /// Begin the run: mark initially ready jobs and dispatch what fits.
    pub fn start(&mut self) -> SchedulerStep {
        info!(
            jobs = self.graph.len(),
            budget = %self.options.budget,
            max_workers = self.options.max_workers,
            "scheduler: starting run"
        );
        let mut step = SchedulerStep::default();
        self.settle(&mut step);
        step
    }

    /// Handle completion of attempt `attempt` of `handle`.
    pub fn step_completion(
        &mut self,
        handle: JobHandle,
        attempt: u32,
        outcome: JobOutcome,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(state) = self.states.get(handle.index()) else {
            warn!(job = %handle, "completion for unknown job; ignoring");
            return step;
        };
        if state.status != JobStatus::Running || state.attempts != attempt {
            warn!(
                job = %self.graph.label(handle),
                status = %state.status,
                attempt,
                current_attempt = state.attempts,
                "stale completion; ignoring"
            );
            return step;
        }

        let requested = self
            .graph
            .job(handle)
            .map(|j| j.resources)
            .unwrap_or_default();
        self.pool.release(requested);

        match outcome {
            JobOutcome::Success(output) => self.handle_success(handle, output, &mut step),
            JobOutcome::Failed(err) => self.handle_failure(handle, err, &mut step),
        }

        self.settle(&mut step);
        step
    }

    /// Cancel every job that has not started. Running jobs are left to
    /// finish; their completions are still processed.
    pub fn cancel_pending(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        self.draining = true;
        self.cancel_waiting(&mut step);
        self.check_finished(&mut step);
        step
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    fn cancel_waiting(&mut self, step: &mut SchedulerStep) {
        let waiting: Vec<JobHandle> = self
            .graph
            .handles()
            .filter(|h| {
                matches!(
                    self.states[h.index()].status,
                    JobStatus::Pending | JobStatus::Ready
                )
            })
            .collect();

        if !waiting.is_empty() {
            info!(count = waiting.len(), "cancelling jobs that have not started");
        }

        for handle in waiting {
            let mut manager = StateManager::new(&self.graph, &self.index, &mut self.states);
            step.newly_failed
                .extend(manager.mark_failed(handle, FailureKind::Cancelled));
        }
    }

    /// Checkpoint entry for a succeeded job that actually ran (restored jobs
    /// are already in the checkpoint).
    pub fn checkpoint_entry(&self, handle: JobHandle) -> Option<CheckpointEntry> {
        let state = self.states.get(handle.index())?;
        if state.status != JobStatus::Succeeded || state.restored {
            return None;
        }
        Some(CheckpointEntry {
            fingerprint: self.graph.fingerprint(handle),
            value: self.results.get(handle).cloned().unwrap_or_default(),
        })
    }

    /// Summarise the run. Can be called at any time; non-terminal jobs are
    /// reported as unfinished.
    pub fn run_result(&self) -> RunResult {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut skipped = Vec::new();
        let mut unfinished = Vec::new();

        for handle in self.graph.handles() {
            let state = &self.states[handle.index()];
            let report = JobReport {
                handle,
                label: self.graph.label(handle).to_string(),
                status: state.status,
                attempts: state.attempts,
                restored: state.restored,
                failure: state.failure.clone(),
            };
            match (state.status, &state.failure) {
                (JobStatus::Succeeded, _) => succeeded.push(report),
                (JobStatus::Failed, Some(kind)) if kind.is_skip() => skipped.push(report),
                (JobStatus::Failed, _) => failed.push(report),
                _ => unfinished.push(report),
            }
        }

        let status = if failed.is_empty() && skipped.is_empty() && unfinished.is_empty() {
            RunStatus::Succeeded
        } else {
            RunStatus::PartialFailure
        };

        RunResult {
            status,
            succeeded,
            failed,
            skipped,
            unfinished,
            dispatches: self.dispatches,
            peak_usage: self.pool.peak(),
        }
    }

    fn handle_success(&mut self, handle: JobHandle, output: JobOutput, step: &mut SchedulerStep) {
        let JobOutput { value, spawned } = output;
        self.results.resolve(handle, value);

        match spawned.filter(|g| !g.is_empty()) {
            Some(sub) => {
                let sub_len = sub.len();
                match self.graph.splice(handle, sub) {
                    Ok(added) => {
                        info!(
                            job = %self.graph.label(handle),
                            spawned = sub_len,
                            "job spawned a subgraph; waiting for it to finish"
                        );
                        self.states
                            .resize_with(self.graph.len(), JobState::default);
                        for h in &added {
                            self.states[h.index()].joined_by = Some(handle);
                        }
                        let state = &mut self.states[handle.index()];
                        state.status = JobStatus::Joining;
                        state.spawned = added.clone();
                        self.index = DependencyIndex::build(&self.graph);
                        if !self.checkpoint.is_empty() {
                            let first = added.first().map(|h| h.index()).unwrap_or(0);
                            let order: Vec<JobHandle> = self
                                .graph
                                .topological_order()
                                .unwrap_or_default()
                                .into_iter()
                                .filter(|h| h.index() >= first)
                                .collect();
                            self.restore_jobs(&order);
                        }
                        step.spawned.extend(added);
                    }
                    Err(e) => {
                        warn!(
                            job = %self.graph.label(handle),
                            error = %e,
                            "could not splice spawned jobs"
                        );
                        self.fail(
                            handle,
                            FailureKind::Execution(JobError::Spawn(e.to_string())),
                            step,
                        );
                    }
                }
            }
            None => {
                debug!(job = %self.graph.label(handle), "job Succeeded");
                self.states[handle.index()].status = JobStatus::Succeeded;
                step.newly_succeeded.push(handle);
            }
        }
    }

    fn handle_failure(&mut self, handle: JobHandle, err: JobError, step: &mut SchedulerStep) {
        let attempts = self.states[handle.index()].attempts;

        if !self.draining && self.retry_allowed(handle) {
            warn!(
                job = %self.graph.label(handle),
                attempt = attempts,
                error = %err,
                "job attempt failed; retrying"
            );
            self.states[handle.index()].status = JobStatus::Ready;
            step.retried.push(handle);
        } else {
            warn!(
                job = %self.graph.label(handle),
                attempts,
                error = %err,
                "job failed; skipping its dependents"
            );
            self.fail(handle, FailureKind::Execution(err), step);
        }
    }

    /// Whether the retry policy grants `handle` another attempt. Consumes
    /// group allowance when it does.
    fn retry_allowed(&mut self, handle: JobHandle) -> bool {
        let attempts = self.states[handle.index()].attempts;
        let group = self.graph.job(handle).and_then(|j| j.retry_group.clone());

        match (self.options.retry_policy, group) {
            (RetryPolicy::PerGroup, Some(group)) => {
                let used = self.group_retries.entry(group).or_insert(0);
                if *used + 1 < self.options.max_attempts {
                    *used += 1;
                    true
                } else {
                    false
                }
            }
            _ => attempts < self.options.max_attempts,
        }
    }

    fn fail(&mut self, handle: JobHandle, kind: FailureKind, step: &mut SchedulerStep) {
        let mut manager = StateManager::new(&self.graph, &self.index, &mut self.states);
        step.newly_failed.extend(manager.mark_failed(handle, kind));
    }

    /// Drive state forward until nothing changes, then dispatch.
    fn settle(&mut self, step: &mut SchedulerStep) {
        loop {
            let mut manager = StateManager::new(&self.graph, &self.index, &mut self.states);
            let joined = manager.resolve_joins();
            let exhausted = manager.promote_pending(&self.pool);
            let changed = !joined.is_empty() || !exhausted.is_empty();
            step.newly_succeeded.extend(joined);
            step.newly_failed.extend(exhausted);
            if !changed {
                break;
            }
        }

        if self.draining {
            self.cancel_waiting(step);
        } else {
            let dispatched = self.dispatch_ready(step);
            step.newly_scheduled.extend(dispatched);
        }
        self.check_finished(step);
    }

    fn check_finished(&mut self, step: &mut SchedulerStep) {
        if !self.finished && self.is_finished() {
            self.finished = true;
            step.run_just_finished = true;
            info!(dispatches = self.dispatches, "scheduler: all jobs terminal");
        }
    }

    /// Dispatch ready jobs while a worker is free and something fits.
    ///
    /// Best fit: the largest request (cores, then memory) that fits the
    /// remaining budget; ties go to the earliest-added job.
    fn dispatch_ready(&mut self, step: &mut SchedulerStep) -> Vec<ScheduledJob> {
        let mut dispatched = Vec::new();

        while self.pool.has_free_worker() {
            let mut best: Option<(JobHandle, Resources)> = None;
            for handle in self.graph.handles() {
                if self.states[handle.index()].status != JobStatus::Ready {
                    continue;
                }
                let requested = self
                    .graph
                    .job(handle)
                    .map(|j| j.resources)
                    .unwrap_or_default();
                if !self.pool.fits(&requested) {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((_, current)) => {
                        (requested.cores, requested.memory) > (current.cores, current.memory)
                    }
                };
                if better {
                    best = Some((handle, requested));
                }
            }

            let Some((handle, requested)) = best else {
                break;
            };

            let inputs = match self.resolve_inputs(handle) {
                Ok(inputs) => inputs,
                Err(err) => {
                    self.fail(handle, FailureKind::Execution(err), step);
                    continue;
                }
            };

            self.pool.reserve(requested);
            self.dispatches += 1;
            let state = &mut self.states[handle.index()];
            state.status = JobStatus::Running;
            state.attempts += 1;
            let attempt = state.attempts;

            let Some(spec) = self.graph.job(handle) else {
                continue;
            };
            if attempt > 1 {
                info!(job = %spec.label, attempt, %requested, "re-dispatching job");
            } else {
                info!(job = %spec.label, %requested, "dispatching job");
            }
            dispatched.push(ScheduledJob::from_spec(handle, spec, attempt, inputs));
        }

        if !dispatched.is_empty() {
            debug!(
                in_use = %self.pool.in_use(),
                running = self.pool.running(),
                "resources after dispatch"
            );
        }

        dispatched
    }

    fn resolve_inputs(&self, handle: JobHandle) -> std::result::Result<Vec<JobValue>, JobError> {
        let Some(spec) = self.graph.job(handle) else {
            return Ok(Vec::new());
        };

        spec.inputs
            .iter()
            .enumerate()
            .map(|(index, input)| match input {
                Input::Literal(value) => Ok(value.clone()),
                Input::Promise(producer) => {
                    self.results.get(*producer).cloned().ok_or_else(|| JobError::Input {
                        index,
                        reason: format!(
                            "promise of '{}' is unresolved",
                            self.graph.label(*producer)
                        ),
                    })
                }
            })
            .collect()
    }
}
