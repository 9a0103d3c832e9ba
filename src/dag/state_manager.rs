// src/dag/state_manager.rs

//! Per-run state transitions: readiness, failure propagation and joins.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::dag::graph::JobGraph;
use crate::dag::job::JobHandle;
use crate::dag::resources::ResourcePool;
use crate::dag::state::{FailureKind, JobState, JobStatus};

/// Prerequisite and dependent lists for every job, derived from the graph.
///
/// Rebuilt whenever the graph grows (a spawned subgraph is spliced in).
#[derive(Debug, Clone, Default)]
pub struct DependencyIndex {
    prerequisites: Vec<Vec<JobHandle>>,
    dependents: Vec<Vec<JobHandle>>,
}

impl DependencyIndex {
    pub fn build(graph: &JobGraph) -> Self {
        let n = graph.len();
        let mut prerequisites = Vec::with_capacity(n);
        let mut dependents: Vec<Vec<JobHandle>> = vec![Vec::new(); n];

        for handle in graph.handles() {
            let pres = graph.prerequisites_of(handle);
            for pre in &pres {
                dependents[pre.index()].push(handle);
            }
            prerequisites.push(pres);
        }

        Self {
            prerequisites,
            dependents,
        }
    }

    pub fn prerequisites(&self, handle: JobHandle) -> &[JobHandle] {
        self.prerequisites
            .get(handle.index())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependents(&self, handle: JobHandle) -> &[JobHandle] {
        self.dependents
            .get(handle.index())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// Manages per-run state transitions for jobs.
pub(crate) struct StateManager<'a> {
    graph: &'a JobGraph,
    index: &'a DependencyIndex,
    states: &'a mut Vec<JobState>,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a JobGraph,
        index: &'a DependencyIndex,
        states: &'a mut Vec<JobState>,
    ) -> Self {
        Self {
            graph,
            index,
            states,
        }
    }

    /// Move every `Pending` job whose prerequisites all succeeded to
    /// `Ready`. Jobs that could never fit the budget fail instead.
    ///
    /// Returns the jobs that failed for exceeding the budget (and their
    /// skipped dependents).
    pub fn promote_pending(&mut self, pool: &ResourcePool) -> Vec<JobHandle> {
        let candidates: Vec<JobHandle> = self
            .graph
            .handles()
            .filter(|h| {
                self.states[h.index()].status == JobStatus::Pending && self.deps_satisfied(*h)
            })
            .collect();

        let mut failed = Vec::new();
        for handle in candidates {
            // An earlier exhaustion in this loop may already have skipped it.
            if self.states[handle.index()].status != JobStatus::Pending {
                continue;
            }

            let requested = self
                .graph
                .job(handle)
                .map(|j| j.resources)
                .unwrap_or_default();

            if pool.exceeds_budget(&requested) {
                warn!(
                    job = %self.graph.label(handle),
                    %requested,
                    budget = %pool.budget(),
                    "job can never fit the resource budget"
                );
                failed.extend(self.mark_failed(
                    handle,
                    FailureKind::ResourceExhaustion {
                        requested,
                        budget: pool.budget(),
                    },
                ));
                continue;
            }

            debug!(job = %self.graph.label(handle), "prerequisites satisfied; marking Ready");
            self.states[handle.index()].status = JobStatus::Ready;
        }

        failed
    }

    /// Whether every prerequisite of `handle` has succeeded.
    pub fn deps_satisfied(&self, handle: JobHandle) -> bool {
        deps_satisfied(self.index, self.states, handle)
    }

    /// Mark `root` failed and skip everything that (transitively) depends
    /// on it. A failing spawned job also fails the job that spawned it.
    ///
    /// Returns every job newly marked failed, `root` first.
    pub fn mark_failed(&mut self, root: JobHandle, kind: FailureKind) -> Vec<JobHandle> {
        let mut newly_failed = Vec::new();
        let mut queue: Vec<(JobHandle, FailureKind)> = vec![(root, kind)];
        let mut visited: HashSet<JobHandle> = HashSet::new();

        while let Some((handle, kind)) = queue.pop() {
            if !visited.insert(handle) {
                continue;
            }
            let state = &mut self.states[handle.index()];
            if state.status.is_terminal() {
                continue;
            }

            debug!(
                job = %self.graph.label(handle),
                reason = %kind,
                "marking job Failed"
            );
            state.status = JobStatus::Failed;
            state.failure = Some(kind);
            newly_failed.push(handle);

            let upstream = self.root_cause(handle);
            for dependent in self.index.dependents(handle) {
                match self.states[dependent.index()].status {
                    JobStatus::Pending | JobStatus::Ready => queue.push((
                        *dependent,
                        FailureKind::DependencyFailure {
                            upstream: upstream.clone(),
                        },
                    )),
                    // A dependent cannot have started without this job
                    // succeeding.
                    _ => {}
                }
            }

            if let Some(owner) = self.states[handle.index()].joined_by {
                if self.states[owner.index()].status == JobStatus::Joining {
                    queue.push((
                        owner,
                        FailureKind::SpawnedSubtree {
                            failed: self.graph.label(handle).to_string(),
                        },
                    ));
                }
            }
        }

        newly_failed
    }

    /// Label of the job a skip should be blamed on: the failed job itself,
    /// or the upstream it was skipped for.
    fn root_cause(&self, handle: JobHandle) -> String {
        match &self.states[handle.index()].failure {
            Some(FailureKind::DependencyFailure { upstream }) => upstream.clone(),
            _ => self.graph.label(handle).to_string(),
        }
    }

    /// Complete every `Joining` job whose spawned subtree all succeeded.
    /// Repeats until nothing changes, so nested spawns unwind in one call.
    pub fn resolve_joins(&mut self) -> Vec<JobHandle> {
        let mut done = Vec::new();
        loop {
            let ready: Vec<JobHandle> = self
                .graph
                .handles()
                .filter(|h| {
                    let state = &self.states[h.index()];
                    state.status == JobStatus::Joining
                        && state
                            .spawned
                            .iter()
                            .all(|s| self.states[s.index()].status == JobStatus::Succeeded)
                })
                .collect();

            if ready.is_empty() {
                return done;
            }

            for handle in ready {
                debug!(job = %self.graph.label(handle), "spawned subtree finished; job Succeeded");
                self.states[handle.index()].status = JobStatus::Succeeded;
                done.push(handle);
            }
        }
    }
}

/// Shared dependency check, usable with only shared access to the states.
pub(crate) fn deps_satisfied(index: &DependencyIndex, states: &[JobState], handle: JobHandle) -> bool {
    index
        .prerequisites(handle)
        .iter()
        .all(|p| states[p.index()].status == JobStatus::Succeeded)
}
