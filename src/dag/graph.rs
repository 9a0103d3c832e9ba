// src/dag/graph.rs

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use blake3::Hasher;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::dag::job::{EdgeKind, Input, JobHandle, JobSpec, Promise};
use crate::errors::{NgsflowError, Result};

/// Arena-backed job graph.
///
/// Jobs live in a `Vec` and are addressed by [`JobHandle`]; the same index
/// is used for the node in the petgraph edge store, so the two never drift.
/// Nodes are only ever appended.
#[derive(Clone, Default)]
pub struct JobGraph {
    jobs: Vec<JobSpec>,
    edges: DiGraph<(), EdgeKind>,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = JobHandle> + '_ {
        (0..self.jobs.len()).map(JobHandle)
    }

    pub fn job(&self, handle: JobHandle) -> Option<&JobSpec> {
        self.jobs.get(handle.0)
    }

    pub fn label(&self, handle: JobHandle) -> &str {
        self.jobs
            .get(handle.0)
            .map(|j| j.label.as_str())
            .unwrap_or("<unknown>")
    }

    pub fn find(&self, label: &str) -> Option<JobHandle> {
        self.jobs
            .iter()
            .position(|j| j.label == label)
            .map(JobHandle)
    }

    /// Add a job. Every promise input adds an implicit child edge from the
    /// producer, which cannot close a cycle since the new job has no
    /// successors yet.
    pub fn add_job(&mut self, spec: JobSpec) -> JobHandle {
        let handle = JobHandle(self.jobs.len());
        let node = self.edges.add_node(());
        debug_assert_eq!(node.index(), handle.0);

        for input in &spec.inputs {
            if let Input::Promise(producer) = input {
                // Out-of-range producers are reported by `validate`.
                if producer.0 < handle.0 {
                    self.edges
                        .update_edge(NodeIndex::new(producer.0), node, EdgeKind::Child);
                }
            }
        }

        self.jobs.push(spec);
        handle
    }

    /// Typed promise for the result of `handle`.
    pub fn promise<T>(&self, handle: JobHandle) -> Promise<T> {
        Promise::new(handle)
    }

    /// `child` runs after `parent` succeeded.
    pub fn add_child(&mut self, parent: JobHandle, child: JobHandle) -> Result<()> {
        self.add_edge(parent, child, EdgeKind::Child)
    }

    /// `follow_on` runs after `parent` and everything below its children is
    /// terminal.
    pub fn add_follow_on(&mut self, parent: JobHandle, follow_on: JobHandle) -> Result<()> {
        self.add_edge(parent, follow_on, EdgeKind::FollowOn)
    }

    fn add_edge(&mut self, parent: JobHandle, child: JobHandle, kind: EdgeKind) -> Result<()> {
        self.check_handle(parent)?;
        self.check_handle(child)?;

        if parent == child {
            return Err(NgsflowError::Cycle(format!(
                "job '{}' cannot be its own {}",
                self.label(parent),
                kind
            )));
        }

        let (p, c) = (NodeIndex::new(parent.0), NodeIndex::new(child.0));
        if self.edges.edges_connecting(p, c).any(|e| *e.weight() == kind) {
            return Ok(());
        }

        let edge = self.edges.add_edge(p, c, kind);
        if let Err(culprit) = self.check_acyclic() {
            // The edge we just added is the last one, so removal does not
            // disturb any other edge index.
            self.edges.remove_edge(edge);
            return Err(NgsflowError::Cycle(format!(
                "{} edge '{}' -> '{}' would create a cycle involving job '{}'",
                kind,
                self.label(parent),
                self.label(child),
                self.label(culprit)
            )));
        }

        Ok(())
    }

    fn check_handle(&self, handle: JobHandle) -> Result<()> {
        if handle.0 < self.jobs.len() {
            Ok(())
        } else {
            Err(NgsflowError::UnknownJob(format!(
                "{} (graph has {} jobs)",
                handle,
                self.jobs.len()
            )))
        }
    }

    /// Direct successors of `handle` over edges of the given kind.
    pub fn successors(&self, handle: JobHandle, kind: EdgeKind) -> Vec<JobHandle> {
        let mut out: Vec<JobHandle> = self
            .edges
            .edges_directed(NodeIndex::new(handle.0), Direction::Outgoing)
            .filter(|e| *e.weight() == kind)
            .map(|e| JobHandle(e.target().index()))
            .collect();
        out.sort();
        out
    }

    /// Direct predecessors of `handle` over edges of the given kind.
    pub fn predecessors(&self, handle: JobHandle, kind: EdgeKind) -> Vec<JobHandle> {
        let mut out: Vec<JobHandle> = self
            .edges
            .edges_directed(NodeIndex::new(handle.0), Direction::Incoming)
            .filter(|e| *e.weight() == kind)
            .map(|e| JobHandle(e.source().index()))
            .collect();
        out.sort();
        out
    }

    pub fn children_of(&self, handle: JobHandle) -> Vec<JobHandle> {
        self.successors(handle, EdgeKind::Child)
    }

    pub fn follow_ons_of(&self, handle: JobHandle) -> Vec<JobHandle> {
        self.successors(handle, EdgeKind::FollowOn)
    }

    pub fn parents_of(&self, handle: JobHandle) -> Vec<JobHandle> {
        self.predecessors(handle, EdgeKind::Child)
    }

    /// Jobs with no incoming edges.
    pub fn roots(&self) -> Vec<JobHandle> {
        self.handles()
            .filter(|h| {
                self.edges
                    .edges_directed(NodeIndex::new(h.0), Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect()
    }

    /// Every job that must have succeeded before `handle` may run: its child
    /// parents plus, for each follow-on parent, that parent's gating
    /// subtree.
    pub fn prerequisites_of(&self, handle: JobHandle) -> Vec<JobHandle> {
        self.prerequisites(handle, true)
    }

    /// Like [`JobGraph::prerequisites_of`], but without jobs spliced in at
    /// run time. A spawner only succeeds once its spawned jobs did, so the
    /// spawner stands in for them.
    pub fn static_prerequisites_of(&self, handle: JobHandle) -> Vec<JobHandle> {
        self.prerequisites(handle, false)
    }

    fn prerequisites(&self, handle: JobHandle, through_spawns: bool) -> Vec<JobHandle> {
        let mut set = BTreeSet::new();
        for edge in self
            .edges
            .edges_directed(NodeIndex::new(handle.0), Direction::Incoming)
        {
            let source = JobHandle(edge.source().index());
            match edge.weight() {
                EdgeKind::Child => {
                    set.insert(source);
                }
                EdgeKind::FollowOn => {
                    set.extend(self.gating_subtree(source, handle, through_spawns));
                }
                // The spawner's body has necessarily finished before its
                // spawned jobs exist.
                EdgeKind::Spawn => {}
            }
        }
        set.into_iter().collect()
    }

    /// `parent` plus everything reachable from its child successors (and
    /// spawn successors when `through_spawns`), excluding `follow_on`
    /// itself.
    fn gating_subtree(
        &self,
        parent: JobHandle,
        follow_on: JobHandle,
        through_spawns: bool,
    ) -> Vec<JobHandle> {
        let skip = NodeIndex::new(follow_on.0);
        let mut out = vec![parent];
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut stack: Vec<NodeIndex> = self
            .edges
            .edges_directed(NodeIndex::new(parent.0), Direction::Outgoing)
            .filter(|e| *e.weight() != EdgeKind::FollowOn)
            .filter(|e| through_spawns || *e.weight() != EdgeKind::Spawn)
            .map(|e| e.target())
            .collect();

        while let Some(node) = stack.pop() {
            if node == skip || !visited.insert(node) {
                continue;
            }
            out.push(JobHandle(node.index()));
            stack.extend(
                self.edges
                    .edges_directed(node, Direction::Outgoing)
                    .filter(|e| through_spawns || *e.weight() != EdgeKind::Spawn)
                    .map(|e| e.target()),
            );
        }

        out
    }

    /// Graph of "must finish before" relations, child and implied
    /// follow-on gating edges alike. Cycle checks and topological order run
    /// on this graph.
    fn ordering_graph(&self) -> DiGraph<(), ()> {
        let mut order: DiGraph<(), ()> = DiGraph::with_capacity(self.jobs.len(), 0);
        for _ in 0..self.jobs.len() {
            order.add_node(());
        }
        for handle in self.handles() {
            let target = NodeIndex::new(handle.0);
            for pre in self.prerequisites_of(handle) {
                order.update_edge(NodeIndex::new(pre.0), target, ());
            }
            for spawner in self.predecessors(handle, EdgeKind::Spawn) {
                order.update_edge(NodeIndex::new(spawner.0), target, ());
            }
        }
        order
    }

    fn check_acyclic(&self) -> std::result::Result<(), JobHandle> {
        toposort(&self.ordering_graph(), None)
            .map(|_| ())
            .map_err(|cycle| JobHandle(cycle.node_id().index()))
    }

    /// Jobs in an order where every job comes after all its prerequisites.
    pub fn topological_order(&self) -> Result<Vec<JobHandle>> {
        toposort(&self.ordering_graph(), None)
            .map(|order| order.into_iter().map(|n| JobHandle(n.index())).collect())
            .map_err(|cycle| cycle_error(self.label(JobHandle(cycle.node_id().index()))))
    }

    /// Full validation, run before a graph is scheduled or spliced.
    pub fn validate(&self) -> Result<()> {
        let mut labels: HashSet<&str> = HashSet::new();
        for (index, job) in self.jobs.iter().enumerate() {
            if job.label.trim().is_empty() {
                return Err(NgsflowError::Config(format!(
                    "job {} has an empty label",
                    JobHandle(index)
                )));
            }
            if !labels.insert(job.label.as_str()) {
                return Err(NgsflowError::Config(format!(
                    "duplicate job label '{}'",
                    job.label
                )));
            }
            if job.resources.cores == 0 {
                return Err(NgsflowError::Config(format!(
                    "job '{}' requests 0 cores (must be >= 1)",
                    job.label
                )));
            }
            for input in &job.inputs {
                if let Input::Promise(producer) = input {
                    if producer.0 >= index {
                        return Err(NgsflowError::UnknownJob(format!(
                            "job '{}' takes a promise of {} which is not an earlier job",
                            job.label, producer
                        )));
                    }
                }
            }
        }

        self.check_acyclic()
            .map_err(|culprit| cycle_error(self.label(culprit)))
    }

    /// Append `sub` underneath `spawner`.
    ///
    /// Handles in `sub` are shifted past the current end of the arena; the
    /// subgraph's roots get a spawn edge from `spawner`. Returns the new
    /// handles in subgraph order.
    pub fn splice(&mut self, spawner: JobHandle, sub: JobGraph) -> Result<Vec<JobHandle>> {
        self.check_handle(spawner)?;
        sub.validate()?;

        for job in &sub.jobs {
            if self.find(&job.label).is_some() {
                return Err(NgsflowError::Config(format!(
                    "spawned job label '{}' already exists in the graph",
                    job.label
                )));
            }
        }

        let offset = self.jobs.len();
        let roots = sub.roots();
        let JobGraph { jobs, edges } = sub;

        let mut added = Vec::with_capacity(jobs.len());
        for mut spec in jobs {
            for input in spec.inputs.iter_mut() {
                if let Input::Promise(producer) = input {
                    *producer = JobHandle(producer.0 + offset);
                }
            }
            let node = self.edges.add_node(());
            debug_assert_eq!(node.index(), self.jobs.len());
            added.push(JobHandle(self.jobs.len()));
            self.jobs.push(spec);
        }

        for edge in edges.edge_references() {
            self.edges.add_edge(
                NodeIndex::new(edge.source().index() + offset),
                NodeIndex::new(edge.target().index() + offset),
                *edge.weight(),
            );
        }

        for root in roots {
            self.edges.add_edge(
                NodeIndex::new(spawner.0),
                NodeIndex::new(root.0 + offset),
                EdgeKind::Spawn,
            );
        }

        Ok(added)
    }

    /// Content fingerprint of a job: its label, body description and
    /// literal inputs, chained with the fingerprints of its static
    /// prerequisites. Spliced jobs are left out, so the fingerprint is the
    /// same before and after a spawner ran.
    pub fn fingerprint(&self, handle: JobHandle) -> String {
        let mut memo = HashMap::new();
        self.fingerprint_memo(handle, &mut memo)
    }

    fn fingerprint_memo(&self, handle: JobHandle, memo: &mut HashMap<JobHandle, String>) -> String {
        if let Some(fp) = memo.get(&handle) {
            return fp.clone();
        }

        let mut hasher = Hasher::new();
        if let Some(job) = self.jobs.get(handle.0) {
            hasher.update(job.label.as_bytes());
            hasher.update(b"\0");
            hasher.update(job.body.describe().as_bytes());
            for input in &job.inputs {
                hasher.update(b"\0");
                match input {
                    Input::Literal(value) => {
                        hasher.update(b"lit:");
                        hasher.update(value.to_string().as_bytes());
                    }
                    Input::Promise(producer) => {
                        hasher.update(b"promise:");
                        hasher.update(self.label(*producer).as_bytes());
                    }
                }
            }
        }

        for pre in self.static_prerequisites_of(handle) {
            let upstream = self.fingerprint_memo(pre, memo);
            hasher.update(b"\0pre:");
            hasher.update(upstream.as_bytes());
        }

        let fp = hasher.finalize().to_hex().to_string();
        memo.insert(handle, fp.clone());
        fp
    }
}

fn cycle_error(label: &str) -> NgsflowError {
    NgsflowError::Cycle(format!("cycle detected in job graph involving job '{}'", label))
}

impl fmt::Debug for JobGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self.jobs.iter().map(|j| j.label.as_str()).collect();
        f.debug_struct("JobGraph")
            .field("jobs", &labels)
            .field("edges", &self.edges.edge_count())
            .finish()
    }
}
