// src/dag/job.rs

//! Job model: handles, inputs, promises, the invocable unit and the
//! context it runs with.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::config::SampleRecord;
use crate::context::RunContext;
use crate::dag::graph::JobGraph;
use crate::errors::JobError;
use crate::types::Resources;

/// Value produced by a job and consumed by its dependents through promises.
pub type JobValue = serde_json::Value;

/// Stable, arena-indexed reference to a job in a [`JobGraph`].
///
/// Handles are never reused: spliced (spawned) jobs are appended, so a
/// handle stays valid for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobHandle(pub(crate) usize);

impl JobHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of an edge between two jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Runs after the parent succeeded; may consume the parent's output.
    Child,
    /// Runs after the parent's whole subtree is terminal.
    FollowOn,
    /// From a spawning job to the roots of the subgraph it spawned.
    Spawn,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EdgeKind::Child => "child",
            EdgeKind::FollowOn => "follow-on",
            EdgeKind::Spawn => "spawn",
        };
        f.write_str(s)
    }
}

/// A declared input of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// A value known at graph construction time.
    Literal(JobValue),
    /// The (future) result of another job in the same graph.
    Promise(JobHandle),
}

impl Input {
    pub fn literal(value: impl Into<JobValue>) -> Self {
        Input::Literal(value.into())
    }
}

/// Typed forward reference to a job's result.
///
/// The type parameter only documents (and checks, at decode time) what the
/// producer returns; the value itself travels as a [`JobValue`].
pub struct Promise<T> {
    handle: JobHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Promise<T> {
    pub fn new(handle: JobHandle) -> Self {
        Self {
            handle,
            _marker: PhantomData,
        }
    }

    pub fn handle(&self) -> JobHandle {
        self.handle
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Promise<T> {}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Promise({})", self.handle)
    }
}

impl<T> From<Promise<T>> for Input {
    fn from(p: Promise<T>) -> Self {
        Input::Promise(p.handle)
    }
}

/// What a job body hands back on success.
#[derive(Debug, Clone, Default)]
pub struct JobOutput {
    /// Value published to the results table for promise consumers.
    pub value: JobValue,
    /// Jobs to splice into the running graph underneath this job.
    ///
    /// Handles inside the subgraph are local to it.
    pub spawned: Option<JobGraph>,
}

impl JobOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn value(value: impl Into<JobValue>) -> Self {
        Self {
            value: value.into(),
            spawned: None,
        }
    }

    pub fn spawn(graph: JobGraph) -> Self {
        Self {
            value: JobValue::Null,
            spawned: Some(graph),
        }
    }

    pub fn with_spawned(mut self, graph: JobGraph) -> Self {
        self.spawned = Some(graph);
        self
    }
}

pub type JobFuture = Pin<Box<dyn Future<Output = Result<JobOutput, JobError>> + Send + 'static>>;

/// The invocable unit of a job.
///
/// Implementations must be cheap to call repeatedly (retries call the same
/// body again with a fresh context).
pub trait JobFn: Send + Sync {
    fn call(&self, ctx: JobContext) -> JobFuture;

    /// Stable description of what the body does; part of the checkpoint
    /// fingerprint.
    fn describe(&self) -> String;
}

/// Adapter turning an async closure into a [`JobFn`].
pub struct FnJob<F> {
    name: String,
    f: F,
}

impl<F, Fut> JobFn for FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JobOutput, JobError>> + Send + 'static,
{
    fn call(&self, ctx: JobContext) -> JobFuture {
        Box::pin((self.f)(ctx))
    }

    fn describe(&self) -> String {
        format!("fn:{}", self.name)
    }
}

/// Wrap an async closure as a shareable job body.
pub fn job_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn JobFn>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JobOutput, JobError>> + Send + 'static,
{
    Arc::new(FnJob {
        name: name.into(),
        f,
    })
}

/// A body that does nothing. Used for batch roots that only exist to hang
/// children and follow-ons off.
pub fn noop() -> Arc<dyn JobFn> {
    job_fn("noop", |_ctx| async { Ok(JobOutput::empty()) })
}

/// Everything needed to add a job to a graph.
#[derive(Clone)]
pub struct JobSpec {
    pub label: String,
    pub resources: Resources,
    pub inputs: Vec<Input>,
    pub timeout: Option<Duration>,
    pub retry_group: Option<String>,
    /// Name of the sample whose record is handed to the body.
    pub sample: Option<String>,
    pub body: Arc<dyn JobFn>,
}

impl JobSpec {
    /// A job with one core and no memory reservation.
    pub fn new(label: impl Into<String>, body: Arc<dyn JobFn>) -> Self {
        Self {
            label: label.into(),
            resources: Resources::new(1, 0),
            inputs: Vec::new(),
            timeout: None,
            retry_group: None,
            sample: None,
            body,
        }
    }

    pub fn resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    pub fn cores(mut self, cores: u32) -> Self {
        self.resources.cores = cores;
        self
    }

    pub fn memory(mut self, bytes: u64) -> Self {
        self.resources.memory = bytes;
        self
    }

    pub fn input(mut self, input: impl Into<Input>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry_group(mut self, group: Option<String>) -> Self {
        self.retry_group = group;
        self
    }

    pub fn sample(mut self, sample: impl Into<String>) -> Self {
        self.sample = Some(sample.into());
        self
    }
}

impl fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpec")
            .field("label", &self.label)
            .field("resources", &self.resources)
            .field("inputs", &self.inputs)
            .field("timeout", &self.timeout)
            .field("retry_group", &self.retry_group)
            .field("sample", &self.sample)
            .field("body", &self.body.describe())
            .finish()
    }
}

/// What a job body receives when it runs.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub handle: JobHandle,
    pub label: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub resources: Resources,
    /// Run-wide, immutable configuration shared by every job.
    pub run: Arc<RunContext>,
    /// This job's own copy of its sample record.
    pub sample: Option<SampleRecord>,
    inputs: Vec<JobValue>,
}

impl JobContext {
    pub fn new(
        handle: JobHandle,
        label: String,
        attempt: u32,
        resources: Resources,
        run: Arc<RunContext>,
        sample: Option<SampleRecord>,
        inputs: Vec<JobValue>,
    ) -> Self {
        Self {
            handle,
            label,
            attempt,
            resources,
            run,
            sample,
            inputs,
        }
    }

    /// Resolved inputs, in declaration order.
    pub fn inputs(&self) -> &[JobValue] {
        &self.inputs
    }

    /// Decode input `index` into `T`.
    pub fn input<T: DeserializeOwned>(&self, index: usize) -> Result<T, JobError> {
        let value = self.inputs.get(index).ok_or_else(|| JobError::Input {
            index,
            reason: format!("job has only {} inputs", self.inputs.len()),
        })?;
        serde_json::from_value(value.clone()).map_err(|e| JobError::Input {
            index,
            reason: e.to_string(),
        })
    }
}
