// src/dag/results.rs

use std::collections::HashMap;

use tracing::warn;

use crate::dag::job::{JobHandle, JobValue};

/// Resolved promise values, keyed by producing job.
///
/// Each entry is written exactly once, when the producer's body succeeds,
/// and is read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ResultsTable {
    values: HashMap<JobHandle, JobValue>,
}

impl ResultsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the value for `handle`. Returns `false` (and keeps the first
    /// value) if it was already resolved.
    pub fn resolve(&mut self, handle: JobHandle, value: JobValue) -> bool {
        if self.values.contains_key(&handle) {
            warn!(job = %handle, "promise already resolved; keeping the first value");
            return false;
        }
        self.values.insert(handle, value);
        true
    }

    pub fn get(&self, handle: JobHandle) -> Option<&JobValue> {
        self.values.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
