// src/checkpoint.rs

//! Durable results of succeeded jobs, so an interrupted run can resume.
//!
//! Each entry is keyed by job label and carries the job's content
//! fingerprint (see [`JobGraph::fingerprint`](crate::dag::JobGraph::fingerprint))
//! plus the value it published. On restart the scheduler only trusts an
//! entry whose fingerprint still matches.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dag::JobValue;

/// Default checkpoint location, relative to the work directory.
pub const CHECKPOINT_FILE_PATH: &str = ".ngsflow/checkpoint.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub fingerprint: String,
    #[serde(default)]
    pub value: JobValue,
}

/// Abstract storage for checkpoint entries.
pub trait CheckpointStore: Send {
    fn load_all(&self) -> Result<BTreeMap<String, CheckpointEntry>>;
    fn save(&mut self, label: &str, entry: CheckpointEntry) -> Result<()>;
    /// Forget everything (`--fresh`).
    fn clear(&mut self) -> Result<()>;
}

/// Stores entries in a single JSON file.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_all(&self, map: &BTreeMap<String, CheckpointEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating checkpoint directory {:?}", parent))?;
        }

        // Write to a sibling file and rename, so a crash mid-write never
        // leaves a truncated checkpoint behind.
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(map).context("serialising checkpoint")?;
        fs::write(&tmp, body).with_context(|| format!("writing checkpoint to {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("moving checkpoint into place at {:?}", self.path))?;
        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load_all(&self) -> Result<BTreeMap<String, CheckpointEntry>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("reading checkpoint file {:?}", self.path))?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let map: BTreeMap<String, CheckpointEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing checkpoint file {:?}", self.path))?;
        debug!(entries = map.len(), path = ?self.path, "loaded checkpoint");
        Ok(map)
    }

    fn save(&mut self, label: &str, entry: CheckpointEntry) -> Result<()> {
        let mut map = self.load_all()?;
        map.insert(label.to_string(), entry);
        self.write_all(&map)?;
        debug!(job = %label, "stored checkpoint entry (file)");
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("removing checkpoint file {:?}", self.path))?;
            info!(path = ?self.path, "cleared checkpoint");
        }
        Ok(())
    }
}

/// Stores entries in memory only. Clones share the same map, so a test can
/// keep one handle and inspect what a run recorded.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    map: Arc<Mutex<BTreeMap<String, CheckpointEntry>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, label: &str) -> Option<CheckpointEntry> {
        self.map.lock().ok()?.get(label).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load_all(&self) -> Result<BTreeMap<String, CheckpointEntry>> {
        let map = self
            .map
            .lock()
            .map_err(|_| anyhow!("checkpoint mutex poisoned"))?;
        Ok(map.clone())
    }

    fn save(&mut self, label: &str, entry: CheckpointEntry) -> Result<()> {
        self.map
            .lock()
            .map_err(|_| anyhow!("checkpoint mutex poisoned"))?
            .insert(label.to_string(), entry);
        debug!(job = %label, "stored checkpoint entry (memory)");
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.map
            .lock()
            .map_err(|_| anyhow!("checkpoint mutex poisoned"))?
            .clear();
        Ok(())
    }
}
