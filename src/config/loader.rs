// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{RawRuntimeConfig, RuntimeConfig};
use crate::config::samples::{SampleSheet, parse_samples};
use crate::errors::{NgsflowError, Result};

/// Load a runtime configuration file and return the raw `RawRuntimeConfig`.
///
/// This only performs TOML deserialization; it does **not** perform
/// semantic validation. Use [`load_runtime_config`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawRuntimeConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        NgsflowError::Config(format!("cannot read runtime config {:?}: {}", path, e))
    })?;
    let config: RawRuntimeConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Parse and validate runtime configuration from a TOML string.
pub fn parse_runtime_config(contents: &str) -> Result<RuntimeConfig> {
    let raw: RawRuntimeConfig = toml::from_str(contents)?;
    RuntimeConfig::try_from(raw)
}

/// Load a runtime configuration file and validate it.
pub fn load_runtime_config(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
    let raw = load_from_path(&path)?;
    let config = RuntimeConfig::try_from(raw)?;
    debug!(
        path = ?path.as_ref(),
        stages = config.stages.len(),
        "loaded runtime configuration"
    );
    Ok(config)
}

/// Load and parse a samples file.
pub fn load_samples(path: impl AsRef<Path>) -> Result<SampleSheet> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .map_err(|e| NgsflowError::Config(format!("cannot read samples file {:?}: {}", path, e)))?;
    let samples = parse_samples(&contents)?;
    debug!(path = ?path, samples = samples.len(), "loaded samples");
    Ok(samples)
}

/// Default runtime configuration path: `ngsflow.toml` in the current
/// directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("ngsflow.toml")
}
