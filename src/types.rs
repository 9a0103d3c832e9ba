use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;

/// A resource reservation (or budget): cores and memory in bytes.
///
/// Cores and memory are accounted independently; a job only fits when both
/// of its requests fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Resources {
    pub cores: u32,
    pub memory: u64,
}

impl Resources {
    pub const fn new(cores: u32, memory: u64) -> Self {
        Self { cores, memory }
    }

    /// Convenience constructor taking memory in GiB, the unit the stage
    /// configuration uses for `max_mem`.
    pub const fn gib(cores: u32, memory_gib: u64) -> Self {
        Self {
            cores,
            memory: memory_gib * GIB,
        }
    }

    /// Whether `other` fits inside `self` on both axes.
    pub fn contains(&self, other: &Resources) -> bool {
        other.cores <= self.cores && other.memory <= self.memory
    }

    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources {
            cores: self.cores.saturating_sub(other.cores),
            memory: self.memory.saturating_sub(other.memory),
        }
    }

    pub fn saturating_add(&self, other: &Resources) -> Resources {
        Resources {
            cores: self.cores.saturating_add(other.cores),
            memory: self.memory.saturating_add(other.memory),
        }
    }

    /// Memory rounded up to whole GiB (what most tools take as `-Xmx<N>g`).
    pub fn memory_gib(&self) -> u64 {
        self.memory.div_ceil(GIB)
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cores / {}", self.cores, format_memory(self.memory))
    }
}

/// Parse a memory size such as `"32G"`, `"512M"`, `"8GiB"` or `"1048576"`
/// (plain bytes). Units are binary.
pub fn parse_memory(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty memory string".to_string());
    }

    let idx = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num_part, unit_part) = s.split_at(idx);
    if num_part.is_empty() {
        return Err(format!("memory '{}' does not start with a number", s));
    }
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid memory number '{}': {}", num_part, e))?;

    let multiplier = match unit_part.trim().to_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KIB,
        "m" | "mb" | "mib" => MIB,
        "g" | "gb" | "gib" => GIB,
        "t" | "tb" | "tib" => TIB,
        other => {
            return Err(format!(
                "unsupported memory unit '{}'; expected K, M, G or T",
                other
            ));
        }
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("memory '{}' is too large", s))
}

/// Human-readable memory size, using the largest exact binary unit.
pub fn format_memory(bytes: u64) -> String {
    if bytes == u64::MAX {
        return "unlimited".to_string();
    }
    for (unit, size) in [("T", TIB), ("G", GIB), ("M", MIB), ("K", KIB)] {
        if bytes >= size && bytes % size == 0 {
            return format!("{}{}", bytes / size, unit);
        }
    }
    format!("{}B", bytes)
}

/// Parse durations like `"500ms"`, `"30s"`, `"15m"` or `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

/// How retry attempts are counted.
///
/// - `PerJob`: every job may run up to `max_attempts` times.
/// - `PerGroup`: jobs sharing a `retry_group` share one allowance of
///   `max_attempts - 1` retries between them (e.g. all variant callers of a
///   sample). Jobs without a group fall back to per-job counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RetryPolicy {
    PerJob,
    PerGroup,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::PerJob
    }
}

impl FromStr for RetryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "per-job" | "job" => Ok(RetryPolicy::PerJob),
            "per-group" | "group" => Ok(RetryPolicy::PerGroup),
            other => Err(format!(
                "invalid retry_policy: {other} (expected \"per-job\" or \"per-group\")"
            )),
        }
    }
}
