//! Configuration (layered: code > env > defaults).

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::warn;

/// Global default config (lazy-initialized from env).
static DEFAULT_CONFIG: OnceLock<MeterConfig> = OnceLock::new();

pub const ENV_TRACE_DUMP: &str = "TURNMETER_TRACE_DUMP";
pub const ENV_TRACE_DIR: &str = "TURNMETER_TRACE_DIR";
pub const ENV_ROLLUP: &str = "TURNMETER_ROLLUP";
pub const ENV_BACKFILL: &str = "TURNMETER_BACKFILL";
pub const ENV_QUEUE_CAPACITY: &str = "TURNMETER_QUEUE_CAPACITY";
pub const ENV_MAX_TRACKED_RUNS: &str = "TURNMETER_MAX_TRACKED_RUNS";

/// Default bound on queued persistence jobs.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default number of runs whose markers are remembered.
pub const DEFAULT_MAX_TRACKED_RUNS: usize = 4096;

/// Settings for [`UsageMeter`](crate::meter::UsageMeter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterConfig {
    /// Write one trace file per run.
    pub trace_dump: bool,
    /// Root directory for trace dumps and rollup documents.
    pub trace_dir: PathBuf,
    /// Append each run to its conversation's rollup document.
    pub rollup: bool,
    /// Merge streamed usage into the ledger after the first summary.
    /// Disable to re-derive the combined summary on every call.
    pub backfill: bool,
    /// Bound on queued persistence jobs; further jobs are dropped.
    pub queue_capacity: usize,
    /// Runs whose markers are kept; the least recently summarized run is
    /// evicted beyond this.
    pub max_tracked_runs: usize,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            trace_dump: false,
            trace_dir: default_trace_dir(),
            rollup: true,
            backfill: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_tracked_runs: DEFAULT_MAX_TRACKED_RUNS,
        }
    }
}

impl MeterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables (`TURNMETER_*`), reading `.env` first.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let defaults = Self::default();

        let trace_dir = std::env::var_os(ENV_TRACE_DIR)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.trace_dir);

        Self {
            trace_dump: env_flag(ENV_TRACE_DUMP, defaults.trace_dump),
            trace_dir,
            rollup: env_flag(ENV_ROLLUP, defaults.rollup),
            backfill: env_flag(ENV_BACKFILL, defaults.backfill),
            queue_capacity: env_count(ENV_QUEUE_CAPACITY, defaults.queue_capacity),
            max_tracked_runs: env_count(ENV_MAX_TRACKED_RUNS, defaults.max_tracked_runs),
        }
    }

    /// Get (or create) the global default config.
    pub fn global() -> &'static MeterConfig {
        DEFAULT_CONFIG.get_or_init(Self::from_env)
    }

    pub fn with_trace_dump(mut self, enabled: bool) -> Self {
        self.trace_dump = enabled;
        self
    }

    pub fn with_trace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trace_dir = dir.into();
        self
    }

    pub fn with_rollup(mut self, enabled: bool) -> Self {
        self.rollup = enabled;
        self
    }

    pub fn with_backfill(mut self, enabled: bool) -> Self {
        self.backfill = enabled;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_max_tracked_runs(mut self, runs: usize) -> Self {
        self.max_tracked_runs = runs.max(1);
        self
    }

    /// Whether any background persistence is enabled.
    pub fn persists(&self) -> bool {
        self.trace_dump || self.rollup
    }
}

/// Parse a boolean flag. Accepts `1/0`, `true/false`, `yes/no`, `on/off`.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_flag(var: &str, default: bool) -> bool {
    match std::env::var(var) {
        Ok(raw) => parse_flag(&raw).unwrap_or_else(|| {
            warn!(var, value = %raw, "ignoring unparseable boolean flag");
            default
        }),
        Err(_) => default,
    }
}

fn env_count(var: &str, default: usize) -> usize {
    match std::env::var(var) {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                warn!(var, value = %raw, "ignoring invalid count");
                default
            }
        },
        Err(_) => default,
    }
}

fn default_trace_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "turnmeter")
        .map(|dirs| dirs.data_dir().join("traces"))
        .unwrap_or_else(|| PathBuf::from(".turnmeter").join("traces"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_flag_accepts_common_spellings() {
        for raw in ["1", "true", "YES", " on "] {
            assert_eq!(parse_flag(raw), Some(true), "{raw}");
        }
        for raw in ["0", "False", "no", "OFF"] {
            assert_eq!(parse_flag(raw), Some(false), "{raw}");
        }
        assert_eq!(parse_flag("maybe"), None);
        assert_eq!(parse_flag(""), None);
    }

    #[test]
    fn defaults_enable_rollup_and_backfill_only() {
        let config = MeterConfig::default();
        assert!(!config.trace_dump);
        assert!(config.rollup);
        assert!(config.backfill);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.max_tracked_runs, DEFAULT_MAX_TRACKED_RUNS);
        assert!(config.trace_dir.ends_with("traces"));
    }

    #[test]
    fn builder_setters_override_defaults() {
        let config = MeterConfig::new()
            .with_trace_dump(true)
            .with_trace_dir("/tmp/meter")
            .with_rollup(false)
            .with_backfill(false)
            .with_queue_capacity(0)
            .with_max_tracked_runs(0);

        assert!(config.trace_dump);
        assert_eq!(config.trace_dir, PathBuf::from("/tmp/meter"));
        assert!(!config.rollup);
        assert!(!config.backfill);
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.max_tracked_runs, 1);
        assert!(config.persists());
    }
}
