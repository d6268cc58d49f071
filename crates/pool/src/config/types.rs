use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Top-level config ────────────────────────────────────────────────

/// Job pool configuration.
///
/// Parsed from `jobsys.toml` with support for environment variable overrides.
/// Every field has a default, so an empty file is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on worker slots. Unset = derived from host parallelism
    /// by the pool's worker-count policy.
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Slots spawned at construction. Clamped to `max_workers`.
    #[serde(default)]
    pub min_workers: usize,

    /// Idle time after which a slot is evicted, in milliseconds. 0 = never.
    #[serde(default)]
    pub idle_timeout_ms: u64,

    /// Run a job on the caller's runtime when every slot is busier than it.
    #[serde(default)]
    pub use_main_thread: bool,

    /// How long to wait for a worker to exit on its own before giving up
    /// (threads) or killing it (processes).
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,

    /// Execution context backing each slot.
    #[serde(default)]
    pub backend: BackendConfig,
}

fn default_terminate_grace_ms() -> u64 {
    2_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            min_workers: 0,
            idle_timeout_ms: 0,
            use_main_thread: false,
            terminate_grace_ms: default_terminate_grace_ms(),
            backend: BackendConfig::default(),
        }
    }
}

// ── Backend section ─────────────────────────────────────────────────

/// Which execution context a slot wraps.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// One dedicated OS thread per slot.
    #[default]
    Thread,

    /// One child process per slot, speaking JSON lines over stdio.
    Process {
        /// Worker executable (e.g. `jobsys-worker`).
        binary: PathBuf,

        #[serde(default)]
        args: Vec<String>,
    },
}

// ── Resolved settings ───────────────────────────────────────────────

/// Settings after defaults and clamping, as the control loop uses them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_workers: usize,
    pub min_workers: usize,
    pub idle_timeout: Duration,
    pub use_main_thread: bool,
    pub terminate_grace: Duration,
}

/// Maps host parallelism to a default `max_workers`.
pub type WorkerCountPolicy = fn(usize) -> usize;

/// Default policy: half the cores on larger hosts, all but one otherwise,
/// never below one.
pub fn default_worker_count(parallelism: usize) -> usize {
    let n = if parallelism >= 6 {
        parallelism / 2
    } else {
        parallelism.saturating_sub(1)
    };
    n.max(1)
}
