use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::error::PoolError;

use super::types::{BackendConfig, PoolConfig, PoolSettings, WorkerCountPolicy};

impl PoolConfig {
    /// Parse config from a TOML string, then apply env overrides and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, PoolError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PoolError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus env overrides, for hosts without a config file.
    pub fn from_env() -> Result<Self, PoolError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Config for a process-backed pool running `binary`.
    pub fn process(binary: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendConfig::Process {
                binary: binary.into(),
                args: Vec::new(),
            },
            ..Self::default()
        }
    }

    /// Apply defaults and clamping.
    ///
    /// `policy` supplies `max_workers` when the config leaves it unset.
    /// `min_workers` above `max_workers` is clamped, not rejected.
    pub fn resolve(&self, policy: WorkerCountPolicy, parallelism: usize) -> PoolSettings {
        let max_workers = self.max_workers.unwrap_or_else(|| policy(parallelism)).max(1);
        let min_workers = if self.min_workers > max_workers {
            warn!(
                min_workers = self.min_workers,
                max_workers, "min_workers exceeds max_workers, clamping"
            );
            max_workers
        } else {
            self.min_workers
        };

        PoolSettings {
            max_workers,
            min_workers,
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            use_main_thread: self.use_main_thread,
            terminate_grace: Duration::from_millis(self.terminate_grace_ms),
        }
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// - `JOBSYS_MAX_WORKERS` -> `max_workers`
    /// - `JOBSYS_MIN_WORKERS` -> `min_workers`
    /// - `JOBSYS_IDLE_TIMEOUT_MS` -> `idle_timeout_ms`
    /// - `JOBSYS_USE_MAIN_THREAD` -> `use_main_thread`
    /// - `JOBSYS_WORKER_BINARY` -> `backend = process` with that binary
    pub fn apply_env_overrides(&mut self) -> Result<(), PoolError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), PoolError> {
        if let Some(v) = lookup("JOBSYS_MAX_WORKERS") {
            self.max_workers = Some(parse_override("JOBSYS_MAX_WORKERS", &v)?);
        }
        if let Some(v) = lookup("JOBSYS_MIN_WORKERS") {
            self.min_workers = parse_override("JOBSYS_MIN_WORKERS", &v)?;
        }
        if let Some(v) = lookup("JOBSYS_IDLE_TIMEOUT_MS") {
            self.idle_timeout_ms = parse_override("JOBSYS_IDLE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("JOBSYS_USE_MAIN_THREAD") {
            self.use_main_thread = parse_override("JOBSYS_USE_MAIN_THREAD", &v)?;
        }
        if let Some(v) = lookup("JOBSYS_WORKER_BINARY") {
            let args = match &self.backend {
                BackendConfig::Process { args, .. } => args.clone(),
                BackendConfig::Thread => Vec::new(),
            };
            self.backend = BackendConfig::Process {
                binary: PathBuf::from(v),
                args,
            };
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, PoolError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| PoolError::Config(format!("{key}={value:?} is invalid: {e}")))
}
