//! The job pool: public API over the control task.

pub(crate) mod control;

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jobsys_core::{Job, Registry};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::config::{default_worker_count, PoolConfig, PoolSettings, WorkerCountPolicy};
use crate::context::{self, ContextFactory};
use crate::error::PoolError;
use crate::handle::{HandleCell, JobHandle};
use crate::job::{JobSpec, PreparedJob};
use crate::stats::PoolStats;

use control::{terminate_all, Command, ControlLoop};

/// Builder for [`Pool`].
pub struct PoolBuilder {
    registry: Arc<Registry>,
    config: PoolConfig,
    factory: Option<Arc<dyn ContextFactory>>,
    policy: WorkerCountPolicy,
    parallelism: Option<usize>,
}

impl PoolBuilder {
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom transport instead of the one named by the config.
    pub fn context_factory(mut self, factory: Arc<dyn ContextFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Replace the default `max_workers` heuristic.
    pub fn worker_count_policy(mut self, policy: WorkerCountPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Pretend the host has `n` cores. Defaults to
    /// [`std::thread::available_parallelism`].
    pub fn parallelism(mut self, n: usize) -> Self {
        self.parallelism = Some(n);
        self
    }

    /// Validate the config, spawn `min_workers` slots and start the control
    /// task on the current Tokio runtime.
    pub fn build(self) -> Result<Pool, PoolError> {
        let runtime = Handle::try_current().map_err(|_| PoolError::Runtime)?;
        let _guard = runtime.enter();

        self.config.validate()?;
        let parallelism = self.parallelism.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        });
        let settings = self.config.resolve(self.policy, parallelism);
        let factory = self
            .factory
            .unwrap_or_else(|| context::factory_for(&self.config, Arc::clone(&self.registry)));

        let (tx, rx) = mpsc::unbounded_channel();
        let mut control = ControlLoop::new(settings, factory, Arc::clone(&self.registry), &tx);
        for _ in 0..settings.min_workers {
            let idx = control.spawn_slot()?;
            control.slot_drained(idx);
        }
        runtime.spawn(control.run(rx));

        info!(
            max_workers = settings.max_workers,
            min_workers = settings.min_workers,
            idle_timeout = ?settings.idle_timeout,
            use_main_thread = settings.use_main_thread,
            handlers = self.registry.len(),
            "job pool started"
        );

        Ok(Pool {
            tx,
            registry: self.registry,
            settings,
            terminated: AtomicBool::new(false),
        })
    }
}

/// A pool of worker slots executing registry handlers.
///
/// Every method is callable from any task. State lives in a control task
/// spawned on the runtime that built the pool.
pub struct Pool {
    tx: mpsc::UnboundedSender<Command>,
    registry: Arc<Registry>,
    settings: PoolSettings,
    terminated: AtomicBool,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("settings", &self.settings)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl Pool {
    pub fn builder(registry: impl Into<Arc<Registry>>) -> PoolBuilder {
        PoolBuilder {
            registry: registry.into(),
            config: PoolConfig::default(),
            factory: None,
            policy: default_worker_count,
            parallelism: None,
        }
    }

    pub fn new(config: PoolConfig, registry: impl Into<Arc<Registry>>) -> Result<Self, PoolError> {
        Self::builder(registry).config(config).build()
    }

    /// Settings resolved at construction.
    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Accept a job and return its handle without waiting for it.
    ///
    /// Fails synchronously after [`shutdown`](Self::shutdown) or when the
    /// job is malformed; every later failure arrives through the handle.
    pub fn schedule<T>(&self, spec: JobSpec) -> Result<JobHandle<T>, PoolError> {
        if self.is_terminated() {
            return Err(PoolError::Shutdown);
        }
        if let Some(reason) = spec.invalid {
            return Err(PoolError::InvalidJob(reason));
        }
        if spec.handler.is_empty() {
            return Err(PoolError::InvalidJob("handler id is empty".to_string()));
        }
        if !self.registry.contains(&spec.handler) {
            return Err(PoolError::InvalidJob(format!(
                "no handler registered as `{}`",
                spec.handler
            )));
        }

        let cell = HandleCell::new();
        let job = PreparedJob {
            handler: spec.handler,
            payload: spec.payload,
            transfer: spec.transfer,
            cell: Arc::clone(&cell),
        };
        debug!(handler = %job.handler, dependencies = spec.dependencies.len(), "job scheduled");

        self.tx
            .send(Command::Submit {
                job,
                dependencies: spec.dependencies,
            })
            .map_err(|_| PoolError::Shutdown)?;
        Ok(JobHandle::new(cell))
    }

    /// Schedule a stateful job.
    pub fn schedule_job<J: Job>(&self, job: J) -> Result<JobHandle<J::Output>, PoolError> {
        self.schedule(JobSpec::from_job(job))
    }

    /// Wait until no job is in flight anywhere in the pool.
    pub async fn complete(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::WhenIdle(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Stop accepting jobs and terminate every worker.
    ///
    /// With `wait`, jobs already scheduled settle first; without it they
    /// fail with a protocol error, except jobs already running on the main
    /// thread, which finish and still count toward [`complete`](Self::complete).
    /// Calling it again only re-waits.
    pub async fn shutdown(&self, wait: bool) {
        let already = self.terminated.swap(true, Ordering::AcqRel);
        if wait {
            self.complete().await;
        }
        if already {
            return;
        }

        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(Some(tx))).is_err() {
            return;
        }
        if let Ok(contexts) = rx.await {
            let count = contexts.len();
            terminate_all(contexts).await;
            info!(terminated = count, "job pool shut down");
        }
    }

    /// Snapshot of slots and counters.
    pub async fn stats(&self) -> PoolStats {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Stats(tx)).is_ok() {
            if let Ok(mut stats) = rx.await {
                stats.terminated = self.is_terminated();
                return stats;
            }
        }
        PoolStats {
            max_workers: self.settings.max_workers,
            terminated: true,
            ..PoolStats::default()
        }
    }

    /// Change `max_workers` at runtime. Surplus slots are evicted as soon
    /// as they are idle.
    pub fn resize(&self, max_workers: usize) -> Result<(), PoolError> {
        if max_workers == 0 {
            return Err(PoolError::Config(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.is_terminated() {
            return Err(PoolError::Shutdown);
        }
        self.tx
            .send(Command::Resize { max_workers })
            .map_err(|_| PoolError::Shutdown)
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Command::Shutdown(None));
        }
    }
}
