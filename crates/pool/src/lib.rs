//! Worker-pool job scheduler.
//!
//! Jobs name a handler in a [`Registry`](jobsys_core::Registry) shared by
//! the pool and its workers. [`Pool::schedule`] returns a [`JobHandle`] at
//! once; the pool picks an idle slot, grows, load-balances or falls back
//! to the main thread, and correlates each response back by id.

pub mod config;
pub mod context;
pub mod error;
pub mod handle;
pub mod job;
mod main_thread;
mod policy;
mod pool;
pub mod slot;
pub mod stats;

pub use config::{default_worker_count, BackendConfig, PoolConfig, PoolSettings};
pub use context::{ContextFactory, ResponseSink, WorkerContext};
pub use error::{JobError, PoolError, TransportError};
pub use handle::{Dependency, JobHandle, JobState, JobTimings, Placement};
pub use job::JobSpec;
pub use pool::{Pool, PoolBuilder};
pub use slot::SlotId;
pub use stats::{PoolStats, SlotStats};

pub use jobsys_core::{builtin, ErrorRecord, Job, Registry, Transferable};
