//! Job handles: single-assignment futures with an observable state.
//!
//! The pool resolves a handle exactly once. Every clone of a handle, and
//! every concurrent waiter, observes the same terminal outcome.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::JobError;
use crate::slot::SlotId;

/// Lifecycle of a job. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Where a job was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Slot(SlotId),
    MainThread,
}

/// Timestamps recorded along a job's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobTimings {
    pub submitted_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Outcome storage. `Succeeded` carries the result and `Failed` the error,
/// so neither can exist without the matching state.
#[derive(Debug, Clone)]
enum Status {
    Pending,
    Running,
    Succeeded(Value),
    Failed(JobError),
}

impl Status {
    fn state(&self) -> JobState {
        match self {
            Self::Pending => JobState::Pending,
            Self::Running => JobState::Running,
            Self::Succeeded(_) => JobState::Succeeded,
            Self::Failed(_) => JobState::Failed,
        }
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    status: Status,
    placement: Option<Placement>,
    timings: JobTimings,
}

/// Shared cell behind a handle. Only the pool writes to it.
#[derive(Debug)]
pub(crate) struct HandleCell {
    tx: watch::Sender<Snapshot>,
}

impl HandleCell {
    pub(crate) fn new() -> Arc<Self> {
        let (tx, _rx) = watch::channel(Snapshot {
            status: Status::Pending,
            placement: None,
            timings: JobTimings {
                submitted_at: Utc::now(),
                dispatched_at: None,
                settled_at: None,
            },
        });
        Arc::new(Self { tx })
    }

    /// Record a confirmed dispatch. No-op unless the job is still pending.
    pub(crate) fn mark_running(&self, placement: Placement) -> bool {
        self.tx.send_if_modified(|snap| {
            if !matches!(snap.status, Status::Pending) {
                return false;
            }
            snap.status = Status::Running;
            snap.placement = Some(placement);
            snap.timings.dispatched_at = Some(Utc::now());
            true
        })
    }

    /// Terminal transition. Returns `false` if the cell was already resolved.
    pub(crate) fn resolve(&self, outcome: Result<Value, JobError>) -> bool {
        self.tx.send_if_modified(|snap| {
            if snap.status.state().is_terminal() {
                return false;
            }
            snap.status = match outcome {
                Ok(value) => Status::Succeeded(value),
                Err(err) => Status::Failed(err),
            };
            snap.timings.settled_at = Some(Utc::now());
            true
        })
    }

    fn state(&self) -> JobState {
        self.tx.borrow().status.state()
    }

    async fn settled(&self) -> Result<Value, JobError> {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|s| s.status.state().is_terminal()).await;
        let status = rx.borrow().status.clone();
        match status {
            Status::Succeeded(v) => Ok(v),
            Status::Failed(e) => Err(e),
            Status::Pending | Status::Running => {
                Err(JobError::Protocol("job handle closed before settling".into()))
            }
        }
    }
}

/// Handle to a scheduled job producing `T`.
pub struct JobHandle<T> {
    cell: Arc<HandleCell>,
    _output: PhantomData<fn() -> T>,
}

impl<T> Clone for JobHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            _output: PhantomData,
        }
    }
}

impl<T> fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("state", &self.state())
            .field("placement", &self.placement())
            .finish()
    }
}

impl<T> JobHandle<T> {
    pub(crate) fn new(cell: Arc<HandleCell>) -> Self {
        Self {
            cell,
            _output: PhantomData,
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> JobState {
        self.cell.state()
    }

    pub fn placement(&self) -> Option<Placement> {
        self.cell.tx.borrow().placement
    }

    pub fn timings(&self) -> JobTimings {
        self.cell.tx.borrow().timings
    }

    /// A type-erased view usable as another job's dependency.
    pub fn dependency(&self) -> Dependency {
        Dependency(Arc::clone(&self.cell))
    }

    /// Wait for the job to settle, without decoding the result.
    pub async fn settled(&self) -> JobState {
        let _ = self.cell.settled().await;
        self.state()
    }

    /// Raw JSON result or the job's error.
    pub async fn complete_value(&self) -> Result<Value, JobError> {
        self.cell.settled().await
    }
}

impl<T: DeserializeOwned> JobHandle<T> {
    /// Wait for the job and decode its result.
    ///
    /// Returns immediately when the job already settled.
    pub async fn complete(&self) -> Result<T, JobError> {
        let value = self.cell.settled().await?;
        serde_json::from_value(value).map_err(|e| JobError::Decode(e.to_string()))
    }
}

impl<T: DeserializeOwned + Send + 'static> IntoFuture for JobHandle<T> {
    type Output = Result<T, JobError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.complete().await })
    }
}

/// A job that must settle before another may be dispatched.
#[derive(Debug, Clone)]
pub struct Dependency(pub(crate) Arc<HandleCell>);

impl Dependency {
    /// Resolves once the job reached a terminal state, success or failure.
    pub async fn settled(&self) {
        let _ = self.0.settled().await;
    }

    pub fn state(&self) -> JobState {
        self.0.state()
    }
}

impl<T> From<&JobHandle<T>> for Dependency {
    fn from(handle: &JobHandle<T>) -> Self {
        handle.dependency()
    }
}
