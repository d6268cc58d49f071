use std::sync::Arc;

use jobsys_core::{Executor, Registry};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::JobError;
use crate::handle::Placement;
use crate::job::PreparedJob;
use crate::pool::control::Command;

/// Fallback executor running jobs in the pool's own process, outside any
/// slot.
///
/// Jobs run on Tokio's blocking pool so the control loop never waits on
/// them; the runner only keeps the active count used for load comparison.
#[derive(Debug)]
pub(crate) struct MainThreadRunner {
    executor: Executor,
    active: usize,
}

impl MainThreadRunner {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            executor: Executor::new(registry),
            active: 0,
        }
    }

    pub fn active(&self) -> usize {
        self.active
    }

    /// Start `job`. Completion arrives as [`Command::MainThreadDone`].
    pub fn run(&mut self, job: PreparedJob, done: mpsc::WeakUnboundedSender<Command>) {
        let PreparedJob {
            handler,
            payload,
            transfer,
            cell,
        } = job;

        self.active += 1;
        cell.mark_running(Placement::MainThread);
        debug!(handler = %handler, active = self.active, "running job on main thread");

        let executor = self.executor.clone();
        tokio::task::spawn_blocking(move || {
            let outcome = executor.invoke(&handler, payload, transfer);
            let cmd = Command::MainThreadDone { cell, outcome };
            let unsent = match done.upgrade() {
                Some(tx) => tx.send(cmd).err().map(|e| e.0),
                None => Some(cmd),
            };
            // Pool gone: settle directly so waiters are released.
            if let Some(Command::MainThreadDone { cell, outcome }) = unsent {
                cell.resolve(outcome.map_err(JobError::from));
            }
        });
    }

    /// Bookkeeping for a finished job.
    pub fn finish(&mut self) {
        self.active = self.active.saturating_sub(1);
    }
}
