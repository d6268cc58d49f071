use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobsys_core::{Dispatch, Executor, Registry};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{ContextFactory, ResponseSink, WorkerContext};
use crate::error::TransportError;
use crate::slot::SlotId;

/// Spawns one OS thread per slot, each running its own [`Executor`].
#[derive(Debug, Clone)]
pub struct ThreadContextFactory {
    registry: Arc<Registry>,
    grace: Duration,
}

impl ThreadContextFactory {
    pub fn new(registry: Arc<Registry>, grace: Duration) -> Self {
        Self { registry, grace }
    }
}

impl ContextFactory for ThreadContextFactory {
    fn spawn(
        &self,
        slot: SlotId,
        sink: ResponseSink,
    ) -> Result<Box<dyn WorkerContext>, TransportError> {
        let (inbox_tx, inbox_rx) = std_mpsc::channel::<Dispatch>();
        let (exited_tx, exited_rx) = oneshot::channel();
        let executor = Executor::new(Arc::clone(&self.registry));

        std::thread::Builder::new()
            .name(format!("jobsys-worker-{slot}"))
            .spawn(move || {
                // Dispatches are owned values; nothing is shared with the pool.
                while let Ok(dispatch) = inbox_rx.recv() {
                    let response = executor.execute(dispatch);
                    if !sink.deliver(response) {
                        break;
                    }
                }
                sink.exited("worker thread stopped");
                let _ = exited_tx.send(());
            })?;

        debug!(slot, "spawned worker thread");
        Ok(Box::new(ThreadContext {
            slot,
            inbox: inbox_tx,
            exited: exited_rx,
            grace: self.grace,
        }))
    }
}

/// A worker thread. Dispatches queue in its inbox and run one at a time.
pub struct ThreadContext {
    slot: SlotId,
    inbox: std_mpsc::Sender<Dispatch>,
    exited: oneshot::Receiver<()>,
    grace: Duration,
}

#[async_trait]
impl WorkerContext for ThreadContext {
    fn post(&self, dispatch: Dispatch) -> Result<(), TransportError> {
        self.inbox.send(dispatch).map_err(|_| TransportError::Closed)
    }

    /// Threads cannot be preempted: closing the inbox lets the thread exit
    /// after its current dispatch. A thread still busy after the grace
    /// period is left to finish on its own.
    async fn terminate(self: Box<Self>) {
        let ThreadContext {
            slot,
            inbox,
            exited,
            grace,
        } = *self;
        drop(inbox);

        match tokio::time::timeout(grace, exited).await {
            Ok(_) => debug!(slot, "worker thread exited"),
            Err(_) => warn!(slot, ?grace, "worker thread still busy, detaching"),
        }
    }
}
