//! Execution contexts behind worker slots.
//!
//! A context is a generic async request/response channel: the pool posts
//! [`Dispatch`]es into it and the context reports each [`Response`] through
//! the shared [`ResponseSink`], tagged with its slot id. Correlation is by
//! id only, never by position.

mod process;
mod thread;

use std::sync::Arc;

use async_trait::async_trait;
use jobsys_core::{Dispatch, Registry, Response};
use tokio::sync::mpsc;

use crate::config::{BackendConfig, PoolConfig};
use crate::error::TransportError;
use crate::pool::control::Command;
use crate::slot::SlotId;

pub use process::{ProcessContext, ProcessContextFactory};
pub use thread::{ThreadContext, ThreadContextFactory};

/// One independently executing worker.
#[async_trait]
pub trait WorkerContext: Send + Sync {
    /// Hand a dispatch to the worker. Must not block on execution.
    fn post(&self, dispatch: Dispatch) -> Result<(), TransportError>;

    /// Stop the worker and wait for it to go away.
    async fn terminate(self: Box<Self>);
}

/// Creates contexts for newly spawned slots.
pub trait ContextFactory: Send + Sync {
    fn spawn(
        &self,
        slot: SlotId,
        sink: ResponseSink,
    ) -> Result<Box<dyn WorkerContext>, TransportError>;
}

/// The slot's end of the shared response channel.
#[derive(Debug, Clone)]
pub struct ResponseSink {
    slot: SlotId,
    tx: mpsc::UnboundedSender<Command>,
}

impl ResponseSink {
    pub(crate) fn new(slot: SlotId, tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { slot, tx }
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Report a response. Returns `false` once the pool is gone.
    pub fn deliver(&self, response: Response) -> bool {
        self.tx
            .send(Command::Response {
                slot: self.slot,
                response,
            })
            .is_ok()
    }

    /// Report that the worker stopped; its in-flight jobs fail.
    pub fn exited(&self, reason: impl Into<String>) {
        let _ = self.tx.send(Command::ContextExited {
            slot: self.slot,
            reason: reason.into(),
        });
    }
}

/// Build the factory named by the config's backend section.
pub fn factory_for(config: &PoolConfig, registry: Arc<Registry>) -> Arc<dyn ContextFactory> {
    let grace = std::time::Duration::from_millis(config.terminate_grace_ms);
    match &config.backend {
        BackendConfig::Thread => Arc::new(ThreadContextFactory::new(registry, grace)),
        BackendConfig::Process { binary, args } => Arc::new(
            ProcessContextFactory::new(binary.clone(), grace).args(args.iter().cloned()),
        ),
    }
}
