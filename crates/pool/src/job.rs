use std::sync::Arc;

use jobsys_core::{Job, Transferable};
use serde::Serialize;
use serde_json::Value;

use crate::handle::{Dependency, HandleCell};

/// A job as submitted to [`Pool::schedule`](crate::Pool::schedule):
/// handler id, payload, dependencies and transfer list.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub(crate) handler: String,
    pub(crate) payload: Value,
    pub(crate) dependencies: Vec<Dependency>,
    pub(crate) transfer: Vec<Transferable>,
    /// Set when the payload could not be serialized; `schedule` rejects it.
    pub(crate) invalid: Option<String>,
}

impl JobSpec {
    /// A function job with no payload.
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            payload: Value::Null,
            dependencies: Vec::new(),
            transfer: Vec::new(),
            invalid: None,
        }
    }

    /// A stateful job: its fields become the payload, its transferable
    /// buffers move into the transfer list.
    pub fn from_job<J: Job>(mut job: J) -> Self {
        let transfer = job.take_transfer();
        Self::new(J::NAME).payload(&job).transfer(transfer)
    }

    /// Serialize `payload` as the job input.
    pub fn payload<P: Serialize + ?Sized>(mut self, payload: &P) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => self.payload = value,
            Err(e) => self.invalid = Some(format!("payload is not serializable: {e}")),
        }
        self
    }

    pub fn payload_value(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Gate dispatch on other jobs settling.
    pub fn after<I>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Dependency>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Buffers whose ownership moves to the worker on dispatch.
    pub fn transfer(mut self, buffers: impl IntoIterator<Item = Transferable>) -> Self {
        self.transfer.extend(buffers);
        self
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }
}

/// An accepted job on its way through the control loop.
#[derive(Debug)]
pub(crate) struct PreparedJob {
    pub handler: String,
    pub payload: Value,
    pub transfer: Vec<Transferable>,
    pub cell: Arc<HandleCell>,
}
