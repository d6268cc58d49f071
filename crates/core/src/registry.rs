//! Handler registry: stable job-type ids mapped to compiled handlers.
//!
//! Jobs cross the worker boundary as `{handler, payload}` data. Both the
//! scheduling process and every worker build the same [`Registry`], so a
//! handler id resolves to the same code on either side.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::message::Transferable;

/// Input handed to a handler on the worker side.
#[derive(Debug, Default)]
pub struct Invocation {
    pub payload: Value,
    pub transfer: Vec<Transferable>,
}

/// Type-erased handler stored in the registry.
pub type HandlerFn = dyn Fn(Invocation) -> anyhow::Result<Value> + Send + Sync;

/// A stateful job: its serialized fields are the payload, [`Job::execute`]
/// is the behavior.
pub trait Job: Serialize + DeserializeOwned + Send + 'static {
    /// Handler id under which the job type is registered.
    const NAME: &'static str;

    type Output: Serialize + DeserializeOwned;

    fn execute(self, transfer: Vec<Transferable>) -> anyhow::Result<Self::Output>;

    /// Move transferable buffers out of the job before it is serialized.
    fn take_transfer(&mut self) -> Vec<Transferable> {
        Vec::new()
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<String, Arc<HandlerFn>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler that sees the raw payload and transfer list.
    pub fn with_raw<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Invocation) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Register a typed function job. The payload is deserialized into `P`
    /// and the return value serialized back.
    pub fn with_fn<P, R, F>(self, name: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned,
        R: Serialize,
        F: Fn(P) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let name = name.into();
        let label = name.clone();
        self.with_raw(name, move |inv: Invocation| {
            let input: P = serde_json::from_value(inv.payload)
                .with_context(|| format!("invalid payload for `{label}`"))?;
            let output = handler(input)?;
            Ok(serde_json::to_value(output)?)
        })
    }

    /// Register a stateful [`Job`] type under [`Job::NAME`].
    pub fn with_job<J: Job>(self) -> Self {
        self.with_raw(J::NAME, |inv: Invocation| {
            let job: J = serde_json::from_value(inv.payload)
                .with_context(|| format!("invalid state for job `{}`", J::NAME))?;
            let output = job.execute(inv.transfer)?;
            Ok(serde_json::to_value(output)?)
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<HandlerFn>> {
        self.handlers.get(name)
    }

    /// Registered handler ids, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Mul {
        a: i64,
        b: i64,
    }

    #[derive(Serialize, Deserialize)]
    struct Concat {
        prefix: String,
        #[serde(skip)]
        buffers: Vec<Transferable>,
    }

    impl Job for Concat {
        const NAME: &'static str = "concat";
        type Output = String;

        fn execute(self, transfer: Vec<Transferable>) -> anyhow::Result<String> {
            let total: usize = transfer.iter().map(Transferable::len).sum();
            Ok(format!("{}{}", self.prefix, total))
        }

        fn take_transfer(&mut self) -> Vec<Transferable> {
            std::mem::take(&mut self.buffers)
        }
    }

    fn call(reg: &Registry, name: &str, inv: Invocation) -> anyhow::Result<Value> {
        (reg.get(name).expect("registered"))(inv)
    }

    #[test]
    fn typed_fn_round_trips_payload() {
        let reg = Registry::new().with_fn("multiply", |m: Mul| Ok(m.a * m.b));
        let out = call(
            &reg,
            "multiply",
            Invocation {
                payload: json!({"a": 3, "b": 20}),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(out, json!(60));
    }

    #[test]
    fn bad_payload_is_a_handler_error() {
        let reg = Registry::new().with_fn("multiply", |m: Mul| Ok(m.a * m.b));
        let err = call(
            &reg,
            "multiply",
            Invocation {
                payload: json!("nope"),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("multiply"));
    }

    #[test]
    fn stateful_job_receives_transfers() {
        let reg = Registry::new().with_job::<Concat>();
        let mut job = Concat {
            prefix: "bytes=".into(),
            buffers: vec![Transferable::new(vec![0; 4]), Transferable::new(vec![0; 6])],
        };
        let transfer = job.take_transfer();
        assert!(job.buffers.is_empty());

        let out = call(
            &reg,
            "concat",
            Invocation {
                payload: serde_json::to_value(&job).unwrap(),
                transfer,
            },
        )
        .unwrap();
        assert_eq!(out, json!("bytes=10"));
    }

    #[test]
    fn names_are_sorted() {
        let reg = Registry::new()
            .with_fn("b", |(): ()| Ok(()))
            .with_fn("a", |(): ()| Ok(()));
        assert_eq!(reg.names(), vec!["a", "b"]);
        assert_eq!(reg.len(), 2);
        assert!(reg.contains("a"));
        assert!(!reg.contains("c"));
    }
}
