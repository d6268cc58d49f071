//! Worker-side executor.
//!
//! Each dispatch goes Idle → Executing → Replying and produces exactly one
//! [`Response`]. Handler errors and panics are converted into an
//! [`ErrorRecord`] on that response; nothing a handler does takes the
//! worker down with it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, instrument, warn};

use crate::error::ErrorRecord;
use crate::message::{decode_line, encode_line, Dispatch, Response, Transferable};
use crate::registry::{Invocation, Registry};

#[derive(Debug, Clone)]
pub struct Executor {
    registry: Arc<Registry>,
}

impl Executor {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run one handler to completion on the current thread.
    pub fn invoke(
        &self,
        handler: &str,
        payload: Value,
        transfer: Vec<Transferable>,
    ) -> Result<Value, ErrorRecord> {
        let Some(func) = self.registry.get(handler) else {
            return Err(ErrorRecord::unknown_handler(handler));
        };

        let invocation = Invocation { payload, transfer };
        match panic::catch_unwind(AssertUnwindSafe(|| func(invocation))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(ErrorRecord::from_anyhow(&err)),
            Err(payload) => Err(ErrorRecord::from_panic(payload, handler)),
        }
    }

    /// Execute a dispatch and build its tagged reply.
    #[instrument(skip_all, fields(id = %dispatch.id, handler = %dispatch.handler))]
    pub fn execute(&self, dispatch: Dispatch) -> Response {
        let Dispatch {
            id,
            handler,
            payload,
            transfer,
        } = dispatch;

        match self.invoke(&handler, payload, transfer) {
            Ok(value) => {
                debug!("dispatch succeeded");
                Response::ok(id, value)
            }
            Err(error) => {
                debug!(error = %error, "dispatch failed");
                Response::error(id, error)
            }
        }
    }
}

/// Serve dispatches over stdin/stdout as JSON lines until stdin closes.
///
/// Stdout carries nothing but responses; log to stderr.
pub async fn serve_stdio(registry: Arc<Registry>) -> std::io::Result<()> {
    let executor = Executor::new(registry);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    info!(
        pid = std::process::id(),
        handlers = executor.registry().len(),
        "worker ready"
    );

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let Some(response) = handle_line(&executor, &line).await else {
            continue;
        };

        let bytes = encode_line(&response).map_err(std::io::Error::other)?;
        stdout.write_all(&bytes).await?;
        stdout.flush().await?;
    }

    info!("stdin closed, worker exiting");
    Ok(())
}

/// Decode and execute one line. Returns `None` only when the line is so
/// malformed that no correlation id can be recovered.
async fn handle_line(executor: &Executor, line: &str) -> Option<Response> {
    let dispatch: Dispatch = match decode_line(line) {
        Ok(d) => d,
        Err(e) => {
            let id = decode_line::<Value>(line)
                .ok()
                .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_owned));
            return match id {
                Some(id) => {
                    warn!(id = %id, error = %e, "malformed dispatch");
                    Some(Response::error(
                        id,
                        ErrorRecord::new(format!("malformed dispatch: {e}"), ""),
                    ))
                }
                None => {
                    warn!(error = %e, "dropping line without correlation id");
                    None
                }
            };
        }
    };

    let id = dispatch.id.clone();
    let exec = executor.clone();
    match tokio::task::spawn_blocking(move || exec.execute(dispatch)).await {
        Ok(response) => Some(response),
        Err(e) => Some(Response::error(
            id,
            ErrorRecord::new(format!("executor task failed: {e}"), ""),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn executor() -> Executor {
        let registry = Registry::new()
            .with_fn("double", |n: i64| Ok(n * 2))
            .with_fn("fail", |(): ()| -> anyhow::Result<()> { anyhow::bail!("Fail") })
            .with_fn("panic", |(): ()| -> anyhow::Result<()> { panic!("kaboom") });
        Executor::new(Arc::new(registry))
    }

    fn dispatch(id: &str, handler: &str, payload: Value) -> Dispatch {
        Dispatch {
            id: id.into(),
            handler: handler.into(),
            payload,
            transfer: Vec::new(),
        }
    }

    #[test]
    fn success_is_tagged_with_id() {
        let resp = executor().execute(dispatch("0-1", "double", json!(21)));
        assert_eq!(resp, Response::ok("0-1", json!(42)));
    }

    #[test]
    fn error_keeps_message() {
        let resp = executor().execute(dispatch("0-2", "fail", Value::Null));
        assert_eq!(resp.id, "0-2");
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.message, "Fail");
    }

    #[test]
    fn panic_is_contained() {
        let exec = executor();
        let err = exec
            .execute(dispatch("0-3", "panic", Value::Null))
            .into_result()
            .unwrap_err();
        assert_eq!(err.message, "kaboom");

        // still usable afterwards
        let ok = exec.execute(dispatch("0-4", "double", json!(1)));
        assert_eq!(ok.into_result(), Ok(json!(2)));
    }

    #[test]
    fn unknown_handler_is_an_error_response() {
        let err = executor()
            .execute(dispatch("0-5", "missing", Value::Null))
            .into_result()
            .unwrap_err();
        assert!(err.message.contains("missing"));
    }

    #[tokio::test]
    async fn malformed_line_with_id_gets_error_reply() {
        let exec = executor();
        let resp = handle_line(&exec, r#"{"id":"7-1","payload":1}"#)
            .await
            .expect("reply");
        assert_eq!(resp.id, "7-1");
        assert!(resp.into_result().is_err());

        assert!(handle_line(&exec, "not json").await.is_none());
    }

    #[tokio::test]
    async fn well_formed_line_executes() {
        let resp = handle_line(&executor(), r#"{"id":"1-1","handler":"double","payload":4}"#)
            .await
            .expect("reply");
        assert_eq!(resp, Response::ok("1-1", json!(8)));
    }
}
