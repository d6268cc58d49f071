use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use jobsys_core::{decode_line, encode_line, Dispatch, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ContextFactory, ResponseSink, WorkerContext};
use crate::error::TransportError;
use crate::slot::SlotId;

/// Spawns one child process per slot, speaking JSON lines over stdio.
///
/// The child is expected to run the worker loop from
/// [`jobsys_core::serve_stdio`] (see the `jobsys-worker` binary).
#[derive(Debug, Clone)]
pub struct ProcessContextFactory {
    binary: PathBuf,
    args: Vec<String>,
    grace: Duration,
}

impl ProcessContextFactory {
    pub fn new(binary: impl Into<PathBuf>, grace: Duration) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            grace,
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }
}

impl ContextFactory for ProcessContextFactory {
    fn spawn(
        &self,
        slot: SlotId,
        sink: ResponseSink,
    ) -> Result<Box<dyn WorkerContext>, TransportError> {
        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(TransportError::Closed);
        };

        info!(slot, pid = child.id(), binary = %self.binary.display(), "spawned worker process");

        // ── Writer: one encoded dispatch per line ────────────────────
        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let writer = tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                if let Err(e) = stdin.write_all(&line).await {
                    warn!(slot, error = %e, "failed to write to worker stdin");
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
            // Dropping stdin closes the pipe; the worker exits on EOF.
        });

        // ── Reader: responses, correlated by id upstream ─────────────
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match decode_line::<Response>(&line) {
                        Ok(response) => {
                            if !sink.deliver(response) {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(slot, error = %e, "malformed worker output");
                            sink.exited(format!("malformed worker output: {e}"));
                            break;
                        }
                    },
                    Ok(None) => {
                        sink.exited("worker process exited");
                        break;
                    }
                    Err(e) => {
                        sink.exited(format!("worker stdout failed: {e}"));
                        break;
                    }
                }
            }
        });

        Ok(Box::new(ProcessContext {
            slot,
            child,
            lines: line_tx,
            writer,
            reader,
            grace: self.grace,
        }))
    }
}

/// A worker child process.
pub struct ProcessContext {
    slot: SlotId,
    child: Child,
    lines: mpsc::UnboundedSender<Vec<u8>>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    grace: Duration,
}

#[async_trait]
impl WorkerContext for ProcessContext {
    fn post(&self, dispatch: Dispatch) -> Result<(), TransportError> {
        let line = encode_line(&dispatch)?;
        self.lines.send(line).map_err(|_| TransportError::Closed)
    }

    /// Close stdin, give the worker `grace` to exit, then kill it.
    async fn terminate(self: Box<Self>) {
        let ProcessContext {
            slot,
            mut child,
            lines,
            writer,
            reader,
            grace,
        } = *self;

        drop(lines);
        let exited = async {
            let _ = writer.await;
            child.wait().await
        };

        let outcome = tokio::time::timeout(grace, exited).await;
        match outcome {
            Ok(Ok(status)) => debug!(slot, ?status, "worker process exited"),
            Ok(Err(e)) => warn!(slot, error = %e, "failed to wait for worker process"),
            Err(_) => {
                warn!(slot, ?grace, "worker process did not exit, killing");
                if let Err(e) = child.kill().await {
                    warn!(slot, error = %e, "failed to kill worker process");
                }
            }
        }
        reader.abort();
    }
}
