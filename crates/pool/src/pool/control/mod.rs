//! The pool's control task.
//!
//! One Tokio task owns every slot, counter and timer. Callers, contexts,
//! timers and the main-thread runner only ever send it [`Command`]s, so
//! the bookkeeping is single-threaded even though workers run in parallel.

mod dispatch;
mod lifecycle;

use std::collections::HashMap;
use std::sync::Arc;

use jobsys_core::{ErrorRecord, Registry, Response};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::PoolSettings;
use crate::context::{ContextFactory, WorkerContext};
use crate::error::JobError;
use crate::handle::{Dependency, HandleCell};
use crate::job::PreparedJob;
use crate::main_thread::MainThreadRunner;
use crate::slot::{SlotId, WorkerSlot};
use crate::stats::{PoolStats, SlotStats};

pub(crate) const SHUTDOWN_REASON: &str = "worker terminated by pool shutdown";

pub(crate) enum Command {
    /// A freshly accepted job, counted in flight from here on.
    Submit {
        job: PreparedJob,
        dependencies: Vec<Dependency>,
    },
    /// A dependency-gated job whose dependencies all settled.
    Ready { seq: u64, job: PreparedJob },
    Response {
        slot: SlotId,
        response: Response,
    },
    ContextExited {
        slot: SlotId,
        reason: String,
    },
    MainThreadDone {
        cell: Arc<HandleCell>,
        outcome: Result<Value, ErrorRecord>,
    },
    IdleExpired {
        slot: SlotId,
        generation: u64,
    },
    WhenIdle(oneshot::Sender<()>),
    Stats(oneshot::Sender<PoolStats>),
    Resize {
        max_workers: usize,
    },
    /// Stop the loop. The contexts go to the sender for termination, or are
    /// terminated in the background when nobody waits.
    Shutdown(Option<oneshot::Sender<Vec<Box<dyn WorkerContext>>>>),
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: u64,
    succeeded: u64,
    failed: u64,
    spawned: u64,
    evicted: u64,
}

/// A job parked until its dependencies settle.
struct Waiting {
    cell: Arc<HandleCell>,
    task: JoinHandle<()>,
}

pub(crate) struct ControlLoop {
    settings: PoolSettings,
    factory: Arc<dyn ContextFactory>,
    slots: Vec<WorkerSlot>,
    next_slot_id: SlotId,
    main: MainThreadRunner,
    /// Accepted jobs not yet settled. Zero means quiescent.
    in_flight: usize,
    idle_waiters: Vec<oneshot::Sender<()>>,
    waiting: HashMap<u64, Waiting>,
    next_seq: u64,
    counters: Counters,
    tx: mpsc::WeakUnboundedSender<Command>,
}

impl ControlLoop {
    pub fn new(
        settings: PoolSettings,
        factory: Arc<dyn ContextFactory>,
        registry: Arc<Registry>,
        tx: &mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            settings,
            factory,
            slots: Vec::new(),
            next_slot_id: 0,
            main: MainThreadRunner::new(registry),
            in_flight: 0,
            idle_waiters: Vec::new(),
            waiting: HashMap::new(),
            next_seq: 0,
            counters: Counters::default(),
            tx: tx.downgrade(),
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Submit { job, dependencies } => self.submit(job, dependencies),
                Command::Ready { seq, job } => {
                    self.waiting.remove(&seq);
                    self.dispatch(job);
                }
                Command::Response { slot, response } => self.on_response(slot, response),
                Command::ContextExited { slot, reason } => self.on_context_exited(slot, &reason),
                Command::MainThreadDone { cell, outcome } => {
                    self.main.finish();
                    self.settle(&cell, outcome.map_err(JobError::from));
                }
                Command::IdleExpired { slot, generation } => {
                    self.on_idle_expired(slot, generation)
                }
                Command::WhenIdle(waiter) => {
                    if self.in_flight == 0 {
                        let _ = waiter.send(());
                    } else {
                        self.idle_waiters.push(waiter);
                    }
                }
                Command::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
                Command::Resize { max_workers } => self.resize(max_workers),
                Command::Shutdown(reply) => {
                    let contexts = self.shutdown();
                    let unclaimed = match reply {
                        Some(reply) => reply.send(contexts).err(),
                        None => Some(contexts),
                    };
                    if let Some(contexts) = unclaimed {
                        tokio::spawn(terminate_all(contexts));
                    }
                    break;
                }
            }
        }

        // Main-thread jobs cannot be recalled. Keep counting them so
        // quiescence waiters see them settle.
        while self.main.active() > 0 {
            match rx.recv().await {
                Some(cmd) => self.after_shutdown(cmd),
                None => break,
            }
        }

        // Settle whatever was queued behind the shutdown.
        rx.close();
        while let Ok(cmd) = rx.try_recv() {
            self.after_shutdown(cmd);
        }
        info!("pool control loop stopped");
    }

    fn submit(&mut self, job: PreparedJob, dependencies: Vec<Dependency>) {
        self.in_flight += 1;

        let pending: Vec<Dependency> = dependencies
            .into_iter()
            .filter(|d| !d.state().is_terminal())
            .collect();
        if pending.is_empty() {
            self.dispatch(job);
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        debug!(seq, handler = %job.handler, dependencies = pending.len(), "job waiting on dependencies");

        let cell = Arc::clone(&job.cell);
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            // Settlement, success or failure, unblocks the job.
            futures::future::join_all(pending.iter().map(|d| d.settled())).await;

            let cmd = Command::Ready { seq, job };
            let unsent = match tx.upgrade() {
                Some(tx) => tx.send(cmd).err().map(|e| e.0),
                None => Some(cmd),
            };
            if let Some(Command::Ready { job, .. }) = unsent {
                job.cell
                    .resolve(Err(JobError::Protocol(SHUTDOWN_REASON.to_string())));
            }
        });
        self.waiting.insert(seq, Waiting { cell, task });
    }

    /// Terminal transition for a job the loop was tracking.
    fn settle(&mut self, cell: &HandleCell, outcome: Result<Value, JobError>) {
        if outcome.is_ok() {
            self.counters.succeeded += 1;
        } else {
            self.counters.failed += 1;
        }
        cell.resolve(outcome);

        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 {
            debug!(waiters = self.idle_waiters.len(), "pool quiescent");
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            slots: self
                .slots
                .iter()
                .map(|s| SlotStats {
                    id: s.id(),
                    active: s.active(),
                    dispatched: s.dispatched(),
                    idle_timer_armed: s.has_idle_timer(),
                })
                .collect(),
            max_workers: self.settings.max_workers,
            main_thread_active: self.main.active(),
            in_flight: self.in_flight,
            dispatched: self.counters.dispatched,
            succeeded: self.counters.succeeded,
            failed: self.counters.failed,
            spawned: self.counters.spawned,
            evicted: self.counters.evicted,
            terminated: false,
        }
    }

    fn after_shutdown(&mut self, cmd: Command) {
        match cmd {
            Command::Submit { job, .. } | Command::Ready { job, .. } => {
                job.cell
                    .resolve(Err(JobError::Protocol(SHUTDOWN_REASON.to_string())));
            }
            Command::MainThreadDone { cell, outcome } => {
                self.main.finish();
                self.settle(&cell, outcome.map_err(JobError::from));
            }
            Command::WhenIdle(waiter) => {
                if self.in_flight == 0 {
                    let _ = waiter.send(());
                } else {
                    self.idle_waiters.push(waiter);
                }
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown(Some(reply)) => {
                let _ = reply.send(Vec::new());
            }
            _ => {}
        }
    }
}

/// Terminate contexts in parallel and wait for all of them.
pub(crate) async fn terminate_all(contexts: Vec<Box<dyn WorkerContext>>) {
    futures::future::join_all(contexts.into_iter().map(|c| c.terminate())).await;
}
