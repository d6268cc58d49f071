use jobsys_core::Response;
use tracing::{debug, info, warn};

use super::{Command, ControlLoop, SHUTDOWN_REASON};
use crate::context::{ResponseSink, WorkerContext};
use crate::error::{JobError, TransportError};
use crate::slot::{IdleTimer, SlotId, WorkerSlot};

impl ControlLoop {
    // ── Spawn ────────────────────────────────────────────────────────

    /// Start a new slot and return its position.
    pub(crate) fn spawn_slot(&mut self) -> Result<usize, TransportError> {
        let tx = self.tx.upgrade().ok_or(TransportError::Closed)?;
        let id = self.next_slot_id;
        let context = self.factory.spawn(id, ResponseSink::new(id, tx))?;
        self.next_slot_id += 1;

        self.slots.push(WorkerSlot::new(id, context));
        self.counters.spawned += 1;
        info!(slot = id, slots = self.slots.len(), "spawned worker slot");
        Ok(self.slots.len() - 1)
    }

    fn position(&self, slot: SlotId) -> Option<usize> {
        self.slots.iter().position(|s| s.id() == slot)
    }

    // ── Responses ────────────────────────────────────────────────────

    pub(super) fn on_response(&mut self, slot: SlotId, response: Response) {
        let Some(idx) = self.position(slot) else {
            debug!(slot, id = %response.id, "response from unknown slot, ignoring");
            return;
        };
        let Some(cell) = self.slots[idx].take(&response.id) else {
            debug!(slot, id = %response.id, "unknown correlation id, ignoring");
            return;
        };

        self.settle(&cell, response.into_result().map_err(JobError::from));
        self.slot_drained(idx);
    }

    /// React to a slot possibly reaching zero active jobs.
    pub(crate) fn slot_drained(&mut self, idx: usize) {
        if self.slots[idx].active() != 0 {
            return;
        }
        if self.slots.len() > self.settings.max_workers {
            self.evict(idx, "over capacity");
        } else if !self.settings.idle_timeout.is_zero() {
            self.arm_idle_timer(idx);
        }
    }

    /// A worker went away by itself. Everything it still owed fails.
    pub(super) fn on_context_exited(&mut self, slot: SlotId, reason: &str) {
        let Some(idx) = self.position(slot) else {
            debug!(slot, reason, "exit of a slot no longer in the pool");
            return;
        };

        let mut removed = self.slots.remove(idx);
        let orphaned = removed.drain_in_flight();
        warn!(slot, reason, orphaned = orphaned.len(), "worker context exited");

        for (id, cell) in orphaned {
            debug!(slot, id = %id, "failing job of exited worker");
            self.settle(
                &cell,
                Err(JobError::Protocol(format!(
                    "worker exited mid-dispatch: {reason}"
                ))),
            );
        }
        tokio::spawn(removed.into_context().terminate());
    }

    // ── Idle eviction ────────────────────────────────────────────────

    fn arm_idle_timer(&mut self, idx: usize) {
        let timeout = self.settings.idle_timeout;
        let slot = &mut self.slots[idx];
        let slot_id = slot.id();
        let generation = slot.next_timer_generation();

        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::IdleExpired {
                    slot: slot_id,
                    generation,
                });
            }
        });
        slot.arm_idle_timer(IdleTimer::new(generation, task));
        debug!(slot = slot_id, ?timeout, "idle timer armed");
    }

    pub(super) fn on_idle_expired(&mut self, slot: SlotId, generation: u64) {
        let Some(idx) = self.position(slot) else {
            return;
        };
        let current = &self.slots[idx];
        if !current.timer_is_current(generation) || current.active() != 0 {
            debug!(slot, generation, "stale idle timer");
            return;
        }
        self.evict(idx, "idle timeout");
    }

    fn evict(&mut self, idx: usize, reason: &'static str) {
        let slot = self.slots.remove(idx);
        self.counters.evicted += 1;
        info!(slot = slot.id(), reason, slots = self.slots.len(), "evicting worker slot");
        tokio::spawn(slot.into_context().terminate());
    }

    // ── Resize ───────────────────────────────────────────────────────

    /// Change `max_workers`. Idle surplus slots go at once, busy ones as
    /// they drain.
    pub(super) fn resize(&mut self, max_workers: usize) {
        let max_workers = max_workers.max(1);
        self.settings.max_workers = max_workers;
        self.settings.min_workers = self.settings.min_workers.min(max_workers);

        while self.slots.len() > max_workers {
            let Some(idx) = self.slots.iter().rposition(|s| s.active() == 0) else {
                break;
            };
            self.evict(idx, "pool resized");
        }
        info!(
            max_workers,
            slots = self.slots.len(),
            "pool resized"
        );
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Fail everything still owed and hand back the contexts.
    pub(super) fn shutdown(&mut self) -> Vec<Box<dyn WorkerContext>> {
        for (_, waiting) in self.waiting.drain().collect::<Vec<_>>() {
            waiting.task.abort();
            self.settle(
                &waiting.cell,
                Err(JobError::Protocol(SHUTDOWN_REASON.to_string())),
            );
        }

        let mut contexts = Vec::with_capacity(self.slots.len());
        for mut slot in std::mem::take(&mut self.slots) {
            for (_, cell) in slot.drain_in_flight() {
                self.settle(&cell, Err(JobError::Protocol(SHUTDOWN_REASON.to_string())));
            }
            contexts.push(slot.into_context());
        }

        if self.in_flight == 0 {
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }

        info!(
            terminating = contexts.len(),
            main_thread_active = self.main.active(),
            "pool shutting down"
        );
        contexts
    }
}
