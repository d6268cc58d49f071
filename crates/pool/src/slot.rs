use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::context::WorkerContext;
use crate::handle::HandleCell;

pub type SlotId = u64;

/// Pending eviction for an idle slot. Dropping it cancels the timer.
#[derive(Debug)]
pub(crate) struct IdleTimer {
    pub generation: u64,
    task: JoinHandle<()>,
}

impl IdleTimer {
    pub fn new(generation: u64, task: JoinHandle<()>) -> Self {
        Self { generation, task }
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One pool member wrapping an execution context.
///
/// The active count is the number of dispatches awaiting a response, so it
/// cannot drift from the correlation table.
pub(crate) struct WorkerSlot {
    id: SlotId,
    context: Box<dyn WorkerContext>,
    counter: u64,
    in_flight: HashMap<String, Arc<HandleCell>>,
    idle_timer: Option<IdleTimer>,
    timer_generation: u64,
    dispatched: u64,
}

impl WorkerSlot {
    pub fn new(id: SlotId, context: Box<dyn WorkerContext>) -> Self {
        Self {
            id,
            context,
            counter: 0,
            in_flight: HashMap::new(),
            idle_timer: None,
            timer_generation: 0,
            dispatched: 0,
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn active(&self) -> usize {
        self.in_flight.len()
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub fn context(&self) -> &dyn WorkerContext {
        self.context.as_ref()
    }

    /// Next correlation id: slot id plus a per-slot counter in base 36.
    pub fn next_correlation_id(&mut self) -> String {
        self.counter += 1;
        format!("{}-{}", self.id, to_base36(self.counter))
    }

    pub fn track(&mut self, id: String, cell: Arc<HandleCell>) {
        self.dispatched += 1;
        self.in_flight.insert(id, cell);
    }

    /// Remove and return the handle waiting on `id`, if any.
    pub fn take(&mut self, id: &str) -> Option<Arc<HandleCell>> {
        self.in_flight.remove(id)
    }

    /// Every handle still waiting on this slot.
    pub fn drain_in_flight(&mut self) -> Vec<(String, Arc<HandleCell>)> {
        self.in_flight.drain().collect()
    }

    // ── Idle timer ───────────────────────────────────────────────────

    pub fn has_idle_timer(&self) -> bool {
        self.idle_timer.is_some()
    }

    /// Reserve a generation for a new timer. Any older timer is cancelled.
    pub fn next_timer_generation(&mut self) -> u64 {
        self.cancel_idle_timer();
        self.timer_generation += 1;
        self.timer_generation
    }

    pub fn arm_idle_timer(&mut self, timer: IdleTimer) {
        self.idle_timer = Some(timer);
    }

    pub fn cancel_idle_timer(&mut self) {
        self.idle_timer = None;
    }

    /// Whether an expiry message for `generation` still refers to the
    /// current timer.
    pub fn timer_is_current(&self, generation: u64) -> bool {
        self.idle_timer
            .as_ref()
            .is_some_and(|t| t.generation == generation)
    }

    pub fn into_context(mut self) -> Box<dyn WorkerContext> {
        self.cancel_idle_timer();
        self.context
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}
