use serde::Serialize;

use crate::slot::SlotId;

/// Point-in-time view of the pool, produced by the control loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub slots: Vec<SlotStats>,
    pub max_workers: usize,
    pub main_thread_active: usize,
    /// Jobs accepted and not yet settled, dependency-waiting ones included.
    pub in_flight: usize,
    /// Total dispatches, slots and main thread.
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub spawned: u64,
    pub evicted: u64,
    pub terminated: bool,
}

impl PoolStats {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_ids(&self) -> Vec<SlotId> {
        self.slots.iter().map(|s| s.id).collect()
    }

    pub fn is_quiescent(&self) -> bool {
        self.in_flight == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStats {
    pub id: SlotId,
    pub active: usize,
    pub dispatched: u64,
    pub idle_timer_armed: bool,
}
