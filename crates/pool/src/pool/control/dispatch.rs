use std::sync::Arc;

use jobsys_core::Dispatch;
use tracing::{debug, instrument, warn};

use super::ControlLoop;
use crate::error::JobError;
use crate::handle::Placement;
use crate::job::PreparedJob;
use crate::policy::{self, Selection};
use crate::slot::WorkerSlot;

impl ControlLoop {
    /// Pick an executor for a ready job and hand it over.
    #[instrument(skip_all, fields(handler = %job.handler))]
    pub(super) fn dispatch(&mut self, job: PreparedJob) {
        let active: Vec<usize> = self.slots.iter().map(WorkerSlot::active).collect();
        let selection = policy::select(
            &active,
            self.settings.max_workers,
            self.settings.use_main_thread,
            self.main.active(),
        );
        debug!(?selection, slots = active.len(), main_active = self.main.active(), "selected executor");

        match selection {
            Selection::Idle(idx) => {
                self.slots[idx].cancel_idle_timer();
                self.send_to_slot(idx, job);
            }
            Selection::LeastLoaded(idx) => self.send_to_slot(idx, job),
            Selection::MainThread => self.run_on_main_thread(job),
            Selection::Spawn => match self.spawn_slot() {
                Ok(idx) => self.send_to_slot(idx, job),
                Err(e) => {
                    warn!(error = %e, "failed to spawn worker slot");
                    match policy::least_loaded(&active) {
                        Some(idx) => self.send_to_slot(idx, job),
                        None if self.settings.use_main_thread => self.run_on_main_thread(job),
                        None => {
                            let cell = Arc::clone(&job.cell);
                            self.settle(
                                &cell,
                                Err(JobError::Protocol(format!("no worker available: {e}"))),
                            );
                        }
                    }
                }
            },
        }
    }

    fn send_to_slot(&mut self, idx: usize, job: PreparedJob) {
        let PreparedJob {
            handler,
            payload,
            transfer,
            cell,
        } = job;

        let slot = &mut self.slots[idx];
        let slot_id = slot.id();
        let id = slot.next_correlation_id();
        let dispatch = Dispatch {
            id: id.clone(),
            handler,
            payload,
            transfer,
        };

        match slot.context().post(dispatch) {
            Ok(()) => {
                slot.track(id.clone(), Arc::clone(&cell));
                cell.mark_running(Placement::Slot(slot_id));
                self.counters.dispatched += 1;
                debug!(slot = slot_id, id = %id, active = slot.active(), "dispatched job");
            }
            Err(e) => {
                warn!(slot = slot_id, id = %id, error = %e, "dispatch failed");
                self.settle(
                    &cell,
                    Err(JobError::Protocol(format!(
                        "dispatch to slot {slot_id} failed: {e}"
                    ))),
                );
                self.slot_drained(idx);
            }
        }
    }

    fn run_on_main_thread(&mut self, job: PreparedJob) {
        self.counters.dispatched += 1;
        self.main.run(job, self.tx.clone());
    }
}
