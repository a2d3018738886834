// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The flow-mod queue.
//!
//! Rule changes accumulate here in arrival order until a flush hands them
//! to the reference monitor as one batch. Order is significant: a later
//! entry may override an earlier one at the dataplane, so the batch
//! preserves insertion order exactly. Everything ever sent is retained in
//! the pushed ledger.

use crate::error::Error;
use crate::refmon::Dataplane;
use pdb::FlowMod;
use slog::{debug, Logger};

pub struct FlowModQueue {
    pending: Vec<FlowMod>,
    pushed: Vec<FlowMod>,
    log: Logger,
}

impl FlowModQueue {
    pub fn new(log: Logger) -> Self {
        Self {
            pending: Vec::new(),
            pushed: Vec::new(),
            log,
        }
    }

    pub fn enqueue(&mut self, mods: Vec<FlowMod>) {
        self.pending.extend(mods);
    }

    /// Drain the pending list into one batch and send it. An empty pending
    /// list sends nothing. If the dataplane rejects the batch after its own
    /// retries, the batch is restored to the head of the queue and the
    /// error is returned; pending rules are never silently lost.
    pub fn flush(
        &mut self,
        dataplane: &mut dyn Dataplane,
    ) -> Result<usize, Error> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let batch = std::mem::take(&mut self.pending);
        debug!(self.log, "pushing {} flow mods", batch.len());
        match dataplane.apply(&batch) {
            Ok(()) => {
                let n = batch.len();
                self.pushed.extend(batch);
                Ok(n)
            }
            Err(e) => {
                let mut restored = batch;
                restored.append(&mut self.pending);
                self.pending = restored;
                Err(e)
            }
        }
    }

    pub fn pending(&self) -> &[FlowMod] {
        &self.pending
    }

    pub fn pushed(&self) -> &[FlowMod] {
        &self.pushed
    }
}
