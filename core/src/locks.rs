//! Per-subject recalculation locks.
//!
//! RULES:
//!   - At most one recalculation per subject runs at a time; different subjects never wait
//!     on each other.
//!   - A waiter gives up after the configured timeout with ENGINE_BUSY. It never runs
//!     without the lock.
//!   - A slot is removed from the table once nobody holds or waits on it.

use crate::{
    error::{TrustError, TrustResult},
    types::SubjectId,
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};

#[derive(Debug, Default)]
pub struct SubjectLocks {
    slots: Mutex<HashMap<SubjectId, Arc<Mutex<()>>>>,
}

impl SubjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the subject's lock.
    pub fn with_lock<T>(
        &self,
        subject_id: &str,
        timeout:    Duration,
        f:          impl FnOnce() -> TrustResult<T>,
    ) -> TrustResult<T> {
        let slot = self.slot(subject_id);
        let result = match slot.try_lock_for(timeout) {
            Some(guard) => {
                let out = f();
                drop(guard);
                out
            }
            None => {
                log::warn!("subject={subject_id} lock wait exceeded {timeout:?}");
                Err(TrustError::EngineBusy { subject_id: subject_id.to_string() })
            }
        };
        drop(slot);
        self.release(subject_id);
        result
    }

    /// Number of subjects with a holder or waiter.
    pub fn in_flight(&self) -> usize {
        self.slots.lock().len()
    }

    fn slot(&self, subject_id: &str) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(subject_id.to_string()).or_default())
    }

    fn release(&self, subject_id: &str) {
        let mut slots = self.slots.lock();
        // Every clone is taken under the table lock, so a count of one means idle.
        if slots.get(subject_id).is_some_and(|s| Arc::strong_count(s) == 1) {
            slots.remove(subject_id);
        }
    }
}
