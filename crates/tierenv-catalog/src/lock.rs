//! Per-file lock table
//!
//! Transitions are mutually exclusive per file identity, never globally.
//! A file is locked while its id sits in the `held` set; waiters park on a
//! condvar until the set no longer contains any id they need. Multi-file
//! acquisition takes all ids at once so two renames can never deadlock.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use tierenv_core::{Error, FileId, Result};

#[derive(Debug, Default)]
pub(crate) struct LockTable {
    held: Mutex<HashSet<FileId>>,
    released: Condvar,
}

impl LockTable {
    /// Block until every id in `ids` is free, then take them all
    pub(crate) fn acquire(&self, ids: &[&FileId]) -> Result<()> {
        let mut held = self.held.lock().map_err(|_| Error::LockPoisoned)?;
        while ids.iter().any(|id| held.contains(*id)) {
            held = self
                .released
                .wait(held)
                .map_err(|_| Error::LockPoisoned)?;
        }
        for id in ids {
            held.insert((*id).clone());
        }
        Ok(())
    }

    /// Take every id in `ids` only if all are free right now
    pub(crate) fn try_acquire(&self, ids: &[&FileId]) -> Result<bool> {
        let mut held = self.held.lock().map_err(|_| Error::LockPoisoned)?;
        if ids.iter().any(|id| held.contains(*id)) {
            return Ok(false);
        }
        for id in ids {
            held.insert((*id).clone());
        }
        Ok(true)
    }

    pub(crate) fn release(&self, ids: &[&FileId]) {
        // Tolerate poisoning: waiters on these ids must never be stranded.
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for id in ids {
            held.remove(*id);
        }
        drop(held);
        self.released.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn is_held(&self, id: &FileId) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(id))
            .unwrap_or(false)
    }
}
