//! Per-listener mutual exclusion for timeline mutations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// One lock per listener id. Operations on different listeners never contend.
#[derive(Default)]
pub struct ListenerLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ListenerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        // The map and the per-listener locks guard no data, a poisoned lock is still usable.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs `f` while holding the listener's lock.
    pub fn run_exclusive<T>(&self, user_id: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}
