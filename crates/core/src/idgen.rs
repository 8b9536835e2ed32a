//! ID generation for engine-produced records

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{self, AtomicU64};

/// Thread-safe generator of prefixed string ids (`err-1`, `err-2`, ...)
///
/// Each prefix gets its own counter so report ids stay dense per kind.
pub struct IdGenerator {
    counters: Mutex<HashMap<&'static str, u64>>,
    issued: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            issued: AtomicU64::new(0),
        }
    }

    /// Get the next id for `prefix`
    pub fn next_id(&self, prefix: &'static str) -> String {
        let mut counters = self.counters.lock();
        let counter = counters.entry(prefix).or_insert(0);
        *counter += 1;
        self.issued.fetch_add(1, atomic::Ordering::Relaxed);
        format!("{}-{}", prefix, counter)
    }

    /// Total ids handed out across all prefixes
    pub fn issued(&self) -> u64 {
        self.issued.load(atomic::Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
