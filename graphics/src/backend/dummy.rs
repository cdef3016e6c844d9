//! In-memory object bookkeeping for the dummy drivers.
//!
//! The dummy drivers don't talk to a GPU. They hand out unique handle values,
//! remember which ones are alive, and can be told to fail allocations so
//! tests can exercise out-of-memory paths and check for leaks afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Live native objects of a dummy driver.
#[derive(Debug)]
pub struct DummyObjects {
    next: AtomicU64,
    live: Mutex<HashMap<u64, &'static str>>,
    /// Remaining successful allocations before failures start.
    budget: Mutex<Option<u32>>,
}

impl DummyObjects {
    /// Create a pool whose first handle is `first`.
    ///
    /// Distinct pools of one driver should use disjoint ranges so handle
    /// values never collide.
    pub fn new(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
            live: Mutex::new(HashMap::new()),
            budget: Mutex::new(None),
        }
    }

    /// Let `successes` more allocations succeed, then fail every following one.
    pub fn fail_after(&self, successes: u32) {
        *self.budget.lock() = Some(successes);
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        *self.budget.lock() = None;
    }

    fn take_budget(&self) -> bool {
        match self.budget.lock().as_mut() {
            None => true,
            Some(0) => false,
            Some(remaining) => {
                *remaining -= 1;
                true
            }
        }
    }

    /// Allocate a new handle of `kind`, or `None` when a failure is injected.
    pub fn allocate(&self, kind: &'static str) -> Option<u64> {
        if !self.take_budget() {
            log::trace!("DummyObjects: injected failure allocating {kind}");
            return None;
        }
        let handle = self.next.fetch_add(0x10, Ordering::Relaxed);
        log::trace!("DummyObjects: creating {kind} {handle:#x}");
        self.live.lock().insert(handle, kind);
        Some(handle)
    }

    /// Track a handle value chosen by the caller.
    pub fn insert(&self, handle: u64, kind: &'static str) {
        self.live.lock().insert(handle, kind);
    }

    /// Free a handle. Freeing an unknown handle is reported and returns `false`.
    pub fn free(&self, handle: u64) -> bool {
        match self.live.lock().remove(&handle) {
            Some(kind) => {
                log::trace!("DummyObjects: destroying {kind} {handle:#x}");
                true
            }
            None => {
                log::warn!("DummyObjects: destroying unknown object {handle:#x}");
                false
            }
        }
    }

    pub fn is_live(&self, handle: u64) -> bool {
        self.live.lock().contains_key(&handle)
    }

    pub fn kind_of(&self, handle: u64) -> Option<&'static str> {
        self.live.lock().get(&handle).copied()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn live_of_kind(&self, kind: &str) -> usize {
        self.live.lock().values().filter(|live| **live == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_free() {
        let objects = DummyObjects::new(0x1000);
        let a = objects.allocate("image").unwrap();
        let b = objects.allocate("buffer").unwrap();
        assert_ne!(a, b);
        assert_eq!(objects.live_of_kind("image"), 1);
        assert!(objects.free(a));
        assert!(!objects.free(a));
        assert_eq!(objects.live_count(), 1);
    }

    #[test]
    fn test_fail_after() {
        let objects = DummyObjects::new(0x1000);
        objects.fail_after(1);
        assert!(objects.allocate("image").is_some());
        assert!(objects.allocate("image").is_none());
        objects.clear_failures();
        assert!(objects.allocate("image").is_some());
    }
}
