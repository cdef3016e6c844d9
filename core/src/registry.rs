//! Native handle registry.
//!
//! Every backend device maps the native handles it has seen to metadata
//! records (creation descriptors, allocations, ownership). The tables of one
//! device share a single lock: backends wrap their set of [`ObjectTable`]s in
//! one [`HandleRegistry`], so all bookkeeping of a device is serialized while
//! different devices never contend.
//!
//! # Lookup semantics
//!
//! * [`ObjectTable::get`] is a plain query. Use it for validity checks
//!   requested by add-ons, where a miss is a legal answer.
//! * [`ObjectTable::resolve`] is for handles that must exist (the layer
//!   itself registered them). A miss there is a contract violation: it
//!   asserts in debug builds and logs and degrades in release builds.
//!
//! # Example
//!
//! ```ignore
//! struct Tables {
//!     resources: ObjectTable<ResourceRecord>,
//!     views: ObjectTable<ViewRecord>,
//! }
//!
//! let registry = HandleRegistry::new(Tables::default());
//! registry.lock().resources.register(image, record)?;
//! ```

use std::collections::HashMap;

use parking_lot::{Mutex, MutexGuard};

use crate::error::TrackingError;

/// Map from a native handle value to its metadata record.
#[derive(Debug)]
pub struct ObjectTable<V> {
    name: &'static str,
    entries: HashMap<u64, V>,
}

impl<V> Default for ObjectTable<V> {
    fn default() -> Self {
        Self::new("object")
    }
}

impl<V> ObjectTable<V> {
    /// Create an empty table. `name` is used in diagnostics.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: HashMap::new(),
        }
    }

    /// Register `value` under `handle`.
    ///
    /// Registering a handle twice is a contract violation; the old record is
    /// kept and an error is returned.
    pub fn register(&mut self, handle: u64, value: V) -> Result<(), TrackingError> {
        if self.entries.contains_key(&handle) {
            log::error!("{} {:#x} registered twice", self.name, handle);
            debug_assert!(false, "{} {:#x} registered twice", self.name, handle);
            return Err(TrackingError::AlreadyRegistered(handle));
        }
        log::trace!("registering {} {:#x}", self.name, handle);
        self.entries.insert(handle, value);
        Ok(())
    }

    /// Register `value` under `handle`, replacing any previous record.
    ///
    /// Used where the driver legitimately recycles handle values, such as
    /// surfaces returned by repeated `GetSurfaceLevel` calls.
    pub fn register_or_replace(&mut self, handle: u64, value: V) -> Option<V> {
        self.entries.insert(handle, value)
    }

    /// Look up a handle, reporting a miss as an error without asserting.
    pub fn lookup(&self, handle: u64) -> Result<&V, TrackingError> {
        self.entries
            .get(&handle)
            .ok_or(TrackingError::NotFound(handle))
    }

    /// Look up a handle without any diagnostics.
    pub fn get(&self, handle: u64) -> Option<&V> {
        self.entries.get(&handle)
    }

    pub fn get_mut(&mut self, handle: u64) -> Option<&mut V> {
        self.entries.get_mut(&handle)
    }

    /// Look up a handle that must be registered.
    pub fn resolve(&self, handle: u64) -> Option<&V> {
        let value = self.entries.get(&handle);
        if value.is_none() {
            log::error!("lookup of unknown {} {:#x}", self.name, handle);
            debug_assert!(false, "lookup of unknown {} {:#x}", self.name, handle);
        }
        value
    }

    /// Remove a handle, returning its record.
    pub fn unregister(&mut self, handle: u64) -> Option<V> {
        let value = self.entries.remove(&handle);
        if value.is_some() {
            log::trace!("unregistered {} {:#x}", self.name, handle);
        }
        value
    }

    pub fn contains(&self, handle: u64) -> bool {
        self.entries.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(handle, record)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &V)> {
        self.entries.iter().map(|(handle, value)| (*handle, value))
    }

    /// Remove records matching `predicate`, returning them.
    pub fn drain_where(&mut self, mut predicate: impl FnMut(u64, &V) -> bool) -> Vec<(u64, V)> {
        let handles: Vec<u64> = self
            .entries
            .iter()
            .filter(|(handle, value)| predicate(**handle, value))
            .map(|(handle, _)| *handle)
            .collect();
        handles
            .into_iter()
            .filter_map(|handle| self.entries.remove(&handle).map(|value| (handle, value)))
            .collect()
    }

    /// Remove every record.
    pub fn drain(&mut self) -> Vec<(u64, V)> {
        self.entries.drain().collect()
    }
}

/// The tables of one device behind a single mutex.
#[derive(Debug, Default)]
pub struct HandleRegistry<T> {
    tables: Mutex<T>,
}

impl<T> HandleRegistry<T> {
    pub fn new(tables: T) -> Self {
        Self {
            tables: Mutex::new(tables),
        }
    }

    /// Lock the device tables.
    ///
    /// The guard must not be held while add-on events are dispatched, since
    /// add-ons may call back into the device.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.tables.lock()
    }

    /// Run `f` with the tables locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.tables.lock())
    }
}

static_assertions::assert_impl_all!(HandleRegistry<ObjectTable<u64>>: Send, Sync);
