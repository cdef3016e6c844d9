//! Process-wide object directory.
//!
//! Hooks receive native dispatchable handles (`VkDevice`, `VkCommandBuffer`,
//! GL context handles) and need the wrapper the layer created for them. The
//! [`LayerService`] owns one concurrent [`Directory`] per kind of wrapper.
//!
//! The service is a singleton installed when the layer is loaded into the
//! process and removed when it is unloaded:
//!
//! ```ignore
//! let service = LayerService::init(LayerConfig::from_env());
//! // ... driver calls arrive and look up their wrappers ...
//! LayerService::shutdown();
//! ```
//!
//! Hooks take the service as an explicit argument, so tests can drive them
//! with a private instance created by [`LayerService::new`].

use std::sync::Arc;

use dashmap::DashMap;
use lumen_core::{AddonRegistry, LayerConfig};
use parking_lot::RwLock;

use crate::error::LayerError;

static SERVICE: RwLock<Option<Arc<LayerService>>> = parking_lot::const_rwlock(None);

/// Concurrent map from a native dispatchable handle to its wrapper.
pub struct Directory<T: ?Sized> {
    kind: &'static str,
    entries: DashMap<u64, Arc<T>>,
}

impl<T: ?Sized> Directory<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: DashMap::new(),
        }
    }

    /// Insert a wrapper. A previous wrapper for the same handle means the
    /// driver reused the handle without the layer seeing its destruction.
    pub fn insert(&self, handle: u64, wrapper: Arc<T>) {
        log::debug!("tracking {} {:#x}", self.kind, handle);
        if self.entries.insert(handle, wrapper).is_some() {
            log::warn!("{} {:#x} was tracked twice", self.kind, handle);
        }
    }

    /// Wrapper for `handle`. The shard lock is released before returning.
    pub fn get(&self, handle: u64) -> Option<Arc<T>> {
        self.entries.get(&handle).map(|entry| Arc::clone(entry.value()))
    }

    /// Like [`get`](Self::get), but reports a miss as an error.
    pub fn require(&self, handle: u64) -> Result<Arc<T>, LayerError> {
        self.get(handle).ok_or_else(|| {
            log::error!("lookup of unknown {} {:#x}", self.kind, handle);
            LayerError::UnknownObject {
                kind: self.kind,
                handle,
            }
        })
    }

    pub fn remove(&self, handle: u64) -> Option<Arc<T>> {
        let removed = self.entries.remove(&handle).map(|(_, wrapper)| wrapper);
        if removed.is_some() {
            log::debug!("stopped tracking {} {:#x}", self.kind, handle);
        }
        removed
    }

    /// Remove every wrapper for which `keep` returns `false`.
    pub fn retain(&self, mut keep: impl FnMut(u64, &Arc<T>) -> bool) {
        self.entries.retain(|handle, wrapper| keep(*handle, wrapper));
    }

    /// Snapshot of the tracked wrappers. No shard lock is held afterwards.
    pub fn values(&self) -> Vec<Arc<T>> {
        self.entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}

impl<T: ?Sized> std::fmt::Debug for Directory<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("kind", &self.kind)
            .field("len", &self.entries.len())
            .finish()
    }
}

/// Layer-wide state: configuration, add-ons and the per-backend directories.
#[derive(Debug)]
pub struct LayerService {
    config: LayerConfig,
    addons: Arc<AddonRegistry>,
    #[cfg(feature = "vulkan-backend")]
    pub(crate) vulkan: crate::backend::vulkan::VulkanDirectory,
    #[cfg(feature = "opengl-backend")]
    pub(crate) opengl: crate::backend::opengl::GlDirectory,
    #[cfg(feature = "d3d9-backend")]
    pub(crate) d3d9: crate::backend::d3d9::D3D9Directory,
    #[cfg(feature = "d3d11-backend")]
    pub(crate) d3d11: crate::backend::d3d11::D3D11Directory,
    #[cfg(feature = "d3d12-backend")]
    pub(crate) d3d12: crate::backend::d3d12::D3D12Directory,
}

impl LayerService {
    /// Create a standalone service that is not installed as the singleton.
    pub fn new(config: LayerConfig) -> Self {
        Self {
            config,
            addons: Arc::new(AddonRegistry::new()),
            #[cfg(feature = "vulkan-backend")]
            vulkan: crate::backend::vulkan::VulkanDirectory::default(),
            #[cfg(feature = "opengl-backend")]
            opengl: crate::backend::opengl::GlDirectory::default(),
            #[cfg(feature = "d3d9-backend")]
            d3d9: crate::backend::d3d9::D3D9Directory::default(),
            #[cfg(feature = "d3d11-backend")]
            d3d11: crate::backend::d3d11::D3D11Directory::default(),
            #[cfg(feature = "d3d12-backend")]
            d3d12: crate::backend::d3d12::D3D12Directory::default(),
        }
    }

    /// Install the singleton. A second call keeps the installed service.
    pub fn init(config: LayerConfig) -> Arc<LayerService> {
        let mut slot = SERVICE.write();
        if let Some(service) = slot.as_ref() {
            log::warn!("layer service initialized twice, keeping the existing instance");
            return Arc::clone(service);
        }
        log::debug!("initializing layer service");
        let service = Arc::new(LayerService::new(config));
        *slot = Some(Arc::clone(&service));
        service
    }

    /// The installed singleton.
    pub fn get() -> Result<Arc<LayerService>, LayerError> {
        SERVICE.read().clone().ok_or(LayerError::NotInitialized)
    }

    /// Remove the singleton and drop every tracked wrapper.
    ///
    /// Returns `false` if no service was installed.
    pub fn shutdown() -> bool {
        let Some(service) = SERVICE.write().take() else {
            return false;
        };
        let leaked = service.clear_directories();
        if leaked > 0 {
            log::warn!("{leaked} objects were still tracked at shutdown");
        }
        log::debug!("layer service shut down");
        true
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn addons(&self) -> &Arc<AddonRegistry> {
        &self.addons
    }

    fn clear_directories(&self) -> usize {
        let mut cleared = 0;
        #[cfg(feature = "vulkan-backend")]
        {
            cleared += self.vulkan.clear();
        }
        #[cfg(feature = "opengl-backend")]
        {
            cleared += self.opengl.clear();
        }
        #[cfg(feature = "d3d9-backend")]
        {
            cleared += self.d3d9.clear();
        }
        #[cfg(feature = "d3d11-backend")]
        {
            cleared += self.d3d11.clear();
        }
        #[cfg(feature = "d3d12-backend")]
        {
            cleared += self.d3d12.clear();
        }
        cleared
    }
}

static_assertions::assert_impl_all!(LayerService: Send, Sync);
static_assertions::assert_impl_all!(Directory<u32>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_insert_get_remove() {
        let directory: Directory<u32> = Directory::new("device");
        directory.insert(0x10, Arc::new(7));
        assert_eq!(directory.get(0x10).as_deref(), Some(&7));
        assert!(directory.require(0x11).is_err());
        assert_eq!(directory.remove(0x10).as_deref(), Some(&7));
        assert!(directory.is_empty());
    }

    #[test]
    fn test_directory_retain() {
        let directory: Directory<u32> = Directory::new("queue");
        directory.insert(1, Arc::new(1));
        directory.insert(2, Arc::new(2));
        directory.retain(|_, value| **value != 1);
        assert_eq!(directory.len(), 1);
        assert!(directory.get(2).is_some());
    }

    #[test]
    fn test_singleton_lifecycle() {
        // The only test touching the global slot.
        let service = LayerService::init(LayerConfig::default());
        let again = LayerService::init(LayerConfig::default().with_verbose_log(true));
        assert!(Arc::ptr_eq(&service, &again));
        assert!(!LayerService::get().unwrap().config().verbose_log);
        assert!(LayerService::shutdown());
        assert!(!LayerService::shutdown());
        assert_eq!(LayerService::get().unwrap_err(), LayerError::NotInitialized);
    }
}
