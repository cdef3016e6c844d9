//! Direct3D 10 and 11 backend.
//!
//! A [`D3D11Device`] proxies one `ID3D11Device` together with its immediate
//! context, which serves as both the command list and the command queue.
//! Direct3D 10 devices go through the same wrapper: they have no context,
//! so the device pointer stands in for it. Shaders, input layouts and the
//! fixed-function state objects map to pipelines; pipelines created through
//! the abstract interface are bundles of those objects. Deferred contexts
//! are command lists of their own.

pub mod context;
pub mod conversion;
pub mod device;
pub mod driver;
#[cfg(feature = "dummy")]
pub mod dummy;
pub mod hooks;
pub mod pipeline;

pub use context::D3D11DeferredContext;
pub use conversion::{BufferDesc, NativeDesc, TextureDesc, ViewDesc, ViewKind};
pub use device::D3D11Device;
pub use driver::{D3D11Driver, InitialData, StateObject};
pub use pipeline::StateBundle;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::service::Directory;

/// Wrappers of the Direct3D 10 and 11 devices the layer has seen.
pub struct D3D11Directory {
    pub devices: Directory<D3D11Device>,
    /// Immediate context pointer to the device that owns it.
    pub contexts: Directory<D3D11Device>,
    pub deferred_contexts: Directory<D3D11DeferredContext>,
    /// `ID3D11CommandList` pointer to the deferred context that recorded it.
    pub command_lists: Directory<D3D11DeferredContext>,
    /// Swap chain pointer to the device it presents from.
    pub swapchains: Directory<D3D11Device>,
    /// Native entry points of the first wrapped device. Calls on contexts
    /// the layer does not track go straight to them.
    entry_points: RwLock<Option<Arc<dyn D3D11Driver>>>,
}

impl std::fmt::Debug for D3D11Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3D11Directory")
            .field("devices", &self.devices)
            .field("contexts", &self.contexts)
            .field("deferred_contexts", &self.deferred_contexts)
            .field("command_lists", &self.command_lists)
            .field("swapchains", &self.swapchains)
            .field("entry_points", &self.entry_points.read().is_some())
            .finish()
    }
}

impl Default for D3D11Directory {
    fn default() -> Self {
        Self {
            devices: Directory::new("ID3D11Device"),
            contexts: Directory::new("ID3D11DeviceContext"),
            deferred_contexts: Directory::new("deferred ID3D11DeviceContext"),
            command_lists: Directory::new("ID3D11CommandList"),
            swapchains: Directory::new("IDXGISwapChain"),
            entry_points: RwLock::new(None),
        }
    }
}

impl D3D11Directory {
    pub(crate) fn install_entry_points(&self, driver: &Arc<dyn D3D11Driver>) {
        let mut entry_points = self.entry_points.write();
        if entry_points.is_none() {
            *entry_points = Some(Arc::clone(driver));
        }
    }

    pub(crate) fn entry_points(&self) -> Option<Arc<dyn D3D11Driver>> {
        self.entry_points.read().clone()
    }

    /// Drop every wrapper. Returns the number of devices still tracked.
    pub(crate) fn clear(&self) -> usize {
        let devices = self.devices.clear();
        self.contexts.clear();
        self.deferred_contexts.clear();
        self.command_lists.clear();
        self.swapchains.clear();
        *self.entry_points.write() = None;
        devices
    }
}
