//! Direct3D 9 backend.
//!
//! A [`D3D9Device`] proxies one `IDirect3DDevice9` and doubles as its
//! command list and queue, as Direct3D 9 has neither. Textures, surfaces
//! and buffers map to resources; standalone surfaces and the surfaces of
//! attachment textures also serve as their own views. Shaders map to
//! pipelines, and layer-created pipelines are recorded into state blocks.

pub mod conversion;
pub mod device;
pub mod driver;
#[cfg(feature = "dummy")]
pub mod dummy;
pub mod hooks;
pub mod pipeline;

pub use conversion::{BufferDesc, NativeDesc, SurfaceDesc, VolumeDesc};
pub use device::D3D9Device;
pub use driver::{D3D9Caps, D3D9Driver, PresentParameters, SurfaceOf};

use crate::service::Directory;

/// Wrappers of the Direct3D 9 devices the layer has seen.
#[derive(Debug)]
pub struct D3D9Directory {
    pub devices: Directory<D3D9Device>,
}

impl Default for D3D9Directory {
    fn default() -> Self {
        Self {
            devices: Directory::new("IDirect3DDevice9"),
        }
    }
}

impl D3D9Directory {
    /// Drop every wrapper. Returns the number of devices still tracked.
    pub(crate) fn clear(&self) -> usize {
        self.devices.clear()
    }
}
