//! OpenGL backend.
//!
//! All contexts of a share group map to one [`GlDevice`]; each context also
//! gets a [`GlContext`] that acts as both its command list and its queue.
//! The injection shim forwards the exported GL and WGL functions to
//! [`hooks`], and layer-created objects go through the [`GlDispatch`] entry
//! points the shim loads for the share group.

pub mod context;
pub(crate) mod conversion;
pub mod device;
pub mod dispatch;
#[cfg(feature = "dummy")]
pub mod dummy;
pub mod gl;
pub mod handle;
pub mod hooks;
pub mod pipeline;

pub use context::GlContext;
pub use conversion::{AttribFormat, SamplerParam};
pub use device::GlDevice;
pub use dispatch::{DefaultFramebuffer, GlDispatch, GlError, GlResult};
pub use handle::{GlHandle, GlHandleFlags};

use crate::service::Directory;

/// Wrappers of the GL contexts and share groups the layer has seen.
#[derive(Debug)]
pub struct GlDirectory {
    /// Devices keyed by the context that created the share group.
    pub devices: Directory<GlDevice>,
    pub contexts: Directory<GlContext>,
}

impl Default for GlDirectory {
    fn default() -> Self {
        Self {
            devices: Directory::new("GL share group"),
            contexts: Directory::new("HGLRC"),
        }
    }
}

impl GlDirectory {
    /// Drop every wrapper. Returns the number of share groups still tracked.
    pub(crate) fn clear(&self) -> usize {
        let _ = self.contexts.clear();
        self.devices.clear()
    }
}
