//! Direct3D 12 backend.
//!
//! A [`D3D12Device`] proxies one `ID3D12Device`. Command queues and command
//! lists are tracked per native pointer, each list reconstructing its own
//! render passes from `OMSetRenderTargets`. Views and samplers are CPU
//! descriptors rather than objects; the layer's own come from small
//! descriptor heaps it allocates on demand. Initial data for default-heap
//! resources is uploaded through the [`ImmediateCommandList`].

pub mod command;
pub mod conversion;
pub mod descriptor;
pub mod device;
pub mod driver;
#[cfg(feature = "dummy")]
pub mod dummy;
pub mod hooks;
pub mod immediate;
pub mod pipeline;

pub use command::{D3D12CommandList, D3D12CommandQueue};
pub use conversion::{HeapProperties, NativeResourceDesc, ViewDesc, ViewKind};
pub use device::D3D12Device;
pub use driver::{CopyLocation, D3D12Driver, TransitionBarrier};
pub use immediate::ImmediateCommandList;
pub use pipeline::{ComputeStateDesc, GraphicsStateDesc};

use crate::service::Directory;

/// Wrappers of the Direct3D 12 objects the layer has seen.
#[derive(Debug)]
pub struct D3D12Directory {
    pub devices: Directory<D3D12Device>,
    pub queues: Directory<D3D12CommandQueue>,
    pub command_lists: Directory<D3D12CommandList>,
    /// Swap chain pointer to the device whose queue it presents on.
    pub swapchains: Directory<D3D12Device>,
}

impl Default for D3D12Directory {
    fn default() -> Self {
        Self {
            devices: Directory::new("ID3D12Device"),
            queues: Directory::new("ID3D12CommandQueue"),
            command_lists: Directory::new("ID3D12GraphicsCommandList"),
            swapchains: Directory::new("IDXGISwapChain3"),
        }
    }
}

impl D3D12Directory {
    /// Drop every wrapper. Returns the number of devices still tracked.
    pub(crate) fn clear(&self) -> usize {
        let devices = self.devices.clear();
        self.queues.clear();
        self.command_lists.clear();
        self.swapchains.clear();
        devices
    }
}
