//! Vulkan backend using ash.
//!
//! The layer sits between the application and the next layer of the Vulkan
//! loader chain. [`hooks`] holds the intercepted entry points; they resolve
//! the dispatchable handle to its wrapper in the [`VulkanDirectory`], call
//! down through a [`VulkanDispatch`] table and fire add-on events.
//!
//! Layer-created objects go through [`VulkanDevice`], the [`DeviceApi`]
//! implementation add-ons receive.
//!
//! [`DeviceApi`]: lumen_core::DeviceApi

pub mod ash_dispatch;
pub mod command;
pub(crate) mod conversion;
pub mod device;
pub mod dispatch;
#[cfg(feature = "dummy")]
pub mod dummy;
pub mod hooks;
pub mod pipeline;

pub use ash_dispatch::AshDispatch;
pub use command::{VulkanCommandBuffer, VulkanQueue};
pub use device::VulkanDevice;
pub use dispatch::{AllocationId, BindTarget, ImmediateOp, VulkanDispatch};

use crate::service::Directory;

/// Wrappers of the Vulkan dispatchable objects the layer has seen.
#[derive(Debug)]
pub struct VulkanDirectory {
    pub devices: Directory<VulkanDevice>,
    pub queues: Directory<VulkanQueue>,
    pub command_buffers: Directory<VulkanCommandBuffer>,
}

impl Default for VulkanDirectory {
    fn default() -> Self {
        Self {
            devices: Directory::new("VkDevice"),
            queues: Directory::new("VkQueue"),
            command_buffers: Directory::new("VkCommandBuffer"),
        }
    }
}

impl VulkanDirectory {
    /// Drop every wrapper. Returns the number of devices still tracked.
    pub(crate) fn clear(&self) -> usize {
        let _ = self.command_buffers.clear();
        let _ = self.queues.clear();
        self.devices.clear()
    }
}
