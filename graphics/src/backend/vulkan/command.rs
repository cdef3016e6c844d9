//! Per-command-buffer and per-queue state.

use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use lumen_core::{CommandList, CommandQueue, DeviceApi, RenderPassAttachments, RenderPassTracker};
use parking_lot::Mutex;

use super::device::VulkanDevice;

#[derive(Debug, Default)]
struct PassState {
    tracker: RenderPassTracker,
    /// An explicit render pass or dynamic rendering scope is open. Passes
    /// without attachments still count.
    open: bool,
}

/// Layer state of one `VkCommandBuffer`.
#[derive(Debug)]
pub struct VulkanCommandBuffer {
    handle: vk::CommandBuffer,
    pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
    state: Mutex<PassState>,
}

impl VulkanCommandBuffer {
    pub fn new(handle: vk::CommandBuffer, pool: vk::CommandPool, device: Arc<VulkanDevice>) -> Self {
        Self {
            handle,
            pool,
            device,
            state: Mutex::new(PassState::default()),
        }
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn pool(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    pub fn command_list(&self) -> CommandList {
        CommandList(self.handle.as_raw())
    }

    /// Attachments of the open render pass.
    pub fn current_attachments(&self) -> Option<RenderPassAttachments> {
        let state = self.state.lock();
        state.open.then(|| *state.tracker.bound())
    }

    pub fn is_in_render_pass(&self) -> bool {
        self.state.lock().open
    }

    /// Open a render pass and fire its begin event.
    ///
    /// A pass the application left open is finished first.
    pub fn begin_render_pass(&self, attachments: RenderPassAttachments) {
        let was_open = {
            let mut state = self.state.lock();
            let _ = state.tracker.reset();
            let _ = state.tracker.bind(attachments);
            std::mem::replace(&mut state.open, true)
        };
        if was_open {
            log::warn!(
                "Render pass began on command buffer {:#x} while another was open",
                self.handle.as_raw()
            );
            self.notify_finish();
        }
        let device: &dyn DeviceApi = self.device.as_ref();
        let cmd = self.command_list();
        self.device
            .addons()
            .notify(|addon| addon.on_begin_render_pass(device, cmd, &attachments));
    }

    /// Fire the finish event of the open pass and close it.
    pub fn end_render_pass(&self) {
        let was_open = {
            let mut state = self.state.lock();
            let _ = state.tracker.reset();
            std::mem::take(&mut state.open)
        };
        if was_open {
            self.notify_finish();
        }
    }

    /// Drop the pass state without events, for command buffer resets.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let _ = state.tracker.reset();
        state.open = false;
    }

    fn notify_finish(&self) {
        let device: &dyn DeviceApi = self.device.as_ref();
        let cmd = self.command_list();
        self.device
            .addons()
            .notify(|addon| addon.on_finish_render_pass(device, cmd));
    }
}

/// Layer state of one `VkQueue`.
#[derive(Debug)]
pub struct VulkanQueue {
    handle: vk::Queue,
    device: Arc<VulkanDevice>,
}

impl VulkanQueue {
    pub fn new(handle: vk::Queue, device: Arc<VulkanDevice>) -> Self {
        Self { handle, device }
    }

    pub fn handle(&self) -> vk::Queue {
        self.handle
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    pub fn command_queue(&self) -> CommandQueue {
        CommandQueue(self.handle.as_raw())
    }
}

static_assertions::assert_impl_all!(VulkanCommandBuffer: Send, Sync);
static_assertions::assert_impl_all!(VulkanQueue: Send, Sync);
