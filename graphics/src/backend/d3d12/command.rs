//! Per-command-list and per-queue state.
//!
//! Render targets are bound per command list, so each list reconstructs its
//! own render passes. Closing a list finishes its open pass; resetting it
//! drops the pass state without events.

use std::sync::Arc;

use lumen_core::{
    CommandList, CommandQueue, DeviceApi, PassTransition, RenderPassAttachments, RenderPassTracker,
    ResourceView,
};
use parking_lot::Mutex;

use super::device::D3D12Device;
use super::driver::command_list_type_name;
use crate::backend::com::ComPtr;

/// Layer state of one `ID3D12GraphicsCommandList`.
#[derive(Debug)]
pub struct D3D12CommandList {
    handle: ComPtr,
    list_type: u32,
    device: Arc<D3D12Device>,
    pass: Mutex<RenderPassTracker>,
}

impl D3D12CommandList {
    pub fn new(handle: ComPtr, list_type: u32, device: Arc<D3D12Device>) -> Self {
        log::trace!(
            "D3D12CommandList: tracking {} list {:#x}",
            command_list_type_name(list_type),
            handle.raw()
        );
        Self {
            handle,
            list_type,
            device,
            pass: Mutex::new(RenderPassTracker::new()),
        }
    }

    pub fn handle(&self) -> ComPtr {
        self.handle
    }

    pub fn list_type(&self) -> u32 {
        self.list_type
    }

    pub fn device(&self) -> &Arc<D3D12Device> {
        &self.device
    }

    pub fn command_list(&self) -> CommandList {
        CommandList(self.handle.raw())
    }

    pub fn current_pass(&self) -> Option<RenderPassAttachments> {
        self.pass.lock().current().copied()
    }

    /// `OMSetRenderTargets` with descriptors already resolved to views.
    pub fn bind_render_targets(&self, rtvs: &[u64], dsv: Option<u64>) -> RenderPassAttachments {
        let views: Vec<ResourceView> = rtvs.iter().map(|rtv| ResourceView(*rtv)).collect();
        let attachments =
            RenderPassAttachments::from_views(&views, ResourceView(dsv.unwrap_or(0)));
        let transition = self.pass.lock().bind(attachments);
        self.dispatch_transition(transition);
        attachments
    }

    /// `EndRenderPass`: the pass ends, nothing stays bound.
    pub fn end_pass(&self) {
        let transition = self.pass.lock().reset();
        self.dispatch_transition(transition);
    }

    /// `Close`: the open pass ends with the recording.
    pub fn close(&self) {
        let transition = self.pass.lock().end();
        self.dispatch_transition(transition);
    }

    /// `Reset`: recording starts over with nothing bound.
    pub fn reset(&self) {
        let _ = self.pass.lock().reset();
    }

    fn dispatch_transition(&self, transition: PassTransition) {
        if !self.device.config().track_render_passes {
            return;
        }
        let device: &dyn DeviceApi = self.device.as_ref();
        let cmd = self.command_list();
        transition.dispatch(
            |attachments| {
                self.device
                    .addons()
                    .notify(|addon| addon.on_begin_render_pass(device, cmd, attachments))
            },
            || {
                self.device
                    .addons()
                    .notify(|addon| addon.on_finish_render_pass(device, cmd))
            },
        );
    }
}

/// Layer state of one `ID3D12CommandQueue`.
#[derive(Debug)]
pub struct D3D12CommandQueue {
    handle: ComPtr,
    list_type: u32,
    device: Arc<D3D12Device>,
}

impl D3D12CommandQueue {
    pub fn new(handle: ComPtr, list_type: u32, device: Arc<D3D12Device>) -> Self {
        Self {
            handle,
            list_type,
            device,
        }
    }

    pub fn handle(&self) -> ComPtr {
        self.handle
    }

    pub fn list_type(&self) -> u32 {
        self.list_type
    }

    pub fn device(&self) -> &Arc<D3D12Device> {
        &self.device
    }

    pub fn command_queue(&self) -> CommandQueue {
        CommandQueue(self.handle.raw())
    }
}

static_assertions::assert_impl_all!(D3D12CommandList: Send, Sync);
static_assertions::assert_impl_all!(D3D12CommandQueue: Send, Sync);
