//! Deferred contexts.
//!
//! A deferred context records commands for a later `ExecuteCommandList` on
//! the immediate context. Add-ons see it as a command list of its own, so it
//! keeps its own render pass state. `FinishCommandList` ends the open pass
//! together with the recording.

use std::sync::Arc;

use lumen_core::{CommandList, DeviceApi, PassTransition, RenderPassAttachments, ResourceView};
use parking_lot::Mutex;

use super::device::{D3D11Device, PassState};
use crate::backend::com::{add_ref_proxy, release_proxy, ComPtr, ProxyRefCount};

/// Layer state of one deferred `ID3D11DeviceContext`.
#[derive(Debug)]
pub struct D3D11DeferredContext {
    handle: ComPtr,
    device: Arc<D3D11Device>,
    refs: ProxyRefCount,
    pass: Mutex<PassState>,
}

impl D3D11DeferredContext {
    pub fn new(handle: ComPtr, device: Arc<D3D11Device>) -> Self {
        log::trace!("D3D11DeferredContext: tracking {:#x}", handle.raw());
        Self {
            handle,
            device,
            refs: ProxyRefCount::new(),
            pass: Mutex::new(PassState::default()),
        }
    }

    pub fn handle(&self) -> ComPtr {
        self.handle
    }

    pub fn device(&self) -> &Arc<D3D11Device> {
        &self.device
    }

    pub fn command_list(&self) -> CommandList {
        CommandList(self.handle.raw())
    }

    pub fn ref_count(&self) -> u32 {
        self.refs.get()
    }

    pub fn current_pass(&self) -> Option<RenderPassAttachments> {
        self.pass.lock().tracker.current().copied()
    }

    /// `OMSetRenderTargets`. Returns the attachments now bound.
    pub(crate) fn bind_render_targets(&self, rtvs: &[ComPtr], dsv: ComPtr) -> RenderPassAttachments {
        let views: Vec<ResourceView> = rtvs.iter().map(|rtv| ResourceView(rtv.raw())).collect();
        let attachments = RenderPassAttachments::from_views(&views, ResourceView(dsv.raw()));
        let (bound, transition) = {
            let mut pass = self.pass.lock();
            let transition = pass.tracker.bind(attachments);
            (*pass.tracker.bound(), transition)
        };
        self.dispatch_transition(transition);
        bound
    }

    pub(crate) fn set_topology(&self, topology: u32) -> bool {
        std::mem::replace(&mut self.pass.lock().topology, topology) != topology
    }

    pub(crate) fn end_pass(&self) {
        let transition = self.pass.lock().tracker.end();
        self.dispatch_transition(transition);
    }

    pub(crate) fn resume_pass(&self) {
        let transition = self.pass.lock().tracker.resume();
        self.dispatch_transition(transition);
    }

    /// Context state is cleared: nothing stays bound.
    pub(crate) fn reset_pass(&self) {
        let transition = {
            let mut pass = self.pass.lock();
            pass.topology = 0;
            pass.tracker.reset()
        };
        self.dispatch_transition(transition);
    }

    pub(crate) fn forget_view(&self, view: ComPtr) {
        let transition = self
            .pass
            .lock()
            .tracker
            .forget_view(ResourceView(view.raw()));
        self.dispatch_transition(transition);
    }

    pub fn add_ref(&self) -> u32 {
        add_ref_proxy(&self.refs, self.device.driver(), self.handle)
    }

    /// Release by the application. The final release ends the open pass
    /// and reports the command list as destroyed.
    pub fn release(&self) -> u32 {
        release_proxy(
            &self.refs,
            self.device.driver(),
            self.handle,
            "ID3D11DeviceContext",
            0,
            || {
                self.reset_pass();
                let api: &dyn DeviceApi = self.device.as_ref();
                let cmd = self.command_list();
                self.device
                    .addons()
                    .notify(|addon| addon.on_destroy_command_list(api, cmd));
            },
        )
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

static_assertions::assert_impl_all!(D3D11DeferredContext: Send, Sync);

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::d3d11::dummy::DummyD3D11;
    use crate::backend::d3d11::D3D11Driver;
    use lumen_core::{AddonRegistry, LayerConfig};

    fn deferred() -> (Arc<DummyD3D11>, D3D11DeferredContext) {
        let dummy = Arc::new(DummyD3D11::new(64, 64));
        let device = Arc::new(D3D11Device::new(
            dummy.clone(),
            Arc::new(AddonRegistry::new()),
            LayerConfig::default(),
        ));
        let handle = dummy.create_deferred_context().unwrap();
        (dummy, D3D11DeferredContext::new(handle, device))
    }

    #[test]
    fn test_reset_clears_targets() {
        let (_dummy, context) = deferred();
        context.bind_render_targets(&[ComPtr(0x10)], ComPtr::NULL);
        assert!(context.current_pass().is_some());
        context.end_pass();
        context.reset_pass();
        assert_eq!(context.current_pass(), None);
        context.resume_pass();
        assert_eq!(context.current_pass(), None);
    }

    #[test]
    fn test_resume_reopens_pass_with_bound_targets() {
        let (_dummy, context) = deferred();
        let bound = context.bind_render_targets(&[ComPtr(0x10)], ComPtr(0x20));
        context.end_pass();
        assert_eq!(context.current_pass(), None);
        context.resume_pass();
        assert_eq!(context.current_pass(), Some(bound));
    }

    #[test]
    fn test_topology_change_detected() {
        let (_dummy, context) = deferred();
        assert!(context.set_topology(4));
        assert!(!context.set_topology(4));
        context.reset_pass();
        assert!(context.set_topology(4));
    }

    #[test]
    fn test_final_release_frees_native_context() {
        let (dummy, context) = deferred();
        let handle = context.handle();
        assert_eq!(context.add_ref(), 2);
        assert_eq!(context.release(), 1);
        assert_eq!(context.release(), 0);
        assert_eq!(dummy.ref_count(handle), 0);
    }
}
