//! Per-context state.
//!
//! Framebuffer objects are not shared between GL contexts, so each
//! [`GlContext`] keeps the attachments of its framebuffers and the render
//! pass tracker driven by framebuffer binds. Framebuffer 0 resolves to the
//! default framebuffer views registered with the share group's device.

use std::collections::HashMap;
use std::sync::Arc;

use lumen_core::render_pass::MAX_RENDER_TARGETS;
use lumen_core::{
    CommandList, CommandQueue, DeviceApi, PassTransition, Pipeline, RenderPassAttachments,
    RenderPassTracker, ResourceView, SwapChain,
};
use parking_lot::Mutex;

use super::device::GlDevice;
use super::gl::{self, GLenum, GLuint};
use super::handle::GlHandle;

/// Attachment points of one framebuffer object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramebufferRecord {
    pub colors: [ResourceView; MAX_RENDER_TARGETS],
    pub depth_stencil: ResourceView,
}

impl FramebufferRecord {
    fn with_color(mut self, view: ResourceView) -> Self {
        self.colors[0] = view;
        self
    }

    fn attachments(&self) -> RenderPassAttachments {
        RenderPassAttachments::from_views(&self.colors, self.depth_stencil)
    }

    /// Store `view` at `attachment`. Returns `false` for attachment points
    /// the layer does not track.
    fn set(&mut self, attachment: GLenum, view: ResourceView) -> bool {
        match attachment {
            gl::DEPTH_ATTACHMENT | gl::STENCIL_ATTACHMENT | gl::DEPTH_STENCIL_ATTACHMENT => {
                self.depth_stencil = view;
                true
            }
            _ => match attachment
                .checked_sub(gl::COLOR_ATTACHMENT0)
                .and_then(|index| self.colors.get_mut(index as usize))
            {
                Some(slot) => {
                    *slot = view;
                    true
                }
                None => false,
            },
        }
    }
}

#[derive(Debug, Default)]
struct ContextState {
    tracker: RenderPassTracker,
    draw_framebuffer: GLuint,
    read_framebuffer: GLuint,
    framebuffers: HashMap<GLuint, FramebufferRecord>,
    default_framebuffer: FramebufferRecord,
    program: GLuint,
}

impl ContextState {
    fn attachments_of(&self, framebuffer: GLuint) -> RenderPassAttachments {
        if framebuffer == 0 {
            return self.default_framebuffer.attachments();
        }
        self.framebuffers
            .get(&framebuffer)
            .map(FramebufferRecord::attachments)
            .unwrap_or_default()
    }
}

/// Layer state of one GL rendering context.
#[derive(Debug)]
pub struct GlContext {
    hglrc: u64,
    hdc: u64,
    device: Arc<GlDevice>,
    state: Mutex<ContextState>,
}

impl GlContext {
    /// Wrap a context and track its default framebuffer.
    pub fn new(hglrc: u64, hdc: u64, device: Arc<GlDevice>) -> Self {
        let (color, depth_stencil) = device.register_default_framebuffer();
        let default_framebuffer = FramebufferRecord {
            depth_stencil,
            ..Default::default()
        }
        .with_color(color);
        Self {
            hglrc,
            hdc,
            device,
            state: Mutex::new(ContextState {
                default_framebuffer,
                ..Default::default()
            }),
        }
    }

    pub fn hglrc(&self) -> u64 {
        self.hglrc
    }

    pub fn hdc(&self) -> u64 {
        self.hdc
    }

    pub fn device(&self) -> &Arc<GlDevice> {
        &self.device
    }

    /// GL executes commands immediately, so the context is both the command
    /// list and the queue.
    pub fn command_list(&self) -> CommandList {
        CommandList(self.hglrc)
    }

    pub fn command_queue(&self) -> CommandQueue {
        CommandQueue(self.hglrc)
    }

    /// The window surface the context presents to.
    pub fn swapchain(&self) -> SwapChain {
        SwapChain(self.hdc)
    }

    pub fn draw_framebuffer(&self) -> GLuint {
        self.state.lock().draw_framebuffer
    }

    pub fn read_framebuffer(&self) -> GLuint {
        self.state.lock().read_framebuffer
    }

    /// Attachments of the draw framebuffer, whether or not a pass is open.
    pub fn bound_attachments(&self) -> RenderPassAttachments {
        let state = self.state.lock();
        state.attachments_of(state.draw_framebuffer)
    }

    /// Attachments of the open render pass.
    pub fn current_attachments(&self) -> Option<RenderPassAttachments> {
        self.state.lock().tracker.current().copied()
    }

    pub fn program(&self) -> Pipeline {
        let program = self.state.lock().program;
        if program == 0 {
            Pipeline::NULL
        } else {
            GlHandle::new(gl::PROGRAM, program).pipeline()
        }
    }

    pub(crate) fn set_program(&self, program: GLuint) {
        self.state.lock().program = program;
    }

    /// `glBindFramebuffer`. Returns the new draw attachments when the draw
    /// binding changed.
    pub fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint) -> Option<RenderPassAttachments> {
        let (attachments, transition) = {
            let mut state = self.state.lock();
            if matches!(target, gl::READ_FRAMEBUFFER | gl::FRAMEBUFFER) {
                state.read_framebuffer = framebuffer;
            }
            if !matches!(target, gl::DRAW_FRAMEBUFFER | gl::FRAMEBUFFER) {
                return None;
            }
            state.draw_framebuffer = framebuffer;
            let attachments = state.attachments_of(framebuffer);
            (attachments, self.track(&mut state, attachments))
        };
        self.dispatch_transition(transition);
        Some(attachments)
    }

    /// `glFramebufferTexture*` and `glFramebufferRenderbuffer`. Returns the
    /// new draw attachments if `framebuffer` is the bound draw framebuffer.
    pub fn set_attachment(
        &self,
        framebuffer: GLuint,
        attachment: GLenum,
        view: ResourceView,
    ) -> Option<RenderPassAttachments> {
        if framebuffer == 0 {
            log::warn!("GlContext: attachments of the default framebuffer cannot change");
            return None;
        }
        let (attachments, transition) = {
            let mut state = self.state.lock();
            let record = state.framebuffers.entry(framebuffer).or_default();
            if !record.set(attachment, view) {
                log::trace!("GlContext: ignoring attachment point {:#x}", attachment);
                return None;
            }
            if state.draw_framebuffer != framebuffer {
                return None;
            }
            let attachments = state.attachments_of(framebuffer);
            (attachments, self.track(&mut state, attachments))
        };
        self.dispatch_transition(transition);
        Some(attachments)
    }

    /// `glDeleteFramebuffers`. Deleting the bound framebuffer reverts the
    /// binding to the default framebuffer.
    pub fn delete_framebuffers(&self, framebuffers: &[GLuint]) {
        let transition = {
            let mut state = self.state.lock();
            let mut rebind = false;
            for framebuffer in framebuffers.iter().filter(|&&name| name != 0) {
                state.framebuffers.remove(framebuffer);
                if state.draw_framebuffer == *framebuffer {
                    state.draw_framebuffer = 0;
                    rebind = true;
                }
                if state.read_framebuffer == *framebuffer {
                    state.read_framebuffer = 0;
                }
            }
            if !rebind {
                return;
            }
            let attachments = state.attachments_of(0);
            self.track(&mut state, attachments)
        };
        self.dispatch_transition(transition);
    }

    /// Drop every reference to a destroyed view.
    pub fn forget_view(&self, view: ResourceView) {
        let transition = {
            let mut state = self.state.lock();
            for record in state.framebuffers.values_mut() {
                for slot in record.colors.iter_mut().filter(|slot| **slot == view) {
                    *slot = ResourceView::NULL;
                }
                if record.depth_stencil == view {
                    record.depth_stencil = ResourceView::NULL;
                }
            }
            state.tracker.forget_view(view)
        };
        self.dispatch_transition(transition);
    }

    /// Close the open pass before a present.
    pub fn end_render_pass(&self) {
        let transition = self.state.lock().tracker.end();
        self.dispatch_transition(transition);
    }

    /// Reopen the pass after a present if attachments are still bound.
    pub fn resume_render_pass(&self) {
        if !self.device.config().track_render_passes {
            return;
        }
        let transition = self.state.lock().tracker.resume();
        self.dispatch_transition(transition);
    }

    /// Close the open pass and forget all bindings, for context destruction.
    pub fn reset(&self) {
        let transition = {
            let mut state = self.state.lock();
            state.framebuffers.clear();
            state.tracker.reset()
        };
        self.dispatch_transition(transition);
    }

    fn track(&self, state: &mut ContextState, attachments: RenderPassAttachments) -> PassTransition {
        if self.device.config().track_render_passes {
            state.tracker.bind(attachments)
        } else {
            PassTransition::None
        }
    }

    fn dispatch_transition(&self, transition: PassTransition) {
        let device: &dyn DeviceApi = self.device.as_ref();
        let cmd = self.command_list();
        let addons = self.device.addons();
        transition.dispatch(
            |attachments| addons.notify(|addon| addon.on_begin_render_pass(device, cmd, attachments)),
            || addons.notify(|addon| addon.on_finish_render_pass(device, cmd)),
        );
    }
}

static_assertions::assert_impl_all!(GlContext: Send, Sync);

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::opengl::dummy::DummyGl;
    use lumen_core::{Addon, AddonRegistry, LayerConfig};

    #[derive(Default)]
    struct PassCounter {
        events: Mutex<Vec<&'static str>>,
    }

    impl Addon for PassCounter {
        fn on_begin_render_pass(&self, _: &dyn DeviceApi, _: CommandList, _: &RenderPassAttachments) {
            self.events.lock().push("begin");
        }
        fn on_finish_render_pass(&self, _: &dyn DeviceApi, _: CommandList) {
            self.events.lock().push("finish");
        }
    }

    fn context(config: LayerConfig) -> (Arc<PassCounter>, GlContext) {
        let counter = Arc::new(PassCounter::default());
        let addons = Arc::new(AddonRegistry::new());
        addons.register(counter.clone());
        let device = Arc::new(GlDevice::new(Arc::new(DummyGl::new()), addons, config));
        (counter, GlContext::new(0x1000, 0x2000, device))
    }

    #[test]
    fn test_framebuffer_record_attachment_points() {
        let mut record = FramebufferRecord::default();
        assert!(record.set(gl::COLOR_ATTACHMENT0 + 2, ResourceView(5)));
        assert!(record.set(gl::DEPTH_STENCIL_ATTACHMENT, ResourceView(6)));
        assert!(!record.set(gl::COLOR_ATTACHMENT0 + 8, ResourceView(7)));
        assert!(!record.set(gl::BACK, ResourceView(7)));
        assert_eq!(record.colors[2], ResourceView(5));
        assert_eq!(record.depth_stencil, ResourceView(6));
    }

    #[test]
    fn test_binding_same_framebuffer_twice_begins_once() {
        let (counter, context) = context(LayerConfig::default());
        context.set_attachment(1, gl::COLOR_ATTACHMENT0, ResourceView(0x11));
        context.bind_framebuffer(gl::FRAMEBUFFER, 1);
        context.bind_framebuffer(gl::FRAMEBUFFER, 1);
        assert_eq!(*counter.events.lock(), vec!["begin"]);
    }

    #[test]
    fn test_switching_framebuffers_finishes_then_begins() {
        let (counter, context) = context(LayerConfig::default());
        context.set_attachment(1, gl::COLOR_ATTACHMENT0, ResourceView(0x11));
        context.set_attachment(2, gl::COLOR_ATTACHMENT0, ResourceView(0x22));
        context.bind_framebuffer(gl::DRAW_FRAMEBUFFER, 1);
        context.bind_framebuffer(gl::DRAW_FRAMEBUFFER, 2);
        assert_eq!(*counter.events.lock(), vec!["begin", "finish", "begin"]);
        assert_eq!(
            context.current_attachments().map(|a| a.colors[0]),
            Some(ResourceView(0x22))
        );
    }

    #[test]
    fn test_read_binding_does_not_start_pass() {
        let (counter, context) = context(LayerConfig::default());
        context.set_attachment(1, gl::COLOR_ATTACHMENT0, ResourceView(0x11));
        assert!(context.bind_framebuffer(gl::READ_FRAMEBUFFER, 1).is_none());
        assert_eq!(context.read_framebuffer(), 1);
        assert!(counter.events.lock().is_empty());
    }

    #[test]
    fn test_attaching_to_bound_framebuffer_restarts_pass() {
        let (counter, context) = context(LayerConfig::default());
        context.set_attachment(1, gl::COLOR_ATTACHMENT0, ResourceView(0x11));
        context.bind_framebuffer(gl::FRAMEBUFFER, 1);
        context.set_attachment(1, gl::DEPTH_ATTACHMENT, ResourceView(0x33));
        assert_eq!(*counter.events.lock(), vec!["begin", "finish", "begin"]);
    }

    #[test]
    fn test_deleting_bound_framebuffer_reverts_to_default() {
        let (counter, context) = context(LayerConfig::default());
        context.set_attachment(1, gl::COLOR_ATTACHMENT0, ResourceView(0x11));
        context.bind_framebuffer(gl::FRAMEBUFFER, 1);
        context.delete_framebuffers(&[1]);
        assert_eq!(context.draw_framebuffer(), 0);
        // The default framebuffer has a color view, so a new pass begins.
        assert_eq!(*counter.events.lock(), vec!["begin", "finish", "begin"]);
    }

    #[test]
    fn test_present_boundary_ends_and_resumes() {
        let (counter, context) = context(LayerConfig::default());
        context.bind_framebuffer(gl::FRAMEBUFFER, 0);
        context.end_render_pass();
        context.resume_render_pass();
        assert_eq!(*counter.events.lock(), vec!["begin", "finish", "begin"]);
    }

    #[test]
    fn test_tracking_disabled_fires_nothing() {
        let (counter, context) = context(LayerConfig::default().with_track_render_passes(false));
        context.set_attachment(1, gl::COLOR_ATTACHMENT0, ResourceView(0x11));
        assert!(context.bind_framebuffer(gl::FRAMEBUFFER, 1).is_some());
        context.resume_render_pass();
        assert!(counter.events.lock().is_empty());
    }

    #[test]
    fn test_forgotten_view_finishes_pass() {
        let (counter, context) = context(LayerConfig::default());
        context.set_attachment(1, gl::COLOR_ATTACHMENT0, ResourceView(0x11));
        context.bind_framebuffer(gl::FRAMEBUFFER, 1);
        context.forget_view(ResourceView(0x11));
        assert_eq!(*counter.events.lock(), vec!["begin", "finish"]);
        assert!(context.bound_attachments().is_empty());
    }
}
