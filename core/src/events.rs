//! Add-on event interface.
//!
//! Add-ons implement [`Addon`] and are registered with an [`AddonRegistry`].
//! Backends fire events synchronously on the thread that made the API call.
//! All methods have empty default implementations, so an add-on only
//! overrides the events it cares about.
//!
//! # Event kinds
//!
//! * **create** events run before a native object is created. Returning
//!   `Some(object)` replaces the object: native creation is skipped and the
//!   application receives the add-on's object.
//! * **init** events run after successful creation, **destroy** events
//!   before the native object goes away.
//! * Command events returning `bool` may short-circuit: returning `true`
//!   marks the call as handled, the native call is skipped and success is
//!   returned to the application.
//!
//! Backends never hold a registry lock while dispatching, so add-ons may call
//! back into the [`DeviceApi`] they receive.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::descriptor::DescriptorSetUpdate;
use crate::device::DeviceApi;
use crate::handle::{
    CommandList, CommandQueue, DescriptorSet, Pipeline, PipelineLayout, Resource, ResourceView,
    Sampler, SwapChain,
};
use crate::pipeline::{DynamicState, PipelineDesc, ShaderStage};
use crate::render_pass::{AttachmentType, RenderPassAttachments};
use crate::resource::{ResourceDesc, ResourceUsage, ResourceViewDesc, SubresourceBox, SubresourceData};
use crate::sampler::SamplerDesc;
use crate::format::Format;

/// Viewport rectangle with depth range.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// Integer rectangle; `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Source or destination of a texture copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureRegion {
    pub resource: Resource,
    pub subresource: u32,
    /// `None` covers the whole subresource.
    pub region: Option<SubresourceBox>,
}

/// Values for a combined attachment clear.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClearValues {
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: u8,
}

/// Callbacks an add-on can implement.
#[allow(unused_variables)]
pub trait Addon: Send + Sync {
    /// Name used in log messages.
    fn name(&self) -> &str {
        "addon"
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    fn on_init_device(&self, device: &dyn DeviceApi) {}
    fn on_destroy_device(&self, device: &dyn DeviceApi) {}
    fn on_init_command_queue(&self, device: &dyn DeviceApi, queue: CommandQueue) {}
    fn on_destroy_command_queue(&self, device: &dyn DeviceApi, queue: CommandQueue) {}
    fn on_init_command_list(&self, device: &dyn DeviceApi, cmd: CommandList) {}
    fn on_destroy_command_list(&self, device: &dyn DeviceApi, cmd: CommandList) {}
    fn on_init_swapchain(&self, device: &dyn DeviceApi, swapchain: SwapChain) {}
    fn on_destroy_swapchain(&self, device: &dyn DeviceApi, swapchain: SwapChain) {}

    // ========================================================================
    // Object creation
    // ========================================================================

    fn on_create_sampler(&self, device: &dyn DeviceApi, desc: &SamplerDesc) -> Option<Sampler> {
        None
    }
    fn on_init_sampler(&self, device: &dyn DeviceApi, desc: &SamplerDesc, sampler: Sampler) {}
    fn on_destroy_sampler(&self, device: &dyn DeviceApi, sampler: Sampler) {}

    fn on_create_resource(
        &self,
        device: &dyn DeviceApi,
        desc: &ResourceDesc,
        initial_state: ResourceUsage,
    ) -> Option<Resource> {
        None
    }
    fn on_init_resource(
        &self,
        device: &dyn DeviceApi,
        desc: &ResourceDesc,
        initial_data: Option<&[SubresourceData<'_>]>,
        initial_state: ResourceUsage,
        resource: Resource,
    ) {
    }
    fn on_destroy_resource(&self, device: &dyn DeviceApi, resource: Resource) {}

    fn on_create_resource_view(
        &self,
        device: &dyn DeviceApi,
        resource: Resource,
        usage_type: ResourceUsage,
        desc: &ResourceViewDesc,
    ) -> Option<ResourceView> {
        None
    }
    fn on_init_resource_view(
        &self,
        device: &dyn DeviceApi,
        resource: Resource,
        usage_type: ResourceUsage,
        desc: &ResourceViewDesc,
        view: ResourceView,
    ) {
    }
    fn on_destroy_resource_view(&self, device: &dyn DeviceApi, view: ResourceView) {}

    fn on_create_pipeline(&self, device: &dyn DeviceApi, desc: &PipelineDesc) -> Option<Pipeline> {
        None
    }
    fn on_init_pipeline(&self, device: &dyn DeviceApi, desc: &PipelineDesc, pipeline: Pipeline) {}
    fn on_destroy_pipeline(&self, device: &dyn DeviceApi, pipeline: Pipeline) {}

    fn on_init_pipeline_layout(&self, device: &dyn DeviceApi, layout: PipelineLayout) {}
    fn on_destroy_pipeline_layout(&self, device: &dyn DeviceApi, layout: PipelineLayout) {}

    /// Returning `true` skips the descriptor update.
    fn on_update_descriptor_sets(
        &self,
        device: &dyn DeviceApi,
        updates: &[DescriptorSetUpdate],
    ) -> bool {
        false
    }

    // ========================================================================
    // Render passes and bindings
    // ========================================================================

    fn on_begin_render_pass(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        attachments: &RenderPassAttachments,
    ) {
    }
    fn on_finish_render_pass(&self, device: &dyn DeviceApi, cmd: CommandList) {}

    fn on_bind_render_targets_and_depth_stencil(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        attachments: &RenderPassAttachments,
    ) {
    }
    fn on_bind_pipeline(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        stages: ShaderStage,
        pipeline: Pipeline,
    ) {
    }
    fn on_bind_pipeline_states(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        states: &[(DynamicState, u32)],
    ) {
    }
    fn on_bind_viewports(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        first: u32,
        viewports: &[Viewport],
    ) {
    }
    fn on_bind_scissor_rects(&self, device: &dyn DeviceApi, cmd: CommandList, first: u32, rects: &[Rect]) {}
    fn on_bind_vertex_buffers(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        first: u32,
        buffers: &[Resource],
        offsets: &[u64],
        strides: &[u32],
    ) {
    }
    fn on_bind_index_buffer(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        buffer: Resource,
        offset: u64,
        index_size: u32,
    ) {
    }
    fn on_push_descriptors(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        stages: ShaderStage,
        layout: PipelineLayout,
        param_index: u32,
        update: &DescriptorSetUpdate,
    ) {
    }
    fn on_bind_descriptor_sets(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        stages: ShaderStage,
        layout: PipelineLayout,
        first: u32,
        sets: &[DescriptorSet],
    ) {
    }

    // ========================================================================
    // Commands (return `true` to skip the native call)
    // ========================================================================

    fn on_draw(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> bool {
        false
    }
    fn on_draw_indexed(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> bool {
        false
    }
    fn on_dispatch(&self, device: &dyn DeviceApi, cmd: CommandList, x: u32, y: u32, z: u32) -> bool {
        false
    }
    fn on_copy_resource(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        source: Resource,
        dest: Resource,
    ) -> bool {
        false
    }
    fn on_copy_buffer_region(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        source: Resource,
        source_offset: u64,
        dest: Resource,
        dest_offset: u64,
        size: u64,
    ) -> bool {
        false
    }
    fn on_copy_texture_region(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        source: &TextureRegion,
        dest: &TextureRegion,
    ) -> bool {
        false
    }
    fn on_resolve_texture_region(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        source: &TextureRegion,
        dest: &TextureRegion,
        format: Format,
    ) -> bool {
        false
    }
    fn on_clear_render_target_view(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        view: ResourceView,
        color: [f32; 4],
        rects: &[Rect],
    ) -> bool {
        false
    }
    fn on_clear_depth_stencil_view(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        view: ResourceView,
        depth: Option<f32>,
        stencil: Option<u8>,
        rects: &[Rect],
    ) -> bool {
        false
    }
    fn on_clear_attachments(
        &self,
        device: &dyn DeviceApi,
        cmd: CommandList,
        clear_flags: AttachmentType,
        values: &ClearValues,
        rects: &[Rect],
    ) -> bool {
        false
    }

    // ========================================================================
    // Submission
    // ========================================================================

    fn on_execute_command_list(&self, device: &dyn DeviceApi, queue: CommandQueue, cmd: CommandList) {}
    fn on_present(&self, device: &dyn DeviceApi, queue: CommandQueue, swapchain: SwapChain) {}
}

/// Ordered set of registered add-ons.
///
/// Dispatch works on a snapshot of the list, so an add-on may register or
/// unregister add-ons from within an event.
#[derive(Default)]
pub struct AddonRegistry {
    addons: RwLock<Vec<Arc<dyn Addon>>>,
}

impl std::fmt::Debug for AddonRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let addons = self.addons.read();
        f.debug_list()
            .entries(addons.iter().map(|addon| addon.name().to_owned()))
            .finish()
    }
}

impl AddonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, addon: Arc<dyn Addon>) {
        log::debug!("registering add-on '{}'", addon.name());
        self.addons.write().push(addon);
    }

    /// Remove a previously registered add-on. Returns `false` if it was not registered.
    pub fn unregister(&self, addon: &Arc<dyn Addon>) -> bool {
        let mut addons = self.addons.write();
        let before = addons.len();
        addons.retain(|registered| !Arc::ptr_eq(registered, addon));
        before != addons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addons.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.addons.read().len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Addon>> {
        self.addons.read().clone()
    }

    /// Invoke `f` on every add-on in registration order.
    pub fn notify(&self, mut f: impl FnMut(&dyn Addon)) {
        for addon in self.snapshot() {
            f(addon.as_ref());
        }
    }

    /// Offer a create event; the first add-on returning a replacement wins.
    pub fn replacement<T>(&self, mut f: impl FnMut(&dyn Addon) -> Option<T>) -> Option<T> {
        for addon in self.snapshot() {
            if let Some(replacement) = f(addon.as_ref()) {
                log::debug!("add-on '{}' supplied a replacement object", addon.name());
                return Some(replacement);
            }
        }
        None
    }

    /// Offer a command event; returns `true` as soon as one add-on handles it.
    pub fn handled(&self, mut f: impl FnMut(&dyn Addon) -> bool) -> bool {
        for addon in self.snapshot() {
            if f(addon.as_ref()) {
                log::trace!("add-on '{}' handled the call", addon.name());
                return true;
            }
        }
        false
    }
}

static_assertions::assert_impl_all!(AddonRegistry: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Counter {
        calls: AtomicU32,
        handle: bool,
    }

    impl Addon for Counter {
        fn on_dispatch(&self, _: &dyn DeviceApi, _: CommandList, _: u32, _: u32, _: u32) -> bool {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.handle
        }
    }

    #[test]
    fn test_register_unregister() {
        let registry = AddonRegistry::new();
        let addon: Arc<dyn Addon> = Arc::new(Counter::default());
        registry.register(addon.clone());
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(&addon));
        assert!(!registry.unregister(&addon));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_replacement_first_wins() {
        let registry = AddonRegistry::new();
        registry.register(Arc::new(Counter::default()));
        registry.register(Arc::new(Counter::default()));
        let mut offered = 0;
        let result = registry.replacement(|_| {
            offered += 1;
            Some(Resource(offered))
        });
        assert_eq!(result, Some(Resource(1)));
        assert_eq!(offered, 1);
    }

    #[test]
    fn test_handled_short_circuits() {
        let registry = AddonRegistry::new();
        let first = Arc::new(Counter {
            handle: true,
            ..Default::default()
        });
        let second = Arc::new(Counter::default());
        registry.register(first.clone());
        registry.register(second.clone());

        let handled = registry.handled(|addon| {
            addon.on_dispatch(&NullDevice, CommandList(1), 1, 1, 1)
        });
        assert!(handled);
        assert_eq!(first.calls.load(Ordering::Relaxed), 1);
        assert_eq!(second.calls.load(Ordering::Relaxed), 0);
    }

    struct NullDevice;

    impl DeviceApi for NullDevice {
        fn api(&self) -> crate::device::GraphicsApi {
            crate::device::GraphicsApi::Vulkan
        }
        fn native(&self) -> u64 {
            0
        }
        fn check_capability(&self, _: crate::device::DeviceCaps) -> bool {
            false
        }
        fn check_format_support(&self, _: Format, _: ResourceUsage) -> bool {
            false
        }
        fn create_sampler(&self, _: &SamplerDesc) -> crate::ApiResult<Sampler> {
            Err(crate::ApiError::OutOfMemory)
        }
        fn destroy_sampler(&self, _: Sampler) {}
        fn create_resource(
            &self,
            _: &ResourceDesc,
            _: Option<&[SubresourceData<'_>]>,
            _: ResourceUsage,
        ) -> crate::ApiResult<Resource> {
            Err(crate::ApiError::OutOfMemory)
        }
        fn destroy_resource(&self, _: Resource) {}
        fn create_resource_view(
            &self,
            _: Resource,
            _: ResourceUsage,
            _: &ResourceViewDesc,
        ) -> crate::ApiResult<ResourceView> {
            Err(crate::ApiError::OutOfMemory)
        }
        fn destroy_resource_view(&self, _: ResourceView) {}
        fn create_pipeline(&self, _: &PipelineDesc) -> crate::ApiResult<Pipeline> {
            Err(crate::ApiError::OutOfMemory)
        }
        fn destroy_pipeline(&self, _: Pipeline) {}
        fn get_resource_desc(&self, _: Resource) -> Option<ResourceDesc> {
            None
        }
        fn get_resource_from_view(&self, _: ResourceView) -> Option<Resource> {
            None
        }
        fn get_resource_view_desc(&self, _: ResourceView) -> Option<ResourceViewDesc> {
            None
        }
        fn is_resource_handle_valid(&self, _: Resource) -> bool {
            false
        }
        fn is_resource_view_handle_valid(&self, _: ResourceView) -> bool {
            false
        }
    }
}
