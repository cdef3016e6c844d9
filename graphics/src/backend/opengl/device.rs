//! Abstract device of a GL share group.
//!
//! All contexts sharing objects map to one [`GlDevice`]. It keeps the handle
//! registry of the share group and implements [`DeviceApi`] on top of the
//! [`GlDispatch`] entry points.
//!
//! GL has no views in the D3D sense. A view that covers its whole resource
//! with the same format and needs no special sampling mode reuses the
//! resource's name and is marked [`GlHandleFlags::NOT_OWNED`]; anything else
//! becomes a texture view object. Pipeline layouts, descriptor set layouts
//! and descriptor sets exist only as records.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use lumen_core::descriptor::{DescriptorSetLayoutRecord, DescriptorSetRecord, DescriptorSetUpdate};
use lumen_core::pipeline::{
    DescriptorSetLayoutDesc, PipelineDesc, PipelineLayoutDesc, PipelineLayoutParam, ShaderStage,
};
use lumen_core::resource::ViewRange;
use lumen_core::sampler::SamplerDesc;
use lumen_core::{
    AddonRegistry, ApiError, ApiResult, DeviceApi, DeviceCaps, Format, GraphicsApi,
    HandleRegistry, LayerConfig, ObjectTable, ResourceDesc, ResourceKind, ResourceUsage,
    ResourceViewDesc, SubresourceData, TextureDesc, TextureDimension, TrackingError,
};
use lumen_core::{
    DescriptorSet, DescriptorSetLayout, Pipeline, PipelineLayout, Resource, ResourceView, Sampler,
};

use super::conversion::*;
use super::dispatch::{GlDispatch, GlError};
use super::gl::{self, GLenum, GLint, GLuint};
use super::handle::{GlHandle, GlHandleFlags};
use super::pipeline::{self, GlPipelineState};

// ============================================================================
// Records
// ============================================================================

/// Texture, buffer or renderbuffer known to the layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    pub desc: ResourceDesc,
    /// Sized internal format of textures and renderbuffers.
    pub internal_format: GLenum,
    /// Created through [`DeviceApi`].
    pub owned: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewRecord {
    /// Weak link: the resource may already be deleted.
    pub resource: Resource,
    pub desc: ResourceViewDesc,
    pub owned: bool,
    /// Live handles returned by `create_resource_view` for a view that
    /// reuses the resource name. Identical views share this record.
    pub shares: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerRecord {
    pub desc: SamplerDesc,
    pub owned: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgramRecord {
    pub stages: ShaderStage,
    /// Vertex array of the input layout, zero if none.
    pub vao: GLuint,
    /// Fixed-function state of layer-created graphics pipelines.
    pub state: Option<Box<GlPipelineState>>,
    pub owned: bool,
}

/// GL object name spaces. Calls like `glDeleteTextures` carry only names,
/// so resources are also indexed by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameSpace {
    Texture,
    Buffer,
    Renderbuffer,
}

impl NameSpace {
    pub fn of_target(target: GLenum) -> Option<Self> {
        if gl::is_texture_target(target) {
            Some(NameSpace::Texture)
        } else if gl::is_buffer_target(target) {
            Some(NameSpace::Buffer)
        } else if target == gl::RENDERBUFFER {
            Some(NameSpace::Renderbuffer)
        } else {
            None
        }
    }
}

/// Registry tables of one share group, guarded by one lock.
#[derive(Debug)]
pub struct Tables {
    pub resources: ObjectTable<ResourceRecord>,
    pub views: ObjectTable<ViewRecord>,
    pub samplers: ObjectTable<SamplerRecord>,
    pub pipelines: ObjectTable<ProgramRecord>,
    pub pipeline_layouts: ObjectTable<PipelineLayoutDesc>,
    pub set_layouts: ObjectTable<DescriptorSetLayoutRecord>,
    pub descriptor_sets: ObjectTable<DescriptorSetRecord>,
    names: HashMap<(NameSpace, GLuint), GlHandle>,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            resources: ObjectTable::new("resource"),
            views: ObjectTable::new("resource view"),
            samplers: ObjectTable::new("sampler"),
            pipelines: ObjectTable::new("program"),
            pipeline_layouts: ObjectTable::new("pipeline layout"),
            set_layouts: ObjectTable::new("descriptor set layout"),
            descriptor_sets: ObjectTable::new("descriptor set"),
            names: HashMap::new(),
        }
    }
}

impl Tables {
    /// Number of records across all tables.
    pub fn len(&self) -> usize {
        self.resources.len()
            + self.views.len()
            + self.samplers.len()
            + self.pipelines.len()
            + self.pipeline_layouts.len()
            + self.set_layouts.len()
            + self.descriptor_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a resource and index it by name.
    pub fn insert_resource(&mut self, handle: GlHandle, record: ResourceRecord) -> Result<(), TrackingError> {
        self.resources.register(handle.to_bits(), record)?;
        if let Some(space) = NameSpace::of_target(handle.target) {
            self.names.insert((space, handle.name), handle);
        }
        Ok(())
    }

    /// Register or respecify a resource, e.g. after another `glTexImage*` call.
    pub fn replace_resource(&mut self, handle: GlHandle, record: ResourceRecord) {
        if let Some(space) = NameSpace::of_target(handle.target) {
            if let Some(previous) = self.names.insert((space, handle.name), handle) {
                if previous != handle {
                    self.resources.unregister(previous.to_bits());
                }
            }
        }
        let _ = self.resources.register_or_replace(handle.to_bits(), record);
    }

    pub fn remove_resource(&mut self, handle: GlHandle) -> Option<ResourceRecord> {
        if let Some(space) = NameSpace::of_target(handle.target) {
            if self.names.get(&(space, handle.name)) == Some(&handle) {
                self.names.remove(&(space, handle.name));
            }
        }
        self.resources.unregister(handle.to_bits())
    }

    /// Handle of the resource named `name` in `space`.
    pub fn resource_by_name(&self, space: NameSpace, name: GLuint) -> Option<GlHandle> {
        self.names.get(&(space, name)).copied()
    }
}

// ============================================================================
// Device
// ============================================================================

/// Layer state of one GL share group.
pub struct GlDevice {
    dispatch: Arc<dyn GlDispatch>,
    addons: Arc<AddonRegistry>,
    config: LayerConfig,
    registry: HandleRegistry<Tables>,
    /// Source of handles for objects that exist only as records.
    next_record_handle: AtomicU64,
    /// Contexts currently sharing this device.
    contexts: AtomicUsize,
}

impl std::fmt::Debug for GlDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlDevice")
            .field("context", &format_args!("{:#x}", self.dispatch.context()))
            .field("objects", &self.registry.lock().len())
            .finish()
    }
}

impl GlDevice {
    pub fn new(dispatch: Arc<dyn GlDispatch>, addons: Arc<AddonRegistry>, config: LayerConfig) -> Self {
        log::debug!("GlDevice: wrapping context {:#x}", dispatch.context());
        Self {
            dispatch,
            addons,
            config,
            registry: HandleRegistry::new(Tables::default()),
            next_record_handle: AtomicU64::new(1),
            contexts: AtomicUsize::new(0),
        }
    }

    pub fn dispatch(&self) -> &dyn GlDispatch {
        self.dispatch.as_ref()
    }

    pub fn addons(&self) -> &AddonRegistry {
        &self.addons
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandleRegistry<Tables> {
        &self.registry
    }

    pub(crate) fn log_failure(&self, call: &str, error: GlError) {
        if self.config.verbose_log {
            log::warn!("{} failed with {}", call, error);
        }
    }

    /// Count a context joining the share group. Returns the new count.
    pub(crate) fn attach_context(&self) -> usize {
        self.contexts.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Count a context leaving the share group. Returns the remaining count.
    pub(crate) fn detach_context(&self) -> usize {
        let previous = self.contexts.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "context count underflow");
        previous.saturating_sub(1)
    }

    fn next_record_handle(&self) -> u64 {
        self.next_record_handle.fetch_add(1, Ordering::Relaxed)
    }

    // ========================================================================
    // Application object registration
    // ========================================================================

    /// Track the default framebuffer of the current pixel format.
    ///
    /// Returns the color view and the depth-stencil view (null when the pixel
    /// format has no depth buffer).
    pub fn register_default_framebuffer(&self) -> (ResourceView, ResourceView) {
        let framebuffer = self.dispatch.default_framebuffer();
        let mut tables = self.registry.lock();
        let mut register = |handle: GlHandle, internal_format: GLenum, usage: ResourceUsage| {
            let desc = describe_renderbuffer(
                internal_format,
                framebuffer.width,
                framebuffer.height,
                framebuffer.samples,
            )
            .with_usage(usage);
            tables.replace_resource(
                handle,
                ResourceRecord {
                    desc,
                    internal_format,
                    owned: false,
                },
            );
            let view = handle.with_flags(GlHandleFlags::NOT_OWNED);
            let _ = tables.views.register_or_replace(
                view.to_bits(),
                ViewRecord {
                    resource: handle.resource(),
                    desc: ResourceViewDesc::for_resource(&desc),
                    owned: false,
                    shares: 0,
                },
            );
            view.view()
        };

        let color = register(
            GlHandle::default_color(),
            framebuffer.color_format,
            ResourceUsage::RENDER_TARGET | ResourceUsage::PRESENT | ResourceUsage::COPY_SOURCE,
        );
        let depth = if framebuffer.depth_format == gl::NONE {
            ResourceView::NULL
        } else {
            register(
                GlHandle::default_depth_stencil(),
                framebuffer.depth_format,
                ResourceUsage::DEPTH_STENCIL,
            )
        };
        (color, depth)
    }

    /// Track a texture the application specified. Respecifying replaces the
    /// previous description.
    pub fn register_texture(&self, handle: GlHandle, desc: ResourceDesc, internal_format: GLenum) {
        self.registry.lock().replace_resource(
            handle,
            ResourceRecord {
                desc,
                internal_format,
                owned: false,
            },
        );
    }

    /// Record that mip `level` of an application texture was specified.
    pub fn grow_texture_levels(&self, handle: GlHandle, level: u32) {
        let mut tables = self.registry.lock();
        if let Some(record) = tables.resources.get_mut(handle.to_bits()) {
            if let ResourceKind::Texture(texture) = &mut record.desc.kind {
                let levels = u16::try_from(level + 1).unwrap_or(u16::MAX);
                texture.levels = texture.levels.max(levels);
            }
        }
    }

    pub fn register_buffer(&self, handle: GlHandle, desc: ResourceDesc) {
        self.registry.lock().replace_resource(
            handle,
            ResourceRecord {
                desc,
                internal_format: gl::NONE,
                owned: false,
            },
        );
    }

    /// Handle of an application object known only by name.
    pub fn resource_by_name(&self, space: NameSpace, name: GLuint) -> Option<GlHandle> {
        self.registry.lock().resource_by_name(space, name)
    }

    /// Drop the record of an application resource whose deletion is being
    /// forwarded to the driver.
    pub fn forget_resource(&self, handle: GlHandle) -> Option<ResourceRecord> {
        self.registry.lock().remove_resource(handle)
    }

    /// Drop the views that share the name of a deleted resource. Views with
    /// their own name stay registered.
    pub fn forget_alias_views(&self, resource: GlHandle) -> Vec<ResourceView> {
        self.registry
            .lock()
            .views
            .drain_where(|bits, _| {
                let view = GlHandle::from_bits(bits);
                view.flags.contains(GlHandleFlags::NOT_OWNED) && view.without_flags() == resource
            })
            .into_iter()
            .map(|(bits, _)| ResourceView(bits))
            .collect()
    }

    /// View standing for a whole resource when it is attached to a framebuffer.
    ///
    /// The view shares the resource's name and is never deleted on its own.
    pub fn register_attachment_view(&self, resource: GlHandle, level: u32, layer: Option<u32>) -> ResourceView {
        let mut tables = self.registry.lock();
        let Some(record) = tables.resources.get(resource.to_bits()) else {
            log::warn!(
                "GlDevice: attaching unknown object {} (target {:#x})",
                resource.name,
                resource.target
            );
            return ResourceView::NULL;
        };
        let mut desc = ResourceViewDesc::for_resource(&record.desc);
        if let ViewRange::Texture {
            first_level,
            levels,
            first_layer,
            layers,
        } = &mut desc.range
        {
            *first_level = level;
            *levels = 1;
            if let Some(layer) = layer {
                *first_layer = layer;
                *layers = 1;
            }
        }
        let mut flags = GlHandleFlags::NOT_OWNED;
        if desc.format.is_srgb() {
            flags |= GlHandleFlags::SRGB;
        }
        let view = resource.with_flags(flags);
        let shares = tables.views.get(view.to_bits()).map_or(0, |record| record.shares);
        let _ = tables.views.register_or_replace(
            view.to_bits(),
            ViewRecord {
                resource: resource.resource(),
                desc,
                owned: false,
                shares,
            },
        );
        view.view()
    }

    /// Track a program the application linked.
    pub fn register_program(&self, program: GLuint, stages: ShaderStage) -> Pipeline {
        let handle = GlHandle::new(gl::PROGRAM, program);
        let record = ProgramRecord {
            stages,
            vao: 0,
            state: None,
            owned: false,
        };
        let _ = self
            .registry
            .lock()
            .pipelines
            .register_or_replace(handle.to_bits(), record);
        handle.pipeline()
    }

    pub fn forget_program(&self, program: GLuint) -> Option<ProgramRecord> {
        self.registry
            .lock()
            .pipelines
            .unregister(GlHandle::new(gl::PROGRAM, program).to_bits())
    }

    /// Stage mask of a program, or the graphics stages for unknown programs.
    pub fn program_stages(&self, pipeline: Pipeline) -> ShaderStage {
        self.registry
            .lock()
            .pipelines
            .get(pipeline.raw())
            .map_or(ShaderStage::ALL_GRAPHICS, |record| record.stages)
    }

    /// Converted fixed-function state of a layer-created graphics pipeline.
    pub fn pipeline_state(&self, pipeline: Pipeline) -> Option<GlPipelineState> {
        self.registry
            .lock()
            .pipelines
            .get(pipeline.raw())
            .and_then(|record| record.state.as_deref().cloned())
    }

    /// Remove every record, deleting the objects the layer owns.
    ///
    /// Returns the number of application objects that were still registered.
    /// The default framebuffer does not count.
    pub fn release_all(&self) -> usize {
        let mut tables = self.registry.lock();
        let mut leaked = 0;

        let _ = tables.descriptor_sets.drain();
        let _ = tables.set_layouts.drain();
        let _ = tables.pipeline_layouts.drain();
        for (bits, record) in tables.views.drain() {
            let handle = GlHandle::from_bits(bits);
            if handle.flags.contains(GlHandleFlags::NOT_OWNED) {
                continue;
            }
            if record.owned {
                self.dispatch.delete_textures(&[handle.name]);
            } else {
                leaked += 1;
            }
        }
        for (bits, record) in tables.resources.drain() {
            let handle = GlHandle::from_bits(bits);
            if handle.is_default_framebuffer() {
                continue;
            }
            if record.owned {
                self.delete_resource_object(handle);
            } else {
                leaked += 1;
            }
        }
        tables.names.clear();
        for (bits, record) in tables.samplers.drain() {
            if record.owned {
                self.dispatch.delete_samplers(&[GlHandle::from_bits(bits).name]);
            } else {
                leaked += 1;
            }
        }
        for (bits, record) in tables.pipelines.drain() {
            if record.owned {
                self.delete_program_objects(GlHandle::from_bits(bits).name, &record);
            } else {
                leaked += 1;
            }
        }

        if leaked > 0 {
            log::warn!(
                "GlDevice: {} application objects were not deleted before the last context",
                leaked
            );
        }
        leaked
    }

    fn delete_resource_object(&self, handle: GlHandle) {
        match NameSpace::of_target(handle.target) {
            Some(NameSpace::Texture) => self.dispatch.delete_textures(&[handle.name]),
            Some(NameSpace::Buffer) => self.dispatch.delete_buffers(&[handle.name]),
            Some(NameSpace::Renderbuffer) => self.dispatch.delete_renderbuffers(&[handle.name]),
            None => {}
        }
    }

    fn delete_program_objects(&self, program: GLuint, record: &ProgramRecord) {
        if record.vao != 0 {
            self.dispatch.delete_vertex_arrays(&[record.vao]);
        }
        self.dispatch.delete_program(program);
    }

    // ========================================================================
    // Resource creation
    // ========================================================================

    fn create_texture_resource(
        &self,
        desc: &ResourceDesc,
        texture: &TextureDesc,
        initial_data: Option<&[SubresourceData<'_>]>,
    ) -> ApiResult<(GlHandle, GLenum)> {
        let internal_format = convert_format(texture.format);
        if internal_format == gl::NONE {
            return Err(ApiError::Unsupported(format!("format {:?}", texture.format)));
        }
        if let Some(data) = initial_data {
            if data.len() < texture.subresource_count() as usize {
                return Err(ApiError::InvalidParameter(format!(
                    "{} subresources of initial data for {} subresources",
                    data.len(),
                    texture.subresource_count()
                )));
            }
        }

        if texture.dimension == TextureDimension::Surface {
            if initial_data.is_some() {
                return Err(ApiError::Unsupported(
                    "initial data for renderbuffers".into(),
                ));
            }
            let name = self.dispatch.create_renderbuffer().map_err(api_error)?;
            if let Err(error) = self.dispatch.renderbuffer_storage(
                name,
                u32::from(texture.samples),
                internal_format,
                texture.width,
                texture.height,
            ) {
                self.log_failure("glNamedRenderbufferStorage", error);
                self.dispatch.delete_renderbuffers(&[name]);
                return Err(api_error(error));
            }
            return Ok((GlHandle::new(gl::RENDERBUFFER, name), internal_format));
        }

        let target = convert_texture_target(texture, desc.flags).ok_or_else(|| {
            ApiError::InvalidParameter(format!("texture dimension {:?}", texture.dimension))
        })?;
        let name = self.dispatch.create_texture(target).map_err(api_error)?;
        let result = self.specify_texture(name, target, texture, internal_format, initial_data);
        if let Err(error) = result {
            self.log_failure("glTextureStorage", error);
            self.dispatch.delete_textures(&[name]);
            return Err(api_error(error));
        }
        Ok((GlHandle::new(target, name), internal_format))
    }

    fn specify_texture(
        &self,
        name: GLuint,
        target: GLenum,
        texture: &TextureDesc,
        internal_format: GLenum,
        initial_data: Option<&[SubresourceData<'_>]>,
    ) -> Result<(), GlError> {
        let levels = u32::from(texture.levels).max(1);
        self.dispatch.texture_storage(
            name,
            target,
            levels,
            internal_format,
            texture.width,
            texture.height,
            u32::from(texture.depth_or_layers).max(1),
            u32::from(texture.samples).max(1),
        )?;
        if let Some(data) = initial_data {
            // Subresource `level + layer * levels`.
            for layer in 0..texture.layers() {
                for level in 0..levels {
                    let subresource = &data[(level + layer * levels) as usize];
                    self.dispatch.texture_sub_image(
                        name,
                        target,
                        level,
                        layer,
                        texture.level_width(level),
                        texture.level_height(level),
                        texture.level_depth(level),
                        internal_format,
                        subresource,
                    )?;
                }
            }
        }
        if let Some(swizzle) = format_swizzle(texture.format) {
            self.dispatch
                .texture_parameters(name, gl::TEXTURE_SWIZZLE_RGBA, &swizzle.map(|c| c as GLint));
        }
        Ok(())
    }

    fn create_buffer_resource(
        &self,
        desc: &ResourceDesc,
        size: u64,
        initial_data: Option<&[SubresourceData<'_>]>,
    ) -> ApiResult<(GlHandle, GLenum)> {
        let target = convert_buffer_target(desc).ok_or_else(|| {
            ApiError::Unsupported(format!("buffer usage {:?} in heap {:?}", desc.usage, desc.heap))
        })?;
        let data = initial_data.and_then(|data| data.first()).map(|data| data.data);
        if data.is_some_and(|data| (data.len() as u64) < size) {
            return Err(ApiError::InvalidParameter(
                "initial data is smaller than the buffer".into(),
            ));
        }

        let name = self.dispatch.create_buffer().map_err(api_error)?;
        let data = data.map(|data| &data[..size as usize]);
        if let Err(error) =
            self.dispatch
                .buffer_storage(name, size, data, convert_buffer_storage_flags(desc.heap))
        {
            self.log_failure("glNamedBufferStorage", error);
            self.dispatch.delete_buffers(&[name]);
            return Err(api_error(error));
        }
        Ok((GlHandle::new(target, name), gl::NONE))
    }

    /// Create a texture view object, or reuse the resource's name when the
    /// view is identical to the whole resource.
    fn create_texture_view(
        &self,
        resource: GlHandle,
        record: &ResourceRecord,
        texture: &TextureDesc,
        usage_type: ResourceUsage,
        desc: &mut ResourceViewDesc,
    ) -> ApiResult<GlHandle> {
        if desc.format == Format::Unknown {
            desc.format = record.desc.format();
        }
        let total_levels = u32::from(texture.levels).max(1);
        let (first_level, levels, first_layer, layers) = desc
            .resolved_texture_range(total_levels, texture.layers())
            .ok_or_else(|| ApiError::InvalidParameter("buffer range on a texture".into()))?;
        let internal_format = convert_format(desc.format);
        if internal_format == gl::NONE {
            return Err(ApiError::Unsupported(format!("view format {:?}", desc.format)));
        }

        let mut flags = GlHandleFlags::NOT_OWNED;
        if desc.format.is_srgb() {
            flags |= GlHandleFlags::SRGB;
        }
        // Renderbuffers and the default framebuffer cannot be viewed.
        if resource.target == gl::RENDERBUFFER || resource.is_default_framebuffer() {
            return Ok(resource.with_flags(flags));
        }

        let view_target = convert_view_type(desc.ty).unwrap_or(resource.target);
        let stencil_only = desc.format.is_stencil_view();
        let whole = first_level == 0
            && levels == total_levels
            && first_layer == 0
            && layers == texture.layers();
        if view_target == resource.target
            && whole
            && internal_format == record.internal_format
            && !stencil_only
        {
            return Ok(resource.with_flags(flags));
        }

        if !self.check_capability(DeviceCaps::SamplerWithResourceView) {
            return Err(ApiError::Unsupported("texture views".into()));
        }
        let name = self
            .dispatch
            .texture_view(
                view_target,
                resource.name,
                internal_format,
                first_level,
                levels,
                first_layer,
                layers,
            )
            .map_err(|error| {
                self.log_failure("glTextureView", error);
                api_error(error)
            })?;
        if let Some(swizzle) = format_swizzle(desc.format) {
            self.dispatch
                .texture_parameters(name, gl::TEXTURE_SWIZZLE_RGBA, &swizzle.map(|c| c as GLint));
        }
        if stencil_only {
            self.dispatch
                .texture_parameters(name, gl::DEPTH_STENCIL_TEXTURE_MODE, &[gl::STENCIL_INDEX as GLint]);
        } else if desc.format.has_stencil() && usage_type.intersects(ResourceUsage::SHADER_RESOURCE) {
            self.dispatch.texture_parameters(
                name,
                gl::DEPTH_STENCIL_TEXTURE_MODE,
                &[gl::DEPTH_COMPONENT as GLint],
            );
        }
        Ok(GlHandle::new(view_target, name))
    }
}

impl DeviceApi for GlDevice {
    fn api(&self) -> GraphicsApi {
        GraphicsApi::OpenGL
    }

    fn native(&self) -> u64 {
        self.dispatch.context()
    }

    fn check_capability(&self, capability: DeviceCaps) -> bool {
        let version = self.dispatch.version();
        let at_least = |major: u32, minor: u32| version >= (major, minor);
        let extension = |name: &str| self.dispatch.has_extension(name);
        match capability {
            DeviceCaps::ComputeShader | DeviceCaps::DrawOrDispatchIndirect => {
                at_least(4, 3) || extension("GL_ARB_compute_shader")
            }
            DeviceCaps::GeometryShader => at_least(3, 2),
            DeviceCaps::HullAndDomainShader => {
                at_least(4, 0) || extension("GL_ARB_tessellation_shader")
            }
            DeviceCaps::DualSourceBlend => at_least(3, 3) || extension("GL_ARB_blend_func_extended"),
            DeviceCaps::MultiViewport => at_least(4, 1) || extension("GL_ARB_viewport_array"),
            DeviceCaps::SamplerAnisotropic => {
                at_least(4, 6)
                    || extension("GL_ARB_texture_filter_anisotropic")
                    || extension("GL_EXT_texture_filter_anisotropic")
            }
            DeviceCaps::SamplerWithResourceView => at_least(4, 3) || extension("GL_ARB_texture_view"),
            DeviceCaps::CopyBufferToTexture | DeviceCaps::Blit => true,
            DeviceCaps::ResolveRegion | DeviceCaps::CopyBufferRegion => true,
            DeviceCaps::LogicOp
            | DeviceCaps::IndependentBlend
            | DeviceCaps::FillModeNonSolid
            | DeviceCaps::PartialPushConstantUpdates
            | DeviceCaps::DrawInstanced
            | DeviceCaps::SamplerCompare
            | DeviceCaps::DescriptorSets => true,
            DeviceCaps::SharedResource => false,
        }
    }

    fn check_format_support(&self, format: Format, usage: ResourceUsage) -> bool {
        let internal_format = convert_format(format);
        if internal_format == gl::NONE {
            return false;
        }
        let query = |pname| {
            self.dispatch
                .internal_format_query(gl::TEXTURE_2D, internal_format, pname)
        };
        if query(gl::INTERNALFORMAT_SUPPORTED) == 0 {
            return false;
        }
        if usage.intersects(ResourceUsage::RENDER_TARGET | ResourceUsage::DEPTH_STENCIL)
            && query(gl::FRAMEBUFFER_RENDERABLE) != gl::FULL_SUPPORT
        {
            return false;
        }
        if usage.intersects(ResourceUsage::SHADER_RESOURCE) && query(gl::FILTER) != gl::FULL_SUPPORT {
            return false;
        }
        if usage.contains(ResourceUsage::UNORDERED_ACCESS)
            && query(gl::SHADER_IMAGE_LOAD) != gl::FULL_SUPPORT
        {
            return false;
        }
        true
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> ApiResult<Sampler> {
        let name = self.dispatch.create_sampler().map_err(api_error)?;
        let anisotropy = self.check_capability(DeviceCaps::SamplerAnisotropic);
        for (pname, value) in convert_sampler_desc(desc, anisotropy) {
            self.dispatch.sampler_parameter(name, pname, value);
        }
        let handle = GlHandle::new(gl::SAMPLER, name);
        let record = SamplerRecord {
            desc: *desc,
            owned: true,
        };
        if self
            .registry
            .lock()
            .samplers
            .register(handle.to_bits(), record)
            .is_err()
        {
            self.dispatch.delete_samplers(&[name]);
            return Err(ApiError::InvalidParameter("sampler already registered".into()));
        }
        Ok(handle.sampler())
    }

    fn destroy_sampler(&self, sampler: Sampler) {
        if sampler.is_null() {
            return;
        }
        self.registry.lock().samplers.unregister(sampler.raw());
        self.dispatch.delete_samplers(&[GlHandle::from(sampler).name]);
    }

    fn create_resource(
        &self,
        desc: &ResourceDesc,
        initial_data: Option<&[SubresourceData<'_>]>,
        _initial_state: ResourceUsage,
    ) -> ApiResult<Resource> {
        log::trace!("GlDevice: creating resource {:?}", desc.ty());
        let (handle, internal_format) = match &desc.kind {
            ResourceKind::Texture(texture) => {
                self.create_texture_resource(desc, texture, initial_data)?
            }
            ResourceKind::Buffer { size, .. } => {
                self.create_buffer_resource(desc, *size, initial_data)?
            }
        };
        let record = ResourceRecord {
            desc: *desc,
            internal_format,
            owned: true,
        };
        if self.registry.lock().insert_resource(handle, record).is_err() {
            self.delete_resource_object(handle);
            return Err(ApiError::InvalidParameter("resource already registered".into()));
        }
        Ok(handle.resource())
    }

    fn destroy_resource(&self, resource: Resource) {
        if resource.is_null() {
            return;
        }
        let handle = GlHandle::from(resource);
        if self.registry.lock().remove_resource(handle).is_none() {
            log::warn!("GlDevice: destroying unknown resource {:#x}", resource.raw());
        }
        self.delete_resource_object(handle);
    }

    fn create_resource_view(
        &self,
        resource: Resource,
        usage_type: ResourceUsage,
        desc: &ResourceViewDesc,
    ) -> ApiResult<ResourceView> {
        let handle = GlHandle::from(resource);
        let record = self
            .registry
            .lock()
            .resources
            .lookup(resource.raw())
            .cloned()
            .map_err(|e| ApiError::InvalidParameter(e.to_string()))?;

        let mut desc = *desc;
        let view = match (&record.desc.kind, desc.range) {
            (ResourceKind::Buffer { .. }, ViewRange::Buffer { offset, size }) => {
                let internal_format = convert_format(desc.format);
                if internal_format == gl::NONE {
                    return Err(ApiError::Unsupported(
                        "buffer views without a format".into(),
                    ));
                }
                let name = self
                    .dispatch
                    .texture_buffer(handle.name, internal_format, offset, size)
                    .map_err(api_error)?;
                GlHandle::new(gl::TEXTURE_BUFFER, name)
            }
            (ResourceKind::Texture(texture), ViewRange::Texture { .. }) => {
                self.create_texture_view(handle, &record, texture, usage_type, &mut desc)?
            }
            _ => {
                return Err(ApiError::InvalidParameter(
                    "view range does not match the resource kind".into(),
                ))
            }
        };

        let not_owned = view.flags.contains(GlHandleFlags::NOT_OWNED);
        let record = ViewRecord {
            resource,
            desc,
            owned: true,
            shares: 1,
        };
        let mut tables = self.registry.lock();
        if not_owned {
            // Identical views of one resource share a handle and a record.
            match tables.views.get_mut(view.to_bits()) {
                Some(existing) => existing.shares += 1,
                None => {
                    let _ = tables.views.register(view.to_bits(), record);
                }
            }
        } else if tables.views.register(view.to_bits(), record).is_err() {
            drop(tables);
            self.dispatch.delete_textures(&[view.name]);
            return Err(ApiError::InvalidParameter("view already registered".into()));
        }
        Ok(view.view())
    }

    fn destroy_resource_view(&self, view: ResourceView) {
        if view.is_null() {
            return;
        }
        let handle = GlHandle::from(view);
        let record = {
            let mut tables = self.registry.lock();
            if handle.flags.contains(GlHandleFlags::NOT_OWNED) {
                if let Some(shared) = tables.views.get_mut(view.raw()) {
                    if shared.shares > 1 {
                        shared.shares -= 1;
                        return;
                    }
                }
            }
            for set in tables.descriptor_sets.iter().map(|(handle, _)| handle).collect::<Vec<_>>() {
                if let Some(record) = tables.descriptor_sets.get_mut(set) {
                    record.forget_view(view);
                }
            }
            tables.views.unregister(view.raw())
        };
        if record.is_none() {
            log::warn!("GlDevice: destroying unknown view {:#x}", view.raw());
        }
        if !handle.flags.contains(GlHandleFlags::NOT_OWNED) {
            self.dispatch.delete_textures(&[handle.name]);
        }
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> ApiResult<Pipeline> {
        let (program, vao, state) = pipeline::build_pipeline(self.dispatch.as_ref(), desc)?;
        let handle = GlHandle::new(gl::PROGRAM, program);
        let record = ProgramRecord {
            stages: desc.stages(),
            vao,
            state,
            owned: true,
        };
        let mut tables = self.registry.lock();
        if tables.pipelines.contains(handle.to_bits()) {
            drop(tables);
            self.delete_program_objects(program, &record);
            return Err(ApiError::InvalidParameter("program already registered".into()));
        }
        let _ = tables.pipelines.register(handle.to_bits(), record);
        Ok(handle.pipeline())
    }

    fn destroy_pipeline(&self, pipeline: Pipeline) {
        if pipeline.is_null() {
            return;
        }
        let handle = GlHandle::from(pipeline);
        match self.registry.lock().pipelines.unregister(pipeline.raw()) {
            Some(record) => self.delete_program_objects(handle.name, &record),
            None => self.dispatch.delete_program(handle.name),
        }
    }

    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> ApiResult<PipelineLayout> {
        let push_constants = desc
            .params
            .iter()
            .filter(|param| matches!(param, PipelineLayoutParam::PushConstants { .. }))
            .count();
        if push_constants > 1 {
            return Err(ApiError::Unsupported(
                "more than one push constant range".into(),
            ));
        }
        let handle = self.next_record_handle();
        let _ = self
            .registry
            .lock()
            .pipeline_layouts
            .register(handle, desc.clone());
        Ok(PipelineLayout(handle))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayout) {
        if layout.is_null() {
            return;
        }
        self.registry.lock().pipeline_layouts.unregister(layout.raw());
    }

    fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetLayoutDesc,
    ) -> ApiResult<DescriptorSetLayout> {
        if desc.ranges.len() != 1 {
            return Err(ApiError::Unsupported(format!(
                "descriptor set layouts with {} ranges",
                desc.ranges.len()
            )));
        }
        let handle = self.next_record_handle();
        let _ = self
            .registry
            .lock()
            .set_layouts
            .register(handle, DescriptorSetLayoutRecord::new(desc.clone()));
        Ok(DescriptorSetLayout(handle))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayout) {
        if layout.is_null() {
            return;
        }
        self.registry.lock().set_layouts.unregister(layout.raw());
    }

    fn create_descriptor_sets(
        &self,
        layout: DescriptorSetLayout,
        count: u32,
    ) -> ApiResult<Vec<DescriptorSet>> {
        let mut tables = self.registry.lock();
        let layout_record = tables
            .set_layouts
            .lookup(layout.raw())
            .cloned()
            .map_err(|e| ApiError::InvalidParameter(e.to_string()))?;
        if layout_record.desc().push_descriptors {
            return Err(ApiError::InvalidParameter(
                "push descriptor layouts cannot back descriptor sets".into(),
            ));
        }
        let sets = (0..count)
            .map(|_| {
                let handle = self.next_record_handle();
                let _ = tables
                    .descriptor_sets
                    .register(handle, DescriptorSetRecord::new(layout, &layout_record));
                DescriptorSet(handle)
            })
            .collect();
        Ok(sets)
    }

    fn destroy_descriptor_sets(&self, sets: &[DescriptorSet]) {
        let mut tables = self.registry.lock();
        for set in sets.iter().filter(|set| !set.is_null()) {
            tables.descriptor_sets.unregister(set.raw());
        }
    }

    fn update_descriptor_sets(&self, updates: &[DescriptorSetUpdate]) -> ApiResult<()> {
        let mut tables = self.registry.lock();
        // Validate every write before applying any.
        let mut pending: HashMap<u64, DescriptorSetRecord> = HashMap::new();
        for update in updates {
            let set = update.set.raw();
            let mut record = match pending.remove(&set) {
                Some(record) => record,
                None => tables
                    .descriptor_sets
                    .lookup(set)
                    .map_err(|e| ApiError::InvalidParameter(e.to_string()))?
                    .clone(),
            };
            record.write(update.binding, update.array_offset, &update.values)?;
            pending.insert(set, record);
        }
        for (set, record) in pending {
            if let Some(current) = tables.descriptor_sets.get_mut(set) {
                *current = record;
            }
        }
        Ok(())
    }

    fn get_descriptor_set(&self, set: DescriptorSet) -> Option<DescriptorSetRecord> {
        self.registry.lock().descriptor_sets.get(set.raw()).cloned()
    }

    fn get_resource_desc(&self, resource: Resource) -> Option<ResourceDesc> {
        self.registry
            .lock()
            .resources
            .get(GlHandle::from(resource).without_flags().to_bits())
            .map(|record| record.desc)
    }

    fn get_resource_from_view(&self, view: ResourceView) -> Option<Resource> {
        self.registry
            .lock()
            .views
            .get(view.raw())
            .map(|record| record.resource)
    }

    fn get_resource_view_desc(&self, view: ResourceView) -> Option<ResourceViewDesc> {
        self.registry
            .lock()
            .views
            .get(view.raw())
            .map(|record| record.desc)
    }

    fn is_resource_handle_valid(&self, resource: Resource) -> bool {
        self.registry.lock().resources.contains(resource.raw())
    }

    fn is_resource_view_handle_valid(&self, view: ResourceView) -> bool {
        self.registry.lock().views.contains(view.raw())
    }
}

static_assertions::assert_impl_all!(GlDevice: Send, Sync);

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::opengl::dummy::DummyGl;
    use lumen_core::descriptor::DescriptorValue;
    use lumen_core::pipeline::{DescriptorRange, DescriptorType, GraphicsPipelineDesc, ShaderDesc};
    use lumen_core::resource::{ResourceFlags, ALL_REMAINING};
    use lumen_core::ResourceViewType;

    fn device() -> (Arc<DummyGl>, GlDevice) {
        let dummy = Arc::new(DummyGl::new());
        let device = GlDevice::new(
            dummy.clone(),
            Arc::new(AddonRegistry::new()),
            LayerConfig::default(),
        );
        (dummy, device)
    }

    fn texture_desc(format: Format) -> ResourceDesc {
        ResourceDesc::texture(TextureDimension::D2, 256, 256, format)
            .with_levels(9)
            .with_usage(ResourceUsage::RENDER_TARGET | ResourceUsage::SHADER_RESOURCE)
    }

    #[test]
    fn test_create_texture_registers_record() {
        let (dummy, device) = device();
        let resource = device
            .create_resource(&texture_desc(Format::R8G8B8A8Unorm), None, ResourceUsage::UNDEFINED)
            .unwrap();
        let handle = GlHandle::from(resource);
        assert_eq!(handle.target, gl::TEXTURE_2D);
        assert!(dummy.objects().is_live(u64::from(handle.name)));
        assert_eq!(
            device.get_resource_desc(resource),
            Some(texture_desc(Format::R8G8B8A8Unorm))
        );
        assert_eq!(device.resource_by_name(NameSpace::Texture, handle.name), Some(handle));
    }

    #[test]
    fn test_alpha_only_texture_swizzle() {
        let (dummy, device) = device();
        let resource = device
            .create_resource(&texture_desc(Format::A8Unorm), None, ResourceUsage::UNDEFINED)
            .unwrap();
        let name = GlHandle::from(resource).name;
        assert_eq!(
            dummy.texture_parameter(name, gl::TEXTURE_SWIZZLE_RGBA),
            Some(vec![0, 0, 0, gl::RED as GLint])
        );
    }

    #[test]
    fn test_x8_texture_forces_alpha_one() {
        let (dummy, device) = device();
        let resource = device
            .create_resource(&texture_desc(Format::B8G8R8X8Unorm), None, ResourceUsage::UNDEFINED)
            .unwrap();
        let swizzle = dummy
            .texture_parameter(GlHandle::from(resource).name, gl::TEXTURE_SWIZZLE_RGBA)
            .unwrap();
        assert_eq!(swizzle[3], gl::ONE as GLint);
    }

    #[test]
    fn test_initial_data_uploads_every_subresource() {
        let (dummy, device) = device();
        let desc = ResourceDesc::texture(TextureDimension::D2, 4, 4, Format::R8G8B8A8Unorm)
            .with_levels(3)
            .with_depth_or_layers(2);
        let bytes = vec![0u8; 64];
        let data: Vec<_> = (0..6).map(|_| SubresourceData::new(&bytes, 16, 64)).collect();
        let resource = device
            .create_resource(&desc, Some(&data), ResourceUsage::SHADER_RESOURCE)
            .unwrap();
        let name = GlHandle::from(resource).name;
        let uploads = dummy.uploads();
        assert_eq!(uploads.len(), 6);
        assert_eq!(uploads[0], (name, 0, 0, 64));
        assert_eq!(uploads[5], (name, 2, 1, 64));
    }

    #[test]
    fn test_short_initial_data_rejected_before_creation() {
        let (dummy, device) = device();
        let bytes = vec![0u8; 16];
        let data = [SubresourceData::new(&bytes, 16, 16)];
        let result = device.create_resource(
            &texture_desc(Format::R8G8B8A8Unorm),
            Some(&data),
            ResourceUsage::UNDEFINED,
        );
        assert!(matches!(result, Err(ApiError::InvalidParameter(_))));
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_out_of_memory_leaves_nothing_behind() {
        let (dummy, device) = device();
        dummy.fail_storage(true);
        let result = device.create_resource(
            &texture_desc(Format::R8G8B8A8Unorm),
            None,
            ResourceUsage::UNDEFINED,
        );
        assert_eq!(result, Err(ApiError::OutOfMemory));
        assert!(device.registry().lock().is_empty());
        assert_eq!(dummy.objects().live_count(), 0);

        dummy.fail_storage(false);
        dummy.objects().fail_after(0);
        let result = device.create_resource(
            &ResourceDesc::buffer(64).with_usage(ResourceUsage::VERTEX_BUFFER),
            None,
            ResourceUsage::UNDEFINED,
        );
        assert_eq!(result, Err(ApiError::OutOfMemory));
        dummy.objects().clear_failures();
        assert!(device.registry().lock().is_empty());
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_buffer_targets_and_unsupported_heap() {
        let (_dummy, device) = device();
        let buffer = device
            .create_resource(
                &ResourceDesc::buffer(256).with_usage(ResourceUsage::INDEX_BUFFER),
                None,
                ResourceUsage::UNDEFINED,
            )
            .unwrap();
        assert_eq!(GlHandle::from(buffer).target, gl::ELEMENT_ARRAY_BUFFER);

        let result = device.create_resource(&ResourceDesc::buffer(256), None, ResourceUsage::UNDEFINED);
        assert!(matches!(result, Err(ApiError::Unsupported(_))));
    }

    #[test]
    fn test_surface_becomes_renderbuffer() {
        let (dummy, device) = device();
        let desc = ResourceDesc::texture(TextureDimension::Surface, 64, 64, Format::D24UnormS8Uint)
            .with_usage(ResourceUsage::DEPTH_STENCIL);
        let resource = device.create_resource(&desc, None, ResourceUsage::UNDEFINED).unwrap();
        let handle = GlHandle::from(resource);
        assert_eq!(handle.target, gl::RENDERBUFFER);
        assert_eq!(dummy.objects().kind_of(u64::from(handle.name)), Some("renderbuffer"));

        let view = device
            .create_resource_view(
                resource,
                ResourceUsage::DEPTH_STENCIL,
                &ResourceViewDesc::for_resource(&desc),
            )
            .unwrap();
        assert_eq!(GlHandle::from(view).without_flags(), handle);
    }

    #[test]
    fn test_degenerate_view_reuses_resource_name() {
        let (dummy, device) = device();
        let desc = texture_desc(Format::R8G8B8A8Unorm);
        let resource = device.create_resource(&desc, None, ResourceUsage::UNDEFINED).unwrap();
        let live = dummy.objects().live_count();

        let view_desc = ResourceViewDesc::texture(
            ResourceViewType::Texture2d,
            Format::Unknown,
            0,
            ALL_REMAINING,
            0,
            ALL_REMAINING,
        );
        let view = device
            .create_resource_view(resource, ResourceUsage::SHADER_RESOURCE, &view_desc)
            .unwrap();
        let handle = GlHandle::from(view);
        assert!(handle.flags.contains(GlHandleFlags::NOT_OWNED));
        assert_eq!(handle.without_flags(), GlHandle::from(resource));
        assert_eq!(dummy.objects().live_count(), live);
        assert_eq!(device.get_resource_from_view(view), Some(resource));

        // Destroying the view must not delete the texture.
        device.destroy_resource_view(view);
        assert!(dummy.objects().is_live(u64::from(handle.name)));
        device.destroy_resource(resource);
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_identical_degenerate_views_stay_valid_until_both_destroyed() {
        let (dummy, device) = device();
        let resource = device
            .create_resource(&texture_desc(Format::R8G8B8A8Unorm), None, ResourceUsage::UNDEFINED)
            .unwrap();
        let view_desc = ResourceViewDesc::texture(
            ResourceViewType::Texture2d,
            Format::Unknown,
            0,
            ALL_REMAINING,
            0,
            ALL_REMAINING,
        );
        let first = device
            .create_resource_view(resource, ResourceUsage::SHADER_RESOURCE, &view_desc)
            .unwrap();
        let second = device
            .create_resource_view(resource, ResourceUsage::SHADER_RESOURCE, &view_desc)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(device.registry().lock().views.get(first.raw()).map(|r| r.shares), Some(2));

        device.destroy_resource_view(first);
        assert!(device.is_resource_view_handle_valid(second));
        assert_eq!(device.get_resource_from_view(second), Some(resource));

        device.destroy_resource_view(second);
        assert!(!device.is_resource_view_handle_valid(second));
        device.destroy_resource(resource);
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_partial_view_creates_texture_view() {
        let (dummy, device) = device();
        let resource = device
            .create_resource(&texture_desc(Format::R8G8B8A8Typeless), None, ResourceUsage::UNDEFINED)
            .unwrap();
        let view = device
            .create_resource_view(
                resource,
                ResourceUsage::SHADER_RESOURCE,
                &ResourceViewDesc::texture(ResourceViewType::Texture2d, Format::R8G8B8A8UnormSrgb, 2, 1, 0, 1),
            )
            .unwrap();
        let handle = GlHandle::from(view);
        assert!(!handle.flags.contains(GlHandleFlags::NOT_OWNED));
        assert_ne!(handle.name, GlHandle::from(resource).name);
        assert!(dummy.calls().contains(&"glTextureView"));

        device.destroy_resource_view(view);
        assert!(!dummy.objects().is_live(u64::from(handle.name)));
    }

    #[test]
    fn test_stencil_view_selects_stencil_index() {
        let (dummy, device) = device();
        let desc = ResourceDesc::texture(TextureDimension::D2, 64, 64, Format::R24G8Typeless)
            .with_usage(ResourceUsage::DEPTH_STENCIL | ResourceUsage::SHADER_RESOURCE);
        let resource = device.create_resource(&desc, None, ResourceUsage::UNDEFINED).unwrap();
        let view = device
            .create_resource_view(
                resource,
                ResourceUsage::SHADER_RESOURCE,
                &ResourceViewDesc::texture(ResourceViewType::Texture2d, Format::X24TypelessG8Uint, 0, 1, 0, 1),
            )
            .unwrap();
        let name = GlHandle::from(view).name;
        assert_eq!(
            dummy.texture_parameter(name, gl::DEPTH_STENCIL_TEXTURE_MODE),
            Some(vec![gl::STENCIL_INDEX as GLint])
        );
    }

    #[test]
    fn test_view_outlives_resource() {
        let (dummy, device) = device();
        let desc = texture_desc(Format::R8G8B8A8Unorm);
        let resource = device.create_resource(&desc, None, ResourceUsage::UNDEFINED).unwrap();
        let view = device
            .create_resource_view(
                resource,
                ResourceUsage::SHADER_RESOURCE,
                &ResourceViewDesc::texture(ResourceViewType::Texture2d, Format::R8G8B8A8Unorm, 1, 1, 0, 1),
            )
            .unwrap();

        device.destroy_resource(resource);
        assert!(!device.is_resource_handle_valid(resource));
        assert!(device.is_resource_view_handle_valid(view));
        assert_eq!(device.get_resource_from_view(view), Some(resource));
        assert_eq!(device.get_resource_desc(resource), None);

        device.destroy_resource_view(view);
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_sampler_lifecycle() {
        let (dummy, device) = device();
        let sampler = device.create_sampler(&SamplerDesc::default()).unwrap();
        assert_eq!(GlHandle::from(sampler).target, gl::SAMPLER);
        assert!(!dummy.calls_on(GlHandle::from(sampler).name).is_empty());
        device.destroy_sampler(sampler);
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_pipeline_lifecycle() {
        let (dummy, device) = device();
        let desc = PipelineDesc::Graphics(Box::new(GraphicsPipelineDesc {
            vs: ShaderDesc::new(b"void main() {}".to_vec()),
            ps: ShaderDesc::new(b"void main() {}".to_vec()),
            ..Default::default()
        }));
        let pipeline = device.create_pipeline(&desc).unwrap();
        assert_eq!(
            device.program_stages(pipeline),
            ShaderStage::VERTEX | ShaderStage::PIXEL
        );
        assert!(device.pipeline_state(pipeline).is_some());
        device.destroy_pipeline(pipeline);
        assert_eq!(dummy.objects().live_count(), 0);

        dummy.fail_link(true);
        assert!(device.create_pipeline(&desc).is_err());
        assert!(device.registry().lock().pipelines.is_empty());
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_emulated_descriptor_sets() {
        let (_dummy, device) = device();
        let layout = device
            .create_descriptor_set_layout(&DescriptorSetLayoutDesc {
                ranges: vec![DescriptorRange {
                    binding: 0,
                    count: 4,
                    ty: DescriptorType::ShaderResourceView,
                    visibility: ShaderStage::PIXEL,
                }],
                push_descriptors: false,
            })
            .unwrap();
        let sets = device.create_descriptor_sets(layout, 2).unwrap();
        assert_eq!(sets.len(), 2);
        assert_ne!(sets[0], sets[1]);

        let view = ResourceView(0x42);
        device
            .update_descriptor_sets(&[DescriptorSetUpdate {
                set: sets[0],
                binding: 0,
                array_offset: 1,
                ty: DescriptorType::ShaderResourceView,
                values: vec![DescriptorValue::View(view)],
            }])
            .unwrap();
        let record = device.get_descriptor_set(sets[0]).unwrap();
        assert_eq!(record.get(0, 1), Some(&DescriptorValue::View(view)));

        // Overrunning writes leave the set untouched.
        let overrun = device.update_descriptor_sets(&[DescriptorSetUpdate {
            set: sets[1],
            binding: 0,
            array_offset: 3,
            ty: DescriptorType::ShaderResourceView,
            values: vec![DescriptorValue::View(view); 2],
        }]);
        assert!(overrun.is_err());
        assert_eq!(device.get_descriptor_set(sets[1]).unwrap().get(0, 3), Some(&DescriptorValue::Empty));

        device.destroy_descriptor_sets(&sets);
        assert!(device.get_descriptor_set(sets[0]).is_none());
    }

    #[test]
    fn test_layout_restrictions() {
        let (_dummy, device) = device();
        let two_ranges = DescriptorSetLayoutDesc {
            ranges: vec![
                DescriptorRange {
                    binding: 0,
                    count: 1,
                    ty: DescriptorType::ConstantBuffer,
                    visibility: ShaderStage::VERTEX,
                },
                DescriptorRange {
                    binding: 1,
                    count: 1,
                    ty: DescriptorType::Sampler,
                    visibility: ShaderStage::PIXEL,
                },
            ],
            push_descriptors: false,
        };
        assert!(matches!(
            device.create_descriptor_set_layout(&two_ranges),
            Err(ApiError::Unsupported(_))
        ));

        let push = PipelineLayoutParam::PushConstants {
            offset: 0,
            count: 4,
            visibility: ShaderStage::VERTEX,
        };
        assert!(device
            .create_pipeline_layout(&PipelineLayoutDesc { params: vec![push] })
            .is_ok());
        assert!(device
            .create_pipeline_layout(&PipelineLayoutDesc { params: vec![push, push] })
            .is_err());
    }

    #[test]
    fn test_default_framebuffer_views() {
        let (_dummy, device) = device();
        let (color, depth) = device.register_default_framebuffer();
        assert_eq!(GlHandle::from(color).without_flags(), GlHandle::default_color());
        assert!(!depth.is_null());
        let desc = device
            .get_resource_desc(device.get_resource_from_view(color).unwrap())
            .unwrap();
        assert_eq!(desc.as_texture().map(|t| (t.width, t.height)), Some((800, 600)));
        // The default framebuffer never counts as leaked.
        assert_eq!(device.release_all(), 0);
    }

    #[test]
    fn test_release_all_frees_owned_objects() {
        let (dummy, device) = device();
        let desc = texture_desc(Format::R8G8B8A8Unorm).with_flags(ResourceFlags::empty());
        let _ = device.create_resource(&desc, None, ResourceUsage::UNDEFINED).unwrap();
        let _ = device.create_sampler(&SamplerDesc::default()).unwrap();
        device.register_program(77, ShaderStage::ALL_GRAPHICS);
        assert_eq!(device.release_all(), 1);
        assert_eq!(dummy.objects().live_count(), 0);
        assert!(device.registry().lock().is_empty());
    }

    #[test]
    fn test_capabilities() {
        let (_dummy, device) = device();
        assert!(device.check_capability(DeviceCaps::ComputeShader));
        assert!(device.check_capability(DeviceCaps::SamplerAnisotropic));
        assert!(!device.check_capability(DeviceCaps::SharedResource));
        assert!(device.check_format_support(Format::R8G8B8A8Unorm, ResourceUsage::RENDER_TARGET));
        assert!(!device.check_format_support(Format::Unknown, ResourceUsage::SHADER_RESOURCE));
        assert!(!device.check_format_support(Format::D24UnormS8Uint, ResourceUsage::UNORDERED_ACCESS));
    }
}
