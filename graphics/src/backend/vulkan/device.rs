//! Abstract device of a Vulkan `VkDevice`.
//!
//! [`VulkanDevice`] keeps the handle registry of one device and implements
//! [`DeviceApi`] on top of the dispatch table. Objects created through the
//! abstract interface are owned by the layer and carry their memory
//! allocation; objects the application created are registered by the hooks
//! and only forwarded when destroyed.

use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use lumen_core::descriptor::{
    DescriptorSetLayoutRecord, DescriptorSetRecord, DescriptorSetUpdate, DescriptorValue,
};
use lumen_core::pipeline::{
    DescriptorSetLayoutDesc, DescriptorType, PipelineDesc, PipelineLayoutDesc, ShaderStage,
};
use lumen_core::resource::ViewRange;
use lumen_core::sampler::SamplerDesc;
use lumen_core::{
    AddonRegistry, ApiError, ApiResult, DeviceApi, DeviceCaps, Format, GraphicsApi,
    HandleRegistry, LayerConfig, ObjectTable, ResourceDesc, ResourceKind, ResourceUsage,
    ResourceViewDesc, ResourceViewType, SubresourceData, TextureDesc,
};
use lumen_core::{
    DescriptorSet, DescriptorSetLayout, Pipeline, PipelineLayout, Resource, ResourceView, Sampler,
};

use super::conversion::*;
use super::dispatch::{AllocationId, BindTarget, ImmediateOp, VulkanDispatch};
use super::pipeline;

/// Alignment of each subresource inside a staging buffer.
const STAGING_ALIGNMENT: usize = 16;

// ============================================================================
// Records
// ============================================================================

/// Image or buffer known to the layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    pub desc: ResourceDesc,
    /// Memory bound by the layer. Application resources carry none.
    pub allocation: Option<AllocationId>,
    /// Created through [`DeviceApi`] and destroyed together with its memory.
    pub owned: bool,
}

impl ResourceRecord {
    pub fn is_buffer(&self) -> bool {
        matches!(self.desc.kind, ResourceKind::Buffer { .. })
    }
}

/// Image view or buffer view known to the layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRecord {
    /// Weak link: the resource may already be destroyed.
    pub resource: Resource,
    pub desc: ResourceViewDesc,
    pub owned: bool,
}

impl ViewRecord {
    pub fn is_buffer_view(&self) -> bool {
        self.desc.ty == ResourceViewType::Buffer
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerRecord {
    pub desc: SamplerDesc,
    pub owned: bool,
}

/// SPIR-V of an application shader module, kept to describe pipelines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderModuleRecord {
    pub code: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineRecord {
    pub stages: ShaderStage,
    pub owned: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineLayoutRecord {
    pub desc: PipelineLayoutDesc,
    /// Empty set layout standing in for null descriptor set parameters.
    pub placeholder_set_layout: Option<vk::DescriptorSetLayout>,
    pub owned: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetLayoutRecord {
    pub layout: DescriptorSetLayoutRecord,
    pub owned: bool,
}

/// One attachment of a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassAttachment {
    pub format: Format,
    pub aspect: vk::ImageAspectFlags,
    /// Load op clears the color or depth contents.
    pub clear: bool,
    /// Stencil load op clears the stencil contents.
    pub clear_stencil: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderPassRecord {
    pub attachments: Vec<RenderPassAttachment>,
    /// Attachment indices referenced as color attachments by the first subpass.
    pub colors: Vec<Option<u32>>,
    /// Attachment index of the depth-stencil attachment of the first subpass.
    pub depth_stencil: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FramebufferRecord {
    pub views: Vec<vk::ImageView>,
}

/// Registry tables of one device, guarded by one lock.
#[derive(Debug)]
pub struct Tables {
    pub resources: ObjectTable<ResourceRecord>,
    pub views: ObjectTable<ViewRecord>,
    pub samplers: ObjectTable<SamplerRecord>,
    pub shader_modules: ObjectTable<ShaderModuleRecord>,
    pub pipelines: ObjectTable<PipelineRecord>,
    pub pipeline_layouts: ObjectTable<PipelineLayoutRecord>,
    pub set_layouts: ObjectTable<SetLayoutRecord>,
    pub descriptor_sets: ObjectTable<DescriptorSetRecord>,
    pub render_passes: ObjectTable<RenderPassRecord>,
    pub framebuffers: ObjectTable<FramebufferRecord>,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            resources: ObjectTable::new("resource"),
            views: ObjectTable::new("resource view"),
            samplers: ObjectTable::new("sampler"),
            shader_modules: ObjectTable::new("shader module"),
            pipelines: ObjectTable::new("pipeline"),
            pipeline_layouts: ObjectTable::new("pipeline layout"),
            set_layouts: ObjectTable::new("descriptor set layout"),
            descriptor_sets: ObjectTable::new("descriptor set"),
            render_passes: ObjectTable::new("render pass"),
            framebuffers: ObjectTable::new("framebuffer"),
        }
    }
}

impl Tables {
    /// Number of records across all tables.
    pub fn len(&self) -> usize {
        self.resources.len()
            + self.views.len()
            + self.samplers.len()
            + self.shader_modules.len()
            + self.pipelines.len()
            + self.pipeline_layouts.len()
            + self.set_layouts.len()
            + self.descriptor_sets.len()
            + self.render_passes.len()
            + self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Convert a native failure to the abstract error.
pub fn api_error(result: vk::Result) -> ApiError {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            ApiError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => ApiError::DeviceLost,
        other => ApiError::Native(i64::from(other.as_raw())),
    }
}

/// Convert an abstract failure back to a native result code.
pub fn vk_result(error: &ApiError) -> vk::Result {
    match error {
        ApiError::OutOfMemory => vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        ApiError::DeviceLost => vk::Result::ERROR_DEVICE_LOST,
        ApiError::Unsupported(_) => vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
        ApiError::InvalidParameter(_) => vk::Result::ERROR_INITIALIZATION_FAILED,
        ApiError::Native(code) => {
            vk::Result::from_raw(i32::try_from(*code).unwrap_or(vk::Result::ERROR_UNKNOWN.as_raw()))
        }
    }
}

// ============================================================================
// Device
// ============================================================================

/// Layer state of one `VkDevice`.
pub struct VulkanDevice {
    dispatch: Arc<dyn VulkanDispatch>,
    addons: Arc<AddonRegistry>,
    config: LayerConfig,
    registry: HandleRegistry<Tables>,
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("device", &self.dispatch.device())
            .field("objects", &self.registry.lock().len())
            .finish()
    }
}

impl VulkanDevice {
    pub fn new(
        dispatch: Arc<dyn VulkanDispatch>,
        addons: Arc<AddonRegistry>,
        config: LayerConfig,
    ) -> Self {
        log::debug!("VulkanDevice: wrapping device {:?}", dispatch.device());
        Self {
            dispatch,
            addons,
            config,
            registry: HandleRegistry::new(Tables::default()),
        }
    }

    pub fn dispatch(&self) -> &dyn VulkanDispatch {
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

    /// Log a failed native call when verbose logging is on.
    pub(crate) fn log_failure(&self, call: &str, result: vk::Result) {
        if self.config.verbose_log {
            log::warn!("{} failed with {:?}", call, result);
        }
    }

    // ========================================================================
    // Application object registration
    // ========================================================================

    /// Track an image the application created.
    pub fn register_image(&self, image: vk::Image, info: &vk::ImageCreateInfo<'_>) {
        self.register_resource(image.as_raw(), convert_image_create_info(info));
    }

    /// Track a buffer the application created.
    pub fn register_buffer(&self, buffer: vk::Buffer, info: &vk::BufferCreateInfo<'_>) {
        self.register_resource(buffer.as_raw(), convert_buffer_create_info(info));
    }

    fn register_resource(&self, handle: u64, desc: ResourceDesc) {
        let record = ResourceRecord {
            desc,
            allocation: None,
            owned: false,
        };
        let _ = self.registry.lock().resources.register(handle, record);
    }

    /// Track an application view. The resource may be unknown, in which case
    /// the view still records the link.
    pub fn register_image_view(&self, view: vk::ImageView, info: &vk::ImageViewCreateInfo<'_>) {
        let mut desc = convert_image_view_create_info(info);
        let mut tables = self.registry.lock();
        if desc.format == Format::Unknown {
            if let Some(resource) = tables.resources.get(info.image.as_raw()) {
                desc.format = resource.desc.format();
            }
        }
        let record = ViewRecord {
            resource: Resource(info.image.as_raw()),
            desc,
            owned: false,
        };
        let _ = tables.views.register(view.as_raw(), record);
    }

    pub fn register_buffer_view(&self, view: vk::BufferView, info: &vk::BufferViewCreateInfo<'_>) {
        let record = ViewRecord {
            resource: Resource(info.buffer.as_raw()),
            desc: convert_buffer_view_create_info(info),
            owned: false,
        };
        let _ = self.registry.lock().views.register(view.as_raw(), record);
    }

    pub fn register_sampler(&self, sampler: vk::Sampler, info: &vk::SamplerCreateInfo<'_>) {
        let record = SamplerRecord {
            desc: convert_sampler_create_info(info),
            owned: false,
        };
        let _ = self.registry.lock().samplers.register(sampler.as_raw(), record);
    }

    pub fn register_shader_module(&self, module: vk::ShaderModule, code: Vec<u8>) {
        let _ = self
            .registry
            .lock()
            .shader_modules
            .register(module.as_raw(), ShaderModuleRecord { code });
    }

    pub fn register_pipeline(&self, pipeline: vk::Pipeline, stages: ShaderStage) {
        let record = PipelineRecord {
            stages,
            owned: false,
        };
        let _ = self.registry.lock().pipelines.register(pipeline.as_raw(), record);
    }

    pub fn register_render_pass(&self, render_pass: vk::RenderPass, record: RenderPassRecord) {
        let _ = self
            .registry
            .lock()
            .render_passes
            .register(render_pass.as_raw(), record);
    }

    pub fn register_framebuffer(&self, framebuffer: vk::Framebuffer, views: Vec<vk::ImageView>) {
        let _ = self
            .registry
            .lock()
            .framebuffers
            .register(framebuffer.as_raw(), FramebufferRecord { views });
    }

    /// Attachments referenced by `render_pass` through `framebuffer`.
    ///
    /// Imageless framebuffers take their views from `attachment_views`.
    pub fn render_pass_attachments(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        attachment_views: &[vk::ImageView],
    ) -> lumen_core::RenderPassAttachments {
        let tables = self.registry.lock();
        let Some(pass) = tables.render_passes.resolve(render_pass.as_raw()) else {
            return lumen_core::RenderPassAttachments::default();
        };
        let views: &[vk::ImageView] = match tables.framebuffers.get(framebuffer.as_raw()) {
            Some(record) if !record.views.is_empty() => &record.views,
            _ => attachment_views,
        };
        let view_at = |index: Option<u32>| {
            index
                .and_then(|index| views.get(index as usize))
                .map_or(ResourceView::NULL, |view| ResourceView(view.as_raw()))
        };
        let colors: Vec<ResourceView> = pass.colors.iter().map(|index| view_at(*index)).collect();
        lumen_core::RenderPassAttachments::from_views(&colors, view_at(pass.depth_stencil))
    }

    /// Remove every record, destroying the objects the layer owns.
    ///
    /// Returns the number of application objects that were still registered.
    pub fn release_all(&self) -> usize {
        let mut tables = self.registry.lock();
        let mut leaked = 0;

        for (handle, record) in tables.descriptor_sets.drain() {
            let _ = record;
            self.dispatch.free_descriptor_sets(&[vk::DescriptorSet::from_raw(handle)]);
        }
        for (handle, record) in tables.views.drain() {
            if !record.owned {
                leaked += 1;
            } else if record.is_buffer_view() {
                self.dispatch.destroy_buffer_view(vk::BufferView::from_raw(handle));
            } else {
                self.dispatch.destroy_image_view(vk::ImageView::from_raw(handle));
            }
        }
        for (handle, record) in tables.resources.drain() {
            if !record.owned {
                leaked += 1;
                continue;
            }
            self.destroy_resource_object(handle, &record);
        }
        for (handle, record) in tables.samplers.drain() {
            if record.owned {
                self.dispatch.destroy_sampler(vk::Sampler::from_raw(handle));
            } else {
                leaked += 1;
            }
        }
        for (handle, record) in tables.pipelines.drain() {
            if record.owned {
                self.dispatch.destroy_pipeline(vk::Pipeline::from_raw(handle));
            } else {
                leaked += 1;
            }
        }
        for (handle, record) in tables.pipeline_layouts.drain() {
            if let Some(placeholder) = record.placeholder_set_layout {
                self.dispatch.destroy_descriptor_set_layout(placeholder);
            }
            if record.owned {
                self.dispatch
                    .destroy_pipeline_layout(vk::PipelineLayout::from_raw(handle));
            } else {
                leaked += 1;
            }
        }
        for (handle, record) in tables.set_layouts.drain() {
            if record.owned {
                self.dispatch
                    .destroy_descriptor_set_layout(vk::DescriptorSetLayout::from_raw(handle));
            } else {
                leaked += 1;
            }
        }
        leaked += tables.shader_modules.drain().len();
        leaked += tables.render_passes.drain().len();
        leaked += tables.framebuffers.drain().len();

        if leaked > 0 {
            log::warn!(
                "VulkanDevice: {} application objects were not destroyed before the device",
                leaked
            );
        }
        leaked
    }

    fn destroy_resource_object(&self, handle: u64, record: &ResourceRecord) {
        if record.is_buffer() {
            self.dispatch.destroy_buffer(vk::Buffer::from_raw(handle));
        } else {
            self.dispatch.destroy_image(vk::Image::from_raw(handle));
        }
        if let Some(allocation) = record.allocation {
            self.dispatch.free_memory(allocation);
        }
    }

    // ========================================================================
    // Resource creation
    // ========================================================================

    /// Run `f` with a host-visible staging buffer holding `bytes`.
    ///
    /// The staging buffer and its memory are released on every path.
    fn with_staging_buffer<R>(
        &self,
        bytes: &[u8],
        f: impl FnOnce(vk::Buffer) -> Result<R, vk::Result>,
    ) -> Result<R, vk::Result> {
        let info = vk::BufferCreateInfo::default()
            .size(bytes.len() as u64)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = self.dispatch.create_buffer(&info)?;
        let allocation = match self.dispatch.allocate_memory(
            BindTarget::Buffer(buffer),
            gpu_allocator::MemoryLocation::CpuToGpu,
            "staging buffer",
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                self.dispatch.destroy_buffer(buffer);
                return Err(e);
            }
        };

        let result = self
            .dispatch
            .write_memory(allocation, 0, bytes)
            .and_then(|()| f(buffer));

        self.dispatch.free_memory(allocation);
        self.dispatch.destroy_buffer(buffer);
        result
    }

    fn create_image_resource(
        &self,
        desc: &ResourceDesc,
        texture: &TextureDesc,
        initial_data: Option<&[SubresourceData<'_>]>,
        initial_state: ResourceUsage,
    ) -> ApiResult<Resource> {
        let mut info = convert_image_desc(desc)
            .ok_or_else(|| ApiError::InvalidParameter("not a texture".into()))?;
        if info.format == vk::Format::UNDEFINED {
            return Err(ApiError::Unsupported(format!(
                "format {:?}",
                texture.format
            )));
        }
        let location = convert_memory_heap(desc.heap)
            .ok_or_else(|| ApiError::Unsupported(format!("memory heap {:?}", desc.heap)))?;

        let upload = match initial_data {
            Some(data) => {
                info.usage |= vk::ImageUsageFlags::TRANSFER_DST;
                Some(pack_texture_data(texture, data)?)
            }
            None => None,
        };

        let image = self.dispatch.create_image(&info).map_err(api_error)?;
        let allocation = match self.dispatch.allocate_memory(
            BindTarget::Image(image),
            location,
            "layer image",
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                self.dispatch.destroy_image(image);
                return Err(api_error(e));
            }
        };

        let aspect = aspect_flags_from_format(info.format);
        let range = vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        };
        let final_layout = convert_usage_to_image_layout(initial_state);
        let final_barrier = |old_layout, src_access, src_stage| {
            ImmediateOp::image_barrier(image, range, old_layout, final_layout)
                .with_access(src_access, convert_usage_to_access(initial_state))
                .with_stages(src_stage, convert_usage_to_pipeline_stage(initial_state))
        };

        let initialized = match upload {
            Some((bytes, regions)) => self.with_staging_buffer(&bytes, |staging| {
                let copy_aspect = if aspect.contains(vk::ImageAspectFlags::DEPTH) {
                    vk::ImageAspectFlags::DEPTH
                } else {
                    aspect
                };
                let mut ops = Vec::with_capacity(regions.len() + 2);
                ops.push(
                    ImmediateOp::image_barrier(
                        image,
                        range,
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    )
                    .with_access(vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE)
                    .with_stages(
                        vk::PipelineStageFlags::TOP_OF_PIPE,
                        vk::PipelineStageFlags::TRANSFER,
                    ),
                );
                for mut region in regions {
                    region.image_subresource.aspect_mask = copy_aspect;
                    ops.push(ImmediateOp::CopyBufferToImage {
                        buffer: staging,
                        image,
                        region,
                    });
                }
                if final_layout != vk::ImageLayout::UNDEFINED
                    && final_layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL
                {
                    ops.push(final_barrier(
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::AccessFlags::TRANSFER_WRITE,
                        vk::PipelineStageFlags::TRANSFER,
                    ));
                }
                self.dispatch.execute_immediate(&ops)
            }),
            None if final_layout != vk::ImageLayout::UNDEFINED => {
                self.dispatch.execute_immediate(&[final_barrier(
                    vk::ImageLayout::UNDEFINED,
                    vk::AccessFlags::empty(),
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                )])
            }
            None => Ok(()),
        };

        if let Err(e) = initialized {
            log::warn!("Failed to initialize image {:#x}: {:?}", image.as_raw(), e);
            self.dispatch.free_memory(allocation);
            self.dispatch.destroy_image(image);
            return Err(api_error(e));
        }

        self.finish_resource(image.as_raw(), *desc, allocation)
    }

    fn create_buffer_resource(
        &self,
        desc: &ResourceDesc,
        size: u64,
        initial_data: Option<&[SubresourceData<'_>]>,
    ) -> ApiResult<Resource> {
        let mut info = convert_buffer_desc(desc)
            .ok_or_else(|| ApiError::InvalidParameter("not a buffer".into()))?;
        let location = convert_memory_heap(desc.heap)
            .ok_or_else(|| ApiError::Unsupported(format!("memory heap {:?}", desc.heap)))?;
        let host_visible = location != gpu_allocator::MemoryLocation::GpuOnly;

        let data = match initial_data.and_then(|data| data.first()) {
            Some(first) if first.data.len() as u64 > size => {
                return Err(ApiError::InvalidParameter(format!(
                    "{} bytes of initial data for a buffer of {} bytes",
                    first.data.len(),
                    size
                )));
            }
            Some(first) => Some(first.data),
            None => None,
        };
        if data.is_some() && !host_visible {
            info.usage |= vk::BufferUsageFlags::TRANSFER_DST;
        }

        let buffer = self.dispatch.create_buffer(&info).map_err(api_error)?;
        let allocation = match self.dispatch.allocate_memory(
            BindTarget::Buffer(buffer),
            location,
            "layer buffer",
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                self.dispatch.destroy_buffer(buffer);
                return Err(api_error(e));
            }
        };

        let initialized = match data {
            Some(bytes) if host_visible => self.dispatch.write_memory(allocation, 0, bytes),
            Some(bytes) => self.with_staging_buffer(bytes, |staging| {
                self.dispatch.execute_immediate(&[
                    ImmediateOp::CopyBuffer {
                        src: staging,
                        dst: buffer,
                        region: vk::BufferCopy {
                            src_offset: 0,
                            dst_offset: 0,
                            size: bytes.len() as u64,
                        },
                    },
                    ImmediateOp::BufferBarrier {
                        buffer,
                        src_access: vk::AccessFlags::TRANSFER_WRITE,
                        dst_access: convert_usage_to_access(desc.usage),
                        src_stage: vk::PipelineStageFlags::TRANSFER,
                        dst_stage: vk::PipelineStageFlags::ALL_COMMANDS,
                    },
                ])
            }),
            None => Ok(()),
        };

        if let Err(e) = initialized {
            log::warn!("Failed to initialize buffer {:#x}: {:?}", buffer.as_raw(), e);
            self.dispatch.free_memory(allocation);
            self.dispatch.destroy_buffer(buffer);
            return Err(api_error(e));
        }

        self.finish_resource(buffer.as_raw(), *desc, allocation)
    }

    fn finish_resource(
        &self,
        handle: u64,
        desc: ResourceDesc,
        allocation: AllocationId,
    ) -> ApiResult<Resource> {
        let record = ResourceRecord {
            desc,
            allocation: Some(allocation),
            owned: true,
        };
        let registered = self.registry.lock().resources.register(handle, record.clone());
        if registered.is_err() {
            self.destroy_resource_object(handle, &record);
            return Err(ApiError::InvalidParameter(format!(
                "resource {:#x} already registered",
                handle
            )));
        }
        Ok(Resource(handle))
    }

    // ========================================================================
    // Descriptor writes
    // ========================================================================

    fn descriptor_write_infos(
        &self,
        tables: &Tables,
        update: &DescriptorSetUpdate,
    ) -> (vk::DescriptorType, WriteInfos) {
        let image_layout = if update.ty == DescriptorType::UnorderedAccessView {
            vk::ImageLayout::GENERAL
        } else {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        };
        let is_buffer_view = |view: &ResourceView| {
            tables
                .views
                .get(view.raw())
                .is_some_and(ViewRecord::is_buffer_view)
        };

        match update.ty {
            DescriptorType::Sampler | DescriptorType::SamplerWithResourceView => {
                let infos = update
                    .values
                    .iter()
                    .map(|value| {
                        let (sampler, view) = match *value {
                            DescriptorValue::Sampler(sampler) => (sampler, ResourceView::NULL),
                            DescriptorValue::SamplerWithView { sampler, view } => (sampler, view),
                            _ => (Sampler::NULL, ResourceView::NULL),
                        };
                        vk::DescriptorImageInfo {
                            sampler: vk::Sampler::from_raw(sampler.raw()),
                            image_view: vk::ImageView::from_raw(view.raw()),
                            image_layout,
                        }
                    })
                    .collect();
                (convert_descriptor_type(update.ty), WriteInfos::Images(infos))
            }
            DescriptorType::ConstantBuffer => (
                vk::DescriptorType::UNIFORM_BUFFER,
                WriteInfos::Buffers(update.values.iter().map(buffer_info).collect()),
            ),
            ty => match update.values.first() {
                Some(DescriptorValue::Buffer { .. }) => (
                    vk::DescriptorType::STORAGE_BUFFER,
                    WriteInfos::Buffers(update.values.iter().map(buffer_info).collect()),
                ),
                Some(DescriptorValue::View(view)) if is_buffer_view(view) => {
                    let views = update
                        .values
                        .iter()
                        .map(|value| match value {
                            DescriptorValue::View(view) => vk::BufferView::from_raw(view.raw()),
                            _ => vk::BufferView::null(),
                        })
                        .collect();
                    let vk_ty = if ty == DescriptorType::UnorderedAccessView {
                        vk::DescriptorType::STORAGE_TEXEL_BUFFER
                    } else {
                        vk::DescriptorType::UNIFORM_TEXEL_BUFFER
                    };
                    (vk_ty, WriteInfos::Texels(views))
                }
                _ => {
                    let infos = update
                        .values
                        .iter()
                        .map(|value| vk::DescriptorImageInfo {
                            sampler: vk::Sampler::null(),
                            image_view: match value {
                                DescriptorValue::View(view) => {
                                    vk::ImageView::from_raw(view.raw())
                                }
                                _ => vk::ImageView::null(),
                            },
                            image_layout,
                        })
                        .collect();
                    (convert_descriptor_type(ty), WriteInfos::Images(infos))
                }
            },
        }
    }
}

enum WriteInfos {
    Images(Vec<vk::DescriptorImageInfo>),
    Buffers(Vec<vk::DescriptorBufferInfo>),
    Texels(Vec<vk::BufferView>),
}

fn buffer_info(value: &DescriptorValue) -> vk::DescriptorBufferInfo {
    match *value {
        DescriptorValue::Buffer {
            resource,
            offset,
            size,
        } => vk::DescriptorBufferInfo {
            buffer: vk::Buffer::from_raw(resource.raw()),
            offset,
            range: size,
        },
        _ => vk::DescriptorBufferInfo::default(),
    }
}

/// Repack initial data into a tightly pitched staging layout.
///
/// Returns the staging bytes and one copy region per subresource, in
/// subresource order (`level + layer * levels`).
fn pack_texture_data(
    texture: &TextureDesc,
    data: &[SubresourceData<'_>],
) -> ApiResult<(Vec<u8>, Vec<vk::BufferImageCopy>)> {
    let levels = u32::from(texture.levels).max(1);
    let count = texture.subresource_count() as usize;
    if data.len() < count {
        return Err(ApiError::InvalidParameter(format!(
            "{} subresources of initial data for {} subresources",
            data.len(),
            count
        )));
    }

    let format = texture.format;
    let mut bytes = Vec::new();
    let mut regions = Vec::with_capacity(count);
    for (index, subresource) in data.iter().take(count).enumerate() {
        let index = index as u32;
        let level = index % levels;
        let layer = index / levels;
        let width = texture.level_width(level);
        let height = texture.level_height(level);
        let depth = texture.level_depth(level);

        let row_bytes = format.row_pitch(width) as usize;
        let rows = if format.is_compressed() {
            height.div_ceil(4)
        } else {
            height
        } as usize;
        let row_pitch = match subresource.row_pitch as usize {
            0 => row_bytes,
            pitch => pitch,
        };
        let slice_pitch = match subresource.slice_pitch as usize {
            0 => row_pitch * rows,
            pitch => pitch,
        };

        bytes.resize(bytes.len().next_multiple_of(STAGING_ALIGNMENT), 0);
        let offset = bytes.len() as u64;
        for z in 0..depth as usize {
            for y in 0..rows {
                let start = z * slice_pitch + y * row_pitch;
                let row = subresource
                    .data
                    .get(start..start + row_bytes)
                    .ok_or_else(|| {
                        ApiError::InvalidParameter(format!(
                            "initial data of subresource {} is too small",
                            index
                        ))
                    })?;
                bytes.extend_from_slice(row);
            }
        }

        regions.push(vk::BufferImageCopy {
            buffer_offset: offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level,
                base_array_layer: layer,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width,
                height,
                depth,
            },
        });
    }
    Ok((bytes, regions))
}

/// Aspects a view of `view_format` over an image of `image_format` covers.
///
/// Shader resource views of combined depth-stencil images only see depth;
/// the stencil-only typed formats only see stencil.
pub fn view_aspect(view_format: Format, image_format: vk::Format, usage: ResourceUsage) -> vk::ImageAspectFlags {
    let mut aspect = aspect_flags_from_format(image_format);
    if view_format.is_stencil_view() {
        aspect &= !vk::ImageAspectFlags::DEPTH;
    } else if aspect.contains(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL)
        && usage.intersects(ResourceUsage::SHADER_RESOURCE)
    {
        aspect &= !vk::ImageAspectFlags::STENCIL;
    }
    aspect
}

impl DeviceApi for VulkanDevice {
    fn api(&self) -> GraphicsApi {
        GraphicsApi::Vulkan
    }

    fn native(&self) -> u64 {
        self.dispatch.device().as_raw()
    }

    fn check_capability(&self, capability: DeviceCaps) -> bool {
        let features = self.dispatch.enabled_features();
        let enabled = |feature: vk::Bool32| feature != vk::FALSE;
        match capability {
            DeviceCaps::GeometryShader => enabled(features.geometry_shader),
            DeviceCaps::HullAndDomainShader => enabled(features.tessellation_shader),
            DeviceCaps::LogicOp => enabled(features.logic_op),
            DeviceCaps::DualSourceBlend => enabled(features.dual_src_blend),
            DeviceCaps::IndependentBlend => enabled(features.independent_blend),
            DeviceCaps::FillModeNonSolid => enabled(features.fill_mode_non_solid),
            DeviceCaps::MultiViewport => enabled(features.multi_viewport),
            DeviceCaps::SamplerAnisotropic => enabled(features.sampler_anisotropy),
            DeviceCaps::SharedResource => false,
            DeviceCaps::ComputeShader
            | DeviceCaps::PartialPushConstantUpdates
            | DeviceCaps::DrawInstanced
            | DeviceCaps::DrawOrDispatchIndirect
            | DeviceCaps::CopyBufferRegion
            | DeviceCaps::CopyBufferToTexture
            | DeviceCaps::Blit
            | DeviceCaps::ResolveRegion
            | DeviceCaps::SamplerCompare
            | DeviceCaps::SamplerWithResourceView
            | DeviceCaps::DescriptorSets => true,
        }
    }

    fn check_format_support(&self, format: Format, usage: ResourceUsage) -> bool {
        let vk_format = convert_format(format);
        if vk_format == vk::Format::UNDEFINED {
            return false;
        }
        let features = self
            .dispatch
            .format_properties(vk_format)
            .optimal_tiling_features;

        let mut required = vk::FormatFeatureFlags::empty();
        if usage.contains(ResourceUsage::RENDER_TARGET) {
            required |= vk::FormatFeatureFlags::COLOR_ATTACHMENT;
        }
        if usage.intersects(ResourceUsage::DEPTH_STENCIL) {
            required |= vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if usage.intersects(ResourceUsage::SHADER_RESOURCE) {
            required |= vk::FormatFeatureFlags::SAMPLED_IMAGE;
        }
        if usage.contains(ResourceUsage::UNORDERED_ACCESS) {
            required |= vk::FormatFeatureFlags::STORAGE_IMAGE;
        }
        if usage.intersects(ResourceUsage::COPY_DEST | ResourceUsage::RESOLVE_DEST) {
            required |= vk::FormatFeatureFlags::TRANSFER_DST;
        }
        if usage.intersects(ResourceUsage::COPY_SOURCE | ResourceUsage::RESOLVE_SOURCE) {
            required |= vk::FormatFeatureFlags::TRANSFER_SRC;
        }
        features.contains(required)
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> ApiResult<Sampler> {
        let mut info = convert_sampler_desc(desc);
        if info.anisotropy_enable != vk::FALSE && !self.check_capability(DeviceCaps::SamplerAnisotropic)
        {
            info.anisotropy_enable = vk::FALSE;
        }
        let sampler = self.dispatch.create_sampler(&info).map_err(api_error)?;
        let record = SamplerRecord {
            desc: *desc,
            owned: true,
        };
        if self
            .registry
            .lock()
            .samplers
            .register(sampler.as_raw(), record)
            .is_err()
        {
            self.dispatch.destroy_sampler(sampler);
            return Err(ApiError::InvalidParameter("sampler already registered".into()));
        }
        Ok(Sampler(sampler.as_raw()))
    }

    fn destroy_sampler(&self, sampler: Sampler) {
        if sampler.is_null() {
            return;
        }
        self.registry.lock().samplers.unregister(sampler.raw());
        self.dispatch.destroy_sampler(vk::Sampler::from_raw(sampler.raw()));
    }

    fn create_resource(
        &self,
        desc: &ResourceDesc,
        initial_data: Option<&[SubresourceData<'_>]>,
        initial_state: ResourceUsage,
    ) -> ApiResult<Resource> {
        log::trace!("VulkanDevice: creating resource {:?}", desc.ty());
        match &desc.kind {
            ResourceKind::Texture(texture) => {
                self.create_image_resource(desc, texture, initial_data, initial_state)
            }
            ResourceKind::Buffer { size, .. } => {
                self.create_buffer_resource(desc, *size, initial_data)
            }
        }
    }

    fn destroy_resource(&self, resource: Resource) {
        if resource.is_null() {
            return;
        }
        let record = self.registry.lock().resources.unregister(resource.raw());
        match record {
            Some(record) => self.destroy_resource_object(resource.raw(), &record),
            None => log::warn!("VulkanDevice: destroying unknown resource {:#x}", resource.raw()),
        }
    }

    fn create_resource_view(
        &self,
        resource: Resource,
        usage_type: ResourceUsage,
        desc: &ResourceViewDesc,
    ) -> ApiResult<ResourceView> {
        let resource_desc = self
            .registry
            .lock()
            .resources
            .lookup(resource.raw())
            .map(|record| record.desc)
            .map_err(|e| ApiError::InvalidParameter(e.to_string()))?;

        let mut desc = *desc;
        let view = match (&resource_desc.kind, desc.range) {
            (ResourceKind::Buffer { .. }, ViewRange::Buffer { offset, size }) => {
                if desc.format == Format::Unknown {
                    return Err(ApiError::Unsupported(
                        "buffer views without a format".into(),
                    ));
                }
                let info = vk::BufferViewCreateInfo::default()
                    .buffer(vk::Buffer::from_raw(resource.raw()))
                    .format(convert_format(desc.format))
                    .offset(offset)
                    .range(size);
                self.dispatch
                    .create_buffer_view(&info)
                    .map_err(api_error)?
                    .as_raw()
            }
            (ResourceKind::Texture(texture), ViewRange::Texture { .. }) => {
                if desc.format == Format::Unknown {
                    desc.format = texture.format;
                }
                let view_type = convert_view_type(desc.ty).ok_or_else(|| {
                    ApiError::InvalidParameter(format!("view type {:?}", desc.ty))
                })?;
                let aspect = view_aspect(desc.format, convert_format(texture.format), usage_type);
                let range = convert_view_range(&desc, aspect)
                    .ok_or_else(|| ApiError::InvalidParameter("buffer range".into()))?;
                let info = vk::ImageViewCreateInfo::default()
                    .image(vk::Image::from_raw(resource.raw()))
                    .view_type(view_type)
                    .format(convert_format(desc.format))
                    .components(component_mapping_for(desc.format))
                    .subresource_range(range);
                self.dispatch
                    .create_image_view(&info)
                    .map_err(api_error)?
                    .as_raw()
            }
            _ => {
                return Err(ApiError::InvalidParameter(
                    "view range does not match the resource kind".into(),
                ))
            }
        };

        let record = ViewRecord {
            resource,
            desc,
            owned: true,
        };
        let is_buffer_view = record.is_buffer_view();
        if self.registry.lock().views.register(view, record).is_err() {
            if is_buffer_view {
                self.dispatch.destroy_buffer_view(vk::BufferView::from_raw(view));
            } else {
                self.dispatch.destroy_image_view(vk::ImageView::from_raw(view));
            }
            return Err(ApiError::InvalidParameter("view already registered".into()));
        }
        Ok(ResourceView(view))
    }

    fn destroy_resource_view(&self, view: ResourceView) {
        if view.is_null() {
            return;
        }
        let record = {
            let mut tables = self.registry.lock();
            for set in tables.descriptor_sets.iter().map(|(handle, _)| handle).collect::<Vec<_>>() {
                if let Some(record) = tables.descriptor_sets.get_mut(set) {
                    record.forget_view(view);
                }
            }
            tables.views.unregister(view.raw())
        };
        match record {
            Some(record) if record.is_buffer_view() => {
                self.dispatch
                    .destroy_buffer_view(vk::BufferView::from_raw(view.raw()));
            }
            Some(_) => {
                self.dispatch
                    .destroy_image_view(vk::ImageView::from_raw(view.raw()));
            }
            None => log::warn!("VulkanDevice: destroying unknown view {:#x}", view.raw()),
        }
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> ApiResult<Pipeline> {
        let pipeline = pipeline::build_pipeline(self.dispatch.as_ref(), desc)?;
        let record = PipelineRecord {
            stages: desc.stages(),
            owned: true,
        };
        if self
            .registry
            .lock()
            .pipelines
            .register(pipeline.as_raw(), record)
            .is_err()
        {
            self.dispatch.destroy_pipeline(pipeline);
            return Err(ApiError::InvalidParameter("pipeline already registered".into()));
        }
        Ok(Pipeline(pipeline.as_raw()))
    }

    fn destroy_pipeline(&self, pipeline: Pipeline) {
        if pipeline.is_null() {
            return;
        }
        self.registry.lock().pipelines.unregister(pipeline.raw());
        self.dispatch
            .destroy_pipeline(vk::Pipeline::from_raw(pipeline.raw()));
    }

    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> ApiResult<PipelineLayout> {
        let (layout, placeholder) = pipeline::build_pipeline_layout(self.dispatch.as_ref(), desc)?;
        let record = PipelineLayoutRecord {
            desc: desc.clone(),
            placeholder_set_layout: placeholder,
            owned: true,
        };
        if self
            .registry
            .lock()
            .pipeline_layouts
            .register(layout.as_raw(), record)
            .is_err()
        {
            self.dispatch.destroy_pipeline_layout(layout);
            if let Some(placeholder) = placeholder {
                self.dispatch.destroy_descriptor_set_layout(placeholder);
            }
            return Err(ApiError::InvalidParameter("layout already registered".into()));
        }
        Ok(PipelineLayout(layout.as_raw()))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayout) {
        if layout.is_null() {
            return;
        }
        let record = self.registry.lock().pipeline_layouts.unregister(layout.raw());
        if let Some(placeholder) = record.and_then(|record| record.placeholder_set_layout) {
            self.dispatch.destroy_descriptor_set_layout(placeholder);
        }
        self.dispatch
            .destroy_pipeline_layout(vk::PipelineLayout::from_raw(layout.raw()));
    }

    fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetLayoutDesc,
    ) -> ApiResult<DescriptorSetLayout> {
        let layout = pipeline::build_descriptor_set_layout(self.dispatch.as_ref(), desc)?;
        let record = SetLayoutRecord {
            layout: DescriptorSetLayoutRecord::new(desc.clone()),
            owned: true,
        };
        if self
            .registry
            .lock()
            .set_layouts
            .register(layout.as_raw(), record)
            .is_err()
        {
            self.dispatch.destroy_descriptor_set_layout(layout);
            return Err(ApiError::InvalidParameter("layout already registered".into()));
        }
        Ok(DescriptorSetLayout(layout.as_raw()))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayout) {
        if layout.is_null() {
            return;
        }
        self.registry.lock().set_layouts.unregister(layout.raw());
        self.dispatch
            .destroy_descriptor_set_layout(vk::DescriptorSetLayout::from_raw(layout.raw()));
    }

    fn create_descriptor_sets(
        &self,
        layout: DescriptorSetLayout,
        count: u32,
    ) -> ApiResult<Vec<DescriptorSet>> {
        let layout_record = self
            .registry
            .lock()
            .set_layouts
            .lookup(layout.raw())
            .map(|record| record.layout.clone())
            .map_err(|e| ApiError::InvalidParameter(e.to_string()))?;
        if layout_record.desc().push_descriptors {
            return Err(ApiError::InvalidParameter(
                "push descriptor layouts cannot back descriptor sets".into(),
            ));
        }

        let layouts = vec![vk::DescriptorSetLayout::from_raw(layout.raw()); count as usize];
        let sets = self
            .dispatch
            .allocate_descriptor_sets(&layouts)
            .map_err(api_error)?;

        let mut tables = self.registry.lock();
        for set in &sets {
            let _ = tables.descriptor_sets.register(
                set.as_raw(),
                DescriptorSetRecord::new(layout, &layout_record),
            );
        }
        Ok(sets.into_iter().map(|set| DescriptorSet(set.as_raw())).collect())
    }

    fn destroy_descriptor_sets(&self, sets: &[DescriptorSet]) {
        let native: Vec<vk::DescriptorSet> = {
            let mut tables = self.registry.lock();
            sets.iter()
                .filter(|set| !set.is_null())
                .map(|set| {
                    tables.descriptor_sets.unregister(set.raw());
                    vk::DescriptorSet::from_raw(set.raw())
                })
                .collect()
        };
        if !native.is_empty() {
            self.dispatch.free_descriptor_sets(&native);
        }
    }

    fn update_descriptor_sets(&self, updates: &[DescriptorSetUpdate]) -> ApiResult<()> {
        // Validate against the records before touching the native sets.
        let (pending, infos) = {
            let tables = self.registry.lock();
            let mut pending = Vec::new();
            for update in updates {
                if let Some(record) = tables.descriptor_sets.get(update.set.raw()) {
                    let mut record = record.clone();
                    record.write(update.binding, update.array_offset, &update.values)?;
                    pending.push((update.set.raw(), record));
                }
            }
            let infos: Vec<_> = updates
                .iter()
                .map(|update| self.descriptor_write_infos(&tables, update))
                .collect();
            (pending, infos)
        };

        let writes: Vec<vk::WriteDescriptorSet<'_>> = updates
            .iter()
            .zip(&infos)
            .map(|(update, (ty, infos))| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(vk::DescriptorSet::from_raw(update.set.raw()))
                    .dst_binding(update.binding)
                    .dst_array_element(update.array_offset)
                    .descriptor_type(*ty);
                match infos {
                    WriteInfos::Images(images) => write.image_info(images),
                    WriteInfos::Buffers(buffers) => write.buffer_info(buffers),
                    WriteInfos::Texels(views) => write.texel_buffer_view(views),
                }
            })
            .collect();
        self.dispatch.update_descriptor_sets(&writes, &[]);

        let mut tables = self.registry.lock();
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
            .get(resource.raw())
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

static_assertions::assert_impl_all!(VulkanDevice: Send, Sync);

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::vulkan::dummy::DummyVulkan;
    use lumen_core::pipeline::{DescriptorRange, PipelineLayoutParam};
    use lumen_core::resource::ALL_REMAINING;
    use lumen_core::TextureDimension;

    fn device() -> (Arc<DummyVulkan>, VulkanDevice) {
        let dummy = Arc::new(DummyVulkan::new());
        let device = VulkanDevice::new(
            dummy.clone(),
            Arc::new(AddonRegistry::new()),
            LayerConfig::default(),
        );
        (dummy, device)
    }

    fn texture_desc() -> ResourceDesc {
        ResourceDesc::texture(TextureDimension::D2, 4, 4, Format::R8G8B8A8Unorm)
            .with_usage(ResourceUsage::SHADER_RESOURCE | ResourceUsage::RENDER_TARGET)
    }

    #[test]
    fn test_create_texture_transitions_to_initial_state() {
        let (dummy, device) = device();
        let texture = device
            .create_resource(&texture_desc(), None, ResourceUsage::SHADER_RESOURCE)
            .unwrap();
        assert!(device.is_resource_handle_valid(texture));
        assert_eq!(device.get_resource_desc(texture), Some(texture_desc()));

        let ops = dummy.immediate_ops();
        assert_eq!(ops.len(), 1);
        assert!(matches!(
            ops[0],
            ImmediateOp::ImageBarrier {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                ..
            }
        ));
    }

    #[test]
    fn test_staged_upload() {
        let (dummy, device) = device();
        let pixels = [0xABu8; 4 * 4 * 4];
        let data = [SubresourceData::new(&pixels, 16, 0)];
        let texture = device
            .create_resource(&texture_desc(), Some(&data), ResourceUsage::SHADER_RESOURCE)
            .unwrap();

        let ops = dummy.immediate_ops();
        assert_eq!(ops.len(), 3);
        assert!(matches!(
            ops[0],
            ImmediateOp::ImageBarrier {
                new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                ..
            }
        ));
        assert!(matches!(ops[1], ImmediateOp::CopyBufferToImage { image, .. } if image.as_raw() == texture.raw()));
        assert!(matches!(
            ops[2],
            ImmediateOp::ImageBarrier {
                old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                ..
            }
        ));
        // Image and its memory; the staging buffer is gone.
        assert_eq!(dummy.objects().live_count(), 2);
        assert_eq!(dummy.objects().live_of_kind("buffer"), 0);
    }

    #[test]
    fn test_short_initial_data_rejected_before_creation() {
        let (dummy, device) = device();
        let pixels = [0u8; 8];
        let data = [SubresourceData::new(&pixels, 16, 0)];
        let result = device.create_resource(&texture_desc(), Some(&data), ResourceUsage::UNDEFINED);
        assert!(matches!(result, Err(ApiError::InvalidParameter(_))));
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_out_of_memory_leaves_nothing_behind() {
        let (dummy, device) = device();
        let pixels = [0u8; 64];
        let data = [SubresourceData::new(&pixels, 16, 0)];
        // Every allocation point in turn: image, memory, staging buffer,
        // staging memory, immediate submission.
        for successes in 0..5 {
            dummy.objects().fail_after(successes);
            let result =
                device.create_resource(&texture_desc(), Some(&data), ResourceUsage::SHADER_RESOURCE);
            assert_eq!(result, Err(ApiError::OutOfMemory), "after {successes} successes");
            assert!(device.registry().lock().is_empty());
            assert_eq!(dummy.objects().live_count(), 0);
        }
        dummy.objects().clear_failures();
    }

    #[test]
    fn test_buffer_upload_host_visible() {
        let (dummy, device) = device();
        let desc = ResourceDesc::buffer(8)
            .with_heap(lumen_core::MemoryHeap::CpuToGpu)
            .with_usage(ResourceUsage::CONSTANT_BUFFER);
        let data = [SubresourceData::new(&[1, 2, 3, 4], 0, 0)];
        let buffer = device
            .create_resource(&desc, Some(&data), ResourceUsage::CONSTANT_BUFFER)
            .unwrap();
        let allocation = device
            .registry()
            .lock()
            .resources
            .get(buffer.raw())
            .and_then(|record| record.allocation)
            .unwrap();
        assert_eq!(dummy.memory_contents(allocation), Some(vec![1, 2, 3, 4]));
        assert!(dummy.immediate_ops().is_empty());

        device.destroy_resource(buffer);
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_unknown_heap_unsupported() {
        let (_, device) = device();
        let desc = ResourceDesc::buffer(16).with_heap(lumen_core::MemoryHeap::Unknown);
        assert!(matches!(
            device.create_resource(&desc, None, ResourceUsage::UNDEFINED),
            Err(ApiError::Unsupported(_))
        ));
    }

    #[test]
    fn test_view_aspect_policy() {
        let ds = vk::Format::D24_UNORM_S8_UINT;
        assert_eq!(
            view_aspect(Format::R24UnormX8Typeless, ds, ResourceUsage::SHADER_RESOURCE),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            view_aspect(Format::X24TypelessG8Uint, ds, ResourceUsage::SHADER_RESOURCE),
            vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            view_aspect(Format::D24UnormS8Uint, ds, ResourceUsage::DEPTH_STENCIL),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_view_outlives_resource() {
        let (_, device) = device();
        let texture = device
            .create_resource(&texture_desc(), None, ResourceUsage::UNDEFINED)
            .unwrap();
        let view = device
            .create_resource_view(
                texture,
                ResourceUsage::SHADER_RESOURCE,
                &ResourceViewDesc::texture(
                    ResourceViewType::Texture2d,
                    Format::Unknown,
                    0,
                    ALL_REMAINING,
                    0,
                    ALL_REMAINING,
                ),
            )
            .unwrap();
        assert_eq!(
            device.get_resource_view_desc(view).map(|desc| desc.format),
            Some(Format::R8G8B8A8Unorm)
        );

        device.destroy_resource(texture);
        assert!(!device.is_resource_handle_valid(texture));
        assert_eq!(device.get_resource_from_view(view), Some(texture));
        assert_eq!(device.get_resource_desc(texture), None);
        device.destroy_resource_view(view);
        assert!(!device.is_resource_view_handle_valid(view));
    }

    #[test]
    fn test_view_of_unknown_resource_fails() {
        let (_, device) = device();
        let result = device.create_resource_view(
            Resource(0x1234),
            ResourceUsage::SHADER_RESOURCE,
            &ResourceViewDesc::buffer(Format::R32Float, 0, 16),
        );
        assert!(matches!(result, Err(ApiError::InvalidParameter(_))));
    }

    #[test]
    fn test_descriptor_sets() {
        let (dummy, device) = device();
        let layout = device
            .create_descriptor_set_layout(&DescriptorSetLayoutDesc {
                ranges: vec![DescriptorRange {
                    binding: 0,
                    count: 2,
                    ty: DescriptorType::ShaderResourceView,
                    visibility: ShaderStage::PIXEL,
                }],
                push_descriptors: false,
            })
            .unwrap();
        let sets = device.create_descriptor_sets(layout, 2).unwrap();
        assert_eq!(sets.len(), 2);

        let update = DescriptorSetUpdate {
            set: sets[1],
            binding: 0,
            array_offset: 1,
            ty: DescriptorType::ShaderResourceView,
            values: vec![DescriptorValue::View(ResourceView(0x77))],
        };
        device.update_descriptor_sets(&[update]).unwrap();
        assert_eq!(
            device.get_descriptor_set(sets[1]).unwrap().get(0, 1),
            Some(&DescriptorValue::View(ResourceView(0x77)))
        );
        assert_eq!(
            dummy.commands_of(vk::CommandBuffer::null()),
            vec!["update_descriptor_sets"]
        );

        let bad = DescriptorSetUpdate {
            set: sets[0],
            binding: 5,
            array_offset: 0,
            ty: DescriptorType::ShaderResourceView,
            values: vec![DescriptorValue::View(ResourceView(0x77))],
        };
        assert!(device.update_descriptor_sets(&[bad]).is_err());

        device.destroy_descriptor_sets(&sets);
        device.destroy_descriptor_set_layout(layout);
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_pipeline_layout_with_null_set() {
        let (dummy, device) = device();
        let layout = device
            .create_pipeline_layout(&PipelineLayoutDesc {
                params: vec![
                    PipelineLayoutParam::DescriptorSet(DescriptorSetLayout::NULL),
                    PipelineLayoutParam::PushConstants {
                        offset: 0,
                        count: 4,
                        visibility: ShaderStage::VERTEX,
                    },
                ],
            })
            .unwrap();
        assert_eq!(dummy.objects().live_of_kind("descriptor_set_layout"), 1);
        device.destroy_pipeline_layout(layout);
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_release_all_frees_owned_objects() {
        let (dummy, device) = device();
        device
            .create_resource(&texture_desc(), None, ResourceUsage::UNDEFINED)
            .unwrap();
        device.create_sampler(&SamplerDesc::default()).unwrap();
        device.register_buffer(
            vk::Buffer::from_raw(0x5000),
            &vk::BufferCreateInfo::default().size(64),
        );
        assert_eq!(device.release_all(), 1);
        assert_eq!(dummy.objects().live_count(), 0);
        assert!(device.registry().lock().is_empty());
    }

    #[test]
    fn test_capabilities() {
        let (_, device) = device();
        assert!(device.check_capability(DeviceCaps::GeometryShader));
        assert!(!device.check_capability(DeviceCaps::LogicOp));
        assert!(device.check_format_support(Format::R8G8B8A8Unorm, ResourceUsage::RENDER_TARGET));
        assert!(!device.check_format_support(Format::D32Float, ResourceUsage::RENDER_TARGET));
        assert!(!device.check_format_support(Format::Unknown, ResourceUsage::SHADER_RESOURCE));
    }
}
