//! Intercepted Vulkan entry points.
//!
//! Every hook follows the same sequence: look up the layer state for the
//! dispatchable handle, give add-ons a chance to replace or skip the call,
//! call down the chain through the device's dispatch table, update the
//! registry and fire the notification events. Native failures are returned
//! to the application unchanged.
//!
//! Hooks take the [`LayerService`] explicitly; the loader-facing entry points
//! pass the installed singleton.

use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk;
use ash::vk::Handle;
use lumen_core::descriptor::{DescriptorSetUpdate, DescriptorValue};
use lumen_core::events::{ClearValues, Rect, TextureRegion, Viewport};
use lumen_core::pipeline::{DescriptorType, PipelineDesc};
use lumen_core::render_pass::AttachmentType;
use lumen_core::resource::SubresourceBox;
use lumen_core::{
    CommandList, DescriptorSet, DeviceApi, Pipeline, PipelineLayout, RenderPassAttachments,
    Resource, ResourceUsage, ResourceView, Sampler, SwapChain,
};

use super::command::{VulkanCommandBuffer, VulkanQueue};
use super::conversion::*;
use super::device::{
    PipelineLayoutRecord, RenderPassAttachment, RenderPassRecord, SetLayoutRecord,
    VulkanDevice,
};
use super::dispatch::{raw_slice, VulkanDispatch};
use super::pipeline::{
    describe_compute_pipeline, describe_descriptor_set_layout, describe_graphics_pipeline,
    describe_pipeline_layout,
};
use crate::service::LayerService;

fn device_of(service: &LayerService, device: vk::Device) -> VkResult<Arc<VulkanDevice>> {
    service
        .vulkan
        .devices
        .require(device.as_raw())
        .map_err(|_| vk::Result::ERROR_INITIALIZATION_FAILED)
}

fn command_buffer_of(service: &LayerService, cmd: vk::CommandBuffer) -> Option<Arc<VulkanCommandBuffer>> {
    service.vulkan.command_buffers.require(cmd.as_raw()).ok()
}

// ============================================================================
// Device and queues
// ============================================================================

/// Track a device the driver just created and fire its init events.
pub fn on_device_created(
    service: &LayerService,
    dispatch: Arc<dyn VulkanDispatch>,
    queues: &[vk::Queue],
) -> Arc<VulkanDevice> {
    let device = Arc::new(VulkanDevice::new(
        dispatch,
        Arc::clone(service.addons()),
        service.config().clone(),
    ));
    let handle = device.dispatch().device().as_raw();
    service.vulkan.devices.insert(handle, Arc::clone(&device));

    let api: &dyn DeviceApi = device.as_ref();
    device.addons().notify(|addon| addon.on_init_device(api));
    for &queue in queues {
        let wrapper = Arc::new(VulkanQueue::new(queue, Arc::clone(&device)));
        let command_queue = wrapper.command_queue();
        service.vulkan.queues.insert(queue.as_raw(), wrapper);
        device
            .addons()
            .notify(|addon| addon.on_init_command_queue(api, command_queue));
    }
    device
}

/// Fire the destroy events of a device and drop everything tracked for it.
///
/// The native device is destroyed by the caller afterwards.
pub fn destroy_device(service: &LayerService, device: vk::Device) {
    let Some(wrapper) = service.vulkan.devices.remove(device.as_raw()) else {
        return;
    };
    let api: &dyn DeviceApi = wrapper.as_ref();

    let mut queues = Vec::new();
    service.vulkan.queues.retain(|_, queue| {
        let ours = Arc::ptr_eq(queue.device(), &wrapper);
        if ours {
            queues.push(queue.command_queue());
        }
        !ours
    });
    for queue in queues {
        wrapper
            .addons()
            .notify(|addon| addon.on_destroy_command_queue(api, queue));
    }
    service
        .vulkan
        .command_buffers
        .retain(|_, cmd| !Arc::ptr_eq(cmd.device(), &wrapper));

    wrapper.addons().notify(|addon| addon.on_destroy_device(api));
    wrapper.release_all();
}

/// Track the images of a new swap chain and fire its init event.
pub fn on_swapchain_created(
    service: &LayerService,
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    info: &vk::SwapchainCreateInfoKHR<'_>,
    images: &[vk::Image],
) -> VkResult<()> {
    let wrapper = device_of(service, device)?;
    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(info.image_format)
        .extent(vk::Extent3D {
            width: info.image_extent.width,
            height: info.image_extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(info.image_array_layers)
        .samples(vk::SampleCountFlags::TYPE_1)
        .usage(info.image_usage);
    for &image in images {
        wrapper.register_image(image, &image_info);
    }
    let api: &dyn DeviceApi = wrapper.as_ref();
    let handle = SwapChain(swapchain.as_raw());
    wrapper
        .addons()
        .notify(|addon| addon.on_init_swapchain(api, handle));
    Ok(())
}

pub fn on_swapchain_destroyed(
    service: &LayerService,
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    images: &[vk::Image],
) {
    let Ok(wrapper) = device_of(service, device) else {
        return;
    };
    let api: &dyn DeviceApi = wrapper.as_ref();
    let handle = SwapChain(swapchain.as_raw());
    wrapper
        .addons()
        .notify(|addon| addon.on_destroy_swapchain(api, handle));
    let mut tables = wrapper.registry().lock();
    for image in images {
        tables.resources.unregister(image.as_raw());
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Report a replacement object whose description differs from the request.
fn check_replacement(device: &VulkanDevice, resource: Resource, requested: &lumen_core::ResourceDesc) {
    match device.get_resource_desc(resource) {
        Some(actual) if actual != *requested => log::warn!(
            "Replacement resource {:#x} does not match the requested description ({:?} vs {:?})",
            resource.raw(),
            actual,
            requested
        ),
        Some(_) => {}
        None => log::warn!(
            "Replacement resource {:#x} is not known to the layer",
            resource.raw()
        ),
    }
}

pub fn create_image(
    service: &LayerService,
    device: vk::Device,
    info: &vk::ImageCreateInfo<'_>,
) -> VkResult<vk::Image> {
    let wrapper = device_of(service, device)?;
    let api: &dyn DeviceApi = wrapper.as_ref();
    let desc = convert_image_create_info(info);

    if let Some(replacement) = wrapper
        .addons()
        .replacement(|addon| addon.on_create_resource(api, &desc, ResourceUsage::UNDEFINED))
    {
        check_replacement(&wrapper, replacement, &desc);
        return Ok(vk::Image::from_raw(replacement.raw()));
    }

    let image = wrapper.dispatch().create_image(info).inspect_err(|e| {
        wrapper.log_failure("vkCreateImage", *e);
    })?;
    wrapper.register_image(image, info);
    let resource = Resource(image.as_raw());
    wrapper.addons().notify(|addon| {
        addon.on_init_resource(api, &desc, None, ResourceUsage::UNDEFINED, resource)
    });
    Ok(image)
}

pub fn destroy_image(service: &LayerService, device: vk::Device, image: vk::Image) {
    if image == vk::Image::null() {
        return;
    }
    let Ok(wrapper) = device_of(service, device) else {
        return;
    };
    destroy_resource(&wrapper, image.as_raw(), |dispatch| dispatch.destroy_image(image));
}

pub fn create_buffer(
    service: &LayerService,
    device: vk::Device,
    info: &vk::BufferCreateInfo<'_>,
) -> VkResult<vk::Buffer> {
    let wrapper = device_of(service, device)?;
    let api: &dyn DeviceApi = wrapper.as_ref();
    let desc = convert_buffer_create_info(info);

    if let Some(replacement) = wrapper
        .addons()
        .replacement(|addon| addon.on_create_resource(api, &desc, ResourceUsage::UNDEFINED))
    {
        check_replacement(&wrapper, replacement, &desc);
        return Ok(vk::Buffer::from_raw(replacement.raw()));
    }

    let buffer = wrapper.dispatch().create_buffer(info).inspect_err(|e| {
        wrapper.log_failure("vkCreateBuffer", *e);
    })?;
    wrapper.register_buffer(buffer, info);
    let resource = Resource(buffer.as_raw());
    wrapper.addons().notify(|addon| {
        addon.on_init_resource(api, &desc, None, ResourceUsage::UNDEFINED, resource)
    });
    Ok(buffer)
}

pub fn destroy_buffer(service: &LayerService, device: vk::Device, buffer: vk::Buffer) {
    if buffer == vk::Buffer::null() {
        return;
    }
    let Ok(wrapper) = device_of(service, device) else {
        return;
    };
    destroy_resource(&wrapper, buffer.as_raw(), |dispatch| dispatch.destroy_buffer(buffer));
}

fn destroy_resource(device: &VulkanDevice, handle: u64, forward: impl FnOnce(&dyn VulkanDispatch)) {
    let api: &dyn DeviceApi = device;
    let resource = Resource(handle);
    device
        .addons()
        .notify(|addon| addon.on_destroy_resource(api, resource));
    // Views of the resource keep their records.
    if device.is_resource_handle_valid(resource) {
        device.destroy_resource(resource);
    } else {
        forward(device.dispatch());
    }
}

pub fn create_image_view(
    service: &LayerService,
    device: vk::Device,
    info: &vk::ImageViewCreateInfo<'_>,
) -> VkResult<vk::ImageView> {
    let wrapper = device_of(service, device)?;
    let api: &dyn DeviceApi = wrapper.as_ref();
    let resource = Resource(info.image.as_raw());
    let desc = convert_image_view_create_info(info);

    if let Some(replacement) = wrapper.addons().replacement(|addon| {
        addon.on_create_resource_view(api, resource, ResourceUsage::UNDEFINED, &desc)
    }) {
        return Ok(vk::ImageView::from_raw(replacement.raw()));
    }

    let view = wrapper.dispatch().create_image_view(info).inspect_err(|e| {
        wrapper.log_failure("vkCreateImageView", *e);
    })?;
    wrapper.register_image_view(view, info);
    let handle = ResourceView(view.as_raw());
    wrapper.addons().notify(|addon| {
        addon.on_init_resource_view(api, resource, ResourceUsage::UNDEFINED, &desc, handle)
    });
    Ok(view)
}

pub fn create_buffer_view(
    service: &LayerService,
    device: vk::Device,
    info: &vk::BufferViewCreateInfo<'_>,
) -> VkResult<vk::BufferView> {
    let wrapper = device_of(service, device)?;
    let api: &dyn DeviceApi = wrapper.as_ref();
    let resource = Resource(info.buffer.as_raw());
    let desc = convert_buffer_view_create_info(info);

    if let Some(replacement) = wrapper.addons().replacement(|addon| {
        addon.on_create_resource_view(api, resource, ResourceUsage::UNDEFINED, &desc)
    }) {
        return Ok(vk::BufferView::from_raw(replacement.raw()));
    }

    let view = wrapper.dispatch().create_buffer_view(info).inspect_err(|e| {
        wrapper.log_failure("vkCreateBufferView", *e);
    })?;
    wrapper.register_buffer_view(view, info);
    let handle = ResourceView(view.as_raw());
    wrapper.addons().notify(|addon| {
        addon.on_init_resource_view(api, resource, ResourceUsage::UNDEFINED, &desc, handle)
    });
    Ok(view)
}

pub fn destroy_image_view(service: &LayerService, device: vk::Device, view: vk::ImageView) {
    destroy_view(service, device, view.as_raw(), |dispatch| {
        dispatch.destroy_image_view(view)
    });
}

pub fn destroy_buffer_view(service: &LayerService, device: vk::Device, view: vk::BufferView) {
    destroy_view(service, device, view.as_raw(), |dispatch| {
        dispatch.destroy_buffer_view(view)
    });
}

fn destroy_view(
    service: &LayerService,
    device: vk::Device,
    handle: u64,
    forward: impl FnOnce(&dyn VulkanDispatch),
) {
    if handle == 0 {
        return;
    }
    let Ok(wrapper) = device_of(service, device) else {
        return;
    };
    let api: &dyn DeviceApi = wrapper.as_ref();
    let view = ResourceView(handle);
    wrapper
        .addons()
        .notify(|addon| addon.on_destroy_resource_view(api, view));
    if wrapper.is_resource_view_handle_valid(view) {
        wrapper.destroy_resource_view(view);
    } else {
        forward(wrapper.dispatch());
    }
}

pub fn create_sampler(
    service: &LayerService,
    device: vk::Device,
    info: &vk::SamplerCreateInfo<'_>,
) -> VkResult<vk::Sampler> {
    let wrapper = device_of(service, device)?;
    let api: &dyn DeviceApi = wrapper.as_ref();
    let desc = convert_sampler_create_info(info);

    if let Some(replacement) = wrapper
        .addons()
        .replacement(|addon| addon.on_create_sampler(api, &desc))
    {
        return Ok(vk::Sampler::from_raw(replacement.raw()));
    }

    let sampler = wrapper.dispatch().create_sampler(info).inspect_err(|e| {
        wrapper.log_failure("vkCreateSampler", *e);
    })?;
    wrapper.register_sampler(sampler, info);
    let handle = Sampler(sampler.as_raw());
    wrapper
        .addons()
        .notify(|addon| addon.on_init_sampler(api, &desc, handle));
    Ok(sampler)
}

pub fn destroy_sampler(service: &LayerService, device: vk::Device, sampler: vk::Sampler) {
    if sampler == vk::Sampler::null() {
        return;
    }
    let Ok(wrapper) = device_of(service, device) else {
        return;
    };
    let api: &dyn DeviceApi = wrapper.as_ref();
    let handle = Sampler(sampler.as_raw());
    wrapper
        .addons()
        .notify(|addon| addon.on_destroy_sampler(api, handle));
    wrapper.destroy_sampler(handle);
}

// ============================================================================
// Shaders and pipelines
// ============================================================================

pub fn create_shader_module(
    service: &LayerService,
    device: vk::Device,
    info: &vk::ShaderModuleCreateInfo<'_>,
) -> VkResult<vk::ShaderModule> {
    let wrapper = device_of(service, device)?;
    let module = wrapper.dispatch().create_shader_module(info)?;
    // SAFETY: `p_code` holds `code_size` bytes.
    let code = unsafe { raw_slice(info.p_code.cast::<u8>(), info.code_size as u32) }.to_vec();
    wrapper.register_shader_module(module, code);
    Ok(module)
}

pub fn destroy_shader_module(service: &LayerService, device: vk::Device, module: vk::ShaderModule) {
    if module == vk::ShaderModule::null() {
        return;
    }
    let Ok(wrapper) = device_of(service, device) else {
        return;
    };
    wrapper
        .registry()
        .lock()
        .shader_modules
        .unregister(module.as_raw());
    wrapper.dispatch().destroy_shader_module(module);
}

fn shader_code(device: &VulkanDevice) -> impl Fn(vk::ShaderModule) -> Vec<u8> + '_ {
    move |module| {
        device
            .registry()
            .lock()
            .shader_modules
            .get(module.as_raw())
            .map(|record| record.code.clone())
            .unwrap_or_default()
    }
}

/// Create pipelines, letting add-ons replace individual ones.
///
/// Pipelines no add-on replaced are created natively in one batch.
fn create_pipelines<I>(
    device: &VulkanDevice,
    infos: &[I],
    describe: impl Fn(&I) -> PipelineDesc,
    create: impl FnOnce(&[I]) -> VkResult<Vec<vk::Pipeline>>,
) -> VkResult<Vec<vk::Pipeline>>
where
    I: Copy,
{
    let api: &dyn DeviceApi = device;
    let descs: Vec<PipelineDesc> = infos.iter().map(&describe).collect();
    let replacements: Vec<Option<Pipeline>> = descs
        .iter()
        .map(|desc| {
            device
                .addons()
                .replacement(|addon| addon.on_create_pipeline(api, desc))
        })
        .collect();

    let native_infos: Vec<I> = infos
        .iter()
        .zip(&replacements)
        .filter(|(_, replacement)| replacement.is_none())
        .map(|(info, _)| *info)
        .collect();
    let mut created = if native_infos.is_empty() {
        Vec::new()
    } else {
        create(&native_infos)?
    }
    .into_iter();

    let mut pipelines = Vec::with_capacity(infos.len());
    for (desc, replacement) in descs.iter().zip(replacements) {
        let pipeline = match replacement {
            Some(replacement) => vk::Pipeline::from_raw(replacement.raw()),
            None => {
                let pipeline = created.next().unwrap_or_default();
                device.register_pipeline(pipeline, desc.stages());
                let handle = Pipeline(pipeline.as_raw());
                device
                    .addons()
                    .notify(|addon| addon.on_init_pipeline(api, desc, handle));
                pipeline
            }
        };
        pipelines.push(pipeline);
    }
    Ok(pipelines)
}

pub fn create_graphics_pipelines(
    service: &LayerService,
    device: vk::Device,
    infos: &[vk::GraphicsPipelineCreateInfo<'_>],
) -> VkResult<Vec<vk::Pipeline>> {
    let wrapper = device_of(service, device)?;
    let code = shader_code(&wrapper);
    create_pipelines(
        &wrapper,
        infos,
        |info| PipelineDesc::Graphics(Box::new(describe_graphics_pipeline(info, &code))),
        |infos| {
            wrapper
                .dispatch()
                .create_graphics_pipelines(infos)
                .inspect_err(|e| wrapper.log_failure("vkCreateGraphicsPipelines", *e))
        },
    )
}

pub fn create_compute_pipelines(
    service: &LayerService,
    device: vk::Device,
    infos: &[vk::ComputePipelineCreateInfo<'_>],
) -> VkResult<Vec<vk::Pipeline>> {
    let wrapper = device_of(service, device)?;
    let code = shader_code(&wrapper);
    create_pipelines(
        &wrapper,
        infos,
        |info| PipelineDesc::Compute(describe_compute_pipeline(info, &code)),
        |infos| {
            wrapper
                .dispatch()
                .create_compute_pipelines(infos)
                .inspect_err(|e| wrapper.log_failure("vkCreateComputePipelines", *e))
        },
    )
}

pub fn destroy_pipeline(service: &LayerService, device: vk::Device, pipeline: vk::Pipeline) {
    if pipeline == vk::Pipeline::null() {
        return;
    }
    let Ok(wrapper) = device_of(service, device) else {
        return;
    };
    let api: &dyn DeviceApi = wrapper.as_ref();
    let handle = Pipeline(pipeline.as_raw());
    wrapper
        .addons()
        .notify(|addon| addon.on_destroy_pipeline(api, handle));
    wrapper.destroy_pipeline(handle);
}

pub fn create_pipeline_layout(
    service: &LayerService,
    device: vk::Device,
    info: &vk::PipelineLayoutCreateInfo<'_>,
) -> VkResult<vk::PipelineLayout> {
    let wrapper = device_of(service, device)?;
    let layout = wrapper.dispatch().create_pipeline_layout(info)?;
    let record = PipelineLayoutRecord {
        desc: describe_pipeline_layout(info),
        placeholder_set_layout: None,
        owned: false,
    };
    let _ = wrapper
        .registry()
        .lock()
        .pipeline_layouts
        .register(layout.as_raw(), record);

    let api: &dyn DeviceApi = wrapper.as_ref();
    let handle = PipelineLayout(layout.as_raw());
    wrapper
        .addons()
        .notify(|addon| addon.on_init_pipeline_layout(api, handle));
    Ok(layout)
}

pub fn destroy_pipeline_layout(
    service: &LayerService,
    device: vk::Device,
    layout: vk::PipelineLayout,
) {
    if layout == vk::PipelineLayout::null() {
        return;
    }
    let Ok(wrapper) = device_of(service, device) else {
        return;
    };
    let api: &dyn DeviceApi = wrapper.as_ref();
    let handle = PipelineLayout(layout.as_raw());
    wrapper
        .addons()
        .notify(|addon| addon.on_destroy_pipeline_layout(api, handle));
    wrapper.destroy_pipeline_layout(handle);
}

pub fn create_descriptor_set_layout(
    service: &LayerService,
    device: vk::Device,
    info: &vk::DescriptorSetLayoutCreateInfo<'_>,
) -> VkResult<vk::DescriptorSetLayout> {
    let wrapper = device_of(service, device)?;
    let layout = wrapper.dispatch().create_descriptor_set_layout(info)?;
    let record = SetLayoutRecord {
        layout: lumen_core::descriptor::DescriptorSetLayoutRecord::new(
            describe_descriptor_set_layout(info),
        ),
        owned: false,
    };
    let _ = wrapper
        .registry()
        .lock()
        .set_layouts
        .register(layout.as_raw(), record);
    Ok(layout)
}

pub fn destroy_descriptor_set_layout(
    service: &LayerService,
    device: vk::Device,
    layout: vk::DescriptorSetLayout,
) {
    if layout == vk::DescriptorSetLayout::null() {
        return;
    }
    let Ok(wrapper) = device_of(service, device) else {
        return;
    };
    wrapper.destroy_descriptor_set_layout(lumen_core::DescriptorSetLayout(layout.as_raw()));
}

/// Describe a descriptor write for add-ons. Inline uniform blocks and
/// acceleration structures have no abstract counterpart.
pub fn convert_descriptor_write(write: &vk::WriteDescriptorSet<'_>) -> Option<DescriptorSetUpdate> {
    let count = write.descriptor_count;
    // SAFETY: the array matching the descriptor type holds `count` elements.
    let images = || unsafe { raw_slice(write.p_image_info, count) };
    let buffers = || unsafe { raw_slice(write.p_buffer_info, count) };
    let texels = || unsafe { raw_slice(write.p_texel_buffer_view, count) };

    let buffer_value = |info: &vk::DescriptorBufferInfo| DescriptorValue::Buffer {
        resource: Resource(info.buffer.as_raw()),
        offset: info.offset,
        size: info.range,
    };
    let view_value = |view: u64| DescriptorValue::View(ResourceView(view));

    let (ty, values): (DescriptorType, Vec<DescriptorValue>) = match write.descriptor_type {
        vk::DescriptorType::SAMPLER => (
            DescriptorType::Sampler,
            images()
                .iter()
                .map(|info| DescriptorValue::Sampler(Sampler(info.sampler.as_raw())))
                .collect(),
        ),
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER => (
            DescriptorType::SamplerWithResourceView,
            images()
                .iter()
                .map(|info| DescriptorValue::SamplerWithView {
                    sampler: Sampler(info.sampler.as_raw()),
                    view: ResourceView(info.image_view.as_raw()),
                })
                .collect(),
        ),
        vk::DescriptorType::SAMPLED_IMAGE | vk::DescriptorType::INPUT_ATTACHMENT => (
            DescriptorType::ShaderResourceView,
            images().iter().map(|info| view_value(info.image_view.as_raw())).collect(),
        ),
        vk::DescriptorType::STORAGE_IMAGE => (
            DescriptorType::UnorderedAccessView,
            images().iter().map(|info| view_value(info.image_view.as_raw())).collect(),
        ),
        vk::DescriptorType::UNIFORM_TEXEL_BUFFER => (
            DescriptorType::ShaderResourceView,
            texels().iter().map(|view| view_value(view.as_raw())).collect(),
        ),
        vk::DescriptorType::STORAGE_TEXEL_BUFFER => (
            DescriptorType::UnorderedAccessView,
            texels().iter().map(|view| view_value(view.as_raw())).collect(),
        ),
        vk::DescriptorType::UNIFORM_BUFFER | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => (
            DescriptorType::ConstantBuffer,
            buffers().iter().map(buffer_value).collect(),
        ),
        vk::DescriptorType::STORAGE_BUFFER | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => (
            DescriptorType::UnorderedAccessView,
            buffers().iter().map(buffer_value).collect(),
        ),
        _ => return None,
    };

    Some(DescriptorSetUpdate {
        set: DescriptorSet(write.dst_set.as_raw()),
        binding: write.dst_binding,
        array_offset: write.dst_array_element,
        ty,
        values,
    })
}

/// `vkUpdateDescriptorSets`. Add-ons may skip the update entirely.
pub fn update_descriptor_sets(
    service: &LayerService,
    device: vk::Device,
    writes: &[vk::WriteDescriptorSet<'_>],
    copies: &[vk::CopyDescriptorSet<'_>],
) {
    let Ok(wrapper) = device_of(service, device) else {
        return;
    };
    let updates: Vec<DescriptorSetUpdate> =
        writes.iter().filter_map(convert_descriptor_write).collect();
    if !updates.is_empty() {
        let api: &dyn DeviceApi = wrapper.as_ref();
        if wrapper
            .addons()
            .handled(|addon| addon.on_update_descriptor_sets(api, &updates))
        {
            return;
        }
    }
    wrapper.dispatch().update_descriptor_sets(writes, copies);
}

// ============================================================================
// Render passes and framebuffers
// ============================================================================

/// Attachments and first-subpass references of a render pass create info.
pub fn describe_render_pass(info: &vk::RenderPassCreateInfo<'_>) -> RenderPassRecord {
    // SAFETY: the application passes valid arrays.
    let attachments = unsafe { raw_slice(info.p_attachments, info.attachment_count) };
    let subpasses = unsafe { raw_slice(info.p_subpasses, info.subpass_count) };

    let mut record = RenderPassRecord {
        attachments: attachments
            .iter()
            .map(|attachment| RenderPassAttachment {
                format: convert_vk_format(attachment.format),
                aspect: aspect_flags_from_format(attachment.format),
                clear: attachment.load_op == vk::AttachmentLoadOp::CLEAR,
                clear_stencil: attachment.stencil_load_op == vk::AttachmentLoadOp::CLEAR,
            })
            .collect(),
        ..Default::default()
    };
    if let Some(subpass) = subpasses.first() {
        let colors =
            unsafe { raw_slice(subpass.p_color_attachments, subpass.color_attachment_count) };
        record.colors = colors
            .iter()
            .map(|reference| {
                (reference.attachment != vk::ATTACHMENT_UNUSED).then_some(reference.attachment)
            })
            .collect();
        record.depth_stencil = unsafe { subpass.p_depth_stencil_attachment.as_ref() }
            .map(|reference| reference.attachment)
            .filter(|attachment| *attachment != vk::ATTACHMENT_UNUSED);
    }
    record
}

pub fn create_render_pass(
    service: &LayerService,
    device: vk::Device,
    info: &vk::RenderPassCreateInfo<'_>,
) -> VkResult<vk::RenderPass> {
    let wrapper = device_of(service, device)?;
    let render_pass = wrapper.dispatch().create_render_pass(info)?;
    wrapper.register_render_pass(render_pass, describe_render_pass(info));
    Ok(render_pass)
}

pub fn destroy_render_pass(service: &LayerService, device: vk::Device, render_pass: vk::RenderPass) {
    if render_pass == vk::RenderPass::null() {
        return;
    }
    let Ok(wrapper) = device_of(service, device) else {
        return;
    };
    wrapper
        .registry()
        .lock()
        .render_passes
        .unregister(render_pass.as_raw());
    wrapper.dispatch().destroy_render_pass(render_pass);
}

pub fn create_framebuffer(
    service: &LayerService,
    device: vk::Device,
    info: &vk::FramebufferCreateInfo<'_>,
) -> VkResult<vk::Framebuffer> {
    let wrapper = device_of(service, device)?;
    let framebuffer = wrapper.dispatch().create_framebuffer(info)?;
    let views = if info.flags.contains(vk::FramebufferCreateFlags::IMAGELESS) {
        Vec::new()
    } else {
        // SAFETY: non-imageless framebuffers carry `attachment_count` views.
        unsafe { raw_slice(info.p_attachments, info.attachment_count) }.to_vec()
    };
    wrapper.register_framebuffer(framebuffer, views);
    Ok(framebuffer)
}

pub fn destroy_framebuffer(service: &LayerService, device: vk::Device, framebuffer: vk::Framebuffer) {
    if framebuffer == vk::Framebuffer::null() {
        return;
    }
    let Ok(wrapper) = device_of(service, device) else {
        return;
    };
    wrapper
        .registry()
        .lock()
        .framebuffers
        .unregister(framebuffer.as_raw());
    wrapper.dispatch().destroy_framebuffer(framebuffer);
}

// ============================================================================
// Command buffers
// ============================================================================

pub fn allocate_command_buffers(
    service: &LayerService,
    device: vk::Device,
    info: &vk::CommandBufferAllocateInfo<'_>,
) -> VkResult<Vec<vk::CommandBuffer>> {
    let wrapper = device_of(service, device)?;
    let buffers = wrapper.dispatch().allocate_command_buffers(info)?;
    let api: &dyn DeviceApi = wrapper.as_ref();
    for &buffer in &buffers {
        let state = Arc::new(VulkanCommandBuffer::new(
            buffer,
            info.command_pool,
            Arc::clone(&wrapper),
        ));
        let cmd = state.command_list();
        service.vulkan.command_buffers.insert(buffer.as_raw(), state);
        wrapper
            .addons()
            .notify(|addon| addon.on_init_command_list(api, cmd));
    }
    Ok(buffers)
}

pub fn free_command_buffers(
    service: &LayerService,
    device: vk::Device,
    pool: vk::CommandPool,
    buffers: &[vk::CommandBuffer],
) {
    let Ok(wrapper) = device_of(service, device) else {
        return;
    };
    let api: &dyn DeviceApi = wrapper.as_ref();
    for buffer in buffers.iter().filter(|buffer| **buffer != vk::CommandBuffer::null()) {
        if service.vulkan.command_buffers.remove(buffer.as_raw()).is_some() {
            let cmd = CommandList(buffer.as_raw());
            wrapper
                .addons()
                .notify(|addon| addon.on_destroy_command_list(api, cmd));
        }
    }
    wrapper.dispatch().free_command_buffers(pool, buffers);
}

/// `vkDestroyCommandPool`. Command buffers still allocated from the pool
/// are freed with it.
pub fn destroy_command_pool(service: &LayerService, device: vk::Device, pool: vk::CommandPool) {
    let Ok(wrapper) = device_of(service, device) else {
        return;
    };
    let api: &dyn DeviceApi = wrapper.as_ref();
    for cmd in forget_command_pool(service, &wrapper, pool) {
        wrapper
            .addons()
            .notify(|addon| addon.on_destroy_command_list(api, cmd));
    }
    wrapper.dispatch().destroy_command_pool(pool);
}

/// Stop tracking the command buffers of `pool`. Returns the forgotten ones.
fn forget_command_pool(
    service: &LayerService,
    device: &Arc<VulkanDevice>,
    pool: vk::CommandPool,
) -> Vec<CommandList> {
    let mut forgotten = Vec::new();
    service.vulkan.command_buffers.retain(|_, cmd| {
        let keep = cmd.pool() != pool || !Arc::ptr_eq(cmd.device(), device);
        if !keep {
            forgotten.push(cmd.command_list());
        }
        keep
    });
    forgotten
}

pub fn begin_command_buffer(
    service: &LayerService,
    cmd: vk::CommandBuffer,
    info: &vk::CommandBufferBeginInfo<'_>,
) -> VkResult<()> {
    let state = command_buffer_of(service, cmd).ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;
    state.reset();
    state.device().dispatch().begin_command_buffer(cmd, info)
}

pub fn end_command_buffer(service: &LayerService, cmd: vk::CommandBuffer) -> VkResult<()> {
    let state = command_buffer_of(service, cmd).ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;
    state.device().dispatch().end_command_buffer(cmd)
}

pub fn cmd_begin_render_pass(
    service: &LayerService,
    cmd: vk::CommandBuffer,
    info: &vk::RenderPassBeginInfo<'_>,
    contents: vk::SubpassContents,
) {
    let Some(state) = command_buffer_of(service, cmd) else {
        return;
    };
    let device = state.device();
    device.dispatch().cmd_begin_render_pass(cmd, info, contents);

    // Imageless framebuffers pass their views at begin time.
    let mut next = info.p_next.cast::<vk::BaseInStructure<'_>>();
    let mut views: &[vk::ImageView] = &[];
    // SAFETY: the chain consists of valid Vulkan structures.
    while let Some(base) = unsafe { next.as_ref() } {
        if base.s_type == vk::StructureType::RENDER_PASS_ATTACHMENT_BEGIN_INFO {
            let begin = unsafe { &*next.cast::<vk::RenderPassAttachmentBeginInfo<'_>>() };
            views = unsafe { raw_slice(begin.p_attachments, begin.attachment_count) };
            break;
        }
        next = base.p_next;
    }
    let attachments = device.render_pass_attachments(info.render_pass, info.framebuffer, views);
    state.begin_render_pass(attachments);
}

pub fn cmd_end_render_pass(service: &LayerService, cmd: vk::CommandBuffer) {
    let Some(state) = command_buffer_of(service, cmd) else {
        return;
    };
    state.end_render_pass();
    state.device().dispatch().cmd_end_render_pass(cmd);
}

/// Attachments of a dynamic rendering scope.
pub fn rendering_attachments(info: &vk::RenderingInfo<'_>) -> RenderPassAttachments {
    // SAFETY: the application passes valid attachment arrays.
    let colors = unsafe { raw_slice(info.p_color_attachments, info.color_attachment_count) };
    let views: Vec<ResourceView> = colors
        .iter()
        .map(|attachment| ResourceView(attachment.image_view.as_raw()))
        .collect();
    let depth = unsafe { info.p_depth_attachment.as_ref() }
        .or(unsafe { info.p_stencil_attachment.as_ref() })
        .map_or(ResourceView::NULL, |attachment| {
            ResourceView(attachment.image_view.as_raw())
        });
    RenderPassAttachments::from_views(&views, depth)
}

pub fn cmd_begin_rendering(service: &LayerService, cmd: vk::CommandBuffer, info: &vk::RenderingInfo<'_>) {
    let Some(state) = command_buffer_of(service, cmd) else {
        return;
    };
    state.device().dispatch().cmd_begin_rendering(cmd, info);
    state.begin_render_pass(rendering_attachments(info));
}

pub fn cmd_end_rendering(service: &LayerService, cmd: vk::CommandBuffer) {
    let Some(state) = command_buffer_of(service, cmd) else {
        return;
    };
    state.end_render_pass();
    state.device().dispatch().cmd_end_rendering(cmd);
}

// ============================================================================
// State binding
// ============================================================================

pub fn cmd_bind_pipeline(
    service: &LayerService,
    cmd: vk::CommandBuffer,
    bind_point: vk::PipelineBindPoint,
    pipeline: vk::Pipeline,
) {
    let Some(state) = command_buffer_of(service, cmd) else {
        return;
    };
    let device = state.device();
    device.dispatch().cmd_bind_pipeline(cmd, bind_point, pipeline);

    let stages = device
        .registry()
        .lock()
        .pipelines
        .get(pipeline.as_raw())
        .map_or_else(|| convert_pipeline_bind_point(bind_point), |record| record.stages);
    let api: &dyn DeviceApi = device.as_ref();
    let list = state.command_list();
    let handle = Pipeline(pipeline.as_raw());
    device
        .addons()
        .notify(|addon| addon.on_bind_pipeline(api, list, stages, handle));
}

pub fn cmd_set_viewport(
    service: &LayerService,
    cmd: vk::CommandBuffer,
    first: u32,
    viewports: &[vk::Viewport],
) {
    let Some(state) = command_buffer_of(service, cmd) else {
        return;
    };
    let device = state.device();
    device.dispatch().cmd_set_viewport(cmd, first, viewports);

    let converted: Vec<Viewport> = viewports
        .iter()
        .map(|viewport| Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        })
        .collect();
    let api: &dyn DeviceApi = device.as_ref();
    let list = state.command_list();
    device
        .addons()
        .notify(|addon| addon.on_bind_viewports(api, list, first, &converted));
}

pub fn convert_rect(rect: &vk::Rect2D) -> Rect {
    Rect::new(
        rect.offset.x,
        rect.offset.y,
        rect.offset.x + rect.extent.width as i32,
        rect.offset.y + rect.extent.height as i32,
    )
}

pub fn cmd_set_scissor(service: &LayerService, cmd: vk::CommandBuffer, first: u32, scissors: &[vk::Rect2D]) {
    let Some(state) = command_buffer_of(service, cmd) else {
        return;
    };
    let device = state.device();
    device.dispatch().cmd_set_scissor(cmd, first, scissors);

    let rects: Vec<Rect> = scissors.iter().map(convert_rect).collect();
    let api: &dyn DeviceApi = device.as_ref();
    let list = state.command_list();
    device
        .addons()
        .notify(|addon| addon.on_bind_scissor_rects(api, list, first, &rects));
}

pub fn cmd_bind_vertex_buffers(
    service: &LayerService,
    cmd: vk::CommandBuffer,
    first: u32,
    buffers: &[vk::Buffer],
    offsets: &[vk::DeviceSize],
) {
    let Some(state) = command_buffer_of(service, cmd) else {
        return;
    };
    let device = state.device();
    device.dispatch().cmd_bind_vertex_buffers(cmd, first, buffers, offsets);

    let resources: Vec<Resource> = buffers.iter().map(|buffer| Resource(buffer.as_raw())).collect();
    let api: &dyn DeviceApi = device.as_ref();
    let list = state.command_list();
    // Strides live in the pipeline.
    device
        .addons()
        .notify(|addon| addon.on_bind_vertex_buffers(api, list, first, &resources, offsets, &[]));
}

pub fn cmd_bind_index_buffer(
    service: &LayerService,
    cmd: vk::CommandBuffer,
    buffer: vk::Buffer,
    offset: vk::DeviceSize,
    index_type: vk::IndexType,
) {
    let Some(state) = command_buffer_of(service, cmd) else {
        return;
    };
    let device = state.device();
    device.dispatch().cmd_bind_index_buffer(cmd, buffer, offset, index_type);

    let index_size = match index_type {
        vk::IndexType::UINT16 => 2,
        vk::IndexType::UINT32 => 4,
        _ => 1,
    };
    let api: &dyn DeviceApi = device.as_ref();
    let list = state.command_list();
    let resource = Resource(buffer.as_raw());
    device
        .addons()
        .notify(|addon| addon.on_bind_index_buffer(api, list, resource, offset, index_size));
}

pub fn cmd_bind_descriptor_sets(
    service: &LayerService,
    cmd: vk::CommandBuffer,
    bind_point: vk::PipelineBindPoint,
    layout: vk::PipelineLayout,
    first_set: u32,
    sets: &[vk::DescriptorSet],
    dynamic_offsets: &[u32],
) {
    let Some(state) = command_buffer_of(service, cmd) else {
        return;
    };
    let device = state.device();
    device
        .dispatch()
        .cmd_bind_descriptor_sets(cmd, bind_point, layout, first_set, sets, dynamic_offsets);

    let handles: Vec<DescriptorSet> = sets.iter().map(|set| DescriptorSet(set.as_raw())).collect();
    let stages = convert_pipeline_bind_point(bind_point);
    let api: &dyn DeviceApi = device.as_ref();
    let list = state.command_list();
    let layout = PipelineLayout(layout.as_raw());
    device.addons().notify(|addon| {
        addon.on_bind_descriptor_sets(api, list, stages, layout, first_set, &handles)
    });
}

// ============================================================================
// Draws, dispatches, copies and clears
// ============================================================================

pub fn cmd_draw(
    service: &LayerService,
    cmd: vk::CommandBuffer,
    vertex_count: u32,
    instance_count: u32,
    first_vertex: u32,
    first_instance: u32,
) {
    let Some(state) = command_buffer_of(service, cmd) else {
        return;
    };
    let device = state.device();
    let api: &dyn DeviceApi = device.as_ref();
    let list = state.command_list();
    if device.addons().handled(|addon| {
        addon.on_draw(api, list, vertex_count, instance_count, first_vertex, first_instance)
    }) {
        return;
    }
    device
        .dispatch()
        .cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance);
}

pub fn cmd_draw_indexed(
    service: &LayerService,
    cmd: vk::CommandBuffer,
    index_count: u32,
    instance_count: u32,
    first_index: u32,
    vertex_offset: i32,
    first_instance: u32,
) {
    let Some(state) = command_buffer_of(service, cmd) else {
        return;
    };
    let device = state.device();
    let api: &dyn DeviceApi = device.as_ref();
    let list = state.command_list();
    if device.addons().handled(|addon| {
        addon.on_draw_indexed(
            api,
            list,
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        )
    }) {
        return;
    }
    device.dispatch().cmd_draw_indexed(
        cmd,
        index_count,
        instance_count,
        first_index,
        vertex_offset,
        first_instance,
    );
}

pub fn cmd_dispatch(service: &LayerService, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
    let Some(state) = command_buffer_of(service, cmd) else {
        return;
    };
    let device = state.device();
    let api: &dyn DeviceApi = device.as_ref();
    let list = state.command_list();
    if device
        .addons()
        .handled(|addon| addon.on_dispatch(api, list, x, y, z))
    {
        return;
    }
    device.dispatch().cmd_dispatch(cmd, x, y, z);
}

/// Copy buffer regions. Regions an add-on handles are left out of the
/// native call; the call is skipped when none remain.
pub fn cmd_copy_buffer(
    service: &LayerService,
    cmd: vk::CommandBuffer,
    src: vk::Buffer,
    dst: vk::Buffer,
    regions: &[vk::BufferCopy],
) {
    let Some(state) = command_buffer_of(service, cmd) else {
        return;
    };
    let device = state.device();
    let api: &dyn DeviceApi = device.as_ref();
    let list = state.command_list();
    let (source, dest) = (Resource(src.as_raw()), Resource(dst.as_raw()));
    let remaining: Vec<vk::BufferCopy> = regions
        .iter()
        .filter(|region| {
            !device.addons().handled(|addon| {
                addon.on_copy_buffer_region(
                    api,
                    list,
                    source,
                    region.src_offset,
                    dest,
                    region.dst_offset,
                    region.size,
                )
            })
        })
        .copied()
        .collect();
    if !remaining.is_empty() {
        device.dispatch().cmd_copy_buffer(cmd, src, dst, &remaining);
    }
}

fn texture_region(
    device: &VulkanDevice,
    image: vk::Image,
    layers: &vk::ImageSubresourceLayers,
    offset: vk::Offset3D,
    extent: vk::Extent3D,
) -> TextureRegion {
    let levels = device
        .get_resource_desc(Resource(image.as_raw()))
        .and_then(|desc| desc.as_texture().map(|texture| u32::from(texture.levels).max(1)))
        .unwrap_or(1);
    let (left, top, front) = (offset.x as u32, offset.y as u32, offset.z as u32);
    TextureRegion {
        resource: Resource(image.as_raw()),
        subresource: layers.mip_level + layers.base_array_layer * levels,
        region: Some(SubresourceBox {
            left,
            top,
            front,
            right: left + extent.width,
            bottom: top + extent.height,
            back: front + extent.depth,
        }),
    }
}

pub fn cmd_copy_image(
    service: &LayerService,
    cmd: vk::CommandBuffer,
    src: vk::Image,
    src_layout: vk::ImageLayout,
    dst: vk::Image,
    dst_layout: vk::ImageLayout,
    regions: &[vk::ImageCopy],
) {
    let Some(state) = command_buffer_of(service, cmd) else {
        return;
    };
    let device = state.device();
    let api: &dyn DeviceApi = device.as_ref();
    let list = state.command_list();
    let remaining: Vec<vk::ImageCopy> = regions
        .iter()
        .filter(|region| {
            let source = texture_region(device, src, &region.src_subresource, region.src_offset, region.extent);
            let dest = texture_region(device, dst, &region.dst_subresource, region.dst_offset, region.extent);
            !device
                .addons()
                .handled(|addon| addon.on_copy_texture_region(api, list, &source, &dest))
        })
        .copied()
        .collect();
    if !remaining.is_empty() {
        device
            .dispatch()
            .cmd_copy_image(cmd, src, src_layout, dst, dst_layout, &remaining);
    }
}

/// Clear attachments of the open render pass. Each attachment entry is
/// offered to add-ons separately.
pub fn cmd_clear_attachments(
    service: &LayerService,
    cmd: vk::CommandBuffer,
    attachments: &[vk::ClearAttachment],
    rects: &[vk::ClearRect],
) {
    let Some(state) = command_buffer_of(service, cmd) else {
        return;
    };
    let device = state.device();
    let api: &dyn DeviceApi = device.as_ref();
    let list = state.command_list();
    let clear_rects: Vec<Rect> = rects.iter().map(|rect| convert_rect(&rect.rect)).collect();

    let remaining: Vec<vk::ClearAttachment> = attachments
        .iter()
        .filter(|attachment| {
            let mut flags = AttachmentType::empty();
            let mut values = ClearValues::default();
            if attachment.aspect_mask.contains(vk::ImageAspectFlags::COLOR) {
                flags |= AttachmentType::COLOR;
                // SAFETY: color aspects carry a color clear value.
                values.color = unsafe { attachment.clear_value.color.float32 };
            }
            if attachment.aspect_mask.contains(vk::ImageAspectFlags::DEPTH) {
                flags |= AttachmentType::DEPTH;
                values.depth = unsafe { attachment.clear_value.depth_stencil.depth };
            }
            if attachment.aspect_mask.contains(vk::ImageAspectFlags::STENCIL) {
                flags |= AttachmentType::STENCIL;
                values.stencil = unsafe { attachment.clear_value.depth_stencil.stencil } as u8;
            }
            !device
                .addons()
                .handled(|addon| addon.on_clear_attachments(api, list, flags, &values, &clear_rects))
        })
        .copied()
        .collect();
    if !remaining.is_empty() {
        device.dispatch().cmd_clear_attachments(cmd, &remaining, rects);
    }
}

// ============================================================================
// Queues
// ============================================================================

pub fn queue_submit(
    service: &LayerService,
    queue: vk::Queue,
    submits: &[vk::SubmitInfo<'_>],
    fence: vk::Fence,
) -> VkResult<()> {
    let wrapper = service
        .vulkan
        .queues
        .require(queue.as_raw())
        .map_err(|_| vk::Result::ERROR_INITIALIZATION_FAILED)?;
    let device = wrapper.device();
    let api: &dyn DeviceApi = device.as_ref();
    let command_queue = wrapper.command_queue();
    for submit in submits {
        // SAFETY: `p_command_buffers` holds `command_buffer_count` handles.
        let buffers = unsafe { raw_slice(submit.p_command_buffers, submit.command_buffer_count) };
        for buffer in buffers {
            let cmd = CommandList(buffer.as_raw());
            device
                .addons()
                .notify(|addon| addon.on_execute_command_list(api, command_queue, cmd));
        }
    }
    device
        .dispatch()
        .queue_submit(queue, submits, fence)
        .inspect_err(|e| device.log_failure("vkQueueSubmit", *e))
}

/// `vkQueuePresentKHR`. Returns `true` if a swap chain is suboptimal.
pub fn queue_present(
    service: &LayerService,
    queue: vk::Queue,
    info: &vk::PresentInfoKHR<'_>,
) -> VkResult<bool> {
    let wrapper = service
        .vulkan
        .queues
        .require(queue.as_raw())
        .map_err(|_| vk::Result::ERROR_INITIALIZATION_FAILED)?;
    let device = wrapper.device();
    let api: &dyn DeviceApi = device.as_ref();
    let command_queue = wrapper.command_queue();
    // SAFETY: `p_swapchains` holds `swapchain_count` handles.
    let swapchains = unsafe { raw_slice(info.p_swapchains, info.swapchain_count) };
    for swapchain in swapchains {
        let handle = SwapChain(swapchain.as_raw());
        device
            .addons()
            .notify(|addon| addon.on_present(api, command_queue, handle));
    }
    device.dispatch().queue_present(queue, info)
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::vulkan::dummy::DummyVulkan;
    use lumen_core::{Addon, LayerConfig, ResourceDesc};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        skip_draws: bool,
        replace_buffers: bool,
    }

    impl Recorder {
        fn push(&self, event: impl Into<String>) {
            self.events.lock().push(event.into());
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.events.lock().iter().filter(|e| e.starts_with(prefix)).count()
        }
    }

    impl Addon for Recorder {
        fn on_init_device(&self, _: &dyn DeviceApi) {
            self.push("init_device");
        }
        fn on_destroy_device(&self, _: &dyn DeviceApi) {
            self.push("destroy_device");
        }
        fn on_destroy_command_queue(&self, _: &dyn DeviceApi, _: lumen_core::CommandQueue) {
            self.push("destroy_queue");
        }
        fn on_destroy_command_list(&self, _: &dyn DeviceApi, cmd: CommandList) {
            self.push(format!("destroy_command_list:{:#x}", cmd.raw()));
        }
        fn on_create_resource(
            &self,
            device: &dyn DeviceApi,
            desc: &ResourceDesc,
            initial_state: ResourceUsage,
        ) -> Option<Resource> {
            if self.replace_buffers && desc.buffer_size().is_some() {
                let doubled = ResourceDesc::buffer(desc.buffer_size()? * 2).with_usage(desc.usage);
                return device.create_resource(&doubled, None, initial_state).ok();
            }
            None
        }
        fn on_init_resource(
            &self,
            _: &dyn DeviceApi,
            _: &ResourceDesc,
            _: Option<&[lumen_core::SubresourceData<'_>]>,
            _: ResourceUsage,
            resource: Resource,
        ) {
            self.push(format!("init_resource:{:#x}", resource.raw()));
        }
        fn on_destroy_resource(&self, _: &dyn DeviceApi, resource: Resource) {
            self.push(format!("destroy_resource:{:#x}", resource.raw()));
        }
        fn on_init_pipeline(&self, _: &dyn DeviceApi, _: &PipelineDesc, _: Pipeline) {
            self.push("init_pipeline");
        }
        fn on_begin_render_pass(
            &self,
            _: &dyn DeviceApi,
            _: CommandList,
            attachments: &RenderPassAttachments,
        ) {
            self.push(format!("begin_render_pass:{:#x}", attachments.colors[0].raw()));
        }
        fn on_finish_render_pass(&self, _: &dyn DeviceApi, _: CommandList) {
            self.push("finish_render_pass");
        }
        fn on_bind_index_buffer(&self, _: &dyn DeviceApi, _: CommandList, _: Resource, _: u64, index_size: u32) {
            self.push(format!("bind_index_buffer:{index_size}"));
        }
        fn on_draw(&self, _: &dyn DeviceApi, _: CommandList, _: u32, _: u32, _: u32, _: u32) -> bool {
            self.push("draw");
            self.skip_draws
        }
        fn on_copy_buffer_region(
            &self,
            _: &dyn DeviceApi,
            _: CommandList,
            _: Resource,
            _: u64,
            _: Resource,
            _: u64,
            size: u64,
        ) -> bool {
            size == 16
        }
        fn on_execute_command_list(&self, _: &dyn DeviceApi, _: lumen_core::CommandQueue, cmd: CommandList) {
            self.push(format!("execute:{:#x}", cmd.raw()));
        }
        fn on_present(&self, _: &dyn DeviceApi, _: lumen_core::CommandQueue, swapchain: SwapChain) {
            self.push(format!("present:{:#x}", swapchain.raw()));
        }
    }

    fn setup(recorder: Recorder) -> (LayerService, Arc<DummyVulkan>, Arc<Recorder>, vk::Device) {
        let _ = env_logger::builder().is_test(true).try_init();
        let service = LayerService::new(LayerConfig::default());
        let recorder = Arc::new(recorder);
        service.addons().register(recorder.clone());
        let dummy = Arc::new(DummyVulkan::new());
        let device = dummy.device();
        on_device_created(&service, dummy.clone(), &[dummy.queue(0)]);
        (service, dummy, recorder, device)
    }

    fn command_buffer(service: &LayerService, device: vk::Device) -> vk::CommandBuffer {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(vk::CommandPool::from_raw(0x77))
            .command_buffer_count(1);
        allocate_command_buffers(service, device, &info).unwrap()[0]
    }

    fn image_info() -> vk::ImageCreateInfo<'static> {
        vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk::Format::R8G8B8A8_UNORM)
            .extent(vk::Extent3D {
                width: 4,
                height: 4,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .usage(vk::ImageUsageFlags::SAMPLED)
    }

    #[test]
    fn test_unknown_device_is_rejected() {
        let (service, _dummy, _recorder, _) = setup(Recorder::default());
        let result = create_image(&service, vk::Device::from_raw(0xDEAD), &image_info());
        assert_eq!(result, Err(vk::Result::ERROR_INITIALIZATION_FAILED));
    }

    #[test]
    fn test_application_image_lifecycle() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let image = create_image(&service, device, &image_info()).unwrap();
        let wrapper = service.vulkan.devices.get(device.as_raw()).unwrap();
        assert!(wrapper.is_resource_handle_valid(Resource(image.as_raw())));
        assert_eq!(recorder.count("init_resource"), 1);

        destroy_image(&service, device, image);
        assert!(!wrapper.is_resource_handle_valid(Resource(image.as_raw())));
        assert_eq!(recorder.count("destroy_resource"), 1);
        assert_eq!(dummy.objects().live_of_kind("image"), 0);
    }

    #[test]
    fn test_replacement_resource_is_returned() {
        let recorder = Recorder {
            replace_buffers: true,
            ..Default::default()
        };
        let (service, dummy, recorder, device) = setup(recorder);
        let info = vk::BufferCreateInfo::default()
            .size(64)
            .usage(vk::BufferUsageFlags::VERTEX_BUFFER);
        let buffer = create_buffer(&service, device, &info).unwrap();

        // The replacement keeps its own description and skips init events.
        let wrapper = service.vulkan.devices.get(device.as_raw()).unwrap();
        let desc = wrapper.get_resource_desc(Resource(buffer.as_raw())).unwrap();
        assert_eq!(desc.buffer_size(), Some(128));
        assert_eq!(recorder.count("init_resource"), 0);

        destroy_buffer(&service, device, buffer);
        assert_eq!(dummy.objects().live_of_kind("buffer"), 0);
    }

    #[test]
    fn test_dynamic_rendering_events() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let cmd = command_buffer(&service, device);
        let view = vk::ImageView::from_raw(0x1234);
        let colors = [vk::RenderingAttachmentInfo::default().image_view(view)];
        let info = vk::RenderingInfo::default().color_attachments(&colors);

        cmd_begin_rendering(&service, cmd, &info);
        cmd_end_rendering(&service, cmd);
        // Ending twice finishes once.
        cmd_end_rendering(&service, cmd);

        assert_eq!(recorder.count("begin_render_pass:0x1234"), 1);
        assert_eq!(recorder.count("finish_render_pass"), 1);
        assert_eq!(
            dummy.commands_of(cmd),
            vec!["begin_rendering", "end_rendering", "end_rendering"]
        );
    }

    #[test]
    fn test_render_pass_object_attachments() {
        let (service, _dummy, recorder, device) = setup(Recorder::default());
        let attachments = [vk::AttachmentDescription::default()
            .format(vk::Format::R8G8B8A8_UNORM)
            .load_op(vk::AttachmentLoadOp::CLEAR)];
        let references = [vk::AttachmentReference::default().attachment(0)];
        let subpasses = [vk::SubpassDescription::default().color_attachments(&references)];
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses);
        let record = describe_render_pass(&info);
        assert_eq!(record.colors, vec![Some(0)]);
        assert!(record.attachments[0].clear);

        let render_pass = create_render_pass(&service, device, &info).unwrap();
        let views = [vk::ImageView::from_raw(0x4321)];
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&views)
            .width(4)
            .height(4)
            .layers(1);
        let framebuffer = create_framebuffer(&service, device, &framebuffer_info).unwrap();

        let cmd = command_buffer(&service, device);
        let begin = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer);
        cmd_begin_render_pass(&service, cmd, &begin, vk::SubpassContents::INLINE);
        cmd_end_render_pass(&service, cmd);
        assert_eq!(
            recorder.events()[1..],
            ["begin_render_pass:0x4321".to_string(), "finish_render_pass".to_string()]
        );
    }

    #[test]
    fn test_handled_draw_is_skipped() {
        let recorder = Recorder {
            skip_draws: true,
            ..Default::default()
        };
        let (service, dummy, recorder, device) = setup(recorder);
        let cmd = command_buffer(&service, device);
        cmd_draw(&service, cmd, 3, 1, 0, 0);
        cmd_draw_indexed(&service, cmd, 3, 1, 0, 0, 0);
        assert_eq!(recorder.count("draw"), 1);
        assert_eq!(dummy.commands_of(cmd), vec!["draw_indexed"]);
    }

    #[test]
    fn test_handled_copy_regions_are_dropped() {
        let (service, dummy, _recorder, device) = setup(Recorder::default());
        let cmd = command_buffer(&service, device);
        let (src, dst) = (vk::Buffer::from_raw(0x10), vk::Buffer::from_raw(0x20));

        cmd_copy_buffer(&service, cmd, src, dst, &[vk::BufferCopy::default().size(16)]);
        assert!(dummy.commands_of(cmd).is_empty());

        let regions = [
            vk::BufferCopy::default().size(16),
            vk::BufferCopy::default().size(32),
        ];
        cmd_copy_buffer(&service, cmd, src, dst, &regions);
        assert_eq!(dummy.commands_of(cmd), vec!["copy_buffer"]);
    }

    #[test]
    fn test_index_size() {
        let (service, _dummy, recorder, device) = setup(Recorder::default());
        let cmd = command_buffer(&service, device);
        let buffer = vk::Buffer::from_raw(0x10);
        cmd_bind_index_buffer(&service, cmd, buffer, 0, vk::IndexType::UINT16);
        cmd_bind_index_buffer(&service, cmd, buffer, 0, vk::IndexType::UINT32);
        assert_eq!(recorder.count("bind_index_buffer:2"), 1);
        assert_eq!(recorder.count("bind_index_buffer:4"), 1);
    }

    #[test]
    fn test_submit_and_present_events() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let cmd = command_buffer(&service, device);
        let buffers = [cmd];
        let submits = [vk::SubmitInfo::default().command_buffers(&buffers)];
        queue_submit(&service, dummy.queue(0), &submits, vk::Fence::null()).unwrap();
        assert_eq!(recorder.count(&format!("execute:{:#x}", cmd.as_raw())), 1);
        assert_eq!(dummy.commands_of(cmd), vec!["submit"]);

        let swapchains = [vk::SwapchainKHR::from_raw(0x55)];
        let indices = [0];
        let present = vk::PresentInfoKHR::default()
            .swapchains(&swapchains)
            .image_indices(&indices);
        assert_eq!(queue_present(&service, dummy.queue(0), &present), Ok(false));
        assert_eq!(recorder.count("present:0x55"), 1);
    }

    #[test]
    fn test_compute_pipeline_fires_init() {
        let (service, _dummy, recorder, device) = setup(Recorder::default());
        let code = [0x0723_0203u32, 0x0001_0000, 0, 0, 0];
        let module_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = create_shader_module(&service, device, &module_info).unwrap();

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(c"main");
        let infos = [vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(vk::PipelineLayout::from_raw(0x99))];
        let pipelines = create_compute_pipelines(&service, device, &infos).unwrap();
        assert_eq!(pipelines.len(), 1);
        assert_eq!(recorder.count("init_pipeline"), 1);

        let wrapper = service.vulkan.devices.get(device.as_raw()).unwrap();
        let stages = wrapper
            .registry()
            .lock()
            .pipelines
            .get(pipelines[0].as_raw())
            .map(|record| record.stages);
        assert_eq!(stages, Some(lumen_core::pipeline::ShaderStage::COMPUTE));
    }

    #[test]
    fn test_destroy_device_drops_everything() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let _cmd = command_buffer(&service, device);
        // Left alive by the application.
        let _image = create_image(&service, device, &image_info()).unwrap();

        destroy_device(&service, device);
        assert!(service.vulkan.devices.is_empty());
        assert!(service.vulkan.queues.is_empty());
        assert!(service.vulkan.command_buffers.is_empty());
        assert_eq!(recorder.count("destroy_queue"), 1);
        assert_eq!(recorder.count("destroy_device"), 1);
        // Application objects stay owned by the application.
        assert_eq!(dummy.objects().live_of_kind("image"), 1);
    }

    #[test]
    fn test_destroy_command_pool_frees_its_buffers() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let first = command_buffer(&service, device);
        let second = command_buffer(&service, device);
        let other_pool = vk::CommandPool::from_raw(0x78);
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(other_pool)
            .command_buffer_count(1);
        let survivor = allocate_command_buffers(&service, device, &info).unwrap()[0];
        free_command_buffers(&service, device, vk::CommandPool::from_raw(0x77), &[first]);
        assert_eq!(recorder.count("destroy_command_list"), 1);

        destroy_command_pool(&service, device, vk::CommandPool::from_raw(0x77));
        assert_eq!(
            recorder.events().last(),
            Some(&format!("destroy_command_list:{:#x}", second.as_raw()))
        );
        assert_eq!(recorder.count("destroy_command_list"), 2);
        assert!(service.vulkan.command_buffers.get(second.as_raw()).is_none());
        assert!(service.vulkan.command_buffers.get(survivor.as_raw()).is_some());
        assert_eq!(dummy.objects().live_of_kind("command_buffer"), 1);

        destroy_command_pool(&service, device, other_pool);
        assert!(service.vulkan.command_buffers.is_empty());
        assert_eq!(dummy.objects().live_of_kind("command_buffer"), 0);
    }
}
