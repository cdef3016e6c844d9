//! Intercepted `ID3D12Device`, `ID3D12CommandQueue`,
//! `ID3D12GraphicsCommandList` and `IDXGISwapChain3` methods.
//!
//! Device hooks take the device pointer, recording hooks the command list
//! pointer and submission hooks the queue pointer. Queues and command lists
//! are not proxied: their destruction reaches the layer through the
//! destruction callbacks [`destroy_command_queue`] and
//! [`destroy_command_list`], which run before the native object is gone.

use std::sync::Arc;

use lumen_core::events::{Rect, TextureRegion};
use lumen_core::pipeline::{PipelineDesc, ShaderStage};
use lumen_core::resource::SubresourceBox;
use lumen_core::{
    DeviceApi, Pipeline, Resource, ResourceDesc, ResourceView, ResourceViewDesc, Sampler,
    SwapChain,
};

use super::command::{D3D12CommandList, D3D12CommandQueue};
use super::conversion::*;
use super::device::D3D12Device;
use super::driver::{CopyLocation, D3D12Driver, D3D12_COMMAND_LIST_TYPE_DIRECT};
use super::pipeline::{
    convert_native_compute_desc, convert_native_graphics_desc, ComputeStateDesc, GraphicsStateDesc,
};
use crate::backend::com::{failed, ComPtr, HResult, Unknown, E_INVALIDARG, S_OK};
use crate::backend::d3d_state::{convert_native_sampler_desc, SamplerStateDesc};
use crate::backend::dxgi::DxgiFormat;
use crate::service::LayerService;

fn device_of(service: &LayerService, device: ComPtr) -> Result<Arc<D3D12Device>, HResult> {
    service
        .d3d12
        .devices
        .require(device.raw())
        .map_err(|_| E_INVALIDARG)
}

fn list_of(service: &LayerService, list: ComPtr) -> Option<Arc<D3D12CommandList>> {
    service.d3d12.command_lists.require(list.raw()).ok()
}

fn queue_of(service: &LayerService, queue: ComPtr) -> Option<Arc<D3D12CommandQueue>> {
    service.d3d12.queues.require(queue.raw()).ok()
}

// ============================================================================
// Device
// ============================================================================

/// Wrap a device the driver just created and fire its init event.
pub fn create_device(
    service: &LayerService,
    driver: Arc<dyn D3D12Driver>,
) -> Result<Arc<D3D12Device>, HResult> {
    let native = driver.device();
    if native.is_null() {
        log::error!("Device creation returned a null ID3D12Device");
        return Err(E_INVALIDARG);
    }
    let device = Arc::new(D3D12Device::new(
        driver,
        Arc::clone(service.addons()),
        service.config().clone(),
    ));
    service.d3d12.devices.insert(native.raw(), Arc::clone(&device));

    let api: &dyn DeviceApi = device.as_ref();
    device.addons().notify(|addon| addon.on_init_device(api));
    Ok(device)
}

/// `IUnknown::Release` of the device proxy. The wrapper and everything
/// mapped to it leave the directory on the final release.
pub fn release_device(service: &LayerService, device: ComPtr) -> u32 {
    let Some(wrapper) = service.d3d12.devices.get(device.raw()) else {
        log::error!("Release on unknown ID3D12Device {:#x}", device.raw());
        return 0;
    };
    let remaining = wrapper.release();
    if remaining == 0 {
        service.d3d12.devices.remove(device.raw());
        service
            .d3d12
            .queues
            .retain(|_, queue| !Arc::ptr_eq(queue.device(), &wrapper));
        service
            .d3d12
            .command_lists
            .retain(|_, list| !Arc::ptr_eq(list.device(), &wrapper));
        service
            .d3d12
            .swapchains
            .retain(|_, owner| !Arc::ptr_eq(owner, &wrapper));
    }
    remaining
}

/// Destruction callback of an application resource or pipeline state.
pub fn object_destroyed(service: &LayerService, device: ComPtr, object: ComPtr) {
    let Some(wrapper) = service.d3d12.devices.get(device.raw()) else {
        return;
    };
    let api: &dyn DeviceApi = wrapper.as_ref();
    let raw = object.raw();
    if wrapper.is_resource_handle_valid(Resource(raw)) {
        wrapper
            .addons()
            .notify(|addon| addon.on_destroy_resource(api, Resource(raw)));
    } else if wrapper.registry().lock().pipelines.contains(raw) {
        wrapper
            .addons()
            .notify(|addon| addon.on_destroy_pipeline(api, Pipeline(raw)));
    }
    wrapper.unregister_application_object(object);
}

// ============================================================================
// Command queues and command lists
// ============================================================================

/// `CreateCommandQueue`. The first direct queue also carries the layer's
/// own uploads.
pub fn create_command_queue(service: &LayerService, device: ComPtr, list_type: u32) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let queue = wrapper
        .driver()
        .create_command_queue(list_type)
        .inspect_err(|hr| wrapper.log_failure("ID3D12Device::CreateCommandQueue", *hr))?;
    if list_type == D3D12_COMMAND_LIST_TYPE_DIRECT {
        if let Err(hr) = wrapper.attach_queue(queue) {
            log::warn!(
                "Failed to create the immediate command list for queue {:#x}: {:#010x}",
                queue.raw(),
                hr as u32
            );
        }
    }
    let state = Arc::new(D3D12CommandQueue::new(queue, list_type, Arc::clone(&wrapper)));
    service.d3d12.queues.insert(queue.raw(), Arc::clone(&state));

    let api: &dyn DeviceApi = wrapper.as_ref();
    let handle = state.command_queue();
    wrapper
        .addons()
        .notify(|addon| addon.on_init_command_queue(api, handle));
    Ok(queue)
}

/// Destruction callback of a command queue.
pub fn destroy_command_queue(service: &LayerService, queue: ComPtr) {
    let Some(state) = service.d3d12.queues.remove(queue.raw()) else {
        return;
    };
    let device = state.device();
    device.detach_queue(queue);
    let api: &dyn DeviceApi = device.as_ref();
    let handle = state.command_queue();
    device
        .addons()
        .notify(|addon| addon.on_destroy_command_queue(api, handle));
}

/// `CreateCommandList`. The list starts out open for recording.
pub fn create_command_list(
    service: &LayerService,
    device: ComPtr,
    list_type: u32,
    allocator: ComPtr,
    initial_state: ComPtr,
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let list = wrapper
        .driver()
        .create_command_list(list_type, allocator, initial_state)
        .inspect_err(|hr| wrapper.log_failure("ID3D12Device::CreateCommandList", *hr))?;
    let state = Arc::new(D3D12CommandList::new(list, list_type, Arc::clone(&wrapper)));
    service.d3d12.command_lists.insert(list.raw(), Arc::clone(&state));

    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = state.command_list();
    wrapper
        .addons()
        .notify(|addon| addon.on_init_command_list(api, cmd));
    if !initial_state.is_null() {
        notify_bind_pipeline(&state, initial_state);
    }
    Ok(list)
}

/// Destruction callback of a command list.
pub fn destroy_command_list(service: &LayerService, list: ComPtr) {
    let Some(state) = service.d3d12.command_lists.remove(list.raw()) else {
        return;
    };
    let device = state.device();
    let api: &dyn DeviceApi = device.as_ref();
    let cmd = state.command_list();
    device
        .addons()
        .notify(|addon| addon.on_destroy_command_list(api, cmd));
}

/// `ID3D12GraphicsCommandList::Close`. The open render pass ends first.
pub fn close_command_list(service: &LayerService, list: ComPtr) -> HResult {
    let Some(state) = list_of(service, list) else {
        return E_INVALIDARG;
    };
    state.close();
    let hr = state.device().driver().close_command_list(list);
    if failed(hr) {
        state
            .device()
            .log_failure("ID3D12GraphicsCommandList::Close", hr);
    }
    hr
}

/// `ID3D12GraphicsCommandList::Reset`.
pub fn reset_command_list(service: &LayerService, list: ComPtr, allocator: ComPtr, initial_state: ComPtr) -> HResult {
    let Some(state) = list_of(service, list) else {
        return E_INVALIDARG;
    };
    let hr = state
        .device()
        .driver()
        .reset_command_list(list, allocator, initial_state);
    if failed(hr) {
        state
            .device()
            .log_failure("ID3D12GraphicsCommandList::Reset", hr);
        return hr;
    }
    state.reset();
    if !initial_state.is_null() {
        notify_bind_pipeline(&state, initial_state);
    }
    hr
}

/// `ExecuteCommandLists`. Every list is reported before the native call.
pub fn execute_command_lists(service: &LayerService, queue: ComPtr, lists: &[ComPtr]) {
    let Some(state) = queue_of(service, queue) else {
        return;
    };
    let device = state.device();
    let api: &dyn DeviceApi = device.as_ref();
    let handle = state.command_queue();
    for list in lists {
        let cmd = lumen_core::CommandList(list.raw());
        device
            .addons()
            .notify(|addon| addon.on_execute_command_list(api, handle, cmd));
    }
    device.driver().execute_command_lists(queue, lists);
}

// ============================================================================
// Swap chains
// ============================================================================

/// A swap chain was created for `queue`.
pub fn init_swapchain(service: &LayerService, queue: ComPtr, swapchain: ComPtr) -> HResult {
    let Some(state) = queue_of(service, queue) else {
        return E_INVALIDARG;
    };
    let device = Arc::clone(state.device());
    let handle = match device.init_swapchain(swapchain, queue) {
        Ok(handle) => handle,
        Err(hr) => {
            log::warn!(
                "Failed to query the buffers of swap chain {:#x}: {:#010x}",
                swapchain.raw(),
                hr as u32
            );
            return hr;
        }
    };
    service.d3d12.swapchains.insert(swapchain.raw(), Arc::clone(&device));
    let api: &dyn DeviceApi = device.as_ref();
    device
        .addons()
        .notify(|addon| addon.on_init_swapchain(api, handle));
    S_OK
}

/// Final release of a swap chain.
pub fn destroy_swapchain(service: &LayerService, swapchain: ComPtr) {
    let Some(device) = service.d3d12.swapchains.remove(swapchain.raw()) else {
        return;
    };
    let api: &dyn DeviceApi = device.as_ref();
    device
        .addons()
        .notify(|addon| addon.on_destroy_swapchain(api, SwapChain(swapchain.raw())));
    device.destroy_swapchain(swapchain);
}

/// `IDXGISwapChain::Present`. Work the layer recorded is submitted first.
pub fn present(service: &LayerService, swapchain: ComPtr, sync_interval: u32, flags: u32) -> HResult {
    let Some(device) = service.d3d12.swapchains.get(swapchain.raw()) else {
        log::error!("Present on unknown swap chain {:#x}", swapchain.raw());
        return E_INVALIDARG;
    };
    if let Err(hr) = device.flush_immediate() {
        log::warn!("Failed to flush the immediate command list: {:#010x}", hr as u32);
    }
    let queue = device.swapchain_queue(swapchain).unwrap_or(ComPtr::NULL);
    let api: &dyn DeviceApi = device.as_ref();
    let queue = lumen_core::CommandQueue(queue.raw());
    device
        .addons()
        .notify(|addon| addon.on_present(api, queue, SwapChain(swapchain.raw())));

    let hr = device.driver().present(swapchain, sync_interval, flags);
    if failed(hr) {
        device.log_failure("IDXGISwapChain::Present", hr);
    }
    hr
}

/// `IDXGISwapChain::ResizeBuffers`. The swap chain is destroyed and
/// recreated around the native call, whether or not it succeeds.
pub fn resize_buffers(
    service: &LayerService,
    swapchain: ComPtr,
    count: u32,
    width: u32,
    height: u32,
    format: DxgiFormat,
) -> HResult {
    let Some(device) = service.d3d12.swapchains.get(swapchain.raw()) else {
        return E_INVALIDARG;
    };
    let api: &dyn DeviceApi = device.as_ref();
    device
        .addons()
        .notify(|addon| addon.on_destroy_swapchain(api, SwapChain(swapchain.raw())));
    let queue = device.destroy_swapchain(swapchain).unwrap_or(ComPtr::NULL);

    let hr = device
        .driver()
        .resize_buffers(swapchain, count, width, height, format);
    if failed(hr) {
        device.log_failure("IDXGISwapChain::ResizeBuffers", hr);
    }

    match device.init_swapchain(swapchain, queue) {
        Ok(handle) => device
            .addons()
            .notify(|addon| addon.on_init_swapchain(api, handle)),
        Err(e) => log::warn!(
            "Failed to query the swap chain after resizing: {:#010x}",
            e as u32
        ),
    }
    hr
}

// ============================================================================
// Resources, views and samplers
// ============================================================================

/// `CreateCommittedResource`.
pub fn create_committed_resource(
    service: &LayerService,
    device: ComPtr,
    heap: &HeapProperties,
    desc: &NativeResourceDesc,
    initial_state: u32,
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let api: &dyn DeviceApi = wrapper.as_ref();
    let requested = convert_native_desc(heap, desc);
    let usage = convert_native_states(initial_state);
    if let Some(replacement) = wrapper
        .addons()
        .replacement(|addon| addon.on_create_resource(api, &requested, usage))
    {
        check_replacement(&wrapper, replacement, &requested);
        // The application releases what it receives.
        let object = ComPtr(replacement.raw());
        wrapper.driver().add_ref(object);
        return Ok(object);
    }

    let object = wrapper
        .driver()
        .create_committed_resource(heap, desc, initial_state)
        .inspect_err(|hr| wrapper.log_failure("ID3D12Device::CreateCommittedResource", *hr))?;
    let actual = wrapper.register_native_resource(object, heap, desc);
    let resource = Resource(object.raw());
    wrapper
        .addons()
        .notify(|addon| addon.on_init_resource(api, &actual, None, usage, resource));
    Ok(object)
}

fn check_replacement(device: &D3D12Device, resource: Resource, requested: &ResourceDesc) {
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

/// `CreateShaderResourceView`, `CreateRenderTargetView`,
/// `CreateDepthStencilView` and `CreateUnorderedAccessView`.
///
/// A replacement view is a descriptor of the layer's; its content is copied
/// into the application's descriptor.
pub fn create_view(
    service: &LayerService,
    device: ComPtr,
    kind: ViewKind,
    resource: ComPtr,
    desc: Option<&ViewDesc>,
    descriptor: u64,
) -> Result<(), HResult> {
    let wrapper = device_of(service, device)?;
    let api: &dyn DeviceApi = wrapper.as_ref();
    let usage = kind.usage();
    let requested = match (desc, wrapper.get_resource_desc(Resource(resource.raw()))) {
        (Some(desc), _) => convert_native_view_desc(kind, desc),
        (None, Some(resource_desc)) => ResourceViewDesc::for_resource(&resource_desc),
        (None, None) => {
            log::warn!("View of unknown resource {:#x}", resource.raw());
            wrapper.driver().create_view(kind, resource, None, descriptor);
            return Ok(());
        }
    };
    if let Some(replacement) = wrapper.addons().replacement(|addon| {
        addon.on_create_resource_view(api, Resource(resource.raw()), usage, &requested)
    }) {
        wrapper
            .driver()
            .copy_descriptor(kind.heap(), descriptor, replacement.raw());
        wrapper.copy_descriptor_record(descriptor, replacement.raw());
        return Ok(());
    }

    wrapper.driver().create_view(kind, resource, desc, descriptor);
    if let Some((resource, usage, desc)) = wrapper.register_native_view(kind, resource, desc, descriptor) {
        let handle = ResourceView(descriptor);
        wrapper
            .addons()
            .notify(|addon| addon.on_init_resource_view(api, resource, usage, &desc, handle));
    }
    Ok(())
}

pub fn create_sampler(
    service: &LayerService,
    device: ComPtr,
    desc: &SamplerStateDesc,
    descriptor: u64,
) -> Result<(), HResult> {
    let wrapper = device_of(service, device)?;
    let api: &dyn DeviceApi = wrapper.as_ref();
    let requested = convert_native_sampler_desc(desc);
    if let Some(replacement) = wrapper
        .addons()
        .replacement(|addon| addon.on_create_sampler(api, &requested))
    {
        wrapper
            .driver()
            .copy_descriptor(DescriptorHeapKind::Sampler, descriptor, replacement.raw());
        wrapper.copy_descriptor_record(descriptor, replacement.raw());
        return Ok(());
    }

    wrapper.driver().create_sampler(desc, descriptor);
    let abstract_desc = wrapper.register_native_sampler(desc, descriptor);
    wrapper
        .addons()
        .notify(|addon| addon.on_init_sampler(api, &abstract_desc, Sampler(descriptor)));
    Ok(())
}

/// `CopyDescriptorsSimple`. The records follow the descriptors.
pub fn copy_descriptors_simple(
    service: &LayerService,
    device: ComPtr,
    count: u32,
    dest_start: u64,
    source_start: u64,
    kind: DescriptorHeapKind,
) -> Result<(), HResult> {
    let wrapper = device_of(service, device)?;
    let increment = u64::from(wrapper.driver().descriptor_increment(kind));
    for index in 0..u64::from(count) {
        let dest = dest_start + index * increment;
        let source = source_start + index * increment;
        wrapper.driver().copy_descriptor(kind, dest, source);
        wrapper.copy_descriptor_record(dest, source);
    }
    Ok(())
}

// ============================================================================
// Pipeline states
// ============================================================================

fn create_pipeline_state(
    device: &D3D12Device,
    call: &str,
    desc: PipelineDesc,
    create: impl FnOnce(&dyn D3D12Driver) -> Result<ComPtr, HResult>,
) -> Result<ComPtr, HResult> {
    let api: &dyn DeviceApi = device;
    if let Some(replacement) = device
        .addons()
        .replacement(|addon| addon.on_create_pipeline(api, &desc))
    {
        let object = ComPtr(replacement.raw());
        device.driver().add_ref(object);
        return Ok(object);
    }

    let object = create(device.driver()).inspect_err(|hr| device.log_failure(call, *hr))?;
    device.register_native_pipeline(object, desc.stages());
    let pipeline = Pipeline(object.raw());
    device
        .addons()
        .notify(|addon| addon.on_init_pipeline(api, &desc, pipeline));
    Ok(object)
}

pub fn create_graphics_pipeline_state(
    service: &LayerService,
    device: ComPtr,
    native: &GraphicsStateDesc,
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let desc = PipelineDesc::Graphics(Box::new(convert_native_graphics_desc(native)));
    create_pipeline_state(
        &wrapper,
        "ID3D12Device::CreateGraphicsPipelineState",
        desc,
        |driver| driver.create_graphics_pipeline_state(native),
    )
}

pub fn create_compute_pipeline_state(
    service: &LayerService,
    device: ComPtr,
    native: &ComputeStateDesc,
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let desc = PipelineDesc::Compute(convert_native_compute_desc(native));
    create_pipeline_state(
        &wrapper,
        "ID3D12Device::CreateComputePipelineState",
        desc,
        |driver| driver.create_compute_pipeline_state(native),
    )
}

// ============================================================================
// Bindings
// ============================================================================

/// `OMSetRenderTargets`. A single handle range is expanded into the
/// consecutive descriptors it stands for.
pub fn om_set_render_targets(
    service: &LayerService,
    list: ComPtr,
    count: u32,
    rtvs: &[u64],
    single_handle_range: bool,
    dsv: Option<u64>,
) {
    let Some(state) = list_of(service, list) else {
        return;
    };
    let device = state.device();
    let count = (count as usize).min(D3D12_SIMULTANEOUS_RENDER_TARGET_COUNT);
    device
        .driver()
        .om_set_render_targets(list, count as u32, rtvs, single_handle_range, dsv);

    let resolved: Vec<u64> = if single_handle_range {
        let increment = u64::from(device.driver().descriptor_increment(DescriptorHeapKind::Rtv));
        let first = rtvs.first().copied().unwrap_or(0);
        (0..count as u64).map(|index| first + index * increment).collect()
    } else {
        rtvs.iter().take(count).copied().collect()
    };
    let attachments = state.bind_render_targets(&resolved, dsv);
    let api: &dyn DeviceApi = device.as_ref();
    let cmd = state.command_list();
    device
        .addons()
        .notify(|addon| addon.on_bind_render_targets_and_depth_stencil(api, cmd, &attachments));
}

/// `ID3D12GraphicsCommandList4::BeginRenderPass`.
pub fn begin_render_pass(service: &LayerService, list: ComPtr, rtvs: &[u64], dsv: Option<u64>) {
    let Some(state) = list_of(service, list) else {
        return;
    };
    let device = state.device();
    let rtvs = &rtvs[..rtvs.len().min(D3D12_SIMULTANEOUS_RENDER_TARGET_COUNT)];
    device.driver().begin_render_pass(list, rtvs, dsv);
    let attachments = state.bind_render_targets(rtvs, dsv);
    let api: &dyn DeviceApi = device.as_ref();
    let cmd = state.command_list();
    device
        .addons()
        .notify(|addon| addon.on_bind_render_targets_and_depth_stencil(api, cmd, &attachments));
}

/// `ID3D12GraphicsCommandList4::EndRenderPass`.
pub fn end_render_pass(service: &LayerService, list: ComPtr) {
    let Some(state) = list_of(service, list) else {
        return;
    };
    state.end_pass();
    state.device().driver().end_render_pass(list);
}

fn notify_bind_pipeline(state: &D3D12CommandList, pipeline: ComPtr) {
    let device = state.device();
    let stages = device
        .registry()
        .lock()
        .pipelines
        .get(pipeline.raw())
        .map_or(ShaderStage::all(), |record| record.stages);
    let api: &dyn DeviceApi = device.as_ref();
    let cmd = state.command_list();
    device
        .addons()
        .notify(|addon| addon.on_bind_pipeline(api, cmd, stages, Pipeline(pipeline.raw())));
}

/// `SetPipelineState`.
pub fn set_pipeline_state(service: &LayerService, list: ComPtr, pipeline: ComPtr) {
    let Some(state) = list_of(service, list) else {
        return;
    };
    state.device().driver().set_pipeline_state(list, pipeline);
    notify_bind_pipeline(&state, pipeline);
}

// ============================================================================
// Commands
// ============================================================================

pub fn draw_instanced(
    service: &LayerService,
    list: ComPtr,
    vertex_count: u32,
    instance_count: u32,
    first_vertex: u32,
    first_instance: u32,
) {
    let Some(state) = list_of(service, list) else {
        return;
    };
    let device = state.device();
    let api: &dyn DeviceApi = device.as_ref();
    let cmd = state.command_list();
    if device.addons().handled(|addon| {
        addon.on_draw(api, cmd, vertex_count, instance_count, first_vertex, first_instance)
    }) {
        return;
    }
    device
        .driver()
        .draw_instanced(list, vertex_count, instance_count, first_vertex, first_instance);
}

pub fn draw_indexed_instanced(
    service: &LayerService,
    list: ComPtr,
    index_count: u32,
    instance_count: u32,
    first_index: u32,
    base_vertex: i32,
    first_instance: u32,
) {
    let Some(state) = list_of(service, list) else {
        return;
    };
    let device = state.device();
    let api: &dyn DeviceApi = device.as_ref();
    let cmd = state.command_list();
    if device.addons().handled(|addon| {
        addon.on_draw_indexed(
            api,
            cmd,
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        )
    }) {
        return;
    }
    device.driver().draw_indexed_instanced(
        list,
        index_count,
        instance_count,
        first_index,
        base_vertex,
        first_instance,
    );
}

pub fn dispatch(service: &LayerService, list: ComPtr, x: u32, y: u32, z: u32) {
    let Some(state) = list_of(service, list) else {
        return;
    };
    let device = state.device();
    let api: &dyn DeviceApi = device.as_ref();
    let cmd = state.command_list();
    if device
        .addons()
        .handled(|addon| addon.on_dispatch(api, cmd, x, y, z))
    {
        return;
    }
    device.driver().dispatch(list, x, y, z);
}

pub fn clear_render_target_view(service: &LayerService, list: ComPtr, rtv: u64, color: [f32; 4], rects: &[Rect]) {
    let Some(state) = list_of(service, list) else {
        return;
    };
    let device = state.device();
    let api: &dyn DeviceApi = device.as_ref();
    let cmd = state.command_list();
    if device
        .addons()
        .handled(|addon| addon.on_clear_render_target_view(api, cmd, ResourceView(rtv), color, rects))
    {
        return;
    }
    device.driver().clear_render_target_view(list, rtv, color, rects);
}

pub fn clear_depth_stencil_view(
    service: &LayerService,
    list: ComPtr,
    dsv: u64,
    flags: u32,
    depth: f32,
    stencil: u8,
    rects: &[Rect],
) {
    let Some(state) = list_of(service, list) else {
        return;
    };
    let device = state.device();
    let api: &dyn DeviceApi = device.as_ref();
    let cmd = state.command_list();
    let depth_value = (flags & D3D12_CLEAR_FLAG_DEPTH != 0).then_some(depth);
    let stencil_value = (flags & D3D12_CLEAR_FLAG_STENCIL != 0).then_some(stencil);
    if device.addons().handled(|addon| {
        addon.on_clear_depth_stencil_view(api, cmd, ResourceView(dsv), depth_value, stencil_value, rects)
    }) {
        return;
    }
    device
        .driver()
        .clear_depth_stencil_view(list, dsv, flags, depth, stencil, rects);
}

pub fn copy_resource(service: &LayerService, list: ComPtr, dest: ComPtr, source: ComPtr) {
    let Some(state) = list_of(service, list) else {
        return;
    };
    let device = state.device();
    let api: &dyn DeviceApi = device.as_ref();
    let cmd = state.command_list();
    if device.addons().handled(|addon| {
        addon.on_copy_resource(api, cmd, Resource(source.raw()), Resource(dest.raw()))
    }) {
        return;
    }
    device.driver().copy_resource(list, dest, source);
}

pub fn copy_buffer_region(
    service: &LayerService,
    list: ComPtr,
    dest: ComPtr,
    dest_offset: u64,
    source: ComPtr,
    source_offset: u64,
    size: u64,
) {
    let Some(state) = list_of(service, list) else {
        return;
    };
    let device = state.device();
    let api: &dyn DeviceApi = device.as_ref();
    let cmd = state.command_list();
    if device.addons().handled(|addon| {
        addon.on_copy_buffer_region(
            api,
            cmd,
            Resource(source.raw()),
            source_offset,
            Resource(dest.raw()),
            dest_offset,
            size,
        )
    }) {
        return;
    }
    device
        .driver()
        .copy_buffer_region(list, dest, dest_offset, source, source_offset, size);
}

/// `CopyTextureRegion`. Only copies between two subresources are reported;
/// copies from or to buffer footprints go straight to the driver.
pub fn copy_texture_region(
    service: &LayerService,
    list: ComPtr,
    dest: &CopyLocation,
    dest_offset: [u32; 3],
    source: &CopyLocation,
    source_box: Option<&SubresourceBox>,
) {
    let Some(state) = list_of(service, list) else {
        return;
    };
    let device = state.device();
    if let (
        CopyLocation::Subresource {
            resource: dest_resource,
            index: dest_index,
        },
        CopyLocation::Subresource {
            resource: source_resource,
            index: source_index,
        },
    ) = (dest, source)
    {
        let src = TextureRegion {
            resource: Resource(source_resource.raw()),
            subresource: *source_index,
            region: source_box.copied(),
        };
        let dst = TextureRegion {
            resource: Resource(dest_resource.raw()),
            subresource: *dest_index,
            region: source_box.map(|region| SubresourceBox {
                left: dest_offset[0],
                top: dest_offset[1],
                front: dest_offset[2],
                right: dest_offset[0] + (region.right - region.left),
                bottom: dest_offset[1] + (region.bottom - region.top),
                back: dest_offset[2] + (region.back - region.front),
            }),
        };
        let api: &dyn DeviceApi = device.as_ref();
        let cmd = state.command_list();
        if device
            .addons()
            .handled(|addon| addon.on_copy_texture_region(api, cmd, &src, &dst))
        {
            return;
        }
    }
    device
        .driver()
        .copy_texture_region(list, dest, dest_offset, source, source_box);
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::com::{ComDriver, E_OUTOFMEMORY};
    use crate::backend::d3d12::dummy::{Descriptor, DummyD3D12};
    use crate::backend::d3d_state::convert_sampler_desc;
    use crate::backend::d3d12::driver::D3D12_COMMAND_LIST_TYPE_COPY;
    use lumen_core::{
        Addon, CommandList, CommandQueue, Format, LayerConfig, RenderPassAttachments,
        ResourceUsage,
    };
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        skip_draws: bool,
        replace_views: bool,
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

        fn clear(&self) {
            self.events.lock().clear();
        }
    }

    impl Addon for Recorder {
        fn on_init_device(&self, _: &dyn DeviceApi) {
            self.push("init_device");
        }
        fn on_destroy_device(&self, _: &dyn DeviceApi) {
            self.push("destroy_device");
        }
        fn on_init_command_queue(&self, _: &dyn DeviceApi, _: CommandQueue) {
            self.push("init_queue");
        }
        fn on_destroy_command_queue(&self, _: &dyn DeviceApi, _: CommandQueue) {
            self.push("destroy_queue");
        }
        fn on_init_command_list(&self, _: &dyn DeviceApi, _: CommandList) {
            self.push("init_command_list");
        }
        fn on_destroy_command_list(&self, _: &dyn DeviceApi, _: CommandList) {
            self.push("destroy_command_list");
        }
        fn on_init_swapchain(&self, _: &dyn DeviceApi, _: SwapChain) {
            self.push("init_swapchain");
        }
        fn on_destroy_swapchain(&self, _: &dyn DeviceApi, _: SwapChain) {
            self.push("destroy_swapchain");
        }
        fn on_init_resource(
            &self,
            _: &dyn DeviceApi,
            _: &ResourceDesc,
            _: Option<&[lumen_core::SubresourceData<'_>]>,
            initial_state: ResourceUsage,
            _: Resource,
        ) {
            self.push(format!("init_resource:{:?}", initial_state));
        }
        fn on_destroy_resource(&self, _: &dyn DeviceApi, _: Resource) {
            self.push("destroy_resource");
        }
        fn on_create_resource_view(
            &self,
            device: &dyn DeviceApi,
            resource: Resource,
            usage_type: ResourceUsage,
            desc: &ResourceViewDesc,
        ) -> Option<ResourceView> {
            if self.replace_views {
                return device.create_resource_view(resource, usage_type, desc).ok();
            }
            None
        }
        fn on_init_resource_view(
            &self,
            _: &dyn DeviceApi,
            _: Resource,
            _: ResourceUsage,
            desc: &ResourceViewDesc,
            view: ResourceView,
        ) {
            self.push(format!("init_view:{:#x}:{:?}", view.raw(), desc.format));
        }
        fn on_init_sampler(&self, _: &dyn DeviceApi, _: &lumen_core::sampler::SamplerDesc, _: Sampler) {
            self.push("init_sampler");
        }
        fn on_init_pipeline(&self, _: &dyn DeviceApi, desc: &PipelineDesc, _: Pipeline) {
            self.push(format!("init_pipeline:{:?}", desc.stages()));
        }
        fn on_begin_render_pass(&self, _: &dyn DeviceApi, _: CommandList, attachments: &RenderPassAttachments) {
            self.push(format!("begin_render_pass:{}", attachments.color_count()));
        }
        fn on_finish_render_pass(&self, _: &dyn DeviceApi, _: CommandList) {
            self.push("finish_render_pass");
        }
        fn on_bind_pipeline(&self, _: &dyn DeviceApi, _: CommandList, stages: ShaderStage, _: Pipeline) {
            self.push(format!("bind_pipeline:{:?}", stages));
        }
        fn on_draw(&self, _: &dyn DeviceApi, _: CommandList, vertices: u32, _: u32, _: u32, _: u32) -> bool {
            self.push(format!("draw:{vertices}"));
            self.skip_draws
        }
        fn on_clear_depth_stencil_view(
            &self,
            _: &dyn DeviceApi,
            _: CommandList,
            _: ResourceView,
            depth: Option<f32>,
            stencil: Option<u8>,
            _: &[Rect],
        ) -> bool {
            self.push(format!("clear_dsv:{:?}:{:?}", depth, stencil));
            false
        }
        fn on_copy_texture_region(
            &self,
            _: &dyn DeviceApi,
            _: CommandList,
            source: &TextureRegion,
            dest: &TextureRegion,
        ) -> bool {
            self.push(format!(
                "copy_texture:{}:{}",
                source.subresource, dest.subresource
            ));
            false
        }
        fn on_execute_command_list(&self, _: &dyn DeviceApi, _: CommandQueue, _: CommandList) {
            self.push("execute");
        }
        fn on_present(&self, _: &dyn DeviceApi, _: CommandQueue, _: SwapChain) {
            self.push("present");
        }
    }

    struct Setup {
        service: LayerService,
        dummy: Arc<DummyD3D12>,
        recorder: Arc<Recorder>,
        device: ComPtr,
        queue: ComPtr,
        list: ComPtr,
    }

    fn setup(recorder: Recorder) -> Setup {
        let _ = env_logger::builder().is_test(true).try_init();
        let service = LayerService::new(LayerConfig::default().with_immediate_command_frames(2));
        let recorder = Arc::new(recorder);
        service.addons().register(recorder.clone());
        let dummy = Arc::new(DummyD3D12::new(640, 480));
        let device = dummy.device();
        create_device(&service, dummy.clone()).unwrap();
        let queue = create_command_queue(&service, device, D3D12_COMMAND_LIST_TYPE_DIRECT).unwrap();
        let allocator = dummy.create_command_allocator(D3D12_COMMAND_LIST_TYPE_DIRECT).unwrap();
        let list = create_command_list(
            &service,
            device,
            D3D12_COMMAND_LIST_TYPE_DIRECT,
            allocator,
            ComPtr::NULL,
        )
        .unwrap();
        assert_eq!(init_swapchain(&service, queue, dummy.swap_chain()), S_OK);
        Setup {
            service,
            dummy,
            recorder,
            device,
            queue,
            list,
        }
    }

    fn render_target_desc(width: u64) -> NativeResourceDesc {
        NativeResourceDesc {
            width,
            height: width as u32,
            format: Format::R8G8B8A8Unorm.raw(),
            flags: D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET,
            ..Default::default()
        }
    }

    /// An application RTV heap with `count` render target views.
    fn render_target_views(s: &Setup, count: u32) -> (ComPtr, u64) {
        let (heap, base) = s
            .dummy
            .create_descriptor_heap(DescriptorHeapKind::Rtv, count)
            .unwrap();
        for index in 0..u64::from(count) {
            let texture = create_committed_resource(
                &s.service,
                s.device,
                &HeapProperties::default(),
                &render_target_desc(64),
                D3D12_RESOURCE_STATE_COMMON,
            )
            .unwrap();
            let descriptor = base + index * u64::from(s.dummy.descriptor_increment(DescriptorHeapKind::Rtv));
            create_view(&s.service, s.device, ViewKind::RenderTarget, texture, None, descriptor).unwrap();
        }
        (heap, base)
    }

    #[test]
    fn test_unknown_device_is_rejected() {
        let s = setup(Recorder::default());
        let result = create_committed_resource(
            &s.service,
            ComPtr(0xDEAD),
            &HeapProperties::default(),
            &render_target_desc(4),
            D3D12_RESOURCE_STATE_COMMON,
        );
        assert_eq!(result, Err(E_INVALIDARG));
        assert_eq!(close_command_list(&s.service, ComPtr(0xDEAD)), E_INVALIDARG);
    }

    #[test]
    fn test_init_events() {
        let s = setup(Recorder::default());
        assert_eq!(
            s.recorder.events(),
            vec!["init_device", "init_queue", "init_command_list", "init_swapchain"]
        );
        let wrapper = s.service.d3d12.devices.get(s.device.raw()).unwrap();
        assert_eq!(wrapper.upload_queue(), Some(s.queue));
        assert_eq!(wrapper.back_buffers(s.dummy.swap_chain()).len(), 2);
    }

    #[test]
    fn test_only_direct_queues_carry_uploads() {
        let s = setup(Recorder::default());
        let wrapper = s.service.d3d12.devices.get(s.device.raw()).unwrap();
        create_command_queue(&s.service, s.device, D3D12_COMMAND_LIST_TYPE_COPY).unwrap();
        assert_eq!(wrapper.upload_queue(), Some(s.queue));
        destroy_command_queue(&s.service, s.queue);
        assert_eq!(wrapper.upload_queue(), None);
        assert_eq!(s.recorder.count("destroy_queue"), 1);
    }

    #[test]
    fn test_resource_reports_native_initial_state() {
        let s = setup(Recorder::default());
        s.recorder.clear();
        let heap = HeapProperties {
            heap_type: D3D12_HEAP_TYPE_UPLOAD,
            ..Default::default()
        };
        create_committed_resource(
            &s.service,
            s.device,
            &heap,
            &NativeResourceDesc::buffer(256),
            D3D12_RESOURCE_STATE_GENERIC_READ,
        )
        .unwrap();
        assert_eq!(s.recorder.events(), vec![format!("init_resource:{:?}", ResourceUsage::CPU_ACCESS)]);
    }

    #[test]
    fn test_native_failure_is_returned_unchanged() {
        let s = setup(Recorder::default());
        let wrapper = s.service.d3d12.devices.get(s.device.raw()).unwrap();
        let before = wrapper.registry().lock().len();
        s.recorder.clear();
        s.dummy.objects().fail_after(0);
        let result = create_committed_resource(
            &s.service,
            s.device,
            &HeapProperties::default(),
            &render_target_desc(64),
            D3D12_RESOURCE_STATE_COMMON,
        );
        assert_eq!(result, Err(E_OUTOFMEMORY));
        assert_eq!(wrapper.registry().lock().len(), before);
        assert!(s.recorder.events().is_empty());
    }

    #[test]
    fn test_application_views_are_keyed_by_descriptor() {
        let s = setup(Recorder::default());
        s.recorder.clear();
        let (heap, base) = render_target_views(&s, 1);
        assert_eq!(
            s.recorder.events()[1],
            format!("init_view:{:#x}:R8G8B8A8Unorm", base)
        );
        let wrapper = s.service.d3d12.devices.get(s.device.raw()).unwrap();
        assert!(wrapper.is_resource_view_handle_valid(ResourceView(base)));
        s.dummy.release(heap);
    }

    #[test]
    fn test_replacement_view_is_copied_into_descriptor() {
        let recorder = Recorder {
            replace_views: true,
            ..Default::default()
        };
        let s = setup(recorder);
        let (heap, base) = render_target_views(&s, 1);
        assert_eq!(s.recorder.count("init_view"), 0);
        assert!(s.dummy.calls_on(ComPtr(base)).contains(&"CopyDescriptorsSimple"));
        assert!(matches!(
            s.dummy.descriptor(base),
            Some(Descriptor::View {
                kind: ViewKind::RenderTarget,
                ..
            })
        ));
        let wrapper = s.service.d3d12.devices.get(s.device.raw()).unwrap();
        let record = wrapper.view(base).unwrap();
        assert!(!record.owned);
        s.dummy.release(heap);
    }

    #[test]
    fn test_copied_descriptors_carry_their_records() {
        let s = setup(Recorder::default());
        let (source_heap, source) = render_target_views(&s, 2);
        let (dest_heap, dest) = s.dummy.create_descriptor_heap(DescriptorHeapKind::Rtv, 2).unwrap();
        copy_descriptors_simple(&s.service, s.device, 2, dest, source, DescriptorHeapKind::Rtv).unwrap();

        let wrapper = s.service.d3d12.devices.get(s.device.raw()).unwrap();
        let increment = u64::from(s.dummy.descriptor_increment(DescriptorHeapKind::Rtv));
        for index in 0..2 {
            assert_eq!(
                wrapper.view(dest + index * increment).map(|record| record.resource),
                wrapper.view(source + index * increment).map(|record| record.resource)
            );
        }
        s.dummy.release(source_heap);
        s.dummy.release(dest_heap);
    }

    #[test]
    fn test_sampler_descriptor_reported() {
        let s = setup(Recorder::default());
        let (heap, base) = s
            .dummy
            .create_descriptor_heap(DescriptorHeapKind::Sampler, 1)
            .unwrap();
        let native = convert_sampler_desc(&lumen_core::SamplerDesc::default());
        create_sampler(&s.service, s.device, &native, base).unwrap();
        assert_eq!(s.recorder.count("init_sampler"), 1);
        let wrapper = s.service.d3d12.devices.get(s.device.raw()).unwrap();
        assert!(wrapper.registry().lock().samplers.contains(base));
        s.dummy.release(heap);
    }

    #[test]
    fn test_pipeline_state_bound_with_its_stages() {
        let s = setup(Recorder::default());
        let native = ComputeStateDesc {
            root_signature: ComPtr::NULL,
            cs: vec![1, 2, 3, 4],
        };
        let pso = create_compute_pipeline_state(&s.service, s.device, &native).unwrap();
        set_pipeline_state(&s.service, s.list, pso);
        assert_eq!(
            s.recorder.events()[4..],
            [
                format!("init_pipeline:{:?}", ShaderStage::COMPUTE),
                format!("bind_pipeline:{:?}", ShaderStage::COMPUTE)
            ]
        );

        object_destroyed(&s.service, s.device, pso);
        let wrapper = s.service.d3d12.devices.get(s.device.raw()).unwrap();
        assert!(!wrapper.registry().lock().pipelines.contains(pso.raw()));
    }

    #[test]
    fn test_single_handle_range_resolves_consecutive_views() {
        let s = setup(Recorder::default());
        let (heap, base) = render_target_views(&s, 3);
        s.recorder.clear();
        om_set_render_targets(&s.service, s.list, 3, &[base], true, None);
        assert_eq!(s.recorder.events(), vec!["begin_render_pass:3"]);

        let state = s.service.d3d12.command_lists.get(s.list.raw()).unwrap();
        let pass = state.current_pass().unwrap();
        let increment = u64::from(s.dummy.descriptor_increment(DescriptorHeapKind::Rtv));
        assert_eq!(pass.colors[2], ResourceView(base + 2 * increment));
        assert_eq!(s.dummy.bound_render_targets().0.len(), 3);
        s.dummy.release(heap);
    }

    #[test]
    fn test_close_finishes_the_open_pass() {
        let s = setup(Recorder::default());
        let (heap, base) = render_target_views(&s, 1);
        om_set_render_targets(&s.service, s.list, 1, &[base], false, None);
        s.recorder.clear();

        assert_eq!(close_command_list(&s.service, s.list), S_OK);
        execute_command_lists(&s.service, s.queue, &[s.list]);
        assert_eq!(s.recorder.events(), vec!["finish_render_pass", "execute"]);
        assert_eq!(s.dummy.executed(s.queue), vec![s.list]);

        // A reset list starts without a pass.
        let allocator = s.dummy.create_command_allocator(D3D12_COMMAND_LIST_TYPE_DIRECT).unwrap();
        assert_eq!(reset_command_list(&s.service, s.list, allocator, ComPtr::NULL), S_OK);
        let state = s.service.d3d12.command_lists.get(s.list.raw()).unwrap();
        assert!(state.current_pass().is_none());
        s.dummy.release(heap);
    }

    #[test]
    fn test_native_render_pass_brackets_events() {
        let s = setup(Recorder::default());
        let (heap, base) = render_target_views(&s, 1);
        s.recorder.clear();
        begin_render_pass(&s.service, s.list, &[base], None);
        end_render_pass(&s.service, s.list);
        assert_eq!(s.recorder.events(), vec!["begin_render_pass:1", "finish_render_pass"]);
        assert!(s.dummy.calls_on(s.list).contains(&"EndRenderPass"));

        // Nothing is left to finish at close.
        s.recorder.clear();
        close_command_list(&s.service, s.list);
        assert!(s.recorder.events().is_empty());
        s.dummy.release(heap);
    }

    #[test]
    fn test_handled_draw_skips_native_call() {
        let recorder = Recorder {
            skip_draws: true,
            ..Default::default()
        };
        let s = setup(recorder);
        draw_instanced(&s.service, s.list, 3, 1, 0, 0);
        assert_eq!(s.recorder.count("draw:3"), 1);
        assert!(!s.dummy.calls_on(s.list).contains(&"DrawInstanced"));
    }

    #[test]
    fn test_depth_stencil_clear_reports_selected_values() {
        let s = setup(Recorder::default());
        s.recorder.clear();
        clear_depth_stencil_view(&s.service, s.list, 0x1000, D3D12_CLEAR_FLAG_STENCIL, 1.0, 3, &[]);
        assert_eq!(s.recorder.events(), vec!["clear_dsv:None:Some(3)"]);
        assert!(s.dummy.calls_on(s.list).contains(&"ClearDepthStencilView"));
    }

    #[test]
    fn test_texture_copy_between_subresources_reported() {
        let s = setup(Recorder::default());
        let buffers = s.dummy.back_buffers();
        s.recorder.clear();
        let dest = CopyLocation::Subresource {
            resource: buffers[0],
            index: 0,
        };
        let source = CopyLocation::Subresource {
            resource: buffers[1],
            index: 0,
        };
        copy_texture_region(&s.service, s.list, &dest, [0; 3], &source, None);
        assert_eq!(s.recorder.events(), vec!["copy_texture:0:0"]);
    }

    #[test]
    fn test_present_reports_the_swapchain_queue() {
        let s = setup(Recorder::default());
        s.recorder.clear();
        assert_eq!(present(&s.service, s.dummy.swap_chain(), 1, 0), S_OK);
        assert_eq!(s.recorder.events(), vec!["present"]);
        assert!(s.dummy.calls().contains(&"Present"));
        assert_eq!(present(&s.service, ComPtr(0xDEAD), 1, 0), E_INVALIDARG);
    }

    #[test]
    fn test_resize_recreates_swapchain() {
        let s = setup(Recorder::default());
        s.recorder.clear();
        let hr = resize_buffers(&s.service, s.dummy.swap_chain(), 2, 800, 600, 0);
        assert_eq!(hr, S_OK);
        assert_eq!(s.recorder.events(), vec!["destroy_swapchain", "init_swapchain"]);

        let wrapper = s.service.d3d12.devices.get(s.device.raw()).unwrap();
        let buffers = wrapper.back_buffers(s.dummy.swap_chain());
        let desc = wrapper.get_resource_desc(buffers[0]).unwrap();
        assert_eq!(desc.as_texture().unwrap().width, 800);
        assert_eq!(wrapper.swapchain_queue(s.dummy.swap_chain()), Some(s.queue));
    }

    #[test]
    fn test_final_release_drops_every_wrapper() {
        let s = setup(Recorder::default());
        destroy_command_list(&s.service, s.list);
        destroy_command_queue(&s.service, s.queue);
        s.recorder.clear();

        assert_eq!(release_device(&s.service, s.device), 0);
        assert!(s.service.d3d12.devices.get(s.device.raw()).is_none());
        assert!(s.service.d3d12.swapchains.is_empty());
        assert!(s.service.d3d12.queues.is_empty());
        assert_eq!(s.recorder.events(), vec!["destroy_swapchain", "destroy_device"]);
    }
}
