//! Intercepted `ID3D11Device`, `ID3D11DeviceContext`, `ID3D10Device` and
//! `IDXGISwapChain` methods.
//!
//! Device hooks take the device pointer; context hooks take the immediate
//! context pointer, which on Direct3D 10 is the device, or a deferred context.
//! Each hook validates the object, lets add-ons replace or skip the call,
//! calls the driver, then updates the registry and fires the events. Native
//! failures are returned unchanged. Calls on contexts the layer does not
//! track skip all of that and go straight to the driver.

use std::sync::Arc;

use lumen_core::events::{Rect, TextureRegion, Viewport};
use lumen_core::pipeline::{
    ComputePipelineDesc, DynamicState, GraphicsPipelineDesc, PipelineDesc, ShaderDesc, ShaderStage,
};
use lumen_core::resource::SubresourceBox;
use lumen_core::{
    CommandList, DeviceApi, Pipeline, RenderPassAttachments, Resource, ResourceDesc, ResourceKind,
    ResourceUsage, ResourceView, ResourceViewDesc, Sampler, SubresourceData, SwapChain,
};

use super::context::D3D11DeferredContext;
use super::conversion::*;
use super::device::D3D11Device;
use super::driver::{D3D11Driver, InitialData};
use crate::backend::com::{failed, ComPtr, HResult, Unknown, E_INVALIDARG, S_OK};
use crate::backend::d3d_state::{
    convert_native_blend_desc, convert_native_depth_stencil_desc, convert_native_input_layout,
    convert_native_rasterizer_desc, convert_native_topology, BlendDesc, DepthStencilDesc,
    InputElementDesc, RasterizerDesc, SamplerStateDesc,
};
use crate::backend::dxgi::{convert_dxgi_format, DxgiFormat};
use crate::service::LayerService;

fn device_of(service: &LayerService, device: ComPtr) -> Result<Arc<D3D11Device>, HResult> {
    service
        .d3d11
        .devices
        .require(device.raw())
        .map_err(|_| E_INVALIDARG)
}

/// Context a hook was called on: the immediate context of a device or one
/// of its deferred contexts.
struct ContextTarget {
    device: Arc<D3D11Device>,
    deferred: Option<Arc<D3D11DeferredContext>>,
}

impl ContextTarget {
    fn command_list(&self) -> CommandList {
        match &self.deferred {
            Some(deferred) => deferred.command_list(),
            None => self.device.command_list(),
        }
    }

    fn bind_render_targets(&self, rtvs: &[ComPtr], dsv: ComPtr) -> RenderPassAttachments {
        match &self.deferred {
            Some(deferred) => deferred.bind_render_targets(rtvs, dsv),
            None => self.device.bind_render_targets(rtvs, dsv),
        }
    }

    fn set_topology(&self, topology: u32) -> bool {
        match &self.deferred {
            Some(deferred) => deferred.set_topology(topology),
            None => self.device.set_topology(topology),
        }
    }

    fn end_pass(&self) {
        match &self.deferred {
            Some(deferred) => deferred.end_pass(),
            None => self.device.end_pass(),
        }
    }

    fn resume_pass(&self) {
        match &self.deferred {
            Some(deferred) => deferred.resume_pass(),
            None => self.device.resume_pass(),
        }
    }

    fn reset_pass(&self) {
        match &self.deferred {
            Some(deferred) => deferred.reset_pass(),
            None => self.device.reset_pass(),
        }
    }
}

fn context_of(service: &LayerService, context: ComPtr) -> Option<ContextTarget> {
    if let Some(device) = service.d3d11.contexts.get(context.raw()) {
        return Some(ContextTarget {
            device,
            deferred: None,
        });
    }
    let deferred = service.d3d11.deferred_contexts.get(context.raw())?;
    Some(ContextTarget {
        device: Arc::clone(deferred.device()),
        deferred: Some(deferred),
    })
}

/// Call the driver directly for an object the layer does not track.
/// Returns `None` when no device was ever wrapped.
fn forward_untracked<R>(
    service: &LayerService,
    object: ComPtr,
    call: impl FnOnce(&dyn D3D11Driver) -> R,
) -> Option<R> {
    let Some(driver) = service.d3d11.entry_points() else {
        log::error!("call on untracked object {:#x} before any device was created", object.raw());
        return None;
    };
    log::trace!("forwarding call on untracked object {:#x}", object.raw());
    Some(call(driver.as_ref()))
}

/// Resources created by the application start out usable by every stage.
const INITIAL_STATE: ResourceUsage = ResourceUsage::GENERAL;

// ============================================================================
// Device
// ============================================================================

/// Wrap a device the driver just created and fire its init events.
pub fn create_device(
    service: &LayerService,
    driver: Arc<dyn D3D11Driver>,
) -> Result<Arc<D3D11Device>, HResult> {
    let native = driver.device();
    let context = driver.immediate_context();
    if native.is_null() || context.is_null() {
        log::error!("Device creation returned a null device or immediate context");
        return Err(E_INVALIDARG);
    }
    service.d3d11.install_entry_points(&driver);
    let device = Arc::new(D3D11Device::new(
        driver,
        Arc::clone(service.addons()),
        service.config().clone(),
    ));
    service.d3d11.devices.insert(native.raw(), Arc::clone(&device));
    // On Direct3D 10 this maps the device pointer again, as its own context.
    service.d3d11.contexts.insert(context.raw(), Arc::clone(&device));

    let api: &dyn DeviceApi = device.as_ref();
    let queue = device.command_queue();
    let cmd = device.command_list();
    device.addons().notify(|addon| addon.on_init_device(api));
    device
        .addons()
        .notify(|addon| addon.on_init_command_queue(api, queue));
    device
        .addons()
        .notify(|addon| addon.on_init_command_list(api, cmd));
    Ok(device)
}

/// `IUnknown::Release` of the device proxy. The wrapper and everything
/// mapped to it leave the directory on the final release.
pub fn release_device(service: &LayerService, device: ComPtr) -> u32 {
    let Some(wrapper) = service.d3d11.devices.get(device.raw()) else {
        log::error!("Release on unknown ID3D11Device {:#x}", device.raw());
        return 0;
    };
    let remaining = wrapper.release();
    if remaining == 0 {
        service.d3d11.devices.remove(device.raw());
        service.d3d11.contexts.remove(wrapper.immediate_context().raw());
        service
            .d3d11
            .deferred_contexts
            .retain(|_, context| !Arc::ptr_eq(context.device(), &wrapper));
        service
            .d3d11
            .command_lists
            .retain(|_, recorder| !Arc::ptr_eq(recorder.device(), &wrapper));
        service
            .d3d11
            .swapchains
            .retain(|_, owner| !Arc::ptr_eq(owner, &wrapper));
    }
    remaining
}

/// `GetImmediateContext`. The returned pointer carries one reference.
pub fn get_immediate_context(service: &LayerService, device: ComPtr) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    wrapper.context_add_ref();
    Ok(wrapper.immediate_context())
}

/// `IUnknown::Release` of a context proxy. The final release of a deferred
/// context reports its command list as destroyed.
pub fn release_context(service: &LayerService, context: ComPtr) -> u32 {
    if let Some(wrapper) = service.d3d11.contexts.get(context.raw()) {
        return wrapper.context_release();
    }
    if let Some(deferred) = service.d3d11.deferred_contexts.get(context.raw()) {
        let remaining = deferred.release();
        if remaining == 0 {
            service.d3d11.deferred_contexts.remove(context.raw());
        }
        return remaining;
    }
    forward_untracked(service, context, |driver| driver.release(context)).unwrap_or(0)
}

// ============================================================================
// Deferred contexts
// ============================================================================

/// `CreateDeferredContext`. The new context is reported as a command list.
pub fn create_deferred_context(service: &LayerService, device: ComPtr) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let context = wrapper.driver().create_deferred_context().map_err(|hr| {
        wrapper.log_failure("ID3D11Device::CreateDeferredContext", hr);
        hr
    })?;
    let deferred = Arc::new(D3D11DeferredContext::new(context, Arc::clone(&wrapper)));
    service
        .d3d11
        .deferred_contexts
        .insert(context.raw(), Arc::clone(&deferred));

    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = deferred.command_list();
    wrapper
        .addons()
        .notify(|addon| addon.on_init_command_list(api, cmd));
    Ok(context)
}

/// `FinishCommandList`. The open pass ends with the recording.
pub fn finish_command_list(
    service: &LayerService,
    context: ComPtr,
    restore_state: bool,
) -> Result<ComPtr, HResult> {
    let Some(deferred) = service.d3d11.deferred_contexts.get(context.raw()) else {
        return forward_untracked(service, context, |driver| {
            driver.finish_command_list(context, restore_state)
        })
        .unwrap_or(Err(E_INVALIDARG));
    };
    deferred.end_pass();
    let wrapper = deferred.device();
    match wrapper.driver().finish_command_list(context, restore_state) {
        Ok(list) => {
            service
                .d3d11
                .command_lists
                .insert(list.raw(), Arc::clone(&deferred));
            if restore_state {
                deferred.resume_pass();
            } else {
                deferred.reset_pass();
            }
            Ok(list)
        }
        Err(hr) => {
            wrapper.log_failure("ID3D11DeviceContext::FinishCommandList", hr);
            deferred.resume_pass();
            Err(hr)
        }
    }
}

/// `ExecuteCommandList`. On the immediate context the recording is reported
/// as executed on the device's queue, under the deferred context that
/// recorded it.
pub fn execute_command_list(
    service: &LayerService,
    context: ComPtr,
    command_list: ComPtr,
    restore_state: bool,
) {
    let Some(target) = context_of(service, context) else {
        forward_untracked(service, context, |driver| {
            driver.execute_command_list(context, command_list, restore_state)
        });
        return;
    };
    let wrapper = &target.device;
    target.end_pass();
    if target.deferred.is_none() {
        let recorded = service
            .d3d11
            .command_lists
            .get(command_list.raw())
            .map_or(CommandList(command_list.raw()), |recorder| recorder.command_list());
        let api: &dyn DeviceApi = wrapper.as_ref();
        let queue = wrapper.command_queue();
        wrapper
            .addons()
            .notify(|addon| addon.on_execute_command_list(api, queue, recorded));
    }
    wrapper
        .driver()
        .execute_command_list(context, command_list, restore_state);
    if restore_state {
        target.resume_pass();
    } else {
        target.reset_pass();
    }
}

/// `IUnknown::Release` of an `ID3D11CommandList`.
pub fn release_command_list(service: &LayerService, command_list: ComPtr) -> u32 {
    let Some(recorder) = service.d3d11.command_lists.get(command_list.raw()) else {
        return forward_untracked(service, command_list, |driver| driver.release(command_list))
            .unwrap_or(0);
    };
    let remaining = recorder.device().driver().release(command_list);
    if remaining == 0 {
        service.d3d11.command_lists.remove(command_list.raw());
    }
    remaining
}

/// Destruction callback of an application object, attached through
/// private data when the object was created.
pub fn object_destroyed(service: &LayerService, device: ComPtr, object: ComPtr) {
    let Some(wrapper) = service.d3d11.devices.get(device.raw()) else {
        return;
    };
    let api: &dyn DeviceApi = wrapper.as_ref();
    let raw = object.raw();
    if wrapper.is_resource_handle_valid(Resource(raw)) {
        wrapper
            .addons()
            .notify(|addon| addon.on_destroy_resource(api, Resource(raw)));
    } else if wrapper.is_resource_view_handle_valid(ResourceView(raw)) {
        wrapper.forget_view(object);
        for deferred in service.d3d11.deferred_contexts.values() {
            if Arc::ptr_eq(deferred.device(), &wrapper) {
                deferred.forget_view(object);
            }
        }
        wrapper
            .addons()
            .notify(|addon| addon.on_destroy_resource_view(api, ResourceView(raw)));
    } else if wrapper.registry().lock().samplers.contains(raw) {
        wrapper
            .addons()
            .notify(|addon| addon.on_destroy_sampler(api, Sampler(raw)));
    } else if wrapper.registry().lock().pipelines.contains(raw) {
        wrapper
            .addons()
            .notify(|addon| addon.on_destroy_pipeline(api, Pipeline(raw)));
    }
    wrapper.unregister_application_object(object);
}

// ============================================================================
// Swap chains
// ============================================================================

/// A swap chain was created for `device`.
pub fn init_swapchain(service: &LayerService, device: ComPtr, swapchain: ComPtr) -> HResult {
    let wrapper = match device_of(service, device) {
        Ok(wrapper) => wrapper,
        Err(hr) => return hr,
    };
    let handle = match wrapper.init_swapchain(swapchain) {
        Ok(handle) => handle,
        Err(hr) => {
            log::warn!(
                "Failed to query the back buffer of swap chain {:#x}: {:#010x}",
                swapchain.raw(),
                hr as u32
            );
            return hr;
        }
    };
    service.d3d11.swapchains.insert(swapchain.raw(), Arc::clone(&wrapper));
    let api: &dyn DeviceApi = wrapper.as_ref();
    wrapper
        .addons()
        .notify(|addon| addon.on_init_swapchain(api, handle));
    S_OK
}

/// Final release of a swap chain.
pub fn destroy_swapchain(service: &LayerService, swapchain: ComPtr) {
    let Some(wrapper) = service.d3d11.swapchains.remove(swapchain.raw()) else {
        return;
    };
    let api: &dyn DeviceApi = wrapper.as_ref();
    wrapper
        .addons()
        .notify(|addon| addon.on_destroy_swapchain(api, SwapChain(swapchain.raw())));
    wrapper.destroy_swapchain(swapchain);
}

/// `IDXGISwapChain::Present`. The open render pass is closed around the
/// present and reopened with the same attachments afterwards.
pub fn present(service: &LayerService, swapchain: ComPtr, sync_interval: u32, flags: u32) -> HResult {
    let Some(wrapper) = service.d3d11.swapchains.get(swapchain.raw()) else {
        log::error!("Present on unknown swap chain {:#x}", swapchain.raw());
        return E_INVALIDARG;
    };
    wrapper.end_pass();
    let api: &dyn DeviceApi = wrapper.as_ref();
    let queue = wrapper.command_queue();
    wrapper
        .addons()
        .notify(|addon| addon.on_present(api, queue, SwapChain(swapchain.raw())));

    let hr = wrapper.driver().present(swapchain, sync_interval, flags);
    if failed(hr) {
        wrapper.log_failure("IDXGISwapChain::Present", hr);
    }
    wrapper.resume_pass();
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
    let Some(wrapper) = service.d3d11.swapchains.get(swapchain.raw()) else {
        return E_INVALIDARG;
    };
    let api: &dyn DeviceApi = wrapper.as_ref();
    wrapper.reset_pass();
    wrapper
        .addons()
        .notify(|addon| addon.on_destroy_swapchain(api, SwapChain(swapchain.raw())));
    wrapper.destroy_swapchain(swapchain);

    let hr = wrapper
        .driver()
        .resize_buffers(swapchain, count, width, height, format);
    if failed(hr) {
        wrapper.log_failure("IDXGISwapChain::ResizeBuffers", hr);
    }

    match wrapper.init_swapchain(swapchain) {
        Ok(handle) => wrapper
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
// Resources
// ============================================================================

fn check_replacement(device: &D3D11Device, resource: Resource, requested: &ResourceDesc) {
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

fn subresource_data<'a>(data: &[InitialData<'a>]) -> Vec<SubresourceData<'a>> {
    data.iter()
        .map(|d| SubresourceData::new(d.data, d.row_pitch, d.slice_pitch))
        .collect()
}

/// Shared sequence of the resource creation hooks.
fn create_resource_with(
    device: &D3D11Device,
    call: &str,
    requested: NativeDesc,
    initial_data: &[InitialData<'_>],
    create: impl FnOnce(&dyn D3D11Driver) -> Result<ComPtr, HResult>,
) -> Result<ComPtr, HResult> {
    let api: &dyn DeviceApi = device;
    let desc = convert_native_desc(&requested);
    if let Some(replacement) = device
        .addons()
        .replacement(|addon| addon.on_create_resource(api, &desc, INITIAL_STATE))
    {
        check_replacement(device, replacement, &desc);
        // The application releases what it receives.
        let object = ComPtr(replacement.raw());
        device.driver().add_ref(object);
        return Ok(object);
    }

    let object = create(device.driver()).inspect_err(|hr| device.log_failure(call, *hr))?;
    let desc = device.register_native_resource(object, &requested);
    let resource = Resource(object.raw());
    let data = subresource_data(initial_data);
    let data = (!data.is_empty()).then_some(data.as_slice());
    device
        .addons()
        .notify(|addon| addon.on_init_resource(api, &desc, data, INITIAL_STATE, resource));
    Ok(object)
}

pub fn create_buffer(
    service: &LayerService,
    device: ComPtr,
    desc: &BufferDesc,
    data: Option<&InitialData<'_>>,
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    create_resource_with(
        &wrapper,
        "ID3D11Device::CreateBuffer",
        NativeDesc::Buffer(*desc),
        data.map_or(&[][..], std::slice::from_ref),
        |driver| driver.create_buffer(desc, data),
    )
}

/// `CreateTexture1D`, `CreateTexture2D` and `CreateTexture3D`.
pub fn create_texture(
    service: &LayerService,
    device: ComPtr,
    desc: &TextureDesc,
    data: Option<&[InitialData<'_>]>,
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let call = match desc.dimension {
        D3D11_RESOURCE_DIMENSION_TEXTURE1D => "ID3D11Device::CreateTexture1D",
        D3D11_RESOURCE_DIMENSION_TEXTURE3D => "ID3D11Device::CreateTexture3D",
        _ => "ID3D11Device::CreateTexture2D",
    };
    create_resource_with(
        &wrapper,
        call,
        NativeDesc::Texture(*desc),
        data.unwrap_or_default(),
        |driver| driver.create_texture(desc, data),
    )
}

/// `CreateShaderResourceView`, `CreateRenderTargetView`,
/// `CreateDepthStencilView` and `CreateUnorderedAccessView`.
pub fn create_view(
    service: &LayerService,
    device: ComPtr,
    kind: ViewKind,
    resource: ComPtr,
    desc: Option<&ViewDesc>,
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let api: &dyn DeviceApi = wrapper.as_ref();
    let usage = kind.usage();
    let requested = match (desc, wrapper.get_resource_desc(Resource(resource.raw()))) {
        (Some(desc), _) => convert_native_view_desc(kind, desc),
        (None, Some(resource_desc)) => ResourceViewDesc::for_resource(&resource_desc),
        (None, None) => {
            log::warn!("View of unknown resource {:#x}", resource.raw());
            return wrapper
                .driver()
                .create_view(kind, resource, None)
                .inspect_err(|hr| wrapper.log_failure("ID3D11Device::CreateView", *hr));
        }
    };
    if let Some(replacement) = wrapper.addons().replacement(|addon| {
        addon.on_create_resource_view(api, Resource(resource.raw()), usage, &requested)
    }) {
        let object = ComPtr(replacement.raw());
        wrapper.driver().add_ref(object);
        return Ok(object);
    }

    let call = match kind {
        ViewKind::ShaderResource => "ID3D11Device::CreateShaderResourceView",
        ViewKind::RenderTarget => "ID3D11Device::CreateRenderTargetView",
        ViewKind::DepthStencil => "ID3D11Device::CreateDepthStencilView",
        ViewKind::UnorderedAccess => "ID3D11Device::CreateUnorderedAccessView",
    };
    let view = wrapper
        .driver()
        .create_view(kind, resource, desc)
        .inspect_err(|hr| wrapper.log_failure(call, *hr))?;
    if let Some((resource, usage, desc)) = wrapper.register_native_view(view) {
        let handle = ResourceView(view.raw());
        wrapper
            .addons()
            .notify(|addon| addon.on_init_resource_view(api, resource, usage, &desc, handle));
    }
    Ok(view)
}

pub fn create_sampler_state(
    service: &LayerService,
    device: ComPtr,
    desc: &SamplerStateDesc,
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let sampler = wrapper
        .driver()
        .create_sampler_state(desc)
        .inspect_err(|hr| wrapper.log_failure("ID3D11Device::CreateSamplerState", *hr))?;
    // The runtime hands out the same object for equal descriptions.
    if wrapper.registry().lock().samplers.contains(sampler.raw()) {
        return Ok(sampler);
    }
    if let Some(abstract_desc) = wrapper.register_native_sampler(sampler) {
        let api: &dyn DeviceApi = wrapper.as_ref();
        wrapper
            .addons()
            .notify(|addon| addon.on_init_sampler(api, &abstract_desc, Sampler(sampler.raw())));
    }
    Ok(sampler)
}

// ============================================================================
// Shaders and state objects
// ============================================================================

/// Shared sequence of shader and state object creation. These objects are
/// reported as partial pipelines holding just the one object.
fn create_pipeline_object(
    device: &D3D11Device,
    call: &str,
    stages: ShaderStage,
    desc: PipelineDesc,
    create: impl FnOnce(&dyn D3D11Driver) -> Result<ComPtr, HResult>,
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
    // State objects are deduplicated by the runtime.
    if !device.registry().lock().pipelines.contains(object.raw()) {
        device.register_pipeline_object(object, stages);
        let pipeline = Pipeline(object.raw());
        device
            .addons()
            .notify(|addon| addon.on_init_pipeline(api, &desc, pipeline));
    }
    Ok(object)
}

/// `CreateVertexShader` and the other shader creation methods.
pub fn create_shader(
    service: &LayerService,
    device: ComPtr,
    stage: ShaderStage,
    code: &[u8],
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let shader = ShaderDesc::new(code);
    let (call, desc) = if stage == ShaderStage::COMPUTE {
        (
            "ID3D11Device::CreateComputeShader",
            PipelineDesc::Compute(ComputePipelineDesc {
                cs: shader,
                ..Default::default()
            }),
        )
    } else {
        let mut graphics = GraphicsPipelineDesc::default();
        let call = if stage == ShaderStage::VERTEX {
            graphics.vs = shader;
            "ID3D11Device::CreateVertexShader"
        } else if stage == ShaderStage::HULL {
            graphics.hs = shader;
            "ID3D11Device::CreateHullShader"
        } else if stage == ShaderStage::DOMAIN {
            graphics.ds = shader;
            "ID3D11Device::CreateDomainShader"
        } else if stage == ShaderStage::GEOMETRY {
            graphics.gs = shader;
            "ID3D11Device::CreateGeometryShader"
        } else {
            graphics.ps = shader;
            "ID3D11Device::CreatePixelShader"
        };
        (call, PipelineDesc::Graphics(Box::new(graphics)))
    };
    create_pipeline_object(&wrapper, call, stage, desc, |driver| {
        driver.create_shader(stage, code)
    })
}

pub fn create_input_layout(
    service: &LayerService,
    device: ComPtr,
    elements: &[InputElementDesc],
    vs_code: &[u8],
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let desc = PipelineDesc::Graphics(Box::new(GraphicsPipelineDesc {
        input_layout: convert_native_input_layout(elements),
        ..Default::default()
    }));
    create_pipeline_object(
        &wrapper,
        "ID3D11Device::CreateInputLayout",
        ShaderStage::VERTEX,
        desc,
        |driver| driver.create_input_layout(elements, vs_code),
    )
}

pub fn create_blend_state(service: &LayerService, device: ComPtr, native: &BlendDesc) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let desc = PipelineDesc::Graphics(Box::new(GraphicsPipelineDesc {
        blend: convert_native_blend_desc(native, [1.0; 4]),
        ..Default::default()
    }));
    create_pipeline_object(
        &wrapper,
        "ID3D11Device::CreateBlendState",
        ShaderStage::PIXEL,
        desc,
        |driver| driver.create_blend_state(native),
    )
}

pub fn create_rasterizer_state(
    service: &LayerService,
    device: ComPtr,
    native: &RasterizerDesc,
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let desc = PipelineDesc::Graphics(Box::new(GraphicsPipelineDesc {
        rasterizer: convert_native_rasterizer_desc(native),
        ..Default::default()
    }));
    create_pipeline_object(
        &wrapper,
        "ID3D11Device::CreateRasterizerState",
        ShaderStage::empty(),
        desc,
        |driver| driver.create_rasterizer_state(native),
    )
}

pub fn create_depth_stencil_state(
    service: &LayerService,
    device: ComPtr,
    native: &DepthStencilDesc,
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let desc = PipelineDesc::Graphics(Box::new(GraphicsPipelineDesc {
        depth_stencil: convert_native_depth_stencil_desc(native, 0),
        ..Default::default()
    }));
    create_pipeline_object(
        &wrapper,
        "ID3D11Device::CreateDepthStencilState",
        ShaderStage::PIXEL,
        desc,
        |driver| driver.create_depth_stencil_state(native),
    )
}

// ============================================================================
// Bindings
// ============================================================================

/// `OMSetRenderTargets`.
pub fn om_set_render_targets(service: &LayerService, context: ComPtr, rtvs: &[ComPtr], dsv: ComPtr) {
    let Some(target) = context_of(service, context) else {
        forward_untracked(service, context, |driver| {
            driver.om_set_render_targets(context, rtvs, dsv)
        });
        return;
    };
    let wrapper = &target.device;
    let count = rtvs.len().min(D3D11_SIMULTANEOUS_RENDER_TARGET_COUNT);
    if count < rtvs.len() {
        log::warn!("OMSetRenderTargets with {} render targets", rtvs.len());
    }
    let rtvs = &rtvs[..count];
    wrapper.driver().om_set_render_targets(context, rtvs, dsv);

    let attachments = target.bind_render_targets(rtvs, dsv);
    notify_bind_render_targets(wrapper, target.command_list(), &attachments);
}

fn notify_bind_render_targets(device: &D3D11Device, cmd: CommandList, attachments: &RenderPassAttachments) {
    let api: &dyn DeviceApi = device;
    device
        .addons()
        .notify(|addon| addon.on_bind_render_targets_and_depth_stencil(api, cmd, attachments));
}

pub fn rs_set_viewports(service: &LayerService, context: ComPtr, viewports: &[Viewport]) {
    let Some(target) = context_of(service, context) else {
        forward_untracked(service, context, |driver| driver.rs_set_viewports(context, viewports));
        return;
    };
    let wrapper = &target.device;
    wrapper.driver().rs_set_viewports(context, viewports);
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = target.command_list();
    wrapper
        .addons()
        .notify(|addon| addon.on_bind_viewports(api, cmd, 0, viewports));
}

pub fn rs_set_scissor_rects(service: &LayerService, context: ComPtr, rects: &[Rect]) {
    let Some(target) = context_of(service, context) else {
        forward_untracked(service, context, |driver| driver.rs_set_scissor_rects(context, rects));
        return;
    };
    let wrapper = &target.device;
    wrapper.driver().rs_set_scissor_rects(context, rects);
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = target.command_list();
    wrapper
        .addons()
        .notify(|addon| addon.on_bind_scissor_rects(api, cmd, 0, rects));
}

/// `IASetPrimitiveTopology`. Reported only when the topology changes.
pub fn ia_set_primitive_topology(service: &LayerService, context: ComPtr, topology: u32) {
    let Some(target) = context_of(service, context) else {
        forward_untracked(service, context, |driver| {
            driver.ia_set_primitive_topology(context, topology)
        });
        return;
    };
    let wrapper = &target.device;
    wrapper.driver().ia_set_primitive_topology(context, topology);
    if !target.set_topology(topology) {
        return;
    }
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = target.command_list();
    let state = [(
        DynamicState::PrimitiveTopology,
        convert_native_topology(topology).to_raw(),
    )];
    wrapper
        .addons()
        .notify(|addon| addon.on_bind_pipeline_states(api, cmd, &state));
}

pub fn ia_set_vertex_buffers(
    service: &LayerService,
    context: ComPtr,
    first: u32,
    buffers: &[ComPtr],
    strides: &[u32],
    offsets: &[u32],
) {
    let Some(target) = context_of(service, context) else {
        forward_untracked(service, context, |driver| {
            driver.ia_set_vertex_buffers(context, first, buffers, strides, offsets)
        });
        return;
    };
    let wrapper = &target.device;
    wrapper
        .driver()
        .ia_set_vertex_buffers(context, first, buffers, strides, offsets);
    let resources: Vec<Resource> = buffers.iter().map(|buffer| Resource(buffer.raw())).collect();
    let offsets: Vec<u64> = offsets.iter().map(|offset| u64::from(*offset)).collect();
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = target.command_list();
    wrapper
        .addons()
        .notify(|addon| addon.on_bind_vertex_buffers(api, cmd, first, &resources, &offsets, strides));
}

pub fn ia_set_index_buffer(
    service: &LayerService,
    context: ComPtr,
    buffer: ComPtr,
    format: DxgiFormat,
    offset: u32,
) {
    let Some(target) = context_of(service, context) else {
        forward_untracked(service, context, |driver| {
            driver.ia_set_index_buffer(context, buffer, format, offset)
        });
        return;
    };
    let wrapper = &target.device;
    wrapper
        .driver()
        .ia_set_index_buffer(context, buffer, format, offset);
    let index_size = convert_dxgi_format(format).bytes_per_block();
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = target.command_list();
    wrapper.addons().notify(|addon| {
        addon.on_bind_index_buffer(api, cmd, Resource(buffer.raw()), u64::from(offset), index_size)
    });
}

/// `VSSetShader` and the other shader binding methods.
pub fn set_shader(service: &LayerService, context: ComPtr, stage: ShaderStage, shader: ComPtr) {
    let Some(target) = context_of(service, context) else {
        forward_untracked(service, context, |driver| {
            driver.set_pipeline_objects(context, &[(stage, shader)], &[])
        });
        return;
    };
    let wrapper = &target.device;
    wrapper
        .driver()
        .set_pipeline_objects(context, &[(stage, shader)], &[]);
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = target.command_list();
    wrapper
        .addons()
        .notify(|addon| addon.on_bind_pipeline(api, cmd, stage, Pipeline(shader.raw())));
}

// ============================================================================
// Commands
// ============================================================================

pub fn draw(service: &LayerService, context: ComPtr, vertex_count: u32, first_vertex: u32) {
    draw_instanced(service, context, vertex_count, 1, first_vertex, 0);
}

pub fn draw_instanced(
    service: &LayerService,
    context: ComPtr,
    vertex_count: u32,
    instance_count: u32,
    first_vertex: u32,
    first_instance: u32,
) {
    let Some(target) = context_of(service, context) else {
        forward_untracked(service, context, |driver| {
            native_draw(driver, context, vertex_count, instance_count, first_vertex, first_instance)
        });
        return;
    };
    let wrapper = &target.device;
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = target.command_list();
    if wrapper.addons().handled(|addon| {
        addon.on_draw(api, cmd, vertex_count, instance_count, first_vertex, first_instance)
    }) {
        return;
    }
    native_draw(
        wrapper.driver(),
        context,
        vertex_count,
        instance_count,
        first_vertex,
        first_instance,
    );
}

/// `Draw` for single instances, `DrawInstanced` otherwise.
fn native_draw(
    driver: &dyn D3D11Driver,
    context: ComPtr,
    vertex_count: u32,
    instance_count: u32,
    first_vertex: u32,
    first_instance: u32,
) {
    if instance_count == 1 && first_instance == 0 {
        driver.draw(context, vertex_count, first_vertex);
    } else {
        driver.draw_instanced(context, vertex_count, instance_count, first_vertex, first_instance);
    }
}

pub fn draw_indexed(
    service: &LayerService,
    context: ComPtr,
    index_count: u32,
    first_index: u32,
    base_vertex: i32,
) {
    draw_indexed_instanced(service, context, index_count, 1, first_index, base_vertex, 0);
}

pub fn draw_indexed_instanced(
    service: &LayerService,
    context: ComPtr,
    index_count: u32,
    instance_count: u32,
    first_index: u32,
    base_vertex: i32,
    first_instance: u32,
) {
    let Some(target) = context_of(service, context) else {
        forward_untracked(service, context, |driver| {
            native_draw_indexed(
                driver,
                context,
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            )
        });
        return;
    };
    let wrapper = &target.device;
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = target.command_list();
    if wrapper.addons().handled(|addon| {
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
    native_draw_indexed(
        wrapper.driver(),
        context,
        index_count,
        instance_count,
        first_index,
        base_vertex,
        first_instance,
    );
}

fn native_draw_indexed(
    driver: &dyn D3D11Driver,
    context: ComPtr,
    index_count: u32,
    instance_count: u32,
    first_index: u32,
    base_vertex: i32,
    first_instance: u32,
) {
    if instance_count == 1 && first_instance == 0 {
        driver.draw_indexed(context, index_count, first_index, base_vertex);
    } else {
        driver.draw_indexed_instanced(
            context,
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        );
    }
}

pub fn dispatch(service: &LayerService, context: ComPtr, x: u32, y: u32, z: u32) {
    let Some(target) = context_of(service, context) else {
        forward_untracked(service, context, |driver| driver.dispatch(context, x, y, z));
        return;
    };
    let wrapper = &target.device;
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = target.command_list();
    if wrapper
        .addons()
        .handled(|addon| addon.on_dispatch(api, cmd, x, y, z))
    {
        return;
    }
    wrapper.driver().dispatch(context, x, y, z);
}

pub fn clear_render_target_view(service: &LayerService, context: ComPtr, view: ComPtr, color: [f32; 4]) {
    let Some(target) = context_of(service, context) else {
        forward_untracked(service, context, |driver| {
            driver.clear_render_target_view(context, view, color)
        });
        return;
    };
    let wrapper = &target.device;
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = target.command_list();
    if wrapper.addons().handled(|addon| {
        addon.on_clear_render_target_view(api, cmd, ResourceView(view.raw()), color, &[])
    }) {
        return;
    }
    wrapper.driver().clear_render_target_view(context, view, color);
}

pub fn clear_depth_stencil_view(
    service: &LayerService,
    context: ComPtr,
    view: ComPtr,
    flags: u32,
    depth: f32,
    stencil: u8,
) {
    let Some(target) = context_of(service, context) else {
        forward_untracked(service, context, |driver| {
            driver.clear_depth_stencil_view(context, view, flags, depth, stencil)
        });
        return;
    };
    let wrapper = &target.device;
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = target.command_list();
    let depth_value = (flags & D3D11_CLEAR_DEPTH != 0).then_some(depth);
    let stencil_value = (flags & D3D11_CLEAR_STENCIL != 0).then_some(stencil);
    if wrapper.addons().handled(|addon| {
        addon.on_clear_depth_stencil_view(
            api,
            cmd,
            ResourceView(view.raw()),
            depth_value,
            stencil_value,
            &[],
        )
    }) {
        return;
    }
    wrapper
        .driver()
        .clear_depth_stencil_view(context, view, flags, depth, stencil);
}

pub fn copy_resource(service: &LayerService, context: ComPtr, dest: ComPtr, source: ComPtr) {
    let Some(target) = context_of(service, context) else {
        forward_untracked(service, context, |driver| driver.copy_resource(context, dest, source));
        return;
    };
    let wrapper = &target.device;
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = target.command_list();
    if wrapper.addons().handled(|addon| {
        addon.on_copy_resource(api, cmd, Resource(source.raw()), Resource(dest.raw()))
    }) {
        return;
    }
    wrapper.driver().copy_resource(context, dest, source);
}

/// `CopySubresourceRegion`. Buffer copies are reported as buffer region
/// copies, texture copies as texture region copies.
#[allow(clippy::too_many_arguments)]
pub fn copy_subresource_region(
    service: &LayerService,
    context: ComPtr,
    dest: ComPtr,
    dest_subresource: u32,
    dest_offset: [u32; 3],
    source: ComPtr,
    source_subresource: u32,
    source_box: Option<&SubresourceBox>,
) {
    let Some(target) = context_of(service, context) else {
        forward_untracked(service, context, |driver| {
            driver.copy_subresource_region(
                context,
                dest,
                dest_subresource,
                dest_offset,
                source,
                source_subresource,
                source_box,
            )
        });
        return;
    };
    let wrapper = &target.device;
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = target.command_list();
    let source_resource = Resource(source.raw());
    let dest_resource = Resource(dest.raw());
    let is_buffer = matches!(
        wrapper.get_resource_desc(dest_resource).map(|desc| desc.kind),
        Some(ResourceKind::Buffer { .. })
    );
    let handled = if is_buffer {
        let (offset, size) = match source_box {
            Some(region) => (
                u64::from(region.left),
                u64::from(region.right.saturating_sub(region.left)),
            ),
            None => (
                0,
                wrapper
                    .get_resource_desc(source_resource)
                    .and_then(|desc| desc.buffer_size())
                    .unwrap_or(0),
            ),
        };
        wrapper.addons().handled(|addon| {
            addon.on_copy_buffer_region(
                api,
                cmd,
                source_resource,
                offset,
                dest_resource,
                u64::from(dest_offset[0]),
                size,
            )
        })
    } else {
        let src = TextureRegion {
            resource: source_resource,
            subresource: source_subresource,
            region: source_box.copied(),
        };
        let dst = TextureRegion {
            resource: dest_resource,
            subresource: dest_subresource,
            region: source_box.map(|region| SubresourceBox {
                left: dest_offset[0],
                top: dest_offset[1],
                front: dest_offset[2],
                right: dest_offset[0] + (region.right - region.left),
                bottom: dest_offset[1] + (region.bottom - region.top),
                back: dest_offset[2] + (region.back - region.front),
            }),
        };
        wrapper
            .addons()
            .handled(|addon| addon.on_copy_texture_region(api, cmd, &src, &dst))
    };
    if handled {
        return;
    }
    wrapper.driver().copy_subresource_region(
        context,
        dest,
        dest_subresource,
        dest_offset,
        source,
        source_subresource,
        source_box,
    );
}

pub fn resolve_subresource(
    service: &LayerService,
    context: ComPtr,
    dest: ComPtr,
    dest_subresource: u32,
    source: ComPtr,
    source_subresource: u32,
    format: DxgiFormat,
) {
    let Some(target) = context_of(service, context) else {
        forward_untracked(service, context, |driver| {
            driver.resolve_subresource(
                context,
                dest,
                dest_subresource,
                source,
                source_subresource,
                format,
            )
        });
        return;
    };
    let wrapper = &target.device;
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = target.command_list();
    let src = TextureRegion {
        resource: Resource(source.raw()),
        subresource: source_subresource,
        region: None,
    };
    let dst = TextureRegion {
        resource: Resource(dest.raw()),
        subresource: dest_subresource,
        region: None,
    };
    let abstract_format = convert_dxgi_format(format);
    if wrapper
        .addons()
        .handled(|addon| addon.on_resolve_texture_region(api, cmd, &src, &dst, abstract_format))
    {
        return;
    }
    wrapper.driver().resolve_subresource(
        context,
        dest,
        dest_subresource,
        source,
        source_subresource,
        format,
    );
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::com::{Guid, Queried, E_OUTOFMEMORY};
    use crate::backend::d3d11::driver::IID_ID3D11DEVICE;
    use crate::backend::d3d11::dummy::DummyD3D11;
    use lumen_core::{Addon, CommandList, CommandQueue, Format, LayerConfig};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        skip_clears: bool,
        skip_draws: bool,
        replace_textures: bool,
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
        fn on_create_resource(
            &self,
            device: &dyn DeviceApi,
            desc: &ResourceDesc,
            initial_state: ResourceUsage,
        ) -> Option<Resource> {
            if self.replace_textures && desc.as_texture().is_some() {
                return device.create_resource(desc, None, initial_state).ok();
            }
            None
        }
        fn on_init_resource(
            &self,
            _: &dyn DeviceApi,
            _: &ResourceDesc,
            data: Option<&[SubresourceData<'_>]>,
            _: ResourceUsage,
            resource: Resource,
        ) {
            self.push(format!(
                "init_resource:{:#x}:{}",
                resource.raw(),
                data.map_or(0, |data| data.len())
            ));
        }
        fn on_init_resource_view(
            &self,
            _: &dyn DeviceApi,
            _: Resource,
            _: ResourceUsage,
            desc: &ResourceViewDesc,
            _: ResourceView,
        ) {
            self.push(format!("init_view:{:?}", desc.format));
        }
        fn on_destroy_resource_view(&self, _: &dyn DeviceApi, _: ResourceView) {
            self.push("destroy_view");
        }
        fn on_init_pipeline(&self, _: &dyn DeviceApi, desc: &PipelineDesc, _: Pipeline) {
            self.push(format!("init_pipeline:{:?}", desc.stages()));
        }
        fn on_begin_render_pass(&self, _: &dyn DeviceApi, _: CommandList, attachments: &RenderPassAttachments) {
            self.push(format!("begin_render_pass:{:#x}", attachments.colors[0].raw()));
        }
        fn on_finish_render_pass(&self, _: &dyn DeviceApi, _: CommandList) {
            self.push("finish_render_pass");
        }
        fn on_bind_pipeline_states(&self, _: &dyn DeviceApi, _: CommandList, states: &[(DynamicState, u32)]) {
            self.push(format!("bind_states:{}", states[0].1));
        }
        fn on_draw(&self, _: &dyn DeviceApi, _: CommandList, vertices: u32, _: u32, _: u32, _: u32) -> bool {
            self.push(format!("draw:{vertices}"));
            self.skip_draws
        }
        fn on_clear_render_target_view(
            &self,
            _: &dyn DeviceApi,
            _: CommandList,
            _: ResourceView,
            _: [f32; 4],
            _: &[Rect],
        ) -> bool {
            self.push("clear_rtv");
            self.skip_clears
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
            self.skip_clears
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
            self.push(format!("copy_buffer:{size}"));
            false
        }
        fn on_execute_command_list(&self, _: &dyn DeviceApi, _: CommandQueue, cmd: CommandList) {
            self.push(format!("execute:{:#x}", cmd.raw()));
        }
        fn on_present(&self, _: &dyn DeviceApi, _: CommandQueue, _: SwapChain) {
            self.push("present");
        }
    }

    fn setup(recorder: Recorder) -> (LayerService, Arc<DummyD3D11>, Arc<Recorder>, ComPtr) {
        let _ = env_logger::builder().is_test(true).try_init();
        let service = LayerService::new(LayerConfig::default());
        let recorder = Arc::new(recorder);
        service.addons().register(recorder.clone());
        let dummy = Arc::new(DummyD3D11::new(640, 480));
        let device = dummy.device();
        create_device(&service, dummy.clone()).unwrap();
        assert_eq!(init_swapchain(&service, device, dummy.swap_chain()), S_OK);
        (service, dummy, recorder, device)
    }

    fn render_target_desc(width: u32) -> TextureDesc {
        TextureDesc {
            width,
            height: width,
            format: Format::R8G8B8A8Unorm.raw(),
            bind_flags: D3D11_BIND_RENDER_TARGET | D3D11_BIND_SHADER_RESOURCE,
            ..Default::default()
        }
    }

    fn render_target_view(service: &LayerService, device: ComPtr) -> ComPtr {
        let texture = create_texture(service, device, &render_target_desc(64), None).unwrap();
        create_view(service, device, ViewKind::RenderTarget, texture, None).unwrap()
    }

    #[test]
    fn test_unknown_device_is_rejected() {
        let (service, _dummy, _recorder, _) = setup(Recorder::default());
        let result = create_texture(&service, ComPtr(0xDEAD), &render_target_desc(4), None);
        assert_eq!(result, Err(E_INVALIDARG));
        assert_eq!(present(&service, ComPtr(0xDEAD), 0, 0), E_INVALIDARG);
    }

    #[test]
    fn test_device_init_events() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        assert_eq!(
            recorder.events(),
            vec!["init_device", "init_queue", "init_command_list", "init_swapchain"]
        );
        let wrapper = service.d3d11.devices.get(device.raw()).unwrap();
        assert!(service.d3d11.contexts.get(dummy.immediate_context().raw()).is_some());
        assert_eq!(wrapper.registry().lock().resources.len(), 1);
    }

    #[test]
    fn test_texture_creation_reports_initial_data() {
        let (service, _dummy, recorder, device) = setup(Recorder::default());
        let pixels = [0u8; 64];
        let data = [InitialData {
            data: &pixels,
            row_pitch: 16,
            slice_pitch: 0,
        }];
        let desc = TextureDesc {
            width: 4,
            height: 4,
            format: Format::R8G8B8A8Unorm.raw(),
            bind_flags: D3D11_BIND_SHADER_RESOURCE,
            ..Default::default()
        };
        let texture = create_texture(&service, device, &desc, Some(&data)).unwrap();
        assert_eq!(recorder.events().last().unwrap(), &format!("init_resource:{:#x}:1", texture.raw()));
    }

    #[test]
    fn test_native_failure_is_returned_unchanged() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let wrapper = service.d3d11.devices.get(device.raw()).unwrap();
        let before = wrapper.registry().lock().len();
        dummy.objects().fail_after(0);

        let result = create_texture(&service, device, &render_target_desc(256), None);
        assert_eq!(result, Err(E_OUTOFMEMORY));
        assert_eq!(wrapper.registry().lock().len(), before);
        assert_eq!(recorder.count("init_resource"), 0);
    }

    #[test]
    fn test_replacement_resource_returned_with_reference() {
        let recorder = Recorder {
            replace_textures: true,
            ..Default::default()
        };
        let (service, dummy, recorder, device) = setup(recorder);
        let texture = create_texture(&service, device, &render_target_desc(32), None).unwrap();
        assert_eq!(dummy.ref_count(texture), 2);
        assert_eq!(recorder.count("init_resource"), 0);
        let wrapper = service.d3d11.devices.get(device.raw()).unwrap();
        assert!(wrapper.is_resource_handle_valid(Resource(texture.raw())));
    }

    #[test]
    fn test_view_creation_applies_format_policy() {
        let (service, _dummy, recorder, device) = setup(Recorder::default());
        let desc = TextureDesc {
            width: 64,
            height: 64,
            format: Format::R24G8Typeless.raw(),
            bind_flags: D3D11_BIND_DEPTH_STENCIL | D3D11_BIND_SHADER_RESOURCE,
            ..Default::default()
        };
        let texture = create_texture(&service, device, &desc, None).unwrap();
        recorder.clear();
        create_view(&service, device, ViewKind::DepthStencil, texture, None).unwrap();
        create_view(&service, device, ViewKind::ShaderResource, texture, None).unwrap();
        assert_eq!(
            recorder.events(),
            vec!["init_view:D24UnormS8Uint", "init_view:R24UnormX8Typeless"]
        );
    }

    #[test]
    fn test_shader_and_state_creation_reported_as_pipelines() {
        let (service, _dummy, recorder, device) = setup(Recorder::default());
        let shader = create_shader(&service, device, ShaderStage::PIXEL, &[1, 2, 3, 4]).unwrap();
        let native = crate::backend::d3d_state::convert_rasterizer_state(&Default::default()).unwrap();
        let state = create_rasterizer_state(&service, device, &native).unwrap();
        assert_eq!(recorder.count("init_pipeline"), 2);
        let wrapper = service.d3d11.devices.get(device.raw()).unwrap();
        let tables = wrapper.registry().lock();
        assert_eq!(tables.pipelines.get(shader.raw()).unwrap().stages, ShaderStage::PIXEL);
        assert!(tables.pipelines.contains(state.raw()));
    }

    #[test]
    fn test_binding_same_targets_twice_opens_one_pass() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let context = dummy.immediate_context();
        let a = render_target_view(&service, device);
        recorder.clear();

        om_set_render_targets(&service, context, &[a], ComPtr::NULL);
        om_set_render_targets(&service, context, &[a], ComPtr::NULL);
        assert_eq!(recorder.count("begin_render_pass"), 1);
        assert_eq!(recorder.count("finish_render_pass"), 0);
        assert_eq!(dummy.bound_render_targets(), (vec![a], ComPtr::NULL));
    }

    #[test]
    fn test_switching_targets_finishes_then_begins() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let context = dummy.immediate_context();
        let a = render_target_view(&service, device);
        let b = render_target_view(&service, device);
        om_set_render_targets(&service, context, &[a], ComPtr::NULL);
        recorder.clear();

        om_set_render_targets(&service, context, &[b], ComPtr::NULL);
        assert_eq!(
            recorder.events(),
            vec![
                "finish_render_pass".to_string(),
                format!("begin_render_pass:{:#x}", b.raw())
            ]
        );
    }

    #[test]
    fn test_present_brackets_the_open_pass() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let a = render_target_view(&service, device);
        om_set_render_targets(&service, dummy.immediate_context(), &[a], ComPtr::NULL);
        recorder.clear();

        assert_eq!(present(&service, dummy.swap_chain(), 1, 0), S_OK);
        assert_eq!(
            recorder.events(),
            vec![
                "finish_render_pass".to_string(),
                "present".to_string(),
                format!("begin_render_pass:{:#x}", a.raw())
            ]
        );
        assert!(dummy.calls().contains(&"Present"));
    }

    #[test]
    fn test_topology_reported_on_change_only() {
        let (service, dummy, recorder, _device) = setup(Recorder::default());
        let context = dummy.immediate_context();
        recorder.clear();
        ia_set_primitive_topology(&service, context, 4);
        ia_set_primitive_topology(&service, context, 4);
        draw(&service, context, 3, 0);
        ia_set_primitive_topology(&service, context, 5);
        assert_eq!(recorder.events(), vec!["bind_states:4", "draw:3", "bind_states:5"]);
        assert_eq!(dummy.calls_on(context).iter().filter(|c| **c == "Draw").count(), 1);
    }

    #[test]
    fn test_handled_draw_skips_native_call() {
        let recorder = Recorder {
            skip_draws: true,
            ..Default::default()
        };
        let (service, dummy, _recorder, _device) = setup(recorder);
        draw_instanced(&service, dummy.immediate_context(), 3, 2, 0, 0);
        assert!(!dummy.calls().contains(&"DrawInstanced"));
    }

    #[test]
    fn test_depth_stencil_clear_reports_selected_values() {
        let recorder = Recorder {
            skip_clears: true,
            ..Default::default()
        };
        let (service, dummy, recorder, _device) = setup(recorder);
        recorder.clear();
        clear_depth_stencil_view(
            &service,
            dummy.immediate_context(),
            ComPtr(0x1234),
            D3D11_CLEAR_DEPTH,
            1.0,
            7,
        );
        assert_eq!(recorder.events(), vec!["clear_dsv:Some(1.0):None"]);
        assert!(!dummy.calls().contains(&"ClearDepthStencilView"));
    }

    #[test]
    fn test_buffer_region_copy() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let desc = BufferDesc {
            byte_width: 256,
            bind_flags: D3D11_BIND_VERTEX_BUFFER,
            ..Default::default()
        };
        let source = create_buffer(&service, device, &desc, None).unwrap();
        let dest = create_buffer(&service, device, &desc, None).unwrap();
        recorder.clear();
        let region = SubresourceBox {
            left: 16,
            top: 0,
            front: 0,
            right: 80,
            bottom: 1,
            back: 1,
        };
        copy_subresource_region(&service, dummy.immediate_context(), dest, 0, [0; 3], source, 0, Some(&region));
        assert_eq!(recorder.events(), vec!["copy_buffer:64"]);
        assert!(dummy.calls_on(dest).contains(&"CopySubresourceRegion"));
    }

    #[test]
    fn test_resize_recreates_swapchain() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        recorder.clear();
        let hr = resize_buffers(&service, dummy.swap_chain(), 1, 800, 600, 0);
        assert_eq!(hr, S_OK);
        assert_eq!(recorder.events(), vec!["destroy_swapchain", "init_swapchain"]);

        let wrapper = service.d3d11.devices.get(device.raw()).unwrap();
        let back_buffer = wrapper.back_buffer(dummy.swap_chain()).unwrap();
        let desc = wrapper.get_resource_desc(back_buffer).unwrap();
        assert_eq!(desc.as_texture().unwrap().width, 800);
    }

    #[test]
    fn test_application_view_destruction_closes_pass() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let a = render_target_view(&service, device);
        om_set_render_targets(&service, dummy.immediate_context(), &[a], ComPtr::NULL);
        recorder.clear();

        object_destroyed(&service, device, a);
        assert_eq!(recorder.events(), vec!["finish_render_pass", "destroy_view"]);
        let wrapper = service.d3d11.devices.get(device.raw()).unwrap();
        assert!(!wrapper.is_resource_view_handle_valid(ResourceView(a.raw())));
    }

    #[test]
    fn test_dual_reference_counts() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let wrapper = service.d3d11.devices.get(device.raw()).unwrap();
        assert_eq!(wrapper.query_interface(&IID_ID3D11DEVICE), Ok(Queried::Proxy));
        assert_eq!(wrapper.ref_count(), 2);
        assert_eq!(dummy.ref_count(device), 2);
        assert!(wrapper
            .query_interface(&Guid::new(0x1234, 0, 0, [0; 8]))
            .is_err());

        let context = get_immediate_context(&service, device).unwrap();
        assert_eq!(release_context(&service, context), 1);
        drop(wrapper);

        assert_eq!(release_device(&service, device), 1);
        assert!(service.d3d11.devices.get(device.raw()).is_some());
        assert_eq!(release_device(&service, device), 0);
        assert!(service.d3d11.devices.get(device.raw()).is_none());
        assert!(service.d3d11.contexts.is_empty());
        assert!(service.d3d11.swapchains.is_empty());
        assert_eq!(
            recorder.events()[4..],
            ["destroy_swapchain", "destroy_command_list", "destroy_queue", "destroy_device"]
        );
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_deferred_context_records_its_own_pass() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let immediate = dummy.immediate_context();
        let rtv = render_target_view(&service, device);
        recorder.clear();

        let deferred = create_deferred_context(&service, device).unwrap();
        assert_eq!(recorder.events(), vec!["init_command_list"]);
        om_set_render_targets(&service, deferred, &[rtv], ComPtr::NULL);
        draw(&service, deferred, 3, 0);
        assert!(dummy.calls_on(deferred).contains(&"Draw"));

        let state = service.d3d11.deferred_contexts.get(deferred.raw()).unwrap();
        let wrapper = service.d3d11.devices.get(device.raw()).unwrap();
        assert!(state.current_pass().is_some());
        assert_eq!(wrapper.current_pass(), None);

        let list = finish_command_list(&service, deferred, false).unwrap();
        assert_eq!(state.current_pass(), None);
        execute_command_list(&service, immediate, list, false);
        assert!(dummy.calls_on(immediate).contains(&"ExecuteCommandList"));
        assert_eq!(
            recorder.events(),
            vec![
                "init_command_list".to_string(),
                format!("begin_render_pass:{:#x}", rtv.raw()),
                "draw:3".to_string(),
                "finish_render_pass".to_string(),
                format!("execute:{:#x}", deferred.raw()),
            ]
        );

        assert_eq!(release_command_list(&service, list), 0);
        assert!(service.d3d11.command_lists.is_empty());
        drop(state);
        assert_eq!(release_context(&service, deferred), 0);
        assert!(service.d3d11.deferred_contexts.is_empty());
        assert_eq!(recorder.events().last().unwrap(), "destroy_command_list");
        assert_eq!(dummy.ref_count(deferred), 0);
    }

    #[test]
    fn test_view_destruction_reaches_deferred_contexts() {
        let (service, _dummy, recorder, device) = setup(Recorder::default());
        let rtv = render_target_view(&service, device);
        let deferred = create_deferred_context(&service, device).unwrap();
        om_set_render_targets(&service, deferred, &[rtv], ComPtr::NULL);
        recorder.clear();

        object_destroyed(&service, device, rtv);
        assert_eq!(recorder.events(), vec!["finish_render_pass", "destroy_view"]);
        let state = service.d3d11.deferred_contexts.get(deferred.raw()).unwrap();
        assert_eq!(state.current_pass(), None);
    }

    #[test]
    fn test_untracked_context_calls_reach_driver() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let rtv = render_target_view(&service, device);
        // Created behind the layer's back.
        let context = dummy.create_deferred_context().unwrap();
        recorder.clear();

        om_set_render_targets(&service, context, &[rtv], ComPtr::NULL);
        draw_indexed(&service, context, 6, 0, 0);
        clear_render_target_view(&service, context, rtv, [0.0; 4]);
        assert_eq!(
            dummy.calls_on(context),
            vec!["OMSetRenderTargets", "DrawIndexed", "ClearRenderTargetView"]
        );
        assert!(recorder.events().is_empty());
        assert_eq!(dummy.bound_render_targets().0, vec![rtv]);

        assert_eq!(release_context(&service, context), 0);
        assert_eq!(dummy.ref_count(context), 0);
    }

    #[test]
    fn test_d3d10_device_has_no_deferred_contexts() {
        let service = LayerService::new(LayerConfig::default());
        let dummy = Arc::new(DummyD3D11::new_d3d10(64, 64));
        let device = dummy.device();
        create_device(&service, dummy).unwrap();
        assert!(create_deferred_context(&service, device).is_err());
        assert!(service.d3d11.deferred_contexts.is_empty());
    }
}
