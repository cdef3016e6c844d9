//! Intercepted `IDirect3DDevice9` methods.
//!
//! The injection shim routes the vtable entries of the device proxy here.
//! Each hook validates the device, lets add-ons replace or skip the call,
//! calls the driver, then updates the registry and fires the events. Native
//! failures are returned unchanged.

use std::sync::Arc;

use lumen_core::events::{ClearValues, Rect, TextureRegion, Viewport};
use lumen_core::pipeline::{DynamicState, GraphicsPipelineDesc, PipelineDesc, ShaderDesc, ShaderStage};
use lumen_core::render_pass::AttachmentType;
use lumen_core::resource::SubresourceBox;
use lumen_core::{
    DeviceApi, Pipeline, RenderPassAttachments, Resource, ResourceDesc, ResourceKind, ResourceUsage,
    ResourceView,
};

use super::conversion::*;
use super::device::D3D9Device;
use super::driver::{D3D9Driver, PresentParameters};
use crate::backend::com::{failed, ComPtr, HResult, Unknown, D3DERR_INVALIDCALL, S_OK};
use crate::service::LayerService;

fn device_of(service: &LayerService, device: ComPtr) -> Result<Arc<D3D9Device>, HResult> {
    service
        .d3d9
        .devices
        .require(device.raw())
        .map_err(|_| D3DERR_INVALIDCALL)
}

/// Direct3D 9 resources have no states; add-ons see them as general.
const INITIAL_STATE: ResourceUsage = ResourceUsage::GENERAL;

// ============================================================================
// Device
// ============================================================================

/// Wrap a device the driver just created and fire its init events.
///
/// On failure the native device is released and the error returned, as if
/// device creation had failed.
pub fn create_device(
    service: &LayerService,
    driver: Arc<dyn D3D9Driver>,
) -> Result<Arc<D3D9Device>, HResult> {
    let native = driver.device();
    let device = Arc::new(D3D9Device::new(
        driver,
        Arc::clone(service.addons()),
        service.config().clone(),
    ));
    let swapchain = match device.init_swapchain() {
        Ok(swapchain) => swapchain,
        Err(hr) => {
            log::error!(
                "Failed to query the implicit swap chain of device {:#x}: {:#010x}",
                native.raw(),
                hr as u32
            );
            device.driver().release(native);
            return Err(hr);
        }
    };
    service.d3d9.devices.insert(native.raw(), Arc::clone(&device));

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
    device
        .addons()
        .notify(|addon| addon.on_init_swapchain(api, swapchain));
    Ok(device)
}

/// `IUnknown::Release` of the device proxy. The wrapper is dropped from the
/// directory on the final release.
pub fn release_device(service: &LayerService, device: ComPtr) -> u32 {
    let Some(wrapper) = service.d3d9.devices.get(device.raw()) else {
        log::error!("Release on unknown IDirect3DDevice9 {:#x}", device.raw());
        return 0;
    };
    let remaining = wrapper.release();
    if remaining == 0 {
        service.d3d9.devices.remove(device.raw());
    }
    remaining
}

/// Destruction callback of an application object, attached through
/// private data when the object was created.
pub fn object_destroyed(service: &LayerService, device: ComPtr, object: ComPtr) {
    let Some(wrapper) = service.d3d9.devices.get(device.raw()) else {
        return;
    };
    let api: &dyn DeviceApi = wrapper.as_ref();
    let resource = Resource(object.raw());
    if wrapper.is_resource_handle_valid(resource) {
        wrapper
            .addons()
            .notify(|addon| addon.on_destroy_resource(api, resource));
        wrapper.destroy_resource(resource);
    } else if wrapper.is_shader(object) {
        let pipeline = Pipeline(object.raw());
        wrapper
            .addons()
            .notify(|addon| addon.on_destroy_pipeline(api, pipeline));
        wrapper.unregister_shader(object);
    }
}

// ============================================================================
// Resources
// ============================================================================

fn check_replacement(device: &D3D9Device, resource: Resource, requested: &ResourceDesc) {
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

/// Shared sequence of the resource creation hooks.
fn create_resource_with(
    device: &D3D9Device,
    call: &str,
    requested: ResourceDesc,
    create: impl FnOnce(&dyn D3D9Driver) -> Result<ComPtr, HResult>,
    register: impl FnOnce(ComPtr) -> ResourceDesc,
) -> Result<ComPtr, HResult> {
    let api: &dyn DeviceApi = device;
    if let Some(replacement) = device
        .addons()
        .replacement(|addon| addon.on_create_resource(api, &requested, INITIAL_STATE))
    {
        check_replacement(device, replacement, &requested);
        // The application releases what it receives.
        let object = ComPtr(replacement.raw());
        device.driver().add_ref(object);
        return Ok(object);
    }

    let object = create(device.driver()).inspect_err(|hr| device.log_failure(call, *hr))?;
    let desc = register(object);
    let resource = Resource(object.raw());
    device
        .addons()
        .notify(|addon| addon.on_init_resource(api, &desc, None, INITIAL_STATE, resource));
    Ok(object)
}

pub fn create_texture(
    service: &LayerService,
    device: ComPtr,
    desc: &SurfaceDesc,
    levels: u32,
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let desc = SurfaceDesc {
        ty: D3DRTYPE_TEXTURE,
        ..*desc
    };
    create_resource_with(
        &wrapper,
        "IDirect3DDevice9::CreateTexture",
        convert_surface_desc(&desc, levels),
        |driver| driver.create_texture(&desc, levels),
        |texture| wrapper.register_texture(texture, &desc, levels),
    )
}

pub fn create_cube_texture(
    service: &LayerService,
    device: ComPtr,
    desc: &SurfaceDesc,
    levels: u32,
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let desc = SurfaceDesc {
        ty: D3DRTYPE_CUBETEXTURE,
        ..*desc
    };
    create_resource_with(
        &wrapper,
        "IDirect3DDevice9::CreateCubeTexture",
        convert_surface_desc(&desc, levels),
        |driver| driver.create_cube_texture(&desc, levels),
        |texture| wrapper.register_texture(texture, &desc, levels),
    )
}

pub fn create_volume_texture(
    service: &LayerService,
    device: ComPtr,
    desc: &VolumeDesc,
    levels: u32,
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    create_resource_with(
        &wrapper,
        "IDirect3DDevice9::CreateVolumeTexture",
        convert_volume_desc(desc, levels),
        |driver| driver.create_volume_texture(desc, levels),
        |texture| wrapper.register_volume(texture, desc, levels),
    )
}

pub fn create_vertex_buffer(
    service: &LayerService,
    device: ComPtr,
    desc: &BufferDesc,
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let desc = BufferDesc {
        ty: D3DRTYPE_VERTEXBUFFER,
        ..*desc
    };
    create_resource_with(
        &wrapper,
        "IDirect3DDevice9::CreateVertexBuffer",
        convert_buffer_desc(&desc),
        |driver| driver.create_vertex_buffer(&desc),
        |buffer| wrapper.register_buffer(buffer, &desc),
    )
}

pub fn create_index_buffer(
    service: &LayerService,
    device: ComPtr,
    desc: &BufferDesc,
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let desc = BufferDesc {
        ty: D3DRTYPE_INDEXBUFFER,
        ..*desc
    };
    create_resource_with(
        &wrapper,
        "IDirect3DDevice9::CreateIndexBuffer",
        convert_buffer_desc(&desc),
        |driver| driver.create_index_buffer(&desc),
        |buffer| wrapper.register_buffer(buffer, &desc),
    )
}

pub fn create_render_target(
    service: &LayerService,
    device: ComPtr,
    desc: &SurfaceDesc,
    lockable: bool,
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let desc = SurfaceDesc {
        ty: D3DRTYPE_SURFACE,
        usage: desc.usage | D3DUSAGE_RENDERTARGET,
        ..*desc
    };
    create_resource_with(
        &wrapper,
        "IDirect3DDevice9::CreateRenderTarget",
        convert_surface_desc(&desc, 1),
        |driver| driver.create_render_target(&desc, lockable),
        |surface| wrapper.register_surface(surface, &desc),
    )
}

pub fn create_depth_stencil_surface(
    service: &LayerService,
    device: ComPtr,
    desc: &SurfaceDesc,
    discard: bool,
) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    let desc = SurfaceDesc {
        ty: D3DRTYPE_SURFACE,
        usage: desc.usage | D3DUSAGE_DEPTHSTENCIL,
        ..*desc
    };
    create_resource_with(
        &wrapper,
        "IDirect3DDevice9::CreateDepthStencilSurface",
        convert_surface_desc(&desc, 1),
        |driver| driver.create_depth_stencil_surface(&desc, discard),
        |surface| wrapper.register_surface(surface, &desc),
    )
}

/// `UpdateTexture`, reported as a whole-resource copy.
pub fn update_texture(service: &LayerService, device: ComPtr, source: ComPtr, dest: ComPtr) -> HResult {
    let Ok(wrapper) = device_of(service, device) else {
        return D3DERR_INVALIDCALL;
    };
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = wrapper.command_list();
    if wrapper.addons().handled(|addon| {
        addon.on_copy_resource(api, cmd, Resource(source.raw()), Resource(dest.raw()))
    }) {
        return S_OK;
    }
    let hr = wrapper.driver().update_texture(source, dest);
    if failed(hr) {
        wrapper.log_failure("IDirect3DDevice9::UpdateTexture", hr);
    }
    hr
}

// ============================================================================
// Shaders
// ============================================================================

fn create_shader(
    device: &D3D9Device,
    call: &str,
    stage: ShaderStage,
    code: &[u8],
    create: impl FnOnce(&dyn D3D9Driver) -> Result<ComPtr, HResult>,
) -> Result<ComPtr, HResult> {
    let api: &dyn DeviceApi = device;
    let mut graphics = GraphicsPipelineDesc::default();
    if stage == ShaderStage::VERTEX {
        graphics.vs = ShaderDesc::new(code);
    } else {
        graphics.ps = ShaderDesc::new(code);
    }
    let desc = PipelineDesc::Graphics(Box::new(graphics));

    if let Some(replacement) = device
        .addons()
        .replacement(|addon| addon.on_create_pipeline(api, &desc))
    {
        let object = ComPtr(replacement.raw());
        device.driver().add_ref(object);
        return Ok(object);
    }

    let shader = create(device.driver()).inspect_err(|hr| device.log_failure(call, *hr))?;
    device.register_shader(shader, stage);
    let pipeline = Pipeline(shader.raw());
    device
        .addons()
        .notify(|addon| addon.on_init_pipeline(api, &desc, pipeline));
    Ok(shader)
}

pub fn create_vertex_shader(service: &LayerService, device: ComPtr, code: &[u8]) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    create_shader(
        &wrapper,
        "IDirect3DDevice9::CreateVertexShader",
        ShaderStage::VERTEX,
        code,
        |driver| driver.create_vertex_shader(code),
    )
}

pub fn create_pixel_shader(service: &LayerService, device: ComPtr, code: &[u8]) -> Result<ComPtr, HResult> {
    let wrapper = device_of(service, device)?;
    create_shader(
        &wrapper,
        "IDirect3DDevice9::CreatePixelShader",
        ShaderStage::PIXEL,
        code,
        |driver| driver.create_pixel_shader(code),
    )
}

// ============================================================================
// Bindings
// ============================================================================

fn notify_bind_render_targets(device: &D3D9Device, attachments: &RenderPassAttachments) {
    let api: &dyn DeviceApi = device;
    let cmd = device.command_list();
    device
        .addons()
        .notify(|addon| addon.on_bind_render_targets_and_depth_stencil(api, cmd, attachments));
}

/// `SetRenderTarget`. Setting render target 0 also resets the viewport to
/// the size of the surface.
pub fn set_render_target(service: &LayerService, device: ComPtr, index: u32, surface: ComPtr) -> HResult {
    let Ok(wrapper) = device_of(service, device) else {
        return D3DERR_INVALIDCALL;
    };
    let hr = wrapper.driver().set_render_target(index, surface);
    if failed(hr) {
        wrapper.log_failure("IDirect3DDevice9::SetRenderTarget", hr);
        return hr;
    }

    let attachments = wrapper.bind_render_target(index, surface);
    notify_bind_render_targets(&wrapper, &attachments);

    if index == 0 {
        let size = wrapper
            .surface_desc(surface)
            .and_then(|desc| desc.as_texture().copied());
        if let Some(texture) = size {
            let viewport = Viewport {
                x: 0.0,
                y: 0.0,
                width: texture.width as f32,
                height: texture.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            let api: &dyn DeviceApi = wrapper.as_ref();
            let cmd = wrapper.command_list();
            wrapper
                .addons()
                .notify(|addon| addon.on_bind_viewports(api, cmd, 0, &[viewport]));
        }
    }
    hr
}

pub fn set_depth_stencil_surface(service: &LayerService, device: ComPtr, surface: ComPtr) -> HResult {
    let Ok(wrapper) = device_of(service, device) else {
        return D3DERR_INVALIDCALL;
    };
    let hr = wrapper.driver().set_depth_stencil_surface(surface);
    if failed(hr) {
        wrapper.log_failure("IDirect3DDevice9::SetDepthStencilSurface", hr);
        return hr;
    }
    let attachments = wrapper.bind_depth_stencil(surface);
    notify_bind_render_targets(&wrapper, &attachments);
    hr
}

pub fn set_viewport(service: &LayerService, device: ComPtr, viewport: &Viewport) -> HResult {
    let Ok(wrapper) = device_of(service, device) else {
        return D3DERR_INVALIDCALL;
    };
    let hr = wrapper.driver().set_viewport(viewport);
    if failed(hr) {
        wrapper.log_failure("IDirect3DDevice9::SetViewport", hr);
        return hr;
    }
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = wrapper.command_list();
    wrapper
        .addons()
        .notify(|addon| addon.on_bind_viewports(api, cmd, 0, std::slice::from_ref(viewport)));
    hr
}

pub fn set_scissor_rect(service: &LayerService, device: ComPtr, rect: &Rect) -> HResult {
    let Ok(wrapper) = device_of(service, device) else {
        return D3DERR_INVALIDCALL;
    };
    let hr = wrapper.driver().set_scissor_rect(rect);
    if failed(hr) {
        wrapper.log_failure("IDirect3DDevice9::SetScissorRect", hr);
        return hr;
    }
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = wrapper.command_list();
    wrapper
        .addons()
        .notify(|addon| addon.on_bind_scissor_rects(api, cmd, 0, std::slice::from_ref(rect)));
    hr
}

fn bind_shader(
    service: &LayerService,
    device: ComPtr,
    stage: ShaderStage,
    shader: ComPtr,
) -> HResult {
    let Ok(wrapper) = device_of(service, device) else {
        return D3DERR_INVALIDCALL;
    };
    let (call, hr) = if stage == ShaderStage::VERTEX {
        ("IDirect3DDevice9::SetVertexShader", wrapper.driver().set_vertex_shader(shader))
    } else {
        ("IDirect3DDevice9::SetPixelShader", wrapper.driver().set_pixel_shader(shader))
    };
    if failed(hr) {
        wrapper.log_failure(call, hr);
        return hr;
    }
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = wrapper.command_list();
    wrapper
        .addons()
        .notify(|addon| addon.on_bind_pipeline(api, cmd, stage, Pipeline(shader.raw())));
    hr
}

pub fn set_vertex_shader(service: &LayerService, device: ComPtr, shader: ComPtr) -> HResult {
    bind_shader(service, device, ShaderStage::VERTEX, shader)
}

pub fn set_pixel_shader(service: &LayerService, device: ComPtr, shader: ComPtr) -> HResult {
    bind_shader(service, device, ShaderStage::PIXEL, shader)
}

pub fn set_stream_source(
    service: &LayerService,
    device: ComPtr,
    stream: u32,
    buffer: ComPtr,
    offset: u32,
    stride: u32,
) -> HResult {
    let Ok(wrapper) = device_of(service, device) else {
        return D3DERR_INVALIDCALL;
    };
    let hr = wrapper
        .driver()
        .set_stream_source(stream, buffer, offset, stride);
    if failed(hr) {
        wrapper.log_failure("IDirect3DDevice9::SetStreamSource", hr);
        return hr;
    }
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = wrapper.command_list();
    wrapper.addons().notify(|addon| {
        addon.on_bind_vertex_buffers(
            api,
            cmd,
            stream,
            &[Resource(buffer.raw())],
            &[u64::from(offset)],
            &[stride],
        )
    });
    hr
}

pub fn set_indices(service: &LayerService, device: ComPtr, buffer: ComPtr) -> HResult {
    let Ok(wrapper) = device_of(service, device) else {
        return D3DERR_INVALIDCALL;
    };
    let hr = wrapper.driver().set_indices(buffer);
    if failed(hr) {
        wrapper.log_failure("IDirect3DDevice9::SetIndices", hr);
        return hr;
    }
    let resource = Resource(buffer.raw());
    let index_size = match wrapper.get_resource_desc(resource).map(|desc| desc.kind) {
        Some(ResourceKind::Buffer { stride, .. }) if stride == 4 => 4,
        _ => 2,
    };
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = wrapper.command_list();
    wrapper
        .addons()
        .notify(|addon| addon.on_bind_index_buffer(api, cmd, resource, 0, index_size));
    hr
}

// ============================================================================
// Commands
// ============================================================================

fn notify_topology(device: &D3D9Device, ty: D3dPrimitiveType) {
    if !device.set_topology(ty) {
        return;
    }
    let api: &dyn DeviceApi = device;
    let cmd = device.command_list();
    let state = [(
        DynamicState::PrimitiveTopology,
        convert_primitive_type(ty).to_raw(),
    )];
    device
        .addons()
        .notify(|addon| addon.on_bind_pipeline_states(api, cmd, &state));
}

pub fn draw_primitive(
    service: &LayerService,
    device: ComPtr,
    ty: D3dPrimitiveType,
    start_vertex: u32,
    primitive_count: u32,
) -> HResult {
    let Ok(wrapper) = device_of(service, device) else {
        return D3DERR_INVALIDCALL;
    };
    notify_topology(&wrapper, ty);
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = wrapper.command_list();
    let vertices = vertex_count(ty, primitive_count);
    if wrapper
        .addons()
        .handled(|addon| addon.on_draw(api, cmd, vertices, 1, start_vertex, 0))
    {
        return S_OK;
    }
    let hr = wrapper
        .driver()
        .draw_primitive(ty, start_vertex, primitive_count);
    if failed(hr) {
        wrapper.log_failure("IDirect3DDevice9::DrawPrimitive", hr);
    }
    hr
}

#[allow(clippy::too_many_arguments)]
pub fn draw_indexed_primitive(
    service: &LayerService,
    device: ComPtr,
    ty: D3dPrimitiveType,
    base_vertex: i32,
    min_index: u32,
    num_vertices: u32,
    start_index: u32,
    primitive_count: u32,
) -> HResult {
    let Ok(wrapper) = device_of(service, device) else {
        return D3DERR_INVALIDCALL;
    };
    notify_topology(&wrapper, ty);
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = wrapper.command_list();
    let indices = vertex_count(ty, primitive_count);
    if wrapper
        .addons()
        .handled(|addon| addon.on_draw_indexed(api, cmd, indices, 1, start_index, base_vertex, 0))
    {
        return S_OK;
    }
    let hr = wrapper.driver().draw_indexed_primitive(
        ty,
        base_vertex,
        min_index,
        num_vertices,
        start_index,
        primitive_count,
    );
    if failed(hr) {
        wrapper.log_failure("IDirect3DDevice9::DrawIndexedPrimitive", hr);
    }
    hr
}

/// `Clear` of the bound attachments.
pub fn clear(
    service: &LayerService,
    device: ComPtr,
    rects: &[[i32; 4]],
    flags: u32,
    color: D3dColor,
    depth: f32,
    stencil: u32,
) -> HResult {
    let Ok(wrapper) = device_of(service, device) else {
        return D3DERR_INVALIDCALL;
    };
    let mut clear_flags = AttachmentType::empty();
    if flags & D3DCLEAR_TARGET != 0 {
        clear_flags |= AttachmentType::COLOR;
    }
    if flags & D3DCLEAR_ZBUFFER != 0 {
        clear_flags |= AttachmentType::DEPTH;
    }
    if flags & D3DCLEAR_STENCIL != 0 {
        clear_flags |= AttachmentType::STENCIL;
    }
    let values = ClearValues {
        color: convert_color(color),
        depth,
        stencil: stencil as u8,
    };
    let converted = convert_rects(rects);

    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = wrapper.command_list();
    if wrapper
        .addons()
        .handled(|addon| addon.on_clear_attachments(api, cmd, clear_flags, &values, &converted))
    {
        return S_OK;
    }
    let hr = wrapper
        .driver()
        .clear(rects, flags, color, depth, stencil);
    if failed(hr) {
        wrapper.log_failure("IDirect3DDevice9::Clear", hr);
    }
    hr
}

/// `ColorFill`, reported as a render target view clear.
pub fn color_fill(
    service: &LayerService,
    device: ComPtr,
    surface: ComPtr,
    rect: Option<&Rect>,
    color: D3dColor,
) -> HResult {
    let Ok(wrapper) = device_of(service, device) else {
        return D3DERR_INVALIDCALL;
    };
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = wrapper.command_list();
    let rects = rect.map_or(&[][..], std::slice::from_ref);
    if wrapper.addons().handled(|addon| {
        addon.on_clear_render_target_view(api, cmd, ResourceView(surface.raw()), convert_color(color), rects)
    }) {
        return S_OK;
    }
    let hr = wrapper.driver().color_fill(surface, rect, color);
    if failed(hr) {
        wrapper.log_failure("IDirect3DDevice9::ColorFill", hr);
    }
    hr
}

fn texture_region(device: &D3D9Device, surface: ComPtr, rect: Option<&Rect>) -> TextureRegion {
    let (resource, subresource) = device.surface_subresource(surface);
    TextureRegion {
        resource,
        subresource,
        region: rect.map(|rect| SubresourceBox {
            left: rect.left.max(0) as u32,
            top: rect.top.max(0) as u32,
            front: 0,
            right: rect.right.max(0) as u32,
            bottom: rect.bottom.max(0) as u32,
            back: 1,
        }),
    }
}

/// `StretchRect`. Copies from a multisampled surface to a single-sampled
/// one are reported as resolves.
pub fn stretch_rect(
    service: &LayerService,
    device: ComPtr,
    source: ComPtr,
    source_rect: Option<&Rect>,
    dest: ComPtr,
    dest_rect: Option<&Rect>,
    filter: u32,
) -> HResult {
    let Ok(wrapper) = device_of(service, device) else {
        return D3DERR_INVALIDCALL;
    };
    let api: &dyn DeviceApi = wrapper.as_ref();
    let cmd = wrapper.command_list();
    let src = texture_region(&wrapper, source, source_rect);
    let dst = texture_region(&wrapper, dest, dest_rect);
    let samples = |surface| {
        wrapper
            .surface_desc(surface)
            .and_then(|desc| desc.as_texture().copied())
            .map_or(1, |texture| texture.samples.max(1))
    };
    let handled = if samples(source) > 1 && samples(dest) == 1 {
        let format = wrapper
            .surface_desc(source)
            .map(|desc| desc.format())
            .unwrap_or_default();
        wrapper
            .addons()
            .handled(|addon| addon.on_resolve_texture_region(api, cmd, &src, &dst, format))
    } else {
        wrapper
            .addons()
            .handled(|addon| addon.on_copy_texture_region(api, cmd, &src, &dst))
    };
    if handled {
        return S_OK;
    }
    let hr = wrapper
        .driver()
        .stretch_rect(source, source_rect, dest, dest_rect, filter);
    if failed(hr) {
        wrapper.log_failure("IDirect3DDevice9::StretchRect", hr);
    }
    hr
}

// ============================================================================
// Presentation
// ============================================================================

/// `Present`. The open render pass is closed around the present and
/// reopened with the same attachments afterwards.
pub fn present(service: &LayerService, device: ComPtr) -> HResult {
    let Ok(wrapper) = device_of(service, device) else {
        return D3DERR_INVALIDCALL;
    };
    wrapper.end_pass();
    let api: &dyn DeviceApi = wrapper.as_ref();
    let queue = wrapper.command_queue();
    let swapchain = wrapper.swapchain();
    wrapper
        .addons()
        .notify(|addon| addon.on_present(api, queue, swapchain));

    let hr = wrapper.driver().present();
    if failed(hr) {
        wrapper.log_failure("IDirect3DDevice9::Present", hr);
    }
    wrapper.resume_pass();
    hr
}

/// `Reset`. The implicit swap chain is destroyed and recreated around the
/// native call, whether or not it succeeds.
pub fn reset(service: &LayerService, device: ComPtr, params: &PresentParameters) -> HResult {
    let Ok(wrapper) = device_of(service, device) else {
        return D3DERR_INVALIDCALL;
    };
    let api: &dyn DeviceApi = wrapper.as_ref();
    wrapper.reset_pass();
    let old = wrapper.swapchain();
    if !old.is_null() {
        wrapper
            .addons()
            .notify(|addon| addon.on_destroy_swapchain(api, old));
    }
    wrapper.destroy_swapchain();

    let hr = wrapper.driver().reset(params);
    if failed(hr) {
        wrapper.log_failure("IDirect3DDevice9::Reset", hr);
    }

    match wrapper.init_swapchain() {
        Ok(swapchain) => wrapper
            .addons()
            .notify(|addon| addon.on_init_swapchain(api, swapchain)),
        Err(e) => log::warn!(
            "Failed to query the swap chain after reset: {:#010x}",
            e as u32
        ),
    }
    hr
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::com::{Guid, Queried, D3DERR_OUTOFVIDEOMEMORY};
    use crate::backend::d3d9::driver::IID_IDIRECT3DDEVICE9;
    use crate::backend::d3d9::dummy::DummyD3D9;
    use lumen_core::{Addon, CommandList, CommandQueue, LayerConfig, SwapChain};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        skip_clears: bool,
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
            _: Option<&[lumen_core::SubresourceData<'_>]>,
            _: ResourceUsage,
            resource: Resource,
        ) {
            self.push(format!("init_resource:{:#x}", resource.raw()));
        }
        fn on_destroy_resource(&self, _: &dyn DeviceApi, resource: Resource) {
            self.push(format!("destroy_resource:{:#x}", resource.raw()));
        }
        fn on_begin_render_pass(&self, _: &dyn DeviceApi, _: CommandList, attachments: &RenderPassAttachments) {
            self.push(format!("begin_render_pass:{:#x}", attachments.colors[0].raw()));
        }
        fn on_finish_render_pass(&self, _: &dyn DeviceApi, _: CommandList) {
            self.push("finish_render_pass");
        }
        fn on_bind_viewports(&self, _: &dyn DeviceApi, _: CommandList, _: u32, viewports: &[Viewport]) {
            self.push(format!("bind_viewports:{}x{}", viewports[0].width, viewports[0].height));
        }
        fn on_bind_pipeline_states(&self, _: &dyn DeviceApi, _: CommandList, states: &[(DynamicState, u32)]) {
            self.push(format!("bind_states:{}", states[0].1));
        }
        fn on_draw(&self, _: &dyn DeviceApi, _: CommandList, vertices: u32, _: u32, _: u32, _: u32) -> bool {
            self.push(format!("draw:{vertices}"));
            false
        }
        fn on_clear_attachments(
            &self,
            _: &dyn DeviceApi,
            _: CommandList,
            flags: AttachmentType,
            _: &ClearValues,
            _: &[Rect],
        ) -> bool {
            self.push(format!("clear:{:?}", flags));
            self.skip_clears
        }
        fn on_copy_texture_region(
            &self,
            _: &dyn DeviceApi,
            _: CommandList,
            source: &TextureRegion,
            _: &TextureRegion,
        ) -> bool {
            self.push(format!("copy_region:{}", source.subresource));
            false
        }
        fn on_present(&self, _: &dyn DeviceApi, _: CommandQueue, _: SwapChain) {
            self.push("present");
        }
    }

    fn params() -> PresentParameters {
        PresentParameters {
            back_buffer_width: 640,
            back_buffer_height: 480,
            back_buffer_format: D3DFMT_X8R8G8B8,
            back_buffer_count: 1,
            enable_auto_depth_stencil: true,
            auto_depth_stencil_format: D3DFMT_D24S8,
            ..Default::default()
        }
    }

    fn setup(recorder: Recorder) -> (LayerService, Arc<DummyD3D9>, Arc<Recorder>, ComPtr) {
        let _ = env_logger::builder().is_test(true).try_init();
        let service = LayerService::new(LayerConfig::default());
        let recorder = Arc::new(recorder);
        service.addons().register(recorder.clone());
        let dummy = Arc::new(DummyD3D9::new(&params()));
        let device = dummy.device();
        create_device(&service, dummy.clone()).unwrap();
        (service, dummy, recorder, device)
    }

    fn render_target_desc(width: u32) -> SurfaceDesc {
        SurfaceDesc {
            format: D3DFMT_A8R8G8B8,
            usage: D3DUSAGE_RENDERTARGET,
            pool: D3DPOOL_DEFAULT,
            width,
            height: width,
            ..Default::default()
        }
    }

    fn render_target(service: &LayerService, device: ComPtr) -> ComPtr {
        create_render_target(service, device, &render_target_desc(64), false).unwrap()
    }

    #[test]
    fn test_unknown_device_is_rejected() {
        let (service, _dummy, _recorder, _) = setup(Recorder::default());
        let result = create_texture(&service, ComPtr(0xDEAD), &render_target_desc(4), 1);
        assert_eq!(result, Err(D3DERR_INVALIDCALL));
        assert_eq!(present(&service, ComPtr(0xDEAD)), D3DERR_INVALIDCALL);
    }

    #[test]
    fn test_device_init_events() {
        let (service, _dummy, recorder, device) = setup(Recorder::default());
        assert_eq!(
            recorder.events(),
            vec!["init_device", "init_queue", "init_command_list", "init_swapchain"]
        );
        let wrapper = service.d3d9.devices.get(device.raw()).unwrap();
        assert_eq!(wrapper.api(), lumen_core::GraphicsApi::D3D9);
        assert_eq!(wrapper.registry().lock().resources.len(), 2);
    }

    #[test]
    fn test_render_target_texture_registers_every_level() {
        let (service, _dummy, recorder, device) = setup(Recorder::default());
        let texture = create_texture(&service, device, &render_target_desc(256), 0).unwrap();
        let wrapper = service.d3d9.devices.get(device.raw()).unwrap();

        let desc = wrapper.get_resource_desc(Resource(texture.raw())).unwrap();
        assert_eq!(desc.as_texture().unwrap().levels, 9);
        assert_eq!(wrapper.registry().lock().surfaces.len(), 9);
        assert_eq!(recorder.count("init_resource"), 1);
    }

    #[test]
    fn test_native_failure_is_returned_unchanged() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let wrapper = service.d3d9.devices.get(device.raw()).unwrap();
        let before = wrapper.registry().lock().len();
        dummy.objects().fail_after(0);

        let result = create_texture(&service, device, &render_target_desc(256), 0);
        assert_eq!(result, Err(D3DERR_OUTOFVIDEOMEMORY));
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
        let texture = create_texture(&service, device, &render_target_desc(32), 1).unwrap();
        assert_eq!(dummy.ref_count(texture), 2);
        assert_eq!(recorder.count("init_resource"), 0);
        let wrapper = service.d3d9.devices.get(device.raw()).unwrap();
        assert!(wrapper.is_resource_handle_valid(Resource(texture.raw())));
    }

    #[test]
    fn test_binding_same_target_twice_opens_one_pass() {
        let (service, _dummy, recorder, device) = setup(Recorder::default());
        let a = render_target(&service, device);
        recorder.clear();

        assert_eq!(set_render_target(&service, device, 0, a), S_OK);
        assert_eq!(set_render_target(&service, device, 0, a), S_OK);
        assert_eq!(recorder.count("begin_render_pass"), 1);
        assert_eq!(recorder.count("finish_render_pass"), 0);
        assert_eq!(recorder.count("bind_viewports:64x64"), 2);
    }

    #[test]
    fn test_switching_targets_finishes_then_begins() {
        let (service, _dummy, recorder, device) = setup(Recorder::default());
        let a = render_target(&service, device);
        let b = render_target(&service, device);
        set_render_target(&service, device, 0, a);
        recorder.clear();

        set_render_target(&service, device, 0, b);
        let passes: Vec<String> = recorder
            .events()
            .into_iter()
            .filter(|e| e.contains("render_pass"))
            .collect();
        assert_eq!(
            passes,
            vec![
                "finish_render_pass".to_string(),
                format!("begin_render_pass:{:#x}", b.raw())
            ]
        );
    }

    #[test]
    fn test_failed_bind_leaves_pass_untouched() {
        let (service, _dummy, recorder, device) = setup(Recorder::default());
        let a = render_target(&service, device);
        recorder.clear();
        assert_eq!(set_render_target(&service, device, 7, a), D3DERR_INVALIDCALL);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_present_brackets_the_open_pass() {
        let (service, _dummy, recorder, device) = setup(Recorder::default());
        let a = render_target(&service, device);
        set_render_target(&service, device, 0, a);
        recorder.clear();

        assert_eq!(present(&service, device), S_OK);
        assert_eq!(
            recorder.events(),
            vec![
                "finish_render_pass".to_string(),
                "present".to_string(),
                format!("begin_render_pass:{:#x}", a.raw())
            ]
        );
    }

    #[test]
    fn test_topology_reported_on_change_only() {
        let (service, _dummy, recorder, device) = setup(Recorder::default());
        recorder.clear();
        draw_primitive(&service, device, D3DPT_TRIANGLELIST, 0, 2);
        draw_primitive(&service, device, D3DPT_TRIANGLELIST, 0, 2);
        draw_primitive(&service, device, D3DPT_TRIANGLESTRIP, 0, 2);
        assert_eq!(
            recorder.events(),
            vec!["bind_states:4", "draw:6", "draw:6", "bind_states:5", "draw:4"]
        );
    }

    #[test]
    fn test_handled_clear_skips_native_call() {
        let recorder = Recorder {
            skip_clears: true,
            ..Default::default()
        };
        let (service, dummy, recorder, device) = setup(recorder);
        let hr = clear(&service, device, &[], D3DCLEAR_TARGET | D3DCLEAR_ZBUFFER, 0, 1.0, 0);
        assert_eq!(hr, S_OK);
        assert_eq!(recorder.count("clear:"), 1);
        assert!(!dummy.calls().contains(&"Clear"));
    }

    #[test]
    fn test_native_clear_error_propagates() {
        let (service, _dummy, _recorder, device) = setup(Recorder::default());
        assert_eq!(clear(&service, device, &[], 0, 0, 1.0, 0), D3DERR_INVALIDCALL);
    }

    #[test]
    fn test_stretch_rect_reports_texture_level() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let texture = create_texture(&service, device, &render_target_desc(64), 0).unwrap();
        let level = dummy
            .get_surface(texture, super::super::driver::SurfaceOf::Texture { level: 2 })
            .unwrap();
        recorder.clear();

        let hr = stretch_rect(&service, device, level, None, dummy.back_buffer(), None, 0);
        assert_eq!(hr, S_OK);
        assert_eq!(recorder.events(), vec!["copy_region:2"]);
    }

    #[test]
    fn test_reset_recreates_swapchain() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let old_back_buffer = dummy.back_buffer();
        recorder.clear();

        let resized = PresentParameters {
            back_buffer_width: 800,
            back_buffer_height: 600,
            ..params()
        };
        assert_eq!(reset(&service, device, &resized), S_OK);
        assert_eq!(recorder.events(), vec!["destroy_swapchain", "init_swapchain"]);

        let wrapper = service.d3d9.devices.get(device.raw()).unwrap();
        assert!(!wrapper.is_resource_handle_valid(Resource(old_back_buffer.raw())));
        let back_buffer = wrapper.back_buffer().unwrap();
        let desc = wrapper.get_resource_desc(back_buffer).unwrap();
        assert_eq!(desc.as_texture().unwrap().width, 800);
    }

    #[test]
    fn test_application_object_destruction() {
        let (service, _dummy, recorder, device) = setup(Recorder::default());
        let texture = create_texture(&service, device, &render_target_desc(16), 1).unwrap();
        object_destroyed(&service, device, texture);
        assert_eq!(recorder.count("destroy_resource"), 1);
        let wrapper = service.d3d9.devices.get(device.raw()).unwrap();
        assert!(!wrapper.is_resource_handle_valid(Resource(texture.raw())));
        assert!(wrapper.registry().lock().surfaces.is_empty());
    }

    #[test]
    fn test_dual_reference_counts() {
        let (service, dummy, recorder, device) = setup(Recorder::default());
        let wrapper = service.d3d9.devices.get(device.raw()).unwrap();
        assert_eq!(wrapper.query_interface(&IID_IDIRECT3DDEVICE9), Ok(Queried::Proxy));
        assert_eq!(wrapper.ref_count(), 2);
        assert_eq!(dummy.ref_count(device), 2);
        assert!(wrapper
            .query_interface(&Guid::new(0x1234, 0, 0, [0; 8]))
            .is_err());
        drop(wrapper);

        assert_eq!(release_device(&service, device), 1);
        assert!(service.d3d9.devices.get(device.raw()).is_some());
        assert_eq!(release_device(&service, device), 0);
        assert!(service.d3d9.devices.get(device.raw()).is_none());
        assert_eq!(
            recorder.events()[4..],
            ["destroy_swapchain", "destroy_command_list", "destroy_queue", "destroy_device"]
        );
        assert_eq!(dummy.objects().live_count(), 0);
    }
}
