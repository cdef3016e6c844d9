//! In-memory Direct3D 10/11 driver for testing.
//!
//! Objects carry native reference counts. Views hold a reference on their
//! resource the way the runtime does, so a resource destroyed under a live
//! view stays alive until the view goes away.

use std::collections::{HashMap, HashSet};

use lumen_core::events::{Rect, Viewport};
use lumen_core::pipeline::ShaderStage;
use lumen_core::resource::SubresourceBox;
use lumen_core::GraphicsApi;
use parking_lot::Mutex;

use super::conversion::*;
use super::driver::*;
use crate::backend::com::*;
use crate::backend::d3d_state::{
    BlendDesc, DepthStencilDesc, InputElementDesc, RasterizerDesc, SamplerStateDesc,
};
use crate::backend::dummy::DummyObjects;
use crate::backend::dxgi::{convert_dxgi_format, DxgiFormat};

/// Native call recorded by the dummy driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub name: &'static str,
    pub object: u64,
}

#[derive(Debug, Default)]
struct State {
    refs: HashMap<u64, u32>,
    resources: HashMap<u64, NativeDesc>,
    views: HashMap<u64, (ViewKind, ViewDesc, u64)>,
    samplers: HashMap<u64, SamplerStateDesc>,
    render_targets: (Vec<u64>, u64),
    deferred_contexts: HashSet<u64>,
    command_lists: HashSet<u64>,
    uploads: Vec<(u64, usize)>,
    back_buffer: u64,
}

/// A Direct3D 10 or 11 device that only keeps books.
#[derive(Debug)]
pub struct DummyD3D11 {
    api: GraphicsApi,
    device: u64,
    context: u64,
    swap_chain: u64,
    objects: DummyObjects,
    state: Mutex<State>,
    calls: Mutex<Vec<RecordedCall>>,
    device1: bool,
}

impl DummyD3D11 {
    /// A Direct3D 11 device with a `width` x `height` swap chain.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_api(GraphicsApi::D3D11, width, height)
    }

    /// A Direct3D 10 device, which is its own immediate context.
    pub fn new_d3d10(width: u32, height: u32) -> Self {
        Self::with_api(GraphicsApi::D3D10, width, height)
    }

    fn with_api(api: GraphicsApi, width: u32, height: u32) -> Self {
        let objects = DummyObjects::new(0xB000_0000);
        let device = objects.allocate("device").unwrap_or_default();
        let context = if api == GraphicsApi::D3D10 {
            device
        } else {
            objects.allocate("immediate context").unwrap_or_default()
        };
        let swap_chain = objects.allocate("swap chain").unwrap_or_default();
        let driver = Self {
            api,
            device,
            context,
            swap_chain,
            objects,
            state: Mutex::new(State::default()),
            calls: Mutex::new(Vec::new()),
            device1: false,
        };
        {
            let mut state = driver.state.lock();
            for handle in [device, context, swap_chain] {
                state.refs.insert(handle, 1);
            }
        }
        let back_buffer = driver
            .new_resource(
                "back buffer",
                NativeDesc::Texture(TextureDesc {
                    width,
                    height,
                    format: lumen_core::Format::R8G8B8A8Unorm.raw(),
                    bind_flags: D3D11_BIND_RENDER_TARGET | D3D11_BIND_SHADER_RESOURCE,
                    ..Default::default()
                }),
            )
            .unwrap_or_default();
        driver.state.lock().back_buffer = back_buffer.raw();
        driver
    }

    /// Report `ID3D11Device1` support.
    pub fn with_device1(mut self) -> Self {
        self.device1 = true;
        self
    }

    pub fn objects(&self) -> &DummyObjects {
        &self.objects
    }

    /// Native reference count of `object`, zero once it is destroyed.
    pub fn ref_count(&self, object: ComPtr) -> u32 {
        self.state.lock().refs.get(&object.raw()).copied().unwrap_or(0)
    }

    /// Names of the recorded calls, oldest first.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(|call| call.name).collect()
    }

    pub fn calls_on(&self, object: ComPtr) -> Vec<&'static str> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.object == object.raw())
            .map(|call| call.name)
            .collect()
    }

    /// `(resource, bytes)` of every initial data and `UpdateSubresource` upload.
    pub fn uploads(&self) -> Vec<(u64, usize)> {
        self.state.lock().uploads.clone()
    }

    /// Render target and depth-stencil views last set on the context.
    pub fn bound_render_targets(&self) -> (Vec<ComPtr>, ComPtr) {
        let state = self.state.lock();
        let (rtvs, dsv) = &state.render_targets;
        (rtvs.iter().map(|rtv| ComPtr(*rtv)).collect(), ComPtr(*dsv))
    }

    pub fn back_buffer(&self) -> ComPtr {
        ComPtr(self.state.lock().back_buffer)
    }

    pub fn swap_chain(&self) -> ComPtr {
        ComPtr(self.swap_chain)
    }

    fn record(&self, name: &'static str, object: u64) {
        self.calls.lock().push(RecordedCall { name, object });
    }

    fn new_object(&self, kind: &'static str) -> Result<ComPtr, HResult> {
        let handle = self.objects.allocate(kind).ok_or(E_OUTOFMEMORY)?;
        self.state.lock().refs.insert(handle, 1);
        Ok(ComPtr(handle))
    }

    fn new_resource(&self, kind: &'static str, desc: NativeDesc) -> Result<ComPtr, HResult> {
        let object = self.new_object(kind)?;
        self.state.lock().resources.insert(object.raw(), desc);
        Ok(object)
    }

    /// Drop `handle` and whatever references it held.
    fn destroy(&self, state: &mut State, handle: u64) {
        state.refs.remove(&handle);
        state.resources.remove(&handle);
        state.samplers.remove(&handle);
        state.deferred_contexts.remove(&handle);
        state.command_lists.remove(&handle);
        let view = state.views.remove(&handle);
        self.objects.free(handle);
        if let Some((_, _, resource)) = view {
            self.release_locked(state, resource);
        }
    }

    fn release_locked(&self, state: &mut State, object: u64) -> u32 {
        let Some(count) = state.refs.get_mut(&object) else {
            log::warn!("DummyD3D11: Release on dead object {:#x}", object);
            return 0;
        };
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            if object == self.device {
                for handle in [self.swap_chain, state.back_buffer] {
                    if handle != 0 && state.refs.contains_key(&handle) {
                        self.destroy(state, handle);
                    }
                }
                if self.context != self.device && state.refs.contains_key(&self.context) {
                    self.destroy(state, self.context);
                }
            }
            self.destroy(state, object);
        }
        remaining
    }

    fn context_call(&self, name: &'static str, context: ComPtr) {
        debug_assert!(
            context.raw() == self.context || self.is_deferred_context(context),
            "command on a foreign context"
        );
        self.record(name, context.raw());
    }

    pub fn is_deferred_context(&self, context: ComPtr) -> bool {
        self.state.lock().deferred_contexts.contains(&context.raw())
    }
}

impl ComDriver for DummyD3D11 {
    fn add_ref(&self, object: ComPtr) -> u32 {
        let mut state = self.state.lock();
        match state.refs.get_mut(&object.raw()) {
            Some(count) => {
                *count += 1;
                *count
            }
            None => {
                log::warn!("DummyD3D11: AddRef on dead object {:#x}", object.raw());
                0
            }
        }
    }

    fn release(&self, object: ComPtr) -> u32 {
        let mut state = self.state.lock();
        self.release_locked(&mut state, object.raw())
    }

    fn query_interface(&self, object: ComPtr, iid: &Guid) -> Result<ComPtr, HResult> {
        let supported = if object.raw() == self.device {
            *iid == IID_IUNKNOWN
                || match self.api {
                    GraphicsApi::D3D10 => *iid == IID_ID3D10DEVICE || *iid == IID_ID3D10DEVICE1,
                    _ => *iid == IID_ID3D11DEVICE || (*iid == IID_ID3D11DEVICE1 && self.device1),
                }
        } else if object.raw() == self.context || self.is_deferred_context(object) {
            *iid == IID_IUNKNOWN
                || *iid == IID_ID3D11DEVICECONTEXT
                || (*iid == IID_ID3D11DEVICECONTEXT1 && self.device1)
        } else {
            false
        };
        if !supported {
            return Err(E_NOINTERFACE);
        }
        self.add_ref(object);
        Ok(object)
    }
}

impl D3D11Driver for DummyD3D11 {
    fn device(&self) -> ComPtr {
        ComPtr(self.device)
    }

    fn immediate_context(&self) -> ComPtr {
        ComPtr(self.context)
    }

    fn api(&self) -> GraphicsApi {
        self.api
    }

    fn feature_level(&self) -> u32 {
        match self.api {
            GraphicsApi::D3D10 => 0xa000,
            _ => 0xb000,
        }
    }

    fn format_support(&self, format: DxgiFormat) -> Option<u32> {
        let format = convert_dxgi_format(format);
        if format == lumen_core::Format::Unknown {
            return None;
        }
        let mut support = D3D11_FORMAT_SUPPORT_BUFFER
            | D3D11_FORMAT_SUPPORT_SHADER_LOAD
            | D3D11_FORMAT_SUPPORT_SHADER_SAMPLE;
        if format.is_depth_stencil() {
            support = D3D11_FORMAT_SUPPORT_DEPTH_STENCIL;
        } else if !format.is_compressed() {
            support |= D3D11_FORMAT_SUPPORT_RENDER_TARGET
                | D3D11_FORMAT_SUPPORT_MULTISAMPLE_RESOLVE
                | D3D11_FORMAT_SUPPORT_TYPED_UNORDERED_ACCESS_VIEW;
        }
        Some(support)
    }

    fn create_buffer(&self, desc: &BufferDesc, data: Option<&InitialData<'_>>) -> Result<ComPtr, HResult> {
        if desc.byte_width == 0 || (desc.usage == D3D11_USAGE_IMMUTABLE && data.is_none()) {
            return Err(E_INVALIDARG);
        }
        let buffer = self.new_resource("buffer", NativeDesc::Buffer(*desc))?;
        if let Some(data) = data {
            self.state.lock().uploads.push((buffer.raw(), data.data.len()));
        }
        Ok(buffer)
    }

    fn create_texture(&self, desc: &TextureDesc, data: Option<&[InitialData<'_>]>) -> Result<ComPtr, HResult> {
        if desc.width == 0
            || desc.height == 0
            || convert_dxgi_format(desc.format) == lumen_core::Format::Unknown
            || (desc.usage == D3D11_USAGE_IMMUTABLE && data.is_none())
        {
            return Err(E_INVALIDARG);
        }
        let mut desc = *desc;
        if desc.mip_levels == 0 {
            let largest = desc.width.max(desc.height);
            desc.mip_levels = u32::BITS - largest.leading_zeros();
        }
        let texture = self.new_resource("texture", NativeDesc::Texture(desc))?;
        if let Some(data) = data {
            let bytes = data.iter().map(|subresource| subresource.data.len()).sum();
            self.state.lock().uploads.push((texture.raw(), bytes));
        }
        Ok(texture)
    }

    fn create_view(&self, kind: ViewKind, resource: ComPtr, desc: Option<&ViewDesc>) -> Result<ComPtr, HResult> {
        let native = self
            .state
            .lock()
            .resources
            .get(&resource.raw())
            .copied()
            .ok_or(E_INVALIDARG)?;
        let desc = match (desc, native) {
            (Some(desc), _) => *desc,
            (None, NativeDesc::Texture(texture)) => {
                let resource_desc = convert_texture_desc(&texture);
                let whole = lumen_core::ResourceViewDesc::for_resource(&resource_desc);
                convert_view_desc(kind, &whole, &resource_desc).map_err(|_| E_INVALIDARG)?
            }
            (None, NativeDesc::Buffer(_)) => return Err(E_INVALIDARG),
        };
        let view = self.new_object(kind.name())?;
        let mut state = self.state.lock();
        state.views.insert(view.raw(), (kind, desc, resource.raw()));
        if let Some(count) = state.refs.get_mut(&resource.raw()) {
            *count += 1;
        }
        Ok(view)
    }

    fn create_sampler_state(&self, desc: &SamplerStateDesc) -> Result<ComPtr, HResult> {
        let sampler = self.new_object("sampler state")?;
        self.state.lock().samplers.insert(sampler.raw(), *desc);
        Ok(sampler)
    }

    fn create_shader(&self, stage: ShaderStage, code: &[u8]) -> Result<ComPtr, HResult> {
        if code.is_empty() {
            return Err(E_INVALIDARG);
        }
        let kind = [
            (ShaderStage::VERTEX, "vertex shader"),
            (ShaderStage::HULL, "hull shader"),
            (ShaderStage::DOMAIN, "domain shader"),
            (ShaderStage::GEOMETRY, "geometry shader"),
            (ShaderStage::PIXEL, "pixel shader"),
            (ShaderStage::COMPUTE, "compute shader"),
        ]
        .into_iter()
        .find(|(bit, _)| *bit == stage)
        .map(|(_, kind)| kind)
        .ok_or(E_INVALIDARG)?;
        self.new_object(kind)
    }

    fn create_input_layout(&self, elements: &[InputElementDesc], vs_code: &[u8]) -> Result<ComPtr, HResult> {
        if elements.is_empty() || vs_code.is_empty() {
            return Err(E_INVALIDARG);
        }
        self.new_object("input layout")
    }

    fn create_blend_state(&self, _desc: &BlendDesc) -> Result<ComPtr, HResult> {
        self.new_object("blend state")
    }

    fn create_rasterizer_state(&self, _desc: &RasterizerDesc) -> Result<ComPtr, HResult> {
        self.new_object("rasterizer state")
    }

    fn create_depth_stencil_state(&self, _desc: &DepthStencilDesc) -> Result<ComPtr, HResult> {
        self.new_object("depth-stencil state")
    }

    fn resource_desc(&self, resource: ComPtr) -> Option<NativeDesc> {
        self.state.lock().resources.get(&resource.raw()).copied()
    }

    fn view_desc(&self, view: ComPtr) -> Option<(ViewKind, ViewDesc, ComPtr)> {
        self.state
            .lock()
            .views
            .get(&view.raw())
            .map(|(kind, desc, resource)| (*kind, *desc, ComPtr(*resource)))
    }

    fn sampler_desc(&self, sampler: ComPtr) -> Option<SamplerStateDesc> {
        self.state.lock().samplers.get(&sampler.raw()).copied()
    }

    fn om_set_render_targets(&self, context: ComPtr, rtvs: &[ComPtr], dsv: ComPtr) {
        self.context_call("OMSetRenderTargets", context);
        self.state.lock().render_targets = (rtvs.iter().map(|rtv| rtv.raw()).collect(), dsv.raw());
    }

    fn rs_set_viewports(&self, context: ComPtr, _viewports: &[Viewport]) {
        self.context_call("RSSetViewports", context);
    }

    fn rs_set_scissor_rects(&self, context: ComPtr, _rects: &[Rect]) {
        self.context_call("RSSetScissorRects", context);
    }

    fn ia_set_primitive_topology(&self, context: ComPtr, _topology: u32) {
        self.context_call("IASetPrimitiveTopology", context);
    }

    fn ia_set_vertex_buffers(
        &self,
        context: ComPtr,
        _first: u32,
        _buffers: &[ComPtr],
        _strides: &[u32],
        _offsets: &[u32],
    ) {
        self.context_call("IASetVertexBuffers", context);
    }

    fn ia_set_index_buffer(&self, context: ComPtr, _buffer: ComPtr, _format: DxgiFormat, _offset: u32) {
        self.context_call("IASetIndexBuffer", context);
    }

    fn set_pipeline_objects(&self, context: ComPtr, _shaders: &[(ShaderStage, ComPtr)], _states: &[(StateObject, ComPtr)]) {
        self.context_call("SetPipelineObjects", context);
    }

    fn draw(&self, context: ComPtr, _vertex_count: u32, _first_vertex: u32) {
        self.context_call("Draw", context);
    }

    fn draw_indexed(&self, context: ComPtr, _index_count: u32, _first_index: u32, _base_vertex: i32) {
        self.context_call("DrawIndexed", context);
    }

    fn draw_instanced(
        &self,
        context: ComPtr,
        _vertex_count: u32,
        _instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.context_call("DrawInstanced", context);
    }

    fn draw_indexed_instanced(
        &self,
        context: ComPtr,
        _index_count: u32,
        _instance_count: u32,
        _first_index: u32,
        _base_vertex: i32,
        _first_instance: u32,
    ) {
        self.context_call("DrawIndexedInstanced", context);
    }

    fn dispatch(&self, context: ComPtr, _x: u32, _y: u32, _z: u32) {
        self.context_call("Dispatch", context);
    }

    fn clear_render_target_view(&self, context: ComPtr, view: ComPtr, _color: [f32; 4]) {
        self.context_call("ClearRenderTargetView", context);
        self.record("ClearRenderTargetView", view.raw());
    }

    fn clear_depth_stencil_view(&self, context: ComPtr, view: ComPtr, _flags: u32, _depth: f32, _stencil: u8) {
        self.context_call("ClearDepthStencilView", context);
        self.record("ClearDepthStencilView", view.raw());
    }

    fn copy_resource(&self, context: ComPtr, dest: ComPtr, _source: ComPtr) {
        self.context_call("CopyResource", context);
        self.record("CopyResource", dest.raw());
    }

    fn copy_subresource_region(
        &self,
        context: ComPtr,
        dest: ComPtr,
        _dest_subresource: u32,
        _dest_offset: [u32; 3],
        _source: ComPtr,
        _source_subresource: u32,
        _source_box: Option<&SubresourceBox>,
    ) {
        self.context_call("CopySubresourceRegion", context);
        self.record("CopySubresourceRegion", dest.raw());
    }

    fn resolve_subresource(
        &self,
        context: ComPtr,
        dest: ComPtr,
        _dest_subresource: u32,
        _source: ComPtr,
        _source_subresource: u32,
        _format: DxgiFormat,
    ) {
        self.context_call("ResolveSubresource", context);
        self.record("ResolveSubresource", dest.raw());
    }

    fn update_subresource(&self, context: ComPtr, resource: ComPtr, _subresource: u32, data: &InitialData<'_>) {
        self.context_call("UpdateSubresource", context);
        self.state.lock().uploads.push((resource.raw(), data.data.len()));
    }

    fn create_deferred_context(&self) -> Result<ComPtr, HResult> {
        if self.api == GraphicsApi::D3D10 {
            return Err(DXGI_ERROR_INVALID_CALL);
        }
        let context = self.new_object("deferred context")?;
        self.state.lock().deferred_contexts.insert(context.raw());
        Ok(context)
    }

    fn finish_command_list(&self, context: ComPtr, _restore_state: bool) -> Result<ComPtr, HResult> {
        if !self.is_deferred_context(context) {
            return Err(DXGI_ERROR_INVALID_CALL);
        }
        self.record("FinishCommandList", context.raw());
        let list = self.new_object("command list")?;
        self.state.lock().command_lists.insert(list.raw());
        Ok(list)
    }

    fn execute_command_list(&self, context: ComPtr, command_list: ComPtr, _restore_state: bool) {
        debug_assert!(
            self.state.lock().command_lists.contains(&command_list.raw()),
            "executing an unknown command list"
        );
        self.context_call("ExecuteCommandList", context);
    }

    fn swapchain_buffer(&self, swapchain: ComPtr) -> Result<ComPtr, HResult> {
        if swapchain.raw() != self.swap_chain {
            return Err(DXGI_ERROR_INVALID_CALL);
        }
        let back_buffer = self.back_buffer();
        self.add_ref(back_buffer);
        Ok(back_buffer)
    }

    fn present(&self, swapchain: ComPtr, _sync_interval: u32, _flags: u32) -> HResult {
        self.record("Present", swapchain.raw());
        S_OK
    }

    fn resize_buffers(&self, swapchain: ComPtr, _count: u32, width: u32, height: u32, _format: DxgiFormat) -> HResult {
        self.record("ResizeBuffers", swapchain.raw());
        let back_buffer = self.back_buffer();
        // Buffers must not be referenced outside the swap chain.
        if self.ref_count(back_buffer) > 1 {
            return DXGI_ERROR_INVALID_CALL;
        }
        let mut state = self.state.lock();
        if let Some(NativeDesc::Texture(texture)) = state.resources.get_mut(&back_buffer.raw()) {
            texture.width = width;
            texture.height = height;
        }
        S_OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_keeps_resource_alive() {
        let driver = DummyD3D11::new(64, 64);
        let texture = driver
            .create_texture(
                &TextureDesc {
                    width: 4,
                    height: 4,
                    format: lumen_core::Format::R8G8B8A8Unorm.raw(),
                    bind_flags: D3D11_BIND_SHADER_RESOURCE,
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        let view = driver.create_view(ViewKind::ShaderResource, texture, None).unwrap();
        assert_eq!(driver.ref_count(texture), 2);
        assert_eq!(driver.release(texture), 1);
        assert!(driver.objects().is_live(texture.raw()));
        assert_eq!(driver.release(view), 0);
        assert!(!driver.objects().is_live(texture.raw()));
    }

    #[test]
    fn test_full_mip_chain() {
        let driver = DummyD3D11::new(64, 64);
        let texture = driver
            .create_texture(
                &TextureDesc {
                    width: 256,
                    height: 128,
                    mip_levels: 0,
                    format: lumen_core::Format::R8G8B8A8Unorm.raw(),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        let Some(NativeDesc::Texture(desc)) = driver.resource_desc(texture) else {
            panic!("expected a texture");
        };
        assert_eq!(desc.mip_levels, 9);
    }

    #[test]
    fn test_d3d10_context_is_device() {
        let driver = DummyD3D11::new_d3d10(64, 64);
        assert_eq!(driver.immediate_context(), driver.device());
        assert_eq!(driver.api(), GraphicsApi::D3D10);
        assert!(driver.query_interface(driver.device(), &IID_ID3D11DEVICE).is_err());
    }

    #[test]
    fn test_device_release_destroys_everything() {
        let driver = DummyD3D11::new(64, 64);
        driver.release(driver.device());
        assert_eq!(driver.objects().live_count(), 0);
    }
}
