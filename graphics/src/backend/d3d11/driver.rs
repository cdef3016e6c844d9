//! Native `ID3D11Device` / `ID3D10Device` entry points used by the layer.
//!
//! Direct3D 10 has no device context: its device executes commands itself.
//! The driver hides that difference by taking the immediate context pointer
//! on every command method; for Direct3D 10 that pointer is the device.

use lumen_core::events::{Rect, Viewport};
use lumen_core::pipeline::ShaderStage;
use lumen_core::resource::SubresourceBox;
use lumen_core::GraphicsApi;

use super::conversion::{BufferDesc, NativeDesc, TextureDesc, ViewDesc, ViewKind};
use crate::backend::com::{ComDriver, ComPtr, Guid, HResult};
use crate::backend::d3d_state::{
    BlendDesc, DepthStencilDesc, InputElementDesc, RasterizerDesc, SamplerStateDesc,
};
use crate::backend::dxgi::DxgiFormat;

pub const IID_ID3D10DEVICE: Guid = Guid::new(
    0x9B7E4C0F,
    0x342C,
    0x4106,
    [0xA1, 0x9F, 0x4F, 0x27, 0x04, 0xF6, 0x89, 0xF0],
);

pub const IID_ID3D10DEVICE1: Guid = Guid::new(
    0x9B7E4C8F,
    0x342C,
    0x4106,
    [0xA1, 0x9F, 0x4F, 0x27, 0x04, 0xF6, 0x89, 0xF0],
);

pub const IID_ID3D11DEVICE: Guid = Guid::new(
    0xDB6F6DDB,
    0xAC77,
    0x4E88,
    [0x82, 0x53, 0x81, 0x9D, 0xF9, 0xBB, 0xF1, 0x40],
);

pub const IID_ID3D11DEVICE1: Guid = Guid::new(
    0xA04BFB29,
    0x08EF,
    0x43D6,
    [0xA4, 0x9C, 0xA9, 0xBD, 0xBD, 0xCB, 0xE6, 0x86],
);

pub const IID_ID3D11DEVICECONTEXT: Guid = Guid::new(
    0xC0BFA96C,
    0xE089,
    0x44FB,
    [0x8E, 0xAF, 0x26, 0xF8, 0x79, 0x61, 0x90, 0xDA],
);

pub const IID_ID3D11DEVICECONTEXT1: Guid = Guid::new(
    0xBB2C6FAA,
    0xB5FB,
    0x4082,
    [0x8E, 0x6B, 0x38, 0x8B, 0x8C, 0xFA, 0x90, 0xE1],
);

/// Initial data of one subresource, `D3D11_SUBRESOURCE_DATA`.
#[derive(Debug, Clone, Copy)]
pub struct InitialData<'a> {
    pub data: &'a [u8],
    pub row_pitch: u32,
    pub slice_pitch: u32,
}

/// Fixed-function state objects of a pipeline bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateObject {
    Blend,
    Rasterizer,
    DepthStencil,
    InputLayout,
}

pub trait D3D11Driver: ComDriver {
    /// The native device.
    fn device(&self) -> ComPtr;

    /// The immediate context, or the device itself for Direct3D 10. Carries
    /// no reference.
    fn immediate_context(&self) -> ComPtr;

    /// [`GraphicsApi::D3D10`] or [`GraphicsApi::D3D11`].
    fn api(&self) -> GraphicsApi;

    /// Feature level, such as `0xb000` for 11_0.
    fn feature_level(&self) -> u32;

    /// `CheckFormatSupport`, `None` when the format is not supported at all.
    fn format_support(&self, format: DxgiFormat) -> Option<u32>;

    // ========================================================================
    // Object creation. Returned objects carry one reference.
    // ========================================================================

    fn create_buffer(&self, desc: &BufferDesc, data: Option<&InitialData<'_>>) -> Result<ComPtr, HResult>;
    fn create_texture(&self, desc: &TextureDesc, data: Option<&[InitialData<'_>]>) -> Result<ComPtr, HResult>;

    /// Create a view. `None` asks for the default view of the whole resource.
    fn create_view(&self, kind: ViewKind, resource: ComPtr, desc: Option<&ViewDesc>) -> Result<ComPtr, HResult>;

    fn create_sampler_state(&self, desc: &SamplerStateDesc) -> Result<ComPtr, HResult>;
    fn create_shader(&self, stage: ShaderStage, code: &[u8]) -> Result<ComPtr, HResult>;
    fn create_input_layout(&self, elements: &[InputElementDesc], vs_code: &[u8]) -> Result<ComPtr, HResult>;
    fn create_blend_state(&self, desc: &BlendDesc) -> Result<ComPtr, HResult>;
    fn create_rasterizer_state(&self, desc: &RasterizerDesc) -> Result<ComPtr, HResult>;
    fn create_depth_stencil_state(&self, desc: &DepthStencilDesc) -> Result<ComPtr, HResult>;

    // ========================================================================
    // Object queries
    // ========================================================================

    /// `GetDesc` of a buffer or texture.
    fn resource_desc(&self, resource: ComPtr) -> Option<NativeDesc>;

    /// `GetDesc` and `GetResource` of a view. The resource carries no
    /// reference.
    fn view_desc(&self, view: ComPtr) -> Option<(ViewKind, ViewDesc, ComPtr)>;

    fn sampler_desc(&self, sampler: ComPtr) -> Option<SamplerStateDesc>;

    // ========================================================================
    // Context calls
    // ========================================================================

    fn om_set_render_targets(&self, context: ComPtr, rtvs: &[ComPtr], dsv: ComPtr);
    fn rs_set_viewports(&self, context: ComPtr, viewports: &[Viewport]);
    fn rs_set_scissor_rects(&self, context: ComPtr, rects: &[Rect]);
    fn ia_set_primitive_topology(&self, context: ComPtr, topology: u32);
    fn ia_set_vertex_buffers(
        &self,
        context: ComPtr,
        first: u32,
        buffers: &[ComPtr],
        strides: &[u32],
        offsets: &[u32],
    );
    fn ia_set_index_buffer(&self, context: ComPtr, buffer: ComPtr, format: DxgiFormat, offset: u32);

    /// Bind the shaders and state objects of a pipeline bundle.
    fn set_pipeline_objects(&self, context: ComPtr, shaders: &[(ShaderStage, ComPtr)], states: &[(StateObject, ComPtr)]);

    fn draw(&self, context: ComPtr, vertex_count: u32, first_vertex: u32);
    fn draw_indexed(&self, context: ComPtr, index_count: u32, first_index: u32, base_vertex: i32);
    fn draw_instanced(
        &self,
        context: ComPtr,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    fn draw_indexed_instanced(
        &self,
        context: ComPtr,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    );
    fn dispatch(&self, context: ComPtr, x: u32, y: u32, z: u32);

    fn clear_render_target_view(&self, context: ComPtr, view: ComPtr, color: [f32; 4]);
    fn clear_depth_stencil_view(&self, context: ComPtr, view: ComPtr, flags: u32, depth: f32, stencil: u8);
    fn copy_resource(&self, context: ComPtr, dest: ComPtr, source: ComPtr);
    #[allow(clippy::too_many_arguments)]
    fn copy_subresource_region(
        &self,
        context: ComPtr,
        dest: ComPtr,
        dest_subresource: u32,
        dest_offset: [u32; 3],
        source: ComPtr,
        source_subresource: u32,
        source_box: Option<&SubresourceBox>,
    );
    fn resolve_subresource(
        &self,
        context: ComPtr,
        dest: ComPtr,
        dest_subresource: u32,
        source: ComPtr,
        source_subresource: u32,
        format: DxgiFormat,
    );
    /// `UpdateSubresource` of a whole subresource.
    fn update_subresource(&self, context: ComPtr, resource: ComPtr, subresource: u32, data: &InitialData<'_>);

    // ========================================================================
    // Deferred contexts
    // ========================================================================

    /// `CreateDeferredContext`, carrying one reference.
    fn create_deferred_context(&self) -> Result<ComPtr, HResult>;

    /// `FinishCommandList`: the commands recorded on a deferred context,
    /// carrying one reference.
    fn finish_command_list(&self, context: ComPtr, restore_state: bool) -> Result<ComPtr, HResult>;

    fn execute_command_list(&self, context: ComPtr, command_list: ComPtr, restore_state: bool);

    // ========================================================================
    // Swap chain
    // ========================================================================

    /// `IDXGISwapChain::GetBuffer(0)`, carrying one reference.
    fn swapchain_buffer(&self, swapchain: ComPtr) -> Result<ComPtr, HResult>;

    fn present(&self, swapchain: ComPtr, sync_interval: u32, flags: u32) -> HResult;

    /// `IDXGISwapChain::ResizeBuffers`.
    fn resize_buffers(&self, swapchain: ComPtr, count: u32, width: u32, height: u32, format: DxgiFormat) -> HResult;
}

/// Interface name of a device, for diagnostics.
pub fn device_interface_name(api: GraphicsApi) -> &'static str {
    match api {
        GraphicsApi::D3D10 => "ID3D10Device",
        _ => "ID3D11Device",
    }
}
