//! Native `IDirect3DDevice9` entry points used by the layer.
//!
//! The injection shim implements [`D3D9Driver`] on top of the original
//! vtable of the device it wrapped. Every method is a trampoline: it calls
//! the driver directly and never re-enters the proxy.

use lumen_core::events::{Rect, Viewport};

use super::conversion::{
    BufferDesc, D3dFormat, D3dPool, D3dPrimitiveType, D3dResourceType, D3dUsage, SurfaceDesc,
    VertexElement, VolumeDesc,
};
use crate::backend::com::{ComDriver, ComPtr, Guid, HResult};

pub const IID_IDIRECT3DDEVICE9: Guid = Guid::new(
    0xD0223B96,
    0xBF7A,
    0x43FD,
    [0x92, 0xBD, 0xA4, 0x3B, 0x0D, 0x82, 0xB9, 0xEB],
);

pub const IID_IDIRECT3DDEVICE9EX: Guid = Guid::new(
    0xB18B10CE,
    0x2649,
    0x405A,
    [0x87, 0x0F, 0x95, 0xF7, 0x77, 0xD4, 0x31, 0x3A],
);

/// Subset of `D3DCAPS9` the layer reports through capability queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct D3D9Caps {
    pub num_simultaneous_rts: u32,
    pub max_anisotropy: u32,
    /// `D3DPS_VERSION` encoded as `0xFFFF0000 | major << 8 | minor`.
    pub pixel_shader_version: u32,
    pub independent_write_masks: bool,
}

impl Default for D3D9Caps {
    fn default() -> Self {
        Self {
            num_simultaneous_rts: 4,
            max_anisotropy: 16,
            pixel_shader_version: 0xFFFF_0300,
            independent_write_masks: true,
        }
    }
}

/// `D3DPRESENT_PARAMETERS` fields the layer depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresentParameters {
    pub back_buffer_width: u32,
    pub back_buffer_height: u32,
    pub back_buffer_format: D3dFormat,
    pub back_buffer_count: u32,
    pub multisample: u32,
    pub enable_auto_depth_stencil: bool,
    pub auto_depth_stencil_format: D3dFormat,
}

/// Which interface a texture surface is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceOf {
    /// `IDirect3DTexture9::GetSurfaceLevel`.
    Texture { level: u32 },
    /// `IDirect3DCubeTexture9::GetCubeMapSurface`.
    Cube { face: u32, level: u32 },
}

pub trait D3D9Driver: ComDriver {
    /// The native device.
    fn device(&self) -> ComPtr;

    fn caps(&self) -> D3D9Caps;

    /// `IDirect3D9::CheckDeviceFormat` against the adapter of the device.
    fn check_device_format(&self, usage: D3dUsage, ty: D3dResourceType, format: D3dFormat) -> bool;

    // ========================================================================
    // Object creation. Returned objects carry one reference.
    // ========================================================================

    fn create_texture(
        &self,
        desc: &SurfaceDesc,
        levels: u32,
    ) -> Result<ComPtr, HResult>;
    fn create_cube_texture(
        &self,
        desc: &SurfaceDesc,
        levels: u32,
    ) -> Result<ComPtr, HResult>;
    fn create_volume_texture(
        &self,
        desc: &VolumeDesc,
        levels: u32,
    ) -> Result<ComPtr, HResult>;
    fn create_vertex_buffer(&self, desc: &BufferDesc) -> Result<ComPtr, HResult>;
    fn create_index_buffer(&self, desc: &BufferDesc) -> Result<ComPtr, HResult>;
    fn create_render_target(&self, desc: &SurfaceDesc, lockable: bool) -> Result<ComPtr, HResult>;
    fn create_depth_stencil_surface(
        &self,
        desc: &SurfaceDesc,
        discard: bool,
    ) -> Result<ComPtr, HResult>;

    fn create_vertex_shader(&self, code: &[u8]) -> Result<ComPtr, HResult>;
    fn create_pixel_shader(&self, code: &[u8]) -> Result<ComPtr, HResult>;
    fn create_vertex_declaration(&self, elements: &[VertexElement]) -> Result<ComPtr, HResult>;

    /// Record a state block: `BeginStateBlock`, set the shaders, declaration
    /// and render states, `EndStateBlock`.
    fn record_state_block(
        &self,
        vertex_shader: ComPtr,
        pixel_shader: ComPtr,
        declaration: ComPtr,
        render_states: &[(u32, u32)],
    ) -> Result<ComPtr, HResult>;

    // ========================================================================
    // Object queries
    // ========================================================================

    fn level_count(&self, texture: ComPtr) -> u32;

    /// A surface of a texture, carrying one reference.
    fn get_surface(&self, texture: ComPtr, of: SurfaceOf) -> Result<ComPtr, HResult>;

    /// `GetDesc` of a surface or of the top level of a texture.
    fn surface_desc(&self, surface: ComPtr) -> Option<SurfaceDesc>;

    /// The implicit swap chain and its back buffer, each carrying one reference.
    fn get_swap_chain(&self) -> Result<(ComPtr, ComPtr), HResult>;

    /// The automatic depth-stencil surface, carrying one reference.
    fn get_depth_stencil_surface(&self) -> Result<ComPtr, HResult>;

    // ========================================================================
    // Data upload
    // ========================================================================

    /// `LockRect` of one level of a lockable texture, copy rows, `UnlockRect`.
    fn write_texture_level(
        &self,
        texture: ComPtr,
        of: SurfaceOf,
        data: &[u8],
        row_pitch: u32,
    ) -> Result<(), HResult>;

    /// `LockBox` of one level of a volume texture, copy slices, `UnlockBox`.
    fn write_volume_level(
        &self,
        texture: ComPtr,
        level: u32,
        data: &[u8],
        row_pitch: u32,
        slice_pitch: u32,
    ) -> Result<(), HResult>;

    /// `Lock` of a vertex or index buffer, copy, `Unlock`.
    fn write_buffer(&self, buffer: ComPtr, data: &[u8]) -> Result<(), HResult>;

    // ========================================================================
    // Device calls
    // ========================================================================

    fn update_texture(&self, source: ComPtr, dest: ComPtr) -> HResult;
    fn set_render_target(&self, index: u32, surface: ComPtr) -> HResult;
    fn set_depth_stencil_surface(&self, surface: ComPtr) -> HResult;
    fn set_viewport(&self, viewport: &Viewport) -> HResult;
    fn set_scissor_rect(&self, rect: &Rect) -> HResult;
    fn set_vertex_shader(&self, shader: ComPtr) -> HResult;
    fn set_pixel_shader(&self, shader: ComPtr) -> HResult;
    fn set_stream_source(&self, stream: u32, buffer: ComPtr, offset: u32, stride: u32) -> HResult;
    fn set_indices(&self, buffer: ComPtr) -> HResult;
    fn draw_primitive(&self, ty: D3dPrimitiveType, start_vertex: u32, primitive_count: u32) -> HResult;
    fn draw_indexed_primitive(
        &self,
        ty: D3dPrimitiveType,
        base_vertex: i32,
        min_index: u32,
        vertex_count: u32,
        start_index: u32,
        primitive_count: u32,
    ) -> HResult;
    fn clear(&self, rects: &[[i32; 4]], flags: u32, color: u32, depth: f32, stencil: u32) -> HResult;
    fn stretch_rect(
        &self,
        source: ComPtr,
        source_rect: Option<&Rect>,
        dest: ComPtr,
        dest_rect: Option<&Rect>,
        filter: u32,
    ) -> HResult;
    fn color_fill(&self, surface: ComPtr, rect: Option<&Rect>, color: u32) -> HResult;
    fn present(&self) -> HResult;
    fn reset(&self, params: &PresentParameters) -> HResult;
}

/// Pool of a native description, for diagnostics.
pub fn pool_name(pool: D3dPool) -> &'static str {
    match pool {
        0 => "default",
        1 => "managed",
        2 => "systemmem",
        3 => "scratch",
        _ => "unknown",
    }
}
