//! In-memory Direct3D 9 driver for testing.
//!
//! Objects are allocated from [`DummyObjects`] and carry a native reference
//! count, so tests can check both the application-visible and the native
//! side of the proxy reference counting. Surfaces of a texture are created
//! on first request and die with their container.

use std::collections::HashMap;

use lumen_core::events::{Rect, Viewport};
use parking_lot::Mutex;

use super::conversion::*;
use super::driver::{
    D3D9Caps, D3D9Driver, PresentParameters, SurfaceOf, IID_IDIRECT3DDEVICE9,
    IID_IDIRECT3DDEVICE9EX,
};
use crate::backend::com::*;
use crate::backend::dummy::DummyObjects;

/// Native call recorded by the dummy driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub name: &'static str,
    pub object: u64,
}

#[derive(Debug, Default)]
struct State {
    refs: HashMap<u64, u32>,
    descs: HashMap<u64, SurfaceDesc>,
    levels: HashMap<u64, u32>,
    surfaces: HashMap<(u64, u32, u32), u64>,
    state_blocks: HashMap<u64, Vec<(u32, u32)>>,
    uploads: Vec<(u64, usize)>,
    back_buffer: u64,
    depth_stencil: u64,
}

/// A Direct3D 9 device that only keeps books.
#[derive(Debug)]
pub struct DummyD3D9 {
    device: u64,
    swap_chain: u64,
    objects: DummyObjects,
    state: Mutex<State>,
    calls: Mutex<Vec<RecordedCall>>,
    caps: D3D9Caps,
    extended: bool,
}

impl DummyD3D9 {
    pub fn new(params: &PresentParameters) -> Self {
        let objects = DummyObjects::new(0x9000_0000);
        let device = objects.allocate("device").unwrap_or_default();
        let swap_chain = objects.allocate("swap chain").unwrap_or_default();
        let driver = Self {
            device,
            swap_chain,
            objects,
            state: Mutex::new(State::default()),
            calls: Mutex::new(Vec::new()),
            caps: D3D9Caps::default(),
            extended: false,
        };
        {
            let mut state = driver.state.lock();
            state.refs.insert(device, 1);
            state.refs.insert(swap_chain, 1);
        }
        driver.create_implicit_surfaces(params);
        driver
    }

    /// Report `IDirect3DDevice9Ex` support.
    pub fn with_ex(mut self) -> Self {
        self.extended = true;
        self
    }

    pub fn with_caps(mut self, caps: D3D9Caps) -> Self {
        self.caps = caps;
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

    pub fn render_states(&self, state_block: ComPtr) -> Option<Vec<(u32, u32)>> {
        self.state.lock().state_blocks.get(&state_block.raw()).cloned()
    }

    /// `(object, bytes)` of every lock-and-copy upload, oldest first.
    pub fn uploads(&self) -> Vec<(u64, usize)> {
        self.state.lock().uploads.clone()
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

    fn create_implicit_surfaces(&self, params: &PresentParameters) {
        let back_buffer = self.new_object(
            "back buffer",
            Some(SurfaceDesc {
                format: params.back_buffer_format,
                ty: D3DRTYPE_SURFACE,
                usage: D3DUSAGE_RENDERTARGET,
                pool: D3DPOOL_DEFAULT,
                multisample: params.multisample,
                multisample_quality: 0,
                width: params.back_buffer_width,
                height: params.back_buffer_height,
            }),
            1,
        );
        let depth_stencil = if params.enable_auto_depth_stencil {
            self.new_object(
                "auto depth stencil",
                Some(SurfaceDesc {
                    format: params.auto_depth_stencil_format,
                    ty: D3DRTYPE_SURFACE,
                    usage: D3DUSAGE_DEPTHSTENCIL,
                    pool: D3DPOOL_DEFAULT,
                    multisample: params.multisample,
                    multisample_quality: 0,
                    width: params.back_buffer_width,
                    height: params.back_buffer_height,
                }),
                1,
            )
        } else {
            Ok(ComPtr::NULL)
        };
        let mut state = self.state.lock();
        state.back_buffer = back_buffer.unwrap_or_default().raw();
        state.depth_stencil = depth_stencil.unwrap_or_default().raw();
    }

    fn new_object(
        &self,
        kind: &'static str,
        desc: Option<SurfaceDesc>,
        levels: u32,
    ) -> Result<ComPtr, HResult> {
        let handle = self
            .objects
            .allocate(kind)
            .ok_or(D3DERR_OUTOFVIDEOMEMORY)?;
        let mut state = self.state.lock();
        state.refs.insert(handle, 1);
        if let Some(desc) = desc {
            state.descs.insert(handle, desc);
        }
        state.levels.insert(handle, levels);
        Ok(ComPtr(handle))
    }

    fn destroy(&self, state: &mut State, handle: u64) {
        state.refs.remove(&handle);
        state.descs.remove(&handle);
        state.levels.remove(&handle);
        state.state_blocks.remove(&handle);
        let children: Vec<(u32, u32)> = state
            .surfaces
            .keys()
            .filter(|(container, _, _)| *container == handle)
            .map(|(_, face, level)| (*face, *level))
            .collect();
        for (face, level) in children {
            if let Some(surface) = state.surfaces.remove(&(handle, face, level)) {
                state.refs.remove(&surface);
                state.descs.remove(&surface);
                self.objects.free(surface);
            }
        }
        self.objects.free(handle);
    }

    fn create_texture_object(
        &self,
        kind: &'static str,
        desc: &SurfaceDesc,
        levels: u32,
    ) -> Result<ComPtr, HResult> {
        if desc.width == 0 || desc.height == 0 || convert_d3d_format(desc.format) == lumen_core::Format::Unknown {
            return Err(D3DERR_INVALIDCALL);
        }
        let levels = match levels {
            0 => full_mip_chain(desc.width, desc.height, 1),
            levels => levels,
        };
        self.new_object(kind, Some(*desc), levels)
    }

    fn is_live(&self, object: ComPtr) -> bool {
        self.state.lock().refs.contains_key(&object.raw())
    }

    fn device_call(&self, name: &'static str, object: ComPtr) -> HResult {
        self.record(name, object.raw());
        S_OK
    }
}

impl ComDriver for DummyD3D9 {
    fn add_ref(&self, object: ComPtr) -> u32 {
        let mut state = self.state.lock();
        match state.refs.get_mut(&object.raw()) {
            Some(count) => {
                *count += 1;
                *count
            }
            None => {
                log::warn!("DummyD3D9: AddRef on dead object {:#x}", object.raw());
                0
            }
        }
    }

    fn release(&self, object: ComPtr) -> u32 {
        let mut state = self.state.lock();
        let Some(count) = state.refs.get_mut(&object.raw()) else {
            log::warn!("DummyD3D9: Release on dead object {:#x}", object.raw());
            return 0;
        };
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            let is_child = state.surfaces.values().any(|surface| *surface == object.raw());
            if is_child {
                // Surfaces of a texture live as long as their container.
                return 0;
            }
            if object.raw() == self.device {
                for handle in [self.swap_chain, state.back_buffer, state.depth_stencil] {
                    if handle != 0 {
                        self.destroy(&mut state, handle);
                    }
                }
            }
            self.destroy(&mut state, object.raw());
        }
        remaining
    }

    fn query_interface(&self, object: ComPtr, iid: &Guid) -> Result<ComPtr, HResult> {
        let supported = object.raw() == self.device
            && (*iid == IID_IUNKNOWN
                || *iid == IID_IDIRECT3DDEVICE9
                || (*iid == IID_IDIRECT3DDEVICE9EX && self.extended));
        if !supported {
            return Err(E_NOINTERFACE);
        }
        self.add_ref(object);
        Ok(object)
    }
}

impl D3D9Driver for DummyD3D9 {
    fn device(&self) -> ComPtr {
        ComPtr(self.device)
    }

    fn caps(&self) -> D3D9Caps {
        self.caps
    }

    fn check_device_format(&self, _usage: D3dUsage, _ty: D3dResourceType, format: D3dFormat) -> bool {
        convert_d3d_format(format) != lumen_core::Format::Unknown
    }

    fn create_texture(&self, desc: &SurfaceDesc, levels: u32) -> Result<ComPtr, HResult> {
        self.create_texture_object("texture", desc, levels)
    }

    fn create_cube_texture(&self, desc: &SurfaceDesc, levels: u32) -> Result<ComPtr, HResult> {
        if desc.width != desc.height {
            return Err(D3DERR_INVALIDCALL);
        }
        self.create_texture_object("cube texture", desc, levels)
    }

    fn create_volume_texture(&self, desc: &VolumeDesc, levels: u32) -> Result<ComPtr, HResult> {
        let top = SurfaceDesc {
            format: desc.format,
            ty: D3DRTYPE_VOLUMETEXTURE,
            usage: desc.usage,
            pool: desc.pool,
            width: desc.width,
            height: desc.height,
            ..Default::default()
        };
        let levels = match levels {
            0 => full_mip_chain(desc.width, desc.height, desc.depth),
            levels => levels,
        };
        self.create_texture_object("volume texture", &top, levels)
    }

    fn create_vertex_buffer(&self, desc: &BufferDesc) -> Result<ComPtr, HResult> {
        if desc.size == 0 {
            return Err(D3DERR_INVALIDCALL);
        }
        self.new_object("vertex buffer", None, 1)
    }

    fn create_index_buffer(&self, desc: &BufferDesc) -> Result<ComPtr, HResult> {
        if desc.size == 0 || !matches!(desc.format, D3DFMT_INDEX16 | D3DFMT_INDEX32) {
            return Err(D3DERR_INVALIDCALL);
        }
        self.new_object("index buffer", None, 1)
    }

    fn create_render_target(&self, desc: &SurfaceDesc, _lockable: bool) -> Result<ComPtr, HResult> {
        self.create_texture_object("render target", desc, 1)
    }

    fn create_depth_stencil_surface(&self, desc: &SurfaceDesc, _discard: bool) -> Result<ComPtr, HResult> {
        self.create_texture_object("depth stencil", desc, 1)
    }

    fn create_vertex_shader(&self, code: &[u8]) -> Result<ComPtr, HResult> {
        if code.is_empty() {
            return Err(D3DERR_INVALIDCALL);
        }
        self.new_object("vertex shader", None, 1)
    }

    fn create_pixel_shader(&self, code: &[u8]) -> Result<ComPtr, HResult> {
        if code.is_empty() {
            return Err(D3DERR_INVALIDCALL);
        }
        self.new_object("pixel shader", None, 1)
    }

    fn create_vertex_declaration(&self, elements: &[VertexElement]) -> Result<ComPtr, HResult> {
        if elements.is_empty() {
            return Err(D3DERR_INVALIDCALL);
        }
        self.new_object("vertex declaration", None, 1)
    }

    fn record_state_block(
        &self,
        vertex_shader: ComPtr,
        pixel_shader: ComPtr,
        declaration: ComPtr,
        render_states: &[(u32, u32)],
    ) -> Result<ComPtr, HResult> {
        for object in [vertex_shader, pixel_shader, declaration] {
            if !object.is_null() && !self.is_live(object) {
                return Err(D3DERR_INVALIDCALL);
            }
        }
        let block = self.new_object("state block", None, 1)?;
        self.state
            .lock()
            .state_blocks
            .insert(block.raw(), render_states.to_vec());
        Ok(block)
    }

    fn level_count(&self, texture: ComPtr) -> u32 {
        self.state.lock().levels.get(&texture.raw()).copied().unwrap_or(0)
    }

    fn get_surface(&self, texture: ComPtr, of: SurfaceOf) -> Result<ComPtr, HResult> {
        let (face, level) = match of {
            SurfaceOf::Texture { level } => (0, level),
            SurfaceOf::Cube { face, level } if face < CUBE_FACES => (face, level),
            SurfaceOf::Cube { .. } => return Err(D3DERR_INVALIDCALL),
        };
        let (container, levels) = {
            let state = self.state.lock();
            let container = state.descs.get(&texture.raw()).copied();
            (container, state.levels.get(&texture.raw()).copied().unwrap_or(0))
        };
        let Some(container) = container else {
            return Err(D3DERR_INVALIDCALL);
        };
        if level >= levels {
            return Err(D3DERR_INVALIDCALL);
        }

        let existing = self.state.lock().surfaces.get(&(texture.raw(), face, level)).copied();
        if let Some(surface) = existing {
            self.add_ref(ComPtr(surface));
            return Ok(ComPtr(surface));
        }
        let desc = SurfaceDesc {
            ty: D3DRTYPE_SURFACE,
            width: (container.width >> level).max(1),
            height: (container.height >> level).max(1),
            ..container
        };
        let surface = self.new_object("surface", Some(desc), 1)?;
        self.state
            .lock()
            .surfaces
            .insert((texture.raw(), face, level), surface.raw());
        Ok(surface)
    }

    fn surface_desc(&self, surface: ComPtr) -> Option<SurfaceDesc> {
        self.state.lock().descs.get(&surface.raw()).copied()
    }

    fn get_swap_chain(&self) -> Result<(ComPtr, ComPtr), HResult> {
        let back_buffer = self.back_buffer();
        self.add_ref(ComPtr(self.swap_chain));
        self.add_ref(back_buffer);
        Ok((ComPtr(self.swap_chain), back_buffer))
    }

    fn get_depth_stencil_surface(&self) -> Result<ComPtr, HResult> {
        let surface = ComPtr(self.state.lock().depth_stencil);
        if surface.is_null() {
            return Err(D3DERR_NOTFOUND);
        }
        self.add_ref(surface);
        Ok(surface)
    }

    fn write_texture_level(
        &self,
        texture: ComPtr,
        of: SurfaceOf,
        data: &[u8],
        _row_pitch: u32,
    ) -> Result<(), HResult> {
        let level = match of {
            SurfaceOf::Texture { level } | SurfaceOf::Cube { level, .. } => level,
        };
        if level >= self.level_count(texture) {
            return Err(D3DERR_INVALIDCALL);
        }
        self.record("LockRect", texture.raw());
        self.state.lock().uploads.push((texture.raw(), data.len()));
        Ok(())
    }

    fn write_volume_level(
        &self,
        texture: ComPtr,
        level: u32,
        data: &[u8],
        _row_pitch: u32,
        _slice_pitch: u32,
    ) -> Result<(), HResult> {
        if level >= self.level_count(texture) {
            return Err(D3DERR_INVALIDCALL);
        }
        self.record("LockBox", texture.raw());
        self.state.lock().uploads.push((texture.raw(), data.len()));
        Ok(())
    }

    fn write_buffer(&self, buffer: ComPtr, data: &[u8]) -> Result<(), HResult> {
        if !self.is_live(buffer) {
            return Err(D3DERR_INVALIDCALL);
        }
        self.record("Lock", buffer.raw());
        self.state.lock().uploads.push((buffer.raw(), data.len()));
        Ok(())
    }

    fn update_texture(&self, source: ComPtr, dest: ComPtr) -> HResult {
        if !self.is_live(source) || !self.is_live(dest) {
            return D3DERR_INVALIDCALL;
        }
        self.device_call("UpdateTexture", dest)
    }

    fn set_render_target(&self, index: u32, surface: ComPtr) -> HResult {
        if index >= self.caps.num_simultaneous_rts || (index == 0 && surface.is_null()) {
            return D3DERR_INVALIDCALL;
        }
        self.device_call("SetRenderTarget", surface)
    }

    fn set_depth_stencil_surface(&self, surface: ComPtr) -> HResult {
        self.device_call("SetDepthStencilSurface", surface)
    }

    fn set_viewport(&self, _viewport: &Viewport) -> HResult {
        self.device_call("SetViewport", ComPtr(self.device))
    }

    fn set_scissor_rect(&self, _rect: &Rect) -> HResult {
        self.device_call("SetScissorRect", ComPtr(self.device))
    }

    fn set_vertex_shader(&self, shader: ComPtr) -> HResult {
        self.device_call("SetVertexShader", shader)
    }

    fn set_pixel_shader(&self, shader: ComPtr) -> HResult {
        self.device_call("SetPixelShader", shader)
    }

    fn set_stream_source(&self, _stream: u32, buffer: ComPtr, _offset: u32, _stride: u32) -> HResult {
        self.device_call("SetStreamSource", buffer)
    }

    fn set_indices(&self, buffer: ComPtr) -> HResult {
        self.device_call("SetIndices", buffer)
    }

    fn draw_primitive(&self, _ty: D3dPrimitiveType, _start_vertex: u32, primitive_count: u32) -> HResult {
        if primitive_count == 0 {
            return D3DERR_INVALIDCALL;
        }
        self.device_call("DrawPrimitive", ComPtr(self.device))
    }

    fn draw_indexed_primitive(
        &self,
        _ty: D3dPrimitiveType,
        _base_vertex: i32,
        _min_index: u32,
        _vertex_count: u32,
        _start_index: u32,
        primitive_count: u32,
    ) -> HResult {
        if primitive_count == 0 {
            return D3DERR_INVALIDCALL;
        }
        self.device_call("DrawIndexedPrimitive", ComPtr(self.device))
    }

    fn clear(&self, _rects: &[[i32; 4]], flags: u32, _color: u32, _depth: f32, _stencil: u32) -> HResult {
        if flags == 0 {
            return D3DERR_INVALIDCALL;
        }
        self.device_call("Clear", ComPtr(self.device))
    }

    fn stretch_rect(
        &self,
        source: ComPtr,
        _source_rect: Option<&Rect>,
        dest: ComPtr,
        _dest_rect: Option<&Rect>,
        _filter: u32,
    ) -> HResult {
        if !self.is_live(source) || !self.is_live(dest) {
            return D3DERR_INVALIDCALL;
        }
        self.device_call("StretchRect", dest)
    }

    fn color_fill(&self, surface: ComPtr, _rect: Option<&Rect>, _color: u32) -> HResult {
        self.device_call("ColorFill", surface)
    }

    fn present(&self) -> HResult {
        self.device_call("Present", ComPtr(self.swap_chain))
    }

    fn reset(&self, params: &PresentParameters) -> HResult {
        {
            let mut state = self.state.lock();
            let back_buffer = state.back_buffer;
            if state.refs.get(&back_buffer).copied().unwrap_or(0) > 1 {
                return D3DERR_INVALIDCALL;
            }
            for handle in [state.back_buffer, state.depth_stencil] {
                if handle != 0 {
                    self.destroy(&mut state, handle);
                }
            }
        }
        self.create_implicit_surfaces(params);
        self.device_call("Reset", ComPtr(self.device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_surfaces_die_with_container() {
        let driver = DummyD3D9::new(&params());
        let desc = SurfaceDesc {
            format: D3DFMT_A8R8G8B8,
            ty: D3DRTYPE_TEXTURE,
            width: 16,
            height: 16,
            ..Default::default()
        };
        let texture = driver.create_texture(&desc, 0).unwrap();
        assert_eq!(driver.level_count(texture), 5);
        let surface = driver.get_surface(texture, SurfaceOf::Texture { level: 2 }).unwrap();
        assert_eq!(driver.surface_desc(surface).unwrap().width, 4);
        assert_eq!(driver.get_surface(texture, SurfaceOf::Texture { level: 2 }), Ok(surface));

        driver.release(surface);
        driver.release(surface);
        assert!(driver.objects().is_live(surface.raw()));
        assert_eq!(driver.release(texture), 0);
        assert!(!driver.objects().is_live(surface.raw()));
        assert_eq!(driver.objects().live_of_kind("surface"), 0);
    }

    #[test]
    fn test_failure_injection() {
        let driver = DummyD3D9::new(&params());
        driver.objects().fail_after(0);
        let desc = BufferDesc {
            ty: D3DRTYPE_VERTEXBUFFER,
            format: D3DFMT_VERTEXDATA,
            size: 64,
            ..Default::default()
        };
        assert_eq!(driver.create_vertex_buffer(&desc), Err(D3DERR_OUTOFVIDEOMEMORY));
    }

    #[test]
    fn test_device_release_frees_implicit_objects() {
        let driver = DummyD3D9::new(&params());
        assert_eq!(driver.objects().live_of_kind("auto depth stencil"), 1);
        assert_eq!(driver.release(driver.device()), 0);
        assert_eq!(driver.objects().live_count(), 0);
    }

    #[test]
    fn test_reset_fails_while_back_buffer_is_referenced() {
        let driver = DummyD3D9::new(&params());
        let (swap_chain, back_buffer) = driver.get_swap_chain().unwrap();
        assert_eq!(driver.reset(&params()), D3DERR_INVALIDCALL);
        driver.release(back_buffer);
        driver.release(swap_chain);
        assert_eq!(driver.reset(&params()), S_OK);
        assert_ne!(driver.back_buffer(), back_buffer);
    }
}
