//! Abstract device of an `IDirect3DDevice9`.
//!
//! [`D3D9Device`] is the proxy the application receives in place of the
//! driver's device. It keeps the handle registry, implements [`DeviceApi`]
//! for add-ons, and is also the only command list and command queue of the
//! device, so it carries the render pass state as well.
//!
//! Handles are native interface pointers. Render target and depth-stencil
//! views are surfaces, shader resource views are the texture itself, and
//! samplers only exist as records since Direct3D 9 binds sampler states
//! per stage.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use lumen_core::pipeline::{PipelineDesc, ShaderStage};
use lumen_core::sampler::SamplerDesc;
use lumen_core::{
    AddonRegistry, ApiError, ApiResult, CommandList, CommandQueue, DeviceApi, DeviceCaps, Format,
    GraphicsApi, HandleRegistry, LayerConfig, ObjectTable, PassTransition, RenderPassAttachments,
    RenderPassTracker, ResourceDesc, ResourceKind, ResourceUsage, ResourceViewDesc,
    ResourceViewType, SubresourceData, TextureDesc, TextureDimension,
};
use lumen_core::{Pipeline, Resource, ResourceView, Sampler, SwapChain};
use parking_lot::Mutex;

use super::conversion::*;
use super::driver::{pool_name, D3D9Driver, SurfaceOf, IID_IDIRECT3DDEVICE9, IID_IDIRECT3DDEVICE9EX};
use super::pipeline::{self, StateBundle};
use crate::backend::com::{
    add_ref_proxy, failed, hresult_to_api_error, release_proxy, ComPtr, Guid, HResult,
    ProxyRefCount, Queried, Unknown, IID_IUNKNOWN,
};

// ============================================================================
// Records
// ============================================================================

/// Texture, surface or buffer known to the layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    pub desc: ResourceDesc,
    /// Created through [`DeviceApi`]; the layer holds its only reference.
    pub owned: bool,
}

/// One level (and cube face) of a render target or depth-stencil texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceRecord {
    pub container: Resource,
    pub level: u32,
    /// Cube face, zero for 2D textures.
    pub layer: u32,
    pub desc: ResourceDesc,
}

impl SurfaceRecord {
    fn view_desc(&self) -> ResourceViewDesc {
        ResourceViewDesc::texture(
            ResourceViewType::Texture2d,
            self.desc.format(),
            self.level,
            1,
            self.layer,
            1,
        )
    }
}

/// View handed out through [`DeviceApi`].
///
/// Views of the same surface share one native pointer, so the record counts
/// how many times it was created.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRecord {
    /// Weak link: the resource may already be destroyed.
    pub resource: Resource,
    pub desc: ResourceViewDesc,
    pub usage: ResourceUsage,
    pub refs: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerRecord {
    pub desc: SamplerDesc,
    pub states: SamplerStates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineRecord {
    pub stages: ShaderStage,
    /// Objects of a pipeline the layer built. Application shaders carry none.
    pub bundle: Option<StateBundle>,
}

/// Registry tables of one device, guarded by one lock.
#[derive(Debug)]
pub struct Tables {
    pub resources: ObjectTable<ResourceRecord>,
    pub surfaces: ObjectTable<SurfaceRecord>,
    pub views: ObjectTable<ViewRecord>,
    pub samplers: ObjectTable<SamplerRecord>,
    pub pipelines: ObjectTable<PipelineRecord>,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            resources: ObjectTable::new("resource"),
            surfaces: ObjectTable::new("texture surface"),
            views: ObjectTable::new("resource view"),
            samplers: ObjectTable::new("sampler"),
            pipelines: ObjectTable::new("pipeline"),
        }
    }
}

impl Tables {
    /// Number of records across all tables.
    pub fn len(&self) -> usize {
        self.resources.len()
            + self.surfaces.len()
            + self.views.len()
            + self.samplers.len()
            + self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Implicit swap chain of the device. No references are held: the device
/// keeps these objects alive, and extra references make `Reset` fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SwapChainState {
    swapchain: ComPtr,
    back_buffer: ComPtr,
    depth_stencil: ComPtr,
}

#[derive(Debug, Default)]
struct PassState {
    tracker: RenderPassTracker,
    topology: D3dPrimitiveType,
}

fn check(hr: HResult) -> Result<(), HResult> {
    if failed(hr) {
        Err(hr)
    } else {
        Ok(())
    }
}

fn is_surface(desc: &ResourceDesc) -> bool {
    desc.as_texture()
        .is_some_and(|texture| texture.dimension == TextureDimension::Surface)
}

// ============================================================================
// Device
// ============================================================================

/// Layer state of one `IDirect3DDevice9`.
pub struct D3D9Device {
    driver: Arc<dyn D3D9Driver>,
    addons: Arc<AddonRegistry>,
    config: LayerConfig,
    registry: HandleRegistry<Tables>,
    refs: ProxyRefCount,
    extended: AtomicBool,
    next_sampler: AtomicU64,
    pass: Mutex<PassState>,
    swapchain: Mutex<Option<SwapChainState>>,
}

impl std::fmt::Debug for D3D9Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3D9Device")
            .field("device", &self.driver.device())
            .field("refs", &self.refs.get())
            .field("objects", &self.registry.lock().len())
            .finish()
    }
}

impl D3D9Device {
    pub fn new(driver: Arc<dyn D3D9Driver>, addons: Arc<AddonRegistry>, config: LayerConfig) -> Self {
        log::debug!("D3D9Device: wrapping device {:#x}", driver.device().raw());
        Self {
            driver,
            addons,
            config,
            registry: HandleRegistry::new(Tables::default()),
            refs: ProxyRefCount::new(),
            extended: AtomicBool::new(false),
            next_sampler: AtomicU64::new(1),
            pass: Mutex::new(PassState::default()),
            swapchain: Mutex::new(None),
        }
    }

    pub fn driver(&self) -> &dyn D3D9Driver {
        self.driver.as_ref()
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

    pub fn native_device(&self) -> ComPtr {
        self.driver.device()
    }

    /// The device records its own commands.
    pub fn command_list(&self) -> CommandList {
        CommandList(self.driver.device().raw())
    }

    pub fn command_queue(&self) -> CommandQueue {
        CommandQueue(self.driver.device().raw())
    }

    /// The implicit swap chain, or null before it is known.
    pub fn swapchain(&self) -> SwapChain {
        self.swapchain
            .lock()
            .map_or(SwapChain::NULL, |state| SwapChain(state.swapchain.raw()))
    }

    /// Whether the application queried `IDirect3DDevice9Ex`.
    pub fn is_extended(&self) -> bool {
        self.extended.load(Ordering::Acquire)
    }

    /// Application references to the proxy.
    pub fn ref_count(&self) -> u32 {
        self.refs.get()
    }

    /// Log a failed native call when verbose logging is on.
    pub(crate) fn log_failure(&self, call: &str, hr: HResult) {
        if self.config.verbose_log {
            log::warn!("{} failed with {:#010x}", call, hr as u32);
        }
    }

    // ========================================================================
    // Registration of application objects
    // ========================================================================

    fn register_resource(&self, object: ComPtr, desc: ResourceDesc, owned: bool) -> bool {
        self.registry
            .lock()
            .resources
            .register(object.raw(), ResourceRecord { desc, owned })
            .is_ok()
    }

    /// Track a texture or cube texture. Returns the description of the
    /// object the driver actually created.
    pub fn register_texture(&self, texture: ComPtr, desc: &SurfaceDesc, levels: u32) -> ResourceDesc {
        let levels = match self.driver.level_count(texture) {
            0 => levels,
            actual => actual,
        };
        let resource_desc = convert_surface_desc(desc, levels);
        self.register_resource(texture, resource_desc, false);
        if desc.usage & (D3DUSAGE_RENDERTARGET | D3DUSAGE_DEPTHSTENCIL) != 0 {
            let levels = resource_desc.as_texture().map_or(1, |t| u32::from(t.levels));
            self.register_surface_levels(texture, desc.ty == D3DRTYPE_CUBETEXTURE, levels);
        }
        resource_desc
    }

    pub fn register_volume(&self, texture: ComPtr, desc: &VolumeDesc, levels: u32) -> ResourceDesc {
        let levels = match self.driver.level_count(texture) {
            0 => levels,
            actual => actual,
        };
        let resource_desc = convert_volume_desc(desc, levels);
        self.register_resource(texture, resource_desc, false);
        resource_desc
    }

    pub fn register_buffer(&self, buffer: ComPtr, desc: &BufferDesc) -> ResourceDesc {
        let resource_desc = convert_buffer_desc(desc);
        self.register_resource(buffer, resource_desc, false);
        resource_desc
    }

    /// Track a standalone render target or depth-stencil surface.
    pub fn register_surface(&self, surface: ComPtr, desc: &SurfaceDesc) -> ResourceDesc {
        let desc = SurfaceDesc {
            ty: D3DRTYPE_SURFACE,
            ..*desc
        };
        let resource_desc = convert_surface_desc(&desc, 1);
        self.register_resource(surface, resource_desc, false);
        resource_desc
    }

    pub fn register_shader(&self, shader: ComPtr, stage: ShaderStage) {
        let _ = self.registry.lock().pipelines.register(
            shader.raw(),
            PipelineRecord {
                stages: stage,
                bundle: None,
            },
        );
    }

    /// Record every surface of an attachment texture so they can be bound
    /// and resolved back to the texture. Surfaces die with their container,
    /// so their references are dropped right away.
    fn register_surface_levels(&self, texture: ComPtr, cube: bool, levels: u32) {
        if !self.config.register_surface_levels {
            return;
        }
        let faces = if cube { CUBE_FACES } else { 1 };
        let mut records = Vec::with_capacity((faces * levels) as usize);
        for face in 0..faces {
            for level in 0..levels {
                let of = if cube {
                    SurfaceOf::Cube { face, level }
                } else {
                    SurfaceOf::Texture { level }
                };
                let surface = match self.driver.get_surface(texture, of) {
                    Ok(surface) => surface,
                    Err(hr) => {
                        log::warn!(
                            "D3D9Device: failed to get surface {:?} of texture {:#x}: {:#010x}",
                            of,
                            texture.raw(),
                            hr as u32
                        );
                        continue;
                    }
                };
                let desc = self.driver.surface_desc(surface);
                self.driver.release(surface);
                if let Some(desc) = desc {
                    records.push((
                        surface.raw(),
                        SurfaceRecord {
                            container: Resource(texture.raw()),
                            level,
                            layer: face,
                            desc: convert_surface_desc(&desc, 1),
                        },
                    ));
                }
            }
        }

        let mut tables = self.registry.lock();
        for (handle, record) in records {
            tables.surfaces.register_or_replace(handle, record);
        }
    }

    /// Resource and subresource index a surface belongs to. Standalone
    /// surfaces are their own resource.
    pub fn surface_subresource(&self, surface: ComPtr) -> (Resource, u32) {
        let tables = self.registry.lock();
        match tables.surfaces.get(surface.raw()) {
            Some(record) => {
                let levels = tables
                    .resources
                    .get(record.container.raw())
                    .and_then(|container| container.desc.as_texture())
                    .map_or(1, |texture| u32::from(texture.levels).max(1));
                (record.container, record.level + record.layer * levels)
            }
            None => (Resource(surface.raw()), 0),
        }
    }

    /// Description of a surface, whether standalone or part of a texture.
    pub fn surface_desc(&self, surface: ComPtr) -> Option<ResourceDesc> {
        let tables = self.registry.lock();
        tables
            .surfaces
            .get(surface.raw())
            .map(|record| record.desc)
            .or_else(|| tables.resources.get(surface.raw()).map(|record| record.desc))
    }

    pub fn is_shader(&self, object: ComPtr) -> bool {
        self.registry
            .lock()
            .pipelines
            .get(object.raw())
            .is_some_and(|record| record.bundle.is_none())
    }

    /// Forget an application shader released by the application.
    pub fn unregister_shader(&self, shader: ComPtr) {
        let mut tables = self.registry.lock();
        if tables
            .pipelines
            .get(shader.raw())
            .is_some_and(|record| record.bundle.is_none())
        {
            tables.pipelines.unregister(shader.raw());
        }
    }

    // ========================================================================
    // Swap chain
    // ========================================================================

    /// Track the implicit swap chain with its back buffer and automatic
    /// depth-stencil surface.
    pub fn init_swapchain(&self) -> Result<SwapChain, HResult> {
        let (swapchain, back_buffer) = self.driver.get_swap_chain()?;
        self.driver.release(back_buffer);
        self.driver.release(swapchain);
        let depth_stencil = match self.driver.get_depth_stencil_surface() {
            Ok(surface) => {
                self.driver.release(surface);
                surface
            }
            Err(_) => ComPtr::NULL,
        };

        for surface in [back_buffer, depth_stencil] {
            if surface.is_null() {
                continue;
            }
            if let Some(desc) = self.driver.surface_desc(surface) {
                self.register_surface(surface, &desc);
            }
        }
        log::debug!(
            "D3D9Device: swap chain {:#x} with back buffer {:#x}",
            swapchain.raw(),
            back_buffer.raw()
        );
        *self.swapchain.lock() = Some(SwapChainState {
            swapchain,
            back_buffer,
            depth_stencil,
        });
        Ok(SwapChain(swapchain.raw()))
    }

    /// Forget the implicit swap chain surfaces, before `Reset` or teardown.
    pub fn destroy_swapchain(&self) -> Option<SwapChain> {
        let state = self.swapchain.lock().take()?;
        let mut tables = self.registry.lock();
        for surface in [state.back_buffer, state.depth_stencil] {
            if !surface.is_null() {
                tables.resources.unregister(surface.raw());
            }
        }
        Some(SwapChain(state.swapchain.raw()))
    }

    pub fn back_buffer(&self) -> Option<Resource> {
        self.swapchain
            .lock()
            .map(|state| Resource(state.back_buffer.raw()))
    }

    // ========================================================================
    // Render passes
    // ========================================================================

    /// Attachments set on the device, whether or not a pass is open.
    pub fn bound_attachments(&self) -> RenderPassAttachments {
        *self.pass.lock().tracker.bound()
    }

    /// Attachments of the open pass.
    pub fn current_pass(&self) -> Option<RenderPassAttachments> {
        self.pass.lock().tracker.current().copied()
    }

    /// `SetRenderTarget`. Returns the attachments now bound.
    pub(crate) fn bind_render_target(&self, index: u32, surface: ComPtr) -> RenderPassAttachments {
        let (bound, transition) = {
            let mut pass = self.pass.lock();
            let transition = pass
                .tracker
                .set_color(index as usize, ResourceView(surface.raw()));
            (*pass.tracker.bound(), transition)
        };
        self.dispatch_transition(transition);
        bound
    }

    /// `SetDepthStencilSurface`. Returns the attachments now bound.
    pub(crate) fn bind_depth_stencil(&self, surface: ComPtr) -> RenderPassAttachments {
        let (bound, transition) = {
            let mut pass = self.pass.lock();
            let transition = pass
                .tracker
                .set_depth_stencil(ResourceView(surface.raw()));
            (*pass.tracker.bound(), transition)
        };
        self.dispatch_transition(transition);
        bound
    }

    /// Close the open pass at a present.
    pub(crate) fn end_pass(&self) {
        let transition = self.pass.lock().tracker.end();
        self.dispatch_transition(transition);
    }

    pub(crate) fn resume_pass(&self) {
        let transition = self.pass.lock().tracker.resume();
        self.dispatch_transition(transition);
    }

    /// Close the open pass and forget the bindings, for `Reset` and teardown.
    pub(crate) fn reset_pass(&self) {
        let transition = self.pass.lock().tracker.reset();
        self.dispatch_transition(transition);
    }

    /// Record the primitive type of a draw. Returns `true` when it changed.
    pub(crate) fn set_topology(&self, ty: D3dPrimitiveType) -> bool {
        std::mem::replace(&mut self.pass.lock().topology, ty) != ty
    }

    fn dispatch_transition(&self, transition: PassTransition) {
        if !self.config.track_render_passes {
            return;
        }
        let device: &dyn DeviceApi = self;
        let cmd = self.command_list();
        transition.dispatch(
            |attachments| {
                self.addons
                    .notify(|addon| addon.on_begin_render_pass(device, cmd, attachments))
            },
            || self.addons.notify(|addon| addon.on_finish_render_pass(device, cmd)),
        );
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Release every object the layer owns and drop all records.
    ///
    /// Returns the number of application objects that were still
    /// registered; their references belong to the application.
    pub fn release_all(&self) -> usize {
        let mut tables = self.registry.lock();
        let mut leaked = 0;

        for (handle, record) in tables.views.drain() {
            for _ in 0..record.refs {
                self.driver.release(ComPtr(handle));
            }
        }
        let _ = tables.surfaces.drain();
        for (handle, record) in tables.resources.drain() {
            if record.owned {
                self.driver.release(ComPtr(handle));
            } else {
                leaked += 1;
            }
        }
        let _ = tables.samplers.drain();
        for (_, record) in tables.pipelines.drain() {
            match record.bundle {
                Some(bundle) => self.release_bundle(&bundle),
                None => leaked += 1,
            }
        }

        if leaked > 0 {
            log::warn!(
                "D3D9Device: {} application objects still alive at device destruction",
                leaked
            );
        }
        leaked
    }

    fn release_bundle(&self, bundle: &StateBundle) {
        for object in bundle.objects() {
            self.driver.release(object);
        }
    }

    /// Final release of the proxy: destroy events in reverse creation order,
    /// then the records.
    fn teardown(&self) {
        self.reset_pass();
        let api: &dyn DeviceApi = self;
        let swapchain = self.swapchain();
        if !swapchain.is_null() {
            self.addons
                .notify(|addon| addon.on_destroy_swapchain(api, swapchain));
        }
        self.destroy_swapchain();
        let cmd = self.command_list();
        let queue = self.command_queue();
        self.addons
            .notify(|addon| addon.on_destroy_command_list(api, cmd));
        self.addons
            .notify(|addon| addon.on_destroy_command_queue(api, queue));
        self.addons.notify(|addon| addon.on_destroy_device(api));
        self.release_all();
    }

    // ========================================================================
    // Resource creation helpers
    // ========================================================================

    fn create_texture_object(
        &self,
        native: &SurfaceDesc,
        levels: u32,
        texture: &TextureDesc,
        initial_data: Option<&[SubresourceData<'_>]>,
    ) -> ApiResult<ComPtr> {
        let cube = native.ty == D3DRTYPE_CUBETEXTURE;
        let create = |desc: &SurfaceDesc| {
            if cube {
                self.driver.create_cube_texture(desc, levels)
            } else {
                self.driver.create_texture(desc, levels)
            }
        };
        let data = initial_data
            .map(|data| check_initial_data(texture, data))
            .transpose()?;

        let object = create(native).map_err(hresult_to_api_error)?;
        let Some(data) = data else {
            return Ok(object);
        };

        let uploaded = if is_lockable(native.pool, native.usage) {
            self.write_texture(object, cube, levels, data)
        } else {
            let staging = SurfaceDesc {
                usage: 0,
                pool: D3DPOOL_SYSTEMMEM,
                ..*native
            };
            create(&staging).and_then(|staging| {
                let result = self
                    .write_texture(staging, cube, levels, data)
                    .and_then(|()| check(self.driver.update_texture(staging, object)));
                self.driver.release(staging);
                result
            })
        };
        if let Err(hr) = uploaded {
            log::warn!(
                "D3D9Device: failed to initialize {} pool texture {:#x}: {:#010x}",
                pool_name(native.pool),
                object.raw(),
                hr as u32
            );
            self.driver.release(object);
            return Err(hresult_to_api_error(hr));
        }
        Ok(object)
    }

    fn write_texture(
        &self,
        texture: ComPtr,
        cube: bool,
        levels: u32,
        data: &[SubresourceData<'_>],
    ) -> Result<(), HResult> {
        let levels = levels.max(1);
        for (index, subresource) in data.iter().enumerate() {
            let index = index as u32;
            let (level, layer) = (index % levels, index / levels);
            let of = if cube {
                SurfaceOf::Cube { face: layer, level }
            } else {
                SurfaceOf::Texture { level }
            };
            self.driver
                .write_texture_level(texture, of, subresource.data, subresource.row_pitch)?;
        }
        Ok(())
    }

    fn create_volume_object(
        &self,
        native: &VolumeDesc,
        levels: u32,
        texture: &TextureDesc,
        initial_data: Option<&[SubresourceData<'_>]>,
    ) -> ApiResult<ComPtr> {
        let data = initial_data
            .map(|data| check_initial_data(texture, data))
            .transpose()?;
        let object = self
            .driver
            .create_volume_texture(native, levels)
            .map_err(hresult_to_api_error)?;
        let Some(data) = data else {
            return Ok(object);
        };

        let write = |target: ComPtr| -> Result<(), HResult> {
            for (level, subresource) in data.iter().enumerate() {
                self.driver.write_volume_level(
                    target,
                    level as u32,
                    subresource.data,
                    subresource.row_pitch,
                    subresource.slice_pitch,
                )?;
            }
            Ok(())
        };
        let uploaded = if is_lockable(native.pool, native.usage) {
            write(object)
        } else {
            let staging = VolumeDesc {
                usage: 0,
                pool: D3DPOOL_SYSTEMMEM,
                ..*native
            };
            self.driver
                .create_volume_texture(&staging, levels)
                .and_then(|staging| {
                    let result = write(staging)
                        .and_then(|()| check(self.driver.update_texture(staging, object)));
                    self.driver.release(staging);
                    result
                })
        };
        if let Err(hr) = uploaded {
            log::warn!(
                "D3D9Device: failed to initialize volume texture {:#x}: {:#010x}",
                object.raw(),
                hr as u32
            );
            self.driver.release(object);
            return Err(hresult_to_api_error(hr));
        }
        Ok(object)
    }

    fn create_surface_object(
        &self,
        native: &SurfaceDesc,
        initial_data: Option<&[SubresourceData<'_>]>,
    ) -> ApiResult<ComPtr> {
        if initial_data.is_some() {
            return Err(ApiError::InvalidParameter(
                "initial data for a render target or depth-stencil surface".into(),
            ));
        }
        let created = if native.usage & D3DUSAGE_DEPTHSTENCIL != 0 {
            self.driver.create_depth_stencil_surface(native, false)
        } else if native.usage & D3DUSAGE_RENDERTARGET != 0 {
            self.driver.create_render_target(native, false)
        } else {
            return Err(ApiError::Unsupported(
                "surfaces that are neither render targets nor depth-stencil".into(),
            ));
        };
        created.map_err(hresult_to_api_error)
    }

    fn create_buffer_object(
        &self,
        native: &BufferDesc,
        initial_data: Option<&[SubresourceData<'_>]>,
    ) -> ApiResult<ComPtr> {
        let data = match initial_data.and_then(|data| data.first()) {
            Some(first) if first.data.len() > native.size as usize => {
                return Err(ApiError::InvalidParameter(format!(
                    "{} bytes of initial data for a buffer of {} bytes",
                    first.data.len(),
                    native.size
                )));
            }
            Some(first) => Some(first.data),
            None => None,
        };
        let buffer = if native.ty == D3DRTYPE_INDEXBUFFER {
            self.driver.create_index_buffer(native)
        } else {
            self.driver.create_vertex_buffer(native)
        }
        .map_err(hresult_to_api_error)?;

        if let Some(bytes) = data {
            if let Err(hr) = self.driver.write_buffer(buffer, bytes) {
                log::warn!(
                    "D3D9Device: failed to initialize buffer {:#x}: {:#010x}",
                    buffer.raw(),
                    hr as u32
                );
                self.driver.release(buffer);
                return Err(hresult_to_api_error(hr));
            }
        }
        Ok(buffer)
    }

    /// Register a new owned object, releasing it if that fails.
    fn finish_resource(
        &self,
        object: ComPtr,
        desc: &ResourceDesc,
        native: &NativeDesc,
    ) -> ApiResult<Resource> {
        if !self.register_resource(object, *desc, true) {
            self.driver.release(object);
            return Err(ApiError::InvalidParameter(format!(
                "resource {:#x} is already registered",
                object.raw()
            )));
        }
        if let NativeDesc::Texture { desc: native, levels } = native {
            if native.usage & (D3DUSAGE_RENDERTARGET | D3DUSAGE_DEPTHSTENCIL) != 0 {
                self.register_surface_levels(object, native.ty == D3DRTYPE_CUBETEXTURE, *levels);
            }
        }
        log::trace!("D3D9Device: created resource {:#x}", object.raw());
        Ok(Resource(object.raw()))
    }

    /// Surface a render target or depth-stencil view of `resource` refers to,
    /// carrying one reference.
    fn attachment_surface(
        &self,
        resource: Resource,
        resource_desc: &ResourceDesc,
        texture: &TextureDesc,
        desc: &ResourceViewDesc,
    ) -> ApiResult<ComPtr> {
        let object = ComPtr(resource.raw());
        match texture.dimension {
            TextureDimension::Surface => {
                self.driver.add_ref(object);
                return Ok(object);
            }
            TextureDimension::D3 => {
                return Err(ApiError::Unsupported(
                    "attachment views of volume textures".into(),
                ))
            }
            TextureDimension::D1 | TextureDimension::D2 => {}
        }
        let (level, _, layer, _) = desc
            .resolved_texture_range(u32::from(texture.levels), texture.layers())
            .ok_or_else(|| ApiError::InvalidParameter("buffer range for a texture view".into()))?;
        let of = if resource_desc
            .flags
            .contains(lumen_core::resource::ResourceFlags::CUBE_COMPATIBLE)
        {
            SurfaceOf::Cube { face: layer, level }
        } else {
            SurfaceOf::Texture { level }
        };
        self.driver
            .get_surface(object, of)
            .map_err(hresult_to_api_error)
    }

    /// Sampler states of a sampler created through [`DeviceApi`].
    pub fn sampler_states(&self, sampler: Sampler) -> Option<SamplerStates> {
        self.registry
            .lock()
            .samplers
            .get(sampler.raw())
            .map(|record| record.states.clone())
    }
}

/// Whether a texture can be locked directly instead of going through a
/// system memory copy and `UpdateTexture`.
fn is_lockable(pool: D3dPool, usage: D3dUsage) -> bool {
    pool != D3DPOOL_DEFAULT || usage & D3DUSAGE_DYNAMIC != 0
}

/// Check that `data` covers every subresource of `texture`.
fn check_initial_data<'a, 'b>(
    texture: &TextureDesc,
    data: &'a [SubresourceData<'b>],
) -> ApiResult<&'a [SubresourceData<'b>]> {
    let count = texture.subresource_count() as usize;
    if data.len() < count {
        return Err(ApiError::InvalidParameter(format!(
            "{} subresources of initial data for {} subresources",
            data.len(),
            count
        )));
    }

    let levels = u32::from(texture.levels).max(1);
    for (index, subresource) in data.iter().take(count).enumerate() {
        let level = index as u32 % levels;
        let row_bytes = texture.format.row_pitch(texture.level_width(level)) as usize;
        let height = texture.level_height(level);
        let rows = if texture.format.is_compressed() {
            height.div_ceil(4)
        } else {
            height
        } as usize;
        let depth = texture.level_depth(level) as usize;
        let row_pitch = match subresource.row_pitch as usize {
            0 => row_bytes,
            pitch => pitch,
        };
        let slice_pitch = match subresource.slice_pitch as usize {
            0 => row_pitch * rows,
            pitch => pitch,
        };
        let required = slice_pitch * (depth - 1) + row_pitch * (rows - 1) + row_bytes;
        if subresource.data.len() < required {
            return Err(ApiError::InvalidParameter(format!(
                "{} bytes of initial data for subresource {}, {} required",
                subresource.data.len(),
                index,
                required
            )));
        }
    }
    Ok(&data[..count])
}

// ============================================================================
// DeviceApi
// ============================================================================

impl DeviceApi for D3D9Device {
    fn api(&self) -> GraphicsApi {
        GraphicsApi::D3D9
    }

    fn native(&self) -> u64 {
        self.driver.device().raw()
    }

    fn check_capability(&self, capability: DeviceCaps) -> bool {
        let caps = self.driver.caps();
        match capability {
            DeviceCaps::IndependentBlend => caps.independent_write_masks,
            DeviceCaps::SamplerAnisotropic => caps.max_anisotropy > 1,
            DeviceCaps::FillModeNonSolid
            | DeviceCaps::PartialPushConstantUpdates
            | DeviceCaps::DrawInstanced
            | DeviceCaps::Blit
            | DeviceCaps::ResolveRegion
            | DeviceCaps::SamplerWithResourceView
            | DeviceCaps::SharedResource => true,
            DeviceCaps::ComputeShader
            | DeviceCaps::GeometryShader
            | DeviceCaps::HullAndDomainShader
            | DeviceCaps::LogicOp
            | DeviceCaps::DualSourceBlend
            | DeviceCaps::MultiViewport
            | DeviceCaps::DrawOrDispatchIndirect
            | DeviceCaps::CopyBufferRegion
            | DeviceCaps::CopyBufferToTexture
            | DeviceCaps::SamplerCompare
            | DeviceCaps::DescriptorSets => false,
        }
    }

    fn check_format_support(&self, format: Format, usage: ResourceUsage) -> bool {
        let native = convert_format(format);
        if native == D3DFMT_UNKNOWN || usage.contains(ResourceUsage::UNORDERED_ACCESS) {
            return false;
        }
        let mut d3d_usage = 0;
        if usage.contains(ResourceUsage::RENDER_TARGET) {
            d3d_usage |= D3DUSAGE_RENDERTARGET;
        }
        if usage.intersects(ResourceUsage::DEPTH_STENCIL) {
            d3d_usage |= D3DUSAGE_DEPTHSTENCIL;
        }
        self.driver
            .check_device_format(d3d_usage, D3DRTYPE_TEXTURE, native)
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> ApiResult<Sampler> {
        let max_anisotropy = self.driver.caps().max_anisotropy.max(1);
        let mut states = convert_sampler_desc(desc);
        for (state, value) in states.iter_mut() {
            if *state == D3DSAMP_MAXANISOTROPY {
                *value = (*value).min(max_anisotropy);
            }
        }
        let handle = (self.next_sampler.fetch_add(1, Ordering::Relaxed) << 4) | 1;
        self.registry
            .lock()
            .samplers
            .register(handle, SamplerRecord { desc: *desc, states })
            .map_err(|e| ApiError::InvalidParameter(e.to_string()))?;
        Ok(Sampler(handle))
    }

    fn destroy_sampler(&self, sampler: Sampler) {
        if sampler.is_null() {
            return;
        }
        if self.registry.lock().samplers.unregister(sampler.raw()).is_none() {
            log::warn!("D3D9Device: destroying unknown sampler {:#x}", sampler.raw());
        }
    }

    fn create_resource(
        &self,
        desc: &ResourceDesc,
        initial_data: Option<&[SubresourceData<'_>]>,
        _initial_state: ResourceUsage,
    ) -> ApiResult<Resource> {
        log::trace!("D3D9Device: creating {:?}", desc.ty());
        let native = convert_resource_desc(desc)?;
        let object = match (&native, desc.as_texture()) {
            (NativeDesc::Texture { desc: surface, levels }, Some(texture)) => {
                self.create_texture_object(surface, *levels, texture, initial_data)?
            }
            (NativeDesc::Volume { desc: volume, levels }, Some(texture)) => {
                self.create_volume_object(volume, *levels, texture, initial_data)?
            }
            (NativeDesc::Surface(surface), _) => self.create_surface_object(surface, initial_data)?,
            (NativeDesc::Buffer(buffer), _) => self.create_buffer_object(buffer, initial_data)?,
            (_, None) => {
                return Err(ApiError::InvalidParameter(
                    "texture object for a buffer description".into(),
                ))
            }
        };
        self.finish_resource(object, desc, &native)
    }

    /// Application resources are only unregistered; their references stay
    /// with the application.
    fn destroy_resource(&self, resource: Resource) {
        if resource.is_null() {
            return;
        }
        let record = {
            let mut tables = self.registry.lock();
            let _ = tables
                .surfaces
                .drain_where(|_, surface| surface.container == resource);
            tables.resources.unregister(resource.raw())
        };
        match record {
            Some(record) if record.owned => {
                self.driver.release(ComPtr(resource.raw()));
            }
            Some(_) => {}
            None => log::warn!("D3D9Device: destroying unknown resource {:#x}", resource.raw()),
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
        let ResourceKind::Texture(texture) = resource_desc.kind else {
            return Err(ApiError::Unsupported("buffer views".into()));
        };
        let mut desc = *desc;
        if desc.format == Format::Unknown {
            desc.format = texture.format;
        }

        let view = if usage_type
            .intersects(ResourceUsage::RENDER_TARGET | ResourceUsage::DEPTH_STENCIL)
        {
            self.attachment_surface(resource, &resource_desc, &texture, &desc)?
        } else if usage_type.intersects(ResourceUsage::SHADER_RESOURCE) {
            if texture.dimension == TextureDimension::Surface {
                return Err(ApiError::Unsupported(
                    "shader resource views of surfaces".into(),
                ));
            }
            let levels = u32::from(texture.levels).max(1);
            let whole = desc.resolved_texture_range(levels, texture.layers())
                == Some((0, levels, 0, texture.layers()));
            if !whole {
                return Err(ApiError::Unsupported(
                    "shader resource views of part of a texture".into(),
                ));
            }
            let object = ComPtr(resource.raw());
            self.driver.add_ref(object);
            object
        } else {
            return Err(ApiError::InvalidParameter(format!(
                "view usage {:?}",
                usage_type
            )));
        };

        let mut tables = self.registry.lock();
        match tables.views.get_mut(view.raw()) {
            Some(record) => record.refs += 1,
            None => {
                let _ = tables.views.register(
                    view.raw(),
                    ViewRecord {
                        resource,
                        desc,
                        usage: usage_type,
                        refs: 1,
                    },
                );
            }
        }
        Ok(ResourceView(view.raw()))
    }

    fn destroy_resource_view(&self, view: ResourceView) {
        if view.is_null() {
            return;
        }
        let remaining = {
            let mut tables = self.registry.lock();
            let remaining = tables.views.get_mut(view.raw()).map(|record| {
                record.refs -= 1;
                record.refs
            });
            if remaining == Some(0) {
                tables.views.unregister(view.raw());
            }
            remaining
        };
        match remaining {
            Some(_) => {
                self.driver.release(ComPtr(view.raw()));
            }
            None => log::warn!("D3D9Device: destroying unknown resource view {:#x}", view.raw()),
        }
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> ApiResult<Pipeline> {
        let bundle = pipeline::build_pipeline(self.driver.as_ref(), desc)?;
        let record = PipelineRecord {
            stages: desc.stages(),
            bundle: Some(bundle),
        };
        if let Err(e) = self
            .registry
            .lock()
            .pipelines
            .register(bundle.state_block.raw(), record)
        {
            self.release_bundle(&bundle);
            return Err(ApiError::InvalidParameter(e.to_string()));
        }
        Ok(Pipeline(bundle.state_block.raw()))
    }

    fn destroy_pipeline(&self, pipeline: Pipeline) {
        if pipeline.is_null() {
            return;
        }
        let record = self.registry.lock().pipelines.unregister(pipeline.raw());
        match record {
            Some(PipelineRecord {
                bundle: Some(bundle),
                ..
            }) => self.release_bundle(&bundle),
            Some(_) => {}
            None => log::warn!("D3D9Device: destroying unknown pipeline {:#x}", pipeline.raw()),
        }
    }

    fn get_resource_desc(&self, resource: Resource) -> Option<ResourceDesc> {
        let tables = self.registry.lock();
        tables
            .resources
            .get(resource.raw())
            .map(|record| record.desc)
            .or_else(|| tables.surfaces.get(resource.raw()).map(|record| record.desc))
    }

    fn get_resource_from_view(&self, view: ResourceView) -> Option<Resource> {
        let tables = self.registry.lock();
        if let Some(record) = tables.views.get(view.raw()) {
            return Some(record.resource);
        }
        if let Some(surface) = tables.surfaces.get(view.raw()) {
            return Some(surface.container);
        }
        tables
            .resources
            .get(view.raw())
            .filter(|record| is_surface(&record.desc))
            .map(|_| Resource(view.raw()))
    }

    fn get_resource_view_desc(&self, view: ResourceView) -> Option<ResourceViewDesc> {
        let tables = self.registry.lock();
        if let Some(record) = tables.views.get(view.raw()) {
            return Some(record.desc);
        }
        if let Some(surface) = tables.surfaces.get(view.raw()) {
            return Some(surface.view_desc());
        }
        tables
            .resources
            .get(view.raw())
            .filter(|record| is_surface(&record.desc))
            .map(|record| ResourceViewDesc::for_resource(&record.desc))
    }

    fn is_resource_handle_valid(&self, resource: Resource) -> bool {
        self.registry.lock().resources.contains(resource.raw())
    }

    fn is_resource_view_handle_valid(&self, view: ResourceView) -> bool {
        let tables = self.registry.lock();
        tables.views.contains(view.raw())
            || tables.surfaces.contains(view.raw())
            || tables
                .resources
                .get(view.raw())
                .is_some_and(|record| is_surface(&record.desc))
    }
}

// ============================================================================
// IUnknown
// ============================================================================

impl Unknown for D3D9Device {
    fn query_interface(&self, iid: &Guid) -> Result<Queried, HResult> {
        let native = self.driver.device();
        if *iid == IID_IUNKNOWN || *iid == IID_IDIRECT3DDEVICE9 {
            self.add_ref();
            return Ok(Queried::Proxy);
        }
        if *iid == IID_IDIRECT3DDEVICE9EX {
            if !self.is_extended() {
                let upgraded = self.driver.query_interface(native, iid)?;
                // The proxy keeps counting through the original pointer.
                self.driver.release(upgraded);
                self.extended.store(true, Ordering::Release);
                log::debug!("D3D9Device: upgraded device {:#x} to IDirect3DDevice9Ex", native.raw());
            }
            self.add_ref();
            return Ok(Queried::Proxy);
        }
        self.driver.query_interface(native, iid).map(Queried::Native)
    }

    fn add_ref(&self) -> u32 {
        add_ref_proxy(&self.refs, self.driver.as_ref(), self.driver.device())
    }

    fn release(&self) -> u32 {
        release_proxy(
            &self.refs,
            self.driver.as_ref(),
            self.driver.device(),
            "IDirect3DDevice9",
            0,
            || self.teardown(),
        )
    }
}

static_assertions::assert_impl_all!(D3D9Device: Send, Sync);

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::com::E_NOINTERFACE;
    use crate::backend::d3d9::driver::PresentParameters;
    use crate::backend::d3d9::dummy::DummyD3D9;
    use lumen_core::pipeline::{GraphicsPipelineDesc, ShaderDesc};
    use lumen_core::resource::{ResourceFlags, ALL_REMAINING};
    use lumen_core::MemoryHeap;

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

    fn device_with(dummy: DummyD3D9) -> (Arc<DummyD3D9>, D3D9Device) {
        let dummy = Arc::new(dummy);
        let device = D3D9Device::new(
            dummy.clone(),
            Arc::new(AddonRegistry::new()),
            LayerConfig::default(),
        );
        (dummy, device)
    }

    fn device() -> (Arc<DummyD3D9>, D3D9Device) {
        device_with(DummyD3D9::new(&params()))
    }

    fn render_target_desc() -> ResourceDesc {
        ResourceDesc::texture(TextureDimension::D2, 256, 256, Format::R8G8B8A8Unorm)
            .with_levels(9)
            .with_usage(ResourceUsage::RENDER_TARGET | ResourceUsage::SHADER_RESOURCE)
    }

    fn sampled_desc() -> ResourceDesc {
        ResourceDesc::texture(TextureDimension::D2, 4, 4, Format::R8G8B8A8Unorm)
            .with_heap(MemoryHeap::GpuOnly)
            .with_usage(ResourceUsage::SHADER_RESOURCE)
    }

    #[test]
    fn test_render_target_texture_records_each_level() {
        let (dummy, device) = device();
        let texture = device
            .create_resource(&render_target_desc(), None, ResourceUsage::RENDER_TARGET)
            .unwrap();
        assert_eq!(device.registry().lock().surfaces.len(), 9);
        assert_eq!(device.get_resource_desc(texture), Some(render_target_desc()));

        device.destroy_resource(texture);
        assert!(device.registry().lock().is_empty());
        assert!(!dummy.objects().is_live(texture.raw()));
    }

    #[test]
    fn test_application_texture_full_chain() {
        let (dummy, device) = device();
        let desc = SurfaceDesc {
            format: D3DFMT_A8R8G8B8,
            ty: D3DRTYPE_TEXTURE,
            usage: D3DUSAGE_RENDERTARGET,
            width: 256,
            height: 256,
            ..Default::default()
        };
        let texture = dummy.create_texture(&desc, 0).unwrap();
        let recorded = device.register_texture(texture, &desc, 0);
        assert_eq!(recorded.as_texture().unwrap().levels, 9);

        let tables = device.registry().lock();
        assert_eq!(tables.surfaces.len(), 9);
        assert!(tables
            .surfaces
            .iter()
            .all(|(_, surface)| surface.container == Resource(texture.raw())));
        let (_, smallest) = tables
            .surfaces
            .iter()
            .find(|(_, surface)| surface.level == 8)
            .unwrap();
        assert_eq!(smallest.desc.as_texture().unwrap().width, 1);
    }

    #[test]
    fn test_surface_levels_can_be_skipped() {
        let dummy = Arc::new(DummyD3D9::new(&params()));
        let device = D3D9Device::new(
            dummy.clone(),
            Arc::new(AddonRegistry::new()),
            LayerConfig::default().with_register_surface_levels(false),
        );
        device
            .create_resource(&render_target_desc(), None, ResourceUsage::RENDER_TARGET)
            .unwrap();
        assert!(device.registry().lock().surfaces.is_empty());
    }

    #[test]
    fn test_default_pool_upload_goes_through_system_memory() {
        let (dummy, device) = device();
        let pixels = [0u8; 64];
        let data = [SubresourceData::new(&pixels, 16, 0)];
        let texture = device
            .create_resource(&sampled_desc(), Some(&data), ResourceUsage::SHADER_RESOURCE)
            .unwrap();

        assert!(dummy.calls_on(ComPtr(texture.raw())).contains(&"UpdateTexture"));
        assert_eq!(dummy.objects().live_of_kind("texture"), 1);
        assert_eq!(dummy.uploads().len(), 1);
        assert_ne!(dummy.uploads()[0].0, texture.raw());
    }

    #[test]
    fn test_dynamic_texture_is_written_directly() {
        let (dummy, device) = device();
        let desc = sampled_desc().with_flags(ResourceFlags::DYNAMIC);
        let pixels = [0u8; 64];
        let data = [SubresourceData::new(&pixels, 16, 0)];
        let texture = device
            .create_resource(&desc, Some(&data), ResourceUsage::SHADER_RESOURCE)
            .unwrap();
        assert_eq!(dummy.uploads(), vec![(texture.raw(), 64)]);
        assert!(!dummy.calls().contains(&"UpdateTexture"));
    }

    #[test]
    fn test_out_of_memory_leaves_nothing_behind() {
        let pixels = [0u8; 64];
        let data = [SubresourceData::new(&pixels, 16, 0)];
        for successes in 0..2 {
            let (dummy, device) = device();
            let baseline = dummy.objects().live_count();
            dummy.objects().fail_after(successes);
            let result =
                device.create_resource(&sampled_desc(), Some(&data), ResourceUsage::SHADER_RESOURCE);
            assert_eq!(result, Err(ApiError::OutOfMemory));
            assert!(device.registry().lock().is_empty());
            assert_eq!(dummy.objects().live_count(), baseline);
        }
    }

    #[test]
    fn test_short_initial_data_rejected_before_creation() {
        let (dummy, device) = device();
        let baseline = dummy.objects().live_count();
        let pixels = [0u8; 16];
        let data = [SubresourceData::new(&pixels, 16, 0)];
        let result =
            device.create_resource(&sampled_desc(), Some(&data), ResourceUsage::SHADER_RESOURCE);
        assert!(matches!(result, Err(ApiError::InvalidParameter(_))));
        assert_eq!(dummy.objects().live_count(), baseline);
    }

    #[test]
    fn test_buffer_upload_and_size_check() {
        let (dummy, device) = device();
        let desc = ResourceDesc::buffer(16).with_usage(ResourceUsage::VERTEX_BUFFER);
        let bytes = [1u8; 16];
        let buffer = device
            .create_resource(&desc, Some(&[SubresourceData::new(&bytes, 0, 0)]), ResourceUsage::VERTEX_BUFFER)
            .unwrap();
        assert_eq!(dummy.uploads(), vec![(buffer.raw(), 16)]);

        let too_much = [1u8; 32];
        let result = device.create_resource(
            &desc,
            Some(&[SubresourceData::new(&too_much, 0, 0)]),
            ResourceUsage::VERTEX_BUFFER,
        );
        assert!(matches!(result, Err(ApiError::InvalidParameter(_))));
        assert_eq!(device.registry().lock().resources.len(), 1);
    }

    #[test]
    fn test_surface_with_initial_data_rejected() {
        let (_dummy, device) = device();
        let desc = ResourceDesc::texture(TextureDimension::Surface, 8, 8, Format::R8G8B8A8Unorm)
            .with_usage(ResourceUsage::RENDER_TARGET);
        let pixels = [0u8; 256];
        let result = device.create_resource(
            &desc,
            Some(&[SubresourceData::new(&pixels, 32, 0)]),
            ResourceUsage::RENDER_TARGET,
        );
        assert!(matches!(result, Err(ApiError::InvalidParameter(_))));
        assert!(device.registry().lock().is_empty());
    }

    #[test]
    fn test_render_target_views_share_surfaces() {
        let (_dummy, device) = device();
        let texture = device
            .create_resource(&render_target_desc(), None, ResourceUsage::RENDER_TARGET)
            .unwrap();
        let desc = ResourceViewDesc::texture(ResourceViewType::Texture2d, Format::Unknown, 1, 1, 0, 1);
        let first = device
            .create_resource_view(texture, ResourceUsage::RENDER_TARGET, &desc)
            .unwrap();
        let second = device
            .create_resource_view(texture, ResourceUsage::RENDER_TARGET, &desc)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(device.get_resource_from_view(first), Some(texture));
        assert_eq!(
            device.get_resource_view_desc(first).map(|desc| desc.format),
            Some(Format::R8G8B8A8Unorm)
        );

        device.destroy_resource_view(first);
        assert!(device.registry().lock().views.contains(second.raw()));
        device.destroy_resource_view(second);
        assert!(!device.registry().lock().views.contains(second.raw()));
        // The level is still known through the texture's surface records.
        assert!(device.is_resource_view_handle_valid(second));
    }

    #[test]
    fn test_view_outlives_destroyed_resource() {
        let (dummy, device) = device();
        let texture = device
            .create_resource(&sampled_desc(), None, ResourceUsage::SHADER_RESOURCE)
            .unwrap();
        let desc = ResourceViewDesc::texture(
            ResourceViewType::Texture2d,
            Format::Unknown,
            0,
            ALL_REMAINING,
            0,
            ALL_REMAINING,
        );
        let view = device
            .create_resource_view(texture, ResourceUsage::SHADER_RESOURCE, &desc)
            .unwrap();

        device.destroy_resource(texture);
        assert!(!device.is_resource_handle_valid(texture));
        assert!(device.is_resource_view_handle_valid(view));
        assert_eq!(device.get_resource_from_view(view), Some(texture));
        assert!(dummy.objects().is_live(texture.raw()));

        device.destroy_resource_view(view);
        assert!(!dummy.objects().is_live(texture.raw()));
    }

    #[test]
    fn test_partial_shader_view_unsupported() {
        let (_dummy, device) = device();
        let texture = device
            .create_resource(&render_target_desc(), None, ResourceUsage::RENDER_TARGET)
            .unwrap();
        let desc = ResourceViewDesc::texture(ResourceViewType::Texture2d, Format::Unknown, 2, 1, 0, 1);
        let result = device.create_resource_view(texture, ResourceUsage::SHADER_RESOURCE, &desc);
        assert!(matches!(result, Err(ApiError::Unsupported(_))));
    }

    #[test]
    fn test_sampler_anisotropy_clamped_to_caps() {
        let (_dummy, device) = device();
        let desc = SamplerDesc {
            max_anisotropy: 64.0,
            ..Default::default()
        };
        let sampler = device.create_sampler(&desc).unwrap();
        let states = device.sampler_states(sampler).unwrap();
        assert!(states.contains(&(D3DSAMP_MAXANISOTROPY, 16)));

        device.destroy_sampler(sampler);
        assert!(device.sampler_states(sampler).is_none());
    }

    #[test]
    fn test_pipeline_objects_released_on_destroy() {
        let (dummy, device) = device();
        let desc = PipelineDesc::Graphics(Box::new(GraphicsPipelineDesc {
            vs: ShaderDesc::new(vec![0u8; 8]),
            ps: ShaderDesc::new(vec![0u8; 8]),
            ..Default::default()
        }));
        let baseline = dummy.objects().live_count();
        let pipeline = device.create_pipeline(&desc).unwrap();
        assert!(dummy.objects().live_count() > baseline);

        device.destroy_pipeline(pipeline);
        assert_eq!(dummy.objects().live_count(), baseline);
    }

    #[test]
    fn test_release_all_counts_application_objects() {
        let (dummy, device) = device();
        let desc = SurfaceDesc {
            format: D3DFMT_A8R8G8B8,
            ty: D3DRTYPE_TEXTURE,
            width: 8,
            height: 8,
            ..Default::default()
        };
        let app_texture = dummy.create_texture(&desc, 1).unwrap();
        device.register_texture(app_texture, &desc, 1);
        let owned = device
            .create_resource(&sampled_desc(), None, ResourceUsage::SHADER_RESOURCE)
            .unwrap();

        assert_eq!(device.release_all(), 1);
        assert!(device.registry().lock().is_empty());
        assert!(dummy.objects().is_live(app_texture.raw()));
        assert!(!dummy.objects().is_live(owned.raw()));
    }

    #[test]
    fn test_swapchain_surfaces_are_application_owned() {
        let (dummy, device) = device();
        let swapchain = device.init_swapchain().unwrap();
        assert_eq!(swapchain, SwapChain(dummy.swap_chain().raw()));
        let back_buffer = device.back_buffer().unwrap();
        assert_eq!(back_buffer.raw(), dummy.back_buffer().raw());
        assert_eq!(dummy.ref_count(dummy.back_buffer()), 1);
        assert!(device.is_resource_view_handle_valid(ResourceView(back_buffer.raw())));

        assert_eq!(device.destroy_swapchain(), Some(swapchain));
        assert!(device.registry().lock().is_empty());
    }

    #[test]
    fn test_capabilities() {
        let (_dummy, device) = device();
        assert!(device.check_capability(DeviceCaps::Blit));
        assert!(device.check_capability(DeviceCaps::SamplerAnisotropic));
        assert!(!device.check_capability(DeviceCaps::ComputeShader));
        assert!(!device.check_capability(DeviceCaps::DescriptorSets));
        assert!(device.check_format_support(Format::R8G8B8A8Unorm, ResourceUsage::RENDER_TARGET));
        assert!(!device.check_format_support(Format::R8G8B8A8Unorm, ResourceUsage::UNORDERED_ACCESS));
    }

    #[test]
    fn test_query_interface_upgrades_to_ex() {
        let (dummy, device) = device_with(DummyD3D9::new(&params()).with_ex());
        let native = device.native_device();
        assert_eq!(device.query_interface(&IID_IDIRECT3DDEVICE9EX), Ok(Queried::Proxy));
        assert!(device.is_extended());
        assert_eq!(device.ref_count(), 2);
        assert_eq!(dummy.ref_count(native), 2);

        let unknown = Guid::new(1, 2, 3, [0; 8]);
        assert_eq!(device.query_interface(&unknown), Err(E_NOINTERFACE));
        assert_eq!(device.ref_count(), 2);
    }

    #[test]
    fn test_ex_unavailable_without_driver_support() {
        let (_dummy, device) = device();
        assert_eq!(device.query_interface(&IID_IDIRECT3DDEVICE9EX), Err(E_NOINTERFACE));
        assert!(!device.is_extended());
        assert_eq!(device.ref_count(), 1);
    }

    #[test]
    fn test_final_release_destroys_device() {
        let (dummy, device) = device();
        device.init_swapchain().unwrap();
        device
            .create_resource(&sampled_desc(), None, ResourceUsage::SHADER_RESOURCE)
            .unwrap();
        assert_eq!(device.add_ref(), 2);
        assert_eq!(device.release(), 1);
        assert_eq!(device.release(), 0);
        assert!(device.registry().lock().is_empty());
        assert_eq!(dummy.objects().live_count(), 0);
    }
}
