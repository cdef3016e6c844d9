//! Abstract device of an `ID3D11Device` or `ID3D10Device`.
//!
//! [`D3D11Device`] is the proxy the application receives in place of the
//! driver's device. It keeps the handle registry and implements
//! [`DeviceApi`] for add-ons.
//!
//! The immediate context is both the command list and the command queue of
//! the device. It is not a separate wrapper: its proxy reference count and
//! render pass state live here, and the service maps the context pointer to
//! this device. On Direct3D 10 the device is its own context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lumen_core::pipeline::{PipelineDesc, ShaderStage};
use lumen_core::sampler::SamplerDesc;
use lumen_core::{
    AddonRegistry, ApiError, ApiResult, CommandList, CommandQueue, DeviceApi, DeviceCaps, Format,
    GraphicsApi, HandleRegistry, LayerConfig, ObjectTable, PassTransition, RenderPassAttachments,
    RenderPassTracker, ResourceDesc, ResourceKind, ResourceUsage, ResourceViewDesc,
    SubresourceData, TextureDesc as AbstractTextureDesc,
};
use lumen_core::{Pipeline, Resource, ResourceView, Sampler, SwapChain};
use parking_lot::Mutex;

use super::conversion::*;
use super::driver::{
    device_interface_name, D3D11Driver, InitialData, IID_ID3D10DEVICE, IID_ID3D10DEVICE1,
    IID_ID3D11DEVICE, IID_ID3D11DEVICE1, IID_ID3D11DEVICECONTEXT, IID_ID3D11DEVICECONTEXT1,
};
use super::pipeline::{build_pipeline, StateBundle};
use crate::backend::com::{
    add_ref_proxy, hresult_to_api_error, release_proxy, ComPtr, Guid, HResult, ProxyRefCount,
    Queried, Unknown, IID_IUNKNOWN,
};
use crate::backend::d3d_state::{convert_native_sampler_desc, convert_sampler_desc};
use crate::backend::dxgi::convert_format;

// ============================================================================
// Records
// ============================================================================

/// Buffer or texture known to the layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    pub desc: ResourceDesc,
    /// Created through [`DeviceApi`]; the layer holds its only reference.
    pub owned: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewRecord {
    /// Weak link: the resource may already be destroyed.
    pub resource: Resource,
    pub kind: ViewKind,
    pub desc: ResourceViewDesc,
    pub owned: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerRecord {
    pub desc: SamplerDesc,
    pub owned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineRecord {
    pub stages: ShaderStage,
    /// Objects of a pipeline the layer built. Application shaders and state
    /// objects carry none.
    pub bundle: Option<StateBundle>,
}

/// Registry tables of one device, guarded by one lock.
#[derive(Debug)]
pub struct Tables {
    pub resources: ObjectTable<ResourceRecord>,
    pub views: ObjectTable<ViewRecord>,
    pub samplers: ObjectTable<SamplerRecord>,
    pub pipelines: ObjectTable<PipelineRecord>,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            resources: ObjectTable::new("resource"),
            views: ObjectTable::new("resource view"),
            samplers: ObjectTable::new("sampler"),
            pipelines: ObjectTable::new("pipeline"),
        }
    }
}

impl Tables {
    /// Number of records across all tables.
    pub fn len(&self) -> usize {
        self.resources.len() + self.views.len() + self.samplers.len() + self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A swap chain created for this device. The back buffer is tracked without
/// a reference, since extra references make `ResizeBuffers` fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SwapChainState {
    swapchain: ComPtr,
    back_buffer: ComPtr,
}

#[derive(Debug, Default)]
pub(crate) struct PassState {
    pub(crate) tracker: RenderPassTracker,
    /// Last `D3D11_PRIMITIVE_TOPOLOGY` set on the context.
    pub(crate) topology: u32,
}

// ============================================================================
// Device
// ============================================================================

/// Layer state of one `ID3D11Device` or `ID3D10Device`.
pub struct D3D11Device {
    driver: Arc<dyn D3D11Driver>,
    addons: Arc<AddonRegistry>,
    config: LayerConfig,
    registry: HandleRegistry<Tables>,
    refs: ProxyRefCount,
    context_refs: ProxyRefCount,
    extended: AtomicBool,
    context_extended: AtomicBool,
    pass: Mutex<PassState>,
    swapchains: Mutex<Vec<SwapChainState>>,
}

impl std::fmt::Debug for D3D11Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3D11Device")
            .field("api", &self.driver.api())
            .field("device", &self.driver.device())
            .field("refs", &self.refs.get())
            .field("objects", &self.registry.lock().len())
            .finish()
    }
}

impl D3D11Device {
    pub fn new(driver: Arc<dyn D3D11Driver>, addons: Arc<AddonRegistry>, config: LayerConfig) -> Self {
        log::debug!(
            "D3D11Device: wrapping {} {:#x}",
            device_interface_name(driver.api()),
            driver.device().raw()
        );
        Self {
            driver,
            addons,
            config,
            registry: HandleRegistry::new(Tables::default()),
            refs: ProxyRefCount::new(),
            context_refs: ProxyRefCount::new(),
            extended: AtomicBool::new(false),
            context_extended: AtomicBool::new(false),
            pass: Mutex::new(PassState::default()),
            swapchains: Mutex::new(Vec::new()),
        }
    }

    pub fn driver(&self) -> &dyn D3D11Driver {
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

    /// The immediate context, or the device on Direct3D 10.
    pub fn immediate_context(&self) -> ComPtr {
        self.driver.immediate_context()
    }

    pub fn command_list(&self) -> CommandList {
        CommandList(self.immediate_context().raw())
    }

    pub fn command_queue(&self) -> CommandQueue {
        CommandQueue(self.immediate_context().raw())
    }

    fn has_separate_context(&self) -> bool {
        self.immediate_context() != self.native_device()
    }

    /// Whether the application queried `ID3D11Device1` or `ID3D10Device1`.
    pub fn is_extended(&self) -> bool {
        self.extended.load(Ordering::Acquire)
    }

    /// Application references to the device proxy.
    pub fn ref_count(&self) -> u32 {
        self.refs.get()
    }

    /// References to the immediate context proxy, including the device's.
    pub fn context_ref_count(&self) -> u32 {
        self.context_refs.get()
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

    /// Track a buffer or texture the application created. Returns the
    /// description of the object the driver actually created.
    pub fn register_native_resource(&self, object: ComPtr, requested: &NativeDesc) -> ResourceDesc {
        let native = self.driver.resource_desc(object).unwrap_or(*requested);
        let desc = convert_native_desc(&native);
        self.register_resource(object, desc, false);
        desc
    }

    /// Track a view the application created. Returns the abstract view
    /// description and the viewed resource.
    pub fn register_native_view(&self, view: ComPtr) -> Option<(Resource, ResourceUsage, ResourceViewDesc)> {
        let (kind, native, resource) = self.driver.view_desc(view)?;
        let desc = convert_native_view_desc(kind, &native);
        let resource = Resource(resource.raw());
        let _ = self.registry.lock().views.register(
            view.raw(),
            ViewRecord {
                resource,
                kind,
                desc,
                owned: false,
            },
        );
        Some((resource, kind.usage(), desc))
    }

    pub fn register_native_sampler(&self, sampler: ComPtr) -> Option<SamplerDesc> {
        let desc = convert_native_sampler_desc(&self.driver.sampler_desc(sampler)?);
        let _ = self
            .registry
            .lock()
            .samplers
            .register(sampler.raw(), SamplerRecord { desc, owned: false });
        Some(desc)
    }

    /// Track an application shader or state object as a partial pipeline.
    pub fn register_pipeline_object(&self, object: ComPtr, stages: ShaderStage) {
        let _ = self.registry.lock().pipelines.register(
            object.raw(),
            PipelineRecord {
                stages,
                bundle: None,
            },
        );
    }

    /// Forget an application object the application released for the last
    /// time. Returns `true` if it was tracked.
    pub fn unregister_application_object(&self, object: ComPtr) -> bool {
        let mut tables = self.registry.lock();
        let raw = object.raw();
        if tables.resources.get(raw).is_some_and(|record| !record.owned) {
            tables.resources.unregister(raw);
            return true;
        }
        if tables.views.get(raw).is_some_and(|record| !record.owned) {
            tables.views.unregister(raw);
            return true;
        }
        if tables.samplers.get(raw).is_some_and(|record| !record.owned) {
            tables.samplers.unregister(raw);
            return true;
        }
        if tables
            .pipelines
            .get(raw)
            .is_some_and(|record| record.bundle.is_none())
        {
            tables.pipelines.unregister(raw);
            return true;
        }
        false
    }

    pub fn view_kind(&self, view: ComPtr) -> Option<ViewKind> {
        self.registry.lock().views.get(view.raw()).map(|record| record.kind)
    }

    // ========================================================================
    // Swap chains
    // ========================================================================

    /// Track a swap chain of this device and register its back buffer.
    pub fn init_swapchain(&self, swapchain: ComPtr) -> Result<SwapChain, HResult> {
        let back_buffer = self.driver.swapchain_buffer(swapchain)?;
        self.driver.release(back_buffer);
        if let Some(native) = self.driver.resource_desc(back_buffer) {
            self.register_native_resource(back_buffer, &native);
        }
        log::debug!(
            "D3D11Device: swap chain {:#x} with back buffer {:#x}",
            swapchain.raw(),
            back_buffer.raw()
        );
        let mut swapchains = self.swapchains.lock();
        swapchains.retain(|state| state.swapchain != swapchain);
        swapchains.push(SwapChainState {
            swapchain,
            back_buffer,
        });
        Ok(SwapChain(swapchain.raw()))
    }

    /// Forget a swap chain and its back buffer, before `ResizeBuffers` or
    /// its destruction.
    pub fn destroy_swapchain(&self, swapchain: ComPtr) -> Option<SwapChain> {
        let state = {
            let mut swapchains = self.swapchains.lock();
            let index = swapchains
                .iter()
                .position(|state| state.swapchain == swapchain)?;
            swapchains.remove(index)
        };
        self.registry
            .lock()
            .resources
            .unregister(state.back_buffer.raw());
        Some(SwapChain(state.swapchain.raw()))
    }

    pub fn swapchains(&self) -> Vec<SwapChain> {
        self.swapchains
            .lock()
            .iter()
            .map(|state| SwapChain(state.swapchain.raw()))
            .collect()
    }

    pub fn back_buffer(&self, swapchain: ComPtr) -> Option<Resource> {
        self.swapchains
            .lock()
            .iter()
            .find(|state| state.swapchain == swapchain)
            .map(|state| Resource(state.back_buffer.raw()))
    }

    // ========================================================================
    // Render passes
    // ========================================================================

    /// Attachments set on the immediate context, whether or not a pass is open.
    pub fn bound_attachments(&self) -> RenderPassAttachments {
        *self.pass.lock().tracker.bound()
    }

    pub fn current_pass(&self) -> Option<RenderPassAttachments> {
        self.pass.lock().tracker.current().copied()
    }

    /// `OMSetRenderTargets`. Returns the attachments now bound.
    pub(crate) fn bind_render_targets(&self, rtvs: &[ComPtr], dsv: ComPtr) -> RenderPassAttachments {
        let views: Vec<ResourceView> = rtvs.iter().map(|rtv| ResourceView(rtv.raw())).collect();
        let attachments = RenderPassAttachments::from_views(&views, ResourceView(dsv.raw()));
        let (bound, transition) = {
            let mut pass = self.pass.lock();
            let transition = pass.tracker.bind(attachments);
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

    pub(crate) fn reset_pass(&self) {
        let transition = self.pass.lock().tracker.reset();
        self.dispatch_transition(transition);
    }

    /// A view is going away; close the pass if it is an attachment.
    pub(crate) fn forget_view(&self, view: ComPtr) {
        let transition = self
            .pass
            .lock()
            .tracker
            .forget_view(ResourceView(view.raw()));
        self.dispatch_transition(transition);
    }

    /// Record the topology set on the context. Returns `true` when it changed.
    pub(crate) fn set_topology(&self, topology: u32) -> bool {
        std::mem::replace(&mut self.pass.lock().topology, topology) != topology
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
    // Immediate context proxy
    // ========================================================================

    /// `ID3D11DeviceContext::QueryInterface` on the immediate context proxy.
    pub fn context_query_interface(&self, iid: &Guid) -> Result<Queried, HResult> {
        let context = self.immediate_context();
        if *iid == IID_IUNKNOWN || *iid == IID_ID3D11DEVICECONTEXT {
            self.context_add_ref();
            return Ok(Queried::Proxy);
        }
        if *iid == IID_ID3D11DEVICECONTEXT1 {
            if !self.context_extended.load(Ordering::Acquire) {
                let upgraded = self.driver.query_interface(context, iid)?;
                self.driver.release(upgraded);
                self.context_extended.store(true, Ordering::Release);
                log::debug!("D3D11Device: upgraded context {:#x} to ID3D11DeviceContext1", context.raw());
            }
            self.context_add_ref();
            return Ok(Queried::Proxy);
        }
        self.driver.query_interface(context, iid).map(Queried::Native)
    }

    /// `GetImmediateContext`.
    pub fn context_add_ref(&self) -> u32 {
        add_ref_proxy(&self.context_refs, self.driver.as_ref(), self.immediate_context())
    }

    /// Release of the immediate context by the application. The device's
    /// own reference keeps the proxy alive until the device goes away.
    pub fn context_release(&self) -> u32 {
        if self.context_refs.get() <= 1 {
            log::error!(
                "D3D11Device: immediate context {:#x} released more often than it was acquired",
                self.immediate_context().raw()
            );
            debug_assert!(false, "immediate context over-released");
            return self.context_refs.get();
        }
        release_proxy(
            &self.context_refs,
            self.driver.as_ref(),
            self.immediate_context(),
            "ID3D11DeviceContext",
            0,
            || {},
        )
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
        let mut release = |handle: u64, owned: bool| {
            if owned {
                self.driver.release(ComPtr(handle));
            } else {
                leaked += 1;
            }
        };

        // Views before resources: a view holds a reference on its resource.
        for (handle, record) in tables.views.drain() {
            release(handle, record.owned);
        }
        for (handle, record) in tables.resources.drain() {
            release(handle, record.owned);
        }
        for (handle, record) in tables.samplers.drain() {
            release(handle, record.owned);
        }
        for (_, record) in tables.pipelines.drain() {
            match record.bundle {
                Some(bundle) => self.release_bundle(&bundle),
                None => leaked += 1,
            }
        }

        if leaked > 0 {
            log::warn!(
                "D3D11Device: {} application objects still alive at device destruction",
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
    /// then the records, then the layer's reference on the immediate context.
    fn teardown(&self) {
        self.reset_pass();
        let api: &dyn DeviceApi = self;
        let swapchains: Vec<ComPtr> = self
            .swapchains
            .lock()
            .iter()
            .map(|state| state.swapchain)
            .collect();
        for swapchain in swapchains {
            self.addons
                .notify(|addon| addon.on_destroy_swapchain(api, SwapChain(swapchain.raw())));
            self.destroy_swapchain(swapchain);
        }
        let cmd = self.command_list();
        let queue = self.command_queue();
        self.addons
            .notify(|addon| addon.on_destroy_command_list(api, cmd));
        self.addons
            .notify(|addon| addon.on_destroy_command_queue(api, queue));
        self.addons.notify(|addon| addon.on_destroy_device(api));
        self.release_all();

        if self.has_separate_context() {
            if self.context_refs.get() > 1 {
                log::warn!(
                    "D3D11Device: immediate context still referenced {} times by the application",
                    self.context_refs.get() - 1
                );
            }
            release_proxy(
                &self.context_refs,
                self.driver.as_ref(),
                self.immediate_context(),
                "ID3D11DeviceContext",
                0,
                || {},
            );
        }
    }

    // ========================================================================
    // Resource creation helpers
    // ========================================================================

    /// Register a new owned object, releasing it if that fails.
    fn finish_resource(&self, object: ComPtr, desc: ResourceDesc) -> ApiResult<Resource> {
        if !self.register_resource(object, desc, true) {
            self.driver.release(object);
            return Err(ApiError::InvalidParameter(format!(
                "resource {:#x} is already registered",
                object.raw()
            )));
        }
        log::trace!("D3D11Device: created resource {:#x}", object.raw());
        Ok(Resource(object.raw()))
    }
}

/// Check that `data` covers every subresource of `texture` and convert it
/// to the native layout.
fn texture_initial_data<'a>(
    texture: &AbstractTextureDesc,
    data: &[SubresourceData<'a>],
) -> ApiResult<Vec<InitialData<'a>>> {
    let count = texture.subresource_count() as usize;
    if data.len() < count {
        return Err(ApiError::InvalidParameter(format!(
            "{} subresources of initial data for {} subresources",
            data.len(),
            count
        )));
    }

    let levels = u32::from(texture.levels).max(1);
    let mut converted = Vec::with_capacity(count);
    for (index, subresource) in data.iter().take(count).enumerate() {
        let level = index as u32 % levels;
        let row_bytes = texture.format.row_pitch(texture.level_width(level));
        let height = texture.level_height(level);
        let rows = if texture.format.is_compressed() {
            height.div_ceil(4)
        } else {
            height
        };
        let row_pitch = match subresource.row_pitch {
            0 => row_bytes,
            pitch => pitch,
        };
        let slice_pitch = match subresource.slice_pitch {
            0 => row_pitch * rows,
            pitch => pitch,
        };
        let depth = texture.level_depth(level) as usize;
        let required = slice_pitch as usize * (depth - 1)
            + row_pitch as usize * (rows as usize - 1)
            + row_bytes as usize;
        if subresource.data.len() < required {
            return Err(ApiError::InvalidParameter(format!(
                "{} bytes of initial data for subresource {}, {} required",
                subresource.data.len(),
                index,
                required
            )));
        }
        converted.push(InitialData {
            data: subresource.data,
            row_pitch,
            slice_pitch,
        });
    }
    Ok(converted)
}

// ============================================================================
// DeviceApi
// ============================================================================

impl DeviceApi for D3D11Device {
    fn api(&self) -> GraphicsApi {
        self.driver.api()
    }

    fn native(&self) -> u64 {
        self.driver.device().raw()
    }

    fn check_capability(&self, capability: DeviceCaps) -> bool {
        let d3d11 = self.driver.api() == GraphicsApi::D3D11;
        let level = self.driver.feature_level();
        match capability {
            DeviceCaps::ComputeShader | DeviceCaps::DrawOrDispatchIndirect => d3d11 && level >= 0xb000,
            DeviceCaps::HullAndDomainShader => d3d11 && level >= 0xb000,
            DeviceCaps::LogicOp => d3d11 && level >= 0xb100,
            DeviceCaps::GeometryShader
            | DeviceCaps::IndependentBlend
            | DeviceCaps::DualSourceBlend => level >= 0xa000,
            DeviceCaps::FillModeNonSolid
            | DeviceCaps::MultiViewport
            | DeviceCaps::PartialPushConstantUpdates
            | DeviceCaps::DrawInstanced
            | DeviceCaps::CopyBufferRegion
            | DeviceCaps::ResolveRegion
            | DeviceCaps::SamplerCompare
            | DeviceCaps::SamplerAnisotropic
            | DeviceCaps::SharedResource => true,
            DeviceCaps::CopyBufferToTexture
            | DeviceCaps::Blit
            | DeviceCaps::SamplerWithResourceView
            | DeviceCaps::DescriptorSets => false,
        }
    }

    fn check_format_support(&self, format: Format, usage: ResourceUsage) -> bool {
        let native = convert_format(format);
        let Some(support) = self.driver.format_support(native) else {
            return false;
        };
        let required = convert_usage_to_format_support(usage);
        support & required == required
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> ApiResult<Sampler> {
        let native = convert_sampler_desc(desc);
        let sampler = self
            .driver
            .create_sampler_state(&native)
            .map_err(hresult_to_api_error)?;
        // State objects are deduplicated by the runtime.
        let mut tables = self.registry.lock();
        if tables.samplers.contains(sampler.raw()) {
            drop(tables);
            self.driver.release(sampler);
            return Err(ApiError::InvalidParameter(format!(
                "sampler {:#x} is already registered",
                sampler.raw()
            )));
        }
        let _ = tables
            .samplers
            .register(sampler.raw(), SamplerRecord { desc: *desc, owned: true });
        Ok(Sampler(sampler.raw()))
    }

    fn destroy_sampler(&self, sampler: Sampler) {
        if sampler.is_null() {
            return;
        }
        match self.registry.lock().samplers.unregister(sampler.raw()) {
            Some(record) if record.owned => {
                self.driver.release(ComPtr(sampler.raw()));
            }
            Some(_) => {}
            None => log::warn!("D3D11Device: destroying unknown sampler {:#x}", sampler.raw()),
        }
    }

    fn create_resource(
        &self,
        desc: &ResourceDesc,
        initial_data: Option<&[SubresourceData<'_>]>,
        _initial_state: ResourceUsage,
    ) -> ApiResult<Resource> {
        log::trace!("D3D11Device: creating {:?}", desc.ty());
        let native = convert_resource_desc(desc)?;
        let object = match (&native, &desc.kind) {
            (NativeDesc::Buffer(buffer), _) => {
                let data = match initial_data.and_then(|data| data.first()) {
                    Some(first) if first.data.len() < buffer.byte_width as usize => {
                        return Err(ApiError::InvalidParameter(format!(
                            "{} bytes of initial data for a buffer of {} bytes",
                            first.data.len(),
                            buffer.byte_width
                        )));
                    }
                    Some(first) => Some(InitialData {
                        data: first.data,
                        row_pitch: 0,
                        slice_pitch: 0,
                    }),
                    None => None,
                };
                self.driver
                    .create_buffer(buffer, data.as_ref())
                    .map_err(hresult_to_api_error)?
            }
            (NativeDesc::Texture(texture), ResourceKind::Texture(abstract_texture)) => {
                let data = initial_data
                    .map(|data| texture_initial_data(abstract_texture, data))
                    .transpose()?;
                self.driver
                    .create_texture(texture, data.as_deref())
                    .map_err(hresult_to_api_error)?
            }
            (NativeDesc::Texture(_), ResourceKind::Buffer { .. }) => {
                return Err(ApiError::InvalidParameter(
                    "texture object for a buffer description".into(),
                ))
            }
        };
        // Record what the driver created, so a full mip chain request
        // reports its actual level count.
        let actual = self
            .driver
            .resource_desc(object)
            .map(|native| ResourceDesc {
                usage: desc.usage,
                ..convert_native_desc(&native)
            })
            .filter(|_| matches!(desc.kind, ResourceKind::Texture(t) if t.levels == 0))
            .unwrap_or(*desc);
        self.finish_resource(object, actual)
    }

    /// Application resources are only unregistered; their references stay
    /// with the application.
    fn destroy_resource(&self, resource: Resource) {
        if resource.is_null() {
            return;
        }
        match self.registry.lock().resources.unregister(resource.raw()) {
            Some(record) if record.owned => {
                self.driver.release(ComPtr(resource.raw()));
            }
            Some(_) => {}
            None => log::warn!("D3D11Device: destroying unknown resource {:#x}", resource.raw()),
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
        let kind = ViewKind::from_usage(usage_type)
            .ok_or_else(|| ApiError::InvalidParameter(format!("view usage {:?}", usage_type)))?;
        let native = convert_view_desc(kind, desc, &resource_desc)?;
        let view = self
            .driver
            .create_view(kind, ComPtr(resource.raw()), Some(&native))
            .map_err(hresult_to_api_error)?;

        let record = ViewRecord {
            resource,
            kind,
            desc: convert_native_view_desc(kind, &native),
            owned: true,
        };
        if let Err(e) = self.registry.lock().views.register(view.raw(), record) {
            self.driver.release(view);
            return Err(ApiError::InvalidParameter(e.to_string()));
        }
        Ok(ResourceView(view.raw()))
    }

    fn destroy_resource_view(&self, view: ResourceView) {
        if view.is_null() {
            return;
        }
        self.forget_view(ComPtr(view.raw()));
        match self.registry.lock().views.unregister(view.raw()) {
            Some(record) if record.owned => {
                self.driver.release(ComPtr(view.raw()));
            }
            Some(_) => {}
            None => log::warn!("D3D11Device: destroying unknown resource view {:#x}", view.raw()),
        }
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> ApiResult<Pipeline> {
        let bundle = build_pipeline(self.driver.as_ref(), desc)?;
        let Some(handle) = bundle.objects().next() else {
            return Err(ApiError::InvalidParameter("pipeline without objects".into()));
        };
        let record = PipelineRecord {
            stages: desc.stages(),
            bundle: Some(bundle),
        };
        if let Err(e) = self.registry.lock().pipelines.register(handle.raw(), record) {
            self.release_bundle(&bundle);
            return Err(ApiError::InvalidParameter(e.to_string()));
        }
        Ok(Pipeline(handle.raw()))
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
            None => log::warn!("D3D11Device: destroying unknown pipeline {:#x}", pipeline.raw()),
        }
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
        self.registry.lock().views.get(view.raw()).map(|record| record.desc)
    }

    fn is_resource_handle_valid(&self, resource: Resource) -> bool {
        self.registry.lock().resources.contains(resource.raw())
    }

    fn is_resource_view_handle_valid(&self, view: ResourceView) -> bool {
        self.registry.lock().views.contains(view.raw())
    }
}

// ============================================================================
// IUnknown
// ============================================================================

impl D3D11Device {
    fn base_iids(&self) -> (Guid, Guid) {
        match self.driver.api() {
            GraphicsApi::D3D10 => (IID_ID3D10DEVICE, IID_ID3D10DEVICE1),
            _ => (IID_ID3D11DEVICE, IID_ID3D11DEVICE1),
        }
    }
}

impl Unknown for D3D11Device {
    fn query_interface(&self, iid: &Guid) -> Result<Queried, HResult> {
        let native = self.driver.device();
        let (base, extended) = self.base_iids();
        if *iid == IID_IUNKNOWN || *iid == base {
            self.add_ref();
            return Ok(Queried::Proxy);
        }
        if *iid == extended {
            if !self.is_extended() {
                let upgraded = self.driver.query_interface(native, iid)?;
                // The proxy keeps counting through the original pointer.
                self.driver.release(upgraded);
                self.extended.store(true, Ordering::Release);
                log::debug!(
                    "D3D11Device: upgraded {:#x} to {}1",
                    native.raw(),
                    device_interface_name(self.driver.api())
                );
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
            device_interface_name(self.driver.api()),
            0,
            || self.teardown(),
        )
    }
}

static_assertions::assert_impl_all!(D3D11Device: Send, Sync);

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::com::E_NOINTERFACE;
    use crate::backend::d3d11::dummy::DummyD3D11;
    use lumen_core::pipeline::{GraphicsPipelineDesc, ShaderDesc};
    use lumen_core::resource::{ResourceFlags, ALL_REMAINING};
    use lumen_core::{MemoryHeap, ResourceViewType, TextureDimension};

    fn device_with(dummy: DummyD3D11) -> (Arc<DummyD3D11>, D3D11Device) {
        let dummy = Arc::new(dummy);
        let device = D3D11Device::new(
            dummy.clone(),
            Arc::new(AddonRegistry::new()),
            LayerConfig::default(),
        );
        (dummy, device)
    }

    fn device() -> (Arc<DummyD3D11>, D3D11Device) {
        device_with(DummyD3D11::new(640, 480))
    }

    fn sampled_desc() -> ResourceDesc {
        ResourceDesc::texture(TextureDimension::D2, 4, 4, Format::R8G8B8A8Unorm)
            .with_heap(MemoryHeap::GpuOnly)
            .with_usage(ResourceUsage::SHADER_RESOURCE)
    }

    fn whole_view() -> ResourceViewDesc {
        ResourceViewDesc::texture(
            ResourceViewType::Texture2d,
            Format::Unknown,
            0,
            ALL_REMAINING,
            0,
            ALL_REMAINING,
        )
    }

    #[test]
    fn test_texture_initial_data_passed_at_creation() {
        let (dummy, device) = device();
        let pixels = [0u8; 64];
        let data = [SubresourceData::new(&pixels, 16, 0)];
        let texture = device
            .create_resource(&sampled_desc(), Some(&data), ResourceUsage::SHADER_RESOURCE)
            .unwrap();
        assert_eq!(dummy.uploads(), vec![(texture.raw(), 64)]);
        assert_eq!(device.get_resource_desc(texture), Some(sampled_desc()));

        device.destroy_resource(texture);
        assert!(device.registry().lock().is_empty());
        assert!(!dummy.objects().is_live(texture.raw()));
    }

    #[test]
    fn test_full_mip_chain_recorded() {
        let (_dummy, device) = device();
        let desc = ResourceDesc::texture(TextureDimension::D2, 256, 256, Format::R8G8B8A8Unorm)
            .with_levels(0)
            .with_usage(ResourceUsage::RENDER_TARGET);
        let texture = device
            .create_resource(&desc, None, ResourceUsage::RENDER_TARGET)
            .unwrap();
        let recorded = device.get_resource_desc(texture).unwrap();
        assert_eq!(recorded.as_texture().unwrap().levels, 9);
        assert_eq!(recorded.usage, desc.usage);
    }

    #[test]
    fn test_out_of_memory_leaves_nothing_behind() {
        let (dummy, device) = device();
        let baseline = dummy.objects().live_count();
        dummy.objects().fail_after(0);
        let result = device.create_resource(&sampled_desc(), None, ResourceUsage::SHADER_RESOURCE);
        assert_eq!(result, Err(ApiError::OutOfMemory));
        assert!(device.registry().lock().is_empty());
        assert_eq!(dummy.objects().live_count(), baseline);
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
    fn test_buffer_initial_data() {
        let (dummy, device) = device();
        let desc = ResourceDesc::buffer(16).with_usage(ResourceUsage::VERTEX_BUFFER);
        let bytes = [1u8; 16];
        let buffer = device
            .create_resource(&desc, Some(&[SubresourceData::new(&bytes, 0, 0)]), ResourceUsage::VERTEX_BUFFER)
            .unwrap();
        assert_eq!(dummy.uploads(), vec![(buffer.raw(), 16)]);

        let short = [1u8; 8];
        let result = device.create_resource(
            &desc,
            Some(&[SubresourceData::new(&short, 0, 0)]),
            ResourceUsage::VERTEX_BUFFER,
        );
        assert!(matches!(result, Err(ApiError::InvalidParameter(_))));
    }

    #[test]
    fn test_depth_view_of_shader_readable_texture() {
        let (_dummy, device) = device();
        let desc = ResourceDesc::texture(TextureDimension::D2, 64, 64, Format::D24UnormS8Uint)
            .with_usage(ResourceUsage::DEPTH_STENCIL | ResourceUsage::SHADER_RESOURCE);
        let texture = device
            .create_resource(&desc, None, ResourceUsage::DEPTH_STENCIL)
            .unwrap();
        let srv = device
            .create_resource_view(texture, ResourceUsage::SHADER_RESOURCE, &whole_view())
            .unwrap();
        let dsv = device
            .create_resource_view(texture, ResourceUsage::DEPTH_STENCIL, &whole_view())
            .unwrap();
        assert_eq!(
            device.get_resource_view_desc(srv).map(|desc| desc.format),
            Some(Format::R24UnormX8Typeless)
        );
        assert_eq!(
            device.get_resource_view_desc(dsv).map(|desc| desc.format),
            Some(Format::D24UnormS8Uint)
        );
        assert_eq!(device.get_resource_from_view(srv), Some(texture));
    }

    #[test]
    fn test_view_outlives_destroyed_resource() {
        let (dummy, device) = device();
        let texture = device
            .create_resource(&sampled_desc(), None, ResourceUsage::SHADER_RESOURCE)
            .unwrap();
        let view = device
            .create_resource_view(texture, ResourceUsage::SHADER_RESOURCE, &whole_view())
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
    fn test_view_failure_registers_nothing() {
        let (dummy, device) = device();
        let texture = device
            .create_resource(&sampled_desc(), None, ResourceUsage::SHADER_RESOURCE)
            .unwrap();
        dummy.objects().fail_after(0);
        let result = device.create_resource_view(texture, ResourceUsage::SHADER_RESOURCE, &whole_view());
        assert_eq!(result, Err(ApiError::OutOfMemory));
        assert!(device.registry().lock().views.is_empty());
    }

    #[test]
    fn test_sampler_round_trip() {
        let (dummy, device) = device();
        let baseline = dummy.objects().live_count();
        let sampler = device.create_sampler(&SamplerDesc::default()).unwrap();
        assert_eq!(dummy.objects().live_of_kind("sampler state"), 1);
        device.destroy_sampler(sampler);
        assert_eq!(dummy.objects().live_count(), baseline);
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
        let native = TextureDesc {
            width: 8,
            height: 8,
            format: Format::R8G8B8A8Unorm.raw(),
            ..Default::default()
        };
        let app_texture = dummy.create_texture(&native, None).unwrap();
        device.register_native_resource(app_texture, &NativeDesc::Texture(native));
        let owned = device
            .create_resource(&sampled_desc(), None, ResourceUsage::SHADER_RESOURCE)
            .unwrap();

        assert_eq!(device.release_all(), 1);
        assert!(device.registry().lock().is_empty());
        assert!(dummy.objects().is_live(app_texture.raw()));
        assert!(!dummy.objects().is_live(owned.raw()));
    }

    #[test]
    fn test_swapchain_back_buffer_is_application_owned() {
        let (dummy, device) = device();
        let swapchain = device.init_swapchain(dummy.swap_chain()).unwrap();
        let back_buffer = device.back_buffer(dummy.swap_chain()).unwrap();
        assert_eq!(back_buffer.raw(), dummy.back_buffer().raw());
        assert_eq!(dummy.ref_count(dummy.back_buffer()), 1);
        assert_eq!(device.get_resource_desc(back_buffer).unwrap().as_texture().unwrap().width, 640);

        assert_eq!(device.destroy_swapchain(dummy.swap_chain()), Some(swapchain));
        assert!(device.registry().lock().is_empty());
    }

    #[test]
    fn test_capabilities_follow_api() {
        let (_dummy, device) = device();
        assert!(device.check_capability(DeviceCaps::ComputeShader));
        assert!(!device.check_capability(DeviceCaps::DescriptorSets));
        assert!(device.check_format_support(Format::R8G8B8A8Unorm, ResourceUsage::RENDER_TARGET));
        assert!(!device.check_format_support(Format::D32Float, ResourceUsage::RENDER_TARGET));

        let (_dummy, device) = device_with(DummyD3D11::new_d3d10(64, 64));
        assert!(!device.check_capability(DeviceCaps::ComputeShader));
        assert!(device.check_capability(DeviceCaps::GeometryShader));
        assert_eq!(device.api(), GraphicsApi::D3D10);
    }

    #[test]
    fn test_cube_flag_round_trips() {
        let (_dummy, device) = device();
        let desc = ResourceDesc::texture(TextureDimension::D2, 16, 16, Format::R8G8B8A8Unorm)
            .with_depth_or_layers(6)
            .with_flags(ResourceFlags::CUBE_COMPATIBLE)
            .with_usage(ResourceUsage::SHADER_RESOURCE);
        let cube = device
            .create_resource(&desc, None, ResourceUsage::SHADER_RESOURCE)
            .unwrap();
        assert!(device
            .get_resource_desc(cube)
            .unwrap()
            .flags
            .contains(ResourceFlags::CUBE_COMPATIBLE));
    }

    #[test]
    fn test_query_interface_upgrades_to_device1() {
        let (dummy, device) = device_with(DummyD3D11::new(64, 64).with_device1());
        let native = device.native_device();
        assert_eq!(device.query_interface(&IID_ID3D11DEVICE1), Ok(Queried::Proxy));
        assert!(device.is_extended());
        assert_eq!(device.ref_count(), 2);
        assert_eq!(dummy.ref_count(native), 2);

        let unknown = Guid::new(1, 2, 3, [0; 8]);
        assert_eq!(device.query_interface(&unknown), Err(E_NOINTERFACE));
        assert_eq!(device.ref_count(), 2);
    }

    #[test]
    fn test_device1_unavailable_without_driver_support() {
        let (_dummy, device) = device();
        assert_eq!(device.query_interface(&IID_ID3D11DEVICE1), Err(E_NOINTERFACE));
        assert!(!device.is_extended());
        assert_eq!(device.ref_count(), 1);
    }

    #[test]
    fn test_immediate_context_references() {
        let (dummy, device) = device();
        let context = device.immediate_context();
        assert_eq!(device.context_add_ref(), 2);
        assert_eq!(dummy.ref_count(context), 2);
        assert_eq!(
            device.context_query_interface(&IID_ID3D11DEVICECONTEXT),
            Ok(Queried::Proxy)
        );
        assert_eq!(device.context_release(), 2);
        assert_eq!(device.context_release(), 1);
        assert_eq!(dummy.ref_count(context), 1);
    }

    #[test]
    fn test_final_release_destroys_device() {
        let (dummy, device) = device();
        device.init_swapchain(dummy.swap_chain()).unwrap();
        device
            .create_resource(&sampled_desc(), None, ResourceUsage::SHADER_RESOURCE)
            .unwrap();
        assert_eq!(device.add_ref(), 2);
        assert_eq!(device.release(), 1);
        assert_eq!(device.release(), 0);
        assert!(device.registry().lock().is_empty());
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_d3d10_final_release() {
        let (dummy, device) = device_with(DummyD3D11::new_d3d10(64, 64));
        assert_eq!(device.command_list().raw(), device.native_device().raw());
        assert_eq!(device.release(), 0);
        assert_eq!(dummy.objects().live_count(), 0);
    }
}
