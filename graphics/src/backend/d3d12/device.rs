//! Abstract device of an `ID3D12Device`.
//!
//! [`D3D12Device`] is the proxy the application receives in place of the
//! driver's device. Unlike Direct3D 11, views and samplers are not objects
//! but descriptors, so their records are keyed by CPU descriptor handle and
//! a descriptor written twice simply replaces its record.
//!
//! Resources created with initial data on the default heap are filled
//! through an upload buffer. The copy runs on the immediate command list,
//! which exists once the application created its first direct queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lumen_core::pipeline::{PipelineDesc, ShaderStage};
use lumen_core::sampler::SamplerDesc;
use lumen_core::{
    AddonRegistry, ApiError, ApiResult, DeviceApi, DeviceCaps, Format, GraphicsApi, HandleRegistry,
    LayerConfig, ObjectTable, ResourceDesc, ResourceKind, ResourceUsage, ResourceViewDesc,
    SubresourceData, TextureDesc,
};
use lumen_core::{Pipeline, Resource, ResourceView, Sampler, SwapChain};
use parking_lot::Mutex;

use super::conversion::*;
use super::descriptor::DescriptorHeaps;
use super::driver::{CopyLocation, D3D12Driver, TransitionBarrier, IID_ID3D12DEVICE, IID_ID3D12DEVICE1};
use super::immediate::ImmediateCommandList;
use super::pipeline::build_pipeline;
use crate::backend::com::{
    add_ref_proxy, failed, hresult_to_api_error, release_proxy, ComPtr, Guid, HResult,
    ProxyRefCount, Queried, Unknown, IID_IUNKNOWN,
};
use crate::backend::d3d_state::{convert_native_sampler_desc, convert_sampler_desc, SamplerStateDesc};
use crate::backend::dxgi::convert_format;

// ============================================================================
// Records
// ============================================================================

/// Committed resource known to the layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    pub desc: ResourceDesc,
    /// Created through [`DeviceApi`]; the layer holds its only reference.
    pub owned: bool,
}

/// View written into a descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRecord {
    /// Weak link: the resource may already be destroyed.
    pub resource: Resource,
    pub kind: ViewKind,
    pub desc: ResourceViewDesc,
    /// The descriptor belongs to one of the layer's heaps.
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
    pub owned: bool,
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
    pub fn len(&self) -> usize {
        self.resources.len() + self.views.len() + self.samplers.len() + self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A swap chain presenting on one of this device's queues. Buffers are
/// tracked without references, since extra references make
/// `ResizeBuffers` fail.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SwapChainState {
    swapchain: ComPtr,
    queue: ComPtr,
    buffers: Vec<ComPtr>,
}

/// Queue and command list the layer submits its own work with.
#[derive(Debug)]
struct UploadContext {
    queue: ComPtr,
    list: ImmediateCommandList,
}

/// Initial data checked and laid out for the copy into a new resource.
enum PreparedData<'a> {
    /// Written straight into an upload heap buffer.
    Mapped(&'a [u8]),
    /// Copied from a staging buffer on the immediate command list.
    Staged {
        footprints: Vec<Footprint>,
        bytes: Vec<u8>,
    },
}

// ============================================================================
// Device
// ============================================================================

/// Layer state of one `ID3D12Device`.
pub struct D3D12Device {
    driver: Arc<dyn D3D12Driver>,
    addons: Arc<AddonRegistry>,
    config: LayerConfig,
    registry: HandleRegistry<Tables>,
    refs: ProxyRefCount,
    extended: AtomicBool,
    descriptors: Mutex<DescriptorHeaps>,
    upload: Mutex<Option<UploadContext>>,
    swapchains: Mutex<Vec<SwapChainState>>,
}

impl std::fmt::Debug for D3D12Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3D12Device")
            .field("device", &self.driver.device())
            .field("refs", &self.refs.get())
            .field("objects", &self.registry.lock().len())
            .finish()
    }
}

impl D3D12Device {
    pub fn new(driver: Arc<dyn D3D12Driver>, addons: Arc<AddonRegistry>, config: LayerConfig) -> Self {
        log::debug!("D3D12Device: wrapping ID3D12Device {:#x}", driver.device().raw());
        Self {
            driver,
            addons,
            config,
            registry: HandleRegistry::new(Tables::default()),
            refs: ProxyRefCount::new(),
            extended: AtomicBool::new(false),
            descriptors: Mutex::new(DescriptorHeaps::default()),
            upload: Mutex::new(None),
            swapchains: Mutex::new(Vec::new()),
        }
    }

    pub fn driver(&self) -> &dyn D3D12Driver {
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

    /// Whether the application queried `ID3D12Device1`.
    pub fn is_extended(&self) -> bool {
        self.extended.load(Ordering::Acquire)
    }

    pub fn ref_count(&self) -> u32 {
        self.refs.get()
    }

    pub(crate) fn log_failure(&self, call: &str, hr: HResult) {
        if self.config.verbose_log {
            log::warn!("{} failed with {:#010x}", call, hr as u32);
        }
    }

    // ========================================================================
    // Immediate command list
    // ========================================================================

    /// Use `queue` for the layer's own submissions. Only the first direct
    /// queue is used; later calls do nothing.
    pub fn attach_queue(&self, queue: ComPtr) -> Result<(), HResult> {
        let mut upload = self.upload.lock();
        if upload.is_some() {
            return Ok(());
        }
        let list = ImmediateCommandList::new(self.driver.as_ref(), self.config.immediate_command_frames)?;
        log::debug!(
            "D3D12Device: immediate command list {:#x} submits to queue {:#x}",
            list.handle().raw(),
            queue.raw()
        );
        *upload = Some(UploadContext { queue, list });
        Ok(())
    }

    /// The queue is going away. Pending work is submitted first.
    pub fn detach_queue(&self, queue: ComPtr) {
        let mut upload = self.upload.lock();
        if upload.as_ref().is_some_and(|context| context.queue == queue) {
            if let Some(mut context) = upload.take() {
                if let Err(hr) = context.list.flush_and_wait(self.driver.as_ref(), queue) {
                    log::warn!("D3D12Device: final flush failed with {:#010x}", hr as u32);
                }
                context.list.destroy(self.driver.as_ref());
            }
        }
    }

    /// Queue the layer submits to, if one was attached.
    pub fn upload_queue(&self) -> Option<ComPtr> {
        self.upload.lock().as_ref().map(|context| context.queue)
    }

    /// Submit what the layer recorded and wait for it.
    pub fn flush_immediate(&self) -> Result<(), HResult> {
        match self.upload.lock().as_mut() {
            Some(context) => context.list.flush_and_wait(self.driver.as_ref(), context.queue),
            None => Ok(()),
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

    /// Track a resource the application created. Returns the description
    /// of the resource the driver actually created.
    pub fn register_native_resource(
        &self,
        object: ComPtr,
        heap: &HeapProperties,
        requested: &NativeResourceDesc,
    ) -> ResourceDesc {
        let (heap, native) = self.driver.resource_desc(object).unwrap_or((*heap, *requested));
        let desc = convert_native_desc(&heap, &native);
        self.register_resource(object, desc, false);
        desc
    }

    /// Track a view the application wrote into `descriptor`. A missing
    /// description means the default view of the whole resource.
    pub fn register_native_view(
        &self,
        kind: ViewKind,
        resource: ComPtr,
        native: Option<&ViewDesc>,
        descriptor: u64,
    ) -> Option<(Resource, ResourceUsage, ResourceViewDesc)> {
        let resource = Resource(resource.raw());
        let mut tables = self.registry.lock();
        let desc = match native {
            Some(native) => convert_native_view_desc(kind, native),
            None => ResourceViewDesc::for_resource(&tables.resources.get(resource.raw())?.desc),
        };
        let replaced = tables.views.register_or_replace(
            descriptor,
            ViewRecord {
                resource,
                kind,
                desc,
                owned: false,
            },
        );
        if replaced.is_some() {
            log::trace!("D3D12Device: descriptor {:#x} overwritten", descriptor);
        }
        Some((resource, kind.usage(), desc))
    }

    pub fn register_native_sampler(&self, native: &SamplerStateDesc, descriptor: u64) -> SamplerDesc {
        let desc = convert_native_sampler_desc(native);
        self.registry
            .lock()
            .samplers
            .register_or_replace(descriptor, SamplerRecord { desc, owned: false });
        desc
    }

    pub fn register_native_pipeline(&self, pipeline: ComPtr, stages: ShaderStage) {
        let _ = self
            .registry
            .lock()
            .pipelines
            .register(pipeline.raw(), PipelineRecord { stages, owned: false });
    }

    /// The view record of a CPU descriptor.
    pub fn view(&self, descriptor: u64) -> Option<ViewRecord> {
        self.registry.lock().views.get(descriptor).cloned()
    }

    /// Descriptor `source` was copied into `dest`. Returns `true` if
    /// `source` held a tracked view or sampler.
    pub fn copy_descriptor_record(&self, dest: u64, source: u64) -> bool {
        let mut tables = self.registry.lock();
        if let Some(record) = tables.views.get(source).cloned() {
            tables
                .views
                .register_or_replace(dest, ViewRecord { owned: false, ..record });
            return true;
        }
        if let Some(record) = tables.samplers.get(source).cloned() {
            tables
                .samplers
                .register_or_replace(dest, SamplerRecord { owned: false, ..record });
            return true;
        }
        false
    }

    /// Forget a resource or pipeline state the application released for
    /// the last time. Returns `true` if it was tracked.
    pub fn unregister_application_object(&self, object: ComPtr) -> bool {
        let mut tables = self.registry.lock();
        let raw = object.raw();
        if tables.resources.get(raw).is_some_and(|record| !record.owned) {
            tables.resources.unregister(raw);
            // Views keep their weak link; the descriptors stay readable.
            return true;
        }
        if tables.pipelines.get(raw).is_some_and(|record| !record.owned) {
            tables.pipelines.unregister(raw);
            return true;
        }
        false
    }

    // ========================================================================
    // Swap chains
    // ========================================================================

    /// Track a swap chain presenting on `queue` and register its buffers.
    pub fn init_swapchain(&self, swapchain: ComPtr, queue: ComPtr) -> Result<SwapChain, HResult> {
        let buffers = self.driver.swapchain_buffers(swapchain)?;
        for buffer in &buffers {
            self.driver.release(*buffer);
            if let Some((heap, native)) = self.driver.resource_desc(*buffer) {
                self.register_native_resource(*buffer, &heap, &native);
            }
        }
        log::debug!(
            "D3D12Device: swap chain {:#x} with {} buffers on queue {:#x}",
            swapchain.raw(),
            buffers.len(),
            queue.raw()
        );
        let mut swapchains = self.swapchains.lock();
        swapchains.retain(|state| state.swapchain != swapchain);
        swapchains.push(SwapChainState {
            swapchain,
            queue,
            buffers,
        });
        Ok(SwapChain(swapchain.raw()))
    }

    /// Forget a swap chain and its buffers, before `ResizeBuffers` or its
    /// destruction. Returns the queue it presented on.
    pub fn destroy_swapchain(&self, swapchain: ComPtr) -> Option<ComPtr> {
        let state = {
            let mut swapchains = self.swapchains.lock();
            let index = swapchains
                .iter()
                .position(|state| state.swapchain == swapchain)?;
            swapchains.remove(index)
        };
        let mut tables = self.registry.lock();
        for buffer in &state.buffers {
            tables.resources.unregister(buffer.raw());
        }
        Some(state.queue)
    }

    pub fn swapchain_queue(&self, swapchain: ComPtr) -> Option<ComPtr> {
        self.swapchains
            .lock()
            .iter()
            .find(|state| state.swapchain == swapchain)
            .map(|state| state.queue)
    }

    pub fn back_buffers(&self, swapchain: ComPtr) -> Vec<Resource> {
        self.swapchains
            .lock()
            .iter()
            .find(|state| state.swapchain == swapchain)
            .map(|state| state.buffers.iter().map(|buffer| Resource(buffer.raw())).collect())
            .unwrap_or_default()
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Release every object the layer owns and drop all records.
    ///
    /// Returns the number of application resources and pipeline states that
    /// were still registered.
    pub fn release_all(&self) -> usize {
        let mut tables = self.registry.lock();
        let mut descriptors = self.descriptors.lock();
        let mut leaked = 0;

        // Descriptors die with the layer's heaps; only the count matters.
        tables.views.drain();
        tables.samplers.drain();
        for (handle, record) in tables.resources.drain() {
            if record.owned {
                self.driver.release(ComPtr(handle));
            } else {
                leaked += 1;
            }
        }
        for (handle, record) in tables.pipelines.drain() {
            if record.owned {
                self.driver.release(ComPtr(handle));
            } else {
                leaked += 1;
            }
        }
        descriptors.release(self.driver.as_ref());

        if leaked > 0 {
            log::warn!(
                "D3D12Device: {} application objects still alive at device destruction",
                leaked
            );
        }
        leaked
    }

    fn teardown(&self) {
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
        if let Some(queue) = self.upload_queue() {
            self.detach_queue(queue);
        }
        self.addons.notify(|addon| addon.on_destroy_device(api));
        self.release_all();
    }

    // ========================================================================
    // Resource creation helpers
    // ========================================================================

    fn finish_resource(&self, object: ComPtr, desc: ResourceDesc) -> ApiResult<Resource> {
        if !self.register_resource(object, desc, true) {
            self.driver.release(object);
            return Err(ApiError::InvalidParameter(format!(
                "resource {:#x} is already registered",
                object.raw()
            )));
        }
        log::trace!("D3D12Device: created resource {:#x}", object.raw());
        Ok(Resource(object.raw()))
    }

    /// Check initial data against `desc` before anything is created.
    fn prepare_data<'a>(
        &self,
        desc: &ResourceDesc,
        heap: &HeapProperties,
        data: &[SubresourceData<'a>],
    ) -> ApiResult<PreparedData<'a>> {
        match (&desc.kind, heap.heap_type) {
            (ResourceKind::Buffer { size, .. }, heap_type) => {
                let first = data.first().ok_or_else(|| {
                    ApiError::InvalidParameter("empty initial data for a buffer".into())
                })?;
                if (first.data.len() as u64) < *size {
                    return Err(ApiError::InvalidParameter(format!(
                        "{} bytes of initial data for a buffer of {} bytes",
                        first.data.len(),
                        size
                    )));
                }
                let bytes = &first.data[..*size as usize];
                match heap_type {
                    D3D12_HEAP_TYPE_UPLOAD => Ok(PreparedData::Mapped(bytes)),
                    D3D12_HEAP_TYPE_DEFAULT => {
                        self.require_upload_queue()?;
                        Ok(PreparedData::Staged {
                            footprints: Vec::new(),
                            bytes: bytes.to_vec(),
                        })
                    }
                    _ => Err(ApiError::Unsupported("initial data on a read-back heap".into())),
                }
            }
            (ResourceKind::Texture(texture), D3D12_HEAP_TYPE_DEFAULT) => {
                self.require_upload_queue()?;
                let (footprints, bytes) = pack_texture_data(texture, data)?;
                Ok(PreparedData::Staged { footprints, bytes })
            }
            (ResourceKind::Texture(_), _) => Err(ApiError::Unsupported(
                "initial data for a texture outside the default heap".into(),
            )),
        }
    }

    fn require_upload_queue(&self) -> ApiResult<()> {
        if self.upload.lock().is_none() {
            return Err(ApiError::Unsupported(
                "initial data before a direct command queue exists".into(),
            ));
        }
        Ok(())
    }

    /// Copy staged data into `dest`, then move it to `final_state`.
    fn upload_staged(
        &self,
        dest: ComPtr,
        footprints: &[Footprint],
        bytes: &[u8],
        final_state: u32,
    ) -> ApiResult<()> {
        let driver = self.driver.as_ref();
        let staging = driver
            .create_committed_resource(
                &HeapProperties {
                    heap_type: D3D12_HEAP_TYPE_UPLOAD,
                    ..Default::default()
                },
                &NativeResourceDesc::buffer(bytes.len() as u64),
                D3D12_RESOURCE_STATE_GENERIC_READ,
            )
            .map_err(hresult_to_api_error)?;

        let result = self.record_upload(staging, dest, footprints, bytes, final_state);
        driver.release(staging);
        result
    }

    fn record_upload(
        &self,
        staging: ComPtr,
        dest: ComPtr,
        footprints: &[Footprint],
        bytes: &[u8],
        final_state: u32,
    ) -> ApiResult<()> {
        let driver = self.driver.as_ref();
        let hr = driver.write_resource(staging, 0, bytes);
        if failed(hr) {
            return Err(hresult_to_api_error(hr));
        }

        let mut upload = self.upload.lock();
        let context = upload
            .as_mut()
            .ok_or_else(|| ApiError::Unsupported("no direct command queue".into()))?;
        let list = context.list.begin_commands();
        if footprints.is_empty() {
            driver.copy_buffer_region(list, dest, 0, staging, 0, bytes.len() as u64);
        } else {
            for (index, footprint) in footprints.iter().enumerate() {
                driver.copy_texture_region(
                    list,
                    &CopyLocation::Subresource {
                        resource: dest,
                        index: index as u32,
                    },
                    [0; 3],
                    &CopyLocation::Footprint {
                        resource: staging,
                        footprint: *footprint,
                    },
                    None,
                );
            }
        }
        if final_state != D3D12_RESOURCE_STATE_COPY_DEST {
            driver.resource_barrier(
                list,
                &[TransitionBarrier {
                    resource: dest,
                    before: D3D12_RESOURCE_STATE_COPY_DEST,
                    after: final_state,
                }],
            );
        }
        // The staging buffer is released right after, so wait for the copy.
        context
            .list
            .flush_and_wait(driver, context.queue)
            .map_err(hresult_to_api_error)
    }
}

/// Check that `data` covers every subresource of `texture` and lay it out
/// the way `CopyTextureRegion` reads it from a buffer.
fn pack_texture_data(
    texture: &TextureDesc,
    data: &[SubresourceData<'_>],
) -> ApiResult<(Vec<Footprint>, Vec<u8>)> {
    let (footprints, total) = texture_footprints(texture);
    if data.len() < footprints.len() {
        return Err(ApiError::InvalidParameter(format!(
            "{} subresources of initial data for {} subresources",
            data.len(),
            footprints.len()
        )));
    }

    let mut bytes = vec![0u8; total as usize];
    for (index, (footprint, subresource)) in footprints.iter().zip(data).enumerate() {
        let row_bytes = footprint.row_bytes as usize;
        let row_pitch = match subresource.row_pitch {
            0 => row_bytes,
            pitch => pitch as usize,
        };
        let slice_pitch = match subresource.slice_pitch {
            0 => row_pitch * footprint.rows as usize,
            pitch => pitch as usize,
        };
        let rows = footprint.rows as usize;
        let depth = footprint.depth as usize;
        let required = slice_pitch * (depth - 1) + row_pitch * (rows - 1) + row_bytes;
        if subresource.data.len() < required {
            return Err(ApiError::InvalidParameter(format!(
                "{} bytes of initial data for subresource {}, {} required",
                subresource.data.len(),
                index,
                required
            )));
        }

        let dest_pitch = footprint.row_pitch as usize;
        for slice in 0..depth {
            for row in 0..rows {
                let source = slice * slice_pitch + row * row_pitch;
                let dest = footprint.offset as usize + (slice * rows + row) * dest_pitch;
                bytes[dest..dest + row_bytes].copy_from_slice(&subresource.data[source..source + row_bytes]);
            }
        }
    }
    Ok((footprints, bytes))
}

// ============================================================================
// DeviceApi
// ============================================================================

impl DeviceApi for D3D12Device {
    fn api(&self) -> GraphicsApi {
        GraphicsApi::D3D12
    }

    fn native(&self) -> u64 {
        self.driver.device().raw()
    }

    fn check_capability(&self, capability: DeviceCaps) -> bool {
        match capability {
            DeviceCaps::ComputeShader
            | DeviceCaps::GeometryShader
            | DeviceCaps::HullAndDomainShader
            | DeviceCaps::LogicOp
            | DeviceCaps::DualSourceBlend
            | DeviceCaps::IndependentBlend
            | DeviceCaps::FillModeNonSolid
            | DeviceCaps::MultiViewport
            | DeviceCaps::PartialPushConstantUpdates
            | DeviceCaps::DrawInstanced
            | DeviceCaps::DrawOrDispatchIndirect
            | DeviceCaps::CopyBufferRegion
            | DeviceCaps::CopyBufferToTexture
            | DeviceCaps::ResolveRegion
            | DeviceCaps::SamplerCompare
            | DeviceCaps::SamplerAnisotropic
            | DeviceCaps::SharedResource => true,
            DeviceCaps::Blit | DeviceCaps::SamplerWithResourceView | DeviceCaps::DescriptorSets => false,
        }
    }

    fn check_format_support(&self, format: Format, usage: ResourceUsage) -> bool {
        let Some(support) = self.driver.format_support(convert_format(format)) else {
            return false;
        };
        let required = convert_usage_to_format_support(usage);
        support & required == required
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> ApiResult<Sampler> {
        let descriptor = self
            .descriptors
            .lock()
            .get_mut(DescriptorHeapKind::Sampler)
            .allocate(self.driver.as_ref())
            .map_err(hresult_to_api_error)?;
        self.driver.create_sampler(&convert_sampler_desc(desc), descriptor);
        self.registry
            .lock()
            .samplers
            .register_or_replace(descriptor, SamplerRecord { desc: *desc, owned: true });
        Ok(Sampler(descriptor))
    }

    fn destroy_sampler(&self, sampler: Sampler) {
        if sampler.is_null() {
            return;
        }
        match self.registry.lock().samplers.unregister(sampler.raw()) {
            Some(record) if record.owned => self
                .descriptors
                .lock()
                .get_mut(DescriptorHeapKind::Sampler)
                .free(sampler.raw()),
            Some(_) => {}
            None => log::warn!("D3D12Device: destroying unknown sampler {:#x}", sampler.raw()),
        }
    }

    fn create_resource(
        &self,
        desc: &ResourceDesc,
        initial_data: Option<&[SubresourceData<'_>]>,
        initial_state: ResourceUsage,
    ) -> ApiResult<Resource> {
        log::trace!("D3D12Device: creating {:?}", desc.ty());
        let (heap, native) = convert_resource_desc(desc)?;
        let prepared = initial_data
            .map(|data| self.prepare_data(desc, &heap, data))
            .transpose()?;

        let forced = required_initial_state(heap.heap_type);
        let final_state = forced.unwrap_or_else(|| convert_usage_to_states(initial_state));
        let create_state = match (&prepared, forced) {
            (Some(PreparedData::Staged { .. }), None) => D3D12_RESOURCE_STATE_COPY_DEST,
            _ => final_state,
        };
        let object = self
            .driver
            .create_committed_resource(&heap, &native, create_state)
            .map_err(hresult_to_api_error)?;

        let filled = match &prepared {
            Some(PreparedData::Mapped(bytes)) => {
                let hr = self.driver.write_resource(object, 0, bytes);
                if failed(hr) {
                    Err(hresult_to_api_error(hr))
                } else {
                    Ok(())
                }
            }
            Some(PreparedData::Staged { footprints, bytes }) => {
                self.upload_staged(object, footprints, bytes, final_state)
            }
            None => Ok(()),
        };
        if let Err(e) = filled {
            self.driver.release(object);
            return Err(e);
        }

        // Record what the driver created, so a full mip chain request
        // reports its actual level count.
        let actual = self
            .driver
            .resource_desc(object)
            .map(|(heap, native)| ResourceDesc {
                usage: desc.usage,
                ..convert_native_desc(&heap, &native)
            })
            .filter(|_| matches!(desc.kind, ResourceKind::Texture(t) if t.levels == 0))
            .unwrap_or(*desc);
        self.finish_resource(object, actual)
    }

    fn destroy_resource(&self, resource: Resource) {
        if resource.is_null() {
            return;
        }
        match self.registry.lock().resources.unregister(resource.raw()) {
            Some(record) if record.owned => {
                self.driver.release(ComPtr(resource.raw()));
            }
            Some(_) => {}
            None => log::warn!("D3D12Device: destroying unknown resource {:#x}", resource.raw()),
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
        let descriptor = self
            .descriptors
            .lock()
            .get_mut(kind.heap())
            .allocate(self.driver.as_ref())
            .map_err(hresult_to_api_error)?;
        self.driver
            .create_view(kind, ComPtr(resource.raw()), Some(&native), descriptor);

        let record = ViewRecord {
            resource,
            kind,
            desc: convert_native_view_desc(kind, &native),
            owned: true,
        };
        if let Err(e) = self.registry.lock().views.register(descriptor, record) {
            self.descriptors.lock().get_mut(kind.heap()).free(descriptor);
            return Err(ApiError::InvalidParameter(e.to_string()));
        }
        Ok(ResourceView(descriptor))
    }

    fn destroy_resource_view(&self, view: ResourceView) {
        if view.is_null() {
            return;
        }
        let record = self.registry.lock().views.unregister(view.raw());
        match record {
            Some(record) if record.owned => self
                .descriptors
                .lock()
                .get_mut(record.kind.heap())
                .free(view.raw()),
            Some(_) => {}
            None => log::warn!("D3D12Device: destroying unknown resource view {:#x}", view.raw()),
        }
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> ApiResult<Pipeline> {
        let object = build_pipeline(self.driver.as_ref(), desc)?;
        let record = PipelineRecord {
            stages: desc.stages(),
            owned: true,
        };
        if let Err(e) = self.registry.lock().pipelines.register(object.raw(), record) {
            self.driver.release(object);
            return Err(ApiError::InvalidParameter(e.to_string()));
        }
        Ok(Pipeline(object.raw()))
    }

    fn destroy_pipeline(&self, pipeline: Pipeline) {
        if pipeline.is_null() {
            return;
        }
        match self.registry.lock().pipelines.unregister(pipeline.raw()) {
            Some(record) if record.owned => {
                self.driver.release(ComPtr(pipeline.raw()));
            }
            Some(_) => {}
            None => log::warn!("D3D12Device: destroying unknown pipeline {:#x}", pipeline.raw()),
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

impl Unknown for D3D12Device {
    fn query_interface(&self, iid: &Guid) -> Result<Queried, HResult> {
        let native = self.driver.device();
        if *iid == IID_IUNKNOWN || *iid == IID_ID3D12DEVICE {
            self.add_ref();
            return Ok(Queried::Proxy);
        }
        if *iid == IID_ID3D12DEVICE1 {
            if !self.is_extended() {
                let upgraded = self.driver.query_interface(native, iid)?;
                self.driver.release(upgraded);
                self.extended.store(true, Ordering::Release);
                log::debug!("D3D12Device: upgraded {:#x} to ID3D12Device1", native.raw());
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
            "ID3D12Device",
            0,
            || self.teardown(),
        )
    }
}

static_assertions::assert_impl_all!(D3D12Device: Send, Sync);
