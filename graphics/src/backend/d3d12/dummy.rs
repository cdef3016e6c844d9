//! In-memory Direct3D 12 driver for testing.
//!
//! The GPU finishes work the moment it is signaled unless signals are
//! deferred, in which case a fence only reaches its value once someone
//! waits for it. Descriptor heaps hand out handles from a range of their
//! own so descriptor writes can be checked by handle.

use std::collections::HashMap;

use lumen_core::events::Rect;
use lumen_core::resource::SubresourceBox;
use lumen_core::Format;
use parking_lot::Mutex;

use super::conversion::*;
use super::driver::*;
use super::pipeline::{ComputeStateDesc, GraphicsStateDesc};
use crate::backend::com::*;
use crate::backend::d3d_state::SamplerStateDesc;
use crate::backend::dummy::DummyObjects;
use crate::backend::dxgi::{convert_dxgi_format, DxgiFormat};

/// Distance between two descriptors of any heap type.
pub const DESCRIPTOR_INCREMENT: u32 = 0x20;

/// Address space reserved for every descriptor heap.
const HEAP_RANGE: u64 = 0x10_0000;

/// Content of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Descriptor {
    View {
        kind: ViewKind,
        resource: ComPtr,
        desc: Option<ViewDesc>,
    },
    Sampler(SamplerStateDesc),
}

/// Native call recorded by the dummy driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub name: &'static str,
    pub object: u64,
}

#[derive(Debug, Clone, Copy)]
struct HeapRecord {
    base: u64,
    count: u32,
}

#[derive(Debug, Default)]
struct State {
    refs: HashMap<u64, u32>,
    resources: HashMap<u64, (HeapProperties, NativeResourceDesc)>,
    creation_states: HashMap<u64, u32>,
    heaps: HashMap<u64, HeapRecord>,
    next_heap_base: u64,
    descriptors: HashMap<u64, Descriptor>,
    fences: HashMap<u64, u64>,
    pending_signals: HashMap<u64, u64>,
    /// Command lists and whether they are open for recording.
    lists: HashMap<u64, bool>,
    executed: Vec<(u64, u64)>,
    barriers: Vec<TransitionBarrier>,
    texture_copies: Vec<(CopyLocation, CopyLocation)>,
    buffer_copies: Vec<(u64, u64, u64)>,
    writes: Vec<(u64, u64, usize)>,
    render_targets: (Vec<u64>, Option<u64>),
    allocator_resets: u32,
    waits: u32,
    back_buffers: Vec<u64>,
}

/// A Direct3D 12 device that only keeps books.
#[derive(Debug)]
pub struct DummyD3D12 {
    device: u64,
    swap_chain: u64,
    objects: DummyObjects,
    state: Mutex<State>,
    calls: Mutex<Vec<RecordedCall>>,
    device1: bool,
    deferred_signals: bool,
}

impl DummyD3D12 {
    /// A device with a two-buffer `width` x `height` swap chain.
    pub fn new(width: u32, height: u32) -> Self {
        let objects = DummyObjects::new(0xC000_0000);
        let device = objects.allocate("device").unwrap_or_default();
        let swap_chain = objects.allocate("swap chain").unwrap_or_default();
        let driver = Self {
            device,
            swap_chain,
            objects,
            state: Mutex::new(State {
                next_heap_base: 0xD000_0000_0000,
                ..Default::default()
            }),
            calls: Mutex::new(Vec::new()),
            device1: false,
            deferred_signals: false,
        };
        {
            let mut state = driver.state.lock();
            state.refs.insert(device, 1);
            state.refs.insert(swap_chain, 1);
        }
        driver.create_back_buffers(width, height);
        driver
    }

    /// Report `ID3D12Device1` support.
    pub fn with_device1(mut self) -> Self {
        self.device1 = true;
        self
    }

    /// Keep fences behind their signaled values until they are waited on.
    pub fn with_deferred_signals(mut self) -> Self {
        self.deferred_signals = true;
        self
    }

    pub fn objects(&self) -> &DummyObjects {
        &self.objects
    }

    pub fn swap_chain(&self) -> ComPtr {
        ComPtr(self.swap_chain)
    }

    pub fn back_buffers(&self) -> Vec<ComPtr> {
        self.state
            .lock()
            .back_buffers
            .iter()
            .map(|buffer| ComPtr(*buffer))
            .collect()
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

    /// Command lists submitted to `queue`, oldest first.
    pub fn executed(&self, queue: ComPtr) -> Vec<ComPtr> {
        self.state
            .lock()
            .executed
            .iter()
            .filter(|(submitted_to, _)| *submitted_to == queue.raw())
            .map(|(_, list)| ComPtr(*list))
            .collect()
    }

    pub fn barriers(&self) -> Vec<TransitionBarrier> {
        self.state.lock().barriers.clone()
    }

    /// `(dest, source)` of every texture copy.
    pub fn texture_copies(&self) -> Vec<(CopyLocation, CopyLocation)> {
        self.state.lock().texture_copies.clone()
    }

    /// `(dest, source, size)` of every buffer copy.
    pub fn buffer_copies(&self) -> Vec<(u64, u64, u64)> {
        self.state.lock().buffer_copies.clone()
    }

    /// `(resource, offset, bytes)` of every mapped write.
    pub fn writes(&self) -> Vec<(u64, u64, usize)> {
        self.state.lock().writes.clone()
    }

    pub fn descriptor(&self, handle: u64) -> Option<Descriptor> {
        self.state.lock().descriptors.get(&handle).copied()
    }

    /// State `resource` was created in.
    pub fn creation_state(&self, resource: ComPtr) -> Option<u32> {
        self.state.lock().creation_states.get(&resource.raw()).copied()
    }

    /// Descriptors last bound with `OMSetRenderTargets`, with single handle
    /// ranges expanded.
    pub fn bound_render_targets(&self) -> (Vec<u64>, Option<u64>) {
        self.state.lock().render_targets.clone()
    }

    pub fn allocator_resets(&self) -> u32 {
        self.state.lock().allocator_resets
    }

    /// Number of fence waits that had to block.
    pub fn waits(&self) -> u32 {
        self.state.lock().waits
    }

    pub fn is_open(&self, list: ComPtr) -> bool {
        self.state.lock().lists.get(&list.raw()).copied().unwrap_or(false)
    }

    fn record(&self, name: &'static str, object: u64) {
        self.calls.lock().push(RecordedCall { name, object });
    }

    fn list_call(&self, name: &'static str, list: ComPtr) {
        debug_assert!(self.is_open(list), "{name} on a closed command list");
        self.record(name, list.raw());
    }

    fn new_object(&self, kind: &'static str) -> Result<ComPtr, HResult> {
        let handle = self.objects.allocate(kind).ok_or(E_OUTOFMEMORY)?;
        self.state.lock().refs.insert(handle, 1);
        Ok(ComPtr(handle))
    }

    fn create_back_buffers(&self, width: u32, height: u32) {
        let desc = NativeResourceDesc {
            width: u64::from(width),
            height,
            format: Format::R8G8B8A8Unorm.raw(),
            flags: D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET,
            ..Default::default()
        };
        let buffers: Vec<u64> = (0..2)
            .filter_map(|_| self.objects.allocate("back buffer"))
            .collect();
        let mut state = self.state.lock();
        for buffer in &buffers {
            state.refs.insert(*buffer, 1);
            state.resources.insert(*buffer, (HeapProperties::default(), desc));
            state.creation_states.insert(*buffer, D3D12_RESOURCE_STATE_COMMON);
        }
        state.back_buffers = buffers;
    }

    fn destroy(&self, state: &mut State, handle: u64) {
        state.refs.remove(&handle);
        state.resources.remove(&handle);
        state.creation_states.remove(&handle);
        state.fences.remove(&handle);
        state.pending_signals.remove(&handle);
        state.lists.remove(&handle);
        if let Some(heap) = state.heaps.remove(&handle) {
            let end = heap.base + u64::from(heap.count) * u64::from(DESCRIPTOR_INCREMENT);
            state
                .descriptors
                .retain(|descriptor, _| *descriptor < heap.base || *descriptor >= end);
        }
        self.objects.free(handle);
    }

    fn release_locked(&self, state: &mut State, object: u64) -> u32 {
        let Some(count) = state.refs.get_mut(&object) else {
            log::warn!("DummyD3D12: Release on dead object {:#x}", object);
            return 0;
        };
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            if object == self.device {
                let mut owned = state.back_buffers.clone();
                owned.push(self.swap_chain);
                for handle in owned {
                    if state.refs.contains_key(&handle) {
                        self.destroy(state, handle);
                    }
                }
            }
            self.destroy(state, object);
        }
        remaining
    }

    fn heap_of(state: &State, descriptor: u64) -> bool {
        state.heaps.values().any(|heap| {
            descriptor >= heap.base
                && descriptor < heap.base + u64::from(heap.count) * u64::from(DESCRIPTOR_INCREMENT)
        })
    }

    fn write_descriptor(&self, descriptor: u64, content: Descriptor) {
        let mut state = self.state.lock();
        debug_assert!(Self::heap_of(&state, descriptor), "descriptor {descriptor:#x} outside any heap");
        state.descriptors.insert(descriptor, content);
    }
}

impl ComDriver for DummyD3D12 {
    fn add_ref(&self, object: ComPtr) -> u32 {
        let mut state = self.state.lock();
        match state.refs.get_mut(&object.raw()) {
            Some(count) => {
                *count += 1;
                *count
            }
            None => {
                log::warn!("DummyD3D12: AddRef on dead object {:#x}", object.raw());
                0
            }
        }
    }

    fn release(&self, object: ComPtr) -> u32 {
        let mut state = self.state.lock();
        self.release_locked(&mut state, object.raw())
    }

    fn query_interface(&self, object: ComPtr, iid: &Guid) -> Result<ComPtr, HResult> {
        let supported = object.raw() == self.device
            && (*iid == IID_IUNKNOWN
                || *iid == IID_ID3D12DEVICE
                || (*iid == IID_ID3D12DEVICE1 && self.device1));
        if !supported {
            return Err(E_NOINTERFACE);
        }
        self.add_ref(object);
        Ok(object)
    }
}

impl D3D12Driver for DummyD3D12 {
    fn device(&self) -> ComPtr {
        ComPtr(self.device)
    }

    fn format_support(&self, format: DxgiFormat) -> Option<u32> {
        let format = convert_dxgi_format(format);
        if format == Format::Unknown {
            return None;
        }
        let mut support = D3D12_FORMAT_SUPPORT1_BUFFER
            | D3D12_FORMAT_SUPPORT1_SHADER_LOAD
            | D3D12_FORMAT_SUPPORT1_SHADER_SAMPLE;
        if format.is_depth_stencil() {
            support = D3D12_FORMAT_SUPPORT1_DEPTH_STENCIL;
        } else if !format.is_compressed() {
            support |= D3D12_FORMAT_SUPPORT1_RENDER_TARGET
                | D3D12_FORMAT_SUPPORT1_MULTISAMPLE_RESOLVE
                | D3D12_FORMAT_SUPPORT1_TYPED_UNORDERED_ACCESS_VIEW;
        }
        Some(support)
    }

    fn create_committed_resource(
        &self,
        heap: &HeapProperties,
        desc: &NativeResourceDesc,
        initial_state: u32,
    ) -> Result<ComPtr, HResult> {
        if desc.width == 0 || (!desc.is_buffer() && convert_dxgi_format(desc.format) == Format::Unknown) {
            return Err(E_INVALIDARG);
        }
        if let Some(required) = required_initial_state(heap.heap_type) {
            if initial_state != required {
                return Err(E_INVALIDARG);
            }
        }
        let mut desc = *desc;
        if !desc.is_buffer() && desc.mip_levels == 0 {
            desc.mip_levels = full_mip_count(&desc);
        }
        let resource = self.new_object(if desc.is_buffer() { "buffer" } else { "texture" })?;
        let mut state = self.state.lock();
        state.resources.insert(resource.raw(), (*heap, desc));
        state.creation_states.insert(resource.raw(), initial_state);
        Ok(resource)
    }

    fn create_descriptor_heap(&self, _kind: DescriptorHeapKind, count: u32) -> Result<(ComPtr, u64), HResult> {
        if count == 0 {
            return Err(E_INVALIDARG);
        }
        let heap = self.new_object("descriptor heap")?;
        let mut state = self.state.lock();
        let base = state.next_heap_base;
        state.next_heap_base += HEAP_RANGE;
        state.heaps.insert(heap.raw(), HeapRecord { base, count });
        Ok((heap, base))
    }

    fn descriptor_increment(&self, _kind: DescriptorHeapKind) -> u32 {
        DESCRIPTOR_INCREMENT
    }

    fn create_view(&self, kind: ViewKind, resource: ComPtr, desc: Option<&ViewDesc>, descriptor: u64) {
        self.record(kind.name(), descriptor);
        self.write_descriptor(
            descriptor,
            Descriptor::View {
                kind,
                resource,
                desc: desc.copied(),
            },
        );
    }

    fn create_sampler(&self, desc: &SamplerStateDesc, descriptor: u64) {
        self.record("sampler", descriptor);
        self.write_descriptor(descriptor, Descriptor::Sampler(*desc));
    }

    fn copy_descriptor(&self, _kind: DescriptorHeapKind, dest: u64, source: u64) {
        self.record("CopyDescriptorsSimple", dest);
        let content = self.state.lock().descriptors.get(&source).copied();
        if let Some(content) = content {
            self.write_descriptor(dest, content);
        }
    }

    fn create_graphics_pipeline_state(&self, desc: &GraphicsStateDesc) -> Result<ComPtr, HResult> {
        if desc.vs.is_empty() {
            return Err(E_INVALIDARG);
        }
        self.new_object("graphics pipeline state")
    }

    fn create_compute_pipeline_state(&self, desc: &ComputeStateDesc) -> Result<ComPtr, HResult> {
        if desc.cs.is_empty() {
            return Err(E_INVALIDARG);
        }
        self.new_object("compute pipeline state")
    }

    fn create_command_queue(&self, _list_type: u32) -> Result<ComPtr, HResult> {
        self.new_object("command queue")
    }

    fn create_command_allocator(&self, _list_type: u32) -> Result<ComPtr, HResult> {
        self.new_object("command allocator")
    }

    fn create_command_list(&self, _list_type: u32, allocator: ComPtr, _initial_state: ComPtr) -> Result<ComPtr, HResult> {
        if !self.objects.is_live(allocator.raw()) {
            return Err(E_INVALIDARG);
        }
        let list = self.new_object("command list")?;
        self.state.lock().lists.insert(list.raw(), true);
        Ok(list)
    }

    fn create_fence(&self, initial_value: u64) -> Result<ComPtr, HResult> {
        let fence = self.new_object("fence")?;
        self.state.lock().fences.insert(fence.raw(), initial_value);
        Ok(fence)
    }

    fn resource_desc(&self, resource: ComPtr) -> Option<(HeapProperties, NativeResourceDesc)> {
        self.state.lock().resources.get(&resource.raw()).copied()
    }

    fn write_resource(&self, resource: ComPtr, offset: u64, data: &[u8]) -> HResult {
        let mut state = self.state.lock();
        let Some((heap, desc)) = state.resources.get(&resource.raw()).copied() else {
            return E_INVALIDARG;
        };
        if heap.heap_type == D3D12_HEAP_TYPE_DEFAULT || offset + data.len() as u64 > desc.width {
            return E_INVALIDARG;
        }
        state.writes.push((resource.raw(), offset, data.len()));
        S_OK
    }

    fn fence_completed_value(&self, fence: ComPtr) -> u64 {
        self.state.lock().fences.get(&fence.raw()).copied().unwrap_or(0)
    }

    fn wait_for_fence(&self, fence: ComPtr, value: u64) -> HResult {
        let mut state = self.state.lock();
        let completed = state.fences.get(&fence.raw()).copied().unwrap_or(0);
        if completed >= value {
            return S_OK;
        }
        match state.pending_signals.get(&fence.raw()).copied() {
            Some(pending) if pending >= value => {
                state.pending_signals.remove(&fence.raw());
                state.fences.insert(fence.raw(), pending);
                state.waits += 1;
                S_OK
            }
            // Nothing will ever signal the value.
            _ => E_FAIL,
        }
    }

    fn execute_command_lists(&self, queue: ComPtr, lists: &[ComPtr]) {
        self.record("ExecuteCommandLists", queue.raw());
        let mut state = self.state.lock();
        for list in lists {
            debug_assert_eq!(state.lists.get(&list.raw()), Some(&false), "executing an open command list");
            state.executed.push((queue.raw(), list.raw()));
        }
    }

    fn signal(&self, queue: ComPtr, fence: ComPtr, value: u64) -> HResult {
        self.record("Signal", queue.raw());
        let mut state = self.state.lock();
        if !state.fences.contains_key(&fence.raw()) {
            return E_INVALIDARG;
        }
        if self.deferred_signals {
            state.pending_signals.insert(fence.raw(), value);
        } else {
            state.fences.insert(fence.raw(), value);
        }
        S_OK
    }

    fn reset_command_allocator(&self, allocator: ComPtr) -> HResult {
        self.record("Reset", allocator.raw());
        self.state.lock().allocator_resets += 1;
        S_OK
    }

    fn close_command_list(&self, list: ComPtr) -> HResult {
        self.record("Close", list.raw());
        match self.state.lock().lists.get_mut(&list.raw()) {
            Some(open) if *open => {
                *open = false;
                S_OK
            }
            _ => E_FAIL,
        }
    }

    fn reset_command_list(&self, list: ComPtr, _allocator: ComPtr, _initial_state: ComPtr) -> HResult {
        self.record("Reset", list.raw());
        match self.state.lock().lists.get_mut(&list.raw()) {
            Some(open) => {
                *open = true;
                S_OK
            }
            None => E_INVALIDARG,
        }
    }

    fn resource_barrier(&self, list: ComPtr, barriers: &[TransitionBarrier]) {
        self.list_call("ResourceBarrier", list);
        self.state.lock().barriers.extend_from_slice(barriers);
    }

    fn copy_buffer_region(&self, list: ComPtr, dest: ComPtr, _dest_offset: u64, source: ComPtr, _source_offset: u64, size: u64) {
        self.list_call("CopyBufferRegion", list);
        self.state
            .lock()
            .buffer_copies
            .push((dest.raw(), source.raw(), size));
    }

    fn copy_texture_region(
        &self,
        list: ComPtr,
        dest: &CopyLocation,
        _dest_offset: [u32; 3],
        source: &CopyLocation,
        _source_box: Option<&SubresourceBox>,
    ) {
        self.list_call("CopyTextureRegion", list);
        self.state.lock().texture_copies.push((*dest, *source));
    }

    fn copy_resource(&self, list: ComPtr, dest: ComPtr, _source: ComPtr) {
        self.list_call("CopyResource", list);
        self.record("CopyResource", dest.raw());
    }

    fn om_set_render_targets(&self, list: ComPtr, count: u32, rtvs: &[u64], single_handle_range: bool, dsv: Option<u64>) {
        self.list_call("OMSetRenderTargets", list);
        let rtvs = if single_handle_range {
            let first = rtvs.first().copied().unwrap_or(0);
            (0..u64::from(count))
                .map(|index| first + index * u64::from(DESCRIPTOR_INCREMENT))
                .collect()
        } else {
            rtvs[..count as usize].to_vec()
        };
        self.state.lock().render_targets = (rtvs, dsv);
    }

    fn begin_render_pass(&self, list: ComPtr, rtvs: &[u64], dsv: Option<u64>) {
        self.list_call("BeginRenderPass", list);
        self.state.lock().render_targets = (rtvs.to_vec(), dsv);
    }

    fn end_render_pass(&self, list: ComPtr) {
        self.list_call("EndRenderPass", list);
    }

    fn clear_render_target_view(&self, list: ComPtr, rtv: u64, _color: [f32; 4], _rects: &[Rect]) {
        self.list_call("ClearRenderTargetView", list);
        self.record("ClearRenderTargetView", rtv);
    }

    fn clear_depth_stencil_view(&self, list: ComPtr, dsv: u64, _flags: u32, _depth: f32, _stencil: u8, _rects: &[Rect]) {
        self.list_call("ClearDepthStencilView", list);
        self.record("ClearDepthStencilView", dsv);
    }

    fn set_pipeline_state(&self, list: ComPtr, pipeline: ComPtr) {
        self.list_call("SetPipelineState", list);
        self.record("SetPipelineState", pipeline.raw());
    }

    fn draw_instanced(&self, list: ComPtr, _vertex_count: u32, _instance_count: u32, _first_vertex: u32, _first_instance: u32) {
        self.list_call("DrawInstanced", list);
    }

    fn draw_indexed_instanced(
        &self,
        list: ComPtr,
        _index_count: u32,
        _instance_count: u32,
        _first_index: u32,
        _base_vertex: i32,
        _first_instance: u32,
    ) {
        self.list_call("DrawIndexedInstanced", list);
    }

    fn dispatch(&self, list: ComPtr, _x: u32, _y: u32, _z: u32) {
        self.list_call("Dispatch", list);
    }

    fn swapchain_buffers(&self, swapchain: ComPtr) -> Result<Vec<ComPtr>, HResult> {
        if swapchain.raw() != self.swap_chain {
            return Err(DXGI_ERROR_INVALID_CALL);
        }
        let buffers = self.back_buffers();
        for buffer in &buffers {
            self.add_ref(*buffer);
        }
        Ok(buffers)
    }

    fn present(&self, swapchain: ComPtr, _sync_interval: u32, _flags: u32) -> HResult {
        self.record("Present", swapchain.raw());
        S_OK
    }

    fn resize_buffers(&self, swapchain: ComPtr, _count: u32, width: u32, height: u32, _format: DxgiFormat) -> HResult {
        self.record("ResizeBuffers", swapchain.raw());
        let old = self.back_buffers();
        // Buffers must not be referenced outside the swap chain.
        if old.iter().any(|buffer| self.ref_count(*buffer) > 1) {
            return DXGI_ERROR_INVALID_CALL;
        }
        {
            let mut state = self.state.lock();
            for buffer in old {
                self.destroy(&mut state, buffer.raw());
            }
        }
        self.create_back_buffers(width, height);
        S_OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_heap_requires_generic_read() {
        let driver = DummyD3D12::new(64, 64);
        let heap = HeapProperties {
            heap_type: D3D12_HEAP_TYPE_UPLOAD,
            ..Default::default()
        };
        let desc = NativeResourceDesc::buffer(256);
        assert_eq!(
            driver.create_committed_resource(&heap, &desc, D3D12_RESOURCE_STATE_COMMON),
            Err(E_INVALIDARG)
        );
        let buffer = driver
            .create_committed_resource(&heap, &desc, D3D12_RESOURCE_STATE_GENERIC_READ)
            .unwrap();
        assert_eq!(driver.write_resource(buffer, 0, &[0; 256]), S_OK);
        assert_eq!(driver.write_resource(buffer, 1, &[0; 256]), E_INVALIDARG);
        driver.release(buffer);
    }

    #[test]
    fn test_heap_release_drops_descriptors() {
        let driver = DummyD3D12::new(64, 64);
        let (heap, base) = driver.create_descriptor_heap(DescriptorHeapKind::Rtv, 4).unwrap();
        let back_buffer = driver.back_buffers()[0];
        driver.create_view(ViewKind::RenderTarget, back_buffer, None, base);
        assert!(matches!(driver.descriptor(base), Some(Descriptor::View { .. })));
        driver.release(heap);
        assert_eq!(driver.descriptor(base), None);
    }

    #[test]
    fn test_deferred_signal_completes_on_wait() {
        let driver = DummyD3D12::new(64, 64).with_deferred_signals();
        let queue = driver.create_command_queue(D3D12_COMMAND_LIST_TYPE_DIRECT).unwrap();
        let fence = driver.create_fence(0).unwrap();
        assert_eq!(driver.signal(queue, fence, 1), S_OK);
        assert_eq!(driver.fence_completed_value(fence), 0);
        assert_eq!(driver.wait_for_fence(fence, 1), S_OK);
        assert_eq!(driver.fence_completed_value(fence), 1);
        assert_eq!(driver.waits(), 1);
        assert_eq!(driver.wait_for_fence(fence, 2), E_FAIL);
    }

    #[test]
    fn test_resize_needs_released_buffers() {
        let driver = DummyD3D12::new(64, 64);
        let buffers = driver.swapchain_buffers(driver.swap_chain()).unwrap();
        assert_eq!(
            driver.resize_buffers(driver.swap_chain(), 2, 128, 128, 0),
            DXGI_ERROR_INVALID_CALL
        );
        for buffer in buffers {
            driver.release(buffer);
        }
        assert_eq!(driver.resize_buffers(driver.swap_chain(), 2, 128, 128, 0), S_OK);
        let (_, desc) = driver.resource_desc(driver.back_buffers()[0]).unwrap();
        assert_eq!(desc.width, 128);
    }

    #[test]
    fn test_device_release_destroys_everything() {
        let driver = DummyD3D12::new(64, 64);
        driver.release(driver.device());
        assert_eq!(driver.objects().live_count(), 0);
    }
}
