//! Native `ID3D12Device`, command queue and command list entry points used
//! by the layer.
//!
//! Descriptors are addressed by the `ptr` of their
//! `D3D12_CPU_DESCRIPTOR_HANDLE`. View and sampler creation write into a
//! descriptor and cannot fail.

use lumen_core::events::Rect;
use lumen_core::resource::SubresourceBox;

use super::conversion::{DescriptorHeapKind, Footprint, HeapProperties, NativeResourceDesc, ViewDesc, ViewKind};
use super::pipeline::{ComputeStateDesc, GraphicsStateDesc};
use crate::backend::com::{ComDriver, ComPtr, Guid, HResult};
use crate::backend::d3d_state::SamplerStateDesc;
use crate::backend::dxgi::DxgiFormat;

pub const IID_ID3D12DEVICE: Guid = Guid::new(
    0x189819F1,
    0x1DB6,
    0x4B57,
    [0xBE, 0x54, 0x18, 0x21, 0x33, 0x9B, 0x85, 0xF7],
);

pub const IID_ID3D12DEVICE1: Guid = Guid::new(
    0x77ACCE80,
    0x638E,
    0x4E65,
    [0x88, 0x95, 0xC1, 0xF2, 0x33, 0x86, 0x86, 0x3E],
);

pub const D3D12_COMMAND_LIST_TYPE_DIRECT: u32 = 0;
pub const D3D12_COMMAND_LIST_TYPE_BUNDLE: u32 = 1;
pub const D3D12_COMMAND_LIST_TYPE_COMPUTE: u32 = 2;
pub const D3D12_COMMAND_LIST_TYPE_COPY: u32 = 3;

/// Source or destination of `CopyTextureRegion`, `D3D12_TEXTURE_COPY_LOCATION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyLocation {
    Subresource { resource: ComPtr, index: u32 },
    Footprint { resource: ComPtr, footprint: Footprint },
}

impl CopyLocation {
    pub fn resource(&self) -> ComPtr {
        match self {
            Self::Subresource { resource, .. } | Self::Footprint { resource, .. } => *resource,
        }
    }
}

/// `D3D12_RESOURCE_TRANSITION_BARRIER` of all subresources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionBarrier {
    pub resource: ComPtr,
    pub before: u32,
    pub after: u32,
}

pub trait D3D12Driver: ComDriver {
    /// The native device.
    fn device(&self) -> ComPtr;

    /// `CheckFeatureSupport(D3D12_FEATURE_FORMAT_SUPPORT)`, `None` when the
    /// format is not supported at all.
    fn format_support(&self, format: DxgiFormat) -> Option<u32>;

    // ========================================================================
    // Object creation. Returned objects carry one reference.
    // ========================================================================

    fn create_committed_resource(
        &self,
        heap: &HeapProperties,
        desc: &NativeResourceDesc,
        initial_state: u32,
    ) -> Result<ComPtr, HResult>;

    /// `CreateDescriptorHeap` of a CPU-only heap. Returns the heap and the
    /// handle of its first descriptor.
    fn create_descriptor_heap(&self, kind: DescriptorHeapKind, count: u32) -> Result<(ComPtr, u64), HResult>;

    /// `GetDescriptorHandleIncrementSize`.
    fn descriptor_increment(&self, kind: DescriptorHeapKind) -> u32;

    /// Write a view into `descriptor`. `None` asks for the default view of
    /// the whole resource.
    fn create_view(&self, kind: ViewKind, resource: ComPtr, desc: Option<&ViewDesc>, descriptor: u64);

    fn create_sampler(&self, desc: &SamplerStateDesc, descriptor: u64);

    /// `CopyDescriptorsSimple` of a single descriptor.
    fn copy_descriptor(&self, kind: DescriptorHeapKind, dest: u64, source: u64);

    fn create_graphics_pipeline_state(&self, desc: &GraphicsStateDesc) -> Result<ComPtr, HResult>;
    fn create_compute_pipeline_state(&self, desc: &ComputeStateDesc) -> Result<ComPtr, HResult>;

    fn create_command_queue(&self, list_type: u32) -> Result<ComPtr, HResult>;
    fn create_command_allocator(&self, list_type: u32) -> Result<ComPtr, HResult>;
    /// `CreateCommandList`. The list starts out open for recording.
    fn create_command_list(&self, list_type: u32, allocator: ComPtr, initial_state: ComPtr) -> Result<ComPtr, HResult>;
    fn create_fence(&self, initial_value: u64) -> Result<ComPtr, HResult>;

    // ========================================================================
    // Object queries
    // ========================================================================

    /// `GetDesc` and `GetHeapProperties` of a resource.
    fn resource_desc(&self, resource: ComPtr) -> Option<(HeapProperties, NativeResourceDesc)>;

    /// `Map`, copy `data` to `offset` and `Unmap` of subresource 0.
    fn write_resource(&self, resource: ComPtr, offset: u64, data: &[u8]) -> HResult;

    // ========================================================================
    // Synchronization
    // ========================================================================

    fn fence_completed_value(&self, fence: ComPtr) -> u64;

    /// Block until `fence` reaches `value`.
    fn wait_for_fence(&self, fence: ComPtr, value: u64) -> HResult;

    // ========================================================================
    // Command queue
    // ========================================================================

    fn execute_command_lists(&self, queue: ComPtr, lists: &[ComPtr]);
    fn signal(&self, queue: ComPtr, fence: ComPtr, value: u64) -> HResult;

    // ========================================================================
    // Command allocator and list
    // ========================================================================

    fn reset_command_allocator(&self, allocator: ComPtr) -> HResult;
    fn close_command_list(&self, list: ComPtr) -> HResult;
    fn reset_command_list(&self, list: ComPtr, allocator: ComPtr, initial_state: ComPtr) -> HResult;

    fn resource_barrier(&self, list: ComPtr, barriers: &[TransitionBarrier]);
    fn copy_buffer_region(&self, list: ComPtr, dest: ComPtr, dest_offset: u64, source: ComPtr, source_offset: u64, size: u64);
    fn copy_texture_region(
        &self,
        list: ComPtr,
        dest: &CopyLocation,
        dest_offset: [u32; 3],
        source: &CopyLocation,
        source_box: Option<&SubresourceBox>,
    );
    fn copy_resource(&self, list: ComPtr, dest: ComPtr, source: ComPtr);

    /// `OMSetRenderTargets`. With `single_handle_range` the render targets
    /// are `count` consecutive descriptors starting at `rtvs[0]`.
    fn om_set_render_targets(&self, list: ComPtr, count: u32, rtvs: &[u64], single_handle_range: bool, dsv: Option<u64>);
    /// `ID3D12GraphicsCommandList4::BeginRenderPass` with the descriptors
    /// of its render targets and depth-stencil.
    fn begin_render_pass(&self, list: ComPtr, rtvs: &[u64], dsv: Option<u64>);
    fn end_render_pass(&self, list: ComPtr);
    fn clear_render_target_view(&self, list: ComPtr, rtv: u64, color: [f32; 4], rects: &[Rect]);
    fn clear_depth_stencil_view(&self, list: ComPtr, dsv: u64, flags: u32, depth: f32, stencil: u8, rects: &[Rect]);
    fn set_pipeline_state(&self, list: ComPtr, pipeline: ComPtr);
    fn draw_instanced(
        &self,
        list: ComPtr,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    fn draw_indexed_instanced(
        &self,
        list: ComPtr,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    );
    fn dispatch(&self, list: ComPtr, x: u32, y: u32, z: u32);

    // ========================================================================
    // Swap chain
    // ========================================================================

    /// `IDXGISwapChain3::GetBuffer` for every buffer, each carrying one reference.
    fn swapchain_buffers(&self, swapchain: ComPtr) -> Result<Vec<ComPtr>, HResult>;
    fn present(&self, swapchain: ComPtr, sync_interval: u32, flags: u32) -> HResult;
    fn resize_buffers(&self, swapchain: ComPtr, count: u32, width: u32, height: u32, format: DxgiFormat) -> HResult;
}

/// Name of a command list type, for diagnostics.
pub fn command_list_type_name(list_type: u32) -> &'static str {
    match list_type {
        D3D12_COMMAND_LIST_TYPE_DIRECT => "direct",
        D3D12_COMMAND_LIST_TYPE_BUNDLE => "bundle",
        D3D12_COMMAND_LIST_TYPE_COMPUTE => "compute",
        D3D12_COMMAND_LIST_TYPE_COPY => "copy",
        _ => "unknown",
    }
}
