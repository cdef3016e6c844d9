//! Translation between Direct3D 12 descriptions and the abstract model.
//!
//! [`ResourceUsage`] bits mirror `D3D12_RESOURCE_STATES`, so states convert
//! by masking. Views are written into descriptors; a shader resource view
//! carries a component mapping, which is where the alpha-only and `X8`
//! swizzles go.

use lumen_core::resource::{ResourceFlags, ViewRange, ALL_REMAINING};
use lumen_core::{
    ApiError, ApiResult, Format, MemoryHeap, ResourceDesc, ResourceKind, ResourceUsage,
    ResourceViewDesc, ResourceViewType, TextureDesc, TextureDimension,
};

use crate::backend::dxgi::{
    convert_dxgi_format, convert_format, dxgi_view_format, DxgiFormat, DXGI_FORMAT_UNKNOWN,
};

// ============================================================================
// Constants
// ============================================================================

pub const D3D12_HEAP_TYPE_DEFAULT: u32 = 1;
pub const D3D12_HEAP_TYPE_UPLOAD: u32 = 2;
pub const D3D12_HEAP_TYPE_READBACK: u32 = 3;
pub const D3D12_HEAP_TYPE_CUSTOM: u32 = 4;

pub const D3D12_HEAP_FLAG_NONE: u32 = 0;
pub const D3D12_HEAP_FLAG_SHARED: u32 = 0x1;

pub const D3D12_RESOURCE_DIMENSION_BUFFER: u32 = 1;
pub const D3D12_RESOURCE_DIMENSION_TEXTURE1D: u32 = 2;
pub const D3D12_RESOURCE_DIMENSION_TEXTURE2D: u32 = 3;
pub const D3D12_RESOURCE_DIMENSION_TEXTURE3D: u32 = 4;

pub const D3D12_TEXTURE_LAYOUT_UNKNOWN: u32 = 0;
pub const D3D12_TEXTURE_LAYOUT_ROW_MAJOR: u32 = 1;

pub const D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET: u32 = 0x1;
pub const D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL: u32 = 0x2;
pub const D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS: u32 = 0x4;
pub const D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE: u32 = 0x8;
pub const D3D12_RESOURCE_FLAG_ALLOW_SIMULTANEOUS_ACCESS: u32 = 0x20;

pub const D3D12_RESOURCE_STATE_COMMON: u32 = 0;
pub const D3D12_RESOURCE_STATE_COPY_DEST: u32 = 0x400;
pub const D3D12_RESOURCE_STATE_GENERIC_READ: u32 = 0xAC3;

pub const D3D12_CLEAR_FLAG_DEPTH: u32 = 0x1;
pub const D3D12_CLEAR_FLAG_STENCIL: u32 = 0x2;

pub const D3D12_TEXTURE_DATA_PITCH_ALIGNMENT: u64 = 256;
pub const D3D12_TEXTURE_DATA_PLACEMENT_ALIGNMENT: u64 = 512;

pub const D3D12_SIMULTANEOUS_RENDER_TARGET_COUNT: usize = 8;

pub const D3D12_FORMAT_SUPPORT1_BUFFER: u32 = 0x1;
pub const D3D12_FORMAT_SUPPORT1_IA_VERTEX_BUFFER: u32 = 0x2;
pub const D3D12_FORMAT_SUPPORT1_IA_INDEX_BUFFER: u32 = 0x4;
pub const D3D12_FORMAT_SUPPORT1_SHADER_LOAD: u32 = 0x100;
pub const D3D12_FORMAT_SUPPORT1_SHADER_SAMPLE: u32 = 0x200;
pub const D3D12_FORMAT_SUPPORT1_RENDER_TARGET: u32 = 0x4000;
pub const D3D12_FORMAT_SUPPORT1_DEPTH_STENCIL: u32 = 0x10000;
pub const D3D12_FORMAT_SUPPORT1_MULTISAMPLE_RESOLVE: u32 = 0x40000;
pub const D3D12_FORMAT_SUPPORT1_TYPED_UNORDERED_ACCESS_VIEW: u32 = 0x400000;

/// Component selectors of `D3D12_SHADER_COMPONENT_MAPPING`.
pub const D3D12_SHADER_COMPONENT_MAPPING_FROM_MEMORY_COMPONENT_0: u32 = 0;
pub const D3D12_SHADER_COMPONENT_MAPPING_FROM_MEMORY_COMPONENT_1: u32 = 1;
pub const D3D12_SHADER_COMPONENT_MAPPING_FROM_MEMORY_COMPONENT_2: u32 = 2;
pub const D3D12_SHADER_COMPONENT_MAPPING_FROM_MEMORY_COMPONENT_3: u32 = 3;
pub const D3D12_SHADER_COMPONENT_MAPPING_FORCE_VALUE_0: u32 = 4;
pub const D3D12_SHADER_COMPONENT_MAPPING_FORCE_VALUE_1: u32 = 5;

/// `D3D12_ENCODE_SHADER_4_COMPONENT_MAPPING`.
pub const fn encode_component_mapping(r: u32, g: u32, b: u32, a: u32) -> u32 {
    (r & 7) | ((g & 7) << 3) | ((b & 7) << 6) | ((a & 7) << 9) | (1 << 12)
}

/// `D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING`.
pub const D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING: u32 = encode_component_mapping(0, 1, 2, 3);

/// Selector of component `index` in an encoded mapping.
pub fn decode_component_mapping(mapping: u32, index: u32) -> u32 {
    (mapping >> (index * 3)) & 7
}

// ============================================================================
// Native descriptions
// ============================================================================

/// `D3D12_RESOURCE_DESC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeResourceDesc {
    pub dimension: u32,
    pub alignment: u64,
    pub width: u64,
    pub height: u32,
    pub depth_or_array_size: u16,
    pub mip_levels: u16,
    pub format: DxgiFormat,
    pub sample_count: u32,
    pub sample_quality: u32,
    pub layout: u32,
    pub flags: u32,
}

impl Default for NativeResourceDesc {
    fn default() -> Self {
        Self {
            dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            alignment: 0,
            width: 1,
            height: 1,
            depth_or_array_size: 1,
            mip_levels: 1,
            format: DXGI_FORMAT_UNKNOWN,
            sample_count: 1,
            sample_quality: 0,
            layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            flags: 0,
        }
    }
}

impl NativeResourceDesc {
    /// Description of a buffer of `size` bytes.
    pub fn buffer(size: u64) -> Self {
        Self {
            dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            width: size,
            format: DXGI_FORMAT_UNKNOWN,
            layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            ..Default::default()
        }
    }

    pub fn is_buffer(&self) -> bool {
        self.dimension == D3D12_RESOURCE_DIMENSION_BUFFER
    }
}

/// `D3D12_HEAP_PROPERTIES` type and `D3D12_HEAP_FLAGS` of a committed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapProperties {
    pub heap_type: u32,
    pub flags: u32,
}

impl Default for HeapProperties {
    fn default() -> Self {
        Self {
            heap_type: D3D12_HEAP_TYPE_DEFAULT,
            flags: D3D12_HEAP_FLAG_NONE,
        }
    }
}

/// Kind of descriptor a view is written into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    ShaderResource,
    RenderTarget,
    DepthStencil,
    UnorderedAccess,
}

impl ViewKind {
    pub fn from_usage(usage: ResourceUsage) -> Option<Self> {
        if usage.intersects(ResourceUsage::RENDER_TARGET) {
            Some(Self::RenderTarget)
        } else if usage.intersects(ResourceUsage::DEPTH_STENCIL) {
            Some(Self::DepthStencil)
        } else if usage.intersects(ResourceUsage::UNORDERED_ACCESS) {
            Some(Self::UnorderedAccess)
        } else if usage.intersects(ResourceUsage::SHADER_RESOURCE) {
            Some(Self::ShaderResource)
        } else {
            None
        }
    }

    pub fn usage(self) -> ResourceUsage {
        match self {
            Self::ShaderResource => ResourceUsage::SHADER_RESOURCE,
            Self::RenderTarget => ResourceUsage::RENDER_TARGET,
            Self::DepthStencil => ResourceUsage::DEPTH_STENCIL,
            Self::UnorderedAccess => ResourceUsage::UNORDERED_ACCESS,
        }
    }

    pub fn heap(self) -> DescriptorHeapKind {
        match self {
            Self::RenderTarget => DescriptorHeapKind::Rtv,
            Self::DepthStencil => DescriptorHeapKind::Dsv,
            Self::ShaderResource | Self::UnorderedAccess => DescriptorHeapKind::CbvSrvUav,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ShaderResource => "shader resource view",
            Self::RenderTarget => "render target view",
            Self::DepthStencil => "depth-stencil view",
            Self::UnorderedAccess => "unordered access view",
        }
    }
}

/// `D3D12_DESCRIPTOR_HEAP_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    CbvSrvUav,
    Sampler,
    Rtv,
    Dsv,
}

/// The union of the four `D3D12_*_VIEW_DESC` structures.
///
/// `mip_levels` only applies to shader resource views. `component_mapping`
/// only applies to shader resource views and is ignored otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewDesc {
    pub format: DxgiFormat,
    /// `*_DIMENSION` value of the view kind.
    pub dimension: u32,
    pub component_mapping: u32,
    pub first_mip: u32,
    pub mip_levels: u32,
    pub first_slice: u32,
    pub slices: u32,
    pub first_element: u64,
    pub num_elements: u32,
    pub structure_byte_stride: u32,
}

impl Default for ViewDesc {
    fn default() -> Self {
        Self {
            format: DXGI_FORMAT_UNKNOWN,
            dimension: 0,
            component_mapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            first_mip: 0,
            mip_levels: 1,
            first_slice: 0,
            slices: 1,
            first_element: 0,
            num_elements: 0,
            structure_byte_stride: 0,
        }
    }
}

/// Placement of one subresource in an upload buffer,
/// `D3D12_PLACED_SUBRESOURCE_FOOTPRINT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    pub offset: u64,
    pub format: DxgiFormat,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Aligned to [`D3D12_TEXTURE_DATA_PITCH_ALIGNMENT`].
    pub row_pitch: u32,
    /// Rows of blocks, which differs from `height` for compressed formats.
    pub rows: u32,
    /// Bytes of texel data in one row.
    pub row_bytes: u32,
}

// ============================================================================
// View dimensions
// ============================================================================

pub const D3D12_SRV_DIMENSION_BUFFER: u32 = 1;
pub const D3D12_SRV_DIMENSION_TEXTURE1D: u32 = 2;
pub const D3D12_SRV_DIMENSION_TEXTURE1DARRAY: u32 = 3;
pub const D3D12_SRV_DIMENSION_TEXTURE2D: u32 = 4;
pub const D3D12_SRV_DIMENSION_TEXTURE2DARRAY: u32 = 5;
pub const D3D12_SRV_DIMENSION_TEXTURE2DMS: u32 = 6;
pub const D3D12_SRV_DIMENSION_TEXTURE2DMSARRAY: u32 = 7;
pub const D3D12_SRV_DIMENSION_TEXTURE3D: u32 = 8;
pub const D3D12_SRV_DIMENSION_TEXTURECUBE: u32 = 9;
pub const D3D12_SRV_DIMENSION_TEXTURECUBEARRAY: u32 = 10;

pub const D3D12_DSV_DIMENSION_TEXTURE1D: u32 = 1;
pub const D3D12_DSV_DIMENSION_TEXTURE1DARRAY: u32 = 2;
pub const D3D12_DSV_DIMENSION_TEXTURE2D: u32 = 3;
pub const D3D12_DSV_DIMENSION_TEXTURE2DARRAY: u32 = 4;
pub const D3D12_DSV_DIMENSION_TEXTURE2DMS: u32 = 5;
pub const D3D12_DSV_DIMENSION_TEXTURE2DMSARRAY: u32 = 6;

/// `*_VIEW_DIMENSION` of `kind` for an abstract view type. Render target,
/// shader resource and unordered access views share the numbering up to
/// `TEXTURE3D`.
pub fn convert_view_dimension(kind: ViewKind, ty: ResourceViewType) -> Option<u32> {
    use ResourceViewType::*;
    if kind == ViewKind::DepthStencil {
        return match ty {
            Texture1d => Some(D3D12_DSV_DIMENSION_TEXTURE1D),
            Texture1dArray => Some(D3D12_DSV_DIMENSION_TEXTURE1DARRAY),
            Texture2d => Some(D3D12_DSV_DIMENSION_TEXTURE2D),
            Texture2dArray => Some(D3D12_DSV_DIMENSION_TEXTURE2DARRAY),
            Texture2dMultisample => Some(D3D12_DSV_DIMENSION_TEXTURE2DMS),
            Texture2dMultisampleArray => Some(D3D12_DSV_DIMENSION_TEXTURE2DMSARRAY),
            _ => None,
        };
    }
    let dimension = match ty {
        Buffer => D3D12_SRV_DIMENSION_BUFFER,
        Texture1d => D3D12_SRV_DIMENSION_TEXTURE1D,
        Texture1dArray => D3D12_SRV_DIMENSION_TEXTURE1DARRAY,
        Texture2d => D3D12_SRV_DIMENSION_TEXTURE2D,
        Texture2dArray => D3D12_SRV_DIMENSION_TEXTURE2DARRAY,
        Texture2dMultisample => D3D12_SRV_DIMENSION_TEXTURE2DMS,
        Texture2dMultisampleArray => D3D12_SRV_DIMENSION_TEXTURE2DMSARRAY,
        Texture3d => D3D12_SRV_DIMENSION_TEXTURE3D,
        TextureCube => D3D12_SRV_DIMENSION_TEXTURECUBE,
        TextureCubeArray => D3D12_SRV_DIMENSION_TEXTURECUBEARRAY,
        Unknown => return None,
    };
    match kind {
        ViewKind::ShaderResource => Some(dimension),
        ViewKind::RenderTarget if dimension <= D3D12_SRV_DIMENSION_TEXTURE3D => Some(dimension),
        ViewKind::UnorderedAccess
            if dimension <= D3D12_SRV_DIMENSION_TEXTURE3D
                && dimension != D3D12_SRV_DIMENSION_TEXTURE2DMS
                && dimension != D3D12_SRV_DIMENSION_TEXTURE2DMSARRAY =>
        {
            Some(dimension)
        }
        _ => None,
    }
}

pub fn convert_native_view_dimension(kind: ViewKind, dimension: u32) -> ResourceViewType {
    use ResourceViewType::*;
    if kind == ViewKind::DepthStencil {
        return match dimension {
            D3D12_DSV_DIMENSION_TEXTURE1D => Texture1d,
            D3D12_DSV_DIMENSION_TEXTURE1DARRAY => Texture1dArray,
            D3D12_DSV_DIMENSION_TEXTURE2D => Texture2d,
            D3D12_DSV_DIMENSION_TEXTURE2DARRAY => Texture2dArray,
            D3D12_DSV_DIMENSION_TEXTURE2DMS => Texture2dMultisample,
            D3D12_DSV_DIMENSION_TEXTURE2DMSARRAY => Texture2dMultisampleArray,
            _ => Unknown,
        };
    }
    match dimension {
        D3D12_SRV_DIMENSION_BUFFER => Buffer,
        D3D12_SRV_DIMENSION_TEXTURE1D => Texture1d,
        D3D12_SRV_DIMENSION_TEXTURE1DARRAY => Texture1dArray,
        D3D12_SRV_DIMENSION_TEXTURE2D => Texture2d,
        D3D12_SRV_DIMENSION_TEXTURE2DARRAY => Texture2dArray,
        D3D12_SRV_DIMENSION_TEXTURE2DMS => Texture2dMultisample,
        D3D12_SRV_DIMENSION_TEXTURE2DMSARRAY => Texture2dMultisampleArray,
        D3D12_SRV_DIMENSION_TEXTURE3D => Texture3d,
        D3D12_SRV_DIMENSION_TEXTURECUBE if kind == ViewKind::ShaderResource => TextureCube,
        D3D12_SRV_DIMENSION_TEXTURECUBEARRAY if kind == ViewKind::ShaderResource => {
            TextureCubeArray
        }
        _ => Unknown,
    }
}

// ============================================================================
// Heaps and states
// ============================================================================

pub fn convert_memory_heap(heap: MemoryHeap) -> Option<u32> {
    match heap {
        MemoryHeap::GpuOnly => Some(D3D12_HEAP_TYPE_DEFAULT),
        MemoryHeap::CpuToGpu => Some(D3D12_HEAP_TYPE_UPLOAD),
        MemoryHeap::GpuToCpu => Some(D3D12_HEAP_TYPE_READBACK),
        MemoryHeap::CpuOnly | MemoryHeap::Custom => Some(D3D12_HEAP_TYPE_CUSTOM),
        MemoryHeap::Unknown => None,
    }
}

pub fn convert_native_heap_type(heap_type: u32) -> MemoryHeap {
    match heap_type {
        D3D12_HEAP_TYPE_DEFAULT => MemoryHeap::GpuOnly,
        D3D12_HEAP_TYPE_UPLOAD => MemoryHeap::CpuToGpu,
        D3D12_HEAP_TYPE_READBACK => MemoryHeap::GpuToCpu,
        D3D12_HEAP_TYPE_CUSTOM => MemoryHeap::Custom,
        _ => MemoryHeap::Unknown,
    }
}

/// `D3D12_RESOURCE_STATES` for a usage used as a resource state.
///
/// The general and present states are both `COMMON`.
pub fn convert_usage_to_states(usage: ResourceUsage) -> u32 {
    if usage.contains(ResourceUsage::GENERAL) {
        return D3D12_RESOURCE_STATE_COMMON;
    }
    if usage.contains(ResourceUsage::CPU_ACCESS) {
        return D3D12_RESOURCE_STATE_GENERIC_READ;
    }
    usage.bits() & 0xFFFF
}

pub fn convert_native_states(states: u32) -> ResourceUsage {
    match states {
        D3D12_RESOURCE_STATE_COMMON => ResourceUsage::GENERAL,
        D3D12_RESOURCE_STATE_GENERIC_READ => ResourceUsage::CPU_ACCESS,
        states => ResourceUsage::from_bits_truncate(states),
    }
}

/// State a resource must be created in on `heap_type`, if the heap forces one.
pub fn required_initial_state(heap_type: u32) -> Option<u32> {
    match heap_type {
        D3D12_HEAP_TYPE_UPLOAD => Some(D3D12_RESOURCE_STATE_GENERIC_READ),
        D3D12_HEAP_TYPE_READBACK => Some(D3D12_RESOURCE_STATE_COPY_DEST),
        _ => None,
    }
}

pub fn convert_usage_to_resource_flags(usage: ResourceUsage) -> u32 {
    let mut flags = 0;
    if usage.intersects(ResourceUsage::RENDER_TARGET) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
    }
    if usage.intersects(ResourceUsage::DEPTH_STENCIL) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
        if !usage.intersects(ResourceUsage::SHADER_RESOURCE) {
            flags |= D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE;
        }
    }
    if usage.intersects(ResourceUsage::UNORDERED_ACCESS) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
    }
    flags
}

/// Usages a resource with `flags` supports. Every resource can be copied,
/// and buffers can be bound everywhere a buffer goes.
pub fn convert_resource_flags(flags: u32, buffer: bool) -> ResourceUsage {
    let mut usage = ResourceUsage::COPY_DEST | ResourceUsage::COPY_SOURCE;
    if buffer {
        usage |= ResourceUsage::VERTEX_BUFFER
            | ResourceUsage::INDEX_BUFFER
            | ResourceUsage::CONSTANT_BUFFER
            | ResourceUsage::INDIRECT_ARGUMENT;
    } else {
        usage |= ResourceUsage::RESOLVE_SOURCE | ResourceUsage::RESOLVE_DEST;
    }
    if flags & D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET != 0 {
        usage |= ResourceUsage::RENDER_TARGET;
    }
    if flags & D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL != 0 {
        usage |= ResourceUsage::DEPTH_STENCIL;
    }
    if flags & D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS != 0 {
        usage |= ResourceUsage::UNORDERED_ACCESS;
    }
    if flags & D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE == 0 {
        usage |= ResourceUsage::SHADER_RESOURCE;
    }
    usage
}

// ============================================================================
// Resource descriptions
// ============================================================================

/// Native description and heap of a committed resource for `desc`.
pub fn convert_resource_desc(desc: &ResourceDesc) -> ApiResult<(HeapProperties, NativeResourceDesc)> {
    let heap_type = convert_memory_heap(desc.heap)
        .ok_or_else(|| ApiError::Unsupported(format!("memory heap {:?}", desc.heap)))?;
    let heap = HeapProperties {
        heap_type,
        flags: if desc.flags.contains(ResourceFlags::SHARED) {
            D3D12_HEAP_FLAG_SHARED
        } else {
            D3D12_HEAP_FLAG_NONE
        },
    };
    let mut flags = convert_usage_to_resource_flags(desc.usage);
    if desc.flags.contains(ResourceFlags::SHARED) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_SIMULTANEOUS_ACCESS;
    }
    let native = match &desc.kind {
        ResourceKind::Buffer { size, .. } => NativeResourceDesc {
            flags: flags & !D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE,
            ..NativeResourceDesc::buffer(*size)
        },
        ResourceKind::Texture(texture) => {
            let format = convert_format(texture.format);
            if format == DXGI_FORMAT_UNKNOWN {
                return Err(ApiError::Unsupported(format!("format {:?}", texture.format)));
            }
            let dimension = match texture.dimension {
                TextureDimension::D1 => D3D12_RESOURCE_DIMENSION_TEXTURE1D,
                TextureDimension::D2 | TextureDimension::Surface => D3D12_RESOURCE_DIMENSION_TEXTURE2D,
                TextureDimension::D3 => D3D12_RESOURCE_DIMENSION_TEXTURE3D,
            };
            NativeResourceDesc {
                dimension,
                width: u64::from(texture.width),
                height: texture.height,
                depth_or_array_size: texture.depth_or_layers.max(1),
                mip_levels: texture.levels,
                format,
                sample_count: u32::from(texture.samples).max(1),
                flags,
                ..Default::default()
            }
        }
    };
    Ok((heap, native))
}

/// Abstract description of a committed resource.
pub fn convert_native_desc(heap: &HeapProperties, desc: &NativeResourceDesc) -> ResourceDesc {
    let mut resource_flags = ResourceFlags::empty();
    if heap.flags & D3D12_HEAP_FLAG_SHARED != 0 {
        resource_flags |= ResourceFlags::SHARED;
    }
    let kind = if desc.is_buffer() {
        ResourceKind::Buffer {
            size: desc.width,
            stride: 0,
        }
    } else {
        let dimension = match desc.dimension {
            D3D12_RESOURCE_DIMENSION_TEXTURE1D => TextureDimension::D1,
            D3D12_RESOURCE_DIMENSION_TEXTURE3D => TextureDimension::D3,
            _ => TextureDimension::D2,
        };
        ResourceKind::Texture(TextureDesc {
            dimension,
            width: desc.width as u32,
            height: desc.height,
            depth_or_layers: desc.depth_or_array_size,
            levels: desc.mip_levels,
            format: convert_dxgi_format(desc.format),
            samples: desc.sample_count as u16,
        })
    };
    ResourceDesc {
        kind,
        heap: convert_native_heap_type(heap.heap_type),
        usage: convert_resource_flags(desc.flags, desc.is_buffer()),
        flags: resource_flags,
    }
}

/// Number of mip levels of a full chain for a texture of this size.
pub fn full_mip_count(desc: &NativeResourceDesc) -> u16 {
    let largest = desc
        .width
        .max(u64::from(desc.height))
        .max(if desc.dimension == D3D12_RESOURCE_DIMENSION_TEXTURE3D {
            u64::from(desc.depth_or_array_size)
        } else {
            1
        })
        .max(1);
    (64 - largest.leading_zeros()) as u16
}

/// Upload buffer placement of every subresource of `texture`, in
/// subresource order (`level + layer * levels`), and the total size.
pub fn texture_footprints(texture: &TextureDesc) -> (Vec<Footprint>, u64) {
    let levels = u32::from(texture.levels).max(1);
    let format = convert_format(texture.format);
    let mut footprints = Vec::with_capacity(texture.subresource_count() as usize);
    let mut offset = 0u64;
    for _layer in 0..texture.layers() {
        for level in 0..levels {
            let width = texture.level_width(level);
            let height = texture.level_height(level);
            let depth = texture.level_depth(level);
            let rows = if texture.format.is_compressed() {
                height.div_ceil(4)
            } else {
                height
            };
            let row_bytes = texture.format.row_pitch(width);
            let row_pitch = u64::from(row_bytes).next_multiple_of(D3D12_TEXTURE_DATA_PITCH_ALIGNMENT);
            offset = offset.next_multiple_of(D3D12_TEXTURE_DATA_PLACEMENT_ALIGNMENT);
            footprints.push(Footprint {
                offset,
                format,
                width,
                height,
                depth,
                row_pitch: row_pitch as u32,
                rows,
                row_bytes,
            });
            offset += row_pitch * u64::from(rows) * u64::from(depth);
        }
    }
    (footprints, offset)
}

// ============================================================================
// View descriptions
// ============================================================================

/// Component mapping a shader resource view of `format` needs.
///
/// Alpha-only formats are read from the red channel and return `(0, 0, 0, R)`;
/// formats with an undefined alpha channel return one for alpha.
pub fn component_mapping(format: Format) -> u32 {
    if format.is_alpha_only() {
        encode_component_mapping(
            D3D12_SHADER_COMPONENT_MAPPING_FORCE_VALUE_0,
            D3D12_SHADER_COMPONENT_MAPPING_FORCE_VALUE_0,
            D3D12_SHADER_COMPONENT_MAPPING_FORCE_VALUE_0,
            D3D12_SHADER_COMPONENT_MAPPING_FROM_MEMORY_COMPONENT_0,
        )
    } else if format.has_undefined_alpha() {
        encode_component_mapping(
            D3D12_SHADER_COMPONENT_MAPPING_FROM_MEMORY_COMPONENT_0,
            D3D12_SHADER_COMPONENT_MAPPING_FROM_MEMORY_COMPONENT_1,
            D3D12_SHADER_COMPONENT_MAPPING_FROM_MEMORY_COMPONENT_2,
            D3D12_SHADER_COMPONENT_MAPPING_FORCE_VALUE_1,
        )
    } else {
        D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING
    }
}

fn element_size(format: Format, stride: u32) -> u32 {
    match format.bytes_per_block() {
        0 if stride > 0 => stride,
        0 => 4,
        size => size,
    }
}

/// Native description of a view onto a resource described by `resource`.
pub fn convert_view_desc(
    kind: ViewKind,
    desc: &ResourceViewDesc,
    resource: &ResourceDesc,
) -> ApiResult<ViewDesc> {
    let requested = match desc.format {
        Format::Unknown => resource.format(),
        format => format,
    };
    let format = dxgi_view_format(kind.usage(), requested);
    let native_format = convert_format(format);
    let dimension = convert_view_dimension(kind, desc.ty).ok_or_else(|| {
        ApiError::Unsupported(format!("{} of type {:?}", kind.name(), desc.ty))
    })?;
    let component_mapping = if kind == ViewKind::ShaderResource {
        component_mapping(requested)
    } else {
        D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING
    };

    match (&resource.kind, desc.range) {
        (ResourceKind::Buffer { size, stride }, ViewRange::Buffer { offset, size: range }) => {
            if kind == ViewKind::DepthStencil {
                return Err(ApiError::Unsupported(format!("{} of a buffer", kind.name())));
            }
            let element = u64::from(element_size(format, *stride));
            let range = if range == u64::MAX {
                size.saturating_sub(offset)
            } else {
                range
            };
            Ok(ViewDesc {
                format: native_format,
                dimension,
                component_mapping,
                first_element: offset / element,
                num_elements: (range / element) as u32,
                structure_byte_stride: if native_format == DXGI_FORMAT_UNKNOWN { *stride } else { 0 },
                ..Default::default()
            })
        }
        (ResourceKind::Texture(texture), range @ ViewRange::Texture { .. }) => {
            if native_format == DXGI_FORMAT_UNKNOWN {
                return Err(ApiError::Unsupported(format!("view format {:?}", requested)));
            }
            let resolved = ResourceViewDesc { range, ..*desc };
            let (first_mip, mip_levels, first_slice, slices) = resolved
                .resolved_texture_range(u32::from(texture.levels).max(1), texture.layers())
                .unwrap_or((0, 1, 0, 1));
            let (first_slice, slices) = if texture.dimension == TextureDimension::D3 {
                (0, texture.level_depth(first_mip))
            } else {
                (first_slice, slices)
            };
            Ok(ViewDesc {
                format: native_format,
                dimension,
                component_mapping,
                first_mip,
                mip_levels: if kind == ViewKind::ShaderResource { mip_levels } else { 1 },
                first_slice,
                slices,
                ..Default::default()
            })
        }
        _ => Err(ApiError::InvalidParameter(format!(
            "{:?} range for a {:?} resource",
            desc.range,
            resource.ty()
        ))),
    }
}

/// Abstract description of a native view.
pub fn convert_native_view_desc(kind: ViewKind, desc: &ViewDesc) -> ResourceViewDesc {
    let ty = convert_native_view_dimension(kind, desc.dimension);
    let format = convert_dxgi_format(desc.format);
    if ty == ResourceViewType::Buffer {
        let element = u64::from(element_size(format, desc.structure_byte_stride));
        return ResourceViewDesc::buffer(
            format,
            desc.first_element * element,
            u64::from(desc.num_elements) * element,
        );
    }
    let levels = match kind {
        ViewKind::ShaderResource if desc.mip_levels == u32::MAX => ALL_REMAINING,
        ViewKind::ShaderResource => desc.mip_levels,
        _ => 1,
    };
    let layers = if desc.slices == u32::MAX {
        ALL_REMAINING
    } else {
        desc.slices
    };
    ResourceViewDesc::texture(ty, format, desc.first_mip, levels, desc.first_slice, layers)
}

/// Capability bits `CheckFeatureSupport(FORMAT_SUPPORT)` must report for `usage`.
pub fn convert_usage_to_format_support(usage: ResourceUsage) -> u32 {
    let mut support = 0;
    if usage.contains(ResourceUsage::VERTEX_BUFFER) {
        support |= D3D12_FORMAT_SUPPORT1_IA_VERTEX_BUFFER;
    }
    if usage.contains(ResourceUsage::INDEX_BUFFER) {
        support |= D3D12_FORMAT_SUPPORT1_IA_INDEX_BUFFER;
    }
    if usage.intersects(ResourceUsage::RENDER_TARGET) {
        support |= D3D12_FORMAT_SUPPORT1_RENDER_TARGET;
    }
    if usage.intersects(ResourceUsage::DEPTH_STENCIL) {
        support |= D3D12_FORMAT_SUPPORT1_DEPTH_STENCIL;
    }
    if usage.intersects(ResourceUsage::SHADER_RESOURCE) {
        support |= D3D12_FORMAT_SUPPORT1_SHADER_LOAD;
    }
    if usage.intersects(ResourceUsage::UNORDERED_ACCESS) {
        support |= D3D12_FORMAT_SUPPORT1_TYPED_UNORDERED_ACCESS_VIEW;
    }
    if usage.intersects(ResourceUsage::RESOLVE_SOURCE | ResourceUsage::RESOLVE_DEST) {
        support |= D3D12_FORMAT_SUPPORT1_MULTISAMPLE_RESOLVE;
    }
    support
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::resource::ResourceFlags;

    #[test]
    fn test_states_mirror_usage() {
        assert_eq!(convert_usage_to_states(ResourceUsage::RENDER_TARGET), 0x4);
        assert_eq!(
            convert_usage_to_states(ResourceUsage::SHADER_RESOURCE),
            0x40 | 0x80
        );
        assert_eq!(convert_usage_to_states(ResourceUsage::PRESENT), D3D12_RESOURCE_STATE_COMMON);
        assert_eq!(convert_usage_to_states(ResourceUsage::CPU_ACCESS), D3D12_RESOURCE_STATE_GENERIC_READ);
        assert_eq!(convert_native_states(D3D12_RESOURCE_STATE_COPY_DEST), ResourceUsage::COPY_DEST);
        assert_eq!(convert_native_states(0), ResourceUsage::GENERAL);
    }

    #[test]
    fn test_resource_desc_round_trip() {
        let desc = ResourceDesc::texture(TextureDimension::D2, 512, 256, Format::R8G8B8A8Unorm)
            .with_levels(10)
            .with_usage(ResourceUsage::RENDER_TARGET | ResourceUsage::SHADER_RESOURCE)
            .with_flags(ResourceFlags::SHARED);
        let (heap, native) = convert_resource_desc(&desc).unwrap();
        assert_eq!(heap.heap_type, D3D12_HEAP_TYPE_DEFAULT);
        assert_eq!(heap.flags, D3D12_HEAP_FLAG_SHARED);
        assert_eq!(native.mip_levels, 10);
        assert_ne!(native.flags & D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET, 0);
        assert_eq!(native.flags & D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE, 0);

        let back = convert_native_desc(&heap, &native);
        assert_eq!(back.kind, desc.kind);
        assert!(back.usage.contains(desc.usage));
        assert!(back.flags.contains(ResourceFlags::SHARED));
    }

    #[test]
    fn test_depth_only_texture_denies_shader_access() {
        let desc = ResourceDesc::texture(TextureDimension::D2, 64, 64, Format::D32Float)
            .with_usage(ResourceUsage::DEPTH_STENCIL);
        let (_, native) = convert_resource_desc(&desc).unwrap();
        assert_ne!(native.flags & D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE, 0);
    }

    #[test]
    fn test_unknown_heap_rejected() {
        let desc = ResourceDesc::buffer(64).with_heap(MemoryHeap::Unknown);
        assert!(matches!(convert_resource_desc(&desc), Err(ApiError::Unsupported(_))));
    }

    #[test]
    fn test_component_mapping_swizzles() {
        let alpha = component_mapping(Format::A8Unorm);
        assert_eq!(decode_component_mapping(alpha, 0), D3D12_SHADER_COMPONENT_MAPPING_FORCE_VALUE_0);
        assert_eq!(decode_component_mapping(alpha, 3), D3D12_SHADER_COMPONENT_MAPPING_FROM_MEMORY_COMPONENT_0);

        let x8 = component_mapping(Format::B8G8R8X8Unorm);
        assert_eq!(decode_component_mapping(x8, 2), D3D12_SHADER_COMPONENT_MAPPING_FROM_MEMORY_COMPONENT_2);
        assert_eq!(decode_component_mapping(x8, 3), D3D12_SHADER_COMPONENT_MAPPING_FORCE_VALUE_1);

        assert_eq!(component_mapping(Format::R8G8B8A8Unorm), 0x1688);
    }

    #[test]
    fn test_depth_stencil_view_formats() {
        let desc = ResourceDesc::texture(TextureDimension::D2, 64, 64, Format::R24G8Typeless)
            .with_usage(ResourceUsage::DEPTH_STENCIL | ResourceUsage::SHADER_RESOURCE);
        let whole = ResourceViewDesc::for_resource(&desc);
        let srv = convert_view_desc(ViewKind::ShaderResource, &whole, &desc).unwrap();
        assert_eq!(srv.format, Format::R24UnormX8Typeless.raw());
        let dsv = convert_view_desc(ViewKind::DepthStencil, &whole, &desc).unwrap();
        assert_eq!(dsv.format, Format::D24UnormS8Uint.raw());
        assert_eq!(dsv.dimension, D3D12_DSV_DIMENSION_TEXTURE2D);
    }

    #[test]
    fn test_texture_footprints_are_aligned() {
        let texture = TextureDesc {
            width: 100,
            height: 10,
            levels: 2,
            depth_or_layers: 2,
            format: Format::R8G8B8A8Unorm,
            ..Default::default()
        };
        let (footprints, total) = texture_footprints(&texture);
        assert_eq!(footprints.len(), 4);
        assert_eq!(footprints[0].row_bytes, 400);
        assert_eq!(footprints[0].row_pitch, 512);
        assert_eq!(footprints[1].offset, 5120);
        assert_eq!(footprints[1].width, 50);
        for footprint in &footprints {
            assert_eq!(footprint.offset % D3D12_TEXTURE_DATA_PLACEMENT_ALIGNMENT, 0);
        }
        let last = footprints[3];
        assert_eq!(total, last.offset + u64::from(last.row_pitch) * u64::from(last.rows));
    }

    #[test]
    fn test_full_mip_count() {
        let desc = NativeResourceDesc {
            width: 256,
            height: 100,
            ..Default::default()
        };
        assert_eq!(full_mip_count(&desc), 9);
    }
}
