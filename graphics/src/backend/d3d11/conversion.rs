//! Translation between Direct3D 10/11 descriptions and the abstract model.
//!
//! Direct3D 10 and 11 share resource and view descriptions up to naming, so
//! one set of structs serves both. Formats are `DXGI_FORMAT` values, and the
//! fixed-function state lives in [`crate::backend::d3d_state`].

use lumen_core::resource::{ResourceFlags, ViewRange, ALL_REMAINING};
use lumen_core::{
    ApiError, ApiResult, Format, MemoryHeap, ResourceDesc, ResourceKind, ResourceUsage,
    ResourceViewDesc, ResourceViewType, TextureDimension,
};

use crate::backend::dxgi::{
    convert_dxgi_format, convert_format, dxgi_view_format, DxgiFormat, DXGI_FORMAT_UNKNOWN,
};

// ============================================================================
// Constants
// ============================================================================

pub const D3D11_USAGE_DEFAULT: u32 = 0;
pub const D3D11_USAGE_IMMUTABLE: u32 = 1;
pub const D3D11_USAGE_DYNAMIC: u32 = 2;
pub const D3D11_USAGE_STAGING: u32 = 3;

pub const D3D11_BIND_VERTEX_BUFFER: u32 = 0x1;
pub const D3D11_BIND_INDEX_BUFFER: u32 = 0x2;
pub const D3D11_BIND_CONSTANT_BUFFER: u32 = 0x4;
pub const D3D11_BIND_SHADER_RESOURCE: u32 = 0x8;
pub const D3D11_BIND_STREAM_OUTPUT: u32 = 0x10;
pub const D3D11_BIND_RENDER_TARGET: u32 = 0x20;
pub const D3D11_BIND_DEPTH_STENCIL: u32 = 0x40;
pub const D3D11_BIND_UNORDERED_ACCESS: u32 = 0x80;

pub const D3D11_CPU_ACCESS_WRITE: u32 = 0x10000;
pub const D3D11_CPU_ACCESS_READ: u32 = 0x20000;

pub const D3D11_RESOURCE_MISC_GENERATE_MIPS: u32 = 0x1;
pub const D3D11_RESOURCE_MISC_SHARED: u32 = 0x2;
pub const D3D11_RESOURCE_MISC_TEXTURECUBE: u32 = 0x4;
pub const D3D11_RESOURCE_MISC_BUFFER_STRUCTURED: u32 = 0x40;

pub const D3D11_RESOURCE_DIMENSION_BUFFER: u32 = 1;
pub const D3D11_RESOURCE_DIMENSION_TEXTURE1D: u32 = 2;
pub const D3D11_RESOURCE_DIMENSION_TEXTURE2D: u32 = 3;
pub const D3D11_RESOURCE_DIMENSION_TEXTURE3D: u32 = 4;

pub const D3D11_CLEAR_DEPTH: u32 = 0x1;
pub const D3D11_CLEAR_STENCIL: u32 = 0x2;

pub const D3D11_FORMAT_SUPPORT_BUFFER: u32 = 0x1;
pub const D3D11_FORMAT_SUPPORT_IA_VERTEX_BUFFER: u32 = 0x2;
pub const D3D11_FORMAT_SUPPORT_IA_INDEX_BUFFER: u32 = 0x4;
pub const D3D11_FORMAT_SUPPORT_SHADER_LOAD: u32 = 0x100;
pub const D3D11_FORMAT_SUPPORT_SHADER_SAMPLE: u32 = 0x200;
pub const D3D11_FORMAT_SUPPORT_RENDER_TARGET: u32 = 0x4000;
pub const D3D11_FORMAT_SUPPORT_DEPTH_STENCIL: u32 = 0x10000;
pub const D3D11_FORMAT_SUPPORT_MULTISAMPLE_RESOLVE: u32 = 0x40000;
pub const D3D11_FORMAT_SUPPORT_TYPED_UNORDERED_ACCESS_VIEW: u32 = 0x400000;

/// Number of render target slots of the output merger.
pub const D3D11_SIMULTANEOUS_RENDER_TARGET_COUNT: usize = 8;

const CUBE_FACES: u32 = 6;

// ============================================================================
// Native descriptions
// ============================================================================

/// `D3D11_BUFFER_DESC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferDesc {
    pub byte_width: u32,
    pub usage: u32,
    pub bind_flags: u32,
    pub cpu_access_flags: u32,
    pub misc_flags: u32,
    pub structure_byte_stride: u32,
}

/// `D3D11_TEXTURE1D_DESC`, `D3D11_TEXTURE2D_DESC` or `D3D11_TEXTURE3D_DESC`.
///
/// `depth_or_array_size` is the depth of 3D textures and the array size of
/// the others. Dimensions a texture type lacks are one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    /// `D3D11_RESOURCE_DIMENSION_TEXTURE1D`, `2D` or `3D`.
    pub dimension: u32,
    pub width: u32,
    pub height: u32,
    pub depth_or_array_size: u32,
    pub mip_levels: u32,
    pub format: DxgiFormat,
    pub sample_count: u32,
    pub sample_quality: u32,
    pub usage: u32,
    pub bind_flags: u32,
    pub cpu_access_flags: u32,
    pub misc_flags: u32,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            dimension: D3D11_RESOURCE_DIMENSION_TEXTURE2D,
            width: 1,
            height: 1,
            depth_or_array_size: 1,
            mip_levels: 1,
            format: DXGI_FORMAT_UNKNOWN,
            sample_count: 1,
            sample_quality: 0,
            usage: D3D11_USAGE_DEFAULT,
            bind_flags: 0,
            cpu_access_flags: 0,
            misc_flags: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeDesc {
    Buffer(BufferDesc),
    Texture(TextureDesc),
}

/// Kind of view object.
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

    pub fn name(self) -> &'static str {
        match self {
            Self::ShaderResource => "shader resource view",
            Self::RenderTarget => "render target view",
            Self::DepthStencil => "depth-stencil view",
            Self::UnorderedAccess => "unordered access view",
        }
    }
}

/// The union of `D3D11_SHADER_RESOURCE_VIEW_DESC`,
/// `D3D11_RENDER_TARGET_VIEW_DESC`, `D3D11_DEPTH_STENCIL_VIEW_DESC` and
/// `D3D11_UNORDERED_ACCESS_VIEW_DESC`.
///
/// `mip_levels` only applies to shader resource views; the other kinds view
/// the single level `first_mip`. For 3D textures the slice range selects
/// depth slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewDesc {
    pub format: DxgiFormat,
    /// `*_VIEW_DIMENSION` value of the view kind.
    pub dimension: u32,
    pub first_mip: u32,
    pub mip_levels: u32,
    pub first_slice: u32,
    pub slices: u32,
    pub first_element: u32,
    pub num_elements: u32,
}

// ============================================================================
// View dimensions
// ============================================================================

pub const D3D11_SRV_DIMENSION_BUFFER: u32 = 1;
pub const D3D11_SRV_DIMENSION_TEXTURE1D: u32 = 2;
pub const D3D11_SRV_DIMENSION_TEXTURE1DARRAY: u32 = 3;
pub const D3D11_SRV_DIMENSION_TEXTURE2D: u32 = 4;
pub const D3D11_SRV_DIMENSION_TEXTURE2DARRAY: u32 = 5;
pub const D3D11_SRV_DIMENSION_TEXTURE2DMS: u32 = 6;
pub const D3D11_SRV_DIMENSION_TEXTURE2DMSARRAY: u32 = 7;
pub const D3D11_SRV_DIMENSION_TEXTURE3D: u32 = 8;
pub const D3D11_SRV_DIMENSION_TEXTURECUBE: u32 = 9;
pub const D3D11_SRV_DIMENSION_TEXTURECUBEARRAY: u32 = 10;

pub const D3D11_DSV_DIMENSION_TEXTURE1D: u32 = 1;
pub const D3D11_DSV_DIMENSION_TEXTURE1DARRAY: u32 = 2;
pub const D3D11_DSV_DIMENSION_TEXTURE2D: u32 = 3;
pub const D3D11_DSV_DIMENSION_TEXTURE2DARRAY: u32 = 4;
pub const D3D11_DSV_DIMENSION_TEXTURE2DMS: u32 = 5;
pub const D3D11_DSV_DIMENSION_TEXTURE2DMSARRAY: u32 = 6;

/// Render target and unordered access views number their dimensions like
/// shader resource views, minus the kinds they don't support.
pub fn convert_view_dimension(kind: ViewKind, ty: ResourceViewType) -> Option<u32> {
    use ResourceViewType::*;
    match kind {
        ViewKind::DepthStencil => match ty {
            Texture1d => Some(D3D11_DSV_DIMENSION_TEXTURE1D),
            Texture1dArray => Some(D3D11_DSV_DIMENSION_TEXTURE1DARRAY),
            Texture2d => Some(D3D11_DSV_DIMENSION_TEXTURE2D),
            Texture2dArray | TextureCube | TextureCubeArray => {
                Some(D3D11_DSV_DIMENSION_TEXTURE2DARRAY)
            }
            Texture2dMultisample => Some(D3D11_DSV_DIMENSION_TEXTURE2DMS),
            Texture2dMultisampleArray => Some(D3D11_DSV_DIMENSION_TEXTURE2DMSARRAY),
            Unknown | Buffer | Texture3d => None,
        },
        ViewKind::ShaderResource | ViewKind::RenderTarget | ViewKind::UnorderedAccess => {
            let dimension = match ty {
                Unknown => return None,
                Buffer => D3D11_SRV_DIMENSION_BUFFER,
                Texture1d => D3D11_SRV_DIMENSION_TEXTURE1D,
                Texture1dArray => D3D11_SRV_DIMENSION_TEXTURE1DARRAY,
                Texture2d => D3D11_SRV_DIMENSION_TEXTURE2D,
                Texture2dArray => D3D11_SRV_DIMENSION_TEXTURE2DARRAY,
                Texture2dMultisample => D3D11_SRV_DIMENSION_TEXTURE2DMS,
                Texture2dMultisampleArray => D3D11_SRV_DIMENSION_TEXTURE2DMSARRAY,
                Texture3d => D3D11_SRV_DIMENSION_TEXTURE3D,
                TextureCube => D3D11_SRV_DIMENSION_TEXTURECUBE,
                TextureCubeArray => D3D11_SRV_DIMENSION_TEXTURECUBEARRAY,
            };
            match (kind, dimension) {
                (ViewKind::ShaderResource, _) => Some(dimension),
                // Attachments see cube faces as array slices.
                (_, D3D11_SRV_DIMENSION_TEXTURECUBE | D3D11_SRV_DIMENSION_TEXTURECUBEARRAY) => {
                    Some(D3D11_SRV_DIMENSION_TEXTURE2DARRAY)
                }
                (
                    ViewKind::UnorderedAccess,
                    D3D11_SRV_DIMENSION_TEXTURE2DMS | D3D11_SRV_DIMENSION_TEXTURE2DMSARRAY,
                ) => None,
                _ => Some(dimension),
            }
        }
    }
}

pub fn convert_native_view_dimension(kind: ViewKind, dimension: u32) -> ResourceViewType {
    use ResourceViewType::*;
    if kind == ViewKind::DepthStencil {
        return match dimension {
            D3D11_DSV_DIMENSION_TEXTURE1D => Texture1d,
            D3D11_DSV_DIMENSION_TEXTURE1DARRAY => Texture1dArray,
            D3D11_DSV_DIMENSION_TEXTURE2D => Texture2d,
            D3D11_DSV_DIMENSION_TEXTURE2DARRAY => Texture2dArray,
            D3D11_DSV_DIMENSION_TEXTURE2DMS => Texture2dMultisample,
            D3D11_DSV_DIMENSION_TEXTURE2DMSARRAY => Texture2dMultisampleArray,
            _ => Unknown,
        };
    }
    match dimension {
        D3D11_SRV_DIMENSION_BUFFER => Buffer,
        D3D11_SRV_DIMENSION_TEXTURE1D => Texture1d,
        D3D11_SRV_DIMENSION_TEXTURE1DARRAY => Texture1dArray,
        D3D11_SRV_DIMENSION_TEXTURE2D => Texture2d,
        D3D11_SRV_DIMENSION_TEXTURE2DARRAY => Texture2dArray,
        D3D11_SRV_DIMENSION_TEXTURE2DMS => Texture2dMultisample,
        D3D11_SRV_DIMENSION_TEXTURE2DMSARRAY => Texture2dMultisampleArray,
        D3D11_SRV_DIMENSION_TEXTURE3D => Texture3d,
        D3D11_SRV_DIMENSION_TEXTURECUBE => TextureCube,
        D3D11_SRV_DIMENSION_TEXTURECUBEARRAY => TextureCubeArray,
        _ => Unknown,
    }
}

// ============================================================================
// Placement and usage
// ============================================================================

pub fn convert_usage_to_heap(usage: u32, cpu_access: u32) -> MemoryHeap {
    match usage {
        D3D11_USAGE_DEFAULT | D3D11_USAGE_IMMUTABLE => MemoryHeap::GpuOnly,
        D3D11_USAGE_DYNAMIC => MemoryHeap::CpuToGpu,
        D3D11_USAGE_STAGING if cpu_access & D3D11_CPU_ACCESS_WRITE != 0 => MemoryHeap::CpuOnly,
        D3D11_USAGE_STAGING => MemoryHeap::GpuToCpu,
        _ => MemoryHeap::Unknown,
    }
}

/// `(usage, cpu_access_flags)` of a memory heap.
pub fn convert_heap_to_usage(heap: MemoryHeap) -> Option<(u32, u32)> {
    match heap {
        MemoryHeap::Unknown | MemoryHeap::GpuOnly => Some((D3D11_USAGE_DEFAULT, 0)),
        MemoryHeap::CpuToGpu => Some((D3D11_USAGE_DYNAMIC, D3D11_CPU_ACCESS_WRITE)),
        MemoryHeap::GpuToCpu => Some((D3D11_USAGE_STAGING, D3D11_CPU_ACCESS_READ)),
        MemoryHeap::CpuOnly => Some((
            D3D11_USAGE_STAGING,
            D3D11_CPU_ACCESS_READ | D3D11_CPU_ACCESS_WRITE,
        )),
        MemoryHeap::Custom => None,
    }
}

const BIND_USAGES: [(u32, ResourceUsage); 8] = [
    (D3D11_BIND_VERTEX_BUFFER, ResourceUsage::VERTEX_BUFFER),
    (D3D11_BIND_INDEX_BUFFER, ResourceUsage::INDEX_BUFFER),
    (D3D11_BIND_CONSTANT_BUFFER, ResourceUsage::CONSTANT_BUFFER),
    (D3D11_BIND_SHADER_RESOURCE, ResourceUsage::SHADER_RESOURCE),
    (D3D11_BIND_STREAM_OUTPUT, ResourceUsage::STREAM_OUTPUT),
    (D3D11_BIND_RENDER_TARGET, ResourceUsage::RENDER_TARGET),
    (D3D11_BIND_DEPTH_STENCIL, ResourceUsage::DEPTH_STENCIL),
    (D3D11_BIND_UNORDERED_ACCESS, ResourceUsage::UNORDERED_ACCESS),
];

/// Every resource can be copied; render targets can be resolved into.
pub fn convert_bind_flags(bind_flags: u32, samples: u32) -> ResourceUsage {
    let mut usage = ResourceUsage::COPY_SOURCE | ResourceUsage::COPY_DEST;
    for (bind, bit) in BIND_USAGES {
        if bind_flags & bind != 0 {
            usage |= bit;
        }
    }
    if usage.contains(ResourceUsage::RENDER_TARGET) {
        usage |= if samples > 1 {
            ResourceUsage::RESOLVE_SOURCE
        } else {
            ResourceUsage::RESOLVE_DEST
        };
    }
    usage
}

pub fn convert_usage_to_bind_flags(usage: ResourceUsage) -> u32 {
    BIND_USAGES
        .iter()
        .filter(|(_, bit)| usage.intersects(*bit))
        .fold(0, |flags, (bind, _)| flags | bind)
}

pub fn convert_misc_flags(misc_flags: u32, usage: u32) -> ResourceFlags {
    let mut flags = ResourceFlags::empty();
    if misc_flags & D3D11_RESOURCE_MISC_GENERATE_MIPS != 0 {
        flags |= ResourceFlags::GENERATE_MIPMAPS;
    }
    if misc_flags & D3D11_RESOURCE_MISC_SHARED != 0 {
        flags |= ResourceFlags::SHARED;
    }
    if misc_flags & D3D11_RESOURCE_MISC_TEXTURECUBE != 0 {
        flags |= ResourceFlags::CUBE_COMPATIBLE;
    }
    if misc_flags & D3D11_RESOURCE_MISC_BUFFER_STRUCTURED != 0 {
        flags |= ResourceFlags::STRUCTURED;
    }
    if usage == D3D11_USAGE_DYNAMIC {
        flags |= ResourceFlags::DYNAMIC;
    }
    flags
}

pub fn convert_flags_to_misc(flags: ResourceFlags) -> u32 {
    let mut misc = 0;
    if flags.contains(ResourceFlags::GENERATE_MIPMAPS) {
        misc |= D3D11_RESOURCE_MISC_GENERATE_MIPS;
    }
    if flags.contains(ResourceFlags::SHARED) {
        misc |= D3D11_RESOURCE_MISC_SHARED;
    }
    if flags.contains(ResourceFlags::CUBE_COMPATIBLE) {
        misc |= D3D11_RESOURCE_MISC_TEXTURECUBE;
    }
    if flags.contains(ResourceFlags::STRUCTURED) {
        misc |= D3D11_RESOURCE_MISC_BUFFER_STRUCTURED;
    }
    misc
}

// ============================================================================
// Resource descriptions
// ============================================================================

pub fn convert_buffer_desc(desc: &BufferDesc) -> ResourceDesc {
    ResourceDesc::buffer(u64::from(desc.byte_width))
        .with_stride(desc.structure_byte_stride)
        .with_heap(convert_usage_to_heap(desc.usage, desc.cpu_access_flags))
        .with_usage(convert_bind_flags(desc.bind_flags, 1))
        .with_flags(convert_misc_flags(desc.misc_flags, desc.usage))
}

pub fn convert_texture_desc(desc: &TextureDesc) -> ResourceDesc {
    let dimension = match desc.dimension {
        D3D11_RESOURCE_DIMENSION_TEXTURE1D => TextureDimension::D1,
        D3D11_RESOURCE_DIMENSION_TEXTURE3D => TextureDimension::D3,
        _ => TextureDimension::D2,
    };
    ResourceDesc::texture(
        dimension,
        desc.width,
        desc.height,
        convert_dxgi_format(desc.format),
    )
    .with_depth_or_layers(desc.depth_or_array_size as u16)
    .with_levels(desc.mip_levels as u16)
    .with_samples(desc.sample_count.max(1) as u16)
    .with_heap(convert_usage_to_heap(desc.usage, desc.cpu_access_flags))
    .with_usage(convert_bind_flags(desc.bind_flags, desc.sample_count))
    .with_flags(convert_misc_flags(desc.misc_flags, desc.usage))
}

pub fn convert_native_desc(desc: &NativeDesc) -> ResourceDesc {
    match desc {
        NativeDesc::Buffer(buffer) => convert_buffer_desc(buffer),
        NativeDesc::Texture(texture) => convert_texture_desc(texture),
    }
}

/// Map an abstract description to a buffer or texture description.
///
/// Depth-stencil textures that are also read by shaders are created with
/// the typeless format of their family, so both view kinds can be made.
pub fn convert_resource_desc(desc: &ResourceDesc) -> ApiResult<NativeDesc> {
    let (usage, cpu_access_flags) = convert_heap_to_usage(desc.heap)
        .ok_or_else(|| ApiError::Unsupported(format!("memory heap {:?}", desc.heap)))?;
    let bind_flags = convert_usage_to_bind_flags(desc.usage);
    let misc_flags = convert_flags_to_misc(desc.flags);

    let texture = match &desc.kind {
        ResourceKind::Buffer { size, stride } => {
            let byte_width = u32::try_from(*size)
                .map_err(|_| ApiError::Unsupported(format!("buffer of {} bytes", size)))?;
            return Ok(NativeDesc::Buffer(BufferDesc {
                byte_width,
                usage,
                bind_flags,
                cpu_access_flags,
                misc_flags,
                structure_byte_stride: *stride,
            }));
        }
        ResourceKind::Texture(texture) => texture,
    };

    let mut format = texture.format;
    if format.is_depth_stencil() && desc.usage.intersects(ResourceUsage::SHADER_RESOURCE) {
        format = format.to_typeless();
    }
    let format = convert_format(format);
    if format == DXGI_FORMAT_UNKNOWN {
        return Err(ApiError::Unsupported(format!("format {:?}", texture.format)));
    }
    let dimension = match texture.dimension {
        TextureDimension::D1 => D3D11_RESOURCE_DIMENSION_TEXTURE1D,
        TextureDimension::D2 | TextureDimension::Surface => D3D11_RESOURCE_DIMENSION_TEXTURE2D,
        TextureDimension::D3 => D3D11_RESOURCE_DIMENSION_TEXTURE3D,
    };
    if desc.flags.contains(ResourceFlags::CUBE_COMPATIBLE) && texture.layers() % CUBE_FACES != 0 {
        return Err(ApiError::InvalidParameter(format!(
            "cube texture with {} layers",
            texture.layers()
        )));
    }
    Ok(NativeDesc::Texture(TextureDesc {
        dimension,
        width: texture.width,
        height: if dimension == D3D11_RESOURCE_DIMENSION_TEXTURE1D {
            1
        } else {
            texture.height
        },
        depth_or_array_size: u32::from(texture.depth_or_layers).max(1),
        mip_levels: u32::from(texture.levels),
        format,
        sample_count: u32::from(texture.samples).max(1),
        sample_quality: 0,
        usage,
        bind_flags,
        cpu_access_flags,
        misc_flags,
    }))
}

// ============================================================================
// View descriptions
// ============================================================================

/// Format a view of `kind` uses for a view format requested by the caller.
pub fn view_format(kind: ViewKind, format: Format) -> Format {
    dxgi_view_format(kind.usage(), format)
}

fn element_size(format: Format, stride: u32) -> u32 {
    match format.bytes_per_block() {
        0 if stride > 0 => stride,
        0 => 4,
        size => size,
    }
}

/// Build the native description of a view onto a resource described by
/// `resource`.
pub fn convert_view_desc(
    kind: ViewKind,
    desc: &ResourceViewDesc,
    resource: &ResourceDesc,
) -> ApiResult<ViewDesc> {
    let requested = match desc.format {
        Format::Unknown => resource.format(),
        format => format,
    };
    let format = view_format(kind, requested);
    let native_format = convert_format(format);
    let dimension = convert_view_dimension(kind, desc.ty).ok_or_else(|| {
        ApiError::Unsupported(format!("{} of type {:?}", kind.name(), desc.ty))
    })?;

    match (&resource.kind, desc.range) {
        (ResourceKind::Buffer { size, stride }, ViewRange::Buffer { offset, size: range }) => {
            if kind == ViewKind::RenderTarget && native_format == DXGI_FORMAT_UNKNOWN {
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
                first_element: (offset / element) as u32,
                num_elements: (range / element) as u32,
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
                // Attachments of 3D textures select depth slices of the level.
                (0, texture.level_depth(first_mip))
            } else {
                (first_slice, slices)
            };
            Ok(ViewDesc {
                format: native_format,
                dimension,
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
        let element = u64::from(element_size(format, 0));
        return ResourceViewDesc::buffer(
            format,
            u64::from(desc.first_element) * element,
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

/// Capability bits `CheckFormatSupport` must report for `usage`.
pub fn convert_usage_to_format_support(usage: ResourceUsage) -> u32 {
    let mut support = 0;
    if usage.contains(ResourceUsage::VERTEX_BUFFER) {
        support |= D3D11_FORMAT_SUPPORT_IA_VERTEX_BUFFER;
    }
    if usage.contains(ResourceUsage::INDEX_BUFFER) {
        support |= D3D11_FORMAT_SUPPORT_IA_INDEX_BUFFER;
    }
    if usage.intersects(ResourceUsage::SHADER_RESOURCE) {
        support |= D3D11_FORMAT_SUPPORT_SHADER_SAMPLE;
    }
    if usage.contains(ResourceUsage::RENDER_TARGET) {
        support |= D3D11_FORMAT_SUPPORT_RENDER_TARGET;
    }
    if usage.intersects(ResourceUsage::DEPTH_STENCIL) {
        support |= D3D11_FORMAT_SUPPORT_DEPTH_STENCIL;
    }
    if usage.intersects(ResourceUsage::RESOLVE_SOURCE | ResourceUsage::RESOLVE_DEST) {
        support |= D3D11_FORMAT_SUPPORT_MULTISAMPLE_RESOLVE;
    }
    if usage.contains(ResourceUsage::UNORDERED_ACCESS) {
        support |= D3D11_FORMAT_SUPPORT_TYPED_UNORDERED_ACCESS_VIEW;
    }
    support
}
