//! Translation between Direct3D 9 descriptions and the abstract model.
//!
//! Direct3D 9 predates DXGI: formats are `D3DFORMAT` values (some of them
//! FourCC codes), resource placement is a `D3DPOOL` and the pipeline is a
//! set of render and sampler states instead of state objects.

use lumen_core::events::Rect;
use lumen_core::pipeline::{
    BlendFactor, BlendOp, CompareOp, CullMode, FillMode, InputElement, PrimitiveTopology,
    StencilOp,
};
use lumen_core::resource::ResourceFlags;
use lumen_core::sampler::{AddressMode, FilterMode, SamplerDesc};
use lumen_core::{
    ApiError, ApiResult, Format, MemoryHeap, ResourceDesc, ResourceKind, ResourceUsage,
    TextureDimension,
};

/// Raw `D3DFORMAT` value.
pub type D3dFormat = u32;
/// Raw `D3DPOOL` value.
pub type D3dPool = u32;
/// Raw `D3DUSAGE` flags.
pub type D3dUsage = u32;
/// Raw `D3DRESOURCETYPE` value.
pub type D3dResourceType = u32;
/// Raw `D3DPRIMITIVETYPE` value.
pub type D3dPrimitiveType = u32;
/// Packed ARGB color.
pub type D3dColor = u32;

const fn fourcc(code: &[u8; 4]) -> D3dFormat {
    code[0] as u32 | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

pub const D3DFMT_UNKNOWN: D3dFormat = 0;
pub const D3DFMT_R8G8B8: D3dFormat = 20;
pub const D3DFMT_A8R8G8B8: D3dFormat = 21;
pub const D3DFMT_X8R8G8B8: D3dFormat = 22;
pub const D3DFMT_R5G6B5: D3dFormat = 23;
pub const D3DFMT_X1R5G5B5: D3dFormat = 24;
pub const D3DFMT_A1R5G5B5: D3dFormat = 25;
pub const D3DFMT_A4R4G4B4: D3dFormat = 26;
pub const D3DFMT_A8: D3dFormat = 28;
pub const D3DFMT_A2B10G10R10: D3dFormat = 31;
pub const D3DFMT_A8B8G8R8: D3dFormat = 32;
pub const D3DFMT_X8B8G8R8: D3dFormat = 33;
pub const D3DFMT_G16R16: D3dFormat = 34;
pub const D3DFMT_A16B16G16R16: D3dFormat = 36;
pub const D3DFMT_L8: D3dFormat = 50;
pub const D3DFMT_A8L8: D3dFormat = 51;
pub const D3DFMT_D16_LOCKABLE: D3dFormat = 70;
pub const D3DFMT_D32: D3dFormat = 71;
pub const D3DFMT_D15S1: D3dFormat = 73;
pub const D3DFMT_D24S8: D3dFormat = 75;
pub const D3DFMT_D24X8: D3dFormat = 77;
pub const D3DFMT_D24X4S4: D3dFormat = 79;
pub const D3DFMT_D16: D3dFormat = 80;
pub const D3DFMT_L16: D3dFormat = 81;
pub const D3DFMT_D32F_LOCKABLE: D3dFormat = 82;
pub const D3DFMT_D24FS8: D3dFormat = 83;
pub const D3DFMT_S8_LOCKABLE: D3dFormat = 85;
pub const D3DFMT_VERTEXDATA: D3dFormat = 100;
pub const D3DFMT_INDEX16: D3dFormat = 101;
pub const D3DFMT_INDEX32: D3dFormat = 102;
pub const D3DFMT_R16F: D3dFormat = 111;
pub const D3DFMT_G16R16F: D3dFormat = 112;
pub const D3DFMT_A16B16G16R16F: D3dFormat = 113;
pub const D3DFMT_R32F: D3dFormat = 114;
pub const D3DFMT_G32R32F: D3dFormat = 115;
pub const D3DFMT_A32B32G32R32F: D3dFormat = 116;
pub const D3DFMT_DXT1: D3dFormat = fourcc(b"DXT1");
pub const D3DFMT_DXT2: D3dFormat = fourcc(b"DXT2");
pub const D3DFMT_DXT3: D3dFormat = fourcc(b"DXT3");
pub const D3DFMT_DXT4: D3dFormat = fourcc(b"DXT4");
pub const D3DFMT_DXT5: D3dFormat = fourcc(b"DXT5");
pub const D3DFMT_ATI1: D3dFormat = fourcc(b"ATI1");
pub const D3DFMT_ATI2: D3dFormat = fourcc(b"ATI2");
pub const D3DFMT_INTZ: D3dFormat = fourcc(b"INTZ");
pub const D3DFMT_DF16: D3dFormat = fourcc(b"DF16");
pub const D3DFMT_DF24: D3dFormat = fourcc(b"DF24");
pub const D3DFMT_NULL: D3dFormat = fourcc(b"NULL");

pub const D3DUSAGE_RENDERTARGET: D3dUsage = 0x1;
pub const D3DUSAGE_DEPTHSTENCIL: D3dUsage = 0x2;
pub const D3DUSAGE_WRITEONLY: D3dUsage = 0x8;
pub const D3DUSAGE_DYNAMIC: D3dUsage = 0x200;
pub const D3DUSAGE_AUTOGENMIPMAP: D3dUsage = 0x400;

pub const D3DPOOL_DEFAULT: D3dPool = 0;
pub const D3DPOOL_MANAGED: D3dPool = 1;
pub const D3DPOOL_SYSTEMMEM: D3dPool = 2;
pub const D3DPOOL_SCRATCH: D3dPool = 3;

pub const D3DRTYPE_SURFACE: D3dResourceType = 1;
pub const D3DRTYPE_VOLUME: D3dResourceType = 2;
pub const D3DRTYPE_TEXTURE: D3dResourceType = 3;
pub const D3DRTYPE_VOLUMETEXTURE: D3dResourceType = 4;
pub const D3DRTYPE_CUBETEXTURE: D3dResourceType = 5;
pub const D3DRTYPE_VERTEXBUFFER: D3dResourceType = 6;
pub const D3DRTYPE_INDEXBUFFER: D3dResourceType = 7;

pub const D3DPT_POINTLIST: D3dPrimitiveType = 1;
pub const D3DPT_LINELIST: D3dPrimitiveType = 2;
pub const D3DPT_LINESTRIP: D3dPrimitiveType = 3;
pub const D3DPT_TRIANGLELIST: D3dPrimitiveType = 4;
pub const D3DPT_TRIANGLESTRIP: D3dPrimitiveType = 5;
pub const D3DPT_TRIANGLEFAN: D3dPrimitiveType = 6;

pub const D3DCLEAR_TARGET: u32 = 0x1;
pub const D3DCLEAR_ZBUFFER: u32 = 0x2;
pub const D3DCLEAR_STENCIL: u32 = 0x4;

pub const D3DMULTISAMPLE_NONE: u32 = 0;
pub const D3DMULTISAMPLE_NONMASKABLE: u32 = 1;

/// Cube map faces in `D3DCUBEMAP_FACES` order.
pub const CUBE_FACES: u32 = 6;

// ============================================================================
// Native descriptions
// ============================================================================

/// `D3DSURFACE_DESC`, also used for the top level of textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceDesc {
    pub format: D3dFormat,
    pub ty: D3dResourceType,
    pub usage: D3dUsage,
    pub pool: D3dPool,
    pub multisample: u32,
    pub multisample_quality: u32,
    pub width: u32,
    pub height: u32,
}

/// `D3DVOLUME_DESC` of the top level of a volume texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeDesc {
    pub format: D3dFormat,
    pub usage: D3dUsage,
    pub pool: D3dPool,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

/// `D3DVERTEXBUFFER_DESC` or `D3DINDEXBUFFER_DESC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferDesc {
    /// `D3DRTYPE_VERTEXBUFFER` or `D3DRTYPE_INDEXBUFFER`.
    pub ty: D3dResourceType,
    /// `D3DFMT_VERTEXDATA`, `D3DFMT_INDEX16` or `D3DFMT_INDEX32`.
    pub format: D3dFormat,
    pub usage: D3dUsage,
    pub pool: D3dPool,
    pub size: u32,
    pub fvf: u32,
}

/// Native object an abstract resource description maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeDesc {
    /// Standalone render target or depth-stencil surface.
    Surface(SurfaceDesc),
    /// 2D or cube texture; `desc.ty` tells which.
    Texture { desc: SurfaceDesc, levels: u32 },
    Volume { desc: VolumeDesc, levels: u32 },
    Buffer(BufferDesc),
}

// ============================================================================
// Formats
// ============================================================================

/// Convert an abstract format to `D3DFORMAT`.
///
/// Typeless and sRGB formats map to their linear typed counterpart, since
/// Direct3D 9 selects sRGB reads and writes through render and sampler
/// states. Formats without an equivalent return `D3DFMT_UNKNOWN`.
pub fn convert_format(format: Format) -> D3dFormat {
    match format {
        Format::B8G8R8A8Typeless | Format::B8G8R8A8Unorm | Format::B8G8R8A8UnormSrgb => {
            D3DFMT_A8R8G8B8
        }
        Format::B8G8R8X8Typeless | Format::B8G8R8X8Unorm | Format::B8G8R8X8UnormSrgb => {
            D3DFMT_X8R8G8B8
        }
        Format::R8G8B8A8Typeless | Format::R8G8B8A8Unorm | Format::R8G8B8A8UnormSrgb => {
            D3DFMT_A8B8G8R8
        }
        Format::R8G8B8X8Typeless | Format::R8G8B8X8Unorm | Format::R8G8B8X8UnormSrgb => {
            D3DFMT_X8B8G8R8
        }
        Format::B5G6R5Unorm => D3DFMT_R5G6B5,
        Format::B5G5R5X1Unorm => D3DFMT_X1R5G5B5,
        Format::B5G5R5A1Unorm => D3DFMT_A1R5G5B5,
        Format::B4G4R4A4Unorm => D3DFMT_A4R4G4B4,
        Format::A8Unorm => D3DFMT_A8,
        Format::R10G10B10A2Typeless | Format::R10G10B10A2Unorm => D3DFMT_A2B10G10R10,
        Format::R16G16Typeless | Format::R16G16Unorm => D3DFMT_G16R16,
        Format::R16G16B16A16Unorm => D3DFMT_A16B16G16R16,
        Format::L8Unorm | Format::R8Typeless | Format::R8Unorm => D3DFMT_L8,
        Format::A8L8Unorm | Format::R8G8Typeless | Format::R8G8Unorm => D3DFMT_A8L8,
        Format::L16Unorm | Format::R16Unorm => D3DFMT_L16,
        Format::R16Float => D3DFMT_R16F,
        Format::R16G16Float => D3DFMT_G16R16F,
        Format::R16G16B16A16Typeless | Format::R16G16B16A16Float => D3DFMT_A16B16G16R16F,
        Format::R32Float => D3DFMT_R32F,
        Format::R32G32Typeless | Format::R32G32Float => D3DFMT_G32R32F,
        Format::R32G32B32A32Typeless | Format::R32G32B32A32Float => D3DFMT_A32B32G32R32F,
        Format::Bc1Typeless | Format::Bc1Unorm | Format::Bc1UnormSrgb => D3DFMT_DXT1,
        Format::Bc2Typeless | Format::Bc2Unorm | Format::Bc2UnormSrgb => D3DFMT_DXT3,
        Format::Bc3Typeless | Format::Bc3Unorm | Format::Bc3UnormSrgb => D3DFMT_DXT5,
        Format::Bc4Typeless | Format::Bc4Unorm => D3DFMT_ATI1,
        Format::Bc5Typeless | Format::Bc5Unorm => D3DFMT_ATI2,
        Format::R16Typeless | Format::D16Unorm => D3DFMT_D16,
        Format::R24G8Typeless | Format::D24UnormS8Uint => D3DFMT_D24S8,
        Format::X8D24Unorm | Format::R24UnormX8Typeless => D3DFMT_D24X8,
        Format::R32Typeless | Format::D32Float => D3DFMT_D32F_LOCKABLE,
        Format::S8Uint => D3DFMT_S8_LOCKABLE,
        Format::Intz => D3DFMT_INTZ,
        _ => D3DFMT_UNKNOWN,
    }
}

/// Convert a `D3DFORMAT` to an abstract format.
///
/// Formats the abstract model cannot express become [`Format::Unknown`].
pub fn convert_d3d_format(format: D3dFormat) -> Format {
    match format {
        D3DFMT_A8R8G8B8 => Format::B8G8R8A8Unorm,
        D3DFMT_X8R8G8B8 => Format::B8G8R8X8Unorm,
        D3DFMT_A8B8G8R8 => Format::R8G8B8A8Unorm,
        D3DFMT_X8B8G8R8 => Format::R8G8B8X8Unorm,
        D3DFMT_R5G6B5 => Format::B5G6R5Unorm,
        D3DFMT_X1R5G5B5 => Format::B5G5R5X1Unorm,
        D3DFMT_A1R5G5B5 => Format::B5G5R5A1Unorm,
        D3DFMT_A4R4G4B4 => Format::B4G4R4A4Unorm,
        D3DFMT_A8 => Format::A8Unorm,
        D3DFMT_A2B10G10R10 => Format::R10G10B10A2Unorm,
        D3DFMT_G16R16 => Format::R16G16Unorm,
        D3DFMT_A16B16G16R16 => Format::R16G16B16A16Unorm,
        D3DFMT_L8 => Format::L8Unorm,
        D3DFMT_A8L8 => Format::A8L8Unorm,
        D3DFMT_L16 => Format::L16Unorm,
        D3DFMT_R16F => Format::R16Float,
        D3DFMT_G16R16F => Format::R16G16Float,
        D3DFMT_A16B16G16R16F => Format::R16G16B16A16Float,
        D3DFMT_R32F => Format::R32Float,
        D3DFMT_G32R32F => Format::R32G32Float,
        D3DFMT_A32B32G32R32F => Format::R32G32B32A32Float,
        D3DFMT_DXT1 => Format::Bc1Unorm,
        D3DFMT_DXT2 | D3DFMT_DXT3 => Format::Bc2Unorm,
        D3DFMT_DXT4 | D3DFMT_DXT5 => Format::Bc3Unorm,
        D3DFMT_ATI1 => Format::Bc4Unorm,
        D3DFMT_ATI2 => Format::Bc5Unorm,
        D3DFMT_D16 | D3DFMT_D16_LOCKABLE | D3DFMT_DF16 => Format::D16Unorm,
        D3DFMT_D24S8 | D3DFMT_D24FS8 | D3DFMT_D24X4S4 => Format::D24UnormS8Uint,
        D3DFMT_D24X8 | D3DFMT_DF24 => Format::X8D24Unorm,
        D3DFMT_D32 | D3DFMT_D32F_LOCKABLE => Format::D32Float,
        D3DFMT_S8_LOCKABLE => Format::S8Uint,
        D3DFMT_INTZ => Format::Intz,
        _ => Format::Unknown,
    }
}

/// Number of levels of a full mip chain.
pub fn full_mip_chain(width: u32, height: u32, depth: u32) -> u32 {
    32 - width.max(height).max(depth).max(1).leading_zeros()
}

fn convert_samples(multisample: u32) -> u16 {
    if multisample <= D3DMULTISAMPLE_NONMASKABLE {
        1
    } else {
        multisample.min(16) as u16
    }
}

// ============================================================================
// Placement and usage
// ============================================================================

pub fn convert_pool_to_heap(pool: D3dPool, usage: D3dUsage) -> MemoryHeap {
    match pool {
        D3DPOOL_DEFAULT if usage & D3DUSAGE_DYNAMIC != 0 => MemoryHeap::CpuToGpu,
        D3DPOOL_DEFAULT => MemoryHeap::GpuOnly,
        D3DPOOL_MANAGED => MemoryHeap::Unknown,
        D3DPOOL_SYSTEMMEM | D3DPOOL_SCRATCH => MemoryHeap::CpuOnly,
        _ => MemoryHeap::Custom,
    }
}

/// Pool and extra usage flags for a memory heap.
pub fn convert_heap_to_pool(heap: MemoryHeap) -> Option<(D3dPool, D3dUsage)> {
    match heap {
        MemoryHeap::GpuOnly => Some((D3DPOOL_DEFAULT, 0)),
        MemoryHeap::CpuToGpu => Some((D3DPOOL_DEFAULT, D3DUSAGE_DYNAMIC)),
        MemoryHeap::Unknown => Some((D3DPOOL_MANAGED, 0)),
        MemoryHeap::GpuToCpu | MemoryHeap::CpuOnly => Some((D3DPOOL_SYSTEMMEM, 0)),
        MemoryHeap::Custom => None,
    }
}

fn convert_texture_usage(usage: D3dUsage) -> ResourceUsage {
    let mut result = ResourceUsage::SHADER_RESOURCE | ResourceUsage::COPY_DEST;
    if usage & D3DUSAGE_RENDERTARGET != 0 {
        result |= ResourceUsage::RENDER_TARGET
            | ResourceUsage::COPY_SOURCE
            | ResourceUsage::RESOLVE_DEST;
    }
    if usage & D3DUSAGE_DEPTHSTENCIL != 0 {
        result |= ResourceUsage::DEPTH_STENCIL;
    }
    result
}

fn convert_surface_usage(usage: D3dUsage) -> ResourceUsage {
    let mut result = ResourceUsage::COPY_SOURCE | ResourceUsage::COPY_DEST;
    if usage & D3DUSAGE_RENDERTARGET != 0 {
        result |= ResourceUsage::RENDER_TARGET
            | ResourceUsage::RESOLVE_SOURCE
            | ResourceUsage::RESOLVE_DEST;
    }
    if usage & D3DUSAGE_DEPTHSTENCIL != 0 {
        result |= ResourceUsage::DEPTH_STENCIL;
    }
    result
}

fn convert_usage_to_flags(usage: D3dUsage) -> ResourceFlags {
    let mut flags = ResourceFlags::empty();
    if usage & D3DUSAGE_DYNAMIC != 0 {
        flags |= ResourceFlags::DYNAMIC;
    }
    if usage & D3DUSAGE_AUTOGENMIPMAP != 0 {
        flags |= ResourceFlags::GENERATE_MIPMAPS;
    }
    flags
}

fn convert_usage_to_d3d(usage: ResourceUsage, flags: ResourceFlags) -> D3dUsage {
    let mut result = 0;
    if usage.contains(ResourceUsage::RENDER_TARGET) {
        result |= D3DUSAGE_RENDERTARGET;
    }
    if usage.intersects(ResourceUsage::DEPTH_STENCIL) {
        result |= D3DUSAGE_DEPTHSTENCIL;
    }
    if flags.contains(ResourceFlags::DYNAMIC) {
        result |= D3DUSAGE_DYNAMIC;
    }
    if flags.contains(ResourceFlags::GENERATE_MIPMAPS) {
        result |= D3DUSAGE_AUTOGENMIPMAP;
    }
    result
}

// ============================================================================
// Resource descriptions
// ============================================================================

/// Describe a 2D texture, cube texture or standalone surface.
///
/// `levels` of zero stands for the full mip chain, like in
/// `CreateTexture`.
pub fn convert_surface_desc(desc: &SurfaceDesc, levels: u32) -> ResourceDesc {
    let format = convert_d3d_format(desc.format);
    let heap = convert_pool_to_heap(desc.pool, desc.usage);
    let flags = convert_usage_to_flags(desc.usage);
    let levels = match levels {
        0 => full_mip_chain(desc.width, desc.height, 1),
        levels => levels,
    };

    match desc.ty {
        D3DRTYPE_TEXTURE | D3DRTYPE_CUBETEXTURE => {
            let cube = desc.ty == D3DRTYPE_CUBETEXTURE;
            let base = ResourceDesc::texture(TextureDimension::D2, desc.width, desc.height, format)
                .with_levels(levels as u16)
                .with_heap(heap)
                .with_usage(convert_texture_usage(desc.usage));
            if cube {
                base.with_depth_or_layers(CUBE_FACES as u16)
                    .with_flags(flags | ResourceFlags::CUBE_COMPATIBLE)
            } else {
                base.with_flags(flags)
            }
        }
        _ => ResourceDesc::texture(TextureDimension::Surface, desc.width, desc.height, format)
            .with_samples(convert_samples(desc.multisample))
            .with_heap(heap)
            .with_usage(convert_surface_usage(desc.usage))
            .with_flags(flags),
    }
}

pub fn convert_volume_desc(desc: &VolumeDesc, levels: u32) -> ResourceDesc {
    let levels = match levels {
        0 => full_mip_chain(desc.width, desc.height, desc.depth),
        levels => levels,
    };
    ResourceDesc::texture(
        TextureDimension::D3,
        desc.width,
        desc.height,
        convert_d3d_format(desc.format),
    )
    .with_depth_or_layers(desc.depth as u16)
    .with_levels(levels as u16)
    .with_heap(convert_pool_to_heap(desc.pool, desc.usage))
    .with_usage(convert_texture_usage(desc.usage) & !ResourceUsage::DEPTH_STENCIL)
    .with_flags(convert_usage_to_flags(desc.usage))
}

pub fn convert_buffer_desc(desc: &BufferDesc) -> ResourceDesc {
    let (usage, stride) = if desc.ty == D3DRTYPE_INDEXBUFFER {
        let stride = if desc.format == D3DFMT_INDEX32 { 4 } else { 2 };
        (ResourceUsage::INDEX_BUFFER, stride)
    } else {
        (ResourceUsage::VERTEX_BUFFER, 0)
    };
    ResourceDesc::buffer(u64::from(desc.size))
        .with_stride(stride)
        .with_heap(convert_pool_to_heap(desc.pool, desc.usage))
        .with_usage(usage | ResourceUsage::COPY_DEST)
        .with_flags(convert_usage_to_flags(desc.usage))
}

/// Map an abstract description to the native object that can hold it.
pub fn convert_resource_desc(desc: &ResourceDesc) -> ApiResult<NativeDesc> {
    let (pool, heap_usage) = convert_heap_to_pool(desc.heap)
        .ok_or_else(|| ApiError::Unsupported(format!("memory heap {:?}", desc.heap)))?;
    let usage = convert_usage_to_d3d(desc.usage, desc.flags) | heap_usage;

    let texture = match &desc.kind {
        ResourceKind::Buffer { size, stride } => {
            let size = u32::try_from(*size)
                .map_err(|_| ApiError::Unsupported(format!("buffer of {} bytes", size)))?;
            let native = if desc.usage.contains(ResourceUsage::INDEX_BUFFER) {
                BufferDesc {
                    ty: D3DRTYPE_INDEXBUFFER,
                    format: if *stride == 4 { D3DFMT_INDEX32 } else { D3DFMT_INDEX16 },
                    usage: usage | D3DUSAGE_WRITEONLY,
                    pool,
                    size,
                    fvf: 0,
                }
            } else if desc.usage.contains(ResourceUsage::VERTEX_BUFFER)
                || !desc.usage.intersects(
                    ResourceUsage::CONSTANT_BUFFER | ResourceUsage::UNORDERED_ACCESS,
                )
            {
                BufferDesc {
                    ty: D3DRTYPE_VERTEXBUFFER,
                    format: D3DFMT_VERTEXDATA,
                    usage: usage | D3DUSAGE_WRITEONLY,
                    pool,
                    size,
                    fvf: 0,
                }
            } else {
                return Err(ApiError::Unsupported(format!(
                    "buffer usage {:?}",
                    desc.usage
                )));
            };
            return Ok(NativeDesc::Buffer(native));
        }
        ResourceKind::Texture(texture) => texture,
    };

    let format = convert_format(texture.format);
    if format == D3DFMT_UNKNOWN {
        return Err(ApiError::Unsupported(format!("format {:?}", texture.format)));
    }
    let levels = u32::from(texture.levels).max(1);
    let attachment_only = !desc.usage.intersects(ResourceUsage::SHADER_RESOURCE)
        && desc
            .usage
            .intersects(ResourceUsage::RENDER_TARGET | ResourceUsage::DEPTH_STENCIL);

    match texture.dimension {
        TextureDimension::D3 => Ok(NativeDesc::Volume {
            desc: VolumeDesc {
                format,
                usage,
                pool,
                width: texture.width,
                height: texture.height,
                depth: u32::from(texture.depth_or_layers).max(1),
            },
            levels,
        }),
        TextureDimension::Surface => Ok(NativeDesc::Surface(surface(texture, format, usage, pool))),
        TextureDimension::D2 if texture.samples > 1 || (attachment_only && levels == 1) => {
            if texture.layers() > 1 || levels > 1 {
                return Err(ApiError::Unsupported(
                    "multisampled textures with several levels or layers".into(),
                ));
            }
            Ok(NativeDesc::Surface(surface(texture, format, usage, pool)))
        }
        TextureDimension::D1 | TextureDimension::D2 => {
            let cube = desc.flags.contains(ResourceFlags::CUBE_COMPATIBLE);
            match (cube, texture.layers()) {
                (true, CUBE_FACES) if texture.width == texture.height => {}
                (false, 1) => {}
                (_, layers) => {
                    return Err(ApiError::Unsupported(format!(
                        "texture with {} layers (cube: {})",
                        layers, cube
                    )))
                }
            }
            Ok(NativeDesc::Texture {
                desc: SurfaceDesc {
                    format,
                    ty: if cube { D3DRTYPE_CUBETEXTURE } else { D3DRTYPE_TEXTURE },
                    usage,
                    pool,
                    multisample: D3DMULTISAMPLE_NONE,
                    multisample_quality: 0,
                    width: texture.width,
                    height: texture.height,
                },
                levels,
            })
        }
    }
}

fn surface(
    texture: &lumen_core::TextureDesc,
    format: D3dFormat,
    usage: D3dUsage,
    pool: D3dPool,
) -> SurfaceDesc {
    SurfaceDesc {
        format,
        ty: D3DRTYPE_SURFACE,
        usage,
        pool,
        multisample: if texture.samples > 1 {
            u32::from(texture.samples)
        } else {
            D3DMULTISAMPLE_NONE
        },
        multisample_quality: 0,
        width: texture.width,
        height: texture.height,
    }
}

// ============================================================================
// Commands
// ============================================================================

pub fn convert_primitive_type(ty: D3dPrimitiveType) -> PrimitiveTopology {
    match ty {
        D3DPT_POINTLIST => PrimitiveTopology::PointList,
        D3DPT_LINELIST => PrimitiveTopology::LineList,
        D3DPT_LINESTRIP => PrimitiveTopology::LineStrip,
        D3DPT_TRIANGLELIST => PrimitiveTopology::TriangleList,
        D3DPT_TRIANGLESTRIP => PrimitiveTopology::TriangleStrip,
        D3DPT_TRIANGLEFAN => PrimitiveTopology::TriangleFan,
        _ => PrimitiveTopology::Undefined,
    }
}

pub fn convert_topology(topology: PrimitiveTopology) -> Option<D3dPrimitiveType> {
    match topology {
        PrimitiveTopology::PointList => Some(D3DPT_POINTLIST),
        PrimitiveTopology::LineList => Some(D3DPT_LINELIST),
        PrimitiveTopology::LineStrip => Some(D3DPT_LINESTRIP),
        PrimitiveTopology::TriangleList => Some(D3DPT_TRIANGLELIST),
        PrimitiveTopology::TriangleStrip => Some(D3DPT_TRIANGLESTRIP),
        PrimitiveTopology::TriangleFan => Some(D3DPT_TRIANGLEFAN),
        _ => None,
    }
}

/// Number of vertices (or indices) `primitive_count` primitives consume.
pub fn vertex_count(ty: D3dPrimitiveType, primitive_count: u32) -> u32 {
    match ty {
        D3DPT_LINELIST => primitive_count * 2,
        D3DPT_LINESTRIP => primitive_count + 1,
        D3DPT_TRIANGLELIST => primitive_count * 3,
        D3DPT_TRIANGLESTRIP | D3DPT_TRIANGLEFAN => primitive_count + 2,
        _ => primitive_count,
    }
}

/// Unpack a `D3DCOLOR` to normalized RGBA.
pub fn convert_color(color: D3dColor) -> [f32; 4] {
    let channel = |shift: u32| ((color >> shift) & 0xFF) as f32 / 255.0;
    [channel(16), channel(8), channel(0), channel(24)]
}

/// `D3DRECT` list of a clear; an empty list clears the whole viewport.
pub fn convert_rects(rects: &[[i32; 4]]) -> Vec<Rect> {
    rects
        .iter()
        .map(|[left, top, right, bottom]| Rect::new(*left, *top, *right, *bottom))
        .collect()
}

// ============================================================================
// Sampler states
// ============================================================================

pub const D3DSAMP_ADDRESSU: u32 = 1;
pub const D3DSAMP_ADDRESSV: u32 = 2;
pub const D3DSAMP_ADDRESSW: u32 = 3;
pub const D3DSAMP_BORDERCOLOR: u32 = 4;
pub const D3DSAMP_MAGFILTER: u32 = 5;
pub const D3DSAMP_MINFILTER: u32 = 6;
pub const D3DSAMP_MIPFILTER: u32 = 7;
pub const D3DSAMP_MIPMAPLODBIAS: u32 = 8;
pub const D3DSAMP_MAXMIPLEVEL: u32 = 9;
pub const D3DSAMP_MAXANISOTROPY: u32 = 10;

pub const D3DTEXF_NONE: u32 = 0;
pub const D3DTEXF_POINT: u32 = 1;
pub const D3DTEXF_LINEAR: u32 = 2;
pub const D3DTEXF_ANISOTROPIC: u32 = 3;

pub const D3DTADDRESS_WRAP: u32 = 1;
pub const D3DTADDRESS_MIRROR: u32 = 2;
pub const D3DTADDRESS_CLAMP: u32 = 3;
pub const D3DTADDRESS_BORDER: u32 = 4;
pub const D3DTADDRESS_MIRRORONCE: u32 = 5;

/// Sampler states of one sampler stage, as `(D3DSAMPLERSTATETYPE, value)`.
pub type SamplerStates = Vec<(u32, u32)>;

fn convert_address_mode(mode: AddressMode) -> u32 {
    match mode {
        AddressMode::Wrap => D3DTADDRESS_WRAP,
        AddressMode::Mirror => D3DTADDRESS_MIRROR,
        AddressMode::Clamp => D3DTADDRESS_CLAMP,
        AddressMode::Border => D3DTADDRESS_BORDER,
        AddressMode::MirrorOnce => D3DTADDRESS_MIRRORONCE,
    }
}

fn convert_d3d_address_mode(mode: u32) -> AddressMode {
    match mode {
        D3DTADDRESS_MIRROR => AddressMode::Mirror,
        D3DTADDRESS_CLAMP => AddressMode::Clamp,
        D3DTADDRESS_BORDER => AddressMode::Border,
        D3DTADDRESS_MIRRORONCE => AddressMode::MirrorOnce,
        _ => AddressMode::Wrap,
    }
}

fn convert_filter(filter: FilterMode, anisotropic: bool) -> u32 {
    match filter {
        _ if anisotropic => D3DTEXF_ANISOTROPIC,
        FilterMode::Point => D3DTEXF_POINT,
        FilterMode::Linear => D3DTEXF_LINEAR,
    }
}

fn pack_border_color(color: [f32; 4]) -> D3dColor {
    let channel = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u32;
    channel(color[3]) << 24 | channel(color[0]) << 16 | channel(color[1]) << 8 | channel(color[2])
}

/// Translate a sampler description to the sampler states that apply it.
///
/// Direct3D 9 has no comparison samplers and clamps the LOD only from the
/// most detailed level down, so `compare` and `max_lod` are dropped.
pub fn convert_sampler_desc(desc: &SamplerDesc) -> SamplerStates {
    let anisotropic = desc.is_anisotropic();
    vec![
        (D3DSAMP_ADDRESSU, convert_address_mode(desc.address_u)),
        (D3DSAMP_ADDRESSV, convert_address_mode(desc.address_v)),
        (D3DSAMP_ADDRESSW, convert_address_mode(desc.address_w)),
        (D3DSAMP_BORDERCOLOR, pack_border_color(desc.border_color)),
        (D3DSAMP_MAGFILTER, convert_filter(desc.mag_filter, anisotropic)),
        (D3DSAMP_MINFILTER, convert_filter(desc.min_filter, anisotropic)),
        (D3DSAMP_MIPFILTER, convert_filter(desc.mip_filter, false)),
        (D3DSAMP_MIPMAPLODBIAS, desc.mip_lod_bias.to_bits()),
        (D3DSAMP_MAXMIPLEVEL, desc.min_lod.max(0.0) as u32),
        (D3DSAMP_MAXANISOTROPY, desc.max_anisotropy.max(1.0) as u32),
    ]
}

/// Rebuild a sampler description from sampler states.
pub fn convert_sampler_states(states: &[(u32, u32)]) -> SamplerDesc {
    let mut desc = SamplerDesc::default();
    let filter = |value: u32| {
        if value == D3DTEXF_POINT || value == D3DTEXF_NONE {
            FilterMode::Point
        } else {
            FilterMode::Linear
        }
    };
    for &(state, value) in states {
        match state {
            D3DSAMP_ADDRESSU => desc.address_u = convert_d3d_address_mode(value),
            D3DSAMP_ADDRESSV => desc.address_v = convert_d3d_address_mode(value),
            D3DSAMP_ADDRESSW => desc.address_w = convert_d3d_address_mode(value),
            D3DSAMP_BORDERCOLOR => desc.border_color = convert_color(value),
            D3DSAMP_MAGFILTER => desc.mag_filter = filter(value),
            D3DSAMP_MINFILTER => desc.min_filter = filter(value),
            D3DSAMP_MIPFILTER => desc.mip_filter = filter(value),
            D3DSAMP_MIPMAPLODBIAS => desc.mip_lod_bias = f32::from_bits(value),
            D3DSAMP_MAXMIPLEVEL => desc.min_lod = value as f32,
            D3DSAMP_MAXANISOTROPY => desc.max_anisotropy = value as f32,
            _ => {}
        }
    }
    desc
}

// ============================================================================
// Render states
// ============================================================================

pub const D3DRS_ZENABLE: u32 = 7;
pub const D3DRS_FILLMODE: u32 = 8;
pub const D3DRS_ZWRITEENABLE: u32 = 14;
pub const D3DRS_SRCBLEND: u32 = 19;
pub const D3DRS_DESTBLEND: u32 = 20;
pub const D3DRS_CULLMODE: u32 = 22;
pub const D3DRS_ZFUNC: u32 = 23;
pub const D3DRS_ALPHABLENDENABLE: u32 = 27;
pub const D3DRS_STENCILENABLE: u32 = 52;
pub const D3DRS_STENCILFAIL: u32 = 53;
pub const D3DRS_STENCILZFAIL: u32 = 54;
pub const D3DRS_STENCILPASS: u32 = 55;
pub const D3DRS_STENCILFUNC: u32 = 56;
pub const D3DRS_STENCILREF: u32 = 57;
pub const D3DRS_STENCILMASK: u32 = 58;
pub const D3DRS_STENCILWRITEMASK: u32 = 59;
pub const D3DRS_MULTISAMPLEANTIALIAS: u32 = 161;
pub const D3DRS_MULTISAMPLEMASK: u32 = 162;
pub const D3DRS_COLORWRITEENABLE: u32 = 168;
pub const D3DRS_BLENDOP: u32 = 171;
pub const D3DRS_SCISSORTESTENABLE: u32 = 174;
pub const D3DRS_SLOPESCALEDEPTHBIAS: u32 = 175;
pub const D3DRS_ANTIALIASEDLINEENABLE: u32 = 176;
pub const D3DRS_TWOSIDEDSTENCILMODE: u32 = 185;
pub const D3DRS_CCW_STENCILFAIL: u32 = 186;
pub const D3DRS_CCW_STENCILZFAIL: u32 = 187;
pub const D3DRS_CCW_STENCILPASS: u32 = 188;
pub const D3DRS_CCW_STENCILFUNC: u32 = 189;
pub const D3DRS_COLORWRITEENABLE1: u32 = 190;
pub const D3DRS_COLORWRITEENABLE2: u32 = 191;
pub const D3DRS_COLORWRITEENABLE3: u32 = 192;
pub const D3DRS_BLENDFACTOR: u32 = 193;
pub const D3DRS_DEPTHBIAS: u32 = 195;
pub const D3DRS_SEPARATEALPHABLENDENABLE: u32 = 206;
pub const D3DRS_SRCBLENDALPHA: u32 = 207;
pub const D3DRS_DESTBLENDALPHA: u32 = 208;
pub const D3DRS_BLENDOPALPHA: u32 = 209;

pub const D3DFILL_POINT: u32 = 1;
pub const D3DFILL_WIREFRAME: u32 = 2;
pub const D3DFILL_SOLID: u32 = 3;

pub const D3DCULL_NONE: u32 = 1;
pub const D3DCULL_CW: u32 = 2;
pub const D3DCULL_CCW: u32 = 3;

pub fn convert_blend_factor(factor: BlendFactor) -> Option<u32> {
    Some(match factor {
        BlendFactor::Zero => 1,
        BlendFactor::One => 2,
        BlendFactor::SourceColor => 3,
        BlendFactor::OneMinusSourceColor => 4,
        BlendFactor::SourceAlpha => 5,
        BlendFactor::OneMinusSourceAlpha => 6,
        BlendFactor::DestAlpha => 7,
        BlendFactor::OneMinusDestAlpha => 8,
        BlendFactor::DestColor => 9,
        BlendFactor::OneMinusDestColor => 10,
        BlendFactor::SourceAlphaSaturate => 11,
        BlendFactor::ConstantColor | BlendFactor::ConstantAlpha => 14,
        BlendFactor::OneMinusConstantColor | BlendFactor::OneMinusConstantAlpha => 15,
        BlendFactor::Source1Color
        | BlendFactor::OneMinusSource1Color
        | BlendFactor::Source1Alpha
        | BlendFactor::OneMinusSource1Alpha => return None,
    })
}

pub fn convert_blend_op(op: BlendOp) -> u32 {
    match op {
        BlendOp::Add => 1,
        BlendOp::Subtract => 2,
        BlendOp::ReverseSubtract => 3,
        BlendOp::Min => 4,
        BlendOp::Max => 5,
    }
}

/// `D3DCMPFUNC` of a comparison.
pub fn convert_compare_op(op: CompareOp) -> u32 {
    match op {
        CompareOp::Never => 1,
        CompareOp::Less => 2,
        CompareOp::Equal => 3,
        CompareOp::LessEqual => 4,
        CompareOp::Greater => 5,
        CompareOp::NotEqual => 6,
        CompareOp::GreaterEqual => 7,
        CompareOp::Always => 8,
    }
}

pub fn convert_stencil_op(op: StencilOp) -> u32 {
    match op {
        StencilOp::Keep => 1,
        StencilOp::Zero => 2,
        StencilOp::Replace => 3,
        StencilOp::IncrementSaturate => 4,
        StencilOp::DecrementSaturate => 5,
        StencilOp::Invert => 6,
        StencilOp::Increment => 7,
        StencilOp::Decrement => 8,
    }
}

pub fn convert_fill_mode(mode: FillMode) -> u32 {
    match mode {
        FillMode::Solid => D3DFILL_SOLID,
        FillMode::Wireframe => D3DFILL_WIREFRAME,
        FillMode::Point => D3DFILL_POINT,
    }
}

/// `D3DCULL` for a cull mode. Direct3D 9 names the winding that is culled,
/// so the mapping depends on which winding is front facing.
pub fn convert_cull_mode(mode: CullMode, front_counter_clockwise: bool) -> Option<u32> {
    match mode {
        CullMode::None => Some(D3DCULL_NONE),
        CullMode::Back if front_counter_clockwise => Some(D3DCULL_CW),
        CullMode::Back => Some(D3DCULL_CCW),
        CullMode::Front if front_counter_clockwise => Some(D3DCULL_CCW),
        CullMode::Front => Some(D3DCULL_CW),
        CullMode::FrontAndBack => None,
    }
}

// ============================================================================
// Vertex declarations
// ============================================================================

/// `D3DVERTEXELEMENT9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VertexElement {
    pub stream: u16,
    pub offset: u16,
    /// `D3DDECLTYPE`.
    pub ty: u8,
    /// `D3DDECLMETHOD`.
    pub method: u8,
    /// `D3DDECLUSAGE`.
    pub usage: u8,
    pub usage_index: u8,
}

fn convert_decl_type(format: Format) -> Option<u8> {
    Some(match format {
        Format::R32Float => 0,
        Format::R32G32Float => 1,
        Format::R32G32B32Float => 2,
        Format::R32G32B32A32Float => 3,
        Format::B8G8R8A8Unorm => 4,
        Format::R8G8B8A8Uint => 5,
        Format::R16G16Sint => 6,
        Format::R16G16B16A16Sint => 7,
        Format::R8G8B8A8Unorm => 8,
        Format::R16G16Snorm => 9,
        Format::R16G16B16A16Snorm => 10,
        Format::R16G16Unorm => 11,
        Format::R16G16B16A16Unorm => 12,
        Format::R16G16Float => 15,
        Format::R16G16B16A16Float => 16,
        _ => return None,
    })
}

fn convert_decl_usage(semantic: &str) -> Option<u8> {
    Some(match semantic.to_ascii_uppercase().as_str() {
        "POSITION" | "SV_POSITION" => 0,
        "BLENDWEIGHT" => 1,
        "BLENDINDICES" => 2,
        "NORMAL" => 3,
        "PSIZE" => 4,
        "TEXCOORD" => 5,
        "TANGENT" => 6,
        "BINORMAL" => 7,
        "TESSFACTOR" => 8,
        "POSITIONT" => 9,
        "COLOR" => 10,
        "FOG" => 11,
        "DEPTH" => 12,
        "SAMPLE" => 13,
        _ => return None,
    })
}

/// Translate an input layout to a vertex declaration (without the end marker).
pub fn convert_input_layout(elements: &[InputElement]) -> ApiResult<Vec<VertexElement>> {
    elements
        .iter()
        .map(|element| {
            let ty = convert_decl_type(element.format).ok_or_else(|| {
                ApiError::Unsupported(format!("vertex format {:?}", element.format))
            })?;
            let usage = convert_decl_usage(&element.semantic).ok_or_else(|| {
                ApiError::Unsupported(format!("vertex semantic {}", element.semantic))
            })?;
            Ok(VertexElement {
                stream: element.buffer_binding as u16,
                offset: element.offset as u16,
                ty,
                method: 0,
                usage,
                usage_index: element.semantic_index as u8,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::ResourceType;

    #[test]
    fn test_format_round_trip_of_common_formats() {
        for format in [
            Format::B8G8R8A8Unorm,
            Format::R8G8B8A8Unorm,
            Format::B5G6R5Unorm,
            Format::Bc1Unorm,
            Format::D24UnormS8Uint,
            Format::Intz,
            Format::R16G16B16A16Float,
        ] {
            assert_eq!(convert_d3d_format(convert_format(format)), format);
        }
    }

    #[test]
    fn test_srgb_maps_to_linear() {
        assert_eq!(convert_format(Format::B8G8R8A8UnormSrgb), D3DFMT_A8R8G8B8);
        assert_eq!(convert_format(Format::R11G11B10Float), D3DFMT_UNKNOWN);
        assert_eq!(convert_d3d_format(D3DFMT_NULL), Format::Unknown);
    }

    #[test]
    fn test_fourcc_values() {
        assert_eq!(D3DFMT_DXT1, 0x3154_5844);
        assert_eq!(D3DFMT_INTZ, 0x5A54_4E49);
    }

    #[test]
    fn test_full_mip_chain() {
        assert_eq!(full_mip_chain(256, 256, 1), 9);
        assert_eq!(full_mip_chain(300, 20, 1), 9);
        assert_eq!(full_mip_chain(1, 1, 1), 1);
        assert_eq!(full_mip_chain(4, 4, 64), 7);
    }

    #[test]
    fn test_render_target_texture_desc() {
        let native = SurfaceDesc {
            format: D3DFMT_A8B8G8R8,
            ty: D3DRTYPE_TEXTURE,
            usage: D3DUSAGE_RENDERTARGET,
            pool: D3DPOOL_DEFAULT,
            width: 256,
            height: 256,
            ..Default::default()
        };
        let desc = convert_surface_desc(&native, 0);
        let texture = desc.as_texture().unwrap();
        assert_eq!(texture.levels, 9);
        assert_eq!(texture.format, Format::R8G8B8A8Unorm);
        assert_eq!(desc.heap, MemoryHeap::GpuOnly);
        assert!(desc.usage.contains(ResourceUsage::RENDER_TARGET | ResourceUsage::SHADER_RESOURCE));
    }

    #[test]
    fn test_cube_texture_has_six_layers() {
        let native = SurfaceDesc {
            format: D3DFMT_X8R8G8B8,
            ty: D3DRTYPE_CUBETEXTURE,
            width: 64,
            height: 64,
            ..Default::default()
        };
        let desc = convert_surface_desc(&native, 1);
        assert_eq!(desc.as_texture().unwrap().layers(), 6);
        assert!(desc.flags.contains(ResourceFlags::CUBE_COMPATIBLE));
        match convert_resource_desc(&desc).unwrap() {
            NativeDesc::Texture { desc, levels } => {
                assert_eq!(desc.ty, D3DRTYPE_CUBETEXTURE);
                assert_eq!(levels, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_surface_desc_keeps_samples() {
        let native = SurfaceDesc {
            format: D3DFMT_D24S8,
            ty: D3DRTYPE_SURFACE,
            usage: D3DUSAGE_DEPTHSTENCIL,
            multisample: 4,
            width: 800,
            height: 600,
            ..Default::default()
        };
        let desc = convert_surface_desc(&native, 1);
        assert_eq!(desc.ty(), ResourceType::Surface);
        assert_eq!(desc.as_texture().unwrap().samples, 4);
        assert_eq!(
            convert_resource_desc(&desc).unwrap(),
            NativeDesc::Surface(SurfaceDesc {
                pool: D3DPOOL_DEFAULT,
                ..native
            })
        );
    }

    #[test]
    fn test_attachment_only_texture_becomes_surface() {
        let desc = ResourceDesc::texture(TextureDimension::D2, 64, 64, Format::D24UnormS8Uint)
            .with_usage(ResourceUsage::DEPTH_STENCIL_WRITE);
        assert!(matches!(
            convert_resource_desc(&desc),
            Ok(NativeDesc::Surface(SurfaceDesc { ty: D3DRTYPE_SURFACE, .. }))
        ));
    }

    #[test]
    fn test_unsupported_descriptions() {
        let array = ResourceDesc::texture(TextureDimension::D2, 64, 64, Format::R8G8B8A8Unorm)
            .with_depth_or_layers(4);
        assert!(matches!(convert_resource_desc(&array), Err(ApiError::Unsupported(_))));

        let constant = ResourceDesc::buffer(256).with_usage(ResourceUsage::CONSTANT_BUFFER);
        assert!(convert_resource_desc(&constant).is_err());

        let custom = ResourceDesc::buffer(256).with_heap(MemoryHeap::Custom);
        assert!(convert_resource_desc(&custom).is_err());
    }

    #[test]
    fn test_index_buffer_desc() {
        let native = BufferDesc {
            ty: D3DRTYPE_INDEXBUFFER,
            format: D3DFMT_INDEX32,
            pool: D3DPOOL_MANAGED,
            size: 1024,
            ..Default::default()
        };
        let desc = convert_buffer_desc(&native);
        assert_eq!(desc.kind, ResourceKind::Buffer { size: 1024, stride: 4 });
        assert_eq!(desc.heap, MemoryHeap::Unknown);
        match convert_resource_desc(&desc).unwrap() {
            NativeDesc::Buffer(buffer) => {
                assert_eq!(buffer.ty, D3DRTYPE_INDEXBUFFER);
                assert_eq!(buffer.format, D3DFMT_INDEX32);
                assert_eq!(buffer.pool, D3DPOOL_MANAGED);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_vertex_count() {
        assert_eq!(vertex_count(D3DPT_TRIANGLELIST, 2), 6);
        assert_eq!(vertex_count(D3DPT_TRIANGLESTRIP, 2), 4);
        assert_eq!(vertex_count(D3DPT_LINESTRIP, 3), 4);
        assert_eq!(vertex_count(D3DPT_POINTLIST, 5), 5);
    }

    #[test]
    fn test_color_unpacking() {
        assert_eq!(convert_color(0xFF00_00FF), [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(convert_color(0x00FF_0000), [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_sampler_states_round_trip() {
        let desc = SamplerDesc::point().with_address_mode(AddressMode::Border);
        let states = convert_sampler_desc(&desc);
        let back = convert_sampler_states(&states);
        assert_eq!(back.min_filter, FilterMode::Point);
        assert_eq!(back.address_v, AddressMode::Border);
        assert_eq!(back.mip_lod_bias, 0.0);
    }

    #[test]
    fn test_anisotropic_filter() {
        let states = convert_sampler_desc(&SamplerDesc::default().with_anisotropy(8.0));
        assert!(states.contains(&(D3DSAMP_MINFILTER, D3DTEXF_ANISOTROPIC)));
        assert!(states.contains(&(D3DSAMP_MAXANISOTROPY, 8)));
    }

    #[test]
    fn test_cull_mode_follows_winding() {
        assert_eq!(convert_cull_mode(CullMode::Back, false), Some(D3DCULL_CCW));
        assert_eq!(convert_cull_mode(CullMode::Back, true), Some(D3DCULL_CW));
        assert_eq!(convert_cull_mode(CullMode::FrontAndBack, false), None);
    }

    #[test]
    fn test_input_layout() {
        let elements = vec![InputElement {
            semantic: "TEXCOORD".into(),
            semantic_index: 1,
            format: Format::R32G32Float,
            offset: 12,
            ..Default::default()
        }];
        let decl = convert_input_layout(&elements).unwrap();
        assert_eq!(decl[0].ty, 1);
        assert_eq!(decl[0].usage, 5);
        assert_eq!(decl[0].usage_index, 1);
        assert_eq!(decl[0].offset, 12);

        let bad = vec![InputElement {
            semantic: "WHATEVER".into(),
            format: Format::R32Float,
            ..Default::default()
        }];
        assert!(convert_input_layout(&bad).is_err());
    }
}
