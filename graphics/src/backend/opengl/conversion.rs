//! Conversions between the abstract object model and GL enumerants.

use lumen_core::pipeline::{
    BlendFactor, BlendOp, CompareOp, CullMode, FillMode, LogicOp, PrimitiveTopology, ShaderStage,
    StencilOp,
};
use lumen_core::resource::ResourceFlags;
use lumen_core::sampler::{AddressMode, FilterMode, SamplerDesc};
use lumen_core::{
    ApiError, Format, MemoryHeap, ResourceDesc, ResourceUsage, ResourceViewType, TextureDesc,
    TextureDimension,
};

use super::dispatch::GlError;
use super::gl::{self, GLbitfield, GLenum, GLint};

// ============================================================================
// Formats
// ============================================================================

/// Sized internal format of `format`, or [`gl::NONE`] if it has none.
///
/// Typeless formats map to their default typed format, alpha-only and
/// luminance formats to red/red-green formats that get a swizzle.
pub fn convert_format(format: Format) -> GLenum {
    match format {
        Format::R8Typeless | Format::R8Unorm | Format::A8Unorm | Format::L8Unorm => gl::R8,
        Format::R8Snorm => gl::R8_SNORM,
        Format::R8Uint | Format::S8Uint => gl::R8UI,
        Format::R8Sint => gl::R8I,
        Format::R8G8Typeless | Format::R8G8Unorm | Format::A8L8Unorm => gl::RG8,
        Format::R8G8Snorm => gl::RG8_SNORM,
        Format::R8G8Uint => gl::RG8UI,
        Format::R8G8Sint => gl::RG8I,
        Format::R8G8B8A8Typeless | Format::R8G8B8A8Unorm | Format::B8G8R8A8Typeless | Format::B8G8R8A8Unorm => {
            gl::RGBA8
        }
        Format::R8G8B8A8UnormSrgb | Format::B8G8R8A8UnormSrgb => gl::SRGB8_ALPHA8,
        Format::R8G8B8A8Snorm => gl::RGBA8_SNORM,
        Format::R8G8B8A8Uint => gl::RGBA8UI,
        Format::R8G8B8A8Sint => gl::RGBA8I,
        Format::R8G8B8X8Typeless
        | Format::R8G8B8X8Unorm
        | Format::B8G8R8X8Typeless
        | Format::B8G8R8X8Unorm => gl::RGB8,
        Format::R8G8B8X8UnormSrgb | Format::B8G8R8X8UnormSrgb => gl::SRGB8,
        Format::R10G10B10A2Typeless | Format::R10G10B10A2Unorm => gl::RGB10_A2,
        Format::R10G10B10A2Uint => gl::RGB10_A2UI,
        Format::B4G4R4A4Unorm => gl::RGBA4,
        Format::B5G6R5Unorm => gl::RGB565,
        Format::B5G5R5A1Unorm => gl::RGB5_A1,
        Format::B5G5R5X1Unorm => gl::RGB5,
        Format::R16Typeless | Format::R16Unorm | Format::L16Unorm => gl::R16,
        Format::R16Snorm => gl::R16_SNORM,
        Format::R16Float => gl::R16F,
        Format::R16Uint => gl::R16UI,
        Format::R16Sint => gl::R16I,
        Format::R16G16Typeless | Format::R16G16Unorm => gl::RG16,
        Format::R16G16Snorm => gl::RG16_SNORM,
        Format::R16G16Float => gl::RG16F,
        Format::R16G16Uint => gl::RG16UI,
        Format::R16G16Sint => gl::RG16I,
        Format::R16G16B16A16Typeless | Format::R16G16B16A16Unorm => gl::RGBA16,
        Format::R16G16B16A16Snorm => gl::RGBA16_SNORM,
        Format::R16G16B16A16Float => gl::RGBA16F,
        Format::R16G16B16A16Uint => gl::RGBA16UI,
        Format::R16G16B16A16Sint => gl::RGBA16I,
        Format::R32Typeless | Format::R32Float => gl::R32F,
        Format::R32Uint => gl::R32UI,
        Format::R32Sint => gl::R32I,
        Format::R32G32Typeless | Format::R32G32Float => gl::RG32F,
        Format::R32G32Uint => gl::RG32UI,
        Format::R32G32Sint => gl::RG32I,
        Format::R32G32B32Typeless | Format::R32G32B32Float => gl::RGB32F,
        Format::R32G32B32Uint => gl::RGB32UI,
        Format::R32G32B32Sint => gl::RGB32I,
        Format::R32G32B32A32Typeless | Format::R32G32B32A32Float => gl::RGBA32F,
        Format::R32G32B32A32Uint => gl::RGBA32UI,
        Format::R32G32B32A32Sint => gl::RGBA32I,
        Format::R9G9B9E5 => gl::RGB9_E5,
        Format::R11G11B10Float => gl::R11F_G11F_B10F,
        Format::D16Unorm => gl::DEPTH_COMPONENT16,
        Format::X8D24Unorm => gl::DEPTH_COMPONENT24,
        Format::D32Float => gl::DEPTH_COMPONENT32F,
        Format::R24G8Typeless
        | Format::D24UnormS8Uint
        | Format::R24UnormX8Typeless
        | Format::X24TypelessG8Uint
        | Format::Intz => gl::DEPTH24_STENCIL8,
        Format::R32G8X24Typeless
        | Format::D32FloatS8X24Uint
        | Format::R32FloatX8X24Typeless
        | Format::X32TypelessG8X24Uint => gl::DEPTH32F_STENCIL8,
        Format::Bc1Typeless | Format::Bc1Unorm => gl::COMPRESSED_RGBA_S3TC_DXT1_EXT,
        Format::Bc1UnormSrgb => gl::COMPRESSED_SRGB_ALPHA_S3TC_DXT1_EXT,
        Format::Bc2Typeless | Format::Bc2Unorm => gl::COMPRESSED_RGBA_S3TC_DXT3_EXT,
        Format::Bc2UnormSrgb => gl::COMPRESSED_SRGB_ALPHA_S3TC_DXT3_EXT,
        Format::Bc3Typeless | Format::Bc3Unorm => gl::COMPRESSED_RGBA_S3TC_DXT5_EXT,
        Format::Bc3UnormSrgb => gl::COMPRESSED_SRGB_ALPHA_S3TC_DXT5_EXT,
        Format::Bc4Typeless | Format::Bc4Unorm => gl::COMPRESSED_RED_RGTC1,
        Format::Bc4Snorm => gl::COMPRESSED_SIGNED_RED_RGTC1,
        Format::Bc5Typeless | Format::Bc5Unorm => gl::COMPRESSED_RG_RGTC2,
        Format::Bc5Snorm => gl::COMPRESSED_SIGNED_RG_RGTC2,
        Format::Bc6hTypeless | Format::Bc6hUf16 => gl::COMPRESSED_RGB_BPTC_UNSIGNED_FLOAT,
        Format::Bc6hSf16 => gl::COMPRESSED_RGB_BPTC_SIGNED_FLOAT,
        Format::Bc7Typeless | Format::Bc7Unorm => gl::COMPRESSED_RGBA_BPTC_UNORM,
        Format::Bc7UnormSrgb => gl::COMPRESSED_SRGB_ALPHA_BPTC_UNORM,
        Format::D16UnormS8Uint | Format::Unknown => gl::NONE,
    }
}

/// Abstract format of a sized internal format.
pub fn convert_internal_format(internal_format: GLenum) -> Format {
    match internal_format {
        gl::R8 => Format::R8Unorm,
        gl::R8_SNORM => Format::R8Snorm,
        gl::R8UI => Format::R8Uint,
        gl::R8I => Format::R8Sint,
        gl::RG8 => Format::R8G8Unorm,
        gl::RG8_SNORM => Format::R8G8Snorm,
        gl::RG8UI => Format::R8G8Uint,
        gl::RG8I => Format::R8G8Sint,
        gl::RGBA8 => Format::R8G8B8A8Unorm,
        gl::SRGB8_ALPHA8 => Format::R8G8B8A8UnormSrgb,
        gl::RGBA8_SNORM => Format::R8G8B8A8Snorm,
        gl::RGBA8UI => Format::R8G8B8A8Uint,
        gl::RGBA8I => Format::R8G8B8A8Sint,
        gl::RGB8 => Format::R8G8B8X8Unorm,
        gl::SRGB8 => Format::R8G8B8X8UnormSrgb,
        gl::RGB10_A2 => Format::R10G10B10A2Unorm,
        gl::RGB10_A2UI => Format::R10G10B10A2Uint,
        gl::RGBA4 => Format::B4G4R4A4Unorm,
        gl::RGB565 => Format::B5G6R5Unorm,
        gl::RGB5_A1 => Format::B5G5R5A1Unorm,
        gl::RGB5 => Format::B5G5R5X1Unorm,
        gl::R16 => Format::R16Unorm,
        gl::R16_SNORM => Format::R16Snorm,
        gl::R16F => Format::R16Float,
        gl::R16UI => Format::R16Uint,
        gl::R16I => Format::R16Sint,
        gl::RG16 => Format::R16G16Unorm,
        gl::RG16_SNORM => Format::R16G16Snorm,
        gl::RG16F => Format::R16G16Float,
        gl::RG16UI => Format::R16G16Uint,
        gl::RG16I => Format::R16G16Sint,
        gl::RGBA16 => Format::R16G16B16A16Unorm,
        gl::RGBA16_SNORM => Format::R16G16B16A16Snorm,
        gl::RGBA16F => Format::R16G16B16A16Float,
        gl::RGBA16UI => Format::R16G16B16A16Uint,
        gl::RGBA16I => Format::R16G16B16A16Sint,
        gl::R32F => Format::R32Float,
        gl::R32UI => Format::R32Uint,
        gl::R32I => Format::R32Sint,
        gl::RG32F => Format::R32G32Float,
        gl::RG32UI => Format::R32G32Uint,
        gl::RG32I => Format::R32G32Sint,
        gl::RGB32F => Format::R32G32B32Float,
        gl::RGB32UI => Format::R32G32B32Uint,
        gl::RGB32I => Format::R32G32B32Sint,
        gl::RGBA32F => Format::R32G32B32A32Float,
        gl::RGBA32UI => Format::R32G32B32A32Uint,
        gl::RGBA32I => Format::R32G32B32A32Sint,
        gl::RGB9_E5 => Format::R9G9B9E5,
        gl::R11F_G11F_B10F => Format::R11G11B10Float,
        gl::DEPTH_COMPONENT16 => Format::D16Unorm,
        gl::DEPTH_COMPONENT24 => Format::X8D24Unorm,
        gl::DEPTH_COMPONENT32F => Format::D32Float,
        gl::DEPTH24_STENCIL8 => Format::D24UnormS8Uint,
        gl::DEPTH32F_STENCIL8 => Format::D32FloatS8X24Uint,
        gl::STENCIL_INDEX8 => Format::S8Uint,
        gl::COMPRESSED_RGBA_S3TC_DXT1_EXT => Format::Bc1Unorm,
        gl::COMPRESSED_SRGB_ALPHA_S3TC_DXT1_EXT => Format::Bc1UnormSrgb,
        gl::COMPRESSED_RGBA_S3TC_DXT3_EXT => Format::Bc2Unorm,
        gl::COMPRESSED_SRGB_ALPHA_S3TC_DXT3_EXT => Format::Bc2UnormSrgb,
        gl::COMPRESSED_RGBA_S3TC_DXT5_EXT => Format::Bc3Unorm,
        gl::COMPRESSED_SRGB_ALPHA_S3TC_DXT5_EXT => Format::Bc3UnormSrgb,
        gl::COMPRESSED_RED_RGTC1 => Format::Bc4Unorm,
        gl::COMPRESSED_SIGNED_RED_RGTC1 => Format::Bc4Snorm,
        gl::COMPRESSED_RG_RGTC2 => Format::Bc5Unorm,
        gl::COMPRESSED_SIGNED_RG_RGTC2 => Format::Bc5Snorm,
        gl::COMPRESSED_RGB_BPTC_UNSIGNED_FLOAT => Format::Bc6hUf16,
        gl::COMPRESSED_RGB_BPTC_SIGNED_FLOAT => Format::Bc6hSf16,
        gl::COMPRESSED_RGBA_BPTC_UNORM => Format::Bc7Unorm,
        gl::COMPRESSED_SRGB_ALPHA_BPTC_UNORM => Format::Bc7UnormSrgb,
        _ => Format::Unknown,
    }
}

/// Texture swizzle `format` needs on top of its internal format.
///
/// Alpha-only formats read red into alpha, `X8` formats force alpha to one
/// and luminance formats replicate red.
pub fn format_swizzle(format: Format) -> Option<[GLenum; 4]> {
    match format {
        Format::A8Unorm => Some([gl::ZERO, gl::ZERO, gl::ZERO, gl::RED]),
        Format::L8Unorm | Format::L16Unorm => Some([gl::RED, gl::RED, gl::RED, gl::ONE]),
        Format::A8L8Unorm => Some([gl::RED, gl::RED, gl::RED, gl::GREEN]),
        Format::B8G8R8A8Typeless | Format::B8G8R8A8Unorm | Format::B8G8R8A8UnormSrgb => {
            Some([gl::BLUE, gl::GREEN, gl::RED, gl::ALPHA])
        }
        Format::B8G8R8X8Typeless | Format::B8G8R8X8Unorm | Format::B8G8R8X8UnormSrgb => {
            Some([gl::BLUE, gl::GREEN, gl::RED, gl::ONE])
        }
        format if format.has_undefined_alpha() => Some([gl::RED, gl::GREEN, gl::BLUE, gl::ONE]),
        _ => None,
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Buffer binding target for a layer-created buffer.
///
/// Buffers that are neither vertex, index nor constant buffers need a heap
/// that selects a pixel transfer target.
pub fn convert_buffer_target(desc: &ResourceDesc) -> Option<GLenum> {
    if desc.usage.contains(ResourceUsage::INDEX_BUFFER) {
        Some(gl::ELEMENT_ARRAY_BUFFER)
    } else if desc.usage.contains(ResourceUsage::VERTEX_BUFFER) {
        Some(gl::ARRAY_BUFFER)
    } else if desc.usage.contains(ResourceUsage::CONSTANT_BUFFER) {
        Some(gl::UNIFORM_BUFFER)
    } else if desc.usage.contains(ResourceUsage::UNORDERED_ACCESS) {
        Some(gl::SHADER_STORAGE_BUFFER)
    } else {
        match desc.heap {
            MemoryHeap::GpuToCpu => Some(gl::PIXEL_PACK_BUFFER),
            MemoryHeap::CpuToGpu => Some(gl::PIXEL_UNPACK_BUFFER),
            _ => None,
        }
    }
}

pub fn convert_buffer_storage_flags(heap: MemoryHeap) -> GLbitfield {
    match heap {
        MemoryHeap::CpuToGpu | MemoryHeap::CpuOnly => gl::MAP_WRITE_BIT | gl::DYNAMIC_STORAGE_BIT,
        MemoryHeap::GpuToCpu => gl::MAP_READ_BIT,
        _ => gl::DYNAMIC_STORAGE_BIT,
    }
}

fn convert_storage_flags_to_heap(flags: GLbitfield) -> MemoryHeap {
    if flags & gl::MAP_READ_BIT != 0 {
        MemoryHeap::GpuToCpu
    } else if flags & gl::MAP_WRITE_BIT != 0 {
        MemoryHeap::CpuToGpu
    } else {
        MemoryHeap::GpuOnly
    }
}

/// Heap implied by a `glBufferData` usage hint.
pub fn convert_usage_hint_to_heap(usage: GLenum) -> MemoryHeap {
    match usage {
        gl::STREAM_DRAW | gl::DYNAMIC_DRAW => MemoryHeap::CpuToGpu,
        gl::STREAM_READ | gl::STATIC_READ | gl::DYNAMIC_READ => MemoryHeap::GpuToCpu,
        _ => MemoryHeap::GpuOnly,
    }
}

fn convert_buffer_target_to_usage(target: GLenum) -> ResourceUsage {
    let usage = match target {
        gl::ARRAY_BUFFER => ResourceUsage::VERTEX_BUFFER,
        gl::ELEMENT_ARRAY_BUFFER => ResourceUsage::INDEX_BUFFER,
        gl::UNIFORM_BUFFER => ResourceUsage::CONSTANT_BUFFER,
        gl::SHADER_STORAGE_BUFFER => ResourceUsage::UNORDERED_ACCESS,
        gl::DRAW_INDIRECT_BUFFER | gl::DISPATCH_INDIRECT_BUFFER => ResourceUsage::INDIRECT_ARGUMENT,
        gl::TRANSFORM_FEEDBACK_BUFFER => ResourceUsage::STREAM_OUTPUT,
        gl::TEXTURE_BUFFER => ResourceUsage::SHADER_RESOURCE,
        _ => ResourceUsage::empty(),
    };
    usage | ResourceUsage::COPY_SOURCE | ResourceUsage::COPY_DEST
}

/// Texture target for a layer-created texture.
pub fn convert_texture_target(texture: &TextureDesc, flags: ResourceFlags) -> Option<GLenum> {
    let layers = texture.layers();
    let target = match texture.dimension {
        TextureDimension::D1 if layers > 1 => gl::TEXTURE_1D_ARRAY,
        TextureDimension::D1 => gl::TEXTURE_1D,
        TextureDimension::D2 if flags.contains(ResourceFlags::CUBE_COMPATIBLE) => {
            if layers > 6 {
                gl::TEXTURE_CUBE_MAP_ARRAY
            } else {
                gl::TEXTURE_CUBE_MAP
            }
        }
        TextureDimension::D2 if texture.samples > 1 && layers > 1 => gl::TEXTURE_2D_MULTISAMPLE_ARRAY,
        TextureDimension::D2 if texture.samples > 1 => gl::TEXTURE_2D_MULTISAMPLE,
        TextureDimension::D2 if layers > 1 => gl::TEXTURE_2D_ARRAY,
        TextureDimension::D2 => gl::TEXTURE_2D,
        TextureDimension::D3 => gl::TEXTURE_3D,
        TextureDimension::Surface => return None,
    };
    Some(target)
}

/// Usage a GL texture of `format` supports without further information.
fn texture_usage(format: Format) -> ResourceUsage {
    let attachment = if format.is_depth_stencil() {
        ResourceUsage::DEPTH_STENCIL
    } else {
        ResourceUsage::RENDER_TARGET
    };
    attachment | ResourceUsage::SHADER_RESOURCE | ResourceUsage::COPY_SOURCE | ResourceUsage::COPY_DEST
}

/// Descriptor of a texture allocated by `glTexStorage*`/`glTexImage*`.
///
/// `depth` is the depth of 3D textures and the layer count of array
/// textures; cube map arrays count layer-faces.
#[allow(clippy::too_many_arguments)]
pub fn describe_texture(
    target: GLenum,
    levels: u32,
    internal_format: GLenum,
    width: u32,
    height: u32,
    depth: u32,
    samples: u32,
) -> Option<ResourceDesc> {
    let format = convert_internal_format(internal_format);
    let (dimension, height, layers, flags) = match target {
        gl::TEXTURE_1D => (TextureDimension::D1, 1, 1, ResourceFlags::empty()),
        gl::TEXTURE_1D_ARRAY => (TextureDimension::D1, 1, height, ResourceFlags::empty()),
        gl::TEXTURE_2D | gl::TEXTURE_RECTANGLE | gl::TEXTURE_2D_MULTISAMPLE => {
            (TextureDimension::D2, height, 1, ResourceFlags::empty())
        }
        gl::TEXTURE_2D_ARRAY | gl::TEXTURE_2D_MULTISAMPLE_ARRAY => {
            (TextureDimension::D2, height, depth, ResourceFlags::empty())
        }
        gl::TEXTURE_CUBE_MAP => (TextureDimension::D2, height, 6, ResourceFlags::CUBE_COMPATIBLE),
        gl::TEXTURE_CUBE_MAP_ARRAY => (
            TextureDimension::D2,
            height,
            depth,
            ResourceFlags::CUBE_COMPATIBLE,
        ),
        gl::TEXTURE_3D => (TextureDimension::D3, height, depth, ResourceFlags::empty()),
        _ => return None,
    };
    Some(
        ResourceDesc::texture(dimension, width, height, format)
            .with_levels(u16::try_from(levels.max(1)).unwrap_or(u16::MAX))
            .with_depth_or_layers(u16::try_from(layers.max(1)).unwrap_or(u16::MAX))
            .with_samples(u16::try_from(samples.max(1)).unwrap_or(u16::MAX))
            .with_usage(texture_usage(format))
            .with_flags(flags),
    )
}

/// Descriptor of a renderbuffer allocated by `glRenderbufferStorage*`.
pub fn describe_renderbuffer(internal_format: GLenum, width: u32, height: u32, samples: u32) -> ResourceDesc {
    let format = convert_internal_format(internal_format);
    let attachment = if format.is_depth_stencil() {
        ResourceUsage::DEPTH_STENCIL
    } else {
        ResourceUsage::RENDER_TARGET
    };
    ResourceDesc::texture(TextureDimension::Surface, width, height, format)
        .with_samples(u16::try_from(samples.max(1)).unwrap_or(u16::MAX))
        .with_usage(attachment | ResourceUsage::COPY_SOURCE | ResourceUsage::COPY_DEST)
}

/// Descriptor of a buffer allocated by `glBufferStorage`.
pub fn describe_buffer(target: GLenum, size: u64, storage_flags: GLbitfield) -> ResourceDesc {
    ResourceDesc::buffer(size)
        .with_heap(convert_storage_flags_to_heap(storage_flags))
        .with_usage(convert_buffer_target_to_usage(target))
}

/// Descriptor of a buffer allocated by `glBufferData`.
pub fn describe_buffer_data(target: GLenum, size: u64, usage_hint: GLenum) -> ResourceDesc {
    ResourceDesc::buffer(size)
        .with_heap(convert_usage_hint_to_heap(usage_hint))
        .with_usage(convert_buffer_target_to_usage(target))
}

pub fn convert_view_type(ty: ResourceViewType) -> Option<GLenum> {
    match ty {
        ResourceViewType::Unknown => None,
        ResourceViewType::Buffer => Some(gl::TEXTURE_BUFFER),
        ResourceViewType::Texture1d => Some(gl::TEXTURE_1D),
        ResourceViewType::Texture1dArray => Some(gl::TEXTURE_1D_ARRAY),
        ResourceViewType::Texture2d => Some(gl::TEXTURE_2D),
        ResourceViewType::Texture2dArray => Some(gl::TEXTURE_2D_ARRAY),
        ResourceViewType::Texture2dMultisample => Some(gl::TEXTURE_2D_MULTISAMPLE),
        ResourceViewType::Texture2dMultisampleArray => Some(gl::TEXTURE_2D_MULTISAMPLE_ARRAY),
        ResourceViewType::Texture3d => Some(gl::TEXTURE_3D),
        ResourceViewType::TextureCube => Some(gl::TEXTURE_CUBE_MAP),
        ResourceViewType::TextureCubeArray => Some(gl::TEXTURE_CUBE_MAP_ARRAY),
    }
}

// ============================================================================
// Samplers
// ============================================================================

/// Value of one sampler parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplerParam {
    Int(GLint),
    Float(f32),
    Color([f32; 4]),
}

fn convert_min_filter(min: FilterMode, mip: FilterMode) -> GLenum {
    match (min, mip) {
        (FilterMode::Point, FilterMode::Point) => gl::NEAREST_MIPMAP_NEAREST,
        (FilterMode::Linear, FilterMode::Point) => gl::LINEAR_MIPMAP_NEAREST,
        (FilterMode::Point, FilterMode::Linear) => gl::NEAREST_MIPMAP_LINEAR,
        (FilterMode::Linear, FilterMode::Linear) => gl::LINEAR_MIPMAP_LINEAR,
    }
}

fn convert_mag_filter(mag: FilterMode) -> GLenum {
    match mag {
        FilterMode::Point => gl::NEAREST,
        FilterMode::Linear => gl::LINEAR,
    }
}

pub fn convert_address_mode(mode: AddressMode) -> GLenum {
    match mode {
        AddressMode::Wrap => gl::REPEAT,
        AddressMode::Mirror => gl::MIRRORED_REPEAT,
        AddressMode::Clamp => gl::CLAMP_TO_EDGE,
        AddressMode::Border => gl::CLAMP_TO_BORDER,
        AddressMode::MirrorOnce => gl::MIRROR_CLAMP_TO_EDGE,
    }
}

/// Sampler object parameters describing `desc`.
pub fn convert_sampler_desc(desc: &SamplerDesc, anisotropy_supported: bool) -> Vec<(GLenum, SamplerParam)> {
    let int = |value: GLenum| SamplerParam::Int(value as GLint);
    let mut params = vec![
        (gl::TEXTURE_MIN_FILTER, int(convert_min_filter(desc.min_filter, desc.mip_filter))),
        (gl::TEXTURE_MAG_FILTER, int(convert_mag_filter(desc.mag_filter))),
        (gl::TEXTURE_WRAP_S, int(convert_address_mode(desc.address_u))),
        (gl::TEXTURE_WRAP_T, int(convert_address_mode(desc.address_v))),
        (gl::TEXTURE_WRAP_R, int(convert_address_mode(desc.address_w))),
        (gl::TEXTURE_LOD_BIAS, SamplerParam::Float(desc.mip_lod_bias)),
        (gl::TEXTURE_MIN_LOD, SamplerParam::Float(desc.min_lod)),
        (gl::TEXTURE_MAX_LOD, SamplerParam::Float(desc.max_lod)),
        (gl::TEXTURE_BORDER_COLOR, SamplerParam::Color(desc.border_color)),
    ];
    match desc.compare {
        Some(compare) => {
            params.push((gl::TEXTURE_COMPARE_MODE, int(gl::COMPARE_REF_TO_TEXTURE)));
            params.push((gl::TEXTURE_COMPARE_FUNC, int(convert_compare_op(compare))));
        }
        None => params.push((gl::TEXTURE_COMPARE_MODE, int(gl::NONE))),
    }
    if anisotropy_supported && desc.is_anisotropic() {
        params.push((gl::TEXTURE_MAX_ANISOTROPY, SamplerParam::Float(desc.max_anisotropy)));
    }
    params
}

// ============================================================================
// Pipeline state
// ============================================================================

pub fn convert_compare_op(op: CompareOp) -> GLenum {
    match op {
        CompareOp::Never => gl::NEVER,
        CompareOp::Less => gl::LESS,
        CompareOp::Equal => gl::EQUAL,
        CompareOp::LessEqual => gl::LEQUAL,
        CompareOp::Greater => gl::GREATER,
        CompareOp::NotEqual => gl::NOTEQUAL,
        CompareOp::GreaterEqual => gl::GEQUAL,
        CompareOp::Always => gl::ALWAYS,
    }
}

pub fn convert_stencil_op(op: StencilOp) -> GLenum {
    match op {
        StencilOp::Keep => gl::KEEP,
        StencilOp::Zero => gl::ZERO,
        StencilOp::Replace => gl::REPLACE,
        StencilOp::IncrementSaturate => gl::INCR,
        StencilOp::DecrementSaturate => gl::DECR,
        StencilOp::Invert => gl::INVERT,
        StencilOp::Increment => gl::INCR_WRAP,
        StencilOp::Decrement => gl::DECR_WRAP,
    }
}

pub fn convert_blend_factor(factor: BlendFactor) -> GLenum {
    match factor {
        BlendFactor::Zero => gl::ZERO,
        BlendFactor::One => gl::ONE,
        BlendFactor::SourceColor => gl::SRC_COLOR,
        BlendFactor::OneMinusSourceColor => gl::ONE_MINUS_SRC_COLOR,
        BlendFactor::DestColor => gl::DST_COLOR,
        BlendFactor::OneMinusDestColor => gl::ONE_MINUS_DST_COLOR,
        BlendFactor::SourceAlpha => gl::SRC_ALPHA,
        BlendFactor::OneMinusSourceAlpha => gl::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DestAlpha => gl::DST_ALPHA,
        BlendFactor::OneMinusDestAlpha => gl::ONE_MINUS_DST_ALPHA,
        BlendFactor::ConstantColor => gl::CONSTANT_COLOR,
        BlendFactor::OneMinusConstantColor => gl::ONE_MINUS_CONSTANT_COLOR,
        BlendFactor::ConstantAlpha => gl::CONSTANT_ALPHA,
        BlendFactor::OneMinusConstantAlpha => gl::ONE_MINUS_CONSTANT_ALPHA,
        BlendFactor::SourceAlphaSaturate => gl::SRC_ALPHA_SATURATE,
        BlendFactor::Source1Color => gl::SRC1_COLOR,
        BlendFactor::OneMinusSource1Color => gl::ONE_MINUS_SRC1_COLOR,
        BlendFactor::Source1Alpha => gl::SRC1_ALPHA,
        BlendFactor::OneMinusSource1Alpha => gl::ONE_MINUS_SRC1_ALPHA,
    }
}

pub fn convert_blend_op(op: BlendOp) -> GLenum {
    match op {
        BlendOp::Add => gl::FUNC_ADD,
        BlendOp::Subtract => gl::FUNC_SUBTRACT,
        BlendOp::ReverseSubtract => gl::FUNC_REVERSE_SUBTRACT,
        BlendOp::Min => gl::MIN,
        BlendOp::Max => gl::MAX,
    }
}

pub fn convert_logic_op(op: LogicOp) -> GLenum {
    match op {
        LogicOp::Clear => gl::CLEAR,
        LogicOp::And => gl::AND,
        LogicOp::AndReverse => gl::AND_REVERSE,
        LogicOp::Copy => gl::COPY,
        LogicOp::AndInverted => gl::AND_INVERTED,
        LogicOp::Noop => gl::NOOP,
        LogicOp::Xor => gl::XOR,
        LogicOp::Or => gl::OR,
        LogicOp::Nor => gl::NOR,
        LogicOp::Equivalent => gl::EQUIV,
        LogicOp::Invert => gl::INVERT,
        LogicOp::OrReverse => gl::OR_REVERSE,
        LogicOp::CopyInverted => gl::COPY_INVERTED,
        LogicOp::OrInverted => gl::OR_INVERTED,
        LogicOp::Nand => gl::NAND,
        LogicOp::Set => gl::SET,
    }
}

pub fn convert_fill_mode(mode: FillMode) -> GLenum {
    match mode {
        FillMode::Solid => gl::FILL,
        FillMode::Wireframe => gl::LINE,
        FillMode::Point => gl::POINT,
    }
}

/// Face passed to `glCullFace`, or `None` when culling is disabled.
pub fn convert_cull_mode(mode: CullMode) -> Option<GLenum> {
    match mode {
        CullMode::None => None,
        CullMode::Front => Some(gl::FRONT),
        CullMode::Back => Some(gl::BACK),
        CullMode::FrontAndBack => Some(gl::FRONT_AND_BACK),
    }
}

/// Draw mode of `topology` and the patch vertex count for patch lists.
pub fn convert_primitive_topology(topology: PrimitiveTopology) -> (GLenum, u32) {
    match topology {
        PrimitiveTopology::PointList => (gl::POINTS, 0),
        PrimitiveTopology::LineList => (gl::LINES, 0),
        PrimitiveTopology::LineStrip => (gl::LINE_STRIP, 0),
        PrimitiveTopology::Undefined | PrimitiveTopology::TriangleList => (gl::TRIANGLES, 0),
        PrimitiveTopology::TriangleStrip => (gl::TRIANGLE_STRIP, 0),
        PrimitiveTopology::TriangleFan => (gl::TRIANGLE_FAN, 0),
        PrimitiveTopology::LineListAdjacency => (gl::LINES_ADJACENCY, 0),
        PrimitiveTopology::LineStripAdjacency => (gl::LINE_STRIP_ADJACENCY, 0),
        PrimitiveTopology::TriangleListAdjacency => (gl::TRIANGLES_ADJACENCY, 0),
        PrimitiveTopology::TriangleStripAdjacency => (gl::TRIANGLE_STRIP_ADJACENCY, 0),
        PrimitiveTopology::PatchList(vertices) => (gl::PATCHES, u32::from(vertices)),
    }
}

/// Shader object type of a single stage.
pub fn convert_shader_stage(stage: ShaderStage) -> Option<GLenum> {
    if stage == ShaderStage::VERTEX {
        Some(gl::VERTEX_SHADER)
    } else if stage == ShaderStage::HULL {
        Some(gl::TESS_CONTROL_SHADER)
    } else if stage == ShaderStage::DOMAIN {
        Some(gl::TESS_EVALUATION_SHADER)
    } else if stage == ShaderStage::GEOMETRY {
        Some(gl::GEOMETRY_SHADER)
    } else if stage == ShaderStage::PIXEL {
        Some(gl::FRAGMENT_SHADER)
    } else if stage == ShaderStage::COMPUTE {
        Some(gl::COMPUTE_SHADER)
    } else {
        None
    }
}

/// Vertex attribute layout of a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttribFormat {
    pub components: i32,
    pub ty: GLenum,
    pub normalized: bool,
    /// Read through `glVertexAttribIFormat`.
    pub integer: bool,
}

pub fn convert_attrib_format(format: Format) -> Option<AttribFormat> {
    let attrib = |components, ty, normalized, integer| {
        Some(AttribFormat {
            components,
            ty,
            normalized,
            integer,
        })
    };
    match format {
        Format::R8Unorm => attrib(1, gl::UNSIGNED_BYTE, true, false),
        Format::R8G8Unorm => attrib(2, gl::UNSIGNED_BYTE, true, false),
        Format::R8G8B8A8Unorm | Format::B8G8R8A8Unorm => attrib(4, gl::UNSIGNED_BYTE, true, false),
        Format::R8G8B8A8Snorm => attrib(4, gl::BYTE, true, false),
        Format::R8G8B8A8Uint => attrib(4, gl::UNSIGNED_BYTE, false, true),
        Format::R8G8B8A8Sint => attrib(4, gl::BYTE, false, true),
        Format::R16G16Float => attrib(2, gl::HALF_FLOAT, false, false),
        Format::R16G16B16A16Float => attrib(4, gl::HALF_FLOAT, false, false),
        Format::R16G16Unorm => attrib(2, gl::UNSIGNED_SHORT, true, false),
        Format::R16G16Snorm => attrib(2, gl::SHORT, true, false),
        Format::R16G16B16A16Unorm => attrib(4, gl::UNSIGNED_SHORT, true, false),
        Format::R16G16B16A16Snorm => attrib(4, gl::SHORT, true, false),
        Format::R16G16Sint => attrib(2, gl::SHORT, false, true),
        Format::R16G16B16A16Sint => attrib(4, gl::SHORT, false, true),
        Format::R10G10B10A2Unorm => attrib(4, gl::UNSIGNED_INT_2_10_10_10_REV, true, false),
        Format::R11G11B10Float => attrib(3, gl::UNSIGNED_INT_10F_11F_11F_REV, false, false),
        Format::R32Float => attrib(1, gl::FLOAT, false, false),
        Format::R32G32Float => attrib(2, gl::FLOAT, false, false),
        Format::R32G32B32Float => attrib(3, gl::FLOAT, false, false),
        Format::R32G32B32A32Float => attrib(4, gl::FLOAT, false, false),
        Format::R32Uint => attrib(1, gl::UNSIGNED_INT, false, true),
        Format::R32G32Uint => attrib(2, gl::UNSIGNED_INT, false, true),
        Format::R32G32B32Uint => attrib(3, gl::UNSIGNED_INT, false, true),
        Format::R32G32B32A32Uint => attrib(4, gl::UNSIGNED_INT, false, true),
        Format::R32Sint => attrib(1, gl::INT, false, true),
        Format::R32G32Sint => attrib(2, gl::INT, false, true),
        Format::R32G32B32Sint => attrib(3, gl::INT, false, true),
        Format::R32G32B32A32Sint => attrib(4, gl::INT, false, true),
        _ => None,
    }
}

/// Size in bytes of a `glDrawElements` index type.
pub fn index_type_size(ty: GLenum) -> u32 {
    match ty {
        gl::UNSIGNED_BYTE => 1,
        gl::UNSIGNED_SHORT => 2,
        _ => 4,
    }
}

// ============================================================================
// Errors
// ============================================================================

pub fn api_error(error: GlError) -> ApiError {
    match error.0 {
        gl::OUT_OF_MEMORY => ApiError::OutOfMemory,
        gl::INVALID_ENUM | gl::INVALID_VALUE => {
            ApiError::InvalidParameter(format!("GL error {:#06x}", error.0))
        }
        code => ApiError::Native(i64::from(code)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_round_trip() {
        for format in [
            Format::R8G8B8A8Unorm,
            Format::R8G8B8A8UnormSrgb,
            Format::R16G16B16A16Float,
            Format::R32Float,
            Format::D24UnormS8Uint,
            Format::D32Float,
            Format::Bc7UnormSrgb,
            Format::R11G11B10Float,
        ] {
            assert_eq!(convert_internal_format(convert_format(format)), format);
        }
        assert_eq!(convert_format(Format::Unknown), gl::NONE);
        assert_eq!(convert_internal_format(0x1234), Format::Unknown);
    }

    #[test]
    fn test_typeless_maps_to_default_typed() {
        assert_eq!(convert_format(Format::R8G8B8A8Typeless), gl::RGBA8);
        assert_eq!(convert_format(Format::R24G8Typeless), gl::DEPTH24_STENCIL8);
        assert_eq!(convert_format(Format::X24TypelessG8Uint), gl::DEPTH24_STENCIL8);
    }

    #[test]
    fn test_swizzles() {
        assert_eq!(
            format_swizzle(Format::A8Unorm),
            Some([gl::ZERO, gl::ZERO, gl::ZERO, gl::RED])
        );
        assert_eq!(
            format_swizzle(Format::R8G8B8X8Unorm),
            Some([gl::RED, gl::GREEN, gl::BLUE, gl::ONE])
        );
        assert_eq!(format_swizzle(Format::B8G8R8X8Unorm).map(|s| s[3]), Some(gl::ONE));
        assert_eq!(format_swizzle(Format::R8G8B8A8Unorm), None);
    }

    #[test]
    fn test_buffer_targets() {
        let vertex = ResourceDesc::buffer(16).with_usage(ResourceUsage::VERTEX_BUFFER);
        assert_eq!(convert_buffer_target(&vertex), Some(gl::ARRAY_BUFFER));
        let index = ResourceDesc::buffer(16)
            .with_usage(ResourceUsage::INDEX_BUFFER | ResourceUsage::VERTEX_BUFFER);
        assert_eq!(convert_buffer_target(&index), Some(gl::ELEMENT_ARRAY_BUFFER));
        let upload = ResourceDesc::buffer(16).with_heap(MemoryHeap::CpuToGpu);
        assert_eq!(convert_buffer_target(&upload), Some(gl::PIXEL_UNPACK_BUFFER));
        let readback = ResourceDesc::buffer(16).with_heap(MemoryHeap::GpuToCpu);
        assert_eq!(convert_buffer_target(&readback), Some(gl::PIXEL_PACK_BUFFER));
        assert_eq!(convert_buffer_target(&ResourceDesc::buffer(16)), None);
    }

    #[test]
    fn test_texture_targets() {
        let texture = |layers: u16, flags| {
            let desc = ResourceDesc::texture(TextureDimension::D2, 8, 8, Format::R8Unorm)
                .with_depth_or_layers(layers);
            convert_texture_target(desc.as_texture().unwrap(), flags)
        };
        assert_eq!(texture(1, ResourceFlags::empty()), Some(gl::TEXTURE_2D));
        assert_eq!(texture(4, ResourceFlags::empty()), Some(gl::TEXTURE_2D_ARRAY));
        assert_eq!(texture(6, ResourceFlags::CUBE_COMPATIBLE), Some(gl::TEXTURE_CUBE_MAP));
        assert_eq!(texture(12, ResourceFlags::CUBE_COMPATIBLE), Some(gl::TEXTURE_CUBE_MAP_ARRAY));
    }

    #[test]
    fn test_describe_texture() {
        let desc = describe_texture(gl::TEXTURE_2D_ARRAY, 3, gl::RGBA8, 64, 32, 4, 1).unwrap();
        let texture = desc.as_texture().unwrap();
        assert_eq!((texture.width, texture.height), (64, 32));
        assert_eq!(texture.layers(), 4);
        assert_eq!(texture.levels, 3);
        assert!(desc.usage.contains(ResourceUsage::RENDER_TARGET));

        let cube = describe_texture(gl::TEXTURE_CUBE_MAP, 1, gl::DEPTH24_STENCIL8, 16, 16, 1, 1).unwrap();
        assert!(cube.flags.contains(ResourceFlags::CUBE_COMPATIBLE));
        assert!(cube.usage.contains(ResourceUsage::DEPTH_STENCIL));
        assert_eq!(cube.as_texture().map(TextureDesc::layers), Some(6));

        assert!(describe_texture(gl::TEXTURE_BUFFER, 1, gl::R8, 4, 1, 1, 1).is_none());
    }

    #[test]
    fn test_sampler_params() {
        let params = convert_sampler_desc(&SamplerDesc::default().with_anisotropy(8.0), false);
        assert!(params.contains(&(
            gl::TEXTURE_MIN_FILTER,
            SamplerParam::Int(gl::LINEAR_MIPMAP_LINEAR as GLint)
        )));
        assert!(!params.iter().any(|(pname, _)| *pname == gl::TEXTURE_MAX_ANISOTROPY));
        let params = convert_sampler_desc(&SamplerDesc::default().with_compare(CompareOp::LessEqual), true);
        assert!(params.contains(&(gl::TEXTURE_COMPARE_FUNC, SamplerParam::Int(gl::LEQUAL as GLint))));
    }

    #[test]
    fn test_topology() {
        assert_eq!(convert_primitive_topology(PrimitiveTopology::PatchList(3)), (gl::PATCHES, 3));
        assert_eq!(convert_primitive_topology(PrimitiveTopology::TriangleStrip), (gl::TRIANGLE_STRIP, 0));
    }

    #[test]
    fn test_errors() {
        assert_eq!(api_error(GlError(gl::OUT_OF_MEMORY)), ApiError::OutOfMemory);
        assert!(matches!(api_error(GlError(gl::INVALID_VALUE)), ApiError::InvalidParameter(_)));
        assert_eq!(
            api_error(GlError(gl::INVALID_OPERATION)),
            ApiError::Native(i64::from(gl::INVALID_OPERATION))
        );
    }
}
