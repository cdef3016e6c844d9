//! Type conversions between Lumen types and Vulkan types.
//!
//! Every function here is a pure table lookup. Conversions that lose
//! information document what is dropped; everything else round-trips.

use ash::vk;
use lumen_core::pipeline::{
    BlendFactor, BlendOp, ColorWriteMask, CompareOp, CullMode, DescriptorType, DynamicState,
    FillMode, LogicOp, PrimitiveTopology, ShaderStage, StencilOp,
};
use lumen_core::resource::{ResourceFlags, ViewRange, ALL_REMAINING};
use lumen_core::sampler::{AddressMode, FilterMode, SamplerDesc};
use lumen_core::{
    Format, MemoryHeap, ResourceDesc, ResourceKind, ResourceUsage, ResourceViewDesc,
    ResourceViewType, TextureDesc, TextureDimension,
};

// ============================================================================
// Formats
// ============================================================================

/// Format table. The first entry for a Vulkan format is the one reported back
/// when translating from Vulkan.
const FORMATS: &[(Format, vk::Format)] = &[
    (Format::R32G32B32A32Float, vk::Format::R32G32B32A32_SFLOAT),
    (Format::R32G32B32A32Typeless, vk::Format::R32G32B32A32_SFLOAT),
    (Format::R32G32B32A32Uint, vk::Format::R32G32B32A32_UINT),
    (Format::R32G32B32A32Sint, vk::Format::R32G32B32A32_SINT),
    (Format::R32G32B32Float, vk::Format::R32G32B32_SFLOAT),
    (Format::R32G32B32Typeless, vk::Format::R32G32B32_SFLOAT),
    (Format::R32G32B32Uint, vk::Format::R32G32B32_UINT),
    (Format::R32G32B32Sint, vk::Format::R32G32B32_SINT),
    (Format::R16G16B16A16Float, vk::Format::R16G16B16A16_SFLOAT),
    (Format::R16G16B16A16Typeless, vk::Format::R16G16B16A16_SFLOAT),
    (Format::R16G16B16A16Unorm, vk::Format::R16G16B16A16_UNORM),
    (Format::R16G16B16A16Uint, vk::Format::R16G16B16A16_UINT),
    (Format::R16G16B16A16Snorm, vk::Format::R16G16B16A16_SNORM),
    (Format::R16G16B16A16Sint, vk::Format::R16G16B16A16_SINT),
    (Format::R32G32Float, vk::Format::R32G32_SFLOAT),
    (Format::R32G32Typeless, vk::Format::R32G32_SFLOAT),
    (Format::R32G32Uint, vk::Format::R32G32_UINT),
    (Format::R32G32Sint, vk::Format::R32G32_SINT),
    (Format::D32FloatS8X24Uint, vk::Format::D32_SFLOAT_S8_UINT),
    (Format::R32G8X24Typeless, vk::Format::D32_SFLOAT_S8_UINT),
    (Format::R32FloatX8X24Typeless, vk::Format::D32_SFLOAT_S8_UINT),
    (Format::X32TypelessG8X24Uint, vk::Format::D32_SFLOAT_S8_UINT),
    (Format::R10G10B10A2Unorm, vk::Format::A2B10G10R10_UNORM_PACK32),
    (Format::R10G10B10A2Typeless, vk::Format::A2B10G10R10_UNORM_PACK32),
    (Format::R10G10B10A2Uint, vk::Format::A2B10G10R10_UINT_PACK32),
    (Format::R11G11B10Float, vk::Format::B10G11R11_UFLOAT_PACK32),
    (Format::R8G8B8A8Unorm, vk::Format::R8G8B8A8_UNORM),
    (Format::R8G8B8A8Typeless, vk::Format::R8G8B8A8_UNORM),
    (Format::R8G8B8X8Unorm, vk::Format::R8G8B8A8_UNORM),
    (Format::R8G8B8X8Typeless, vk::Format::R8G8B8A8_UNORM),
    (Format::R8G8B8A8UnormSrgb, vk::Format::R8G8B8A8_SRGB),
    (Format::R8G8B8X8UnormSrgb, vk::Format::R8G8B8A8_SRGB),
    (Format::R8G8B8A8Uint, vk::Format::R8G8B8A8_UINT),
    (Format::R8G8B8A8Snorm, vk::Format::R8G8B8A8_SNORM),
    (Format::R8G8B8A8Sint, vk::Format::R8G8B8A8_SINT),
    (Format::R16G16Float, vk::Format::R16G16_SFLOAT),
    (Format::R16G16Typeless, vk::Format::R16G16_SFLOAT),
    (Format::R16G16Unorm, vk::Format::R16G16_UNORM),
    (Format::R16G16Uint, vk::Format::R16G16_UINT),
    (Format::R16G16Snorm, vk::Format::R16G16_SNORM),
    (Format::R16G16Sint, vk::Format::R16G16_SINT),
    (Format::R32Float, vk::Format::R32_SFLOAT),
    (Format::R32Typeless, vk::Format::R32_SFLOAT),
    (Format::D32Float, vk::Format::D32_SFLOAT),
    (Format::R32Uint, vk::Format::R32_UINT),
    (Format::R32Sint, vk::Format::R32_SINT),
    (Format::D24UnormS8Uint, vk::Format::D24_UNORM_S8_UINT),
    (Format::R24G8Typeless, vk::Format::D24_UNORM_S8_UINT),
    (Format::R24UnormX8Typeless, vk::Format::D24_UNORM_S8_UINT),
    (Format::X24TypelessG8Uint, vk::Format::D24_UNORM_S8_UINT),
    (Format::Intz, vk::Format::D24_UNORM_S8_UINT),
    (Format::X8D24Unorm, vk::Format::X8_D24_UNORM_PACK32),
    (Format::R8G8Unorm, vk::Format::R8G8_UNORM),
    (Format::R8G8Typeless, vk::Format::R8G8_UNORM),
    (Format::A8L8Unorm, vk::Format::R8G8_UNORM),
    (Format::R8G8Uint, vk::Format::R8G8_UINT),
    (Format::R8G8Snorm, vk::Format::R8G8_SNORM),
    (Format::R8G8Sint, vk::Format::R8G8_SINT),
    (Format::R16Float, vk::Format::R16_SFLOAT),
    (Format::R16Typeless, vk::Format::R16_SFLOAT),
    (Format::D16Unorm, vk::Format::D16_UNORM),
    (Format::R16Unorm, vk::Format::R16_UNORM),
    (Format::L16Unorm, vk::Format::R16_UNORM),
    (Format::R16Uint, vk::Format::R16_UINT),
    (Format::R16Snorm, vk::Format::R16_SNORM),
    (Format::R16Sint, vk::Format::R16_SINT),
    (Format::D16UnormS8Uint, vk::Format::D16_UNORM_S8_UINT),
    (Format::S8Uint, vk::Format::S8_UINT),
    (Format::R8Unorm, vk::Format::R8_UNORM),
    (Format::R8Typeless, vk::Format::R8_UNORM),
    (Format::A8Unorm, vk::Format::R8_UNORM),
    (Format::L8Unorm, vk::Format::R8_UNORM),
    (Format::R8Uint, vk::Format::R8_UINT),
    (Format::R8Snorm, vk::Format::R8_SNORM),
    (Format::R8Sint, vk::Format::R8_SINT),
    (Format::R9G9B9E5, vk::Format::E5B9G9R9_UFLOAT_PACK32),
    (Format::Bc1Unorm, vk::Format::BC1_RGBA_UNORM_BLOCK),
    (Format::Bc1Typeless, vk::Format::BC1_RGBA_UNORM_BLOCK),
    (Format::Bc1UnormSrgb, vk::Format::BC1_RGBA_SRGB_BLOCK),
    (Format::Bc2Unorm, vk::Format::BC2_UNORM_BLOCK),
    (Format::Bc2Typeless, vk::Format::BC2_UNORM_BLOCK),
    (Format::Bc2UnormSrgb, vk::Format::BC2_SRGB_BLOCK),
    (Format::Bc3Unorm, vk::Format::BC3_UNORM_BLOCK),
    (Format::Bc3Typeless, vk::Format::BC3_UNORM_BLOCK),
    (Format::Bc3UnormSrgb, vk::Format::BC3_SRGB_BLOCK),
    (Format::Bc4Unorm, vk::Format::BC4_UNORM_BLOCK),
    (Format::Bc4Typeless, vk::Format::BC4_UNORM_BLOCK),
    (Format::Bc4Snorm, vk::Format::BC4_SNORM_BLOCK),
    (Format::Bc5Unorm, vk::Format::BC5_UNORM_BLOCK),
    (Format::Bc5Typeless, vk::Format::BC5_UNORM_BLOCK),
    (Format::Bc5Snorm, vk::Format::BC5_SNORM_BLOCK),
    (Format::Bc6hUf16, vk::Format::BC6H_UFLOAT_BLOCK),
    (Format::Bc6hTypeless, vk::Format::BC6H_UFLOAT_BLOCK),
    (Format::Bc6hSf16, vk::Format::BC6H_SFLOAT_BLOCK),
    (Format::Bc7Unorm, vk::Format::BC7_UNORM_BLOCK),
    (Format::Bc7Typeless, vk::Format::BC7_UNORM_BLOCK),
    (Format::Bc7UnormSrgb, vk::Format::BC7_SRGB_BLOCK),
    (Format::B5G6R5Unorm, vk::Format::R5G6B5_UNORM_PACK16),
    (Format::B5G5R5A1Unorm, vk::Format::A1R5G5B5_UNORM_PACK16),
    (Format::B5G5R5X1Unorm, vk::Format::A1R5G5B5_UNORM_PACK16),
    (Format::B4G4R4A4Unorm, vk::Format::A4R4G4B4_UNORM_PACK16),
    (Format::B8G8R8A8Unorm, vk::Format::B8G8R8A8_UNORM),
    (Format::B8G8R8A8Typeless, vk::Format::B8G8R8A8_UNORM),
    (Format::B8G8R8X8Unorm, vk::Format::B8G8R8A8_UNORM),
    (Format::B8G8R8X8Typeless, vk::Format::B8G8R8A8_UNORM),
    (Format::B8G8R8A8UnormSrgb, vk::Format::B8G8R8A8_SRGB),
    (Format::B8G8R8X8UnormSrgb, vk::Format::B8G8R8A8_SRGB),
];

/// Convert Format to Vulkan format.
///
/// Typeless formats map to their default typed variant; images created with
/// one are made mutable so views can reinterpret them.
pub fn convert_format(format: Format) -> vk::Format {
    FORMATS
        .iter()
        .find(|(abstract_format, _)| *abstract_format == format)
        .map_or(vk::Format::UNDEFINED, |(_, vk_format)| *vk_format)
}

/// Convert a Vulkan format to Format.
pub fn convert_vk_format(format: vk::Format) -> Format {
    FORMATS
        .iter()
        .find(|(_, vk_format)| *vk_format == format)
        .map_or(Format::Unknown, |(abstract_format, _)| *abstract_format)
}

/// Image aspects covered by a format.
pub fn aspect_flags_from_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Component mapping a view of `format` needs.
///
/// Alpha-only formats are stored in the red channel and replicated into
/// alpha; formats with an undefined alpha channel read alpha as one.
pub fn component_mapping_for(format: Format) -> vk::ComponentMapping {
    if format.is_alpha_only() {
        vk::ComponentMapping {
            r: vk::ComponentSwizzle::ZERO,
            g: vk::ComponentSwizzle::ZERO,
            b: vk::ComponentSwizzle::ZERO,
            a: vk::ComponentSwizzle::R,
        }
    } else if format.has_undefined_alpha() {
        vk::ComponentMapping {
            r: vk::ComponentSwizzle::R,
            g: vk::ComponentSwizzle::G,
            b: vk::ComponentSwizzle::B,
            a: vk::ComponentSwizzle::ONE,
        }
    } else if matches!(format, Format::L8Unorm | Format::L16Unorm) {
        vk::ComponentMapping {
            r: vk::ComponentSwizzle::R,
            g: vk::ComponentSwizzle::R,
            b: vk::ComponentSwizzle::R,
            a: vk::ComponentSwizzle::ONE,
        }
    } else if format == Format::A8L8Unorm {
        vk::ComponentMapping {
            r: vk::ComponentSwizzle::R,
            g: vk::ComponentSwizzle::R,
            b: vk::ComponentSwizzle::R,
            a: vk::ComponentSwizzle::G,
        }
    } else {
        vk::ComponentMapping::default()
    }
}

// ============================================================================
// Usage flags
// ============================================================================

/// Convert ResourceUsage flags to Vulkan image usage flags.
pub fn convert_image_usage(usage: ResourceUsage) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::empty();

    if usage.contains(ResourceUsage::RENDER_TARGET) {
        result |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.intersects(ResourceUsage::DEPTH_STENCIL) {
        result |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.intersects(ResourceUsage::SHADER_RESOURCE) {
        result |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ResourceUsage::UNORDERED_ACCESS) {
        result |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.intersects(ResourceUsage::COPY_DEST | ResourceUsage::RESOLVE_DEST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.intersects(ResourceUsage::COPY_SOURCE | ResourceUsage::RESOLVE_SOURCE) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }

    result
}

/// Convert Vulkan image usage flags to ResourceUsage flags.
pub fn convert_vk_image_usage(usage: vk::ImageUsageFlags) -> ResourceUsage {
    let mut result = ResourceUsage::empty();

    if usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
        result |= ResourceUsage::RENDER_TARGET;
    }
    if usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
        result |= ResourceUsage::DEPTH_STENCIL;
    }
    if usage.intersects(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::INPUT_ATTACHMENT) {
        result |= ResourceUsage::SHADER_RESOURCE;
    }
    if usage.contains(vk::ImageUsageFlags::STORAGE) {
        result |= ResourceUsage::UNORDERED_ACCESS;
    }
    if usage.contains(vk::ImageUsageFlags::TRANSFER_DST) {
        result |= ResourceUsage::COPY_DEST | ResourceUsage::RESOLVE_DEST;
    }
    if usage.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
        result |= ResourceUsage::COPY_SOURCE | ResourceUsage::RESOLVE_SOURCE;
    }

    result
}

/// Convert ResourceUsage flags to Vulkan buffer usage flags.
pub fn convert_buffer_usage(usage: ResourceUsage) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::empty();

    if usage.contains(ResourceUsage::VERTEX_BUFFER) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(ResourceUsage::INDEX_BUFFER) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(ResourceUsage::CONSTANT_BUFFER) {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.intersects(ResourceUsage::SHADER_RESOURCE) {
        result |= vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER;
    }
    if usage.contains(ResourceUsage::UNORDERED_ACCESS) {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER;
    }
    if usage.contains(ResourceUsage::INDIRECT_ARGUMENT) {
        result |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if usage.contains(ResourceUsage::COPY_DEST) {
        result |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(ResourceUsage::COPY_SOURCE) {
        result |= vk::BufferUsageFlags::TRANSFER_SRC;
    }

    result
}

/// Convert Vulkan buffer usage flags to ResourceUsage flags.
pub fn convert_vk_buffer_usage(usage: vk::BufferUsageFlags) -> ResourceUsage {
    let mut result = ResourceUsage::empty();

    if usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER) {
        result |= ResourceUsage::VERTEX_BUFFER;
    }
    if usage.contains(vk::BufferUsageFlags::INDEX_BUFFER) {
        result |= ResourceUsage::INDEX_BUFFER;
    }
    if usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) {
        result |= ResourceUsage::CONSTANT_BUFFER;
    }
    if usage.contains(vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER) {
        result |= ResourceUsage::SHADER_RESOURCE;
    }
    if usage.intersects(
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER,
    ) {
        result |= ResourceUsage::UNORDERED_ACCESS;
    }
    if usage.contains(vk::BufferUsageFlags::INDIRECT_BUFFER) {
        result |= ResourceUsage::INDIRECT_ARGUMENT;
    }
    if usage.contains(vk::BufferUsageFlags::TRANSFER_DST) {
        result |= ResourceUsage::COPY_DEST;
    }
    if usage.contains(vk::BufferUsageFlags::TRANSFER_SRC) {
        result |= ResourceUsage::COPY_SOURCE;
    }

    result
}

// ============================================================================
// Resource states
// ============================================================================

/// Image layout matching a resource state.
pub fn convert_usage_to_image_layout(state: ResourceUsage) -> vk::ImageLayout {
    if state.is_empty() {
        vk::ImageLayout::UNDEFINED
    } else if state == ResourceUsage::PRESENT {
        vk::ImageLayout::PRESENT_SRC_KHR
    } else if state.contains(ResourceUsage::DEPTH_STENCIL_WRITE) {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    } else if state == ResourceUsage::DEPTH_STENCIL_READ {
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
    } else if state == ResourceUsage::RENDER_TARGET {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else if ResourceUsage::SHADER_RESOURCE.contains(state) {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else if (ResourceUsage::COPY_DEST | ResourceUsage::RESOLVE_DEST).contains(state) {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL
    } else if (ResourceUsage::COPY_SOURCE | ResourceUsage::RESOLVE_SOURCE).contains(state) {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
    } else {
        vk::ImageLayout::GENERAL
    }
}

/// Access mask matching a resource state.
pub fn convert_usage_to_access(state: ResourceUsage) -> vk::AccessFlags {
    if state == ResourceUsage::PRESENT {
        return vk::AccessFlags::empty();
    }

    let mut result = vk::AccessFlags::empty();

    if state.contains(ResourceUsage::VERTEX_BUFFER) {
        result |= vk::AccessFlags::VERTEX_ATTRIBUTE_READ;
    }
    if state.contains(ResourceUsage::INDEX_BUFFER) {
        result |= vk::AccessFlags::INDEX_READ;
    }
    if state.contains(ResourceUsage::CONSTANT_BUFFER) {
        result |= vk::AccessFlags::UNIFORM_READ;
    }
    if state.contains(ResourceUsage::RENDER_TARGET) {
        result |= vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    }
    if state.contains(ResourceUsage::DEPTH_STENCIL_READ) {
        result |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ;
    }
    if state.contains(ResourceUsage::DEPTH_STENCIL_WRITE) {
        result |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    if state.intersects(ResourceUsage::SHADER_RESOURCE) {
        result |= vk::AccessFlags::SHADER_READ;
    }
    if state.contains(ResourceUsage::UNORDERED_ACCESS) {
        result |= vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE;
    }
    if state.contains(ResourceUsage::INDIRECT_ARGUMENT) {
        result |= vk::AccessFlags::INDIRECT_COMMAND_READ;
    }
    if state.intersects(ResourceUsage::COPY_DEST | ResourceUsage::RESOLVE_DEST) {
        result |= vk::AccessFlags::TRANSFER_WRITE;
    }
    if state.intersects(ResourceUsage::COPY_SOURCE | ResourceUsage::RESOLVE_SOURCE) {
        result |= vk::AccessFlags::TRANSFER_READ;
    }
    if state.contains(ResourceUsage::CPU_ACCESS) {
        result |= vk::AccessFlags::HOST_READ | vk::AccessFlags::HOST_WRITE;
    }

    result
}

/// Pipeline stages that access a resource in `state`.
pub fn convert_usage_to_pipeline_stage(state: ResourceUsage) -> vk::PipelineStageFlags {
    if state.is_empty() {
        return vk::PipelineStageFlags::TOP_OF_PIPE;
    }
    if state == ResourceUsage::PRESENT {
        return vk::PipelineStageFlags::BOTTOM_OF_PIPE;
    }
    if state == ResourceUsage::GENERAL {
        return vk::PipelineStageFlags::ALL_COMMANDS;
    }

    let mut result = vk::PipelineStageFlags::empty();

    if state.intersects(ResourceUsage::VERTEX_BUFFER | ResourceUsage::INDEX_BUFFER) {
        result |= vk::PipelineStageFlags::VERTEX_INPUT;
    }
    if state.contains(ResourceUsage::RENDER_TARGET) {
        result |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    }
    if state.intersects(ResourceUsage::DEPTH_STENCIL) {
        result |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    }
    if state.contains(ResourceUsage::SHADER_RESOURCE_PIXEL) {
        result |= vk::PipelineStageFlags::FRAGMENT_SHADER;
    }
    if state.intersects(
        ResourceUsage::SHADER_RESOURCE_NON_PIXEL
            | ResourceUsage::CONSTANT_BUFFER
            | ResourceUsage::UNORDERED_ACCESS,
    ) {
        result |= vk::PipelineStageFlags::VERTEX_SHADER
            | vk::PipelineStageFlags::FRAGMENT_SHADER
            | vk::PipelineStageFlags::COMPUTE_SHADER;
    }
    if state.contains(ResourceUsage::INDIRECT_ARGUMENT) {
        result |= vk::PipelineStageFlags::DRAW_INDIRECT;
    }
    if state.intersects(
        ResourceUsage::COPY_DEST
            | ResourceUsage::COPY_SOURCE
            | ResourceUsage::RESOLVE_DEST
            | ResourceUsage::RESOLVE_SOURCE,
    ) {
        result |= vk::PipelineStageFlags::TRANSFER;
    }
    if state.contains(ResourceUsage::CPU_ACCESS) {
        result |= vk::PipelineStageFlags::HOST;
    }

    if result.is_empty() {
        vk::PipelineStageFlags::ALL_COMMANDS
    } else {
        result
    }
}

// ============================================================================
// Resource descriptors
// ============================================================================

/// Create info for an image described by `desc`.
///
/// Returns `None` for buffer descriptors.
pub fn convert_image_desc(desc: &ResourceDesc) -> Option<vk::ImageCreateInfo<'static>> {
    let texture = desc.as_texture()?;
    let image_type = match texture.dimension {
        TextureDimension::D1 => vk::ImageType::TYPE_1D,
        TextureDimension::D2 | TextureDimension::Surface => vk::ImageType::TYPE_2D,
        TextureDimension::D3 => vk::ImageType::TYPE_3D,
    };
    let is_3d = texture.dimension == TextureDimension::D3;

    let mut flags = vk::ImageCreateFlags::empty();
    if desc.flags.contains(ResourceFlags::CUBE_COMPATIBLE) {
        flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
    }
    if texture.format != Format::Unknown && texture.format.to_typeless() == texture.format {
        flags |= vk::ImageCreateFlags::MUTABLE_FORMAT;
    }

    Some(
        vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(image_type)
            .format(convert_format(texture.format))
            .extent(vk::Extent3D {
                width: texture.width,
                height: if texture.dimension == TextureDimension::D1 {
                    1
                } else {
                    texture.height
                },
                depth: if is_3d {
                    u32::from(texture.depth_or_layers)
                } else {
                    1
                },
            })
            .mip_levels(u32::from(texture.levels).max(1))
            .array_layers(if is_3d { 1 } else { texture.layers() })
            .samples(vk::SampleCountFlags::from_raw(u32::from(texture.samples.max(1))))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_image_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED),
    )
}

/// Describe an image from its create info.
///
/// The memory heap is unknown at this point and reported as such.
pub fn convert_image_create_info(info: &vk::ImageCreateInfo<'_>) -> ResourceDesc {
    let dimension = match info.image_type {
        vk::ImageType::TYPE_1D => TextureDimension::D1,
        vk::ImageType::TYPE_3D => TextureDimension::D3,
        _ => TextureDimension::D2,
    };
    let depth_or_layers = if dimension == TextureDimension::D3 {
        info.extent.depth
    } else {
        info.array_layers
    };

    let mut flags = ResourceFlags::empty();
    if info.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE) {
        flags |= ResourceFlags::CUBE_COMPATIBLE;
    }
    if info.flags.contains(vk::ImageCreateFlags::SPARSE_BINDING) {
        flags |= ResourceFlags::SPARSE_BINDING;
    }

    ResourceDesc {
        kind: ResourceKind::Texture(TextureDesc {
            dimension,
            width: info.extent.width,
            height: info.extent.height,
            depth_or_layers: u16::try_from(depth_or_layers).unwrap_or(u16::MAX),
            levels: u16::try_from(info.mip_levels).unwrap_or(u16::MAX),
            format: convert_vk_format(info.format),
            samples: u16::try_from(info.samples.as_raw()).unwrap_or(1),
        }),
        heap: MemoryHeap::Unknown,
        usage: convert_vk_image_usage(info.usage),
        flags,
    }
}

/// Create info for a buffer described by `desc`.
///
/// Returns `None` for texture descriptors.
pub fn convert_buffer_desc(desc: &ResourceDesc) -> Option<vk::BufferCreateInfo<'static>> {
    let size = desc.buffer_size()?;
    let mut flags = vk::BufferCreateFlags::empty();
    if desc.flags.contains(ResourceFlags::SPARSE_BINDING) {
        flags |= vk::BufferCreateFlags::SPARSE_BINDING;
    }
    Some(
        vk::BufferCreateInfo::default()
            .flags(flags)
            .size(size)
            .usage(convert_buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE),
    )
}

/// Describe a buffer from its create info.
pub fn convert_buffer_create_info(info: &vk::BufferCreateInfo<'_>) -> ResourceDesc {
    let mut flags = ResourceFlags::empty();
    if info.flags.contains(vk::BufferCreateFlags::SPARSE_BINDING) {
        flags |= ResourceFlags::SPARSE_BINDING;
    }
    ResourceDesc {
        kind: ResourceKind::Buffer {
            size: info.size,
            stride: 0,
        },
        heap: MemoryHeap::Unknown,
        usage: convert_vk_buffer_usage(info.usage),
        flags,
    }
}

/// Memory location used for a heap. `None` for heaps the layer does not
/// allocate from.
pub fn convert_memory_heap(heap: MemoryHeap) -> Option<gpu_allocator::MemoryLocation> {
    match heap {
        MemoryHeap::GpuOnly => Some(gpu_allocator::MemoryLocation::GpuOnly),
        MemoryHeap::CpuToGpu | MemoryHeap::CpuOnly => Some(gpu_allocator::MemoryLocation::CpuToGpu),
        MemoryHeap::GpuToCpu => Some(gpu_allocator::MemoryLocation::GpuToCpu),
        MemoryHeap::Unknown | MemoryHeap::Custom => None,
    }
}

// ============================================================================
// View descriptors
// ============================================================================

/// Convert a view dimension to a Vulkan image view type.
pub fn convert_view_type(ty: ResourceViewType) -> Option<vk::ImageViewType> {
    match ty {
        ResourceViewType::Texture1d => Some(vk::ImageViewType::TYPE_1D),
        ResourceViewType::Texture1dArray => Some(vk::ImageViewType::TYPE_1D_ARRAY),
        ResourceViewType::Texture2d | ResourceViewType::Texture2dMultisample => {
            Some(vk::ImageViewType::TYPE_2D)
        }
        ResourceViewType::Texture2dArray | ResourceViewType::Texture2dMultisampleArray => {
            Some(vk::ImageViewType::TYPE_2D_ARRAY)
        }
        ResourceViewType::Texture3d => Some(vk::ImageViewType::TYPE_3D),
        ResourceViewType::TextureCube => Some(vk::ImageViewType::CUBE),
        ResourceViewType::TextureCubeArray => Some(vk::ImageViewType::CUBE_ARRAY),
        ResourceViewType::Unknown | ResourceViewType::Buffer => None,
    }
}

/// Convert a Vulkan image view type to a view dimension.
pub fn convert_vk_view_type(ty: vk::ImageViewType) -> ResourceViewType {
    match ty {
        vk::ImageViewType::TYPE_1D => ResourceViewType::Texture1d,
        vk::ImageViewType::TYPE_1D_ARRAY => ResourceViewType::Texture1dArray,
        vk::ImageViewType::TYPE_2D => ResourceViewType::Texture2d,
        vk::ImageViewType::TYPE_2D_ARRAY => ResourceViewType::Texture2dArray,
        vk::ImageViewType::TYPE_3D => ResourceViewType::Texture3d,
        vk::ImageViewType::CUBE => ResourceViewType::TextureCube,
        vk::ImageViewType::CUBE_ARRAY => ResourceViewType::TextureCubeArray,
        _ => ResourceViewType::Unknown,
    }
}

/// Subresource range of a texture view. `ALL_REMAINING` maps onto
/// `VK_REMAINING_*`, which has the same value.
pub fn convert_view_range(
    desc: &ResourceViewDesc,
    aspect_mask: vk::ImageAspectFlags,
) -> Option<vk::ImageSubresourceRange> {
    match desc.range {
        ViewRange::Texture {
            first_level,
            levels,
            first_layer,
            layers,
        } => Some(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: first_level,
            level_count: levels,
            base_array_layer: first_layer,
            layer_count: layers,
        }),
        ViewRange::Buffer { .. } => None,
    }
}

/// Describe an image view from its create info.
pub fn convert_image_view_create_info(info: &vk::ImageViewCreateInfo<'_>) -> ResourceViewDesc {
    let range = info.subresource_range;
    ResourceViewDesc::texture(
        convert_vk_view_type(info.view_type),
        convert_vk_format(info.format),
        range.base_mip_level,
        if range.level_count == vk::REMAINING_MIP_LEVELS {
            ALL_REMAINING
        } else {
            range.level_count
        },
        range.base_array_layer,
        if range.layer_count == vk::REMAINING_ARRAY_LAYERS {
            ALL_REMAINING
        } else {
            range.layer_count
        },
    )
}

/// Describe a buffer view from its create info.
pub fn convert_buffer_view_create_info(info: &vk::BufferViewCreateInfo<'_>) -> ResourceViewDesc {
    ResourceViewDesc::buffer(convert_vk_format(info.format), info.offset, info.range)
}

// ============================================================================
// Samplers
// ============================================================================

fn convert_filter(filter: FilterMode) -> vk::Filter {
    match filter {
        FilterMode::Point => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

fn convert_vk_filter(filter: vk::Filter) -> FilterMode {
    if filter == vk::Filter::NEAREST {
        FilterMode::Point
    } else {
        FilterMode::Linear
    }
}

/// Convert AddressMode to Vulkan sampler address mode.
pub fn convert_address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Wrap => vk::SamplerAddressMode::REPEAT,
        AddressMode::Mirror => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Border => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        AddressMode::MirrorOnce => vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE,
    }
}

pub fn convert_vk_address_mode(mode: vk::SamplerAddressMode) -> AddressMode {
    match mode {
        vk::SamplerAddressMode::MIRRORED_REPEAT => AddressMode::Mirror,
        vk::SamplerAddressMode::CLAMP_TO_EDGE => AddressMode::Clamp,
        vk::SamplerAddressMode::CLAMP_TO_BORDER => AddressMode::Border,
        vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE => AddressMode::MirrorOnce,
        _ => AddressMode::Wrap,
    }
}

/// Vulkan only supports three fixed border colors; the closest one is used.
fn convert_border_color(color: [f32; 4]) -> vk::BorderColor {
    if color[3] == 0.0 {
        vk::BorderColor::FLOAT_TRANSPARENT_BLACK
    } else if color[0] == 0.0 && color[1] == 0.0 && color[2] == 0.0 {
        vk::BorderColor::FLOAT_OPAQUE_BLACK
    } else {
        vk::BorderColor::FLOAT_OPAQUE_WHITE
    }
}

fn convert_vk_border_color(color: vk::BorderColor) -> [f32; 4] {
    match color {
        vk::BorderColor::FLOAT_OPAQUE_BLACK | vk::BorderColor::INT_OPAQUE_BLACK => {
            [0.0, 0.0, 0.0, 1.0]
        }
        vk::BorderColor::FLOAT_OPAQUE_WHITE | vk::BorderColor::INT_OPAQUE_WHITE => [1.0; 4],
        _ => [0.0; 4],
    }
}

/// Create info for a sampler.
pub fn convert_sampler_desc(desc: &SamplerDesc) -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo::default()
        .mag_filter(convert_filter(desc.mag_filter))
        .min_filter(convert_filter(desc.min_filter))
        .mipmap_mode(match desc.mip_filter {
            FilterMode::Point => vk::SamplerMipmapMode::NEAREST,
            FilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
        })
        .address_mode_u(convert_address_mode(desc.address_u))
        .address_mode_v(convert_address_mode(desc.address_v))
        .address_mode_w(convert_address_mode(desc.address_w))
        .mip_lod_bias(desc.mip_lod_bias)
        .anisotropy_enable(desc.is_anisotropic())
        .max_anisotropy(desc.max_anisotropy)
        .compare_enable(desc.compare.is_some())
        .compare_op(convert_compare_op(desc.compare.unwrap_or(CompareOp::Never)))
        .min_lod(desc.min_lod)
        .max_lod(desc.max_lod)
        .border_color(convert_border_color(desc.border_color))
        .unnormalized_coordinates(false)
}

/// Describe a sampler from its create info.
pub fn convert_sampler_create_info(info: &vk::SamplerCreateInfo<'_>) -> SamplerDesc {
    SamplerDesc {
        min_filter: convert_vk_filter(info.min_filter),
        mag_filter: convert_vk_filter(info.mag_filter),
        mip_filter: if info.mipmap_mode == vk::SamplerMipmapMode::NEAREST {
            FilterMode::Point
        } else {
            FilterMode::Linear
        },
        address_u: convert_vk_address_mode(info.address_mode_u),
        address_v: convert_vk_address_mode(info.address_mode_v),
        address_w: convert_vk_address_mode(info.address_mode_w),
        mip_lod_bias: info.mip_lod_bias,
        max_anisotropy: if info.anisotropy_enable != vk::FALSE {
            info.max_anisotropy
        } else {
            1.0
        },
        compare: (info.compare_enable != vk::FALSE).then(|| convert_vk_compare_op(info.compare_op)),
        border_color: convert_vk_border_color(info.border_color),
        min_lod: info.min_lod,
        max_lod: info.max_lod,
    }
}

// ============================================================================
// Pipeline state
// ============================================================================

/// Convert CompareOp to Vulkan compare op.
pub fn convert_compare_op(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn convert_vk_compare_op(op: vk::CompareOp) -> CompareOp {
    match op {
        vk::CompareOp::NEVER => CompareOp::Never,
        vk::CompareOp::LESS => CompareOp::Less,
        vk::CompareOp::EQUAL => CompareOp::Equal,
        vk::CompareOp::LESS_OR_EQUAL => CompareOp::LessEqual,
        vk::CompareOp::GREATER => CompareOp::Greater,
        vk::CompareOp::NOT_EQUAL => CompareOp::NotEqual,
        vk::CompareOp::GREATER_OR_EQUAL => CompareOp::GreaterEqual,
        _ => CompareOp::Always,
    }
}

pub fn convert_stencil_op(op: StencilOp) -> vk::StencilOp {
    match op {
        StencilOp::Keep => vk::StencilOp::KEEP,
        StencilOp::Zero => vk::StencilOp::ZERO,
        StencilOp::Replace => vk::StencilOp::REPLACE,
        StencilOp::IncrementSaturate => vk::StencilOp::INCREMENT_AND_CLAMP,
        StencilOp::DecrementSaturate => vk::StencilOp::DECREMENT_AND_CLAMP,
        StencilOp::Invert => vk::StencilOp::INVERT,
        StencilOp::Increment => vk::StencilOp::INCREMENT_AND_WRAP,
        StencilOp::Decrement => vk::StencilOp::DECREMENT_AND_WRAP,
    }
}

pub fn convert_vk_stencil_op(op: vk::StencilOp) -> StencilOp {
    match op {
        vk::StencilOp::ZERO => StencilOp::Zero,
        vk::StencilOp::REPLACE => StencilOp::Replace,
        vk::StencilOp::INCREMENT_AND_CLAMP => StencilOp::IncrementSaturate,
        vk::StencilOp::DECREMENT_AND_CLAMP => StencilOp::DecrementSaturate,
        vk::StencilOp::INVERT => StencilOp::Invert,
        vk::StencilOp::INCREMENT_AND_WRAP => StencilOp::Increment,
        vk::StencilOp::DECREMENT_AND_WRAP => StencilOp::Decrement,
        _ => StencilOp::Keep,
    }
}

pub fn convert_blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SourceColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSourceColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::DestColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::OneMinusDestColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::SourceAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSourceAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DestAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDestAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        BlendFactor::ConstantColor => vk::BlendFactor::CONSTANT_COLOR,
        BlendFactor::OneMinusConstantColor => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
        BlendFactor::ConstantAlpha => vk::BlendFactor::CONSTANT_ALPHA,
        BlendFactor::OneMinusConstantAlpha => vk::BlendFactor::ONE_MINUS_CONSTANT_ALPHA,
        BlendFactor::SourceAlphaSaturate => vk::BlendFactor::SRC_ALPHA_SATURATE,
        BlendFactor::Source1Color => vk::BlendFactor::SRC1_COLOR,
        BlendFactor::OneMinusSource1Color => vk::BlendFactor::ONE_MINUS_SRC1_COLOR,
        BlendFactor::Source1Alpha => vk::BlendFactor::SRC1_ALPHA,
        BlendFactor::OneMinusSource1Alpha => vk::BlendFactor::ONE_MINUS_SRC1_ALPHA,
    }
}

pub fn convert_blend_op(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOp::Min => vk::BlendOp::MIN,
        BlendOp::Max => vk::BlendOp::MAX,
    }
}

pub fn convert_logic_op(op: LogicOp) -> vk::LogicOp {
    match op {
        LogicOp::Clear => vk::LogicOp::CLEAR,
        LogicOp::And => vk::LogicOp::AND,
        LogicOp::AndReverse => vk::LogicOp::AND_REVERSE,
        LogicOp::Copy => vk::LogicOp::COPY,
        LogicOp::AndInverted => vk::LogicOp::AND_INVERTED,
        LogicOp::Noop => vk::LogicOp::NO_OP,
        LogicOp::Xor => vk::LogicOp::XOR,
        LogicOp::Or => vk::LogicOp::OR,
        LogicOp::Nor => vk::LogicOp::NOR,
        LogicOp::Equivalent => vk::LogicOp::EQUIVALENT,
        LogicOp::Invert => vk::LogicOp::INVERT,
        LogicOp::OrReverse => vk::LogicOp::OR_REVERSE,
        LogicOp::CopyInverted => vk::LogicOp::COPY_INVERTED,
        LogicOp::OrInverted => vk::LogicOp::OR_INVERTED,
        LogicOp::Nand => vk::LogicOp::NAND,
        LogicOp::Set => vk::LogicOp::SET,
    }
}

pub fn convert_color_write_mask(mask: ColorWriteMask) -> vk::ColorComponentFlags {
    // Both use R=1, G=2, B=4, A=8.
    vk::ColorComponentFlags::from_raw(u32::from(mask.bits()))
}

pub fn convert_fill_mode(mode: FillMode) -> vk::PolygonMode {
    match mode {
        FillMode::Solid => vk::PolygonMode::FILL,
        FillMode::Wireframe => vk::PolygonMode::LINE,
        FillMode::Point => vk::PolygonMode::POINT,
    }
}

pub fn convert_cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
        CullMode::FrontAndBack => vk::CullModeFlags::FRONT_AND_BACK,
    }
}

/// Convert a topology. Patch lists carry their control point count, which
/// goes into the tessellation state instead.
pub fn convert_primitive_topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::Undefined | PrimitiveTopology::TriangleList => {
            vk::PrimitiveTopology::TRIANGLE_LIST
        }
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::TriangleFan => vk::PrimitiveTopology::TRIANGLE_FAN,
        PrimitiveTopology::LineListAdjacency => vk::PrimitiveTopology::LINE_LIST_WITH_ADJACENCY,
        PrimitiveTopology::LineStripAdjacency => vk::PrimitiveTopology::LINE_STRIP_WITH_ADJACENCY,
        PrimitiveTopology::TriangleListAdjacency => {
            vk::PrimitiveTopology::TRIANGLE_LIST_WITH_ADJACENCY
        }
        PrimitiveTopology::TriangleStripAdjacency => {
            vk::PrimitiveTopology::TRIANGLE_STRIP_WITH_ADJACENCY
        }
        PrimitiveTopology::PatchList(_) => vk::PrimitiveTopology::PATCH_LIST,
    }
}

/// Patch lists come back with zero control points; the count lives in the
/// tessellation state.
pub fn convert_vk_primitive_topology(topology: vk::PrimitiveTopology) -> PrimitiveTopology {
    match topology {
        vk::PrimitiveTopology::POINT_LIST => PrimitiveTopology::PointList,
        vk::PrimitiveTopology::LINE_LIST => PrimitiveTopology::LineList,
        vk::PrimitiveTopology::LINE_STRIP => PrimitiveTopology::LineStrip,
        vk::PrimitiveTopology::TRIANGLE_LIST => PrimitiveTopology::TriangleList,
        vk::PrimitiveTopology::TRIANGLE_STRIP => PrimitiveTopology::TriangleStrip,
        vk::PrimitiveTopology::TRIANGLE_FAN => PrimitiveTopology::TriangleFan,
        vk::PrimitiveTopology::LINE_LIST_WITH_ADJACENCY => PrimitiveTopology::LineListAdjacency,
        vk::PrimitiveTopology::LINE_STRIP_WITH_ADJACENCY => PrimitiveTopology::LineStripAdjacency,
        vk::PrimitiveTopology::TRIANGLE_LIST_WITH_ADJACENCY => {
            PrimitiveTopology::TriangleListAdjacency
        }
        vk::PrimitiveTopology::TRIANGLE_STRIP_WITH_ADJACENCY => {
            PrimitiveTopology::TriangleStripAdjacency
        }
        vk::PrimitiveTopology::PATCH_LIST => PrimitiveTopology::PatchList(0),
        _ => PrimitiveTopology::Undefined,
    }
}

/// Convert a dynamic state. Viewport and scissor are always dynamic and are
/// added by the pipeline builder itself; states the layer cannot track
/// return `None`.
pub fn convert_dynamic_state(state: DynamicState) -> Option<vk::DynamicState> {
    match state {
        DynamicState::Viewport => Some(vk::DynamicState::VIEWPORT),
        DynamicState::Scissor => Some(vk::DynamicState::SCISSOR),
        DynamicState::BlendConstant => Some(vk::DynamicState::BLEND_CONSTANTS),
        DynamicState::StencilReadMask => Some(vk::DynamicState::STENCIL_COMPARE_MASK),
        DynamicState::StencilWriteMask => Some(vk::DynamicState::STENCIL_WRITE_MASK),
        DynamicState::StencilReference => Some(vk::DynamicState::STENCIL_REFERENCE),
        _ => None,
    }
}

pub fn convert_vk_dynamic_state(state: vk::DynamicState) -> Option<DynamicState> {
    match state {
        vk::DynamicState::VIEWPORT => Some(DynamicState::Viewport),
        vk::DynamicState::SCISSOR => Some(DynamicState::Scissor),
        vk::DynamicState::LINE_WIDTH => Some(DynamicState::LineWidth),
        vk::DynamicState::DEPTH_BIAS => Some(DynamicState::DepthBias),
        vk::DynamicState::BLEND_CONSTANTS => Some(DynamicState::BlendConstant),
        vk::DynamicState::STENCIL_COMPARE_MASK => Some(DynamicState::StencilReadMask),
        vk::DynamicState::STENCIL_WRITE_MASK => Some(DynamicState::StencilWriteMask),
        vk::DynamicState::STENCIL_REFERENCE => Some(DynamicState::StencilReference),
        _ => None,
    }
}

pub fn convert_shader_stages(stages: ShaderStage) -> vk::ShaderStageFlags {
    let mut result = vk::ShaderStageFlags::empty();

    if stages.contains(ShaderStage::VERTEX) {
        result |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStage::HULL) {
        result |= vk::ShaderStageFlags::TESSELLATION_CONTROL;
    }
    if stages.contains(ShaderStage::DOMAIN) {
        result |= vk::ShaderStageFlags::TESSELLATION_EVALUATION;
    }
    if stages.contains(ShaderStage::GEOMETRY) {
        result |= vk::ShaderStageFlags::GEOMETRY;
    }
    if stages.contains(ShaderStage::PIXEL) {
        result |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStage::COMPUTE) {
        result |= vk::ShaderStageFlags::COMPUTE;
    }

    result
}

pub fn convert_vk_shader_stages(stages: vk::ShaderStageFlags) -> ShaderStage {
    let mut result = ShaderStage::empty();

    if stages.contains(vk::ShaderStageFlags::VERTEX) {
        result |= ShaderStage::VERTEX;
    }
    if stages.contains(vk::ShaderStageFlags::TESSELLATION_CONTROL) {
        result |= ShaderStage::HULL;
    }
    if stages.contains(vk::ShaderStageFlags::TESSELLATION_EVALUATION) {
        result |= ShaderStage::DOMAIN;
    }
    if stages.contains(vk::ShaderStageFlags::GEOMETRY) {
        result |= ShaderStage::GEOMETRY;
    }
    if stages.contains(vk::ShaderStageFlags::FRAGMENT) {
        result |= ShaderStage::PIXEL;
    }
    if stages.contains(vk::ShaderStageFlags::COMPUTE) {
        result |= ShaderStage::COMPUTE;
    }

    result
}

/// Stage mask a bind point covers.
pub fn convert_pipeline_bind_point(bind_point: vk::PipelineBindPoint) -> ShaderStage {
    if bind_point == vk::PipelineBindPoint::COMPUTE {
        ShaderStage::COMPUTE
    } else {
        ShaderStage::ALL_GRAPHICS
    }
}

pub fn convert_descriptor_type(ty: DescriptorType) -> vk::DescriptorType {
    match ty {
        DescriptorType::Sampler => vk::DescriptorType::SAMPLER,
        DescriptorType::SamplerWithResourceView => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorType::ShaderResourceView => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorType::UnorderedAccessView => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorType::ConstantBuffer => vk::DescriptorType::UNIFORM_BUFFER,
    }
}

pub fn convert_vk_descriptor_type(ty: vk::DescriptorType) -> Option<DescriptorType> {
    match ty {
        vk::DescriptorType::SAMPLER => Some(DescriptorType::Sampler),
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER => Some(DescriptorType::SamplerWithResourceView),
        vk::DescriptorType::SAMPLED_IMAGE
        | vk::DescriptorType::UNIFORM_TEXEL_BUFFER
        | vk::DescriptorType::INPUT_ATTACHMENT => Some(DescriptorType::ShaderResourceView),
        vk::DescriptorType::STORAGE_IMAGE
        | vk::DescriptorType::STORAGE_TEXEL_BUFFER
        | vk::DescriptorType::STORAGE_BUFFER
        | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => Some(DescriptorType::UnorderedAccessView),
        vk::DescriptorType::UNIFORM_BUFFER | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => {
            Some(DescriptorType::ConstantBuffer)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_round_trip_for_canonical_formats() {
        for format in [
            Format::R8G8B8A8Unorm,
            Format::R8G8B8A8UnormSrgb,
            Format::B8G8R8A8Unorm,
            Format::R16G16B16A16Float,
            Format::D24UnormS8Uint,
            Format::D32Float,
            Format::R10G10B10A2Unorm,
            Format::Bc7UnormSrgb,
        ] {
            assert_eq!(convert_vk_format(convert_format(format)), format);
        }
    }

    #[test]
    fn test_lossy_formats() {
        assert_eq!(convert_format(Format::R8G8B8X8Unorm), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(convert_format(Format::A8Unorm), vk::Format::R8_UNORM);
        assert_eq!(convert_format(Format::Intz), vk::Format::D24_UNORM_S8_UINT);
        assert_eq!(convert_vk_format(vk::Format::R8_UNORM), Format::R8Unorm);
        assert_eq!(convert_vk_format(vk::Format::ASTC_4X4_UNORM_BLOCK), Format::Unknown);
    }

    #[test]
    fn test_alpha_swizzles() {
        let alpha = component_mapping_for(Format::A8Unorm);
        assert_eq!(alpha.r, vk::ComponentSwizzle::ZERO);
        assert_eq!(alpha.a, vk::ComponentSwizzle::R);

        let rgbx = component_mapping_for(Format::B8G8R8X8UnormSrgb);
        assert_eq!(rgbx.r, vk::ComponentSwizzle::R);
        assert_eq!(rgbx.a, vk::ComponentSwizzle::ONE);

        let rgba = component_mapping_for(Format::R8G8B8A8Unorm);
        assert_eq!(rgba.a, vk::ComponentSwizzle::IDENTITY);
    }

    #[test]
    fn test_aspect_flags() {
        assert_eq!(
            aspect_flags_from_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_flags_from_format(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(aspect_flags_from_format(vk::Format::R8_UNORM), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn test_image_desc_round_trip() {
        let desc = ResourceDesc::texture(TextureDimension::D2, 256, 128, Format::R8G8B8A8Unorm)
            .with_levels(9)
            .with_depth_or_layers(6)
            .with_flags(ResourceFlags::CUBE_COMPATIBLE)
            .with_usage(ResourceUsage::RENDER_TARGET | ResourceUsage::SHADER_RESOURCE);
        let info = convert_image_desc(&desc).unwrap();
        assert_eq!(info.image_type, vk::ImageType::TYPE_2D);
        assert_eq!(info.array_layers, 6);
        assert_eq!(info.extent.depth, 1);
        assert!(info.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));
        assert!(!info.flags.contains(vk::ImageCreateFlags::MUTABLE_FORMAT));

        let back = convert_image_create_info(&info);
        assert_eq!(back.ty(), desc.ty());
        assert_eq!(back.as_texture(), desc.as_texture());
        assert_eq!(back.usage, desc.usage);
        assert_eq!(back.flags, desc.flags);
    }

    #[test]
    fn test_volume_uses_depth_not_layers() {
        let desc = ResourceDesc::texture(TextureDimension::D3, 32, 32, Format::R16Float)
            .with_depth_or_layers(16);
        let info = convert_image_desc(&desc).unwrap();
        assert_eq!(info.extent.depth, 16);
        assert_eq!(info.array_layers, 1);
        assert!(convert_buffer_desc(&desc).is_none());
    }

    #[test]
    fn test_typeless_image_is_mutable() {
        let desc = ResourceDesc::texture(TextureDimension::D2, 4, 4, Format::R8G8B8A8Typeless);
        let info = convert_image_desc(&desc).unwrap();
        assert!(info.flags.contains(vk::ImageCreateFlags::MUTABLE_FORMAT));
    }

    #[test]
    fn test_buffer_desc_round_trip() {
        let desc = ResourceDesc::buffer(4096)
            .with_usage(ResourceUsage::VERTEX_BUFFER | ResourceUsage::COPY_DEST);
        let info = convert_buffer_desc(&desc).unwrap();
        assert_eq!(info.size, 4096);
        let back = convert_buffer_create_info(&info);
        assert_eq!(back.buffer_size(), Some(4096));
        assert_eq!(back.usage, desc.usage);
    }

    #[test]
    fn test_state_layouts() {
        assert_eq!(
            convert_usage_to_image_layout(ResourceUsage::UNDEFINED),
            vk::ImageLayout::UNDEFINED
        );
        assert_eq!(
            convert_usage_to_image_layout(ResourceUsage::PRESENT),
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert_eq!(
            convert_usage_to_image_layout(ResourceUsage::COPY_DEST),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
        assert_eq!(
            convert_usage_to_image_layout(ResourceUsage::SHADER_RESOURCE_PIXEL),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
        assert_eq!(
            convert_usage_to_image_layout(ResourceUsage::DEPTH_STENCIL),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            convert_usage_to_pipeline_stage(ResourceUsage::UNDEFINED),
            vk::PipelineStageFlags::TOP_OF_PIPE
        );
        assert_eq!(
            convert_usage_to_access(ResourceUsage::COPY_DEST),
            vk::AccessFlags::TRANSFER_WRITE
        );
    }

    #[test]
    fn test_view_range_remaining_values() {
        let desc = ResourceViewDesc::texture(
            ResourceViewType::Texture2d,
            Format::R8G8B8A8Unorm,
            1,
            ALL_REMAINING,
            0,
            ALL_REMAINING,
        );
        let range = convert_view_range(&desc, vk::ImageAspectFlags::COLOR).unwrap();
        assert_eq!(range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(range.layer_count, vk::REMAINING_ARRAY_LAYERS);
    }

    #[test]
    fn test_sampler_round_trip() {
        let desc = SamplerDesc::point()
            .with_address_mode(AddressMode::Border)
            .with_compare(CompareOp::LessEqual)
            .with_anisotropy(8.0);
        let info = convert_sampler_desc(&desc);
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        let back = convert_sampler_create_info(&info);
        assert_eq!(back.min_filter, FilterMode::Point);
        assert_eq!(back.address_v, AddressMode::Border);
        assert_eq!(back.compare, Some(CompareOp::LessEqual));
        assert_eq!(back.max_anisotropy, 8.0);
    }

    #[test]
    fn test_unsupported_dynamic_state() {
        assert_eq!(
            convert_dynamic_state(DynamicState::StencilReference),
            Some(vk::DynamicState::STENCIL_REFERENCE)
        );
        assert_eq!(convert_dynamic_state(DynamicState::CullMode), None);
    }

    #[test]
    fn test_shader_stage_round_trip() {
        let stages = ShaderStage::VERTEX | ShaderStage::HULL | ShaderStage::PIXEL;
        assert_eq!(convert_vk_shader_stages(convert_shader_stages(stages)), stages);
    }
}
