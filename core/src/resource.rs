//! Resource and resource view descriptors.

use bitflags::bitflags;

use crate::format::Format;

/// Resource kind as reported to add-ons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceType {
    #[default]
    Unknown,
    Buffer,
    Texture1d,
    Texture2d,
    Texture3d,
    /// Standalone 2D surface that cannot be bound as a shader input (D3D9).
    Surface,
}

/// Memory placement of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryHeap {
    #[default]
    Unknown,
    GpuOnly,
    CpuToGpu,
    GpuToCpu,
    CpuOnly,
    Custom,
}

bitflags! {
    /// Ways a resource may be used, doubling as a resource state.
    ///
    /// Bit values mirror `D3D12_RESOURCE_STATES` so that the D3D12 state
    /// translation is lossless.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceUsage: u32 {
        const VERTEX_BUFFER = 0x1;
        const INDEX_BUFFER = 0x2;
        const RENDER_TARGET = 0x4;
        const UNORDERED_ACCESS = 0x8;
        const DEPTH_STENCIL_WRITE = 0x10;
        const DEPTH_STENCIL_READ = 0x20;
        const DEPTH_STENCIL = Self::DEPTH_STENCIL_WRITE.bits() | Self::DEPTH_STENCIL_READ.bits();
        const SHADER_RESOURCE_NON_PIXEL = 0x40;
        const SHADER_RESOURCE_PIXEL = 0x80;
        const SHADER_RESOURCE = Self::SHADER_RESOURCE_NON_PIXEL.bits() | Self::SHADER_RESOURCE_PIXEL.bits();
        const STREAM_OUTPUT = 0x100;
        const INDIRECT_ARGUMENT = 0x200;
        const COPY_DEST = 0x400;
        const COPY_SOURCE = 0x800;
        const RESOLVE_DEST = 0x1000;
        const RESOLVE_SOURCE = 0x2000;
        const CONSTANT_BUFFER = 0x8000;
        const CPU_ACCESS = 0x0010_0000;
        const GENERAL = 0x8000_0000;
        const PRESENT = Self::GENERAL.bits() | Self::RENDER_TARGET.bits() | Self::COPY_SOURCE.bits();
    }
}

impl ResourceUsage {
    /// The undefined state (contents may be discarded).
    pub const UNDEFINED: Self = Self::empty();

    /// Usages that require a view object to bind.
    pub const VIEW_USAGES: Self = Self::RENDER_TARGET
        .union(Self::DEPTH_STENCIL)
        .union(Self::SHADER_RESOURCE)
        .union(Self::UNORDERED_ACCESS);
}

bitflags! {
    /// Additional resource creation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceFlags: u32 {
        const DYNAMIC = 0x8;
        const CUBE_COMPATIBLE = 0x4;
        const GENERATE_MIPMAPS = 0x1;
        const SHARED = 0x2;
        const STRUCTURED = 0x40;
        const SPARSE_BINDING = 0x80;
    }
}

/// Dimensionality of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    D1,
    #[default]
    D2,
    D3,
    /// D3D9 surface (render target or depth-stencil without a texture).
    Surface,
}

/// Texture-specific portion of a [`ResourceDesc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub dimension: TextureDimension,
    pub width: u32,
    pub height: u32,
    /// Depth for 3D textures, array layer count otherwise.
    pub depth_or_layers: u16,
    pub levels: u16,
    pub format: Format,
    pub samples: u16,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            dimension: TextureDimension::D2,
            width: 1,
            height: 1,
            depth_or_layers: 1,
            levels: 1,
            format: Format::Unknown,
            samples: 1,
        }
    }
}

impl TextureDesc {
    /// Width of mip `level`.
    pub fn level_width(&self, level: u32) -> u32 {
        (self.width >> level).max(1)
    }

    /// Height of mip `level`.
    pub fn level_height(&self, level: u32) -> u32 {
        (self.height >> level).max(1)
    }

    /// Depth of mip `level` (1 for non-3D textures).
    pub fn level_depth(&self, level: u32) -> u32 {
        if self.dimension == TextureDimension::D3 {
            (u32::from(self.depth_or_layers) >> level).max(1)
        } else {
            1
        }
    }

    /// Number of array layers (1 for 3D textures).
    pub fn layers(&self) -> u32 {
        if self.dimension == TextureDimension::D3 {
            1
        } else {
            u32::from(self.depth_or_layers).max(1)
        }
    }

    /// Total number of subresources (levels x layers).
    pub fn subresource_count(&self) -> u32 {
        u32::from(self.levels).max(1) * self.layers()
    }
}

/// Buffer or texture shape of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer { size: u64, stride: u32 },
    Texture(TextureDesc),
}

/// Description of a buffer or texture.
///
/// # Example
///
/// ```ignore
/// let desc = ResourceDesc::texture(TextureDimension::D2, 256, 256, Format::R8G8B8A8Unorm)
///     .with_levels(9)
///     .with_usage(ResourceUsage::RENDER_TARGET | ResourceUsage::SHADER_RESOURCE);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceDesc {
    pub kind: ResourceKind,
    pub heap: MemoryHeap,
    pub usage: ResourceUsage,
    pub flags: ResourceFlags,
}

impl ResourceDesc {
    /// Describe a buffer of `size` bytes.
    pub fn buffer(size: u64) -> Self {
        Self {
            kind: ResourceKind::Buffer { size, stride: 0 },
            heap: MemoryHeap::GpuOnly,
            usage: ResourceUsage::empty(),
            flags: ResourceFlags::empty(),
        }
    }

    /// Describe a single-level, single-layer texture.
    pub fn texture(dimension: TextureDimension, width: u32, height: u32, format: Format) -> Self {
        Self {
            kind: ResourceKind::Texture(TextureDesc {
                dimension,
                width,
                height,
                format,
                ..Default::default()
            }),
            heap: MemoryHeap::GpuOnly,
            usage: ResourceUsage::empty(),
            flags: ResourceFlags::empty(),
        }
    }

    /// Set the mip level count (textures only).
    pub fn with_levels(mut self, levels: u16) -> Self {
        if let ResourceKind::Texture(texture) = &mut self.kind {
            texture.levels = levels;
        }
        self
    }

    /// Set the depth or array layer count (textures only).
    pub fn with_depth_or_layers(mut self, depth_or_layers: u16) -> Self {
        if let ResourceKind::Texture(texture) = &mut self.kind {
            texture.depth_or_layers = depth_or_layers;
        }
        self
    }

    /// Set the sample count (textures only).
    pub fn with_samples(mut self, samples: u16) -> Self {
        if let ResourceKind::Texture(texture) = &mut self.kind {
            texture.samples = samples;
        }
        self
    }

    /// Set the structure stride (buffers only).
    pub fn with_stride(mut self, new_stride: u32) -> Self {
        if let ResourceKind::Buffer { stride, .. } = &mut self.kind {
            *stride = new_stride;
        }
        self
    }

    pub fn with_heap(mut self, heap: MemoryHeap) -> Self {
        self.heap = heap;
        self
    }

    pub fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Resource type reported to add-ons.
    pub fn ty(&self) -> ResourceType {
        match &self.kind {
            ResourceKind::Buffer { .. } => ResourceType::Buffer,
            ResourceKind::Texture(texture) => match texture.dimension {
                TextureDimension::D1 => ResourceType::Texture1d,
                TextureDimension::D2 => ResourceType::Texture2d,
                TextureDimension::D3 => ResourceType::Texture3d,
                TextureDimension::Surface => ResourceType::Surface,
            },
        }
    }

    /// Texture portion, if this describes a texture.
    pub fn as_texture(&self) -> Option<&TextureDesc> {
        match &self.kind {
            ResourceKind::Texture(texture) => Some(texture),
            ResourceKind::Buffer { .. } => None,
        }
    }

    /// Buffer size, if this describes a buffer.
    pub fn buffer_size(&self) -> Option<u64> {
        match self.kind {
            ResourceKind::Buffer { size, .. } => Some(size),
            ResourceKind::Texture(_) => None,
        }
    }

    /// Texel format (`Unknown` for buffers).
    pub fn format(&self) -> Format {
        self.as_texture().map_or(Format::Unknown, |texture| texture.format)
    }
}

/// Initial data for one subresource.
#[derive(Debug, Clone, Copy)]
pub struct SubresourceData<'a> {
    pub data: &'a [u8],
    /// Bytes between rows (textures only).
    pub row_pitch: u32,
    /// Bytes between depth slices (3D textures only).
    pub slice_pitch: u32,
}

impl<'a> SubresourceData<'a> {
    pub fn new(data: &'a [u8], row_pitch: u32, slice_pitch: u32) -> Self {
        Self {
            data,
            row_pitch,
            slice_pitch,
        }
    }
}

/// Region of a subresource, in texels. `right`, `bottom` and `back` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SubresourceBox {
    pub left: u32,
    pub top: u32,
    pub front: u32,
    pub right: u32,
    pub bottom: u32,
    pub back: u32,
}

impl SubresourceBox {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn depth(&self) -> u32 {
        self.back.saturating_sub(self.front)
    }
}

/// Dimension of a resource view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceViewType {
    #[default]
    Unknown,
    Buffer,
    Texture1d,
    Texture1dArray,
    Texture2d,
    Texture2dArray,
    Texture2dMultisample,
    Texture2dMultisampleArray,
    Texture3d,
    TextureCube,
    TextureCubeArray,
}

/// Subrange a view covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewRange {
    Texture {
        first_level: u32,
        /// [`ALL_REMAINING`] selects every level from `first_level` on.
        levels: u32,
        first_layer: u32,
        /// [`ALL_REMAINING`] selects every layer from `first_layer` on.
        layers: u32,
    },
    Buffer {
        offset: u64,
        /// `u64::MAX` selects everything from `offset` to the end.
        size: u64,
    },
}

/// Level/layer count meaning "everything from the first index onwards".
pub const ALL_REMAINING: u32 = u32::MAX;

/// Description of a resource view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceViewDesc {
    pub ty: ResourceViewType,
    pub format: Format,
    pub range: ViewRange,
}

impl ResourceViewDesc {
    /// View onto a range of texture levels and layers.
    pub fn texture(
        ty: ResourceViewType,
        format: Format,
        first_level: u32,
        levels: u32,
        first_layer: u32,
        layers: u32,
    ) -> Self {
        Self {
            ty,
            format,
            range: ViewRange::Texture {
                first_level,
                levels,
                first_layer,
                layers,
            },
        }
    }

    /// View onto a byte range of a buffer.
    pub fn buffer(format: Format, offset: u64, size: u64) -> Self {
        Self {
            ty: ResourceViewType::Buffer,
            format,
            range: ViewRange::Buffer { offset, size },
        }
    }

    /// Default view covering the whole resource.
    pub fn for_resource(desc: &ResourceDesc) -> Self {
        match &desc.kind {
            ResourceKind::Buffer { size, .. } => Self::buffer(Format::Unknown, 0, *size),
            ResourceKind::Texture(texture) => {
                let layered = texture.layers() > 1;
                let ty = match texture.dimension {
                    TextureDimension::D1 if layered => ResourceViewType::Texture1dArray,
                    TextureDimension::D1 => ResourceViewType::Texture1d,
                    TextureDimension::D3 => ResourceViewType::Texture3d,
                    _ if texture.samples > 1 && layered => {
                        ResourceViewType::Texture2dMultisampleArray
                    }
                    _ if texture.samples > 1 => ResourceViewType::Texture2dMultisample,
                    _ if layered => ResourceViewType::Texture2dArray,
                    _ => ResourceViewType::Texture2d,
                };
                Self::texture(
                    ty,
                    texture.format,
                    0,
                    u32::from(texture.levels),
                    0,
                    texture.layers(),
                )
            }
        }
    }

    /// View of the single mip `level` of layer 0, with the same shape as `self`.
    pub fn with_level(mut self, level: u32) -> Self {
        if let ViewRange::Texture {
            first_level,
            levels,
            ..
        } = &mut self.range
        {
            *first_level = level;
            *levels = 1;
        }
        self
    }

    /// Returns `(first_level, levels, first_layer, layers)` resolved against a
    /// texture with `total_levels` levels and `total_layers` layers.
    pub fn resolved_texture_range(&self, total_levels: u32, total_layers: u32) -> Option<(u32, u32, u32, u32)> {
        match self.range {
            ViewRange::Texture {
                first_level,
                levels,
                first_layer,
                layers,
            } => {
                let levels = if levels == ALL_REMAINING {
                    total_levels.saturating_sub(first_level)
                } else {
                    levels
                };
                let layers = if layers == ALL_REMAINING {
                    total_layers.saturating_sub(first_layer)
                } else {
                    layers
                };
                Some((first_level, levels, first_layer, layers))
            }
            ViewRange::Buffer { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_builder() {
        let desc = ResourceDesc::texture(TextureDimension::D2, 256, 256, Format::R8G8B8A8Unorm)
            .with_levels(9)
            .with_usage(ResourceUsage::RENDER_TARGET);
        assert_eq!(desc.ty(), ResourceType::Texture2d);
        let texture = desc.as_texture().unwrap();
        assert_eq!(texture.levels, 9);
        assert_eq!(texture.level_width(8), 1);
        assert_eq!(texture.subresource_count(), 9);
    }

    #[test]
    fn test_buffer_builder_ignores_texture_setters() {
        let desc = ResourceDesc::buffer(1024).with_levels(4).with_stride(16);
        assert_eq!(desc.ty(), ResourceType::Buffer);
        assert_eq!(desc.buffer_size(), Some(1024));
        assert_eq!(desc.kind, ResourceKind::Buffer { size: 1024, stride: 16 });
    }

    #[test]
    fn test_default_view() {
        let desc = ResourceDesc::texture(TextureDimension::D2, 64, 64, Format::D24UnormS8Uint)
            .with_depth_or_layers(6);
        let view = ResourceViewDesc::for_resource(&desc);
        assert_eq!(view.ty, ResourceViewType::Texture2dArray);
        assert_eq!(view.resolved_texture_range(1, 6), Some((0, 1, 0, 6)));
    }

    #[test]
    fn test_all_remaining_range() {
        let view = ResourceViewDesc::texture(
            ResourceViewType::Texture2d,
            Format::R8G8B8A8Unorm,
            2,
            ALL_REMAINING,
            0,
            ALL_REMAINING,
        );
        assert_eq!(view.resolved_texture_range(9, 1), Some((2, 7, 0, 1)));
    }

    #[test]
    fn test_usage_groups() {
        assert!(ResourceUsage::SHADER_RESOURCE.contains(ResourceUsage::SHADER_RESOURCE_PIXEL));
        assert!(ResourceUsage::VIEW_USAGES.contains(ResourceUsage::DEPTH_STENCIL_READ));
        assert!(ResourceUsage::UNDEFINED.is_empty());
    }
}
