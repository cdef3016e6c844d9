//! Sampler state descriptors.

use crate::pipeline::CompareOp;

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    /// Nearest neighbor filtering.
    #[default]
    Point,
    /// Linear filtering.
    Linear,
}

/// Texture address mode (wrapping behavior).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    Wrap,
    Mirror,
    Clamp,
    Border,
    MirrorOnce,
}

/// Sampler configuration.
///
/// Describes filtering, address modes, LOD clamping, anisotropy and an
/// optional comparison function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub mip_filter: FilterMode,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub mip_lod_bias: f32,
    /// Anisotropy level; values above 1 enable anisotropic filtering.
    pub max_anisotropy: f32,
    /// Comparison function for depth sampling.
    pub compare: Option<CompareOp>,
    pub border_color: [f32; 4],
    pub min_lod: f32,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            mip_filter: FilterMode::Linear,
            address_u: AddressMode::Clamp,
            address_v: AddressMode::Clamp,
            address_w: AddressMode::Clamp,
            mip_lod_bias: 0.0,
            max_anisotropy: 1.0,
            compare: None,
            border_color: [0.0; 4],
            min_lod: -f32::MAX,
            max_lod: f32::MAX,
        }
    }
}

impl SamplerDesc {
    /// Create a point filtering sampler.
    pub fn point() -> Self {
        Self {
            min_filter: FilterMode::Point,
            mag_filter: FilterMode::Point,
            mip_filter: FilterMode::Point,
            ..Default::default()
        }
    }

    /// Set address mode for all coordinates.
    pub fn with_address_mode(mut self, mode: AddressMode) -> Self {
        self.address_u = mode;
        self.address_v = mode;
        self.address_w = mode;
        self
    }

    /// Set comparison function for depth sampling.
    pub fn with_compare(mut self, compare: CompareOp) -> Self {
        self.compare = Some(compare);
        self
    }

    /// Set anisotropic filtering level.
    pub fn with_anisotropy(mut self, level: f32) -> Self {
        self.max_anisotropy = level;
        self
    }

    /// Returns `true` if anisotropic filtering is requested.
    pub fn is_anisotropic(&self) -> bool {
        self.max_anisotropy > 1.0
    }
}
