//! Pipeline state descriptors.
//!
//! [`PipelineDesc`] is the backend-agnostic description each backend's
//! pipeline builder compiles into native pipeline, program or state objects.

use bitflags::bitflags;

use crate::format::Format;
use crate::handle::{DescriptorSetLayout, PipelineLayout};

bitflags! {
    /// Shader stages.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderStage: u32 {
        const VERTEX = 0x1;
        const HULL = 0x2;
        const DOMAIN = 0x4;
        const GEOMETRY = 0x8;
        const PIXEL = 0x10;
        const COMPUTE = 0x20;
        const ALL_GRAPHICS = 0x1F;
    }
}

bitflags! {
    /// Color channel write mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWriteMask: u8 {
        const RED = 0x1;
        const GREEN = 0x2;
        const BLUE = 0x4;
        const ALPHA = 0x8;
    }
}

impl Default for ColorWriteMask {
    fn default() -> Self {
        Self::all()
    }
}

/// Comparison function for depth, stencil and sampler comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareOp {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Stencil buffer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementSaturate,
    DecrementSaturate,
    Invert,
    Increment,
    Decrement,
}

/// Blend factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendFactor {
    Zero,
    #[default]
    One,
    SourceColor,
    OneMinusSourceColor,
    DestColor,
    OneMinusDestColor,
    SourceAlpha,
    OneMinusSourceAlpha,
    DestAlpha,
    OneMinusDestAlpha,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
    SourceAlphaSaturate,
    Source1Color,
    OneMinusSource1Color,
    Source1Alpha,
    OneMinusSource1Alpha,
}

/// Blend equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Framebuffer logic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LogicOp {
    Clear,
    And,
    AndReverse,
    #[default]
    Copy,
    AndInverted,
    Noop,
    Xor,
    Or,
    Nor,
    Equivalent,
    Invert,
    OrReverse,
    CopyInverted,
    OrInverted,
    Nand,
    Set,
}

/// Polygon fill mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
    Point,
}

/// Face culling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
    FrontAndBack,
}

/// Primitive topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    Undefined,
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    TriangleFan,
    LineListAdjacency,
    LineStripAdjacency,
    TriangleListAdjacency,
    TriangleStripAdjacency,
    /// Patch list with the given number of control points (1 to 32).
    PatchList(u8),
}

impl PrimitiveTopology {
    /// Value reported through [`DynamicState::PrimitiveTopology`].
    ///
    /// Matches `D3D_PRIMITIVE_TOPOLOGY` where Direct3D has the topology;
    /// patch lists start at 33.
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Undefined => 0,
            Self::PointList => 1,
            Self::LineList => 2,
            Self::LineStrip => 3,
            Self::TriangleList => 4,
            Self::TriangleStrip => 5,
            Self::TriangleFan => 6,
            Self::LineListAdjacency => 10,
            Self::LineStripAdjacency => 11,
            Self::TriangleListAdjacency => 12,
            Self::TriangleStripAdjacency => 13,
            Self::PatchList(points) => 32 + u32::from(points.clamp(1, 32)),
        }
    }

    pub fn from_raw(value: u32) -> Self {
        match value {
            1 => Self::PointList,
            2 => Self::LineList,
            3 => Self::LineStrip,
            4 => Self::TriangleList,
            5 => Self::TriangleStrip,
            6 => Self::TriangleFan,
            10 => Self::LineListAdjacency,
            11 => Self::LineStripAdjacency,
            12 => Self::TriangleListAdjacency,
            13 => Self::TriangleStripAdjacency,
            33..=64 => Self::PatchList((value - 32) as u8),
            _ => Self::Undefined,
        }
    }
}

/// State that may be changed without recreating the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DynamicState {
    Viewport,
    Scissor,
    BlendConstant,
    StencilReference,
    StencilReadMask,
    StencilWriteMask,
    DepthBias,
    LineWidth,
    PrimitiveTopology,
    CullMode,
    FrontCounterClockwise,
    DepthTestEnable,
    DepthWriteEnable,
    DepthCompareOp,
    StencilTestEnable,
}

/// Blend configuration of a single render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RenderTargetBlend {
    pub blend_enable: bool,
    pub logic_op_enable: bool,
    pub source_color: BlendFactor,
    pub dest_color: BlendFactor,
    pub color_op: BlendOp,
    pub source_alpha: BlendFactor,
    pub dest_alpha: BlendFactor,
    pub alpha_op: BlendOp,
    pub logic_op: LogicOp,
    pub write_mask: ColorWriteMask,
}

/// Output merger blend state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BlendState {
    pub alpha_to_coverage_enable: bool,
    pub blend_constant: [f32; 4],
    pub render_targets: [RenderTargetBlend; 8],
}

/// Rasterizer state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizerState {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_counter_clockwise: bool,
    pub depth_bias: f32,
    pub depth_bias_clamp: f32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clip_enable: bool,
    pub scissor_enable: bool,
    pub multisample_enable: bool,
    pub antialiased_line_enable: bool,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::Back,
            front_counter_clockwise: false,
            depth_bias: 0.0,
            depth_bias_clamp: 0.0,
            slope_scaled_depth_bias: 0.0,
            depth_clip_enable: true,
            scissor_enable: false,
            multisample_enable: false,
            antialiased_line_enable: false,
        }
    }
}

/// Stencil operations for one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFace {
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub func: CompareOp,
}

impl Default for StencilFace {
    fn default() -> Self {
        Self {
            fail_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            func: CompareOp::Always,
        }
    }
}

/// Depth-stencil state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_enable: bool,
    pub depth_write_enable: bool,
    pub depth_func: CompareOp,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub stencil_reference: u8,
    pub front: StencilFace,
    pub back: StencilFace,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_enable: true,
            depth_write_enable: true,
            depth_func: CompareOp::Less,
            stencil_enable: false,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
            stencil_reference: 0,
            front: StencilFace::default(),
            back: StencilFace::default(),
        }
    }
}

/// Vertex input element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct InputElement {
    pub location: u32,
    pub semantic: String,
    pub semantic_index: u32,
    pub format: Format,
    /// Vertex buffer binding slot.
    pub buffer_binding: u32,
    pub offset: u32,
    pub stride: u32,
    /// Zero for per-vertex data, otherwise the instance step rate.
    pub instance_step_rate: u32,
}

/// Shader bytecode for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ShaderDesc {
    pub code: Vec<u8>,
    pub entry_point: Option<String>,
    /// Specialization constants as `(id, value)` pairs.
    pub spec_constants: Vec<(u32, u32)>,
}

impl ShaderDesc {
    pub fn new(code: impl Into<Vec<u8>>) -> Self {
        Self {
            code: code.into(),
            ..Default::default()
        }
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    /// Returns `true` if no code was supplied for this stage.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

/// Compute pipeline description.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComputePipelineDesc {
    pub layout: PipelineLayout,
    pub cs: ShaderDesc,
}

/// Graphics pipeline description.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsPipelineDesc {
    pub layout: PipelineLayout,
    pub vs: ShaderDesc,
    pub hs: ShaderDesc,
    pub ds: ShaderDesc,
    pub gs: ShaderDesc,
    pub ps: ShaderDesc,
    pub input_layout: Vec<InputElement>,
    pub blend: BlendState,
    pub rasterizer: RasterizerState,
    pub depth_stencil: DepthStencilState,
    pub topology: PrimitiveTopology,
    pub sample_mask: u32,
    pub sample_count: u32,
    pub viewport_count: u32,
    pub dynamic_states: Vec<DynamicState>,
    pub render_target_formats: Vec<Format>,
    pub depth_stencil_format: Format,
}

impl Default for GraphicsPipelineDesc {
    fn default() -> Self {
        Self {
            layout: PipelineLayout::NULL,
            vs: ShaderDesc::default(),
            hs: ShaderDesc::default(),
            ds: ShaderDesc::default(),
            gs: ShaderDesc::default(),
            ps: ShaderDesc::default(),
            input_layout: Vec::new(),
            blend: BlendState::default(),
            rasterizer: RasterizerState::default(),
            depth_stencil: DepthStencilState::default(),
            topology: PrimitiveTopology::TriangleList,
            sample_mask: u32::MAX,
            sample_count: 1,
            viewport_count: 1,
            dynamic_states: Vec::new(),
            render_target_formats: Vec::new(),
            depth_stencil_format: Format::Unknown,
        }
    }
}

impl GraphicsPipelineDesc {
    /// Shader stages with code attached.
    pub fn stages(&self) -> ShaderStage {
        let mut stages = ShaderStage::empty();
        for (shader, stage) in [
            (&self.vs, ShaderStage::VERTEX),
            (&self.hs, ShaderStage::HULL),
            (&self.ds, ShaderStage::DOMAIN),
            (&self.gs, ShaderStage::GEOMETRY),
            (&self.ps, ShaderStage::PIXEL),
        ] {
            if !shader.is_empty() {
                stages |= stage;
            }
        }
        stages
    }

    /// Non-empty shader stages in pipeline order.
    pub fn shaders(&self) -> impl Iterator<Item = (ShaderStage, &ShaderDesc)> {
        [
            (ShaderStage::VERTEX, &self.vs),
            (ShaderStage::HULL, &self.hs),
            (ShaderStage::DOMAIN, &self.ds),
            (ShaderStage::GEOMETRY, &self.gs),
            (ShaderStage::PIXEL, &self.ps),
        ]
        .into_iter()
        .filter(|(_, shader)| !shader.is_empty())
    }

    pub fn is_dynamic(&self, state: DynamicState) -> bool {
        self.dynamic_states.contains(&state)
    }
}

/// Pipeline description.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineDesc {
    Compute(ComputePipelineDesc),
    Graphics(Box<GraphicsPipelineDesc>),
}

impl PipelineDesc {
    /// Shader stages the pipeline populates.
    pub fn stages(&self) -> ShaderStage {
        match self {
            PipelineDesc::Compute(desc) if !desc.cs.is_empty() => ShaderStage::COMPUTE,
            PipelineDesc::Compute(_) => ShaderStage::empty(),
            PipelineDesc::Graphics(desc) => desc.stages(),
        }
    }

    pub fn layout(&self) -> PipelineLayout {
        match self {
            PipelineDesc::Compute(desc) => desc.layout,
            PipelineDesc::Graphics(desc) => desc.layout,
        }
    }
}

/// Kind of descriptor stored in a descriptor set slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    Sampler,
    SamplerWithResourceView,
    ShaderResourceView,
    UnorderedAccessView,
    ConstantBuffer,
}

/// Contiguous range of bindings in a descriptor set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    pub binding: u32,
    pub count: u32,
    pub ty: DescriptorType,
    pub visibility: ShaderStage,
}

/// Descriptor set layout description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DescriptorSetLayoutDesc {
    pub ranges: Vec<DescriptorRange>,
    /// Layout is used with push descriptors instead of allocated sets.
    pub push_descriptors: bool,
}

impl DescriptorSetLayoutDesc {
    /// Total number of descriptor slots across all ranges.
    pub fn total_count(&self) -> u32 {
        self.ranges.iter().map(|range| range.count).sum()
    }
}

/// One parameter of a pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineLayoutParam {
    PushConstants {
        offset: u32,
        /// Number of 32-bit values.
        count: u32,
        visibility: ShaderStage,
    },
    DescriptorSet(DescriptorSetLayout),
}

/// Pipeline layout description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PipelineLayoutDesc {
    pub params: Vec<PipelineLayoutParam>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_raw_values() {
        assert_eq!(PrimitiveTopology::TriangleList.to_raw(), 4);
        assert_eq!(PrimitiveTopology::PatchList(3).to_raw(), 35);
        assert_eq!(PrimitiveTopology::from_raw(35), PrimitiveTopology::PatchList(3));
        assert_eq!(PrimitiveTopology::from_raw(7), PrimitiveTopology::Undefined);
    }

    #[test]
    fn test_graphics_stage_mask() {
        let desc = GraphicsPipelineDesc {
            vs: ShaderDesc::new(vec![1, 2, 3, 4]),
            ps: ShaderDesc::new(vec![5, 6, 7, 8]),
            ..Default::default()
        };
        assert_eq!(desc.stages(), ShaderStage::VERTEX | ShaderStage::PIXEL);
        assert_eq!(desc.shaders().count(), 2);
        assert_eq!(
            PipelineDesc::Graphics(Box::new(desc)).stages(),
            ShaderStage::VERTEX | ShaderStage::PIXEL
        );
    }

    #[test]
    fn test_compute_stage_mask() {
        let empty = PipelineDesc::Compute(ComputePipelineDesc::default());
        assert!(empty.stages().is_empty());
        let compute = PipelineDesc::Compute(ComputePipelineDesc {
            cs: ShaderDesc::new(vec![0; 4]),
            ..Default::default()
        });
        assert_eq!(compute.stages(), ShaderStage::COMPUTE);
    }

    #[test]
    fn test_descriptor_layout_count() {
        let desc = DescriptorSetLayoutDesc {
            ranges: vec![
                DescriptorRange {
                    binding: 0,
                    count: 2,
                    ty: DescriptorType::ConstantBuffer,
                    visibility: ShaderStage::VERTEX,
                },
                DescriptorRange {
                    binding: 2,
                    count: 4,
                    ty: DescriptorType::ShaderResourceView,
                    visibility: ShaderStage::PIXEL,
                },
            ],
            push_descriptors: false,
        };
        assert_eq!(desc.total_count(), 6);
    }
}
