//! Fixed-function state shared by Direct3D 10, 11 and 12.
//!
//! Sampler, blend, rasterizer, depth-stencil and input layout descriptions
//! use the same enumerations in all three APIs, so both backends translate
//! through the structs here.

use lumen_core::pipeline::{
    BlendFactor, BlendOp, BlendState, ColorWriteMask, CompareOp, CullMode, DepthStencilState,
    FillMode, InputElement, LogicOp, PrimitiveTopology, RasterizerState, RenderTargetBlend,
    StencilFace, StencilOp,
};
use lumen_core::sampler::{AddressMode, FilterMode, SamplerDesc};
use lumen_core::{ApiError, ApiResult};

use super::dxgi::{convert_dxgi_format, convert_format, DxgiFormat, DXGI_FORMAT_UNKNOWN};

// ============================================================================
// Constants
// ============================================================================

pub const D3D_COMPARISON_NEVER: u32 = 1;
pub const D3D_COMPARISON_LESS: u32 = 2;
pub const D3D_COMPARISON_EQUAL: u32 = 3;
pub const D3D_COMPARISON_LESS_EQUAL: u32 = 4;
pub const D3D_COMPARISON_GREATER: u32 = 5;
pub const D3D_COMPARISON_NOT_EQUAL: u32 = 6;
pub const D3D_COMPARISON_GREATER_EQUAL: u32 = 7;
pub const D3D_COMPARISON_ALWAYS: u32 = 8;

pub const D3D_STENCIL_OP_KEEP: u32 = 1;
pub const D3D_STENCIL_OP_ZERO: u32 = 2;
pub const D3D_STENCIL_OP_REPLACE: u32 = 3;
pub const D3D_STENCIL_OP_INCR_SAT: u32 = 4;
pub const D3D_STENCIL_OP_DECR_SAT: u32 = 5;
pub const D3D_STENCIL_OP_INVERT: u32 = 6;
pub const D3D_STENCIL_OP_INCR: u32 = 7;
pub const D3D_STENCIL_OP_DECR: u32 = 8;

pub const D3D_BLEND_ZERO: u32 = 1;
pub const D3D_BLEND_ONE: u32 = 2;
pub const D3D_BLEND_SRC_COLOR: u32 = 3;
pub const D3D_BLEND_INV_SRC_COLOR: u32 = 4;
pub const D3D_BLEND_SRC_ALPHA: u32 = 5;
pub const D3D_BLEND_INV_SRC_ALPHA: u32 = 6;
pub const D3D_BLEND_DEST_ALPHA: u32 = 7;
pub const D3D_BLEND_INV_DEST_ALPHA: u32 = 8;
pub const D3D_BLEND_DEST_COLOR: u32 = 9;
pub const D3D_BLEND_INV_DEST_COLOR: u32 = 10;
pub const D3D_BLEND_SRC_ALPHA_SAT: u32 = 11;
pub const D3D_BLEND_BLEND_FACTOR: u32 = 14;
pub const D3D_BLEND_INV_BLEND_FACTOR: u32 = 15;
pub const D3D_BLEND_SRC1_COLOR: u32 = 16;
pub const D3D_BLEND_INV_SRC1_COLOR: u32 = 17;
pub const D3D_BLEND_SRC1_ALPHA: u32 = 18;
pub const D3D_BLEND_INV_SRC1_ALPHA: u32 = 19;

pub const D3D_BLEND_OP_ADD: u32 = 1;
pub const D3D_BLEND_OP_SUBTRACT: u32 = 2;
pub const D3D_BLEND_OP_REV_SUBTRACT: u32 = 3;
pub const D3D_BLEND_OP_MIN: u32 = 4;
pub const D3D_BLEND_OP_MAX: u32 = 5;

pub const D3D_FILL_WIREFRAME: u32 = 2;
pub const D3D_FILL_SOLID: u32 = 3;

pub const D3D_CULL_NONE: u32 = 1;
pub const D3D_CULL_FRONT: u32 = 2;
pub const D3D_CULL_BACK: u32 = 3;

pub const D3D_DEPTH_WRITE_MASK_ZERO: u32 = 0;
pub const D3D_DEPTH_WRITE_MASK_ALL: u32 = 1;

pub const D3D_TEXTURE_ADDRESS_WRAP: u32 = 1;
pub const D3D_TEXTURE_ADDRESS_MIRROR: u32 = 2;
pub const D3D_TEXTURE_ADDRESS_CLAMP: u32 = 3;
pub const D3D_TEXTURE_ADDRESS_BORDER: u32 = 4;
pub const D3D_TEXTURE_ADDRESS_MIRROR_ONCE: u32 = 5;

/// `D3D11_FILTER_ANISOTROPIC`; the comparison bit may be added on top.
pub const D3D_FILTER_ANISOTROPIC: u32 = 0x55;
pub const D3D_FILTER_COMPARISON: u32 = 0x80;

pub const D3D_INPUT_PER_VERTEX_DATA: u32 = 0;
pub const D3D_INPUT_PER_INSTANCE_DATA: u32 = 1;

/// `D3D11_APPEND_ALIGNED_ELEMENT`.
pub const D3D_APPEND_ALIGNED_ELEMENT: u32 = u32::MAX;

// ============================================================================
// Native descriptions
// ============================================================================

/// `D3D11_SAMPLER_DESC` / `D3D12_SAMPLER_DESC`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerStateDesc {
    pub filter: u32,
    pub address_u: u32,
    pub address_v: u32,
    pub address_w: u32,
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    pub comparison_func: u32,
    pub border_color: [f32; 4],
    pub min_lod: f32,
    pub max_lod: f32,
}

/// `D3D11_RENDER_TARGET_BLEND_DESC1` / `D3D12_RENDER_TARGET_BLEND_DESC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderTargetBlendDesc {
    pub blend_enable: bool,
    pub logic_op_enable: bool,
    pub src_blend: u32,
    pub dest_blend: u32,
    pub blend_op: u32,
    pub src_blend_alpha: u32,
    pub dest_blend_alpha: u32,
    pub blend_op_alpha: u32,
    pub logic_op: u32,
    pub write_mask: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlendDesc {
    pub alpha_to_coverage_enable: bool,
    pub independent_blend_enable: bool,
    pub render_targets: [RenderTargetBlendDesc; 8],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizerDesc {
    pub fill_mode: u32,
    pub cull_mode: u32,
    pub front_counter_clockwise: bool,
    pub depth_bias: i32,
    pub depth_bias_clamp: f32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clip_enable: bool,
    pub scissor_enable: bool,
    pub multisample_enable: bool,
    pub antialiased_line_enable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilOpDesc {
    pub stencil_fail_op: u32,
    pub stencil_depth_fail_op: u32,
    pub stencil_pass_op: u32,
    pub stencil_func: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilDesc {
    pub depth_enable: bool,
    pub depth_write_mask: u32,
    pub depth_func: u32,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub front_face: DepthStencilOpDesc,
    pub back_face: DepthStencilOpDesc,
}

/// `D3D11_INPUT_ELEMENT_DESC` / `D3D12_INPUT_ELEMENT_DESC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputElementDesc {
    pub semantic_name: String,
    pub semantic_index: u32,
    pub format: DxgiFormat,
    pub input_slot: u32,
    pub aligned_byte_offset: u32,
    pub input_slot_class: u32,
    pub instance_data_step_rate: u32,
}

// ============================================================================
// Enumerations
// ============================================================================

pub fn convert_compare_op(op: CompareOp) -> u32 {
    match op {
        CompareOp::Never => D3D_COMPARISON_NEVER,
        CompareOp::Less => D3D_COMPARISON_LESS,
        CompareOp::Equal => D3D_COMPARISON_EQUAL,
        CompareOp::LessEqual => D3D_COMPARISON_LESS_EQUAL,
        CompareOp::Greater => D3D_COMPARISON_GREATER,
        CompareOp::NotEqual => D3D_COMPARISON_NOT_EQUAL,
        CompareOp::GreaterEqual => D3D_COMPARISON_GREATER_EQUAL,
        CompareOp::Always => D3D_COMPARISON_ALWAYS,
    }
}

pub fn convert_native_compare_op(op: u32) -> CompareOp {
    match op {
        D3D_COMPARISON_NEVER => CompareOp::Never,
        D3D_COMPARISON_LESS => CompareOp::Less,
        D3D_COMPARISON_EQUAL => CompareOp::Equal,
        D3D_COMPARISON_LESS_EQUAL => CompareOp::LessEqual,
        D3D_COMPARISON_GREATER => CompareOp::Greater,
        D3D_COMPARISON_NOT_EQUAL => CompareOp::NotEqual,
        D3D_COMPARISON_GREATER_EQUAL => CompareOp::GreaterEqual,
        _ => CompareOp::Always,
    }
}

pub fn convert_stencil_op(op: StencilOp) -> u32 {
    match op {
        StencilOp::Keep => D3D_STENCIL_OP_KEEP,
        StencilOp::Zero => D3D_STENCIL_OP_ZERO,
        StencilOp::Replace => D3D_STENCIL_OP_REPLACE,
        StencilOp::IncrementSaturate => D3D_STENCIL_OP_INCR_SAT,
        StencilOp::DecrementSaturate => D3D_STENCIL_OP_DECR_SAT,
        StencilOp::Invert => D3D_STENCIL_OP_INVERT,
        StencilOp::Increment => D3D_STENCIL_OP_INCR,
        StencilOp::Decrement => D3D_STENCIL_OP_DECR,
    }
}

pub fn convert_native_stencil_op(op: u32) -> StencilOp {
    match op {
        D3D_STENCIL_OP_ZERO => StencilOp::Zero,
        D3D_STENCIL_OP_REPLACE => StencilOp::Replace,
        D3D_STENCIL_OP_INCR_SAT => StencilOp::IncrementSaturate,
        D3D_STENCIL_OP_DECR_SAT => StencilOp::DecrementSaturate,
        D3D_STENCIL_OP_INVERT => StencilOp::Invert,
        D3D_STENCIL_OP_INCR => StencilOp::Increment,
        D3D_STENCIL_OP_DECR => StencilOp::Decrement,
        _ => StencilOp::Keep,
    }
}

/// Direct3D has one blend factor constant, so the constant alpha factors
/// map onto the constant color ones.
pub fn convert_blend_factor(factor: BlendFactor) -> u32 {
    match factor {
        BlendFactor::Zero => D3D_BLEND_ZERO,
        BlendFactor::One => D3D_BLEND_ONE,
        BlendFactor::SourceColor => D3D_BLEND_SRC_COLOR,
        BlendFactor::OneMinusSourceColor => D3D_BLEND_INV_SRC_COLOR,
        BlendFactor::DestColor => D3D_BLEND_DEST_COLOR,
        BlendFactor::OneMinusDestColor => D3D_BLEND_INV_DEST_COLOR,
        BlendFactor::SourceAlpha => D3D_BLEND_SRC_ALPHA,
        BlendFactor::OneMinusSourceAlpha => D3D_BLEND_INV_SRC_ALPHA,
        BlendFactor::DestAlpha => D3D_BLEND_DEST_ALPHA,
        BlendFactor::OneMinusDestAlpha => D3D_BLEND_INV_DEST_ALPHA,
        BlendFactor::ConstantColor | BlendFactor::ConstantAlpha => D3D_BLEND_BLEND_FACTOR,
        BlendFactor::OneMinusConstantColor | BlendFactor::OneMinusConstantAlpha => {
            D3D_BLEND_INV_BLEND_FACTOR
        }
        BlendFactor::SourceAlphaSaturate => D3D_BLEND_SRC_ALPHA_SAT,
        BlendFactor::Source1Color => D3D_BLEND_SRC1_COLOR,
        BlendFactor::OneMinusSource1Color => D3D_BLEND_INV_SRC1_COLOR,
        BlendFactor::Source1Alpha => D3D_BLEND_SRC1_ALPHA,
        BlendFactor::OneMinusSource1Alpha => D3D_BLEND_INV_SRC1_ALPHA,
    }
}

pub fn convert_native_blend_factor(factor: u32) -> BlendFactor {
    match factor {
        D3D_BLEND_ZERO => BlendFactor::Zero,
        D3D_BLEND_SRC_COLOR => BlendFactor::SourceColor,
        D3D_BLEND_INV_SRC_COLOR => BlendFactor::OneMinusSourceColor,
        D3D_BLEND_SRC_ALPHA => BlendFactor::SourceAlpha,
        D3D_BLEND_INV_SRC_ALPHA => BlendFactor::OneMinusSourceAlpha,
        D3D_BLEND_DEST_ALPHA => BlendFactor::DestAlpha,
        D3D_BLEND_INV_DEST_ALPHA => BlendFactor::OneMinusDestAlpha,
        D3D_BLEND_DEST_COLOR => BlendFactor::DestColor,
        D3D_BLEND_INV_DEST_COLOR => BlendFactor::OneMinusDestColor,
        D3D_BLEND_SRC_ALPHA_SAT => BlendFactor::SourceAlphaSaturate,
        D3D_BLEND_BLEND_FACTOR => BlendFactor::ConstantColor,
        D3D_BLEND_INV_BLEND_FACTOR => BlendFactor::OneMinusConstantColor,
        D3D_BLEND_SRC1_COLOR => BlendFactor::Source1Color,
        D3D_BLEND_INV_SRC1_COLOR => BlendFactor::OneMinusSource1Color,
        D3D_BLEND_SRC1_ALPHA => BlendFactor::Source1Alpha,
        D3D_BLEND_INV_SRC1_ALPHA => BlendFactor::OneMinusSource1Alpha,
        _ => BlendFactor::One,
    }
}

pub fn convert_blend_op(op: BlendOp) -> u32 {
    match op {
        BlendOp::Add => D3D_BLEND_OP_ADD,
        BlendOp::Subtract => D3D_BLEND_OP_SUBTRACT,
        BlendOp::ReverseSubtract => D3D_BLEND_OP_REV_SUBTRACT,
        BlendOp::Min => D3D_BLEND_OP_MIN,
        BlendOp::Max => D3D_BLEND_OP_MAX,
    }
}

pub fn convert_native_blend_op(op: u32) -> BlendOp {
    match op {
        D3D_BLEND_OP_SUBTRACT => BlendOp::Subtract,
        D3D_BLEND_OP_REV_SUBTRACT => BlendOp::ReverseSubtract,
        D3D_BLEND_OP_MIN => BlendOp::Min,
        D3D_BLEND_OP_MAX => BlendOp::Max,
        _ => BlendOp::Add,
    }
}

/// `D3D12_LOGIC_OP` (also used by `D3D11_LOGIC_OP`).
pub fn convert_logic_op(op: LogicOp) -> u32 {
    match op {
        LogicOp::Clear => 0,
        LogicOp::Set => 1,
        LogicOp::Copy => 2,
        LogicOp::CopyInverted => 3,
        LogicOp::Noop => 4,
        LogicOp::Invert => 5,
        LogicOp::And => 6,
        LogicOp::Nand => 7,
        LogicOp::Or => 8,
        LogicOp::Nor => 9,
        LogicOp::Xor => 10,
        LogicOp::Equivalent => 11,
        LogicOp::AndReverse => 12,
        LogicOp::AndInverted => 13,
        LogicOp::OrReverse => 14,
        LogicOp::OrInverted => 15,
    }
}

pub fn convert_native_logic_op(op: u32) -> LogicOp {
    match op {
        0 => LogicOp::Clear,
        1 => LogicOp::Set,
        3 => LogicOp::CopyInverted,
        4 => LogicOp::Noop,
        5 => LogicOp::Invert,
        6 => LogicOp::And,
        7 => LogicOp::Nand,
        8 => LogicOp::Or,
        9 => LogicOp::Nor,
        10 => LogicOp::Xor,
        11 => LogicOp::Equivalent,
        12 => LogicOp::AndReverse,
        13 => LogicOp::AndInverted,
        14 => LogicOp::OrReverse,
        15 => LogicOp::OrInverted,
        _ => LogicOp::Copy,
    }
}

/// Direct3D cannot rasterize polygons as points.
pub fn convert_fill_mode(mode: FillMode) -> Option<u32> {
    match mode {
        FillMode::Solid => Some(D3D_FILL_SOLID),
        FillMode::Wireframe => Some(D3D_FILL_WIREFRAME),
        FillMode::Point => None,
    }
}

pub fn convert_native_fill_mode(mode: u32) -> FillMode {
    if mode == D3D_FILL_WIREFRAME {
        FillMode::Wireframe
    } else {
        FillMode::Solid
    }
}

pub fn convert_cull_mode(mode: CullMode) -> Option<u32> {
    match mode {
        CullMode::None => Some(D3D_CULL_NONE),
        CullMode::Front => Some(D3D_CULL_FRONT),
        CullMode::Back => Some(D3D_CULL_BACK),
        CullMode::FrontAndBack => None,
    }
}

pub fn convert_native_cull_mode(mode: u32) -> CullMode {
    match mode {
        D3D_CULL_NONE => CullMode::None,
        D3D_CULL_FRONT => CullMode::Front,
        _ => CullMode::Back,
    }
}

pub fn convert_address_mode(mode: AddressMode) -> u32 {
    match mode {
        AddressMode::Wrap => D3D_TEXTURE_ADDRESS_WRAP,
        AddressMode::Mirror => D3D_TEXTURE_ADDRESS_MIRROR,
        AddressMode::Clamp => D3D_TEXTURE_ADDRESS_CLAMP,
        AddressMode::Border => D3D_TEXTURE_ADDRESS_BORDER,
        AddressMode::MirrorOnce => D3D_TEXTURE_ADDRESS_MIRROR_ONCE,
    }
}

pub fn convert_native_address_mode(mode: u32) -> AddressMode {
    match mode {
        D3D_TEXTURE_ADDRESS_MIRROR => AddressMode::Mirror,
        D3D_TEXTURE_ADDRESS_CLAMP => AddressMode::Clamp,
        D3D_TEXTURE_ADDRESS_BORDER => AddressMode::Border,
        D3D_TEXTURE_ADDRESS_MIRROR_ONCE => AddressMode::MirrorOnce,
        _ => AddressMode::Wrap,
    }
}

/// `D3D_PRIMITIVE_TOPOLOGY`. Triangle fans do not exist in Direct3D 10+.
pub fn convert_topology(topology: PrimitiveTopology) -> Option<u32> {
    match topology {
        PrimitiveTopology::TriangleFan => None,
        other => Some(other.to_raw()),
    }
}

pub fn convert_native_topology(topology: u32) -> PrimitiveTopology {
    PrimitiveTopology::from_raw(topology)
}

// ============================================================================
// Samplers
// ============================================================================

fn filter_bit(mode: FilterMode) -> u32 {
    match mode {
        FilterMode::Point => 0,
        FilterMode::Linear => 1,
    }
}

fn filter_mode(bit: u32) -> FilterMode {
    if bit & 1 != 0 {
        FilterMode::Linear
    } else {
        FilterMode::Point
    }
}

pub fn convert_sampler_desc(desc: &SamplerDesc) -> SamplerStateDesc {
    let mut filter = if desc.is_anisotropic() {
        D3D_FILTER_ANISOTROPIC
    } else {
        filter_bit(desc.min_filter) << 4 | filter_bit(desc.mag_filter) << 2 | filter_bit(desc.mip_filter)
    };
    if desc.compare.is_some() {
        filter |= D3D_FILTER_COMPARISON;
    }
    SamplerStateDesc {
        filter,
        address_u: convert_address_mode(desc.address_u),
        address_v: convert_address_mode(desc.address_v),
        address_w: convert_address_mode(desc.address_w),
        mip_lod_bias: desc.mip_lod_bias,
        max_anisotropy: (desc.max_anisotropy.clamp(1.0, 16.0)) as u32,
        comparison_func: desc.compare.map_or(D3D_COMPARISON_NEVER, convert_compare_op),
        border_color: desc.border_color,
        min_lod: desc.min_lod,
        max_lod: desc.max_lod,
    }
}

pub fn convert_native_sampler_desc(desc: &SamplerStateDesc) -> SamplerDesc {
    let anisotropic = desc.filter & 0x40 != 0;
    let (min_filter, mag_filter, mip_filter) = if anisotropic {
        (FilterMode::Linear, FilterMode::Linear, FilterMode::Linear)
    } else {
        (
            filter_mode(desc.filter >> 4),
            filter_mode(desc.filter >> 2),
            filter_mode(desc.filter),
        )
    };
    SamplerDesc {
        min_filter,
        mag_filter,
        mip_filter,
        address_u: convert_native_address_mode(desc.address_u),
        address_v: convert_native_address_mode(desc.address_v),
        address_w: convert_native_address_mode(desc.address_w),
        mip_lod_bias: desc.mip_lod_bias,
        max_anisotropy: if anisotropic {
            desc.max_anisotropy as f32
        } else {
            1.0
        },
        compare: (desc.filter & D3D_FILTER_COMPARISON != 0)
            .then(|| convert_native_compare_op(desc.comparison_func)),
        border_color: desc.border_color,
        min_lod: desc.min_lod,
        max_lod: desc.max_lod,
    }
}

// ============================================================================
// Pipeline state
// ============================================================================

fn convert_render_target_blend(target: &RenderTargetBlend) -> RenderTargetBlendDesc {
    RenderTargetBlendDesc {
        blend_enable: target.blend_enable,
        logic_op_enable: target.logic_op_enable,
        src_blend: convert_blend_factor(target.source_color),
        dest_blend: convert_blend_factor(target.dest_color),
        blend_op: convert_blend_op(target.color_op),
        src_blend_alpha: convert_blend_factor(target.source_alpha),
        dest_blend_alpha: convert_blend_factor(target.dest_alpha),
        blend_op_alpha: convert_blend_op(target.alpha_op),
        logic_op: convert_logic_op(target.logic_op),
        write_mask: target.write_mask.bits(),
    }
}

pub fn convert_blend_state(state: &BlendState) -> BlendDesc {
    let render_targets = state.render_targets.map(|target| convert_render_target_blend(&target));
    BlendDesc {
        alpha_to_coverage_enable: state.alpha_to_coverage_enable,
        independent_blend_enable: render_targets.iter().any(|target| *target != render_targets[0]),
        render_targets,
    }
}

pub fn convert_native_blend_desc(desc: &BlendDesc, blend_constant: [f32; 4]) -> BlendState {
    let mut state = BlendState {
        alpha_to_coverage_enable: desc.alpha_to_coverage_enable,
        blend_constant,
        ..Default::default()
    };
    for (index, target) in state.render_targets.iter_mut().enumerate() {
        let native = if desc.independent_blend_enable {
            &desc.render_targets[index]
        } else {
            &desc.render_targets[0]
        };
        *target = RenderTargetBlend {
            blend_enable: native.blend_enable,
            logic_op_enable: native.logic_op_enable,
            source_color: convert_native_blend_factor(native.src_blend),
            dest_color: convert_native_blend_factor(native.dest_blend),
            color_op: convert_native_blend_op(native.blend_op),
            source_alpha: convert_native_blend_factor(native.src_blend_alpha),
            dest_alpha: convert_native_blend_factor(native.dest_blend_alpha),
            alpha_op: convert_native_blend_op(native.blend_op_alpha),
            logic_op: convert_native_logic_op(native.logic_op),
            write_mask: ColorWriteMask::from_bits_truncate(native.write_mask),
        };
    }
    state
}

pub fn convert_rasterizer_state(state: &RasterizerState) -> ApiResult<RasterizerDesc> {
    let fill_mode = convert_fill_mode(state.fill_mode)
        .ok_or_else(|| ApiError::Unsupported(format!("fill mode {:?}", state.fill_mode)))?;
    let cull_mode = convert_cull_mode(state.cull_mode)
        .ok_or_else(|| ApiError::Unsupported(format!("cull mode {:?}", state.cull_mode)))?;
    Ok(RasterizerDesc {
        fill_mode,
        cull_mode,
        front_counter_clockwise: state.front_counter_clockwise,
        depth_bias: state.depth_bias as i32,
        depth_bias_clamp: state.depth_bias_clamp,
        slope_scaled_depth_bias: state.slope_scaled_depth_bias,
        depth_clip_enable: state.depth_clip_enable,
        scissor_enable: state.scissor_enable,
        multisample_enable: state.multisample_enable,
        antialiased_line_enable: state.antialiased_line_enable,
    })
}

pub fn convert_native_rasterizer_desc(desc: &RasterizerDesc) -> RasterizerState {
    RasterizerState {
        fill_mode: convert_native_fill_mode(desc.fill_mode),
        cull_mode: convert_native_cull_mode(desc.cull_mode),
        front_counter_clockwise: desc.front_counter_clockwise,
        depth_bias: desc.depth_bias as f32,
        depth_bias_clamp: desc.depth_bias_clamp,
        slope_scaled_depth_bias: desc.slope_scaled_depth_bias,
        depth_clip_enable: desc.depth_clip_enable,
        scissor_enable: desc.scissor_enable,
        multisample_enable: desc.multisample_enable,
        antialiased_line_enable: desc.antialiased_line_enable,
    }
}

fn convert_stencil_face(face: &StencilFace) -> DepthStencilOpDesc {
    DepthStencilOpDesc {
        stencil_fail_op: convert_stencil_op(face.fail_op),
        stencil_depth_fail_op: convert_stencil_op(face.depth_fail_op),
        stencil_pass_op: convert_stencil_op(face.pass_op),
        stencil_func: convert_compare_op(face.func),
    }
}

fn convert_native_stencil_face(face: &DepthStencilOpDesc) -> StencilFace {
    StencilFace {
        fail_op: convert_native_stencil_op(face.stencil_fail_op),
        depth_fail_op: convert_native_stencil_op(face.stencil_depth_fail_op),
        pass_op: convert_native_stencil_op(face.stencil_pass_op),
        func: convert_native_compare_op(face.stencil_func),
    }
}

pub fn convert_depth_stencil_state(state: &DepthStencilState) -> DepthStencilDesc {
    DepthStencilDesc {
        depth_enable: state.depth_enable,
        depth_write_mask: if state.depth_write_enable {
            D3D_DEPTH_WRITE_MASK_ALL
        } else {
            D3D_DEPTH_WRITE_MASK_ZERO
        },
        depth_func: convert_compare_op(state.depth_func),
        stencil_enable: state.stencil_enable,
        stencil_read_mask: state.stencil_read_mask,
        stencil_write_mask: state.stencil_write_mask,
        front_face: convert_stencil_face(&state.front),
        back_face: convert_stencil_face(&state.back),
    }
}

/// The stencil reference is dynamic state in Direct3D and not part of the
/// description.
pub fn convert_native_depth_stencil_desc(desc: &DepthStencilDesc, stencil_reference: u8) -> DepthStencilState {
    DepthStencilState {
        depth_enable: desc.depth_enable,
        depth_write_enable: desc.depth_write_mask != D3D_DEPTH_WRITE_MASK_ZERO,
        depth_func: convert_native_compare_op(desc.depth_func),
        stencil_enable: desc.stencil_enable,
        stencil_read_mask: desc.stencil_read_mask,
        stencil_write_mask: desc.stencil_write_mask,
        stencil_reference,
        front: convert_native_stencil_face(&desc.front_face),
        back: convert_native_stencil_face(&desc.back_face),
    }
}

/// Input layout elements. Formats Direct3D cannot express are rejected.
pub fn convert_input_layout(elements: &[InputElement]) -> ApiResult<Vec<InputElementDesc>> {
    elements
        .iter()
        .map(|element| {
            let format = convert_format(element.format);
            if format == DXGI_FORMAT_UNKNOWN {
                return Err(ApiError::Unsupported(format!(
                    "vertex format {:?}",
                    element.format
                )));
            }
            Ok(InputElementDesc {
                semantic_name: element.semantic.clone(),
                semantic_index: element.semantic_index,
                format,
                input_slot: element.buffer_binding,
                aligned_byte_offset: element.offset,
                input_slot_class: if element.instance_step_rate > 0 {
                    D3D_INPUT_PER_INSTANCE_DATA
                } else {
                    D3D_INPUT_PER_VERTEX_DATA
                },
                instance_data_step_rate: element.instance_step_rate,
            })
        })
        .collect()
}

pub fn convert_native_input_layout(elements: &[InputElementDesc]) -> Vec<InputElement> {
    elements
        .iter()
        .enumerate()
        .map(|(location, element)| InputElement {
            location: location as u32,
            semantic: element.semantic_name.clone(),
            semantic_index: element.semantic_index,
            format: convert_dxgi_format(element.format),
            buffer_binding: element.input_slot,
            offset: element.aligned_byte_offset,
            stride: 0,
            instance_step_rate: if element.input_slot_class == D3D_INPUT_PER_INSTANCE_DATA {
                element.instance_data_step_rate
            } else {
                0
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::Format;

    #[test]
    fn test_linear_sampler_filter() {
        let desc = convert_sampler_desc(&SamplerDesc::default());
        // D3D11_FILTER_MIN_MAG_MIP_LINEAR
        assert_eq!(desc.filter, 0x15);
        assert_eq!(desc.address_u, D3D_TEXTURE_ADDRESS_CLAMP);
        assert_eq!(desc.comparison_func, D3D_COMPARISON_NEVER);
        assert_eq!(convert_native_sampler_desc(&desc), SamplerDesc::default());
    }

    #[test]
    fn test_comparison_anisotropic_sampler() {
        let desc = SamplerDesc::default()
            .with_anisotropy(8.0)
            .with_compare(CompareOp::LessEqual);
        let native = convert_sampler_desc(&desc);
        // D3D11_FILTER_COMPARISON_ANISOTROPIC
        assert_eq!(native.filter, 0xD5);
        assert_eq!(native.max_anisotropy, 8);
        assert_eq!(native.comparison_func, D3D_COMPARISON_LESS_EQUAL);
        let back = convert_native_sampler_desc(&native);
        assert_eq!(back.compare, Some(CompareOp::LessEqual));
        assert_eq!(back.max_anisotropy, 8.0);
    }

    #[test]
    fn test_point_filter_bits() {
        let desc = SamplerDesc {
            mip_filter: FilterMode::Linear,
            ..SamplerDesc::point()
        };
        // D3D11_FILTER_MIN_MAG_POINT_MIP_LINEAR
        assert_eq!(convert_sampler_desc(&desc).filter, 0x1);
    }

    #[test]
    fn test_independent_blend_detection() {
        let mut state = BlendState::default();
        assert!(!convert_blend_state(&state).independent_blend_enable);
        state.render_targets[3].blend_enable = true;
        let desc = convert_blend_state(&state);
        assert!(desc.independent_blend_enable);
        assert_eq!(convert_native_blend_desc(&desc, [0.0; 4]), state);
    }

    #[test]
    fn test_shared_blend_target_expands() {
        let mut desc = convert_blend_state(&BlendState::default());
        desc.render_targets[0].blend_enable = true;
        desc.render_targets[0].src_blend = D3D_BLEND_SRC_ALPHA;
        let state = convert_native_blend_desc(&desc, [1.0; 4]);
        assert!(state.render_targets.iter().all(|target| target.blend_enable));
        assert_eq!(state.render_targets[7].source_color, BlendFactor::SourceAlpha);
        assert_eq!(state.blend_constant, [1.0; 4]);
    }

    #[test]
    fn test_rasterizer_rejects_point_fill() {
        let state = RasterizerState {
            fill_mode: FillMode::Point,
            ..Default::default()
        };
        assert!(matches!(
            convert_rasterizer_state(&state),
            Err(ApiError::Unsupported(_))
        ));
        let desc = convert_rasterizer_state(&RasterizerState::default()).unwrap();
        assert_eq!(desc.fill_mode, D3D_FILL_SOLID);
        assert_eq!(desc.cull_mode, D3D_CULL_BACK);
        assert_eq!(convert_native_rasterizer_desc(&desc), RasterizerState::default());
    }

    #[test]
    fn test_depth_stencil_round_trip() {
        let state = DepthStencilState {
            depth_write_enable: false,
            stencil_enable: true,
            stencil_reference: 3,
            front: StencilFace {
                pass_op: StencilOp::Replace,
                ..Default::default()
            },
            ..Default::default()
        };
        let desc = convert_depth_stencil_state(&state);
        assert_eq!(desc.depth_write_mask, D3D_DEPTH_WRITE_MASK_ZERO);
        assert_eq!(desc.front_face.stencil_pass_op, D3D_STENCIL_OP_REPLACE);
        assert_eq!(convert_native_depth_stencil_desc(&desc, 3), state);
    }

    #[test]
    fn test_input_layout() {
        let elements = [
            InputElement {
                semantic: "POSITION".into(),
                format: Format::R32G32B32Float,
                ..Default::default()
            },
            InputElement {
                location: 1,
                semantic: "TEXCOORD".into(),
                format: Format::R32G32Float,
                buffer_binding: 1,
                instance_step_rate: 1,
                ..Default::default()
            },
        ];
        let native = convert_input_layout(&elements).unwrap();
        assert_eq!(native[0].format, 6);
        assert_eq!(native[1].input_slot_class, D3D_INPUT_PER_INSTANCE_DATA);
        assert_eq!(convert_native_input_layout(&native), elements);

        let bad = [InputElement {
            format: Format::L8Unorm,
            ..Default::default()
        }];
        // L8 maps onto R8 in DXGI
        assert!(convert_input_layout(&bad).is_ok());
        let unknown = [InputElement::default()];
        assert!(convert_input_layout(&unknown).is_err());
    }

    #[test]
    fn test_topology() {
        assert_eq!(convert_topology(PrimitiveTopology::TriangleStrip), Some(5));
        assert_eq!(convert_topology(PrimitiveTopology::TriangleFan), None);
        assert_eq!(convert_native_topology(1), PrimitiveTopology::PointList);
    }
}
