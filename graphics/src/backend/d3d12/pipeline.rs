//! Pipeline state objects.
//!
//! Direct3D 12 compiles a whole pipeline into one `ID3D12PipelineState`,
//! so a pipeline maps onto exactly one native object. The pipeline layout
//! of the abstract description is the root signature.

use lumen_core::pipeline::{
    ComputePipelineDesc, GraphicsPipelineDesc, PipelineDesc, PrimitiveTopology, ShaderDesc,
};
use lumen_core::{ApiError, ApiResult, PipelineLayout};

use super::driver::D3D12Driver;
use crate::backend::com::{hresult_to_api_error, ComPtr};
use crate::backend::d3d_state::{
    convert_blend_state, convert_depth_stencil_state, convert_input_layout,
    convert_native_blend_desc, convert_native_depth_stencil_desc, convert_native_input_layout,
    convert_native_rasterizer_desc, convert_rasterizer_state, BlendDesc, DepthStencilDesc,
    InputElementDesc, RasterizerDesc,
};
use crate::backend::dxgi::{convert_dxgi_format, convert_format, DxgiFormat, DXGI_FORMAT_UNKNOWN};

pub const D3D12_PRIMITIVE_TOPOLOGY_TYPE_UNDEFINED: u32 = 0;
pub const D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT: u32 = 1;
pub const D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE: u32 = 2;
pub const D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE: u32 = 3;
pub const D3D12_PRIMITIVE_TOPOLOGY_TYPE_PATCH: u32 = 4;

/// `D3D12_GRAPHICS_PIPELINE_STATE_DESC`.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsStateDesc {
    pub root_signature: ComPtr,
    pub vs: Vec<u8>,
    pub hs: Vec<u8>,
    pub ds: Vec<u8>,
    pub gs: Vec<u8>,
    pub ps: Vec<u8>,
    pub blend: BlendDesc,
    pub sample_mask: u32,
    pub rasterizer: RasterizerDesc,
    pub depth_stencil: DepthStencilDesc,
    pub input_layout: Vec<InputElementDesc>,
    pub topology_type: u32,
    pub rtv_formats: Vec<DxgiFormat>,
    pub dsv_format: DxgiFormat,
    pub sample_count: u32,
}

/// `D3D12_COMPUTE_PIPELINE_STATE_DESC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeStateDesc {
    pub root_signature: ComPtr,
    pub cs: Vec<u8>,
}

/// Topology class a pipeline state is compiled for.
pub fn convert_topology_type(topology: PrimitiveTopology) -> u32 {
    use PrimitiveTopology::*;
    match topology {
        Undefined => D3D12_PRIMITIVE_TOPOLOGY_TYPE_UNDEFINED,
        PointList => D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
        LineList | LineStrip | LineListAdjacency | LineStripAdjacency => {
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE
        }
        TriangleList | TriangleStrip | TriangleFan | TriangleListAdjacency
        | TriangleStripAdjacency => D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        PatchList(_) => D3D12_PRIMITIVE_TOPOLOGY_TYPE_PATCH,
    }
}

/// Representative topology of a topology class. The exact topology is
/// set on the command list, not in the pipeline state.
pub fn convert_native_topology_type(topology_type: u32) -> PrimitiveTopology {
    match topology_type {
        D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT => PrimitiveTopology::PointList,
        D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE => PrimitiveTopology::LineList,
        D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE => PrimitiveTopology::TriangleList,
        D3D12_PRIMITIVE_TOPOLOGY_TYPE_PATCH => PrimitiveTopology::PatchList(1),
        _ => PrimitiveTopology::Undefined,
    }
}

pub fn convert_graphics_desc(desc: &GraphicsPipelineDesc) -> ApiResult<GraphicsStateDesc> {
    if desc.topology == PrimitiveTopology::TriangleFan {
        return Err(ApiError::Unsupported("triangle fans".into()));
    }
    if desc.render_target_formats.len() > super::conversion::D3D12_SIMULTANEOUS_RENDER_TARGET_COUNT {
        return Err(ApiError::InvalidParameter(format!(
            "{} render target formats",
            desc.render_target_formats.len()
        )));
    }
    if !desc.input_layout.is_empty() && desc.vs.is_empty() {
        return Err(ApiError::InvalidParameter(
            "input layout without a vertex shader".into(),
        ));
    }
    Ok(GraphicsStateDesc {
        root_signature: ComPtr(desc.layout.raw()),
        vs: desc.vs.code.clone(),
        hs: desc.hs.code.clone(),
        ds: desc.ds.code.clone(),
        gs: desc.gs.code.clone(),
        ps: desc.ps.code.clone(),
        blend: convert_blend_state(&desc.blend),
        sample_mask: desc.sample_mask,
        rasterizer: convert_rasterizer_state(&desc.rasterizer)?,
        depth_stencil: convert_depth_stencil_state(&desc.depth_stencil),
        input_layout: convert_input_layout(&desc.input_layout)?,
        topology_type: convert_topology_type(desc.topology),
        rtv_formats: desc
            .render_target_formats
            .iter()
            .map(|format| convert_format(*format))
            .collect(),
        dsv_format: convert_format(desc.depth_stencil_format),
        sample_count: desc.sample_count.max(1),
    })
}

/// Abstract description of an application pipeline state. Values the
/// state object does not capture (blend constant, stencil reference) are
/// left at their defaults.
pub fn convert_native_graphics_desc(desc: &GraphicsStateDesc) -> GraphicsPipelineDesc {
    let depth_stencil_format = if desc.dsv_format == DXGI_FORMAT_UNKNOWN {
        lumen_core::Format::Unknown
    } else {
        convert_dxgi_format(desc.dsv_format)
    };
    GraphicsPipelineDesc {
        layout: PipelineLayout(desc.root_signature.raw()),
        vs: ShaderDesc::new(desc.vs.clone()),
        hs: ShaderDesc::new(desc.hs.clone()),
        ds: ShaderDesc::new(desc.ds.clone()),
        gs: ShaderDesc::new(desc.gs.clone()),
        ps: ShaderDesc::new(desc.ps.clone()),
        input_layout: convert_native_input_layout(&desc.input_layout),
        blend: convert_native_blend_desc(&desc.blend, [0.0; 4]),
        rasterizer: convert_native_rasterizer_desc(&desc.rasterizer),
        depth_stencil: convert_native_depth_stencil_desc(&desc.depth_stencil, 0),
        topology: convert_native_topology_type(desc.topology_type),
        sample_mask: desc.sample_mask,
        sample_count: desc.sample_count,
        render_target_formats: desc.rtv_formats.iter().map(|f| convert_dxgi_format(*f)).collect(),
        depth_stencil_format,
        ..Default::default()
    }
}

pub fn convert_native_compute_desc(desc: &ComputeStateDesc) -> ComputePipelineDesc {
    ComputePipelineDesc {
        layout: PipelineLayout(desc.root_signature.raw()),
        cs: ShaderDesc::new(desc.cs.clone()),
    }
}

/// Create the pipeline state of `desc`.
pub fn build_pipeline(driver: &dyn D3D12Driver, desc: &PipelineDesc) -> ApiResult<ComPtr> {
    match desc {
        PipelineDesc::Compute(compute) => {
            if compute.cs.is_empty() {
                return Err(ApiError::InvalidParameter("compute pipeline without a shader".into()));
            }
            let native = ComputeStateDesc {
                root_signature: ComPtr(compute.layout.raw()),
                cs: compute.cs.code.clone(),
            };
            driver
                .create_compute_pipeline_state(&native)
                .map_err(hresult_to_api_error)
        }
        PipelineDesc::Graphics(graphics) => {
            let native = convert_graphics_desc(graphics)?;
            driver
                .create_graphics_pipeline_state(&native)
                .map_err(hresult_to_api_error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::pipeline::{InputElement, ShaderStage};
    use lumen_core::Format;

    #[test]
    fn test_topology_types() {
        assert_eq!(
            convert_topology_type(PrimitiveTopology::TriangleStrip),
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE
        );
        assert_eq!(
            convert_topology_type(PrimitiveTopology::PatchList(3)),
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_PATCH
        );
        assert_eq!(
            convert_native_topology_type(D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE),
            PrimitiveTopology::LineList
        );
    }

    #[test]
    fn test_graphics_desc_round_trip() {
        let desc = GraphicsPipelineDesc {
            layout: PipelineLayout(0x40),
            vs: ShaderDesc::new(vec![1, 2, 3]),
            ps: ShaderDesc::new(vec![4, 5]),
            input_layout: vec![InputElement {
                semantic: "TEXCOORD".into(),
                format: Format::R32G32Float,
                ..Default::default()
            }],
            topology: PrimitiveTopology::TriangleList,
            render_target_formats: vec![Format::R8G8B8A8Unorm],
            depth_stencil_format: Format::D32Float,
            ..Default::default()
        };
        let native = convert_graphics_desc(&desc).unwrap();
        assert_eq!(native.root_signature, ComPtr(0x40));
        assert_eq!(native.rtv_formats, vec![Format::R8G8B8A8Unorm.raw()]);

        let back = convert_native_graphics_desc(&native);
        assert_eq!(back.stages(), ShaderStage::VERTEX | ShaderStage::PIXEL);
        assert_eq!(back.layout, desc.layout);
        assert_eq!(back.render_target_formats, desc.render_target_formats);
        assert_eq!(back.depth_stencil_format, Format::D32Float);
        assert_eq!(back.input_layout.len(), 1);
    }

    #[test]
    fn test_triangle_fans_rejected() {
        let desc = GraphicsPipelineDesc {
            topology: PrimitiveTopology::TriangleFan,
            ..Default::default()
        };
        assert!(matches!(convert_graphics_desc(&desc), Err(ApiError::Unsupported(_))));
    }
}
