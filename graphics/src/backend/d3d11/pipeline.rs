//! Pipeline state bundles.
//!
//! Direct3D 10 and 11 split a pipeline into shader objects, an input layout
//! and three fixed-function state objects. A pipeline created through the
//! abstract interface owns one of each that it needs, plus the dynamic
//! values the state objects do not capture.

use lumen_core::pipeline::{GraphicsPipelineDesc, PipelineDesc, ShaderStage};
use lumen_core::{ApiError, ApiResult};

use super::driver::{D3D11Driver, StateObject};
use crate::backend::com::{hresult_to_api_error, ComPtr};
use crate::backend::d3d_state::{
    convert_blend_state, convert_depth_stencil_state, convert_input_layout,
    convert_rasterizer_state, convert_topology,
};

/// Native objects behind one pipeline handle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StateBundle {
    pub vertex_shader: ComPtr,
    pub hull_shader: ComPtr,
    pub domain_shader: ComPtr,
    pub geometry_shader: ComPtr,
    pub pixel_shader: ComPtr,
    pub compute_shader: ComPtr,
    pub input_layout: ComPtr,
    pub blend_state: ComPtr,
    pub rasterizer_state: ComPtr,
    pub depth_stencil_state: ComPtr,
    /// `D3D11_PRIMITIVE_TOPOLOGY` value.
    pub topology: u32,
    pub blend_constant: [f32; 4],
    pub sample_mask: u32,
    pub stencil_reference: u8,
}

impl StateBundle {
    /// Shader objects with their stage, skipping unused stages.
    pub fn shaders(&self) -> Vec<(ShaderStage, ComPtr)> {
        [
            (ShaderStage::VERTEX, self.vertex_shader),
            (ShaderStage::HULL, self.hull_shader),
            (ShaderStage::DOMAIN, self.domain_shader),
            (ShaderStage::GEOMETRY, self.geometry_shader),
            (ShaderStage::PIXEL, self.pixel_shader),
            (ShaderStage::COMPUTE, self.compute_shader),
        ]
        .into_iter()
        .filter(|(_, shader)| !shader.is_null())
        .collect()
    }

    pub fn states(&self) -> Vec<(StateObject, ComPtr)> {
        [
            (StateObject::InputLayout, self.input_layout),
            (StateObject::Blend, self.blend_state),
            (StateObject::Rasterizer, self.rasterizer_state),
            (StateObject::DepthStencil, self.depth_stencil_state),
        ]
        .into_iter()
        .filter(|(_, state)| !state.is_null())
        .collect()
    }

    /// Every object the bundle holds a reference to.
    pub fn objects(&self) -> impl Iterator<Item = ComPtr> {
        [
            self.vertex_shader,
            self.hull_shader,
            self.domain_shader,
            self.geometry_shader,
            self.pixel_shader,
            self.compute_shader,
            self.input_layout,
            self.blend_state,
            self.rasterizer_state,
            self.depth_stencil_state,
        ]
        .into_iter()
        .filter(|object| !object.is_null())
    }

    pub fn stages(&self) -> ShaderStage {
        self.shaders()
            .into_iter()
            .fold(ShaderStage::empty(), |stages, (stage, _)| stages | stage)
    }
}

/// Objects created so far; dropping the guard releases them.
struct TransientObjects<'a> {
    driver: &'a dyn D3D11Driver,
    objects: Vec<ComPtr>,
}

impl TransientObjects<'_> {
    fn push(&mut self, object: ComPtr) -> ComPtr {
        self.objects.push(object);
        object
    }

    fn finish(mut self) {
        self.objects.clear();
    }
}

impl Drop for TransientObjects<'_> {
    fn drop(&mut self) {
        for object in self.objects.drain(..).rev() {
            self.driver.release(object);
        }
    }
}

/// Create the objects of a pipeline.
///
/// Every object created before a failure is released again.
pub fn build_pipeline(driver: &dyn D3D11Driver, desc: &PipelineDesc) -> ApiResult<StateBundle> {
    let mut transient = TransientObjects {
        driver,
        objects: Vec::new(),
    };
    let bundle = match desc {
        PipelineDesc::Compute(compute) => {
            if compute.cs.is_empty() {
                return Err(ApiError::InvalidParameter("compute pipeline without a shader".into()));
            }
            let shader = driver
                .create_shader(ShaderStage::COMPUTE, &compute.cs.code)
                .map_err(hresult_to_api_error)?;
            StateBundle {
                compute_shader: transient.push(shader),
                ..Default::default()
            }
        }
        PipelineDesc::Graphics(graphics) => build_graphics(driver, graphics, &mut transient)?,
    };
    transient.finish();
    Ok(bundle)
}

fn build_graphics(
    driver: &dyn D3D11Driver,
    desc: &GraphicsPipelineDesc,
    transient: &mut TransientObjects<'_>,
) -> ApiResult<StateBundle> {
    if driver.api() == lumen_core::GraphicsApi::D3D10
        && (!desc.hs.is_empty() || !desc.ds.is_empty())
    {
        return Err(ApiError::Unsupported("tessellation on Direct3D 10".into()));
    }
    // Translate everything first so invalid descriptions create nothing.
    let topology = convert_topology(desc.topology)
        .ok_or_else(|| ApiError::Unsupported(format!("topology {:?}", desc.topology)))?;
    let elements = convert_input_layout(&desc.input_layout)?;
    let blend = convert_blend_state(&desc.blend);
    let rasterizer = convert_rasterizer_state(&desc.rasterizer)?;
    let depth_stencil = convert_depth_stencil_state(&desc.depth_stencil);
    if !elements.is_empty() && desc.vs.is_empty() {
        return Err(ApiError::InvalidParameter(
            "input layout without a vertex shader".into(),
        ));
    }

    let mut bundle = StateBundle {
        topology,
        blend_constant: desc.blend.blend_constant,
        sample_mask: desc.sample_mask,
        stencil_reference: desc.depth_stencil.stencil_reference,
        ..Default::default()
    };
    for (stage, shader) in desc.shaders() {
        let object = driver
            .create_shader(stage, &shader.code)
            .map_err(hresult_to_api_error)?;
        let object = transient.push(object);
        let slot = if stage == ShaderStage::VERTEX {
            &mut bundle.vertex_shader
        } else if stage == ShaderStage::HULL {
            &mut bundle.hull_shader
        } else if stage == ShaderStage::DOMAIN {
            &mut bundle.domain_shader
        } else if stage == ShaderStage::GEOMETRY {
            &mut bundle.geometry_shader
        } else {
            &mut bundle.pixel_shader
        };
        *slot = object;
    }
    if !elements.is_empty() {
        let layout = driver
            .create_input_layout(&elements, &desc.vs.code)
            .map_err(hresult_to_api_error)?;
        bundle.input_layout = transient.push(layout);
    }
    let state = driver.create_blend_state(&blend).map_err(hresult_to_api_error)?;
    bundle.blend_state = transient.push(state);
    let state = driver
        .create_rasterizer_state(&rasterizer)
        .map_err(hresult_to_api_error)?;
    bundle.rasterizer_state = transient.push(state);
    let state = driver
        .create_depth_stencil_state(&depth_stencil)
        .map_err(hresult_to_api_error)?;
    bundle.depth_stencil_state = transient.push(state);
    Ok(bundle)
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::com::ComDriver;
    use crate::backend::d3d11::dummy::DummyD3D11;
    use lumen_core::pipeline::{ComputePipelineDesc, FillMode, InputElement, ShaderDesc};
    use lumen_core::Format;

    fn pipeline_desc() -> PipelineDesc {
        PipelineDesc::Graphics(Box::new(GraphicsPipelineDesc {
            vs: ShaderDesc::new(vec![0x44, 0x58, 0x42, 0x43]),
            ps: ShaderDesc::new(vec![0x44, 0x58, 0x42, 0x43]),
            input_layout: vec![InputElement {
                semantic: "POSITION".into(),
                format: Format::R32G32B32Float,
                ..Default::default()
            }],
            ..Default::default()
        }))
    }

    const KINDS: [&str; 6] = [
        "vertex shader",
        "pixel shader",
        "input layout",
        "blend state",
        "rasterizer state",
        "depth-stencil state",
    ];

    #[test]
    fn test_build_pipeline_creates_bundle() {
        let driver = DummyD3D11::new(64, 64);
        let bundle = build_pipeline(&driver, &pipeline_desc()).unwrap();
        assert_eq!(bundle.objects().count(), 6);
        assert_eq!(bundle.stages(), ShaderStage::VERTEX | ShaderStage::PIXEL);
        assert_eq!(bundle.sample_mask, u32::MAX);
        for object in bundle.objects() {
            driver.release(object);
        }
        for kind in KINDS {
            assert_eq!(driver.objects().live_of_kind(kind), 0, "{kind}");
        }
    }

    #[test]
    fn test_partial_failure_releases_created_objects() {
        for successes in 0..6 {
            let driver = DummyD3D11::new(64, 64);
            let baseline = driver.objects().live_count();
            driver.objects().fail_after(successes);
            let result = build_pipeline(&driver, &pipeline_desc());
            assert_eq!(result, Err(ApiError::OutOfMemory));
            assert_eq!(driver.objects().live_count(), baseline, "after {successes} objects");
        }
    }

    #[test]
    fn test_invalid_state_creates_nothing() {
        let driver = DummyD3D11::new(64, 64);
        let baseline = driver.objects().live_count();
        let PipelineDesc::Graphics(mut desc) = pipeline_desc() else {
            unreachable!()
        };
        desc.rasterizer.fill_mode = FillMode::Point;
        let result = build_pipeline(&driver, &PipelineDesc::Graphics(desc));
        assert!(matches!(result, Err(ApiError::Unsupported(_))));
        assert_eq!(driver.objects().live_count(), baseline);
    }

    #[test]
    fn test_compute_pipeline() {
        let driver = DummyD3D11::new(64, 64);
        let desc = PipelineDesc::Compute(ComputePipelineDesc {
            cs: ShaderDesc::new(vec![1, 2, 3, 4]),
            ..Default::default()
        });
        let bundle = build_pipeline(&driver, &desc).unwrap();
        assert_eq!(bundle.stages(), ShaderStage::COMPUTE);
        assert!(bundle.states().is_empty());
    }

    #[test]
    fn test_tessellation_rejected_on_d3d10() {
        let driver = DummyD3D11::new_d3d10(64, 64);
        let desc = PipelineDesc::Graphics(Box::new(GraphicsPipelineDesc {
            vs: ShaderDesc::new(vec![1]),
            hs: ShaderDesc::new(vec![1]),
            ..Default::default()
        }));
        assert!(matches!(
            build_pipeline(&driver, &desc),
            Err(ApiError::Unsupported(_))
        ));
    }
}
