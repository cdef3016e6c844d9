//! Pipeline state bundles.
//!
//! Direct3D 9 has no pipeline state objects. A pipeline created through the
//! abstract interface is a bundle of shader objects, a vertex declaration
//! and a state block that applies all of them together with the translated
//! render states. The state block is the pipeline handle.

use lumen_core::pipeline::{
    BlendState, DepthStencilState, GraphicsPipelineDesc, PipelineDesc,
    RasterizerState, StencilFace,
};
use lumen_core::{ApiError, ApiResult};

use super::conversion::*;
use super::driver::D3D9Driver;
use crate::backend::com::{hresult_to_api_error, ComPtr};

/// Native objects behind one pipeline handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateBundle {
    pub state_block: ComPtr,
    pub vertex_shader: ComPtr,
    pub pixel_shader: ComPtr,
    pub declaration: ComPtr,
}

impl StateBundle {
    /// Objects to release when the pipeline is destroyed, state block first.
    pub fn objects(&self) -> impl Iterator<Item = ComPtr> {
        [
            self.state_block,
            self.vertex_shader,
            self.pixel_shader,
            self.declaration,
        ]
        .into_iter()
        .filter(|object| !object.is_null())
    }
}

/// Objects created so far; dropping the guard releases them.
struct TransientObjects<'a> {
    driver: &'a dyn D3D9Driver,
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

/// Create the objects of a graphics pipeline.
///
/// Every object created before a failure is released again.
pub fn build_pipeline(driver: &dyn D3D9Driver, desc: &PipelineDesc) -> ApiResult<StateBundle> {
    let PipelineDesc::Graphics(desc) = desc else {
        return Err(ApiError::Unsupported("compute pipelines".into()));
    };
    if !desc.hs.is_empty() || !desc.ds.is_empty() || !desc.gs.is_empty() {
        return Err(ApiError::Unsupported(
            "hull, domain and geometry shaders".into(),
        ));
    }
    let render_states = convert_render_states(desc)?;
    let elements = convert_input_layout(&desc.input_layout)?;

    let mut transient = TransientObjects {
        driver,
        objects: Vec::new(),
    };
    let vertex_shader = if desc.vs.is_empty() {
        ComPtr::NULL
    } else {
        let shader = driver
            .create_vertex_shader(&desc.vs.code)
            .map_err(hresult_to_api_error)?;
        transient.push(shader)
    };
    let pixel_shader = if desc.ps.is_empty() {
        ComPtr::NULL
    } else {
        let shader = driver
            .create_pixel_shader(&desc.ps.code)
            .map_err(hresult_to_api_error)?;
        transient.push(shader)
    };
    let declaration = if elements.is_empty() {
        ComPtr::NULL
    } else {
        let declaration = driver
            .create_vertex_declaration(&elements)
            .map_err(hresult_to_api_error)?;
        transient.push(declaration)
    };
    let state_block = driver
        .record_state_block(vertex_shader, pixel_shader, declaration, &render_states)
        .map_err(hresult_to_api_error)?;

    transient.finish();
    Ok(StateBundle {
        state_block,
        vertex_shader,
        pixel_shader,
        declaration,
    })
}

// ============================================================================
// Render states
// ============================================================================

fn flag(value: bool) -> u32 {
    u32::from(value)
}

fn pack_color(color: [f32; 4]) -> u32 {
    let channel = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u32;
    channel(color[3]) << 24 | channel(color[0]) << 16 | channel(color[1]) << 8 | channel(color[2])
}

/// Render states that reproduce the fixed-function part of `desc`.
pub fn convert_render_states(desc: &GraphicsPipelineDesc) -> ApiResult<Vec<(u32, u32)>> {
    let mut states = Vec::with_capacity(48);
    convert_rasterizer_state(&desc.rasterizer, &mut states)?;
    convert_blend_state(&desc.blend, &mut states)?;
    convert_depth_stencil_state(
        &desc.depth_stencil,
        desc.rasterizer.front_counter_clockwise,
        &mut states,
    );
    states.push((D3DRS_MULTISAMPLEMASK, desc.sample_mask));
    Ok(states)
}

fn convert_rasterizer_state(state: &RasterizerState, states: &mut Vec<(u32, u32)>) -> ApiResult<()> {
    let cull = convert_cull_mode(state.cull_mode, state.front_counter_clockwise)
        .ok_or_else(|| ApiError::Unsupported(format!("cull mode {:?}", state.cull_mode)))?;
    states.extend([
        (D3DRS_FILLMODE, convert_fill_mode(state.fill_mode)),
        (D3DRS_CULLMODE, cull),
        (D3DRS_DEPTHBIAS, state.depth_bias.to_bits()),
        (D3DRS_SLOPESCALEDEPTHBIAS, state.slope_scaled_depth_bias.to_bits()),
        (D3DRS_SCISSORTESTENABLE, flag(state.scissor_enable)),
        (D3DRS_MULTISAMPLEANTIALIAS, flag(state.multisample_enable)),
        (D3DRS_ANTIALIASEDLINEENABLE, flag(state.antialiased_line_enable)),
    ]);
    Ok(())
}

fn convert_blend_state(state: &BlendState, states: &mut Vec<(u32, u32)>) -> ApiResult<()> {
    let target = &state.render_targets[0];
    if target.logic_op_enable {
        return Err(ApiError::Unsupported("logic operations".into()));
    }
    let factor = |factor| {
        convert_blend_factor(factor)
            .ok_or_else(|| ApiError::Unsupported(format!("blend factor {:?}", factor)))
    };
    states.extend([
        (D3DRS_ALPHABLENDENABLE, flag(target.blend_enable)),
        (D3DRS_SRCBLEND, factor(target.source_color)?),
        (D3DRS_DESTBLEND, factor(target.dest_color)?),
        (D3DRS_BLENDOP, convert_blend_op(target.color_op)),
        (D3DRS_SEPARATEALPHABLENDENABLE, 1),
        (D3DRS_SRCBLENDALPHA, factor(target.source_alpha)?),
        (D3DRS_DESTBLENDALPHA, factor(target.dest_alpha)?),
        (D3DRS_BLENDOPALPHA, convert_blend_op(target.alpha_op)),
        (D3DRS_BLENDFACTOR, pack_color(state.blend_constant)),
    ]);

    // Only the first four render targets have a write mask state.
    for (state_type, target) in [
        D3DRS_COLORWRITEENABLE,
        D3DRS_COLORWRITEENABLE1,
        D3DRS_COLORWRITEENABLE2,
        D3DRS_COLORWRITEENABLE3,
    ]
    .into_iter()
    .zip(&state.render_targets)
    {
        states.push((state_type, u32::from(target.write_mask.bits())));
    }
    Ok(())
}

fn convert_stencil_face(face: &StencilFace, ccw: bool) -> [(u32, u32); 4] {
    let (fail, depth_fail, pass, func) = if ccw {
        (
            D3DRS_CCW_STENCILFAIL,
            D3DRS_CCW_STENCILZFAIL,
            D3DRS_CCW_STENCILPASS,
            D3DRS_CCW_STENCILFUNC,
        )
    } else {
        (
            D3DRS_STENCILFAIL,
            D3DRS_STENCILZFAIL,
            D3DRS_STENCILPASS,
            D3DRS_STENCILFUNC,
        )
    };
    [
        (fail, convert_stencil_op(face.fail_op)),
        (depth_fail, convert_stencil_op(face.depth_fail_op)),
        (pass, convert_stencil_op(face.pass_op)),
        (func, convert_compare_op(face.func)),
    ]
}

fn convert_depth_stencil_state(
    state: &DepthStencilState,
    front_counter_clockwise: bool,
    states: &mut Vec<(u32, u32)>,
) {
    states.extend([
        (D3DRS_ZENABLE, flag(state.depth_enable)),
        (D3DRS_ZWRITEENABLE, flag(state.depth_write_enable)),
        (D3DRS_ZFUNC, convert_compare_op(state.depth_func)),
        (D3DRS_STENCILENABLE, flag(state.stencil_enable)),
        (D3DRS_TWOSIDEDSTENCILMODE, 1),
        (D3DRS_STENCILMASK, u32::from(state.stencil_read_mask)),
        (D3DRS_STENCILWRITEMASK, u32::from(state.stencil_write_mask)),
        (D3DRS_STENCILREF, u32::from(state.stencil_reference)),
    ]);
    // The plain stencil states apply to clockwise faces.
    states.extend(convert_stencil_face(&state.front, front_counter_clockwise));
    states.extend(convert_stencil_face(&state.back, !front_counter_clockwise));
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::pipeline::{BlendFactor, CompareOp, CullMode, ShaderDesc, StencilOp};

    fn state_value(states: &[(u32, u32)], state: u32) -> Option<u32> {
        states.iter().find(|(ty, _)| *ty == state).map(|(_, value)| *value)
    }

    #[test]
    fn test_default_render_states() {
        let states = convert_render_states(&GraphicsPipelineDesc::default()).unwrap();
        assert_eq!(state_value(&states, D3DRS_ZENABLE), Some(1));
        assert_eq!(state_value(&states, D3DRS_ZFUNC), Some(2));
        assert_eq!(state_value(&states, D3DRS_CULLMODE), Some(D3DCULL_CCW));
        assert_eq!(state_value(&states, D3DRS_COLORWRITEENABLE), Some(0xF));
        assert_eq!(state_value(&states, D3DRS_MULTISAMPLEMASK), Some(u32::MAX));
    }

    #[test]
    fn test_stencil_faces_follow_winding() {
        let mut desc = GraphicsPipelineDesc::default();
        desc.depth_stencil.front.pass_op = StencilOp::Replace;
        desc.depth_stencil.back.func = CompareOp::Never;
        desc.rasterizer.front_counter_clockwise = true;
        let states = convert_render_states(&desc).unwrap();
        assert_eq!(state_value(&states, D3DRS_CCW_STENCILPASS), Some(3));
        assert_eq!(state_value(&states, D3DRS_STENCILFUNC), Some(1));
    }

    #[test]
    fn test_unsupported_states() {
        let mut desc = GraphicsPipelineDesc::default();
        desc.rasterizer.cull_mode = CullMode::FrontAndBack;
        assert!(convert_render_states(&desc).is_err());

        let mut desc = GraphicsPipelineDesc::default();
        desc.blend.render_targets[0].source_color = BlendFactor::Source1Color;
        assert!(convert_render_states(&desc).is_err());
    }

    #[cfg(feature = "dummy")]
    mod with_driver {
        use super::*;
        use crate::backend::com::ComDriver;
        use crate::backend::d3d9::driver::PresentParameters;
        use crate::backend::d3d9::dummy::DummyD3D9;

        fn pipeline_desc() -> PipelineDesc {
            PipelineDesc::Graphics(Box::new(GraphicsPipelineDesc {
                vs: ShaderDesc::new(vec![0x00, 0x03, 0xFE, 0xFF]),
                ps: ShaderDesc::new(vec![0x00, 0x03, 0xFF, 0xFF]),
                ..Default::default()
            }))
        }

        #[test]
        fn test_build_pipeline_creates_bundle() {
            let driver = DummyD3D9::new(&PresentParameters::default());
            let bundle = build_pipeline(&driver, &pipeline_desc()).unwrap();
            assert!(!bundle.vertex_shader.is_null());
            assert!(!bundle.pixel_shader.is_null());
            assert!(bundle.declaration.is_null());
            assert_eq!(bundle.objects().count(), 3);
            assert!(driver.render_states(bundle.state_block).is_some());
            for object in bundle.objects() {
                driver.release(object);
            }
            assert_eq!(driver.objects().live_of_kind("vertex shader"), 0);
        }

        #[test]
        fn test_partial_failure_releases_created_shaders() {
            let driver = DummyD3D9::new(&PresentParameters::default());
            driver.objects().fail_after(1);
            let result = build_pipeline(&driver, &pipeline_desc());
            assert_eq!(result, Err(ApiError::OutOfMemory));
            assert_eq!(driver.objects().live_of_kind("vertex shader"), 0);
            assert_eq!(driver.objects().live_of_kind("pixel shader"), 0);
            assert_eq!(driver.objects().live_of_kind("state block"), 0);
        }

        #[test]
        fn test_state_block_failure_releases_everything() {
            let driver = DummyD3D9::new(&PresentParameters::default());
            driver.objects().fail_after(2);
            assert!(build_pipeline(&driver, &pipeline_desc()).is_err());
            assert_eq!(driver.objects().live_of_kind("vertex shader"), 0);
            assert_eq!(driver.objects().live_of_kind("pixel shader"), 0);
        }

        #[test]
        fn test_geometry_shader_rejected() {
            let driver = DummyD3D9::new(&PresentParameters::default());
            let desc = PipelineDesc::Graphics(Box::new(GraphicsPipelineDesc {
                gs: ShaderDesc::new(vec![1, 2, 3, 4]),
                ..Default::default()
            }));
            assert!(matches!(
                build_pipeline(&driver, &desc),
                Err(ApiError::Unsupported(_))
            ));
            assert_eq!(driver.objects().live_of_kind("state block"), 0);
        }

        #[test]
        fn test_compute_pipeline_unsupported() {
            let driver = DummyD3D9::new(&PresentParameters::default());
            let desc = PipelineDesc::Compute(Default::default());
            assert!(matches!(
                build_pipeline(&driver, &desc),
                Err(ApiError::Unsupported(_))
            ));
        }
    }
}
