//! GL program and vertex array construction.
//!
//! A pipeline is a linked program object plus an optional vertex array
//! object for the input layout. The fixed-function part is converted once
//! into a [`GlPipelineState`] that is applied when the pipeline is bound.
//! Shader objects are transient: they are detached and deleted once the
//! program is linked or linking failed.

use lumen_core::pipeline::{
    BlendState, ColorWriteMask, DepthStencilState, GraphicsPipelineDesc, InputElement,
    PipelineDesc, RasterizerState, ShaderDesc, ShaderStage, StencilFace,
};
use lumen_core::render_pass::MAX_RENDER_TARGETS;
use lumen_core::{ApiError, ApiResult};

use super::conversion::*;
use super::dispatch::GlDispatch;
use super::gl::{GLenum, GLuint};

// ============================================================================
// Programs
// ============================================================================

/// Program and shader objects created for one pipeline.
///
/// Dropping the guard deletes the shaders, and the program too unless it
/// was taken with [`TransientProgram::finish`].
struct TransientProgram<'a> {
    dispatch: &'a dyn GlDispatch,
    program: GLuint,
    shaders: Vec<GLuint>,
}

impl TransientProgram<'_> {
    fn finish(mut self) -> GLuint {
        std::mem::take(&mut self.program)
    }
}

impl Drop for TransientProgram<'_> {
    fn drop(&mut self) {
        for shader in self.shaders.drain(..) {
            if self.program != 0 {
                self.dispatch.detach_shader(self.program, shader);
            }
            self.dispatch.delete_shader(shader);
        }
        if self.program != 0 {
            self.dispatch.delete_program(self.program);
        }
    }
}

/// Compile `shaders` and link them into a program.
///
/// A program holding only one graphics stage is made separable so it can be
/// combined with other stage programs in a program pipeline.
pub fn build_program<'s>(
    dispatch: &dyn GlDispatch,
    shaders: impl IntoIterator<Item = (ShaderStage, &'s ShaderDesc)>,
    separable: bool,
) -> ApiResult<GLuint> {
    let program = dispatch.create_program().map_err(api_error)?;
    let mut transient = TransientProgram {
        dispatch,
        program,
        shaders: Vec::new(),
    };

    for (stage, desc) in shaders {
        let ty = convert_shader_stage(stage)
            .ok_or_else(|| ApiError::InvalidParameter(format!("shader stage {:?}", stage)))?;
        let shader = dispatch.create_shader(ty).map_err(api_error)?;
        transient.shaders.push(shader);
        dispatch.compile_shader(shader, desc).map_err(|log| {
            log::warn!("Failed to compile {:?} shader: {}", stage, log);
            ApiError::InvalidParameter(format!("{:?} shader failed to compile", stage))
        })?;
        dispatch.attach_shader(program, shader);
    }
    if transient.shaders.is_empty() {
        return Err(ApiError::InvalidParameter("pipeline has no shader stages".into()));
    }

    if separable {
        dispatch.program_separable(program);
    }
    dispatch.link_program(program).map_err(|log| {
        log::warn!("Failed to link program {}: {}", program, log);
        ApiError::InvalidParameter("program failed to link".into())
    })?;

    for shader in transient.shaders.drain(..) {
        dispatch.detach_shader(program, shader);
        dispatch.delete_shader(shader);
    }
    Ok(transient.finish())
}

/// Vertex array object describing `elements`, or zero for an empty layout.
pub fn build_vertex_array(dispatch: &dyn GlDispatch, elements: &[InputElement]) -> ApiResult<GLuint> {
    if elements.is_empty() {
        return Ok(0);
    }
    let formats = elements
        .iter()
        .map(|element| {
            convert_attrib_format(element.format).ok_or_else(|| {
                ApiError::Unsupported(format!("vertex format {:?}", element.format))
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;

    let vao = dispatch.create_vertex_array().map_err(api_error)?;
    for (element, format) in elements.iter().zip(formats) {
        dispatch.vertex_attrib_format(
            vao,
            element.location,
            format,
            element.offset,
            element.buffer_binding,
            element.instance_step_rate,
        );
    }
    Ok(vao)
}

/// Build the program, vertex array and converted state of `desc`.
///
/// Every object created before a failure is deleted again.
pub fn build_pipeline(
    dispatch: &dyn GlDispatch,
    desc: &PipelineDesc,
) -> ApiResult<(GLuint, GLuint, Option<Box<GlPipelineState>>)> {
    match desc {
        PipelineDesc::Compute(desc) => {
            if desc.cs.is_empty() {
                return Err(ApiError::InvalidParameter(
                    "compute pipelines need a compute shader".into(),
                ));
            }
            let program = build_program(dispatch, [(ShaderStage::COMPUTE, &desc.cs)], false)?;
            Ok((program, 0, None))
        }
        PipelineDesc::Graphics(desc) => {
            let separable = desc.shaders().count() == 1;
            let program = build_program(dispatch, desc.shaders(), separable)?;
            let vao = match build_vertex_array(dispatch, &desc.input_layout) {
                Ok(vao) => vao,
                Err(error) => {
                    dispatch.delete_program(program);
                    return Err(error);
                }
            };
            Ok((program, vao, Some(Box::new(GlPipelineState::new(desc)))))
        }
    }
}

// ============================================================================
// Fixed-function state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlBlendTarget {
    pub enable: bool,
    pub src_color: GLenum,
    pub dst_color: GLenum,
    pub color_equation: GLenum,
    pub src_alpha: GLenum,
    pub dst_alpha: GLenum,
    pub alpha_equation: GLenum,
    /// `glColorMaski` red, green, blue, alpha.
    pub write_mask: [bool; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlStencilFace {
    pub func: GLenum,
    pub fail: GLenum,
    pub depth_fail: GLenum,
    pub pass: GLenum,
}

impl GlStencilFace {
    fn new(face: &StencilFace) -> Self {
        Self {
            func: convert_compare_op(face.func),
            fail: convert_stencil_op(face.fail_op),
            depth_fail: convert_stencil_op(face.depth_fail_op),
            pass: convert_stencil_op(face.pass_op),
        }
    }
}

/// Fixed-function state of a graphics pipeline in GL terms.
#[derive(Debug, Clone, PartialEq)]
pub struct GlPipelineState {
    pub topology: GLenum,
    /// Vertices per patch for `GL_PATCHES`, otherwise zero.
    pub patch_vertices: u32,
    pub sample_mask: u32,
    pub alpha_to_coverage: bool,
    pub blend_constant: [f32; 4],
    pub blend: [GlBlendTarget; MAX_RENDER_TARGETS],
    /// Logic op of the first render target, if enabled.
    pub logic_op: Option<GLenum>,
    pub polygon_mode: GLenum,
    /// `None` disables face culling.
    pub cull_face: Option<GLenum>,
    pub front_face: GLenum,
    pub depth_clamp: bool,
    pub scissor_test: bool,
    pub multisample: bool,
    pub line_smooth: bool,
    /// Polygon offset factor, units and clamp.
    pub polygon_offset: [f32; 3],
    pub depth_test: bool,
    pub depth_mask: bool,
    pub depth_func: GLenum,
    pub stencil_test: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub stencil_reference: u8,
    pub stencil_front: GlStencilFace,
    pub stencil_back: GlStencilFace,
}

impl GlPipelineState {
    pub fn new(desc: &GraphicsPipelineDesc) -> Self {
        let (topology, patch_vertices) = convert_primitive_topology(desc.topology);
        let BlendState {
            alpha_to_coverage_enable,
            blend_constant,
            render_targets,
        } = &desc.blend;
        let RasterizerState {
            fill_mode,
            cull_mode,
            front_counter_clockwise,
            depth_bias,
            depth_bias_clamp,
            slope_scaled_depth_bias,
            depth_clip_enable,
            scissor_enable,
            multisample_enable,
            antialiased_line_enable,
        } = desc.rasterizer;
        let depth_stencil: &DepthStencilState = &desc.depth_stencil;

        let blend = render_targets.map(|target| GlBlendTarget {
            enable: target.blend_enable,
            src_color: convert_blend_factor(target.source_color),
            dst_color: convert_blend_factor(target.dest_color),
            color_equation: convert_blend_op(target.color_op),
            src_alpha: convert_blend_factor(target.source_alpha),
            dst_alpha: convert_blend_factor(target.dest_alpha),
            alpha_equation: convert_blend_op(target.alpha_op),
            write_mask: [
                target.write_mask.contains(ColorWriteMask::RED),
                target.write_mask.contains(ColorWriteMask::GREEN),
                target.write_mask.contains(ColorWriteMask::BLUE),
                target.write_mask.contains(ColorWriteMask::ALPHA),
            ],
        });
        let first = &render_targets[0];

        Self {
            topology,
            patch_vertices,
            sample_mask: desc.sample_mask,
            alpha_to_coverage: *alpha_to_coverage_enable,
            blend_constant: *blend_constant,
            blend,
            logic_op: first
                .logic_op_enable
                .then(|| convert_logic_op(first.logic_op)),
            polygon_mode: convert_fill_mode(fill_mode),
            cull_face: convert_cull_mode(cull_mode),
            front_face: if front_counter_clockwise {
                super::gl::CCW
            } else {
                super::gl::CW
            },
            depth_clamp: !depth_clip_enable,
            scissor_test: scissor_enable,
            multisample: multisample_enable,
            line_smooth: antialiased_line_enable,
            polygon_offset: [slope_scaled_depth_bias, depth_bias, depth_bias_clamp],
            depth_test: depth_stencil.depth_enable,
            depth_mask: depth_stencil.depth_write_enable,
            depth_func: convert_compare_op(depth_stencil.depth_func),
            stencil_test: depth_stencil.stencil_enable,
            stencil_read_mask: depth_stencil.stencil_read_mask,
            stencil_write_mask: depth_stencil.stencil_write_mask,
            stencil_reference: depth_stencil.stencil_reference,
            stencil_front: GlStencilFace::new(&depth_stencil.front),
            stencil_back: GlStencilFace::new(&depth_stencil.back),
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::opengl::dummy::DummyGl;
    use crate::backend::opengl::gl;
    use lumen_core::pipeline::{ComputePipelineDesc, CullMode, PrimitiveTopology};
    use lumen_core::Format;

    fn graphics_desc() -> GraphicsPipelineDesc {
        GraphicsPipelineDesc {
            vs: ShaderDesc::new(b"#version 450\nvoid main() {}".to_vec()),
            ps: ShaderDesc::new(b"#version 450\nvoid main() {}".to_vec()),
            ..Default::default()
        }
    }

    #[test]
    fn test_program_keeps_only_program() {
        let dummy = DummyGl::new();
        let (program, vao, state) =
            build_pipeline(&dummy, &PipelineDesc::Graphics(Box::new(graphics_desc()))).unwrap();
        assert_ne!(program, 0);
        assert_eq!(vao, 0);
        assert!(state.is_some());
        assert_eq!(dummy.objects().live_of_kind("shader"), 0);
        assert_eq!(dummy.objects().live_count(), 1);
        assert!(!dummy.is_separable(program));
    }

    #[test]
    fn test_single_stage_program_is_separable() {
        let dummy = DummyGl::new();
        let desc = GraphicsPipelineDesc {
            ps: ShaderDesc::new(b"void main() {}".to_vec()),
            ..Default::default()
        };
        let (program, _, _) = build_pipeline(&dummy, &PipelineDesc::Graphics(Box::new(desc))).unwrap();
        assert!(dummy.is_separable(program));
    }

    #[test]
    fn test_compute_program_not_separable() {
        let dummy = DummyGl::new();
        let desc = PipelineDesc::Compute(ComputePipelineDesc {
            cs: ShaderDesc::new(b"void main() {}".to_vec()),
            ..Default::default()
        });
        let (program, vao, state) = build_pipeline(&dummy, &desc).unwrap();
        assert!(!dummy.is_separable(program));
        assert_eq!(vao, 0);
        assert!(state.is_none());
    }

    #[test]
    fn test_compile_failure_releases_everything() {
        let dummy = DummyGl::new();
        dummy.fail_compile(true);
        let result = build_pipeline(&dummy, &PipelineDesc::Graphics(Box::new(graphics_desc())));
        assert!(matches!(result, Err(ApiError::InvalidParameter(_))));
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_link_failure_releases_everything() {
        let dummy = DummyGl::new();
        dummy.fail_link(true);
        let result = build_pipeline(&dummy, &PipelineDesc::Graphics(Box::new(graphics_desc())));
        assert!(result.is_err());
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_shader_allocation_failure_releases_program() {
        let dummy = DummyGl::new();
        // Program and first shader succeed, second shader fails.
        dummy.objects().fail_after(2);
        let result = build_pipeline(&dummy, &PipelineDesc::Graphics(Box::new(graphics_desc())));
        assert_eq!(result, Err(ApiError::OutOfMemory));
        dummy.objects().clear_failures();
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_vertex_array_failure_releases_program() {
        let dummy = DummyGl::new();
        let desc = GraphicsPipelineDesc {
            input_layout: vec![InputElement {
                format: Format::Bc1Unorm,
                ..Default::default()
            }],
            ..graphics_desc()
        };
        let result = build_pipeline(&dummy, &PipelineDesc::Graphics(Box::new(desc)));
        assert!(matches!(result, Err(ApiError::Unsupported(_))));
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_input_layout_creates_vertex_array() {
        let dummy = DummyGl::new();
        let desc = GraphicsPipelineDesc {
            input_layout: vec![
                InputElement {
                    location: 0,
                    format: Format::R32G32B32Float,
                    stride: 20,
                    ..Default::default()
                },
                InputElement {
                    location: 1,
                    format: Format::R32G32Float,
                    offset: 12,
                    stride: 20,
                    ..Default::default()
                },
            ],
            ..graphics_desc()
        };
        let (_, vao, _) = build_pipeline(&dummy, &PipelineDesc::Graphics(Box::new(desc))).unwrap();
        assert_ne!(vao, 0);
        assert_eq!(dummy.calls_on(vao).iter().filter(|c| **c == "glVertexArrayAttribFormat").count(), 2);
    }

    #[test]
    fn test_state_conversion() {
        let mut desc = graphics_desc();
        desc.topology = PrimitiveTopology::PatchList(4);
        desc.rasterizer.cull_mode = CullMode::None;
        desc.rasterizer.front_counter_clockwise = true;
        desc.rasterizer.depth_clip_enable = false;
        desc.blend.render_targets[0].write_mask = ColorWriteMask::RED | ColorWriteMask::ALPHA;
        let state = GlPipelineState::new(&desc);
        assert_eq!((state.topology, state.patch_vertices), (gl::PATCHES, 4));
        assert_eq!(state.cull_face, None);
        assert_eq!(state.front_face, gl::CCW);
        assert!(state.depth_clamp);
        assert_eq!(state.blend[0].write_mask, [true, false, false, true]);
        assert_eq!(state.depth_func, gl::LESS);
        assert_eq!(state.logic_op, None);
    }
}
