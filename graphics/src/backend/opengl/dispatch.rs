//! GL driver entry points used by the layer.
//!
//! [`GlDispatch`] covers the calls the abstract device makes for objects it
//! creates itself, plus the context queries needed to describe the default
//! framebuffer and answer capability checks. Entry points the application
//! calls are forwarded by the hooks through the trampolines the injection
//! shim hands them, so they do not appear here.
//!
//! Object creation uses the direct state access entry points, so the layer
//! never disturbs the application's bindings.

use lumen_core::pipeline::ShaderDesc;
use lumen_core::SubresourceData;

use super::conversion::{AttribFormat, SamplerParam};
use super::gl::{GLbitfield, GLenum, GLint, GLuint};

/// A GL error code reported by `glGetError` after a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("GL error {0:#06x}")]
pub struct GlError(pub GLenum);

pub type GlResult<T> = Result<T, GlError>;

/// Pixel formats and size of a context's default framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultFramebuffer {
    pub color_format: GLenum,
    /// Zero if the pixel format has no depth or stencil buffer.
    pub depth_format: GLenum,
    pub width: u32,
    pub height: u32,
    pub samples: u32,
}

/// Entry points of one GL context (share group) as the layer sees them.
pub trait GlDispatch: Send + Sync {
    /// Rendering context the entry points were loaded for.
    fn context(&self) -> u64;
    /// `(major, minor)` version of the context.
    fn version(&self) -> (u32, u32);
    fn has_extension(&self, name: &str) -> bool;
    /// `glGetInternalformativ` with a single result value.
    fn internal_format_query(&self, target: GLenum, internal_format: GLenum, pname: GLenum) -> GLint;
    fn default_framebuffer(&self) -> DefaultFramebuffer;

    // Textures
    fn create_texture(&self, target: GLenum) -> GlResult<GLuint>;
    #[allow(clippy::too_many_arguments)]
    fn texture_storage(
        &self,
        texture: GLuint,
        target: GLenum,
        levels: u32,
        internal_format: GLenum,
        width: u32,
        height: u32,
        depth: u32,
        samples: u32,
    ) -> GlResult<()>;
    /// Upload one subresource. `layer` selects the array layer or cube face.
    #[allow(clippy::too_many_arguments)]
    fn texture_sub_image(
        &self,
        texture: GLuint,
        target: GLenum,
        level: u32,
        layer: u32,
        width: u32,
        height: u32,
        depth: u32,
        internal_format: GLenum,
        data: &SubresourceData<'_>,
    ) -> GlResult<()>;
    /// `glGenTextures` followed by `glTextureView`.
    #[allow(clippy::too_many_arguments)]
    fn texture_view(
        &self,
        target: GLenum,
        original: GLuint,
        internal_format: GLenum,
        first_level: u32,
        levels: u32,
        first_layer: u32,
        layers: u32,
    ) -> GlResult<GLuint>;
    /// Buffer texture over a range of `buffer`.
    fn texture_buffer(
        &self,
        buffer: GLuint,
        internal_format: GLenum,
        offset: u64,
        size: u64,
    ) -> GlResult<GLuint>;
    fn texture_parameters(&self, texture: GLuint, pname: GLenum, values: &[GLint]);
    fn delete_textures(&self, textures: &[GLuint]);

    // Buffers
    fn create_buffer(&self) -> GlResult<GLuint>;
    fn buffer_storage(
        &self,
        buffer: GLuint,
        size: u64,
        data: Option<&[u8]>,
        flags: GLbitfield,
    ) -> GlResult<()>;
    fn delete_buffers(&self, buffers: &[GLuint]);

    // Renderbuffers
    fn create_renderbuffer(&self) -> GlResult<GLuint>;
    fn renderbuffer_storage(
        &self,
        renderbuffer: GLuint,
        samples: u32,
        internal_format: GLenum,
        width: u32,
        height: u32,
    ) -> GlResult<()>;
    fn delete_renderbuffers(&self, renderbuffers: &[GLuint]);

    // Samplers
    fn create_sampler(&self) -> GlResult<GLuint>;
    fn sampler_parameter(&self, sampler: GLuint, pname: GLenum, value: SamplerParam);
    fn delete_samplers(&self, samplers: &[GLuint]);

    // Shaders and programs
    fn create_shader(&self, ty: GLenum) -> GlResult<GLuint>;
    /// Load SPIR-V or GLSL source and compile it. Returns the info log on failure.
    fn compile_shader(&self, shader: GLuint, desc: &ShaderDesc) -> Result<(), String>;
    fn delete_shader(&self, shader: GLuint);
    fn create_program(&self) -> GlResult<GLuint>;
    fn attach_shader(&self, program: GLuint, shader: GLuint);
    fn detach_shader(&self, program: GLuint, shader: GLuint);
    fn program_separable(&self, program: GLuint);
    /// Link a program. Returns the info log on failure.
    fn link_program(&self, program: GLuint) -> Result<(), String>;
    fn delete_program(&self, program: GLuint);

    // Vertex arrays
    fn create_vertex_array(&self) -> GlResult<GLuint>;
    fn vertex_attrib_format(
        &self,
        vao: GLuint,
        index: u32,
        format: AttribFormat,
        offset: u32,
        binding: u32,
        divisor: u32,
    );
    fn delete_vertex_arrays(&self, vaos: &[GLuint]);
}

