//! In-memory GL driver for testing.
//!
//! Object names come from [`DummyObjects`]; every call that changes object
//! state is appended to a log so tests can check which native calls were
//! made and with what parameters.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use lumen_core::pipeline::ShaderDesc;
use lumen_core::SubresourceData;
use parking_lot::Mutex;

use super::conversion::{AttribFormat, SamplerParam};
use super::dispatch::{DefaultFramebuffer, GlDispatch, GlError, GlResult};
use super::gl::{self, GLbitfield, GLenum, GLint, GLuint};
use crate::backend::dummy::DummyObjects;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(0x0C00_0000);

/// Native call recorded by the dummy driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub name: &'static str,
    pub object: GLuint,
}

/// A GL context that only keeps books.
#[derive(Debug)]
pub struct DummyGl {
    context: u64,
    objects: DummyObjects,
    calls: Mutex<Vec<RecordedCall>>,
    texture_params: Mutex<HashMap<(GLuint, GLenum), Vec<GLint>>>,
    attached: Mutex<HashMap<GLuint, HashSet<GLuint>>>,
    separable: Mutex<HashSet<GLuint>>,
    uploads: Mutex<Vec<(GLuint, u32, u32, usize)>>,
    fail_storage: AtomicBool,
    fail_compile: AtomicBool,
    fail_link: AtomicBool,
    extensions: Vec<&'static str>,
    default_framebuffer: DefaultFramebuffer,
}

impl Default for DummyGl {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyGl {
    pub fn new() -> Self {
        let context = NEXT_CONTEXT.fetch_add(0x100, Ordering::Relaxed);
        log::trace!("DummyGl: creating context {context:#x}");
        Self {
            context,
            objects: DummyObjects::new(1),
            calls: Mutex::new(Vec::new()),
            texture_params: Mutex::new(HashMap::new()),
            attached: Mutex::new(HashMap::new()),
            separable: Mutex::new(HashSet::new()),
            uploads: Mutex::new(Vec::new()),
            fail_storage: AtomicBool::new(false),
            fail_compile: AtomicBool::new(false),
            fail_link: AtomicBool::new(false),
            extensions: vec![
                "GL_ARB_texture_view",
                "GL_ARB_texture_filter_anisotropic",
                "GL_ARB_blend_func_extended",
                "GL_ARB_viewport_array",
                "GL_ARB_copy_image",
            ],
            default_framebuffer: DefaultFramebuffer {
                color_format: gl::RGBA8,
                depth_format: gl::DEPTH24_STENCIL8,
                width: 800,
                height: 600,
                samples: 1,
            },
        }
    }

    pub fn objects(&self) -> &DummyObjects {
        &self.objects
    }

    /// Make storage allocations fail with `GL_OUT_OF_MEMORY`.
    pub fn fail_storage(&self, fail: bool) {
        self.fail_storage.store(fail, Ordering::Relaxed);
    }

    pub fn fail_compile(&self, fail: bool) {
        self.fail_compile.store(fail, Ordering::Relaxed);
    }

    pub fn fail_link(&self, fail: bool) {
        self.fail_link.store(fail, Ordering::Relaxed);
    }

    /// Names of the recorded calls, oldest first.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(|call| call.name).collect()
    }

    /// Names of the recorded calls made on `object`, oldest first.
    pub fn calls_on(&self, object: GLuint) -> Vec<&'static str> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.object == object)
            .map(|call| call.name)
            .collect()
    }

    pub fn texture_parameter(&self, texture: GLuint, pname: GLenum) -> Option<Vec<GLint>> {
        self.texture_params.lock().get(&(texture, pname)).cloned()
    }

    pub fn is_separable(&self, program: GLuint) -> bool {
        self.separable.lock().contains(&program)
    }

    /// `(texture, level, layer, bytes)` of every upload, oldest first.
    pub fn uploads(&self) -> Vec<(GLuint, u32, u32, usize)> {
        self.uploads.lock().clone()
    }

    pub fn clear_log(&self) {
        self.calls.lock().clear();
        self.uploads.lock().clear();
    }

    fn record(&self, name: &'static str, object: GLuint) {
        self.calls.lock().push(RecordedCall { name, object });
    }

    fn create(&self, kind: &'static str) -> GlResult<GLuint> {
        let name = self
            .objects
            .allocate(kind)
            .ok_or(GlError(gl::OUT_OF_MEMORY))?;
        let name = name as GLuint;
        self.record(kind, name);
        Ok(name)
    }

    fn delete(&self, call: &'static str, names: &[GLuint]) {
        for &name in names {
            // Deleting name zero is silently ignored by GL.
            if name != 0 {
                self.record(call, name);
                self.objects.free(u64::from(name));
            }
        }
    }

    fn check_storage(&self) -> GlResult<()> {
        if self.fail_storage.load(Ordering::Relaxed) {
            Err(GlError(gl::OUT_OF_MEMORY))
        } else {
            Ok(())
        }
    }
}

impl GlDispatch for DummyGl {
    fn context(&self) -> u64 {
        self.context
    }

    fn version(&self) -> (u32, u32) {
        (4, 6)
    }

    fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains(&name)
    }

    fn internal_format_query(&self, _target: GLenum, internal_format: GLenum, pname: GLenum) -> GLint {
        if internal_format == gl::NONE {
            return 0;
        }
        match pname {
            gl::INTERNALFORMAT_SUPPORTED => 1,
            gl::SHADER_IMAGE_LOAD if internal_format == gl::DEPTH24_STENCIL8 => 0,
            _ => gl::FULL_SUPPORT,
        }
    }

    fn default_framebuffer(&self) -> DefaultFramebuffer {
        self.default_framebuffer
    }

    fn create_texture(&self, _target: GLenum) -> GlResult<GLuint> {
        self.create("texture")
    }

    fn texture_storage(
        &self,
        texture: GLuint,
        _target: GLenum,
        _levels: u32,
        _internal_format: GLenum,
        _width: u32,
        _height: u32,
        _depth: u32,
        _samples: u32,
    ) -> GlResult<()> {
        self.check_storage()?;
        self.record("glTextureStorage", texture);
        Ok(())
    }

    fn texture_sub_image(
        &self,
        texture: GLuint,
        _target: GLenum,
        level: u32,
        layer: u32,
        _width: u32,
        _height: u32,
        _depth: u32,
        _internal_format: GLenum,
        data: &SubresourceData<'_>,
    ) -> GlResult<()> {
        self.record("glTextureSubImage", texture);
        self.uploads.lock().push((texture, level, layer, data.data.len()));
        Ok(())
    }

    fn texture_view(
        &self,
        _target: GLenum,
        original: GLuint,
        _internal_format: GLenum,
        _first_level: u32,
        _levels: u32,
        _first_layer: u32,
        _layers: u32,
    ) -> GlResult<GLuint> {
        let view = self.create("texture")?;
        self.record("glTextureView", original);
        Ok(view)
    }

    fn texture_buffer(
        &self,
        buffer: GLuint,
        _internal_format: GLenum,
        _offset: u64,
        _size: u64,
    ) -> GlResult<GLuint> {
        let texture = self.create("texture")?;
        self.record("glTextureBufferRange", buffer);
        Ok(texture)
    }

    fn texture_parameters(&self, texture: GLuint, pname: GLenum, values: &[GLint]) {
        self.record("glTextureParameteriv", texture);
        self.texture_params
            .lock()
            .insert((texture, pname), values.to_vec());
    }

    fn delete_textures(&self, textures: &[GLuint]) {
        self.delete("glDeleteTextures", textures);
    }

    fn create_buffer(&self) -> GlResult<GLuint> {
        self.create("buffer")
    }

    fn buffer_storage(
        &self,
        buffer: GLuint,
        _size: u64,
        data: Option<&[u8]>,
        _flags: GLbitfield,
    ) -> GlResult<()> {
        self.check_storage()?;
        self.record("glNamedBufferStorage", buffer);
        if let Some(data) = data {
            self.uploads.lock().push((buffer, 0, 0, data.len()));
        }
        Ok(())
    }

    fn delete_buffers(&self, buffers: &[GLuint]) {
        self.delete("glDeleteBuffers", buffers);
    }

    fn create_renderbuffer(&self) -> GlResult<GLuint> {
        self.create("renderbuffer")
    }

    fn renderbuffer_storage(
        &self,
        renderbuffer: GLuint,
        _samples: u32,
        _internal_format: GLenum,
        _width: u32,
        _height: u32,
    ) -> GlResult<()> {
        self.check_storage()?;
        self.record("glNamedRenderbufferStorage", renderbuffer);
        Ok(())
    }

    fn delete_renderbuffers(&self, renderbuffers: &[GLuint]) {
        self.delete("glDeleteRenderbuffers", renderbuffers);
    }

    fn create_sampler(&self) -> GlResult<GLuint> {
        self.create("sampler")
    }

    fn sampler_parameter(&self, sampler: GLuint, _pname: GLenum, _value: SamplerParam) {
        self.record("glSamplerParameter", sampler);
    }

    fn delete_samplers(&self, samplers: &[GLuint]) {
        self.delete("glDeleteSamplers", samplers);
    }

    fn create_shader(&self, _ty: GLenum) -> GlResult<GLuint> {
        self.create("shader")
    }

    fn compile_shader(&self, shader: GLuint, desc: &ShaderDesc) -> Result<(), String> {
        self.record("glCompileShader", shader);
        if self.fail_compile.load(Ordering::Relaxed) || desc.code.is_empty() {
            return Err("0(1) : error C0000: syntax error".into());
        }
        Ok(())
    }

    fn delete_shader(&self, shader: GLuint) {
        self.delete("glDeleteShader", &[shader]);
    }

    fn create_program(&self) -> GlResult<GLuint> {
        self.create("program")
    }

    fn attach_shader(&self, program: GLuint, shader: GLuint) {
        self.record("glAttachShader", program);
        self.attached.lock().entry(program).or_default().insert(shader);
    }

    fn detach_shader(&self, program: GLuint, shader: GLuint) {
        self.record("glDetachShader", program);
        if let Some(shaders) = self.attached.lock().get_mut(&program) {
            shaders.remove(&shader);
        }
    }

    fn program_separable(&self, program: GLuint) {
        self.record("glProgramParameteri", program);
        self.separable.lock().insert(program);
    }

    fn link_program(&self, program: GLuint) -> Result<(), String> {
        self.record("glLinkProgram", program);
        if self.fail_link.load(Ordering::Relaxed) {
            return Err("error: vertex output does not match fragment input".into());
        }
        Ok(())
    }

    fn delete_program(&self, program: GLuint) {
        self.attached.lock().remove(&program);
        self.separable.lock().remove(&program);
        self.delete("glDeleteProgram", &[program]);
    }

    fn create_vertex_array(&self) -> GlResult<GLuint> {
        self.create("vertex array")
    }

    fn vertex_attrib_format(
        &self,
        vao: GLuint,
        _index: u32,
        _format: AttribFormat,
        _offset: u32,
        _binding: u32,
        _divisor: u32,
    ) {
        self.record("glVertexArrayAttribFormat", vao);
    }

    fn delete_vertex_arrays(&self, vaos: &[GLuint]) {
        self.delete("glDeleteVertexArrays", vaos);
    }
}
