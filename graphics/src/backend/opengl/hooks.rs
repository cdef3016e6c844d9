//! Intercepted OpenGL entry points.
//!
//! The injection shim exports the GL and WGL functions, resolves the
//! implicit current context and calls the hooks here. Each hook receives the
//! driver call as a `next` closure: the hook runs the add-on events around
//! it and updates the registry only after the driver reported success.
//!
//! GL object names are chosen by the application, so add-ons cannot replace
//! application objects; the create events are only fired for objects the
//! layer creates through [`GlDevice`].

use std::cell::Cell;
use std::sync::Arc;

use lumen_core::events::{ClearValues, Rect, TextureRegion, Viewport};
use lumen_core::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc, PipelineDesc, ShaderStage};
use lumen_core::render_pass::AttachmentType;
use lumen_core::{DeviceApi, Resource, ResourceDesc, ResourceUsage, ResourceView};

use super::context::GlContext;
use super::conversion::*;
use super::device::{GlDevice, NameSpace};
use super::dispatch::{GlDispatch, GlResult};
use super::gl::{self, GLbitfield, GLenum, GLint, GLsizei, GLuint};
use super::handle::GlHandle;
use crate::service::LayerService;

thread_local! {
    /// `HGLRC` current on this thread, zero if none.
    static CURRENT: Cell<u64> = const { Cell::new(0) };
}

/// Context current on the calling thread.
pub fn current_context(service: &LayerService) -> Option<Arc<GlContext>> {
    let hglrc = CURRENT.with(Cell::get);
    if hglrc == 0 {
        return None;
    }
    service.opengl.contexts.get(hglrc)
}

fn current_or_log(service: &LayerService, call: &str) -> Option<Arc<GlContext>> {
    let context = current_context(service);
    if context.is_none() {
        log::debug!("{} called without a current context", call);
    }
    context
}

// ============================================================================
// Contexts
// ============================================================================

/// Track a context the driver just created.
///
/// Contexts created with `share` join the share group of that context and
/// use its device; other contexts get a new device.
pub fn on_context_created(
    service: &LayerService,
    dispatch: Arc<dyn GlDispatch>,
    hglrc: u64,
    hdc: u64,
    share: Option<u64>,
) -> Arc<GlContext> {
    let shared = share
        .and_then(|share| service.opengl.contexts.get(share))
        .map(|context| Arc::clone(context.device()));
    let created = shared.is_none();
    let device = shared.unwrap_or_else(|| {
        let device = Arc::new(GlDevice::new(
            dispatch,
            Arc::clone(service.addons()),
            service.config().clone(),
        ));
        service.opengl.devices.insert(hglrc, Arc::clone(&device));
        device
    });
    device.attach_context();

    let context = Arc::new(GlContext::new(hglrc, hdc, Arc::clone(&device)));
    service.opengl.contexts.insert(hglrc, Arc::clone(&context));

    let api: &dyn DeviceApi = device.as_ref();
    if created {
        device.addons().notify(|addon| addon.on_init_device(api));
    }
    let queue = context.command_queue();
    let swapchain = context.swapchain();
    device.addons().notify(|addon| {
        addon.on_init_command_queue(api, queue);
        addon.on_init_swapchain(api, swapchain);
    });
    context
}

/// `wglMakeCurrent`. A zero `hglrc` releases the thread's context.
pub fn make_current(service: &LayerService, hglrc: u64) {
    let hglrc = if hglrc != 0 && service.opengl.contexts.require(hglrc).is_err() {
        0
    } else {
        hglrc
    };
    CURRENT.with(|current| current.set(hglrc));
}

/// Fire the destroy events of a context before `wglDeleteContext`.
///
/// The share group's device goes away with its last context.
pub fn on_context_destroyed(service: &LayerService, hglrc: u64) {
    let Some(context) = service.opengl.contexts.remove(hglrc) else {
        return;
    };
    CURRENT.with(|current| {
        if current.get() == hglrc {
            current.set(0);
        }
    });
    context.reset();

    let device = Arc::clone(context.device());
    let api: &dyn DeviceApi = device.as_ref();
    let queue = context.command_queue();
    let swapchain = context.swapchain();
    device.addons().notify(|addon| {
        addon.on_destroy_swapchain(api, swapchain);
        addon.on_destroy_command_queue(api, queue);
    });

    if device.detach_context() == 0 {
        service
            .opengl
            .devices
            .retain(|_, tracked| !Arc::ptr_eq(tracked, &device));
        device.addons().notify(|addon| addon.on_destroy_device(api));
        device.release_all();
    }
}

// ============================================================================
// Resources
// ============================================================================

fn notify_init_resource(device: &GlDevice, handle: GlHandle, desc: &ResourceDesc) {
    let api: &dyn DeviceApi = device;
    let resource = handle.resource();
    device.addons().notify(|addon| {
        addon.on_init_resource(api, desc, None, ResourceUsage::UNDEFINED, resource)
    });
}

/// `glTexStorage*` and `glTextureStorage*`.
#[allow(clippy::too_many_arguments)]
pub fn texture_storage(
    service: &LayerService,
    target: GLenum,
    texture: GLuint,
    levels: u32,
    internal_format: GLenum,
    width: u32,
    height: u32,
    depth: u32,
    samples: u32,
    next: impl FnOnce() -> GlResult<()>,
) -> GlResult<()> {
    let context = current_or_log(service, "glTexStorage");
    let result = next();
    let Some(context) = context else {
        return result;
    };
    let device = context.device();
    if let Err(error) = result {
        device.log_failure("glTexStorage", error);
        return Err(error);
    }
    let Some(desc) = describe_texture(target, levels, internal_format, width, height, depth, samples) else {
        log::debug!("glTexStorage: untracked target {:#x}", target);
        return Ok(());
    };
    let handle = GlHandle::new(target, texture);
    device.register_texture(handle, desc, internal_format);
    notify_init_resource(device, handle, &desc);
    Ok(())
}

/// `glTexImage*`. Level 0 (re)specifies the texture, other levels extend
/// its mip chain.
#[allow(clippy::too_many_arguments)]
pub fn texture_image(
    service: &LayerService,
    target: GLenum,
    texture: GLuint,
    level: u32,
    internal_format: GLenum,
    width: u32,
    height: u32,
    depth: u32,
    next: impl FnOnce() -> GlResult<()>,
) -> GlResult<()> {
    let context = current_or_log(service, "glTexImage");
    let result = next();
    let Some(context) = context else {
        return result;
    };
    let device = context.device();
    result.inspect_err(|error| device.log_failure("glTexImage", *error))?;

    // Cube faces are specified one at a time on the cube map.
    let (target, face_layers) = match target {
        gl::TEXTURE_CUBE_MAP_POSITIVE_X..=gl::TEXTURE_CUBE_MAP_NEGATIVE_Z => (gl::TEXTURE_CUBE_MAP, 1),
        _ => (target, depth),
    };
    let handle = GlHandle::new(target, texture);
    if level > 0 {
        device.grow_texture_levels(handle, level);
        return Ok(());
    }
    let Some(desc) = describe_texture(target, 1, internal_format, width, height, face_layers, 1) else {
        return Ok(());
    };
    if device.get_resource_desc(handle.resource()) == Some(desc) {
        return Ok(());
    }
    device.register_texture(handle, desc, internal_format);
    notify_init_resource(device, handle, &desc);
    Ok(())
}

/// `glBufferStorage` and `glNamedBufferStorage`.
pub fn buffer_storage(
    service: &LayerService,
    target: GLenum,
    buffer: GLuint,
    size: u64,
    flags: GLbitfield,
    next: impl FnOnce() -> GlResult<()>,
) -> GlResult<()> {
    let context = current_or_log(service, "glBufferStorage");
    let result = next();
    let Some(context) = context else {
        return result;
    };
    let device = context.device();
    result.inspect_err(|error| device.log_failure("glBufferStorage", *error))?;
    let handle = GlHandle::new(target, buffer);
    let desc = describe_buffer(target, size, flags);
    device.register_buffer(handle, desc);
    notify_init_resource(device, handle, &desc);
    Ok(())
}

/// `glBufferData` and `glNamedBufferData`.
pub fn buffer_data(
    service: &LayerService,
    target: GLenum,
    buffer: GLuint,
    size: u64,
    usage_hint: GLenum,
    next: impl FnOnce() -> GlResult<()>,
) -> GlResult<()> {
    let context = current_or_log(service, "glBufferData");
    let result = next();
    let Some(context) = context else {
        return result;
    };
    let device = context.device();
    result.inspect_err(|error| device.log_failure("glBufferData", *error))?;
    let handle = GlHandle::new(target, buffer);
    let desc = describe_buffer_data(target, size, usage_hint);
    device.register_buffer(handle, desc);
    notify_init_resource(device, handle, &desc);
    Ok(())
}

/// `glRenderbufferStorage*`.
pub fn renderbuffer_storage(
    service: &LayerService,
    renderbuffer: GLuint,
    samples: u32,
    internal_format: GLenum,
    width: u32,
    height: u32,
    next: impl FnOnce() -> GlResult<()>,
) -> GlResult<()> {
    let context = current_or_log(service, "glRenderbufferStorage");
    let result = next();
    let Some(context) = context else {
        return result;
    };
    let device = context.device();
    result.inspect_err(|error| device.log_failure("glRenderbufferStorage", *error))?;
    let handle = GlHandle::new(gl::RENDERBUFFER, renderbuffer);
    let desc = describe_renderbuffer(internal_format, width, height, samples);
    device.register_texture(handle, desc, internal_format);
    notify_init_resource(device, handle, &desc);
    Ok(())
}

fn delete_names(service: &LayerService, space: NameSpace, names: &[GLuint]) {
    let Some(context) = current_or_log(service, "glDelete*") else {
        return;
    };
    let device = context.device();
    let api: &dyn DeviceApi = device.as_ref();
    for &name in names.iter().filter(|&&name| name != 0) {
        let Some(handle) = device.resource_by_name(space, name) else {
            continue;
        };
        for view in device.forget_alias_views(handle) {
            device
                .addons()
                .notify(|addon| addon.on_destroy_resource_view(api, view));
            context.forget_view(view);
        }
        let resource = handle.resource();
        device
            .addons()
            .notify(|addon| addon.on_destroy_resource(api, resource));
        device.forget_resource(handle);
    }
}

/// `glDeleteTextures`.
pub fn delete_textures(service: &LayerService, textures: &[GLuint], next: impl FnOnce()) {
    delete_names(service, NameSpace::Texture, textures);
    next();
}

/// `glDeleteBuffers`.
pub fn delete_buffers(service: &LayerService, buffers: &[GLuint], next: impl FnOnce()) {
    delete_names(service, NameSpace::Buffer, buffers);
    next();
}

/// `glDeleteRenderbuffers`.
pub fn delete_renderbuffers(service: &LayerService, renderbuffers: &[GLuint], next: impl FnOnce()) {
    delete_names(service, NameSpace::Renderbuffer, renderbuffers);
    next();
}

// ============================================================================
// Framebuffers
// ============================================================================

fn notify_bind_render_targets(context: &GlContext, attachments: &lumen_core::RenderPassAttachments) {
    let device = context.device();
    let api: &dyn DeviceApi = device.as_ref();
    let cmd = context.command_list();
    device
        .addons()
        .notify(|addon| addon.on_bind_render_targets_and_depth_stencil(api, cmd, attachments));
}

/// `glBindFramebuffer`.
pub fn bind_framebuffer(service: &LayerService, target: GLenum, framebuffer: GLuint, next: impl FnOnce()) {
    next();
    let Some(context) = current_or_log(service, "glBindFramebuffer") else {
        return;
    };
    if let Some(attachments) = context.bind_framebuffer(target, framebuffer) {
        notify_bind_render_targets(&context, &attachments);
    }
}

/// `glFramebufferTexture*` and `glNamedFramebufferTexture*`.
///
/// `framebuffer` is the framebuffer the call modifies, already resolved
/// from the binding target for the non-DSA variants. `layer` is `None` for
/// layered attachments.
pub fn framebuffer_texture(
    service: &LayerService,
    framebuffer: GLuint,
    attachment: GLenum,
    texture: GLuint,
    level: u32,
    layer: Option<u32>,
    next: impl FnOnce(),
) {
    next();
    let Some(context) = current_or_log(service, "glFramebufferTexture") else {
        return;
    };
    let view = if texture == 0 {
        ResourceView::NULL
    } else {
        match context.device().resource_by_name(NameSpace::Texture, texture) {
            Some(handle) => context.device().register_attachment_view(handle, level, layer),
            None => {
                log::debug!("glFramebufferTexture: untracked texture {}", texture);
                ResourceView::NULL
            }
        }
    };
    if let Some(attachments) = context.set_attachment(framebuffer, attachment, view) {
        notify_bind_render_targets(&context, &attachments);
    }
}

/// `glFramebufferRenderbuffer` and `glNamedFramebufferRenderbuffer`.
pub fn framebuffer_renderbuffer(
    service: &LayerService,
    framebuffer: GLuint,
    attachment: GLenum,
    renderbuffer: GLuint,
    next: impl FnOnce(),
) {
    next();
    let Some(context) = current_or_log(service, "glFramebufferRenderbuffer") else {
        return;
    };
    let view = if renderbuffer == 0 {
        ResourceView::NULL
    } else {
        context
            .device()
            .resource_by_name(NameSpace::Renderbuffer, renderbuffer)
            .map_or(ResourceView::NULL, |handle| {
                context.device().register_attachment_view(handle, 0, None)
            })
    };
    if let Some(attachments) = context.set_attachment(framebuffer, attachment, view) {
        notify_bind_render_targets(&context, &attachments);
    }
}

/// `glDeleteFramebuffers`.
pub fn delete_framebuffers(service: &LayerService, framebuffers: &[GLuint], next: impl FnOnce()) {
    if let Some(context) = current_or_log(service, "glDeleteFramebuffers") {
        context.delete_framebuffers(framebuffers);
    }
    next();
}

// ============================================================================
// Programs
// ============================================================================

/// Description passed with application programs. GL does not expose the
/// linked code, so only the stage layout is meaningful.
fn program_desc(stages: ShaderStage) -> PipelineDesc {
    if stages.contains(ShaderStage::COMPUTE) {
        PipelineDesc::Compute(ComputePipelineDesc::default())
    } else {
        PipelineDesc::Graphics(Box::new(GraphicsPipelineDesc::default()))
    }
}

/// `glLinkProgram`. `next` links and returns the link status.
pub fn link_program(
    service: &LayerService,
    program: GLuint,
    stages: ShaderStage,
    next: impl FnOnce() -> bool,
) -> bool {
    let linked = next();
    let Some(context) = current_or_log(service, "glLinkProgram") else {
        return linked;
    };
    let device = context.device();
    let api: &dyn DeviceApi = device.as_ref();
    if !linked {
        // A failed relink leaves the program unusable.
        if device.forget_program(program).is_some() {
            let pipeline = GlHandle::new(gl::PROGRAM, program).pipeline();
            device
                .addons()
                .notify(|addon| addon.on_destroy_pipeline(api, pipeline));
        }
        return false;
    }
    let pipeline = device.register_program(program, stages);
    let desc = program_desc(stages);
    device
        .addons()
        .notify(|addon| addon.on_init_pipeline(api, &desc, pipeline));
    true
}

/// `glDeleteProgram`.
pub fn delete_program(service: &LayerService, program: GLuint, next: impl FnOnce()) {
    if program != 0 {
        if let Some(context) = current_or_log(service, "glDeleteProgram") {
            let device = context.device();
            if device.forget_program(program).is_some() {
                let api: &dyn DeviceApi = device.as_ref();
                let pipeline = GlHandle::new(gl::PROGRAM, program).pipeline();
                device
                    .addons()
                    .notify(|addon| addon.on_destroy_pipeline(api, pipeline));
            }
        }
    }
    next();
}

/// `glUseProgram`.
pub fn use_program(service: &LayerService, program: GLuint, next: impl FnOnce()) {
    next();
    let Some(context) = current_or_log(service, "glUseProgram") else {
        return;
    };
    context.set_program(program);
    let pipeline = context.program();
    let device = context.device();
    let stages = if pipeline.is_null() {
        ShaderStage::ALL_GRAPHICS | ShaderStage::COMPUTE
    } else {
        device.program_stages(pipeline)
    };
    let api: &dyn DeviceApi = device.as_ref();
    let cmd = context.command_list();
    device
        .addons()
        .notify(|addon| addon.on_bind_pipeline(api, cmd, stages, pipeline));
}

// ============================================================================
// State
// ============================================================================

/// `glViewport`.
pub fn viewport(service: &LayerService, x: GLint, y: GLint, width: GLsizei, height: GLsizei, next: impl FnOnce()) {
    next();
    let Some(context) = current_or_log(service, "glViewport") else {
        return;
    };
    let device = context.device();
    let api: &dyn DeviceApi = device.as_ref();
    let cmd = context.command_list();
    let viewport = Viewport {
        x: x as f32,
        y: y as f32,
        width: width as f32,
        height: height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    device
        .addons()
        .notify(|addon| addon.on_bind_viewports(api, cmd, 0, &[viewport]));
}

/// `glScissor`.
pub fn scissor(service: &LayerService, x: GLint, y: GLint, width: GLsizei, height: GLsizei, next: impl FnOnce()) {
    next();
    let Some(context) = current_or_log(service, "glScissor") else {
        return;
    };
    let device = context.device();
    let api: &dyn DeviceApi = device.as_ref();
    let cmd = context.command_list();
    let rect = Rect::new(x, y, x + width, y + height);
    device
        .addons()
        .notify(|addon| addon.on_bind_scissor_rects(api, cmd, 0, &[rect]));
}

// ============================================================================
// Draws, dispatches, copies and clears
// ============================================================================

/// `glDrawArrays*`.
pub fn draw_arrays(
    service: &LayerService,
    first: u32,
    count: u32,
    instances: u32,
    first_instance: u32,
    next: impl FnOnce(),
) {
    if let Some(context) = current_or_log(service, "glDrawArrays") {
        let device = context.device();
        let api: &dyn DeviceApi = device.as_ref();
        let cmd = context.command_list();
        if device
            .addons()
            .handled(|addon| addon.on_draw(api, cmd, count, instances, first, first_instance))
        {
            return;
        }
    }
    next();
}

/// `glDrawElements*`. `offset` is the byte offset into the element buffer.
#[allow(clippy::too_many_arguments)]
pub fn draw_elements(
    service: &LayerService,
    count: u32,
    index_type: GLenum,
    offset: u64,
    instances: u32,
    base_vertex: i32,
    first_instance: u32,
    next: impl FnOnce(),
) {
    if let Some(context) = current_or_log(service, "glDrawElements") {
        let device = context.device();
        let api: &dyn DeviceApi = device.as_ref();
        let cmd = context.command_list();
        let index_size = u64::from(index_type_size(index_type).max(1));
        let first_index = u32::try_from(offset / index_size).unwrap_or(u32::MAX);
        if device.addons().handled(|addon| {
            addon.on_draw_indexed(api, cmd, count, instances, first_index, base_vertex, first_instance)
        }) {
            return;
        }
    }
    next();
}

/// `glDispatchCompute`.
pub fn dispatch_compute(service: &LayerService, x: u32, y: u32, z: u32, next: impl FnOnce()) {
    if let Some(context) = current_or_log(service, "glDispatchCompute") {
        let device = context.device();
        let api: &dyn DeviceApi = device.as_ref();
        let cmd = context.command_list();
        if device
            .addons()
            .handled(|addon| addon.on_dispatch(api, cmd, x, y, z))
        {
            return;
        }
    }
    next();
}

/// `glCopyImageSubData` over whole mip levels.
#[allow(clippy::too_many_arguments)]
pub fn copy_image(
    service: &LayerService,
    source: GLuint,
    source_target: GLenum,
    source_level: u32,
    dest: GLuint,
    dest_target: GLenum,
    dest_level: u32,
    next: impl FnOnce(),
) {
    if let Some(context) = current_or_log(service, "glCopyImageSubData") {
        let device = context.device();
        let api: &dyn DeviceApi = device.as_ref();
        let cmd = context.command_list();
        let region = |name, target, level| TextureRegion {
            resource: resource_of(device, name, target),
            subresource: level,
            region: None,
        };
        let source = region(source, source_target, source_level);
        let dest = region(dest, dest_target, dest_level);
        if device
            .addons()
            .handled(|addon| addon.on_copy_texture_region(api, cmd, &source, &dest))
        {
            return;
        }
    }
    next();
}

fn resource_of(device: &GlDevice, name: GLuint, target: GLenum) -> Resource {
    let space = if target == gl::RENDERBUFFER {
        NameSpace::Renderbuffer
    } else {
        NameSpace::Texture
    };
    device
        .resource_by_name(space, name)
        .map_or(Resource::NULL, GlHandle::resource)
}

/// `glClear`. Attachments an add-on clears itself are removed from the
/// mask; the driver call is skipped when none remain.
pub fn clear(service: &LayerService, mask: GLbitfield, values: &ClearValues, next: impl FnOnce(GLbitfield)) {
    let mut remaining = mask;
    if let Some(context) = current_or_log(service, "glClear") {
        let device = context.device();
        let api: &dyn DeviceApi = device.as_ref();
        let cmd = context.command_list();

        let mut color = AttachmentType::empty();
        if mask & gl::COLOR_BUFFER_BIT != 0 {
            color |= AttachmentType::COLOR;
        }
        let mut depth_stencil = AttachmentType::empty();
        if mask & gl::DEPTH_BUFFER_BIT != 0 {
            depth_stencil |= AttachmentType::DEPTH;
        }
        if mask & gl::STENCIL_BUFFER_BIT != 0 {
            depth_stencil |= AttachmentType::STENCIL;
        }

        if !color.is_empty()
            && device
                .addons()
                .handled(|addon| addon.on_clear_attachments(api, cmd, color, values, &[]))
        {
            remaining &= !gl::COLOR_BUFFER_BIT;
        }
        if !depth_stencil.is_empty()
            && device
                .addons()
                .handled(|addon| addon.on_clear_attachments(api, cmd, depth_stencil, values, &[]))
        {
            remaining &= !(gl::DEPTH_BUFFER_BIT | gl::STENCIL_BUFFER_BIT);
        }
    }
    if remaining != 0 {
        next(remaining);
    }
}

// ============================================================================
// Presentation
// ============================================================================

/// `wglSwapBuffers`. The open render pass is finished before the present
/// event and reopened afterwards.
pub fn swap_buffers(service: &LayerService, hdc: u64, next: impl FnOnce() -> bool) -> bool {
    let Some(context) = current_or_log(service, "wglSwapBuffers") else {
        return next();
    };
    if context.hdc() != hdc {
        log::debug!("wglSwapBuffers: {:#x} is not the surface of the current context", hdc);
    }
    let device = context.device();
    let api: &dyn DeviceApi = device.as_ref();
    let queue = context.command_queue();
    let swapchain = context.swapchain();

    context.end_render_pass();
    device
        .addons()
        .notify(|addon| addon.on_present(api, queue, swapchain));
    let presented = next();
    context.resume_render_pass();
    presented
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::opengl::dispatch::GlError;
    use crate::backend::opengl::dummy::DummyGl;
    use lumen_core::{Addon, CommandList, LayerConfig, Pipeline, RenderPassAttachments};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        skip_draws: bool,
        clear_colors: bool,
    }

    impl Recorder {
        fn push(&self, event: impl Into<String>) {
            self.events.lock().push(event.into());
        }

        fn count(&self, prefix: &str) -> usize {
            self.events.lock().iter().filter(|e| e.starts_with(prefix)).count()
        }
    }

    impl Addon for Recorder {
        fn on_init_device(&self, _: &dyn DeviceApi) {
            self.push("init_device");
        }
        fn on_destroy_device(&self, _: &dyn DeviceApi) {
            self.push("destroy_device");
        }
        fn on_init_resource(
            &self,
            _: &dyn DeviceApi,
            _: &ResourceDesc,
            _: Option<&[lumen_core::SubresourceData<'_>]>,
            _: ResourceUsage,
            resource: Resource,
        ) {
            self.push(format!("init_resource:{:#x}", resource.raw()));
        }
        fn on_destroy_resource(&self, _: &dyn DeviceApi, resource: Resource) {
            self.push(format!("destroy_resource:{:#x}", resource.raw()));
        }
        fn on_destroy_resource_view(&self, _: &dyn DeviceApi, _: ResourceView) {
            self.push("destroy_view");
        }
        fn on_init_pipeline(&self, _: &dyn DeviceApi, _: &PipelineDesc, _: Pipeline) {
            self.push("init_pipeline");
        }
        fn on_bind_pipeline(&self, _: &dyn DeviceApi, _: CommandList, stages: ShaderStage, _: Pipeline) {
            self.push(format!("bind_pipeline:{:?}", stages));
        }
        fn on_begin_render_pass(&self, _: &dyn DeviceApi, _: CommandList, _: &RenderPassAttachments) {
            self.push("begin_render_pass");
        }
        fn on_finish_render_pass(&self, _: &dyn DeviceApi, _: CommandList) {
            self.push("finish_render_pass");
        }
        fn on_draw(&self, _: &dyn DeviceApi, _: CommandList, _: u32, _: u32, _: u32, _: u32) -> bool {
            self.push("draw");
            self.skip_draws
        }
        fn on_clear_attachments(
            &self,
            _: &dyn DeviceApi,
            _: CommandList,
            flags: AttachmentType,
            _: &ClearValues,
            _: &[Rect],
        ) -> bool {
            flags.contains(AttachmentType::COLOR) && self.clear_colors
        }
        fn on_present(
            &self,
            _: &dyn DeviceApi,
            _: lumen_core::CommandQueue,
            _: lumen_core::SwapChain,
        ) {
            self.push("present");
        }
    }

    fn setup(recorder: Recorder) -> (Arc<Recorder>, LayerService, Arc<GlContext>) {
        let service = LayerService::new(LayerConfig::default());
        let recorder = Arc::new(recorder);
        service.addons().register(recorder.clone());
        let context = on_context_created(&service, Arc::new(DummyGl::new()), 0x100, 0x200, None);
        make_current(&service, 0x100);
        (recorder, service, context)
    }

    #[test]
    fn test_context_lifecycle() {
        let (recorder, service, context) = setup(Recorder::default());
        let shared = on_context_created(&service, Arc::new(DummyGl::new()), 0x101, 0x200, Some(0x100));
        assert!(Arc::ptr_eq(context.device(), shared.device()));
        assert_eq!(recorder.count("init_device"), 1);

        on_context_destroyed(&service, 0x100);
        assert_eq!(recorder.count("destroy_device"), 0);
        assert!(current_context(&service).is_none());
        on_context_destroyed(&service, 0x101);
        assert_eq!(recorder.count("destroy_device"), 1);
        assert!(service.opengl.devices.is_empty());
    }

    #[test]
    fn test_texture_storage_registers_on_success_only() {
        let (recorder, service, context) = setup(Recorder::default());
        texture_storage(&service, gl::TEXTURE_2D, 7, 1, gl::RGBA8, 64, 64, 1, 1, || {
            Err(GlError(gl::OUT_OF_MEMORY))
        })
        .unwrap_err();
        assert!(context.device().resource_by_name(NameSpace::Texture, 7).is_none());
        assert_eq!(recorder.count("init_resource"), 0);

        texture_storage(&service, gl::TEXTURE_2D, 7, 4, gl::RGBA8, 64, 64, 1, 1, || Ok(())).unwrap();
        let handle = context.device().resource_by_name(NameSpace::Texture, 7).unwrap();
        let desc = context.device().get_resource_desc(handle.resource()).unwrap();
        assert_eq!(desc.as_texture().map(|t| t.levels), Some(4));
        assert_eq!(recorder.count("init_resource"), 1);
    }

    #[test]
    fn test_texture_image_grows_levels() {
        let (recorder, service, context) = setup(Recorder::default());
        texture_image(&service, gl::TEXTURE_2D, 3, 0, gl::RGBA8, 32, 32, 1, || Ok(())).unwrap();
        texture_image(&service, gl::TEXTURE_2D, 3, 1, gl::RGBA8, 16, 16, 1, || Ok(())).unwrap();
        texture_image(&service, gl::TEXTURE_2D, 3, 2, gl::RGBA8, 8, 8, 1, || Ok(())).unwrap();
        let handle = context.device().resource_by_name(NameSpace::Texture, 3).unwrap();
        let desc = context.device().get_resource_desc(handle.resource()).unwrap();
        assert_eq!(desc.as_texture().map(|t| t.levels), Some(3));
        assert_eq!(recorder.count("init_resource"), 1);
    }

    #[test]
    fn test_bind_framebuffer_scenarios() {
        let (recorder, service, _context) = setup(Recorder::default());
        for texture in [1, 2] {
            texture_storage(&service, gl::TEXTURE_2D, texture, 1, gl::RGBA8, 64, 64, 1, 1, || Ok(())).unwrap();
        }
        framebuffer_texture(&service, 10, gl::COLOR_ATTACHMENT0, 1, 0, None, || {});
        framebuffer_texture(&service, 11, gl::COLOR_ATTACHMENT0, 2, 0, None, || {});

        bind_framebuffer(&service, gl::FRAMEBUFFER, 10, || {});
        bind_framebuffer(&service, gl::FRAMEBUFFER, 10, || {});
        assert_eq!(recorder.count("begin_render_pass"), 1);
        assert_eq!(recorder.count("finish_render_pass"), 0);

        bind_framebuffer(&service, gl::FRAMEBUFFER, 11, || {});
        let events = recorder.events.lock().clone();
        let tail: Vec<_> = events.iter().rev().take(2).rev().cloned().collect();
        assert_eq!(tail, vec!["finish_render_pass", "begin_render_pass"]);
    }

    #[test]
    fn test_deleting_attached_texture_forgets_views() {
        let (recorder, service, context) = setup(Recorder::default());
        texture_storage(&service, gl::TEXTURE_2D, 1, 1, gl::RGBA8, 64, 64, 1, 1, || Ok(())).unwrap();
        framebuffer_texture(&service, 10, gl::COLOR_ATTACHMENT0, 1, 0, None, || {});
        bind_framebuffer(&service, gl::FRAMEBUFFER, 10, || {});

        let mut forwarded = false;
        delete_textures(&service, &[1], || forwarded = true);
        assert!(forwarded);
        assert_eq!(recorder.count("destroy_view"), 1);
        assert_eq!(recorder.count("destroy_resource"), 1);
        assert_eq!(recorder.count("finish_render_pass"), 1);
        assert!(context.bound_attachments().is_empty());
        assert!(context.device().resource_by_name(NameSpace::Texture, 1).is_none());
    }

    #[test]
    fn test_program_link_and_use() {
        let (recorder, service, context) = setup(Recorder::default());
        assert!(link_program(&service, 5, ShaderStage::VERTEX | ShaderStage::PIXEL, || true));
        use_program(&service, 5, || {});
        assert_eq!(recorder.count("init_pipeline"), 1);
        assert!(recorder
            .events
            .lock()
            .contains(&format!("bind_pipeline:{:?}", ShaderStage::VERTEX | ShaderStage::PIXEL)));
        assert!(!context.program().is_null());

        assert!(!link_program(&service, 6, ShaderStage::COMPUTE, || false));
        assert!(context
            .device()
            .registry()
            .lock()
            .pipelines
            .get(GlHandle::new(gl::PROGRAM, 6).to_bits())
            .is_none());
    }

    #[test]
    fn test_handled_draw_skips_driver() {
        let (recorder, service, _context) = setup(Recorder {
            skip_draws: true,
            ..Default::default()
        });
        let mut called = false;
        draw_arrays(&service, 0, 3, 1, 0, || called = true);
        assert!(!called);
        assert_eq!(recorder.count("draw"), 1);
    }

    #[test]
    fn test_clear_strips_handled_bits() {
        let (_recorder, service, _context) = setup(Recorder {
            clear_colors: true,
            ..Default::default()
        });
        let mut forwarded = None;
        clear(
            &service,
            gl::COLOR_BUFFER_BIT | gl::DEPTH_BUFFER_BIT,
            &ClearValues::default(),
            |mask| forwarded = Some(mask),
        );
        assert_eq!(forwarded, Some(gl::DEPTH_BUFFER_BIT));

        let mut called = false;
        clear(&service, gl::COLOR_BUFFER_BIT, &ClearValues::default(), |_| called = true);
        assert!(!called);
    }

    #[test]
    fn test_swap_buffers_brackets_present() {
        let (recorder, service, _context) = setup(Recorder::default());
        bind_framebuffer(&service, gl::FRAMEBUFFER, 0, || {});
        assert!(swap_buffers(&service, 0x200, || true));
        let events = recorder.events.lock().clone();
        let tail: Vec<_> = events.iter().rev().take(4).rev().cloned().collect();
        assert_eq!(
            tail,
            vec!["begin_render_pass", "finish_render_pass", "present", "begin_render_pass"]
        );
    }
}
