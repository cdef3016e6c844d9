//! Vulkan pipeline, pipeline layout and descriptor set layout construction.
//!
//! The `build_*` functions compile abstract descriptions into native objects.
//! Shader modules are transient: they are destroyed once the pipeline exists
//! or creation failed. The `describe_*` functions go the other way and turn
//! application create infos into the descriptions add-ons observe.

use std::ffi::{CStr, CString};
use std::io::Cursor;

use ash::vk;
use ash::vk::Handle;
use lumen_core::pipeline::{
    BlendState, ComputePipelineDesc, CullMode, DepthStencilState, DescriptorRange,
    DescriptorSetLayoutDesc, DynamicState, FillMode, GraphicsPipelineDesc, InputElement,
    PipelineDesc, PipelineLayoutDesc, PipelineLayoutParam, PrimitiveTopology, RasterizerState,
    ShaderDesc, ShaderStage, StencilFace,
};
use lumen_core::{ApiError, ApiResult, DescriptorSetLayout, Format, PipelineLayout};

use super::conversion::*;
use super::device::api_error;
use super::dispatch::{raw_slice, VulkanDispatch};

const DEFAULT_ENTRY_POINT: &str = "main";

// ============================================================================
// Shader modules
// ============================================================================

/// Shader modules created for one pipeline, destroyed on drop.
struct TransientModules<'a> {
    dispatch: &'a dyn VulkanDispatch,
    modules: Vec<(ShaderStage, vk::ShaderModule, CString)>,
}

impl Drop for TransientModules<'_> {
    fn drop(&mut self) {
        for (_, module, _) in self.modules.drain(..) {
            self.dispatch.destroy_shader_module(module);
        }
    }
}

fn create_modules<'a, 's>(
    dispatch: &'a dyn VulkanDispatch,
    shaders: impl IntoIterator<Item = (ShaderStage, &'s ShaderDesc)>,
) -> ApiResult<TransientModules<'a>> {
    let mut created = TransientModules {
        dispatch,
        modules: Vec::new(),
    };
    for (stage, shader) in shaders {
        let words = ash::util::read_spv(&mut Cursor::new(&shader.code)).map_err(|e| {
            ApiError::InvalidParameter(format!("{:?} shader is not SPIR-V: {}", stage, e))
        })?;
        let entry_point = CString::new(
            shader
                .entry_point
                .as_deref()
                .unwrap_or(DEFAULT_ENTRY_POINT),
        )
        .map_err(|_| ApiError::InvalidParameter("entry point contains NUL".into()))?;

        let info = vk::ShaderModuleCreateInfo::default().code(&words);
        // Returning early drops `created`, which releases the earlier modules.
        let module = dispatch.create_shader_module(&info).map_err(api_error)?;
        created.modules.push((stage, module, entry_point));
    }
    Ok(created)
}

/// Specialization constants of one stage, laid out as consecutive `u32`s.
struct Specialization {
    entries: Vec<vk::SpecializationMapEntry>,
    data: Vec<u8>,
}

impl Specialization {
    fn new(constants: &[(u32, u32)]) -> Self {
        let entries = constants
            .iter()
            .enumerate()
            .map(|(index, (id, _))| vk::SpecializationMapEntry {
                constant_id: *id,
                offset: (index * 4) as u32,
                size: 4,
            })
            .collect();
        let values: Vec<u32> = constants.iter().map(|(_, value)| *value).collect();
        let data = bytemuck::cast_slice::<u32, u8>(&values).to_vec();
        Self { entries, data }
    }
}

// ============================================================================
// Pipelines
// ============================================================================

/// Create a native pipeline for `desc`.
pub fn build_pipeline(dispatch: &dyn VulkanDispatch, desc: &PipelineDesc) -> ApiResult<vk::Pipeline> {
    if desc.layout().is_null() {
        return Err(ApiError::InvalidParameter(
            "pipelines need a pipeline layout".into(),
        ));
    }
    match desc {
        PipelineDesc::Compute(desc) => build_compute_pipeline(dispatch, desc),
        PipelineDesc::Graphics(desc) => build_graphics_pipeline(dispatch, desc),
    }
}

fn build_compute_pipeline(
    dispatch: &dyn VulkanDispatch,
    desc: &ComputePipelineDesc,
) -> ApiResult<vk::Pipeline> {
    if desc.cs.is_empty() {
        return Err(ApiError::InvalidParameter(
            "compute pipelines need a compute shader".into(),
        ));
    }
    let modules = create_modules(dispatch, [(ShaderStage::COMPUTE, &desc.cs)])?;
    let specialization = Specialization::new(&desc.cs.spec_constants);
    let spec_info = vk::SpecializationInfo::default()
        .map_entries(&specialization.entries)
        .data(&specialization.data);

    let (_, module, entry_point) = &modules.modules[0];
    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(*module)
        .name(entry_point)
        .specialization_info(&spec_info);
    let info = vk::ComputePipelineCreateInfo::default()
        .stage(stage)
        .layout(vk::PipelineLayout::from_raw(desc.layout.raw()));

    let pipelines = dispatch
        .create_compute_pipelines(std::slice::from_ref(&info))
        .map_err(api_error)?;
    first_pipeline(pipelines)
}

fn first_pipeline(pipelines: Vec<vk::Pipeline>) -> ApiResult<vk::Pipeline> {
    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::Native(i64::from(vk::Result::ERROR_UNKNOWN.as_raw())))
}

/// Vertex buffer bindings referenced by `elements`, one per buffer slot.
///
/// Elements sharing a buffer slot must agree on stride and step rate.
pub fn vertex_bindings(
    elements: &[InputElement],
) -> ApiResult<Vec<vk::VertexInputBindingDescription>> {
    let mut bindings: Vec<vk::VertexInputBindingDescription> = Vec::new();
    for element in elements {
        let input_rate = if element.instance_step_rate > 0 {
            vk::VertexInputRate::INSTANCE
        } else {
            vk::VertexInputRate::VERTEX
        };
        match bindings
            .iter()
            .find(|binding| binding.binding == element.buffer_binding)
        {
            Some(existing) if existing.stride != element.stride || existing.input_rate != input_rate => {
                return Err(ApiError::InvalidParameter(format!(
                    "input elements of buffer {} disagree on stride or step rate",
                    element.buffer_binding
                )));
            }
            Some(_) => {}
            None => bindings.push(vk::VertexInputBindingDescription {
                binding: element.buffer_binding,
                stride: element.stride,
                input_rate,
            }),
        }
    }
    Ok(bindings)
}

fn convert_stencil_face(face: &StencilFace, state: &DepthStencilState) -> vk::StencilOpState {
    vk::StencilOpState {
        fail_op: convert_stencil_op(face.fail_op),
        pass_op: convert_stencil_op(face.pass_op),
        depth_fail_op: convert_stencil_op(face.depth_fail_op),
        compare_op: convert_compare_op(face.func),
        compare_mask: u32::from(state.stencil_read_mask),
        write_mask: u32::from(state.stencil_write_mask),
        reference: u32::from(state.stencil_reference),
    }
}

fn convert_blend_attachments(
    blend: &BlendState,
    count: usize,
) -> Vec<vk::PipelineColorBlendAttachmentState> {
    blend
        .render_targets
        .iter()
        .take(count)
        .map(|target| vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::Bool32::from(target.blend_enable),
            src_color_blend_factor: convert_blend_factor(target.source_color),
            dst_color_blend_factor: convert_blend_factor(target.dest_color),
            color_blend_op: convert_blend_op(target.color_op),
            src_alpha_blend_factor: convert_blend_factor(target.source_alpha),
            dst_alpha_blend_factor: convert_blend_factor(target.dest_alpha),
            alpha_blend_op: convert_blend_op(target.alpha_op),
            color_write_mask: convert_color_write_mask(target.write_mask),
        })
        .collect()
}

/// Dynamic states of a graphics pipeline. Viewport and scissor are always
/// dynamic.
pub fn pipeline_dynamic_states(desc: &GraphicsPipelineDesc) -> Vec<vk::DynamicState> {
    let mut states = vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    for state in desc.dynamic_states.iter().filter_map(|state| convert_dynamic_state(*state)) {
        if !states.contains(&state) {
            states.push(state);
        }
    }
    states
}

fn build_graphics_pipeline(
    dispatch: &dyn VulkanDispatch,
    desc: &GraphicsPipelineDesc,
) -> ApiResult<vk::Pipeline> {
    if desc.vs.is_empty() {
        return Err(ApiError::InvalidParameter(
            "graphics pipelines need a vertex shader".into(),
        ));
    }
    let bindings = vertex_bindings(&desc.input_layout)?;
    let modules = create_modules(dispatch, desc.shaders())?;

    let specializations: Vec<Specialization> = desc
        .shaders()
        .map(|(_, shader)| Specialization::new(&shader.spec_constants))
        .collect();
    let spec_infos: Vec<vk::SpecializationInfo<'_>> = specializations
        .iter()
        .map(|spec| {
            vk::SpecializationInfo::default()
                .map_entries(&spec.entries)
                .data(&spec.data)
        })
        .collect();
    let stages: Vec<vk::PipelineShaderStageCreateInfo<'_>> = modules
        .modules
        .iter()
        .zip(&spec_infos)
        .map(|((stage, module, entry_point), spec_info)| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(convert_shader_stages(*stage))
                .module(*module)
                .name(entry_point)
                .specialization_info(spec_info)
        })
        .collect();

    let attributes: Vec<vk::VertexInputAttributeDescription> = desc
        .input_layout
        .iter()
        .map(|element| vk::VertexInputAttributeDescription {
            location: element.location,
            binding: element.buffer_binding,
            format: convert_format(element.format),
            offset: element.offset,
        })
        .collect();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(convert_primitive_topology(desc.topology));
    let tessellation = match desc.topology {
        PrimitiveTopology::PatchList(points) => {
            vk::PipelineTessellationStateCreateInfo::default()
                .patch_control_points(u32::from(points))
        }
        _ => vk::PipelineTessellationStateCreateInfo::default(),
    };

    let viewport_count = desc.viewport_count.max(1);
    let viewport = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(viewport_count)
        .scissor_count(viewport_count);

    let raster = &desc.rasterizer;
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(!raster.depth_clip_enable)
        .polygon_mode(convert_fill_mode(raster.fill_mode))
        .cull_mode(convert_cull_mode(raster.cull_mode))
        .front_face(if raster.front_counter_clockwise {
            vk::FrontFace::COUNTER_CLOCKWISE
        } else {
            vk::FrontFace::CLOCKWISE
        })
        .depth_bias_enable(raster.depth_bias != 0.0 || raster.slope_scaled_depth_bias != 0.0)
        .depth_bias_constant_factor(raster.depth_bias)
        .depth_bias_clamp(raster.depth_bias_clamp)
        .depth_bias_slope_factor(raster.slope_scaled_depth_bias)
        .line_width(1.0);

    let sample_mask = [desc.sample_mask];
    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::from_raw(desc.sample_count.max(1)))
        .sample_mask(&sample_mask)
        .alpha_to_coverage_enable(desc.blend.alpha_to_coverage_enable);

    let ds = &desc.depth_stencil;
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(ds.depth_enable)
        .depth_write_enable(ds.depth_write_enable)
        .depth_compare_op(convert_compare_op(ds.depth_func))
        .stencil_test_enable(ds.stencil_enable)
        .front(convert_stencil_face(&ds.front, ds))
        .back(convert_stencil_face(&ds.back, ds));

    let attachments = convert_blend_attachments(&desc.blend, desc.render_target_formats.len());
    let first_target = &desc.blend.render_targets[0];
    let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(first_target.logic_op_enable)
        .logic_op(convert_logic_op(first_target.logic_op))
        .attachments(&attachments)
        .blend_constants(desc.blend.blend_constant);

    let dynamic_states = pipeline_dynamic_states(desc);
    let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_formats: Vec<vk::Format> = desc
        .render_target_formats
        .iter()
        .map(|format| convert_format(*format))
        .collect();
    let depth_format = convert_format(desc.depth_stencil_format);
    let mut rendering = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_formats)
        .depth_attachment_format(if desc.depth_stencil_format.has_depth() {
            depth_format
        } else {
            vk::Format::UNDEFINED
        })
        .stencil_attachment_format(if desc.depth_stencil_format.has_stencil() {
            depth_format
        } else {
            vk::Format::UNDEFINED
        });

    let mut info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic)
        .layout(vk::PipelineLayout::from_raw(desc.layout.raw()))
        .push_next(&mut rendering);
    if matches!(desc.topology, PrimitiveTopology::PatchList(_)) {
        info = info.tessellation_state(&tessellation);
    }

    let pipelines = dispatch
        .create_graphics_pipelines(std::slice::from_ref(&info))
        .map_err(api_error)?;
    drop(modules);
    first_pipeline(pipelines)
}

// ============================================================================
// Layouts
// ============================================================================

/// Create a pipeline layout.
///
/// Null descriptor set parameters are filled with an empty set layout, which
/// is returned so it can be destroyed with the pipeline layout.
pub fn build_pipeline_layout(
    dispatch: &dyn VulkanDispatch,
    desc: &PipelineLayoutDesc,
) -> ApiResult<(vk::PipelineLayout, Option<vk::DescriptorSetLayout>)> {
    let needs_placeholder = desc
        .params
        .iter()
        .any(|param| matches!(param, PipelineLayoutParam::DescriptorSet(layout) if layout.is_null()));
    let placeholder = if needs_placeholder {
        let info = vk::DescriptorSetLayoutCreateInfo::default();
        Some(
            dispatch
                .create_descriptor_set_layout(&info)
                .map_err(api_error)?,
        )
    } else {
        None
    };

    let mut set_layouts = Vec::new();
    let mut push_constants = Vec::new();
    for param in &desc.params {
        match *param {
            PipelineLayoutParam::DescriptorSet(layout) if layout.is_null() => {
                set_layouts.push(placeholder.unwrap_or_default());
            }
            PipelineLayoutParam::DescriptorSet(layout) => {
                set_layouts.push(vk::DescriptorSetLayout::from_raw(layout.raw()));
            }
            PipelineLayoutParam::PushConstants {
                offset,
                count,
                visibility,
            } => push_constants.push(vk::PushConstantRange {
                stage_flags: convert_shader_stages(visibility),
                offset: offset * 4,
                size: count * 4,
            }),
        }
    }

    let info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_constants);
    match dispatch.create_pipeline_layout(&info) {
        Ok(layout) => Ok((layout, placeholder)),
        Err(e) => {
            if let Some(placeholder) = placeholder {
                dispatch.destroy_descriptor_set_layout(placeholder);
            }
            Err(api_error(e))
        }
    }
}

/// Create a descriptor set layout, flagged for push descriptors if requested.
pub fn build_descriptor_set_layout(
    dispatch: &dyn VulkanDispatch,
    desc: &DescriptorSetLayoutDesc,
) -> ApiResult<vk::DescriptorSetLayout> {
    let bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> = desc
        .ranges
        .iter()
        .map(|range| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(range.binding)
                .descriptor_type(convert_descriptor_type(range.ty))
                .descriptor_count(range.count)
                .stage_flags(convert_shader_stages(range.visibility))
        })
        .collect();

    let mut info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    if desc.push_descriptors {
        info = info.flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR);
    }
    dispatch
        .create_descriptor_set_layout(&info)
        .map_err(api_error)
}

// ============================================================================
// Describing application objects
// ============================================================================

/// Describe an application descriptor set layout.
///
/// Bindings whose type has no abstract counterpart are left out.
pub fn describe_descriptor_set_layout(
    info: &vk::DescriptorSetLayoutCreateInfo<'_>,
) -> DescriptorSetLayoutDesc {
    // SAFETY: the application passes valid binding arrays.
    let bindings = unsafe { raw_slice(info.p_bindings, info.binding_count) };
    DescriptorSetLayoutDesc {
        ranges: bindings
            .iter()
            .filter_map(|binding| {
                Some(DescriptorRange {
                    binding: binding.binding,
                    count: binding.descriptor_count,
                    ty: convert_vk_descriptor_type(binding.descriptor_type)?,
                    visibility: convert_vk_shader_stages(binding.stage_flags),
                })
            })
            .collect(),
        push_descriptors: info
            .flags
            .contains(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR),
    }
}

/// Describe an application pipeline layout. Push constant ranges are
/// reported in 32-bit values.
pub fn describe_pipeline_layout(info: &vk::PipelineLayoutCreateInfo<'_>) -> PipelineLayoutDesc {
    // SAFETY: the application passes valid arrays.
    let set_layouts = unsafe { raw_slice(info.p_set_layouts, info.set_layout_count) };
    let ranges = unsafe { raw_slice(info.p_push_constant_ranges, info.push_constant_range_count) };

    let mut params: Vec<PipelineLayoutParam> = set_layouts
        .iter()
        .map(|layout| PipelineLayoutParam::DescriptorSet(DescriptorSetLayout(layout.as_raw())))
        .collect();
    params.extend(ranges.iter().map(|range| PipelineLayoutParam::PushConstants {
        offset: range.offset / 4,
        count: range.size / 4,
        visibility: convert_vk_shader_stages(range.stage_flags),
    }));
    PipelineLayoutDesc { params }
}

fn describe_stage(
    stage: &vk::PipelineShaderStageCreateInfo<'_>,
    shader_code: &impl Fn(vk::ShaderModule) -> Vec<u8>,
) -> ShaderDesc {
    let entry_point = if stage.p_name.is_null() {
        None
    } else {
        // SAFETY: a non-null name is a NUL-terminated string.
        Some(unsafe { CStr::from_ptr(stage.p_name) }.to_string_lossy().into_owned())
    };
    let spec_constants = if stage.p_specialization_info.is_null() {
        Vec::new()
    } else {
        // SAFETY: checked for null above; the map entries index into `p_data`.
        let spec = unsafe { &*stage.p_specialization_info };
        let entries = unsafe { raw_slice(spec.p_map_entries, spec.map_entry_count) };
        let data = unsafe { raw_slice(spec.p_data.cast::<u8>(), spec.data_size as u32) };
        entries
            .iter()
            .filter(|entry| entry.size == 4)
            .filter_map(|entry| {
                let start = entry.offset as usize;
                let bytes = data.get(start..start + 4)?;
                Some((entry.constant_id, bytemuck::pod_read_unaligned::<u32>(bytes)))
            })
            .collect()
    };
    ShaderDesc {
        code: shader_code(stage.module),
        entry_point,
        spec_constants,
    }
}

/// Describe an application compute pipeline.
pub fn describe_compute_pipeline(
    info: &vk::ComputePipelineCreateInfo<'_>,
    shader_code: impl Fn(vk::ShaderModule) -> Vec<u8>,
) -> ComputePipelineDesc {
    ComputePipelineDesc {
        layout: PipelineLayout(info.layout.as_raw()),
        cs: describe_stage(&info.stage, &shader_code),
    }
}

/// Describe an application graphics pipeline.
///
/// Only the state abstract descriptions can express is reported; unknown
/// dynamic states are dropped.
pub fn describe_graphics_pipeline(
    info: &vk::GraphicsPipelineCreateInfo<'_>,
    shader_code: impl Fn(vk::ShaderModule) -> Vec<u8>,
) -> GraphicsPipelineDesc {
    let mut desc = GraphicsPipelineDesc {
        layout: PipelineLayout(info.layout.as_raw()),
        ..Default::default()
    };

    // SAFETY: every pointer below is either null or points to the state the
    // application passed to vkCreateGraphicsPipelines.
    for stage in unsafe { raw_slice(info.p_stages, info.stage_count) } {
        let shader = describe_stage(stage, &shader_code);
        match convert_vk_shader_stages(stage.stage) {
            ShaderStage::VERTEX => desc.vs = shader,
            ShaderStage::HULL => desc.hs = shader,
            ShaderStage::DOMAIN => desc.ds = shader,
            ShaderStage::GEOMETRY => desc.gs = shader,
            ShaderStage::PIXEL => desc.ps = shader,
            _ => {}
        }
    }

    if let Some(vertex_input) = unsafe { info.p_vertex_input_state.as_ref() } {
        let bindings = unsafe {
            raw_slice(
                vertex_input.p_vertex_binding_descriptions,
                vertex_input.vertex_binding_description_count,
            )
        };
        let attributes = unsafe {
            raw_slice(
                vertex_input.p_vertex_attribute_descriptions,
                vertex_input.vertex_attribute_description_count,
            )
        };
        desc.input_layout = attributes
            .iter()
            .map(|attribute| {
                let binding = bindings.iter().find(|binding| binding.binding == attribute.binding);
                InputElement {
                    location: attribute.location,
                    format: convert_vk_format(attribute.format),
                    buffer_binding: attribute.binding,
                    offset: attribute.offset,
                    stride: binding.map_or(0, |binding| binding.stride),
                    instance_step_rate: binding.map_or(0, |binding| {
                        u32::from(binding.input_rate == vk::VertexInputRate::INSTANCE)
                    }),
                    ..Default::default()
                }
            })
            .collect();
    }

    if let Some(input_assembly) = unsafe { info.p_input_assembly_state.as_ref() } {
        desc.topology = convert_vk_primitive_topology(input_assembly.topology);
        if desc.topology == PrimitiveTopology::PatchList(0) {
            let points = unsafe { info.p_tessellation_state.as_ref() }
                .map_or(0, |tessellation| tessellation.patch_control_points);
            desc.topology = PrimitiveTopology::PatchList(points as u8);
        }
    }

    if let Some(viewport) = unsafe { info.p_viewport_state.as_ref() } {
        desc.viewport_count = viewport.viewport_count;
    }

    if let Some(raster) = unsafe { info.p_rasterization_state.as_ref() } {
        desc.rasterizer = RasterizerState {
            fill_mode: match raster.polygon_mode {
                vk::PolygonMode::LINE => FillMode::Wireframe,
                vk::PolygonMode::POINT => FillMode::Point,
                _ => FillMode::Solid,
            },
            cull_mode: match raster.cull_mode {
                vk::CullModeFlags::FRONT => CullMode::Front,
                vk::CullModeFlags::BACK => CullMode::Back,
                vk::CullModeFlags::FRONT_AND_BACK => CullMode::FrontAndBack,
                _ => CullMode::None,
            },
            front_counter_clockwise: raster.front_face == vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias: raster.depth_bias_constant_factor,
            depth_bias_clamp: raster.depth_bias_clamp,
            slope_scaled_depth_bias: raster.depth_bias_slope_factor,
            depth_clip_enable: raster.depth_clamp_enable == vk::FALSE,
            ..Default::default()
        };
    }

    if let Some(multisample) = unsafe { info.p_multisample_state.as_ref() } {
        desc.sample_count = multisample.rasterization_samples.as_raw();
        desc.rasterizer.multisample_enable = desc.sample_count > 1;
        desc.blend.alpha_to_coverage_enable = multisample.alpha_to_coverage_enable != vk::FALSE;
        if !multisample.p_sample_mask.is_null() {
            desc.sample_mask = unsafe { *multisample.p_sample_mask };
        }
    }

    if let Some(ds) = unsafe { info.p_depth_stencil_state.as_ref() } {
        desc.depth_stencil = DepthStencilState {
            depth_enable: ds.depth_test_enable != vk::FALSE,
            depth_write_enable: ds.depth_write_enable != vk::FALSE,
            depth_func: convert_vk_compare_op(ds.depth_compare_op),
            stencil_enable: ds.stencil_test_enable != vk::FALSE,
            stencil_read_mask: ds.front.compare_mask as u8,
            stencil_write_mask: ds.front.write_mask as u8,
            stencil_reference: ds.front.reference as u8,
            front: describe_stencil_face(&ds.front),
            back: describe_stencil_face(&ds.back),
        };
    }

    if let Some(color_blend) = unsafe { info.p_color_blend_state.as_ref() } {
        let attachments =
            unsafe { raw_slice(color_blend.p_attachments, color_blend.attachment_count) };
        desc.blend.blend_constant = color_blend.blend_constants;
        for (target, attachment) in desc.blend.render_targets.iter_mut().zip(attachments) {
            target.blend_enable = attachment.blend_enable != vk::FALSE;
            target.logic_op_enable = color_blend.logic_op_enable != vk::FALSE;
            target.write_mask = lumen_core::pipeline::ColorWriteMask::from_bits_truncate(
                attachment.color_write_mask.as_raw() as u8,
            );
        }
    }

    if let Some(dynamic) = unsafe { info.p_dynamic_state.as_ref() } {
        let states = unsafe { raw_slice(dynamic.p_dynamic_states, dynamic.dynamic_state_count) };
        desc.dynamic_states = states
            .iter()
            .filter_map(|state| convert_vk_dynamic_state(*state))
            .collect();
    }

    desc.render_target_formats = rendering_formats(info);
    desc
}

fn describe_stencil_face(face: &vk::StencilOpState) -> StencilFace {
    StencilFace {
        fail_op: convert_vk_stencil_op(face.fail_op),
        depth_fail_op: convert_vk_stencil_op(face.depth_fail_op),
        pass_op: convert_vk_stencil_op(face.pass_op),
        func: convert_vk_compare_op(face.compare_op),
    }
}

/// Color formats of a `VkPipelineRenderingCreateInfo` in the `p_next` chain.
fn rendering_formats(info: &vk::GraphicsPipelineCreateInfo<'_>) -> Vec<Format> {
    let mut next = info.p_next.cast::<vk::BaseInStructure<'_>>();
    // SAFETY: the chain consists of valid Vulkan structures.
    while let Some(base) = unsafe { next.as_ref() } {
        if base.s_type == vk::StructureType::PIPELINE_RENDERING_CREATE_INFO {
            let rendering = unsafe { &*next.cast::<vk::PipelineRenderingCreateInfo<'_>>() };
            let formats = unsafe {
                raw_slice(
                    rendering.p_color_attachment_formats,
                    rendering.color_attachment_count,
                )
            };
            return formats.iter().map(|format| convert_vk_format(*format)).collect();
        }
        next = base.p_next;
    }
    Vec::new()
}

/// True if `desc` lists `state` as dynamic, accounting for the states every
/// Vulkan pipeline of this layer treats as dynamic.
pub fn is_dynamic(desc: &GraphicsPipelineDesc, state: DynamicState) -> bool {
    matches!(state, DynamicState::Viewport | DynamicState::Scissor) || desc.is_dynamic(state)
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::vulkan::dummy::DummyVulkan;

    /// Smallest valid SPIR-V header.
    fn spirv() -> Vec<u8> {
        bytemuck::cast_slice::<u32, u8>(&[0x0723_0203u32, 0x0001_0000, 0, 1, 0]).to_vec()
    }

    fn graphics_desc() -> GraphicsPipelineDesc {
        GraphicsPipelineDesc {
            layout: PipelineLayout(0x99),
            vs: ShaderDesc::new(spirv()),
            ps: ShaderDesc::new(spirv()).with_entry_point("ps_main"),
            render_target_formats: vec![Format::R8G8B8A8Unorm],
            ..Default::default()
        }
    }

    #[test]
    fn test_graphics_pipeline_releases_modules() {
        let dummy = DummyVulkan::new();
        let pipeline =
            build_pipeline(&dummy, &PipelineDesc::Graphics(Box::new(graphics_desc()))).unwrap();
        assert_ne!(pipeline, vk::Pipeline::null());
        assert_eq!(dummy.objects().live_of_kind("shader_module"), 0);
        assert_eq!(dummy.objects().live_count(), 1);
    }

    #[test]
    fn test_partial_module_failure_releases_modules() {
        let dummy = DummyVulkan::new();
        // First module succeeds, second fails.
        dummy.objects().fail_after(1);
        let result = build_pipeline(&dummy, &PipelineDesc::Graphics(Box::new(graphics_desc())));
        assert_eq!(result, Err(ApiError::OutOfMemory));
        dummy.objects().clear_failures();
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_pipeline_failure_releases_modules() {
        let dummy = DummyVulkan::new();
        // Both modules succeed, the pipeline fails.
        dummy.objects().fail_after(2);
        let result = build_pipeline(&dummy, &PipelineDesc::Graphics(Box::new(graphics_desc())));
        assert!(result.is_err());
        dummy.objects().clear_failures();
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_missing_layout_or_shader_rejected() {
        let dummy = DummyVulkan::new();
        let mut desc = graphics_desc();
        desc.layout = PipelineLayout::NULL;
        assert!(matches!(
            build_pipeline(&dummy, &PipelineDesc::Graphics(Box::new(desc))),
            Err(ApiError::InvalidParameter(_))
        ));

        let compute = ComputePipelineDesc {
            layout: PipelineLayout(0x99),
            cs: ShaderDesc::default(),
        };
        assert!(matches!(
            build_pipeline(&dummy, &PipelineDesc::Compute(compute)),
            Err(ApiError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_invalid_spirv_rejected() {
        let dummy = DummyVulkan::new();
        let mut desc = graphics_desc();
        desc.vs = ShaderDesc::new(vec![1, 2, 3]);
        assert!(matches!(
            build_pipeline(&dummy, &PipelineDesc::Graphics(Box::new(desc))),
            Err(ApiError::InvalidParameter(_))
        ));
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_vertex_bindings_deduplicated() {
        let element = |location, binding, stride| InputElement {
            location,
            buffer_binding: binding,
            stride,
            format: Format::R32G32B32Float,
            ..Default::default()
        };
        let bindings =
            vertex_bindings(&[element(0, 0, 24), element(1, 0, 24), element(2, 1, 8)]).unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[1].stride, 8);

        assert!(vertex_bindings(&[element(0, 0, 24), element(1, 0, 12)]).is_err());
    }

    #[test]
    fn test_viewport_and_scissor_always_dynamic() {
        let mut desc = graphics_desc();
        desc.dynamic_states = vec![DynamicState::Scissor, DynamicState::BlendConstant];
        assert_eq!(
            pipeline_dynamic_states(&desc),
            vec![
                vk::DynamicState::VIEWPORT,
                vk::DynamicState::SCISSOR,
                vk::DynamicState::BLEND_CONSTANTS
            ]
        );
        assert!(is_dynamic(&graphics_desc(), DynamicState::Viewport));
    }

    #[test]
    fn test_push_descriptor_layout() {
        let dummy = DummyVulkan::new();
        let desc = DescriptorSetLayoutDesc {
            ranges: vec![DescriptorRange {
                binding: 0,
                count: 1,
                ty: lumen_core::pipeline::DescriptorType::ConstantBuffer,
                visibility: ShaderStage::VERTEX,
            }],
            push_descriptors: true,
        };
        build_descriptor_set_layout(&dummy, &desc).unwrap();
        assert_eq!(dummy.objects().live_of_kind("descriptor_set_layout"), 1);
    }

    #[test]
    fn test_describe_pipeline_layout_in_values() {
        let ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            offset: 16,
            size: 32,
        }];
        let sets = [vk::DescriptorSetLayout::from_raw(0x40)];
        let info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&sets)
            .push_constant_ranges(&ranges);
        let desc = describe_pipeline_layout(&info);
        assert_eq!(
            desc.params,
            vec![
                PipelineLayoutParam::DescriptorSet(DescriptorSetLayout(0x40)),
                PipelineLayoutParam::PushConstants {
                    offset: 4,
                    count: 8,
                    visibility: ShaderStage::PIXEL
                }
            ]
        );
    }

    #[test]
    fn test_describe_graphics_pipeline() {
        let name = c"vs_main";
        let stages = [vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vk::ShaderModule::from_raw(0x10))
            .name(name)];
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::PATCH_LIST);
        let tessellation =
            vk::PipelineTessellationStateCreateInfo::default().patch_control_points(3);
        let formats = [vk::Format::B8G8R8A8_UNORM];
        let mut rendering =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&formats);
        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .input_assembly_state(&input_assembly)
            .tessellation_state(&tessellation)
            .push_next(&mut rendering);

        let desc = describe_graphics_pipeline(&info, |_| vec![7; 4]);
        assert_eq!(desc.vs.code, vec![7; 4]);
        assert_eq!(desc.vs.entry_point.as_deref(), Some("vs_main"));
        assert_eq!(desc.topology, PrimitiveTopology::PatchList(3));
        assert_eq!(desc.render_target_formats, vec![Format::B8G8R8A8Unorm]);
        assert_eq!(desc.stages(), ShaderStage::VERTEX);
    }
}
