//! Device-level Vulkan trampolines.
//!
//! [`VulkanDispatch`] is the next layer's device dispatch table as the hooks
//! and the abstract device see it. [`AshDispatch`](super::ash_dispatch::AshDispatch)
//! forwards to a real `ash::Device`; the `dummy` feature provides
//! [`DummyVulkan`](super::dummy::DummyVulkan) for tests.
//!
//! Besides the plain entry points the trait exposes three layer services the
//! abstract device needs for objects it creates itself:
//!
//! * memory allocation and binding ([`allocate_memory`](VulkanDispatch::allocate_memory)),
//! * host writes into such memory ([`write_memory`](VulkanDispatch::write_memory)),
//! * an immediate command list that records, submits and waits
//!   ([`execute_immediate`](VulkanDispatch::execute_immediate)).

use ash::prelude::VkResult;
use ash::vk;
use gpu_allocator::MemoryLocation;

/// Identifier of a memory allocation made through the dispatch table.
pub type AllocationId = u64;

/// Object a memory allocation is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindTarget {
    Image(vk::Image),
    Buffer(vk::Buffer),
}

/// Command recorded on the immediate command list.
#[derive(Debug, Clone, Copy)]
pub enum ImmediateOp {
    ImageBarrier {
        image: vk::Image,
        range: vk::ImageSubresourceRange,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    },
    BufferBarrier {
        buffer: vk::Buffer,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    },
    CopyBufferToImage {
        buffer: vk::Buffer,
        image: vk::Image,
        region: vk::BufferImageCopy,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    },
}

impl ImmediateOp {
    /// Layout transition over `range`.
    pub fn image_barrier(
        image: vk::Image,
        range: vk::ImageSubresourceRange,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> Self {
        ImmediateOp::ImageBarrier {
            image,
            range,
            old_layout,
            new_layout,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::empty(),
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        }
    }

    pub fn with_access(mut self, src: vk::AccessFlags, dst: vk::AccessFlags) -> Self {
        match &mut self {
            ImmediateOp::ImageBarrier {
                src_access,
                dst_access,
                ..
            }
            | ImmediateOp::BufferBarrier {
                src_access,
                dst_access,
                ..
            } => {
                *src_access = src;
                *dst_access = dst;
            }
            _ => {}
        }
        self
    }

    pub fn with_stages(mut self, src: vk::PipelineStageFlags, dst: vk::PipelineStageFlags) -> Self {
        match &mut self {
            ImmediateOp::ImageBarrier {
                src_stage,
                dst_stage,
                ..
            }
            | ImmediateOp::BufferBarrier {
                src_stage,
                dst_stage,
                ..
            } => {
                *src_stage = src;
                *dst_stage = dst;
            }
            _ => {}
        }
        self
    }
}

/// View a `(pointer, count)` pair of a Vulkan structure as a slice.
///
/// # Safety
///
/// `ptr` must be valid for `count` elements for the returned lifetime, which
/// Vulkan's valid usage rules require of every structure the application
/// passes in. A null pointer or zero count yields an empty slice.
pub unsafe fn raw_slice<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if ptr.is_null() || count == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, count as usize)
    }
}

/// Trampolines of a Vulkan device.
///
/// Every method forwards one call to the next layer. Object handles returned
/// here are owned by the caller; the dispatch table keeps no bookkeeping
/// beyond memory allocations.
pub trait VulkanDispatch: Send + Sync {
    /// The dispatchable device handle.
    fn device(&self) -> vk::Device;

    /// Features enabled at device creation.
    fn enabled_features(&self) -> vk::PhysicalDeviceFeatures;

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;

    // ========================================================================
    // Resources
    // ========================================================================

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image>;
    fn destroy_image(&self, image: vk::Image);
    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_buffer_view(&self, info: &vk::BufferViewCreateInfo<'_>) -> VkResult<vk::BufferView>;
    fn destroy_buffer_view(&self, view: vk::BufferView);
    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> VkResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    /// Allocate memory in `location` and bind it to `target`.
    fn allocate_memory(
        &self,
        target: BindTarget,
        location: MemoryLocation,
        name: &str,
    ) -> VkResult<AllocationId>;
    fn free_memory(&self, allocation: AllocationId);
    /// Copy `data` into host-visible memory at `offset`.
    fn write_memory(&self, allocation: AllocationId, offset: u64, data: &[u8]) -> VkResult<()>;

    /// Record `ops` on the immediate command list, submit and wait.
    fn execute_immediate(&self, ops: &[ImmediateOp]) -> VkResult<()>;

    // ========================================================================
    // Pipelines and layouts
    // ========================================================================

    fn create_shader_module(
        &self,
        info: &vk::ShaderModuleCreateInfo<'_>,
    ) -> VkResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);

    /// Create pipelines. On failure no pipeline survives.
    fn create_graphics_pipelines(
        &self,
        infos: &[vk::GraphicsPipelineCreateInfo<'_>],
    ) -> VkResult<Vec<vk::Pipeline>>;
    /// Create pipelines. On failure no pipeline survives.
    fn create_compute_pipelines(
        &self,
        infos: &[vk::ComputePipelineCreateInfo<'_>],
    ) -> VkResult<Vec<vk::Pipeline>>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    /// Allocate sets from the layer's own descriptor pool.
    fn allocate_descriptor_sets(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>>;
    fn free_descriptor_sets(&self, sets: &[vk::DescriptorSet]);
    fn update_descriptor_sets(
        &self,
        writes: &[vk::WriteDescriptorSet<'_>],
        copies: &[vk::CopyDescriptorSet<'_>],
    );

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo<'_>)
        -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // ========================================================================
    // Command buffers
    // ========================================================================

    fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    /// Frees every command buffer still allocated from `pool`.
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    );
    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, info: &vk::RenderingInfo<'_>);
    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer);
    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );
    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    );
    fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );
    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );
    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, first: u32, viewports: &[vk::Viewport]);
    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, first: u32, scissors: &[vk::Rect2D]);
    fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32);
    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    fn cmd_copy_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    );
    fn cmd_clear_attachments(
        &self,
        cmd: vk::CommandBuffer,
        attachments: &[vk::ClearAttachment],
        rects: &[vk::ClearRect],
    );

    // ========================================================================
    // Queues
    // ========================================================================

    fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()>;
    /// Returns `true` if the swap chain is suboptimal.
    fn queue_present(&self, queue: vk::Queue, info: &vk::PresentInfoKHR<'_>) -> VkResult<bool>;
}
