//! Dispatch table backed by a real `ash::Device`.
//!
//! Memory for objects the layer creates itself comes from `gpu-allocator`.
//! Staged uploads and initial layout transitions run on a small ring of
//! one-time command buffers, each guarded by a fence that is waited on
//! before the call returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::prelude::VkResult;
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use super::dispatch::{AllocationId, BindTarget, ImmediateOp, VulkanDispatch};

/// Descriptor sets per type in the layer's own descriptor pool.
const DESCRIPTOR_POOL_SIZE: u32 = 256;

struct ImmediateFrame {
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
}

struct ImmediateContext {
    pool: vk::CommandPool,
    frames: Vec<ImmediateFrame>,
    next: usize,
}

/// Forwards every trampoline to `ash`.
pub struct AshDispatch {
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    swapchain: ash::khr::swapchain::Device,
    queue: vk::Queue,
    features: vk::PhysicalDeviceFeatures,
    allocator: Mutex<Allocator>,
    allocations: Mutex<HashMap<AllocationId, Allocation>>,
    next_allocation: AtomicU64,
    immediate: Mutex<ImmediateContext>,
    descriptor_pool: vk::DescriptorPool,
}

impl std::fmt::Debug for AshDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AshDispatch")
            .field("device", &self.device.handle())
            .field("queue", &self.queue)
            .field("allocations", &self.allocations.lock().len())
            .finish()
    }
}

impl AshDispatch {
    /// Wrap a device the application just created.
    ///
    /// `queue` must belong to `queue_family_index` and support graphics or
    /// transfer operations; the immediate command list submits to it.
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue: vk::Queue,
        queue_family_index: u32,
        features: vk::PhysicalDeviceFeatures,
        immediate_frames: u32,
    ) -> VkResult<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|e| {
            log::error!("Failed to create memory allocator: {}", e);
            vk::Result::ERROR_INITIALIZATION_FAILED
        })?;

        let immediate = create_immediate_context(&device, queue_family_index, immediate_frames)?;

        let pool_sizes = [
            vk::DescriptorType::SAMPLER,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::DescriptorType::SAMPLED_IMAGE,
            vk::DescriptorType::STORAGE_IMAGE,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::DescriptorType::STORAGE_BUFFER,
        ]
        .map(|ty| vk::DescriptorPoolSize {
            ty,
            descriptor_count: DESCRIPTOR_POOL_SIZE,
        });
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(DESCRIPTOR_POOL_SIZE)
            .pool_sizes(&pool_sizes);
        let descriptor_pool = match unsafe { device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                destroy_immediate_context(&device, &immediate);
                return Err(e);
            }
        };

        Ok(Self {
            instance: instance.clone(),
            physical_device,
            swapchain: ash::khr::swapchain::Device::new(instance, &device),
            device,
            queue,
            features,
            allocator: Mutex::new(allocator),
            allocations: Mutex::new(HashMap::new()),
            next_allocation: AtomicU64::new(1),
            immediate: Mutex::new(immediate),
            descriptor_pool,
        })
    }

    fn record_op(&self, cmd: vk::CommandBuffer, op: &ImmediateOp) {
        unsafe {
            match *op {
                ImmediateOp::ImageBarrier {
                    image,
                    range,
                    old_layout,
                    new_layout,
                    src_access,
                    dst_access,
                    src_stage,
                    dst_stage,
                } => {
                    let barrier = vk::ImageMemoryBarrier::default()
                        .old_layout(old_layout)
                        .new_layout(new_layout)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(image)
                        .subresource_range(range)
                        .src_access_mask(src_access)
                        .dst_access_mask(dst_access);
                    self.device.cmd_pipeline_barrier(
                        cmd,
                        src_stage,
                        dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier],
                    );
                }
                ImmediateOp::BufferBarrier {
                    buffer,
                    src_access,
                    dst_access,
                    src_stage,
                    dst_stage,
                } => {
                    let barrier = vk::BufferMemoryBarrier::default()
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .buffer(buffer)
                        .offset(0)
                        .size(vk::WHOLE_SIZE)
                        .src_access_mask(src_access)
                        .dst_access_mask(dst_access);
                    self.device.cmd_pipeline_barrier(
                        cmd,
                        src_stage,
                        dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[barrier],
                        &[],
                    );
                }
                ImmediateOp::CopyBufferToImage {
                    buffer,
                    image,
                    region,
                } => {
                    self.device.cmd_copy_buffer_to_image(
                        cmd,
                        buffer,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
                ImmediateOp::CopyBuffer { src, dst, region } => {
                    self.device.cmd_copy_buffer(cmd, src, dst, &[region]);
                }
            }
        }
    }
}

fn create_immediate_context(
    device: &ash::Device,
    queue_family_index: u32,
    frames: u32,
) -> VkResult<ImmediateContext> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(queue_family_index);
    let pool = unsafe { device.create_command_pool(&pool_info, None) }?;

    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(frames.max(1));
    let buffers = match unsafe { device.allocate_command_buffers(&alloc_info) } {
        Ok(buffers) => buffers,
        Err(e) => {
            unsafe { device.destroy_command_pool(pool, None) };
            return Err(e);
        }
    };

    let mut context = ImmediateContext {
        pool,
        frames: Vec::with_capacity(buffers.len()),
        next: 0,
    };
    for cmd in buffers {
        // Fences start signaled so the first wait on each frame returns at once.
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        match unsafe { device.create_fence(&fence_info, None) } {
            Ok(fence) => context.frames.push(ImmediateFrame { cmd, fence }),
            Err(e) => {
                destroy_immediate_context(device, &context);
                return Err(e);
            }
        }
    }
    Ok(context)
}

fn destroy_immediate_context(device: &ash::Device, context: &ImmediateContext) {
    unsafe {
        for frame in &context.frames {
            device.destroy_fence(frame.fence, None);
        }
        // Destroying the pool frees its command buffers.
        device.destroy_command_pool(context.pool, None);
    }
}

impl Drop for AshDispatch {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }

        let leaked: Vec<_> = self.allocations.lock().drain().collect();
        if !leaked.is_empty() {
            log::warn!("AshDispatch: freeing {} leaked allocations", leaked.len());
        }
        let mut allocator = self.allocator.lock();
        for (_, allocation) in leaked {
            let _ = allocator.free(allocation);
        }
        drop(allocator);

        destroy_immediate_context(&self.device, &self.immediate.lock());
        unsafe {
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
        }
    }
}

impl VulkanDispatch for AshDispatch {
    fn device(&self) -> vk::Device {
        self.device.handle()
    }

    fn enabled_features(&self) -> vk::PhysicalDeviceFeatures {
        self.features
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        unsafe { self.device.create_image(info, None) }
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) }
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer> {
        unsafe { self.device.create_buffer(info, None) }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        unsafe { self.device.create_image_view(info, None) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_buffer_view(&self, info: &vk::BufferViewCreateInfo<'_>) -> VkResult<vk::BufferView> {
        unsafe { self.device.create_buffer_view(info, None) }
    }

    fn destroy_buffer_view(&self, view: vk::BufferView) {
        unsafe { self.device.destroy_buffer_view(view, None) }
    }

    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> VkResult<vk::Sampler> {
        unsafe { self.device.create_sampler(info, None) }
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) }
    }

    fn allocate_memory(
        &self,
        target: BindTarget,
        location: MemoryLocation,
        name: &str,
    ) -> VkResult<AllocationId> {
        let (requirements, linear) = match target {
            BindTarget::Image(image) => (
                unsafe { self.device.get_image_memory_requirements(image) },
                false,
            ),
            BindTarget::Buffer(buffer) => (
                unsafe { self.device.get_buffer_memory_requirements(buffer) },
                true,
            ),
        };

        let allocation = self
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                log::warn!("Failed to allocate memory for {}: {}", name, e);
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            })?;

        let bound = unsafe {
            match target {
                BindTarget::Image(image) => {
                    self.device
                        .bind_image_memory(image, allocation.memory(), allocation.offset())
                }
                BindTarget::Buffer(buffer) => {
                    self.device
                        .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                }
            }
        };
        if let Err(e) = bound {
            let _ = self.allocator.lock().free(allocation);
            return Err(e);
        }

        let id = self.next_allocation.fetch_add(1, Ordering::Relaxed);
        self.allocations.lock().insert(id, allocation);
        Ok(id)
    }

    fn free_memory(&self, allocation: AllocationId) {
        let Some(allocation) = self.allocations.lock().remove(&allocation) else {
            log::warn!("AshDispatch: freeing unknown allocation {}", allocation);
            return;
        };
        if let Err(e) = self.allocator.lock().free(allocation) {
            log::warn!("Failed to free memory: {}", e);
        }
    }

    fn write_memory(&self, allocation: AllocationId, offset: u64, data: &[u8]) -> VkResult<()> {
        let mut allocations = self.allocations.lock();
        let mapped = allocations
            .get_mut(&allocation)
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        let start = usize::try_from(offset).map_err(|_| vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        let target = mapped
            .get_mut(start..start + data.len())
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn execute_immediate(&self, ops: &[ImmediateOp]) -> VkResult<()> {
        let mut context = self.immediate.lock();
        let index = context.next;
        context.next = (index + 1) % context.frames.len();
        let ImmediateFrame { cmd, fence } = context.frames[index];

        unsafe {
            self.device.wait_for_fences(&[fence], true, u64::MAX)?;
            self.device.reset_fences(&[fence])?;
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device.begin_command_buffer(cmd, &begin_info)?;
            for op in ops {
                self.record_op(cmd, op);
            }
            self.device.end_command_buffer(cmd)?;

            let command_buffers = [cmd];
            let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
            self.device.queue_submit(self.queue, &[submit], fence)?;
            self.device.wait_for_fences(&[fence], true, u64::MAX)
        }
    }

    fn create_shader_module(
        &self,
        info: &vk::ShaderModuleCreateInfo<'_>,
    ) -> VkResult<vk::ShaderModule> {
        unsafe { self.device.create_shader_module(info, None) }
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_graphics_pipelines(
        &self,
        infos: &[vk::GraphicsPipelineCreateInfo<'_>],
    ) -> VkResult<Vec<vk::Pipeline>> {
        unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), infos, None)
                .map_err(|(created, e)| {
                    for pipeline in created.into_iter().filter(|p| *p != vk::Pipeline::null()) {
                        self.device.destroy_pipeline(pipeline, None);
                    }
                    e
                })
        }
    }

    fn create_compute_pipelines(
        &self,
        infos: &[vk::ComputePipelineCreateInfo<'_>],
    ) -> VkResult<Vec<vk::Pipeline>> {
        unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), infos, None)
                .map_err(|(created, e)| {
                    for pipeline in created.into_iter().filter(|p| *p != vk::Pipeline::null()) {
                        self.device.destroy_pipeline(pipeline, None);
                    }
                    e
                })
        }
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout> {
        unsafe { self.device.create_pipeline_layout(info, None) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorSetLayout> {
        unsafe { self.device.create_descriptor_set_layout(info, None) }
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn allocate_descriptor_sets(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(layouts);
        unsafe { self.device.allocate_descriptor_sets(&info) }
    }

    fn free_descriptor_sets(&self, sets: &[vk::DescriptorSet]) {
        if let Err(e) = unsafe { self.device.free_descriptor_sets(self.descriptor_pool, sets) } {
            log::warn!("Failed to free descriptor sets: {:?}", e);
        }
    }

    fn update_descriptor_sets(
        &self,
        writes: &[vk::WriteDescriptorSet<'_>],
        copies: &[vk::CopyDescriptorSet<'_>],
    ) {
        unsafe { self.device.update_descriptor_sets(writes, copies) }
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass> {
        unsafe { self.device.create_render_pass(info, None) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        unsafe { self.device.create_framebuffer(info, None) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        unsafe { self.device.allocate_command_buffers(info) }
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        unsafe { self.device.begin_command_buffer(cmd, info) }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    ) {
        unsafe { self.device.cmd_begin_render_pass(cmd, info, contents) }
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) }
    }

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, info: &vk::RenderingInfo<'_>) {
        unsafe { self.device.cmd_begin_rendering(cmd, info) }
    }

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_rendering(cmd) }
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe { self.device.cmd_bind_pipeline(cmd, bind_point, pipeline) }
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(cmd, bind_point, layout, first_set, sets, dynamic_offsets)
        }
    }

    fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(cmd, first_binding, buffers, offsets)
        }
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(cmd, buffer, offset, index_type)
        }
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, first: u32, viewports: &[vk::Viewport]) {
        unsafe { self.device.cmd_set_viewport(cmd, first, viewports) }
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, first: u32, scissors: &[vk::Rect2D]) {
        unsafe { self.device.cmd_set_scissor(cmd, first, scissors) }
    }

    fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device
                .cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance)
        }
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        }
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(cmd, x, y, z) }
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, regions) }
    }

    fn cmd_copy_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_image(cmd, src, src_layout, dst, dst_layout, regions)
        }
    }

    fn cmd_clear_attachments(
        &self,
        cmd: vk::CommandBuffer,
        attachments: &[vk::ClearAttachment],
        rects: &[vk::ClearRect],
    ) {
        unsafe { self.device.cmd_clear_attachments(cmd, attachments, rects) }
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()> {
        unsafe { self.device.queue_submit(queue, submits, fence) }
    }

    fn queue_present(&self, queue: vk::Queue, info: &vk::PresentInfoKHR<'_>) -> VkResult<bool> {
        unsafe { self.swapchain.queue_present(queue, info) }
    }
}
