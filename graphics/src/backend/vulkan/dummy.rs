//! In-memory Vulkan dispatch table for testing.
//!
//! Objects are plain handle values tracked by [`DummyObjects`]; commands are
//! appended to a log so tests can check which native calls were made.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::prelude::VkResult;
use ash::vk;
use ash::vk::Handle;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use super::dispatch::{raw_slice, AllocationId, BindTarget, ImmediateOp, VulkanDispatch};
use crate::backend::dummy::DummyObjects;

static NEXT_DEVICE: AtomicU64 = AtomicU64::new(0x0D00_0000);

/// Native command recorded by the dummy dispatch table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub cmd: u64,
    pub name: &'static str,
}

/// A Vulkan device that only keeps books.
#[derive(Debug)]
pub struct DummyVulkan {
    device: vk::Device,
    objects: DummyObjects,
    memory: Mutex<HashMap<AllocationId, Vec<u8>>>,
    immediate: Mutex<Vec<ImmediateOp>>,
    commands: Mutex<Vec<RecordedCommand>>,
    /// Command buffers allocated from each pool.
    pools: Mutex<HashMap<vk::CommandPool, Vec<vk::CommandBuffer>>>,
    features: vk::PhysicalDeviceFeatures,
}

impl Default for DummyVulkan {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyVulkan {
    pub fn new() -> Self {
        let device = NEXT_DEVICE.fetch_add(0x100, Ordering::Relaxed);
        log::trace!("DummyVulkan: creating device {device:#x}");
        Self {
            device: vk::Device::from_raw(device),
            objects: DummyObjects::new(device << 16),
            memory: Mutex::new(HashMap::new()),
            immediate: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            pools: Mutex::new(HashMap::new()),
            features: vk::PhysicalDeviceFeatures::default()
                .geometry_shader(true)
                .tessellation_shader(true)
                .sampler_anisotropy(true)
                .dual_src_blend(true)
                .independent_blend(true)
                .fill_mode_non_solid(true)
                .multi_viewport(true),
        }
    }

    /// Handle of queue `index` of this device.
    pub fn queue(&self, index: u32) -> vk::Queue {
        vk::Queue::from_raw(self.device.as_raw() + 1 + u64::from(index))
    }

    pub fn objects(&self) -> &DummyObjects {
        &self.objects
    }

    /// Operations executed on the immediate command list, oldest first.
    pub fn immediate_ops(&self) -> Vec<ImmediateOp> {
        self.immediate.lock().clone()
    }

    /// Bytes written to an allocation.
    pub fn memory_contents(&self, allocation: AllocationId) -> Option<Vec<u8>> {
        self.memory.lock().get(&allocation).cloned()
    }

    /// Names of the commands recorded into `cmd`, oldest first.
    pub fn commands_of(&self, cmd: vk::CommandBuffer) -> Vec<&'static str> {
        self.commands
            .lock()
            .iter()
            .filter(|command| command.cmd == cmd.as_raw())
            .map(|command| command.name)
            .collect()
    }

    pub fn clear_log(&self) {
        self.commands.lock().clear();
        self.immediate.lock().clear();
    }

    fn create<T: Handle>(&self, kind: &'static str) -> VkResult<T> {
        self.objects
            .allocate(kind)
            .map(T::from_raw)
            .ok_or(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
    }

    fn create_many<T: Handle + Copy>(&self, kind: &'static str, count: usize) -> VkResult<Vec<T>> {
        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            match self.create::<T>(kind) {
                Ok(handle) => created.push(handle),
                Err(error) => {
                    for handle in created {
                        self.objects.free(handle.as_raw());
                    }
                    return Err(error);
                }
            }
        }
        Ok(created)
    }

    fn destroy<T: Handle>(&self, handle: T) {
        let raw = handle.as_raw();
        if raw != 0 {
            self.objects.free(raw);
        }
    }

    fn record(&self, cmd: vk::CommandBuffer, name: &'static str) {
        self.commands.lock().push(RecordedCommand {
            cmd: cmd.as_raw(),
            name,
        });
    }
}

impl VulkanDispatch for DummyVulkan {
    fn device(&self) -> vk::Device {
        self.device
    }

    fn enabled_features(&self) -> vk::PhysicalDeviceFeatures {
        self.features
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        if format == vk::Format::UNDEFINED {
            return vk::FormatProperties::default();
        }
        let mut features = vk::FormatFeatureFlags::SAMPLED_IMAGE
            | vk::FormatFeatureFlags::TRANSFER_SRC
            | vk::FormatFeatureFlags::TRANSFER_DST;
        if super::conversion::aspect_flags_from_format(format) == vk::ImageAspectFlags::COLOR {
            features |= vk::FormatFeatureFlags::COLOR_ATTACHMENT | vk::FormatFeatureFlags::STORAGE_IMAGE;
        } else {
            features |= vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::empty(),
            optimal_tiling_features: features,
            buffer_features: vk::FormatFeatureFlags::UNIFORM_TEXEL_BUFFER,
        }
    }

    fn create_image(&self, _info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        self.create("image")
    }

    fn destroy_image(&self, image: vk::Image) {
        self.destroy(image);
    }

    fn create_buffer(&self, _info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer> {
        self.create("buffer")
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.destroy(buffer);
    }

    fn create_image_view(&self, _info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        self.create("image_view")
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy(view);
    }

    fn create_buffer_view(&self, _info: &vk::BufferViewCreateInfo<'_>) -> VkResult<vk::BufferView> {
        self.create("buffer_view")
    }

    fn destroy_buffer_view(&self, view: vk::BufferView) {
        self.destroy(view);
    }

    fn create_sampler(&self, _info: &vk::SamplerCreateInfo<'_>) -> VkResult<vk::Sampler> {
        self.create("sampler")
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.destroy(sampler);
    }

    fn allocate_memory(
        &self,
        target: BindTarget,
        location: MemoryLocation,
        name: &str,
    ) -> VkResult<AllocationId> {
        let allocation = self
            .objects
            .allocate("memory")
            .ok_or(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)?;
        log::trace!("DummyVulkan: binding {name} ({location:?}) to {target:?}");
        self.memory.lock().insert(allocation, Vec::new());
        Ok(allocation)
    }

    fn free_memory(&self, allocation: AllocationId) {
        self.memory.lock().remove(&allocation);
        self.objects.free(allocation);
    }

    fn write_memory(&self, allocation: AllocationId, offset: u64, data: &[u8]) -> VkResult<()> {
        let mut memory = self.memory.lock();
        let contents = memory
            .get_mut(&allocation)
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        let start = usize::try_from(offset).map_err(|_| vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        let end = start + data.len();
        if contents.len() < end {
            contents.resize(end, 0);
        }
        contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn execute_immediate(&self, ops: &[ImmediateOp]) -> VkResult<()> {
        // The immediate command list needs a command buffer and a fence.
        let fence: vk::Fence = self.create("immediate_fence")?;
        self.immediate.lock().extend_from_slice(ops);
        self.destroy(fence);
        Ok(())
    }

    fn create_shader_module(
        &self,
        _info: &vk::ShaderModuleCreateInfo<'_>,
    ) -> VkResult<vk::ShaderModule> {
        self.create("shader_module")
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.destroy(module);
    }

    fn create_graphics_pipelines(
        &self,
        infos: &[vk::GraphicsPipelineCreateInfo<'_>],
    ) -> VkResult<Vec<vk::Pipeline>> {
        self.create_many("pipeline", infos.len())
    }

    fn create_compute_pipelines(
        &self,
        infos: &[vk::ComputePipelineCreateInfo<'_>],
    ) -> VkResult<Vec<vk::Pipeline>> {
        self.create_many("pipeline", infos.len())
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy(pipeline);
    }

    fn create_pipeline_layout(
        &self,
        _info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout> {
        self.create("pipeline_layout")
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy(layout);
    }

    fn create_descriptor_set_layout(
        &self,
        _info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorSetLayout> {
        self.create("descriptor_set_layout")
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.destroy(layout);
    }

    fn allocate_descriptor_sets(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        self.create_many("descriptor_set", layouts.len())
    }

    fn free_descriptor_sets(&self, sets: &[vk::DescriptorSet]) {
        for set in sets {
            self.destroy(*set);
        }
    }

    fn update_descriptor_sets(
        &self,
        writes: &[vk::WriteDescriptorSet<'_>],
        copies: &[vk::CopyDescriptorSet<'_>],
    ) {
        log::trace!(
            "DummyVulkan: {} descriptor writes, {} copies",
            writes.len(),
            copies.len()
        );
        self.record(vk::CommandBuffer::null(), "update_descriptor_sets");
    }

    fn create_render_pass(&self, _info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass> {
        self.create("render_pass")
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.destroy(render_pass);
    }

    fn create_framebuffer(
        &self,
        _info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        self.create("framebuffer")
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.destroy(framebuffer);
    }

    fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let buffers = self.create_many("command_buffer", info.command_buffer_count as usize)?;
        self.pools
            .lock()
            .entry(info.command_pool)
            .or_default()
            .extend_from_slice(&buffers);
        Ok(buffers)
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        if let Some(allocated) = self.pools.lock().get_mut(&pool) {
            allocated.retain(|buffer| !buffers.contains(buffer));
        }
        for buffer in buffers {
            self.destroy(*buffer);
        }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let allocated = self.pools.lock().remove(&pool).unwrap_or_default();
        for buffer in allocated {
            self.destroy(buffer);
        }
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        self.record(cmd, "begin_command_buffer");
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.record(cmd, "end_command_buffer");
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        _info: &vk::RenderPassBeginInfo<'_>,
        _contents: vk::SubpassContents,
    ) {
        self.record(cmd, "begin_render_pass");
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.record(cmd, "end_render_pass");
    }

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, _info: &vk::RenderingInfo<'_>) {
        self.record(cmd, "begin_rendering");
    }

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        self.record(cmd, "end_rendering");
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _pipeline: vk::Pipeline,
    ) {
        self.record(cmd, "bind_pipeline");
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        _first_set: u32,
        _sets: &[vk::DescriptorSet],
        _dynamic_offsets: &[u32],
    ) {
        self.record(cmd, "bind_descriptor_sets");
    }

    fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        _first_binding: u32,
        _buffers: &[vk::Buffer],
        _offsets: &[vk::DeviceSize],
    ) {
        self.record(cmd, "bind_vertex_buffers");
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        _index_type: vk::IndexType,
    ) {
        self.record(cmd, "bind_index_buffer");
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, _first: u32, _viewports: &[vk::Viewport]) {
        self.record(cmd, "set_viewport");
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, _first: u32, _scissors: &[vk::Rect2D]) {
        self.record(cmd, "set_scissor");
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, _: u32, _: u32, _: u32, _: u32) {
        self.record(cmd, "draw");
    }

    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, _: u32, _: u32, _: u32, _: i32, _: u32) {
        self.record(cmd, "draw_indexed");
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, _: u32, _: u32, _: u32) {
        self.record(cmd, "dispatch");
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _src: vk::Buffer,
        _dst: vk::Buffer,
        _regions: &[vk::BufferCopy],
    ) {
        self.record(cmd, "copy_buffer");
    }

    fn cmd_copy_image(
        &self,
        cmd: vk::CommandBuffer,
        _src: vk::Image,
        _src_layout: vk::ImageLayout,
        _dst: vk::Image,
        _dst_layout: vk::ImageLayout,
        _regions: &[vk::ImageCopy],
    ) {
        self.record(cmd, "copy_image");
    }

    fn cmd_clear_attachments(
        &self,
        cmd: vk::CommandBuffer,
        _attachments: &[vk::ClearAttachment],
        _rects: &[vk::ClearRect],
    ) {
        self.record(cmd, "clear_attachments");
    }

    fn queue_submit(
        &self,
        _queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        _fence: vk::Fence,
    ) -> VkResult<()> {
        for submit in submits {
            let buffers =
                unsafe { raw_slice(submit.p_command_buffers, submit.command_buffer_count) };
            for cmd in buffers {
                self.record(*cmd, "submit");
            }
        }
        Ok(())
    }

    fn queue_present(&self, _queue: vk::Queue, _info: &vk::PresentInfoKHR<'_>) -> VkResult<bool> {
        self.record(vk::CommandBuffer::null(), "present");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_batch_fails_atomically() {
        let dummy = DummyVulkan::new();
        dummy.objects().fail_after(1);
        let infos = [vk::ComputePipelineCreateInfo::default(); 2];
        assert_eq!(
            dummy.create_compute_pipelines(&infos),
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
        );
        assert_eq!(dummy.objects().live_count(), 0);
    }

    #[test]
    fn test_write_memory_grows() {
        let dummy = DummyVulkan::new();
        let buffer = dummy.create_buffer(&vk::BufferCreateInfo::default()).unwrap();
        let allocation = dummy
            .allocate_memory(BindTarget::Buffer(buffer), MemoryLocation::CpuToGpu, "test")
            .unwrap();
        dummy.write_memory(allocation, 2, &[1, 2]).unwrap();
        assert_eq!(dummy.memory_contents(allocation), Some(vec![0, 0, 1, 2]));
        dummy.free_memory(allocation);
        dummy.destroy_buffer(buffer);
        assert_eq!(dummy.objects().live_count(), 0);
    }
}
