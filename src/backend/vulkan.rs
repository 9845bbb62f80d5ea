//! [`RawDevice`] implementation on top of [`ash`].

use std::slice;

use ash::prelude::VkResult;
use ash::vk;

use crate::backend::{DeviceProperties, RawDevice};

/// Wrapper around an [`ash::Device`]. The logical device is owned by this struct and destroyed when it is dropped,
/// so it must outlive every object created through it.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct VulkanDevice {
    #[derivative(Debug = "ignore")]
    handle: ash::Device,
    properties: DeviceProperties,
}

impl VulkanDevice {
    /// Take ownership of a logical device.
    /// # Safety
    /// * `handle` must be a valid device created from the physical device `properties` were queried from.
    /// * Nothing else may destroy `handle`.
    pub unsafe fn new(handle: ash::Device, properties: &vk::PhysicalDeviceProperties) -> Self {
        Self {
            handle,
            properties: properties.into(),
        }
    }

    /// Get unsafe access to the underlying [`ash::Device`].
    /// # Safety
    /// Destroying the device or objects owned by this crate through this handle leads to undefined behaviour.
    pub unsafe fn handle(&self) -> &ash::Device {
        &self.handle
    }
}

impl RawDevice for VulkanDevice {
    fn properties(&self) -> DeviceProperties {
        self.properties
    }

    unsafe fn device_wait_idle(&self) -> VkResult<()> {
        self.handle.device_wait_idle()
    }

    unsafe fn get_device_queue(&self, family: u32, index: u32) -> vk::Queue {
        self.handle.get_device_queue(family, index)
    }

    unsafe fn queue_submit(&self, queue: vk::Queue, submits: &[vk::SubmitInfo], fence: vk::Fence) -> VkResult<()> {
        self.handle.queue_submit(queue, submits, fence)
    }

    unsafe fn create_fence(&self, info: &vk::FenceCreateInfo) -> VkResult<vk::Fence> {
        self.handle.create_fence(info, None)
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        self.handle.destroy_fence(fence, None)
    }

    unsafe fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        self.handle.get_fence_status(fence)
    }

    unsafe fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()> {
        self.handle.wait_for_fences(slice::from_ref(&fence), true, timeout)
    }

    unsafe fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        self.handle.reset_fences(slice::from_ref(&fence))
    }

    unsafe fn create_command_pool(&self, info: &vk::CommandPoolCreateInfo) -> VkResult<vk::CommandPool> {
        self.handle.create_command_pool(info, None)
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.handle.destroy_command_pool(pool, None)
    }

    unsafe fn allocate_command_buffer(&self, pool: vk::CommandPool, level: vk::CommandBufferLevel) -> VkResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            p_next: std::ptr::null(),
            command_pool: pool,
            level,
            command_buffer_count: 1,
        };
        self.handle
            .allocate_command_buffers(&info)?
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
    }

    unsafe fn free_command_buffer(&self, pool: vk::CommandPool, cmd: vk::CommandBuffer) {
        self.handle.free_command_buffers(pool, slice::from_ref(&cmd))
    }

    unsafe fn begin_command_buffer(&self, cmd: vk::CommandBuffer, info: &vk::CommandBufferBeginInfo) -> VkResult<()> {
        self.handle.begin_command_buffer(cmd, info)
    }

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.handle.end_command_buffer(cmd)
    }

    unsafe fn reset_command_buffer(&self, cmd: vk::CommandBuffer, flags: vk::CommandBufferResetFlags) -> VkResult<()> {
        self.handle.reset_command_buffer(cmd, flags)
    }

    unsafe fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> VkResult<vk::RenderPass> {
        self.handle.create_render_pass(info, None)
    }

    unsafe fn destroy_render_pass(&self, pass: vk::RenderPass) {
        self.handle.destroy_render_pass(pass, None)
    }

    unsafe fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> VkResult<vk::Framebuffer> {
        self.handle.create_framebuffer(info, None)
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.handle.destroy_framebuffer(framebuffer, None)
    }

    unsafe fn create_descriptor_set_layout(&self, info: &vk::DescriptorSetLayoutCreateInfo) -> VkResult<vk::DescriptorSetLayout> {
        self.handle.create_descriptor_set_layout(info, None)
    }

    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.handle.destroy_descriptor_set_layout(layout, None)
    }

    unsafe fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo) -> VkResult<vk::PipelineLayout> {
        self.handle.create_pipeline_layout(info, None)
    }

    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.handle.destroy_pipeline_layout(layout, None)
    }

    unsafe fn create_shader_module(&self, info: &vk::ShaderModuleCreateInfo) -> VkResult<vk::ShaderModule> {
        self.handle.create_shader_module(info, None)
    }

    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.handle.destroy_shader_module(module, None)
    }

    unsafe fn create_pipeline_cache(&self, info: &vk::PipelineCacheCreateInfo) -> VkResult<vk::PipelineCache> {
        self.handle.create_pipeline_cache(info, None)
    }

    unsafe fn get_pipeline_cache_data(&self, cache: vk::PipelineCache) -> VkResult<Vec<u8>> {
        self.handle.get_pipeline_cache_data(cache)
    }

    unsafe fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        self.handle.destroy_pipeline_cache(cache, None)
    }

    unsafe fn create_graphics_pipeline(&self, cache: vk::PipelineCache, info: &vk::GraphicsPipelineCreateInfo) -> VkResult<vk::Pipeline> {
        self.handle
            .create_graphics_pipelines(cache, slice::from_ref(info), None)
            .map_err(|(_, err)| err)?
            .first()
            .copied()
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
    }

    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.handle.destroy_pipeline(pipeline, None)
    }

    unsafe fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, info: &vk::RenderPassBeginInfo, contents: vk::SubpassContents) {
        self.handle.cmd_begin_render_pass(cmd, info, contents)
    }

    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.handle.cmd_end_render_pass(cmd)
    }

    unsafe fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.handle.cmd_bind_pipeline(cmd, bind_point, pipeline)
    }

    unsafe fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, first: u32, viewports: &[vk::Viewport]) {
        self.handle.cmd_set_viewport(cmd, first, viewports)
    }

    unsafe fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, first: u32, scissors: &[vk::Rect2D]) {
        self.handle.cmd_set_scissor(cmd, first, scissors)
    }

    unsafe fn cmd_set_stencil_reference(&self, cmd: vk::CommandBuffer, face: vk::StencilFaceFlags, reference: u32) {
        self.handle.cmd_set_stencil_reference(cmd, face, reference)
    }

    unsafe fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        self.handle
            .cmd_bind_descriptor_sets(cmd, bind_point, layout, first_set, sets, dynamic_offsets)
    }

    unsafe fn cmd_bind_vertex_buffers(&self, cmd: vk::CommandBuffer, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        self.handle.cmd_bind_vertex_buffers(cmd, first_binding, buffers, offsets)
    }

    unsafe fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        self.handle.cmd_bind_index_buffer(cmd, buffer, offset, index_type)
    }

    unsafe fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.handle
            .cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance)
    }

    unsafe fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.handle
            .cmd_draw_indexed(cmd, index_count, instance_count, first_index, vertex_offset, first_instance)
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            self.handle.destroy_device(None);
        }
    }
}
