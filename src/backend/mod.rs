//! The native API boundary.
//!
//! Every Vulkan call made by this crate goes through the [`RawDevice`] trait. Two implementations are provided:
//! - [`VulkanDevice`](vulkan::VulkanDevice) forwards to an [`ash::Device`].
//! - [`HeadlessDevice`](headless::HeadlessDevice) performs no GPU work. It hands out unique handles, records
//!   commands and lets the caller decide when submitted work completes. This is what the test suite runs on.
//!
//! The methods mirror the shape of the corresponding `ash` calls, so that errors are reported as plain
//! [`VkResult`]s and callers can distinguish timeouts from fatal errors.

use ash::prelude::VkResult;
use ash::vk;

pub mod headless;
pub mod vulkan;

/// Identifies the physical device a pipeline cache blob was produced on.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DeviceProperties {
    pub vendor_id: u32,
    pub device_id: u32,
    pub pipeline_cache_uuid: [u8; vk::UUID_SIZE],
}

impl From<&vk::PhysicalDeviceProperties> for DeviceProperties {
    fn from(value: &vk::PhysicalDeviceProperties) -> Self {
        Self {
            vendor_id: value.vendor_id,
            device_id: value.device_id,
            pipeline_cache_uuid: value.pipeline_cache_uuid,
        }
    }
}

/// Subset of the Vulkan device API used by the command buffer and pipeline state layers.
///
/// The unsafe methods are thin wrappers around Vulkan entry points and carry the same valid usage requirements.
/// Handles passed in must have been created by the same implementation.
pub trait RawDevice: Send + Sync {
    fn properties(&self) -> DeviceProperties;

    unsafe fn device_wait_idle(&self) -> VkResult<()>;
    unsafe fn get_device_queue(&self, family: u32, index: u32) -> vk::Queue;
    unsafe fn queue_submit(&self, queue: vk::Queue, submits: &[vk::SubmitInfo], fence: vk::Fence) -> VkResult<()>;

    unsafe fn create_fence(&self, info: &vk::FenceCreateInfo) -> VkResult<vk::Fence>;
    unsafe fn destroy_fence(&self, fence: vk::Fence);
    /// Returns `Ok(false)` when the fence is not yet signaled.
    unsafe fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool>;
    /// Returns `Err(vk::Result::TIMEOUT)` when the timeout expires before the fence is signaled.
    unsafe fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()>;
    unsafe fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;

    unsafe fn create_command_pool(&self, info: &vk::CommandPoolCreateInfo) -> VkResult<vk::CommandPool>;
    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);
    unsafe fn allocate_command_buffer(&self, pool: vk::CommandPool, level: vk::CommandBufferLevel) -> VkResult<vk::CommandBuffer>;
    unsafe fn free_command_buffer(&self, pool: vk::CommandPool, cmd: vk::CommandBuffer);
    unsafe fn begin_command_buffer(&self, cmd: vk::CommandBuffer, info: &vk::CommandBufferBeginInfo) -> VkResult<()>;
    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    unsafe fn reset_command_buffer(&self, cmd: vk::CommandBuffer, flags: vk::CommandBufferResetFlags) -> VkResult<()>;

    unsafe fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> VkResult<vk::RenderPass>;
    unsafe fn destroy_render_pass(&self, pass: vk::RenderPass);
    unsafe fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> VkResult<vk::Framebuffer>;
    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    unsafe fn create_descriptor_set_layout(&self, info: &vk::DescriptorSetLayoutCreateInfo) -> VkResult<vk::DescriptorSetLayout>;
    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    unsafe fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo) -> VkResult<vk::PipelineLayout>;
    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    unsafe fn create_shader_module(&self, info: &vk::ShaderModuleCreateInfo) -> VkResult<vk::ShaderModule>;
    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule);

    unsafe fn create_pipeline_cache(&self, info: &vk::PipelineCacheCreateInfo) -> VkResult<vk::PipelineCache>;
    unsafe fn get_pipeline_cache_data(&self, cache: vk::PipelineCache) -> VkResult<Vec<u8>>;
    unsafe fn destroy_pipeline_cache(&self, cache: vk::PipelineCache);
    unsafe fn create_graphics_pipeline(&self, cache: vk::PipelineCache, info: &vk::GraphicsPipelineCreateInfo) -> VkResult<vk::Pipeline>;
    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    unsafe fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, info: &vk::RenderPassBeginInfo, contents: vk::SubpassContents);
    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    unsafe fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);
    unsafe fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, first: u32, viewports: &[vk::Viewport]);
    unsafe fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, first: u32, scissors: &[vk::Rect2D]);
    unsafe fn cmd_set_stencil_reference(&self, cmd: vk::CommandBuffer, face: vk::StencilFaceFlags, reference: u32);
    unsafe fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    );
    unsafe fn cmd_bind_vertex_buffers(&self, cmd: vk::CommandBuffer, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]);
    unsafe fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType);
    unsafe fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    unsafe fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
}
