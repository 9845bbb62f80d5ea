//! A [`RawDevice`] that does not talk to a GPU.
//!
//! Submitted work never completes on its own. Call [`HeadlessDevice::complete_submissions()`] to signal every
//! fence that was submitted so far, or enable [`HeadlessDevice::set_complete_on_wait()`] to let blocking waits
//! finish immediately.

use std::collections::HashMap;
use std::slice;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::prelude::VkResult;
use ash::vk;
use ash::vk::Handle;

use crate::backend::{DeviceProperties, RawDevice};

/// Kinds of objects the headless device tracks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Fence,
    CommandPool,
    CommandBuffer,
    RenderPass,
    Framebuffer,
    DescriptorSetLayout,
    PipelineLayout,
    ShaderModule,
    PipelineCache,
    Pipeline,
}

/// A command or queue operation observed by the headless device, in the order it was issued.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Begin(vk::CommandBuffer),
    End(vk::CommandBuffer),
    Reset(vk::CommandBuffer),
    Submit {
        fence: vk::Fence,
        command_buffers: Vec<vk::CommandBuffer>,
    },
    BeginRenderPass {
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: (u32, u32),
        clear_value_count: u32,
    },
    EndRenderPass(vk::CommandBuffer),
    BindPipeline {
        cmd: vk::CommandBuffer,
        pipeline: vk::Pipeline,
    },
    SetViewport {
        cmd: vk::CommandBuffer,
        width: f32,
        height: f32,
    },
    SetScissor {
        cmd: vk::CommandBuffer,
        offset: (i32, i32),
        extent: (u32, u32),
    },
    SetStencilReference {
        cmd: vk::CommandBuffer,
        reference: u32,
    },
    BindDescriptorSets {
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        sets: Vec<vk::DescriptorSet>,
    },
    BindVertexBuffers {
        cmd: vk::CommandBuffer,
        buffers: Vec<vk::Buffer>,
        offsets: Vec<vk::DeviceSize>,
    },
    BindIndexBuffer {
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
    },
    Draw {
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
    },
    DrawIndexed {
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
    },
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_handle: u64,
    fences: HashMap<vk::Fence, bool>,
    pending: Vec<vk::Fence>,
    created: HashMap<ObjectKind, usize>,
    alive: HashMap<ObjectKind, usize>,
    commands: Vec<RecordedCommand>,
    cache_seeds: Vec<usize>,
    complete_on_wait: bool,
}

impl HeadlessState {
    fn create(&mut self, kind: ObjectKind) -> u64 {
        self.next_handle += 1;
        *self.created.entry(kind).or_default() += 1;
        *self.alive.entry(kind).or_default() += 1;
        self.next_handle
    }

    fn destroy(&mut self, kind: ObjectKind, raw: u64) {
        if raw == 0 {
            return;
        }
        let alive = self.alive.entry(kind).or_default();
        *alive = alive.saturating_sub(1);
    }
}

/// See the [module documentation](self).
#[derive(Debug)]
pub struct HeadlessDevice {
    properties: DeviceProperties,
    state: Mutex<HeadlessState>,
}

/// Payload appended after the header in pipeline cache blobs returned by the headless device.
pub const HEADLESS_CACHE_PAYLOAD: &[u8] = b"headless pipeline cache";

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::with_properties(DeviceProperties {
            vendor_id: 0x1AB5,
            device_id: 0x0001,
            pipeline_cache_uuid: *b"headless-device!",
        })
    }

    pub fn with_properties(properties: DeviceProperties) -> Self {
        Self {
            properties,
            state: Mutex::new(HeadlessState::default()),
        }
    }

    fn state(&self) -> MutexGuard<HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, command: RecordedCommand) {
        self.state().commands.push(command);
    }

    /// Signal the fence of every submission made so far. Returns the number of completed submissions.
    pub fn complete_submissions(&self) -> usize {
        let mut state = self.state();
        let pending = std::mem::take(&mut state.pending);
        for fence in &pending {
            state.fences.insert(*fence, true);
        }
        pending.len()
    }

    /// Signal a fence whether or not it was submitted. Returns false for unknown fences.
    pub fn signal_fence(&self, fence: vk::Fence) -> bool {
        let mut state = self.state();
        state.pending.retain(|pending| *pending != fence);
        match state.fences.get_mut(&fence) {
            Some(signaled) => {
                *signaled = true;
                true
            }
            None => false,
        }
    }

    /// When enabled, a blocking wait on a submitted fence completes that submission immediately instead of timing out.
    pub fn set_complete_on_wait(&self, complete: bool) {
        self.state().complete_on_wait = complete;
    }

    /// Number of submissions whose fence has not been signaled yet.
    pub fn pending_submissions(&self) -> usize {
        self.state().pending.len()
    }

    /// Total number of objects of this kind created over the lifetime of the device.
    pub fn created(&self, kind: ObjectKind) -> usize {
        self.state().created.get(&kind).copied().unwrap_or(0)
    }

    /// Number of objects of this kind that were created and not yet destroyed.
    pub fn alive(&self, kind: ObjectKind) -> usize {
        self.state().alive.get(&kind).copied().unwrap_or(0)
    }

    /// All commands recorded so far.
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.state().commands.clone()
    }

    /// Clear the command log.
    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }

    /// Size of the initial data passed to every pipeline cache created so far, in creation order.
    pub fn pipeline_cache_seeds(&self) -> Vec<usize> {
        self.state().cache_seeds.clone()
    }

    /// Build a pipeline cache blob with a valid header for the given device properties.
    pub fn pipeline_cache_blob(properties: &DeviceProperties) -> Vec<u8> {
        let header_size = 16 + vk::UUID_SIZE as u32;
        let mut blob = Vec::with_capacity(header_size as usize + HEADLESS_CACHE_PAYLOAD.len());
        blob.extend_from_slice(&header_size.to_le_bytes());
        blob.extend_from_slice(&(vk::PipelineCacheHeaderVersion::ONE.as_raw() as u32).to_le_bytes());
        blob.extend_from_slice(&properties.vendor_id.to_le_bytes());
        blob.extend_from_slice(&properties.device_id.to_le_bytes());
        blob.extend_from_slice(&properties.pipeline_cache_uuid);
        blob.extend_from_slice(HEADLESS_CACHE_PAYLOAD);
        blob
    }
}

impl RawDevice for HeadlessDevice {
    fn properties(&self) -> DeviceProperties {
        self.properties
    }

    unsafe fn device_wait_idle(&self) -> VkResult<()> {
        self.complete_submissions();
        Ok(())
    }

    unsafe fn get_device_queue(&self, family: u32, index: u32) -> vk::Queue {
        vk::Queue::from_raw(0x1000 + ((family as u64) << 8) + index as u64)
    }

    unsafe fn queue_submit(&self, _queue: vk::Queue, submits: &[vk::SubmitInfo], fence: vk::Fence) -> VkResult<()> {
        let command_buffers = submits
            .iter()
            .filter(|submit| submit.command_buffer_count > 0)
            .flat_map(|submit| slice::from_raw_parts(submit.p_command_buffers, submit.command_buffer_count as usize))
            .copied()
            .collect();
        let mut state = self.state();
        if fence != vk::Fence::null() {
            match state.fences.get(&fence) {
                None => return Err(vk::Result::ERROR_UNKNOWN),
                // Submitting with a fence that is still signaled is invalid usage.
                Some(true) => return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT),
                Some(false) => {}
            }
            state.pending.push(fence);
        }
        state.commands.push(RecordedCommand::Submit {
            fence,
            command_buffers,
        });
        Ok(())
    }

    unsafe fn create_fence(&self, info: &vk::FenceCreateInfo) -> VkResult<vk::Fence> {
        let mut state = self.state();
        let fence = vk::Fence::from_raw(state.create(ObjectKind::Fence));
        state
            .fences
            .insert(fence, info.flags.contains(vk::FenceCreateFlags::SIGNALED));
        Ok(fence)
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        state.fences.remove(&fence);
        state.pending.retain(|pending| *pending != fence);
        state.destroy(ObjectKind::Fence, fence.as_raw());
    }

    unsafe fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        self.state()
            .fences
            .get(&fence)
            .copied()
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }

    unsafe fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> VkResult<()> {
        let mut state = self.state();
        match state.fences.get(&fence).copied() {
            None => Err(vk::Result::ERROR_UNKNOWN),
            Some(true) => Ok(()),
            Some(false) => {
                let submitted = state.pending.contains(&fence);
                if submitted && state.complete_on_wait {
                    state.pending.retain(|pending| *pending != fence);
                    state.fences.insert(fence, true);
                    Ok(())
                } else {
                    Err(vk::Result::TIMEOUT)
                }
            }
        }
    }

    unsafe fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state();
        match state.fences.get_mut(&fence) {
            None => Err(vk::Result::ERROR_UNKNOWN),
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
        }
    }

    unsafe fn create_command_pool(&self, _info: &vk::CommandPoolCreateInfo) -> VkResult<vk::CommandPool> {
        Ok(vk::CommandPool::from_raw(self.state().create(ObjectKind::CommandPool)))
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.state()
            .destroy(ObjectKind::CommandPool, pool.as_raw());
    }

    unsafe fn allocate_command_buffer(&self, _pool: vk::CommandPool, _level: vk::CommandBufferLevel) -> VkResult<vk::CommandBuffer> {
        Ok(vk::CommandBuffer::from_raw(self.state().create(ObjectKind::CommandBuffer)))
    }

    unsafe fn free_command_buffer(&self, _pool: vk::CommandPool, cmd: vk::CommandBuffer) {
        self.state()
            .destroy(ObjectKind::CommandBuffer, cmd.as_raw());
    }

    unsafe fn begin_command_buffer(&self, cmd: vk::CommandBuffer, _info: &vk::CommandBufferBeginInfo) -> VkResult<()> {
        self.record(RecordedCommand::Begin(cmd));
        Ok(())
    }

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.record(RecordedCommand::End(cmd));
        Ok(())
    }

    unsafe fn reset_command_buffer(&self, cmd: vk::CommandBuffer, _flags: vk::CommandBufferResetFlags) -> VkResult<()> {
        self.record(RecordedCommand::Reset(cmd));
        Ok(())
    }

    unsafe fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> VkResult<vk::RenderPass> {
        if info.subpass_count == 0 {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        Ok(vk::RenderPass::from_raw(self.state().create(ObjectKind::RenderPass)))
    }

    unsafe fn destroy_render_pass(&self, pass: vk::RenderPass) {
        self.state()
            .destroy(ObjectKind::RenderPass, pass.as_raw());
    }

    unsafe fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> VkResult<vk::Framebuffer> {
        if info.render_pass == vk::RenderPass::null() {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        Ok(vk::Framebuffer::from_raw(self.state().create(ObjectKind::Framebuffer)))
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state()
            .destroy(ObjectKind::Framebuffer, framebuffer.as_raw());
    }

    unsafe fn create_descriptor_set_layout(&self, _info: &vk::DescriptorSetLayoutCreateInfo) -> VkResult<vk::DescriptorSetLayout> {
        Ok(vk::DescriptorSetLayout::from_raw(self.state().create(ObjectKind::DescriptorSetLayout)))
    }

    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state()
            .destroy(ObjectKind::DescriptorSetLayout, layout.as_raw());
    }

    unsafe fn create_pipeline_layout(&self, _info: &vk::PipelineLayoutCreateInfo) -> VkResult<vk::PipelineLayout> {
        Ok(vk::PipelineLayout::from_raw(self.state().create(ObjectKind::PipelineLayout)))
    }

    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state()
            .destroy(ObjectKind::PipelineLayout, layout.as_raw());
    }

    unsafe fn create_shader_module(&self, info: &vk::ShaderModuleCreateInfo) -> VkResult<vk::ShaderModule> {
        if info.code_size == 0 || info.code_size % 4 != 0 {
            return Err(vk::Result::ERROR_INVALID_SHADER_NV);
        }
        Ok(vk::ShaderModule::from_raw(self.state().create(ObjectKind::ShaderModule)))
    }

    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state()
            .destroy(ObjectKind::ShaderModule, module.as_raw());
    }

    unsafe fn create_pipeline_cache(&self, info: &vk::PipelineCacheCreateInfo) -> VkResult<vk::PipelineCache> {
        let mut state = self.state();
        state.cache_seeds.push(info.initial_data_size);
        Ok(vk::PipelineCache::from_raw(state.create(ObjectKind::PipelineCache)))
    }

    unsafe fn get_pipeline_cache_data(&self, _cache: vk::PipelineCache) -> VkResult<Vec<u8>> {
        Ok(Self::pipeline_cache_blob(&self.properties))
    }

    unsafe fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        self.state()
            .destroy(ObjectKind::PipelineCache, cache.as_raw());
    }

    unsafe fn create_graphics_pipeline(&self, _cache: vk::PipelineCache, info: &vk::GraphicsPipelineCreateInfo) -> VkResult<vk::Pipeline> {
        if info.stage_count == 0 || info.layout == vk::PipelineLayout::null() || info.render_pass == vk::RenderPass::null() {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        Ok(vk::Pipeline::from_raw(self.state().create(ObjectKind::Pipeline)))
    }

    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state()
            .destroy(ObjectKind::Pipeline, pipeline.as_raw());
    }

    unsafe fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, info: &vk::RenderPassBeginInfo, _contents: vk::SubpassContents) {
        self.record(RecordedCommand::BeginRenderPass {
            cmd,
            render_pass: info.render_pass,
            framebuffer: info.framebuffer,
            extent: (info.render_area.extent.width, info.render_area.extent.height),
            clear_value_count: info.clear_value_count,
        });
    }

    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.record(RecordedCommand::EndRenderPass(cmd));
    }

    unsafe fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, _bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.record(RecordedCommand::BindPipeline {
            cmd,
            pipeline,
        });
    }

    unsafe fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, _first: u32, viewports: &[vk::Viewport]) {
        for viewport in viewports {
            self.record(RecordedCommand::SetViewport {
                cmd,
                width: viewport.width,
                height: viewport.height,
            });
        }
    }

    unsafe fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, _first: u32, scissors: &[vk::Rect2D]) {
        for scissor in scissors {
            self.record(RecordedCommand::SetScissor {
                cmd,
                offset: (scissor.offset.x, scissor.offset.y),
                extent: (scissor.extent.width, scissor.extent.height),
            });
        }
    }

    unsafe fn cmd_set_stencil_reference(&self, cmd: vk::CommandBuffer, _face: vk::StencilFaceFlags, reference: u32) {
        self.record(RecordedCommand::SetStencilReference {
            cmd,
            reference,
        });
    }

    unsafe fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        _first_set: u32,
        sets: &[vk::DescriptorSet],
        _dynamic_offsets: &[u32],
    ) {
        self.record(RecordedCommand::BindDescriptorSets {
            cmd,
            layout,
            sets: sets.to_vec(),
        });
    }

    unsafe fn cmd_bind_vertex_buffers(&self, cmd: vk::CommandBuffer, _first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        self.record(RecordedCommand::BindVertexBuffers {
            cmd,
            buffers: buffers.to_vec(),
            offsets: offsets.to_vec(),
        });
    }

    unsafe fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, _offset: vk::DeviceSize, _index_type: vk::IndexType) {
        self.record(RecordedCommand::BindIndexBuffer {
            cmd,
            buffer,
        });
    }

    unsafe fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, _first_instance: u32) {
        self.record(RecordedCommand::Draw {
            cmd,
            vertex_count,
            instance_count,
            first_vertex,
        });
    }

    unsafe fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.record(RecordedCommand::DrawIndexed {
            cmd,
            index_count,
            instance_count,
        });
    }
}
