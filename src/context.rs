//! The draw context ties a [`CommandBufferManager`], a [`PendingState`] and a [`PipelineStateCache`] together into
//! the entry points a renderer records frames with.

use anyhow::Result;
use ash::vk;

use crate::{Device, Error};
use crate::command_buffer::{CommandBuffer, CommandBufferManager};
use crate::pending_state::PendingState;
use crate::pipeline::cache::{CacheLoadStatus, PipelineStateCache};
use crate::pipeline::state::PrimitiveType;

/// Records draws into the active command buffer of its manager.
///
/// # Example
/// ```
/// # use std::sync::Arc;
/// # use vulkan_rhi::*;
/// # use vulkan_rhi::backend::headless::HeadlessDevice;
/// # fn main() -> anyhow::Result<()> {
/// let device = Device::new(Arc::new(HeadlessDevice::new()), RhiSettings::default())?;
/// let mut context = CommandListContext::new(device)?;
/// // No render targets were set, so nothing was recorded this frame.
/// context.end_frame()?;
/// assert_eq!(context.manager().num_command_buffers(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CommandListContext {
    #[derivative(Debug = "ignore")]
    device: Device,
    manager: CommandBufferManager,
    pending: PendingState,
    cache: PipelineStateCache,
    load_status: CacheLoadStatus,
}

impl CommandListContext {
    /// Create the pipeline cache, loading it from the files configured in the device settings, and begin the first
    /// active command buffer.
    pub fn new(device: Device) -> Result<Self> {
        let mut cache = PipelineStateCache::new(device.clone())?;
        let load_status = cache.init_and_load(&device.settings().pipeline_cache_files)?;
        let mut manager = CommandBufferManager::new(device.clone())?;
        manager.prepare_for_new_active_command_buffer()?;
        let pending = PendingState::new(device.clone())?;
        Ok(Self {
            device,
            manager,
            pending,
            cache,
            load_status,
        })
    }

    fn prepare_draw(&mut self, primitive: PrimitiveType) -> Result<&mut CommandBuffer> {
        let cmd = self.manager.active_cmd_buffer()?;
        self.pending
            .prepare_draw(cmd, &mut self.cache, primitive)?;
        Ok(cmd)
    }

    /// Draw `num_primitives` primitives starting at `base_vertex`. Zero instances draws a single instance.
    pub fn draw_primitive(&mut self, primitive: PrimitiveType, base_vertex: u32, num_primitives: u32, num_instances: u32) -> Result<()> {
        let device = self.device.clone();
        let cmd = self.prepare_draw(primitive)?;
        unsafe {
            device.cmd_draw(
                cmd.handle(),
                primitive.vertex_count(num_primitives),
                num_instances.max(1),
                base_vertex,
                0,
            );
        }
        Ok(())
    }

    /// Indexed version of [`CommandListContext::draw_primitive()`].
    #[allow(clippy::too_many_arguments)]
    pub fn draw_indexed_primitive(
        &mut self,
        index_buffer: vk::Buffer,
        index_type: vk::IndexType,
        primitive: PrimitiveType,
        base_vertex: i32,
        first_index: u32,
        num_primitives: u32,
        num_instances: u32,
    ) -> Result<()> {
        if index_buffer == vk::Buffer::null() {
            return Err(Error::Uncategorized("indexed draw without an index buffer").into());
        }
        let device = self.device.clone();
        let cmd = self.prepare_draw(primitive)?;
        unsafe {
            device.cmd_bind_index_buffer(cmd.handle(), index_buffer, 0, index_type);
            device.cmd_draw_indexed(
                cmd.handle(),
                primitive.vertex_count(num_primitives),
                num_instances.max(1),
                first_index,
                base_vertex,
                0,
            );
        }
        Ok(())
    }

    fn end_render_pass_if_open(&mut self) -> Result<()> {
        if self.pending.is_inside_render_pass() {
            let cmd = self.manager.active_cmd_buffer()?;
            self.pending.render_pass_end(cmd)?;
        }
        Ok(())
    }

    /// Submit pending uploads ahead of the rendering work that depends on them.
    fn submit_uploads(&mut self) -> Result<()> {
        if self.manager.has_pending_upload_cmd_buffer() {
            self.manager.submit_upload_cmd_buffer(false)?;
        }
        Ok(())
    }

    /// Close the frame: end the open render pass, submit the active buffer without waiting and begin a new one.
    /// Released pipelines move one frame closer to destruction.
    pub fn end_frame(&mut self) -> Result<()> {
        self.end_render_pass_if_open()?;
        self.submit_uploads()?;
        self.manager.submit_active_cmd_buffer(false)?;
        self.manager.prepare_for_new_active_command_buffer()?;
        self.cache.next_frame();
        Ok(())
    }

    /// Give the GPU work early when that is cheap. Outside of a render pass the active buffer is submitted and
    /// replaced, inside one only finished buffers are recycled.
    pub fn submit_commands_hint(&mut self) -> Result<()> {
        if !self.pending.is_inside_render_pass() {
            self.submit_uploads()?;
            self.manager.submit_active_cmd_buffer(false)?;
            self.manager.prepare_for_new_active_command_buffer()?;
        }
        self.manager.refresh_fence_status()
    }

    /// Submit everything recorded so far and block until the GPU finished it, so that results can be read back.
    pub fn prepare_for_cpu_read(&mut self) -> Result<()> {
        self.end_render_pass_if_open()?;
        if self.manager.has_pending_upload_cmd_buffer() {
            self.manager.submit_upload_cmd_buffer(true)?;
        }
        self.manager.submit_active_cmd_buffer(true)?;
        self.manager.prepare_for_new_active_command_buffer()?;
        Ok(())
    }

    /// Drop every cached pipeline. Recorded work is submitted and waited on first, since the active buffer may have
    /// pipelines bound that are about to be destroyed. Recording continues on a new active buffer.
    pub fn rebuild_pipeline_cache(&mut self) -> Result<()> {
        self.prepare_for_cpu_read()?;
        self.cache.rebuild_cache()
    }

    /// Write the pipeline cache to the first file configured in the device settings.
    /// Does nothing when no file is configured.
    pub fn save_pipeline_cache(&self) -> Result<()> {
        match self.device.settings().pipeline_cache_files.first() {
            Some(path) => self.cache.save(path),
            None => Ok(()),
        }
    }

    pub fn pending(&self) -> &PendingState {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingState {
        &mut self.pending
    }

    pub fn manager(&self) -> &CommandBufferManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut CommandBufferManager {
        &mut self.manager
    }

    pub fn cache(&self) -> &PipelineStateCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut PipelineStateCache {
        &mut self.cache
    }

    /// Outcome of loading the pipeline cache at creation.
    pub fn load_status(&self) -> &CacheLoadStatus {
        &self.load_status
    }

    /// The command buffer receiving draws.
    pub fn active_cmd_buffer(&mut self) -> Result<&mut CommandBuffer> {
        self.manager.active_cmd_buffer()
    }

    /// Split borrow of the pending state and the active command buffer, for render pass control.
    pub fn pending_and_cmd(&mut self) -> Result<(&mut PendingState, &mut CommandBuffer)> {
        let cmd = self.manager.active_cmd_buffer()?;
        Ok((&mut self.pending, cmd))
    }
}
