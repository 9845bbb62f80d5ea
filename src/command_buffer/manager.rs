//! Pooling of command buffers for a single queue.

use std::time::Duration;

use anyhow::Result;

use crate::{Device, Error};
use crate::command_buffer::command_pool::CommandPool;
use crate::command_buffer::{CommandBuffer, CommandBufferState};

/// Owns a command pool and every command buffer allocated from it. Tracks one "active" buffer that receives
/// rendering commands and at most one "upload" buffer for copies that must happen outside of a render pass.
///
/// Buffers are referred to by their index in the manager, which stays valid for the lifetime of the manager.
///
/// # Example
/// ```
/// # use std::sync::Arc;
/// # use vulkan_rhi::*;
/// # use vulkan_rhi::backend::headless::HeadlessDevice;
/// # fn main() -> anyhow::Result<()> {
/// let device = Device::new(Arc::new(HeadlessDevice::new()), RhiSettings::default())?;
/// let mut manager = CommandBufferManager::new(device)?;
/// manager.prepare_for_new_active_command_buffer()?;
/// // ... record commands into manager.active_cmd_buffer()?
/// manager.submit_active_cmd_buffer(false)?;
/// # Ok(())
/// # }
/// ```
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CommandBufferManager {
    #[derivative(Debug = "ignore")]
    device: Device,
    buffers: Vec<CommandBuffer>,
    pool: CommandPool,
    active: Option<usize>,
    upload: Option<usize>,
}

fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

impl CommandBufferManager {
    /// Create a manager with an empty pool.
    pub fn new(device: Device) -> Result<Self> {
        let pool = CommandPool::for_device_queue(device.clone())?;
        Ok(Self {
            device,
            buffers: Vec::new(),
            pool,
            active: None,
            upload: None,
        })
    }

    /// Allocate a new command buffer from the pool and return its index. There is no upper bound on the number of
    /// buffers besides driver limits.
    pub fn create(&mut self) -> Result<usize> {
        let cmd = self.pool.allocate()?;
        self.buffers.push(cmd);
        debug!(
            "Command buffer pool for queue family {} grew to {} buffers",
            self.pool.family(),
            self.buffers.len()
        );
        Ok(self.buffers.len() - 1)
    }

    /// Refresh every buffer and return the first one that is ready to begin, creating one if none is.
    /// This is a linear scan, pools stay small in practice.
    fn find_or_create_ready(&mut self) -> Result<usize> {
        self.refresh_fence_status()?;
        let ready = self
            .buffers
            .iter()
            .position(|cmd| cmd.state() == CommandBufferState::ReadyForBegin);
        match ready {
            Some(index) => Ok(index),
            None => self.create(),
        }
    }

    /// Pick an idle buffer (or create one), begin it and make it the active buffer.
    /// # Errors
    /// Fails if the previous active buffer was not submitted yet.
    pub fn prepare_for_new_active_command_buffer(&mut self) -> Result<usize> {
        if self.active.is_some() {
            return Err(Error::ActiveCommandBufferInUse.into());
        }
        let index = self.find_or_create_ready()?;
        self.buffers[index].begin()?;
        self.active = Some(index);
        Ok(index)
    }

    /// Get the upload buffer, beginning a new one if there is none. Repeated calls return the same buffer until
    /// [`CommandBufferManager::submit_upload_cmd_buffer()`] is called.
    pub fn get_upload_cmd_buffer(&mut self) -> Result<&mut CommandBuffer> {
        let index = match self.upload {
            Some(index) => index,
            None => {
                let index = self.find_or_create_ready()?;
                self.buffers[index].begin()?;
                self.upload = Some(index);
                index
            }
        };
        Ok(&mut self.buffers[index])
    }

    /// The upload buffer, if one was requested since the last upload submit.
    pub fn upload_cmd_buffer(&mut self) -> Result<&mut CommandBuffer> {
        let index = self.upload.ok_or(Error::NoUploadCommandBuffer)?;
        Ok(&mut self.buffers[index])
    }

    pub fn has_pending_upload_cmd_buffer(&self) -> bool {
        self.upload.is_some()
    }

    /// The buffer currently receiving rendering commands.
    pub fn active_cmd_buffer(&mut self) -> Result<&mut CommandBuffer> {
        let index = self.active.ok_or(Error::NoActiveCommandBuffer)?;
        Ok(&mut self.buffers[index])
    }

    pub fn active_cmd_buffer_index(&self) -> Option<usize> {
        self.active
    }

    pub fn upload_cmd_buffer_index(&self) -> Option<usize> {
        self.upload
    }

    fn submit(&mut self, index: usize, wait: bool) -> Result<()> {
        let cmd = &mut self.buffers[index];
        if cmd.is_inside_render_pass() {
            return Err(Error::InvalidCommandBufferState {
                operation: "submit",
                state: cmd.state(),
            }
            .into());
        }
        cmd.end()?;
        self.device.queue().submit(cmd)?;
        if wait {
            let timeout = self.device.settings().cmd_buffer_wait_timeout;
            self.wait_for_cmd_buffer(index, timeout)?;
        }
        Ok(())
    }

    /// End and submit the active buffer, optionally waiting for it to complete. Afterwards there is no active buffer
    /// until [`CommandBufferManager::prepare_for_new_active_command_buffer()`] is called again.
    pub fn submit_active_cmd_buffer(&mut self, wait: bool) -> Result<()> {
        let index = self.active.ok_or(Error::NoActiveCommandBuffer)?;
        self.submit(index, wait)?;
        self.active = None;
        Ok(())
    }

    /// End and submit the upload buffer, optionally waiting for it to complete.
    pub fn submit_upload_cmd_buffer(&mut self, wait: bool) -> Result<()> {
        let index = self.upload.ok_or(Error::NoUploadCommandBuffer)?;
        self.submit(index, wait)?;
        self.upload = None;
        Ok(())
    }

    /// Submit the upload buffer and block until the GPU finished executing it, without a timeout.
    /// Used for one-shot uploads whose results are needed right away.
    pub fn submit_upload_cmd_buffer_and_block(&mut self) -> Result<()> {
        let index = self.upload.ok_or(Error::NoUploadCommandBuffer)?;
        self.submit(index, false)?;
        self.upload = None;
        self.wait_for_cmd_buffer(index, Duration::MAX)
    }

    /// Block until the submitted buffer at `index` completes. A timeout is an error.
    pub fn wait_for_cmd_buffer(&mut self, index: usize, timeout: Duration) -> Result<()> {
        let cmd = self
            .buffers
            .get_mut(index)
            .ok_or(Error::InvalidCommandBufferIndex(index))?;
        if !cmd.is_submitted() {
            return Err(Error::InvalidCommandBufferState {
                operation: "wait",
                state: cmd.state(),
            }
            .into());
        }
        let fence = cmd
            .fence()
            .ok_or(Error::FenceStateCorrupted("submitted command buffer has no fence"))?;
        let signaled = self
            .device
            .fence_manager()
            .wait_for_fence(fence, timeout_ns(timeout))?;
        if !signaled {
            return Err(Error::FenceTimeout(timeout).into());
        }
        cmd.refresh_fence_status()
    }

    /// Poll the fences of all buffers, recycling the ones that finished executing.
    pub fn refresh_fence_status(&mut self) -> Result<()> {
        for cmd in &mut self.buffers {
            cmd.refresh_fence_status()?;
        }
        Ok(())
    }

    pub fn command_buffer(&self, index: usize) -> Option<&CommandBuffer> {
        self.buffers.get(index)
    }

    pub fn command_buffer_mut(&mut self, index: usize) -> Option<&mut CommandBuffer> {
        self.buffers.get_mut(index)
    }

    pub fn num_command_buffers(&self) -> usize {
        self.buffers.len()
    }
}

impl Drop for CommandBufferManager {
    fn drop(&mut self) {
        // Buffers wait for in-flight work and must be freed before their pool.
        self.buffers.clear();
    }
}
