//! Command buffers and their lifecycle.
//!
//! # State machine
//!
//! A [`CommandBuffer`] cycles through the states in [`CommandBufferState`] for as long as its manager lives:
//!
//! ```text
//! ReadyForBegin -> IsInsideBegin <-> IsInsideRenderPass
//!                  IsInsideBegin -> HasEnded -> Submitted -> ReadyForBegin
//! ```
//!
//! The last transition happens in [`CommandBuffer::refresh_fence_status()`], once the fence attached at submission
//! is observed as signaled. Every other call made in the wrong state returns
//! [`Error::InvalidCommandBufferState`](crate::Error::InvalidCommandBufferState) and leaves the buffer untouched.
//!
//! Command buffers are owned by a [`CommandBufferManager`], which hands them out as an "active" buffer for rendering
//! and an "upload" buffer for copies that have to happen outside of a render pass.

use anyhow::Result;
use ash::vk;

use crate::{Device, Error};
use crate::render_pass::{Framebuffer, RenderPass, RenderTargetLayout};
use crate::sync::fence::{FenceId, FenceState};

pub use manager::CommandBufferManager;

pub mod manager;

pub(crate) mod command_pool;

/// Recording state of a [`CommandBuffer`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CommandBufferState {
    ReadyForBegin,
    IsInsideBegin,
    IsInsideRenderPass,
    HasEnded,
    Submitted,
}

/// One recordable unit of GPU work. Owns a fence that is signaled when a submission of this buffer completes.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CommandBuffer {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::CommandBuffer,
    pool: vk::CommandPool,
    state: CommandBufferState,
    fence: Option<FenceId>,
    fence_signaled_counter: u64,
    needs_dynamic_state_reset: bool,
}

impl CommandBuffer {
    pub(crate) fn new(device: Device, pool: vk::CommandPool) -> Result<Self> {
        let handle = unsafe { device.allocate_command_buffer(pool, vk::CommandBufferLevel::PRIMARY)? };
        #[cfg(feature = "log-objects")]
        trace!("Created new VkCommandBuffer {handle:p}");
        let fence = device.fence_manager().allocate_fence()?;
        Ok(Self {
            device,
            handle,
            pool,
            state: CommandBufferState::ReadyForBegin,
            fence: Some(fence),
            fence_signaled_counter: 0,
            needs_dynamic_state_reset: false,
        })
    }

    fn invalid_state(&self, operation: &'static str) -> anyhow::Error {
        Error::InvalidCommandBufferState {
            operation,
            state: self.state,
        }
        .into()
    }

    /// Start recording. Requires [`CommandBufferState::ReadyForBegin`].
    /// Dynamic state (viewport, scissor, stencil reference) has to be applied again before the first draw.
    pub fn begin(&mut self) -> Result<()> {
        if self.state != CommandBufferState::ReadyForBegin {
            return Err(self.invalid_state("begin"));
        }
        let info = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            p_next: std::ptr::null(),
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            p_inheritance_info: std::ptr::null(),
        };
        unsafe { self.device.begin_command_buffer(self.handle, &info)? };
        self.needs_dynamic_state_reset = true;
        self.state = CommandBufferState::IsInsideBegin;
        Ok(())
    }

    /// Begin a render pass covering the full extent of `layout`. One clear value should be given per attachment.
    pub fn begin_render_pass(
        &mut self,
        layout: &RenderTargetLayout,
        pass: &RenderPass,
        framebuffer: &Framebuffer,
        clear_values: &[vk::ClearValue],
    ) -> Result<()> {
        match self.state {
            CommandBufferState::IsInsideBegin => {}
            CommandBufferState::IsInsideRenderPass => return Err(Error::AlreadyInsideRenderPass.into()),
            _ => return Err(self.invalid_state("begin_render_pass")),
        }
        let info = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            p_next: std::ptr::null(),
            render_pass: unsafe { pass.handle() },
            framebuffer: unsafe { framebuffer.handle() },
            render_area: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: layout.extent_2d(),
            },
            clear_value_count: clear_values.len() as u32,
            p_clear_values: clear_values.as_ptr(),
        };
        unsafe {
            self.device
                .cmd_begin_render_pass(self.handle, &info, vk::SubpassContents::INLINE);
        }
        self.state = CommandBufferState::IsInsideRenderPass;
        Ok(())
    }

    pub fn end_render_pass(&mut self) -> Result<()> {
        if self.state != CommandBufferState::IsInsideRenderPass {
            return Err(Error::NotInsideRenderPass.into());
        }
        unsafe { self.device.cmd_end_render_pass(self.handle) };
        self.state = CommandBufferState::IsInsideBegin;
        Ok(())
    }

    /// Finish recording. Requires being outside of a render pass. After this, the buffer can only be submitted.
    pub fn end(&mut self) -> Result<()> {
        if self.state != CommandBufferState::IsInsideBegin {
            return Err(self.invalid_state("end"));
        }
        unsafe { self.device.end_command_buffer(self.handle)? };
        self.state = CommandBufferState::HasEnded;
        Ok(())
    }

    /// Make sure the buffer can be submitted and return the fence to signal.
    pub(crate) fn prepare_submit(&mut self) -> Result<vk::Fence> {
        if self.state != CommandBufferState::HasEnded {
            return Err(self.invalid_state("submit"));
        }
        let fences = self.device.fence_manager();
        if self.fence.is_none() {
            self.fence = Some(fences.allocate_fence()?);
        }
        let fence = self
            .fence
            .as_ref()
            .ok_or(Error::FenceStateCorrupted("command buffer has no fence"))?;
        unsafe { fences.handle(fence) }
    }

    pub(crate) fn mark_submitted(&mut self) {
        self.state = CommandBufferState::Submitted;
    }

    /// Poll the fence of a submitted buffer. Once it is signaled, the buffer is reset and becomes
    /// [`CommandBufferState::ReadyForBegin`] again, keeping its fence for the next submission.
    ///
    /// For buffers that are not submitted, this checks that the fence did not get signaled behind our back.
    pub fn refresh_fence_status(&mut self) -> Result<()> {
        let fences = self.device.fence_manager();
        let fence = self
            .fence
            .as_ref()
            .ok_or(Error::FenceStateCorrupted("command buffer has no fence"))?;
        let signaled = fences.get_fence_state(fence)? == FenceState::Signaled;
        if self.state != CommandBufferState::Submitted {
            if signaled {
                return Err(Error::FenceStateCorrupted("fence of a command buffer that was not submitted is signaled").into());
            }
            return Ok(());
        }
        if signaled {
            unsafe {
                self.device
                    .reset_command_buffer(self.handle, vk::CommandBufferResetFlags::RELEASE_RESOURCES)?;
            }
            self.fence_signaled_counter += 1;
            fences.reset_fence(fence)?;
            self.state = CommandBufferState::ReadyForBegin;
            trace!("Command buffer {:p} completed, reusing it", self.handle);
        }
        Ok(())
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    /// Number of times a submission of this buffer was observed as complete.
    pub fn fence_signaled_counter(&self) -> u64 {
        self.fence_signaled_counter
    }

    /// Whether viewport, scissor and stencil reference still have to be recorded since the last [`CommandBuffer::begin()`].
    pub fn needs_dynamic_state_reset(&self) -> bool {
        self.needs_dynamic_state_reset
    }

    pub fn mark_dynamic_state_set(&mut self) {
        self.needs_dynamic_state_reset = false;
    }

    pub fn is_inside_render_pass(&self) -> bool {
        self.state == CommandBufferState::IsInsideRenderPass
    }

    /// Recording, but not inside a render pass.
    pub fn is_outside_render_pass(&self) -> bool {
        self.state == CommandBufferState::IsInsideBegin
    }

    pub fn is_submitted(&self) -> bool {
        self.state == CommandBufferState::Submitted
    }

    pub fn fence(&self) -> Option<&FenceId> {
        self.fence.as_ref()
    }

    /// Get unsafe access to the underlying `VkCommandBuffer` handle.
    /// # Safety
    /// Any vulkan calls that mutate the command buffer's state may put the system in an undefined state.
    pub unsafe fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        let fences = self.device.fence_manager();
        let released = match self.fence.take() {
            Some(fence) if self.state == CommandBufferState::Submitted => {
                let timeout = self.device.settings().cmd_buffer_destroy_timeout;
                fences
                    .wait_and_release_fence(fence, timeout.as_nanos() as u64)
                    .map(|signaled| {
                        if !signaled {
                            warn!("Destroying command buffer {:p} that did not finish executing after {timeout:?}", self.handle);
                        }
                    })
            }
            Some(fence) => fences.release_fence(fence),
            None => Ok(()),
        };
        if let Err(err) = released {
            error!("Could not release fence of command buffer {:p}: {err}", self.handle);
        }
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkCommandBuffer {:p}", self.handle);
        unsafe {
            self.device.free_command_buffer(self.pool, self.handle);
        }
    }
}
