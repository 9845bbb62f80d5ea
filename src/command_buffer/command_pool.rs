use ash::vk;

use anyhow::Result;

use crate::Device;
use crate::command_buffer::CommandBuffer;

/// Resettable pool on the queue family of the device queue. Every command buffer it hands out must be dropped
/// before the pool.
#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct CommandPool {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::CommandPool,
    family: u32,
}

impl CommandPool {
    pub fn for_device_queue(device: Device) -> Result<Self> {
        let family = device.queue().family_index();
        let info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            p_next: std::ptr::null(),
            // Buffers are recycled one by one once their fence signals.
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: family,
        };
        let handle = unsafe { device.create_command_pool(&info)? };
        #[cfg(feature = "log-objects")]
        trace!("Created new VkCommandPool {handle:p} for queue family {family}");

        Ok(Self {
            device,
            handle,
            family,
        })
    }

    /// Allocate a primary command buffer together with its fence.
    pub fn allocate(&self) -> Result<CommandBuffer> {
        CommandBuffer::new(self.device.clone(), self.handle)
    }

    pub fn family(&self) -> u32 {
        self.family
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkCommandPool {:p}", self.handle);
        unsafe {
            self.device.destroy_command_pool(self.handle);
        }
    }
}
