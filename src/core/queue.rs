use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use ash::vk;

use crate::backend::RawDevice;
use crate::command_buffer::CommandBuffer;
use crate::Error;

/// Physical VkQueue object.
#[derive(Debug)]
pub(crate) struct DeviceQueue {
    pub handle: vk::Queue,
}

/// The single queue all command buffers of a device are submitted to. Submission order is the order in which
/// [`Queue::submit()`] is called.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Queue {
    #[derivative(Debug = "ignore")]
    device: Arc<dyn RawDevice>,
    queue: Mutex<DeviceQueue>,
    family_index: u32,
    submit_count: AtomicU64,
}

impl Queue {
    pub(crate) fn new(device: Arc<dyn RawDevice>, family_index: u32) -> Self {
        let handle = unsafe { device.get_device_queue(family_index, 0) };
        Queue {
            device,
            queue: Mutex::new(DeviceQueue {
                handle,
            }),
            family_index,
            submit_count: AtomicU64::new(0),
        }
    }

    fn acquire_device_queue(&self) -> Result<MutexGuard<DeviceQueue>> {
        Ok(self.queue.lock().map_err(|_| Error::PoisonError)?)
    }

    /// Submit a command buffer that has ended recording. The command buffer's fence is attached to the submission,
    /// allocating one first if the buffer does not own a fence. The buffer transitions to
    /// [`CommandBufferState::Submitted`](crate::CommandBufferState::Submitted).
    pub fn submit(&self, cmd: &mut CommandBuffer) -> Result<()> {
        let fence = cmd.prepare_submit()?;
        let handle = unsafe { cmd.handle() };
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            p_next: std::ptr::null(),
            wait_semaphore_count: 0,
            p_wait_semaphores: std::ptr::null(),
            p_wait_dst_stage_mask: std::ptr::null(),
            command_buffer_count: 1,
            p_command_buffers: &handle,
            signal_semaphore_count: 0,
            p_signal_semaphores: std::ptr::null(),
        };
        {
            let queue = self.acquire_device_queue()?;
            unsafe { self.device.queue_submit(queue.handle, std::slice::from_ref(&submit), fence)? };
        }
        cmd.mark_submitted();
        self.submit_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Obtain the raw vulkan handle of a queue.
    pub unsafe fn handle(&self) -> Result<vk::Queue> {
        Ok(self.acquire_device_queue()?.handle)
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Total number of submissions made to this queue.
    pub fn submit_count(&self) -> u64 {
        self.submit_count.load(Ordering::Relaxed)
    }
}
