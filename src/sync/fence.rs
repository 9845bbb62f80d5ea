//! Pooled [`VkFence`](vk::Fence) objects used to track completion of submitted command buffers.
//!
//! Fences are owned by the [`FenceManager`]. Everything else refers to a fence through a [`FenceId`], which can
//! not be cloned. Handing the id back through [`FenceManager::release_fence()`] consumes it, so a released fence
//! can not be used by accident afterwards.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use ash::vk;

use crate::backend::RawDevice;
use crate::Error;

/// Status of a fence as last observed by the manager.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FenceState {
    /// Initial state, and the state after every reset.
    NotReady,
    /// The GPU finished the work this fence was submitted with.
    Signaled,
}

/// Wrapper around a [`VkFence`](vk::Fence) object together with its last observed state.
#[derive(Debug)]
pub struct Fence {
    handle: vk::Fence,
    state: FenceState,
}

impl Fence {
    pub fn state(&self) -> FenceState {
        self.state
    }

    /// Get unsafe access to the underlying `VkFence` handle.
    /// # Safety
    /// Any vulkan calls that change the fence status will desync the state tracked by the manager.
    pub unsafe fn handle(&self) -> vk::Fence {
        self.handle
    }
}

/// Non-owning reference to a fence inside a [`FenceManager`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct FenceId(usize);

#[derive(Debug, Default)]
struct FenceManagerInner {
    fences: Vec<Fence>,
    free: Vec<usize>,
    used: Vec<usize>,
}

impl FenceManagerInner {
    fn used_fence(&mut self, fence: &FenceId) -> Result<&mut Fence> {
        if !self.used.contains(&fence.0) {
            return Err(Error::FenceNotInUse.into());
        }
        self.fences
            .get_mut(fence.0)
            .ok_or_else(|| anyhow::Error::from(Error::FenceNotInUse))
    }
}

/// Pools fences so that they can be reused across submissions. A single mutex guards every operation.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct FenceManager {
    #[derivative(Debug = "ignore")]
    device: Arc<dyn RawDevice>,
    inner: Mutex<FenceManagerInner>,
}

impl FenceManager {
    pub(crate) fn new(device: Arc<dyn RawDevice>) -> Self {
        Self {
            device,
            inner: Mutex::new(FenceManagerInner::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<FenceManagerInner>> {
        Ok(self.inner.lock().map_err(|_| Error::PoisonError)?)
    }

    /// Hand out a fence in the [`FenceState::NotReady`] state. Fences on the free list are reused before new ones are created.
    pub fn allocate_fence(&self) -> Result<FenceId> {
        let mut inner = self.lock()?;
        let index = match inner.free.pop() {
            Some(index) => index,
            None => {
                let info = vk::FenceCreateInfo {
                    s_type: vk::StructureType::FENCE_CREATE_INFO,
                    p_next: std::ptr::null(),
                    flags: vk::FenceCreateFlags::empty(),
                };
                let handle = unsafe { self.device.create_fence(&info)? };
                #[cfg(feature = "log-objects")]
                trace!("Created new VkFence {handle:p}");
                inner.fences.push(Fence {
                    handle,
                    state: FenceState::NotReady,
                });
                inner.fences.len() - 1
            }
        };
        inner.used.push(index);
        Ok(FenceId(index))
    }

    /// Returns the cached state if the fence is known to be signaled, otherwise polls it without blocking.
    pub fn get_fence_state(&self, fence: &FenceId) -> Result<FenceState> {
        let mut inner = self.lock()?;
        let fence = inner.used_fence(fence)?;
        if fence.state == FenceState::Signaled {
            return Ok(FenceState::Signaled);
        }
        self.poll(fence)?;
        Ok(fence.state)
    }

    /// Poll a fence that is not yet known to be signaled. Returns true if it is signaled now.
    pub fn check_fence_state(&self, fence: &FenceId) -> Result<bool> {
        let mut inner = self.lock()?;
        let fence = inner.used_fence(fence)?;
        if fence.state != FenceState::NotReady {
            return Err(Error::FenceStateCorrupted("checked a fence that was already signaled").into());
        }
        self.poll(fence)
    }

    fn poll(&self, fence: &mut Fence) -> Result<bool> {
        let signaled = unsafe { self.device.get_fence_status(fence.handle)? };
        if signaled {
            fence.state = FenceState::Signaled;
        }
        Ok(signaled)
    }

    /// Block until the fence is signaled or the timeout expires. A timeout is reported as `Ok(false)`, every other
    /// failure is an error.
    pub fn wait_for_fence(&self, fence: &FenceId, timeout_ns: u64) -> Result<bool> {
        let mut inner = self.lock()?;
        let fence = inner.used_fence(fence)?;
        if fence.state == FenceState::Signaled {
            return Ok(true);
        }
        match unsafe { self.device.wait_for_fence(fence.handle, timeout_ns) } {
            Ok(()) => {
                fence.state = FenceState::Signaled;
                Ok(true)
            }
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(Error::from(err).into()),
        }
    }

    /// Reset the fence to [`FenceState::NotReady`]. The native reset is skipped if the fence is not signaled.
    pub fn reset_fence(&self, fence: &FenceId) -> Result<()> {
        let mut inner = self.lock()?;
        let fence = inner.used_fence(fence)?;
        self.reset(fence)
    }

    fn reset(&self, fence: &mut Fence) -> Result<()> {
        if fence.state != FenceState::NotReady {
            unsafe { self.device.reset_fence(fence.handle)? };
            fence.state = FenceState::NotReady;
        }
        Ok(())
    }

    /// Reset the fence and return it to the free list.
    pub fn release_fence(&self, fence: FenceId) -> Result<()> {
        let mut inner = self.lock()?;
        self.reset(inner.used_fence(&fence)?)?;
        inner.used.retain(|index| *index != fence.0);
        inner.free.push(fence.0);
        Ok(())
    }

    /// Release the fence stored in `slot`, if any, leaving `None` behind.
    pub fn release_fence_slot(&self, slot: &mut Option<FenceId>) -> Result<()> {
        match slot.take() {
            Some(fence) => self.release_fence(fence),
            None => Ok(()),
        }
    }

    /// Wait for the fence if it is not signaled yet, then release it. Returns whether the fence was signaled.
    pub fn wait_and_release_fence(&self, fence: FenceId, timeout_ns: u64) -> Result<bool> {
        let signaled = self.wait_for_fence(&fence, timeout_ns)?;
        self.release_fence(fence)?;
        Ok(signaled)
    }

    /// Get the `VkFence` handle of a fence that is in use.
    /// # Safety
    /// See [`Fence::handle()`]
    pub unsafe fn handle(&self, fence: &FenceId) -> Result<vk::Fence> {
        let mut inner = self.lock()?;
        let handle = inner.used_fence(fence)?.handle;
        Ok(handle)
    }

    /// Number of fences currently handed out.
    pub fn num_used(&self) -> Result<usize> {
        Ok(self.lock()?.used.len())
    }

    /// Number of fences waiting for reuse on the free list.
    pub fn num_free(&self) -> Result<usize> {
        Ok(self.lock()?.free.len())
    }

    /// Number of native fences created by this manager.
    pub fn num_created(&self) -> Result<usize> {
        Ok(self.lock()?.fences.len())
    }

    /// Destroy every fence. Fails if any fence is still handed out, since GPU work might still reference it.
    pub fn deinit(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.used.is_empty() {
            return Err(Error::FencesInFlight(inner.used.len()).into());
        }
        for fence in inner.fences.drain(..) {
            #[cfg(feature = "log-objects")]
            trace!("Destroying VkFence {:p}", fence.handle);
            unsafe {
                self.device.destroy_fence(fence.handle);
            }
        }
        inner.free.clear();
        Ok(())
    }
}

impl Drop for FenceManager {
    fn drop(&mut self) {
        if let Err(err) = self.deinit() {
            error!("Fence manager destroyed with outstanding fences: {err}");
        }
    }
}
