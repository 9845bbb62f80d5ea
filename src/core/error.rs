//! Exposes the crate error type

use std::sync::PoisonError;
use std::time::Duration;

use ash;
use thiserror::Error;

use crate::command_buffer::CommandBufferState;

/// Error type that this crate can return.
#[derive(Error, Debug)]
pub enum Error {
    /// Generic Vulkan error type. Anything other than a timeout coming back from the driver ends up here,
    /// and should be treated as unrecoverable.
    #[error("Vulkan error: `{0}`")]
    VkError(ash::vk::Result),
    /// A command buffer operation was called in a state that does not allow it.
    #[error("Cannot `{operation}` a command buffer in state {state:?}")]
    InvalidCommandBufferState {
        operation: &'static str,
        state: CommandBufferState,
    },
    /// Tried to begin a render pass while already inside one.
    #[error("Already inside a render pass.")]
    AlreadyInsideRenderPass,
    /// Tried to end a render pass while not inside one.
    #[error("Not inside a render pass.")]
    NotInsideRenderPass,
    /// No command buffer index with this value exists in the manager.
    #[error("Command buffer `{0}` does not exist.")]
    InvalidCommandBufferIndex(usize),
    /// Requested the active command buffer, but none was prepared.
    #[error("No active command buffer. Call `prepare_for_new_active_command_buffer()` first.")]
    NoActiveCommandBuffer,
    /// Submitted the upload command buffer, but none was requested.
    #[error("No upload command buffer.")]
    NoUploadCommandBuffer,
    /// Tried to prepare a new active command buffer while the previous one is still recording.
    #[error("The active command buffer is still recording and must be submitted first.")]
    ActiveCommandBufferInUse,
    /// A blocking wait on a command buffer fence timed out.
    #[error("Timed out after {0:?} waiting for a command buffer fence.")]
    FenceTimeout(Duration),
    /// The fence is not currently handed out by the fence manager.
    #[error("Fence is not in use.")]
    FenceNotInUse,
    /// Fence bookkeeping disagrees with the state reported by the driver.
    #[error("Fence state corrupted: {0}")]
    FenceStateCorrupted(&'static str),
    /// The fence manager was torn down while fences were still handed out.
    #[error("{0} fences are still in use.")]
    FencesInFlight(usize),
    /// A state key table ran out of ids that fit in its bit field.
    #[error("Ran out of {0} key ids.")]
    KeyRegistryExhausted(&'static str),
    /// A pipeline with this key is already registered in the cache.
    #[error("Pipeline is already cached for this key.")]
    PipelineAlreadyCached,
    /// Released a pipeline key that the cache does not hold.
    #[error("No pipeline is cached for this key.")]
    PipelineNotCached,
    /// Attempted to draw while neither a color nor a depth target is set.
    #[error("No render targets set.")]
    NoRenderTargets,
    /// The render target configuration cannot be turned into a render pass.
    #[error("Invalid render target configuration: {0}")]
    InvalidRenderTargets(&'static str),
    /// Attempted to draw without a bound shader state.
    #[error("No bound shader state.")]
    NoBoundShaderState,
    /// The shader stage has no shader module attached.
    #[error("No vertex shader attached to the bound shader state.")]
    NoVertexShader,
    /// SPIR-V byte code length is not a multiple of four.
    #[error("SPIR-V binary has a length of {0} bytes, which is not a multiple of 4.")]
    InvalidSpirv(usize),
    /// Pipeline cache file could not be decoded.
    #[error("Pipeline cache file is corrupt: {0}")]
    CorruptCacheFile(&'static str),
    /// Poisoned mutex
    #[error("Poisoned mutex")]
    PoisonError,
    /// Uncategorized error.
    #[error("Uncategorized error: `{0}`")]
    Uncategorized(&'static str),
}

impl From<ash::vk::Result> for Error {
    fn from(value: ash::vk::Result) -> Self {
        Error::VkError(value)
    }
}

impl From<(Vec<ash::vk::Pipeline>, ash::vk::Result)> for Error {
    fn from((_, result): (Vec<ash::vk::Pipeline>, ash::vk::Result)) -> Self {
        Error::VkError(result)
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::PoisonError
    }
}
