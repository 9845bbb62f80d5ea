//! The sync module provides utilities dealing with CPU-GPU synchronization.
//!
//! - The [`fence`] module provides a pool of `VkFence` objects. Command buffers take a fence from it and keep it
//! across submissions.

pub mod fence;
