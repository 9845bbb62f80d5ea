//! Command buffer lifecycle and graphics pipeline state caching on top of Vulkan.
//!
//! This library sits between a renderer and the Vulkan API. It takes care of the parts of a Vulkan backend that
//! every frame goes through: recycling command buffers once the GPU is done with them, and turning the loose render
//! state set before a draw into a native graphics pipeline without creating the same pipeline twice.
//!
//! To get started, import the prelude
//! ```
//! use vulkan_rhi::prelude::*;
//! ```
//!
//! # Example
//!
//! All Vulkan calls go through a [`RawDevice`](crate::backend::RawDevice). For real rendering this is a
//! [`VulkanDevice`](crate::backend::vulkan::VulkanDevice) wrapping an existing `ash::Device`. Here we use the
//! [`HeadlessDevice`](crate::backend::headless::HeadlessDevice), which does not need a GPU.
//! ```
//! use std::sync::Arc;
//! use vulkan_rhi::prelude::*;
//! use vulkan_rhi::backend::headless::HeadlessDevice;
//! # fn main() -> anyhow::Result<()> {
//! let settings = SettingsBuilder::new()
//!     .pipeline_cache_file("pipelines.cache")
//!     .build();
//! let device = Device::new(Arc::new(HeadlessDevice::new()), settings)?;
//! // The context loads the pipeline cache and begins the first command buffer.
//! let mut context = CommandListContext::new(device.clone())?;
//! // Set state through the pending state, then draw.
//! context.pending_mut().set_rasterizer_state(Arc::new(RasterizerState::default()));
//! context.end_frame()?;
//! # Ok(())
//! # }
//! ```
//! For further example code, check out the following modules
//! - [`command_buffer`] for the command buffer state machine and the manager that pools them.
//! - [`sync`] for the fence pool.
//! - [`pipeline`] for the pipeline state key, shader states and the pipeline cache.
//! - [`render_pass`] for render target descriptions, render passes and framebuffers.
//! - [`pending_state`] for draw time state accumulation.

#[macro_use]
extern crate derivative;
#[macro_use] extern crate log;
#[macro_use] extern crate static_assertions;

pub mod prelude;
pub use crate::prelude::*;

pub mod backend;
pub mod core;
pub mod sync;
pub mod command_buffer;
pub mod pipeline;
pub mod render_pass;
pub mod pending_state;
pub mod context;
pub mod deferred_delete;
