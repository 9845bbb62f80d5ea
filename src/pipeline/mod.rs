//! The pipeline module mainly exposes the [`PipelineStateCache`](crate::PipelineStateCache) struct, which maps the
//! packed pipeline state of a draw to a native graphics pipeline, creating pipelines on first use and persisting
//! their descriptions to disk.
//!
//! Draw state is accumulated by the [`PendingState`](crate::PendingState) into a
//! [`PipelineStateKey`](crate::PipelineStateKey). Together with the vertex declaration hash and the shader hashes of
//! a [`BoundShaderState`](crate::BoundShaderState) it forms the [`PipelineCacheKey`](crate::PipelineCacheKey) used
//! for lookup.
//!
//! # Correct usage
//! Released pipelines are only destroyed after a few frames. Call
//! [`PipelineStateCache::next_frame()`](crate::PipelineStateCache::next_frame) once per frame.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::Device;
use crate::pipeline::entry::{EntryRuntime, GfxPipelineEntry};
use crate::pipeline::pipeline_layout::PipelineLayout;
use crate::render_pass::RenderPass;

pub mod cache;
pub mod entry;
pub mod key;
pub mod pipeline_layout;
pub mod set_layout;
pub mod shader;
pub mod state;

/// A fully built Vulkan graphics pipeline. Keeps the layout, render pass and shader modules it was created with
/// alive.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Pipeline {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::Pipeline,
    runtime: EntryRuntime,
}

impl Pipeline {
    pub(crate) fn new(device: Device, cache: vk::PipelineCache, entry: &GfxPipelineEntry, runtime: EntryRuntime) -> Result<Self> {
        let handle = entry.create_pipeline(&device, cache, &runtime)?;
        #[cfg(feature = "log-objects")]
        trace!("Created new VkPipeline {handle:p}");
        Ok(Self {
            device,
            handle,
            runtime,
        })
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.runtime.layout
    }

    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.runtime.render_pass
    }

    /// Names of the shaders this pipeline was built from.
    pub fn shader_names(&self) -> Vec<&str> {
        self.runtime.shader_names()
    }

    /// Get unsafe access to the underlying `VkPipeline`.
    /// # Safety
    /// Any vulkan calls that mutate the pipeline may put the system in an undefined state.
    pub unsafe fn handle(&self) -> vk::Pipeline {
        self.handle
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkPipeline {:p}", self.handle);
        unsafe {
            self.device.destroy_pipeline(self.handle);
        }
    }
}
