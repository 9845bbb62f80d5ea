pub use ash::vk;

pub use crate::core::app_info::*;
pub use crate::core::error::Error;
pub use crate::core::device::Device;
pub use crate::core::queue::Queue;

pub use crate::backend::{DeviceProperties, RawDevice};

pub use crate::sync::fence::*;

pub use crate::command_buffer::{CommandBuffer, CommandBufferManager, CommandBufferState};

pub use crate::pipeline::Pipeline;
pub use crate::pipeline::key::*;
pub use crate::pipeline::state::*;
pub use crate::pipeline::shader::*;
pub use crate::pipeline::set_layout::*;
pub use crate::pipeline::pipeline_layout::PipelineLayout;
pub use crate::pipeline::cache::*;
pub use crate::pipeline::entry::{GfxPipelineEntry, PIPELINE_CACHE_VERSION};

pub use crate::render_pass::{
    AttachmentDesc, AttachmentRef, ClearValueBinding, ColorRenderTarget, DepthStencilRenderTarget, Framebuffer, RenderPass,
    RenderTargetLayout, RenderTargetsInfo, RenderTexture,
};

pub use crate::pending_state::PendingState;
pub use crate::context::CommandListContext;
pub use crate::deferred_delete::DeletionQueue;
