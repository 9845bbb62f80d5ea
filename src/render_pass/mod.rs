//! Render passes and framebuffers built from a [`RenderTargetsInfo`].
//!
//! A [`RenderPass`] only depends on the [`RenderTargetLayout`], so the same pass is shared by every set of textures
//! with matching formats and actions. A [`Framebuffer`] additionally depends on the actual image views.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::Device;

pub use layout::{AttachmentDesc, AttachmentRef, RenderTargetLayout};
pub use targets::{ClearValueBinding, ColorRenderTarget, DepthStencilRenderTarget, RenderTargetsInfo, RenderTexture};

pub mod layout;
pub mod targets;

/// Wrapper around a `VkRenderPass` with a single subpass.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct RenderPass {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::RenderPass,
    layout: RenderTargetLayout,
}

impl RenderPass {
    pub fn new(device: Device, layout: &RenderTargetLayout) -> Result<Self> {
        let attachments = layout
            .descriptions()
            .iter()
            .map(|desc| desc.to_vk())
            .collect::<Vec<_>>();
        let color_refs = layout
            .color_refs()
            .iter()
            .map(|r| r.to_vk())
            .collect::<Vec<_>>();
        let resolve_refs = layout
            .resolve_refs()
            .iter()
            .map(|r| r.to_vk())
            .collect::<Vec<_>>();
        let depth_ref = layout.depth_stencil_ref().to_vk();

        let subpass = vk::SubpassDescription {
            flags: Default::default(),
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            input_attachment_count: 0,
            p_input_attachments: std::ptr::null(),
            color_attachment_count: color_refs.len() as u32,
            p_color_attachments: color_refs.as_ptr(),
            p_resolve_attachments: if layout.has_resolve() {
                resolve_refs.as_ptr()
            } else {
                std::ptr::null()
            },
            p_depth_stencil_attachment: if layout.has_depth_stencil() {
                &depth_ref
            } else {
                std::ptr::null()
            },
            preserve_attachment_count: 0,
            p_preserve_attachments: std::ptr::null(),
        };
        let info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: Default::default(),
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 0,
            p_dependencies: std::ptr::null(),
        };
        let handle = unsafe { device.create_render_pass(&info)? };
        #[cfg(feature = "log-objects")]
        trace!("Created new VkRenderPass {handle:p}");

        Ok(Self {
            device,
            handle,
            layout: layout.clone(),
        })
    }

    pub fn layout(&self) -> &RenderTargetLayout {
        &self.layout
    }

    /// Get unsafe access to the underlying `VkRenderPass`.
    /// # Safety
    /// Any vulkan calls that mutate the render pass may put the system in an undefined state.
    pub unsafe fn handle(&self) -> vk::RenderPass {
        self.handle
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkRenderPass {:p}", self.handle);
        unsafe {
            self.device.destroy_render_pass(self.handle);
        }
    }
}

/// Wrapper around a `VkFramebuffer`. Keeps the render pass it was created with alive.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Framebuffer {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::Framebuffer,
    render_pass: Arc<RenderPass>,
    views: Vec<vk::ImageView>,
    extent: vk::Extent2D,
}

impl Framebuffer {
    pub fn new(device: Device, render_pass: Arc<RenderPass>, info: &RenderTargetsInfo) -> Result<Self> {
        let views = info.attachment_views();
        let extent = info.extent();
        let create_info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: Default::default(),
            render_pass: unsafe { render_pass.handle() },
            attachment_count: views.len() as u32,
            p_attachments: views.as_ptr(),
            width: extent.width,
            height: extent.height,
            layers: 1,
        };
        let handle = unsafe { device.create_framebuffer(&create_info)? };
        #[cfg(feature = "log-objects")]
        trace!("Created new VkFramebuffer {handle:p}");

        Ok(Self {
            device,
            handle,
            render_pass,
            views,
            extent,
        })
    }

    /// Full structural comparison against a render target configuration, used to rule out hash collisions.
    pub fn matches(&self, render_pass: &RenderPass, info: &RenderTargetsInfo) -> bool {
        self.render_pass.handle == render_pass.handle && self.extent == info.extent() && self.views == info.attachment_views()
    }

    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Get unsafe access to the underlying `VkFramebuffer`.
    /// # Safety
    /// Any vulkan calls that mutate the framebuffer may put the system in an undefined state.
    pub unsafe fn handle(&self) -> vk::Framebuffer {
        self.handle
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkFramebuffer {:p}", self.handle);
        unsafe {
            self.device.destroy_framebuffer(self.handle);
        }
    }
}
