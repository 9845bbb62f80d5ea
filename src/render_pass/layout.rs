use std::hash::{Hash, Hasher};

use anyhow::Result;
use ash::vk;
use fxhash::FxHasher64;

use crate::Error;
use crate::pipeline::key::MAX_SIMULTANEOUS_RENDER_TARGETS;
use crate::pipeline::state::LoadAction;
use crate::render_pass::targets::{RenderTargetsInfo, RenderTexture};

/// Reference to an attachment from the subpass.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AttachmentRef {
    pub attachment: u32,
    pub layout: vk::ImageLayout,
}

impl AttachmentRef {
    pub fn unused() -> Self {
        Self {
            attachment: vk::ATTACHMENT_UNUSED,
            layout: vk::ImageLayout::UNDEFINED,
        }
    }

    pub fn to_vk(&self) -> vk::AttachmentReference {
        vk::AttachmentReference {
            attachment: self.attachment,
            layout: self.layout,
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AttachmentDesc {
    pub format: vk::Format,
    pub flags: vk::AttachmentDescriptionFlags,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

impl AttachmentDesc {
    pub fn to_vk(&self) -> vk::AttachmentDescription {
        vk::AttachmentDescription {
            flags: self.flags,
            format: self.format,
            samples: self.samples,
            load_op: self.load_op,
            store_op: self.store_op,
            stencil_load_op: self.stencil_load_op,
            stencil_store_op: self.stencil_store_op,
            initial_layout: self.initial_layout,
            final_layout: self.final_layout,
        }
    }
}

/// Everything about a set of render targets that a render pass depends on, without the actual textures.
/// Two infos with the same formats, sample counts, load/store actions and extent produce equal layouts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderTargetLayout {
    pub(crate) num_attachments: u32,
    pub(crate) num_color: u32,
    pub(crate) color_refs: Vec<AttachmentRef>,
    pub(crate) resolve_refs: Vec<AttachmentRef>,
    pub(crate) depth_stencil_ref: AttachmentRef,
    pub(crate) descriptions: Vec<AttachmentDesc>,
    pub(crate) has_depth_stencil: bool,
    pub(crate) has_resolve: bool,
    pub(crate) hash: u64,
    pub(crate) extent: vk::Extent3D,
}

fn color_desc(texture: &RenderTexture, load: LoadAction, store: vk::AttachmentStoreOp) -> AttachmentDesc {
    let initial_layout = match load {
        LoadAction::Load => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        _ => vk::ImageLayout::UNDEFINED,
    };
    AttachmentDesc {
        format: texture.format,
        flags: vk::AttachmentDescriptionFlags::empty(),
        samples: texture.samples,
        load_op: load.to_vk(),
        store_op: store,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout,
        final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }
}

impl RenderTargetLayout {
    /// Derive the layout of a render target configuration.
    /// # Errors
    /// * [`Error::NoRenderTargets`] if there is neither a color nor a depth target.
    /// * [`Error::InvalidRenderTargets`] if a color slot has no texture, there are too many color targets, or the
    ///   textures do not share the same extent.
    pub fn new(info: &RenderTargetsInfo) -> Result<Self> {
        if info.is_empty() {
            return Err(Error::NoRenderTargets.into());
        }
        if info.color.len() > MAX_SIMULTANEOUS_RENDER_TARGETS {
            return Err(Error::InvalidRenderTargets("too many color targets").into());
        }
        let extent = info.extent();
        let mut descriptions = Vec::new();
        let mut color_refs = Vec::with_capacity(info.color.len());
        for target in &info.color {
            let texture = target
                .texture
                .as_ref()
                .ok_or(Error::InvalidRenderTargets("color target without texture"))?;
            color_refs.push(AttachmentRef {
                attachment: descriptions.len() as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
            descriptions.push(color_desc(texture, target.load, target.store.to_vk()));
        }

        let has_resolve = info.has_resolve();
        let mut resolve_refs = Vec::new();
        if has_resolve {
            for target in &info.color {
                match &target.resolve {
                    Some(resolve) => {
                        resolve_refs.push(AttachmentRef {
                            attachment: descriptions.len() as u32,
                            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                        });
                        let mut desc = color_desc(resolve, LoadAction::NoAction, vk::AttachmentStoreOp::STORE);
                        desc.samples = vk::SampleCountFlags::TYPE_1;
                        descriptions.push(desc);
                    }
                    None => resolve_refs.push(AttachmentRef::unused()),
                }
            }
        }

        let mut depth_stencil_ref = AttachmentRef::unused();
        if let Some(ds) = &info.depth_stencil {
            let texture = &ds.texture;
            let loads = ds.depth_load == LoadAction::Load || ds.stencil_load == LoadAction::Load;
            // Multisampled depth is never resolved or stored.
            let msaa = texture.samples != vk::SampleCountFlags::TYPE_1;
            let (store_op, stencil_store_op) = if msaa {
                (vk::AttachmentStoreOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE)
            } else {
                (ds.depth_store.to_vk(), ds.stencil_store.to_vk())
            };
            depth_stencil_ref = AttachmentRef {
                attachment: descriptions.len() as u32,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            };
            descriptions.push(AttachmentDesc {
                format: texture.format,
                flags: vk::AttachmentDescriptionFlags::empty(),
                samples: texture.samples,
                load_op: ds.depth_load.to_vk(),
                store_op,
                stencil_load_op: ds.stencil_load.to_vk(),
                stencil_store_op,
                initial_layout: if loads {
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
                } else {
                    vk::ImageLayout::UNDEFINED
                },
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            });
        }

        let textures = info.textures();
        if textures.iter().flatten().any(|texture| texture.extent != extent) {
            return Err(Error::InvalidRenderTargets("render target extents differ").into());
        }

        let mut layout = Self {
            num_attachments: descriptions.len() as u32,
            num_color: color_refs.len() as u32,
            color_refs,
            resolve_refs,
            depth_stencil_ref,
            descriptions,
            has_depth_stencil: info.depth_stencil.is_some(),
            has_resolve,
            hash: 0,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        };
        layout.hash = layout.compute_hash();
        Ok(layout)
    }

    pub(crate) fn compute_hash(&self) -> u64 {
        let mut hasher = FxHasher64::default();
        self.num_attachments.hash(&mut hasher);
        self.num_color.hash(&mut hasher);
        self.color_refs.hash(&mut hasher);
        self.resolve_refs.hash(&mut hasher);
        self.depth_stencil_ref.hash(&mut hasher);
        self.descriptions.hash(&mut hasher);
        self.has_depth_stencil.hash(&mut hasher);
        self.has_resolve.hash(&mut hasher);
        self.extent.hash(&mut hasher);
        hasher.finish()
    }

    /// Hash of all fields, used to bucket render passes.
    pub fn layout_hash(&self) -> u64 {
        self.hash
    }

    pub fn num_attachments(&self) -> u32 {
        self.num_attachments
    }

    pub fn num_color_attachments(&self) -> u32 {
        self.num_color
    }

    pub fn has_depth_stencil(&self) -> bool {
        self.has_depth_stencil
    }

    pub fn has_resolve(&self) -> bool {
        self.has_resolve
    }

    pub fn descriptions(&self) -> &[AttachmentDesc] {
        &self.descriptions
    }

    pub fn color_refs(&self) -> &[AttachmentRef] {
        &self.color_refs
    }

    pub fn resolve_refs(&self) -> &[AttachmentRef] {
        &self.resolve_refs
    }

    pub fn depth_stencil_ref(&self) -> &AttachmentRef {
        &self.depth_stencil_ref
    }

    /// Sample count of the first attachment. Every attachment but resolve targets shares it.
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.descriptions
            .first()
            .map(|desc| desc.samples)
            .unwrap_or(vk::SampleCountFlags::TYPE_1)
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }
}
