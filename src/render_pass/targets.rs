//! Description of the textures a draw renders into.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use ash::vk;

use crate::pipeline::state::{LoadAction, StoreAction};

/// Clear value declared by a render target texture, used when its load action is [`LoadAction::Clear`].
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub enum ClearValueBinding {
    #[default]
    None,
    Color([f32; 4]),
    DepthStencil {
        depth: f32,
        stencil: u32,
    },
}

impl ClearValueBinding {
    pub fn to_vk(&self) -> vk::ClearValue {
        match *self {
            ClearValueBinding::None => vk::ClearValue::default(),
            ClearValueBinding::Color(color) => vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: color,
                },
            },
            ClearValueBinding::DepthStencil {
                depth,
                stencil,
            } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth,
                    stencil,
                },
            },
        }
    }
}

/// A view of a texture that can be rendered to.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RenderTexture {
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub extent: vk::Extent2D,
    pub clear: ClearValueBinding,
}

impl RenderTexture {
    pub fn new(view: vk::ImageView, format: vk::Format, width: u32, height: u32) -> Self {
        Self {
            view,
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            extent: vk::Extent2D {
                width,
                height,
            },
            clear: ClearValueBinding::None,
        }
    }

    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_clear(mut self, clear: ClearValueBinding) -> Self {
        self.clear = clear;
        self
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ColorRenderTarget {
    /// A single color target without a texture stands for "depth only rendering".
    pub texture: Option<RenderTexture>,
    /// Single sampled texture the target is resolved into at the end of the render pass.
    pub resolve: Option<RenderTexture>,
    pub load: LoadAction,
    pub store: StoreAction,
}

impl ColorRenderTarget {
    pub fn new(texture: RenderTexture, load: LoadAction, store: StoreAction) -> Self {
        Self {
            texture: Some(texture),
            resolve: None,
            load,
            store,
        }
    }

    /// A color slot with nothing bound.
    pub fn null() -> Self {
        Self {
            texture: None,
            resolve: None,
            load: LoadAction::NoAction,
            store: StoreAction::NoAction,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DepthStencilRenderTarget {
    pub texture: RenderTexture,
    pub depth_load: LoadAction,
    pub depth_store: StoreAction,
    pub stencil_load: LoadAction,
    pub stencil_store: StoreAction,
}

impl DepthStencilRenderTarget {
    /// Same actions for depth and stencil.
    pub fn new(texture: RenderTexture, load: LoadAction, store: StoreAction) -> Self {
        Self {
            texture,
            depth_load: load,
            depth_store: store,
            stencil_load: load,
            stencil_store: store,
        }
    }
}

/// The full set of render targets of a render pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderTargetsInfo {
    pub color: Vec<ColorRenderTarget>,
    pub depth_stencil: Option<DepthStencilRenderTarget>,
}

impl RenderTargetsInfo {
    pub fn new(color: Vec<ColorRenderTarget>, depth_stencil: Option<DepthStencilRenderTarget>) -> Self {
        Self {
            color,
            depth_stencil,
        }
    }

    pub fn num_color_targets(&self) -> usize {
        self.color.len()
    }

    pub fn has_depth_stencil(&self) -> bool {
        self.depth_stencil.is_some()
    }

    /// No color and no depth target.
    pub fn is_empty(&self) -> bool {
        self.color.is_empty() && self.depth_stencil.is_none()
    }

    /// Turn a single color target without texture into zero color targets.
    pub(crate) fn demote_null_color_target(&mut self) {
        if self.color.len() == 1 && self.color[0].texture.is_none() {
            self.color.clear();
        }
    }

    pub fn has_resolve(&self) -> bool {
        self.color.iter().any(|target| target.resolve.is_some())
    }

    /// All textures in attachment order: colors, resolve targets, depth-stencil.
    pub(crate) fn textures(&self) -> Vec<Option<RenderTexture>> {
        self.color
            .iter()
            .map(|target| target.texture)
            .chain(self.color.iter().filter_map(|target| target.resolve.map(Some)))
            .chain(self.depth_stencil.iter().map(|ds| Some(ds.texture)))
            .collect()
    }

    /// Image views in attachment order. Color slots without a texture give a null view.
    pub fn attachment_views(&self) -> Vec<vk::ImageView> {
        self.textures()
            .into_iter()
            .map(|texture| texture.map(|t| t.view).unwrap_or_default())
            .collect()
    }

    /// Clear values in attachment order, taken from the clear binding of each texture.
    pub fn clear_values(&self) -> Vec<vk::ClearValue> {
        self.textures()
            .into_iter()
            .map(|texture| texture.map(|t| t.clear.to_vk()).unwrap_or_default())
            .collect()
    }

    /// Extent of the first bound texture.
    pub fn extent(&self) -> vk::Extent2D {
        self.textures()
            .into_iter()
            .flatten()
            .map(|texture| texture.extent)
            .next()
            .unwrap_or_default()
    }

    /// Hash of everything a framebuffer depends on.
    pub fn framebuffer_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.attachment_views().hash(&mut hasher);
        self.extent().hash(&mut hasher);
        hasher.finish()
    }
}
