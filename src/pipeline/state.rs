//! Immutable render state objects and the registries that map them to the small ids stored in a
//! [`PipelineStateKey`](crate::pipeline::key::PipelineStateKey).

use std::fmt::Debug;

use anyhow::Result;
use ash::vk;

use crate::{Device, Error};
use crate::pipeline::key::{BLEND_BIT_WIDTH, FORMAT_BIT_WIDTH, MAX_SIMULTANEOUS_RENDER_TARGETS, STENCIL_OP_BIT_WIDTH};

/// Interns distinct values into ids that fit in a key field of a fixed width.
#[derive(Debug)]
struct KeyTable<T> {
    name: &'static str,
    values: Vec<T>,
    first_id: u8,
    capacity: usize,
}

impl<T: PartialEq + Clone + Debug> KeyTable<T> {
    fn new(name: &'static str, bit_width: u32, first_id: u8) -> Self {
        Self {
            name,
            values: Vec::new(),
            first_id,
            capacity: (1usize << bit_width) - first_id as usize,
        }
    }

    fn id_of(&mut self, value: &T) -> Result<u8> {
        if let Some(index) = self.values.iter().position(|v| v == value) {
            return Ok(self.first_id + index as u8);
        }
        if self.values.len() >= self.capacity {
            error!("No {} key id left for {value:?}", self.name);
            return Err(Error::KeyRegistryExhausted(self.name).into());
        }
        self.values.push(value.clone());
        Ok(self.first_id + (self.values.len() - 1) as u8)
    }

    fn len(&self) -> usize {
        self.values.len()
    }
}

/// Owned by the [`Device`]. Blend attachments, stencil operations and render target formats each get their own id
/// space. Ids are stable for the lifetime of the device.
#[derive(Debug)]
pub struct StateKeyRegistry {
    blend: KeyTable<BlendAttachment>,
    stencil: KeyTable<StencilOpDesc>,
    formats: KeyTable<vk::Format>,
}

impl StateKeyRegistry {
    pub fn new() -> Self {
        Self {
            blend: KeyTable::new("blend", BLEND_BIT_WIDTH, 0),
            stencil: KeyTable::new("stencil", STENCIL_OP_BIT_WIDTH, 0),
            // Id 0 means "no format".
            formats: KeyTable::new("format", FORMAT_BIT_WIDTH, 1),
        }
    }

    pub fn blend_id(&mut self, attachment: &BlendAttachment) -> Result<u8> {
        self.blend.id_of(attachment)
    }

    pub fn stencil_id(&mut self, op: &StencilOpDesc) -> Result<u8> {
        self.stencil.id_of(op)
    }

    /// [`vk::Format::UNDEFINED`] always maps to 0.
    pub fn format_id(&mut self, format: vk::Format) -> Result<u8> {
        if format == vk::Format::UNDEFINED {
            return Ok(0);
        }
        self.formats.id_of(&format)
    }

    pub fn num_blend_ids(&self) -> usize {
        self.blend.len()
    }

    pub fn num_stencil_ids(&self) -> usize {
        self.stencil.len()
    }

    pub fn num_format_ids(&self) -> usize {
        self.formats.len()
    }
}

impl Default for StateKeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Blend configuration of a single color attachment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BlendAttachment {
    pub blend_enable: bool,
    pub color_op: vk::BlendOp,
    pub src_color: vk::BlendFactor,
    pub dst_color: vk::BlendFactor,
    pub alpha_op: vk::BlendOp,
    pub src_alpha: vk::BlendFactor,
    pub dst_alpha: vk::BlendFactor,
    pub write_mask: vk::ColorComponentFlags,
}

impl Default for BlendAttachment {
    /// Blending disabled, all channels written.
    fn default() -> Self {
        Self {
            blend_enable: false,
            color_op: vk::BlendOp::ADD,
            src_color: vk::BlendFactor::ONE,
            dst_color: vk::BlendFactor::ZERO,
            alpha_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ZERO,
            write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

impl BlendAttachment {
    /// Classic `src * alpha + dst * (1 - alpha)` blending.
    pub fn alpha_blend() -> Self {
        Self {
            blend_enable: true,
            color_op: vk::BlendOp::ADD,
            src_color: vk::BlendFactor::SRC_ALPHA,
            dst_color: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            alpha_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            write_mask: vk::ColorComponentFlags::RGBA,
        }
    }

    pub fn to_vk(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: self.blend_enable as vk::Bool32,
            src_color_blend_factor: self.src_color,
            dst_color_blend_factor: self.dst_color,
            color_blend_op: self.color_op,
            src_alpha_blend_factor: self.src_alpha,
            dst_alpha_blend_factor: self.dst_alpha,
            alpha_blend_op: self.alpha_op,
            color_write_mask: self.write_mask,
        }
    }
}

/// Blend state for all render targets, together with the key ids of each attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendState {
    attachments: [BlendAttachment; MAX_SIMULTANEOUS_RENDER_TARGETS],
    key_ids: [u8; MAX_SIMULTANEOUS_RENDER_TARGETS],
}

impl BlendState {
    pub fn new(device: &Device, attachments: [BlendAttachment; MAX_SIMULTANEOUS_RENDER_TARGETS]) -> Result<Self> {
        let mut registry = device.key_registry()?;
        let mut key_ids = [0; MAX_SIMULTANEOUS_RENDER_TARGETS];
        for (id, attachment) in key_ids.iter_mut().zip(attachments.iter()) {
            *id = registry.blend_id(attachment)?;
        }
        Ok(Self {
            attachments,
            key_ids,
        })
    }

    /// The same blend configuration on every render target.
    pub fn uniform(device: &Device, attachment: BlendAttachment) -> Result<Self> {
        Self::new(device, [attachment; MAX_SIMULTANEOUS_RENDER_TARGETS])
    }

    /// Blending disabled on every render target.
    pub fn opaque(device: &Device) -> Result<Self> {
        Self::uniform(device, BlendAttachment::default())
    }

    pub fn attachments(&self) -> &[BlendAttachment; MAX_SIMULTANEOUS_RENDER_TARGETS] {
        &self.attachments
    }

    pub fn key_ids(&self) -> &[u8; MAX_SIMULTANEOUS_RENDER_TARGETS] {
        &self.key_ids
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

impl FillMode {
    pub fn to_vk(self) -> vk::PolygonMode {
        match self {
            FillMode::Solid => vk::PolygonMode::FILL,
            FillMode::Wireframe => vk::PolygonMode::LINE,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RasterizerState {
    pub fill_mode: FillMode,
    pub cull_mode: vk::CullModeFlags,
    /// Constant depth bias. Depth bias is enabled when this or the slope scaled bias is non-zero.
    pub depth_bias: f32,
    pub slope_scale_depth_bias: f32,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            fill_mode: FillMode::Solid,
            cull_mode: vk::CullModeFlags::NONE,
            depth_bias: 0.0,
            slope_scale_depth_bias: 0.0,
        }
    }
}

impl RasterizerState {
    pub fn depth_bias_enabled(&self) -> bool {
        self.depth_bias != 0.0 || self.slope_scale_depth_bias != 0.0
    }

    pub fn to_vk(&self) -> vk::PipelineRasterizationStateCreateInfo {
        vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: Default::default(),
            depth_clamp_enable: vk::FALSE,
            rasterizer_discard_enable: vk::FALSE,
            polygon_mode: self.fill_mode.to_vk(),
            cull_mode: self.cull_mode,
            front_face: vk::FrontFace::CLOCKWISE,
            depth_bias_enable: self.depth_bias_enabled() as vk::Bool32,
            depth_bias_constant_factor: self.depth_bias,
            depth_bias_clamp: 0.0,
            depth_bias_slope_factor: self.slope_scale_depth_bias,
            line_width: 1.0,
        }
    }
}

/// Stencil operations for one face.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct StencilOpDesc {
    pub fail_op: vk::StencilOp,
    pub pass_op: vk::StencilOp,
    pub depth_fail_op: vk::StencilOp,
    pub compare_op: vk::CompareOp,
    pub compare_mask: u32,
    pub write_mask: u32,
}

impl Default for StencilOpDesc {
    fn default() -> Self {
        Self {
            fail_op: vk::StencilOp::KEEP,
            pass_op: vk::StencilOp::KEEP,
            depth_fail_op: vk::StencilOp::KEEP,
            compare_op: vk::CompareOp::ALWAYS,
            compare_mask: 0xFF,
            write_mask: 0xFF,
        }
    }
}

impl StencilOpDesc {
    pub fn to_vk(&self, reference: u32) -> vk::StencilOpState {
        vk::StencilOpState {
            fail_op: self.fail_op,
            pass_op: self.pass_op,
            depth_fail_op: self.depth_fail_op,
            compare_op: self.compare_op,
            compare_mask: self.compare_mask,
            write_mask: self.write_mask,
            reference,
        }
    }
}

/// Plain description of a [`DepthStencilState`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DepthStencilDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub stencil_test: bool,
    pub front: StencilOpDesc,
    pub back: StencilOpDesc,
}

impl Default for DepthStencilDesc {
    /// Depth and stencil testing disabled.
    fn default() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            depth_compare: vk::CompareOp::ALWAYS,
            stencil_test: false,
            front: StencilOpDesc::default(),
            back: StencilOpDesc::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepthStencilState {
    desc: DepthStencilDesc,
    front_id: u8,
    back_id: u8,
}

impl DepthStencilState {
    pub fn new(device: &Device, desc: DepthStencilDesc) -> Result<Self> {
        let mut registry = device.key_registry()?;
        let front_id = registry.stencil_id(&desc.front)?;
        let back_id = registry.stencil_id(&desc.back)?;
        Ok(Self {
            desc,
            front_id,
            back_id,
        })
    }

    pub fn disabled(device: &Device) -> Result<Self> {
        Self::new(device, DepthStencilDesc::default())
    }

    pub fn desc(&self) -> &DepthStencilDesc {
        &self.desc
    }

    pub fn front_id(&self) -> u8 {
        self.front_id
    }

    pub fn back_id(&self) -> u8 {
        self.back_id
    }
}

/// What happens to the contents of a render target when a render pass begins.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LoadAction {
    #[default]
    NoAction = 0,
    Load = 1,
    Clear = 2,
}

impl LoadAction {
    pub fn to_vk(self) -> vk::AttachmentLoadOp {
        match self {
            LoadAction::NoAction => vk::AttachmentLoadOp::DONT_CARE,
            LoadAction::Load => vk::AttachmentLoadOp::LOAD,
            LoadAction::Clear => vk::AttachmentLoadOp::CLEAR,
        }
    }
}

/// What happens to the contents of a render target when a render pass ends.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StoreAction {
    #[default]
    NoAction = 0,
    Store = 1,
    MultisampleResolve = 2,
}

impl StoreAction {
    /// A resolved target only keeps the resolve attachment, the multisampled contents are discarded.
    pub fn to_vk(self) -> vk::AttachmentStoreOp {
        match self {
            StoreAction::Store => vk::AttachmentStoreOp::STORE,
            StoreAction::NoAction | StoreAction::MultisampleResolve => vk::AttachmentStoreOp::DONT_CARE,
        }
    }
}

/// Primitive types that can be drawn.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    PointList,
    LineList,
    TriangleList,
    TriangleStrip,
}

impl PrimitiveType {
    pub fn to_topology(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveType::PointList => vk::PrimitiveTopology::POINT_LIST,
            PrimitiveType::LineList => vk::PrimitiveTopology::LINE_LIST,
            PrimitiveType::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveType::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        }
    }

    /// Number of vertices needed to draw `num_primitives` primitives.
    pub fn vertex_count(self, num_primitives: u32) -> u32 {
        match self {
            PrimitiveType::PointList => num_primitives,
            PrimitiveType::LineList => num_primitives * 2,
            PrimitiveType::TriangleList => num_primitives * 3,
            PrimitiveType::TriangleStrip => num_primitives + 2,
        }
    }
}
