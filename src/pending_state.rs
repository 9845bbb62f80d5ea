//! Draw time state accumulation.
//!
//! The [`PendingState`] keeps everything that was set since the last draw, and folds every change into the
//! [`PipelineStateKey`] right away. When a draw is issued, the key is complete and the pipeline can be looked up
//! without any further work.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::vk;
use multimap::MultiMap;

use crate::{Device, Error};
use crate::command_buffer::CommandBuffer;
use crate::pipeline::cache::{PipelineDrawState, PipelineStateCache};
use crate::pipeline::key::*;
use crate::pipeline::shader::{BoundShaderState, MAX_VERTEX_STREAMS, VertexStream};
use crate::pipeline::state::{BlendState, DepthStencilState, PrimitiveType, RasterizerState};
use crate::render_pass::{Framebuffer, RenderPass, RenderTargetLayout, RenderTargetsInfo};

/// Accumulates render state between draws and owns the render pass and framebuffer caches.
///
/// # Example
/// ```
/// # use std::sync::Arc;
/// # use vulkan_rhi::*;
/// # use vulkan_rhi::backend::headless::HeadlessDevice;
/// # fn main() -> anyhow::Result<()> {
/// let device = Device::new(Arc::new(HeadlessDevice::new()), RhiSettings::default())?;
/// let mut state = PendingState::new(device.clone())?;
/// let rasterizer = RasterizerState {
///     cull_mode: vk::CullModeFlags::BACK,
///     ..Default::default()
/// };
/// state.set_rasterizer_state(Arc::new(rasterizer));
/// assert_eq!(state.key().get_bits(CULL_MODE_BIT_OFFSET, CULL_MODE_BIT_WIDTH), vk::CullModeFlags::BACK.as_raw() as u64);
/// # Ok(())
/// # }
/// ```
#[derive(Derivative)]
#[derivative(Debug)]
pub struct PendingState {
    #[derivative(Debug = "ignore")]
    device: Device,
    key: PipelineStateKey,
    blend: Arc<BlendState>,
    depth_stencil: Arc<DepthStencilState>,
    rasterizer: Arc<RasterizerState>,
    default_blend: Arc<BlendState>,
    default_depth_stencil: Arc<DepthStencilState>,
    stencil_ref: u32,
    viewport: Option<vk::Viewport>,
    scissor_enabled: bool,
    scissor: vk::Rect2D,
    dynamic_state_dirty: bool,
    bound_shader_state: Option<Arc<Mutex<BoundShaderState>>>,
    streams: [VertexStream; MAX_VERTEX_STREAMS],
    topology: vk::PrimitiveTopology,
    render_targets: RenderTargetsInfo,
    render_targets_dirty: bool,
    inside_render_pass: bool,
    current_layout: Option<RenderTargetLayout>,
    current_render_pass: Option<Arc<RenderPass>>,
    current_framebuffer: Option<Arc<Framebuffer>>,
    #[derivative(Debug = "ignore")]
    render_passes: MultiMap<u64, Arc<RenderPass>>,
    #[derivative(Debug = "ignore")]
    framebuffers: MultiMap<u64, Arc<Framebuffer>>,
    last_bound_pipeline: Option<(vk::CommandBuffer, vk::Pipeline)>,
}

impl PendingState {
    /// Create a pending state with opaque blending, depth and stencil testing disabled and the default rasterizer
    /// state. The key is folded from these defaults.
    pub fn new(device: Device) -> Result<Self> {
        if device.validation_enabled() {
            PipelineStateKey::verify_layout()?;
        }
        let default_blend = Arc::new(BlendState::opaque(&device)?);
        let default_depth_stencil = Arc::new(DepthStencilState::disabled(&device)?);
        let mut state = Self {
            device,
            key: PipelineStateKey::default(),
            blend: default_blend.clone(),
            depth_stencil: default_depth_stencil.clone(),
            rasterizer: Arc::new(RasterizerState::default()),
            default_blend,
            default_depth_stencil,
            stencil_ref: 0,
            viewport: None,
            scissor_enabled: false,
            scissor: vk::Rect2D::default(),
            dynamic_state_dirty: true,
            bound_shader_state: None,
            streams: [VertexStream::default(); MAX_VERTEX_STREAMS],
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            render_targets: RenderTargetsInfo::default(),
            render_targets_dirty: false,
            inside_render_pass: false,
            current_layout: None,
            current_render_pass: None,
            current_framebuffer: None,
            render_passes: MultiMap::new(),
            framebuffers: MultiMap::new(),
            last_bound_pipeline: None,
        };
        state.fold_all()?;
        Ok(state)
    }

    /// Zero the key and go back to the default state objects. Bound shaders and vertex streams are dropped and all
    /// dynamic state is applied again with the next draw. Render targets are kept.
    pub fn reset(&mut self) -> Result<()> {
        self.key.clear();
        self.blend = self.default_blend.clone();
        self.depth_stencil = self.default_depth_stencil.clone();
        self.rasterizer = Arc::new(RasterizerState::default());
        self.stencil_ref = 0;
        self.viewport = None;
        self.scissor_enabled = false;
        self.scissor = vk::Rect2D::default();
        self.bound_shader_state = None;
        self.streams = [VertexStream::default(); MAX_VERTEX_STREAMS];
        self.topology = vk::PrimitiveTopology::TRIANGLE_LIST;
        self.dynamic_state_dirty = true;
        self.last_bound_pipeline = None;
        self.fold_all()
    }

    fn fold_all(&mut self) -> Result<()> {
        self.fold_blend();
        self.fold_depth_stencil();
        self.fold_rasterizer();
        self.fold_topology();
        self.fold_render_targets()
    }

    fn fold_blend(&mut self) {
        for (offset, id) in RT_BLEND_BIT_OFFSETS.iter().zip(self.blend.key_ids()) {
            self.key.set_bits(*offset, BLEND_BIT_WIDTH, *id as u64);
        }
    }

    fn fold_depth_stencil(&mut self) {
        let desc = self.depth_stencil.desc();
        self.key.set_bool(DEPTH_TEST_BIT_OFFSET, desc.depth_test);
        self.key.set_bool(DEPTH_WRITE_BIT_OFFSET, desc.depth_write);
        self.key
            .set_bits(DEPTH_OP_BIT_OFFSET, DEPTH_OP_BIT_WIDTH, desc.depth_compare.as_raw() as u64);
        self.key.set_bool(STENCIL_TEST_BIT_OFFSET, desc.stencil_test);
        self.key
            .set_bits(FRONT_STENCIL_OP_BIT_OFFSET, STENCIL_OP_BIT_WIDTH, self.depth_stencil.front_id() as u64);
        self.key
            .set_bits(BACK_STENCIL_OP_BIT_OFFSET, STENCIL_OP_BIT_WIDTH, self.depth_stencil.back_id() as u64);
    }

    fn fold_rasterizer(&mut self) {
        self.key
            .set_bits(CULL_MODE_BIT_OFFSET, CULL_MODE_BIT_WIDTH, self.rasterizer.cull_mode.as_raw() as u64);
        self.key
            .set_bits(POLYGON_FILL_BIT_OFFSET, POLYGON_FILL_BIT_WIDTH, self.rasterizer.fill_mode as u64);
        self.key
            .set_bool(DEPTH_BIAS_BIT_OFFSET, self.rasterizer.depth_bias_enabled());
    }

    fn fold_topology(&mut self) {
        self.key
            .set_bits(TOPOLOGY_BIT_OFFSET, TOPOLOGY_BIT_WIDTH, self.topology.as_raw() as u64);
    }

    /// Write format, load and store bits of every used render target slot, and zero the unused ones.
    fn fold_render_targets(&mut self) -> Result<()> {
        let mut registry = self.device.key_registry()?;
        for slot in 0..MAX_SIMULTANEOUS_RENDER_TARGETS {
            let (format, load, store) = match self.render_targets.color.get(slot) {
                Some(target) => {
                    let format = match &target.texture {
                        Some(texture) => registry.format_id(texture.format)?,
                        None => 0,
                    };
                    (format, target.load as u64, target.store as u64)
                }
                None => (0, 0, 0),
            };
            self.key
                .set_bits(RT_FORMAT_BIT_OFFSETS[slot], FORMAT_BIT_WIDTH, format as u64);
            self.key
                .set_bits(RT_LOAD_BIT_OFFSETS[slot], LOAD_OP_BIT_WIDTH, load);
            self.key
                .set_bits(RT_STORE_BIT_OFFSETS[slot], STORE_OP_BIT_WIDTH, store);
        }
        Ok(())
    }

    pub fn set_blend_state(&mut self, state: Arc<BlendState>) {
        self.blend = state;
        self.fold_blend();
    }

    pub fn set_depth_stencil_state(&mut self, state: Arc<DepthStencilState>, stencil_ref: u32) {
        self.depth_stencil = state;
        if self.stencil_ref != stencil_ref {
            self.stencil_ref = stencil_ref;
            self.dynamic_state_dirty = true;
        }
        self.fold_depth_stencil();
    }

    pub fn set_rasterizer_state(&mut self, state: Arc<RasterizerState>) {
        self.rasterizer = state;
        self.fold_rasterizer();
    }

    pub fn set_viewport(&mut self, viewport: vk::Viewport) {
        self.viewport = Some(viewport);
        self.dynamic_state_dirty = true;
    }

    /// A disabled or empty scissor rectangle covers the whole viewport.
    pub fn set_scissor(&mut self, enable: bool, rect: vk::Rect2D) {
        self.scissor_enabled = enable;
        self.scissor = rect;
        self.dynamic_state_dirty = true;
    }

    /// Set the shaders used by the next draw. The caller is responsible for releasing the pipelines of the
    /// previous shader state once it is no longer used.
    pub fn set_bound_shader_state(&mut self, state: Option<Arc<Mutex<BoundShaderState>>>) {
        self.bound_shader_state = state;
    }

    pub fn bound_shader_state(&self) -> Option<&Arc<Mutex<BoundShaderState>>> {
        self.bound_shader_state.as_ref()
    }

    /// Bind a vertex buffer to a stream. A null buffer unbinds the stream.
    pub fn set_stream_source(&mut self, index: usize, buffer: vk::Buffer, offset: vk::DeviceSize) -> Result<()> {
        let stream = self
            .streams
            .get_mut(index)
            .ok_or(Error::Uncategorized("vertex stream index out of range"))?;
        *stream = VertexStream {
            buffer,
            offset,
        };
        Ok(())
    }

    /// Set the render targets of the next render pass. A single color target without a texture is treated as no
    /// color target at all, which is how depth only passes are set up.
    pub fn set_render_targets_info(&mut self, mut info: RenderTargetsInfo) -> Result<()> {
        info.demote_null_color_target();
        if info.num_color_targets() > MAX_SIMULTANEOUS_RENDER_TARGETS {
            return Err(Error::InvalidRenderTargets("too many color targets").into());
        }
        self.render_targets = info;
        self.render_targets_dirty = true;
        self.fold_render_targets()
    }

    pub fn render_targets_info(&self) -> &RenderTargetsInfo {
        &self.render_targets
    }

    fn get_or_create_render_pass(&mut self, layout: &RenderTargetLayout) -> Result<Arc<RenderPass>> {
        let hash = layout.layout_hash();
        if let Some(passes) = self.render_passes.get_vec(&hash) {
            if let Some(pass) = passes.iter().find(|pass| pass.layout() == layout) {
                return Ok(pass.clone());
            }
        }
        let pass = Arc::new(RenderPass::new(self.device.clone(), layout)?);
        debug!("Created render pass for {} attachments ({} cached)", layout.num_attachments(), self.render_passes.len() + 1);
        self.render_passes.insert(hash, pass.clone());
        Ok(pass)
    }

    fn get_or_create_framebuffer(&mut self, pass: &Arc<RenderPass>) -> Result<Arc<Framebuffer>> {
        let hash = self.render_targets.framebuffer_hash();
        if let Some(framebuffers) = self.framebuffers.get_vec(&hash) {
            if let Some(framebuffer) = framebuffers
                .iter()
                .find(|framebuffer| framebuffer.matches(pass, &self.render_targets))
            {
                return Ok(framebuffer.clone());
            }
        }
        let framebuffer = Arc::new(Framebuffer::new(self.device.clone(), pass.clone(), &self.render_targets)?);
        self.framebuffers.insert(hash, framebuffer.clone());
        Ok(framebuffer)
    }

    /// Begin a render pass on the current render targets. Returns `Ok(false)` without doing anything when there
    /// is neither a color nor a depth target.
    /// # Errors
    /// Fails with [`Error::AlreadyInsideRenderPass`] when a render pass is already open.
    pub fn render_pass_begin(&mut self, cmd: &mut CommandBuffer) -> Result<bool> {
        if self.inside_render_pass {
            return Err(Error::AlreadyInsideRenderPass.into());
        }
        if self.render_targets.is_empty() {
            return Ok(false);
        }
        let layout = RenderTargetLayout::new(&self.render_targets)?;
        let pass = self.get_or_create_render_pass(&layout)?;
        let framebuffer = self.get_or_create_framebuffer(&pass)?;
        self.key
            .set_bool(MSAA_BIT_OFFSET, layout.samples() != vk::SampleCountFlags::TYPE_1);
        let clear_values = self.render_targets.clear_values();
        cmd.begin_render_pass(&layout, &pass, &framebuffer, &clear_values)?;

        self.inside_render_pass = true;
        self.render_targets_dirty = false;
        // A new pass may have a different extent, the default viewport follows it.
        self.dynamic_state_dirty = true;
        self.current_layout = Some(layout);
        self.current_render_pass = Some(pass);
        self.current_framebuffer = Some(framebuffer);
        Ok(true)
    }

    pub fn render_pass_end(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        if !self.inside_render_pass {
            return Err(Error::NotInsideRenderPass.into());
        }
        cmd.end_render_pass()?;
        self.inside_render_pass = false;
        Ok(())
    }

    pub fn is_inside_render_pass(&self) -> bool {
        self.inside_render_pass
    }

    /// True when there are render targets and either no render pass is open or the targets changed since it began.
    pub fn needs_render_pass_begin(&self) -> bool {
        !self.render_targets.is_empty() && (!self.inside_render_pass || self.render_targets_dirty)
    }

    /// Get everything ready for a draw on `cmd`: begin a render pass if needed, find or create the pipeline and
    /// bind it together with dynamic state, descriptor sets and vertex buffers.
    pub fn prepare_draw(&mut self, cmd: &mut CommandBuffer, cache: &mut PipelineStateCache, primitive: PrimitiveType) -> Result<()> {
        self.topology = primitive.to_topology();
        self.fold_topology();

        if self.needs_render_pass_begin() {
            if self.inside_render_pass {
                self.render_pass_end(cmd)?;
            }
            if !self.render_pass_begin(cmd)? {
                return Err(Error::NoRenderTargets.into());
            }
        }
        if !self.inside_render_pass {
            return Err(Error::NoRenderTargets.into());
        }
        let render_pass = self
            .current_render_pass
            .clone()
            .ok_or(Error::NotInsideRenderPass)?;

        let shader_state = self
            .bound_shader_state
            .clone()
            .ok_or(Error::NoBoundShaderState)?;
        let mut shader_state = shader_state.lock().map_err(|_| Error::PoisonError)?;
        shader_state.update_descriptor_sets()?;

        let draw = PipelineDrawState {
            blend: &self.blend,
            rasterizer: &self.rasterizer,
            depth_stencil: &self.depth_stencil,
            stencil_ref: self.stencil_ref,
            render_pass: &render_pass,
            topology: self.topology,
        };
        let pipeline = shader_state.prepare_for_draw(cache, &self.key, &draw)?;

        if cmd.needs_dynamic_state_reset() {
            // Freshly begun command buffer, nothing is bound yet.
            self.last_bound_pipeline = None;
        }
        if self.dynamic_state_dirty || cmd.needs_dynamic_state_reset() {
            self.apply_dynamic_state(cmd);
            cmd.mark_dynamic_state_set();
            self.dynamic_state_dirty = false;
        }

        let handle = unsafe { pipeline.handle() };
        let cmd_handle = unsafe { cmd.handle() };
        if self.last_bound_pipeline != Some((cmd_handle, handle)) {
            unsafe {
                self.device
                    .cmd_bind_pipeline(cmd_handle, vk::PipelineBindPoint::GRAPHICS, handle);
            }
            self.last_bound_pipeline = Some((cmd_handle, handle));
        }
        shader_state.bind_descriptor_sets(cmd);
        shader_state.bind_vertex_streams(cmd, &self.streams);
        Ok(())
    }

    fn apply_dynamic_state(&self, cmd: &CommandBuffer) {
        let extent = self
            .current_layout
            .as_ref()
            .map(|layout| layout.extent_2d())
            .unwrap_or_default();
        let viewport = self.viewport.unwrap_or(vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        let scissor = if self.scissor_enabled && self.scissor.extent.width > 0 && self.scissor.extent.height > 0 {
            self.scissor
        } else {
            vk::Rect2D {
                offset: vk::Offset2D {
                    x: viewport.x as i32,
                    y: viewport.y as i32,
                },
                extent: vk::Extent2D {
                    width: viewport.width as u32,
                    height: viewport.height as u32,
                },
            }
        };
        unsafe {
            let handle = cmd.handle();
            self.device.cmd_set_viewport(handle, 0, &[viewport]);
            self.device.cmd_set_scissor(handle, 0, &[scissor]);
            self.device
                .cmd_set_stencil_reference(handle, vk::StencilFaceFlags::FRONT_AND_BACK, self.stencil_ref);
        }
    }

    /// Drop all cached render passes and framebuffers, for example after the swapchain was resized.
    /// Objects still in use by the current render pass or by pipelines stay alive until those are released.
    pub fn destroy_render_target_caches(&mut self) {
        debug!(
            "Destroying {} render passes and {} framebuffers",
            self.render_passes.len(),
            self.framebuffers.len()
        );
        self.render_passes.clear();
        self.framebuffers.clear();
        if !self.inside_render_pass {
            self.current_framebuffer = None;
        }
    }

    pub fn key(&self) -> &PipelineStateKey {
        &self.key
    }

    pub fn stencil_ref(&self) -> u32 {
        self.stencil_ref
    }

    /// Layout of the render pass that was last begun.
    pub fn current_layout(&self) -> Option<&RenderTargetLayout> {
        self.current_layout.as_ref()
    }

    pub fn current_render_pass(&self) -> Option<&Arc<RenderPass>> {
        self.current_render_pass.as_ref()
    }

    pub fn num_cached_render_passes(&self) -> usize {
        self.render_passes.iter_all().map(|(_, passes)| passes.len()).sum()
    }

    pub fn num_cached_framebuffers(&self) -> usize {
        self.framebuffers.iter_all().map(|(_, framebuffers)| framebuffers.len()).sum()
    }
}
