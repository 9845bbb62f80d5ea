#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::Result;

use vulkan_rhi::backend::headless::HeadlessDevice;
use vulkan_rhi::{
    vk, BlendState, BoundShaderState, ColorRenderTarget, DepthStencilRenderTarget, DepthStencilState, DescriptorBinding,
    Device, LoadAction, PipelineDrawState, RasterizerState, RenderPass, RenderTargetLayout, RenderTargetsInfo,
    RenderTexture, RhiSettings, SettingsBuilder, ShaderModule, ShaderStage, StoreAction, VertexElement,
    VertexInputState,
};

pub const TARGET_WIDTH: u32 = 1280;
pub const TARGET_HEIGHT: u32 = 720;

fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

/// Creates a device on top of a headless backend, ready for automated tests
pub fn make_device() -> Result<(Device, Arc<HeadlessDevice>)> {
    make_device_with_settings(SettingsBuilder::new().validation(true).build())
}

/// Create a headless device with custom settings
pub fn make_device_with_settings(settings: RhiSettings) -> Result<(Device, Arc<HeadlessDevice>)> {
    make_device_with_backend(Arc::new(HeadlessDevice::new()), settings)
}

pub fn make_device_with_backend(backend: Arc<HeadlessDevice>, settings: RhiSettings) -> Result<(Device, Arc<HeadlessDevice>)> {
    init_logging();
    let device = Device::new(backend.clone(), settings)?;
    Ok((device, backend))
}

/// Fake SPIR-V of `words` words. Different seeds give different microcode.
pub fn spirv(seed: u32, words: u32) -> Vec<u8> {
    (0..words)
        .flat_map(|word| (0x0723_0203u32 ^ seed.wrapping_mul(31).wrapping_add(word)).to_le_bytes())
        .collect()
}

pub fn shader(device: &Device, stage: ShaderStage, seed: u32) -> Result<Arc<ShaderModule>> {
    Ok(Arc::new(ShaderModule::from_spirv(
        device.clone(),
        stage,
        format!("{stage:?}_{seed}"),
        &spirv(seed, 16),
    )?))
}

/// A position + uv vertex declaration on stream 0 and a per-instance color on stream 2.
pub fn vertex_elements() -> Vec<VertexElement> {
    vec![
        VertexElement {
            stream: 0,
            offset: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            location: 0,
            stride: 20,
            per_instance: false,
        },
        VertexElement {
            stream: 0,
            offset: 12,
            format: vk::Format::R32G32_SFLOAT,
            location: 1,
            stride: 20,
            per_instance: false,
        },
        VertexElement {
            stream: 2,
            offset: 0,
            format: vk::Format::R8G8B8A8_UNORM,
            location: 2,
            stride: 4,
            per_instance: true,
        },
    ]
}

/// Vertex and pixel shader with one uniform buffer set.
pub fn bound_shader_state(device: &Device, seed: u32) -> Result<Arc<Mutex<BoundShaderState>>> {
    let sets = vec![vec![DescriptorBinding::new(
        0,
        vk::DescriptorType::UNIFORM_BUFFER,
        vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
    )]];
    let state = BoundShaderState::new(
        device.clone(),
        [
            shader(device, ShaderStage::Vertex, seed)?,
            shader(device, ShaderStage::Pixel, seed + 1)?,
        ],
        VertexInputState::new(&vertex_elements()),
        &sets,
    )?;
    Ok(Arc::new(Mutex::new(state)))
}

pub fn image_view(raw: u64) -> vk::ImageView {
    use ash::vk::Handle;
    vk::ImageView::from_raw(raw)
}

pub fn color_texture(view: u64, format: vk::Format) -> RenderTexture {
    RenderTexture::new(image_view(view), format, TARGET_WIDTH, TARGET_HEIGHT)
}

/// `count` cleared color targets of the given format.
pub fn color_targets(count: usize, format: vk::Format) -> RenderTargetsInfo {
    let color = (0..count)
        .map(|i| ColorRenderTarget::new(color_texture(100 + i as u64, format), LoadAction::Clear, StoreAction::Store))
        .collect();
    RenderTargetsInfo::new(color, None)
}

pub fn depth_target() -> DepthStencilRenderTarget {
    DepthStencilRenderTarget::new(
        RenderTexture::new(image_view(200), vk::Format::D32_SFLOAT_S8_UINT, TARGET_WIDTH, TARGET_HEIGHT),
        LoadAction::Clear,
        StoreAction::Store,
    )
}

/// Fixed function state and a render pass to create pipelines with, outside of a pending state.
pub struct DrawInputs {
    pub blend: BlendState,
    pub rasterizer: RasterizerState,
    pub depth_stencil: DepthStencilState,
    pub render_pass: Arc<RenderPass>,
}

impl DrawInputs {
    pub fn new(device: &Device) -> Result<Self> {
        let layout = RenderTargetLayout::new(&color_targets(1, vk::Format::R8G8B8A8_UNORM))?;
        Ok(Self {
            blend: BlendState::opaque(device)?,
            rasterizer: RasterizerState::default(),
            depth_stencil: DepthStencilState::disabled(device)?,
            render_pass: Arc::new(RenderPass::new(device.clone(), &layout)?),
        })
    }

    pub fn draw_state(&self) -> PipelineDrawState {
        PipelineDrawState {
            blend: &self.blend,
            rasterizer: &self.rasterizer,
            depth_stencil: &self.depth_stencil,
            stencil_ref: 0,
            render_pass: &self.render_pass,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        }
    }
}
