use std::sync::Arc;

use anyhow::Result;

use vulkan_rhi::backend::headless::ObjectKind;
use vulkan_rhi::{
    vk, BlendAttachment, BlendState, ColorRenderTarget, CommandBufferManager, DepthStencilDesc, DepthStencilState,
    Device, Error, FillMode, LoadAction, PendingState, PipelineStateCache, PrimitiveType, RasterizerState,
    RenderTargetsInfo, StoreAction, FORMAT_BIT_WIDTH, LOAD_OP_BIT_WIDTH, MAX_SIMULTANEOUS_RENDER_TARGETS, MSAA_BIT_OFFSET,
    MSAA_BIT_WIDTH, RT_FORMAT_BIT_OFFSETS, RT_LOAD_BIT_OFFSETS, RT_STORE_BIT_OFFSETS, STORE_OP_BIT_WIDTH,
};

mod framework;

struct States {
    blend: Arc<BlendState>,
    depth_stencil: Arc<DepthStencilState>,
    rasterizer: Arc<RasterizerState>,
    targets: RenderTargetsInfo,
}

fn states(device: &Device) -> Result<States> {
    Ok(States {
        blend: Arc::new(BlendState::uniform(device, BlendAttachment::alpha_blend())?),
        depth_stencil: Arc::new(DepthStencilState::new(
            device,
            DepthStencilDesc {
                depth_test: true,
                depth_write: true,
                depth_compare: vk::CompareOp::LESS_OR_EQUAL,
                ..Default::default()
            },
        )?),
        rasterizer: Arc::new(RasterizerState {
            fill_mode: FillMode::Wireframe,
            cull_mode: vk::CullModeFlags::BACK,
            depth_bias: 1.0,
            slope_scale_depth_bias: 0.0,
        }),
        targets: framework::color_targets(3, vk::Format::B8G8R8A8_SRGB),
    })
}

fn rt_bits(state: &PendingState, slot: usize) -> (u64, u64, u64) {
    let key = state.key();
    (
        key.get_bits(RT_FORMAT_BIT_OFFSETS[slot], FORMAT_BIT_WIDTH),
        key.get_bits(RT_LOAD_BIT_OFFSETS[slot], LOAD_OP_BIT_WIDTH),
        key.get_bits(RT_STORE_BIT_OFFSETS[slot], STORE_OP_BIT_WIDTH),
    )
}

#[test]
pub fn setter_order_does_not_matter() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let s = states(&device)?;

    let mut forward = PendingState::new(device.clone())?;
    forward.set_blend_state(s.blend.clone());
    forward.set_depth_stencil_state(s.depth_stencil.clone(), 0);
    forward.set_rasterizer_state(s.rasterizer.clone());
    forward.set_render_targets_info(s.targets.clone())?;

    let mut backward = PendingState::new(device.clone())?;
    backward.set_render_targets_info(framework::color_targets(7, vk::Format::R16G16B16A16_SFLOAT))?;
    backward.set_render_targets_info(s.targets.clone())?;
    backward.set_rasterizer_state(Arc::new(RasterizerState::default()));
    backward.set_rasterizer_state(s.rasterizer.clone());
    backward.set_depth_stencil_state(s.depth_stencil.clone(), 0);
    backward.set_blend_state(Arc::new(BlendState::opaque(&device)?));
    backward.set_blend_state(s.blend.clone());

    assert_eq!(forward.key(), backward.key());
    assert_ne!(*forward.key(), *PendingState::new(device)?.key());
    Ok(())
}

#[test]
pub fn unused_slots_are_zeroed() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let mut state = PendingState::new(device)?;

    state.set_render_targets_info(framework::color_targets(4, vk::Format::R8G8B8A8_UNORM))?;
    let four = *state.key();
    for slot in 0..4 {
        assert_ne!(rt_bits(&state, slot), (0, 0, 0));
    }

    state.set_render_targets_info(framework::color_targets(1, vk::Format::R8G8B8A8_UNORM))?;
    for slot in 1..MAX_SIMULTANEOUS_RENDER_TARGETS {
        assert_eq!(rt_bits(&state, slot), (0, 0, 0), "Slot {slot} should be cleared.");
    }

    state.set_render_targets_info(framework::color_targets(4, vk::Format::R8G8B8A8_UNORM))?;
    assert_eq!(*state.key(), four, "Shrinking and growing back should give the same key.");
    Ok(())
}

#[test]
pub fn format_ids_are_written_per_slot() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    {
        let mut registry = device.key_registry()?;
        for format in [
            vk::Format::R8_UNORM,
            vk::Format::R8G8_UNORM,
            vk::Format::R16_SFLOAT,
            vk::Format::R32_SFLOAT,
        ] {
            registry.format_id(format)?;
        }
    }
    let mut state = PendingState::new(device)?;
    let info = RenderTargetsInfo::new(
        vec![
            ColorRenderTarget::new(
                framework::color_texture(1, vk::Format::A2B10G10R10_UNORM_PACK32),
                LoadAction::Clear,
                StoreAction::Store,
            ),
            ColorRenderTarget::null(),
        ],
        None,
    );
    state.set_render_targets_info(info)?;

    assert_eq!(rt_bits(&state, 0), (5, LoadAction::Clear as u64, StoreAction::Store as u64));
    for slot in 1..MAX_SIMULTANEOUS_RENDER_TARGETS {
        assert_eq!(rt_bits(&state, slot).0, 0);
    }
    Ok(())
}

#[test]
pub fn depth_only_targets_are_demoted() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let mut manager = CommandBufferManager::new(device.clone())?;
    manager.prepare_for_new_active_command_buffer()?;
    let mut state = PendingState::new(device)?;

    state.set_render_targets_info(RenderTargetsInfo::new(vec![ColorRenderTarget::null()], Some(framework::depth_target())))?;
    assert_eq!(state.render_targets_info().num_color_targets(), 0);
    assert_eq!(rt_bits(&state, 0), (0, 0, 0));

    assert!(state.render_pass_begin(manager.active_cmd_buffer()?)?);
    let layout = state.current_layout().unwrap();
    assert_eq!(layout.num_color_attachments(), 0);
    assert!(layout.has_depth_stencil());
    state.render_pass_end(manager.active_cmd_buffer()?)?;
    Ok(())
}

#[test]
pub fn render_pass_begin_and_end() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    let mut manager = CommandBufferManager::new(device.clone())?;
    manager.prepare_for_new_active_command_buffer()?;
    let mut state = PendingState::new(device)?;

    // Nothing to render to.
    assert!(!state.needs_render_pass_begin());
    assert!(!state.render_pass_begin(manager.active_cmd_buffer()?)?);
    let err = state.render_pass_end(manager.active_cmd_buffer()?).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NotInsideRenderPass)));

    let targets = framework::color_targets(2, vk::Format::R8G8B8A8_UNORM);
    state.set_render_targets_info(targets.clone())?;
    assert!(state.needs_render_pass_begin());
    assert!(state.render_pass_begin(manager.active_cmd_buffer()?)?);
    assert!(state.is_inside_render_pass());
    assert!(!state.needs_render_pass_begin());
    let err = state.render_pass_begin(manager.active_cmd_buffer()?).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::AlreadyInsideRenderPass)));
    state.render_pass_end(manager.active_cmd_buffer()?)?;

    // Same targets again hit both caches.
    state.set_render_targets_info(targets)?;
    assert!(state.render_pass_begin(manager.active_cmd_buffer()?)?);
    state.render_pass_end(manager.active_cmd_buffer()?)?;
    assert_eq!(state.num_cached_render_passes(), 1);
    assert_eq!(state.num_cached_framebuffers(), 1);
    assert_eq!(backend.created(ObjectKind::RenderPass), 1);

    // Different views with the same formats share the render pass.
    let mut other = framework::color_targets(2, vk::Format::R8G8B8A8_UNORM);
    for (i, target) in other.color.iter_mut().enumerate() {
        target.texture.as_mut().unwrap().view = framework::image_view(500 + i as u64);
    }
    state.set_render_targets_info(other)?;
    assert!(state.render_pass_begin(manager.active_cmd_buffer()?)?);
    state.render_pass_end(manager.active_cmd_buffer()?)?;
    assert_eq!(state.num_cached_render_passes(), 1);
    assert_eq!(state.num_cached_framebuffers(), 2);

    state.destroy_render_target_caches();
    assert_eq!(state.num_cached_render_passes(), 0);
    assert_eq!(state.num_cached_framebuffers(), 0);
    Ok(())
}

#[test]
pub fn msaa_bit_follows_sample_count() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let mut manager = CommandBufferManager::new(device.clone())?;
    manager.prepare_for_new_active_command_buffer()?;
    let mut state = PendingState::new(device)?;

    let mut targets = framework::color_targets(1, vk::Format::R8G8B8A8_UNORM);
    let texture = targets.color[0].texture.as_mut().unwrap();
    *texture = texture.with_samples(vk::SampleCountFlags::TYPE_4);
    state.set_render_targets_info(targets)?;
    state.render_pass_begin(manager.active_cmd_buffer()?)?;
    assert_eq!(state.key().get_bits(MSAA_BIT_OFFSET, MSAA_BIT_WIDTH), 1);
    state.render_pass_end(manager.active_cmd_buffer()?)?;

    state.set_render_targets_info(framework::color_targets(1, vk::Format::R8G8B8A8_UNORM))?;
    state.render_pass_begin(manager.active_cmd_buffer()?)?;
    assert_eq!(state.key().get_bits(MSAA_BIT_OFFSET, MSAA_BIT_WIDTH), 0);
    Ok(())
}

#[test]
pub fn draw_requires_targets_and_shaders() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let mut manager = CommandBufferManager::new(device.clone())?;
    manager.prepare_for_new_active_command_buffer()?;
    let mut cache = PipelineStateCache::new(device.clone())?;
    let mut state = PendingState::new(device)?;

    let err = state
        .prepare_draw(manager.active_cmd_buffer()?, &mut cache, PrimitiveType::TriangleList)
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NoRenderTargets)));

    state.set_render_targets_info(framework::color_targets(1, vk::Format::R8G8B8A8_UNORM))?;
    let err = state
        .prepare_draw(manager.active_cmd_buffer()?, &mut cache, PrimitiveType::TriangleList)
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NoBoundShaderState)));
    assert_eq!(cache.num_pipelines(), 0);
    Ok(())
}

#[test]
pub fn reset_restores_defaults() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let s = states(&device)?;
    let mut state = PendingState::new(device.clone())?;
    let initial = *state.key();

    state.set_blend_state(s.blend);
    state.set_depth_stencil_state(s.depth_stencil, 7);
    state.set_rasterizer_state(s.rasterizer);
    state.set_bound_shader_state(Some(framework::bound_shader_state(&device, 1)?));
    assert_ne!(*state.key(), initial);

    state.reset()?;
    assert_eq!(*state.key(), initial);
    assert_eq!(state.stencil_ref(), 0);
    assert!(state.bound_shader_state().is_none());
    Ok(())
}

#[test]
pub fn reset_reports_key_registry_failures() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let mut state = PendingState::new(device.clone())?;
    state.set_render_targets_info(framework::color_targets(1, vk::Format::R8G8B8A8_UNORM))?;

    let poisoner = device.clone();
    let poisoned = std::thread::spawn(move || {
        let _registry = poisoner.key_registry().unwrap();
        panic!("registry lock poisoned on purpose");
    })
    .join();
    assert!(poisoned.is_err());

    let err = state.reset().unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::PoisonError)));
    Ok(())
}
