use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use vulkan_rhi::backend::headless::ObjectKind;
use vulkan_rhi::{
    CommandBuffer, CommandBufferManager, CommandBufferState, Device, Error, Framebuffer, RenderPass, RenderTargetLayout,
};

mod framework;

struct PassObjects {
    layout: RenderTargetLayout,
    pass: Arc<RenderPass>,
    framebuffer: Framebuffer,
}

fn pass_objects(device: &Device) -> Result<PassObjects> {
    let info = framework::color_targets(1, ash::vk::Format::R8G8B8A8_UNORM);
    let layout = RenderTargetLayout::new(&info)?;
    let pass = Arc::new(RenderPass::new(device.clone(), &layout)?);
    let framebuffer = Framebuffer::new(device.clone(), pass.clone(), &info)?;
    Ok(PassObjects {
        layout,
        pass,
        framebuffer,
    })
}

fn is_invalid_state(result: Result<()>) -> bool {
    match result {
        Ok(()) => false,
        Err(err) => matches!(
            err.downcast_ref::<Error>(),
            Some(Error::InvalidCommandBufferState { .. }) | Some(Error::AlreadyInsideRenderPass) | Some(Error::NotInsideRenderPass)
        ),
    }
}

fn begin_pass(cmd: &mut CommandBuffer, objects: &PassObjects) -> Result<()> {
    cmd.begin_render_pass(&objects.layout, &objects.pass, &objects.framebuffer, &[Default::default()])
}

#[test]
pub fn manager_reuses_completed_buffers() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    let mut manager = CommandBufferManager::new(device)?;
    assert_eq!(manager.num_command_buffers(), 0);

    let first = manager.prepare_for_new_active_command_buffer()?;
    assert_eq!(manager.num_command_buffers(), 1);
    assert_eq!(manager.active_cmd_buffer()?.state(), CommandBufferState::IsInsideBegin);

    manager.submit_active_cmd_buffer(false)?;
    assert_eq!(manager.command_buffer(first).unwrap().state(), CommandBufferState::Submitted);
    assert!(manager.active_cmd_buffer_index().is_none());
    assert!(manager.active_cmd_buffer().is_err());

    // The first buffer is still in flight, so a second one has to be created.
    let second = manager.prepare_for_new_active_command_buffer()?;
    assert_ne!(first, second);
    assert_eq!(manager.num_command_buffers(), 2);

    assert_eq!(backend.complete_submissions(), 1);
    manager.refresh_fence_status()?;
    assert_eq!(manager.command_buffer(first).unwrap().state(), CommandBufferState::ReadyForBegin);
    assert_eq!(manager.command_buffer(first).unwrap().fence_signaled_counter(), 1);

    manager.submit_active_cmd_buffer(false)?;
    let third = manager.prepare_for_new_active_command_buffer()?;
    assert_eq!(third, first, "The completed buffer should be reused.");
    assert_eq!(manager.num_command_buffers(), 2);
    assert_eq!(backend.created(ObjectKind::CommandBuffer), 2);
    assert_eq!(backend.created(ObjectKind::Fence), 2);
    Ok(())
}

#[test]
pub fn active_buffer_must_be_submitted_first() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let mut manager = CommandBufferManager::new(device)?;
    manager.prepare_for_new_active_command_buffer()?;
    let err = manager.prepare_for_new_active_command_buffer().unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ActiveCommandBufferInUse)));
    Ok(())
}

#[test]
pub fn upload_buffer_is_stable_until_submitted() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    let mut manager = CommandBufferManager::new(device)?;
    backend.set_complete_on_wait(true);

    assert!(manager.submit_upload_cmd_buffer(false).is_err());
    assert!(manager.upload_cmd_buffer().is_err());
    let first = unsafe { manager.get_upload_cmd_buffer()?.handle() };
    let again = unsafe { manager.get_upload_cmd_buffer()?.handle() };
    assert_eq!(first, again);
    assert_eq!(unsafe { manager.upload_cmd_buffer()?.handle() }, first);
    assert!(manager.has_pending_upload_cmd_buffer());

    manager.submit_upload_cmd_buffer_and_block()?;
    assert!(!manager.has_pending_upload_cmd_buffer());
    let index = manager.num_command_buffers() - 1;
    assert_eq!(manager.command_buffer(index).unwrap().state(), CommandBufferState::ReadyForBegin);
    Ok(())
}

#[test]
pub fn wait_times_out_on_unfinished_work() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    let mut manager = CommandBufferManager::new(device)?;
    let index = manager.prepare_for_new_active_command_buffer()?;
    manager.submit_active_cmd_buffer(false)?;

    let err = manager
        .wait_for_cmd_buffer(index, Duration::from_millis(1))
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::FenceTimeout(_))));

    backend.set_complete_on_wait(true);
    manager.wait_for_cmd_buffer(index, Duration::from_millis(1))?;
    assert_eq!(manager.command_buffer(index).unwrap().state(), CommandBufferState::ReadyForBegin);
    assert!(manager.wait_for_cmd_buffer(42, Duration::ZERO).is_err());
    Ok(())
}

#[test]
pub fn transition_table() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    let objects = pass_objects(&device)?;
    let mut manager = CommandBufferManager::new(device.clone())?;
    let index = manager.create()?;
    let cmd = manager.command_buffer_mut(index).unwrap();

    // ReadyForBegin: only begin is legal.
    assert_eq!(cmd.state(), CommandBufferState::ReadyForBegin);
    assert!(is_invalid_state(cmd.end()));
    assert!(is_invalid_state(cmd.end_render_pass()));
    assert!(is_invalid_state(begin_pass(cmd, &objects)));
    assert!(device.queue().submit(cmd).is_err());
    assert_eq!(cmd.state(), CommandBufferState::ReadyForBegin);
    cmd.begin()?;

    // IsInsideBegin: begin render pass or end.
    assert_eq!(cmd.state(), CommandBufferState::IsInsideBegin);
    assert!(cmd.needs_dynamic_state_reset());
    assert!(is_invalid_state(cmd.begin()));
    assert!(is_invalid_state(cmd.end_render_pass()));
    assert!(device.queue().submit(cmd).is_err());
    begin_pass(cmd, &objects)?;

    // IsInsideRenderPass: only end render pass.
    assert!(cmd.is_inside_render_pass());
    assert!(is_invalid_state(cmd.begin()));
    assert!(is_invalid_state(cmd.end()));
    assert!(is_invalid_state(begin_pass(cmd, &objects)));
    cmd.end_render_pass()?;
    assert!(cmd.is_outside_render_pass());
    cmd.end()?;

    // HasEnded: only submit.
    assert_eq!(cmd.state(), CommandBufferState::HasEnded);
    assert!(is_invalid_state(cmd.begin()));
    assert!(is_invalid_state(cmd.end()));
    assert!(is_invalid_state(begin_pass(cmd, &objects)));
    device.queue().submit(cmd)?;

    // Submitted: nothing until the fence is signaled.
    assert!(cmd.is_submitted());
    assert!(is_invalid_state(cmd.begin()));
    assert!(is_invalid_state(cmd.end()));
    assert!(device.queue().submit(cmd).is_err());
    cmd.refresh_fence_status()?;
    assert!(cmd.is_submitted());

    backend.complete_submissions();
    cmd.refresh_fence_status()?;
    assert_eq!(cmd.state(), CommandBufferState::ReadyForBegin);
    assert_eq!(cmd.fence_signaled_counter(), 1);
    cmd.begin()?;
    Ok(())
}

#[test]
pub fn dropping_manager_frees_in_flight_buffers() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    let mut manager = CommandBufferManager::new(device.clone())?;
    manager.prepare_for_new_active_command_buffer()?;
    manager.submit_active_cmd_buffer(false)?;
    assert_eq!(backend.pending_submissions(), 1);
    assert_eq!(device.fence_manager().num_used()?, 1);

    // The submission never completes, so dropping waits for the destroy timeout and frees the buffer anyway.
    drop(manager);
    assert_eq!(backend.alive(ObjectKind::CommandBuffer), 0);
    assert_eq!(backend.alive(ObjectKind::CommandPool), 0);
    assert_eq!(device.fence_manager().num_used()?, 0);
    assert_eq!(device.fence_manager().num_free()?, 1);
    Ok(())
}

#[test]
pub fn signaled_fence_on_unsubmitted_buffer_is_reported() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    let mut manager = CommandBufferManager::new(device.clone())?;
    let index = manager.create()?;
    let cmd = manager.command_buffer_mut(index).unwrap();
    cmd.begin()?;
    cmd.refresh_fence_status()?;

    let fence = unsafe { device.fence_manager().handle(cmd.fence().unwrap())? };
    assert!(backend.signal_fence(fence));
    let err = cmd.refresh_fence_status().unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::FenceStateCorrupted(_))));
    assert_eq!(cmd.state(), CommandBufferState::IsInsideBegin);
    assert_eq!(cmd.fence_signaled_counter(), 0);
    Ok(())
}
