use anyhow::Result;
use ash::vk::Handle;

use vulkan_rhi::backend::headless::{ObjectKind, RecordedCommand};
use vulkan_rhi::{vk, CommandListContext, Error, PrimitiveType};

mod framework;

fn setup_draw(context: &mut CommandListContext, device: &vulkan_rhi::Device) -> Result<()> {
    let bss = framework::bound_shader_state(device, 1)?;
    bss.lock()
        .unwrap()
        .set_descriptor_sets(vec![vk::DescriptorSet::from_raw(0xD5)]);
    let pending = context.pending_mut();
    pending.set_render_targets_info(framework::color_targets(1, vk::Format::R8G8B8A8_UNORM))?;
    pending.set_bound_shader_state(Some(bss));
    pending.set_stream_source(0, vk::Buffer::from_raw(0xB0), 0)?;
    pending.set_stream_source(2, vk::Buffer::from_raw(0xB2), 64)?;
    Ok(())
}

fn index_of(commands: &[RecordedCommand], pred: impl Fn(&RecordedCommand) -> bool) -> Option<usize> {
    commands.iter().position(|c| pred(c))
}

#[test]
pub fn draw_records_bindings_in_order() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    let mut context = CommandListContext::new(device.clone())?;
    setup_draw(&mut context, &device)?;
    backend.clear_commands();

    context.draw_primitive(PrimitiveType::TriangleList, 0, 2, 1)?;

    let commands = backend.commands();
    let begin_pass = index_of(&commands, |c| matches!(c, RecordedCommand::BeginRenderPass { .. })).expect("render pass begun");
    let bind_pipeline = index_of(&commands, |c| matches!(c, RecordedCommand::BindPipeline { .. })).expect("pipeline bound");
    let bind_sets = index_of(&commands, |c| matches!(c, RecordedCommand::BindDescriptorSets { .. })).expect("sets bound");
    let bind_streams = index_of(&commands, |c| matches!(c, RecordedCommand::BindVertexBuffers { .. })).expect("streams bound");
    let draw = index_of(&commands, |c| matches!(c, RecordedCommand::Draw { .. })).expect("draw recorded");
    assert!(begin_pass < bind_pipeline);
    assert!(bind_pipeline < bind_sets);
    assert!(bind_sets < bind_streams);
    assert!(bind_streams < draw);

    match &commands[bind_streams] {
        RecordedCommand::BindVertexBuffers { buffers, offsets, .. } => {
            assert_eq!(buffers, &vec![vk::Buffer::from_raw(0xB0), vk::Buffer::from_raw(0xB2)]);
            assert_eq!(offsets, &vec![0, 64]);
        }
        _ => unreachable!(),
    }
    match &commands[draw] {
        RecordedCommand::Draw {
            vertex_count,
            instance_count,
            ..
        } => {
            assert_eq!(*vertex_count, 6);
            assert_eq!(*instance_count, 1);
        }
        _ => unreachable!(),
    }
    Ok(())
}

#[test]
pub fn second_draw_skips_pipeline_bind() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    let mut context = CommandListContext::new(device.clone())?;
    setup_draw(&mut context, &device)?;
    context.draw_primitive(PrimitiveType::TriangleList, 0, 1, 0)?;
    backend.clear_commands();

    context.draw_primitive(PrimitiveType::TriangleList, 3, 1, 0)?;
    let commands = backend.commands();
    assert!(!commands
        .iter()
        .any(|c| matches!(c, RecordedCommand::BindPipeline { .. } | RecordedCommand::BeginRenderPass { .. })));
    assert!(commands.iter().any(|c| matches!(
        c,
        RecordedCommand::Draw {
            first_vertex: 3,
            instance_count: 1,
            ..
        }
    )));
    assert_eq!(context.cache().num_pipelines(), 1);
    Ok(())
}

#[test]
pub fn indexed_draw_binds_index_buffer() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    let mut context = CommandListContext::new(device.clone())?;
    setup_draw(&mut context, &device)?;

    let null = context.draw_indexed_primitive(
        vk::Buffer::null(),
        vk::IndexType::UINT16,
        PrimitiveType::TriangleList,
        0,
        0,
        1,
        1,
    );
    assert!(null.is_err());

    backend.clear_commands();
    context.draw_indexed_primitive(
        vk::Buffer::from_raw(0x1D),
        vk::IndexType::UINT32,
        PrimitiveType::TriangleList,
        0,
        0,
        4,
        2,
    )?;
    let commands = backend.commands();
    assert!(commands
        .iter()
        .any(|c| matches!(c, RecordedCommand::BindIndexBuffer { buffer, .. } if *buffer == vk::Buffer::from_raw(0x1D))));
    assert!(commands.iter().any(|c| matches!(
        c,
        RecordedCommand::DrawIndexed {
            index_count: 12,
            instance_count: 2,
            ..
        }
    )));
    Ok(())
}

#[test]
pub fn draw_without_shader_state_fails() -> Result<()> {
    let (device, _) = framework::make_device()?;
    let mut context = CommandListContext::new(device)?;
    context
        .pending_mut()
        .set_render_targets_info(framework::color_targets(1, vk::Format::R8G8B8A8_UNORM))?;
    let result = context.draw_primitive(PrimitiveType::TriangleList, 0, 1, 1);
    let error = result.expect_err("draw without bound shader state");
    assert!(matches!(error.downcast_ref::<Error>(), Some(Error::NoBoundShaderState)));
    Ok(())
}

#[test]
pub fn end_frame_closes_render_pass_and_submits() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    let mut context = CommandListContext::new(device.clone())?;
    setup_draw(&mut context, &device)?;
    context.draw_primitive(PrimitiveType::TriangleList, 0, 1, 1)?;
    assert!(context.pending().is_inside_render_pass());
    backend.clear_commands();

    context.end_frame()?;
    assert!(!context.pending().is_inside_render_pass());
    let commands = backend.commands();
    let end_pass = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::EndRenderPass(_)))
        .expect("render pass ended");
    let submit = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::Submit { .. }))
        .expect("active buffer submitted");
    assert!(end_pass < submit);
    assert_eq!(backend.pending_submissions(), 1);
    assert_eq!(context.manager().num_command_buffers(), 2);

    // Drawing after the frame begins a new render pass on the new active buffer and binds the pipeline again.
    backend.clear_commands();
    context.draw_primitive(PrimitiveType::TriangleList, 0, 1, 1)?;
    let commands = backend.commands();
    assert!(commands
        .iter()
        .any(|c| matches!(c, RecordedCommand::BeginRenderPass { .. })));
    assert!(commands
        .iter()
        .any(|c| matches!(c, RecordedCommand::BindPipeline { .. })));
    Ok(())
}

#[test]
pub fn prepare_for_cpu_read_waits_for_work() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    backend.set_complete_on_wait(true);
    let mut context = CommandListContext::new(device.clone())?;
    setup_draw(&mut context, &device)?;
    context.draw_primitive(PrimitiveType::TriangleList, 0, 1, 1)?;

    context.prepare_for_cpu_read()?;
    assert!(!context.pending().is_inside_render_pass());
    assert_eq!(backend.pending_submissions(), 0);
    Ok(())
}

#[test]
pub fn rebuild_submits_recorded_work_first() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    backend.set_complete_on_wait(true);
    let mut context = CommandListContext::new(device.clone())?;
    setup_draw(&mut context, &device)?;
    context.draw_primitive(PrimitiveType::TriangleList, 0, 1, 1)?;
    assert_eq!(backend.alive(ObjectKind::Pipeline), 1);

    context.rebuild_pipeline_cache()?;
    // The buffer that had the pipeline bound completed before the rebuild and is recording again.
    assert_eq!(backend.pending_submissions(), 0);
    assert_eq!(context.manager().num_command_buffers(), 1);
    assert!(context.manager().command_buffer(0).unwrap().is_outside_render_pass());
    assert!(!context.pending().is_inside_render_pass());
    assert_eq!(context.cache().num_pipelines(), 0);
    assert_eq!(context.cache().generation(), 1);

    backend.clear_commands();
    context.draw_primitive(PrimitiveType::TriangleList, 0, 1, 1)?;
    let commands = backend.commands();
    assert!(commands
        .iter()
        .any(|c| matches!(c, RecordedCommand::BeginRenderPass { .. })));
    assert!(commands
        .iter()
        .any(|c| matches!(c, RecordedCommand::BindPipeline { .. })));
    assert_eq!(backend.created(ObjectKind::Pipeline), 2);
    assert_eq!(backend.alive(ObjectKind::Pipeline), 1);
    Ok(())
}
