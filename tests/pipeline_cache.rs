use std::sync::Arc;

use anyhow::Result;

use vulkan_rhi::backend::headless::ObjectKind;
use vulkan_rhi::{Error, PipelineStateCache, PipelineStateKey, CULL_MODE_BIT_OFFSET, CULL_MODE_BIT_WIDTH, MAX_FRAMES_IN_FLIGHT};

mod framework;

#[test]
pub fn find_returns_the_same_pipeline() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    let inputs = framework::DrawInputs::new(&device)?;
    let shaders = framework::bound_shader_state(&device, 1)?;
    let shaders = shaders.lock().unwrap();
    let mut cache = PipelineStateCache::new(device.clone())?;
    let key = shaders.cache_key(&PipelineStateKey::default());

    assert!(cache.find(&key).is_none());
    let created = cache.create_and_add(key, &inputs.draw_state(), &shaders)?;
    let found = cache.find(&key).unwrap();
    let again = cache.find(&key).unwrap();
    assert!(Arc::ptr_eq(&created, &found));
    assert!(Arc::ptr_eq(&found, &again));
    assert_eq!(cache.ref_count(&key), Some(3));
    assert_eq!(backend.created(ObjectKind::Pipeline), 1);

    let err = cache
        .create_and_add(key, &inputs.draw_state(), &shaders)
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::PipelineAlreadyCached)));
    assert_eq!(backend.created(ObjectKind::Pipeline), 1);
    Ok(())
}

#[test]
pub fn released_pipelines_are_destroyed_after_a_few_frames() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    let inputs = framework::DrawInputs::new(&device)?;
    let shaders = framework::bound_shader_state(&device, 1)?;
    let shaders = shaders.lock().unwrap();
    let mut cache = PipelineStateCache::new(device.clone())?;
    let key = shaders.cache_key(&PipelineStateKey::default());

    drop(cache.create_and_add(key, &inputs.draw_state(), &shaders)?);
    drop(cache.find(&key));
    cache.destroy_pipeline(&key)?;
    assert_eq!(cache.ref_count(&key), Some(1));
    cache.destroy_pipeline(&key)?;
    assert_eq!(cache.ref_count(&key), None);
    assert_eq!(cache.num_pipelines(), 0);
    assert_eq!(cache.num_retired(), 1);

    let err = cache.destroy_pipeline(&key).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::PipelineNotCached)));

    for _ in 1..MAX_FRAMES_IN_FLIGHT {
        cache.next_frame();
        assert_eq!(backend.alive(ObjectKind::Pipeline), 1, "The pipeline may still be in use by the GPU.");
    }
    cache.next_frame();
    assert_eq!(cache.num_retired(), 0);
    assert_eq!(backend.alive(ObjectKind::Pipeline), 0);
    Ok(())
}

#[test]
pub fn bound_shader_states_share_pipelines() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    let inputs = framework::DrawInputs::new(&device)?;
    let mut cache = PipelineStateCache::new(device.clone())?;
    let first = framework::bound_shader_state(&device, 1)?;
    let second = framework::bound_shader_state(&device, 1)?;
    let mut first = first.lock().unwrap();
    let mut second = second.lock().unwrap();

    let mut key = PipelineStateKey::default();
    let a = first.prepare_for_draw(&mut cache, &key, &inputs.draw_state())?;
    let b = first.prepare_for_draw(&mut cache, &key, &inputs.draw_state())?;
    let c = second.prepare_for_draw(&mut cache, &key, &inputs.draw_state())?;
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &c));
    let cache_key = first.cache_key(&key);
    assert_eq!(cache.ref_count(&cache_key), Some(2), "One reference per shader state.");

    key.set_bits(CULL_MODE_BIT_OFFSET, CULL_MODE_BIT_WIDTH, 2);
    let d = first.prepare_for_draw(&mut cache, &key, &inputs.draw_state())?;
    assert!(!Arc::ptr_eq(&a, &d));
    assert_eq!(cache.num_pipelines(), 2);
    assert_eq!(first.num_pipelines(), 2);
    assert_eq!(backend.created(ObjectKind::Pipeline), 2);

    first.release_pipelines(&mut cache)?;
    assert_eq!(cache.ref_count(&cache_key), Some(1));
    assert_eq!(cache.num_pipelines(), 1);
    second.release_pipelines(&mut cache)?;
    assert_eq!(cache.num_pipelines(), 0);
    Ok(())
}

#[test]
pub fn different_shaders_get_different_pipelines() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    let inputs = framework::DrawInputs::new(&device)?;
    let mut cache = PipelineStateCache::new(device.clone())?;
    let first = framework::bound_shader_state(&device, 1)?;
    let second = framework::bound_shader_state(&device, 10)?;
    let key = PipelineStateKey::default();

    let a = first
        .lock()
        .unwrap()
        .prepare_for_draw(&mut cache, &key, &inputs.draw_state())?;
    let b = second
        .lock()
        .unwrap()
        .prepare_for_draw(&mut cache, &key, &inputs.draw_state())?;
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(backend.created(ObjectKind::Pipeline), 2);
    Ok(())
}

#[test]
pub fn rebuild_drops_every_pipeline() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    let inputs = framework::DrawInputs::new(&device)?;
    let mut cache = PipelineStateCache::new(device.clone())?;
    let shaders = framework::bound_shader_state(&device, 1)?;
    let mut shaders = shaders.lock().unwrap();
    let key = PipelineStateKey::default();

    let before = shaders.prepare_for_draw(&mut cache, &key, &inputs.draw_state())?;
    let generation = cache.generation();
    cache.rebuild_cache()?;
    assert_eq!(cache.generation(), generation + 1);
    assert_eq!(cache.num_pipelines(), 0);

    // The shader state notices the rebuild and goes back to the cache.
    let after = shaders.prepare_for_draw(&mut cache, &key, &inputs.draw_state())?;
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(cache.num_pipelines(), 1);
    assert_eq!(shaders.num_pipelines(), 1);
    assert_eq!(backend.created(ObjectKind::Pipeline), 2);
    Ok(())
}
