use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use byteorder::{ByteOrder, LittleEndian};
use fxhash::FxHasher64;

use vulkan_rhi::backend::headless::{HeadlessDevice, HEADLESS_CACHE_PAYLOAD};
use vulkan_rhi::pipeline::shader::hash_microcode;
use vulkan_rhi::{
    is_native_blob_trusted, vk, CacheLoadStatus, DepthStencilDesc, DepthStencilState, Device, DeviceProperties,
    GfxPipelineEntry, PipelineStateCache, PipelineStateKey, RhiSettings, SettingsBuilder, StencilOpDesc,
    CULL_MODE_BIT_OFFSET, CULL_MODE_BIT_WIDTH, PIPELINE_CACHE_VERSION,
};

mod framework;

/// Serialized cache holding two pipelines that differ in shaders and depth stencil state.
fn populated_cache(device: &Device) -> Result<(PipelineStateCache, Vec<u8>)> {
    let mut inputs = framework::DrawInputs::new(device)?;
    let mut cache = PipelineStateCache::new(device.clone())?;
    let first = framework::bound_shader_state(device, 1)?;
    let second = framework::bound_shader_state(device, 20)?;

    let key = PipelineStateKey::default();
    first
        .lock()
        .unwrap()
        .prepare_for_draw(&mut cache, &key, &inputs.draw_state())?;

    inputs.depth_stencil = DepthStencilState::new(
        device,
        DepthStencilDesc {
            depth_test: true,
            depth_write: false,
            depth_compare: vk::CompareOp::GREATER,
            stencil_test: true,
            front: StencilOpDesc {
                pass_op: vk::StencilOp::INCREMENT_AND_CLAMP,
                compare_mask: 0x0F,
                ..Default::default()
            },
            back: StencilOpDesc::default(),
        },
    )?;
    let mut key = PipelineStateKey::default();
    key.set_bits(CULL_MODE_BIT_OFFSET, CULL_MODE_BIT_WIDTH, 1);
    second
        .lock()
        .unwrap()
        .prepare_for_draw(&mut cache, &key, &inputs.draw_state())?;

    let mut bytes = Vec::new();
    cache.write_to(&mut bytes)?;
    Ok((cache, bytes))
}

fn sorted_entries(cache: &PipelineStateCache) -> Vec<GfxPipelineEntry> {
    let mut entries = cache.entries().cloned().collect::<Vec<_>>();
    entries.sort_by_key(|entry| entry.key());
    entries
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("vulkan-rhi-{}-{name}.cache", std::process::id()))
}

#[test]
pub fn round_trip_reproduces_every_entry() -> Result<()> {
    let (device, backend) = framework::make_device()?;
    let (original, bytes) = populated_cache(&device)?;
    assert_eq!(LittleEndian::read_i32(&bytes[0..4]), PIPELINE_CACHE_VERSION);

    let mut loaded = PipelineStateCache::new(device.clone())?;
    let status = loaded.read_from(&mut bytes.as_slice())?;
    match status {
        CacheLoadStatus::Loaded {
            pipelines,
            native_blob_trusted,
            ..
        } => {
            assert_eq!(pipelines, 2);
            assert!(native_blob_trusted);
        }
        CacheLoadStatus::NotLoaded => panic!("Cache should have been loaded."),
    }

    let expected = sorted_entries(&original);
    let actual = sorted_entries(&loaded);
    assert_eq!(expected, actual);
    for (expected, actual) in expected.iter().zip(actual.iter()) {
        assert_eq!(expected.shader_microcode, actual.shader_microcode);
        assert!(loaded.find(&actual.key()).is_some());
    }

    let seed = *backend.pipeline_cache_seeds().last().unwrap();
    assert_eq!(seed, HeadlessDevice::pipeline_cache_blob(device.properties()).len());

    // Writing the loaded cache again gives the same file.
    let mut rewritten = Vec::new();
    loaded.write_to(&mut rewritten)?;
    assert_eq!(bytes, rewritten);
    Ok(())
}

#[test]
pub fn older_version_is_rejected() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let (_original, mut bytes) = populated_cache(&device)?;
    LittleEndian::write_i32(&mut bytes[0..4], PIPELINE_CACHE_VERSION - 1);

    let mut cache = PipelineStateCache::new(device)?;
    assert_eq!(cache.read_from(&mut bytes.as_slice())?, CacheLoadStatus::NotLoaded);
    assert_eq!(cache.num_pipelines(), 0);
    Ok(())
}

#[test]
pub fn entry_size_mismatch_is_rejected() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let (_original, mut bytes) = populated_cache(&device)?;
    let size = LittleEndian::read_i32(&bytes[4..8]);
    LittleEndian::write_i32(&mut bytes[4..8], size + 8);

    let mut cache = PipelineStateCache::new(device)?;
    assert_eq!(cache.read_from(&mut bytes.as_slice())?, CacheLoadStatus::NotLoaded);
    assert_eq!(cache.num_pipelines(), 0);
    Ok(())
}

#[test]
pub fn truncated_file_is_rejected() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let (_original, bytes) = populated_cache(&device)?;

    let mut cache = PipelineStateCache::new(device)?;
    let truncated = &bytes[..bytes.len() / 2];
    assert_eq!(cache.read_from(&mut &truncated[..])?, CacheLoadStatus::NotLoaded);
    assert_eq!(cache.num_pipelines(), 0);
    Ok(())
}

#[test]
pub fn blob_from_other_device_is_not_seeded() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let (_original, bytes) = populated_cache(&device)?;

    let mut properties = *device.properties();
    properties.pipeline_cache_uuid[0] ^= 0xFF;
    let (other, other_backend) =
        framework::make_device_with_backend(Arc::new(HeadlessDevice::with_properties(properties)), RhiSettings::default())?;
    let mut cache = PipelineStateCache::new(other)?;
    match cache.read_from(&mut bytes.as_slice())? {
        CacheLoadStatus::Loaded {
            pipelines,
            native_blob_trusted,
            ..
        } => {
            assert_eq!(pipelines, 2, "Pipeline descriptions are still usable.");
            assert!(!native_blob_trusted);
        }
        CacheLoadStatus::NotLoaded => panic!("Cache should have been loaded."),
    }
    assert_eq!(other_backend.pipeline_cache_seeds().last(), Some(&0));
    Ok(())
}

#[test]
pub fn native_blob_header_checks() {
    let properties = DeviceProperties {
        vendor_id: 0x10DE,
        device_id: 0x2204,
        pipeline_cache_uuid: [7; vk::UUID_SIZE],
    };
    let blob = HeadlessDevice::pipeline_cache_blob(&properties);
    assert!(is_native_blob_trusted(&blob, &properties));
    assert!(!is_native_blob_trusted(&blob[..16], &properties));
    assert!(!is_native_blob_trusted(&[], &properties));

    let other_vendor = DeviceProperties {
        vendor_id: 0x1002,
        ..properties
    };
    assert!(!is_native_blob_trusted(&blob, &other_vendor));
    let other_device = DeviceProperties {
        device_id: 0x73BF,
        ..properties
    };
    assert!(!is_native_blob_trusted(&blob, &other_device));

    let mut bad_version = blob.clone();
    LittleEndian::write_u32(&mut bad_version[4..8], 2);
    assert!(!is_native_blob_trusted(&bad_version, &properties));
    assert!(blob.ends_with(HEADLESS_CACHE_PAYLOAD));
}

#[test]
pub fn save_and_load_through_files() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let (original, _bytes) = populated_cache(&device)?;
    let path = temp_path("save-and-load");
    original.save(&path)?;

    let missing = temp_path("missing");
    let mut cache = PipelineStateCache::new(device.clone())?;
    let status = cache.load(&[missing, path.clone()])?;
    match &status {
        CacheLoadStatus::Loaded {
            source,
            pipelines,
            ..
        } => {
            assert_eq!(source, &path, "The missing file should be skipped.");
            assert_eq!(*pipelines, 2);
        }
        CacheLoadStatus::NotLoaded => panic!("Cache should have been loaded."),
    }
    assert_eq!(sorted_entries(&original), sorted_entries(&cache));

    // Loading can be disabled in the settings.
    let (no_load, _) = framework::make_device_with_settings(SettingsBuilder::new().pipeline_cache_load(false).build())?;
    let mut skipped = PipelineStateCache::new(no_load)?;
    assert_eq!(skipped.init_and_load(&[path.clone()])?, CacheLoadStatus::NotLoaded);
    assert_eq!(skipped.num_pipelines(), 0);

    std::fs::remove_file(&path)?;
    Ok(())
}

#[test]
pub fn persisted_shader_hashes_use_a_fixed_hasher() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let (cache, _bytes) = populated_cache(&device)?;
    for entry in cache.entries() {
        for (code, stored) in entry.shader_microcode.iter().zip(entry.shader_hashes.iter()) {
            if code.is_empty() {
                assert_eq!(*stored, 0);
                continue;
            }
            let mut hasher = FxHasher64::default();
            code.as_slice().hash(&mut hasher);
            assert_eq!(*stored, hasher.finish());
            assert_eq!(hash_microcode(code), hasher.finish());
        }
    }
    Ok(())
}
