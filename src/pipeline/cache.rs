use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use ash::vk;
use byteorder::{LittleEndian, ReadBytesExt};

use crate::{Device, Error};
use crate::backend::DeviceProperties;
use crate::pipeline::entry::{CacheFile, entry_size, EntryRuntime, GfxPipelineEntry, PIPELINE_CACHE_VERSION, write_cache_file};
use crate::pipeline::key::PipelineStateKey;
use crate::pipeline::Pipeline;
use crate::pipeline::shader::{BoundShaderState, NUM_SHADER_STAGES};
use crate::pipeline::state::{BlendState, DepthStencilState, RasterizerState};
use crate::render_pass::RenderPass;
use crate::deferred_delete::DeletionQueue;

/// Number of frames a released pipeline is kept alive, so that command buffers still in flight can finish using it.
pub const MAX_FRAMES_IN_FLIGHT: u32 = 3;

/// Composite lookup key of the cache. Equality of all three parts is necessary and sufficient for two draws to use
/// the same pipeline.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineCacheKey {
    pub graphics: PipelineStateKey,
    pub vertex_input: u32,
    pub shader_hashes: [u64; NUM_SHADER_STAGES],
}

/// The parts of the pending state a pipeline is created from, besides the bound shader state.
#[derive(Debug, Clone)]
pub struct PipelineDrawState<'a> {
    pub blend: &'a BlendState,
    pub rasterizer: &'a RasterizerState,
    pub depth_stencil: &'a DepthStencilState,
    pub stencil_ref: u32,
    pub render_pass: &'a Arc<RenderPass>,
    pub topology: vk::PrimitiveTopology,
}

/// Result of loading a pipeline cache file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLoadStatus {
    /// No file was accepted, the cache is empty.
    NotLoaded,
    Loaded {
        source: PathBuf,
        /// Number of pipelines recreated from the file.
        pipelines: usize,
        /// Whether the native pipeline cache blob was used to seed the driver cache.
        native_blob_trusted: bool,
    },
}

#[derive(Debug)]
struct CachedPipeline {
    entry: GfxPipelineEntry,
    pipeline: Arc<Pipeline>,
    ref_count: u32,
}

/// Check the header of a native pipeline cache blob against the current device. A blob from a different vendor,
/// device or driver (pipeline cache UUID) must not be handed to the driver.
pub fn is_native_blob_trusted(blob: &[u8], properties: &DeviceProperties) -> bool {
    const HEADER_SIZE: usize = 16 + vk::UUID_SIZE;
    fn check(mut header: &[u8], properties: &DeviceProperties) -> std::io::Result<bool> {
        let header_size = header.read_u32::<LittleEndian>()?;
        let header_version = header.read_u32::<LittleEndian>()?;
        let vendor_id = header.read_u32::<LittleEndian>()?;
        let device_id = header.read_u32::<LittleEndian>()?;
        let mut uuid = [0u8; vk::UUID_SIZE];
        header.read_exact(&mut uuid)?;
        Ok(header_size as usize == HEADER_SIZE
            && header_version == vk::PipelineCacheHeaderVersion::ONE.as_raw() as u32
            && vendor_id == properties.vendor_id
            && device_id == properties.device_id
            && uuid == properties.pipeline_cache_uuid)
    }

    if blob.len() < HEADER_SIZE {
        return false;
    }
    check(blob, properties).unwrap_or(false)
}

/// Maps pipeline cache keys to native graphics pipelines, creating pipelines on first use.
///
/// Every successful [`PipelineStateCache::find()`] and [`PipelineStateCache::create_and_add()`] takes a reference
/// that must be given back with [`PipelineStateCache::destroy_pipeline()`]. The map is the only owner that counts,
/// there is no separate garbage collection.
///
/// # Example
/// ```
/// # use std::sync::Arc;
/// # use vulkan_rhi::*;
/// # use vulkan_rhi::backend::headless::HeadlessDevice;
/// # fn main() -> anyhow::Result<()> {
/// let device = Device::new(Arc::new(HeadlessDevice::new()), RhiSettings::default())?;
/// let mut cache = PipelineStateCache::new(device)?;
/// let status = cache.load(&["does/not/exist.cache"])?;
/// assert_eq!(status, CacheLoadStatus::NotLoaded);
/// assert_eq!(cache.num_pipelines(), 0);
/// # Ok(())
/// # }
/// ```
#[derive(Derivative)]
#[derivative(Debug)]
pub struct PipelineStateCache {
    #[derivative(Debug = "ignore")]
    device: Device,
    native: vk::PipelineCache,
    pipelines: HashMap<PipelineCacheKey, CachedPipeline>,
    deletion_queue: DeletionQueue<Arc<Pipeline>>,
    generation: u64,
}

fn create_native_cache(device: &Device, seed: &[u8]) -> Result<vk::PipelineCache> {
    let info = vk::PipelineCacheCreateInfo {
        s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
        p_next: std::ptr::null(),
        flags: Default::default(),
        initial_data_size: seed.len(),
        p_initial_data: seed.as_ptr() as *const std::ffi::c_void,
    };
    let handle = unsafe { device.create_pipeline_cache(&info)? };
    #[cfg(feature = "log-objects")]
    trace!("Created new VkPipelineCache {handle:p}");
    Ok(handle)
}

impl PipelineStateCache {
    /// Create an empty cache backed by an empty native pipeline cache.
    pub fn new(device: Device) -> Result<Self> {
        let native = create_native_cache(&device, &[])?;
        Ok(Self {
            device,
            native,
            pipelines: HashMap::new(),
            deletion_queue: DeletionQueue::new(MAX_FRAMES_IN_FLIGHT),
            generation: 0,
        })
    }

    /// Look up a pipeline. A hit takes a reference.
    pub fn find(&mut self, key: &PipelineCacheKey) -> Option<Arc<Pipeline>> {
        let cached = self.pipelines.get_mut(key)?;
        cached.ref_count += 1;
        Some(cached.pipeline.clone())
    }

    pub fn contains(&self, key: &PipelineCacheKey) -> bool {
        self.pipelines.contains_key(key)
    }

    /// Current reference count of a cached pipeline.
    pub fn ref_count(&self, key: &PipelineCacheKey) -> Option<u32> {
        self.pipelines.get(key).map(|cached| cached.ref_count)
    }

    /// Create the pipeline for `key` from the current draw state and register it with a reference count of one.
    /// # Errors
    /// Fails with [`Error::PipelineAlreadyCached`] if the key is already present.
    pub fn create_and_add(
        &mut self,
        key: PipelineCacheKey,
        draw: &PipelineDrawState,
        shaders: &BoundShaderState,
    ) -> Result<Arc<Pipeline>> {
        if self.pipelines.contains_key(&key) {
            return Err(Error::PipelineAlreadyCached.into());
        }
        let entry = GfxPipelineEntry::populate(key, draw, shaders);
        let runtime = EntryRuntime::from_draw(draw, shaders);
        let pipeline = self.create_pipeline(&entry, runtime)?;
        self.pipelines.insert(
            key,
            CachedPipeline {
                entry,
                pipeline: pipeline.clone(),
                ref_count: 1,
            },
        );
        Ok(pipeline)
    }

    fn create_pipeline(&self, entry: &GfxPipelineEntry, runtime: EntryRuntime) -> Result<Arc<Pipeline>> {
        let start = Instant::now();
        let pipeline = Pipeline::new(self.device.clone(), self.native, entry, runtime)?;
        let elapsed = start.elapsed();
        if elapsed > self.device.settings().pipeline_hitch_threshold {
            warn!(
                "Hitchy pipeline creation ({:.2} ms) for key {:016x?} with shaders {:?}",
                elapsed.as_secs_f64() * 1000.0,
                entry.graphics_key.words(),
                pipeline.shader_names()
            );
        }
        Ok(Arc::new(pipeline))
    }

    /// Give back one reference. The last reference removes the pipeline from the cache, and the native pipeline is
    /// destroyed after [`MAX_FRAMES_IN_FLIGHT`] calls to [`PipelineStateCache::next_frame()`].
    pub fn destroy_pipeline(&mut self, key: &PipelineCacheKey) -> Result<()> {
        let cached = self
            .pipelines
            .get_mut(key)
            .ok_or(Error::PipelineNotCached)?;
        cached.ref_count = cached.ref_count.saturating_sub(1);
        if cached.ref_count == 0 {
            if let Some(cached) = self.pipelines.remove(key) {
                self.deletion_queue.push(cached.pipeline);
            }
        }
        Ok(())
    }

    /// Advance the deletion queue of released pipelines.
    pub fn next_frame(&mut self) {
        self.deletion_queue.next_frame();
    }

    /// Load the first acceptable file of `filenames`, unless loading is disabled in the settings.
    pub fn init_and_load<P: AsRef<Path>>(&mut self, filenames: &[P]) -> Result<CacheLoadStatus> {
        if !self.device.settings().pipeline_cache_load {
            info!("Pipeline cache loading is disabled");
            return Ok(CacheLoadStatus::NotLoaded);
        }
        self.load(filenames)
    }

    /// Try each file in order and load the first one that decodes and matches the current version.
    /// Rejected files are logged and skipped, they never cause an error.
    pub fn load<P: AsRef<Path>>(&mut self, filenames: &[P]) -> Result<CacheLoadStatus> {
        for filename in filenames {
            let path = filename.as_ref();
            let file = match File::open(path) {
                Ok(file) => file,
                Err(err) => {
                    debug!("Cannot open pipeline cache {}: {err}", path.display());
                    continue;
                }
            };
            match CacheFile::read_from(&mut BufReader::new(file)) {
                Ok(cache_file) => return self.apply(cache_file, path.to_path_buf()),
                Err(err) => warn!("Rejected pipeline cache {}: {err}", path.display()),
            }
        }
        Ok(CacheLoadStatus::NotLoaded)
    }

    /// Load a cache file from any stream.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> Result<CacheLoadStatus> {
        match CacheFile::read_from(reader) {
            Ok(cache_file) => self.apply(cache_file, PathBuf::new()),
            Err(err) => {
                warn!("Rejected pipeline cache stream: {err}");
                Ok(CacheLoadStatus::NotLoaded)
            }
        }
    }

    fn apply(&mut self, cache_file: CacheFile, source: PathBuf) -> Result<CacheLoadStatus> {
        let trusted = is_native_blob_trusted(&cache_file.native_blob, self.device.properties());
        if !trusted && !cache_file.native_blob.is_empty() {
            warn!("Native pipeline cache blob in {} was produced by a different device or driver, discarding it", source.display());
        }
        let seed: &[u8] = if trusted { &cache_file.native_blob } else { &[] };
        let native = create_native_cache(&self.device, seed)?;
        unsafe {
            self.device.destroy_pipeline_cache(self.native);
        }
        self.native = native;

        let mut pipelines = 0;
        for entry in cache_file.entries {
            let key = entry.key();
            if self.pipelines.contains_key(&key) {
                continue;
            }
            let pipeline = EntryRuntime::create(&self.device, &entry).and_then(|runtime| self.create_pipeline(&entry, runtime));
            match pipeline {
                Ok(pipeline) => {
                    self.pipelines.insert(
                        key,
                        CachedPipeline {
                            entry,
                            pipeline,
                            ref_count: 1,
                        },
                    );
                    pipelines += 1;
                }
                Err(err) => warn!("Could not recreate cached pipeline {:016x?}: {err}", key.graphics.words()),
            }
        }
        info!("Loaded {pipelines} pipelines from pipeline cache {}", source.display());
        Ok(CacheLoadStatus::Loaded {
            source,
            pipelines,
            native_blob_trusted: trusted,
        })
    }

    /// Write every cached pipeline description and the native pipeline cache blob to `filename`.
    pub fn save(&self, filename: impl AsRef<Path>) -> Result<()> {
        let path = filename.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        info!("Saved {} pipelines to pipeline cache {}", self.pipelines.len(), path.display());
        Ok(())
    }

    /// Write the cache file to any stream. Entries are written in key order.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut entries = self.pipelines.iter().collect::<Vec<_>>();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        let entries = entries
            .into_iter()
            .map(|(_, cached)| &cached.entry)
            .collect::<Vec<_>>();
        let blob = unsafe { self.device.get_pipeline_cache_data(self.native)? };
        write_cache_file(writer, PIPELINE_CACHE_VERSION, entry_size(), &entries, &blob)
    }

    /// Drop every cached pipeline, forcing recreation on next use. Waits for the device to go idle first.
    /// Bound shader states notice the rebuild through [`PipelineStateCache::generation()`].
    ///
    /// Waiting for idle does not cover command buffers that are still recording. Those must be submitted first, see
    /// [`CommandListContext::rebuild_pipeline_cache()`](crate::CommandListContext::rebuild_pipeline_cache).
    pub fn rebuild_cache(&mut self) -> Result<()> {
        self.device.wait_idle()?;
        warn!("Rebuilding pipeline cache, dropping {} pipelines", self.pipelines.len());
        self.pipelines.clear();
        self.deletion_queue.flush();
        self.generation += 1;
        Ok(())
    }

    /// Descriptions of every cached pipeline, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = &GfxPipelineEntry> {
        self.pipelines.values().map(|cached| &cached.entry)
    }

    pub fn num_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    /// Released pipelines that are waiting for destruction.
    pub fn num_retired(&self) -> usize {
        self.deletion_queue.len()
    }

    /// Bumped by every [`PipelineStateCache::rebuild_cache()`].
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Get unsafe access to the native `VkPipelineCache`.
    /// # Safety
    /// Destroying the native cache leaves this object in an invalid state.
    pub unsafe fn handle(&self) -> vk::PipelineCache {
        self.native
    }
}

impl Drop for PipelineStateCache {
    fn drop(&mut self) {
        self.pipelines.clear();
        self.deletion_queue.flush();
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkPipelineCache {:p}", self.native);
        unsafe {
            self.device.destroy_pipeline_cache(self.native);
        }
    }
}
