//! Exposes all structs needed to store runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Creation of a single pipeline is expected to take less than two frames at 60Hz. Anything slower is
/// reported as a hitch.
pub const DEFAULT_PIPELINE_HITCH_THRESHOLD: Duration = Duration::from_micros(2 * 1_000_000 / 60);

/// Settings consumed by the [`Device`](crate::Device) and everything created from it.
///
/// # Example
/// ```
/// # use vulkan_rhi::*;
/// let settings = SettingsBuilder::new()
///     .pipeline_cache_load(false)
///     .validation(true)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct RhiSettings {
    /// Whether to load the pipeline cache file at startup. When disabled, every pipeline is built fresh this run.
    pub pipeline_cache_load: bool,
    /// Enables additional state validation, such as the pipeline key layout self-check, in release builds.
    pub validation: bool,
    /// Candidate pipeline cache files, tried in order on load. The first one is used when saving.
    pub pipeline_cache_files: Vec<PathBuf>,
    /// Pipeline creation taking longer than this is logged as a hitch.
    pub pipeline_hitch_threshold: Duration,
    /// Timeout used when a submit call asks to wait for completion.
    pub cmd_buffer_wait_timeout: Duration,
    /// Maximum time a command buffer waits for the GPU when it is destroyed while still submitted.
    pub cmd_buffer_destroy_timeout: Duration,
    /// Queue family that command pools are created for and submissions go to.
    pub queue_family_index: u32,
}

impl Default for RhiSettings {
    fn default() -> Self {
        Self {
            pipeline_cache_load: true,
            validation: false,
            pipeline_cache_files: Vec::new(),
            pipeline_hitch_threshold: DEFAULT_PIPELINE_HITCH_THRESHOLD,
            cmd_buffer_wait_timeout: Duration::from_secs(1),
            cmd_buffer_destroy_timeout: Duration::from_millis(60),
            queue_family_index: 0,
        }
    }
}

/// The settings builder is a convenience struct to easily create [`RhiSettings`].
///
/// For information about each of the fields, see [`RhiSettings`]
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    inner: RhiSettings,
}

impl SettingsBuilder {
    /// Create a new settings builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the pipeline cache file should be loaded at startup.
    pub fn pipeline_cache_load(mut self, load: bool) -> Self {
        self.inner.pipeline_cache_load = load;
        self
    }

    /// Enable additional validation.
    pub fn validation(mut self, val: bool) -> Self {
        self.inner.validation = val;
        self
    }

    /// Append a candidate pipeline cache file.
    pub fn pipeline_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.inner.pipeline_cache_files.push(path.into());
        self
    }

    /// Set the pipeline creation hitch threshold.
    pub fn pipeline_hitch_threshold(mut self, threshold: Duration) -> Self {
        self.inner.pipeline_hitch_threshold = threshold;
        self
    }

    pub fn cmd_buffer_wait_timeout(mut self, timeout: Duration) -> Self {
        self.inner.cmd_buffer_wait_timeout = timeout;
        self
    }

    pub fn cmd_buffer_destroy_timeout(mut self, timeout: Duration) -> Self {
        self.inner.cmd_buffer_destroy_timeout = timeout;
        self
    }

    /// Sets the queue family used for submissions.
    pub fn queue_family(mut self, family: u32) -> Self {
        self.inner.queue_family_index = family;
        self
    }

    /// Build the resulting settings.
    pub fn build(self) -> RhiSettings {
        self.inner
    }
}
