use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;

use crate::backend::{DeviceProperties, RawDevice};
use crate::core::app_info::RhiSettings;
use crate::core::queue::Queue;
use crate::pipeline::key::PipelineStateKey;
use crate::pipeline::state::StateKeyRegistry;
use crate::sync::fence::FenceManager;
use crate::Error;

#[derive(Derivative)]
#[derivative(Debug)]
struct DeviceInner {
    #[derivative(Debug = "ignore")]
    raw: Arc<dyn RawDevice>,
    properties: DeviceProperties,
    settings: RhiSettings,
    fence_manager: FenceManager,
    queue: Queue,
    key_registry: Mutex<StateKeyRegistry>,
}

/// The device ties together the native API, the fence pool, the submission queue and the state key registries.
/// Internal state is wrapped in an `Arc<DeviceInner>`, so this is safe to clone.
///
/// `Device` dereferences to the [`RawDevice`] it was created from.
#[derive(Debug, Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Create a new device on top of a native device implementation.
    /// # Errors
    /// Fails if validation is enabled and the pipeline key bit layout does not pass its self check.
    pub fn new(raw: Arc<dyn RawDevice>, settings: RhiSettings) -> Result<Self> {
        let properties = raw.properties();
        info!(
            "Creating device for vendor {:#06x}, device {:#06x}",
            properties.vendor_id, properties.device_id
        );
        if cfg!(debug_assertions) || settings.validation {
            PipelineStateKey::verify_layout()?;
        }

        let inner = DeviceInner {
            fence_manager: FenceManager::new(raw.clone()),
            queue: Queue::new(raw.clone(), settings.queue_family_index),
            key_registry: Mutex::new(StateKeyRegistry::new()),
            raw,
            properties,
            settings,
        };

        Ok(Device {
            inner: Arc::new(inner),
        })
    }

    /// Wait for the device to be completely idle.
    /// This should not be used as a synchronization measure, except on exit or when rebuilding caches.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { Ok(self.inner.raw.device_wait_idle()?) }
    }

    pub fn raw(&self) -> &Arc<dyn RawDevice> {
        &self.inner.raw
    }

    pub fn fence_manager(&self) -> &FenceManager {
        &self.inner.fence_manager
    }

    pub fn queue(&self) -> &Queue {
        &self.inner.queue
    }

    /// Properties used to validate pipeline cache blobs.
    pub fn properties(&self) -> &DeviceProperties {
        &self.inner.properties
    }

    pub fn settings(&self) -> &RhiSettings {
        &self.inner.settings
    }

    /// Whether additional state checks should run.
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) || self.inner.settings.validation
    }

    /// Lock the registries that map render state to the small ids stored in pipeline keys.
    pub fn key_registry(&self) -> Result<MutexGuard<StateKeyRegistry>> {
        Ok(self
            .inner
            .key_registry
            .lock()
            .map_err(|_| Error::PoisonError)?)
    }
}

impl Deref for Device {
    type Target = dyn RawDevice;

    fn deref(&self) -> &Self::Target {
        self.inner.raw.as_ref()
    }
}
