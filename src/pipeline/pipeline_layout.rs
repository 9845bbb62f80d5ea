//! Wrapper structs around `VkPipelineLayout` objects.

use anyhow::Result;
use ash::vk;

use crate::Device;
use crate::pipeline::set_layout::{DescriptorBinding, DescriptorSetLayout};

/// A fully built Vulkan pipeline layout, owning its descriptor set layouts.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct PipelineLayout {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::PipelineLayout,
    set_layouts: Vec<DescriptorSetLayout>,
}

impl PipelineLayout {
    /// Create one descriptor set layout per entry of `sets`, and a pipeline layout using all of them in order.
    pub fn new(device: Device, sets: &[Vec<DescriptorBinding>]) -> Result<Self> {
        let set_layouts = sets
            .iter()
            .map(|bindings| DescriptorSetLayout::new(device.clone(), bindings))
            .collect::<Result<Vec<_>>>()?;
        let handles = set_layouts
            .iter()
            .map(|layout| unsafe { layout.handle() })
            .collect::<Vec<_>>();
        let info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: Default::default(),
            set_layout_count: handles.len() as u32,
            p_set_layouts: handles.as_ptr(),
            push_constant_range_count: 0,
            p_push_constant_ranges: std::ptr::null(),
        };
        let handle = unsafe { device.create_pipeline_layout(&info)? };

        #[cfg(feature = "log-objects")]
        trace!("Created new VkPipelineLayout {handle:p}");

        Ok(Self {
            device,
            handle,
            set_layouts,
        })
    }

    /// Get unsafe access to the internal `VkPipelineLayout`.
    /// # Safety
    /// Any vulkan calls that mutate this pipeline layout may put the system in an undefined state.
    pub unsafe fn handle(&self) -> vk::PipelineLayout {
        self.handle
    }

    /// Get the descriptor set layouts of this pipeline layout.
    pub fn set_layouts(&self) -> &[DescriptorSetLayout] {
        self.set_layouts.as_slice()
    }

    /// The bindings of every set, in set order.
    pub fn set_bindings(&self) -> Vec<Vec<DescriptorBinding>> {
        self.set_layouts
            .iter()
            .map(|layout| layout.bindings().to_vec())
            .collect()
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkPipelineLayout {:p}", self.handle);
        unsafe {
            self.device.destroy_pipeline_layout(self.handle);
        }
    }
}
