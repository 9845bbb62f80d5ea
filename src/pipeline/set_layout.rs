use ash::vk;

use anyhow::Result;

use crate::Device;

/// One binding of a descriptor set layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub count: u32,
    pub ty: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
}

impl DescriptorBinding {
    pub fn new(binding: u32, ty: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            count: 1,
            ty,
            stages,
        }
    }

    pub fn to_vk(&self) -> vk::DescriptorSetLayoutBinding {
        vk::DescriptorSetLayoutBinding {
            binding: self.binding,
            descriptor_type: self.ty,
            descriptor_count: self.count,
            stage_flags: self.stages,
            p_immutable_samplers: std::ptr::null(),
        }
    }
}

/// A fully built Vulkan descriptor set layout.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct DescriptorSetLayout {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::DescriptorSetLayout,
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayout {
    pub fn new(device: Device, bindings: &[DescriptorBinding]) -> Result<Self> {
        let vk_bindings = bindings.iter().map(|b| b.to_vk()).collect::<Vec<_>>();
        let info = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: Default::default(),
            binding_count: vk_bindings.len() as u32,
            p_bindings: vk_bindings.as_ptr(),
        };
        let handle = unsafe { device.create_descriptor_set_layout(&info)? };
        #[cfg(feature = "log-objects")]
        trace!("Created new VkDescriptorSetLayout {handle:p}");

        Ok(Self {
            device,
            handle,
            bindings: bindings.to_vec(),
        })
    }

    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    /// Get unsafe access to the underlying `VkDescriptorSetLayout`.
    /// # Safety
    /// Any vulkan calls that mutate the layout may put the system in an undefined state.
    pub unsafe fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkDescriptorSetLayout {:p}", self.handle);
        unsafe {
            self.device.destroy_descriptor_set_layout(self.handle);
        }
    }
}
