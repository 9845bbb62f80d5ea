use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use fxhash::FxHasher64;

use crate::{Device, Error};
use crate::command_buffer::CommandBuffer;
use crate::pipeline::cache::{PipelineCacheKey, PipelineDrawState, PipelineStateCache};
use crate::pipeline::key::PipelineStateKey;
use crate::pipeline::pipeline_layout::PipelineLayout;
use crate::pipeline::set_layout::DescriptorBinding;
use crate::pipeline::Pipeline;

/// Number of graphics shader stages a bound shader state can hold.
pub const NUM_SHADER_STAGES: usize = 5;

/// Maximum number of vertex streams that can be set on the pending state.
pub const MAX_VERTEX_STREAMS: usize = 16;

/// Graphics shader stages, in the order they are stored in pipeline keys and cache files.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex = 0,
    Hull = 1,
    Domain = 2,
    Pixel = 3,
    Geometry = 4,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; NUM_SHADER_STAGES] =
        [ShaderStage::Vertex, ShaderStage::Hull, ShaderStage::Domain, ShaderStage::Pixel, ShaderStage::Geometry];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Hull => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            ShaderStage::Domain => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            ShaderStage::Pixel => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        }
    }
}

/// Hash of SPIR-V microcode, as stored in pipeline cache keys. Persisted, so it must not depend on the toolchain.
pub fn hash_microcode(code: &[u8]) -> u64 {
    let mut hasher = FxHasher64::default();
    code.hash(&mut hasher);
    hasher.finish()
}

/// A compiled shader module together with the microcode it was created from.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ShaderModule {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::ShaderModule,
    stage: ShaderStage,
    name: String,
    #[derivative(Debug = "ignore")]
    code: Vec<u8>,
    code_hash: u64,
}

impl ShaderModule {
    /// Create a shader module from a SPIR-V binary.
    /// # Errors
    /// Fails with [`Error::InvalidSpirv`] if the binary is empty or its length is not a multiple of four.
    pub fn from_spirv(device: Device, stage: ShaderStage, name: impl Into<String>, code: &[u8]) -> Result<Self> {
        if code.is_empty() || code.len() % 4 != 0 {
            return Err(Error::InvalidSpirv(code.len()).into());
        }
        // Byte slices are not guaranteed to be aligned for u32 access.
        let words = code
            .chunks_exact(4)
            .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect::<Vec<_>>();
        let info = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: Default::default(),
            code_size: code.len(),
            p_code: words.as_ptr(),
        };
        let handle = unsafe { device.create_shader_module(&info)? };
        #[cfg(feature = "log-objects")]
        trace!("Created new VkShaderModule {handle:p}");

        Ok(Self {
            device,
            handle,
            stage,
            name: name.into(),
            code: code.to_vec(),
            code_hash: hash_microcode(code),
        })
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn code_hash(&self) -> u64 {
        self.code_hash
    }

    /// Get unsafe access to the underlying `VkShaderModule` object.
    /// # Safety
    /// Any vulkan calls that mutate the shader module may put the system in an undefined state.
    pub unsafe fn handle(&self) -> vk::ShaderModule {
        self.handle
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkShaderModule {:p}", self.handle);
        unsafe {
            self.device.destroy_shader_module(self.handle);
        }
    }
}

/// One attribute of a vertex declaration. Elements refer to vertex streams, which are compacted into consecutive
/// bindings by [`VertexInputState`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct VertexElement {
    pub stream: u32,
    pub offset: u32,
    pub format: vk::Format,
    pub location: u32,
    pub stride: u32,
    pub per_instance: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct VertexBinding {
    pub stride: u32,
    pub binding: u32,
    pub input_rate: vk::VertexInputRate,
}

impl VertexBinding {
    pub fn to_vk(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: self.binding,
            stride: self.stride,
            input_rate: self.input_rate,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub offset: u32,
}

impl VertexAttribute {
    pub fn to_vk(&self) -> vk::VertexInputAttributeDescription {
        vk::VertexInputAttributeDescription {
            location: self.location,
            binding: self.binding,
            format: self.format,
            offset: self.offset,
        }
    }
}

/// Vertex bindings and attributes derived from a vertex declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexInputState {
    bindings: Vec<VertexBinding>,
    attributes: Vec<VertexAttribute>,
    binding_to_stream: Vec<u32>,
    hash: u32,
}

impl VertexInputState {
    pub fn new(elements: &[VertexElement]) -> Self {
        let mut bindings = Vec::new();
        let mut attributes = Vec::with_capacity(elements.len());
        let mut binding_to_stream: Vec<u32> = Vec::new();
        for element in elements {
            let binding = match binding_to_stream.iter().position(|stream| *stream == element.stream) {
                Some(binding) => binding as u32,
                None => {
                    let binding = binding_to_stream.len() as u32;
                    binding_to_stream.push(element.stream);
                    bindings.push(VertexBinding {
                        stride: element.stride,
                        binding,
                        input_rate: if element.per_instance {
                            vk::VertexInputRate::INSTANCE
                        } else {
                            vk::VertexInputRate::VERTEX
                        },
                    });
                    binding
                }
            };
            attributes.push(VertexAttribute {
                location: element.location,
                binding,
                format: element.format,
                offset: element.offset,
            });
        }

        let mut hasher = FxHasher64::default();
        bindings.hash(&mut hasher);
        attributes.hash(&mut hasher);
        Self {
            bindings,
            attributes,
            binding_to_stream,
            hash: hasher.finish() as u32,
        }
    }

    pub fn bindings(&self) -> &[VertexBinding] {
        &self.bindings
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    /// Vertex stream index used by each binding.
    pub fn binding_to_stream(&self) -> &[u32] {
        &self.binding_to_stream
    }

    /// Hash of the bindings and attributes, part of the pipeline cache key.
    pub fn input_hash(&self) -> u32 {
        self.hash
    }
}

/// Buffer bound to a vertex stream.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct VertexStream {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
}

/// A set of shaders together with their vertex declaration and resource layout. Holds the pipelines it was drawn
/// with so that repeated draws with the same state skip the cache lookup.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct BoundShaderState {
    #[derivative(Debug = "ignore")]
    device: Device,
    shaders: [Option<Arc<ShaderModule>>; NUM_SHADER_STAGES],
    vertex_input: VertexInputState,
    layout: Arc<PipelineLayout>,
    #[derivative(Debug = "ignore")]
    pipelines: HashMap<PipelineCacheKey, Arc<Pipeline>>,
    generation: u64,
    descriptor_sets: Vec<vk::DescriptorSet>,
    descriptor_sets_dirty: bool,
}

impl BoundShaderState {
    /// # Errors
    /// Fails with [`Error::NoVertexShader`] if none of the shaders is a vertex shader.
    pub fn new(
        device: Device,
        shaders: impl IntoIterator<Item = Arc<ShaderModule>>,
        vertex_input: VertexInputState,
        sets: &[Vec<DescriptorBinding>],
    ) -> Result<Self> {
        let mut slots: [Option<Arc<ShaderModule>>; NUM_SHADER_STAGES] = Default::default();
        for shader in shaders {
            let index = shader.stage().index();
            slots[index] = Some(shader);
        }
        if slots[ShaderStage::Vertex.index()].is_none() {
            return Err(Error::NoVertexShader.into());
        }
        let layout = Arc::new(PipelineLayout::new(device.clone(), sets)?);
        Ok(Self {
            device,
            shaders: slots,
            vertex_input,
            layout,
            pipelines: HashMap::new(),
            generation: 0,
            descriptor_sets: Vec::new(),
            descriptor_sets_dirty: false,
        })
    }

    pub fn shader(&self, stage: ShaderStage) -> Option<&Arc<ShaderModule>> {
        self.shaders[stage.index()].as_ref()
    }

    pub fn shaders(&self) -> impl Iterator<Item = &Arc<ShaderModule>> {
        self.shaders.iter().flatten()
    }

    /// Microcode hash per stage, zero for empty stages.
    pub fn shader_hashes(&self) -> [u64; NUM_SHADER_STAGES] {
        let mut hashes = [0; NUM_SHADER_STAGES];
        for (hash, shader) in hashes.iter_mut().zip(self.shaders.iter()) {
            *hash = shader.as_ref().map(|s| s.code_hash()).unwrap_or(0);
        }
        hashes
    }

    pub fn vertex_input(&self) -> &VertexInputState {
        &self.vertex_input
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }

    /// Number of pipelines this state holds a reference to.
    pub fn num_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    pub fn cache_key(&self, key: &PipelineStateKey) -> PipelineCacheKey {
        PipelineCacheKey {
            graphics: *key,
            vertex_input: self.vertex_input.input_hash(),
            shader_hashes: self.shader_hashes(),
        }
    }

    /// Set the descriptor sets bound with the next draw, in set order.
    pub fn set_descriptor_sets(&mut self, sets: Vec<vk::DescriptorSet>) {
        self.descriptor_sets = sets;
        self.descriptor_sets_dirty = true;
    }

    /// Validate descriptor sets changed since the last draw. Returns whether anything changed.
    pub fn update_descriptor_sets(&mut self) -> Result<bool> {
        if !self.descriptor_sets_dirty {
            return Ok(false);
        }
        if self.descriptor_sets.len() > self.layout.set_layouts().len() {
            return Err(Error::Uncategorized("more descriptor sets than set layouts").into());
        }
        self.descriptor_sets_dirty = false;
        Ok(true)
    }

    /// Find the pipeline for the current state. Looks in the pipelines used by this state first, then in the cache,
    /// creating the pipeline if neither has it. Either way the cache reference count goes up once per key.
    pub fn prepare_for_draw(
        &mut self,
        cache: &mut PipelineStateCache,
        key: &PipelineStateKey,
        draw: &PipelineDrawState,
    ) -> Result<Arc<Pipeline>> {
        if self.generation != cache.generation() {
            // The cache was rebuilt, every pipeline we hold is gone from it.
            self.pipelines.clear();
            self.generation = cache.generation();
        }
        let cache_key = self.cache_key(key);
        if let Some(pipeline) = self.pipelines.get(&cache_key) {
            return Ok(pipeline.clone());
        }
        let pipeline = match cache.find(&cache_key) {
            Some(pipeline) => pipeline,
            None => cache.create_and_add(cache_key, draw, self)?,
        };
        self.pipelines.insert(cache_key, pipeline.clone());
        Ok(pipeline)
    }

    /// Give back every cache reference this state holds.
    pub fn release_pipelines(&mut self, cache: &mut PipelineStateCache) -> Result<()> {
        let stale = self.generation != cache.generation();
        for (key, _) in self.pipelines.drain() {
            if !stale {
                cache.destroy_pipeline(&key)?;
            }
        }
        Ok(())
    }

    pub fn bind_descriptor_sets(&self, cmd: &CommandBuffer) {
        if self.descriptor_sets.is_empty() {
            return;
        }
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd.handle(),
                vk::PipelineBindPoint::GRAPHICS,
                self.layout.handle(),
                0,
                &self.descriptor_sets,
                &[],
            );
        }
    }

    /// Bind the buffers of all streams used by the vertex declaration. Streams without a buffer are skipped.
    pub fn bind_vertex_streams(&self, cmd: &CommandBuffer, streams: &[VertexStream]) {
        let mut first = 0u32;
        let mut buffers = Vec::new();
        let mut offsets = Vec::new();
        let flush = |first: u32, buffers: &mut Vec<vk::Buffer>, offsets: &mut Vec<vk::DeviceSize>| {
            if !buffers.is_empty() {
                unsafe {
                    self.device
                        .cmd_bind_vertex_buffers(cmd.handle(), first, buffers, offsets);
                }
                buffers.clear();
                offsets.clear();
            }
        };
        for (binding, stream) in self.vertex_input.binding_to_stream().iter().enumerate() {
            let stream = streams.get(*stream as usize).copied().unwrap_or_default();
            if stream.buffer == vk::Buffer::null() {
                flush(first, &mut buffers, &mut offsets);
                first = binding as u32 + 1;
                continue;
            }
            buffers.push(stream.buffer);
            offsets.push(stream.offset);
        }
        flush(first, &mut buffers, &mut offsets);
    }
}
