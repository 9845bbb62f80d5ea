//! Serializable description of a graphics pipeline, and the pipeline cache file format.
//!
//! All values are little-endian. Arrays are prefixed with their length as `i32`.
//!
//! ```text
//! i32 version
//! i32 size of GfxPipelineEntry
//! array<GfxPipelineEntry>
//! array<u8> native pipeline cache blob
//! ```

use std::ffi::c_char;
use std::io::{Read, Write};
use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{Device, Error};
use crate::pipeline::cache::{PipelineCacheKey, PipelineDrawState};
use crate::pipeline::key::PipelineStateKey;
use crate::pipeline::pipeline_layout::PipelineLayout;
use crate::pipeline::set_layout::DescriptorBinding;
use crate::pipeline::shader::{BoundShaderState, NUM_SHADER_STAGES, ShaderModule, ShaderStage, VertexAttribute, VertexBinding};
use crate::pipeline::state::{BlendAttachment, StencilOpDesc};
use crate::render_pass::{AttachmentDesc, AttachmentRef, RenderPass, RenderTargetLayout};

/// Bump whenever the layout of [`GfxPipelineEntry`] or its encoding changes.
pub const PIPELINE_CACHE_VERSION: i32 = 3;

/// Arrays larger than this are read without reserving memory up front.
const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

const SHADER_ENTRY_POINT: &[u8] = b"main\0";

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RasterizerRecord {
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub depth_bias_slope: f32,
    pub depth_bias_constant: f32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StencilRecord {
    pub op: StencilOpDesc,
    pub reference: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DepthStencilRecord {
    pub depth_compare: vk::CompareOp,
    pub depth_test: bool,
    pub depth_write: bool,
    pub stencil_test: bool,
    pub front: StencilRecord,
    pub back: StencilRecord,
}

/// Everything needed to recreate a graphics pipeline from scratch, without any native handles.
#[derive(Debug, Clone, PartialEq)]
pub struct GfxPipelineEntry {
    pub graphics_key: PipelineStateKey,
    pub vertex_input_key: u32,
    pub rasterization_samples: u32,
    pub topology: u32,
    pub color_attachment_states: Vec<BlendAttachment>,
    pub descriptor_set_layout_bindings: Vec<Vec<DescriptorBinding>>,
    pub vertex_bindings: Vec<VertexBinding>,
    pub vertex_attributes: Vec<VertexAttribute>,
    pub rasterizer: RasterizerRecord,
    pub depth_stencil: DepthStencilRecord,
    pub shader_microcode: [Vec<u8>; NUM_SHADER_STAGES],
    pub shader_hashes: [u64; NUM_SHADER_STAGES],
    pub render_targets: RenderTargetLayout,
}

/// Native objects a pipeline was created with. Lives as long as the pipeline and is never serialized.
#[derive(Debug, Clone)]
pub struct EntryRuntime {
    pub layout: Arc<PipelineLayout>,
    pub render_pass: Arc<RenderPass>,
    pub shaders: Vec<Arc<ShaderModule>>,
}

impl EntryRuntime {
    /// Share the objects of the state that is being drawn with.
    pub fn from_draw(draw: &PipelineDrawState, shaders: &BoundShaderState) -> Self {
        Self {
            layout: shaders.layout().clone(),
            render_pass: draw.render_pass.clone(),
            shaders: shaders.shaders().cloned().collect(),
        }
    }

    /// Recreate every object from its serialized description.
    pub fn create(device: &Device, entry: &GfxPipelineEntry) -> Result<Self> {
        let layout = Arc::new(PipelineLayout::new(device.clone(), &entry.descriptor_set_layout_bindings)?);
        let render_pass = Arc::new(RenderPass::new(device.clone(), &entry.render_targets)?);
        let mut shaders = Vec::new();
        for stage in ShaderStage::ALL {
            let code = &entry.shader_microcode[stage.index()];
            if code.is_empty() {
                continue;
            }
            let name = format!("{stage:?}_{:016x}", entry.shader_hashes[stage.index()]);
            shaders.push(Arc::new(ShaderModule::from_spirv(device.clone(), stage, name, code)?));
        }
        Ok(Self {
            layout,
            render_pass,
            shaders,
        })
    }

    pub fn shader_names(&self) -> Vec<&str> {
        self.shaders.iter().map(|shader| shader.name()).collect()
    }
}

impl GfxPipelineEntry {
    /// Capture the pipeline relevant parts of the current draw state.
    pub fn populate(key: PipelineCacheKey, draw: &PipelineDrawState, shaders: &BoundShaderState) -> Self {
        let layout = draw.render_pass.layout();
        let num_color = layout.num_color_attachments() as usize;
        let desc = draw.depth_stencil.desc();
        let mut shader_microcode: [Vec<u8>; NUM_SHADER_STAGES] = Default::default();
        for stage in ShaderStage::ALL {
            if let Some(shader) = shaders.shader(stage) {
                shader_microcode[stage.index()] = shader.code().to_vec();
            }
        }
        Self {
            graphics_key: key.graphics,
            vertex_input_key: key.vertex_input,
            rasterization_samples: layout.samples().as_raw(),
            topology: draw.topology.as_raw() as u32,
            color_attachment_states: draw.blend.attachments()[..num_color].to_vec(),
            descriptor_set_layout_bindings: shaders.layout().set_bindings(),
            vertex_bindings: shaders.vertex_input().bindings().to_vec(),
            vertex_attributes: shaders.vertex_input().attributes().to_vec(),
            rasterizer: RasterizerRecord {
                polygon_mode: draw.rasterizer.fill_mode.to_vk(),
                cull_mode: draw.rasterizer.cull_mode,
                depth_bias_slope: draw.rasterizer.slope_scale_depth_bias,
                depth_bias_constant: draw.rasterizer.depth_bias,
            },
            depth_stencil: DepthStencilRecord {
                depth_compare: desc.depth_compare,
                depth_test: desc.depth_test,
                depth_write: desc.depth_write,
                stencil_test: desc.stencil_test,
                front: StencilRecord {
                    op: desc.front,
                    reference: draw.stencil_ref,
                },
                back: StencilRecord {
                    op: desc.back,
                    reference: draw.stencil_ref,
                },
            },
            shader_microcode,
            shader_hashes: key.shader_hashes,
            render_targets: layout.clone(),
        }
    }

    /// The cache key this entry was created for.
    pub fn key(&self) -> PipelineCacheKey {
        PipelineCacheKey {
            graphics: self.graphics_key,
            vertex_input: self.vertex_input_key,
            shader_hashes: self.shader_hashes,
        }
    }

    /// Build the native create info and create the pipeline.
    pub(crate) fn create_pipeline(&self, device: &Device, cache: vk::PipelineCache, runtime: &EntryRuntime) -> Result<vk::Pipeline> {
        let stages = runtime
            .shaders
            .iter()
            .map(|shader| vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                p_next: std::ptr::null(),
                flags: Default::default(),
                stage: shader.stage().to_vk(),
                module: unsafe { shader.handle() },
                p_name: SHADER_ENTRY_POINT.as_ptr() as *const c_char,
                p_specialization_info: std::ptr::null(),
            })
            .collect::<Vec<_>>();
        let has_tessellation = runtime
            .shaders
            .iter()
            .any(|shader| shader.stage() == ShaderStage::Hull);

        let bindings = self
            .vertex_bindings
            .iter()
            .map(|binding| binding.to_vk())
            .collect::<Vec<_>>();
        let attributes = self
            .vertex_attributes
            .iter()
            .map(|attribute| attribute.to_vk())
            .collect::<Vec<_>>();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: Default::default(),
            vertex_binding_description_count: bindings.len() as u32,
            p_vertex_binding_descriptions: bindings.as_ptr(),
            vertex_attribute_description_count: attributes.len() as u32,
            p_vertex_attribute_descriptions: attributes.as_ptr(),
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: Default::default(),
            topology: vk::PrimitiveTopology::from_raw(self.topology as i32),
            primitive_restart_enable: vk::FALSE,
        };
        let tessellation = vk::PipelineTessellationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_TESSELLATION_STATE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: Default::default(),
            patch_control_points: 3,
        };
        // Viewport and scissor are dynamic, only the counts matter.
        let viewport = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: Default::default(),
            viewport_count: 1,
            p_viewports: std::ptr::null(),
            scissor_count: 1,
            p_scissors: std::ptr::null(),
        };
        let rasterizer = &self.rasterizer;
        let rasterization = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: Default::default(),
            depth_clamp_enable: vk::FALSE,
            rasterizer_discard_enable: vk::FALSE,
            polygon_mode: rasterizer.polygon_mode,
            cull_mode: rasterizer.cull_mode,
            front_face: vk::FrontFace::CLOCKWISE,
            depth_bias_enable: (rasterizer.depth_bias_constant != 0.0 || rasterizer.depth_bias_slope != 0.0) as vk::Bool32,
            depth_bias_constant_factor: rasterizer.depth_bias_constant,
            depth_bias_clamp: 0.0,
            depth_bias_slope_factor: rasterizer.depth_bias_slope,
            line_width: 1.0,
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: Default::default(),
            rasterization_samples: vk::SampleCountFlags::from_raw(self.rasterization_samples),
            sample_shading_enable: vk::FALSE,
            min_sample_shading: 0.0,
            p_sample_mask: std::ptr::null(),
            alpha_to_coverage_enable: vk::FALSE,
            alpha_to_one_enable: vk::FALSE,
        };
        let ds = &self.depth_stencil;
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: Default::default(),
            depth_test_enable: ds.depth_test as vk::Bool32,
            depth_write_enable: ds.depth_write as vk::Bool32,
            depth_compare_op: ds.depth_compare,
            depth_bounds_test_enable: vk::FALSE,
            stencil_test_enable: ds.stencil_test as vk::Bool32,
            front: ds.front.op.to_vk(ds.front.reference),
            back: ds.back.op.to_vk(ds.back.reference),
            min_depth_bounds: 0.0,
            max_depth_bounds: 1.0,
        };
        let blend_attachments = self
            .color_attachment_states
            .iter()
            .map(|attachment| attachment.to_vk())
            .collect::<Vec<_>>();
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: Default::default(),
            logic_op_enable: vk::FALSE,
            logic_op: vk::LogicOp::CLEAR,
            attachment_count: blend_attachments.len() as u32,
            p_attachments: blend_attachments.as_ptr(),
            blend_constants: [0.0; 4],
        };
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR, vk::DynamicState::STENCIL_REFERENCE];
        let dynamic = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: Default::default(),
            dynamic_state_count: dynamic_states.len() as u32,
            p_dynamic_states: dynamic_states.as_ptr(),
        };

        let info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: Default::default(),
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_tessellation_state: if has_tessellation {
                &tessellation
            } else {
                std::ptr::null()
            },
            p_viewport_state: &viewport,
            p_rasterization_state: &rasterization,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic,
            layout: unsafe { runtime.layout.handle() },
            render_pass: unsafe { runtime.render_pass.handle() },
            subpass: 0,
            base_pipeline_handle: vk::Pipeline::null(),
            base_pipeline_index: -1,
        };
        Ok(unsafe { device.create_graphics_pipeline(cache, &info)? })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let [key0, key1] = self.graphics_key.words();
        w.write_u64::<LittleEndian>(key0)?;
        w.write_u64::<LittleEndian>(key1)?;
        w.write_u32::<LittleEndian>(self.vertex_input_key)?;
        w.write_u32::<LittleEndian>(self.rasterization_samples)?;
        w.write_u32::<LittleEndian>(self.topology)?;
        write_array(w, &self.color_attachment_states, write_blend_attachment)?;
        write_array(w, &self.descriptor_set_layout_bindings, |w, set| write_array(w, set, write_descriptor_binding))?;
        write_array(w, &self.vertex_bindings, |w, binding| {
            w.write_u32::<LittleEndian>(binding.stride)?;
            w.write_u32::<LittleEndian>(binding.binding)?;
            w.write_u16::<LittleEndian>(binding.input_rate.as_raw() as u16)?;
            Ok(())
        })?;
        write_array(w, &self.vertex_attributes, |w, attribute| {
            w.write_u32::<LittleEndian>(attribute.location)?;
            w.write_u32::<LittleEndian>(attribute.binding)?;
            w.write_u32::<LittleEndian>(attribute.format.as_raw() as u32)?;
            w.write_u32::<LittleEndian>(attribute.offset)?;
            Ok(())
        })?;

        w.write_u32::<LittleEndian>(self.rasterizer.polygon_mode.as_raw() as u32)?;
        w.write_u32::<LittleEndian>(self.rasterizer.cull_mode.as_raw())?;
        w.write_f32::<LittleEndian>(self.rasterizer.depth_bias_slope)?;
        w.write_f32::<LittleEndian>(self.rasterizer.depth_bias_constant)?;

        let ds = &self.depth_stencil;
        w.write_u8(ds.depth_compare.as_raw() as u8)?;
        w.write_u8(ds.depth_test as u8)?;
        w.write_u8(ds.depth_write as u8)?;
        w.write_u8(ds.stencil_test as u8)?;
        write_stencil(w, &ds.front)?;
        write_stencil(w, &ds.back)?;

        for (code, hash) in self.shader_microcode.iter().zip(self.shader_hashes.iter()) {
            write_bytes(w, code)?;
            w.write_u64::<LittleEndian>(*hash)?;
        }

        write_render_targets(w, &self.render_targets)
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let key0 = r.read_u64::<LittleEndian>()?;
        let key1 = r.read_u64::<LittleEndian>()?;
        let vertex_input_key = r.read_u32::<LittleEndian>()?;
        let rasterization_samples = r.read_u32::<LittleEndian>()?;
        let topology = r.read_u32::<LittleEndian>()?;
        let color_attachment_states = read_array(r, read_blend_attachment)?;
        let descriptor_set_layout_bindings = read_array(r, |r| read_array(r, read_descriptor_binding))?;
        let vertex_bindings = read_array(r, |r| {
            Ok(VertexBinding {
                stride: r.read_u32::<LittleEndian>()?,
                binding: r.read_u32::<LittleEndian>()?,
                input_rate: vk::VertexInputRate::from_raw(r.read_u16::<LittleEndian>()? as i32),
            })
        })?;
        let vertex_attributes = read_array(r, |r| {
            Ok(VertexAttribute {
                location: r.read_u32::<LittleEndian>()?,
                binding: r.read_u32::<LittleEndian>()?,
                format: vk::Format::from_raw(r.read_u32::<LittleEndian>()? as i32),
                offset: r.read_u32::<LittleEndian>()?,
            })
        })?;

        let rasterizer = RasterizerRecord {
            polygon_mode: vk::PolygonMode::from_raw(r.read_u32::<LittleEndian>()? as i32),
            cull_mode: vk::CullModeFlags::from_raw(r.read_u32::<LittleEndian>()?),
            depth_bias_slope: r.read_f32::<LittleEndian>()?,
            depth_bias_constant: r.read_f32::<LittleEndian>()?,
        };

        let depth_compare = vk::CompareOp::from_raw(r.read_u8()? as i32);
        let depth_test = r.read_u8()? != 0;
        let depth_write = r.read_u8()? != 0;
        let stencil_test = r.read_u8()? != 0;
        let front = read_stencil(r)?;
        let back = read_stencil(r)?;
        let depth_stencil = DepthStencilRecord {
            depth_compare,
            depth_test,
            depth_write,
            stencil_test,
            front,
            back,
        };

        let mut shader_microcode: [Vec<u8>; NUM_SHADER_STAGES] = Default::default();
        let mut shader_hashes = [0; NUM_SHADER_STAGES];
        for (code, hash) in shader_microcode.iter_mut().zip(shader_hashes.iter_mut()) {
            *code = read_bytes(r)?;
            *hash = r.read_u64::<LittleEndian>()?;
        }

        let render_targets = read_render_targets(r)?;

        Ok(Self {
            graphics_key: PipelineStateKey::from_words([key0, key1]),
            vertex_input_key,
            rasterization_samples,
            topology,
            color_attachment_states,
            descriptor_set_layout_bindings,
            vertex_bindings,
            vertex_attributes,
            rasterizer,
            depth_stencil,
            shader_microcode,
            shader_hashes,
            render_targets,
        })
    }
}

/// Contents of a pipeline cache file.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheFile {
    pub version: i32,
    pub entry_size: i32,
    pub entries: Vec<GfxPipelineEntry>,
    pub native_blob: Vec<u8>,
}

/// Size fingerprint written next to the version, catches layout changes that forgot to bump the version.
pub fn entry_size() -> i32 {
    std::mem::size_of::<GfxPipelineEntry>() as i32
}

impl CacheFile {
    pub fn new(entries: Vec<GfxPipelineEntry>, native_blob: Vec<u8>) -> Self {
        Self {
            version: PIPELINE_CACHE_VERSION,
            entry_size: entry_size(),
            entries,
            native_blob,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let entries = self.entries.iter().collect::<Vec<_>>();
        write_cache_file(w, self.version, self.entry_size, &entries, &self.native_blob)
    }

    /// Decode a cache file.
    /// # Errors
    /// Fails with [`Error::CorruptCacheFile`] on a version or entry size mismatch, and with an I/O error if the
    /// stream ends early.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let version = r.read_i32::<LittleEndian>()?;
        if version != PIPELINE_CACHE_VERSION {
            return Err(Error::CorruptCacheFile("version mismatch").into());
        }
        let entry_size = r.read_i32::<LittleEndian>()?;
        if entry_size != self::entry_size() {
            return Err(Error::CorruptCacheFile("entry size mismatch").into());
        }
        let entries = read_array(r, GfxPipelineEntry::read_from)?;
        let native_blob = read_bytes(r)?;
        Ok(Self {
            version,
            entry_size,
            entries,
            native_blob,
        })
    }
}

pub(crate) fn write_cache_file<W: Write>(
    w: &mut W,
    version: i32,
    entry_size: i32,
    entries: &[&GfxPipelineEntry],
    native_blob: &[u8],
) -> Result<()> {
    w.write_i32::<LittleEndian>(version)?;
    w.write_i32::<LittleEndian>(entry_size)?;
    write_array(w, entries, |w, entry| entry.write_to(w))?;
    write_bytes(w, native_blob)
}

fn write_array<W: Write, T>(w: &mut W, items: &[T], mut write: impl FnMut(&mut W, &T) -> Result<()>) -> Result<()> {
    let count = i32::try_from(items.len()).map_err(|_| Error::CorruptCacheFile("array too large"))?;
    w.write_i32::<LittleEndian>(count)?;
    for item in items {
        write(w, item)?;
    }
    Ok(())
}

fn read_count<R: Read>(r: &mut R) -> Result<usize> {
    let count = r.read_i32::<LittleEndian>()?;
    usize::try_from(count).map_err(|_| Error::CorruptCacheFile("negative array length").into())
}

fn read_array<R: Read, T>(r: &mut R, mut read: impl FnMut(&mut R) -> Result<T>) -> Result<Vec<T>> {
    let count = read_count(r)?;
    let mut items = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
    for _ in 0..count {
        items.push(read(r)?);
    }
    Ok(items)
}

fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> Result<()> {
    let count = i32::try_from(bytes.len()).map_err(|_| Error::CorruptCacheFile("byte array too large"))?;
    w.write_i32::<LittleEndian>(count)?;
    w.write_all(bytes)?;
    Ok(())
}

fn read_bytes<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let count = read_count(r)?;
    let mut bytes = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
    r.by_ref().take(count as u64).read_to_end(&mut bytes)?;
    if bytes.len() != count {
        return Err(Error::CorruptCacheFile("truncated byte array").into());
    }
    Ok(bytes)
}

fn write_blend_attachment<W: Write>(w: &mut W, attachment: &BlendAttachment) -> Result<()> {
    w.write_u8(attachment.blend_enable as u8)?;
    w.write_u8(attachment.color_op.as_raw() as u8)?;
    w.write_u8(attachment.src_color.as_raw() as u8)?;
    w.write_u8(attachment.dst_color.as_raw() as u8)?;
    w.write_u8(attachment.alpha_op.as_raw() as u8)?;
    w.write_u8(attachment.src_alpha.as_raw() as u8)?;
    w.write_u8(attachment.dst_alpha.as_raw() as u8)?;
    w.write_u8(attachment.write_mask.as_raw() as u8)?;
    Ok(())
}

fn read_blend_attachment<R: Read>(r: &mut R) -> Result<BlendAttachment> {
    Ok(BlendAttachment {
        blend_enable: r.read_u8()? != 0,
        color_op: vk::BlendOp::from_raw(r.read_u8()? as i32),
        src_color: vk::BlendFactor::from_raw(r.read_u8()? as i32),
        dst_color: vk::BlendFactor::from_raw(r.read_u8()? as i32),
        alpha_op: vk::BlendOp::from_raw(r.read_u8()? as i32),
        src_alpha: vk::BlendFactor::from_raw(r.read_u8()? as i32),
        dst_alpha: vk::BlendFactor::from_raw(r.read_u8()? as i32),
        write_mask: vk::ColorComponentFlags::from_raw(r.read_u8()? as u32),
    })
}

fn write_descriptor_binding<W: Write>(w: &mut W, binding: &DescriptorBinding) -> Result<()> {
    w.write_u32::<LittleEndian>(binding.binding)?;
    w.write_u32::<LittleEndian>(binding.count)?;
    w.write_u32::<LittleEndian>(binding.ty.as_raw() as u32)?;
    w.write_u32::<LittleEndian>(binding.stages.as_raw())?;
    Ok(())
}

fn read_descriptor_binding<R: Read>(r: &mut R) -> Result<DescriptorBinding> {
    Ok(DescriptorBinding {
        binding: r.read_u32::<LittleEndian>()?,
        count: r.read_u32::<LittleEndian>()?,
        ty: vk::DescriptorType::from_raw(r.read_u32::<LittleEndian>()? as i32),
        stages: vk::ShaderStageFlags::from_raw(r.read_u32::<LittleEndian>()?),
    })
}

fn write_stencil<W: Write>(w: &mut W, stencil: &StencilRecord) -> Result<()> {
    w.write_u8(stencil.op.fail_op.as_raw() as u8)?;
    w.write_u8(stencil.op.pass_op.as_raw() as u8)?;
    w.write_u8(stencil.op.depth_fail_op.as_raw() as u8)?;
    w.write_u8(stencil.op.compare_op.as_raw() as u8)?;
    w.write_u32::<LittleEndian>(stencil.op.compare_mask)?;
    w.write_u32::<LittleEndian>(stencil.op.write_mask)?;
    w.write_u32::<LittleEndian>(stencil.reference)?;
    Ok(())
}

fn read_stencil<R: Read>(r: &mut R) -> Result<StencilRecord> {
    Ok(StencilRecord {
        op: StencilOpDesc {
            fail_op: vk::StencilOp::from_raw(r.read_u8()? as i32),
            pass_op: vk::StencilOp::from_raw(r.read_u8()? as i32),
            depth_fail_op: vk::StencilOp::from_raw(r.read_u8()? as i32),
            compare_op: vk::CompareOp::from_raw(r.read_u8()? as i32),
            compare_mask: r.read_u32::<LittleEndian>()?,
            write_mask: r.read_u32::<LittleEndian>()?,
        },
        reference: r.read_u32::<LittleEndian>()?,
    })
}

fn write_attachment_ref<W: Write>(w: &mut W, reference: &AttachmentRef) -> Result<()> {
    w.write_u32::<LittleEndian>(reference.attachment)?;
    w.write_u64::<LittleEndian>(reference.layout.as_raw() as u32 as u64)?;
    Ok(())
}

fn read_attachment_ref<R: Read>(r: &mut R) -> Result<AttachmentRef> {
    Ok(AttachmentRef {
        attachment: r.read_u32::<LittleEndian>()?,
        layout: vk::ImageLayout::from_raw(r.read_u64::<LittleEndian>()? as u32 as i32),
    })
}

fn write_attachment_desc<W: Write>(w: &mut W, desc: &AttachmentDesc) -> Result<()> {
    w.write_u32::<LittleEndian>(desc.format.as_raw() as u32)?;
    w.write_u8(desc.flags.as_raw() as u8)?;
    w.write_u8(desc.samples.as_raw() as u8)?;
    w.write_u8(desc.load_op.as_raw() as u8)?;
    w.write_u8(desc.store_op.as_raw() as u8)?;
    w.write_u8(desc.stencil_load_op.as_raw() as u8)?;
    w.write_u8(desc.stencil_store_op.as_raw() as u8)?;
    w.write_u64::<LittleEndian>(desc.initial_layout.as_raw() as u32 as u64)?;
    w.write_u64::<LittleEndian>(desc.final_layout.as_raw() as u32 as u64)?;
    Ok(())
}

fn read_attachment_desc<R: Read>(r: &mut R) -> Result<AttachmentDesc> {
    Ok(AttachmentDesc {
        format: vk::Format::from_raw(r.read_u32::<LittleEndian>()? as i32),
        flags: vk::AttachmentDescriptionFlags::from_raw(r.read_u8()? as u32),
        samples: vk::SampleCountFlags::from_raw(r.read_u8()? as u32),
        load_op: vk::AttachmentLoadOp::from_raw(r.read_u8()? as i32),
        store_op: vk::AttachmentStoreOp::from_raw(r.read_u8()? as i32),
        stencil_load_op: vk::AttachmentLoadOp::from_raw(r.read_u8()? as i32),
        stencil_store_op: vk::AttachmentStoreOp::from_raw(r.read_u8()? as i32),
        initial_layout: vk::ImageLayout::from_raw(r.read_u64::<LittleEndian>()? as u32 as i32),
        final_layout: vk::ImageLayout::from_raw(r.read_u64::<LittleEndian>()? as u32 as i32),
    })
}

fn write_render_targets<W: Write>(w: &mut W, layout: &RenderTargetLayout) -> Result<()> {
    w.write_u32::<LittleEndian>(layout.num_attachments)?;
    w.write_u32::<LittleEndian>(layout.num_color)?;
    write_array(w, &layout.color_refs, write_attachment_ref)?;
    write_array(w, &layout.resolve_refs, write_attachment_ref)?;
    write_attachment_ref(w, &layout.depth_stencil_ref)?;
    write_array(w, &layout.descriptions, write_attachment_desc)?;
    w.write_u8(layout.has_depth_stencil as u8)?;
    w.write_u8(layout.has_resolve as u8)?;
    w.write_u64::<LittleEndian>(layout.hash)?;
    w.write_u32::<LittleEndian>(layout.extent.width)?;
    w.write_u32::<LittleEndian>(layout.extent.height)?;
    w.write_u32::<LittleEndian>(layout.extent.depth)?;
    Ok(())
}

fn read_render_targets<R: Read>(r: &mut R) -> Result<RenderTargetLayout> {
    let num_attachments = r.read_u32::<LittleEndian>()?;
    let num_color = r.read_u32::<LittleEndian>()?;
    let color_refs = read_array(r, read_attachment_ref)?;
    let resolve_refs = read_array(r, read_attachment_ref)?;
    let depth_stencil_ref = read_attachment_ref(r)?;
    let descriptions = read_array(r, read_attachment_desc)?;
    let has_depth_stencil = r.read_u8()? != 0;
    let has_resolve = r.read_u8()? != 0;
    let hash = r.read_u64::<LittleEndian>()?;
    let extent = vk::Extent3D {
        width: r.read_u32::<LittleEndian>()?,
        height: r.read_u32::<LittleEndian>()?,
        depth: r.read_u32::<LittleEndian>()?,
    };
    let layout = RenderTargetLayout {
        num_attachments,
        num_color,
        color_refs,
        resolve_refs,
        depth_stencil_ref,
        descriptions,
        has_depth_stencil,
        has_resolve,
        hash,
        extent,
    };
    if layout.num_attachments as usize != layout.descriptions.len() || layout.num_color as usize != layout.color_refs.len() {
        return Err(Error::CorruptCacheFile("render target attachment counts disagree").into());
    }
    if layout.compute_hash() != hash {
        return Err(Error::CorruptCacheFile("render target layout hash mismatch").into());
    }
    Ok(layout)
}
