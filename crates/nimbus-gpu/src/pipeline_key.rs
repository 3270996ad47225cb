//! Deterministic pipeline cache keys plus a key-indexed pipeline cache.
//!
//! The render key is an order-sensitive string serialization of the
//! descriptor fields that affect compiled pipeline identity. The field list
//! is closed: pipeline-overridable constants and stencil read/write masks are
//! deliberately excluded, so two descriptors differing only in those fields
//! collide under any cache built on this key. That trade-off is intentional
//! and callers relying on constants must bypass the cache.
//!
//! Keys are stable within a process run only; they are not an on-disk format.

use std::collections::HashMap;

use crate::device::Device;
use crate::error::Result;
use crate::pipeline::{ComputePipeline, ComputePipelineDesc, RenderPipeline, RenderPipelineDesc};
use crate::types::{FrontFace, PrimitiveTopology};

const SEP: &str = "|";

/// Builds the cache key for a render pipeline descriptor.
///
/// Serialization order: vertex stage (entry point, buffer layouts,
/// attributes), fragment stage (entry point, non-null color targets with
/// their slot index and color-channel blend), primitive state with WebGPU
/// defaults applied, depth-stencil (format, compare, depth-write), sample
/// count.
pub fn render_pipeline_key(desc: &RenderPipelineDesc) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push(desc.vertex.entry_point.clone());
    for layout in &desc.vertex.buffers {
        parts.push(layout.array_stride.to_string());
        parts.push(layout.step_mode.name().to_string());
        for attribute in &layout.attributes {
            parts.push(attribute.shader_location.to_string());
            parts.push(attribute.format.name().to_string());
            parts.push(attribute.offset.to_string());
        }
    }

    if let Some(fragment) = &desc.fragment {
        parts.push(fragment.entry_point.clone());
        for (index, target) in fragment.targets.iter().enumerate() {
            let Some(target) = target else {
                continue;
            };
            parts.push(index.to_string());
            parts.push(target.format.name().to_string());
            parts.push(target.write_mask.bits().to_string());
            if let Some(blend) = &target.blend {
                parts.push(blend.color.src_factor.name().to_string());
                parts.push(blend.color.dst_factor.name().to_string());
                parts.push(blend.color.operation.name().to_string());
            }
        }
    }

    parts.push(
        desc.primitive
            .topology
            .unwrap_or(PrimitiveTopology::TriangleList)
            .name()
            .to_string(),
    );
    parts.push(
        desc.primitive
            .cull_mode
            .map(|mode| mode.name())
            .unwrap_or("none")
            .to_string(),
    );
    parts.push(
        desc.primitive
            .front_face
            .unwrap_or(FrontFace::Ccw)
            .name()
            .to_string(),
    );

    if let Some(depth_stencil) = &desc.depth_stencil {
        parts.push(depth_stencil.format.name().to_string());
        parts.push(depth_stencil.depth_compare.name().to_string());
        parts.push(depth_stencil.depth_write_enabled.to_string());
    }

    parts.push(desc.multisample.count.to_string());

    parts.join(SEP)
}

/// Compute pipelines have no fixed-function state; the key is the entry point
/// plus the shader module identity.
pub fn compute_pipeline_key(desc: &ComputePipelineDesc) -> String {
    format!("{}{SEP}{}", desc.entry_point, desc.module.id.index())
}

/// Hit/miss counters for [`PipelineCache`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub render_pipeline_hits: u64,
    pub render_pipeline_misses: u64,
    pub compute_pipeline_hits: u64,
    pub compute_pipeline_misses: u64,
}

/// Deduplicates pipeline compilation by cache key.
///
/// Two descriptors producing the same key are treated as interchangeable;
/// the second request returns the pipeline compiled for the first.
#[derive(Default)]
pub struct PipelineCache {
    render: HashMap<String, RenderPipeline>,
    compute: HashMap<String, ComputePipeline>,
    stats: CacheStats,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn get_or_create_render_pipeline(
        &mut self,
        device: &Device,
        desc: &RenderPipelineDesc,
    ) -> Result<RenderPipeline> {
        let key = render_pipeline_key(desc);
        if let Some(pipeline) = self.render.get(&key) {
            self.stats.render_pipeline_hits += 1;
            return Ok(pipeline.clone());
        }
        let pipeline = device.create_render_pipeline(desc)?;
        self.stats.render_pipeline_misses += 1;
        self.render.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    pub fn get_or_create_compute_pipeline(
        &mut self,
        device: &Device,
        desc: &ComputePipelineDesc,
    ) -> Result<ComputePipeline> {
        let key = compute_pipeline_key(desc);
        if let Some(pipeline) = self.compute.get(&key) {
            self.stats.compute_pipeline_hits += 1;
            return Ok(pipeline.clone());
        }
        let pipeline = device.create_compute_pipeline(desc)?;
        self.stats.compute_pipeline_misses += 1;
        self.compute.insert(key, pipeline.clone());
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftBackend;
    use crate::pipeline::{
        BindGroupLayoutDesc, BlendState, ColorTargetState, DepthStencilState, FragmentState,
        PipelineLayoutDesc, PipelineLayoutKind, PrimitiveState, VertexAttribute,
        VertexBufferLayout, VertexState,
    };
    use crate::types::{
        ColorWrites, CompareFunction, CullMode, FrontFace, PrimitiveTopology, TextureFormat,
        VertexFormat, VertexStepMode,
    };
    use crate::MultisampleState;
    use std::collections::HashSet;

    fn test_device() -> Device {
        Device::with_backend(SoftBackend::new())
    }

    fn base_desc(device: &Device) -> RenderPipelineDesc {
        let module = device
            .create_shader_module(&crate::ShaderModuleDesc {
                label: None,
                source: "fn vs_main() {} fn fs_main() {}".into(),
            })
            .unwrap();
        RenderPipelineDesc {
            label: None,
            layout: PipelineLayoutKind::Auto,
            vertex: VertexState {
                module: module.clone(),
                entry_point: "vs_main".into(),
                constants: Vec::new(),
                buffers: vec![VertexBufferLayout {
                    array_stride: 16,
                    step_mode: VertexStepMode::Vertex,
                    attributes: vec![VertexAttribute {
                        format: VertexFormat::Float32x4,
                        offset: 0,
                        shader_location: 0,
                    }],
                }],
            },
            fragment: Some(FragmentState {
                module,
                entry_point: "fs_main".into(),
                constants: Vec::new(),
                targets: vec![Some(ColorTargetState {
                    format: TextureFormat::Rgba8Unorm,
                    blend: Some(BlendState::ALPHA_BLENDING),
                    write_mask: ColorWrites::default(),
                })],
            }),
            primitive: PrimitiveState::default(),
            depth_stencil: Some(DepthStencilState {
                format: TextureFormat::Depth24Plus,
                depth_write_enabled: true,
                depth_compare: CompareFunction::LessEqual,
                stencil_read_mask: !0,
                stencil_write_mask: !0,
            }),
            multisample: MultisampleState::default(),
        }
    }

    #[test]
    fn identical_descriptors_share_a_key() {
        let device = test_device();
        let a = base_desc(&device);
        let b = a.clone();
        assert_eq!(render_pipeline_key(&a), render_pipeline_key(&b));
    }

    #[test]
    fn constants_are_not_part_of_the_key() {
        let device = test_device();
        let a = base_desc(&device);
        let mut b = a.clone();
        b.vertex.constants = vec![("scale".into(), 2.0)];
        if let Some(fragment) = &mut b.fragment {
            fragment.constants = vec![("gamma".into(), 2.2)];
        }
        assert_eq!(render_pipeline_key(&a), render_pipeline_key(&b));
    }

    #[test]
    fn stencil_masks_are_not_part_of_the_key() {
        let device = test_device();
        let a = base_desc(&device);
        let mut b = a.clone();
        if let Some(ds) = &mut b.depth_stencil {
            ds.stencil_read_mask = 0x0f;
            ds.stencil_write_mask = 0xf0;
        }
        assert_eq!(render_pipeline_key(&a), render_pipeline_key(&b));
    }

    #[test]
    fn layout_kind_is_not_part_of_the_key() {
        let device = test_device();
        let a = base_desc(&device);
        let mut b = a.clone();
        let bgl = device
            .create_bind_group_layout(&BindGroupLayoutDesc::default())
            .unwrap();
        let layout = device
            .create_pipeline_layout(&PipelineLayoutDesc {
                label: None,
                bind_group_layouts: vec![bgl],
            })
            .unwrap();
        b.layout = PipelineLayoutKind::Explicit(layout);
        assert_eq!(render_pipeline_key(&a), render_pipeline_key(&b));
    }

    #[test]
    fn unset_primitive_fields_key_like_explicit_defaults() {
        let device = test_device();
        let a = base_desc(&device);
        let mut b = a.clone();
        b.primitive = PrimitiveState {
            topology: Some(PrimitiveTopology::TriangleList),
            cull_mode: None,
            front_face: Some(FrontFace::Ccw),
        };
        assert_eq!(render_pipeline_key(&a), render_pipeline_key(&b));
    }

    #[test]
    fn null_target_slots_shift_the_key() {
        let device = test_device();
        let a = base_desc(&device);
        let mut b = a.clone();
        if let Some(fragment) = &mut b.fragment {
            let target = fragment.targets[0].take();
            fragment.targets = vec![None, target];
        }
        assert_ne!(render_pipeline_key(&a), render_pipeline_key(&b));
    }

    #[test]
    fn every_keyed_field_changes_the_key() {
        let device = test_device();
        let base = base_desc(&device);

        let mut variants: Vec<RenderPipelineDesc> = vec![base.clone()];
        {
            let mut d = base.clone();
            d.vertex.entry_point = "vs_other".into();
            variants.push(d);
        }
        {
            let mut d = base.clone();
            d.vertex.buffers[0].array_stride = 32;
            variants.push(d);
        }
        {
            let mut d = base.clone();
            d.vertex.buffers[0].step_mode = VertexStepMode::Instance;
            variants.push(d);
        }
        {
            let mut d = base.clone();
            d.vertex.buffers[0].attributes[0].format = VertexFormat::Float32x2;
            variants.push(d);
        }
        {
            let mut d = base.clone();
            d.vertex.buffers[0].attributes[0].offset = 4;
            variants.push(d);
        }
        {
            let mut d = base.clone();
            d.vertex.buffers[0].attributes[0].shader_location = 3;
            variants.push(d);
        }
        {
            let mut d = base.clone();
            if let Some(f) = &mut d.fragment {
                f.entry_point = "fs_other".into();
            }
            variants.push(d);
        }
        {
            let mut d = base.clone();
            if let Some(f) = &mut d.fragment {
                if let Some(t) = &mut f.targets[0] {
                    t.format = TextureFormat::Rgba16Float;
                }
            }
            variants.push(d);
        }
        {
            let mut d = base.clone();
            if let Some(f) = &mut d.fragment {
                if let Some(t) = &mut f.targets[0] {
                    t.write_mask = ColorWrites::RED;
                }
            }
            variants.push(d);
        }
        {
            let mut d = base.clone();
            if let Some(f) = &mut d.fragment {
                if let Some(t) = &mut f.targets[0] {
                    t.blend = None;
                }
            }
            variants.push(d);
        }
        {
            let mut d = base.clone();
            d.primitive.topology = Some(PrimitiveTopology::LineList);
            variants.push(d);
        }
        {
            let mut d = base.clone();
            d.primitive.cull_mode = Some(CullMode::Back);
            variants.push(d);
        }
        {
            let mut d = base.clone();
            d.primitive.front_face = Some(FrontFace::Cw);
            variants.push(d);
        }
        {
            let mut d = base.clone();
            if let Some(ds) = &mut d.depth_stencil {
                ds.depth_compare = CompareFunction::Greater;
            }
            variants.push(d);
        }
        {
            let mut d = base.clone();
            if let Some(ds) = &mut d.depth_stencil {
                ds.depth_write_enabled = false;
            }
            variants.push(d);
        }
        {
            let mut d = base.clone();
            d.depth_stencil = None;
            variants.push(d);
        }
        {
            let mut d = base.clone();
            d.multisample.count = 4;
            variants.push(d);
        }

        let keys: HashSet<String> = variants.iter().map(render_pipeline_key).collect();
        assert_eq!(keys.len(), variants.len(), "two keyed variants collided");
    }

    #[test]
    fn cache_deduplicates_by_key() {
        let device = test_device();
        let mut cache = PipelineCache::new();
        let desc = base_desc(&device);

        cache.get_or_create_render_pipeline(&device, &desc).unwrap();
        // Constants differ but the key does not; this must hit.
        let mut aliased = desc.clone();
        aliased.vertex.constants = vec![("scale".into(), 0.5)];
        cache
            .get_or_create_render_pipeline(&device, &aliased)
            .unwrap();
        let mut other = desc.clone();
        other.multisample.count = 4;
        cache
            .get_or_create_render_pipeline(&device, &other)
            .unwrap();

        let stats = cache.stats();
        assert_eq!(stats.render_pipeline_hits, 1);
        assert_eq!(stats.render_pipeline_misses, 2);
    }
}
