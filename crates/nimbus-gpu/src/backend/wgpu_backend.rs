//! `wgpu` pass-through backend.
//!
//! The native backend with an explicit command model of its own: recorded
//! streams are re-encoded 1:1 into `wgpu` passes at submit time, so there is
//! no implicit state to save or restore.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::backend::{BackendKind, ExecutionModel, GpuBackend, TextureWrite};
use crate::caps::Capabilities;
use crate::cmd::GpuCmd;
use crate::deferred::{self, Deferred};
use crate::error::{GfxError, Result};
use crate::pipeline::{
    BindGroupDesc, BindGroupLayoutDesc, BindingResource, BindingType, ComputePipelineDesc,
    PipelineLayoutKind, RenderPipelineDesc, ShaderModuleDesc,
};
use crate::registry::{
    BindGroupId, BindGroupLayoutId, BindGroupLayoutTag, BindGroupTag, BufferId, BufferTag,
    PipelineId, PipelineLayoutId, PipelineLayoutTag, PipelineTag, Registry, SamplerId, SamplerTag,
    ShaderModuleId, ShaderModuleTag, TextureId, TextureTag, TextureViewId, TextureViewTag,
};
use crate::resource::{BufferDesc, SamplerDesc, TextureDesc, TextureViewDesc};
use crate::types::{
    AddressMode, BlendFactor, BlendOperation, BufferUsages, Color, CompareFunction, CullMode,
    FilterMode, FrontFace, IndexFormat, LoadOp, PrimitiveTopology, ShaderStages, StoreOp,
    TextureDimension, TextureFormat, TextureUsages, VertexFormat, VertexStepMode,
};

enum Pipeline {
    Render {
        pipeline: wgpu::RenderPipeline,
        auto_layout: bool,
    },
    Compute {
        pipeline: wgpu::ComputePipeline,
        auto_layout: bool,
    },
}

#[derive(Debug)]
struct StoredTexture {
    texture: wgpu::Texture,
}

const PIPELINE_LAYOUT_CACHE_CAPACITY: usize = 128;

/// Native implementation of the backend trait on top of `wgpu`.
pub struct WgpuBackend {
    capabilities: Capabilities,
    device: wgpu::Device,
    queue: wgpu::Queue,

    buffers: Registry<BufferTag, wgpu::Buffer>,
    textures: Registry<TextureTag, StoredTexture>,
    texture_views: Registry<TextureViewTag, wgpu::TextureView>,
    samplers: Registry<SamplerTag, wgpu::Sampler>,
    shaders: Registry<ShaderModuleTag, wgpu::ShaderModule>,
    bind_group_layouts: Registry<BindGroupLayoutTag, wgpu::BindGroupLayout>,
    /// Explicit pipeline layouts are stored as their bind-group layout key;
    /// the `wgpu` object itself lives in the LRU below and is recreated on
    /// eviction.
    pipeline_layouts: Registry<PipelineLayoutTag, Vec<BindGroupLayoutId>>,
    bind_groups: Registry<BindGroupTag, wgpu::BindGroup>,
    pipelines: Registry<PipelineTag, Pipeline>,
    /// Layouts derived via `pipeline_auto_layout`, keyed per (pipeline, group).
    derived_layouts: HashMap<(u32, u32), BindGroupLayoutId>,

    /// Cache `wgpu::PipelineLayout` objects keyed by bind-group layout ids.
    /// Creating pipeline layouts shows up in profiles when pipelines are
    /// rebuilt frequently but share identical bind-group layouts.
    pipeline_layout_cache: LruCache<Vec<BindGroupLayoutId>, wgpu::PipelineLayout>,
}

impl WgpuBackend {
    /// Creates a backend without a presentation surface, for tests and
    /// offscreen rendering.
    pub async fn new_headless() -> Result<Self> {
        // On Linux, wgpu's GL path warns if XDG_RUNTIME_DIR is unset or has
        // loose permissions. Point it at a private per-process dir so
        // headless callers don't have to care.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let needs_runtime_dir = match std::env::var("XDG_RUNTIME_DIR") {
                Ok(dir) if !dir.is_empty() => match std::fs::metadata(&dir) {
                    Ok(meta) => !meta.is_dir() || (meta.permissions().mode() & 0o077) != 0,
                    Err(_) => true,
                },
                _ => true,
            };
            if needs_runtime_dir {
                let dir = std::env::temp_dir()
                    .join(format!("nimbus-gpu-xdg-runtime-{}", std::process::id()));
                let _ = std::fs::create_dir_all(&dir);
                let _ = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700));
                std::env::set_var("XDG_RUNTIME_DIR", &dir);
            }
        }

        // Prefer GL on Linux to avoid crashes seen with some Vulkan software
        // adapters (lavapipe/llvmpipe); fall back to the native backends.
        let adapter = if cfg!(target_os = "linux") {
            let gl_instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::GL,
                ..Default::default()
            });
            let adapter = gl_instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await;
            if adapter.is_some() {
                adapter
            } else {
                let primary_instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                    backends: wgpu::Backends::PRIMARY,
                    ..Default::default()
                });
                primary_instance
                    .request_adapter(&wgpu::RequestAdapterOptions {
                        power_preference: wgpu::PowerPreference::HighPerformance,
                        compatible_surface: None,
                        force_fallback_adapter: false,
                    })
                    .await
            }
        } else {
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::PRIMARY,
                ..Default::default()
            });
            instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
        }
        .ok_or_else(|| GfxError::Backend("no suitable wgpu adapter found".into()))?;

        let downlevel = adapter.get_downlevel_capabilities();
        let supports_compute = downlevel
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS);
        let supports_astc = adapter
            .features()
            .contains(wgpu::Features::TEXTURE_COMPRESSION_ASTC);

        let mut required_features = wgpu::Features::empty();
        if supports_astc {
            required_features |= wgpu::Features::TEXTURE_COMPRESSION_ASTC;
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("nimbus wgpu backend"),
                    required_features,
                    required_limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await
            .map_err(|err| GfxError::Backend(err.to_string()))?;

        let limits = device.limits();
        let mut supported_formats = vec![
            TextureFormat::R8Unorm,
            TextureFormat::Rg8Unorm,
            TextureFormat::Rgba8Unorm,
            TextureFormat::Bgra8Unorm,
            TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float,
            TextureFormat::Depth24Plus,
            TextureFormat::Depth32Float,
        ];
        if supports_astc {
            supported_formats.push(TextureFormat::Astc12x12Unorm);
        }
        let capabilities = Capabilities {
            supports_compute,
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
            max_bind_groups: limits.max_bind_groups,
            max_color_attachments: limits.max_color_attachments,
            supported_formats,
        };

        Ok(Self {
            capabilities,
            device,
            queue,
            buffers: Registry::new("buffer"),
            textures: Registry::new("texture"),
            texture_views: Registry::new("texture_view"),
            samplers: Registry::new("sampler"),
            shaders: Registry::new("shader_module"),
            bind_group_layouts: Registry::new("bind_group_layout"),
            pipeline_layouts: Registry::new("pipeline_layout"),
            bind_groups: Registry::new("bind_group"),
            pipelines: Registry::new("pipeline"),
            derived_layouts: HashMap::new(),
            pipeline_layout_cache: LruCache::new(
                NonZeroUsize::new(PIPELINE_LAYOUT_CACHE_CAPACITY)
                    .expect("PIPELINE_LAYOUT_CACHE_CAPACITY must be non-zero"),
            ),
        })
    }
}

impl WgpuBackend {
    fn map_buffer_usages(usages: BufferUsages) -> wgpu::BufferUsages {
        let mut out = wgpu::BufferUsages::empty();
        if usages.contains(BufferUsages::MAP_READ) {
            out |= wgpu::BufferUsages::MAP_READ;
        }
        if usages.contains(BufferUsages::MAP_WRITE) {
            out |= wgpu::BufferUsages::MAP_WRITE;
        }
        if usages.contains(BufferUsages::COPY_SRC) {
            out |= wgpu::BufferUsages::COPY_SRC;
        }
        if usages.contains(BufferUsages::COPY_DST) {
            out |= wgpu::BufferUsages::COPY_DST;
        }
        if usages.contains(BufferUsages::INDEX) {
            out |= wgpu::BufferUsages::INDEX;
        }
        if usages.contains(BufferUsages::VERTEX) {
            out |= wgpu::BufferUsages::VERTEX;
        }
        if usages.contains(BufferUsages::UNIFORM) {
            out |= wgpu::BufferUsages::UNIFORM;
        }
        if usages.contains(BufferUsages::STORAGE) {
            out |= wgpu::BufferUsages::STORAGE;
        }
        if usages.contains(BufferUsages::INDIRECT) {
            out |= wgpu::BufferUsages::INDIRECT;
        }
        out
    }

    fn map_texture_usages(usages: TextureUsages) -> wgpu::TextureUsages {
        let mut out = wgpu::TextureUsages::empty();
        if usages.contains(TextureUsages::COPY_SRC) {
            out |= wgpu::TextureUsages::COPY_SRC;
        }
        if usages.contains(TextureUsages::COPY_DST) {
            out |= wgpu::TextureUsages::COPY_DST;
        }
        if usages.contains(TextureUsages::TEXTURE_BINDING) {
            out |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usages.contains(TextureUsages::STORAGE_BINDING) {
            out |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        if usages.contains(TextureUsages::RENDER_ATTACHMENT) {
            out |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        out
    }

    fn map_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
            TextureFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::Depth24Plus => wgpu::TextureFormat::Depth24Plus,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            TextureFormat::Astc12x12Unorm => wgpu::TextureFormat::Astc {
                block: wgpu::AstcBlock::B12x12,
                channel: wgpu::AstcChannel::Unorm,
            },
        }
    }

    fn map_filter_mode(mode: FilterMode) -> wgpu::FilterMode {
        match mode {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        }
    }

    fn map_address_mode(mode: AddressMode) -> wgpu::AddressMode {
        match mode {
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
            AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
        }
    }

    fn map_compare(func: CompareFunction) -> wgpu::CompareFunction {
        match func {
            CompareFunction::Never => wgpu::CompareFunction::Never,
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::Equal => wgpu::CompareFunction::Equal,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Greater => wgpu::CompareFunction::Greater,
            CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
            CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }

    fn map_shader_stages(stages: ShaderStages) -> wgpu::ShaderStages {
        let mut out = wgpu::ShaderStages::empty();
        if stages.contains(ShaderStages::VERTEX) {
            out |= wgpu::ShaderStages::VERTEX;
        }
        if stages.contains(ShaderStages::FRAGMENT) {
            out |= wgpu::ShaderStages::FRAGMENT;
        }
        if stages.contains(ShaderStages::COMPUTE) {
            out |= wgpu::ShaderStages::COMPUTE;
        }
        out
    }

    fn map_binding_type(ty: &BindingType) -> wgpu::BindingType {
        match ty {
            BindingType::UniformBuffer { dynamic, min_size } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: *dynamic,
                min_binding_size: min_size.map(wgpu::BufferSize::new).flatten(),
            },
            BindingType::Sampler { comparison } => {
                if *comparison {
                    wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison)
                } else {
                    wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
                }
            }
            BindingType::Texture { filterable } => wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float {
                    filterable: *filterable,
                },
            },
        }
    }

    fn map_blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
        match factor {
            BlendFactor::Zero => wgpu::BlendFactor::Zero,
            BlendFactor::One => wgpu::BlendFactor::One,
            BlendFactor::Src => wgpu::BlendFactor::Src,
            BlendFactor::OneMinusSrc => wgpu::BlendFactor::OneMinusSrc,
            BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
            BlendFactor::Dst => wgpu::BlendFactor::Dst,
            BlendFactor::OneMinusDst => wgpu::BlendFactor::OneMinusDst,
            BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
            BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
        }
    }

    fn map_blend_operation(op: BlendOperation) -> wgpu::BlendOperation {
        match op {
            BlendOperation::Add => wgpu::BlendOperation::Add,
            BlendOperation::Subtract => wgpu::BlendOperation::Subtract,
            BlendOperation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
            BlendOperation::Min => wgpu::BlendOperation::Min,
            BlendOperation::Max => wgpu::BlendOperation::Max,
        }
    }

    fn map_primitive_topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
        match topology {
            PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
            PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
            PrimitiveTopology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
            PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
            PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        }
    }

    fn map_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
        match format {
            VertexFormat::Float32 => wgpu::VertexFormat::Float32,
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
            VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
            VertexFormat::Uint32 => wgpu::VertexFormat::Uint32,
            VertexFormat::Sint32 => wgpu::VertexFormat::Sint32,
            VertexFormat::Unorm8x4 => wgpu::VertexFormat::Unorm8x4,
        }
    }

    fn map_load_op_color(load: LoadOp<Color>) -> wgpu::LoadOp<wgpu::Color> {
        match load {
            LoadOp::Load => wgpu::LoadOp::Load,
            LoadOp::Clear(color) => wgpu::LoadOp::Clear(wgpu::Color {
                r: color.r,
                g: color.g,
                b: color.b,
                a: color.a,
            }),
        }
    }

    fn map_store_op(store: StoreOp) -> wgpu::StoreOp {
        match store {
            StoreOp::Store => wgpu::StoreOp::Store,
            StoreOp::Discard => wgpu::StoreOp::Discard,
        }
    }

    fn map_index_format(format: IndexFormat) -> wgpu::IndexFormat {
        match format {
            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
        }
    }

    /// Returns the cached `wgpu::PipelineLayout` for a layout key, rebuilding
    /// it if the LRU evicted it.
    fn pipeline_layout_for(
        &mut self,
        label: Option<&str>,
        key: &[BindGroupLayoutId],
    ) -> Result<()> {
        if self.pipeline_layout_cache.get(key).is_some() {
            return Ok(());
        }
        let bind_group_layouts: Vec<&wgpu::BindGroupLayout> = key
            .iter()
            .map(|id| self.bind_group_layouts.get(*id))
            .collect::<Result<_>>()?;
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                // Labels are only for debugging; cache hits may reuse a
                // layout created under a different label.
                label,
                bind_group_layouts: &bind_group_layouts,
                push_constant_ranges: &[],
            });
        self.pipeline_layout_cache.put(key.to_vec(), layout);
        Ok(())
    }

    fn encode_stream(&self, commands: &[GpuCmd]) -> Result<wgpu::CommandBuffer> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("nimbus-gpu command encoder"),
            });

        let mut i = 0usize;
        while i < commands.len() {
            match &commands[i] {
                GpuCmd::BeginRenderPass {
                    label,
                    color_attachments,
                    depth_stencil_attachment,
                } => {
                    let mut attachments = Vec::with_capacity(color_attachments.len());
                    for attachment in color_attachments {
                        let view = self.texture_views.get(attachment.view)?;
                        attachments.push(Some(wgpu::RenderPassColorAttachment {
                            view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: Self::map_load_op_color(attachment.ops.load),
                                store: Self::map_store_op(attachment.ops.store),
                            },
                        }));
                    }
                    let depth_stencil = match depth_stencil_attachment {
                        Some(attachment) => {
                            let view = self.texture_views.get(attachment.view)?;
                            Some(wgpu::RenderPassDepthStencilAttachment {
                                view,
                                depth_ops: attachment.depth_ops.map(|ops| wgpu::Operations {
                                    load: match ops.load {
                                        LoadOp::Load => wgpu::LoadOp::Load,
                                        LoadOp::Clear(depth) => wgpu::LoadOp::Clear(depth),
                                    },
                                    store: Self::map_store_op(ops.store),
                                }),
                                stencil_ops: None,
                            })
                        }
                        None => None,
                    };

                    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: label.as_deref(),
                        color_attachments: &attachments,
                        depth_stencil_attachment: depth_stencil,
                        occlusion_query_set: None,
                        timestamp_writes: None,
                    });

                    let mut ended = false;
                    i += 1;
                    while i < commands.len() {
                        match &commands[i] {
                            GpuCmd::EndRenderPass => {
                                ended = true;
                                i += 1;
                                break;
                            }
                            GpuCmd::SetPipeline(id) => match self.pipelines.get(*id)? {
                                Pipeline::Render { pipeline, .. } => {
                                    render_pass.set_pipeline(pipeline)
                                }
                                Pipeline::Compute { .. } => {
                                    return Err(GfxError::Backend(
                                        "attempted to bind compute pipeline in render pass".into(),
                                    ))
                                }
                            },
                            GpuCmd::SetBindGroup {
                                index,
                                bind_group,
                                dynamic_offsets,
                            } => {
                                let group = self.bind_groups.get(*bind_group)?;
                                render_pass.set_bind_group(*index, group, dynamic_offsets);
                            }
                            GpuCmd::SetVertexBuffer {
                                slot,
                                buffer,
                                offset,
                            } => {
                                let buffer = self.buffers.get(*buffer)?;
                                render_pass.set_vertex_buffer(*slot, buffer.slice(*offset..));
                            }
                            GpuCmd::SetIndexBuffer {
                                buffer,
                                format,
                                offset,
                            } => {
                                let buffer = self.buffers.get(*buffer)?;
                                render_pass.set_index_buffer(
                                    buffer.slice(*offset..),
                                    Self::map_index_format(*format),
                                );
                            }
                            GpuCmd::Draw {
                                vertex_count,
                                instance_count,
                                first_vertex,
                                first_instance,
                            } => {
                                render_pass.draw(
                                    *first_vertex..first_vertex + vertex_count,
                                    *first_instance..first_instance + instance_count,
                                );
                            }
                            GpuCmd::DrawIndexed {
                                index_count,
                                instance_count,
                                first_index,
                                base_vertex,
                                first_instance,
                            } => {
                                render_pass.draw_indexed(
                                    *first_index..first_index + index_count,
                                    *base_vertex,
                                    *first_instance..first_instance + instance_count,
                                );
                            }
                            other => {
                                return Err(GfxError::Backend(format!(
                                    "invalid command inside render pass: {other:?}"
                                )))
                            }
                        }
                        i += 1;
                    }
                    if !ended {
                        return Err(GfxError::Backend(
                            "render pass did not terminate with EndRenderPass".into(),
                        ));
                    }
                }
                GpuCmd::BeginComputePass { label } => {
                    let mut compute_pass =
                        encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                            label: label.as_deref(),
                            timestamp_writes: None,
                        });

                    let mut ended = false;
                    i += 1;
                    while i < commands.len() {
                        match &commands[i] {
                            GpuCmd::EndComputePass => {
                                ended = true;
                                i += 1;
                                break;
                            }
                            GpuCmd::SetPipeline(id) => match self.pipelines.get(*id)? {
                                Pipeline::Compute { pipeline, .. } => {
                                    compute_pass.set_pipeline(pipeline)
                                }
                                Pipeline::Render { .. } => {
                                    return Err(GfxError::Backend(
                                        "attempted to bind render pipeline in compute pass".into(),
                                    ))
                                }
                            },
                            GpuCmd::SetBindGroup {
                                index,
                                bind_group,
                                dynamic_offsets,
                            } => {
                                let group = self.bind_groups.get(*bind_group)?;
                                compute_pass.set_bind_group(*index, group, dynamic_offsets);
                            }
                            GpuCmd::Dispatch { x, y, z } => {
                                compute_pass.dispatch_workgroups(*x, *y, *z);
                            }
                            other => {
                                return Err(GfxError::Backend(format!(
                                    "invalid command inside compute pass: {other:?}"
                                )))
                            }
                        }
                        i += 1;
                    }
                    if !ended {
                        return Err(GfxError::Backend(
                            "compute pass did not terminate with EndComputePass".into(),
                        ));
                    }
                }
                other => {
                    return Err(GfxError::Backend(format!(
                        "unexpected command outside pass: {other:?}"
                    )))
                }
            }
        }

        Ok(encoder.finish())
    }
}

impl GpuBackend for WgpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Wgpu
    }

    fn execution(&self) -> ExecutionModel {
        ExecutionModel::Deferred
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: Self::map_buffer_usages(desc.usage),
            mapped_at_creation: false,
        });
        Ok(self.buffers.insert(buffer))
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let buffer = self.buffers.get(buffer)?;
        let size = data.len() as u64;
        let alignment = wgpu::COPY_BUFFER_ALIGNMENT;
        if offset % alignment != 0 || size % alignment != 0 {
            return Err(GfxError::Validation(format!(
                "write_buffer offset/size must be {alignment}-byte aligned (offset={offset}, size={size})"
            )));
        }
        self.queue.write_buffer(buffer, offset, data);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.size.width,
                height: desc.size.height,
                depth_or_array_layers: desc.size.depth_or_array_layers,
            },
            mip_level_count: desc.mip_level_count,
            sample_count: desc.sample_count,
            dimension: match desc.dimension {
                TextureDimension::D2 => wgpu::TextureDimension::D2,
            },
            format: Self::map_texture_format(desc.format),
            usage: Self::map_texture_usages(desc.usage),
            view_formats: &[],
        });
        Ok(self.textures.insert(StoredTexture { texture }))
    }

    fn write_texture(&mut self, write: &TextureWrite, data: &[u8]) -> Result<()> {
        let stored = self.textures.get(write.texture)?;
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &stored.texture,
                mip_level: write.mip_level,
                origin: wgpu::Origin3d {
                    x: write.origin.x,
                    y: write.origin.y,
                    z: write.origin.z,
                },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: write.layout.offset,
                bytes_per_row: write.layout.bytes_per_row,
                rows_per_image: write.layout.rows_per_image,
            },
            wgpu::Extent3d {
                width: write.size.width,
                height: write.size.height,
                depth_or_array_layers: write.size.depth_or_array_layers,
            },
        );
        Ok(())
    }

    fn create_texture_view(
        &mut self,
        texture: TextureId,
        desc: &TextureViewDesc,
    ) -> Result<TextureViewId> {
        let texture = self.textures.get(texture)?;
        let view = texture.texture.create_view(&wgpu::TextureViewDescriptor {
            label: desc.label.as_deref(),
            ..Default::default()
        });
        Ok(self.texture_views.insert(view))
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId> {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            address_mode_u: Self::map_address_mode(desc.address_mode_u),
            address_mode_v: Self::map_address_mode(desc.address_mode_v),
            address_mode_w: Self::map_address_mode(desc.address_mode_w),
            mag_filter: Self::map_filter_mode(desc.mag_filter),
            min_filter: Self::map_filter_mode(desc.min_filter),
            mipmap_filter: Self::map_filter_mode(desc.mipmap_filter),
            compare: desc.compare.map(Self::map_compare),
            ..Default::default()
        });
        Ok(self.samplers.insert(sampler))
    }

    fn create_shader_module(&mut self, desc: &ShaderModuleDesc) -> Result<ShaderModuleId> {
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: desc.label.as_deref(),
                source: wgpu::ShaderSource::Wgsl(desc.source.clone().into()),
            });
        Ok(self.shaders.insert(module))
    }

    fn create_bind_group_layout(
        &mut self,
        desc: &BindGroupLayoutDesc,
    ) -> Result<BindGroupLayoutId> {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = desc
            .entries
            .iter()
            .map(|entry| wgpu::BindGroupLayoutEntry {
                binding: entry.binding,
                visibility: Self::map_shader_stages(entry.visibility),
                ty: Self::map_binding_type(&entry.ty),
                count: None,
            })
            .collect();
        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: desc.label.as_deref(),
                entries: &entries,
            });
        Ok(self.bind_group_layouts.insert(layout))
    }

    fn create_pipeline_layout(
        &mut self,
        label: Option<&str>,
        bind_group_layouts: &[BindGroupLayoutId],
    ) -> Result<PipelineLayoutId> {
        self.pipeline_layout_for(label, bind_group_layouts)?;
        Ok(self.pipeline_layouts.insert(bind_group_layouts.to_vec()))
    }

    fn create_bind_group(&mut self, desc: &BindGroupDesc) -> Result<BindGroupId> {
        let layout = self.bind_group_layouts.get(desc.layout.id)?;
        let mut entries = Vec::with_capacity(desc.entries.len());
        for entry in &desc.entries {
            let resource = match &entry.resource {
                BindingResource::Buffer {
                    buffer,
                    offset,
                    size,
                } => {
                    let buffer = self.buffers.get(buffer.id)?;
                    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer,
                        offset: *offset,
                        size: size.map(wgpu::BufferSize::new).flatten(),
                    })
                }
                BindingResource::Sampler(sampler) => {
                    wgpu::BindingResource::Sampler(self.samplers.get(sampler.id)?)
                }
                BindingResource::TextureView(view) => {
                    wgpu::BindingResource::TextureView(self.texture_views.get(view.id)?)
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: entry.binding,
                resource,
            });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: desc.label.as_deref(),
            layout,
            entries: &entries,
        });
        Ok(self.bind_groups.insert(bind_group))
    }

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDesc) -> Result<PipelineId> {
        let auto_layout = matches!(desc.layout, PipelineLayoutKind::Auto);
        if let PipelineLayoutKind::Explicit(layout) = &desc.layout {
            let key = self.pipeline_layouts.get(layout.id)?.clone();
            self.pipeline_layout_for(desc.label.as_deref(), &key)?;
        }

        let vertex_constants: HashMap<String, f64> =
            desc.vertex.constants.iter().cloned().collect();
        let fragment_constants: HashMap<String, f64> = desc
            .fragment
            .as_ref()
            .map(|f| f.constants.iter().cloned().collect())
            .unwrap_or_default();

        let attribute_lists: Vec<Vec<wgpu::VertexAttribute>> = desc
            .vertex
            .buffers
            .iter()
            .map(|layout| {
                layout
                    .attributes
                    .iter()
                    .map(|attr| wgpu::VertexAttribute {
                        format: Self::map_vertex_format(attr.format),
                        offset: attr.offset,
                        shader_location: attr.shader_location,
                    })
                    .collect()
            })
            .collect();
        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = desc
            .vertex
            .buffers
            .iter()
            .zip(&attribute_lists)
            .map(|(layout, attributes)| wgpu::VertexBufferLayout {
                array_stride: layout.array_stride,
                step_mode: match layout.step_mode {
                    VertexStepMode::Vertex => wgpu::VertexStepMode::Vertex,
                    VertexStepMode::Instance => wgpu::VertexStepMode::Instance,
                },
                attributes,
            })
            .collect();

        let targets: Vec<Option<wgpu::ColorTargetState>> = desc
            .fragment
            .as_ref()
            .map(|fragment| {
                fragment
                    .targets
                    .iter()
                    .map(|target| {
                        target.as_ref().map(|target| wgpu::ColorTargetState {
                            format: Self::map_texture_format(target.format),
                            blend: target.blend.map(|blend| wgpu::BlendState {
                                color: wgpu::BlendComponent {
                                    src_factor: Self::map_blend_factor(blend.color.src_factor),
                                    dst_factor: Self::map_blend_factor(blend.color.dst_factor),
                                    operation: Self::map_blend_operation(blend.color.operation),
                                },
                                alpha: wgpu::BlendComponent {
                                    src_factor: Self::map_blend_factor(blend.alpha.src_factor),
                                    dst_factor: Self::map_blend_factor(blend.alpha.dst_factor),
                                    operation: Self::map_blend_operation(blend.alpha.operation),
                                },
                            }),
                            write_mask: wgpu::ColorWrites::from_bits_truncate(
                                target.write_mask.bits(),
                            ),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let vertex_module = self.shaders.get(desc.vertex.module.id)?;
        let fragment_module = match &desc.fragment {
            Some(fragment) => Some(self.shaders.get(fragment.module.id)?),
            None => None,
        };
        let pipeline_layout = match &desc.layout {
            PipelineLayoutKind::Auto => None,
            PipelineLayoutKind::Explicit(layout) => {
                let key = self.pipeline_layouts.get(layout.id)?;
                Some(
                    self.pipeline_layout_cache
                        .peek(key)
                        .expect("pipeline layout rebuilt above"),
                )
            }
        };

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: desc.label.as_deref(),
                layout: pipeline_layout,
                vertex: wgpu::VertexState {
                    module: vertex_module,
                    entry_point: desc.vertex.entry_point.as_str(),
                    compilation_options: wgpu::PipelineCompilationOptions {
                        constants: &vertex_constants,
                        ..Default::default()
                    },
                    buffers: &vertex_buffers,
                },
                fragment: desc.fragment.as_ref().map(|fragment| wgpu::FragmentState {
                    module: fragment_module.expect("fragment module resolved above"),
                    entry_point: fragment.entry_point.as_str(),
                    compilation_options: wgpu::PipelineCompilationOptions {
                        constants: &fragment_constants,
                        ..Default::default()
                    },
                    targets: &targets,
                }),
                primitive: wgpu::PrimitiveState {
                    topology: Self::map_primitive_topology(
                        desc.primitive
                            .topology
                            .unwrap_or(PrimitiveTopology::TriangleList),
                    ),
                    front_face: match desc.primitive.front_face.unwrap_or(FrontFace::Ccw) {
                        FrontFace::Ccw => wgpu::FrontFace::Ccw,
                        FrontFace::Cw => wgpu::FrontFace::Cw,
                    },
                    cull_mode: desc.primitive.cull_mode.map(|mode| match mode {
                        CullMode::Front => wgpu::Face::Front,
                        CullMode::Back => wgpu::Face::Back,
                    }),
                    ..Default::default()
                },
                depth_stencil: desc.depth_stencil.as_ref().map(|ds| {
                    wgpu::DepthStencilState {
                        format: Self::map_texture_format(ds.format),
                        depth_write_enabled: ds.depth_write_enabled,
                        depth_compare: Self::map_compare(ds.depth_compare),
                        stencil: wgpu::StencilState {
                            read_mask: ds.stencil_read_mask,
                            write_mask: ds.stencil_write_mask,
                            ..Default::default()
                        },
                        bias: Default::default(),
                    }
                }),
                multisample: wgpu::MultisampleState {
                    count: desc.multisample.count,
                    ..Default::default()
                },
                multiview: None,
            });

        Ok(self.pipelines.insert(Pipeline::Render {
            pipeline,
            auto_layout,
        }))
    }

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> Result<PipelineId> {
        if !self.capabilities.supports_compute {
            return Err(GfxError::UnsupportedFeature("compute-pipelines"));
        }
        let auto_layout = matches!(desc.layout, PipelineLayoutKind::Auto);
        if let PipelineLayoutKind::Explicit(layout) = &desc.layout {
            let key = self.pipeline_layouts.get(layout.id)?.clone();
            self.pipeline_layout_for(desc.label.as_deref(), &key)?;
        }

        let constants: HashMap<String, f64> = desc.constants.iter().cloned().collect();
        let module = self.shaders.get(desc.module.id)?;
        let pipeline_layout = match &desc.layout {
            PipelineLayoutKind::Auto => None,
            PipelineLayoutKind::Explicit(layout) => {
                let key = self.pipeline_layouts.get(layout.id)?;
                Some(
                    self.pipeline_layout_cache
                        .peek(key)
                        .expect("pipeline layout rebuilt above"),
                )
            }
        };

        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: desc.label.as_deref(),
                layout: pipeline_layout,
                module,
                entry_point: desc.entry_point.as_str(),
                compilation_options: wgpu::PipelineCompilationOptions {
                    constants: &constants,
                    ..Default::default()
                },
            });

        Ok(self.pipelines.insert(Pipeline::Compute {
            pipeline,
            auto_layout,
        }))
    }

    fn pipeline_auto_layout(
        &mut self,
        pipeline: PipelineId,
        group: u32,
    ) -> Result<BindGroupLayoutId> {
        if group >= self.capabilities.max_bind_groups {
            return Err(GfxError::Validation(format!(
                "bind group index {group} exceeds max_bind_groups {}",
                self.capabilities.max_bind_groups
            )));
        }
        if let Some(id) = self.derived_layouts.get(&(pipeline.index(), group)) {
            return Ok(*id);
        }
        let layout = match self.pipelines.get(pipeline)? {
            Pipeline::Render {
                pipeline,
                auto_layout,
            } => {
                if !*auto_layout {
                    return Err(GfxError::State("pipeline does not use an auto layout"));
                }
                pipeline.get_bind_group_layout(group)
            }
            Pipeline::Compute {
                pipeline,
                auto_layout,
            } => {
                if !*auto_layout {
                    return Err(GfxError::State("pipeline does not use an auto layout"));
                }
                pipeline.get_bind_group_layout(group)
            }
        };
        let id = self.bind_group_layouts.insert(layout);
        self.derived_layouts.insert((pipeline.index(), group), id);
        Ok(id)
    }

    fn execute_immediate(&mut self, _cmd: &GpuCmd) -> Result<()> {
        Err(GfxError::Backend(
            "commands are deferred to submit on this backend".into(),
        ))
    }

    fn submit(&mut self, streams: &[Vec<GpuCmd>]) -> Result<()> {
        let mut buffers = Vec::with_capacity(streams.len());
        for stream in streams {
            buffers.push(self.encode_stream(stream)?);
        }
        self.queue.submit(buffers);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_submitted_work_done(&mut self) -> Deferred<()> {
        let (handle, deferred) = deferred::channel();
        // The callback may fire from a driver thread; the deferred state is
        // thread-safe for exactly this reason.
        self.queue.on_submitted_work_done(move || handle.resolve(()));
        deferred
    }

    fn poll(&mut self) {
        self.device.poll(wgpu::Maintain::Poll);
    }
}
