//! GL emulation backend.
//!
//! Bridges the explicit, pass-structured command model onto a GLES 3.0 style
//! implicit-state API. Commands execute at encode time (immediate model), so
//! ordering is only as strong as encode order. Every piece of global context
//! state the backend binds is restored when the pass ends or the helper
//! returns: callers outside the kernel may own bindings of their own and must
//! never observe ours.

pub mod context;
mod soft;

pub use context::{GlContext, GlFence};
pub use soft::SoftGl;

use std::collections::{BTreeSet, HashMap};

use crate::backend::{BackendKind, ExecutionModel, GpuBackend, TextureWrite};
use crate::caps::Capabilities;
use crate::cmd::GpuCmd;
use crate::deferred::{self, Deferred, DeferredHandle};
use crate::error::{GfxError, Result};
use crate::pipeline::{
    BindGroupDesc, BindGroupLayoutDesc, BindingResource, ComputePipelineDesc, PipelineLayoutKind,
    RenderPipelineDesc, ShaderModuleDesc, VertexBufferLayout,
};
use crate::registry::{
    BindGroupId, BindGroupLayoutId, BindGroupLayoutTag, BindGroupTag, BufferId, BufferTag,
    PipelineId, PipelineLayoutId, PipelineLayoutTag, PipelineTag, Registry, SamplerId, SamplerTag,
    ShaderModuleId, ShaderModuleTag, TextureId, TextureTag, TextureViewId, TextureViewTag,
};
use crate::resource::{BufferDesc, SamplerDesc, TextureDesc, TextureViewDesc};
use crate::types::{
    AddressMode, BlendFactor, BlendOperation, BufferUsages, CompareFunction, CullMode, FilterMode,
    FrontFace, IndexFormat, LoadOp, PrimitiveTopology, TextureFormat, VertexFormat,
};

use context::consts as gl;
use context::{GlBuffer, GlFramebuffer, GlProgram, GlSampler, GlTexture};

/// Flattened binding slot space: group index times this, plus the binding
/// number, yields the texture unit / indexed uniform slot.
const BINDINGS_PER_GROUP: u32 = 16;

struct BufferEntry {
    gl: GlBuffer,
    target: u32,
}

struct TextureEntry {
    gl: GlTexture,
    format: TextureFormat,
}

enum ResolvedBinding {
    UniformBuffer {
        gl: GlBuffer,
        offset: u64,
        size: u64,
    },
    Texture(GlTexture),
    Sampler(GlSampler),
}

struct PipelineEntry {
    program: GlProgram,
    topology: u32,
    cull: Option<u32>,
    front: u32,
    depth: Option<(u32, bool)>,
    blend: Option<(u32, u32, u32)>,
    color_mask: (bool, bool, bool, bool),
    vertex_layouts: Vec<VertexBufferLayout>,
    auto_layout: bool,
    auto_layouts: HashMap<u32, BindGroupLayoutId>,
}

/// Context state captured at pass begin and restored at pass end.
struct PassScope {
    framebuffer: GlFramebuffer,
    prev_framebuffer: Option<GlFramebuffer>,
    prev_program: Option<GlProgram>,
    prev_array_buffer: Option<GlBuffer>,
    prev_element_buffer: Option<GlBuffer>,
    prev_uniform_buffer: Option<GlBuffer>,
    prev_active_texture: u32,
    touched_units: BTreeSet<u32>,
    touched_ubo_slots: BTreeSet<u32>,
    enabled_attribs: BTreeSet<u32>,
    pipeline: Option<PipelineId>,
    vertex_buffers: HashMap<u32, (GlBuffer, u64)>,
    index_type: u32,
    index_elem_size: u64,
    index_offset: u64,
}

pub struct GlBackend<C: GlContext> {
    gl: C,
    capabilities: Capabilities,
    buffers: Registry<BufferTag, BufferEntry>,
    textures: Registry<TextureTag, TextureEntry>,
    views: Registry<TextureViewTag, TextureId>,
    samplers: Registry<SamplerTag, GlSampler>,
    shaders: Registry<ShaderModuleTag, String>,
    bind_group_layouts: Registry<BindGroupLayoutTag, ()>,
    pipeline_layouts: Registry<PipelineLayoutTag, ()>,
    bind_groups: Registry<BindGroupTag, Vec<(u32, ResolvedBinding)>>,
    pipelines: Registry<PipelineTag, PipelineEntry>,
    pass: Option<PassScope>,
    pending_fences: Vec<(GlFence, DeferredHandle<()>)>,
}

impl<C: GlContext> GlBackend<C> {
    pub fn new(gl: C) -> Self {
        Self {
            gl,
            capabilities: Capabilities {
                supports_compute: false,
                max_texture_dimension_2d: 4096,
                max_bind_groups: 4,
                max_color_attachments: 4,
                supported_formats: vec![
                    TextureFormat::R8Unorm,
                    TextureFormat::Rg8Unorm,
                    TextureFormat::Rgba8Unorm,
                    TextureFormat::Rgba16Float,
                    TextureFormat::Rgba32Float,
                    TextureFormat::Depth24Plus,
                    TextureFormat::Depth32Float,
                ],
            },
            buffers: Registry::new("buffer"),
            textures: Registry::new("texture"),
            views: Registry::new("texture_view"),
            samplers: Registry::new("sampler"),
            shaders: Registry::new("shader_module"),
            bind_group_layouts: Registry::new("bind_group_layout"),
            pipeline_layouts: Registry::new("pipeline_layout"),
            bind_groups: Registry::new("bind_group"),
            pipelines: Registry::new("pipeline"),
            pass: None,
            pending_fences: Vec::new(),
        }
    }

    fn pass_mut(&mut self) -> Result<&mut PassScope> {
        self.pass
            .as_mut()
            .ok_or(GfxError::State("no render pass is open on this backend"))
    }

    fn begin_render_pass(
        &mut self,
        color_attachments: &[crate::cmd::ColorAttachmentCmd],
        depth_stencil: Option<&crate::cmd::DepthStencilAttachmentCmd>,
    ) -> Result<()> {
        if self.pass.is_some() {
            return Err(GfxError::State("a render pass is already open"));
        }

        // Resolve every attachment before any context state changes; a
        // failed begin must leave the caller's bindings exactly as found.
        let mut color_textures = Vec::with_capacity(color_attachments.len());
        for attachment in color_attachments {
            color_textures.push(self.view_texture(attachment.view)?);
        }
        let depth_texture = match depth_stencil {
            Some(attachment) => Some(self.view_texture(attachment.view)?),
            None => None,
        };

        let prev_framebuffer = self.gl.bound_framebuffer(gl::FRAMEBUFFER);
        let prev_program = self.gl.current_program();
        let prev_array_buffer = self.gl.bound_buffer(gl::ARRAY_BUFFER);
        let prev_element_buffer = self.gl.bound_buffer(gl::ELEMENT_ARRAY_BUFFER);
        let prev_uniform_buffer = self.gl.bound_buffer(gl::UNIFORM_BUFFER);
        let prev_active_texture = self.gl.active_texture_unit();

        let framebuffer = self.gl.create_framebuffer();
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, Some(framebuffer));

        let mut clear_mask = 0;
        for (i, (attachment, texture)) in color_attachments.iter().zip(color_textures).enumerate() {
            self.gl.framebuffer_texture_2d(
                gl::FRAMEBUFFER,
                gl::COLOR_ATTACHMENT0 + i as u32,
                gl::TEXTURE_2D,
                Some(texture),
                0,
            );
            if let LoadOp::Clear(color) = attachment.ops.load {
                self.gl.clear_color(
                    color.r as f32,
                    color.g as f32,
                    color.b as f32,
                    color.a as f32,
                );
                clear_mask |= gl::COLOR_BUFFER_BIT;
            }
        }
        if let (Some(attachment), Some(texture)) = (depth_stencil, depth_texture) {
            self.gl.framebuffer_texture_2d(
                gl::FRAMEBUFFER,
                gl::DEPTH_ATTACHMENT,
                gl::TEXTURE_2D,
                Some(texture),
                0,
            );
            if let Some(ops) = attachment.depth_ops {
                if let LoadOp::Clear(depth) = ops.load {
                    self.gl.clear_depth(depth);
                    clear_mask |= gl::DEPTH_BUFFER_BIT;
                }
            }
        }
        if clear_mask != 0 {
            self.gl.clear(clear_mask);
        }

        self.pass = Some(PassScope {
            framebuffer,
            prev_framebuffer,
            prev_program,
            prev_array_buffer,
            prev_element_buffer,
            prev_uniform_buffer,
            prev_active_texture,
            touched_units: BTreeSet::new(),
            touched_ubo_slots: BTreeSet::new(),
            enabled_attribs: BTreeSet::new(),
            pipeline: None,
            vertex_buffers: HashMap::new(),
            index_type: gl::UNSIGNED_SHORT,
            index_elem_size: 2,
            index_offset: 0,
        });
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        let scope = self
            .pass
            .take()
            .ok_or(GfxError::State("no render pass is open on this backend"))?;

        for location in &scope.enabled_attribs {
            self.gl.disable_vertex_attrib_array(*location);
        }
        for unit in &scope.touched_units {
            self.gl.active_texture(gl::TEXTURE0 + unit);
            self.gl.bind_texture(gl::TEXTURE_2D, None);
            self.gl.bind_sampler(*unit, None);
        }
        self.gl.active_texture(scope.prev_active_texture);
        for slot in &scope.touched_ubo_slots {
            self.gl
                .bind_buffer_range(gl::UNIFORM_BUFFER, *slot, None, 0, 0);
        }
        self.gl.use_program(scope.prev_program);
        self.gl.bind_buffer(gl::ARRAY_BUFFER, scope.prev_array_buffer);
        self.gl
            .bind_buffer(gl::ELEMENT_ARRAY_BUFFER, scope.prev_element_buffer);
        self.gl
            .bind_buffer(gl::UNIFORM_BUFFER, scope.prev_uniform_buffer);
        self.gl
            .bind_framebuffer(gl::FRAMEBUFFER, scope.prev_framebuffer);
        self.gl.delete_framebuffer(scope.framebuffer);
        Ok(())
    }

    fn view_texture(&self, view: TextureViewId) -> Result<GlTexture> {
        let texture = *self.views.get(view)?;
        Ok(self.textures.get(texture)?.gl)
    }

    fn set_pipeline(&mut self, id: PipelineId) -> Result<()> {
        self.pass_mut()?;
        let entry = self.pipelines.get(id)?;

        self.gl.use_program(Some(entry.program));
        match entry.depth {
            Some((func, write)) => {
                self.gl.enable(gl::DEPTH_TEST);
                self.gl.depth_func(func);
                self.gl.depth_mask(write);
            }
            None => self.gl.disable(gl::DEPTH_TEST),
        }
        match entry.blend {
            Some((src, dst, eq)) => {
                self.gl.enable(gl::BLEND);
                self.gl.blend_func(src, dst);
                self.gl.blend_equation(eq);
            }
            None => self.gl.disable(gl::BLEND),
        }
        match entry.cull {
            Some(mode) => {
                self.gl.enable(gl::CULL_FACE);
                self.gl.cull_face(mode);
            }
            None => self.gl.disable(gl::CULL_FACE),
        }
        self.gl.front_face(self.pipelines.get(id)?.front);
        let (r, g, b, a) = self.pipelines.get(id)?.color_mask;
        self.gl.color_mask(r, g, b, a);

        self.pass_mut()?.pipeline = Some(id);
        Ok(())
    }

    fn set_bind_group(
        &mut self,
        index: u32,
        bind_group: BindGroupId,
        dynamic_offsets: &[u32],
    ) -> Result<()> {
        self.pass_mut()?;
        let base = index * BINDINGS_PER_GROUP;

        enum Action {
            Uniform { slot: u32, gl: GlBuffer, offset: u64, size: u64 },
            Texture { unit: u32, gl: GlTexture },
            Sampler { unit: u32, gl: GlSampler },
        }

        let mut offsets = dynamic_offsets.iter();
        let mut actions = Vec::new();
        for (binding, resolved) in self.bind_groups.get(bind_group)? {
            let slot = base + binding;
            match resolved {
                ResolvedBinding::UniformBuffer { gl, offset, size } => {
                    // Dynamic offsets apply to buffer bindings in binding
                    // order, matching their declaration order in the group.
                    let extra = offsets.next().copied().unwrap_or(0) as u64;
                    actions.push(Action::Uniform {
                        slot,
                        gl: *gl,
                        offset: offset + extra,
                        size: *size,
                    });
                }
                ResolvedBinding::Texture(texture) => actions.push(Action::Texture {
                    unit: slot,
                    gl: *texture,
                }),
                ResolvedBinding::Sampler(sampler) => actions.push(Action::Sampler {
                    unit: slot,
                    gl: *sampler,
                }),
            }
        }

        for action in actions {
            match action {
                Action::Uniform { slot, gl: buffer, offset, size } => {
                    self.gl
                        .bind_buffer_range(gl::UNIFORM_BUFFER, slot, Some(buffer), offset, size);
                    self.pass_mut()?.touched_ubo_slots.insert(slot);
                }
                Action::Texture { unit, gl: texture } => {
                    self.gl.active_texture(gl::TEXTURE0 + unit);
                    self.gl.bind_texture(gl::TEXTURE_2D, Some(texture));
                    self.pass_mut()?.touched_units.insert(unit);
                }
                Action::Sampler { unit, gl: sampler } => {
                    self.gl.bind_sampler(unit, Some(sampler));
                    self.pass_mut()?.touched_units.insert(unit);
                }
            }
        }
        Ok(())
    }

    fn apply_vertex_layouts(&mut self, pipeline: PipelineId) -> Result<()> {
        let layouts = self.pipelines.get(pipeline)?.vertex_layouts.clone();
        for (slot, layout) in layouts.iter().enumerate() {
            let Some((buffer, base_offset)) = self
                .pass_mut()?
                .vertex_buffers
                .get(&(slot as u32))
                .copied()
            else {
                return Err(GfxError::State("draw without a bound vertex buffer"));
            };
            self.gl.bind_buffer(gl::ARRAY_BUFFER, Some(buffer));
            let divisor = match layout.step_mode {
                crate::types::VertexStepMode::Vertex => 0,
                crate::types::VertexStepMode::Instance => 1,
            };
            for attr in &layout.attributes {
                let (size, ty, normalized) = map_vertex_format(attr.format);
                self.gl.vertex_attrib_pointer(
                    attr.shader_location,
                    size,
                    ty,
                    normalized,
                    layout.array_stride as u32,
                    base_offset + attr.offset,
                );
                self.gl.enable_vertex_attrib_array(attr.shader_location);
                self.gl
                    .vertex_attrib_divisor(attr.shader_location, divisor);
                self.pass_mut()?
                    .enabled_attribs
                    .insert(attr.shader_location);
            }
        }
        Ok(())
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
    ) -> Result<()> {
        let pipeline = self
            .pass_mut()?
            .pipeline
            .ok_or(GfxError::State("draw without a bound pipeline"))?;
        self.apply_vertex_layouts(pipeline)?;
        let mode = self.pipelines.get(pipeline)?.topology;
        if instance_count == 1 {
            self.gl.draw_arrays(mode, first_vertex, vertex_count);
        } else {
            self.gl
                .draw_arrays_instanced(mode, first_vertex, vertex_count, instance_count);
        }
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
    ) -> Result<()> {
        // GLES 3.0 has no base-vertex draw.
        if base_vertex != 0 {
            return Err(GfxError::UnsupportedFeature("draw-indexed-base-vertex"));
        }
        let pipeline = self
            .pass_mut()?
            .pipeline
            .ok_or(GfxError::State("draw without a bound pipeline"))?;
        self.apply_vertex_layouts(pipeline)?;
        let mode = self.pipelines.get(pipeline)?.topology;
        let scope = self.pass_mut()?;
        let ty = scope.index_type;
        let offset = scope.index_offset + first_index as u64 * scope.index_elem_size;
        if instance_count == 1 {
            self.gl.draw_elements(mode, index_count, ty, offset);
        } else {
            self.gl
                .draw_elements_instanced(mode, index_count, ty, offset, instance_count);
        }
        Ok(())
    }
}

impl<C: GlContext> GpuBackend for GlBackend<C> {
    fn kind(&self) -> BackendKind {
        BackendKind::Gl
    }

    fn execution(&self) -> ExecutionModel {
        ExecutionModel::Immediate
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId> {
        let target = buffer_target_for_usage(desc.usage);
        let buffer = self.gl.create_buffer();
        let prev = self.gl.bound_buffer(target);
        self.gl.bind_buffer(target, Some(buffer));
        self.gl.buffer_data_size(target, desc.size);
        self.gl.bind_buffer(target, prev);
        Ok(self.buffers.insert(BufferEntry { gl: buffer, target }))
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let entry = self.buffers.get(buffer)?;
        let (gl_buffer, target) = (entry.gl, entry.target);
        let prev = self.gl.bound_buffer(target);
        self.gl.bind_buffer(target, Some(gl_buffer));
        self.gl.buffer_sub_data(target, offset, data);
        self.gl.bind_buffer(target, prev);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        let (internal, _, _) = map_texture_format(desc.format)?;
        let texture = self.gl.create_texture();
        let prev_active = self.gl.active_texture_unit();
        self.gl.active_texture(gl::TEXTURE0);
        let prev = self.gl.bound_texture(0, gl::TEXTURE_2D);
        self.gl.bind_texture(gl::TEXTURE_2D, Some(texture));
        self.gl.tex_storage_2d(
            gl::TEXTURE_2D,
            desc.mip_level_count,
            internal,
            desc.size.width,
            desc.size.height,
        );
        self.gl.bind_texture(gl::TEXTURE_2D, prev);
        self.gl.active_texture(prev_active);
        Ok(self.textures.insert(TextureEntry {
            gl: texture,
            format: desc.format,
        }))
    }

    fn write_texture(&mut self, write: &TextureWrite, data: &[u8]) -> Result<()> {
        let entry = self.textures.get(write.texture)?;
        let (_, format, ty) = map_texture_format(entry.format)?;
        let gl_texture = entry.gl;
        let bytes_per_texel = entry
            .format
            .bytes_per_texel()
            .ok_or(GfxError::UnsupportedFormat(entry.format.name()))?;

        let row_size = (write.size.width * bytes_per_texel) as usize;
        let bytes_per_row = write
            .layout
            .bytes_per_row
            .map(|v| v as usize)
            .unwrap_or(row_size);
        let base = write.layout.offset as usize;

        let prev_active = self.gl.active_texture_unit();
        self.gl.active_texture(gl::TEXTURE0);
        let prev = self.gl.bound_texture(0, gl::TEXTURE_2D);
        self.gl.bind_texture(gl::TEXTURE_2D, Some(gl_texture));
        if bytes_per_row == row_size {
            let len = row_size * write.size.height as usize;
            self.gl.tex_sub_image_2d(
                gl::TEXTURE_2D,
                write.mip_level,
                write.origin.x,
                write.origin.y,
                write.size.width,
                write.size.height,
                format,
                ty,
                &data[base..base + len],
            );
        } else {
            // Row padding has no GLES upload parameter for client memory
            // here, so padded rows go up one at a time.
            for row in 0..write.size.height {
                let start = base + row as usize * bytes_per_row;
                self.gl.tex_sub_image_2d(
                    gl::TEXTURE_2D,
                    write.mip_level,
                    write.origin.x,
                    write.origin.y + row,
                    write.size.width,
                    1,
                    format,
                    ty,
                    &data[start..start + row_size],
                );
            }
        }
        self.gl.bind_texture(gl::TEXTURE_2D, prev);
        self.gl.active_texture(prev_active);
        Ok(())
    }

    fn create_texture_view(
        &mut self,
        texture: TextureId,
        _desc: &TextureViewDesc,
    ) -> Result<TextureViewId> {
        self.textures.get(texture)?;
        Ok(self.views.insert(texture))
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId> {
        let sampler = self.gl.create_sampler();
        self.gl
            .sampler_parameter_u32(sampler, gl::TEXTURE_MIN_FILTER, map_filter(desc.min_filter));
        self.gl
            .sampler_parameter_u32(sampler, gl::TEXTURE_MAG_FILTER, map_filter(desc.mag_filter));
        self.gl.sampler_parameter_u32(
            sampler,
            gl::TEXTURE_WRAP_S,
            map_address_mode(desc.address_mode_u),
        );
        self.gl.sampler_parameter_u32(
            sampler,
            gl::TEXTURE_WRAP_T,
            map_address_mode(desc.address_mode_v),
        );
        self.gl.sampler_parameter_u32(
            sampler,
            gl::TEXTURE_WRAP_R,
            map_address_mode(desc.address_mode_w),
        );
        if let Some(compare) = desc.compare {
            self.gl.sampler_parameter_u32(
                sampler,
                gl::TEXTURE_COMPARE_MODE,
                gl::COMPARE_REF_TO_TEXTURE,
            );
            self.gl
                .sampler_parameter_u32(sampler, gl::TEXTURE_COMPARE_FUNC, map_compare(compare));
        }
        Ok(self.samplers.insert(sampler))
    }

    fn create_shader_module(&mut self, desc: &ShaderModuleDesc) -> Result<ShaderModuleId> {
        Ok(self.shaders.insert(desc.source.clone()))
    }

    fn create_bind_group_layout(
        &mut self,
        _desc: &BindGroupLayoutDesc,
    ) -> Result<BindGroupLayoutId> {
        Ok(self.bind_group_layouts.insert(()))
    }

    fn create_pipeline_layout(
        &mut self,
        _label: Option<&str>,
        bind_group_layouts: &[BindGroupLayoutId],
    ) -> Result<PipelineLayoutId> {
        for id in bind_group_layouts {
            self.bind_group_layouts.get(*id)?;
        }
        Ok(self.pipeline_layouts.insert(()))
    }

    fn create_bind_group(&mut self, desc: &BindGroupDesc) -> Result<BindGroupId> {
        self.bind_group_layouts.get(desc.layout.id)?;
        let mut entries = Vec::with_capacity(desc.entries.len());
        for entry in &desc.entries {
            let resolved = match &entry.resource {
                BindingResource::Buffer {
                    buffer,
                    offset,
                    size,
                } => ResolvedBinding::UniformBuffer {
                    gl: self.buffers.get(buffer.id)?.gl,
                    offset: *offset,
                    size: size.unwrap_or(buffer.size() - offset),
                },
                BindingResource::Sampler(sampler) => {
                    ResolvedBinding::Sampler(*self.samplers.get(sampler.id)?)
                }
                BindingResource::TextureView(view) => {
                    ResolvedBinding::Texture(self.view_texture(view.id)?)
                }
            };
            entries.push((entry.binding, resolved));
        }
        entries.sort_by_key(|(binding, _)| *binding);
        Ok(self.bind_groups.insert(entries))
    }

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDesc) -> Result<PipelineId> {
        let vertex_source = self.shaders.get(desc.vertex.module.id)?.clone();
        let vs = self.gl.create_shader(gl::VERTEX_SHADER);
        self.gl.shader_source(vs, &vertex_source);
        if !self.gl.compile_shader(vs) {
            return Err(GfxError::Compilation(self.gl.shader_info_log(vs)));
        }

        let program = self.gl.create_program();
        self.gl.attach_shader(program, vs);
        if let Some(fragment) = &desc.fragment {
            let fragment_source = self.shaders.get(fragment.module.id)?.clone();
            let fs = self.gl.create_shader(gl::FRAGMENT_SHADER);
            self.gl.shader_source(fs, &fragment_source);
            if !self.gl.compile_shader(fs) {
                return Err(GfxError::Compilation(self.gl.shader_info_log(fs)));
            }
            self.gl.attach_shader(program, fs);
        }
        if !self.gl.link_program(program) {
            return Err(GfxError::Compilation(self.gl.program_info_log(program)));
        }

        let first_target = desc
            .fragment
            .as_ref()
            .and_then(|f| f.targets.iter().flatten().next());
        let blend = first_target.and_then(|target| {
            target.blend.map(|state| {
                (
                    map_blend_factor(state.color.src_factor),
                    map_blend_factor(state.color.dst_factor),
                    map_blend_operation(state.color.operation),
                )
            })
        });
        let color_mask = first_target
            .map(|target| {
                let mask = target.write_mask;
                (
                    mask.contains(crate::types::ColorWrites::RED),
                    mask.contains(crate::types::ColorWrites::GREEN),
                    mask.contains(crate::types::ColorWrites::BLUE),
                    mask.contains(crate::types::ColorWrites::ALPHA),
                )
            })
            .unwrap_or((true, true, true, true));

        Ok(self.pipelines.insert(PipelineEntry {
            program,
            topology: map_topology(
                desc.primitive
                    .topology
                    .unwrap_or(PrimitiveTopology::TriangleList),
            ),
            cull: desc.primitive.cull_mode.map(map_cull_mode),
            front: map_front_face(desc.primitive.front_face.unwrap_or(FrontFace::Ccw)),
            depth: desc
                .depth_stencil
                .as_ref()
                .map(|ds| (map_compare(ds.depth_compare), ds.depth_write_enabled)),
            blend,
            color_mask,
            vertex_layouts: desc.vertex.buffers.clone(),
            auto_layout: matches!(desc.layout, PipelineLayoutKind::Auto),
            auto_layouts: HashMap::new(),
        }))
    }

    fn create_compute_pipeline(&mut self, _desc: &ComputePipelineDesc) -> Result<PipelineId> {
        Err(GfxError::UnsupportedFeature("compute-pipelines"))
    }

    fn pipeline_auto_layout(
        &mut self,
        pipeline: PipelineId,
        group: u32,
    ) -> Result<BindGroupLayoutId> {
        if !self.pipelines.get(pipeline)?.auto_layout {
            return Err(GfxError::State("pipeline does not use an auto layout"));
        }
        if let Some(id) = self.pipelines.get(pipeline)?.auto_layouts.get(&group) {
            return Ok(*id);
        }
        let id = self.bind_group_layouts.insert(());
        self.pipelines
            .get_mut(pipeline)?
            .auto_layouts
            .insert(group, id);
        Ok(id)
    }

    fn execute_immediate(&mut self, cmd: &GpuCmd) -> Result<()> {
        match cmd {
            GpuCmd::BeginRenderPass {
                color_attachments,
                depth_stencil_attachment,
                ..
            } => self.begin_render_pass(color_attachments, depth_stencil_attachment.as_ref()),
            GpuCmd::EndRenderPass => self.end_render_pass(),
            GpuCmd::BeginComputePass { .. } | GpuCmd::EndComputePass | GpuCmd::Dispatch { .. } => {
                Err(GfxError::UnsupportedFeature("compute-passes"))
            }
            GpuCmd::SetPipeline(id) => self.set_pipeline(*id),
            GpuCmd::SetBindGroup {
                index,
                bind_group,
                dynamic_offsets,
            } => self.set_bind_group(*index, *bind_group, dynamic_offsets),
            GpuCmd::SetVertexBuffer { slot, buffer, offset } => {
                let gl_buffer = self.buffers.get(*buffer)?.gl;
                let scope = self.pass_mut()?;
                scope.vertex_buffers.insert(*slot, (gl_buffer, *offset));
                Ok(())
            }
            GpuCmd::SetIndexBuffer {
                buffer,
                format,
                offset,
            } => {
                let gl_buffer = self.buffers.get(*buffer)?.gl;
                let (ty, elem_size) = map_index_format(*format);
                self.gl
                    .bind_buffer(gl::ELEMENT_ARRAY_BUFFER, Some(gl_buffer));
                let scope = self.pass_mut()?;
                scope.index_type = ty;
                scope.index_elem_size = elem_size;
                scope.index_offset = *offset;
                Ok(())
            }
            GpuCmd::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                ..
            } => self.draw(*vertex_count, *instance_count, *first_vertex),
            GpuCmd::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                base_vertex,
                ..
            } => self.draw_indexed(*index_count, *instance_count, *first_index, *base_vertex),
        }
    }

    fn submit(&mut self, _streams: &[Vec<GpuCmd>]) -> Result<()> {
        Err(GfxError::Backend(
            "commands execute at encode time on this backend".into(),
        ))
    }

    fn flush(&mut self) -> Result<()> {
        self.gl.flush();
        Ok(())
    }

    fn on_submitted_work_done(&mut self) -> Deferred<()> {
        let (handle, deferred) = deferred::channel();
        let fence = self.gl.fence_sync();
        self.gl.flush();
        self.pending_fences.push((fence, handle));
        deferred
    }

    fn poll(&mut self) {
        let pending = std::mem::take(&mut self.pending_fences);
        for (fence, handle) in pending {
            match self.gl.client_wait_sync(fence, 0) {
                gl::ALREADY_SIGNALED | gl::CONDITION_SATISFIED => {
                    self.gl.delete_sync(fence);
                    handle.resolve(());
                }
                gl::WAIT_FAILED => {
                    // A failed wait still resolves the signal; callers treat
                    // it as completion because the work can never be observed
                    // incomplete afterwards. See the queue docs.
                    tracing::warn!("fence wait failed; signaling completion anyway");
                    self.gl.delete_sync(fence);
                    handle.resolve(());
                }
                _ => self.pending_fences.push((fence, handle)),
            }
        }
    }
}

fn map_texture_format(format: TextureFormat) -> Result<(u32, u32, u32)> {
    match format {
        TextureFormat::R8Unorm => Ok((gl::R8, gl::RED, gl::UNSIGNED_BYTE)),
        TextureFormat::Rg8Unorm => Ok((gl::RG8, gl::RG, gl::UNSIGNED_BYTE)),
        TextureFormat::Rgba8Unorm => Ok((gl::RGBA8, gl::RGBA, gl::UNSIGNED_BYTE)),
        TextureFormat::Rgba16Float => Ok((gl::RGBA16F, gl::RGBA, gl::HALF_FLOAT)),
        TextureFormat::Rgba32Float => Ok((gl::RGBA32F, gl::RGBA, gl::FLOAT)),
        TextureFormat::Depth24Plus => {
            Ok((gl::DEPTH_COMPONENT24, gl::DEPTH_COMPONENT, gl::UNSIGNED_INT))
        }
        TextureFormat::Depth32Float => {
            Ok((gl::DEPTH_COMPONENT32F, gl::DEPTH_COMPONENT, gl::FLOAT))
        }
        TextureFormat::Bgra8Unorm | TextureFormat::Astc12x12Unorm => {
            Err(GfxError::UnsupportedFormat(format.name()))
        }
    }
}

fn map_compare(func: CompareFunction) -> u32 {
    match func {
        CompareFunction::Never => gl::NEVER,
        CompareFunction::Less => gl::LESS,
        CompareFunction::Equal => gl::EQUAL,
        CompareFunction::LessEqual => gl::LEQUAL,
        CompareFunction::Greater => gl::GREATER,
        CompareFunction::NotEqual => gl::NOTEQUAL,
        CompareFunction::GreaterEqual => gl::GEQUAL,
        CompareFunction::Always => gl::ALWAYS,
    }
}

fn map_address_mode(mode: AddressMode) -> u32 {
    match mode {
        AddressMode::ClampToEdge => gl::CLAMP_TO_EDGE,
        AddressMode::Repeat => gl::REPEAT,
        AddressMode::MirrorRepeat => gl::MIRRORED_REPEAT,
    }
}

fn map_filter(filter: FilterMode) -> u32 {
    match filter {
        FilterMode::Nearest => gl::NEAREST,
        FilterMode::Linear => gl::LINEAR,
    }
}

fn map_blend_factor(factor: BlendFactor) -> u32 {
    match factor {
        BlendFactor::Zero => gl::ZERO,
        BlendFactor::One => gl::ONE,
        BlendFactor::Src => gl::SRC_COLOR,
        BlendFactor::OneMinusSrc => gl::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => gl::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => gl::ONE_MINUS_SRC_ALPHA,
        BlendFactor::Dst => gl::DST_COLOR,
        BlendFactor::OneMinusDst => gl::ONE_MINUS_DST_COLOR,
        BlendFactor::DstAlpha => gl::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => gl::ONE_MINUS_DST_ALPHA,
    }
}

fn map_blend_operation(op: BlendOperation) -> u32 {
    match op {
        BlendOperation::Add => gl::FUNC_ADD,
        BlendOperation::Subtract => gl::FUNC_SUBTRACT,
        BlendOperation::ReverseSubtract => gl::FUNC_REVERSE_SUBTRACT,
        BlendOperation::Min => gl::MIN,
        BlendOperation::Max => gl::MAX,
    }
}

fn map_topology(topology: PrimitiveTopology) -> u32 {
    match topology {
        PrimitiveTopology::PointList => gl::POINTS,
        PrimitiveTopology::LineList => gl::LINES,
        PrimitiveTopology::LineStrip => gl::LINE_STRIP,
        PrimitiveTopology::TriangleList => gl::TRIANGLES,
        PrimitiveTopology::TriangleStrip => gl::TRIANGLE_STRIP,
    }
}

fn map_cull_mode(mode: CullMode) -> u32 {
    match mode {
        CullMode::Front => gl::FRONT,
        CullMode::Back => gl::BACK,
    }
}

fn map_front_face(face: FrontFace) -> u32 {
    match face {
        FrontFace::Ccw => gl::CCW,
        FrontFace::Cw => gl::CW,
    }
}

fn map_vertex_format(format: VertexFormat) -> (u32, u32, bool) {
    match format {
        VertexFormat::Float32 => (1, gl::FLOAT, false),
        VertexFormat::Float32x2 => (2, gl::FLOAT, false),
        VertexFormat::Float32x3 => (3, gl::FLOAT, false),
        VertexFormat::Float32x4 => (4, gl::FLOAT, false),
        VertexFormat::Uint32 => (1, gl::UNSIGNED_INT, false),
        VertexFormat::Sint32 => (1, gl::INT, false),
        VertexFormat::Unorm8x4 => (4, gl::UNSIGNED_BYTE, true),
    }
}

fn map_index_format(format: IndexFormat) -> (u32, u64) {
    match format {
        IndexFormat::Uint16 => (gl::UNSIGNED_SHORT, 2),
        IndexFormat::Uint32 => (gl::UNSIGNED_INT, 4),
    }
}

fn buffer_target_for_usage(usage: BufferUsages) -> u32 {
    if usage.contains(BufferUsages::INDEX) {
        gl::ELEMENT_ARRAY_BUFFER
    } else if usage.contains(BufferUsages::VERTEX) {
        gl::ARRAY_BUFFER
    } else if usage.contains(BufferUsages::UNIFORM) {
        gl::UNIFORM_BUFFER
    } else {
        gl::COPY_WRITE_BUFFER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TEXTURE_FORMATS: [TextureFormat; 9] = [
        TextureFormat::R8Unorm,
        TextureFormat::Rg8Unorm,
        TextureFormat::Rgba8Unorm,
        TextureFormat::Bgra8Unorm,
        TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float,
        TextureFormat::Depth24Plus,
        TextureFormat::Depth32Float,
        TextureFormat::Astc12x12Unorm,
    ];

    #[test]
    fn every_texture_format_maps_or_names_itself() {
        let backend = GlBackend::new(SoftGl::new());
        for format in ALL_TEXTURE_FORMATS {
            match map_texture_format(format) {
                Ok((internal, external, ty)) => {
                    assert!(
                        backend.capabilities.supported_formats.contains(&format),
                        "{} maps but is not advertised",
                        format.name()
                    );
                    assert_ne!(internal, 0);
                    assert_ne!(external, 0);
                    assert_ne!(ty, 0);
                }
                Err(GfxError::UnsupportedFormat(name)) => {
                    assert_eq!(name, format.name());
                    assert!(
                        !backend.capabilities.supported_formats.contains(&format),
                        "{} is advertised but does not map",
                        format.name()
                    );
                }
                Err(other) => panic!("unexpected error for {}: {other:?}", format.name()),
            }
        }
    }

    #[test]
    fn vertex_format_components_match_declared_sizes() {
        let all = [
            VertexFormat::Float32,
            VertexFormat::Float32x2,
            VertexFormat::Float32x3,
            VertexFormat::Float32x4,
            VertexFormat::Uint32,
            VertexFormat::Sint32,
            VertexFormat::Unorm8x4,
        ];
        for format in all {
            let (components, ty, normalized) = map_vertex_format(format);
            let component_bytes = match ty {
                gl::UNSIGNED_BYTE => 1,
                gl::FLOAT | gl::UNSIGNED_INT | gl::INT => 4,
                other => panic!("unexpected component type {other:#x}"),
            };
            assert_eq!(
                u64::from(components) * component_bytes,
                format.size(),
                "{} component layout disagrees with its byte size",
                format.name()
            );
            assert_eq!(normalized, ty == gl::UNSIGNED_BYTE);
        }
    }

    #[test]
    fn index_formats_map_to_matching_element_sizes() {
        assert_eq!(
            map_index_format(IndexFormat::Uint16),
            (gl::UNSIGNED_SHORT, 2)
        );
        assert_eq!(map_index_format(IndexFormat::Uint32), (gl::UNSIGNED_INT, 4));
    }
}
