//! Device: the factory and capability surface for one backend instance.
//!
//! Every creation call validates the descriptor synchronously and fails fast;
//! only pipeline creation has async variants, and those surface compilation
//! failures through the deferred result instead of returning them.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::backend::{BackendKind, GpuBackend};
use crate::caps::Capabilities;
use crate::deferred::{self, Deferred};
use crate::encoder::CommandEncoder;
use crate::error::{GfxError, Result};
use crate::pipeline::{
    BindGroup, BindGroupDesc, BindGroupLayout, BindGroupLayoutDesc, BindingResource, BindingType,
    ComputePipeline, ComputePipelineDesc, PipelineLayout, PipelineLayoutDesc, PipelineLayoutKind,
    RenderPipeline, RenderPipelineDesc, ShaderModule, ShaderModuleDesc,
};
use crate::queue::Queue;
use crate::resource::{
    Buffer, BufferDesc, Sampler, SamplerDesc, Texture, TextureDesc, TextureView, TextureViewDesc,
};

pub(crate) struct DeviceShared {
    pub(crate) backend: Box<dyn GpuBackend>,
}

/// Owns all handles created through it; dropping the device invalidates them.
pub struct Device {
    shared: Rc<RefCell<DeviceShared>>,
}

impl Device {
    pub fn with_backend(backend: impl GpuBackend + 'static) -> Self {
        Self {
            shared: Rc::new(RefCell::new(DeviceShared {
                backend: Box::new(backend),
            })),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.shared.borrow().backend.kind()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.shared.borrow().backend.capabilities().clone()
    }

    pub fn queue(&self) -> Queue {
        Queue::new(Rc::clone(&self.shared))
    }

    /// Host per-frame tick. Drives completion polling on backends that need
    /// it; harmless to call on backends that do not.
    pub fn poll(&self) {
        self.shared.borrow_mut().backend.poll();
    }

    pub fn create_buffer(&self, desc: &BufferDesc) -> Result<Buffer> {
        if desc.usage.is_empty() {
            return Err(GfxError::Validation(
                "buffer usage mask must not be empty".into(),
            ));
        }
        let id = self.shared.borrow_mut().backend.create_buffer(desc)?;
        Ok(Buffer {
            id,
            size: desc.size,
            usage: desc.usage,
            label: desc.label.clone(),
        })
    }

    pub fn create_texture(&self, desc: &TextureDesc) -> Result<Texture> {
        let size = desc.size;
        if size.width == 0 || size.height == 0 || size.depth_or_array_layers == 0 {
            return Err(GfxError::Validation(
                "texture dimensions must be non-zero".into(),
            ));
        }
        if desc.mip_level_count == 0 {
            return Err(GfxError::Validation(
                "texture mip_level_count must be >= 1".into(),
            ));
        }
        if desc.sample_count == 0 {
            return Err(GfxError::Validation(
                "texture sample_count must be >= 1".into(),
            ));
        }
        let max_dim = size.width.max(size.height);
        let max_mip_levels = 32u32.saturating_sub(max_dim.leading_zeros());
        if desc.mip_level_count > max_mip_levels {
            return Err(GfxError::Validation(format!(
                "texture mip_level_count {} exceeds maximum {max_mip_levels} for {}x{}",
                desc.mip_level_count, size.width, size.height
            )));
        }

        let mut shared = self.shared.borrow_mut();
        if !shared.backend.capabilities().supports_format(desc.format) {
            return Err(GfxError::UnsupportedFormat(desc.format.name()));
        }
        let limit = shared.backend.capabilities().max_texture_dimension_2d;
        if max_dim > limit {
            return Err(GfxError::Validation(format!(
                "texture dimension {max_dim} exceeds device limit {limit}"
            )));
        }

        let id = shared.backend.create_texture(desc)?;
        Ok(Texture {
            id,
            size,
            mip_level_count: desc.mip_level_count,
            format: desc.format,
            usage: desc.usage,
            label: desc.label.clone(),
        })
    }

    pub fn create_texture_view(
        &self,
        texture: &Texture,
        desc: &TextureViewDesc,
    ) -> Result<TextureView> {
        let id = self
            .shared
            .borrow_mut()
            .backend
            .create_texture_view(texture.id, desc)?;
        Ok(TextureView {
            id,
            label: desc.label.clone(),
        })
    }

    pub fn create_sampler(&self, desc: &SamplerDesc) -> Result<Sampler> {
        let id = self.shared.borrow_mut().backend.create_sampler(desc)?;
        Ok(Sampler {
            id,
            label: desc.label.clone(),
        })
    }

    pub fn create_shader_module(&self, desc: &ShaderModuleDesc) -> Result<ShaderModule> {
        if desc.source.is_empty() {
            return Err(GfxError::Validation("shader source must not be empty".into()));
        }
        let id = self.shared.borrow_mut().backend.create_shader_module(desc)?;
        Ok(ShaderModule {
            id,
            label: desc.label.clone(),
        })
    }

    pub fn create_bind_group_layout(&self, desc: &BindGroupLayoutDesc) -> Result<BindGroupLayout> {
        let mut seen = HashSet::new();
        for entry in &desc.entries {
            if !seen.insert(entry.binding) {
                return Err(GfxError::Validation(format!(
                    "bind group layout declares binding {} more than once",
                    entry.binding
                )));
            }
        }
        let id = self
            .shared
            .borrow_mut()
            .backend
            .create_bind_group_layout(desc)?;
        Ok(BindGroupLayout {
            id,
            label: desc.label.clone(),
            entries: desc.entries.clone(),
            derived: false,
        })
    }

    pub fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> Result<PipelineLayout> {
        let mut shared = self.shared.borrow_mut();
        let max_bind_groups = shared.backend.capabilities().max_bind_groups;
        if desc.bind_group_layouts.len() as u32 > max_bind_groups {
            return Err(GfxError::Validation(format!(
                "pipeline layout uses {} bind group layouts, device limit is {max_bind_groups}",
                desc.bind_group_layouts.len()
            )));
        }
        let ids: Vec<_> = desc.bind_group_layouts.iter().map(|l| l.id).collect();
        let id = shared
            .backend
            .create_pipeline_layout(desc.label.as_deref(), &ids)?;
        Ok(PipelineLayout {
            id,
            label: desc.label.clone(),
        })
    }

    /// A bind group must supply exactly the slots its layout declares, each
    /// with a kind-compatible resource.
    pub fn create_bind_group(&self, desc: &BindGroupDesc) -> Result<BindGroup> {
        if !desc.layout.derived {
            validate_bind_group_against_layout(desc)?;
        }
        for entry in &desc.entries {
            if let BindingResource::Buffer {
                buffer,
                offset,
                size,
            } = &entry.resource
            {
                let bound = size.unwrap_or(buffer.size().saturating_sub(*offset));
                let end = offset.checked_add(bound).ok_or_else(|| {
                    GfxError::Validation("bind group buffer range overflows".into())
                })?;
                if end > buffer.size() {
                    return Err(GfxError::Validation(format!(
                        "bind group binding {} exceeds buffer bounds (offset={offset}, size={bound}, buffer_size={})",
                        entry.binding,
                        buffer.size()
                    )));
                }
            }
        }
        let id = self.shared.borrow_mut().backend.create_bind_group(desc)?;
        Ok(BindGroup {
            id,
            label: desc.label.clone(),
        })
    }

    pub fn create_render_pipeline(&self, desc: &RenderPipelineDesc) -> Result<RenderPipeline> {
        self.validate_render_pipeline(desc)?;
        let id = self
            .shared
            .borrow_mut()
            .backend
            .create_render_pipeline(desc)?;
        Ok(RenderPipeline {
            id,
            label: desc.label.clone(),
            auto_layout: matches!(desc.layout, PipelineLayoutKind::Auto),
            shared: Rc::clone(&self.shared),
        })
    }

    /// Deferred variant of [`create_render_pipeline`](Self::create_render_pipeline).
    ///
    /// Compilation failures reject the deferred result; they are never raised
    /// synchronously from this call.
    pub fn create_render_pipeline_async(&self, desc: &RenderPipelineDesc) -> Deferred<RenderPipeline> {
        let (handle, deferred) = deferred::channel();
        match self.create_render_pipeline(desc) {
            Ok(pipeline) => handle.resolve(pipeline),
            Err(err) => handle.reject(err),
        }
        deferred
    }

    pub fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> Result<ComputePipeline> {
        {
            let shared = self.shared.borrow();
            if !shared.backend.capabilities().supports_compute {
                return Err(GfxError::UnsupportedFeature("compute-pipelines"));
            }
        }
        if desc.entry_point.is_empty() {
            return Err(GfxError::Validation(
                "compute pipeline entry point must not be empty".into(),
            ));
        }
        let id = self
            .shared
            .borrow_mut()
            .backend
            .create_compute_pipeline(desc)?;
        Ok(ComputePipeline {
            id,
            label: desc.label.clone(),
            auto_layout: matches!(desc.layout, PipelineLayoutKind::Auto),
            shared: Rc::clone(&self.shared),
        })
    }

    pub fn create_compute_pipeline_async(
        &self,
        desc: &ComputePipelineDesc,
    ) -> Deferred<ComputePipeline> {
        let (handle, deferred) = deferred::channel();
        match self.create_compute_pipeline(desc) {
            Ok(pipeline) => handle.resolve(pipeline),
            Err(err) => handle.reject(err),
        }
        deferred
    }

    pub fn create_command_encoder(&self, label: Option<&str>) -> CommandEncoder {
        CommandEncoder::new(Rc::clone(&self.shared), label.map(str::to_owned))
    }

    fn validate_render_pipeline(&self, desc: &RenderPipelineDesc) -> Result<()> {
        if desc.vertex.entry_point.is_empty() {
            return Err(GfxError::Validation(
                "vertex entry point must not be empty".into(),
            ));
        }
        if desc.multisample.count == 0 {
            return Err(GfxError::Validation(
                "multisample count must be >= 1".into(),
            ));
        }

        let shared = self.shared.borrow();
        let caps = shared.backend.capabilities();
        if let Some(fragment) = &desc.fragment {
            if fragment.entry_point.is_empty() {
                return Err(GfxError::Validation(
                    "fragment entry point must not be empty".into(),
                ));
            }
            if fragment.targets.len() as u32 > caps.max_color_attachments {
                return Err(GfxError::Validation(format!(
                    "pipeline declares {} color targets, device limit is {}",
                    fragment.targets.len(),
                    caps.max_color_attachments
                )));
            }
            for target in fragment.targets.iter().flatten() {
                if !caps.supports_format(target.format) {
                    return Err(GfxError::UnsupportedFormat(target.format.name()));
                }
            }
        }
        if let Some(depth_stencil) = &desc.depth_stencil {
            if !depth_stencil.format.is_depth() {
                return Err(GfxError::Validation(format!(
                    "depth-stencil state uses non-depth format {}",
                    depth_stencil.format.name()
                )));
            }
            if !caps.supports_format(depth_stencil.format) {
                return Err(GfxError::UnsupportedFormat(depth_stencil.format.name()));
            }
        }
        Ok(())
    }
}

fn validate_bind_group_against_layout(desc: &BindGroupDesc) -> Result<()> {
    let layout = &desc.layout;
    if desc.entries.len() != layout.entries.len() {
        return Err(GfxError::Validation(format!(
            "bind group supplies {} entries, layout declares {}",
            desc.entries.len(),
            layout.entries.len()
        )));
    }
    for entry in &desc.entries {
        let declared = layout
            .entries
            .iter()
            .find(|layout_entry| layout_entry.binding == entry.binding)
            .ok_or_else(|| {
                GfxError::Validation(format!(
                    "bind group supplies binding {} which the layout does not declare",
                    entry.binding
                ))
            })?;
        let compatible = matches!(
            (&declared.ty, &entry.resource),
            (BindingType::UniformBuffer { .. }, BindingResource::Buffer { .. })
                | (BindingType::Sampler { .. }, BindingResource::Sampler(_))
                | (BindingType::Texture { .. }, BindingResource::TextureView(_))
        );
        if !compatible {
            return Err(GfxError::Validation(format!(
                "bind group binding {} resource kind does not match the layout",
                entry.binding
            )));
        }
    }
    Ok(())
}
