//! Deterministic software backend.
//!
//! No GPU work happens; resources live in memory and submitted command
//! streams are appended to an inspectable execution log. This is the backend
//! integration tests run against, and it models the deferred execution
//! contract: nothing runs at encode time, submit replays streams in array
//! order.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::backend::{BackendKind, ExecutionModel, GpuBackend, TextureWrite};
use crate::caps::Capabilities;
use crate::cmd::GpuCmd;
use crate::deferred::{self, Deferred, DeferredHandle};
use crate::error::{GfxError, Result};
use crate::pipeline::{
    BindGroupDesc, BindGroupLayoutDesc, ComputePipelineDesc, PipelineLayoutKind,
    RenderPipelineDesc, ShaderModuleDesc,
};
use crate::registry::{
    BindGroupId, BindGroupLayoutId, BindGroupLayoutTag, BindGroupTag, BufferId, BufferTag,
    PipelineId, PipelineLayoutId, PipelineLayoutTag, PipelineTag, Registry, SamplerId, SamplerTag,
    ShaderModuleId, ShaderModuleTag, TextureId, TextureTag, TextureViewId, TextureViewTag,
};
use crate::resource::{Buffer, BufferDesc, SamplerDesc, TextureDesc, TextureViewDesc};

/// Marker in shader source that makes compilation fail; lets tests exercise
/// the deferred rejection path without a real compiler.
const COMPILE_FAIL_MARKER: &str = "#error";

struct SoftBuffer {
    data: Vec<u8>,
}

struct SoftTexture {
    #[allow(dead_code)]
    desc: TextureDesc,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PipelineFlavor {
    Render,
    Compute,
}

struct SoftPipeline {
    flavor: PipelineFlavor,
    auto_layout: bool,
    auto_layouts: HashMap<u32, BindGroupLayoutId>,
}

struct SoftState {
    buffers: Registry<BufferTag, SoftBuffer>,
    textures: Registry<TextureTag, SoftTexture>,
    views: Registry<TextureViewTag, TextureId>,
    samplers: Registry<SamplerTag, SamplerDesc>,
    shaders: Registry<ShaderModuleTag, String>,
    bind_group_layouts: Registry<BindGroupLayoutTag, usize>,
    pipeline_layouts: Registry<PipelineLayoutTag, Vec<BindGroupLayoutId>>,
    bind_groups: Registry<BindGroupTag, ()>,
    pipelines: Registry<PipelineTag, SoftPipeline>,
    executed: Vec<GpuCmd>,
    pending_done: Vec<DeferredHandle<()>>,
}

impl SoftState {
    fn new() -> Self {
        Self {
            buffers: Registry::new("buffer"),
            textures: Registry::new("texture"),
            views: Registry::new("texture_view"),
            samplers: Registry::new("sampler"),
            shaders: Registry::new("shader_module"),
            bind_group_layouts: Registry::new("bind_group_layout"),
            pipeline_layouts: Registry::new("pipeline_layout"),
            bind_groups: Registry::new("bind_group"),
            pipelines: Registry::new("pipeline"),
            executed: Vec::new(),
            pending_done: Vec::new(),
        }
    }
}

/// Cloneable handle: tests keep one clone for inspection while the device
/// owns another.
#[derive(Clone)]
pub struct SoftBackend {
    capabilities: Capabilities,
    state: Rc<RefCell<SoftState>>,
}

impl Default for SoftBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftBackend {
    pub fn new() -> Self {
        Self {
            capabilities: Capabilities::default(),
            state: Rc::new(RefCell::new(SoftState::new())),
        }
    }

    /// Commands executed so far, in execution order.
    pub fn executed(&self) -> Vec<GpuCmd> {
        self.state.borrow().executed.clone()
    }

    pub fn clear_executed(&self) {
        self.state.borrow_mut().executed.clear();
    }

    pub fn buffer_contents(&self, buffer: &Buffer) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .buffers
            .get(buffer.id)
            .ok()
            .map(|b| b.data.clone())
    }
}

impl GpuBackend for SoftBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Soft
    }

    fn execution(&self) -> ExecutionModel {
        ExecutionModel::Deferred
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId> {
        let size = usize::try_from(desc.size)
            .map_err(|_| GfxError::Validation("buffer size exceeds host memory range".into()))?;
        Ok(self.state.borrow_mut().buffers.insert(SoftBuffer {
            data: vec![0; size],
        }))
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let entry = state.buffers.get_mut(buffer)?;
        let offset = offset as usize;
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= entry.data.len())
            .ok_or_else(|| GfxError::Backend("write_buffer out of bounds".into()))?;
        entry.data[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        Ok(self
            .state
            .borrow_mut()
            .textures
            .insert(SoftTexture { desc: desc.clone() }))
    }

    fn write_texture(&mut self, write: &TextureWrite, _data: &[u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.textures.get_mut(write.texture)?;
        Ok(())
    }

    fn create_texture_view(
        &mut self,
        texture: TextureId,
        _desc: &TextureViewDesc,
    ) -> Result<TextureViewId> {
        let mut state = self.state.borrow_mut();
        state.textures.get(texture)?;
        Ok(state.views.insert(texture))
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId> {
        Ok(self.state.borrow_mut().samplers.insert(desc.clone()))
    }

    fn create_shader_module(&mut self, desc: &ShaderModuleDesc) -> Result<ShaderModuleId> {
        Ok(self.state.borrow_mut().shaders.insert(desc.source.clone()))
    }

    fn create_bind_group_layout(
        &mut self,
        desc: &BindGroupLayoutDesc,
    ) -> Result<BindGroupLayoutId> {
        Ok(self
            .state
            .borrow_mut()
            .bind_group_layouts
            .insert(desc.entries.len()))
    }

    fn create_pipeline_layout(
        &mut self,
        _label: Option<&str>,
        bind_group_layouts: &[BindGroupLayoutId],
    ) -> Result<PipelineLayoutId> {
        let mut state = self.state.borrow_mut();
        for id in bind_group_layouts {
            state.bind_group_layouts.get(*id)?;
        }
        Ok(state.pipeline_layouts.insert(bind_group_layouts.to_vec()))
    }

    fn create_bind_group(&mut self, desc: &BindGroupDesc) -> Result<BindGroupId> {
        let mut state = self.state.borrow_mut();
        state.bind_group_layouts.get(desc.layout.id)?;
        Ok(state.bind_groups.insert(()))
    }

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDesc) -> Result<PipelineId> {
        let mut state = self.state.borrow_mut();
        let vertex_source = state.shaders.get(desc.vertex.module.id)?.clone();
        if vertex_source.contains(COMPILE_FAIL_MARKER) {
            return Err(GfxError::Compilation(
                "vertex shader failed to compile".into(),
            ));
        }
        if let Some(fragment) = &desc.fragment {
            let fragment_source = state.shaders.get(fragment.module.id)?;
            if fragment_source.contains(COMPILE_FAIL_MARKER) {
                return Err(GfxError::Compilation(
                    "fragment shader failed to compile".into(),
                ));
            }
        }
        Ok(state.pipelines.insert(SoftPipeline {
            flavor: PipelineFlavor::Render,
            auto_layout: matches!(desc.layout, PipelineLayoutKind::Auto),
            auto_layouts: HashMap::new(),
        }))
    }

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> Result<PipelineId> {
        let mut state = self.state.borrow_mut();
        let source = state.shaders.get(desc.module.id)?.clone();
        if source.contains(COMPILE_FAIL_MARKER) {
            return Err(GfxError::Compilation(
                "compute shader failed to compile".into(),
            ));
        }
        Ok(state.pipelines.insert(SoftPipeline {
            flavor: PipelineFlavor::Compute,
            auto_layout: matches!(desc.layout, PipelineLayoutKind::Auto),
            auto_layouts: HashMap::new(),
        }))
    }

    fn pipeline_auto_layout(
        &mut self,
        pipeline: PipelineId,
        group: u32,
    ) -> Result<BindGroupLayoutId> {
        let mut state = self.state.borrow_mut();
        let auto_layout = state.pipelines.get(pipeline)?.auto_layout;
        if !auto_layout {
            return Err(GfxError::State("pipeline does not use an auto layout"));
        }
        if let Some(id) = state.pipelines.get(pipeline)?.auto_layouts.get(&group) {
            return Ok(*id);
        }
        let id = state.bind_group_layouts.insert(0);
        state
            .pipelines
            .get_mut(pipeline)?
            .auto_layouts
            .insert(group, id);
        Ok(id)
    }

    fn execute_immediate(&mut self, _cmd: &GpuCmd) -> Result<()> {
        Err(GfxError::Backend(
            "soft backend executes at submit time, not encode time".into(),
        ))
    }

    fn submit(&mut self, streams: &[Vec<GpuCmd>]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        for stream in streams {
            validate_stream(&state, stream)?;
        }
        for stream in streams {
            state.executed.extend(stream.iter().cloned());
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_submitted_work_done(&mut self) -> Deferred<()> {
        let (handle, deferred) = deferred::channel();
        self.state.borrow_mut().pending_done.push(handle);
        deferred
    }

    fn poll(&mut self) {
        // All submitted work completed synchronously at submit; signal every
        // outstanding completion on the next host frame.
        let pending: Vec<_> = self.state.borrow_mut().pending_done.drain(..).collect();
        for handle in pending {
            handle.resolve(());
        }
    }
}

fn validate_stream(state: &SoftState, stream: &[GpuCmd]) -> Result<()> {
    let mut open: Option<PipelineFlavor> = None;
    for cmd in stream {
        match cmd {
            GpuCmd::BeginRenderPass { .. } => {
                if open.is_some() {
                    return Err(GfxError::Backend("nested pass in command stream".into()));
                }
                open = Some(PipelineFlavor::Render);
            }
            GpuCmd::BeginComputePass { .. } => {
                if open.is_some() {
                    return Err(GfxError::Backend("nested pass in command stream".into()));
                }
                open = Some(PipelineFlavor::Compute);
            }
            GpuCmd::EndRenderPass => {
                if open != Some(PipelineFlavor::Render) {
                    return Err(GfxError::Backend("unmatched EndRenderPass".into()));
                }
                open = None;
            }
            GpuCmd::EndComputePass => {
                if open != Some(PipelineFlavor::Compute) {
                    return Err(GfxError::Backend("unmatched EndComputePass".into()));
                }
                open = None;
            }
            GpuCmd::SetPipeline(id) => {
                let flavor = state.pipelines.get(*id)?.flavor;
                match open {
                    Some(pass) if pass == flavor => {}
                    Some(_) => {
                        return Err(GfxError::Backend(
                            "pipeline flavor does not match the open pass".into(),
                        ))
                    }
                    None => {
                        return Err(GfxError::Backend("SetPipeline outside a pass".into()));
                    }
                }
            }
            GpuCmd::SetBindGroup { bind_group, .. } => {
                state.bind_groups.get(*bind_group)?;
            }
            GpuCmd::SetVertexBuffer { buffer, .. } | GpuCmd::SetIndexBuffer { buffer, .. } => {
                state.buffers.get(*buffer)?;
            }
            GpuCmd::Draw { .. } | GpuCmd::DrawIndexed { .. } => {
                if open != Some(PipelineFlavor::Render) {
                    return Err(GfxError::Backend("draw outside a render pass".into()));
                }
            }
            GpuCmd::Dispatch { .. } => {
                if open != Some(PipelineFlavor::Compute) {
                    return Err(GfxError::Backend("dispatch outside a compute pass".into()));
                }
            }
        }
    }
    if open.is_some() {
        return Err(GfxError::Backend("unterminated pass in command stream".into()));
    }
    Ok(())
}
