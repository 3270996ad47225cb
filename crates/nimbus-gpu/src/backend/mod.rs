//! GPU backend abstraction.
//!
//! The device front end is backend-agnostic. Each backend carries a tag
//! ([`BackendKind`]) and an execution model: deferred backends replay command
//! streams at submit time, immediate backends execute each command as it is
//! recorded. Dispatch is a tag check plus a trait call; handles are never
//! structurally inspected.

pub mod gl;
mod soft;
mod wgpu_backend;

pub use soft::SoftBackend;
pub use wgpu_backend::WgpuBackend;

use crate::caps::Capabilities;
use crate::cmd::GpuCmd;
use crate::deferred::Deferred;
use crate::error::Result;
use crate::pipeline::{
    BindGroupDesc, BindGroupLayoutDesc, ComputePipelineDesc, RenderPipelineDesc, ShaderModuleDesc,
};
use crate::registry::{
    BindGroupId, BindGroupLayoutId, BufferId, PipelineId, PipelineLayoutId, SamplerId,
    ShaderModuleId, TextureId, TextureViewId,
};
use crate::resource::{BufferDesc, ImageDataLayout, SamplerDesc, TextureDesc, TextureViewDesc};
use crate::types::{Extent3d, Origin3d};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Wgpu,
    Gl,
    Soft,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Wgpu => "wgpu",
            Self::Gl => "gl",
            Self::Soft => "soft",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionModel {
    /// Commands execute at submit time, in submission order.
    Deferred,
    /// Commands execute at encode time; submit is only a flush and ordering
    /// is only as strong as encode order.
    Immediate,
}

/// Backend-facing texture write region. Bounds are validated by the queue
/// before this reaches a backend.
#[derive(Clone, Copy, Debug)]
pub struct TextureWrite {
    pub texture: TextureId,
    pub mip_level: u32,
    pub origin: Origin3d,
    pub size: Extent3d,
    pub layout: ImageDataLayout,
}

pub trait GpuBackend {
    fn kind(&self) -> BackendKind;
    fn execution(&self) -> ExecutionModel;
    fn capabilities(&self) -> &Capabilities;

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId>;
    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()>;

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId>;
    fn write_texture(&mut self, write: &TextureWrite, data: &[u8]) -> Result<()>;
    fn create_texture_view(
        &mut self,
        texture: TextureId,
        desc: &TextureViewDesc,
    ) -> Result<TextureViewId>;

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId>;
    fn create_shader_module(&mut self, desc: &ShaderModuleDesc) -> Result<ShaderModuleId>;
    fn create_bind_group_layout(&mut self, desc: &BindGroupLayoutDesc)
        -> Result<BindGroupLayoutId>;
    fn create_pipeline_layout(
        &mut self,
        label: Option<&str>,
        bind_group_layouts: &[BindGroupLayoutId],
    ) -> Result<PipelineLayoutId>;
    fn create_bind_group(&mut self, desc: &BindGroupDesc) -> Result<BindGroupId>;

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDesc) -> Result<PipelineId>;
    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> Result<PipelineId>;
    /// Layout the backend derived for `group` on an auto-layout pipeline.
    fn pipeline_auto_layout(
        &mut self,
        pipeline: PipelineId,
        group: u32,
    ) -> Result<BindGroupLayoutId>;

    /// Executes one command now. Only meaningful for immediate backends.
    fn execute_immediate(&mut self, cmd: &GpuCmd) -> Result<()>;
    /// Executes recorded streams in array order. Only meaningful for deferred
    /// backends.
    fn submit(&mut self, streams: &[Vec<GpuCmd>]) -> Result<()>;
    /// Device-level flush for immediate backends; a no-op elsewhere.
    fn flush(&mut self) -> Result<()>;

    /// Completion signal for all work submitted so far.
    fn on_submitted_work_done(&mut self) -> Deferred<()>;
    /// Host per-frame tick: advances fence polling and backend maintenance.
    fn poll(&mut self);
}
