//! Shader, bind-group, and pipeline descriptors plus their handles.

use std::cell::RefCell;
use std::rc::Rc;

use crate::device::DeviceShared;
use crate::error::{GfxError, Result};
use crate::registry::{
    BindGroupId, BindGroupLayoutId, PipelineId, PipelineLayoutId, ShaderModuleId,
};
use crate::resource::{Buffer, Sampler, TextureView};
use crate::types::{
    BlendFactor, BlendOperation, ColorWrites, CompareFunction, CullMode, FrontFace,
    PrimitiveTopology, ShaderStages, TextureFormat, VertexFormat, VertexStepMode,
};

/// Shader source is passed through as opaque text; the kernel never parses it.
#[derive(Clone, Debug)]
pub struct ShaderModuleDesc {
    pub label: Option<String>,
    pub source: String,
}

#[derive(Clone, Debug)]
pub struct ShaderModule {
    pub(crate) id: ShaderModuleId,
    pub(crate) label: Option<String>,
}

impl ShaderModule {
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindingType {
    UniformBuffer {
        dynamic: bool,
        min_size: Option<u64>,
    },
    Sampler {
        comparison: bool,
    },
    Texture {
        filterable: bool,
    },
}

#[derive(Clone, Debug)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStages,
    pub ty: BindingType,
}

#[derive(Clone, Debug, Default)]
pub struct BindGroupLayoutDesc {
    pub label: Option<String>,
    pub entries: Vec<BindGroupLayoutEntry>,
}

#[derive(Clone, Debug)]
pub struct BindGroupLayout {
    pub(crate) id: BindGroupLayoutId,
    pub(crate) label: Option<String>,
    pub(crate) entries: Vec<BindGroupLayoutEntry>,
    /// Layouts derived from an auto-layout pipeline carry no entry list; the
    /// front end skips slot-coverage validation for them.
    pub(crate) derived: bool,
}

impl BindGroupLayout {
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

#[derive(Clone, Debug, Default)]
pub struct PipelineLayoutDesc {
    pub label: Option<String>,
    pub bind_group_layouts: Vec<BindGroupLayout>,
}

#[derive(Clone, Debug)]
pub struct PipelineLayout {
    pub(crate) id: PipelineLayoutId,
    pub(crate) label: Option<String>,
}

impl PipelineLayout {
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

#[derive(Clone, Debug)]
pub enum BindingResource {
    Buffer {
        buffer: Buffer,
        offset: u64,
        size: Option<u64>,
    },
    Sampler(Sampler),
    TextureView(TextureView),
}

#[derive(Clone, Debug)]
pub struct BindGroupEntry {
    pub binding: u32,
    pub resource: BindingResource,
}

#[derive(Clone, Debug)]
pub struct BindGroupDesc {
    pub label: Option<String>,
    pub layout: BindGroupLayout,
    pub entries: Vec<BindGroupEntry>,
}

#[derive(Clone, Debug)]
pub struct BindGroup {
    pub(crate) id: BindGroupId,
    pub(crate) label: Option<String>,
}

impl BindGroup {
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct VertexAttribute {
    pub format: VertexFormat,
    pub offset: u64,
    pub shader_location: u32,
}

#[derive(Clone, Debug)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub step_mode: VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Clone, Debug)]
pub struct VertexState {
    pub module: ShaderModule,
    pub entry_point: String,
    /// Pipeline-overridable constants. Not part of the pipeline cache key.
    pub constants: Vec<(String, f64)>,
    pub buffers: Vec<VertexBufferLayout>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub operation: BlendOperation,
}

impl BlendComponent {
    pub const REPLACE: Self = Self {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::Zero,
        operation: BlendOperation::Add,
    };
}

impl Default for BlendComponent {
    fn default() -> Self {
        Self::REPLACE
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

impl BlendState {
    pub const ALPHA_BLENDING: Self = Self {
        color: BlendComponent {
            src_factor: BlendFactor::SrcAlpha,
            dst_factor: BlendFactor::OneMinusSrcAlpha,
            operation: BlendOperation::Add,
        },
        alpha: BlendComponent {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::OneMinusSrcAlpha,
            operation: BlendOperation::Add,
        },
    };
}

#[derive(Clone, Debug)]
pub struct ColorTargetState {
    pub format: TextureFormat,
    pub blend: Option<BlendState>,
    pub write_mask: ColorWrites,
}

#[derive(Clone, Debug)]
pub struct FragmentState {
    pub module: ShaderModule,
    pub entry_point: String,
    pub constants: Vec<(String, f64)>,
    /// Slots may be `None`; slot indices are preserved.
    pub targets: Vec<Option<ColorTargetState>>,
}

/// Unset fields take WebGPU defaults: `triangle-list`, no culling, `ccw`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrimitiveState {
    pub topology: Option<PrimitiveTopology>,
    pub cull_mode: Option<CullMode>,
    pub front_face: Option<FrontFace>,
}

#[derive(Clone, Debug)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
    /// Stencil masks are not part of the pipeline cache key.
    pub stencil_read_mask: u32,
    pub stencil_write_mask: u32,
}

impl DepthStencilState {
    pub fn new(format: TextureFormat) -> Self {
        Self {
            format,
            depth_write_enabled: false,
            depth_compare: CompareFunction::Always,
            stencil_read_mask: !0,
            stencil_write_mask: !0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MultisampleState {
    pub count: u32,
}

impl Default for MultisampleState {
    fn default() -> Self {
        Self { count: 1 }
    }
}

/// Pipeline layout selection: explicit, or derived by the backend from the
/// shader interface ("auto").
#[derive(Clone, Debug)]
pub enum PipelineLayoutKind {
    Auto,
    Explicit(PipelineLayout),
}

#[derive(Clone, Debug)]
pub struct RenderPipelineDesc {
    pub label: Option<String>,
    pub layout: PipelineLayoutKind,
    pub vertex: VertexState,
    pub fragment: Option<FragmentState>,
    pub primitive: PrimitiveState,
    pub depth_stencil: Option<DepthStencilState>,
    pub multisample: MultisampleState,
}

#[derive(Clone, Debug)]
pub struct ComputePipelineDesc {
    pub label: Option<String>,
    pub layout: PipelineLayoutKind,
    pub module: ShaderModule,
    pub entry_point: String,
    pub constants: Vec<(String, f64)>,
}

#[derive(Clone)]
pub struct RenderPipeline {
    pub(crate) id: PipelineId,
    pub(crate) label: Option<String>,
    pub(crate) auto_layout: bool,
    pub(crate) shared: Rc<RefCell<DeviceShared>>,
}

impl RenderPipeline {
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Returns the layout the backend derived for `group`.
    ///
    /// Only meaningful for pipelines created with [`PipelineLayoutKind::Auto`];
    /// pipelines built against an explicit layout already know their layouts
    /// and this call fails with a state error.
    pub fn get_bind_group_layout(&self, group: u32) -> Result<BindGroupLayout> {
        if !self.auto_layout {
            return Err(GfxError::State(
                "get_bind_group_layout requires a pipeline created with an auto layout",
            ));
        }
        let mut shared = self.shared.borrow_mut();
        let id = shared.backend.pipeline_auto_layout(self.id, group)?;
        Ok(BindGroupLayout {
            id,
            label: None,
            entries: Vec::new(),
            derived: true,
        })
    }
}

impl std::fmt::Debug for RenderPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPipeline")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("auto_layout", &self.auto_layout)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ComputePipeline {
    pub(crate) id: PipelineId,
    pub(crate) label: Option<String>,
    pub(crate) auto_layout: bool,
    pub(crate) shared: Rc<RefCell<DeviceShared>>,
}

impl ComputePipeline {
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn get_bind_group_layout(&self, group: u32) -> Result<BindGroupLayout> {
        if !self.auto_layout {
            return Err(GfxError::State(
                "get_bind_group_layout requires a pipeline created with an auto layout",
            ));
        }
        let mut shared = self.shared.borrow_mut();
        let id = shared.backend.pipeline_auto_layout(self.id, group)?;
        Ok(BindGroupLayout {
            id,
            label: None,
            entries: Vec::new(),
            derived: true,
        })
    }
}

impl std::fmt::Debug for ComputePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePipeline")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("auto_layout", &self.auto_layout)
            .finish_non_exhaustive()
    }
}
