//! Backend-agnostic GPU kernel.
//!
//! A WebGPU-shaped front end (device, queue, command encoder, passes) over
//! swappable backends: a native `wgpu` pass-through, a GL emulation layer
//! that maps the explicit command model onto implicit context state, and a
//! deterministic software backend for tests.
//!
//! The kernel is single-threaded by contract; only completion callbacks may
//! arrive from other threads, and those settle a [`Deferred`] that the host
//! polls once per frame via [`Device::poll`].

pub mod backend;
pub mod cmd;
pub mod pipeline_key;

mod caps;
mod deferred;
mod device;
mod encoder;
mod error;
mod pipeline;
mod queue;
mod registry;
mod resource;
mod types;

pub use caps::Capabilities;
pub use deferred::Deferred;
pub use device::Device;
pub use encoder::{
    CommandBuffer, CommandEncoder, ComputePassDesc, ComputePassEncoder, RenderPassColorAttachment,
    RenderPassDepthStencilAttachment, RenderPassDesc, RenderPassEncoder,
};
pub use error::{GfxError, Result};
pub use pipeline::{
    BindGroup, BindGroupDesc, BindGroupEntry, BindGroupLayout, BindGroupLayoutDesc,
    BindGroupLayoutEntry, BindingResource, BindingType, BlendComponent, BlendState,
    ColorTargetState, ComputePipeline, ComputePipelineDesc, DepthStencilState, FragmentState,
    MultisampleState, PipelineLayout, PipelineLayoutDesc, PipelineLayoutKind, PrimitiveState,
    RenderPipeline, RenderPipelineDesc, ShaderModule, ShaderModuleDesc, VertexAttribute,
    VertexBufferLayout, VertexState,
};
pub use queue::{ImageCopyTexture, Queue};
pub use registry::{
    BindGroupId, BindGroupLayoutId, BindGroupLayoutTag, BindGroupTag, BufferId, BufferTag, Id,
    PipelineId, PipelineLayoutId, PipelineLayoutTag, PipelineTag, SamplerId, SamplerTag,
    ShaderModuleId, ShaderModuleTag, TextureId, TextureTag, TextureViewId, TextureViewTag,
};
pub use resource::{
    Buffer, BufferDesc, ImageDataLayout, Sampler, SamplerDesc, Texture, TextureDesc, TextureView,
    TextureViewDesc,
};
pub use types::{
    AddressMode, BlendFactor, BlendOperation, BufferUsages, Color, ColorWrites, CompareFunction,
    CullMode, Extent3d, FilterMode, FrontFace, IndexFormat, LoadOp, Operations, Origin3d,
    PrimitiveTopology, ShaderStages, StoreOp, TextureDimension, TextureFormat, TextureUsages,
    VertexFormat, VertexStepMode,
};
