//! Backend-agnostic command stream.
//!
//! Pass encoders record [`GpuCmd`] values. On a deferred backend the stream
//! accumulates in a command buffer and is replayed at submit; on an
//! immediate-execution backend each command is forwarded to the backend as it
//! is recorded and submit degenerates to a flush.

use crate::registry::{BindGroupId, BufferId, PipelineId, TextureViewId};
use crate::types::{Color, IndexFormat, Operations};

#[derive(Clone, Debug, PartialEq)]
pub struct ColorAttachmentCmd {
    pub view: TextureViewId,
    pub ops: Operations<Color>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DepthStencilAttachmentCmd {
    pub view: TextureViewId,
    pub depth_ops: Option<Operations<f32>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GpuCmd {
    BeginRenderPass {
        label: Option<String>,
        color_attachments: Vec<ColorAttachmentCmd>,
        depth_stencil_attachment: Option<DepthStencilAttachmentCmd>,
    },
    EndRenderPass,

    BeginComputePass {
        label: Option<String>,
    },
    EndComputePass,

    SetPipeline(PipelineId),
    SetBindGroup {
        index: u32,
        bind_group: BindGroupId,
        dynamic_offsets: Vec<u32>,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferId,
        offset: u64,
    },
    SetIndexBuffer {
        buffer: BufferId,
        format: IndexFormat,
        offset: u64,
    },

    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },

    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
}
