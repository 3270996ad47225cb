//! Command encoder and pass encoder state machines.
//!
//! Encoder lifecycle: recording until `finish()`, which yields exactly one
//! command buffer and permanently ends the encoder. At most one pass may be
//! open on an encoder at a time; pass encoders refuse every call after
//! `end()`. All transitions are checked at runtime and violations fail with
//! a state error rather than panicking.

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use crate::backend::ExecutionModel;
use crate::cmd::{ColorAttachmentCmd, DepthStencilAttachmentCmd, GpuCmd};
use crate::device::DeviceShared;
use crate::error::{GfxError, Result};
use crate::pipeline::{BindGroup, ComputePipeline, RenderPipeline};
use crate::resource::{Buffer, TextureView};
use crate::types::{Color, IndexFormat, Operations};

#[derive(Clone, Debug)]
pub struct RenderPassColorAttachment {
    pub view: TextureView,
    pub ops: Operations<Color>,
}

#[derive(Clone, Debug)]
pub struct RenderPassDepthStencilAttachment {
    pub view: TextureView,
    pub depth_ops: Option<Operations<f32>>,
}

#[derive(Clone, Debug, Default)]
pub struct RenderPassDesc {
    pub label: Option<String>,
    pub color_attachments: Vec<RenderPassColorAttachment>,
    pub depth_stencil_attachment: Option<RenderPassDepthStencilAttachment>,
}

#[derive(Clone, Debug, Default)]
pub struct ComputePassDesc {
    pub label: Option<String>,
}

pub(crate) struct EncoderInner {
    pass_open: bool,
    ended: bool,
    commands: Vec<GpuCmd>,
}

/// Records an ordered command stream and is consumed by `finish()`.
pub struct CommandEncoder {
    shared: Rc<RefCell<DeviceShared>>,
    inner: Rc<RefCell<EncoderInner>>,
    label: Option<String>,
}

/// Ordered, immutable command sequence produced by ending an encoder.
pub struct CommandBuffer {
    pub(crate) commands: Vec<GpuCmd>,
    pub(crate) label: Option<String>,
}

impl CommandBuffer {
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

fn record(
    shared: &Rc<RefCell<DeviceShared>>,
    inner: &Rc<RefCell<EncoderInner>>,
    cmd: GpuCmd,
) -> Result<()> {
    let execution = shared.borrow().backend.execution();
    match execution {
        ExecutionModel::Immediate => shared.borrow_mut().backend.execute_immediate(&cmd),
        ExecutionModel::Deferred => {
            inner.borrow_mut().commands.push(cmd);
            Ok(())
        }
    }
}

impl CommandEncoder {
    pub(crate) fn new(shared: Rc<RefCell<DeviceShared>>, label: Option<String>) -> Self {
        Self {
            shared,
            inner: Rc::new(RefCell::new(EncoderInner {
                pass_open: false,
                ended: false,
                commands: Vec::new(),
            })),
            label,
        }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn check_can_begin_pass(&self) -> Result<()> {
        let inner = self.inner.borrow();
        if inner.ended {
            return Err(GfxError::State("encoder has already been finished"));
        }
        if inner.pass_open {
            return Err(GfxError::State("a pass is already open on this encoder"));
        }
        Ok(())
    }

    pub fn begin_render_pass(&self, desc: &RenderPassDesc) -> Result<RenderPassEncoder> {
        self.check_can_begin_pass()?;
        if desc.color_attachments.is_empty() && desc.depth_stencil_attachment.is_none() {
            return Err(GfxError::Validation(
                "render pass requires at least one attachment".into(),
            ));
        }

        let cmd = GpuCmd::BeginRenderPass {
            label: desc.label.clone(),
            color_attachments: desc
                .color_attachments
                .iter()
                .map(|attachment| ColorAttachmentCmd {
                    view: attachment.view.id,
                    ops: attachment.ops,
                })
                .collect(),
            depth_stencil_attachment: desc.depth_stencil_attachment.as_ref().map(|attachment| {
                DepthStencilAttachmentCmd {
                    view: attachment.view.id,
                    depth_ops: attachment.depth_ops,
                }
            }),
        };
        record(&self.shared, &self.inner, cmd)?;
        self.inner.borrow_mut().pass_open = true;

        Ok(RenderPassEncoder {
            shared: Rc::clone(&self.shared),
            inner: Rc::clone(&self.inner),
            ended: false,
        })
    }

    pub fn begin_compute_pass(&self, desc: &ComputePassDesc) -> Result<ComputePassEncoder> {
        self.check_can_begin_pass()?;

        record(
            &self.shared,
            &self.inner,
            GpuCmd::BeginComputePass {
                label: desc.label.clone(),
            },
        )?;
        self.inner.borrow_mut().pass_open = true;

        Ok(ComputePassEncoder {
            shared: Rc::clone(&self.shared),
            inner: Rc::clone(&self.inner),
            ended: false,
        })
    }

    /// Ends recording and yields the command buffer.
    ///
    /// The encoder cannot be reused afterwards; a second `finish()` fails.
    pub fn finish(&mut self) -> Result<CommandBuffer> {
        let mut inner = self.inner.borrow_mut();
        if inner.ended {
            return Err(GfxError::State("encoder has already been finished"));
        }
        if inner.pass_open {
            return Err(GfxError::State("cannot finish an encoder with an open pass"));
        }
        inner.ended = true;
        Ok(CommandBuffer {
            commands: std::mem::take(&mut inner.commands),
            label: self.label.clone(),
        })
    }
}

/// Records draw commands inside one render pass.
pub struct RenderPassEncoder {
    shared: Rc<RefCell<DeviceShared>>,
    inner: Rc<RefCell<EncoderInner>>,
    ended: bool,
}

impl RenderPassEncoder {
    fn check_active(&self) -> Result<()> {
        if self.ended {
            return Err(GfxError::State("render pass has already ended"));
        }
        if self.inner.borrow().ended {
            return Err(GfxError::State("encoder has already been finished"));
        }
        Ok(())
    }

    pub fn set_pipeline(&mut self, pipeline: &RenderPipeline) -> Result<()> {
        self.check_active()?;
        record(&self.shared, &self.inner, GpuCmd::SetPipeline(pipeline.id))
    }

    pub fn set_bind_group(
        &mut self,
        index: u32,
        bind_group: &BindGroup,
        dynamic_offsets: &[u32],
    ) -> Result<()> {
        self.check_active()?;
        record(
            &self.shared,
            &self.inner,
            GpuCmd::SetBindGroup {
                index,
                bind_group: bind_group.id,
                dynamic_offsets: dynamic_offsets.to_vec(),
            },
        )
    }

    pub fn set_vertex_buffer(&mut self, slot: u32, buffer: &Buffer, offset: u64) -> Result<()> {
        self.check_active()?;
        record(
            &self.shared,
            &self.inner,
            GpuCmd::SetVertexBuffer {
                slot,
                buffer: buffer.id,
                offset,
            },
        )
    }

    pub fn set_index_buffer(
        &mut self,
        buffer: &Buffer,
        format: IndexFormat,
        offset: u64,
    ) -> Result<()> {
        self.check_active()?;
        record(
            &self.shared,
            &self.inner,
            GpuCmd::SetIndexBuffer {
                buffer: buffer.id,
                format,
                offset,
            },
        )
    }

    pub fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) -> Result<()> {
        self.check_active()?;
        let vertex_count = range_count(&vertices, "draw vertex range")?;
        let instance_count = range_count(&instances, "draw instance range")?;
        record(
            &self.shared,
            &self.inner,
            GpuCmd::Draw {
                vertex_count,
                instance_count,
                first_vertex: vertices.start,
                first_instance: instances.start,
            },
        )
    }

    pub fn draw_indexed(
        &mut self,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    ) -> Result<()> {
        self.check_active()?;
        let index_count = range_count(&indices, "draw index range")?;
        let instance_count = range_count(&instances, "draw instance range")?;
        record(
            &self.shared,
            &self.inner,
            GpuCmd::DrawIndexed {
                index_count,
                instance_count,
                first_index: indices.start,
                base_vertex,
                first_instance: instances.start,
            },
        )
    }

    pub fn end(&mut self) -> Result<()> {
        self.check_active()?;
        record(&self.shared, &self.inner, GpuCmd::EndRenderPass)?;
        self.ended = true;
        self.inner.borrow_mut().pass_open = false;
        Ok(())
    }
}

/// Records dispatches inside one compute pass.
pub struct ComputePassEncoder {
    shared: Rc<RefCell<DeviceShared>>,
    inner: Rc<RefCell<EncoderInner>>,
    ended: bool,
}

impl ComputePassEncoder {
    fn check_active(&self) -> Result<()> {
        if self.ended {
            return Err(GfxError::State("compute pass has already ended"));
        }
        if self.inner.borrow().ended {
            return Err(GfxError::State("encoder has already been finished"));
        }
        Ok(())
    }

    pub fn set_pipeline(&mut self, pipeline: &ComputePipeline) -> Result<()> {
        self.check_active()?;
        record(&self.shared, &self.inner, GpuCmd::SetPipeline(pipeline.id))
    }

    pub fn set_bind_group(
        &mut self,
        index: u32,
        bind_group: &BindGroup,
        dynamic_offsets: &[u32],
    ) -> Result<()> {
        self.check_active()?;
        record(
            &self.shared,
            &self.inner,
            GpuCmd::SetBindGroup {
                index,
                bind_group: bind_group.id,
                dynamic_offsets: dynamic_offsets.to_vec(),
            },
        )
    }

    pub fn dispatch_workgroups(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.check_active()?;
        record(&self.shared, &self.inner, GpuCmd::Dispatch { x, y, z })
    }

    pub fn end(&mut self) -> Result<()> {
        self.check_active()?;
        record(&self.shared, &self.inner, GpuCmd::EndComputePass)?;
        self.ended = true;
        self.inner.borrow_mut().pass_open = false;
        Ok(())
    }
}

fn range_count(range: &Range<u32>, what: &str) -> Result<u32> {
    range
        .end
        .checked_sub(range.start)
        .ok_or_else(|| GfxError::Validation(format!("{what} is inverted")))
}
