//! Queue: submission, immediate writes, and completion signaling.
//!
//! Writes are immediate side effects outside the command stream; they are not
//! ordered against in-flight pass execution, and callers that need ordering
//! must fence via `on_submitted_work_done`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::backend::{ExecutionModel, TextureWrite};
use crate::deferred::Deferred;
use crate::device::DeviceShared;
use crate::encoder::CommandBuffer;
use crate::error::{GfxError, Result};
use crate::resource::{Buffer, ImageDataLayout, Texture};
use crate::types::{Extent3d, Origin3d};

/// Copy destination for `Queue::write_texture`.
#[derive(Clone, Debug)]
pub struct ImageCopyTexture {
    pub texture: Texture,
    pub mip_level: u32,
    pub origin: Origin3d,
}

/// Single ordered submission channel for one device.
pub struct Queue {
    shared: Rc<RefCell<DeviceShared>>,
}

impl Queue {
    pub(crate) fn new(shared: Rc<RefCell<DeviceShared>>) -> Self {
        Self { shared }
    }

    /// Submits command buffers for execution.
    ///
    /// On a deferred backend the buffers execute strictly in array order,
    /// asynchronously relative to the caller. On an immediate backend the
    /// recorded work already ran at encode time, so this degenerates to a
    /// device-level flush and the only ordering guarantee is encode order —
    /// a strictly weaker contract that is deliberately not papered over.
    pub fn submit(&self, command_buffers: Vec<CommandBuffer>) -> Result<()> {
        let mut shared = self.shared.borrow_mut();
        match shared.backend.execution() {
            ExecutionModel::Deferred => {
                let streams: Vec<_> = command_buffers
                    .into_iter()
                    .map(|buffer| buffer.commands)
                    .collect();
                shared.backend.submit(&streams)
            }
            ExecutionModel::Immediate => shared.backend.flush(),
        }
    }

    /// Immediate write into a buffer; the region must lie within bounds.
    pub fn write_buffer(&self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<()> {
        let size = data.len() as u64;
        let end = offset
            .checked_add(size)
            .ok_or_else(|| GfxError::Validation("write_buffer range overflows".into()))?;
        if end > buffer.size() {
            return Err(GfxError::Validation(format!(
                "write_buffer range out of bounds (offset={offset}, size={size}, buffer_size={})",
                buffer.size()
            )));
        }
        self.shared
            .borrow_mut()
            .backend
            .write_buffer(buffer.id, offset, data)
    }

    /// Immediate write into a texture region described by `layout`/`size`.
    pub fn write_texture(
        &self,
        dst: &ImageCopyTexture,
        data: &[u8],
        layout: &ImageDataLayout,
        size: Extent3d,
    ) -> Result<()> {
        validate_texture_write(&dst.texture, dst.mip_level, dst.origin, size, layout, data.len())?;
        let write = TextureWrite {
            texture: dst.texture.id,
            mip_level: dst.mip_level,
            origin: dst.origin,
            size,
            layout: *layout,
        };
        self.shared.borrow_mut().backend.write_texture(&write, data)
    }

    /// Completion signal for all work submitted so far.
    ///
    /// Resolves exactly once; there is no cancellation. Callers drive
    /// resolution by calling `Device::poll` once per host frame.
    pub fn on_submitted_work_done(&self) -> Deferred<()> {
        self.shared.borrow_mut().backend.on_submitted_work_done()
    }
}

fn mip_dim(base: u32, mip_level: u32) -> u32 {
    base.checked_shr(mip_level).unwrap_or(0).max(1)
}

fn validate_texture_write(
    texture: &Texture,
    mip_level: u32,
    origin: Origin3d,
    size: Extent3d,
    layout: &ImageDataLayout,
    data_len: usize,
) -> Result<()> {
    if mip_level >= texture.mip_level_count() {
        return Err(GfxError::Validation(format!(
            "write_texture mip_level {mip_level} out of range (mip_level_count={})",
            texture.mip_level_count()
        )));
    }
    if size.width == 0 || size.height == 0 || size.depth_or_array_layers == 0 {
        return Err(GfxError::Validation(
            "write_texture region dimensions must be non-zero".into(),
        ));
    }

    let bytes_per_texel = texture.format().bytes_per_texel().ok_or_else(|| {
        GfxError::Validation(format!(
            "write_texture does not support block-compressed format {}",
            texture.format().name()
        ))
    })?;

    let mip_width = mip_dim(texture.size().width, mip_level);
    let mip_height = mip_dim(texture.size().height, mip_level);

    let end_x = origin
        .x
        .checked_add(size.width)
        .ok_or_else(|| GfxError::Validation("write_texture origin.x overflows".into()))?;
    let end_y = origin
        .y
        .checked_add(size.height)
        .ok_or_else(|| GfxError::Validation("write_texture origin.y overflows".into()))?;
    let end_z = origin
        .z
        .checked_add(size.depth_or_array_layers)
        .ok_or_else(|| GfxError::Validation("write_texture origin.z overflows".into()))?;
    if end_x > mip_width || end_y > mip_height {
        return Err(GfxError::Validation(format!(
            "write_texture region out of bounds for mip {mip_level} (origin=({},{}), size={}x{}, mip_size={mip_width}x{mip_height})",
            origin.x, origin.y, size.width, size.height
        )));
    }
    if end_z > texture.size().depth_or_array_layers {
        return Err(GfxError::Validation(format!(
            "write_texture layer range out of bounds (origin.z={}, layers={}, total_layers={})",
            origin.z,
            size.depth_or_array_layers,
            texture.size().depth_or_array_layers
        )));
    }

    let row_size = size
        .width
        .checked_mul(bytes_per_texel)
        .ok_or_else(|| GfxError::Validation("write_texture row size overflows".into()))?;

    if (size.height > 1 || size.depth_or_array_layers > 1) && layout.bytes_per_row.is_none() {
        return Err(GfxError::Validation(
            "write_texture bytes_per_row is required for multi-row uploads".into(),
        ));
    }
    if size.depth_or_array_layers > 1 && layout.rows_per_image.is_none() {
        return Err(GfxError::Validation(
            "write_texture rows_per_image is required for multi-layer uploads".into(),
        ));
    }
    if layout.bytes_per_row == Some(0) {
        return Err(GfxError::Validation(
            "write_texture bytes_per_row must be non-zero".into(),
        ));
    }
    if layout.rows_per_image == Some(0) {
        return Err(GfxError::Validation(
            "write_texture rows_per_image must be non-zero".into(),
        ));
    }

    let bytes_per_row = layout.bytes_per_row.unwrap_or(row_size);
    if bytes_per_row < row_size {
        return Err(GfxError::Validation(format!(
            "write_texture bytes_per_row {bytes_per_row} smaller than minimum row size {row_size}"
        )));
    }
    let rows_per_image = layout.rows_per_image.unwrap_or(size.height);
    if rows_per_image < size.height {
        return Err(GfxError::Validation(format!(
            "write_texture rows_per_image {rows_per_image} smaller than copy height {}",
            size.height
        )));
    }

    let required_len = {
        let last_image_rows = (rows_per_image as u64)
            .checked_mul((size.depth_or_array_layers - 1) as u64)
            .ok_or_else(|| GfxError::Validation("write_texture size overflows".into()))?;
        let last_row_offset = last_image_rows
            .checked_add((size.height - 1) as u64)
            .ok_or_else(|| GfxError::Validation("write_texture size overflows".into()))?;
        let last_row_start = (bytes_per_row as u64)
            .checked_mul(last_row_offset)
            .ok_or_else(|| GfxError::Validation("write_texture size overflows".into()))?;
        layout
            .offset
            .checked_add(last_row_start)
            .and_then(|v| v.checked_add(row_size as u64))
            .ok_or_else(|| GfxError::Validation("write_texture size overflows".into()))?
    };
    if (data_len as u64) < required_len {
        return Err(GfxError::Validation(format!(
            "write_texture data too small: need {required_len} bytes including layout offset, got {data_len}"
        )));
    }

    Ok(())
}
