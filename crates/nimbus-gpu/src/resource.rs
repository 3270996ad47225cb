//! Buffer/texture/sampler descriptors and the handles creation returns.
//!
//! Descriptors are caller-supplied plain values; handles are cheap clones
//! carrying the tagged backend id plus the metadata the front end needs for
//! validation. Handles stay valid until the owning device is dropped; there
//! is no per-handle destroy.

use crate::registry::{BufferId, SamplerId, TextureId, TextureViewId};
use crate::types::{
    AddressMode, BufferUsages, CompareFunction, Extent3d, FilterMode, TextureDimension,
    TextureFormat, TextureUsages,
};

#[derive(Clone, Debug, Default)]
pub struct BufferDesc {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsages,
}

#[derive(Clone, Debug)]
pub struct TextureDesc {
    pub label: Option<String>,
    pub size: Extent3d,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
    pub usage: TextureUsages,
}

impl TextureDesc {
    pub fn new_2d(format: TextureFormat, width: u32, height: u32, usage: TextureUsages) -> Self {
        Self {
            label: None,
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format,
            usage,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SamplerDesc {
    pub label: Option<String>,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub compare: Option<CompareFunction>,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            label: None,
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            compare: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TextureViewDesc {
    pub label: Option<String>,
}

/// Linear layout of texel data supplied to `Queue::write_texture`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageDataLayout {
    pub offset: u64,
    pub bytes_per_row: Option<u32>,
    pub rows_per_image: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct Buffer {
    pub(crate) id: BufferId,
    pub(crate) size: u64,
    pub(crate) usage: BufferUsages,
    pub(crate) label: Option<String>,
}

impl Buffer {
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsages {
        self.usage
    }
}

#[derive(Clone, Debug)]
pub struct Texture {
    pub(crate) id: TextureId,
    pub(crate) size: Extent3d,
    pub(crate) mip_level_count: u32,
    pub(crate) format: TextureFormat,
    pub(crate) usage: TextureUsages,
    pub(crate) label: Option<String>,
}

impl Texture {
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn size(&self) -> Extent3d {
        self.size
    }

    pub fn mip_level_count(&self) -> u32 {
        self.mip_level_count
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn usage(&self) -> TextureUsages {
        self.usage
    }
}

#[derive(Clone, Debug)]
pub struct TextureView {
    pub(crate) id: TextureViewId,
    pub(crate) label: Option<String>,
}

impl TextureView {
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

#[derive(Clone, Debug)]
pub struct Sampler {
    pub(crate) id: SamplerId,
    pub(crate) label: Option<String>,
}

impl Sampler {
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}
