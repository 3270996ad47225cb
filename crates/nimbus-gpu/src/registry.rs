//! Tagged ids and per-kind registries mapping ids to backend-owned objects.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::error::{GfxError, Result};

/// Opaque id for a backend-owned object of kind `T`.
///
/// The tag is phantom; ids of different kinds cannot be mixed up at compile
/// time even though they are all `u32` underneath.
pub struct Id<T> {
    raw: u32,
    _tag: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    pub(crate) fn new(raw: u32) -> Self {
        Self {
            raw,
            _tag: PhantomData,
        }
    }

    pub fn index(&self) -> u32 {
        self.raw
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.raw)
    }
}

pub struct BufferTag;
pub struct TextureTag;
pub struct TextureViewTag;
pub struct SamplerTag;
pub struct ShaderModuleTag;
pub struct BindGroupLayoutTag;
pub struct PipelineLayoutTag;
pub struct BindGroupTag;
pub struct PipelineTag;

pub type BufferId = Id<BufferTag>;
pub type TextureId = Id<TextureTag>;
pub type TextureViewId = Id<TextureViewTag>;
pub type SamplerId = Id<SamplerTag>;
pub type ShaderModuleId = Id<ShaderModuleTag>;
pub type BindGroupLayoutId = Id<BindGroupLayoutTag>;
pub type PipelineLayoutId = Id<PipelineLayoutTag>;
pub type BindGroupId = Id<BindGroupTag>;
pub type PipelineId = Id<PipelineTag>;

/// Id-to-object map for one resource kind.
///
/// Lookups of unknown ids are backend errors, not panics: a stale id can only
/// come from a handle that outlived its device.
pub(crate) struct Registry<T, V> {
    kind: &'static str,
    next: u32,
    map: HashMap<u32, V>,
    _tag: PhantomData<fn() -> T>,
}

impl<T, V> Registry<T, V> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            next: 1,
            map: HashMap::new(),
            _tag: PhantomData,
        }
    }

    pub fn insert(&mut self, value: V) -> Id<T> {
        let raw = self.next;
        self.next += 1;
        self.map.insert(raw, value);
        Id::new(raw)
    }

    pub fn get(&self, id: Id<T>) -> Result<&V> {
        self.map
            .get(&id.raw)
            .ok_or_else(|| GfxError::Backend(format!("unknown {} id {}", self.kind, id.raw)))
    }

    pub fn get_mut(&mut self, id: Id<T>) -> Result<&mut V> {
        self.map
            .get_mut(&id.raw)
            .ok_or_else(|| GfxError::Backend(format!("unknown {} id {}", self.kind, id.raw)))
    }
}
