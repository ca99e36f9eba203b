//! Process-wide shader parameter bus.
//!
//! Values published here are visible to every shader for the rest of the
//! frame. The backend owns the bus; the pipeline writes to it through
//! [`GpuBackend::globals_mut`](crate::render::backend::GpuBackend::globals_mut).

use std::collections::HashMap;

use glam::Vec4;

use crate::render::backend::{BufferHandle, TextureHandle};

/// A value bound on the bus
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GlobalValue {
    Vector(Vec4),
    Texture(TextureHandle),
    Buffer(BufferHandle),
}

/// Key → value bindings shared by all shaders
#[derive(Clone, Debug, Default)]
pub struct ShaderGlobals {
    values: HashMap<String, GlobalValue>,
}

impl ShaderGlobals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: GlobalValue) {
        self.values.insert(name.to_owned(), value);
    }

    pub fn set_vector(&mut self, name: &str, value: Vec4) {
        self.set(name, GlobalValue::Vector(value));
    }

    pub fn set_texture(&mut self, name: &str, texture: TextureHandle) {
        self.set(name, GlobalValue::Texture(texture));
    }

    pub fn set_buffer(&mut self, name: &str, buffer: BufferHandle) {
        self.set(name, GlobalValue::Buffer(buffer));
    }

    pub fn get(&self, name: &str) -> Option<GlobalValue> {
        self.values.get(name).copied()
    }

    pub fn vector(&self, name: &str) -> Option<Vec4> {
        match self.get(name)? {
            GlobalValue::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn texture(&self, name: &str) -> Option<TextureHandle> {
        match self.get(name)? {
            GlobalValue::Texture(t) => Some(t),
            _ => None,
        }
    }

    pub fn buffer(&self, name: &str) -> Option<BufferHandle> {
        match self.get(name)? {
            GlobalValue::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// Unbind every entry pointing at a released texture
    pub fn forget_texture(&mut self, texture: TextureHandle) {
        self.values.retain(|_, v| *v != GlobalValue::Texture(texture));
    }

    /// Unbind every entry pointing at a released buffer
    pub fn forget_buffer(&mut self, buffer: BufferHandle) {
        self.values.retain(|_, v| *v != GlobalValue::Buffer(buffer));
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
