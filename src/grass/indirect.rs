//! Indirect draw arguments for the grass patch draw.

use bytemuck::{Pod, Zeroable};

use crate::core::{Error, Result};
use crate::render::backend::{BufferDesc, BufferHandle, BufferKind, BufferWriteMode, GpuBackend};
use crate::render::mesh::SubMesh;

/// u32 slots in the argument record
pub const INDIRECT_ARG_COUNT: u32 = 5;

/// Indexed indirect draw record. Layout matches `wgpu::util::DrawIndexedIndirectArgs`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    /// Reserved, always zero
    pub first_instance: u32,
}

impl DrawArgs {
    pub fn new(submesh: &SubMesh, instance_count: u32) -> Self {
        Self {
            index_count: submesh.index_count,
            instance_count,
            first_index: submesh.index_start,
            base_vertex: submesh.base_vertex,
            first_instance: 0,
        }
    }
}

/// Owns the argument buffer and the last record written to it
#[derive(Debug, Default)]
pub struct IndirectDrawAssembler {
    buffer: Option<BufferHandle>,
    args: DrawArgs,
}

impl IndirectDrawAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the argument buffer if missing. Returns whether it allocated.
    pub fn ensure_buffer(&mut self, backend: &mut dyn GpuBackend) -> Result<bool> {
        if self.buffer.is_some() {
            return Ok(false);
        }
        // Mapped writes need the buffer created for partial updates
        let write_mode = if backend.supports_mapped_writes() {
            BufferWriteMode::MappedSubUpdates
        } else {
            BufferWriteMode::Replace
        };
        let buffer = backend.create_buffer(&BufferDesc {
            label: "grass_indirect_args",
            kind: BufferKind::IndirectArgs,
            count: INDIRECT_ARG_COUNT,
            stride: std::mem::size_of::<u32>() as u32,
            write_mode,
        })?;
        log::debug!("Allocated indirect args buffer {}", buffer.id());
        self.buffer = Some(buffer);
        Ok(true)
    }

    /// Fill the record from the patch sub-mesh and instance count and upload it
    pub fn rebuild_args(&mut self, backend: &mut dyn GpuBackend, submesh: &SubMesh, instance_count: u32) -> Result<()> {
        let buffer = self
            .buffer
            .ok_or(Error::MissingResource("indirect args buffer"))?;
        self.args = DrawArgs::new(submesh, instance_count);
        let bytes = bytemuck::bytes_of(&self.args);
        if backend.supports_mapped_writes() {
            backend.write_buffer_mapped(buffer, 0, bytes)
        } else {
            backend.replace_buffer_data(buffer, bytes)
        }
    }

    pub fn buffer(&self) -> Option<BufferHandle> {
        self.buffer
    }

    pub fn args(&self) -> &DrawArgs {
        &self.args
    }

    pub fn release(&mut self, backend: &mut dyn GpuBackend) {
        if let Some(buffer) = self.buffer.take() {
            backend.globals_mut().forget_buffer(buffer);
            backend.release_buffer(buffer);
        }
        self.args = DrawArgs::default();
    }
}
