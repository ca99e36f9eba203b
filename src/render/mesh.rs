//! CPU-side mesh data and uploaded mesh references

use bytemuck::{Pod, Zeroable};

use crate::core::Result;
use crate::render::backend::{GpuBackend, MeshHandle};

/// A contiguous index range drawn as one unit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubMesh {
    pub index_start: u32,
    pub index_count: u32,
    pub base_vertex: i32,
}

/// Interleaved vertex as uploaded to the GPU (32 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// Mesh geometry ready for upload
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
    pub submeshes: Vec<SubMesh>,
}

impl MeshData {
    /// Two-triangle quad on the XZ plane spanning [-1, 1], facing +Y.
    ///
    /// Used to splat obstacle displacement textures; an obstacle's model
    /// matrix scales it to the obstacle footprint.
    pub fn unit_quad() -> Self {
        let indices = vec![0, 1, 2, 2, 1, 3];
        Self {
            positions: vec![
                [-1.0, 0.0, -1.0],
                [-1.0, 0.0, 1.0],
                [1.0, 0.0, -1.0],
                [1.0, 0.0, 1.0],
            ],
            normals: vec![[0.0, 1.0, 0.0]; 4],
            uvs: vec![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]],
            submeshes: vec![SubMesh {
                index_start: 0,
                index_count: indices.len() as u32,
                base_vertex: 0,
            }],
            indices,
        }
    }

    /// Wrap all indices in a single sub-mesh if none were given
    pub fn with_default_submesh(mut self) -> Self {
        if self.submeshes.is_empty() {
            self.submeshes.push(SubMesh {
                index_start: 0,
                index_count: self.indices.len() as u32,
                base_vertex: 0,
            });
        }
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Interleave attributes; missing normals default to +Y, missing UVs to 0.
    pub fn interleaved(&self) -> Vec<GpuVertex> {
        self.positions
            .iter()
            .enumerate()
            .map(|(i, &position)| GpuVertex {
                position,
                normal: self.normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]),
                uv: self.uvs.get(i).copied().unwrap_or([0.0, 0.0]),
            })
            .collect()
    }
}

/// A mesh uploaded to the backend along with its sub-mesh table
#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    handle: MeshHandle,
    submeshes: Vec<SubMesh>,
}

impl Mesh {
    /// Upload mesh data through the backend
    pub fn upload(backend: &mut dyn GpuBackend, data: &MeshData) -> Result<Self> {
        let handle = backend.create_mesh(data)?;
        Ok(Self {
            handle,
            submeshes: data.submeshes.clone(),
        })
    }

    pub fn handle(&self) -> MeshHandle {
        self.handle
    }

    pub fn submesh(&self, index: usize) -> Option<&SubMesh> {
        self.submeshes.get(index)
    }

    pub fn submesh_count(&self) -> usize {
        self.submeshes.len()
    }

    pub fn release(self, backend: &mut dyn GpuBackend) {
        backend.release_mesh(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_quad_layout() {
        let quad = MeshData::unit_quad();
        assert_eq!(quad.vertex_count(), 4);
        assert_eq!(quad.indices, vec![0, 1, 2, 2, 1, 3]);
        assert_eq!(quad.submeshes[0].index_count, 6);
        assert!(quad.positions.iter().all(|p| p[1] == 0.0));
    }

    #[test]
    fn test_gpu_vertex_size() {
        assert_eq!(std::mem::size_of::<GpuVertex>(), 32);
    }

    #[test]
    fn test_interleave_defaults() {
        let mesh = MeshData {
            positions: vec![[1.0, 2.0, 3.0]],
            indices: vec![0, 0, 0],
            ..Default::default()
        }
        .with_default_submesh();
        let verts = mesh.interleaved();
        assert_eq!(verts[0].normal, [0.0, 1.0, 0.0]);
        assert_eq!(mesh.submeshes[0].index_count, 3);
    }
}
