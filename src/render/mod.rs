//! GPU interfaces and the wgpu backend

pub mod backend;
pub mod context;
pub mod device;
pub mod globals;
pub mod mesh;
#[cfg(test)]
pub mod recording;

pub use backend::GpuBackend;
pub use context::GpuContext;
pub use device::WgpuBackend;
pub use globals::ShaderGlobals;
pub use mesh::{Mesh, MeshData};
