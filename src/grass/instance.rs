//! GPU-resident grass instance record.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// One placed grass patch (144 bytes, 36 floats).
///
/// Written by the placer kernel, read by the patch draw. Must match
/// `GrassInstance` in `grass_placer.wgsl` and `grass_patch.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GrassInstance {
    pub model: [[f32; 4]; 4],
    pub model_inverse: [[f32; 4]; 4],
    pub color: [f32; 4],
}

impl GrassInstance {
    /// Stride of the instance buffer
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;

    pub fn new(model: Mat4, color: Vec4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            model_inverse: model.inverse().to_cols_array_2d(),
            color: color.to_array(),
        }
    }

    pub fn model(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.model)
    }
}
