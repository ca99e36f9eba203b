//! Grass obstacles: textured quads that push grass aside.

use glam::{Mat4, Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::transform::quat_from_euler_degrees;
use crate::core::Transform;
use crate::render::backend::TextureHandle;

/// How an obstacle's quad is oriented
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignMode {
    /// Flat on the ground, only the heading follows the entity
    #[default]
    AlwaysPointUp,
    /// Full entity rotation composed with the euler offset
    FollowRotation,
}

/// A displacement source rendered into the obstacle target.
///
/// The quad spans [-1, 1] on x and z, scaled by the footprint.
#[derive(Clone, Debug, PartialEq)]
pub struct Obstacle {
    /// Displacement texture; obstacles without one are not encoded
    pub displacement_texture: Option<TextureHandle>,
    /// Half-extents of the quad along local x and z
    pub footprint: Vec2,
    pub align_mode: AlignMode,
    /// Euler offset in degrees, used with [`AlignMode::FollowRotation`]
    pub euler_offset: Vec3,
    pub transform: Transform,
}

impl Obstacle {
    pub fn new(transform: Transform) -> Self {
        Self {
            displacement_texture: None,
            footprint: Vec2::new(0.5, 0.5),
            align_mode: AlignMode::AlwaysPointUp,
            euler_offset: Vec3::ZERO,
            transform,
        }
    }

    pub fn with_texture(mut self, texture: TextureHandle) -> Self {
        self.displacement_texture = Some(texture);
        self
    }

    pub fn with_footprint(mut self, footprint: Vec2) -> Self {
        self.footprint = footprint;
        self
    }

    pub fn with_alignment(mut self, mode: AlignMode, euler_offset: Vec3) -> Self {
        self.align_mode = mode;
        self.euler_offset = euler_offset;
        self
    }

    pub fn rotation(&self) -> Quat {
        match self.align_mode {
            AlignMode::AlwaysPointUp => Quat::from_rotation_y(self.transform.yaw()),
            AlignMode::FollowRotation => self.transform.rotation * quat_from_euler_degrees(self.euler_offset),
        }
    }

    /// Model matrix of the displacement quad. Entity scale is ignored.
    pub fn model_matrix(&self) -> Mat4 {
        let scale = Vec3::new(self.footprint.x, 1.0, self.footprint.y);
        Mat4::from_scale_rotation_translation(scale, self.rotation(), self.transform.position)
    }
}
