//! Authored pipeline settings: encoder layout, lag compensation, color mode.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::render::backend::TargetFormat;

/// How the placer colors instances
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    /// Color from the biome target and LUT
    #[default]
    EncodedColor,
    /// Random hue per instance
    RandomHSV,
}

/// Texel precision of the depth-normal and obstacle targets
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncoderPrecision {
    #[default]
    Half,
    /// Full float; slow on some mobile GPUs
    Float,
}

impl EncoderPrecision {
    pub fn format(self) -> TargetFormat {
        match self {
            EncoderPrecision::Half => TargetFormat::Rgba16Float,
            EncoderPrecision::Float => TargetFormat::Rgba32Float,
        }
    }
}

/// Per-controller settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub color_mode: ColorMode,
    pub encoder_precision: EncoderPrecision,
    /// Combined depth+normals target resolution
    pub depth_normals_resolution: u32,
    /// Obstacle distortion target resolution
    pub obstacles_resolution: u32,
    /// Biome color target resolution
    pub biome_colors_resolution: u32,
    /// Height of the encoder camera above the origin
    pub encoder_height: f32,
    /// Usually set above the highest point of the terrain
    pub encoder_near: f32,
    /// Usually set below the lowest point of the terrain
    pub encoder_far: f32,
    /// Encoder anchor offset in the cull anchor's local space
    pub cull_encoder_offset: Vec3,
    /// Published cull reference offset in the cull anchor's local space
    pub cull_shader_offset: Vec3,
    /// Lag compensation kicks in below this frame rate
    pub lag_min_fps: f32,
    pub lag_comp_min: f32,
    pub lag_comp_max: f32,
    /// Skip placement entirely
    pub pause_encoder: bool,
    /// Record CPU timing samples for placement
    pub measure_execution_time: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            color_mode: ColorMode::EncodedColor,
            encoder_precision: EncoderPrecision::Half,
            depth_normals_resolution: 256,
            obstacles_resolution: 256,
            biome_colors_resolution: 256,
            encoder_height: 10.0,
            encoder_near: 0.01,
            encoder_far: 100.0,
            cull_encoder_offset: Vec3::ZERO,
            cull_shader_offset: Vec3::ZERO,
            lag_min_fps: 45.0,
            lag_comp_min: 0.0,
            lag_comp_max: 0.05,
            pause_encoder: false,
            measure_execution_time: false,
        }
    }
}
