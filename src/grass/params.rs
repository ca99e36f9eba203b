//! Placer parameter vectors and the shader-parameter names shared by the
//! compute kernel, the encoder passes and the patch draw.
//!
//! Every vector is a plain `Vec4` on the wire; [`PlacerParams`] keeps the
//! packing in one place. Must match the uniforms in `shaders/grass_placer.wgsl`.

use glam::{Vec3, Vec4};

// -- Global bus names --------------------------------------------------------

/// Baked surface material LUT, published by the configuration on rebuild
pub const GLOBAL_BAKED_LUT: &str = "_GlobalSurfaceLUT";
/// LUT bound by the pipeline for the encoder, placer and patch draw
pub const GLOBAL_SURFACE_LUT: &str = "_SurfaceMaterialLUT";
/// Cull reference (xyz) + cull distance (w)
pub const GLOBAL_CULL_REF: &str = "_GrassInstanceCullRef";
/// World position of the encoder camera
pub const GLOBAL_ENCODE_REF: &str = "_GrassInstanceEncodeRef";
/// x = instance buffer element count
pub const GLOBAL_INSTANCE_BOUNDS: &str = "_GrassInstanceBounds";
/// Instance buffer
pub const GLOBAL_INSTANCES: &str = "_GrassInstanceInfos";
/// Obstacle distortion target
pub const GLOBAL_OBSTACLE_MAP: &str = "_GrassObstacleMap";
/// (initial, material count - 1, gradient resolution - 1, instance count)
pub const GLOBAL_STATE: &str = "_GrassState";

// -- Placer-only names -------------------------------------------------------

pub const PLACER_PERF_INFO: &str = "_GrassPerfInfo";
pub const PLACER_ENCODE_INFO: &str = "_GrassEncodeInfo";
pub const PLACER_ENCODED_MAP: &str = "_EncodedGrassMap";
pub const PLACER_BIOME_MAP: &str = "_GrassBiomeMap";

// -- Shader variants ---------------------------------------------------------

pub const KEYWORD_REVERSED_Z: &str = "REVERSED_Z";
pub const KEYWORD_ENCODED_COLOR: &str = "PLACER_ENCODED_COLOR";
pub const KEYWORD_RANDOM_HSV: &str = "PLACER_RANDOM_HSV";

/// Compute program and kernel used for placement
pub const PLACER_PROGRAM: &str = "grass_placer";
pub const PLACER_KERNEL: &str = "cs_main";

/// Built-in shader names
pub const OBSTACLE_SHADER: &str = "grass/obstacle";
pub const ENCODE_SHADER: &str = "grass/encode";
pub const PATCH_SHADER: &str = "grass/patch";

/// Texture slot the obstacle shader samples its displacement from
pub const OBSTACLE_TEXTURE_SLOT: &str = "_MainTex";
/// Surface encode material property: x = material index (negative for blockers)
pub const SURFACE_MATERIAL_INDEX: &str = "_SurfaceMaterialIndex";

/// `_GrassState` vector.
///
/// Material count and gradient resolution are sent minus one so the shader
/// can use them directly as the last valid index.
pub fn state_vector(initial: bool, material_count: usize, gradient_resolution: u32, instance_count: i32) -> Vec4 {
    Vec4::new(
        if initial { 1.0 } else { 0.0 },
        material_count as f32 - 1.0,
        gradient_resolution as f32 - 1.0,
        instance_count as f32,
    )
}

/// Frame timing and lag compensation bounds (`_GrassPerfInfo`)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerfInfo {
    pub delta_time: f32,
    pub inv_min_fps: f32,
    pub jitter_min: f32,
    pub jitter_max: f32,
}

impl PerfInfo {
    pub fn new(delta_time: f32, min_fps: f32, jitter_min: f32, jitter_max: f32) -> Self {
        Self {
            delta_time,
            inv_min_fps: 1.0 / min_fps.max(f32::EPSILON),
            jitter_min,
            jitter_max,
        }
    }

    /// How far the frame overran the FPS threshold, in [0, 1]
    pub fn lag(&self) -> f32 {
        ((self.delta_time - self.inv_min_fps) / self.inv_min_fps).clamp(0.0, 1.0)
    }

    /// Placement jitter radius the kernel applies for this frame
    pub fn jitter(&self) -> f32 {
        self.jitter_min + (self.jitter_max - self.jitter_min) * self.lag()
    }

    pub fn to_vec4(self) -> Vec4 {
        Vec4::new(self.delta_time, self.inv_min_fps, self.jitter_min, self.jitter_max)
    }
}

/// The four vectors bound on the placer before each dispatch
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlacerParams {
    /// Cull reference (xyz) + cull distance (w)
    pub cull_ref: Vec4,
    /// Encoder near, far, height, time
    pub encode_info: Vec4,
    pub state: Vec4,
    pub perf: PerfInfo,
}

impl PlacerParams {
    pub fn cull_ref(point: Vec3, cull_distance: f32) -> Vec4 {
        point.extend(cull_distance)
    }

    pub fn encode_info(near: f32, far: f32, height: f32, time: f32) -> Vec4 {
        Vec4::new(near, far, height, time)
    }

    /// Name/value pairs in binding order
    pub fn vectors(&self) -> [(&'static str, Vec4); 4] {
        [
            (PLACER_PERF_INFO, self.perf.to_vec4()),
            (PLACER_ENCODE_INFO, self.encode_info),
            (GLOBAL_CULL_REF, self.cull_ref),
            (GLOBAL_STATE, self.state),
        ]
    }
}
