//! Grass surfaces: host renderers encoded into the placement targets.

use crate::grass::params::ENCODE_SHADER;
use crate::render::backend::RendererHandle;

/// Material index marking a surface that occludes but grows no grass
pub const BLOCKER_MATERIAL_INDEX: i32 = -1;

/// Encode pass for grass-bearing surfaces before the LUT is bound
pub const PASS_SURFACE: u32 = 0;
/// Encode pass for blockers
pub const PASS_BLOCKER: u32 = 1;
/// LUT-aware encode pass, grass-bearing surfaces only
pub const PASS_SURFACE_LUT: u32 = 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Surface {
    /// Host renderer drawn by the encoder; surfaces without one are skipped
    pub renderer: Option<RendererHandle>,
    /// Index into the configuration's surface materials, or
    /// [`BLOCKER_MATERIAL_INDEX`]
    pub material_index: i32,
    /// Encoder shader to use instead of the built-in one
    pub alternative_shader: Option<String>,
}

impl Surface {
    pub fn new(renderer: RendererHandle, material_index: i32) -> Self {
        Self {
            renderer: Some(renderer),
            material_index,
            alternative_shader: None,
        }
    }

    pub fn blocker(renderer: RendererHandle) -> Self {
        Self::new(renderer, BLOCKER_MATERIAL_INDEX)
    }

    pub fn with_shader(mut self, shader: impl Into<String>) -> Self {
        self.alternative_shader = Some(shader.into());
        self
    }

    pub fn is_blocker(&self) -> bool {
        self.material_index < 0
    }

    pub fn encode_shader(&self) -> &str {
        self.alternative_shader.as_deref().unwrap_or(ENCODE_SHADER)
    }

    /// Pass used in the first (pre-LUT) draw stage
    pub fn pre_lut_pass(&self) -> u32 {
        if self.is_blocker() { PASS_BLOCKER } else { PASS_SURFACE }
    }
}
