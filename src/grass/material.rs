//! Surface materials: per-surface grass color, density and size ranges.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::grass::gradient::Gradient;

/// Fallback color when a material has no gradient (magenta)
pub const FALLBACK_SURFACE_COLOR: [f32; 3] = [1.0, 0.0, 1.0];
/// Fallback density when a material has no gradient
pub const FALLBACK_SURFACE_DENSITY: f32 = 1.0;

/// Grass appearance for one kind of surface.
///
/// The gradient maps a position in [0, 1] to color (RGB) and density (A).
/// Every mutation through a setter marks the material dirty; the owning
/// [`Configuration`](crate::grass::config::Configuration) clears the flag when
/// it next checks its LUT.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SurfaceMaterial {
    /// Display name
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_fallback_color")]
    fallback_color: [f32; 3],
    #[serde(default = "default_fallback_density")]
    fallback_density: f32,
    #[serde(default)]
    gradient: Option<Gradient>,
    #[serde(default = "default_min_size")]
    min_size: Vec3,
    #[serde(default = "default_max_size")]
    max_size: Vec3,
    #[serde(skip)]
    dirty: bool,
}

fn default_fallback_color() -> [f32; 3] {
    FALLBACK_SURFACE_COLOR
}

fn default_fallback_density() -> f32 {
    FALLBACK_SURFACE_DENSITY
}

fn default_min_size() -> Vec3 {
    Vec3::splat(0.01)
}

fn default_max_size() -> Vec3 {
    Vec3::splat(0.1)
}

impl SurfaceMaterial {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Gradient sampled into the LUT, if one has been authored
    pub fn gradient(&self) -> Option<&Gradient> {
        self.gradient.as_ref()
    }

    /// Gradient to sample, falling back to the constant fallback color/density
    pub fn effective_gradient(&self) -> Gradient {
        self.gradient.clone().unwrap_or_else(|| self.fallback_gradient())
    }

    fn fallback_gradient(&self) -> Gradient {
        let c = self.fallback_color;
        Gradient::constant([c[0], c[1], c[2], self.fallback_density])
    }

    pub fn min_size(&self) -> Vec3 {
        self.min_size
    }

    pub fn max_size(&self) -> Vec3 {
        self.max_size
    }

    pub fn set_gradient(&mut self, gradient: Gradient) {
        self.gradient = Some(gradient);
        self.dirty = true;
    }

    pub fn set_min_size(&mut self, size: Vec3) {
        self.min_size = size;
        self.dirty = true;
    }

    pub fn set_max_size(&mut self, size: Vec3) {
        self.max_size = size;
        self.dirty = true;
    }

    pub fn set_fallback(&mut self, color: [f32; 3], density: f32) {
        self.fallback_color = color;
        self.fallback_density = density;
        self.dirty = true;
    }

    /// Builder-style gradient assignment
    pub fn with_gradient(mut self, gradient: Gradient) -> Self {
        self.set_gradient(gradient);
        self
    }

    /// Builder-style size range assignment
    pub fn with_sizes(mut self, min: Vec3, max: Vec3) -> Self {
        self.set_min_size(min);
        self.set_max_size(max);
        self
    }

    /// Fill in a constant gradient from the fallback data if none is set,
    /// then mark the material dirty. Call after editing fields in bulk.
    pub fn validate(&mut self) {
        if self.gradient.is_none() {
            self.gradient = Some(self.fallback_gradient());
        }
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag, returning whether it was set
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }
}

impl Default for SurfaceMaterial {
    fn default() -> Self {
        Self {
            name: String::new(),
            fallback_color: FALLBACK_SURFACE_COLOR,
            fallback_density: FALLBACK_SURFACE_DENSITY,
            gradient: None,
            min_size: default_min_size(),
            max_size: default_max_size(),
            dirty: false,
        }
    }
}
