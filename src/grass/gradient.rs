//! Color + alpha gradients sampled into the surface material LUT.
//!
//! A [`Gradient`] keeps color keys and alpha keys separately (alpha encodes
//! grass density) and clamps outside the keyed range. Keys are sorted on
//! construction and on deserialization.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Lerp trait
// ---------------------------------------------------------------------------

/// Trait for types that can be linearly interpolated.
pub trait Lerp: Clone {
    fn lerp(&self, other: &Self, t: f32) -> Self;
}

impl Lerp for f32 {
    #[inline]
    fn lerp(&self, other: &Self, t: f32) -> Self {
        self + (other - self) * t
    }
}

impl Lerp for [f32; 3] {
    #[inline]
    fn lerp(&self, other: &Self, t: f32) -> Self {
        [
            self[0] + (other[0] - self[0]) * t,
            self[1] + (other[1] - self[1]) * t,
            self[2] + (other[2] - self[2]) * t,
        ]
    }
}

// ---------------------------------------------------------------------------
// Key track
// ---------------------------------------------------------------------------

/// How values between keys are computed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GradientMode {
    /// Linear interpolation between neighbouring keys
    #[default]
    Blend,
    /// Step: take the first key at or after the sample position
    Fixed,
}

/// Sorted `(position, value)` keys over [0, 1]
#[derive(Clone, Debug, PartialEq)]
struct KeyTrack<T: Lerp> {
    keys: Vec<(f32, T)>,
}

impl<T: Lerp> KeyTrack<T> {
    fn new(mut keys: Vec<(f32, T)>) -> Self {
        keys.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Self { keys }
    }

    fn sample(&self, t: f32, mode: GradientMode, empty: T) -> T {
        let (first, last) = match (self.keys.first(), self.keys.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return empty,
        };

        if t <= first.0 {
            return first.1.clone();
        }
        if t >= last.0 {
            return last.1.clone();
        }

        // First key strictly after t; exists because t < last.0
        let upper = self.keys.iter().position(|k| k.0 > t).unwrap_or(self.keys.len() - 1);
        let (t_a, ref v_a) = self.keys[upper - 1];
        let (t_b, ref v_b) = self.keys[upper];

        match mode {
            GradientMode::Fixed => {
                if t <= t_a { v_a.clone() } else { v_b.clone() }
            }
            GradientMode::Blend => {
                let span = t_b - t_a;
                if span < 1e-6 {
                    return v_a.clone();
                }
                v_a.lerp(v_b, (t - t_a) / span)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Gradient
// ---------------------------------------------------------------------------

/// Color-vs-density gradient: RGB from color keys, alpha from alpha keys.
#[derive(Clone, Debug, PartialEq)]
pub struct Gradient {
    colors: KeyTrack<[f32; 3]>,
    alphas: KeyTrack<f32>,
    mode: GradientMode,
}

impl Gradient {
    /// Create a gradient from unsorted color and alpha keys.
    pub fn new(color_keys: Vec<(f32, [f32; 3])>, alpha_keys: Vec<(f32, f32)>) -> Self {
        Self {
            colors: KeyTrack::new(color_keys),
            alphas: KeyTrack::new(alpha_keys),
            mode: GradientMode::Blend,
        }
    }

    /// Gradient that evaluates to the same RGBA everywhere.
    pub fn constant(rgba: [f32; 4]) -> Self {
        let rgb = [rgba[0], rgba[1], rgba[2]];
        Self::new(vec![(0.0, rgb), (1.0, rgb)], vec![(0.0, rgba[3]), (1.0, rgba[3])])
    }

    pub fn with_mode(mut self, mode: GradientMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> GradientMode {
        self.mode
    }

    /// Sample RGBA at `t` in [0, 1]; clamps outside the keyed range.
    /// Missing color keys read as white, missing alpha keys as opaque.
    pub fn evaluate(&self, t: f32) -> [f32; 4] {
        let rgb = self.colors.sample(t, self.mode, [1.0; 3]);
        let a = self.alphas.sample(t, self.mode, 1.0);
        [rgb[0], rgb[1], rgb[2], a]
    }
}

/// Convert one gamma-encoded (sRGB) channel to linear.
pub fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Convert an sRGB color to linear; alpha is left untouched.
pub fn color_to_linear(rgba: [f32; 4]) -> [f32; 4] {
    [
        srgb_to_linear(rgba[0]),
        srgb_to_linear(rgba[1]),
        srgb_to_linear(rgba[2]),
        rgba[3],
    ]
}

// ---------------------------------------------------------------------------
// Serde support
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct GradientRepr {
    colors: Vec<(f32, [f32; 3])>,
    alphas: Vec<(f32, f32)>,
    #[serde(default)]
    mode: GradientMode,
}

impl Serialize for Gradient {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        GradientRepr {
            colors: self.colors.keys.clone(),
            alphas: self.alphas.keys.clone(),
            mode: self.mode,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Gradient {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = GradientRepr::deserialize(deserializer)?;
        Ok(Self::new(repr.colors, repr.alphas).with_mode(repr.mode))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
