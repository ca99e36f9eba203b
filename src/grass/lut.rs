//! Surface material lookup table.
//!
//! One column per material, `2 + R` rows for gradient resolution `R`:
//!
//! | row        | contents                                         |
//! |------------|--------------------------------------------------|
//! | 0          | minimum size (xyz, w = 0)                        |
//! | 1          | maximum size (xyz, w = 0)                        |
//! | 2 .. 2+R   | gradient sampled at `(row - 2 + 0.5) / R`        |
//!
//! Texels are RGBA half floats. The whole image is rebuilt every time; there
//! are no partial updates.

use half::f16;

use crate::core::Result;
use crate::grass::gradient::color_to_linear;
use crate::grass::material::SurfaceMaterial;
use crate::render::backend::{GpuBackend, TargetFormat, TextureDesc, TextureHandle};

/// Smallest allowed gradient resolution
pub const MIN_GRADIENT_RESOLUTION: u32 = 8;
/// Rows before the gradient section
pub const LUT_HEADER_ROWS: u32 = 2;
/// Texel format of the LUT texture
pub const LUT_FORMAT: TargetFormat = TargetFormat::Rgba16Float;

/// Gradient position sampled for gradient row `row` (0-based)
pub fn gradient_sample_position(row: u32, resolution: u32) -> f32 {
    (row as f32 + 0.5) / resolution as f32
}

/// CPU-side LUT contents
#[derive(Clone, Debug, PartialEq)]
pub struct LutImage {
    width: u32,
    height: u32,
    texels: Vec<[f16; 4]>,
}

impl LutImage {
    /// Bake a material catalog. `None` entries use a default material.
    pub fn build(materials: &[Option<SurfaceMaterial>], gradient_resolution: u32, srgb: bool) -> Self {
        let width = materials.len() as u32;
        let height = LUT_HEADER_ROWS + gradient_resolution;
        let mut image = Self {
            width,
            height,
            texels: vec![[f16::ZERO; 4]; (width * height) as usize],
        };

        let placeholder = SurfaceMaterial::default();
        for (x, material) in materials.iter().enumerate() {
            let material = material.as_ref().unwrap_or(&placeholder);
            let x = x as u32;

            image.set(x, 0, material.min_size().extend(0.0).to_array());
            image.set(x, 1, material.max_size().extend(0.0).to_array());

            let gradient = material.effective_gradient();
            for row in 0..gradient_resolution {
                let mut color = gradient.evaluate(gradient_sample_position(row, gradient_resolution));
                if !srgb {
                    color = color_to_linear(color);
                }
                image.set(x, LUT_HEADER_ROWS + row, color);
            }
        }

        image
    }

    fn set(&mut self, x: u32, y: u32, value: [f32; 4]) {
        let idx = (y * self.width + x) as usize;
        self.texels[idx] = value.map(f16::from_f32);
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Decoded texel at column `x`, row `y`
    pub fn texel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.texels[(y * self.width + x) as usize].map(f16::to_f32))
    }

    /// Tightly packed texel bytes, row 0 first
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texels)
    }
}

/// An uploaded LUT texture together with the image it was built from
#[derive(Debug)]
pub struct SurfaceMaterialLut {
    texture: TextureHandle,
    image: LutImage,
}

impl SurfaceMaterialLut {
    pub fn upload(backend: &mut dyn GpuBackend, image: LutImage) -> Result<Self> {
        let desc = TextureDesc {
            label: "surface_material_lut",
            width: image.width(),
            height: image.height(),
            format: LUT_FORMAT,
        };
        let texture = backend.create_texture(&desc, image.as_bytes())?;
        log::debug!("Uploaded surface material LUT {}x{} as texture {}",
            image.width(), image.height(), texture.id());
        Ok(Self { texture, image })
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn image(&self) -> &LutImage {
        &self.image
    }

    pub fn release(self, backend: &mut dyn GpuBackend) {
        backend.globals_mut().forget_texture(self.texture);
        backend.release_texture(self.texture);
    }
}
