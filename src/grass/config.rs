//! Grass system configuration asset.
//!
//! Holds the platform profiles and the surface material catalog, and owns two
//! derived caches: the profile selected for the running platform and the
//! baked surface material LUT. Both are recomputed only after an explicit
//! invalidation ([`Configuration::validate`]) or, for the LUT, when a catalog
//! entry reports itself dirty.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{Cached, Result};
use crate::grass::lut::{LutImage, SurfaceMaterialLut, MIN_GRADIENT_RESOLUTION};
use crate::grass::material::SurfaceMaterial;
use crate::grass::params::GLOBAL_BAKED_LUT;
use crate::grass::platform::{Platform, PlatformProfile};
use crate::render::backend::{GpuBackend, ShadowCasting, TextureHandle};

/// Which profile the resolver picked
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProfileSelection {
    Default,
    Platform(usize),
}

/// Authored grass configuration.
#[derive(Debug, Serialize, Deserialize)]
pub struct Configuration {
    /// Fallback profile when no platform profile matches
    #[serde(default)]
    pub default_profile: PlatformProfile,
    /// Platform-specific profiles, first match wins
    #[serde(default)]
    pub platform_profiles: Vec<PlatformProfile>,
    /// Surface material catalog; `None` entries bake as a default material
    #[serde(default)]
    pub surface_materials: Vec<Option<SurfaceMaterial>>,
    /// Gradient rows in the LUT (at least 8)
    #[serde(default = "default_gradient_resolution")]
    pub lut_gradient_resolution: u32,
    /// Store gradient colors as authored (sRGB) instead of linear
    #[serde(default)]
    pub lut_is_srgb: bool,

    #[serde(skip)]
    platform_override: Option<Platform>,
    #[serde(skip)]
    current_profile: Cached<ProfileSelection>,
    #[serde(skip)]
    lut: Cached<SurfaceMaterialLut>,
    #[serde(skip)]
    retired_luts: Vec<SurfaceMaterialLut>,
}

fn default_gradient_resolution() -> u32 {
    64
}

impl Configuration {
    pub fn new() -> Self {
        Self {
            default_profile: PlatformProfile::default(),
            platform_profiles: Vec::new(),
            surface_materials: Vec::new(),
            lut_gradient_resolution: default_gradient_resolution(),
            lut_is_srgb: false,
            platform_override: None,
            current_profile: Cached::empty(),
            lut: Cached::empty(),
            retired_luts: Vec::new(),
        }
    }

    /// Parse a configuration from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        config.validate();
        Ok(config)
    }

    /// Load a configuration file and validate it
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Re-check authored values after an edit.
    ///
    /// Clamps the gradient resolution and invalidates both the selected
    /// profile and the LUT.
    pub fn validate(&mut self) {
        if self.lut_gradient_resolution < MIN_GRADIENT_RESOLUTION {
            log::info!("LUT gradient resolution must be at least {MIN_GRADIENT_RESOLUTION}, clamping {}",
                self.lut_gradient_resolution);
            self.lut_gradient_resolution = MIN_GRADIENT_RESOLUTION;
        }
        self.current_profile.invalidate();
        if let Some(lut) = self.lut.invalidate() {
            self.retired_luts.push(lut);
        }
    }

    // -- Profile resolution ------------------------------------------------

    /// Resolve profiles as if running on `platform` (e.g. the editor's active
    /// build target). `None` goes back to detecting the running platform.
    pub fn set_platform_override(&mut self, platform: Option<Platform>) {
        self.platform_override = platform;
        self.current_profile.invalidate();
    }

    /// Profile for the running platform, or the default profile if none
    /// matches or the platform cannot be determined.
    pub fn current_profile(&mut self) -> &PlatformProfile {
        let platform_override = self.platform_override;
        let profiles = &self.platform_profiles;
        let selection = *self.current_profile.get_or_insert_with(|| {
            Self::select_profile(profiles, platform_override)
        });
        match selection {
            ProfileSelection::Platform(i) if i < self.platform_profiles.len() => &self.platform_profiles[i],
            _ => &self.default_profile,
        }
    }

    fn select_profile(profiles: &[PlatformProfile], platform_override: Option<Platform>) -> ProfileSelection {
        let platform = match platform_override.map_or_else(Platform::detect, Ok) {
            Ok(platform) => platform,
            Err(e) => {
                log::debug!("Platform detection failed ({e}), using default grass profile");
                return ProfileSelection::Default;
            }
        };
        profiles
            .iter()
            .position(|p| p.targets(platform))
            .map_or(ProfileSelection::Default, ProfileSelection::Platform)
    }

    pub fn cull_distance(&mut self) -> f32 {
        self.current_profile().cull_distance
    }

    pub fn instance_count(&mut self) -> i32 {
        self.current_profile().instance_count
    }

    pub fn shadow_casting(&mut self) -> ShadowCasting {
        self.current_profile().shadow_casting
    }

    pub fn receive_shadows(&mut self) -> bool {
        self.current_profile().receive_shadows
    }

    // -- Surface materials -------------------------------------------------

    pub fn material_count(&self) -> usize {
        self.surface_materials.len()
    }

    /// Mutable access to a catalog entry; edits through its setters mark it
    /// dirty so the LUT rebuilds on next access.
    pub fn material_mut(&mut self, index: usize) -> Option<&mut SurfaceMaterial> {
        self.surface_materials.get_mut(index)?.as_mut()
    }

    pub fn push_material(&mut self, material: SurfaceMaterial) -> usize {
        self.surface_materials.push(Some(material));
        self.validate();
        self.surface_materials.len() - 1
    }

    /// The baked LUT, rebuilding it if the cache is empty or any catalog
    /// entry is dirty. Dirty flags are cleared by this check.
    ///
    /// A rebuild publishes the new texture on the global shader bus.
    pub fn surface_material_lut(&mut self, backend: &mut dyn GpuBackend) -> Result<TextureHandle> {
        for retired in self.retired_luts.drain(..) {
            retired.release(backend);
        }

        let mut rebuild = self.lut.is_empty();
        for material in self.surface_materials.iter_mut().flatten() {
            if material.take_dirty() {
                rebuild = true;
            }
        }

        if rebuild {
            let image = LutImage::build(&self.surface_materials, self.lut_gradient_resolution, self.lut_is_srgb);
            let lut = SurfaceMaterialLut::upload(backend, image)?;
            let texture = lut.texture();
            if let Some(old) = self.lut.replace(lut) {
                old.release(backend);
            }
            backend.globals_mut().set_texture(GLOBAL_BAKED_LUT, texture);
        }

        self.lut
            .get()
            .map(SurfaceMaterialLut::texture)
            .ok_or(crate::core::Error::MissingResource("surface material LUT"))
    }

    /// The most recently baked LUT without triggering a rebuild
    pub fn cached_lut(&self) -> Option<&SurfaceMaterialLut> {
        self.lut.get()
    }

    /// Release the LUT texture and any retired ones
    pub fn release_gpu_resources(&mut self, backend: &mut dyn GpuBackend) {
        for retired in self.retired_luts.drain(..) {
            retired.release(backend);
        }
        if let Some(lut) = self.lut.invalidate() {
            lut.release(backend);
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::recording::{Event, RecordingBackend};
    use glam::Vec3;

    fn config_with_materials(n: usize) -> Configuration {
        let mut config = Configuration::new();
        for i in 0..n {
            config.surface_materials.push(Some(SurfaceMaterial::new(format!("m{i}"))));
        }
        config.lut_gradient_resolution = 8;
        config.validate();
        config
    }

    #[test]
    fn test_validate_clamps_resolution() {
        let mut config = Configuration::new();
        config.lut_gradient_resolution = 3;
        config.validate();
        assert_eq!(config.lut_gradient_resolution, 8);
    }

    #[test]
    fn test_profile_override_selects_platform_profile() {
        let mut config = Configuration::new();
        config.platform_profiles.push(
            PlatformProfile::for_platforms(vec![Platform::Android]).with_instance_count(250),
        );
        config.set_platform_override(Some(Platform::Android));
        assert_eq!(config.instance_count(), 250);

        config.set_platform_override(Some(Platform::Windows));
        assert_eq!(config.instance_count(), 1000);
    }

    #[test]
    fn test_profile_is_cached_until_validate() {
        let mut config = Configuration::new();
        config.set_platform_override(Some(Platform::Linux));
        assert_eq!(config.instance_count(), 1000);

        config.default_profile.instance_count = 2000;
        assert_eq!(config.instance_count(), 1000, "cached until invalidated");

        config.validate();
        assert_eq!(config.instance_count(), 2000);
    }

    #[test]
    fn test_first_matching_profile_wins() {
        let mut config = Configuration::new();
        config.platform_profiles.push(PlatformProfile::for_platforms(vec![Platform::Ios]).with_instance_count(1));
        config.platform_profiles.push(PlatformProfile::for_platforms(vec![Platform::Linux]).with_instance_count(2));
        config.platform_profiles.push(PlatformProfile::for_platforms(vec![Platform::Linux]).with_instance_count(3));
        config.set_platform_override(Some(Platform::Linux));
        assert_eq!(config.instance_count(), 2);
    }

    #[test]
    fn test_lut_built_once_and_published() {
        let mut backend = RecordingBackend::new();
        let mut config = config_with_materials(1);

        let a = config.surface_material_lut(&mut backend).unwrap();
        let b = config.surface_material_lut(&mut backend).unwrap();
        assert_eq!(a, b);
        assert_eq!(backend.count(|e| matches!(e, Event::CreateTexture(..))), 1);
        assert_eq!(backend.globals().texture(GLOBAL_BAKED_LUT), Some(a));

        let lut = config.cached_lut().unwrap();
        assert_eq!((lut.image().width(), lut.image().height()), (1, 10));
    }

    #[test]
    fn test_dirty_material_rebuilds_lut_and_clears_flag() {
        let mut backend = RecordingBackend::new();
        let mut config = config_with_materials(2);
        let first = config.surface_material_lut(&mut backend).unwrap();

        config.material_mut(1).unwrap().set_max_size(Vec3::ONE);
        let second = config.surface_material_lut(&mut backend).unwrap();
        assert_ne!(first, second);
        assert!(!backend.is_texture_live(first));
        assert!(!config.surface_materials[1].as_ref().unwrap().is_dirty());

        let third = config.surface_material_lut(&mut backend).unwrap();
        assert_eq!(second, third);
    }

    #[test]
    fn test_validate_retires_lut() {
        let mut backend = RecordingBackend::new();
        let mut config = config_with_materials(1);
        let first = config.surface_material_lut(&mut backend).unwrap();
        config.validate();
        let second = config.surface_material_lut(&mut backend).unwrap();
        assert_ne!(first, second);
        assert!(!backend.is_texture_live(first));
        assert!(backend.is_texture_live(second));
    }

    #[test]
    fn test_empty_catalog_builds_zero_width_lut() {
        let mut backend = RecordingBackend::new();
        let mut config = config_with_materials(0);
        config.surface_material_lut(&mut backend).unwrap();
        let image = config.cached_lut().unwrap().image();
        assert_eq!((image.width(), image.height()), (0, 10));
    }

    #[test]
    fn test_json_roundtrip_and_clamp() {
        let json = r#"{
            "default_profile": {"instance_count": 4096, "cull_distance": 12.0},
            "platform_profiles": [{"target_platforms": ["Android"], "instance_count": 512}],
            "surface_materials": [{"name": "lawn"}, null],
            "lut_gradient_resolution": 2
        }"#;
        let mut config = Configuration::from_json(json).unwrap();
        assert_eq!(config.lut_gradient_resolution, 8);
        assert_eq!(config.material_count(), 2);
        assert!(config.surface_materials[1].is_none());
        config.set_platform_override(Some(Platform::Windows));
        assert_eq!(config.instance_count(), 4096);
        assert_eq!(config.cull_distance(), 12.0);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grass.json");
        config.save(&path).unwrap();
        let loaded = Configuration::load(&path).unwrap();
        assert_eq!(loaded.platform_profiles, config.platform_profiles);
        assert_eq!(loaded.lut_gradient_resolution, 8);
    }

    #[test]
    fn test_release_gpu_resources() {
        let mut backend = RecordingBackend::new();
        let mut config = config_with_materials(1);
        let lut = config.surface_material_lut(&mut backend).unwrap();
        config.release_gpu_resources(&mut backend);
        assert!(!backend.is_texture_live(lut));
        assert!(backend.globals().texture(GLOBAL_BAKED_LUT).is_none());
        assert!(config.cached_lut().is_none());
    }
}
