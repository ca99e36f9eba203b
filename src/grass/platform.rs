//! Target platforms and per-platform grass budgets.

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::render::backend::ShadowCasting;

/// Platforms a profile can target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
    Android,
    Ios,
    WebGpu,
}

impl Platform {
    /// Platform this binary was built for.
    pub fn detect() -> Result<Self> {
        Self::from_os(std::env::consts::OS, std::env::consts::ARCH)
    }

    fn from_os(os: &str, arch: &str) -> Result<Self> {
        match os {
            "windows" => Ok(Platform::Windows),
            "linux" => Ok(Platform::Linux),
            "macos" => Ok(Platform::MacOs),
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            _ if arch == "wasm32" => Ok(Platform::WebGpu),
            other => Err(Error::Platform(format!("unrecognized target os '{other}'"))),
        }
    }
}

/// Grass budget and shadow settings for a set of platforms.
///
/// Authored once and selected at runtime; never mutated by the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlatformProfile {
    #[serde(default)]
    pub target_platforms: Vec<Platform>,
    #[serde(default)]
    pub shadow_casting: ShadowCasting,
    #[serde(default)]
    pub receive_shadows: bool,
    /// Number of grass instances; zero or negative disables drawing
    #[serde(default = "default_instance_count")]
    pub instance_count: i32,
    /// Radius around the cull anchor that receives grass
    #[serde(default = "default_cull_distance")]
    pub cull_distance: f32,
}

fn default_instance_count() -> i32 {
    1000
}

fn default_cull_distance() -> f32 {
    5.0
}

impl PlatformProfile {
    pub fn for_platforms(platforms: impl Into<Vec<Platform>>) -> Self {
        Self {
            target_platforms: platforms.into(),
            ..Self::default()
        }
    }

    pub fn with_instance_count(mut self, count: i32) -> Self {
        self.instance_count = count;
        self
    }

    pub fn with_cull_distance(mut self, distance: f32) -> Self {
        self.cull_distance = distance;
        self
    }

    pub fn targets(&self, platform: Platform) -> bool {
        self.target_platforms.contains(&platform)
    }

    /// Instance count if drawing is enabled
    pub fn positive_instance_count(&self) -> Option<u32> {
        u32::try_from(self.instance_count).ok().filter(|&n| n > 0)
    }
}

impl Default for PlatformProfile {
    fn default() -> Self {
        Self {
            target_platforms: Vec::new(),
            shadow_casting: ShadowCasting::On,
            receive_shadows: false,
            instance_count: default_instance_count(),
            cull_distance: default_cull_distance(),
        }
    }
}
