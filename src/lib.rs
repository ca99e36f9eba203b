//! Meadow - GPU-driven grass placement

pub mod core;
pub mod math;
pub mod render;
pub mod grass;
