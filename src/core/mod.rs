//! Core types and utilities

pub mod types;
pub mod error;
pub mod logging;
pub mod time;
pub mod cached;
pub mod transform;

pub use types::*;
pub use error::Error;
pub use cached::Cached;
pub use time::FrameClock;
pub use transform::Transform;
