//! Error types for the grass pipeline

use thiserror::Error;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Kernel not found: {0}")]
    KernelNotFound(String),

    #[error("Missing resource: {0}")]
    MissingResource(&'static str),

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
}
