//! CLI error types.

use patchrun_core::CheckpointError;
use thiserror::Error;

/// CLI errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Checkpoint error.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// A required preference is missing; run `patchrun install` first.
    #[error("not configured: preference \"{0}\" is not set")]
    NotConfigured(&'static str),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The supplied key does not match the configured secret.
    #[error("invalid key")]
    Unauthorized,

    /// A stored preference is not valid UTF-8.
    #[error("invalid preference \"{0}\"")]
    InvalidPreference(String),

    /// Output serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
