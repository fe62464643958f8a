//! Error types for GPT-MoE.

use thiserror::Error;

/// Main error type for model construction and inference.
#[derive(Error, Debug)]
pub enum MoeError {
    /// Invalid construction parameters (zero dimensions, head-count mismatch, no experts).
    #[error("Config error: {0}")]
    Config(String),

    /// Tensor rank or dimension mismatch.
    #[error("Shape error: {0}")]
    Shape(String),

    /// Missing or inconsistent model files.
    #[error("Model error: {0}")]
    Model(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle tensor errors.
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MoeError {
    /// `true` for construction-time configuration errors.
    pub fn is_config(&self) -> bool {
        matches!(self, MoeError::Config(_))
    }

    /// `true` for input shape errors.
    pub fn is_shape(&self) -> bool {
        matches!(self, MoeError::Shape(_))
    }
}

/// Result type alias for GPT-MoE operations.
pub type MoeResult<T> = Result<T, MoeError>;
