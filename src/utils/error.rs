//! Error Handling
//!
//! Unified error type for setup and configuration. Pipeline failures never
//! surface here: a run always returns a report.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use insight_cascade_core::CoreError;
use insight_cascade_llm::LlmError;
use insight_cascade_tools::QueryError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Core model errors (schema, profile, plan parsing)
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Generation provider errors
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Warehouse errors
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML writing errors
    #[error("TOML error: {0}")]
    TomlWrite(#[from] toml::ser::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.to_string()
    }
}
