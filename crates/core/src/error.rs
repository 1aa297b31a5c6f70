//! Core Error Types
//!
//! Defines the error taxonomy shared across the Insight Cascade workspace.
//! These error types are dependency-free (only thiserror + serde_json) to keep
//! the core crate lightweight.
//!
//! The application crate wraps these together with provider and warehouse
//! errors in its own `AppError`.

use thiserror::Error;

/// Core error type for the Insight Cascade workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A table name that is not present in the schema registry
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// The plan generator returned something that is not a usable blueprint
    #[error("Plan parse error: {0}")]
    PlanParse(String),

    /// A blueprint that parsed but violates a structural rule
    #[error("Plan validation error: {0}")]
    PlanValidation(String),

    /// The query backend rejected or failed a query
    #[error("Query execution error: {0}")]
    QueryExecution(String),

    /// The run used up its repair budget without converging
    #[error("Iteration limit exceeded after {cycles} repair cycles")]
    IterationLimitExceeded { cycles: u32 },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create an unknown-table error
    pub fn unknown_table(name: impl Into<String>) -> Self {
        Self::UnknownTable(name.into())
    }

    /// Create a plan parse error
    pub fn plan_parse(msg: impl Into<String>) -> Self {
        Self::PlanParse(msg.into())
    }

    /// Create a plan validation error
    pub fn plan_validation(msg: impl Into<String>) -> Self {
        Self::PlanValidation(msg.into())
    }

    /// Create a query execution error
    pub fn query_execution(msg: impl Into<String>) -> Self {
        Self::QueryExecution(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Convert CoreError to a string
impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
