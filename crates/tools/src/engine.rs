//! Query Engine Trait
//!
//! The tabular query backend as the pipeline sees it: one query in, a list of
//! uniformly shaped records out, or a descriptive error.

use async_trait::async_trait;
use thiserror::Error;

use insight_cascade_core::{CoreError, Record};

/// Errors reported by a query backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The backend refused or failed the query (syntax, missing column, ...)
    #[error("Query rejected: {0}")]
    Rejected(String),

    /// The request never produced an answer
    #[error("Query transport error: {0}")]
    Transport(String),

    /// The job was still running when the call returned
    #[error("Query did not complete: {0}")]
    Incomplete(String),

    /// The backend answered with something we cannot decode
    #[error("Malformed query response: {0}")]
    Malformed(String),

    /// Missing or rejected credentials
    #[error("Warehouse authentication failed: {0}")]
    Auth(String),
}

impl From<QueryError> for CoreError {
    fn from(err: QueryError) -> Self {
        CoreError::query_execution(err.to_string())
    }
}

/// Executes one query against the warehouse.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Returns the engine name for identification.
    fn name(&self) -> &'static str;

    /// Run `query` and return its rows.
    async fn execute(&self, query: &str) -> Result<Vec<Record>, QueryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_into_core_error() {
        let err: CoreError = QueryError::Rejected("Unrecognized name: Spend".to_string()).into();
        assert!(matches!(err, CoreError::QueryExecution(_)));
        assert!(err.to_string().contains("Unrecognized name: Spend"));
    }
}
