//! Insight Cascade Tools
//!
//! Everything that touches query text or the warehouse:
//! - `QueryEngine` - the tabular query backend trait
//! - `BigQueryEngine` - `jobs.query` REST client
//! - `QueryGuard` - validation and repair of generated SQL
//!
//! The pipeline depends only on the `QueryEngine` trait so tests can swap in
//! scripted engines.

pub mod bigquery;
pub mod engine;
pub mod sql_guard;

// Re-export core types
pub use bigquery::{decode_rows, BigQueryConfig, BigQueryEngine, FieldSchema};
pub use engine::{QueryEngine, QueryError};
pub use sql_guard::{
    alias_aggregates, rewrite_divisions, strip_fences, GuardViolation, QueryGuard, TableQualifier,
};
