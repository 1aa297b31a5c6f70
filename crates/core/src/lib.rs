//! Insight Cascade Core
//!
//! Foundational types for the drill-down analysis pipeline:
//! - Error taxonomy (`CoreError`, `CoreResult`)
//! - The fixed analysis tier hierarchy
//! - Schema registry and dataset role profile
//! - Blueprint, work item, execution outcome, and level summary model
//!
//! This crate performs no I/O and has minimal dependencies (serde,
//! serde_json, thiserror).

pub mod blueprint;
pub mod error;
pub mod outcome;
pub mod profile;
pub mod schema;
pub mod tier;

// Re-export commonly used types at crate root
pub use blueprint::{extract_json_object, Blueprint, Level, Step};
pub use error::{CoreError, CoreResult};
pub use outcome::{
    ExecutionOutcome, LevelEvidence, LevelSummary, OutlierRecord, Record, SummaryBody,
    TableTarget, WorkItem,
};
pub use profile::{DatasetProfile, PeriodPair, MULTI_TABLE_SENTINEL, TOTAL_ORGANIZATION};
pub use schema::{bare_table_name, SchemaRegistry, TableSchema};
pub use tier::{all_tier_dimensions, infer_requested_tier, AnalysisTier, HIERARCHY};
