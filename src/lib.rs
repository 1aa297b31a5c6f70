//! Insight Cascade
//!
//! Answers natural-language questions about a multi-table performance
//! dataset with a planned, audited, level-by-level drill-down.
//! It includes:
//! - The drill-down pipeline and its control loop
//! - Configuration storage (JSON or TOML)
//! - Data models and utilities

pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use models::report::{RunReport, RunStatus};
pub use models::settings::{AppConfig, PipelineSettings, SettingsUpdate};
pub use services::drilldown::DrilldownRunner;
pub use storage::ConfigService;
pub use utils::error::{AppError, AppResult};
