//! Insight Cascade Quality Gates
//!
//! The gatekeeper as two pure functions sharing one routing type:
//!
//! - `plan_audit` - validates a blueprint before any query runs
//! - `execution_audit` - inspects one executed level's summaries
//! - `models` - `GateDecision`, `Route`, and planner feedback types
//!
//! The control loop dispatches to one or the other by phase. The level
//! narrative that follows a successful execution audit needs the generation
//! service and lives in the main crate.

pub mod execution_audit;
pub mod models;
pub mod plan_audit;

// Re-export model types
pub use models::{AuditDecision, AuditFeedback, AuditIssue, GateDecision, IssueKind, Route};

// Re-export audits
pub use execution_audit::audit_execution;
pub use plan_audit::{audit_plan, collect_issues, PlanAuditContext};
