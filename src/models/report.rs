//! Run Report Models
//!
//! What a caller gets back from one question-answering run.

use serde::{Deserialize, Serialize};

use insight_cascade_core::{LevelEvidence, PeriodPair};

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every planned level completed and the report was synthesized
    Complete,
    /// The repair ceiling was reached; the report covers the levels that did
    /// complete
    Incomplete,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Complete => write!(f, "complete"),
            RunStatus::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// Result of `DrilldownRunner::answer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub question: String,
    /// Best-effort final report; never mentions missing levels
    pub report: String,
    /// Planner invocations
    pub iterations: u32,
    /// Times the loop was routed back to planning
    pub repair_cycles: u32,
    pub status: RunStatus,
    pub notes: Vec<String>,
    pub result_vault: Vec<LevelEvidence>,
    pub level_narratives: Vec<String>,
    pub periods: PeriodPair,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }
}
