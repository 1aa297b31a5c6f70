//! Work Items, Execution Outcomes, and Level Summaries
//!
//! The executable and post-execution halves of the data model: resolved
//! steps going in, per-item outcomes coming back, and the compact
//! summaries the gatekeeper and synthesizer reason over.

use serde::{Deserialize, Serialize};

use crate::tier::AnalysisTier;

/// One result row: column name to JSON-safe value, in column order.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Where a work item reads from. Always concrete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableTarget {
    Single { table: String },
    MultiTable { sources: [String; 2] },
}

impl TableTarget {
    pub fn single(table: impl Into<String>) -> Self {
        TableTarget::Single {
            table: table.into(),
        }
    }

    pub fn is_multi_table(&self) -> bool {
        matches!(self, TableTarget::MultiTable { .. })
    }

    /// Tables the item may read.
    pub fn tables(&self) -> Vec<&str> {
        match self {
            TableTarget::Single { table } => vec![table.as_str()],
            TableTarget::MultiTable { sources } => vec![sources[0].as_str(), sources[1].as_str()],
        }
    }
}

impl std::fmt::Display for TableTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableTarget::Single { table } => write!(f, "{}", table),
            TableTarget::MultiTable { sources } => write!(f, "{} + {}", sources[0], sources[1]),
        }
    }
}

/// A step with its data source resolved, ready for query generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub step_id: String,
    pub tier: AnalysisTier,
    pub logic: String,
    pub target: TableTarget,
    pub metrics: Vec<String>,
    pub group_by: Vec<String>,
    pub join_keys: Vec<String>,
}

/// Result of executing one work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success {
        step_id: String,
        query: String,
        rows: Vec<Record>,
    },
    Failed {
        step_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        query_attempted: Option<String>,
        error_message: String,
    },
}

impl ExecutionOutcome {
    pub fn failed(
        step_id: impl Into<String>,
        query_attempted: Option<String>,
        error_message: impl Into<String>,
    ) -> Self {
        ExecutionOutcome::Failed {
            step_id: step_id.into(),
            query_attempted,
            error_message: error_message.into(),
        }
    }

    pub fn step_id(&self) -> &str {
        match self {
            ExecutionOutcome::Success { step_id, .. } | ExecutionOutcome::Failed { step_id, .. } => {
                step_id
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }
}

/// A ranked record together with its share of the metric total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierRecord {
    pub record: Record,
    pub pct_of_total_impact: f64,
}

/// Compact digest of one execution outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SummaryBody {
    Correlation {
        dimension_name: String,
        metrics: Record,
        note: String,
    },
    Distribution {
        dimension_name: String,
        primary_metric: String,
        global_averages: Record,
        top_outliers: Vec<OutlierRecord>,
        bottom_outliers: Vec<OutlierRecord>,
        total_records: usize,
    },
    Empty {
        message: String,
    },
    Failed {
        error_message: String,
    },
}

/// Summary of one work item within a level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub step_id: String,
    #[serde(flatten)]
    pub body: SummaryBody,
}

impl LevelSummary {
    pub fn is_failed(&self) -> bool {
        matches!(self.body, SummaryBody::Failed { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.body {
            SummaryBody::Failed { error_message } => Some(error_message),
            _ => None,
        }
    }
}

/// Summaries of one completed level, as stored in the result vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelEvidence {
    pub level_id: u32,
    pub tier: AnalysisTier,
    pub title: String,
    pub summaries: Vec<LevelSummary>,
}
