//! Shared Test Doubles
//!
//! `ScriptedProvider` answers by prompt role: planner replies come from a
//! queue (the last one repeats), query prompts get a query built from the
//! listed tables, and every narrative pass returns fixed text.
//! `MemoryWarehouse` answers the period query, correlation queries and
//! distribution queries, and can be told to fail queries touching a table.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use insight_cascade::services::drilldown::prompts::{
    DRAFTER_ROLE, NARRATIVE_ROLE, PLANNER_ROLE, SQL_ROLE, WEAVER_ROLE,
};
use insight_cascade_core::Record;
use insight_cascade_llm::{
    LlmError, LlmProvider, LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig,
    UsageStats,
};
use insight_cascade_tools::{QueryEngine, QueryError};

// ============================================================================
// Blueprints
// ============================================================================

/// Four-level plan for a vendor-scoped question. Level 1 reads two tables.
pub const VENDOR_PLAN: &str = r#"{"levels": [
  {"id": 1, "title": "Vendor sentiment", "tier": "Vendor", "steps": [
    {"step_id": "1.1", "logic": "Rank vendors by volume", "target_table": "agg_vendor_performance",
     "metrics": ["CurrentQuarter_whole_frequency", "CurrentQuarter_Sentiment_Shift"], "group_by": ["Vendor_Name"]},
    {"step_id": "1.2", "logic": "Vendor load seen from agents", "target_table": "agg_agent_performance",
     "metrics": ["CurrentQuarter_whole_frequency"], "group_by": ["Vendor_Name"]}]},
  {"id": 2, "title": "Category friction", "tier": "Category", "steps": [
    {"step_id": "2.1", "logic": "Rank categories", "metrics": ["CurrentQuarter_Sentiment_Shift"], "group_by": ["Category"]}]},
  {"id": 3, "title": "Agent load", "tier": "Agent", "steps": [
    {"step_id": "3.1", "logic": "Rank agents", "metrics": ["CurrentQuarter_whole_frequency"], "group_by": ["Agent_Name"]}]},
  {"id": 4, "title": "Sales link", "tier": "Correlation", "steps": [
    {"step_id": "4.1", "logic": "Correlate", "metrics": ["CurrentQuarter_Sentiment_Shift", "Total_Sales_Volume"]}]}
]}"#;

/// Six-level plan starting at Global.
pub const GLOBAL_PLAN: &str = r#"{"levels": [
  {"id": 1, "title": "Organization", "tier": "Global", "steps": [
    {"step_id": "1.1", "logic": "Overall shift", "metrics": ["CurrentQuarter_Sentiment_Shift"]}]},
  {"id": 2, "title": "Regions", "tier": "Region", "steps": [
    {"step_id": "2.1", "logic": "Rank regions", "metrics": ["CurrentQuarter_Sentiment_Shift"], "group_by": ["Region"]}]},
  {"id": 3, "title": "Vendors", "tier": "Vendor", "steps": [
    {"step_id": "3.1", "logic": "Rank vendors", "metrics": ["CurrentQuarter_Sentiment_Shift"], "group_by": ["Vendor_Name"]}]},
  {"id": 4, "title": "Categories", "tier": "Category", "steps": [
    {"step_id": "4.1", "logic": "Rank categories", "metrics": ["CurrentQuarter_Sentiment_Shift"], "group_by": ["Category"]}]},
  {"id": 5, "title": "Agents", "tier": "Agent", "steps": [
    {"step_id": "5.1", "logic": "Rank agents", "metrics": ["CurrentQuarter_whole_frequency"], "group_by": ["Agent_Name"]}]},
  {"id": 6, "title": "Sales link", "tier": "Correlation", "steps": [
    {"step_id": "6.1", "logic": "Correlate", "metrics": ["CurrentQuarter_Sentiment_Shift", "Total_Sales_Volume"]}]}
]}"#;

/// Report text the drafting pass returns, with identifiers to be stripped.
pub const DRAFTED_REPORT: &str = "## Executive Summary\nStep 1.1: Vendor V1 carries the decline (Level 2).\n## Recommended Actions\nHypothesis 3 Rebalance agent load.";

// ============================================================================
// ScriptedProvider
// ============================================================================

pub struct ScriptedProvider {
    config: ProviderConfig,
    plans: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(plans: &[&str]) -> Self {
        Self {
            config: ProviderConfig::default(),
            plans: Mutex::new(plans.iter().map(|p| p.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts sent with the given role header, in order.
    pub fn prompts_for(&self, role: &str) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.starts_with(role))
            .cloned()
            .collect()
    }

    fn next_plan(&self) -> String {
        let mut plans = self.plans.lock().unwrap();
        if plans.len() > 1 {
            plans.pop_front().unwrap_or_default()
        } else {
            plans.front().cloned().unwrap_or_default()
        }
    }

    fn reply(&self, prompt: &str) -> LlmResult<String> {
        if prompt.starts_with(PLANNER_ROLE) {
            Ok(self.next_plan())
        } else if prompt.starts_with(SQL_ROLE) {
            Ok(query_for(prompt))
        } else if prompt.starts_with(NARRATIVE_ROLE) {
            Ok("V1 and V2 carry most of the volume while sentiment fell.".to_string())
        } else if prompt.starts_with(WEAVER_ROLE) {
            Ok("Sentiment fell where volume concentrated.".to_string())
        } else if prompt.starts_with(DRAFTER_ROLE) {
            Ok(DRAFTED_REPORT.to_string())
        } else {
            Err(LlmError::Other {
                message: "unexpected prompt".to_string(),
            })
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        _system: Option<String>,
        _request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let prompt = messages
            .into_iter()
            .map(|m| m.content)
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(prompt.clone());
        let content = self.reply(&prompt)?;
        Ok(LlmResponse {
            content: Some(content),
            usage: UsageStats::default(),
            model: self.config.model.clone(),
        })
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

/// Build a valid query from the tables and grouping listed in a query
/// prompt.
fn query_for(prompt: &str) -> String {
    let tables: Vec<&str> = prompt
        .split("## TABLES\n")
        .nth(1)
        .unwrap_or_default()
        .lines()
        .take_while(|l| !l.trim().is_empty())
        .collect();
    let group_by = prompt
        .lines()
        .find_map(|l| l.strip_prefix("Group by: "))
        .and_then(|g| g.split(',').next())
        .map(str::trim)
        .unwrap_or_default();

    match tables.as_slice() {
        [left, right] => format!(
            "SELECT CORR(a.CurrentQuarter_Sentiment_Shift, b.Total_Sales_Volume) AS corr_quality_volume FROM {left} a JOIN {right} b ON a.Quarter = b.Quarter"
        ),
        [table, ..] if !group_by.is_empty() && group_by != "Quarter" => format!(
            "```sql\nSELECT {group_by}, AVG(CurrentQuarter_whole_frequency) AS avg_volume FROM {table} GROUP BY {group_by}\n```"
        ),
        [table, ..] => format!("SELECT AVG(CurrentQuarter_whole_frequency) AS avg_volume FROM {table}"),
        [] => "SELECT 1 AS one".to_string(),
    }
}

// ============================================================================
// MemoryWarehouse
// ============================================================================

pub struct MemoryWarehouse {
    /// (table, remaining failures); `None` fails forever
    failing: Mutex<Option<(String, Option<u32>)>>,
    queries: Mutex<Vec<String>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self {
            failing: Mutex::new(None),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `times` queries that read `table`.
    pub fn failing(table: &str, times: Option<u32>) -> Self {
        let warehouse = Self::new();
        *warehouse.failing.lock().unwrap() = Some((table.to_string(), times));
        warehouse
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn should_fail(&self, query: &str) -> bool {
        let mut failing = self.failing.lock().unwrap();
        match failing.as_mut() {
            Some((table, remaining)) if query.contains(table.as_str()) => match remaining {
                None => true,
                Some(0) => false,
                Some(n) => {
                    *n -= 1;
                    true
                }
            },
            _ => false,
        }
    }
}

#[async_trait]
impl QueryEngine for MemoryWarehouse {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn execute(&self, query: &str) -> Result<Vec<Record>, QueryError> {
        self.queries.lock().unwrap().push(query.to_string());

        if query.starts_with("SELECT DISTINCT") {
            return Ok(vec![
                record(json!({"Quarter": "2026-01-01"})),
                record(json!({"Quarter": "2025-10-01"})),
            ]);
        }
        if self.should_fail(query) {
            return Err(QueryError::Rejected(
                "Unrecognized name: Vendor_Name at [1:8]".to_string(),
            ));
        }
        if query.contains("CORR(") {
            return Ok(vec![record(json!({"corr_quality_volume": 0.42}))]);
        }
        Ok([("E1", 10), ("E2", 20), ("E3", 30), ("E4", 40)]
            .into_iter()
            .map(|(name, volume)| {
                record(json!({
                    "Entity": name,
                    "CurrentQuarter_whole_frequency": volume,
                    "CurrentQuarter_Sentiment_Shift": -0.1,
                }))
            })
            .collect())
    }
}

pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
