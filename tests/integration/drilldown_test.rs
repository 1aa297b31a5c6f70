//! Drill-down Integration Tests
//!
//! End-to-end runs of the control loop against scripted doubles.

use std::sync::Arc;

use insight_cascade::services::drilldown::prompts::{PLANNER_ROLE, SQL_ROLE};
use insight_cascade::services::drilldown::{review_plan, sanitize_report};
use insight_cascade::{DrilldownRunner, PipelineSettings, RunStatus};
use insight_cascade_core::{
    AnalysisTier, Blueprint, DatasetProfile, Level, SchemaRegistry, Step, SummaryBody,
    MULTI_TABLE_SENTINEL,
};
use insight_cascade_quality_gates::{IssueKind, Route};
use insight_cascade_tools::TableQualifier;

use crate::common::{MemoryWarehouse, ScriptedProvider, GLOBAL_PLAN, VENDOR_PLAN};

const VENDOR_QUESTION: &str = "Which vendors drove the sentiment decline last quarter?";

// ============================================================================
// Helper Functions
// ============================================================================

fn runner(
    provider: &Arc<ScriptedProvider>,
    warehouse: &Arc<MemoryWarehouse>,
    max_repair_cycles: u32,
) -> DrilldownRunner {
    DrilldownRunner::new(
        provider.clone(),
        warehouse.clone(),
        SchemaRegistry::default(),
        DatasetProfile::default(),
        Some(TableQualifier::new("proj", "ds")),
        PipelineSettings {
            max_repair_cycles,
            max_in_flight: 4,
        },
    )
    .unwrap()
}

fn has_note(notes: &[String], needle: &str) -> bool {
    notes.iter().any(|n| n.contains(needle))
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_vendor_question_runs_four_levels() {
    let provider = Arc::new(ScriptedProvider::new(&[VENDOR_PLAN]));
    let warehouse = Arc::new(MemoryWarehouse::new());

    let report = runner(&provider, &warehouse, 8).answer(VENDOR_QUESTION).await;

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.iterations, 1);
    assert_eq!(report.repair_cycles, 0);
    let tiers: Vec<AnalysisTier> = report.result_vault.iter().map(|l| l.tier).collect();
    assert_eq!(
        tiers,
        vec![
            AnalysisTier::Vendor,
            AnalysisTier::Category,
            AnalysisTier::Agent,
            AnalysisTier::Correlation
        ]
    );
    assert_eq!(report.level_narratives.len(), 4);
    assert!(has_note(&report.notes, "Status: Approved"));
    assert_eq!(report.periods.current, "2026-01-01");

    // Every executed query was qualified by the guard.
    for query in warehouse.queries().iter().skip(1) {
        assert!(query.contains("`proj.ds."), "unqualified query: {query}");
        assert!(!query.contains("```"));
    }
}

#[tokio::test]
async fn test_distribution_ranks_bottom_two() {
    let provider = Arc::new(ScriptedProvider::new(&[VENDOR_PLAN]));
    let warehouse = Arc::new(MemoryWarehouse::new());

    let report = runner(&provider, &warehouse, 8).answer(VENDOR_QUESTION).await;

    match &report.result_vault[0].summaries[0].body {
        SummaryBody::Distribution {
            bottom_outliers,
            top_outliers,
            total_records,
            ..
        } => {
            assert_eq!(*total_records, 4);
            let bottom: Vec<f64> = bottom_outliers.iter().map(|o| o.pct_of_total_impact).collect();
            assert_eq!(bottom, vec![10.0, 20.0]);
            assert_eq!(bottom_outliers[0].record["Entity"], "E1");
            assert_eq!(top_outliers.len(), 2);
        }
        other => panic!("expected a distribution summary, got {other:?}"),
    }
    match &report.result_vault[3].summaries[0].body {
        SummaryBody::Correlation { metrics, .. } => {
            assert_eq!(metrics["corr_quality_volume"], 0.42);
        }
        other => panic!("expected a correlation summary, got {other:?}"),
    }
}

#[tokio::test]
async fn test_report_is_sanitized() {
    let provider = Arc::new(ScriptedProvider::new(&[VENDOR_PLAN]));
    let warehouse = Arc::new(MemoryWarehouse::new());

    let report = runner(&provider, &warehouse, 8).answer(VENDOR_QUESTION).await;

    assert_eq!(
        report.report,
        "## Executive Summary\nVendor V1 carries the decline.\n---\n## Recommended Actions\nRebalance agent load."
    );
    assert_eq!(sanitize_report(&report.report), report.report);
}

// ============================================================================
// Plan audit
// ============================================================================

#[tokio::test]
async fn test_six_level_plan_is_rejected_for_vendor_question() {
    let provider = Arc::new(ScriptedProvider::new(&[GLOBAL_PLAN, VENDOR_PLAN]));
    let warehouse = Arc::new(MemoryWarehouse::new());

    let report = runner(&provider, &warehouse, 8).answer(VENDOR_QUESTION).await;

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.iterations, 2);
    assert_eq!(report.repair_cycles, 1);
    assert!(has_note(
        &report.notes,
        "Status: Fixing Blueprint: Issue in Level 1: scope mismatch"
    ));
    let planner_prompts = provider.prompts_for(PLANNER_ROLE);
    assert_eq!(planner_prompts.len(), 2);
    assert!(planner_prompts[1].contains("Issue in Level 1: scope mismatch"));
    assert_eq!(report.result_vault[0].tier, AnalysisTier::Vendor);
}

#[tokio::test]
async fn test_persistent_broad_plan_is_normalized_to_scope() {
    let provider = Arc::new(ScriptedProvider::new(&[GLOBAL_PLAN]));
    let warehouse = Arc::new(MemoryWarehouse::new());

    let report = runner(&provider, &warehouse, 8).answer(VENDOR_QUESTION).await;

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.iterations, 2);
    assert_eq!(report.result_vault.len(), 4);
    assert_eq!(report.result_vault[0].tier, AnalysisTier::Vendor);
    assert_eq!(report.result_vault[0].level_id, 1);
}

#[test]
fn test_six_level_blueprint_feedback_names_scope() {
    let blueprint = Blueprint::from_generator_text(GLOBAL_PLAN).unwrap();
    let decision = review_plan(
        AnalysisTier::Vendor,
        &SchemaRegistry::default(),
        &DatasetProfile::default(),
        &blueprint,
    );

    assert_eq!(decision.route, Route::Recontextualize);
    let feedback = decision.feedback.unwrap();
    assert!(feedback.has(IssueKind::ScopeMismatch));
    assert!(feedback.has(IssueKind::DepthMismatch));
    assert!(feedback.render().starts_with("Issue in Level 1: scope mismatch"));
}

#[test]
fn test_correlation_join_on_tier_key_is_rejected() {
    let mut blueprint = Blueprint::from_generator_text(VENDOR_PLAN).unwrap();
    blueprint.levels[3] = Level {
        id: 4,
        title: "Sales link".to_string(),
        tier: AnalysisTier::Correlation,
        table: None,
        steps: vec![Step::new("4.1", "Join on vendor")
            .with_table(MULTI_TABLE_SENTINEL)
            .with_metrics(&["CurrentQuarter_Sentiment_Shift", "Total_Sales_Volume"])
            .with_join_keys(&["Vendor_Name"])],
    };
    blueprint.levels[1].steps[0].target_table = "agg_category_performance".to_string();

    let decision = review_plan(
        AnalysisTier::Vendor,
        &SchemaRegistry::default(),
        &DatasetProfile::default(),
        &blueprint,
    );

    assert_eq!(decision.route, Route::Recontextualize);
    let feedback = decision.feedback.unwrap();
    let issue = feedback.of_kind(IssueKind::IllegalJoinKey).next().unwrap();
    assert_eq!(issue.level_id, 4);
    assert_eq!(issue.subject.as_deref(), Some("Vendor_Name"));
    assert!(issue.detail.contains("on Quarter only"));
}

// ============================================================================
// Execution failures
// ============================================================================

#[tokio::test]
async fn test_failed_item_routes_level_back_to_planning() {
    let provider = Arc::new(ScriptedProvider::new(&[VENDOR_PLAN]));
    let warehouse = Arc::new(MemoryWarehouse::failing("agg_agent_performance", Some(1)));

    let report = runner(&provider, &warehouse, 8).answer(VENDOR_QUESTION).await;

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.iterations, 2);
    assert_eq!(report.repair_cycles, 1);
    assert!(has_note(&report.notes, "CRITICAL ERROR AT LEVEL 1:"));

    // Both items of the failing level ran; the sibling was not aborted.
    let queries = warehouse.queries();
    let vendor_runs = queries
        .iter()
        .filter(|q| q.contains("agg_vendor_performance"))
        .count();
    assert_eq!(vendor_runs, 2);

    let planner_prompts = provider.prompts_for(PLANNER_ROLE);
    assert!(planner_prompts[1].contains("Issue in Level 1: execution failure: step 1.2 failed"));
    assert!(planner_prompts[1].contains("The query for level 1 failed"));
    assert_eq!(report.result_vault.len(), 4);
}

#[tokio::test]
async fn test_perpetual_failure_ends_incomplete_with_partial_vault() {
    let provider = Arc::new(ScriptedProvider::new(&[VENDOR_PLAN]));
    let warehouse = Arc::new(MemoryWarehouse::failing("agg_category_performance", None));

    let report = runner(&provider, &warehouse, 2).answer(VENDOR_QUESTION).await;

    assert_eq!(report.status, RunStatus::Incomplete);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.repair_cycles, 2);
    assert!(has_note(
        &report.notes,
        "Iteration limit exceeded after 2 repair cycles"
    ));

    // The completed vendor level is kept and never re-executed.
    assert_eq!(report.result_vault.len(), 1);
    assert_eq!(report.result_vault[0].tier, AnalysisTier::Vendor);
    let vendor_runs = warehouse
        .queries()
        .iter()
        .filter(|q| q.contains("agg_vendor_performance"))
        .count();
    assert_eq!(vendor_runs, 1);

    assert!(!report.report.is_empty());
    assert!(!report.report.contains("Level 2"));
    assert!(!report.report.to_lowercase().contains("missing"));
}

#[tokio::test]
async fn test_sql_prompts_only_for_executed_items() {
    let provider = Arc::new(ScriptedProvider::new(&[VENDOR_PLAN]));
    let warehouse = Arc::new(MemoryWarehouse::new());

    runner(&provider, &warehouse, 8).answer(VENDOR_QUESTION).await;

    // Five work items across four levels, plus the period query.
    assert_eq!(provider.prompts_for(SQL_ROLE).len(), 5);
    assert_eq!(warehouse.queries().len(), 6);
}
