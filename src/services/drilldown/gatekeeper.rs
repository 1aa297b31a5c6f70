//! Gatekeeper
//!
//! Thin async layer over the pure audits. A level that passes the execution
//! audit gets its forensic narrative here; a narrative that cannot be
//! produced is treated like a failed level.

use insight_cascade_core::{
    AnalysisTier, Blueprint, DatasetProfile, Level, LevelSummary, SchemaRegistry,
};
use insight_cascade_llm::LlmProvider;
use insight_cascade_quality_gates::{
    audit_execution, audit_plan, AuditFeedback, AuditIssue, GateDecision, IssueKind,
    PlanAuditContext,
};

use super::prompts;

/// Audit a freshly drafted blueprint.
pub fn review_plan(
    requested_tier: AnalysisTier,
    registry: &SchemaRegistry,
    profile: &DatasetProfile,
    blueprint: &Blueprint,
) -> GateDecision {
    let ctx = PlanAuditContext::new(requested_tier, registry, profile);
    audit_plan(&ctx, blueprint)
}

/// Execution audit result plus the narrative for a passing level.
#[derive(Debug, Clone)]
pub struct LevelReview {
    pub decision: GateDecision,
    pub narrative: Option<String>,
}

/// Audit one executed level; on success, ask for its forensic narrative.
pub async fn review_level(
    provider: &dyn LlmProvider,
    level_index: usize,
    level: &Level,
    total_levels: usize,
    summaries: &[LevelSummary],
    profile: &DatasetProfile,
) -> LevelReview {
    let decision = audit_execution(level_index, level, total_levels, summaries);
    if decision.is_repair() {
        return LevelReview {
            decision,
            narrative: None,
        };
    }

    let prompt = prompts::narrative_prompt(level, summaries, profile);
    match provider.generate(&prompt, false).await {
        Ok(text) => LevelReview {
            decision,
            narrative: Some(text.trim().to_string()),
        },
        Err(e) => {
            let message = format!("narrative generation failed: {}", e);
            tracing::warn!(level = level.id, error = %e, "[Gatekeeper] narrative failed");
            let issue = AuditIssue::new(
                level.id,
                Some(level.tier),
                IssueKind::ExecutionFailure,
                message.clone(),
            );
            LevelReview {
                decision: GateDecision::recontextualize(
                    AuditFeedback::new(vec![issue]),
                    format!(
                        "CRITICAL ERROR AT LEVEL {}: {}. REDESIGNING LEVEL.",
                        level.id, message
                    ),
                ),
                narrative: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::drilldown::test_support::FnProvider;
    use insight_cascade_core::{Step, SummaryBody};
    use insight_cascade_llm::LlmError;
    use insight_cascade_quality_gates::Route;

    fn vendor_level() -> Level {
        Level {
            id: 2,
            title: "Vendor sentiment".to_string(),
            tier: AnalysisTier::Vendor,
            table: None,
            steps: vec![Step::new("2.1", "Rank vendors")],
        }
    }

    fn empty_summary(step_id: &str) -> LevelSummary {
        LevelSummary {
            step_id: step_id.to_string(),
            body: SummaryBody::Empty {
                message: "no rows".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_passing_level_gets_narrative() {
        let provider = FnProvider::new(|_| Ok("  Vendor Acme leads the decline.\n".to_string()));
        let review = review_level(
            &provider,
            1,
            &vendor_level(),
            4,
            &[empty_summary("2.1")],
            &DatasetProfile::default(),
        )
        .await;

        assert_eq!(review.decision.route, Route::NextLevel);
        assert_eq!(review.narrative.as_deref(), Some("Vendor Acme leads the decline."));
        assert!(provider.prompts()[0].starts_with(prompts::NARRATIVE_ROLE));
    }

    #[tokio::test]
    async fn test_failed_level_skips_narrative() {
        let provider = FnProvider::new(|_| Ok("unused".to_string()));
        let failed = LevelSummary {
            step_id: "2.1".to_string(),
            body: SummaryBody::Failed {
                error_message: "Unrecognized name: Spend".to_string(),
            },
        };
        let review = review_level(
            &provider,
            1,
            &vendor_level(),
            4,
            &[failed],
            &DatasetProfile::default(),
        )
        .await;

        assert_eq!(review.decision.route, Route::Recontextualize);
        assert!(review.narrative.is_none());
        assert!(provider.prompts().is_empty());
        assert_eq!(
            review.decision.note.as_deref(),
            Some("CRITICAL ERROR AT LEVEL 2: Unrecognized name: Spend. REDESIGNING LEVEL.")
        );
    }

    #[tokio::test]
    async fn test_narrative_failure_is_a_repair() {
        let provider = FnProvider::new(|_| {
            Err(LlmError::EmptyResponse {
                provider: "fn".to_string(),
            })
        });
        let review = review_level(
            &provider,
            3,
            &vendor_level(),
            4,
            &[empty_summary("2.1")],
            &DatasetProfile::default(),
        )
        .await;

        assert!(review.decision.is_repair());
        let feedback = review.decision.feedback.unwrap();
        assert!(feedback.has(IssueKind::ExecutionFailure));
        assert_eq!(feedback.first_level(), Some(2));
    }

    #[test]
    fn test_review_plan_flags_empty_blueprint() {
        let decision = review_plan(
            AnalysisTier::Vendor,
            &SchemaRegistry::default(),
            &DatasetProfile::default(),
            &Blueprint::default(),
        );
        assert!(decision.is_repair());
        assert!(decision.feedback.unwrap().has(IssueKind::EmptyBlueprint));
    }
}
