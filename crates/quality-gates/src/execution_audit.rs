//! Execution Audit
//!
//! Pure check of one executed level. Any failed step sends the run back to
//! the planner for a targeted repair of that level; otherwise the cursor
//! advances or the run moves on to synthesis.

use insight_cascade_core::{Level, LevelSummary};

use crate::models::{AuditFeedback, AuditIssue, GateDecision, IssueKind};

/// Route after `level` (at `level_index`, zero-based) produced `summaries`.
///
/// The forensic narrative for a successful level is requested by the caller;
/// this function only decides where to go.
pub fn audit_execution(
    level_index: usize,
    level: &Level,
    total_levels: usize,
    summaries: &[LevelSummary],
) -> GateDecision {
    let failures: Vec<(&str, &str)> = summaries
        .iter()
        .filter_map(|s| s.error_message().map(|e| (s.step_id.as_str(), e)))
        .collect();

    if summaries.is_empty() {
        let message = "the level produced no results";
        let issue = AuditIssue::new(
            level.id,
            Some(level.tier),
            IssueKind::ExecutionFailure,
            message,
        );
        return failure_decision(level, vec![issue], message);
    }

    if let Some((_, first_error)) = failures.first() {
        let issues = failures
            .iter()
            .map(|(step_id, error)| {
                AuditIssue::new(
                    level.id,
                    Some(level.tier),
                    IssueKind::ExecutionFailure,
                    format!("step {} failed: {}", step_id, error),
                )
                .with_subject(*step_id)
            })
            .collect();
        return failure_decision(level, issues, first_error);
    }

    if level_index + 1 < total_levels {
        tracing::debug!(level = level.id, "[Gatekeeper] level passed, advancing");
        GateDecision::next_level()
    } else {
        tracing::debug!(level = level.id, "[Gatekeeper] final level passed");
        GateDecision::finalize()
    }
}

fn failure_decision(level: &Level, issues: Vec<AuditIssue>, first_error: &str) -> GateDecision {
    let note = format!(
        "CRITICAL ERROR AT LEVEL {}: {}. REDESIGNING LEVEL.",
        level.id, first_error
    );
    tracing::warn!(level = level.id, error = %first_error, "[Gatekeeper] level failed");
    GateDecision::recontextualize(AuditFeedback::new(issues), note)
}
