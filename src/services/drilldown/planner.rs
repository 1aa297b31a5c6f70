//! Blueprint Planner
//!
//! Asks the generator for a blueprint, then runs the deterministic
//! normalization passes that make the plan auditable whether or not the
//! generator listened:
//!
//! - baseline (always): level ids renumbered, Category steps read the
//!   category table, the Correlation level joins the profile pair on the
//!   period column with the quality, volume and tenure metrics
//! - feedback (after a rejection): each audit issue is repaired by tier
//! - targeted repair (after an execution failure): completed levels are kept
//!   verbatim and only the rest is replaced

use insight_cascade_core::{
    AnalysisTier, Blueprint, DatasetProfile, Level, PeriodPair, SchemaRegistry, Step, TableTarget,
    MULTI_TABLE_SENTINEL,
};
use insight_cascade_llm::LlmProvider;
use insight_cascade_quality_gates::{AuditFeedback, IssueKind};

use super::expander::resolve_target;
use super::prompts;
use super::state::PlannerFeedback;

/// Everything one planner invocation reads.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub question: &'a str,
    pub requested_tier: AnalysisTier,
    pub registry: &'a SchemaRegistry,
    pub profile: &'a DatasetProfile,
    pub periods: &'a PeriodPair,
    pub feedback: &'a PlannerFeedback,
    pub previous: &'a Blueprint,
    /// Leading levels of `previous` that already completed
    pub keep_levels: usize,
}

/// A drafted blueprint plus the notes produced while drafting it.
#[derive(Debug, Clone)]
pub struct PlanDraft {
    pub blueprint: Blueprint,
    pub notes: Vec<String>,
    /// The generator's answer was unusable and the previous plan was reused
    pub fell_back: bool,
}

/// Draft the next blueprint. Never fails: an unusable generator answer falls
/// back to the previous blueprint (possibly empty).
pub async fn draft_blueprint(provider: &dyn LlmProvider, request: &PlanRequest<'_>) -> PlanDraft {
    let prompt = prompts::planner_prompt(
        request.question,
        request.requested_tier,
        request.registry,
        request.profile,
        request.periods,
        &request.feedback.render(),
    );

    let generated = match provider.generate(&prompt, true).await {
        Ok(text) => Blueprint::from_generator_text(&text).map_err(|e| e.to_string()),
        Err(e) => Err(format!("generation failed: {}", e)),
    };

    let mut notes = Vec::new();
    let (mut blueprint, fell_back) = match generated {
        Ok(blueprint) => (blueprint, false),
        Err(reason) => {
            tracing::warn!(reason = %reason, "[Planner] unusable blueprint, reusing previous");
            notes.push(format!(
                "Planner: {}; keeping the previous blueprint.",
                reason
            ));
            (request.previous.clone(), true)
        }
    };

    if let Some(feedback) = request.feedback.issues() {
        apply_feedback(&mut blueprint, feedback, request);
    }
    normalize_baseline(&mut blueprint, request.profile);

    if request.keep_levels > 0 {
        blueprint = Blueprint::splice(request.previous, request.keep_levels, blueprint);
        renumber(&mut blueprint);
    }

    let chain: Vec<&str> = blueprint.levels.iter().map(|l| l.tier.as_str()).collect();
    tracing::info!(
        levels = blueprint.len(),
        kept = request.keep_levels,
        "[Planner] blueprint drafted"
    );
    notes.push(format!(
        "Planner: Blueprint drafted with {} levels ({}).",
        blueprint.len(),
        chain.join(" -> ")
    ));

    PlanDraft {
        blueprint,
        notes,
        fell_back,
    }
}

// ============================================================================
// Baseline
// ============================================================================

/// Normalization applied to every blueprint.
pub fn normalize_baseline(blueprint: &mut Blueprint, profile: &DatasetProfile) {
    renumber(blueprint);
    let category_table = profile.default_table(AnalysisTier::Category).to_string();

    for level in &mut blueprint.levels {
        match level.tier {
            AnalysisTier::Category if !DatasetProfile::is_sentinel(&category_table) => {
                for step in &mut level.steps {
                    step.target_table = category_table.clone();
                }
            }
            AnalysisTier::Correlation => normalize_correlation_level(level, profile),
            _ => {}
        }
    }
}

fn renumber(blueprint: &mut Blueprint) {
    for (index, level) in blueprint.levels.iter_mut().enumerate() {
        level.id = index as u32 + 1;
    }
}

fn normalize_correlation_level(level: &mut Level, profile: &DatasetProfile) {
    if level.steps.is_empty() {
        level.steps.push(Step::new(format!("{}.1", level.id), ""));
    }
    let period = profile.period_column.clone();
    let logic = prompts::correlation_logic(profile);

    for step in &mut level.steps {
        step.target_table = MULTI_TABLE_SENTINEL.to_string();
        step.join_keys = vec![period.clone()];
        step.group_by = vec![period.clone()];
        step.logic = logic.clone();
        step.metrics.retain(|m| !profile.is_forbidden(m));
        for required in profile.correlation_metrics() {
            if !step.metrics.iter().any(|m| m.trim().eq_ignore_ascii_case(required)) {
                step.metrics.push(required.to_string());
            }
        }
    }
}

/// A complete correlation level, used when a plan is missing one.
pub fn correlation_level(id: u32, profile: &DatasetProfile) -> Level {
    let mut level = Level {
        id,
        title: format!(
            "{} and {} correlation",
            profile.quality_metric, profile.volume_metric
        ),
        tier: AnalysisTier::Correlation,
        table: None,
        steps: Vec::new(),
    };
    normalize_correlation_level(&mut level, profile);
    level
}

// ============================================================================
// Feedback
// ============================================================================

fn apply_feedback(blueprint: &mut Blueprint, feedback: &AuditFeedback, request: &PlanRequest<'_>) {
    let requested = request.requested_tier;
    let profile = request.profile;

    if feedback.has(IssueKind::ScopeMismatch) {
        blueprint.levels.retain(|l| l.tier >= requested);
    }
    if feedback.has(IssueKind::DepthMismatch)
        || feedback.has(IssueKind::HierarchyOrder)
        || feedback.has(IssueKind::MissingCorrelationLevel)
    {
        rebuild_descent(blueprint, requested, profile);
    }

    for issue in &feedback.issues {
        let Some(tier) = issue.tier else {
            continue;
        };
        let subject = issue.subject.as_deref();
        for level in blueprint.levels.iter_mut().filter(|l| l.tier == tier) {
            match (issue.kind, subject) {
                (IssueKind::UnknownTable, _) => repair_tables(level, request.registry, profile),
                (IssueKind::UnknownColumn | IssueKind::ForbiddenMetric, Some(column)) => {
                    drop_column(level, column)
                }
                (IssueKind::GrainViolation, _) => reset_grain(level, request.registry, profile),
                (IssueKind::IllegalJoinKey, _) => {
                    for step in &mut level.steps {
                        step.join_keys = vec![profile.period_column.clone()];
                        step.target_table = MULTI_TABLE_SENTINEL.to_string();
                    }
                }
                (IssueKind::MissingCorrelationMetric, Some(metric)) => {
                    if let Some(step) = level.steps.first_mut() {
                        if !step.metrics.iter().any(|m| m.eq_ignore_ascii_case(metric)) {
                            step.metrics.push(metric.to_string());
                        }
                    }
                }
                (IssueKind::EmptyLevel, _) if level.steps.is_empty() => {
                    let step = skeleton_step(level, request.registry, profile);
                    level.steps.push(step);
                }
                _ => {}
            }
        }
    }
}

/// Keep the first level of each tier the question needs, in hierarchy
/// order, and make sure the plan ends with a correlation level.
fn rebuild_descent(blueprint: &mut Blueprint, requested: AnalysisTier, profile: &DatasetProfile) {
    let mut levels: Vec<Level> = requested
        .descent()
        .iter()
        .filter_map(|tier| blueprint.levels.iter().find(|l| l.tier == *tier).cloned())
        .collect();

    if !levels.iter().any(|l| l.tier == AnalysisTier::Correlation) {
        levels.push(correlation_level(levels.len() as u32 + 1, profile));
    }
    blueprint.levels = levels;
}

fn repair_tables(level: &mut Level, registry: &SchemaRegistry, profile: &DatasetProfile) {
    let tier = level.tier;
    let usable = |name: &str| {
        if DatasetProfile::is_sentinel(name) {
            tier == AnalysisTier::Correlation
        } else {
            registry.contains_table(name)
        }
    };
    let replacement = match profile.default_table(tier) {
        t if DatasetProfile::is_sentinel(t) && tier != AnalysisTier::Correlation => {
            profile.fallback_table.clone()
        }
        t => t.to_string(),
    };

    if level
        .table
        .as_deref()
        .is_some_and(|t| !t.trim().is_empty() && !usable(t.trim()))
    {
        level.table = None;
    }
    for step in &mut level.steps {
        let table = step.target_table.trim();
        if !table.is_empty() && !usable(table) {
            step.target_table = replacement.clone();
        }
    }
}

fn drop_column(level: &mut Level, column: &str) {
    let column = column.trim();
    let quoted = format!("`{}`", column);
    for step in &mut level.steps {
        for list in [&mut step.metrics, &mut step.group_by, &mut step.join_keys] {
            list.retain(|c| !c.trim().eq_ignore_ascii_case(column));
        }
        step.logic = step.logic.replace(&quoted, column);
    }
}

fn reset_grain(level: &mut Level, registry: &SchemaRegistry, profile: &DatasetProfile) {
    let targets: Vec<TableTarget> = level
        .steps
        .iter()
        .map(|step| resolve_target(level, step, profile))
        .collect();
    let tier = level.tier;

    for (step, target) in level.steps.iter_mut().zip(targets) {
        let keep_period = step.group_by.iter().any(|c| profile.is_period_column(c));
        let mut group_by: Vec<String> = match &target {
            TableTarget::Single { table } => tier
                .canonical_dimensions()
                .iter()
                .find(|d| registry.has_column(table, d))
                .map(|d| vec![d.to_string()])
                .unwrap_or_default(),
            TableTarget::MultiTable { .. } => Vec::new(),
        };
        if keep_period || tier == AnalysisTier::Correlation {
            group_by.push(profile.period_column.clone());
        }
        step.group_by = group_by;
    }
}

fn skeleton_step(level: &Level, registry: &SchemaRegistry, profile: &DatasetProfile) -> Step {
    let step = Step::new(
        format!("{}.1", level.id),
        format!(
            "Compare {} and {} between the current and prior period.",
            profile.preferred_metric, profile.quality_metric
        ),
    );
    let TableTarget::Single { table } = resolve_target(level, &step, profile) else {
        return step;
    };
    let metrics: Vec<&str> = [&profile.preferred_metric, &profile.quality_metric]
        .into_iter()
        .filter(|m| registry.has_column(&table, m))
        .map(String::as_str)
        .collect();
    step.with_table(table.clone()).with_metrics(&metrics)
}
