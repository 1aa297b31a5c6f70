//! Plan Audit
//!
//! Pure validation of a freshly generated blueprint. Checks run in a fixed
//! order and every violation is collected, so the planner can repair all of
//! them in one pass:
//!
//! 1. empty blueprint (stops here)
//! 2. scope alignment: the first tier is the requested tier
//! 3. depth and hierarchy order
//! 4. the final tier is Correlation
//! 5. per step: table existence, schema fidelity, denylist, grain purity
//! 6. correlation level: period-only joins, quality and volume metrics

use std::collections::BTreeSet;

use insight_cascade_core::{
    infer_requested_tier, AnalysisTier, Blueprint, DatasetProfile, Level, SchemaRegistry, Step,
    MULTI_TABLE_SENTINEL,
};

use crate::models::{AuditFeedback, AuditIssue, GateDecision, IssueKind};

/// Everything the plan audit checks against.
#[derive(Debug, Clone, Copy)]
pub struct PlanAuditContext<'a> {
    pub requested_tier: AnalysisTier,
    pub registry: &'a SchemaRegistry,
    pub profile: &'a DatasetProfile,
}

impl<'a> PlanAuditContext<'a> {
    pub fn new(
        requested_tier: AnalysisTier,
        registry: &'a SchemaRegistry,
        profile: &'a DatasetProfile,
    ) -> Self {
        Self {
            requested_tier,
            registry,
            profile,
        }
    }

    pub fn for_question(
        question: &str,
        registry: &'a SchemaRegistry,
        profile: &'a DatasetProfile,
    ) -> Self {
        Self::new(infer_requested_tier(question), registry, profile)
    }
}

/// Audit `blueprint`; `Proceed` when satisfied, otherwise `Recontextualize`
/// with feedback naming the first offending level.
pub fn audit_plan(ctx: &PlanAuditContext<'_>, blueprint: &Blueprint) -> GateDecision {
    let issues = collect_issues(ctx, blueprint);
    if issues.is_empty() {
        tracing::debug!(levels = blueprint.len(), "[Gatekeeper] blueprint satisfied");
        return GateDecision::proceed();
    }

    let feedback = AuditFeedback::new(issues);
    tracing::info!(
        issues = feedback.issues.len(),
        first_level = ?feedback.first_level(),
        "[Gatekeeper] blueprint needs fixing"
    );
    let note = format!("Status: Fixing Blueprint: {}", feedback.render());
    GateDecision::recontextualize(feedback, note)
}

/// All violations in check order.
pub fn collect_issues(ctx: &PlanAuditContext<'_>, blueprint: &Blueprint) -> Vec<AuditIssue> {
    let requested = ctx.requested_tier;
    if blueprint.is_empty() {
        return vec![AuditIssue::new(
            1,
            Some(requested),
            IssueKind::EmptyBlueprint,
            format!(
                "the blueprint has no levels; produce {} levels ({})",
                requested.hierarchy_depth(),
                tier_chain(requested.descent())
            ),
        )];
    }

    let mut issues = Vec::new();
    check_structure(ctx, blueprint, &mut issues);
    for level in &blueprint.levels {
        check_level(ctx, level, &mut issues);
    }
    issues
}

fn tier_chain(tiers: &[AnalysisTier]) -> String {
    tiers
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

// ============================================================================
// Structure
// ============================================================================

fn check_structure(ctx: &PlanAuditContext<'_>, blueprint: &Blueprint, issues: &mut Vec<AuditIssue>) {
    let requested = ctx.requested_tier;
    let expected = requested.descent();
    let tiers = blueprint.tiers();
    let levels = &blueprint.levels;

    let first = &levels[0];
    if first.tier != requested {
        issues.push(
            AuditIssue::new(
                first.id,
                Some(first.tier),
                IssueKind::ScopeMismatch,
                format!(
                    "the question is scoped to {} but the blueprint starts at {}; the first level must be {}",
                    requested, first.tier, requested
                ),
            )
            .with_subject(first.tier.as_str()),
        );
    }

    let deviation = levels
        .iter()
        .zip(expected.iter())
        .find(|(level, tier)| level.tier != **tier);

    if tiers.len() != expected.len() {
        let at = deviation
            .map(|(level, _)| level)
            .or_else(|| levels.last())
            .unwrap_or(first);
        issues.push(AuditIssue::new(
            at.id,
            Some(at.tier),
            IssueKind::DepthMismatch,
            format!(
                "a {} question needs exactly {} levels ({}) but the blueprint has {} ({})",
                requested,
                expected.len(),
                tier_chain(expected),
                tiers.len(),
                tier_chain(&tiers)
            ),
        ));
    } else if let Some((level, tier)) = deviation {
        if level.id != first.id || first.tier == requested {
            issues.push(AuditIssue::new(
                level.id,
                Some(level.tier),
                IssueKind::HierarchyOrder,
                format!(
                    "expected {} at this position; levels must descend {} without skipping",
                    tier,
                    tier_chain(expected)
                ),
            ));
        }
    }

    if let Some(last) = levels.last() {
        if last.tier != AnalysisTier::Correlation {
            issues.push(AuditIssue::new(
                last.id,
                Some(last.tier),
                IssueKind::MissingCorrelationLevel,
                format!(
                    "the final level must be Correlation joining {} and {}, found {}",
                    ctx.profile.correlation_tables[0],
                    ctx.profile.correlation_tables[1],
                    last.tier
                ),
            ));
        }
    }
}

// ============================================================================
// Levels and steps
// ============================================================================

fn check_level(ctx: &PlanAuditContext<'_>, level: &Level, issues: &mut Vec<AuditIssue>) {
    let is_correlation = level.tier == AnalysisTier::Correlation;

    if level.steps.is_empty() {
        issues.push(AuditIssue::new(
            level.id,
            Some(level.tier),
            IssueKind::EmptyLevel,
            format!("the {} level has no steps", level.tier),
        ));
        return;
    }

    for step in &level.steps {
        let multi = is_correlation || DatasetProfile::is_sentinel(&step.target_table);
        if multi && !is_correlation {
            issues.push(
                AuditIssue::new(
                    level.id,
                    Some(level.tier),
                    IssueKind::UnknownTable,
                    format!(
                        "step {} targets {} which is reserved for the Correlation level; read from a single {} table",
                        step.step_id, MULTI_TABLE_SENTINEL, level.tier
                    ),
                )
                .with_subject(MULTI_TABLE_SENTINEL),
            );
            continue;
        }

        let tables: Vec<&str> = if multi {
            ctx.profile.correlation_pair().to_vec()
        } else {
            match resolve_single_table(ctx, level, step) {
                Ok(table) => vec![table],
                Err(issue) => {
                    issues.push(issue);
                    continue;
                }
            }
        };

        check_columns(ctx, level, step, &tables, multi, issues);
        check_grain(ctx, level, step, &tables, issues);
        if is_correlation {
            check_correlation_joins(ctx, level, step, issues);
        }
    }

    if is_correlation {
        check_correlation_metrics(ctx, level, issues);
    }
}

fn resolve_single_table<'a>(
    ctx: &PlanAuditContext<'a>,
    level: &Level,
    step: &Step,
) -> Result<&'a str, AuditIssue> {
    let named = Some(step.target_table.trim())
        .filter(|t| !t.is_empty())
        .or_else(|| level.table.as_deref().map(str::trim).filter(|t| !t.is_empty()));

    match named {
        Some(name) => ctx.registry.resolve_table(name).ok_or_else(|| {
            AuditIssue::new(
                level.id,
                Some(level.tier),
                IssueKind::UnknownTable,
                format!(
                    "step {} reads from {} which is not in the schema; use one of: {}",
                    step.step_id,
                    name,
                    ctx.registry.get_tables().join(", ")
                ),
            )
            .with_subject(name)
        }),
        None => Ok(ctx.profile.default_table(level.tier)),
    }
}

/// Identifiers written in backticks inside free-text logic.
fn backticked(logic: &str) -> impl Iterator<Item = &str> {
    logic
        .split('`')
        .skip(1)
        .step_by(2)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn check_columns(
    ctx: &PlanAuditContext<'_>,
    level: &Level,
    step: &Step,
    tables: &[&str],
    multi: bool,
    issues: &mut Vec<AuditIssue>,
) {
    let declared = step
        .metrics
        .iter()
        .chain(step.group_by.iter())
        .map(|c| (c.trim(), false))
        .chain(step.join_keys.iter().map(|c| (c.trim(), true)))
        .chain(backticked(&step.logic).map(|c| (c, false)));

    let mut seen: BTreeSet<(&str, bool)> = BTreeSet::new();
    for (column, is_join_key) in declared {
        if column.is_empty() || !seen.insert((column, is_join_key)) {
            continue;
        }

        if ctx.profile.is_forbidden(column) {
            issues.push(
                AuditIssue::new(
                    level.id,
                    Some(level.tier),
                    IssueKind::ForbiddenMetric,
                    format!(
                        "step {} uses {} which does not exist in this dataset; remove it",
                        step.step_id, column
                    ),
                )
                .with_subject(column),
            );
            continue;
        }

        let found = if is_join_key && multi {
            tables.iter().all(|t| ctx.registry.has_column(t, column))
        } else {
            tables.iter().any(|t| ctx.registry.has_column(t, column))
        };
        if found || (!is_join_key && ctx.registry.contains_table(column)) {
            continue;
        }

        let detail = if is_join_key && multi {
            format!(
                "step {} joins on {} which must exist in both {}",
                step.step_id,
                column,
                tables.join(" and ")
            )
        } else {
            format!(
                "step {} references column {} which does not exist in {}",
                step.step_id,
                column,
                tables.join(" or ")
            )
        };
        issues.push(
            AuditIssue::new(level.id, Some(level.tier), IssueKind::UnknownColumn, detail)
                .with_subject(column),
        );
    }
}

fn check_grain(
    ctx: &PlanAuditContext<'_>,
    level: &Level,
    step: &Step,
    tables: &[&str],
    issues: &mut Vec<AuditIssue>,
) {
    let allowed = level.tier.canonical_dimensions();
    for column in step.group_by.iter().map(|c| c.trim()) {
        if column.is_empty()
            || ctx.profile.is_period_column(column)
            || ctx.profile.is_forbidden(column)
            || !tables.iter().any(|t| ctx.registry.has_column(t, column))
            || allowed.contains(&column)
        {
            continue;
        }

        let detail = match level.tier {
            AnalysisTier::Global => format!(
                "step {} groups by {}; Global steps aggregate the whole organization and group by {} only",
                step.step_id, column, ctx.profile.period_column
            ),
            AnalysisTier::Correlation => format!(
                "step {} groups by {}; Correlation steps group by {} only",
                step.step_id, column, ctx.profile.period_column
            ),
            tier => format!(
                "step {} groups by {}; {} steps must group only by {}",
                step.step_id,
                column,
                tier,
                allowed.join(" or ")
            ),
        };
        issues.push(
            AuditIssue::new(level.id, Some(level.tier), IssueKind::GrainViolation, detail)
                .with_subject(column),
        );
    }
}

fn check_correlation_joins(
    ctx: &PlanAuditContext<'_>,
    level: &Level,
    step: &Step,
    issues: &mut Vec<AuditIssue>,
) {
    for key in step.join_keys.iter().map(|k| k.trim()) {
        if key.is_empty() || ctx.profile.is_period_column(key) {
            continue;
        }
        issues.push(
            AuditIssue::new(
                level.id,
                Some(level.tier),
                IssueKind::IllegalJoinKey,
                format!(
                    "step {} joins on {}; the correlation level must join {} and {} on {} only",
                    step.step_id,
                    key,
                    ctx.profile.correlation_tables[0],
                    ctx.profile.correlation_tables[1],
                    ctx.profile.period_column
                ),
            )
            .with_subject(key),
        );
    }
}

fn check_correlation_metrics(
    ctx: &PlanAuditContext<'_>,
    level: &Level,
    issues: &mut Vec<AuditIssue>,
) {
    for required in [&ctx.profile.quality_metric, &ctx.profile.volume_metric] {
        let covered = level
            .steps
            .iter()
            .flat_map(|s| s.metrics.iter())
            .any(|m| m.trim().eq_ignore_ascii_case(required));
        if !covered {
            issues.push(
                AuditIssue::new(
                    level.id,
                    Some(level.tier),
                    IssueKind::MissingCorrelationMetric,
                    format!(
                        "the correlation level must include both {} and {}; {} is missing",
                        ctx.profile.quality_metric, ctx.profile.volume_metric, required
                    ),
                )
                .with_subject(required.as_str()),
            );
        }
    }
}
