//! Level Expander
//!
//! Turns one blueprint level into executable work items. Every item leaves
//! here with a concrete target, resolved in this order:
//!
//! 1. Correlation level, or a step naming the multi-table sentinel: the
//!    profile's correlation pair
//! 2. the step's own table
//! 3. the level-wide table
//! 4. the tier's default table
//! 5. the global fallback table

use insight_cascade_core::{
    bare_table_name, AnalysisTier, DatasetProfile, Level, SchemaRegistry, Step, TableTarget,
    WorkItem,
};

/// Work items for `level`, one per step, in step order.
pub fn expand_level(level: &Level, registry: &SchemaRegistry, profile: &DatasetProfile) -> Vec<WorkItem> {
    level
        .steps
        .iter()
        .map(|step| expand_step(level, step, registry, profile))
        .collect()
}

fn expand_step(level: &Level, step: &Step, registry: &SchemaRegistry, profile: &DatasetProfile) -> WorkItem {
    let target = resolve_target(level, step, profile);

    let group_by = if !step.group_by.is_empty() {
        step.group_by.clone()
    } else {
        default_grouping(level.tier, &target, registry, profile)
    };

    let join_keys = match (&target, step.join_keys.is_empty()) {
        (TableTarget::MultiTable { .. }, true) => vec![profile.period_column.clone()],
        _ => step.join_keys.clone(),
    };

    WorkItem {
        step_id: step.step_id.clone(),
        tier: level.tier,
        logic: step.logic.clone(),
        target,
        metrics: step.metrics.clone(),
        group_by,
        join_keys,
    }
}

/// Concrete target for one step.
pub fn resolve_target(level: &Level, step: &Step, profile: &DatasetProfile) -> TableTarget {
    let level_table = level.table.as_deref().map(str::trim).filter(|t| !t.is_empty());
    let step_table = Some(step.target_table.trim()).filter(|t| !t.is_empty());

    let multi = level.tier == AnalysisTier::Correlation
        || step_table.is_some_and(DatasetProfile::is_sentinel)
        || (step_table.is_none() && level_table.is_some_and(DatasetProfile::is_sentinel));
    if multi {
        return TableTarget::MultiTable {
            sources: profile.correlation_tables.clone(),
        };
    }

    let table = step_table
        .or(level_table)
        .filter(|t| !DatasetProfile::is_sentinel(t))
        .map(bare_table_name)
        .or_else(|| {
            Some(profile.default_table(level.tier)).filter(|t| !DatasetProfile::is_sentinel(t))
        })
        .unwrap_or(&profile.fallback_table);

    TableTarget::single(table)
}

/// The tier's canonical dimension as spelled in the resolved table.
fn default_grouping(
    tier: AnalysisTier,
    target: &TableTarget,
    registry: &SchemaRegistry,
    profile: &DatasetProfile,
) -> Vec<String> {
    match target {
        TableTarget::MultiTable { .. } => vec![profile.period_column.clone()],
        TableTarget::Single { table } => tier
            .canonical_dimensions()
            .iter()
            .find(|d| registry.has_column(table, d))
            .map(|d| vec![d.to_string()])
            .unwrap_or_default(),
    }
}
