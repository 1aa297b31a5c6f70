//! Prompt Builders
//!
//! Every prompt sent to the generation service. Each starts with a role
//! header so transcripts (and test doubles) can tell the calls apart.

use insight_cascade_core::{
    AnalysisTier, DatasetProfile, Level, LevelSummary, PeriodPair, SchemaRegistry, WorkItem,
    MULTI_TABLE_SENTINEL,
};

pub const PLANNER_ROLE: &str = "# ROLE: Lead Diagnostic Planner";
pub const SQL_ROLE: &str = "# ROLE: Senior BigQuery Engineer";
pub const NARRATIVE_ROLE: &str = "# ROLE: Senior Diagnostic Reporter";
pub const WEAVER_ROLE: &str = "# ROLE: Principal Insight Scientist";
pub const DRAFTER_ROLE: &str = "# ROLE: Executive Report Writer";

/// Fixed logic statement carried by every correlation step.
pub fn correlation_logic(profile: &DatasetProfile) -> String {
    let mut logic = format!(
        "Multivariate JOIN on {period}. Correlate {quality} with {volume} across {a} and {b}, comparing '{period}' periods.",
        period = profile.period_column,
        quality = profile.quality_metric,
        volume = profile.volume_metric,
        a = profile.correlation_tables[0],
        b = profile.correlation_tables[1],
    );
    if let Some(tenure) = tenure(profile) {
        logic.push_str(&format!(
            " Correlate {tenure} with {volume} as well, to compare against the quality link.",
            volume = profile.volume_metric,
        ));
    }
    logic
}

fn tenure(profile: &DatasetProfile) -> Option<&str> {
    let tenure = profile.tenure_metric.trim();
    (!tenure.is_empty()).then_some(tenure)
}

fn grain_rule(tier: AnalysisTier, profile: &DatasetProfile) -> String {
    match tier {
        AnalysisTier::Global => format!(
            "- Global: no grouping dimension; aggregate the whole organization per {}.",
            profile.period_column
        ),
        AnalysisTier::Correlation => format!(
            "- Correlation: group by {} only.",
            profile.period_column
        ),
        tier => match tier.canonical_dimensions() {
            [primary, synonym] => format!(
                "- {tier}: group by {primary} (or {synonym} in the sales table) only."
            ),
            dims => format!("- {}: group by {} only.", tier, dims.join(", ")),
        },
    }
}

/// Planning prompt for a question scoped to `requested`.
pub fn planner_prompt(
    question: &str,
    requested: AnalysisTier,
    registry: &SchemaRegistry,
    profile: &DatasetProfile,
    periods: &PeriodPair,
    feedback: &str,
) -> String {
    let descent = requested.descent();
    let chain: Vec<&str> = descent.iter().map(|t| t.as_str()).collect();
    let schema = serde_json::to_string_pretty(&registry.full_payload()).unwrap_or_default();
    let grain: Vec<String> = descent.iter().map(|t| grain_rule(*t, profile)).collect();
    let tables: Vec<String> = descent
        .iter()
        .map(|t| format!("- {}: {}", t, profile.default_table(*t)))
        .collect();

    format!(
        r#"{PLANNER_ROLE}
You design a top-down diagnostic investigation over a closed set of aggregated tables.

## QUESTION
{question}

## SCHEMA (closed world)
{schema}
Only the tables and columns above exist. Never reference anything else.
These metrics do not exist and must never appear: {forbidden}.

## PERIODS
Current period: {current}. Prior period: {prior}. Every step compares the current period against the prior one.

## STRUCTURE
The question is scoped to {requested}. Produce exactly {depth} levels, one per tier, in this order: {chain}.
Never skip or repeat a tier.

## DEFAULT TABLES
{tables}

## GRAIN
{grain}

## CORRELATION LEVEL
The final level joins {corr_a} and {corr_b} on {period} only and uses target_table "{sentinel}".
Its metrics must include {quality} and {volume} so the relationship between quality and volume can be quantified.

## PREVIOUS FEEDBACK
{feedback}

## OUTPUT
Return only JSON in this shape:
{{"levels": [{{"id": 1, "title": "...", "tier": "{requested}", "table": "{first_table}", "steps": [{{"step_id": "1.1", "logic": "...", "target_table": "{first_table}", "metrics": ["{preferred}", "{quality}"], "group_by": [], "join_keys": []}}]}}]}}
"#,
        forbidden = profile.forbidden_metrics.join(", "),
        current = periods.current,
        prior = periods.prior,
        depth = requested.hierarchy_depth(),
        chain = chain.join(" -> "),
        tables = tables.join("\n"),
        grain = grain.join("\n"),
        corr_a = profile.correlation_tables[0],
        corr_b = profile.correlation_tables[1],
        period = profile.period_column,
        sentinel = MULTI_TABLE_SENTINEL,
        quality = profile.quality_metric,
        volume = profile.volume_metric,
        preferred = profile.preferred_metric,
        first_table = profile.default_table(requested),
    )
}

/// Query-writing prompt for one work item.
///
/// `tables` are the references the query must use verbatim.
pub fn sql_prompt(
    item: &WorkItem,
    schema: &serde_json::Value,
    tables: &[String],
    profile: &DatasetProfile,
    periods: &PeriodPair,
) -> String {
    let schema = serde_json::to_string_pretty(schema).unwrap_or_default();
    let period = &profile.period_column;

    let mut rules = vec![
        "- Reference tables exactly as listed above, fully qualified in backticks.".to_string(),
        format!(
            "- Use only the listed columns. Never use {}.",
            profile.forbidden_metrics.join(", ")
        ),
        "- Give every aggregate an explicit alias, e.g. AVG(x) AS avg_x.".to_string(),
        "- Use SAFE_DIVIDE(a, b) for every ratio; never the / operator.".to_string(),
        format!(
            "- Filter periods with the literal values only: WHERE {period} = '{}' for the current period and '{}' for the prior one.",
            periods.current, periods.prior
        ),
        format!(
            "- For period-over-period change use two CTEs: curr AS (... WHERE {period} = '{}'), prev AS (... WHERE {period} = '{}'), then join curr and prev on the grouping column.",
            periods.current, periods.prior
        ),
    ];

    match item.tier {
        AnalysisTier::Global => rules.push(
            "- Do not group by Region, Operating_Region, Vendor_Name, Category or Agent_Name; aggregate the whole organization."
                .to_string(),
        ),
        AnalysisTier::Correlation => {
            rules.push(format!(
                "- Join the two tables on CAST({period} AS DATE) only, with an explicit JOIN ... ON. Never join on any other column, and never use comma or CROSS joins."
            ));
            rules.push(format!(
                "- Return CORR({}, {}) as a column whose name contains corr, alongside the averages of both metrics.",
                profile.quality_metric, profile.volume_metric
            ));
            if let Some(tenure) = tenure(profile) {
                rules.push(format!(
                    "- Also return CORR({tenure}, {}) as a second corr column, plus the average of {tenure}.",
                    profile.volume_metric
                ));
            }
        }
        tier => {
            rules.push(format!(
                "- Group by {} only.",
                item.group_by
                    .first()
                    .map(String::as_str)
                    .or_else(|| tier.canonical_dimensions().first().copied())
                    .unwrap_or(period.as_str())
            ));
            if tier == AnalysisTier::Region {
                rules.push(
                    "- In the sales table the region column is Operating_Region.".to_string(),
                );
            }
        }
    }

    format!(
        r#"{SQL_ROLE}
Write one BigQuery Standard SQL query for the analysis step below.

## STEP
Tier: {tier}
Logic: {logic}
Metrics: {metrics}
Group by: {group_by}

## TABLES
{tables}

## SCHEMA
{schema}

## RULES
{rules}

Return only the SQL. No commentary.
"#,
        tier = item.tier,
        logic = item.logic,
        metrics = item.metrics.join(", "),
        group_by = item.group_by.join(", "),
        tables = tables.join("\n"),
        rules = rules.join("\n"),
    )
}

/// Forensic narrative prompt for one completed level.
pub fn narrative_prompt(
    level: &Level,
    summaries: &[LevelSummary],
    profile: &DatasetProfile,
) -> String {
    let data = serde_json::to_string_pretty(summaries).unwrap_or_default();
    format!(
        r#"{NARRATIVE_ROLE}
Write a short forensic summary of one slice of the investigation.

Title: {title}
Grain: {tier}
Data:
{data}

Cover:
- the top 2 and bottom 2 entries with their % of total impact
- the Why: high {preferred} with negative {quality} signals Workload Exhaustion; low {preferred} with negative {quality} signals Process Friction
- for correlation data, the direction and strength of the link between {quality} and {volume}{tenure_line}

Use only the numbers above. Do not number sections or refer to steps.
"#,
        title = level.title,
        tier = level.tier,
        preferred = profile.preferred_metric,
        quality = profile.quality_metric,
        volume = profile.volume_metric,
        tenure_line = tenure(profile)
            .map(|t| format!(
                "\n- whether {t} tracks {} more or less strongly than {} does",
                profile.volume_metric, profile.quality_metric
            ))
            .unwrap_or_default(),
    )
}

/// Pass one: weave the level narratives into one cross-level story.
pub fn weaver_prompt(question: &str, narratives: &[String], profile: &DatasetProfile) -> String {
    let findings = narratives
        .iter()
        .map(|n| format!("---\n{}", n.trim()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"{WEAVER_ROLE}
Weave the findings below into one causal story answering: {question}

## FINDINGS (broadest first)
{findings}

## METHOD
- Move from macro (organization and regions) through transmission (vendors and categories) to micro (agents).
- Quantify the link between {quality} and {volume} from the correlation findings: state the change in {volume} per 0.1 drop in {quality}.{tenure_line}
- Use only the findings given. If a slice has no findings, say nothing about it.
- Never use the words step, level, hypothesis, JSON or query.
"#,
        quality = profile.quality_metric,
        volume = profile.volume_metric,
        tenure_line = tenure(profile)
            .map(|t| format!(
                "\n- Compare the {t} and {volume} correlation with the {quality} and {volume} correlation. If experienced staff do not sell more while sentiment does move sales, name that gap the Veteran Paradox.",
                volume = profile.volume_metric,
                quality = profile.quality_metric,
            ))
            .unwrap_or_default(),
    )
}

/// Pass two: draft the final report from the woven story and the verified
/// numbers.
pub fn drafter_prompt(question: &str, woven: &str, digest: &serde_json::Value) -> String {
    let numbers = serde_json::to_string_pretty(digest).unwrap_or_default();
    format!(
        r#"{DRAFTER_ROLE}
Turn the analysis below into the final executive report answering: {question}

## ANALYSIS
{woven}

## VERIFIED NUMBERS
{numbers}

## FORMAT
- Markdown with ## sections: Executive Summary, Root Cause Chain, Hotspots, Quality and Volume Link, Recommended Actions.
- In the Quality and Volume Link section, set the tenure correlation beside the quality correlation when the numbers include both.
- Use the verified numbers wherever the analysis leaves a figure out.
- Never mention steps, levels, hypotheses or missing data.
"#,
        woven = woven.trim(),
    )
}
