//! Result Summarizer
//!
//! Reduces each execution outcome of a level to a `LevelSummary`:
//! correlation results keep their single multivariate record, everything else
//! becomes a distribution digest (averages plus the top and bottom two rows of
//! the primary metric). Pure: the same outcomes always serialize to the same
//! bytes.

use insight_cascade_core::{
    DatasetProfile, ExecutionOutcome, LevelSummary, OutlierRecord, Record, SummaryBody,
    TOTAL_ORGANIZATION,
};
use serde_json::{Number, Value};

/// Rows kept at each end of the ranking.
const OUTLIER_COUNT: usize = 2;

/// Summarize every outcome of a level, in order.
pub fn summarize_level(outcomes: &[ExecutionOutcome], profile: &DatasetProfile) -> Vec<LevelSummary> {
    outcomes
        .iter()
        .map(|outcome| summarize_outcome(outcome, profile))
        .collect()
}

/// Summarize one outcome. Failures pass through with their message.
pub fn summarize_outcome(outcome: &ExecutionOutcome, profile: &DatasetProfile) -> LevelSummary {
    let body = match outcome {
        ExecutionOutcome::Failed { error_message, .. } => SummaryBody::Failed {
            error_message: error_message.clone(),
        },
        ExecutionOutcome::Success { rows, .. } if rows.is_empty() => SummaryBody::Empty {
            message: "No rows returned for the requested periods.".to_string(),
        },
        ExecutionOutcome::Success { rows, .. } => {
            let rows = normalize_rows(rows);
            let columns = column_names(&rows);
            if columns.iter().any(|c| c.to_lowercase().contains("corr")) {
                correlation_summary(&rows, &columns, profile)
            } else {
                distribution_summary(&rows, &columns, profile)
            }
        }
    };

    LevelSummary {
        step_id: outcome.step_id().to_string(),
        body,
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Make every cell a JSON primitive: nested values become their JSON text,
/// and columns whose values are all numeric strings become numbers.
pub fn normalize_rows(rows: &[Record]) -> Vec<Record> {
    let mut rows: Vec<Record> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::Array(_) | Value::Object(_) => Value::String(v.to_string()),
                        other => other.clone(),
                    };
                    (k.clone(), v)
                })
                .collect()
        })
        .collect();

    for column in column_names(&rows) {
        let mut saw_string = false;
        let all_numeric = rows.iter().all(|row| match row.get(&column) {
            Some(Value::String(s)) => {
                saw_string = true;
                parse_number(s).is_some()
            }
            Some(Value::Number(_)) | Some(Value::Null) | None => true,
            Some(_) => false,
        });
        if !(saw_string && all_numeric) {
            continue;
        }
        for row in rows.iter_mut() {
            let parsed = match row.get(&column) {
                Some(Value::String(s)) => parse_number(s),
                _ => None,
            };
            if let Some(n) = parsed {
                row.insert(column.clone(), Value::Number(n));
            }
        }
    }
    rows
}

fn parse_number(s: &str) -> Option<Number> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Number::from(i));
    }
    s.parse::<f64>().ok().and_then(Number::from_f64)
}

/// Column names in first-seen order.
fn column_names(rows: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

/// Columns holding at least one number and nothing but numbers or nulls.
fn numeric_columns(rows: &[Record], columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .filter(|column| {
            let mut any = false;
            let all = rows.iter().all(|row| match row.get(column.as_str()) {
                Some(Value::Number(_)) => {
                    any = true;
                    true
                }
                Some(Value::Null) | None => true,
                Some(_) => false,
            });
            any && all
        })
        .cloned()
        .collect()
}

fn dimension_name(columns: &[String], numeric: &[String], profile: &DatasetProfile) -> String {
    columns
        .iter()
        .find(|c| !numeric.contains(*c) && !profile.is_period_column(c))
        .cloned()
        .unwrap_or_else(|| TOTAL_ORGANIZATION.to_string())
}

// ============================================================================
// Summaries
// ============================================================================

fn correlation_summary(rows: &[Record], columns: &[String], profile: &DatasetProfile) -> SummaryBody {
    let numeric = numeric_columns(rows, columns);
    SummaryBody::Correlation {
        dimension_name: dimension_name(columns, &numeric, profile),
        metrics: rows.first().cloned().unwrap_or_default(),
        note: format!(
            "Multivariate relationship between {} and {} across {} period rows.",
            profile.quality_metric,
            profile.volume_metric,
            rows.len()
        ),
    }
}

fn distribution_summary(rows: &[Record], columns: &[String], profile: &DatasetProfile) -> SummaryBody {
    let numeric = numeric_columns(rows, columns);
    let dimension = dimension_name(columns, &numeric, profile);
    let primary = numeric
        .iter()
        .find(|c| **c == profile.preferred_metric)
        .or_else(|| numeric.first())
        .cloned()
        .unwrap_or_default();

    let mut global_averages = Record::new();
    for column in &numeric {
        let values: Vec<f64> = rows
            .iter()
            .filter_map(|row| row.get(column.as_str()).and_then(Value::as_f64))
            .collect();
        if values.is_empty() {
            continue;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        global_averages.insert(column.clone(), rounded(mean, 4));
    }

    let ranked: Vec<(usize, f64)> = rows
        .iter()
        .enumerate()
        .filter_map(|(i, row)| row.get(primary.as_str()).and_then(Value::as_f64).map(|v| (i, v)))
        .collect();
    let total: f64 = ranked.iter().map(|(_, v)| v).sum();

    let mut descending = ranked.clone();
    descending.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut ascending = ranked;
    ascending.sort_by(|a, b| a.1.total_cmp(&b.1));

    let pick = |sorted: &[(usize, f64)]| -> Vec<OutlierRecord> {
        sorted
            .iter()
            .take(OUTLIER_COUNT)
            .map(|(i, value)| OutlierRecord {
                record: rows[*i].clone(),
                pct_of_total_impact: impact_share(*value, total),
            })
            .collect()
    };

    SummaryBody::Distribution {
        dimension_name: dimension,
        top_outliers: pick(&descending),
        bottom_outliers: pick(&ascending),
        primary_metric: primary,
        global_averages,
        total_records: rows.len(),
    }
}

/// `value / total * 100` rounded to two decimals; zero for a non-positive
/// total, and kept within [0, 100].
pub fn impact_share(value: f64, total: f64) -> f64 {
    if total <= 0.0 || !total.is_finite() {
        return 0.0;
    }
    round_to(value / total * 100.0, 2).clamp(0.0, 100.0)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn rounded(value: f64, decimals: i32) -> Value {
    Number::from_f64(round_to(value, decimals))
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
