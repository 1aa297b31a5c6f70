//! Period Discovery
//!
//! Finds the two most recent periods in the warehouse before planning starts.
//! Falls back to the profile's default pair when the warehouse cannot answer.

use serde_json::Value;

use insight_cascade_core::{DatasetProfile, PeriodPair, Record};
use insight_cascade_tools::{QueryEngine, QueryGuard};

/// Outcome of period discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredPeriods {
    pub periods: PeriodPair,
    /// Set when the defaults were used
    pub note: Option<String>,
}

/// `SELECT DISTINCT period ... ORDER BY period DESC LIMIT 2` against the
/// global fallback table.
pub fn period_query(guard: &QueryGuard, profile: &DatasetProfile) -> String {
    format!(
        "SELECT DISTINCT `{col}` FROM {table} ORDER BY `{col}` DESC LIMIT 2",
        col = profile.period_column,
        table = guard.qualified_table(&profile.fallback_table),
    )
}

/// Query the latest two periods, or fall back to the defaults.
pub async fn discover_periods(
    engine: &dyn QueryEngine,
    guard: &QueryGuard,
    profile: &DatasetProfile,
) -> DiscoveredPeriods {
    let query = period_query(guard, profile);
    let fallback = |reason: String| {
        let periods = profile.default_periods.clone();
        tracing::warn!(reason = %reason, "[Periods] using default periods");
        DiscoveredPeriods {
            note: Some(format!(
                "Periods: {}; using defaults {} and {}.",
                reason, periods.current, periods.prior
            )),
            periods,
        }
    };

    match engine.execute(&query).await {
        Ok(rows) => {
            let found: Vec<String> = rows
                .iter()
                .filter_map(|row| period_value(row, &profile.period_column))
                .collect();
            match found.as_slice() {
                [current, prior, ..] => {
                    tracing::info!(current = %current, prior = %prior, "[Periods] discovered");
                    DiscoveredPeriods {
                        periods: PeriodPair::new(current.clone(), prior.clone()),
                        note: None,
                    }
                }
                _ => fallback(format!("found {} distinct period(s)", found.len())),
            }
        }
        Err(e) => fallback(format!("discovery failed ({})", e)),
    }
}

/// Period cell as a date string. Midnight timestamps are reduced to their
/// date.
fn period_value(row: &Record, column: &str) -> Option<String> {
    let value = row.get(column).or_else(|| row.values().next())?;
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        return None;
    }
    match chrono::DateTime::parse_from_rfc3339(&text) {
        Ok(ts) => Some(ts.date_naive().to_string()),
        Err(_) => Some(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use insight_cascade_core::SchemaRegistry;
    use insight_cascade_tools::{QueryError, TableQualifier};
    use serde_json::json;

    struct FixedEngine(Result<Vec<Record>, QueryError>);

    #[async_trait]
    impl QueryEngine for FixedEngine {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn execute(&self, _query: &str) -> Result<Vec<Record>, QueryError> {
            self.0.clone()
        }
    }

    fn guard(profile: &DatasetProfile) -> QueryGuard {
        QueryGuard::new(
            &SchemaRegistry::default(),
            profile,
            Some(TableQualifier::new("proj", "ds")),
        )
        .unwrap()
    }

    fn row(value: Value) -> Record {
        let mut record = Record::new();
        record.insert("Quarter".to_string(), value);
        record
    }

    #[test]
    fn test_period_query_is_qualified() {
        let profile = DatasetProfile::default();
        assert_eq!(
            period_query(&guard(&profile), &profile),
            "SELECT DISTINCT `Quarter` FROM `proj.ds.agg_region_performance` ORDER BY `Quarter` DESC LIMIT 2"
        );
    }

    #[tokio::test]
    async fn test_discovers_latest_two() {
        let profile = DatasetProfile::default();
        let engine = FixedEngine(Ok(vec![
            row(json!("2025-07-01")),
            row(json!("2025-04-01T00:00:00+00:00")),
        ]));
        let found = discover_periods(&engine, &guard(&profile), &profile).await;
        assert_eq!(found.periods, PeriodPair::new("2025-07-01", "2025-04-01"));
        assert!(found.note.is_none());
    }

    #[tokio::test]
    async fn test_single_period_falls_back() {
        let profile = DatasetProfile::default();
        let engine = FixedEngine(Ok(vec![row(json!("2025-07-01"))]));
        let found = discover_periods(&engine, &guard(&profile), &profile).await;
        assert_eq!(found.periods, profile.default_periods);
        assert!(found.note.unwrap().contains("found 1 distinct period"));
    }

    #[tokio::test]
    async fn test_engine_error_falls_back() {
        let profile = DatasetProfile::default();
        let engine = FixedEngine(Err(QueryError::Auth("no token".to_string())));
        let found = discover_periods(&engine, &guard(&profile), &profile).await;
        assert_eq!(found.periods, PeriodPair::new("2026-01-01", "2025-10-01"));
        assert!(found.note.unwrap().contains("discovery failed"));
    }
}
