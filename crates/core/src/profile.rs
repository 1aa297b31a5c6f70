//! Dataset Profile
//!
//! Role designations layered over the schema registry: which column is the
//! period key, which metrics stand for quality and volume, which tables feed
//! the correlation level, and where each tier reads from by default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::schema::SchemaRegistry;
use crate::tier::AnalysisTier;

/// Sentinel target meaning "join the correlation source tables".
pub const MULTI_TABLE_SENTINEL: &str = "JOIN_MULTIPLE";

/// Dimension name used when a result has no grouping column.
pub const TOTAL_ORGANIZATION: &str = "Total_Organization";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatasetProfile {
    /// Column holding the period identifier
    pub period_column: String,
    /// Quality/sentiment-type metric the correlation level must cover
    pub quality_metric: String,
    /// Volume-type metric the correlation level must cover
    pub volume_metric: String,
    /// Workforce tenure metric correlated with volume next to quality; empty
    /// disables the comparison
    pub tenure_metric: String,
    /// Metric preferred for outlier ranking when present
    pub preferred_metric: String,
    /// The two tables the correlation level joins
    pub correlation_tables: [String; 2],
    /// Default table per tier
    pub tier_tables: BTreeMap<AnalysisTier, String>,
    /// Table used when nothing else resolves; also the period source
    pub fallback_table: String,
    /// Metrics that must never appear in a plan or query
    pub forbidden_metrics: Vec<String>,
    /// Periods used when the backend cannot report the latest two
    pub default_periods: PeriodPair,
}

/// The (current, prior) period identifiers of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodPair {
    pub current: String,
    pub prior: String,
}

impl PeriodPair {
    pub fn new(current: impl Into<String>, prior: impl Into<String>) -> Self {
        Self {
            current: current.into(),
            prior: prior.into(),
        }
    }

    pub fn contains(&self, period: &str) -> bool {
        self.current == period || self.prior == period
    }
}

impl Default for DatasetProfile {
    fn default() -> Self {
        let tier_tables = [
            (AnalysisTier::Global, "agg_region_performance"),
            (AnalysisTier::Region, "agg_region_performance"),
            (AnalysisTier::Vendor, "agg_vendor_performance"),
            (AnalysisTier::Category, "agg_category_performance"),
            (AnalysisTier::Agent, "agg_agent_performance"),
            (AnalysisTier::Correlation, MULTI_TABLE_SENTINEL),
        ]
        .into_iter()
        .map(|(tier, table)| (tier, table.to_string()))
        .collect();

        Self {
            period_column: "Quarter".to_string(),
            quality_metric: "CurrentQuarter_Sentiment_Shift".to_string(),
            volume_metric: "Total_Sales_Volume".to_string(),
            tenure_metric: "Average_Tenure_Months".to_string(),
            preferred_metric: "CurrentQuarter_whole_frequency".to_string(),
            correlation_tables: [
                "agg_sales_tenure_performance".to_string(),
                "agg_agent_performance".to_string(),
            ],
            tier_tables,
            fallback_table: "agg_region_performance".to_string(),
            forbidden_metrics: ["Total_Spend", "Spend", "Revenue", "Clicks", "Impressions", "AHT"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            default_periods: PeriodPair::new("2026-01-01", "2025-10-01"),
        }
    }
}

impl DatasetProfile {
    /// Default table for a tier, or the fallback table when unmapped.
    pub fn default_table(&self, tier: AnalysisTier) -> &str {
        self.tier_tables
            .get(&tier)
            .map(String::as_str)
            .unwrap_or(&self.fallback_table)
    }

    /// Case-insensitive exact match against the denylist.
    pub fn is_forbidden(&self, name: &str) -> bool {
        self.forbidden_metrics
            .iter()
            .any(|m| m.eq_ignore_ascii_case(name.trim()))
    }

    pub fn is_period_column(&self, name: &str) -> bool {
        self.period_column.eq_ignore_ascii_case(name.trim())
    }

    pub fn is_sentinel(target: &str) -> bool {
        target.trim().eq_ignore_ascii_case(MULTI_TABLE_SENTINEL)
    }

    /// Metrics every correlation step carries: quality, volume, then tenure
    /// when configured.
    pub fn correlation_metrics(&self) -> Vec<&str> {
        let mut metrics = vec![self.quality_metric.as_str(), self.volume_metric.as_str()];
        if !self.tenure_metric.trim().is_empty() {
            metrics.push(self.tenure_metric.as_str());
        }
        metrics
    }

    /// The correlation pair as borrowed names.
    pub fn correlation_pair(&self) -> [&str; 2] {
        [
            self.correlation_tables[0].as_str(),
            self.correlation_tables[1].as_str(),
        ]
    }

    /// Check that every table this profile names exists in the registry and
    /// that the role metrics live where the correlation level can reach them.
    pub fn validate_against(&self, registry: &SchemaRegistry) -> CoreResult<()> {
        for table in self.correlation_pair() {
            let columns = registry.get_columns(table)?;
            if !columns.iter().any(|c| c == &self.period_column) {
                return Err(CoreError::config(format!(
                    "correlation table {} has no period column {}",
                    table, self.period_column
                )));
            }
        }
        registry.get_columns(&self.fallback_table)?;
        for (tier, table) in &self.tier_tables {
            if Self::is_sentinel(table) {
                if *tier != AnalysisTier::Correlation {
                    return Err(CoreError::config(format!(
                        "only the Correlation tier may default to {}",
                        MULTI_TABLE_SENTINEL
                    )));
                }
                continue;
            }
            registry.get_columns(table)?;
        }
        for metric in self.correlation_metrics() {
            let reachable = self
                .correlation_pair()
                .iter()
                .any(|t| registry.has_column(t, metric));
            if !reachable {
                return Err(CoreError::config(format!(
                    "metric {} is not present in either correlation table",
                    metric
                )));
            }
        }
        Ok(())
    }
}
