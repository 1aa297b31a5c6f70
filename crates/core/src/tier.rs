//! Analysis Tiers
//!
//! The fixed drill-down hierarchy. Every investigation descends from the tier
//! the question asks about down to the cross-table correlation tier, one tier
//! per level, never skipping.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One rung of the drill-down hierarchy, broadest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AnalysisTier {
    Global,
    Region,
    Vendor,
    Category,
    Agent,
    Correlation,
}

/// The complete hierarchy in descent order.
pub const HIERARCHY: [AnalysisTier; 6] = [
    AnalysisTier::Global,
    AnalysisTier::Region,
    AnalysisTier::Vendor,
    AnalysisTier::Category,
    AnalysisTier::Agent,
    AnalysisTier::Correlation,
];

impl AnalysisTier {
    /// Zero-based position in the hierarchy.
    pub fn ordinal(self) -> usize {
        match self {
            AnalysisTier::Global => 0,
            AnalysisTier::Region => 1,
            AnalysisTier::Vendor => 2,
            AnalysisTier::Category => 3,
            AnalysisTier::Agent => 4,
            AnalysisTier::Correlation => 5,
        }
    }

    /// Number of levels a blueprint starting at this tier must contain.
    pub fn hierarchy_depth(self) -> usize {
        HIERARCHY.len() - self.ordinal()
    }

    /// The tiers from this one down to `Correlation`, inclusive.
    pub fn descent(self) -> &'static [AnalysisTier] {
        &HIERARCHY[self.ordinal()..]
    }

    /// The tier directly below this one, if any.
    pub fn next(self) -> Option<AnalysisTier> {
        HIERARCHY.get(self.ordinal() + 1).copied()
    }

    /// Column names accepted as this tier's grouping dimension.
    ///
    /// Region has two spellings because the sales table calls it
    /// `Operating_Region`. Global and Correlation group by period only.
    pub fn canonical_dimensions(self) -> &'static [&'static str] {
        match self {
            AnalysisTier::Global | AnalysisTier::Correlation => &[],
            AnalysisTier::Region => &["Region", "Operating_Region"],
            AnalysisTier::Vendor => &["Vendor_Name"],
            AnalysisTier::Category => &["Category"],
            AnalysisTier::Agent => &["Agent_Name"],
        }
    }

    /// Human-readable name, as used in plan JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisTier::Global => "Global",
            AnalysisTier::Region => "Region",
            AnalysisTier::Vendor => "Vendor",
            AnalysisTier::Category => "Category",
            AnalysisTier::Agent => "Agent",
            AnalysisTier::Correlation => "Correlation",
        }
    }

    /// Keywords that mark a question as scoped to this tier.
    fn scope_keywords(self) -> &'static [&'static str] {
        match self {
            AnalysisTier::Global => &[
                "global",
                "organization",
                "organisation",
                "company",
                "overall",
            ],
            AnalysisTier::Region => &["region", "regions", "regional"],
            AnalysisTier::Vendor => &["vendor", "vendors"],
            AnalysisTier::Category => &["category", "categories"],
            AnalysisTier::Agent => &["agent", "agents"],
            AnalysisTier::Correlation => &[],
        }
    }
}

/// Every column that names some tier's grouping dimension.
pub fn all_tier_dimensions() -> impl Iterator<Item = &'static str> {
    HIERARCHY
        .iter()
        .flat_map(|tier| tier.canonical_dimensions().iter().copied())
}

/// Infer the tier a question is scoped to.
///
/// The broadest tier mentioned wins; a question that names no tier is global.
pub fn infer_requested_tier(question: &str) -> AnalysisTier {
    let words: Vec<String> = question
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();

    HIERARCHY
        .iter()
        .copied()
        .find(|tier| {
            tier.scope_keywords()
                .iter()
                .any(|kw| words.iter().any(|w| w == kw))
        })
        .unwrap_or(AnalysisTier::Global)
}

impl std::fmt::Display for AnalysisTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnalysisTier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "global" | "organization" | "total" => Ok(AnalysisTier::Global),
            "region" | "regional" => Ok(AnalysisTier::Region),
            "vendor" => Ok(AnalysisTier::Vendor),
            "category" => Ok(AnalysisTier::Category),
            "agent" => Ok(AnalysisTier::Agent),
            "correlation" | "multivariate" => Ok(AnalysisTier::Correlation),
            other => Err(CoreError::plan_parse(format!(
                "unknown analysis level '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for AnalysisTier {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AnalysisTier> for String {
    fn from(tier: AnalysisTier) -> String {
        tier.as_str().to_string()
    }
}
