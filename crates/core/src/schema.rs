//! Schema Registry
//!
//! Static mapping from table name to the ordered list of columns that exist
//! in it. The registry is the closed world every plan and query is checked
//! against; anything not listed here does not exist.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Columns of one aggregated table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<String>,
}

impl TableSchema {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Case-sensitive column membership.
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// Ordered registry of known tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    tables: Vec<TableSchema>,
}

impl SchemaRegistry {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    /// All table names, in registry order.
    pub fn get_tables(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Columns of `table`, in registry order.
    pub fn get_columns(&self, table: &str) -> CoreResult<&[String]> {
        self.table(table)
            .map(|t| t.columns.as_slice())
            .ok_or_else(|| CoreError::unknown_table(table))
    }

    pub fn table(&self, table: &str) -> Option<&TableSchema> {
        let bare = bare_table_name(table);
        self.tables.iter().find(|t| t.name == bare)
    }

    pub fn contains_table(&self, table: &str) -> bool {
        self.table(table).is_some()
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.table(table).is_some_and(|t| t.has_column(column))
    }

    /// Reduce a possibly qualified or backticked reference to a registered
    /// table name.
    pub fn resolve_table(&self, reference: &str) -> Option<&str> {
        self.table(reference).map(|t| t.name.as_str())
    }

    /// Schema payload for prompts: `{table: [columns]}` for the given tables.
    pub fn payload(&self, tables: &[&str]) -> CoreResult<serde_json::Value> {
        let mut map = serde_json::Map::new();
        for table in tables {
            let columns = self.get_columns(table)?;
            map.insert(bare_table_name(table).to_string(), serde_json::json!(columns));
        }
        Ok(serde_json::Value::Object(map))
    }

    /// Full registry as a prompt payload.
    pub fn full_payload(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for table in &self.tables {
            map.insert(table.name.clone(), serde_json::json!(table.columns));
        }
        serde_json::Value::Object(map)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Default for SchemaRegistry {
    /// The aggregated customer-experience performance dataset.
    fn default() -> Self {
        Self::new(vec![
            TableSchema::new(
                "agg_vendor_performance",
                &[
                    "Quarter",
                    "Vendor_Name",
                    "Region",
                    "Category",
                    "CurrentQuarter_whole_frequency",
                    "CurrentQuarter_Sentiment_Shift",
                ],
            ),
            TableSchema::new(
                "agg_region_performance",
                &[
                    "Quarter",
                    "Region",
                    "CurrentQuarter_whole_frequency",
                    "CurrentQuarter_Sentiment_Shift",
                ],
            ),
            TableSchema::new(
                "agg_agent_performance",
                &[
                    "Quarter",
                    "Agent_Name",
                    "Vendor_Name",
                    "CurrentQuarter_whole_frequency",
                    "CurrentQuarter_Sentiment_Shift",
                ],
            ),
            TableSchema::new(
                "agg_category_performance",
                &[
                    "Quarter",
                    "Category",
                    "CurrentQuarter_whole_frequency",
                    "CurrentQuarter_Sentiment_Shift",
                ],
            ),
            TableSchema::new(
                "agg_sales_tenure_performance",
                &[
                    "Quarter",
                    "Vendor_Name",
                    "Operating_Region",
                    "Total_Sales_Volume",
                    "Quality_Score_%",
                    "AHT_Seconds",
                    "Active_Staffing_%",
                    "Average_Tenure_Months",
                    "Attrition_Rate_%",
                    "QoQ_Total_Sales_Volume",
                    "QoQ_Quality_Score_%",
                    "QoQ_AHT_Seconds",
                    "QoQ_Active_Staffing_%",
                    "QoQ_Average_Tenure_Months",
                    "QoQ_Attrition_Rate_%",
                ],
            ),
        ])
    }
}

/// Strip backticks and any `project.dataset.` qualification.
pub fn bare_table_name(reference: &str) -> &str {
    let trimmed = reference.trim();
    let last = trimmed.rsplit('.').next().unwrap_or(trimmed);
    last.trim_matches('`').trim()
}
