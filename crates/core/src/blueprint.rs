//! Blueprint Data Model
//!
//! A Blueprint is the ordered list of drill-down levels the planner proposes.
//! Plans arrive from the generation service as JSON; parsing is lenient about
//! key spelling and id types, strict about structure.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::tier::AnalysisTier;

/// Ordered multi-level investigation plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    #[serde(alias = "Full_Blueprint", alias = "full_blueprint")]
    pub levels: Vec<Level>,
}

/// One tier of the investigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    #[serde(alias = "Hypothesis_ID", deserialize_with = "lenient_u32")]
    pub id: u32,
    #[serde(alias = "Hypothesis_Title", default)]
    pub title: String,
    #[serde(alias = "Analysis_Level")]
    pub tier: AnalysisTier,
    /// Level-wide table, used when a step names none
    #[serde(
        alias = "Analysis_Level_Table",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub table: Option<String>,
    #[serde(alias = "Steps", default)]
    pub steps: Vec<Step>,
}

/// One unit of analysis inside a level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(alias = "Step_ID", alias = "id", deserialize_with = "lenient_string")]
    pub step_id: String,
    #[serde(alias = "Logic", default)]
    pub logic: String,
    /// Concrete table, the multi-table sentinel, or empty
    #[serde(alias = "Target_Table", default)]
    pub target_table: String,
    #[serde(alias = "Metrics", default, deserialize_with = "lenient_string_list")]
    pub metrics: Vec<String>,
    #[serde(alias = "Group_By", default, deserialize_with = "lenient_string_list")]
    pub group_by: Vec<String>,
    #[serde(alias = "Join_Keys", default, deserialize_with = "lenient_string_list")]
    pub join_keys: Vec<String>,
}

impl Blueprint {
    pub fn new(levels: Vec<Level>) -> Self {
        Self { levels }
    }

    /// Parse the generator's raw text, tolerating markdown fences and prose
    /// around the JSON.
    pub fn from_generator_text(text: &str) -> CoreResult<Self> {
        let json_str = extract_json_object(text)
            .ok_or_else(|| CoreError::plan_parse("no JSON found in planner response"))?;

        if json_str.trim_start().starts_with('[') {
            let levels: Vec<Level> = serde_json::from_str(&json_str)
                .map_err(|e| CoreError::plan_parse(format!("invalid level list: {e}")))?;
            return Ok(Self::new(levels));
        }

        serde_json::from_str(&json_str)
            .map_err(|e| CoreError::plan_parse(format!("invalid blueprint JSON: {e}")))
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, index: usize) -> Option<&Level> {
        self.levels.get(index)
    }

    pub fn tiers(&self) -> Vec<AnalysisTier> {
        self.levels.iter().map(|l| l.tier).collect()
    }

    /// Keep `previous` up to (not including) `from`, then continue with the
    /// regenerated plan from the same index.
    pub fn splice(previous: &Blueprint, from: usize, regenerated: Blueprint) -> Blueprint {
        let mut levels: Vec<Level> = previous.levels.iter().take(from).cloned().collect();
        levels.extend(regenerated.levels.into_iter().skip(from));
        Blueprint::new(levels)
    }
}

impl Level {
    /// Display label used in feedback and narratives.
    pub fn label(&self) -> String {
        if self.title.is_empty() {
            format!("{} ({})", self.id, self.tier)
        } else {
            format!("{} ({}: {})", self.id, self.tier, self.title)
        }
    }
}

impl Step {
    pub fn new(step_id: impl Into<String>, logic: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            logic: logic.into(),
            target_table: String::new(),
            metrics: Vec::new(),
            group_by: Vec::new(),
            join_keys: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.target_table = table.into();
        self
    }

    pub fn with_metrics(mut self, metrics: &[&str]) -> Self {
        self.metrics = metrics.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_group_by(mut self, columns: &[&str]) -> Self {
        self.group_by = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_join_keys(mut self, keys: &[&str]) -> Self {
        self.join_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Every column identifier the step declares.
    pub fn declared_columns(&self) -> impl Iterator<Item = &str> {
        self.metrics
            .iter()
            .chain(self.group_by.iter())
            .chain(self.join_keys.iter())
            .map(String::as_str)
    }
}

/// Extract the first JSON object (or array) from text that may contain
/// markdown fences.
pub fn extract_json_object(text: &str) -> Option<String> {
    if let Some(start) = text.find("```json") {
        let after_fence = &text[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return Some(after_fence[..end].trim().to_string());
        }
    }
    if let Some(start) = text.find("```") {
        let after_fence = &text[start + 3..];
        let after_lang = match after_fence.find('\n') {
            Some(nl) => &after_fence[nl + 1..],
            None => after_fence,
        };
        if let Some(end) = after_lang.find("```") {
            let content = after_lang[..end].trim();
            if content.starts_with('{') || content.starts_with('[') {
                return Some(content.to_string());
            }
        }
    }
    let object = text.find('{').zip(text.rfind('}'));
    let array = text.find('[').zip(text.rfind(']'));
    match (object, array) {
        (Some((os, oe)), Some((as_, ae))) if as_ < os && ae > oe => {
            Some(text[as_..=ae].to_string())
        }
        (Some((start, end)), _) if end > start => Some(text[start..=end].to_string()),
        (None, Some((start, end))) if end > start => Some(text[start..=end].to_string()),
        _ => None,
    }
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f as u64))
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| D::Error::custom(format!("invalid level id {n}"))),
        serde_json::Value::String(s) => {
            let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
            digits
                .parse()
                .map_err(|_| D::Error::custom(format!("invalid level id '{s}'")))
        }
        other => Err(D::Error::custom(format!("invalid level id {other}"))),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!("invalid step id {other}"))),
    }
}

fn lenient_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let items = match value {
        serde_json::Value::Null => Vec::new(),
        serde_json::Value::String(s) => s
            .split(',')
            .map(|part| part.trim().trim_matches('`').to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        serde_json::Value::Array(values) => values
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s.trim().trim_matches('`').to_string()),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        other => vec![other.to_string()],
    };
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY_PLAN: &str = r#"Here is the plan:
```json
{
  "Full_Blueprint": [
    {
      "Hypothesis_ID": 1,
      "Hypothesis_Title": "Vendor sentiment erosion",
      "Analysis_Level": "Vendor",
      "Steps": [
        {
          "step_id": 1.1,
          "logic": "Compare frequency by vendor",
          "target_table": "agg_vendor_performance",
          "metrics": ["CurrentQuarter_whole_frequency", "CurrentQuarter_Sentiment_Shift"]
        }
      ]
    },
    {
      "Hypothesis_ID": "2",
      "Analysis_Level": "correlation",
      "Steps": [
        {
          "step_id": "2.1",
          "logic": "Multivariate JOIN on Quarter",
          "target_table": "JOIN_MULTIPLE",
          "metrics": "Total_Sales_Volume, CurrentQuarter_Sentiment_Shift"
        }
      ]
    }
  ]
}
```"#;

    #[test]
    fn test_parse_legacy_shape() {
        let plan = Blueprint::from_generator_text(LEGACY_PLAN).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.levels[0].id, 1);
        assert_eq!(plan.levels[0].tier, AnalysisTier::Vendor);
        assert_eq!(plan.levels[0].steps[0].step_id, "1.1");
        assert_eq!(plan.levels[1].id, 2);
        assert_eq!(plan.levels[1].tier, AnalysisTier::Correlation);
        assert_eq!(
            plan.levels[1].steps[0].metrics,
            vec!["Total_Sales_Volume", "CurrentQuarter_Sentiment_Shift"]
        );
    }

    #[test]
    fn test_parse_snake_case_shape() {
        let text = r#"{"levels":[{"id":1,"title":"t","tier":"Agent","steps":[
            {"step_id":"1.1","logic":"x","target_table":"","metrics":[],"group_by":["Agent_Name"]}]}]}"#;
        let plan = Blueprint::from_generator_text(text).unwrap();
        assert_eq!(plan.levels[0].steps[0].group_by, vec!["Agent_Name"]);
    }

    #[test]
    fn test_parse_rejects_unknown_tier() {
        let text = r#"{"levels":[{"id":1,"tier":"Planet","steps":[]}]}"#;
        let err = Blueprint::from_generator_text(text).unwrap_err();
        assert!(matches!(err, CoreError::PlanParse(_)));
    }

    #[test]
    fn test_parse_rejects_prose() {
        let err = Blueprint::from_generator_text("I cannot produce a plan.").unwrap_err();
        assert!(matches!(err, CoreError::PlanParse(_)));
    }

    #[test]
    fn test_splice_keeps_completed_prefix() {
        let level = |id: u32, tier: AnalysisTier, title: &str| Level {
            id,
            title: title.to_string(),
            tier,
            table: None,
            steps: vec![],
        };
        let previous = Blueprint::new(vec![
            level(1, AnalysisTier::Agent, "old agent"),
            level(2, AnalysisTier::Correlation, "old corr"),
        ]);
        let regenerated = Blueprint::new(vec![
            level(1, AnalysisTier::Agent, "new agent"),
            level(2, AnalysisTier::Correlation, "new corr"),
        ]);
        let spliced = Blueprint::splice(&previous, 1, regenerated);
        assert_eq!(spliced.levels[0].title, "old agent");
        assert_eq!(spliced.levels[1].title, "new corr");
    }

    #[test]
    fn test_extract_json_prefers_fenced_block() {
        let text = "Note {not json}\n```json\n{\"levels\": []}\n```";
        assert_eq!(extract_json_object(text).unwrap(), "{\"levels\": []}");
    }

    #[test]
    fn test_extract_json_array() {
        let text = "[{\"id\":1}]";
        assert_eq!(extract_json_object(text).unwrap(), "[{\"id\":1}]");
    }
}
