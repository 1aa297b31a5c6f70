//! Report Synthesizer
//!
//! Two generation passes over the completed levels:
//!
//! 1. weave the level narratives into one causal story
//! 2. draft the executive report from that story plus a digest of the
//!    verified numbers in the result vault
//!
//! Either pass may fail. The report degrades to the best text available and
//! always leaves through the sanitizer.

use serde_json::{json, Value};

use insight_cascade_core::{DatasetProfile, LevelEvidence, SummaryBody};
use insight_cascade_llm::LlmProvider;

use super::prompts;
use super::sanitizer::sanitize_report;

/// Final report text plus notes about degraded passes.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub report: String,
    pub notes: Vec<String>,
}

const NO_FINDINGS: &str =
    "No analysis completed for this question, so there are no findings to report.";

/// Produce the sanitized final report.
pub async fn synthesize(
    provider: &dyn LlmProvider,
    question: &str,
    narratives: &[String],
    vault: &[LevelEvidence],
    profile: &DatasetProfile,
) -> Synthesis {
    let mut notes = Vec::new();
    if vault.is_empty() && narratives.is_empty() {
        notes.push("Synthesizer: no completed levels; skipping generation.".to_string());
        return Synthesis {
            report: NO_FINDINGS.to_string(),
            notes,
        };
    }

    let woven = match provider
        .generate(&prompts::weaver_prompt(question, narratives, profile), false)
        .await
    {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "[Synthesizer] weaving pass failed");
            notes.push(format!(
                "Synthesizer: weaving failed ({}); using the level narratives.",
                e
            ));
            narratives.join("\n\n")
        }
    };

    let digest = vault_digest(vault);
    let drafted = match provider
        .generate(&prompts::drafter_prompt(question, &woven, &digest), false)
        .await
    {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "[Synthesizer] drafting pass failed");
            notes.push(format!(
                "Synthesizer: drafting failed ({}); using the woven analysis.",
                e
            ));
            woven
        }
    };

    let report = sanitize_report(&drafted);
    tracing::info!(
        levels = vault.len(),
        chars = report.len(),
        "[Synthesizer] report ready"
    );
    Synthesis { report, notes }
}

/// Verified numbers per level, broadest first.
pub fn vault_digest(vault: &[LevelEvidence]) -> Value {
    let levels: Vec<Value> = vault
        .iter()
        .map(|evidence| {
            let findings: Vec<Value> = evidence
                .summaries
                .iter()
                .filter_map(|s| finding(&s.body))
                .collect();
            json!({
                "analysis_level": evidence.tier,
                "title": evidence.title,
                "findings": findings,
            })
        })
        .collect();
    Value::Array(levels)
}

fn finding(body: &SummaryBody) -> Option<Value> {
    match body {
        SummaryBody::Distribution {
            dimension_name,
            primary_metric,
            global_averages,
            top_outliers,
            bottom_outliers,
            total_records,
        } => Some(json!({
            "dimension": dimension_name,
            "primary_metric": primary_metric,
            "averages": global_averages,
            "top": top_outliers,
            "bottom": bottom_outliers,
            "records": total_records,
        })),
        SummaryBody::Correlation {
            dimension_name,
            metrics,
            ..
        } => Some(json!({
            "dimension": dimension_name,
            "correlation": metrics,
        })),
        SummaryBody::Empty { .. } | SummaryBody::Failed { .. } => None,
    }
}
