//! Level Executor
//!
//! Runs every work item of one level concurrently:
//! schema payload -> query prompt -> generator -> guard -> warehouse.
//!
//! At most `max_in_flight` items run at once and outcomes come back in work
//! item order. Nothing here returns an error; every failure becomes a
//! `Failed` outcome carrying whatever query text existed.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use tokio::sync::Semaphore;

use insight_cascade_core::{DatasetProfile, ExecutionOutcome, PeriodPair, SchemaRegistry, WorkItem};
use insight_cascade_llm::LlmProvider;
use insight_cascade_tools::{QueryEngine, QueryGuard};

use super::prompts;

/// Shared execution dependencies for one run.
#[derive(Clone)]
pub struct Executor {
    provider: Arc<dyn LlmProvider>,
    engine: Arc<dyn QueryEngine>,
    guard: Arc<QueryGuard>,
    registry: Arc<SchemaRegistry>,
    profile: Arc<DatasetProfile>,
    max_in_flight: usize,
}

impl Executor {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        engine: Arc<dyn QueryEngine>,
        guard: Arc<QueryGuard>,
        registry: Arc<SchemaRegistry>,
        profile: Arc<DatasetProfile>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            provider,
            engine,
            guard,
            registry,
            profile,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Execute `items` and return one outcome per item, in item order.
    pub async fn execute_level(
        &self,
        items: &[WorkItem],
        periods: &PeriodPair,
    ) -> Vec<ExecutionOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let futures = items.iter().map(|item| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return ExecutionOutcome::failed(
                            &item.step_id,
                            None,
                            format!("executor unavailable: {}", e),
                        )
                    }
                };
                self.execute_item(item, periods).await
            }
        });
        join_all(futures).await
    }

    async fn execute_item(&self, item: &WorkItem, periods: &PeriodPair) -> ExecutionOutcome {
        let start = Instant::now();
        let source_tables = item.target.tables();

        let schema = match self.registry.payload(&source_tables) {
            Ok(schema) => schema,
            Err(e) => return ExecutionOutcome::failed(&item.step_id, None, e.to_string()),
        };
        let references: Vec<String> = source_tables
            .iter()
            .map(|t| self.guard.qualified_table(t))
            .collect();

        let prompt = prompts::sql_prompt(item, &schema, &references, &self.profile, periods);
        let raw = match self.provider.generate(&prompt, false).await {
            Ok(text) => text,
            Err(e) => {
                return ExecutionOutcome::failed(
                    &item.step_id,
                    None,
                    format!("query generation failed: {}", e),
                )
            }
        };

        let query = match self.guard.prepare(&raw, &item.target, periods) {
            Ok(query) => query,
            Err(violation) => {
                tracing::warn!(
                    step = %item.step_id,
                    violation = %violation,
                    "[Executor] query rejected by guard"
                );
                return ExecutionOutcome::failed(
                    &item.step_id,
                    Some(raw.trim().to_string()),
                    format!("query rejected before execution: {}", violation),
                );
            }
        };

        match self.engine.execute(&query).await {
            Ok(rows) => {
                tracing::info!(
                    step = %item.step_id,
                    target = %item.target,
                    rows = rows.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "[Executor] step completed"
                );
                ExecutionOutcome::Success {
                    step_id: item.step_id.clone(),
                    query,
                    rows,
                }
            }
            Err(e) => {
                tracing::warn!(step = %item.step_id, error = %e, "[Executor] step failed");
                ExecutionOutcome::failed(&item.step_id, Some(query), e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::drilldown::test_support::{record, FnEngine, FnProvider};
    use insight_cascade_core::{AnalysisTier, TableTarget};
    use insight_cascade_tools::{QueryError, TableQualifier};
    use serde_json::json;

    fn item(step_id: &str, tier: AnalysisTier, target: TableTarget) -> WorkItem {
        WorkItem {
            step_id: step_id.to_string(),
            tier,
            logic: format!("analysis for {}", step_id),
            target,
            metrics: vec!["CurrentQuarter_Sentiment_Shift".to_string()],
            group_by: vec!["Vendor_Name".to_string()],
            join_keys: Vec::new(),
        }
    }

    fn executor(provider: Arc<dyn LlmProvider>, engine: Arc<dyn QueryEngine>) -> Executor {
        let registry = SchemaRegistry::default();
        let profile = DatasetProfile::default();
        let guard = QueryGuard::new(&registry, &profile, Some(TableQualifier::new("proj", "ds")))
            .unwrap();
        Executor::new(
            provider,
            engine,
            Arc::new(guard),
            Arc::new(registry),
            Arc::new(profile),
            2,
        )
    }

    /// Generator that answers with a query against the step's own table,
    /// except for step 1.2, which reads a forbidden metric.
    fn scripted_provider() -> Arc<FnProvider> {
        Arc::new(FnProvider::new(|prompt| {
            if prompt.contains("analysis for 1.2") {
                Ok("SELECT Vendor_Name, SUM(Spend) AS s FROM agg_vendor_performance GROUP BY Vendor_Name".to_string())
            } else if prompt.contains("analysis for 1.3") {
                Ok("SELECT Category, AVG(CurrentQuarter_Sentiment_Shift) AS avg_shift FROM agg_category_performance GROUP BY Category".to_string())
            } else {
                Ok("```sql\nSELECT Vendor_Name, AVG(CurrentQuarter_Sentiment_Shift) AS avg_shift FROM agg_vendor_performance GROUP BY Vendor_Name;\n```".to_string())
            }
        }))
    }

    #[tokio::test]
    async fn test_outcomes_follow_item_order() {
        let engine = Arc::new(FnEngine::new(|query| {
            if query.contains("agg_category_performance") {
                Err(QueryError::Rejected("Unrecognized name: Category".to_string()))
            } else {
                Ok(vec![record(json!({"Vendor_Name": "Acme", "avg_shift": "-0.4"}))])
            }
        }));
        let exec = executor(scripted_provider(), engine.clone());
        let items = vec![
            item("1.1", AnalysisTier::Vendor, TableTarget::single("agg_vendor_performance")),
            item("1.2", AnalysisTier::Vendor, TableTarget::single("agg_vendor_performance")),
            item("1.3", AnalysisTier::Category, TableTarget::single("agg_category_performance")),
        ];

        let outcomes = exec
            .execute_level(&items, &DatasetProfile::default().default_periods)
            .await;

        let ids: Vec<&str> = outcomes.iter().map(|o| o.step_id()).collect();
        assert_eq!(ids, vec!["1.1", "1.2", "1.3"]);

        match &outcomes[0] {
            ExecutionOutcome::Success { query, rows, .. } => {
                assert!(query.contains("`proj.ds.agg_vendor_performance`"));
                assert!(!query.contains("```"));
                assert_eq!(rows.len(), 1);
            }
            other => panic!("expected success, got {other:?}"),
        }
        match &outcomes[1] {
            ExecutionOutcome::Failed {
                query_attempted,
                error_message,
                ..
            } => {
                assert!(error_message.starts_with("query rejected before execution"));
                assert!(query_attempted.as_deref().unwrap().contains("Spend"));
            }
            other => panic!("expected guard rejection, got {other:?}"),
        }
        match &outcomes[2] {
            ExecutionOutcome::Failed {
                query_attempted,
                error_message,
                ..
            } => {
                assert!(error_message.contains("Unrecognized name: Category"));
                assert!(query_attempted.is_some());
            }
            other => panic!("expected warehouse failure, got {other:?}"),
        }

        // The guard stops the forbidden query before the warehouse sees it.
        assert_eq!(engine.queries().len(), 2);
    }

    #[tokio::test]
    async fn test_generation_failure_has_no_query() {
        let provider = Arc::new(FnProvider::new(|_| {
            Err(insight_cascade_llm::LlmError::NetworkError {
                message: "timeout".to_string(),
            })
        }));
        let engine = Arc::new(FnEngine::new(|_| Ok(Vec::new())));
        let exec = executor(provider, engine.clone());

        let outcomes = exec
            .execute_level(
                &[item("2.1", AnalysisTier::Vendor, TableTarget::single("agg_vendor_performance"))],
                &DatasetProfile::default().default_periods,
            )
            .await;

        assert_eq!(
            outcomes[0],
            ExecutionOutcome::failed("2.1", None, "query generation failed: Network error: timeout")
        );
        assert!(engine.queries().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_lists_qualified_pair_for_correlation() {
        let provider = Arc::new(FnProvider::new(|_| {
            Ok("SELECT CORR(a.x, b.y) AS corr_xy FROM agg_sales_tenure_performance a JOIN agg_agent_performance b ON a.Quarter = b.Quarter".to_string())
        }));
        let engine = Arc::new(FnEngine::new(|_| Ok(vec![record(json!({"corr_xy": 0.5}))])));
        let exec = executor(provider.clone(), engine);
        let target = TableTarget::MultiTable {
            sources: [
                "agg_sales_tenure_performance".to_string(),
                "agg_agent_performance".to_string(),
            ],
        };

        let outcomes = exec
            .execute_level(
                &[item("4.1", AnalysisTier::Correlation, target)],
                &DatasetProfile::default().default_periods,
            )
            .await;

        assert!(outcomes[0].is_success());
        let prompt = &provider.prompts()[0];
        assert!(prompt.starts_with(prompts::SQL_ROLE));
        assert!(prompt.contains("`proj.ds.agg_sales_tenure_performance`"));
        assert!(prompt.contains("`proj.ds.agg_agent_performance`"));
    }
}
