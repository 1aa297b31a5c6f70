//! Drill-down Runner
//!
//! The control loop. One `RunState` per question, driven through
//! `Planning -> Executing -> Finalizing`:
//!
//! - Planning: draft a blueprint, audit it; approved plans start executing at
//!   the first level without evidence, rejected plans go back to the planner
//! - Executing: expand, execute, summarize and review the current level; a
//!   failed level goes back to the planner for a targeted repair, a passing
//!   level is recorded and the cursor advances
//! - Finalizing: synthesize the report
//!
//! Every return to the planner spends one repair cycle. When the ceiling is
//! reached the run ends `Incomplete` with whatever evidence it has.

use std::sync::Arc;

use insight_cascade_core::{
    infer_requested_tier, CoreError, DatasetProfile, LevelEvidence, SchemaRegistry,
};
use insight_cascade_llm::{create_provider, LlmProvider};
use insight_cascade_quality_gates::Route;
use insight_cascade_tools::{BigQueryEngine, QueryEngine, QueryGuard, TableQualifier};

use crate::models::{AppConfig, PipelineSettings, RunReport, RunStatus};
use crate::utils::error::AppResult;

use super::executor::Executor;
use super::expander::expand_level;
use super::gatekeeper::{review_level, review_plan};
use super::periods::discover_periods;
use super::planner::{draft_blueprint, PlanRequest};
use super::state::{Phase, PlannerFeedback, RunState};
use super::summarizer::summarize_level;
use super::synthesizer::synthesize;

/// Answers questions with injected generation and warehouse clients.
///
/// Holds no per-run state; one runner can serve concurrent `answer` calls.
pub struct DrilldownRunner {
    provider: Arc<dyn LlmProvider>,
    engine: Arc<dyn QueryEngine>,
    registry: Arc<SchemaRegistry>,
    profile: Arc<DatasetProfile>,
    guard: Arc<QueryGuard>,
    executor: Executor,
    settings: PipelineSettings,
}

impl DrilldownRunner {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        engine: Arc<dyn QueryEngine>,
        registry: SchemaRegistry,
        profile: DatasetProfile,
        qualifier: Option<TableQualifier>,
        settings: PipelineSettings,
    ) -> AppResult<Self> {
        profile.validate_against(&registry)?;
        let guard = Arc::new(QueryGuard::new(&registry, &profile, qualifier)?);
        let registry = Arc::new(registry);
        let profile = Arc::new(profile);
        let executor = Executor::new(
            provider.clone(),
            engine.clone(),
            guard.clone(),
            registry.clone(),
            profile.clone(),
            settings.max_in_flight,
        );

        Ok(Self {
            provider,
            engine,
            registry,
            profile,
            guard,
            executor,
            settings,
        })
    }

    /// Runner with the configured provider and the BigQuery engine.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        config.validate()?;
        let provider = create_provider(config.provider.to_provider_config())?;
        let engine: Arc<dyn QueryEngine> =
            Arc::new(BigQueryEngine::new(config.warehouse.to_engine_config())?);
        Self::new(
            provider,
            engine,
            config.schema.clone(),
            config.profile.clone(),
            Some(config.warehouse.qualifier()),
            config.pipeline.clone(),
        )
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Answer one question. Pipeline failures never surface as errors; they
    /// show up in the report's status and notes.
    pub async fn answer(&self, question: &str) -> RunReport {
        let requested = infer_requested_tier(question);
        let discovered = discover_periods(self.engine.as_ref(), &self.guard, &self.profile).await;

        let mut state = RunState::new(question, requested, discovered.periods);
        if let Some(note) = discovered.note {
            state.push_note(note);
        }
        tracing::info!(
            run_id = %state.run_id(),
            tier = %requested,
            current = %state.periods.current,
            prior = %state.periods.prior,
            "[Runner] run started"
        );

        let status = loop {
            let stop = match state.phase {
                Phase::Planning => self.plan(&mut state).await,
                Phase::Executing => self.execute_level(&mut state).await,
                Phase::Finalizing => Some(RunStatus::Complete),
            };
            if let Some(status) = stop {
                break status;
            }
        };

        self.finish(state, status).await
    }

    async fn plan(&self, state: &mut RunState) -> Option<RunStatus> {
        let iteration = state.begin_planning();
        let keep_levels = state.completed_levels();
        let draft = draft_blueprint(
            self.provider.as_ref(),
            &PlanRequest {
                question: state.question(),
                requested_tier: state.requested_tier(),
                registry: &self.registry,
                profile: &self.profile,
                periods: &state.periods,
                feedback: &state.feedback,
                previous: &state.plan,
                keep_levels,
            },
        )
        .await;

        for note in draft.notes {
            state.push_note(note);
        }
        state.plan = draft.blueprint;

        let decision = review_plan(
            state.requested_tier(),
            &self.registry,
            &self.profile,
            &state.plan,
        );
        if let Some(note) = &decision.note {
            state.push_note(note.clone());
        }
        tracing::info!(
            run_id = %state.run_id(),
            iteration,
            route = %decision.route,
            "[Runner] plan reviewed"
        );

        if decision.route != Route::Proceed {
            let feedback = decision.feedback.unwrap_or_default();
            return self.repair(state, PlannerFeedback::Audit(feedback));
        }

        // Levels that already produced evidence are not executed again.
        state.level_index = keep_levels.min(state.plan.len());
        state.phase = if state.level_index < state.plan.len() {
            Phase::Executing
        } else {
            Phase::Finalizing
        };
        None
    }

    async fn execute_level(&self, state: &mut RunState) -> Option<RunStatus> {
        let index = state.level_index;
        let Some(level) = state.plan.level(index).cloned() else {
            state.phase = Phase::Finalizing;
            return None;
        };

        state.work_items = expand_level(&level, &self.registry, &self.profile);
        state.push_note(format!(
            "Orchestrator: Level {} ({}) expanded into {} work items.",
            level.id,
            level.tier,
            state.work_items.len()
        ));

        let outcomes = self
            .executor
            .execute_level(&state.work_items, &state.periods)
            .await;
        let summaries = summarize_level(&outcomes, &self.profile);
        state.last_execution_result = outcomes;

        let review = review_level(
            self.provider.as_ref(),
            index,
            &level,
            state.plan.len(),
            &summaries,
            &self.profile,
        )
        .await;
        if let Some(note) = &review.decision.note {
            state.push_note(note.clone());
        }
        tracing::info!(
            run_id = %state.run_id(),
            level = level.id,
            route = %review.decision.route,
            "[Runner] level reviewed"
        );

        match review.decision.route {
            Route::Recontextualize => {
                let feedback = review.decision.feedback.unwrap_or_default();
                self.repair(
                    state,
                    PlannerFeedback::ExecutionFailure {
                        level_index: index,
                        feedback,
                    },
                )
            }
            route => {
                state.record_level(
                    LevelEvidence {
                        level_id: level.id,
                        tier: level.tier,
                        title: level.title.clone(),
                        summaries,
                    },
                    review.narrative.unwrap_or_default(),
                );
                state.push_note(format!(
                    "Analyst: Forensic Summary for {} delivered.",
                    level.label()
                ));
                if route == Route::Finalize {
                    state.phase = Phase::Finalizing;
                } else {
                    state.level_index += 1;
                }
                None
            }
        }
    }

    /// Route back to planning, or stop once the ceiling is reached.
    fn repair(&self, state: &mut RunState, feedback: PlannerFeedback) -> Option<RunStatus> {
        if state.request_repair(feedback, self.settings.max_repair_cycles) {
            return None;
        }
        let err = CoreError::IterationLimitExceeded {
            cycles: state.repair_cycles(),
        };
        tracing::warn!(run_id = %state.run_id(), error = %err, "[Runner] stopping run");
        state.push_note(format!(
            "Orchestrator: {}; reporting on {} completed level(s).",
            err,
            state.completed_levels()
        ));
        Some(RunStatus::Incomplete)
    }

    async fn finish(&self, mut state: RunState, status: RunStatus) -> RunReport {
        let synthesis = synthesize(
            self.provider.as_ref(),
            state.question(),
            state.level_narratives(),
            state.result_vault(),
            &self.profile,
        )
        .await;

        for note in synthesis.notes {
            state.push_note(note);
        }
        state.final_report = Some(synthesis.report);
        tracing::info!(
            run_id = %state.run_id(),
            status = %status,
            iterations = state.iterations(),
            repair_cycles = state.repair_cycles(),
            levels = state.completed_levels(),
            "[Runner] run finished"
        );
        state.into_report(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::drilldown::prompts;
    use crate::services::drilldown::test_support::{record, FnEngine, FnProvider};
    use serde_json::json;

    fn runner(provider: Arc<FnProvider>, engine: Arc<FnEngine>, max_repair_cycles: u32) -> DrilldownRunner {
        DrilldownRunner::new(
            provider,
            engine,
            SchemaRegistry::default(),
            DatasetProfile::default(),
            None,
            PipelineSettings {
                max_repair_cycles,
                max_in_flight: 2,
            },
        )
        .unwrap()
    }

    fn period_engine() -> Arc<FnEngine> {
        Arc::new(FnEngine::new(|_| {
            Ok(vec![
                record(json!({"Quarter": "2026-01-01"})),
                record(json!({"Quarter": "2025-10-01"})),
            ])
        }))
    }

    #[tokio::test]
    async fn test_unparseable_plans_stop_at_ceiling() {
        let provider = Arc::new(FnProvider::new(|prompt| {
            if prompt.starts_with(prompts::PLANNER_ROLE) {
                Ok("no plan today".to_string())
            } else {
                Ok("unused".to_string())
            }
        }));
        let engine = period_engine();
        let report = runner(provider.clone(), engine.clone(), 3)
            .answer("Which vendors drove the sentiment decline?")
            .await;

        assert_eq!(report.status, RunStatus::Incomplete);
        assert_eq!(report.iterations, 4);
        assert_eq!(report.repair_cycles, 3);
        assert!(report.result_vault.is_empty());
        assert!(report
            .notes
            .iter()
            .any(|n| n.contains("Iteration limit exceeded after 3 repair cycles")));
        // Only the period query reached the warehouse.
        assert_eq!(engine.queries().len(), 1);
        let planner_calls = provider
            .prompts()
            .iter()
            .filter(|p| p.starts_with(prompts::PLANNER_ROLE))
            .count();
        assert_eq!(planner_calls, 4);
    }

    #[tokio::test]
    async fn test_zero_ceiling_allows_one_plan() {
        let provider = Arc::new(FnProvider::new(|_| Ok("{}".to_string())));
        let report = runner(provider, period_engine(), 0)
            .answer("How did the organization perform overall?")
            .await;

        assert_eq!(report.status, RunStatus::Incomplete);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.repair_cycles, 0);
        assert!(!report.report.is_empty());
    }

    #[test]
    fn test_invalid_profile_is_rejected_at_construction() {
        let mut profile = DatasetProfile::default();
        profile.fallback_table = "agg_missing".to_string();
        let result = DrilldownRunner::new(
            Arc::new(FnProvider::new(|_| Ok(String::new()))),
            period_engine(),
            SchemaRegistry::default(),
            profile,
            None,
            PipelineSettings::default(),
        );
        assert!(result.is_err());
    }
}
