//! Run State
//!
//! The single record threaded through one run. Only the control loop holds it
//! mutably. The evidence vault, the level narratives and the notes are
//! append-only: they are private and grow only through the recording
//! methods below.

use serde::Serialize;

use insight_cascade_core::{
    AnalysisTier, Blueprint, ExecutionOutcome, LevelEvidence, PeriodPair, WorkItem,
};
use insight_cascade_quality_gates::AuditFeedback;

use crate::models::report::{RunReport, RunStatus};

/// Coarse state deciding which gatekeeper role runs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Executing,
    Finalizing,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Planning => write!(f, "planning"),
            Phase::Executing => write!(f, "executing"),
            Phase::Finalizing => write!(f, "finalizing"),
        }
    }
}

/// What the planner is told about the previous attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerFeedback {
    /// First attempt; nothing to repair
    Initial,
    /// The plan audit rejected the previous blueprint
    Audit(AuditFeedback),
    /// Level `level_index` (zero-based) failed during execution
    ExecutionFailure {
        level_index: usize,
        feedback: AuditFeedback,
    },
}

impl PlannerFeedback {
    /// Structured issues, if any.
    pub fn issues(&self) -> Option<&AuditFeedback> {
        match self {
            PlannerFeedback::Initial => None,
            PlannerFeedback::Audit(feedback) => Some(feedback),
            PlannerFeedback::ExecutionFailure { feedback, .. } => Some(feedback),
        }
    }

    /// Text for the planning prompt.
    pub fn render(&self) -> String {
        match self {
            PlannerFeedback::Initial => "None. This is the first draft.".to_string(),
            PlannerFeedback::Audit(feedback) => feedback.render(),
            PlannerFeedback::ExecutionFailure {
                level_index,
                feedback,
            } => format!(
                "{}\nThe query for level {} failed against the warehouse. Redesign that level and the levels after it; keep every earlier level exactly as it was.",
                feedback.render(),
                level_index + 1
            ),
        }
    }
}

/// Mutable state of one run.
#[derive(Debug)]
pub struct RunState {
    run_id: String,
    question: String,
    requested_tier: AnalysisTier,
    pub periods: PeriodPair,
    pub plan: Blueprint,
    pub level_index: usize,
    pub phase: Phase,
    pub work_items: Vec<WorkItem>,
    pub last_execution_result: Vec<ExecutionOutcome>,
    pub feedback: PlannerFeedback,
    pub final_report: Option<String>,
    result_vault: Vec<LevelEvidence>,
    level_narratives: Vec<String>,
    notes: Vec<String>,
    iterations: u32,
    repair_cycles: u32,
}

impl RunState {
    pub fn new(question: impl Into<String>, requested_tier: AnalysisTier, periods: PeriodPair) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            question: question.into(),
            requested_tier,
            periods,
            plan: Blueprint::default(),
            level_index: 0,
            phase: Phase::Planning,
            work_items: Vec::new(),
            last_execution_result: Vec::new(),
            feedback: PlannerFeedback::Initial,
            final_report: None,
            result_vault: Vec::new(),
            level_narratives: Vec::new(),
            notes: Vec::new(),
            iterations: 0,
            repair_cycles: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn requested_tier(&self) -> AnalysisTier {
        self.requested_tier
    }

    pub fn result_vault(&self) -> &[LevelEvidence] {
        &self.result_vault
    }

    pub fn level_narratives(&self) -> &[String] {
        &self.level_narratives
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn repair_cycles(&self) -> u32 {
        self.repair_cycles
    }

    /// Levels already completed; the cursor never resumes before this.
    pub fn completed_levels(&self) -> usize {
        self.result_vault.len()
    }

    pub fn push_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// Count one planner invocation.
    pub fn begin_planning(&mut self) -> u32 {
        self.iterations += 1;
        self.iterations
    }

    /// Record one completed level. Evidence and narrative are appended
    /// together so the two sequences stay parallel.
    pub fn record_level(&mut self, evidence: LevelEvidence, narrative: String) {
        self.result_vault.push(evidence);
        self.level_narratives.push(narrative);
    }

    /// Route back to planning with `feedback`.
    ///
    /// Returns `false`, leaving the state untouched, once `ceiling` repair
    /// cycles have already been spent.
    pub fn request_repair(&mut self, feedback: PlannerFeedback, ceiling: u32) -> bool {
        if self.repair_cycles >= ceiling {
            return false;
        }
        self.repair_cycles += 1;
        self.feedback = feedback;
        self.phase = Phase::Planning;
        self.work_items.clear();
        true
    }

    /// Consume the state into the caller-facing report.
    pub fn into_report(self, status: RunStatus) -> RunReport {
        RunReport {
            run_id: self.run_id,
            question: self.question,
            report: self.final_report.unwrap_or_default(),
            iterations: self.iterations,
            repair_cycles: self.repair_cycles,
            status,
            notes: self.notes,
            result_vault: self.result_vault,
            level_narratives: self.level_narratives,
            periods: self.periods,
        }
    }
}
