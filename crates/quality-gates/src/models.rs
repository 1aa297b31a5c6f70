//! Gatekeeper Models
//!
//! Routing decision shared by the plan audit and the execution audit, plus
//! the structured feedback handed back to the planner.

use serde::{Deserialize, Serialize};

use insight_cascade_core::AnalysisTier;

/// Where the control loop goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Plan approved; start executing at the first level
    Proceed,
    /// Back to the planner with feedback
    Recontextualize,
    /// Level succeeded and more remain
    NextLevel,
    /// Last level succeeded; hand off to synthesis
    Finalize,
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Proceed => write!(f, "proceed"),
            Route::Recontextualize => write!(f, "recontextualize"),
            Route::NextLevel => write!(f, "next_hypothesis"),
            Route::Finalize => write!(f, "finalize"),
        }
    }
}

/// Plan audit verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditDecision {
    Satisfied,
    FixingBlueprint,
}

/// What kind of rule an issue breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    EmptyBlueprint,
    EmptyLevel,
    ScopeMismatch,
    DepthMismatch,
    HierarchyOrder,
    MissingCorrelationLevel,
    UnknownTable,
    UnknownColumn,
    ForbiddenMetric,
    GrainViolation,
    IllegalJoinKey,
    MissingCorrelationMetric,
    ExecutionFailure,
}

impl IssueKind {
    pub fn label(&self) -> &'static str {
        match self {
            IssueKind::EmptyBlueprint => "empty blueprint",
            IssueKind::EmptyLevel => "empty level",
            IssueKind::ScopeMismatch => "scope mismatch",
            IssueKind::DepthMismatch => "depth mismatch",
            IssueKind::HierarchyOrder => "hierarchy order",
            IssueKind::MissingCorrelationLevel => "missing correlation level",
            IssueKind::UnknownTable => "unknown table",
            IssueKind::UnknownColumn => "unknown column",
            IssueKind::ForbiddenMetric => "forbidden metric",
            IssueKind::GrainViolation => "grain violation",
            IssueKind::IllegalJoinKey => "illegal join key",
            IssueKind::MissingCorrelationMetric => "missing correlation metric",
            IssueKind::ExecutionFailure => "execution failure",
        }
    }
}

/// One rule violation, tied to the level that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditIssue {
    pub level_id: u32,
    pub tier: Option<AnalysisTier>,
    pub kind: IssueKind,
    /// Offending identifier (table, column, metric), when there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub detail: String,
}

impl AuditIssue {
    pub fn new(
        level_id: u32,
        tier: Option<AnalysisTier>,
        kind: IssueKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            level_id,
            tier,
            kind,
            subject: None,
            detail: detail.into(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// `Issue in Level <id>: <kind>: <detail>`
    pub fn render(&self) -> String {
        format!(
            "Issue in Level {}: {}: {}",
            self.level_id,
            self.kind.label(),
            self.detail
        )
    }
}

/// Ordered issues; the first names the level to fix first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFeedback {
    pub issues: Vec<AuditIssue>,
}

impl AuditFeedback {
    pub fn new(issues: Vec<AuditIssue>) -> Self {
        Self { issues }
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }

    pub fn of_kind(&self, kind: IssueKind) -> impl Iterator<Item = &AuditIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }

    /// Level id named by the first issue.
    pub fn first_level(&self) -> Option<u32> {
        self.issues.first().map(|i| i.level_id)
    }

    /// One issue per line, in audit order.
    pub fn render(&self) -> String {
        self.issues
            .iter()
            .map(AuditIssue::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Routing result of either audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub route: Route,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<AuditFeedback>,
    /// Audit note to append to the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl GateDecision {
    pub fn proceed() -> Self {
        Self {
            route: Route::Proceed,
            feedback: None,
            note: Some("Status: Approved".to_string()),
        }
    }

    pub fn recontextualize(feedback: AuditFeedback, note: impl Into<String>) -> Self {
        Self {
            route: Route::Recontextualize,
            feedback: Some(feedback),
            note: Some(note.into()),
        }
    }

    pub fn next_level() -> Self {
        Self {
            route: Route::NextLevel,
            feedback: None,
            note: None,
        }
    }

    pub fn finalize() -> Self {
        Self {
            route: Route::Finalize,
            feedback: None,
            note: None,
        }
    }

    /// Plan audit view of the route.
    pub fn decision(&self) -> AuditDecision {
        match self.route {
            Route::Recontextualize => AuditDecision::FixingBlueprint,
            _ => AuditDecision::Satisfied,
        }
    }

    pub fn is_repair(&self) -> bool {
        self.route == Route::Recontextualize
    }
}
