//! Drill-down Pipeline
//!
//! Question in, diagnostic report out:
//! - `periods` - discovers the current and prior period
//! - `planner` - drafts and normalizes the blueprint
//! - `gatekeeper` - plan review and per-level review with narratives
//! - `expander` - resolves a level into work items
//! - `executor` - generates, guards and runs the queries of one level
//! - `summarizer` - reduces query results to level summaries
//! - `synthesizer` / `sanitizer` - writes and cleans the final report
//! - `state` / `runner` - run state and the control loop

pub mod executor;
pub mod expander;
pub mod gatekeeper;
pub mod periods;
pub mod planner;
pub mod prompts;
pub mod runner;
pub mod sanitizer;
pub mod state;
pub mod summarizer;
pub mod synthesizer;

#[cfg(test)]
mod test_support;

pub use executor::Executor;
pub use expander::{expand_level, resolve_target};
pub use gatekeeper::{review_level, review_plan, LevelReview};
pub use periods::{discover_periods, period_query, DiscoveredPeriods};
pub use planner::{draft_blueprint, PlanDraft, PlanRequest};
pub use runner::DrilldownRunner;
pub use sanitizer::{sanitize_report, LEAKED_IDENTIFIER_PATTERNS};
pub use state::{Phase, PlannerFeedback, RunState};
pub use summarizer::{impact_share, summarize_level, summarize_outcome};
pub use synthesizer::{synthesize, vault_digest, Synthesis};
