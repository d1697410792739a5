//! Persistent wrapper around a [`PlanRun`]: the unit the run store
//! actually owns, keyed by `run_id` (distinct from the plan's own `id`).

use crate::plan::PlanRun;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a [`PlanRunState`].
///
/// Valid transitions form a DAG, never a cycle:
/// `draft -> queued -> running -> {done, error}`, plus the two recovery
/// paths `draft -> error` and `queued -> error` used by startup recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunLifecycleStatus {
    Draft,
    Queued,
    Running,
    Done,
    Error,
}

impl RunLifecycleStatus {
    /// Whether `self -> next` is a legal transition per the DAG in the
    /// module doc comment. Used defensively in tests and by stores that
    /// want to assert on top of the CAS primitives.
    pub fn can_transition_to(self, next: RunLifecycleStatus) -> bool {
        use RunLifecycleStatus::*;
        matches!(
            (self, next),
            (Draft, Queued)
                | (Draft, Error)
                | (Queued, Running)
                | (Queued, Error)
                | (Running, Done)
                | (Running, Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunLifecycleStatus::Done | RunLifecycleStatus::Error)
    }

    pub fn is_active(self) -> bool {
        matches!(self, RunLifecycleStatus::Queued | RunLifecycleStatus::Running)
    }
}

/// Durable record for one attempted execution of a plan.
///
/// Invariants (enforced by the owning store, not by this type alone):
/// `plan` is non-null from creation onward; `updated_ts` is monotonically
/// non-decreasing across updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRunState {
    pub run_id: String,
    pub chat_id: String,
    pub plan_id: String,
    pub goal: String,
    pub status: RunLifecycleStatus,
    pub created_ts: i64,
    pub updated_ts: i64,
    #[serde(default)]
    pub current_step_path: Option<String>,
    /// Symbolic name of the most recent emitted event (e.g. `"step_ok"`,
    /// `"confirm_accepted"`, `"recovered_after_reload"`).
    #[serde(default)]
    pub last_event: Option<String>,
    pub plan: PlanRun,
    #[serde(default)]
    pub error: Option<String>,
}

impl PlanRunState {
    pub fn new(run_id: impl Into<String>, chat_id: impl Into<String>, plan: PlanRun, now_ms: i64) -> Self {
        let plan_id = plan.id.clone();
        let goal = plan.goal.clone();
        Self {
            run_id: run_id.into(),
            chat_id: chat_id.into(),
            plan_id,
            goal,
            status: RunLifecycleStatus::Draft,
            created_ts: now_ms,
            updated_ts: now_ms,
            current_step_path: None,
            last_event: None,
            plan,
            error: None,
        }
    }
}
