//! Per-chat transient state: which draft is pending confirmation, which run
//! is actively executing, and the outcome of the last completed run.

use serde::{Deserialize, Serialize};

/// Per-`chat_id` state tracked by the chat state repo.
///
/// Invariant: `pending_run_id` and `active_run_id` are never both set to
/// the *same* run id — the draft-to-queued transition clears `pending`
/// in the same update that sets `active`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatState {
    #[serde(default)]
    pub pending_run_id: Option<String>,
    #[serde(default)]
    pub active_run_id: Option<String>,
    #[serde(default)]
    pub last_run_id: Option<String>,
    #[serde(default)]
    pub last_run_status: Option<String>,
    #[serde(default)]
    pub last_run_ts: Option<i64>,
}

/// Whitelisted, patch-style update to a chat's state: only fields set to
/// `Some` are applied; `None` leaves the existing value untouched. To
/// explicitly clear a field, wrap it in `Some(None)` via [`ClearableField`].
#[derive(Debug, Clone, Default)]
pub struct ChatStateUpdate {
    pub pending_run_id: Option<ClearableField>,
    pub active_run_id: Option<ClearableField>,
    pub last_run_id: Option<ClearableField>,
    pub last_run_status: Option<ClearableField>,
    pub last_run_ts: Option<i64>,
}

/// A field that can be explicitly set to a value or explicitly cleared,
/// as distinct from "untouched" (represented by the outer `Option::None`
/// in [`ChatStateUpdate`]).
#[derive(Debug, Clone)]
pub enum ClearableField {
    Set(String),
    Clear,
}

impl ClearableField {
    fn apply(self, target: &mut Option<String>) {
        match self {
            ClearableField::Set(v) => *target = Some(v),
            ClearableField::Clear => *target = None,
        }
    }
}

impl ChatState {
    pub fn apply(&mut self, update: ChatStateUpdate) {
        if let Some(f) = update.pending_run_id {
            f.apply(&mut self.pending_run_id);
        }
        if let Some(f) = update.active_run_id {
            f.apply(&mut self.active_run_id);
        }
        if let Some(f) = update.last_run_id {
            f.apply(&mut self.last_run_id);
        }
        if let Some(f) = update.last_run_status {
            f.apply(&mut self.last_run_status);
        }
        if let Some(ts) = update.last_run_ts {
            self.last_run_ts = Some(ts);
        }
    }

    /// Invariant check used in tests: pending and active never name the
    /// same run simultaneously.
    pub fn pending_and_active_disjoint(&self) -> bool {
        match (&self.pending_run_id, &self.active_run_id) {
            (Some(p), Some(a)) => p != a,
            _ => true,
        }
    }
}
