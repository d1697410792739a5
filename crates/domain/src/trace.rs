use serde::Serialize;

/// Structured trace events emitted across the autoplan crates.
///
/// These are logged via [`TraceEvent::emit`] as a single `trace_event=<json>`
/// field on a `tracing` event, distinct from the versioned chat-log envelopes
/// the background runner appends for end users (see `runtime::background`).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    PlanDrafted {
        run_id: String,
        chat_id: String,
        plan_id: String,
        step_count: usize,
    },
    RunQueued {
        run_id: String,
        chat_id: String,
    },
    RunStarted {
        run_id: String,
        chat_id: String,
    },
    StepDispatched {
        run_id: String,
        step_path: String,
        tool_id: String,
        method: String,
        path: String,
        attempt: u32,
    },
    StepResult {
        run_id: String,
        step_path: String,
        status_code: u16,
        ok: bool,
        duration_ms: u64,
    },
    ReasonerInvoked {
        run_id: String,
        step_path: String,
        attempt: u32,
        accepted: bool,
    },
    RunFinished {
        run_id: String,
        chat_id: String,
        status: String,
        duration_ms: u64,
    },
    RunRecovered {
        run_id: String,
        chat_id: String,
        prior_status: String,
    },
    LlmRequest {
        provider: String,
        model: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sa_event");
    }
}
