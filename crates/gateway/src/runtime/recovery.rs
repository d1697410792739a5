//! Recovery (C7): at process start, any run left `queued`/`running` from a
//! prior process has no live background task anymore and is transitioned
//! to `error`. Drafts are left untouched — nothing was executing for them,
//! so there is nothing to recover (see the Send Pipeline's own
//! latest-draft-recovery path for how a stale draft eventually resolves).

use crate::state::AppState;
use ap_domain::tool::Role;
use ap_domain::trace::TraceEvent;
use serde_json::json;

pub async fn recover_interrupted_runs(state: &AppState, now_ms: i64) {
    let recovered = match state.run_store.recover_interrupted(now_ms) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "failed to scan plan run store for interrupted runs");
            return;
        }
    };

    for run in recovered {
        TraceEvent::RunRecovered {
            run_id: run.run_id.clone(),
            chat_id: run.chat_id.clone(),
            prior_status: "queued_or_running".into(),
        }
        .emit();

        let notice = format!("run {} was interrupted by a server restart and has been marked as failed", run.run_id);
        let envelope = json!({"v": 1, "kind": "run_error", "run_id": run.run_id, "ts_ms": now_ms, "error": "stopped by server restart"});
        if let Err(e) = state.messages.append(&run.chat_id, Role::Assistant, &notice, Some(envelope), now_ms) {
            tracing::error!(run_id = %run.run_id, chat_id = %run.chat_id, error = %e, "failed to post recovery notice");
        }

        let chat_state = state.chat_state.get(&run.chat_id);
        let mut update = ap_domain::chat_state::ChatStateUpdate {
            last_run_id: Some(ap_domain::chat_state::ClearableField::Set(run.run_id.clone())),
            last_run_status: Some(ap_domain::chat_state::ClearableField::Set("error".into())),
            last_run_ts: Some(now_ms),
            ..Default::default()
        };
        if chat_state.active_run_id.as_deref() == Some(run.run_id.as_str()) {
            update.active_run_id = Some(ap_domain::chat_state::ClearableField::Clear);
        }
        if chat_state.pending_run_id.as_deref() == Some(run.run_id.as_str()) {
            update.pending_run_id = Some(ap_domain::chat_state::ClearableField::Clear);
        }
        if let Err(e) = state.chat_state.apply(&run.chat_id, update) {
            tracing::error!(run_id = %run.run_id, error = %e, "failed to clear chat state for recovered run");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::cancel::CancelMap;
    use crate::runtime::session_lock::SessionLockMap;
    use ap_chat::chat_state_repo::ChatStateRepo;
    use ap_chat::message_log::MessageLog;
    use ap_chat::run_store::PlanRunStore;
    use ap_domain::config::InvokerConfig;
    use ap_domain::plan::{PlanRun, PlanStep};
    use ap_domain::registry::ToolRegistry;
    use ap_llm::ProviderRegistry;
    use ap_tools::invoker::ToolInvoker;
    use std::sync::Arc;

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ap-recovery-test-{tag}-{}", uuid::Uuid::new_v4()))
    }

    fn state(dir: &std::path::Path) -> AppState {
        AppState {
            config: ap_domain::config::Config::default(),
            llm: Arc::new(ProviderRegistry::default()),
            chat_state: Arc::new(ChatStateRepo::open(dir).unwrap()),
            run_store: Arc::new(PlanRunStore::open(dir).unwrap()),
            messages: Arc::new(MessageLog::open(dir).unwrap()),
            tool_registry: Arc::new(ToolRegistry::new()),
            tool_invoker: Arc::new(ToolInvoker::new(&InvokerConfig { timeout_sec: 1, follow_redirects: true })),
            reasoner: None,
            cancel_map: Arc::new(CancelMap::new()),
            send_locks: Arc::new(SessionLockMap::new()),
            api_token_hash: None,
        }
    }

    #[tokio::test]
    async fn queued_run_is_marked_error_and_chat_notified() {
        let dir = temp_dir("a");
        let state = state(&dir);
        let plan = PlanRun::new("p1", "goal", vec![PlanStep::note("1", "n")], 1000);
        state.run_store.create("run-1", "chat-1", plan, 1000).unwrap();
        state.run_store.try_mark_queued("run-1", 1001).unwrap();
        state.chat_state.apply("chat-1", ap_domain::chat_state::ChatStateUpdate {
            active_run_id: Some(ap_domain::chat_state::ClearableField::Set("run-1".into())),
            ..Default::default()
        }).unwrap();

        recover_interrupted_runs(&state, 2000).await;

        let run = state.run_store.get("run-1").unwrap();
        assert_eq!(run.status, ap_domain::run_state::RunLifecycleStatus::Error);
        let chat_state = state.chat_state.get("chat-1");
        assert!(chat_state.active_run_id.is_none());
        let history = state.messages.history("chat-1", None);
        assert!(history.iter().any(|m| m.content.contains("interrupted")));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn draft_runs_are_left_untouched() {
        let dir = temp_dir("b");
        let state = state(&dir);
        let plan = PlanRun::new("p1", "goal", vec![PlanStep::note("1", "n")], 1000);
        state.run_store.create("run-1", "chat-1", plan, 1000).unwrap();

        recover_interrupted_runs(&state, 2000).await;

        let run = state.run_store.get("run-1").unwrap();
        assert_eq!(run.status, ap_domain::run_state::RunLifecycleStatus::Draft);
        std::fs::remove_dir_all(&dir).ok();
    }
}
