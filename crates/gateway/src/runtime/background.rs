//! The Background Runner (C5): wraps the Plan Executor with the chat-facing
//! protocol, command-retry, reasoner fallback, dangerous-command filtering,
//! whole-plan timeout, cancellation, and the finalize-once-always block.

use crate::runtime::cancel::{CancelMap, CancelToken};
use crate::runtime::executor::{run_plan, ExecutionOutcome, StepInvoker};
use crate::runtime::reasoner::{FixAction, Reasoner, ReasonerContext};
use ap_chat::chat_state_repo::ChatStateRepo;
use ap_chat::message_log::MessageLog;
use ap_chat::run_store::{PlanRunStore, PlanRunUpdate};
use ap_domain::chat_state::{ChatStateUpdate, ClearableField};
use ap_domain::config::{RetryConfig, ToolSecurityConfig};
use ap_domain::plan::PlanStep;
use ap_domain::registry::ToolRegistry;
use ap_domain::run_state::RunLifecycleStatus;
use ap_domain::tool::Role;
use ap_domain::trace::TraceEvent;
use ap_tools::invoker::{classify_step_result, is_command_call, InvokeResult, StepOutcome, ToolInvoker};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub struct BackgroundRunner {
    pub run_store: Arc<PlanRunStore>,
    pub chat_state: Arc<ChatStateRepo>,
    pub messages: Arc<MessageLog>,
    pub cancel_map: Arc<CancelMap>,
    pub tool_registry: Arc<ToolRegistry>,
    pub tool_invoker: Arc<ToolInvoker>,
    pub reasoner: Option<Arc<Reasoner>>,
    pub retry: RetryConfig,
    pub security: ToolSecurityConfig,
}

impl BackgroundRunner {
    /// Drive a confirmed run to completion. Spawned as a single
    /// `tokio::spawn`ed task per run by the Send Pipeline after the
    /// `draft -> queued` CAS succeeds.
    pub async fn run(self: Arc<Self>, run_id: String, chat_id: String, project_id: String) {
        let token = self.cancel_map.register(&run_id);
        let started_ms = now_ms();

        TraceEvent::RunStarted { run_id: run_id.clone(), chat_id: chat_id.clone() }.emit();

        let _ = self.run_store.update(
            &run_id,
            now_ms(),
            PlanRunUpdate {
                status: Some(RunLifecycleStatus::Running),
                last_event: Some("run_start".into()),
                ..Default::default()
            },
        );
        self.append_envelope(&chat_id, &run_id, "run_start", None, None);

        let Some(mut state) = self.run_store.get(&run_id) else {
            tracing::error!(run_id, "background runner started for unknown run");
            self.cancel_map.remove(&run_id);
            return;
        };

        let invoker = RunnerInvoker {
            tool_registry: self.tool_registry.clone(),
            tool_invoker: self.tool_invoker.clone(),
            project_id,
            reasoner: self.reasoner.clone(),
            retry: self.retry.clone(),
            security: self.security.clone(),
            run_id: run_id.clone(),
            chat_id: chat_id.clone(),
            messages: self.messages.clone(),
            cancel: token.clone(),
            goal: state.goal.clone(),
        };

        let timeout = Duration::from_secs(self.retry.plan_timeout_sec);
        let outcome = tokio::select! {
            outcome = run_plan(&mut state.plan, &invoker) => RunOutcome::Finished(outcome),
            _ = tokio::time::sleep(timeout) => RunOutcome::TimedOut,
            _ = wait_for_cancel(token.clone()) => RunOutcome::Cancelled,
        };

        let (status, error, event) = match &outcome {
            RunOutcome::Finished(ExecutionOutcome::Done) => (RunLifecycleStatus::Done, None, "run_done"),
            RunOutcome::Finished(ExecutionOutcome::Error { reason, .. }) => {
                (RunLifecycleStatus::Error, Some(reason.clone()), "run_error")
            }
            RunOutcome::TimedOut => (RunLifecycleStatus::Error, Some("plan_timeout".into()), "run_timeout"),
            RunOutcome::Cancelled => (RunLifecycleStatus::Error, Some("cancelled".into()), "run_cancelled"),
        };

        let finish_ms = now_ms();
        if self
            .run_store
            .update(
                &run_id,
                finish_ms,
                PlanRunUpdate {
                    status: Some(status),
                    current_step_path: Some(None),
                    last_event: Some(event.into()),
                    plan: Some(state.plan.clone()),
                    error: Some(error.clone()),
                },
            )
            .is_err()
        {
            tracing::error!(run_id, "failed to persist run finalization");
        }

        self.append_envelope(&chat_id, &run_id, event, error.as_deref(), None);

        TraceEvent::RunFinished {
            run_id: run_id.clone(),
            chat_id: chat_id.clone(),
            status: format!("{status:?}"),
            duration_ms: (finish_ms - started_ms).max(0) as u64,
        }
        .emit();

        // Only clear pending/active if they still name this run — a newer
        // draft or run may have superseded it while this one was in flight.
        let chat_state = self.chat_state.get(&chat_id);
        let mut update = ChatStateUpdate {
            last_run_id: Some(ClearableField::Set(run_id.clone())),
            last_run_status: Some(ClearableField::Set(format!("{status:?}").to_lowercase())),
            last_run_ts: Some(finish_ms),
            ..Default::default()
        };
        if chat_state.active_run_id.as_deref() == Some(run_id.as_str()) {
            update.active_run_id = Some(ClearableField::Clear);
        }
        if chat_state.pending_run_id.as_deref() == Some(run_id.as_str()) {
            update.pending_run_id = Some(ClearableField::Clear);
        }
        if let Err(e) = self.chat_state.apply(&chat_id, update) {
            tracing::error!(run_id, error = %e, "failed to finalize chat state after run");
        }

        self.cancel_map.remove(&run_id);
    }

    fn append_envelope(&self, chat_id: &str, run_id: &str, kind: &str, error: Option<&str>, step_path: Option<&str>) {
        let mut envelope = json!({"v": 1, "kind": kind, "run_id": run_id, "ts_ms": now_ms()});
        if let Some(e) = error {
            envelope["error"] = json!(e);
        }
        if let Some(p) = step_path {
            envelope["step_path"] = json!(p);
        }
        let text = format!("[run {run_id}] {kind}");
        if let Err(e) = self.messages.append(chat_id, Role::Assistant, text, Some(envelope), now_ms()) {
            tracing::error!(chat_id, run_id, error = %e, "failed to append run envelope to chat log");
        }
    }
}

enum RunOutcome {
    Finished(ExecutionOutcome),
    TimedOut,
    Cancelled,
}

async fn wait_for_cancel(token: CancelToken) {
    loop {
        if token.is_cancelled() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// The concrete [`StepInvoker`] the background runner hands to the
/// executor: plain command retries up to `retry.max_attempts_per_command_step`,
/// then one reasoner-mediated repair attempt, with per-step chat envelopes.
struct RunnerInvoker {
    tool_registry: Arc<ToolRegistry>,
    tool_invoker: Arc<ToolInvoker>,
    project_id: String,
    reasoner: Option<Arc<Reasoner>>,
    retry: RetryConfig,
    security: ToolSecurityConfig,
    run_id: String,
    chat_id: String,
    messages: Arc<MessageLog>,
    cancel: CancelToken,
    goal: String,
}

impl RunnerInvoker {
    fn is_dangerous(&self, cmd: &str) -> bool {
        let lower = cmd.to_lowercase();
        self.security.denied_command_substrings.iter().any(|s| lower.contains(&s.to_lowercase()))
    }

    fn emit(&self, step_path: &str, kind: &str, title: &str, detail: Option<&str>) {
        let mut envelope = json!({"v": 1, "kind": kind, "run_id": self.run_id, "step_path": step_path, "title": title, "ts_ms": now_ms()});
        if let Some(d) = detail {
            envelope["detail"] = json!(d);
        }
        let text = format!("[{step_path}] {kind}: {title}");
        let _ = self.messages.append(&self.chat_id, Role::Assistant, text, Some(envelope), now_ms());
    }
}

#[async_trait]
impl StepInvoker for RunnerInvoker {
    async fn invoke_step(&self, step_path: &str, step: &PlanStep) -> InvokeResult {
        let call = match step.tool_call.as_ref() {
            Some(c) => c,
            None => {
                return InvokeResult {
                    status_code: 500,
                    payload: json!({"error": "missing_tool_call", "detail": "step has no tool_call"}),
                }
            }
        };
        let Some(tool) = self.tool_registry.get(&call.tool_id) else {
            return InvokeResult {
                status_code: 404,
                payload: json!({"error": "unknown_tool", "detail": format!("tool \"{}\" is not registered", call.tool_id)}),
            };
        };
        let method = call.method.unwrap_or(ap_domain::plan::HttpMethod::Post);
        let path = call.path.clone().unwrap_or_default();
        let is_cmd = is_command_call(method, &path);

        self.emit(step_path, "step_start", &step.title, None);

        let mut body = call.body.clone();
        let mut attempt: u32 = 1;
        let mut reasoner_tried = false;

        loop {
            if self.cancel.is_cancelled() {
                return InvokeResult {
                    status_code: 499,
                    payload: json!({"error": "cancelled", "detail": "run was cancelled"}),
                };
            }

            TraceEvent::StepDispatched {
                run_id: self.run_id.clone(),
                step_path: step_path.to_string(),
                tool_id: call.tool_id.clone(),
                method: method.as_str().to_string(),
                path: path.clone(),
                attempt,
            }
            .emit();

            let started = now_ms();
            let result = self
                .tool_invoker
                .invoke(tool, &self.project_id, method, &path, call.query.as_ref(), body.as_ref())
                .await;
            let duration_ms = (now_ms() - started).max(0) as u64;

            let outcome = classify_step_result(is_cmd, result.status_code, &result.payload);

            TraceEvent::StepResult {
                run_id: self.run_id.clone(),
                step_path: step_path.to_string(),
                status_code: result.status_code,
                ok: outcome == StepOutcome::Ok,
                duration_ms,
            }
            .emit();

            match outcome {
                StepOutcome::Ok => {
                    self.emit(step_path, "step_ok", &step.title, None);
                    return result;
                }
                // §4.5's first FSM branch: an HTTP-level error (transport
                // failure or non-2xx, including on a `/command` step)
                // aborts the step immediately. Only a `/command` step's
                // 2xx payload failure is eligible for retry/reasoner repair.
                StepOutcome::HttpError { reason } => {
                    self.emit(step_path, "step_err", &step.title, Some(&reason));
                    return result;
                }
                StepOutcome::CommandFailed { reason } => {
                    if attempt >= self.retry.max_attempts_per_command_step {
                        if !reasoner_tried {
                            if let Some(reasoner) = &self.reasoner {
                                reasoner_tried = true;
                                let stdout = result.payload.get("stdout").and_then(|v| v.as_str()).unwrap_or("");
                                let stderr = result.payload.get("stderr").and_then(|v| v.as_str()).unwrap_or("");
                                let prior_cmd = body
                                    .as_ref()
                                    .and_then(|b| b.get("cmd"))
                                    .and_then(|v| v.as_str())
                                    .unwrap_or("")
                                    .to_string();
                                let fix = reasoner
                                    .propose_fix(ReasonerContext {
                                        goal: &self.goal,
                                        prior_cmd: &prior_cmd,
                                        stdout,
                                        stderr,
                                        attempt,
                                        max_attempts: self.retry.max_attempts_per_command_step,
                                    })
                                    .await;
                                let accepted = matches!(
                                    &fix,
                                    Some(f) if f.action == FixAction::Retry
                                        && f.cmd.as_deref().is_some_and(|c| !c.trim().is_empty())
                                        && f.cmd.as_deref() != Some(prior_cmd.as_str())
                                        && !self.is_dangerous(f.cmd.as_deref().unwrap_or(""))
                                );
                                TraceEvent::ReasonerInvoked {
                                    run_id: self.run_id.clone(),
                                    step_path: step_path.to_string(),
                                    attempt,
                                    accepted,
                                }
                                .emit();
                                if accepted {
                                    let new_cmd = fix.unwrap().cmd.unwrap();
                                    self.emit(step_path, "step_retry", &step.title, Some("reasoner proposed a fix"));
                                    body = Some(json!({"cmd": new_cmd}));
                                    attempt += 1;
                                    continue;
                                }
                            }
                        }
                        self.emit(step_path, "step_err", &step.title, Some(&reason));
                        return result;
                    }
                    self.emit(step_path, "step_retry", &step.title, Some(&reason));
                    attempt += 1;
                    continue;
                }
            }
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
