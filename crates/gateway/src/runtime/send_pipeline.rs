//! The Send Pipeline (C6): the single entry point a chat message flows
//! through — confirm/cancel matching, the direct-command fast path, the
//! normal LLM turn, and the atomic handoff into the Background Runner.

use crate::runtime::background::BackgroundRunner;
use crate::state::AppState;
use ap_chat::run_store::PlanRunUpdate;
use ap_domain::chat_state::{ChatState, ChatStateUpdate, ClearableField};
use ap_domain::plan::{HttpMethod, PlanRun, PlanStep, ToolCallSpec};
use ap_domain::run_state::RunLifecycleStatus;
use ap_domain::tool::{Message, Role, ToolDefinition};
use ap_llm::{ChatRequest, ToolChoice};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub const MCP_REQUEST_TOOL: &str = "mcp_request";

#[derive(Debug, Clone)]
pub struct SendReply {
    pub reply: String,
    pub pending_run_id: Option<String>,
    pub run_id: Option<String>,
    pub status: Option<String>,
}

impl SendReply {
    fn text(reply: impl Into<String>) -> Self {
        Self { reply: reply.into(), pending_run_id: None, run_id: None, status: None }
    }
}

/// Drive one `(chat_id, message)` turn through the algorithm described in
/// the gateway's send-pipeline design: confirm/cancel vocabulary, then the
/// direct-command fast path, then the orphan/pending/normal-turn branches.
pub async fn send(state: &Arc<AppState>, chat_id: &str, project_id: &str, message: &str) -> SendReply {
    if chat_id.trim().is_empty() {
        return SendReply::text("unknown chat");
    }

    let _guard = state.send_locks.acquire(chat_id).await;
    let now = now_ms();

    state
        .messages
        .append(chat_id, Role::User, message, None, now)
        .ok();

    let chat_state = state.chat_state.get(chat_id);
    let normalized = message.trim().to_lowercase();
    let is_confirm = state.config.chat.confirm_words.iter().any(|w| w == &normalized);
    let is_cancel = state.config.chat.cancel_words.iter().any(|w| w == &normalized);

    if let Some(reply) = try_direct_command_fast_path(state, chat_id, project_id, message).await {
        return reply;
    }

    match &chat_state.pending_run_id {
        None => handle_no_pending(state, chat_id, project_id, &chat_state, is_confirm, is_cancel, message, now).await,
        Some(pending_id) => {
            handle_pending(state, chat_id, project_id, &chat_state, pending_id.clone(), is_confirm, is_cancel, now).await
        }
    }
}

/// Step 4: a narrow imperative pattern ("run: <cmd>", "ejecuta: <cmd>")
/// against a project with a `/command`-exposing tool skips the LLM
/// entirely and drafts a deterministic one-step plan.
async fn try_direct_command_fast_path(
    state: &Arc<AppState>,
    chat_id: &str,
    project_id: &str,
    message: &str,
) -> Option<SendReply> {
    if !state.config.chat.direct_command_fast_path {
        return None;
    }
    let cmd = parse_direct_command(message)?;
    let tool = state
        .tool_registry
        .all()
        .find(|t| t.exposes_command_endpoint() && t.enabled_for_project(project_id))?;

    let now = now_ms();
    let plan = PlanRun::new(
        Uuid::new_v4().to_string(),
        format!("run command: {cmd}"),
        vec![PlanStep::mcp_call(
            "1",
            format!("run `{cmd}`"),
            ToolCallSpec {
                tool_id: tool.id.clone(),
                method: Some(HttpMethod::Post),
                path: Some("/command".into()),
                query: None,
                body: Some(json!({"cmd": cmd})),
            },
        )],
        now,
    );
    Some(draft_plan_and_reply(state, chat_id, plan, now).await)
}

fn parse_direct_command(message: &str) -> Option<String> {
    let trimmed = message.trim();
    for prefix in ["run:", "ejecuta:", "run ", "ejecuta "] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            let cmd = rest.trim();
            if !cmd.is_empty() {
                return Some(cmd.to_string());
            }
        }
    }
    None
}

async fn handle_no_pending(
    state: &Arc<AppState>,
    chat_id: &str,
    project_id: &str,
    chat_state: &ChatState,
    is_confirm: bool,
    is_cancel: bool,
    message: &str,
    now: i64,
) -> SendReply {
    if is_confirm || is_cancel {
        if let Some(active_id) = &chat_state.active_run_id {
            return SendReply::text(format!("run {active_id} is already executing"));
        }
        if let Some(draft) = state.run_store.get_latest_by(chat_id, RunLifecycleStatus::Draft) {
            return resolve_orphan_confirmation(state, chat_id, draft.run_id, is_confirm, now).await;
        }
        if let Some(last_ts) = chat_state.last_run_ts {
            if now - last_ts <= state.config.chat.recency_window_sec * 1000 {
                let status = chat_state.last_run_status.clone().unwrap_or_default();
                return SendReply::text(format!("the last run already finished ({status})"));
            }
        }
        return SendReply::text("there is no pending plan to confirm or cancel");
    }

    run_normal_turn(state, chat_id, project_id, message, now).await
}

async fn resolve_orphan_confirmation(
    state: &Arc<AppState>,
    chat_id: &str,
    run_id: String,
    is_confirm: bool,
    now: i64,
) -> SendReply {
    if is_cancel_only(is_confirm) {
        let _ = state.run_store.update(
            &run_id,
            now,
            PlanRunUpdate { status: Some(RunLifecycleStatus::Error), error: Some(Some("cancelled".into())), ..Default::default() },
        );
        return SendReply::text("cancelled the pending plan");
    }
    confirm_and_handoff(state, chat_id, run_id, now).await
}

fn is_cancel_only(is_confirm: bool) -> bool {
    !is_confirm
}

async fn handle_pending(
    state: &Arc<AppState>,
    chat_id: &str,
    _project_id: &str,
    chat_state: &ChatState,
    pending_id: String,
    is_confirm: bool,
    is_cancel: bool,
    now: i64,
) -> SendReply {
    let Some(run) = state.run_store.get(&pending_id) else {
        let _ = state.chat_state.apply(chat_id, ChatStateUpdate { pending_run_id: Some(ClearableField::Clear), ..Default::default() });
        return SendReply::text("that pending plan no longer exists");
    };
    if run.status != RunLifecycleStatus::Draft {
        let _ = state.chat_state.apply(chat_id, ChatStateUpdate { pending_run_id: Some(ClearableField::Clear), ..Default::default() });
        return SendReply::text("that plan is no longer pending");
    }

    if is_confirm {
        confirm_and_handoff(state, chat_id, pending_id, now).await
    } else if is_cancel {
        let _ = state.run_store.update(
            &pending_id,
            now,
            PlanRunUpdate { status: Some(RunLifecycleStatus::Error), error: Some(Some("cancelled".into())), ..Default::default() },
        );
        let _ = state.chat_state.apply(
            chat_id,
            ChatStateUpdate {
                pending_run_id: Some(ClearableField::Clear),
                active_run_id: Some(ClearableField::Clear),
                ..Default::default()
            },
        );
        SendReply::text("cancelled the pending plan")
    } else {
        let _ = chat_state;
        SendReply {
            reply: format!("please confirm or cancel the pending plan (run {pending_id})"),
            pending_run_id: Some(pending_id),
            run_id: None,
            status: Some("draft".into()),
        }
    }
}

/// The CAS handoff: `draft -> queued` first, and only on success does the
/// run become `active` and get scheduled. A loser of the CAS (a second
/// concurrent confirm) gets told the run is already queued, never a
/// duplicate background task.
async fn confirm_and_handoff(state: &Arc<AppState>, chat_id: &str, run_id: String, now: i64) -> SendReply {
    let won = state.run_store.try_mark_queued(&run_id, now).unwrap_or(false);
    if !won {
        return SendReply::text(format!("run {run_id} is already queued or running"));
    }

    let _ = state.chat_state.apply(
        chat_id,
        ChatStateUpdate {
            pending_run_id: Some(ClearableField::Clear),
            active_run_id: Some(ClearableField::Set(run_id.clone())),
            ..Default::default()
        },
    );

    let runner = Arc::new(BackgroundRunner {
        run_store: state.run_store.clone(),
        chat_state: state.chat_state.clone(),
        messages: state.messages.clone(),
        cancel_map: state.cancel_map.clone(),
        tool_registry: state.tool_registry.clone(),
        tool_invoker: state.tool_invoker.clone(),
        reasoner: state.reasoner.clone(),
        retry: state.config.tools.retry.clone(),
        security: state.config.tools.security.clone(),
    });
    let spawned_chat_id = chat_id.to_string();
    let spawned_run_id = run_id.clone();
    let project_id = "default".to_string();
    tokio::spawn(async move {
        runner.run(spawned_run_id, spawned_chat_id, project_id).await;
    });

    SendReply { reply: format!("run {run_id} queued"), pending_run_id: None, run_id: Some(run_id), status: Some("queued".into()) }
}

/// Idempotent handoff entry point for the `POST /v1/runs/:run_id/start`
/// endpoint: CAS the named run from `draft` to `queued` and spawn its
/// Background Runner. If the run is already past `draft` this just reports
/// its current status rather than erroring — starting a run twice is not a
/// client mistake, it is the race the CAS exists to resolve.
pub async fn start_run(state: &Arc<AppState>, run_id: &str) -> SendReply {
    let Some(run) = state.run_store.get(run_id) else {
        return SendReply::text("run not found");
    };
    if run.status != RunLifecycleStatus::Draft {
        return SendReply {
            reply: format!("run {run_id} is {:?}", run.status),
            pending_run_id: None,
            run_id: Some(run_id.to_string()),
            status: Some(format!("{:?}", run.status).to_lowercase()),
        };
    }
    confirm_and_handoff(state, &run.chat_id, run_id.to_string(), now_ms()).await
}

async fn run_normal_turn(state: &Arc<AppState>, chat_id: &str, project_id: &str, message: &str, now: i64) -> SendReply {
    let Some(provider) = state.llm.default_provider() else {
        return SendReply::text("no LLM provider is configured");
    };

    let history = state.messages.history(chat_id, Some(20));
    let mut messages: Vec<Message> = vec![Message::system(system_prompt(state))];
    for m in &history {
        let role = m.role;
        messages.push(Message { role, content: ap_domain::tool::MessageContent::Text(m.content.clone()) });
    }
    messages.push(Message::user(message));

    let req = ChatRequest {
        messages,
        tools: vec![mcp_request_tool_def()],
        tool_choice: ToolChoice::Auto,
        temperature: Some(0.2),
        max_tokens: None,
        model: None,
    };

    let resp = match provider.chat(req.clone()).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "llm call failed during send pipeline");
            return SendReply::text("sorry, I couldn't reach the language model");
        }
    };

    let call = match resp.tool_calls.iter().find(|c| c.tool_name == MCP_REQUEST_TOOL) {
        Some(c) => c.clone(),
        None => {
            // Step 9: a plan-text-shaped reply with no tool call gets one
            // forced retry before falling back to plain text.
            if !looks_like_plan_text(&resp.content) {
                return fall_back_to_text(&resp.content);
            }
            let mut retry_req = req;
            retry_req.tool_choice = ToolChoice::Forced(MCP_REQUEST_TOOL.into());
            match provider.chat(retry_req).await {
                Ok(retry_resp) => match retry_resp.tool_calls.into_iter().find(|c| c.tool_name == MCP_REQUEST_TOOL) {
                    Some(c) => c,
                    None => return fall_back_to_text(&resp.content),
                },
                Err(_) => return fall_back_to_text(&resp.content),
            }
        }
    };

    let Some(plan) = plan_from_tool_call(&call.arguments, project_id, state) else {
        return SendReply::text("I couldn't make sense of the proposed plan");
    };

    draft_plan_and_reply(state, chat_id, plan, now).await
}

/// Step 9's plan-vocabulary heuristic: the model answered with prose
/// instead of a tool call, but the prose reads like it was trying to
/// describe a plan (e.g. it emitted "Plan:" / "Step 2" / "propuesto" text
/// instead of calling `mcp_request`). Worth one forced-tool-choice retry
/// rather than surfacing half-a-plan as a chat message.
fn looks_like_plan_text(content: &str) -> bool {
    const MARKERS: &[&str] = &["plan:", "paso ", "step 1", "step 2", "propuesto", "pasos:"];
    let lower = content.to_lowercase();
    MARKERS.iter().filter(|m| lower.contains(*m)).count() >= 2
}

/// Step 9's second guard: the model produced no tool call even after the
/// forced retry, and the text reads like it is itself asking the user to
/// confirm or cancel something — with no pending draft on record, acting
/// on that text would silently create a plan with no LLM-proposed shape.
/// Block it instead of forwarding it verbatim.
fn looks_like_confirmation_prompt(content: &str) -> bool {
    const MARKERS: &[&str] = &["confirm", "confirma", "cancel", "¿deseas", "deseas continuar", "proceed"];
    let lower = content.to_lowercase();
    MARKERS.iter().any(|m| lower.contains(*m))
}

/// Terminal fallback when no tool call could be obtained: block anything
/// that looks like a confirmation prompt (there is no pending draft for
/// the user to be confirming against), otherwise forward the model's text
/// as-is.
fn fall_back_to_text(content: &str) -> SendReply {
    if looks_like_confirmation_prompt(content) {
        return SendReply::text("I couldn't structure an executable plan from that — could you repeat the request?");
    }
    SendReply::text(content)
}

fn system_prompt(state: &AppState) -> String {
    let tools: Vec<String> = state
        .tool_registry
        .all()
        .filter(|t| t.active)
        .map(|t| format!("- {} ({})", t.id, t.name))
        .collect();
    format!(
        "You are an automation assistant. Available tools:\n{}\n\n\
         To propose an action, call {MCP_REQUEST_TOOL} with a single step. \
         Never call tools directly; only propose a plan.",
        if tools.is_empty() { "(none configured)".into() } else { tools.join("\n") }
    )
}

fn mcp_request_tool_def() -> ToolDefinition {
    ToolDefinition {
        name: MCP_REQUEST_TOOL.into(),
        description: "Propose a single tool-server call as the next plan step.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "goal": {"type": "string"},
                "title": {"type": "string"},
                "tool_id": {"type": "string"},
                "method": {"type": "string", "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"]},
                "path": {"type": "string"},
                "body": {"type": "object"},
            },
            "required": ["tool_id", "method", "path"],
        }),
    }
}

/// Normalize a `/command` body, accepting `string | {cmd} | {command} |
/// {text}` from the model and coercing all of them to `{"cmd": ...}`.
fn normalize_command_body(path: &str, body: &Value) -> Value {
    if path != "/command" {
        return body.clone();
    }
    if let Some(s) = body.as_str() {
        return json!({"cmd": s});
    }
    for key in ["cmd", "command", "text"] {
        if let Some(s) = body.get(key).and_then(|v| v.as_str()) {
            return json!({"cmd": s});
        }
    }
    body.clone()
}

fn plan_from_tool_call(args: &Value, project_id: &str, state: &AppState) -> Option<PlanRun> {
    let tool_id = args.get("tool_id")?.as_str()?.to_string();
    let tool = state.tool_registry.get(&tool_id)?;
    if !tool.enabled_for_project(project_id) {
        return None;
    }
    let method = match args.get("method")?.as_str()? {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "PATCH" => HttpMethod::Patch,
        "DELETE" => HttpMethod::Delete,
        _ => return None,
    };
    let path = args.get("path")?.as_str()?.to_string();
    let body = args.get("body").map(|b| normalize_command_body(&path, b));
    let goal = args.get("goal").and_then(|v| v.as_str()).unwrap_or("run a tool call").to_string();
    let title = args.get("title").and_then(|v| v.as_str()).unwrap_or(goal.as_str()).to_string();

    Some(PlanRun::new(
        Uuid::new_v4().to_string(),
        goal,
        vec![PlanStep::mcp_call(
            "1",
            title,
            ToolCallSpec { tool_id, method: Some(method), path: Some(path), query: None, body },
        )],
        now_ms(),
    ))
}

async fn draft_plan_and_reply(state: &Arc<AppState>, chat_id: &str, plan: PlanRun, now: i64) -> SendReply {
    let run_id = Uuid::new_v4().to_string();
    let goal = plan.goal.clone();
    let created = match state.run_store.create(&run_id, chat_id, plan, now) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(chat_id, error = %e, "failed to persist drafted plan");
            return SendReply::text("sorry, I couldn't save that plan");
        }
    };
    let _ = state.chat_state.apply(
        chat_id,
        ChatStateUpdate { pending_run_id: Some(ClearableField::Set(run_id.clone())), ..Default::default() },
    );
    let reply = format!("Plan proposed: {goal} (run {run_id}). Reply to confirm or cancel.");
    let _ = state.messages.append(chat_id, Role::Assistant, &reply, Some(json!({"v": 1, "kind": "plan_proposed", "run_id": run_id})), now);
    SendReply { reply, pending_run_id: Some(run_id), run_id: Some(created.run_id), status: Some("draft".into()) }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap_domain::config::InvokerConfig;
    use ap_domain::registry::{ToolEndpoint, ToolServer};
    use ap_llm::ProviderRegistry;
    use crate::runtime::cancel::CancelMap;
    use crate::runtime::session_lock::SessionLockMap;
    use ap_chat::chat_state_repo::ChatStateRepo;
    use ap_chat::message_log::MessageLog;
    use ap_chat::run_store::PlanRunStore;
    use ap_domain::registry::ToolRegistry;
    use ap_tools::invoker::ToolInvoker;

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ap-send-pipeline-test-{tag}-{}", uuid::Uuid::new_v4()))
    }

    fn state(dir: &std::path::Path) -> Arc<AppState> {
        let mut registry = ToolRegistry::new();
        registry.insert(ToolServer {
            id: "sys".into(),
            name: "system".into(),
            base_url: "http://127.0.0.1:1".into(),
            active: true,
            endpoints: vec![ToolEndpoint { method: HttpMethod::Post, path: "/command".into() }],
            enabled_projects: None,
        });
        Arc::new(AppState {
            config: ap_domain::config::Config::default(),
            llm: Arc::new(ProviderRegistry::default()),
            chat_state: Arc::new(ChatStateRepo::open(dir).unwrap()),
            run_store: Arc::new(PlanRunStore::open(dir).unwrap()),
            messages: Arc::new(MessageLog::open(dir).unwrap()),
            tool_registry: Arc::new(registry),
            tool_invoker: Arc::new(ToolInvoker::new(&InvokerConfig { timeout_sec: 1, follow_redirects: true })),
            reasoner: None,
            cancel_map: Arc::new(CancelMap::new()),
            send_locks: Arc::new(SessionLockMap::new()),
            api_token_hash: None,
        })
    }

    #[tokio::test]
    async fn direct_command_fast_path_skips_the_llm_and_drafts_a_plan() {
        let dir = temp_dir("a");
        let state = state(&dir);
        let reply = send(&state, "chat-1", "proj-a", "run: ls -la").await;
        assert!(reply.pending_run_id.is_some());
        assert_eq!(reply.status.as_deref(), Some("draft"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn confirming_without_a_pending_plan_tells_the_user_so() {
        let dir = temp_dir("b");
        let state = state(&dir);
        let reply = send(&state, "chat-1", "proj-a", "ok").await;
        assert!(reply.reply.contains("no pending plan"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn confirming_a_pending_plan_hands_off_to_queued() {
        let dir = temp_dir("c");
        let state = state(&dir);
        let drafted = send(&state, "chat-1", "proj-a", "run: ls -la").await;
        let run_id = drafted.run_id.unwrap();
        let reply = send(&state, "chat-1", "proj-a", "ok").await;
        assert_eq!(reply.status.as_deref(), Some("queued"));
        let run = state.run_store.get(&run_id).unwrap();
        assert_eq!(run.status, RunLifecycleStatus::Queued);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn cancelling_a_pending_plan_clears_it() {
        let dir = temp_dir("d");
        let state = state(&dir);
        send(&state, "chat-1", "proj-a", "run: ls -la").await;
        let reply = send(&state, "chat-1", "proj-a", "cancela").await;
        assert!(reply.reply.contains("cancelled"));
        let chat_state = state.chat_state.get("chat-1");
        assert!(chat_state.pending_run_id.is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn empty_chat_id_is_rejected() {
        let dir = temp_dir("e");
        let state = state(&dir);
        let reply = send(&state, "", "proj-a", "hello").await;
        assert!(reply.reply.contains("unknown chat"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn normalize_command_body_accepts_all_shapes() {
        assert_eq!(normalize_command_body("/command", &json!("ls")), json!({"cmd": "ls"}));
        assert_eq!(normalize_command_body("/command", &json!({"command": "ls"})), json!({"cmd": "ls"}));
        assert_eq!(normalize_command_body("/command", &json!({"text": "ls"})), json!({"cmd": "ls"}));
        assert_eq!(normalize_command_body("/other", &json!({"foo": "bar"})), json!({"foo": "bar"}));
    }

    #[test]
    fn plan_text_heuristic_needs_two_markers() {
        assert!(!looks_like_plan_text("here is a plan: let's see"));
        assert!(looks_like_plan_text("Plan: step 1 do this, step 2 do that"));
    }

    #[test]
    fn confirmation_prompt_heuristic_matches_common_phrasing() {
        assert!(looks_like_confirmation_prompt("Do you want to confirm this action?"));
        assert!(looks_like_confirmation_prompt("¿Deseas continuar?"));
        assert!(!looks_like_confirmation_prompt("Here is the weather today."));
    }

    #[test]
    fn fall_back_blocks_confirmation_shaped_text_but_passes_through_otherwise() {
        let blocked = fall_back_to_text("please confirm before I proceed");
        assert!(blocked.reply.contains("couldn't structure"));
        let passed = fall_back_to_text("the weather today is sunny");
        assert_eq!(passed.reply, "the weather today is sunny");
    }
}
