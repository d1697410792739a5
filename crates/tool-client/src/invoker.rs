//! The Tool Invoker (C1): a validated HTTP call to an external tool server.
//!
//! Every failure mode — transport error, allowlist rejection, project
//! rejection — is folded into a synthetic `(status_code, payload)` pair
//! rather than raised as an error. Nothing here ever bubbles an `Err` out
//! to the executor; the executor decides success/failure purely from the
//! returned status code and payload shape.

use ap_domain::config::InvokerConfig;
use ap_domain::plan::{HttpMethod, ScalarValue};
use ap_domain::registry::ToolServer;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Outcome of a single HTTP call: the (possibly synthetic) status code and
/// the parsed-or-raw response body.
#[derive(Debug, Clone)]
pub struct InvokeResult {
    pub status_code: u16,
    pub payload: Value,
}

pub struct ToolInvoker {
    client: reqwest::Client,
}

impl ToolInvoker {
    pub fn new(cfg: &InvokerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_sec))
            .redirect(if cfg.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
            .expect("reqwest client build must not fail for static config");
        Self { client }
    }

    /// Call `method path` on `tool` on behalf of `project_id`.
    ///
    /// Steps, per the contract: (1) reject if the endpoint isn't in the
    /// tool's declared allowlist, (2) reject if the tool is inactive or not
    /// enabled for the calling project, (3) issue the HTTP request with
    /// `query` as URL params and `body` as JSON when non-null, following
    /// redirects, bounded by the invoker's timeout, (4) parse the response
    /// as JSON if possible, else fall back to plain text.
    pub async fn invoke(
        &self,
        tool: &ToolServer,
        project_id: &str,
        method: HttpMethod,
        path: &str,
        query: Option<&HashMap<String, ScalarValue>>,
        body: Option<&Value>,
    ) -> InvokeResult {
        if !tool.allows_endpoint(method, path) {
            return InvokeResult {
                status_code: 403,
                payload: json!({
                    "error": "endpoint_not_allowed",
                    "detail": format!("{} {} is not in tool \"{}\"'s allowlist", method.as_str(), path, tool.id),
                }),
            };
        }
        if !tool.active {
            return InvokeResult {
                status_code: 404,
                payload: json!({
                    "error": "tool_inactive",
                    "detail": format!("tool \"{}\" is inactive", tool.id),
                }),
            };
        }
        if !tool.enabled_for_project(project_id) {
            return InvokeResult {
                status_code: 403,
                payload: json!({
                    "error": "tool_not_enabled_for_project",
                    "detail": format!("tool \"{}\" is not enabled for project \"{project_id}\"", tool.id),
                }),
            };
        }

        let url = format!("{}{}", tool.base_url.trim_end_matches('/'), path);
        let mut req = self.client.request(
            reqwest::Method::from_bytes(method.as_str().as_bytes()).expect("fixed method set"),
            &url,
        );
        if let Some(q) = query {
            let pairs: Vec<(String, String)> = q
                .iter()
                .map(|(k, v)| (k.clone(), v.to_query_string()))
                .collect();
            req = req.query(&pairs);
        }
        if let Some(b) = body {
            req = req.json(b);
        }
        req = req.header("Accept", "application/json");

        match req.send().await {
            Ok(resp) => {
                let status_code = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                let payload = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
                InvokeResult { status_code, payload }
            }
            Err(e) => {
                let synthetic = if e.is_timeout() { 504 } else { 502 };
                InvokeResult {
                    status_code: synthetic,
                    payload: json!({
                        "error": "transport_error",
                        "detail": e.to_string(),
                    }),
                }
            }
        }
    }
}

/// Outcome of classifying a `POST /command` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Ok,
    Failed { reason: String },
}

/// Whether `method path` identifies the special shell-command endpoint
/// subject to §4.1's classification instead of plain 2xx/non-2xx.
pub fn is_command_call(method: HttpMethod, path: &str) -> bool {
    method == HttpMethod::Post && path == "/command"
}

/// Classify a `/command` response payload: success requires a JSON object
/// with `status == "ok"` AND `exit_code == 0` (exit_code coerced to an
/// integer; non-numeric counts as 0). Otherwise the command failed, with
/// the reason preferring `stderr`, then `stdout`, then a synthesized
/// message.
pub fn classify_command_result(status_code: u16, payload: &Value) -> CommandOutcome {
    if !(200..300).contains(&status_code) {
        let detail = payload
            .get("detail")
            .and_then(|v| v.as_str())
            .unwrap_or("request failed");
        return CommandOutcome::Failed {
            reason: detail.to_string(),
        };
    }

    let obj = match payload.as_object() {
        Some(o) => o,
        None => {
            return CommandOutcome::Failed {
                reason: "invalid result (not a JSON object)".into(),
            }
        }
    };

    let status = obj.get("status").and_then(|v| v.as_str()).unwrap_or("");
    let exit_code = obj
        .get("exit_code")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let stdout = obj.get("stdout").and_then(|v| v.as_str()).unwrap_or("");
    let stderr = obj.get("stderr").and_then(|v| v.as_str()).unwrap_or("");

    if status.eq_ignore_ascii_case("ok") && exit_code == 0 {
        return CommandOutcome::Ok;
    }

    let reason = if !stderr.is_empty() {
        stderr.to_string()
    } else if !stdout.is_empty() {
        stdout.to_string()
    } else {
        format!("command failed (status={status}, exit_code={exit_code})")
    };
    CommandOutcome::Failed { reason }
}

/// Outcome of classifying a whole MCP-call step's result, keeping an
/// HTTP-level failure distinct from a `/command` step's payload-level
/// failure: §4.5's retry/reasoner loop applies only to the latter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Ok,
    /// Transport error or non-2xx status, for any endpoint.
    HttpError { reason: String },
    /// A `/command` step answered 2xx but the command itself failed.
    CommandFailed { reason: String },
}

/// Classify a step's result. A non-2xx status (or transport error,
/// already folded into a synthetic status by [`ToolInvoker::invoke`]) is
/// always an [`StepOutcome::HttpError`], regardless of endpoint kind.
/// Only a 2xx `/command` response is handed to [`classify_command_result`]
/// for status/exit_code inspection.
pub fn classify_step_result(is_cmd: bool, status_code: u16, payload: &Value) -> StepOutcome {
    if !(200..300).contains(&status_code) {
        let detail = payload
            .get("detail")
            .and_then(|v| v.as_str())
            .unwrap_or("request failed");
        return StepOutcome::HttpError {
            reason: detail.to_string(),
        };
    }
    if is_cmd {
        match classify_command_result(status_code, payload) {
            CommandOutcome::Ok => StepOutcome::Ok,
            CommandOutcome::Failed { reason } => StepOutcome::CommandFailed { reason },
        }
    } else {
        StepOutcome::Ok
    }
}
