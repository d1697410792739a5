//! A single OpenAI-compatible chat-completion adapter.
//!
//! This is the one concrete [`LlmProvider`] the gateway wires up. It speaks
//! the `/v1/chat/completions` wire format shared by OpenAI and the many
//! self-hosted servers that mirror it (vLLM, Ollama's OpenAI shim, etc.),
//! translating to and from the provider-agnostic [`ChatRequest`]/[`ChatResponse`].

use crate::sse::sse_response_stream;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider, ToolChoice};
use crate::util::{from_reqwest, resolve_api_key};
use ap_domain::config::ProviderConfig;
use ap_domain::error::{Error, Result};
use ap_domain::stream::{BoxStream, StreamEvent, Usage};
use ap_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
use serde_json::{json, Value};
use std::time::Duration;

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    default_model: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(cfg: &ProviderConfig, timeout: Duration) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.id, &cfg.auth)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Other(format!("building http client for \"{}\": {e}", cfg.id)))?;
        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            default_model: cfg.default_model.clone(),
            api_key,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn model_for(&self, req: &ChatRequest) -> Result<String> {
        req.model
            .clone()
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| {
                Error::Config(format!(
                    "provider \"{}\" has no model in the request and no default_model configured",
                    self.id
                ))
            })
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Result<Value> {
        let model = self.model_for(req)?;
        let mut body = json!({
            "model": model,
            "messages": req.messages.iter().map(to_wire_message).collect::<Vec<_>>(),
            "stream": stream,
        });
        let obj = body.as_object_mut().expect("constructed as object above");
        if let Some(t) = req.temperature {
            obj.insert("temperature".into(), json!(t));
        }
        if let Some(mt) = req.max_tokens {
            obj.insert("max_tokens".into(), json!(mt));
        }
        if !req.tools.is_empty() {
            obj.insert(
                "tools".into(),
                json!(req.tools.iter().map(to_wire_tool).collect::<Vec<_>>()),
            );
            obj.insert("tool_choice".into(), to_wire_tool_choice(&req.tool_choice));
        }
        Ok(body)
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut rb = self.client.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }
        rb
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(&req, false)?;
        let resp = self
            .request(&body)
            .send()
            .await
            .map_err(|e| from_reqwest(&self.id, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("http {status}: {text}"),
            });
        }

        let wire: Value = resp.json().await.map_err(|e| from_reqwest(&self.id, e))?;
        parse_chat_response(&self.id, &wire)
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_body(&req, true)?;
        let resp = self
            .request(&body)
            .send()
            .await
            .map_err(|e| from_reqwest(&self.id, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("http {status}: {text}"),
            });
        }

        let provider_id = self.id.clone();
        Ok(sse_response_stream(&self.id, resp, move |data| {
            if data == "[DONE]" {
                return vec![Ok(StreamEvent::Done {
                    usage: None,
                    finish_reason: Some("stop".into()),
                })];
            }
            match serde_json::from_str::<Value>(data) {
                Ok(v) => parse_stream_chunk(&v),
                Err(e) => vec![Err(Error::Provider {
                    provider: provider_id.clone(),
                    message: format!("malformed SSE payload: {e}"),
                })],
            }
        }))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ── Wire translation ────────────────────────────────────────────────

fn to_wire_message(m: &Message) -> Value {
    match m.role {
        Role::Tool => {
            // A Tool-role message carries exactly one ToolResult part in our
            // domain model (see Message::tool_result).
            if let MessageContent::Parts(parts) = &m.content {
                if let Some(ContentPart::ToolResult { tool_use_id, content, .. }) =
                    parts.iter().find(|p| matches!(p, ContentPart::ToolResult { .. }))
                {
                    return json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    });
                }
            }
            json!({"role": "tool", "content": m.content.extract_all_text()})
        }
        Role::Assistant => {
            if let MessageContent::Parts(parts) = &m.content {
                let tool_calls: Vec<Value> = parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::ToolUse { id, name, input } => Some(json!({
                            "id": id,
                            "type": "function",
                            "function": {"name": name, "arguments": input.to_string()},
                        })),
                        _ => None,
                    })
                    .collect();
                if !tool_calls.is_empty() {
                    let text = m.content.extract_all_text();
                    return json!({
                        "role": "assistant",
                        "content": if text.is_empty() { Value::Null } else { json!(text) },
                        "tool_calls": tool_calls,
                    });
                }
            }
            json!({"role": "assistant", "content": m.content.extract_all_text()})
        }
        Role::System => json!({"role": "system", "content": m.content.extract_all_text()}),
        Role::User => json!({"role": "user", "content": m.content.extract_all_text()}),
    }
}

fn to_wire_tool(t: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": t.name,
            "description": t.description,
            "parameters": t.parameters,
        }
    })
}

fn to_wire_tool_choice(tc: &ToolChoice) -> Value {
    match tc {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Forced(name) => json!({"type": "function", "function": {"name": name}}),
    }
}

fn parse_chat_response(provider: &str, wire: &Value) -> Result<ChatResponse> {
    let choice = wire
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| Error::Provider {
            provider: provider.to_string(),
            message: "response had no choices[0]".into(),
        })?;
    let message = choice.get("message").cloned().unwrap_or(Value::Null);
    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();
    let tool_calls = message
        .get("tool_calls")
        .and_then(|tc| tc.as_array())
        .map(|arr| arr.iter().filter_map(parse_wire_tool_call).collect())
        .unwrap_or_default();
    let finish_reason = choice
        .get("finish_reason")
        .and_then(|f| f.as_str())
        .map(str::to_string);
    let model = wire
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or_default()
        .to_string();
    let usage = wire.get("usage").and_then(parse_wire_usage);

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
        model,
        finish_reason,
    })
}

fn parse_wire_tool_call(v: &Value) -> Option<ToolCall> {
    let call_id = v.get("id")?.as_str()?.to_string();
    let func = v.get("function")?;
    let tool_name = func.get("name")?.as_str()?.to_string();
    let raw_args = func.get("arguments")?.as_str().unwrap_or("{}");
    // Some non-strict servers emit an empty string instead of "{}".
    let arguments = if raw_args.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(raw_args).unwrap_or_else(|_| json!({"_raw": raw_args}))
    };
    Some(ToolCall {
        call_id,
        tool_name,
        arguments,
    })
}

fn parse_wire_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

fn parse_stream_chunk(v: &Value) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();
    let Some(choice) = v.get("choices").and_then(|c| c.get(0)) else {
        return events;
    };
    let delta = choice.get("delta").cloned().unwrap_or(Value::Null);

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::Token { text: text.to_string() }));
        }
    }

    if let Some(tool_calls) = delta.get("tool_calls").and_then(|tc| tc.as_array()) {
        for tc in tool_calls {
            let call_id = tc.get("id").and_then(|i| i.as_str()).unwrap_or("").to_string();
            let func = tc.get("function").cloned().unwrap_or(Value::Null);
            let name = func.get("name").and_then(|n| n.as_str());
            if let Some(name) = name {
                events.push(Ok(StreamEvent::ToolCallStarted {
                    call_id: call_id.clone(),
                    tool_name: name.to_string(),
                }));
            }
            if let Some(delta_args) = func.get("arguments").and_then(|a| a.as_str()) {
                if !delta_args.is_empty() {
                    events.push(Ok(StreamEvent::ToolCallDelta {
                        call_id,
                        delta: delta_args.to_string(),
                    }));
                }
            }
        }
    }

    if let Some(reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        let usage = v.get("usage").and_then(parse_wire_usage);
        events.push(Ok(StreamEvent::Done {
            usage,
            finish_reason: Some(reason.to_string()),
        }));
    }

    events
}
