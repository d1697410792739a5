//! The Reasoner (C8): a single LLM call that proposes a corrected command
//! after a `/command` step has failed repeatedly.
//!
//! The reasoner only makes the call and parses whatever tool call comes
//! back; it applies no safety policy of its own. The background runner
//! (C5) is the one that discards a proposal — no tool call, wrong action,
//! an empty or unchanged command, or a command matching the dangerous-
//! command filter.

use ap_domain::tool::{Message, ToolDefinition};
use ap_llm::{ChatRequest, LlmProvider, ToolChoice};
use serde_json::json;
use std::sync::Arc;

pub const PROPOSE_FIX_TOOL: &str = "propose_fix";

#[derive(Debug, Clone)]
pub struct ReasonerContext<'a> {
    pub goal: &'a str,
    pub prior_cmd: &'a str,
    pub stdout: &'a str,
    pub stderr: &'a str,
    pub attempt: u32,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixAction {
    Retry,
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct ReasonerFix {
    pub action: FixAction,
    pub cmd: Option<String>,
    pub why: Option<String>,
}

pub struct Reasoner {
    provider: Arc<dyn LlmProvider>,
}

impl Reasoner {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    /// Ask the model for a corrected command. Returns `None` if the model
    /// didn't call `propose_fix`, the call failed, or the arguments don't
    /// parse — any of which the background runner treats as "give up".
    pub async fn propose_fix(&self, ctx: ReasonerContext<'_>) -> Option<ReasonerFix> {
        let prompt = format!(
            "Goal: {}\nPrevious command: {}\nAttempt {} of {}\nstdout:\n{}\nstderr:\n{}\n\n\
             The command above failed. Call propose_fix with a corrected command to retry, \
             or give up if no reasonable fix exists.",
            ctx.goal, ctx.prior_cmd, ctx.attempt, ctx.max_attempts, ctx.stdout, ctx.stderr,
        );

        let req = ChatRequest {
            messages: vec![
                Message::system("You repair failing shell commands for an automated executor."),
                Message::user(prompt),
            ],
            tools: vec![propose_fix_tool_def()],
            tool_choice: ToolChoice::Auto,
            temperature: Some(0.0),
            max_tokens: None,
            model: None,
        };

        let resp = match self.provider.chat(req).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "reasoner call failed");
                return None;
            }
        };

        let call = resp.tool_calls.iter().find(|c| c.tool_name == PROPOSE_FIX_TOOL)?;
        let action = match call.arguments.get("action").and_then(|v| v.as_str()) {
            Some("retry") => FixAction::Retry,
            Some("give_up") => FixAction::GiveUp,
            _ => return None,
        };
        let cmd = call.arguments.get("cmd").and_then(|v| v.as_str()).map(str::to_string);
        let why = call.arguments.get("why").and_then(|v| v.as_str()).map(str::to_string);
        Some(ReasonerFix { action, cmd, why })
    }
}

fn propose_fix_tool_def() -> ToolDefinition {
    ToolDefinition {
        name: PROPOSE_FIX_TOOL.into(),
        description: "Propose a fix for a failing shell command, or give up.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["retry", "give_up"]},
                "cmd": {"type": "string", "description": "corrected command to retry, required when action is retry"},
                "why": {"type": "string", "description": "brief explanation of what was wrong"},
            },
            "required": ["action"],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap_domain::error::Result;
    use ap_domain::stream::{BoxStream, StreamEvent};
    use ap_domain::tool::ToolCall;
    use ap_llm::ChatResponse;
    use async_trait::async_trait;

    struct FakeProvider {
        tool_calls: Vec<ToolCall>,
    }

    #[async_trait]
    impl LlmProvider for FakeProvider {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse {
                content: String::new(),
                tool_calls: self.tool_calls.clone(),
                usage: None,
                model: "fake".into(),
                finish_reason: Some("tool_calls".into()),
            })
        }
        async fn chat_stream(&self, _req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            unimplemented!("not exercised by reasoner tests")
        }
        fn provider_id(&self) -> &str {
            "fake"
        }
    }

    fn ctx() -> ReasonerContext<'static> {
        ReasonerContext {
            goal: "list files",
            prior_cmd: "sl",
            stdout: "",
            stderr: "command not found: sl",
            attempt: 1,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn parses_retry_proposal() {
        let provider = Arc::new(FakeProvider {
            tool_calls: vec![ToolCall {
                call_id: "c1".into(),
                tool_name: PROPOSE_FIX_TOOL.into(),
                arguments: json!({"action": "retry", "cmd": "ls", "why": "typo"}),
            }],
        });
        let reasoner = Reasoner::new(provider);
        let fix = reasoner.propose_fix(ctx()).await.unwrap();
        assert_eq!(fix.action, FixAction::Retry);
        assert_eq!(fix.cmd.as_deref(), Some("ls"));
    }

    #[tokio::test]
    async fn no_tool_call_returns_none() {
        let provider = Arc::new(FakeProvider { tool_calls: vec![] });
        let reasoner = Reasoner::new(provider);
        assert!(reasoner.propose_fix(ctx()).await.is_none());
    }

    #[tokio::test]
    async fn give_up_action_is_parsed() {
        let provider = Arc::new(FakeProvider {
            tool_calls: vec![ToolCall {
                call_id: "c1".into(),
                tool_name: PROPOSE_FIX_TOOL.into(),
                arguments: json!({"action": "give_up"}),
            }],
        });
        let reasoner = Reasoner::new(provider);
        let fix = reasoner.propose_fix(ctx()).await.unwrap();
        assert_eq!(fix.action, FixAction::GiveUp);
        assert!(fix.cmd.is_none());
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let provider = Arc::new(FakeProvider {
            tool_calls: vec![ToolCall {
                call_id: "c1".into(),
                tool_name: PROPOSE_FIX_TOOL.into(),
                arguments: json!({"action": "retry_forever"}),
            }],
        });
        let reasoner = Reasoner::new(provider);
        assert!(reasoner.propose_fix(ctx()).await.is_none());
    }
}
