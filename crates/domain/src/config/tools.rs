use crate::registry::ToolServer;
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool invocation (C1) and background execution (C5) knobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub invoker: InvokerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub security: ToolSecurityConfig,
    /// Tool-server catalog the registry (C10) is seeded from at startup.
    /// OpenAPI introspection and registry CRUD are out of scope, so this
    /// config list is the only way tool servers enter the system.
    #[serde(default)]
    pub catalog: Vec<ToolServer>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            invoker: InvokerConfig::default(),
            retry: RetryConfig::default(),
            security: ToolSecurityConfig::default(),
            catalog: Vec::new(),
        }
    }
}

/// Configuration for the HTTP tool invoker (C1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokerConfig {
    /// Per-call timeout, in seconds.
    #[serde(default = "d_invoke_timeout_sec")]
    pub timeout_sec: u64,
    #[serde(default = "d_true")]
    pub follow_redirects: bool,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            timeout_sec: d_invoke_timeout_sec(),
            follow_redirects: true,
        }
    }
}

/// Command-retry and reasoner-repair knobs for the background runner (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Number of attempts (including the first) before the reasoner is
    /// consulted on a failing `/command` step.
    #[serde(default = "d_max_attempts")]
    pub max_attempts_per_command_step: u32,
    /// Whole-plan execution timeout, in seconds.
    #[serde(default = "d_plan_timeout_sec")]
    pub plan_timeout_sec: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_command_step: d_max_attempts(),
            plan_timeout_sec: d_plan_timeout_sec(),
        }
    }
}

/// Dangerous-command filter. Substrings are matched case-insensitively
/// against the lowercased candidate command; any match vetoes the
/// proposal unconditionally, before it is ever dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSecurityConfig {
    #[serde(default = "d_denied_command_substrings")]
    pub denied_command_substrings: Vec<String>,
}

impl Default for ToolSecurityConfig {
    fn default() -> Self {
        Self {
            denied_command_substrings: d_denied_command_substrings(),
        }
    }
}

fn d_invoke_timeout_sec() -> u64 {
    15
}
fn d_true() -> bool {
    true
}
fn d_max_attempts() -> u32 {
    3
}
fn d_plan_timeout_sec() -> u64 {
    10 * 60
}
fn d_denied_command_substrings() -> Vec<String> {
    vec![
        "rm -rf /".into(),
        "mkfs".into(),
        "dd if=".into(),
        "shutdown".into(),
        "reboot".into(),
        "poweroff".into(),
        "format c:".into(),
        "diskpart".into(),
        "bcdedit".into(),
        "reg delete".into(),
        "del /s /q c:\\".into(),
        "rd /s /q c:\\".into(),
        ":(){ :|:& };:".into(),
    ]
}
