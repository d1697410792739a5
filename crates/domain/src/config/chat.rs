use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Send pipeline (C6) vocabulary and recovery windows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "d_confirm_words")]
    pub confirm_words: Vec<String>,
    #[serde(default = "d_cancel_words")]
    pub cancel_words: Vec<String>,
    /// Window after a run finishes during which an orphaned confirmation
    /// still gets an idempotent "already finished" reply instead of a bare
    /// "no pending plan".
    #[serde(default = "d_recency_window_sec")]
    pub recency_window_sec: i64,
    /// Enable the no-LLM direct-command fast path (§4.6 step 4).
    #[serde(default = "d_true")]
    pub direct_command_fast_path: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            confirm_words: d_confirm_words(),
            cancel_words: d_cancel_words(),
            recency_window_sec: d_recency_window_sec(),
            direct_command_fast_path: true,
        }
    }
}

fn d_confirm_words() -> Vec<String> {
    vec![
        "confirmo".into(),
        "sí".into(),
        "si".into(),
        "ok".into(),
        "dale".into(),
        "ejecuta".into(),
        "proceder".into(),
        "continuar".into(),
    ]
}
fn d_cancel_words() -> Vec<String> {
    vec![
        "cancela".into(),
        "cancelar".into(),
        "no".into(),
        "detener".into(),
        "para".into(),
    ]
}
fn d_recency_window_sec() -> i64 {
    120
}
fn d_true() -> bool {
    true
}
