//! Durable per-chat [`ChatState`].
//!
//! Same JSONL-append-plus-in-memory-index shape as [`crate::run_store`],
//! simplified: chat state has no CAS requirement of its own (the run
//! store's `try_mark_queued` is the only compare-and-set this system
//! needs) and no bounded ring, since the number of distinct chats a
//! deployment tracks is small relative to the number of runs.

use ap_domain::chat_state::{ChatState, ChatStateUpdate};
use ap_domain::error::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(serde::Serialize, serde::Deserialize)]
struct ChatStateRow {
    chat_id: String,
    #[serde(flatten)]
    state: ChatState,
}

pub struct ChatStateRepo {
    states: RwLock<HashMap<String, ChatState>>,
    log_path: PathBuf,
}

impl ChatStateRepo {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("chats");
        std::fs::create_dir_all(&dir)?;
        let log_path = dir.join("chat_state.jsonl");
        let mut states = HashMap::new();
        if let Ok(content) = std::fs::read_to_string(&log_path) {
            for line in content.lines() {
                if let Ok(row) = serde_json::from_str::<ChatStateRow>(line) {
                    states.insert(row.chat_id, row.state);
                }
            }
        }
        Ok(Self {
            states: RwLock::new(states),
            log_path,
        })
    }

    /// Returns the chat's current state. Unknown chats get a fresh default
    /// state (chats are implicitly created, never explicitly registered).
    pub fn get(&self, chat_id: &str) -> ChatState {
        self.states.read().get(chat_id).cloned().unwrap_or_default()
    }

    pub fn apply(&self, chat_id: &str, update: ChatStateUpdate) -> Result<ChatState> {
        let new_state = {
            let mut states = self.states.write();
            let entry = states.entry(chat_id.to_string()).or_default();
            entry.apply(update);
            entry.clone()
        };
        self.append(chat_id, &new_state)?;
        Ok(new_state)
    }

    fn append(&self, chat_id: &str, state: &ChatState) -> Result<()> {
        let row = ChatStateRow {
            chat_id: chat_id.to_string(),
            state: state.clone(),
        };
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&self.log_path)?;
        writeln!(file, "{}", serde_json::to_string(&row)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap_domain::chat_state::ClearableField;

    fn temp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ap-chat-state-test-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn unknown_chat_returns_default_state() {
        let dir = temp_dir();
        let repo = ChatStateRepo::open(&dir).unwrap();
        let state = repo.get("chat-1");
        assert!(state.pending_run_id.is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn apply_persists_across_reopen() {
        let dir = temp_dir();
        {
            let repo = ChatStateRepo::open(&dir).unwrap();
            repo.apply(
                "chat-1",
                ChatStateUpdate {
                    pending_run_id: Some(ClearableField::Set("run-1".into())),
                    ..Default::default()
                },
            )
            .unwrap();
        }
        let reopened = ChatStateRepo::open(&dir).unwrap();
        let state = reopened.get("chat-1");
        assert_eq!(state.pending_run_id.as_deref(), Some("run-1"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reopen_keeps_only_latest_row_per_chat() {
        let dir = temp_dir();
        {
            let repo = ChatStateRepo::open(&dir).unwrap();
            repo.apply(
                "chat-1",
                ChatStateUpdate {
                    pending_run_id: Some(ClearableField::Set("run-1".into())),
                    ..Default::default()
                },
            )
            .unwrap();
            repo.apply(
                "chat-1",
                ChatStateUpdate {
                    pending_run_id: Some(ClearableField::Clear),
                    active_run_id: Some(ClearableField::Set("run-1".into())),
                    ..Default::default()
                },
            )
            .unwrap();
        }
        let reopened = ChatStateRepo::open(&dir).unwrap();
        let state = reopened.get("chat-1");
        assert!(state.pending_run_id.is_none());
        assert_eq!(state.active_run_id.as_deref(), Some("run-1"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
