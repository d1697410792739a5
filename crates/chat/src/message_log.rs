//! Append-only per-chat message history.
//!
//! Nominally an external collaborator (storage/history lives outside the
//! core per the scope notes), but the core needs something concrete behind
//! the interface it calls to run end-to-end, so this is a minimal
//! JSONL-backed log in the same style as [`crate::run_store`].

use ap_domain::error::Result;
use ap_domain::tool::Role;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One entry in a chat's message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub ts_ms: i64,
    /// Structured UI envelope data for assistant-authored entries (run
    /// start/step/finish cards); `None` for plain user/system turns.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
struct LogRow {
    chat_id: String,
    message: ChatMessage,
}

pub struct MessageLog {
    by_chat: RwLock<HashMap<String, Vec<ChatMessage>>>,
    log_path: PathBuf,
}

impl MessageLog {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("messages");
        std::fs::create_dir_all(&dir)?;
        let log_path = dir.join("messages.jsonl");
        let mut by_chat: HashMap<String, Vec<ChatMessage>> = HashMap::new();
        if let Ok(content) = std::fs::read_to_string(&log_path) {
            for line in content.lines() {
                if let Ok(row) = serde_json::from_str::<LogRow>(line) {
                    by_chat.entry(row.chat_id).or_default().push(row.message);
                }
            }
        }
        Ok(Self {
            by_chat: RwLock::new(by_chat),
            log_path,
        })
    }

    pub fn append(
        &self,
        chat_id: &str,
        role: Role,
        content: impl Into<String>,
        metadata: Option<serde_json::Value>,
        now_ms: i64,
    ) -> Result<ChatMessage> {
        let message = ChatMessage {
            role,
            content: content.into(),
            ts_ms: now_ms,
            metadata,
        };
        {
            let mut by_chat = self.by_chat.write();
            by_chat.entry(chat_id.to_string()).or_default().push(message.clone());
        }
        let row = LogRow {
            chat_id: chat_id.to_string(),
            message: message.clone(),
        };
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&self.log_path)?;
        writeln!(file, "{}", serde_json::to_string(&row)?)?;
        Ok(message)
    }

    /// Full history for a chat, oldest first. Unknown chats return an
    /// empty vec (chats are implicitly created on first append).
    pub fn history(&self, chat_id: &str, limit: Option<usize>) -> Vec<ChatMessage> {
        let by_chat = self.by_chat.read();
        match by_chat.get(chat_id) {
            None => Vec::new(),
            Some(all) => match limit {
                Some(n) if all.len() > n => all[all.len() - n..].to_vec(),
                _ => all.clone(),
            },
        }
    }

    pub fn exists(&self, chat_id: &str) -> bool {
        self.by_chat.read().contains_key(chat_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ap-message-log-test-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn unknown_chat_has_no_history() {
        let dir = temp_dir();
        let log = MessageLog::open(&dir).unwrap();
        assert!(!log.exists("chat-1"));
        assert!(log.history("chat-1", None).is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn append_then_read_preserves_order() {
        let dir = temp_dir();
        let log = MessageLog::open(&dir).unwrap();
        log.append("chat-1", Role::User, "hola", None, 100).unwrap();
        log.append("chat-1", Role::Assistant, "Plan proposed", None, 101).unwrap();
        let history = log.history("chat-1", None);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hola");
        assert_eq!(history[1].content, "Plan proposed");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn limit_returns_most_recent_tail() {
        let dir = temp_dir();
        let log = MessageLog::open(&dir).unwrap();
        for i in 0..5 {
            log.append("chat-1", Role::User, format!("msg{i}"), None, 100 + i).unwrap();
        }
        let history = log.history("chat-1", Some(2));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "msg3");
        assert_eq!(history[1].content, "msg4");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reopen_replays_history() {
        let dir = temp_dir();
        {
            let log = MessageLog::open(&dir).unwrap();
            log.append("chat-1", Role::User, "hola", None, 100).unwrap();
        }
        let reopened = MessageLog::open(&dir).unwrap();
        assert!(reopened.exists("chat-1"));
        assert_eq!(reopened.history("chat-1", None)[0].content, "hola");
        std::fs::remove_dir_all(&dir).ok();
    }
}
