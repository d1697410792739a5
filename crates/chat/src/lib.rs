//! Durable stores the orchestration core reads and writes: the per-chat
//! state machine, the plan run log, and the chat message history.

pub mod chat_state_repo;
pub mod message_log;
pub mod run_store;

pub use chat_state_repo::ChatStateRepo;
pub use message_log::{ChatMessage, MessageLog};
pub use run_store::{PlanRunStore, PlanRunUpdate};
