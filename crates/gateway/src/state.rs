use std::sync::Arc;

use ap_chat::{ChatStateRepo, MessageLog, PlanRunStore};
use ap_domain::config::Config;
use ap_llm::ProviderRegistry;
use ap_tools::invoker::ToolInvoker;
use ap_domain::registry::ToolRegistry;

use crate::runtime::cancel::CancelMap;
use crate::runtime::reasoner::Reasoner;
use crate::runtime::session_lock::SessionLockMap;

/// Shared application state passed to every HTTP handler and to the
/// Send Pipeline / Background Runner directly.
pub struct AppState {
    pub config: Config,
    pub llm: Arc<ProviderRegistry>,

    pub chat_state: Arc<ChatStateRepo>,
    pub run_store: Arc<PlanRunStore>,
    pub messages: Arc<MessageLog>,
    pub tool_registry: Arc<ToolRegistry>,
    pub tool_invoker: Arc<ToolInvoker>,
    pub reasoner: Option<Arc<Reasoner>>,

    pub cancel_map: Arc<CancelMap>,
    /// Per-chat lock guarding the ordering-sensitive prefix of the send
    /// pipeline (chat-state reads through the CAS handoff).
    pub send_locks: Arc<SessionLockMap>,

    /// SHA-256 digest of the configured bearer token, cached once at
    /// startup. `None` means auth is disabled (dev mode).
    pub api_token_hash: Option<Vec<u8>>,
}
