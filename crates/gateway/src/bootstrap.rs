//! AppState construction, extracted from `main.rs` so the `serve` command
//! and tests can boot the full runtime without an HTTP listener.

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};

use ap_chat::{ChatStateRepo, MessageLog, PlanRunStore};
use ap_domain::config::{Config, ConfigSeverity};
use ap_domain::registry::ToolRegistry;
use ap_llm::ProviderRegistry;
use ap_tools::invoker::ToolInvoker;

use crate::runtime::cancel::CancelMap;
use crate::runtime::reasoner::Reasoner;
use crate::runtime::session_lock::SessionLockMap;
use crate::state::AppState;

/// Validate config and initialize every subsystem, returning a fully-wired
/// [`AppState`]. Shared by the `serve` command and integration tests.
pub async fn build_app_state(config: Config) -> anyhow::Result<AppState> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let data_dir = std::path::Path::new(&config.persistence.data_dir);
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;

    let chat_state =
        Arc::new(ChatStateRepo::open(data_dir).context("opening chat state store")?);
    let run_store = Arc::new(PlanRunStore::open(data_dir).context("opening plan run store")?);
    let messages = Arc::new(MessageLog::open(data_dir).context("opening message log")?);
    tracing::info!(path = %data_dir.display(), "persistence stores ready");

    let mut registry = ToolRegistry::new();
    for server in &config.tools.catalog {
        registry.insert(server.clone());
    }
    let tool_registry = Arc::new(registry);
    tracing::info!(servers = config.tools.catalog.len(), "tool registry ready");

    let tool_invoker = Arc::new(ToolInvoker::new(&config.tools.invoker));

    let llm = Arc::new(
        ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?,
    );
    if llm.is_empty() {
        tracing::warn!("no LLM providers initialized — normal turns and reasoner repair will be unavailable");
    } else {
        let providers: Vec<&str> = llm.provider_ids().collect();
        tracing::info!(providers = ?providers, "LLM provider registry ready");
    }

    let reasoner = llm.default_provider().map(|p| Arc::new(Reasoner::new(p)));

    let api_token_hash = match std::env::var(&config.admin.token_env) {
        Ok(token) if !token.is_empty() => {
            tracing::info!(env_var = %config.admin.token_env, "API bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(
                env_var = %config.admin.token_env,
                "API bearer-token auth DISABLED — set {} to enable", config.admin.token_env
            );
            None
        }
    };

    Ok(AppState {
        config,
        llm,
        chat_state,
        run_store,
        messages,
        tool_registry,
        tool_invoker,
        reasoner,
        cancel_map: Arc::new(CancelMap::new()),
        send_locks: Arc::new(SessionLockMap::new()),
        api_token_hash,
    })
}
