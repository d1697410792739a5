//! Builds the set of live [`LlmProvider`]s from config at startup.

use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;
use ap_domain::config::{LlmConfig, LlmStartupPolicy};
use ap_domain::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Live provider instances keyed by `provider_id`, plus which one answers
/// requests that don't name a provider explicitly.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default_id: Option<String>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self { providers: HashMap::new(), default_id: None }
    }
}

impl ProviderRegistry {
    /// Initialize every configured provider. A provider whose credentials
    /// can't be resolved is skipped with a warning rather than aborting
    /// the others, unless `startup_policy` is `RequireOne` and none
    /// initialize successfully.
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let timeout = Duration::from_millis(cfg.default_timeout_ms);
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut default_id = None;

        for provider_cfg in &cfg.providers {
            match OpenAiCompatProvider::new(provider_cfg, timeout) {
                Ok(p) => {
                    let id = provider_cfg.id.clone();
                    if default_id.is_none() {
                        default_id = Some(id.clone());
                    }
                    providers.insert(id, Arc::new(p));
                }
                Err(e) => {
                    tracing::warn!(provider = %provider_cfg.id, error = %e, "llm provider failed to initialize");
                }
            }
        }

        if providers.is_empty() && cfg.startup_policy == LlmStartupPolicy::RequireOne {
            return Err(Error::Config(
                "no llm providers initialized and llm.startup_policy is require_one".into(),
            ));
        }

        Ok(Self { providers, default_id })
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// The provider used when a caller doesn't specify one: the first
    /// configured provider that initialized successfully.
    pub fn default_provider(&self) -> Option<Arc<dyn LlmProvider>> {
        self.default_id.as_ref().and_then(|id| self.get(id))
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap_domain::config::{AuthConfig, AuthMode, ProviderConfig};

    fn cfg_with(providers: Vec<ProviderConfig>, policy: LlmStartupPolicy) -> LlmConfig {
        LlmConfig {
            startup_policy: policy,
            providers,
            ..Default::default()
        }
    }

    #[test]
    fn empty_config_allow_none_is_fine() {
        let cfg = cfg_with(vec![], LlmStartupPolicy::AllowNone);
        let reg = ProviderRegistry::from_config(&cfg).unwrap();
        assert!(reg.is_empty());
        assert!(reg.default_provider().is_none());
    }

    #[test]
    fn empty_config_require_one_errors() {
        let cfg = cfg_with(vec![], LlmStartupPolicy::RequireOne);
        assert!(ProviderRegistry::from_config(&cfg).is_err());
    }

    #[test]
    fn provider_missing_credentials_is_skipped_not_fatal() {
        let cfg = cfg_with(
            vec![ProviderConfig {
                id: "broken".into(),
                base_url: "http://localhost:9999".into(),
                auth: AuthConfig {
                    mode: AuthMode::ApiKey,
                    env: Some("AUTOPLAN_TEST_UNSET_VAR_XYZ".into()),
                    key: None,
                },
                default_model: None,
            }],
            LlmStartupPolicy::AllowNone,
        );
        let reg = ProviderRegistry::from_config(&cfg).unwrap();
        assert!(reg.is_empty());
    }

    #[test]
    fn first_successful_provider_becomes_default() {
        let cfg = cfg_with(
            vec![ProviderConfig {
                id: "local".into(),
                base_url: "http://localhost:11434/v1".into(),
                auth: AuthConfig {
                    mode: AuthMode::None,
                    env: None,
                    key: None,
                },
                default_model: Some("llama3".into()),
            }],
            LlmStartupPolicy::RequireOne,
        );
        let reg = ProviderRegistry::from_config(&cfg).unwrap();
        assert_eq!(reg.default_provider().unwrap().provider_id(), "local");
        assert!(reg.get("local").is_some());
        assert!(reg.get("missing").is_none());
    }
}
