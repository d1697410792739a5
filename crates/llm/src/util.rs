//! Shared utility functions for provider adapters.

use ap_domain::config::{AuthConfig, AuthMode};
use ap_domain::error::{Error, Result};

/// Translate a `reqwest::Error` into our domain error type, distinguishing
/// timeouts so callers can tell transport failure apart from slow servers.
pub fn from_reqwest(provider: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("{provider}: {e}"))
    } else {
        Error::Http(format!("{provider}: {e}"))
    }
}

/// Resolve the API key for a provider: `auth.key` (direct, config-only) takes
/// precedence, then `auth.env` (environment variable lookup). Returns
/// `Ok(None)` when `auth.mode == AuthMode::None`.
pub fn resolve_api_key(provider_id: &str, auth: &AuthConfig) -> Result<Option<String>> {
    if auth.mode == AuthMode::None {
        return Ok(None);
    }
    if let Some(key) = &auth.key {
        if !key.is_empty() {
            return Ok(Some(key.clone()));
        }
    }
    if let Some(env_name) = &auth.env {
        if let Ok(v) = std::env::var(env_name) {
            if !v.is_empty() {
                return Ok(Some(v));
            }
        }
    }
    Err(Error::Auth(format!(
        "provider \"{provider_id}\" has no usable credentials (checked auth.key, auth.env)"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_mode_returns_no_key() {
        let auth = AuthConfig {
            mode: AuthMode::None,
            env: None,
            key: None,
        };
        assert_eq!(resolve_api_key("x", &auth).unwrap(), None);
    }

    #[test]
    fn direct_key_takes_precedence() {
        let auth = AuthConfig {
            mode: AuthMode::ApiKey,
            env: Some("AUTOPLAN_TEST_UNSET_VAR_XYZ".into()),
            key: Some("sk-direct".into()),
        };
        assert_eq!(resolve_api_key("x", &auth).unwrap(), Some("sk-direct".into()));
    }

    #[test]
    fn missing_credentials_errors() {
        let auth = AuthConfig {
            mode: AuthMode::ApiKey,
            env: Some("AUTOPLAN_TEST_UNSET_VAR_XYZ".into()),
            key: None,
        };
        assert!(resolve_api_key("x", &auth).is_err());
    }
}
