//! Integration tests for `Config::validate` across the full layered
//! config, not just one section's defaults.

use ap_domain::config::{Config, ConfigSeverity};

#[test]
fn default_config_validates_clean() {
    let config = Config::default();
    let issues = config.validate();
    assert!(
        issues.iter().all(|i| i.severity == ConfigSeverity::Warning),
        "default config should raise no hard errors: {issues:?}"
    );
}

#[test]
fn api_key_provider_without_env_or_key_is_an_error() {
    let toml_str = r#"
[[llm.providers]]
id = "openai"
base_url = "https://api.openai.com/v1"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(
        issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field.contains("auth")),
        "expected a missing-auth error, got: {issues:?}"
    );
}

#[test]
fn duplicate_llm_provider_ids_are_a_warning_not_an_error() {
    let toml_str = r#"
[[llm.providers]]
id = "openai"
base_url = "https://api.openai.com/v1"
auth = { mode = "api_key", env = "OPENAI_API_KEY" }

[[llm.providers]]
id = "openai"
base_url = "https://api.openai.com/v2"
auth = { mode = "api_key", env = "OPENAI_API_KEY" }
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(
        issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Warning && i.message.contains("duplicate")),
        "expected a duplicate-id warning, got: {issues:?}"
    );
    assert!(!issues.iter().any(|i| i.severity == ConfigSeverity::Error));
}

#[test]
fn wildcard_cors_origin_is_a_warning_not_an_error() {
    let toml_str = r#"
[server.cors]
allowed_origins = ["*"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Warning && i.field.contains("cors")));
    assert!(!issues.iter().any(|i| i.severity == ConfigSeverity::Error));
}

#[test]
fn malformed_confirm_word_casing_is_flagged() {
    let toml_str = r#"
[chat]
confirm_words = ["OK", "confirmo"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(
        issues.iter().any(|i| i.field.contains("confirm_words")),
        "expected uppercase confirm word to be flagged, got: {issues:?}"
    );
}

#[test]
fn zero_retry_attempts_is_an_error() {
    let toml_str = r#"
[tools.retry]
max_attempts_per_command_step = 0
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues.iter().any(|i| {
        i.severity == ConfigSeverity::Error && i.field == "tools.retry.max_attempts_per_command_step"
    }));
}
