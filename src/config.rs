//! Service configuration
//!
//! All tuning comes from the environment. Every struct carries defaults so a
//! bare process starts in development mode (no auth, LLM disabled, local
//! catalog file).

use std::env;

use crate::llm::guardrails::{GuardrailConfig, Severity};

/// Main configuration structure
#[derive(Debug, Clone)]
pub struct Config {
    /// Catalog location (a SQLite path)
    pub database_url: String,

    pub server: ServerConfig,

    pub llm: LlmConfig,

    /// Webhook URL the notifier posts alert records to, if configured
    pub notify_webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,

    /// Bearer token required on every route except the health check.
    /// Unset means development mode: all requests pass.
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub enabled: bool,
    pub api_url: String,
    pub api_key: String,
    pub model: String,

    pub circuit_breaker_enabled: bool,
    pub circuit_max_failures: u32,
    pub circuit_timeout_secs: u64,

    pub retry_max_attempts: u32,
    pub retry_initial_interval_ms: u64,
    pub retry_max_interval_ms: u64,

    pub guardrails: GuardrailConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            notify_webhook_url: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: default_llm_api_url(),
            api_key: String::new(),
            model: default_llm_model(),
            circuit_breaker_enabled: true,
            circuit_max_failures: 5,
            circuit_timeout_secs: 30,
            retry_max_attempts: 3,
            retry_initial_interval_ms: 500,
            retry_max_interval_ms: 5000,
            guardrails: GuardrailConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        let guardrails = GuardrailConfig {
            min_fp_confidence: env_parse("LLM_GUARDRAIL_MIN_FP_CONFIDENCE", 85),
            require_intel_for_critical: env_bool("LLM_GUARDRAIL_REQUIRE_INTEL_FOR_CRITICAL", true),
            max_severity_without_intel: Severity::parse(&env_or(
                "LLM_GUARDRAIL_MAX_SEVERITY_WITHOUT_INTEL",
                "medium",
            )),
        };

        let llm = LlmConfig {
            enabled: env_bool("LLM_TRIAGE_ENABLED", false),
            api_url: env_or("LLM_API_URL", &default_llm_api_url()),
            api_key: env_or("LLM_API_KEY", ""),
            model: env_or("LLM_MODEL", &default_llm_model()),
            circuit_breaker_enabled: env_bool("LLM_CIRCUIT_BREAKER_ENABLED", true),
            circuit_max_failures: env_parse("LLM_CIRCUIT_BREAKER_MAX_FAILURES", 5),
            circuit_timeout_secs: env_parse("LLM_CIRCUIT_BREAKER_TIMEOUT_SECONDS", 30),
            retry_max_attempts: env_parse("LLM_RETRY_MAX_ATTEMPTS", 3),
            retry_initial_interval_ms: env_parse("LLM_RETRY_INITIAL_INTERVAL_MS", 500),
            retry_max_interval_ms: env_parse("LLM_RETRY_MAX_INTERVAL_MS", 5000),
            guardrails,
        };

        Self {
            database_url: env_or("DATABASE_URL", &default_database_url()),
            server: ServerConfig {
                port: env_parse("REST_API_PORT", 8080),
                auth_token: env::var("REST_API_AUTH_TOKEN").ok().filter(|t| !t.is_empty()),
            },
            llm,
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").ok().filter(|u| !u.is_empty()),
        }
    }
}

fn default_database_url() -> String {
    "iocwatch.db".to_string()
}

fn default_llm_api_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert!(config.server.auth_token.is_none());
        assert!(!config.llm.enabled);
        assert!(config.llm.circuit_breaker_enabled);
        assert_eq!(config.llm.circuit_max_failures, 5);
        assert_eq!(config.llm.retry_max_attempts, 3);
        assert_eq!(config.llm.guardrails.min_fp_confidence, 85);
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_env_overrides() {
        // Single test body: env mutation would race across parallel tests
        std::env::set_var("LLM_RETRY_MAX_ATTEMPTS", "7");
        std::env::set_var("LLM_TRIAGE_ENABLED", "true");
        std::env::set_var("LLM_GUARDRAIL_MAX_SEVERITY_WITHOUT_INTEL", "low");
        std::env::set_var("REST_API_AUTH_TOKEN", "secret");

        let config = Config::from_env();
        assert_eq!(config.llm.retry_max_attempts, 7);
        assert!(config.llm.enabled);
        assert_eq!(config.llm.guardrails.max_severity_without_intel, Severity::Low);
        assert_eq!(config.server.auth_token.as_deref(), Some("secret"));

        std::env::remove_var("LLM_RETRY_MAX_ATTEMPTS");
        std::env::remove_var("LLM_TRIAGE_ENABLED");
        std::env::remove_var("LLM_GUARDRAIL_MAX_SEVERITY_WITHOUT_INTEL");
        std::env::remove_var("REST_API_AUTH_TOKEN");
    }

    #[test]
    fn test_env_bool_parsing() {
        assert!(env_bool("IOCWATCH_TEST_UNSET_BOOL", true));
        assert!(!env_bool("IOCWATCH_TEST_UNSET_BOOL", false));
    }
}
