//! Environment-driven configuration
//!
//! Binaries call `dotenv::dotenv().ok()` first, so a local `.env` file
//! works as well as real environment variables.

use crate::error::AgentError;
use crate::Result;
use std::env;
use std::str::FromStr;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_ALPHA_VANTAGE_URL: &str = "https://www.alphavantage.co/query";
pub const DEFAULT_THREAD_ID: &str = "buy_thread";
pub const DEFAULT_MAX_MODEL_TURNS: u32 = 25;
pub const DEFAULT_API_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub alpha_vantage_api_key: Option<String>,
    pub alpha_vantage_base_url: String,
    pub database_url: Option<String>,
    pub api_port: u16,
    pub thread_id: String,
    pub max_model_turns: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            alpha_vantage_api_key: None,
            alpha_vantage_base_url: DEFAULT_ALPHA_VANTAGE_URL.to_string(),
            database_url: None,
            api_port: DEFAULT_API_PORT,
            thread_id: DEFAULT_THREAD_ID.to_string(),
            max_model_turns: DEFAULT_MAX_MODEL_TURNS,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            alpha_vantage_api_key: get("ALPHA_VANTAGE_API_KEY"),
            alpha_vantage_base_url: get("ALPHA_VANTAGE_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.alpha_vantage_base_url),
            database_url: get("POSTGRES_URL").or_else(|| get("DATABASE_URL")),
            api_port: parse_or("PORT", get("PORT").or_else(|| get("API_PORT")), defaults.api_port)?,
            thread_id: get("THREAD_ID").unwrap_or(defaults.thread_id),
            max_model_turns: parse_or("MAX_MODEL_TURNS", get("MAX_MODEL_TURNS"), defaults.max_model_turns)?,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        Some(value) => value.trim().parse().map_err(|_| {
            AgentError::ConfigError(format!("{} has an invalid value: {}", key, value))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AgentConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert!(config.gemini_api_key.is_none());
        assert_eq!(config.gemini_model, DEFAULT_GEMINI_MODEL);
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.thread_id, "buy_thread");
        assert_eq!(config.max_model_turns, 25);
    }

    #[test]
    fn test_overrides_and_fallbacks() {
        let config = config_from(&[
            ("GEMINI_API_KEY", "key"),
            ("API_PORT", "9000"),
            ("DATABASE_URL", "postgres://localhost/agent"),
            ("ALPHA_VANTAGE_BASE_URL", "http://localhost:9999/query/"),
            ("ALPHA_VANTAGE_API_KEY", "  "),
        ])
        .unwrap();

        assert_eq!(config.gemini_api_key.as_deref(), Some("key"));
        assert_eq!(config.api_port, 9000);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/agent"));
        assert_eq!(config.alpha_vantage_base_url, "http://localhost:9999/query");
        assert!(config.alpha_vantage_api_key.is_none());
    }

    #[test]
    fn test_invalid_number() {
        let err = config_from(&[("MAX_MODEL_TURNS", "many")]).unwrap_err();
        assert!(matches!(err, AgentError::ConfigError(_)));
    }
}
