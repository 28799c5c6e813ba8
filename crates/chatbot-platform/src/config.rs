use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// Model used whenever a caller leaves the model name empty.
pub const DEFAULT_MODEL: &str = "meta-llama/llama-3.3-70b-instruct:free";
pub const DEFAULT_OPENROUTER_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_DATABASE_PATH: &str = "data/chatbot.db";

/// Caller-supplied chat messages longer than this are rejected.
pub const MAX_MESSAGE_LENGTH: usize = 10_000;
pub const MAX_TITLE_LENGTH: usize = 100;

/// `DATABASE_PATH` value that selects an in-memory SQLite database.
pub const IN_MEMORY_DATABASE: &str = ":memory:";

#[derive(Debug, Clone)]
pub struct Config {
    pub openrouter_url: String,
    pub openrouter_api_key: Option<String>,
    pub default_chat_model: String,
    pub default_summary_model: String,
    pub summary_threshold: usize,
    pub memory_reload_window: usize,
    pub summarize_timeout_seconds: u64,
    pub persistence_workers: usize,
    pub database_path: String,
    pub llm_timeout_seconds: u64,
    pub api_host: String,
    pub api_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key/value source. Unset or blank
    /// keys take their defaults; malformed numbers are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let openrouter_api_key = lookup("OPENROUTER_API_KEY")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        if openrouter_api_key.is_none() {
            warn!("OPENROUTER_API_KEY is not set; requests will be sent without authorization");
        }

        let default_chat_model = get("DEFAULT_CHAT_MODEL", DEFAULT_MODEL);
        let default_summary_model = get("DEFAULT_SUMMARY_MODEL", &default_chat_model);

        Ok(Self {
            openrouter_url: get("OPENROUTER_URL", DEFAULT_OPENROUTER_URL)
                .trim_end_matches('/')
                .to_string(),
            openrouter_api_key,
            default_chat_model,
            default_summary_model,
            summary_threshold: parse_var(&get("SUMMARY_THRESHOLD", "6"), "SUMMARY_THRESHOLD")?,
            memory_reload_window: parse_var(&get("MEMORY_RELOAD_WINDOW", "10"), "MEMORY_RELOAD_WINDOW")?,
            summarize_timeout_seconds: parse_var(
                &get("SUMMARIZE_TIMEOUT_SECONDS", "60"),
                "SUMMARIZE_TIMEOUT_SECONDS",
            )?,
            persistence_workers: parse_var(&get("PERSISTENCE_WORKERS", "2"), "PERSISTENCE_WORKERS")?,
            database_path: get("DATABASE_PATH", DEFAULT_DATABASE_PATH),
            llm_timeout_seconds: parse_var(&get("LLM_TIMEOUT_SECONDS", "120"), "LLM_TIMEOUT_SECONDS")?,
            api_host: get("API_HOST", "127.0.0.1"),
            api_port: parse_var(&get("API_PORT", "8000"), "API_PORT")?,
        })
    }

    /// `None` when the database should live in memory.
    pub fn database_file(&self) -> Option<PathBuf> {
        if self.database_path == IN_MEMORY_DATABASE {
            None
        } else {
            Some(PathBuf::from(&self.database_path))
        }
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- OpenRouter URL: {}", self.openrouter_url);
        info!(
            "- OpenRouter API Key: {}",
            if self.openrouter_api_key.is_some() { "<set>" } else { "<unset>" }
        );
        info!("- Chat Model: {}", self.default_chat_model);
        info!("- Summary Model: {}", self.default_summary_model);
        info!("- Summary Threshold: {}", self.summary_threshold);
        info!("- Reload Window: {}", self.memory_reload_window);
        info!("- Summarize Timeout: {}s", self.summarize_timeout_seconds);
        info!("- Persistence Workers: {}", self.persistence_workers);
        info!("- Database: {}", self.database_path);
        info!("- LLM Timeout: {}s", self.llm_timeout_seconds);
        info!("- API: {}:{}", self.api_host, self.api_port);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))
    }
}

fn parse_var<T>(value: &str, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("{} has an invalid value: {}", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    /// Helper function to create a test Config with default values
    fn create_test_config() -> Config {
        config_from(&[]).unwrap()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = create_test_config();

        assert_eq!(config.openrouter_url, DEFAULT_OPENROUTER_URL);
        assert!(config.openrouter_api_key.is_none());
        assert_eq!(config.default_chat_model, DEFAULT_MODEL);
        assert_eq!(config.default_summary_model, DEFAULT_MODEL);
        assert_eq!(config.summary_threshold, 6);
        assert_eq!(config.memory_reload_window, 10);
        assert_eq!(config.summarize_timeout_seconds, 60);
        assert_eq!(config.persistence_workers, 2);
        assert_eq!(config.database_path, DEFAULT_DATABASE_PATH);
        assert_eq!(config.api_port, 8000);
    }

    #[test]
    fn test_summary_model_follows_chat_model() {
        let config = config_from(&[("DEFAULT_CHAT_MODEL", "openai/gpt-4o-mini")]).unwrap();
        assert_eq!(config.default_summary_model, "openai/gpt-4o-mini");

        let config = config_from(&[
            ("DEFAULT_CHAT_MODEL", "openai/gpt-4o-mini"),
            ("DEFAULT_SUMMARY_MODEL", "cheap/model"),
        ])
        .unwrap();
        assert_eq!(config.default_summary_model, "cheap/model");
    }

    #[test]
    fn test_blank_values_fall_back_and_url_is_trimmed() {
        let config = config_from(&[
            ("OPENROUTER_API_KEY", "   "),
            ("DEFAULT_CHAT_MODEL", ""),
            ("OPENROUTER_URL", "http://localhost:9999/v1/"),
        ])
        .unwrap();
        assert!(config.openrouter_api_key.is_none());
        assert_eq!(config.default_chat_model, DEFAULT_MODEL);
        assert_eq!(config.openrouter_url, "http://localhost:9999/v1");
    }

    #[test]
    fn test_malformed_numbers_are_rejected() {
        let err = config_from(&[("SUMMARY_THRESHOLD", "six")]).unwrap_err();
        assert!(err.to_string().contains("SUMMARY_THRESHOLD"));
        assert!(config_from(&[("API_PORT", "70000")]).is_err());
    }

    #[test]
    fn test_in_memory_database_selector() {
        let config = config_from(&[("DATABASE_PATH", IN_MEMORY_DATABASE)]).unwrap();
        assert!(config.database_file().is_none());
        assert_eq!(
            create_test_config().database_file(),
            Some(PathBuf::from(DEFAULT_DATABASE_PATH))
        );
    }

    #[test]
    fn test_api_addr_parsing() {
        let mut config = create_test_config();
        config.api_host = "0.0.0.0".to_string();
        config.api_port = 5000;

        let addr = config.api_addr().unwrap();
        assert_eq!(addr.ip().to_string(), "0.0.0.0");
        assert_eq!(addr.port(), 5000);

        config.api_host = "not a host".to_string();
        assert!(config.api_addr().is_err());
    }
}
