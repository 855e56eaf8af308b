use std::path::PathBuf;

use serde::Deserialize;
use validator::Validate;

/// Main configuration for Morsel
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct Config {
    /// HTTP server port
    #[validate(range(min = 1024, max = 65535))]
    pub server_port: u16,

    /// Vector index base URL
    #[validate(length(min = 1))]
    pub vector_url: String,

    /// Vector index bearer token (may be empty for a local index)
    pub vector_api_key: String,

    /// Completion provider base URL (OpenAI-compatible)
    #[validate(length(min = 1))]
    pub completion_url: String,

    /// Completion provider API key
    pub completion_api_key: String,

    /// Default model id when a request does not name one
    pub default_model: String,

    /// Override for the conversation-log directory; defaults to ~/.morsel
    pub data_dir: Option<String>,

    /// Log level (e.g., info, debug, trace)
    pub log_level: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            // Core defaults
            .set_default("server_port", 8080)?
            .set_default("log_level", "info")?
            .set_default("vector_url", "http://localhost:8000")?
            .set_default("vector_api_key", "")?
            .set_default("completion_url", "https://api.groq.com/openai/v1")?
            .set_default("completion_api_key", "")?
            .set_default("default_model", "llama-3.1-8b-instant")?
            // Load from ~/.morsel/config.toml (if present)
            .add_source(
                config::File::with_name(&format!(
                    "{}/.morsel/config",
                    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
                ))
                .required(false),
            )
            // Environment overrides: MORSEL__SERVER_PORT, MORSEL__VECTOR_URL, etc.
            .add_source(config::Environment::with_prefix("MORSEL").separator("__"))
            .build()?;

        let cfg: Config = settings.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Directory holding the persisted conversation log.
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".morsel"),
        }
    }
}
