//! Application configuration

pub mod file;
pub mod prompts;

use std::env;
use std::path::{Path, PathBuf};

pub use file::FileConfig;
pub use prompts::resolve_system_prompt;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// SQLx connection URL for conversation storage
    pub database_url: String,
    pub llm: LlmConfig,
    /// Persona template overriding the built-in system prompt
    pub persona_file: Option<PathBuf>,
}

/// Resolved LLM provider settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Upper bound on reply length, in tokens
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".into(),
            model: "gemini-pro-latest".into(),
            endpoint: None,
            api_key: None,
            max_output_tokens: 2000,
            timeout_secs: 120,
        }
    }
}

impl Config {
    /// Build the configuration from the process environment, layered over the
    /// TOML file named by `AGROBOT_CONFIG` when set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = match env::var("AGROBOT_CONFIG") {
            Ok(path) => FileConfig::from_file(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };

        Self::resolve(file, |key| env::var(key).ok())
    }

    fn resolve(
        file: FileConfig,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let port = match var("PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Validation(format!("PORT is not a valid port: {raw}")))?,
            None => file.server.port.unwrap_or(5000),
        };

        let database_url = match var("DATABASE_URL").or(file.storage.database_url) {
            Some(url) => url,
            None => {
                let data_dir = var("AGROBOT_DATA_DIR")
                    .map(PathBuf::from)
                    .or(file.storage.data_dir)
                    .unwrap_or_else(|| PathBuf::from("./data"));
                format!("sqlite:{}", data_dir.join("agrobot.db").display())
            }
        };

        let defaults = LlmConfig::default();
        let provider = var("LLM_PROVIDER")
            .or(file.llm.provider)
            .unwrap_or(defaults.provider);
        let api_key_env = file
            .llm
            .api_key_env
            .or_else(|| default_api_key_env(&provider).map(str::to_string));

        let max_output_tokens = match var("MAX_OUTPUT_TOKENS") {
            Some(raw) => raw.parse().map_err(|_| {
                ConfigError::Validation(format!("MAX_OUTPUT_TOKENS is not a number: {raw}"))
            })?,
            None => file.llm.max_output_tokens.unwrap_or(defaults.max_output_tokens),
        };
        if max_output_tokens == 0 {
            return Err(ConfigError::Validation(
                "max_output_tokens must be greater than zero".into(),
            ));
        }

        let llm = LlmConfig {
            provider,
            model: var("LLM_MODEL")
                .or(file.llm.model)
                .unwrap_or(defaults.model),
            endpoint: var("LLM_ENDPOINT").or(file.llm.endpoint),
            api_key: api_key_env.and_then(|name| var(name.as_str())),
            max_output_tokens,
            timeout_secs: file.llm.timeout_secs.unwrap_or(defaults.timeout_secs),
        };

        Ok(Self {
            host: var("HOST")
                .or(file.server.host)
                .unwrap_or_else(|| "127.0.0.1".into()),
            port,
            database_url,
            llm,
            persona_file: var("AGROBOT_PERSONA")
                .map(PathBuf::from)
                .or(file.persona.file),
        })
    }

    /// Directory that must exist before SQLite can create the database file
    pub fn database_dir(&self) -> Option<PathBuf> {
        let path = self.database_url.strip_prefix("sqlite:")?;
        let path = path.trim_start_matches("//");
        if path.starts_with(":memory:") {
            return None;
        }
        Path::new(path).parent().map(Path::to_path_buf)
    }
}

/// Environment variable holding the API key when the settings file names none.
/// Local servers get no key.
fn default_api_key_env(provider: &str) -> Option<&'static str> {
    match provider.to_lowercase().as_str() {
        "gemini" | "google" => Some("GEMINI_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "groq" => Some("GROQ_API_KEY"),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}
