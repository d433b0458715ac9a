//! Service settings loaded from a TOML file
//!
//! Every section and field is optional; environment variables override
//! whatever the file sets.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 5000
//!
//! [storage]
//! data_dir = "./data"
//!
//! [llm]
//! provider = "gemini"
//! model = "gemini-pro-latest"
//! api_key_env = "GEMINI_API_KEY"
//! max_output_tokens = 2000
//!
//! [persona]
//! file = "configs/prompts/agrobot.toml"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::ConfigError;

/// Root of the settings file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub llm: LlmSection,

    #[serde(default)]
    pub persona: PersonaSection,
}

impl FileConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSection {
    /// Full SQLx connection URL, wins over `data_dir`
    #[serde(default)]
    pub database_url: Option<String>,

    /// Directory holding `agrobot.db`
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// LLM provider settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmSection {
    /// Provider name: "gemini", "openai", "groq", "ollama"
    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    /// Name of the environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Custom API endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub max_output_tokens: Option<u32>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaSection {
    /// Prompt template replacing the built-in AgroBot persona
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"
[server]
host = "0.0.0.0"
port = 5000

[storage]
data_dir = "/var/lib/agrobot"

[llm]
provider = "ollama"
model = "llama3.2"
endpoint = "http://gpu-box:11434/v1"
max_output_tokens = 1024

[persona]
file = "configs/prompts/agrobot.toml"
"#;

    #[test]
    fn test_parse_config() {
        let config = FileConfig::parse(SAMPLE_CONFIG).unwrap();

        assert_eq!(config.server.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(config.server.port, Some(5000));
        assert_eq!(config.storage.data_dir, Some(PathBuf::from("/var/lib/agrobot")));
        assert_eq!(config.llm.provider.as_deref(), Some("ollama"));
        assert_eq!(config.llm.max_output_tokens, Some(1024));
        assert!(config.llm.api_key_env.is_none());
        assert!(config.persona.file.is_some());
    }

    #[test]
    fn test_empty_config() {
        let config = FileConfig::parse("").unwrap();
        assert!(config.server.port.is_none());
        assert!(config.llm.provider.is_none());
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let result = FileConfig::parse("[server\nport = ");
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }
}
