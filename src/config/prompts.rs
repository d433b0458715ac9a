//! Persona templates
//!
//! The assistant's system prompt is built in, but a deployment may swap it
//! for one loaded from a TOML file.
//!
//! # Example Prompt File
//!
//! ```toml
//! [persona]
//! name = "Vineyard Advisor"
//! description = "Viticulture-focused assistant"
//!
//! [system_prompt]
//! content = """
//! You are an experienced viticulturist...
//! """
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// A persona/prompt template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Persona metadata
    pub persona: PersonaInfo,

    /// The system prompt
    pub system_prompt: SystemPrompt,
}

/// Persona metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaInfo {
    /// Display name of the persona
    pub name: String,

    /// Brief description
    #[serde(default)]
    pub description: String,
}

/// System prompt content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPrompt {
    /// The full system prompt content
    pub content: String,
}

impl PromptTemplate {
    /// Load a template from a TOML file
    pub async fn load_from_file(path: &Path) -> Result<Self, PromptError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PromptError::IoError(format!("{}: {}", path.display(), e)))?;

        let template: PromptTemplate =
            toml::from_str(&content).map_err(|e| PromptError::ParseError(e.to_string()))?;

        if template.system_prompt.content.trim().is_empty() {
            return Err(PromptError::ParseError(format!(
                "{}: system prompt is empty",
                path.display()
            )));
        }

        Ok(template)
    }
}

/// System prompt to use: the persona file when configured, AgroBot otherwise
pub async fn resolve_system_prompt(persona_file: Option<&Path>) -> Result<String, PromptError> {
    match persona_file {
        Some(path) => {
            let template = PromptTemplate::load_from_file(path).await?;
            tracing::info!(persona = %template.persona.name, "Loaded persona");
            Ok(template.system_prompt.content)
        }
        None => Ok(builtin::AGROBOT.to_string()),
    }
}

/// Errors from prompt loading
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Built-in prompts that don't require files
pub mod builtin {
    /// Agricultural consultant persona
    pub const AGROBOT: &str = r#"You are AgroBot, a world-class AI agricultural consultant. Your mission is to provide expert-level, actionable, and scientific advice to farmers and agricultural enthusiasts.

Formatting & Style:
1. Tone: Highly professional, encouraging, and authoritative yet accessible.
2. Structure: Use clear sections with bold titles. Use bullet points for readability.
3. Emojis: Use relevant agricultural and indicator emojis to make the content engaging (e.g., 🌱, 🌾, 🚜, 💧, 📈, ⚠️, ✅, 🥔, 🍎, 🥦).
4. Content: Always provide specific varieties, technical measurements, or scientific reasoning when possible.
5. Scope: Answer ALL agriculture questions including crops, soil, climate, livestock, and tech.

Example response style:
"🌱 **Conseil de Culture**
Pour les sols sablonneux, je recommande la plantation de **Légumes-racines** comme les carottes. 🥕

💧 **Stratégie d'Irrigation**
Puisque le sol sablonneux draine rapidement, utilisez un système de **Goutte-à-goutte**... ✅""#;
}
