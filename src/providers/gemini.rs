//! Google Gemini provider
//!
//! Talks to the native `generateContent` endpoint. Prior turns go in
//! `contents` with the roles `user` and `model`; the persona is sent as
//! `systemInstruction` on every call.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::{Turn, TurnRole};

use super::ProviderError;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    /// API key; requests fail with `NotConfigured` when absent
    pub api_key: Option<String>,
    pub model: String,
    pub system_instruction: String,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: None,
            model: "gemini-pro-latest".to_string(),
            system_instruction: String::new(),
            max_output_tokens: 2000,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelInfo>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

impl Content {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

fn role_label(role: TurnRole) -> &'static str {
    match role {
        TurnRole::User => "user",
        TurnRole::Model => "model",
    }
}

pub struct GeminiProvider {
    config: GeminiConfig,
    client: Client,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::NotConfigured("GEMINI_API_KEY is not set".to_string()))
    }

    fn build_request(&self, history: &[Turn], prompt: &str) -> GenerateContentRequest {
        let mut contents: Vec<Content> = history
            .iter()
            .map(|turn| Content::text(role_label(turn.role), &turn.text))
            .collect();
        contents.push(Content::text("user", prompt));

        let system_instruction = if self.config.system_instruction.is_empty() {
            None
        } else {
            Some(Content {
                role: None,
                parts: vec![Part {
                    text: self.config.system_instruction.clone(),
                }],
            })
        };

        GenerateContentRequest {
            system_instruction,
            contents,
            generation_config: GenerationConfig {
                max_output_tokens: self.config.max_output_tokens,
            },
        }
    }

    pub async fn complete(&self, history: &[Turn], prompt: &str) -> Result<String, ProviderError> {
        let api_key = self.api_key()?;
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.model
        );
        let request = self.build_request(history, prompt);

        tracing::debug!(
            model = %self.config.model,
            history_turns = history.len(),
            "Calling Gemini API"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        parse_reply(&body)
    }

    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let api_key = self.api_key()?;
        let url = format!("{}/models", self.config.base_url);

        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.client.get(&url).header("x-goog-api-key", api_key);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let response = request.send().await?;

            let status = response.status();
            let body = response.text().await?;

            if !status.is_success() {
                return Err(api_error(status, &body));
            }

            let (page, next) = parse_model_page(&body)?;
            names.extend(page);
            match next {
                Some(token) if !token.is_empty() && page_token.as_ref() != Some(&token) => {
                    page_token = Some(token);
                }
                _ => break,
            }
        }

        Ok(names)
    }
}

fn api_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) => ProviderError::Api(match err.error.status {
            Some(code) => format!("{code}: {}", err.error.message),
            None => err.error.message,
        }),
        Err(_) => ProviderError::Api(format!("HTTP {status}: {body}")),
    }
}

/// Model names on one page of the listing, plus the token for the next page
fn parse_model_page(body: &str) -> Result<(Vec<String>, Option<String>), ProviderError> {
    let list: ModelList = serde_json::from_str(body)
        .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse model list: {e}")))?;

    let names = list
        .models
        .into_iter()
        .map(|m| m.name.trim_start_matches("models/").to_string())
        .collect();

    Ok((names, list.next_page_token))
}

fn parse_reply(body: &str) -> Result<String, ProviderError> {
    let response: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates".to_string());
        return Err(ProviderError::InvalidResponse(format!(
            "Prompt was not answered: {reason}"
        )));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        return Err(ProviderError::InvalidResponse(format!(
            "Empty candidate (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(api_key: Option<&str>) -> GeminiProvider {
        GeminiProvider::new(GeminiConfig {
            api_key: api_key.map(str::to_string),
            system_instruction: "You are AgroBot".to_string(),
            ..GeminiConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_request_body_shape() {
        let history = vec![
            Turn::user("Best tomato variety for clay soil?"),
            Turn::model("Try 'Roma'."),
        ];
        let request = provider(Some("key")).build_request(&history, "And watering frequency?");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "You are AgroBot");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["contents"].as_array().unwrap().len(), 3);
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["contents"][2]["parts"][0]["text"], "And watering frequency?");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 2000);
    }

    #[test]
    fn test_parse_reply_joins_parts() {
        let body = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "🌱 Water "}, {"text": "twice a week."}]},
                "finishReason": "STOP"
            }]
        }"#;
        assert_eq!(parse_reply(body).unwrap(), "🌱 Water twice a week.");
    }

    #[test]
    fn test_parse_blocked_prompt() {
        let body = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let err = parse_reply(body).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_model_page_token() {
        let body = r#"{
            "models": [{ "name": "models/gemini-pro-latest" }, { "name": "models/gemini-flash-latest" }],
            "nextPageToken": "page-2"
        }"#;
        let (names, next) = parse_model_page(body).unwrap();
        assert_eq!(names, vec!["gemini-pro-latest", "gemini-flash-latest"]);
        assert_eq!(next.as_deref(), Some("page-2"));

        let (names, next) = parse_model_page(r#"{ "models": [{ "name": "models/embedding-001" }] }"#).unwrap();
        assert_eq!(names, vec!["embedding-001"]);
        assert!(next.is_none());
    }

    #[test]
    fn test_api_error_message() {
        let body = r#"{"error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}}"#;
        let err = api_error(reqwest::StatusCode::TOO_MANY_REQUESTS, body);
        assert_eq!(err.to_string(), "API error: RESOURCE_EXHAUSTED: Quota exceeded");
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let result = provider(None).complete(&[], "Test").await;
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }
}
