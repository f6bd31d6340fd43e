//! The §6 "LLM provider" collaborator: a thin chat-completions client
//! shared by the intent extractor, judge, pairwise ranker, persona
//! summarizer, and phase labeler. Every caller enforces JSON-only output
//! and a single validation+regex-extract retry, so this crate exposes
//! that extraction helper alongside the HTTP call.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("llm response was not valid JSON and could not be repaired: {0}")]
    InvalidJson(String),
    #[error("llm call timed out")]
    Timeout,
    #[error("llm provider not configured")]
    NotConfigured,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("TASTE_LLM_API_KEY").ok()?;
        let api_url = std::env::var("TASTE_LLM_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
        let model = std::env::var("TASTE_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Some(Self {
            api_url,
            api_key,
            model,
            timeout: Duration::from_secs(60),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageContent,
}

#[derive(Debug, Deserialize)]
struct ChatMessageContent {
    content: String,
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    config: Option<LlmConfig>,
}

impl LlmClient {
    pub fn new(config: Option<LlmConfig>) -> Self {
        let timeout = config
            .as_ref()
            .map(|c| c.timeout)
            .unwrap_or(Duration::from_secs(60));
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(LlmConfig::from_env())
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    /// Issues a single chat-completions call with the given system
    /// prompt, user prompt, temperature, and per-call timeout override.
    #[instrument(skip(self, system_prompt, user_prompt), fields(model = %self.config.as_ref().map(|c| c.model.as_str()).unwrap_or("none")))]
    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String, LlmError> {
        let config = self.config.as_ref().ok_or(LlmError::NotConfigured)?;
        let request = ChatRequest {
            model: &config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature,
            max_tokens,
            stream: false,
        };

        let response = self
            .http
            .post(&config.api_url)
            .bearer_auth(&config.api_key)
            .json(&request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Http(e)
                }
            })?;

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        debug!(chars = content.len(), "llm call completed");
        Ok(content)
    }
}

/// Extracts the first top-level `{...}` object from `text` and parses it
/// as `T`. Used for the "regex-extract once, then drop" fallback every
/// JSON-only caller performs on malformed LLM output.
pub fn extract_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    if let Ok(direct) = serde_json::from_str::<T>(text.trim()) {
        return Ok(direct);
    }
    let start = text.find('{');
    let end = text.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => {
            let candidate = &text[s..=e];
            serde_json::from_str(candidate)
                .map_err(|err| LlmError::InvalidJson(format!("{err}: {candidate}")))
        }
        _ => Err(LlmError::InvalidJson(text.to_string())),
    }
}

/// Same "regex-extract once, then drop" fallback as [`extract_json`], but
/// for callers whose JSON-only output is a top-level `[...]` array rather
/// than an object.
pub fn extract_json_array<T: serde::de::DeserializeOwned>(text: &str) -> Result<Vec<T>, LlmError> {
    if let Ok(direct) = serde_json::from_str::<Vec<T>>(text.trim()) {
        return Ok(direct);
    }
    let start = text.find('[');
    let end = text.rfind(']');
    match (start, end) {
        (Some(s), Some(e)) if e > s => {
            let candidate = &text[s..=e];
            serde_json::from_str(candidate)
                .map_err(|err| LlmError::InvalidJson(format!("{err}: {candidate}")))
        }
        _ => Err(LlmError::InvalidJson(text.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        score: f32,
    }

    #[test]
    fn extract_json_parses_clean_json() {
        let parsed: Sample = extract_json(r#"{"score": 0.9}"#).unwrap();
        assert_eq!(parsed, Sample { score: 0.9 });
    }

    #[test]
    fn extract_json_strips_surrounding_prose() {
        let parsed: Sample =
            extract_json("Sure, here you go:\n```json\n{\"score\": 0.5}\n```\nHope that helps!")
                .unwrap();
        assert_eq!(parsed, Sample { score: 0.5 });
    }

    #[test]
    fn extract_json_fails_on_no_braces() {
        let result: Result<Sample, _> = extract_json("no json here");
        assert!(result.is_err());
    }

    #[test]
    fn extract_json_array_strips_surrounding_prose() {
        let parsed: Vec<Sample> =
            extract_json_array("here: [{\"score\": 0.1}, {\"score\": 0.2}] thanks").unwrap();
        assert_eq!(parsed, vec![Sample { score: 0.1 }, Sample { score: 0.2 }]);
    }

    #[tokio::test]
    async fn unconfigured_client_errors_without_panicking() {
        let client = LlmClient::new(None);
        assert!(!client.is_configured());
        let result = client
            .complete("sys", "user", 0.0, 10, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(LlmError::NotConfigured)));
    }
}
