//! Secondary provider: HuggingFace chat completions, answered in one piece.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{http_client, Generation, Prompt, ProviderError, TextProvider};

pub const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";
pub const DEFAULT_MODEL: &str = "mistralai/Mistral-7B-Instruct-v0.2";
const MAX_TOKENS: u32 = 8000;
const TEMPERATURE: f32 = 0.7;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatResponse {
    fn text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
    }
}

#[derive(Clone)]
pub struct HuggingFaceProvider {
    client: Client,
    api_token: String,
    model: String,
    base_url: String,
    /// Whole-request bound; the answer arrives in one body.
    timeout: Duration,
}

impl HuggingFaceProvider {
    pub fn new(api_token: String, model: String, base_url: String, timeout: Duration) -> Self {
        Self {
            client: http_client(),
            api_token,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl TextProvider for HuggingFaceProvider {
    fn name(&self) -> &str {
        "huggingface"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<Generation, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_token)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("HuggingFace API returned {}: {}", status, body);
            return Err(ProviderError::from_status(status, &body));
        }

        let parsed: ChatResponse = response.json().await?;
        let text = parsed
            .text()
            .ok_or_else(|| ProviderError::Transient("HuggingFace returned empty content".into()))?;

        debug!("HuggingFace call succeeded: {} chars", text.len());
        Ok(Generation::Complete(text))
    }
}
