//! LLM Client: the single point of entry for generative-text provider calls.
//!
//! ARCHITECTURAL RULE: No other module may call a provider API directly.
//! Providers only report failures; retry and fallback belong to the orchestrator.
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::StatusCode;
use thiserror::Error;

pub mod gemini;
pub mod huggingface;

/// Size of the increments a complete provider response is replayed in.
pub const REPLAY_CHUNK_CHARS: usize = 500;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Network failure, timeout, rate limit, server error. Worth retrying.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Authentication, malformed request, unknown model. Retrying cannot help.
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Classifies a non-success HTTP status.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = format!("status {}: {}", status.as_u16(), truncate(body, 300));
        if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            ProviderError::Transient(message)
        } else {
            ProviderError::Permanent(message)
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() || e.is_decode() {
            ProviderError::Permanent(e.to_string())
        } else {
            ProviderError::Transient(e.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

pub type TextStream = BoxStream<'static, Result<String, ProviderError>>;

/// A provider either streams increments or answers with the whole text at once.
pub enum Generation {
    Stream(TextStream),
    Complete(String),
}

impl Generation {
    /// Unifies both shapes into one increment stream.
    pub fn into_stream(self) -> TextStream {
        match self {
            Generation::Stream(stream) => stream,
            Generation::Complete(text) => {
                let chunks: Vec<Result<String, ProviderError>> =
                    chunk_text(&text, REPLAY_CHUNK_CHARS).into_iter().map(Ok).collect();
                stream::iter(chunks).boxed()
            }
        }
    }
}

#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Stable identifier reported in events and history ("gemini", "huggingface").
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &Prompt) -> Result<Generation, ProviderError>;
}

/// Splits on character boundaries into pieces of at most `size` characters.
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Shared client. Only connection setup is bounded here; each provider bounds
/// its own request, since a streamed body may legitimately run for minutes.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .expect("Failed to build HTTP client")
}
