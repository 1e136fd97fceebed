//! Primary provider: Gemini `streamGenerateContent` over server-sent events.

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{http_client, Generation, Prompt, ProviderError, TextProvider};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-pro";
const MAX_OUTPUT_TOKENS: u32 = 8192;
const TEMPERATURE: f32 = 0.7;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Content<'a>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamFrame {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl StreamFrame {
    fn into_text(self) -> Result<String, ProviderError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ProviderError::Permanent(format!("prompt blocked: {reason}")));
        }
        Ok(self
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect())
    }
}

/// Incremental decoder for `text/event-stream` bodies. Frames end at a blank
/// line; only `data:` fields are kept.
///
/// Bytes are buffered raw and a frame is only turned into text once its
/// terminating blank line has arrived, so a multi-byte character split across
/// network chunks is reassembled intact.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Appends raw bytes and returns the payloads of every frame now complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.contains(&b'\r') {
            self.buffer = normalize_crlf(&self.buffer);
        }

        let mut payloads = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(data) = frame_data(&String::from_utf8_lossy(&frame)) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Payload of a trailing frame that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        frame_data(&String::from_utf8_lossy(&rest))
    }
}

/// Collapses `\r\n` pairs to `\n`. A lone trailing `\r` is kept so it can pair
/// with the next chunk.
fn normalize_crlf(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().peekable();
    while let Some(&b) = iter.next() {
        if b == b'\r' && iter.peek() == Some(&&b'\n') {
            continue;
        }
        out.push(b);
    }
    out
}

fn frame_data(frame: &str) -> Option<String> {
    let lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn decode_frame(payload: &str) -> Result<String, ProviderError> {
    let frame: StreamFrame = serde_json::from_str(payload)
        .map_err(|e| ProviderError::Transient(format!("malformed stream frame: {e}")))?;
    frame.into_text()
}

#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    /// Bounds the wait for response headers. Body reads are bounded per chunk
    /// by the orchestrator.
    response_timeout: Duration,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String, base_url: String, response_timeout: Duration) -> Self {
        Self {
            client: http_client(),
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            response_timeout,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl TextProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<Generation, ProviderError> {
        let body = GeminiRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: &prompt.user }],
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: &prompt.system }],
            },
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let request = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send();
        let response = tokio::time::timeout(self.response_timeout, request)
            .await
            .map_err(|_| {
                ProviderError::Transient(format!(
                    "no response from Gemini within {}s",
                    self.response_timeout.as_secs()
                ))
            })??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Gemini API returned {}: {}", status, body);
            return Err(ProviderError::from_status(status, &body));
        }

        debug!("Gemini stream opened (model: {})", self.model);

        let mut bytes = response.bytes_stream();
        let increments = stream! {
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ProviderError::from(e));
                        return;
                    }
                };
                for payload in decoder.push(&chunk) {
                    match decode_frame(&payload) {
                        Ok(text) if text.is_empty() => {}
                        Ok(text) => yield Ok(text),
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
            if let Some(payload) = decoder.finish() {
                match decode_frame(&payload) {
                    Ok(text) if text.is_empty() => {}
                    other => yield other,
                }
            }
        };

        Ok(Generation::Stream(increments.boxed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_handles_split_frames() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\":").is_empty());
        let payloads = decoder.push(b"1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_decoder_reassembles_character_split_across_chunks() {
        let frame = "data: {\"text\":\"£500\"}\n\n".as_bytes();
        let split = frame.iter().position(|&b| b == 0xC2).unwrap() + 1;

        let mut decoder = SseDecoder::default();
        assert!(decoder.push(&frame[..split]).is_empty());
        let payloads = decoder.push(&frame[split..]);
        assert_eq!(payloads, vec![r#"{"text":"£500"}"#.to_string()]);

        let value: serde_json::Value = serde_json::from_str(&payloads[0]).unwrap();
        assert_eq!(value["text"], "£500");
    }

    #[test]
    fn test_decoder_pairs_crlf_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"x\":1}\r\n\r").is_empty());
        assert_eq!(decoder.push(b"\n"), vec![r#"{"x":1}"#.to_string()]);
    }

    #[test]
    fn test_decoder_normalises_crlf_and_skips_comments() {
        let mut decoder = SseDecoder::default();
        let payloads = decoder.push(b": keep-alive\r\n\r\ndata: {\"x\":1}\r\n\r\n");
        assert_eq!(payloads, vec!["{\"x\":1}"]);
    }

    #[test]
    fn test_decoder_flushes_unterminated_frame() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("tail"));
    }

    #[test]
    fn test_decode_frame_joins_parts() {
        let payload = r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"world"}]}}]}"#;
        assert_eq!(decode_frame(payload).unwrap(), "Hello world");
    }

    #[test]
    fn test_blocked_prompt_is_permanent() {
        let payload = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let err = decode_frame(payload).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_endpoint_uses_sse_stream() {
        let provider = GeminiProvider::new(
            "key".into(),
            "gemini-pro".into(),
            "https://example.test/".into(),
            Duration::from_secs(30),
        );
        assert_eq!(
            provider.endpoint(),
            "https://example.test/v1beta/models/gemini-pro:streamGenerateContent?alt=sse"
        );
    }

    #[tokio::test]
    async fn test_slow_stream_outlives_response_timeout() {
        use axum::{body::Body, routing::post, Router};

        // Four frames 150ms apart: the whole body takes longer than the
        // response timeout, but every gap is short.
        async fn slow_sse() -> Body {
            let frames = stream! {
                for i in 0..4 {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    let frame = format!(
                        "data: {{\"candidates\":[{{\"content\":{{\"parts\":[{{\"text\":\"part{i} \"}}]}}}}]}}\n\n"
                    );
                    yield Ok::<_, std::convert::Infallible>(frame);
                }
            };
            Body::from_stream(frames)
        }

        let app = Router::new().route("/v1beta/models/:model", post(slow_sse));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let provider = GeminiProvider::new(
            "key".into(),
            "gemini-pro".into(),
            format!("http://{addr}"),
            Duration::from_millis(300),
        );
        let prompt = Prompt {
            system: "system".into(),
            user: "user".into(),
        };

        let pieces: Vec<String> = match provider.generate(&prompt).await.unwrap() {
            Generation::Stream(stream) => stream.map(|piece| piece.unwrap()).collect().await,
            Generation::Complete(_) => panic!("expected a stream"),
        };
        assert_eq!(pieces.concat(), "part0 part1 part2 part3 ");
    }
}
