//! Events emitted while a review is produced, and the sinks that receive them.
//!
//! A run emits `section` / `progress` / `retry` events in generation order and
//! ends with exactly one terminal event: `error`, or `complete` followed by
//! `parsed`.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::review::ReviewResult;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// One section whose body is final.
    Section {
        section_number: u8,
        section_name: String,
        content: String,
        progress: u8,
    },
    Progress {
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Emitted before each backoff wait.
    Retry {
        attempt: u32,
        attempts_remaining: u32,
        max_attempts: u32,
        delay_ms: u64,
        provider: String,
        reason: String,
    },
    Complete {
        provider: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        full_text: Option<String>,
        progress: u8,
        cached: bool,
    },
    Error {
        error: String,
        retryable: bool,
        attempts: u32,
    },
    Parsed {
        result: ReviewResult,
    },
}

impl GenerationEvent {
    /// SSE `event:` name.
    pub fn event_type(&self) -> &'static str {
        match self {
            GenerationEvent::Section { .. } => "section",
            GenerationEvent::Progress { .. } => "progress",
            GenerationEvent::Retry { .. } => "retry",
            GenerationEvent::Complete { .. } => "complete",
            GenerationEvent::Error { .. } => "error",
            GenerationEvent::Parsed { .. } => "parsed",
        }
    }
}

#[derive(Debug, Clone, Copy, Error)]
#[error("event receiver has gone away")]
pub struct SinkClosed;

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: GenerationEvent) -> Result<(), SinkClosed>;

    /// Resolves once the receiver is gone. Sinks without a receiver never resolve.
    async fn closed(&self);

    fn is_closed(&self) -> bool;
}

/// Forwards events into a bounded channel drained by the SSE response.
pub struct ChannelSink {
    tx: mpsc::Sender<GenerationEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<GenerationEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: GenerationEvent) -> Result<(), SinkClosed> {
        self.tx.send(event).await.map_err(|_| SinkClosed)
    }

    async fn closed(&self) {
        self.tx.closed().await
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Discards everything. Used by the single-shot endpoint.
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _event: GenerationEvent) -> Result<(), SinkClosed> {
        Ok(())
    }

    async fn closed(&self) {
        std::future::pending::<()>().await
    }

    fn is_closed(&self) -> bool {
        false
    }
}
