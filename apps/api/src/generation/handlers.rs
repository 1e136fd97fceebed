//! Axum route handlers for the Review API.

use std::convert::Infallible;
use std::time::Duration;

use anyhow::anyhow;
use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use tracing::{info, warn, Instrument, Span};
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::errors::AppError;
use crate::generation::events::{ChannelSink, NullSink};
use crate::generation::orchestrator::{ReviewJob, RunOutcome};
use crate::intake::admission::QuotaDecision;
use crate::intake::caller::Caller;
use crate::intake::sanitize::{detect_pii, prepare_request};
use crate::metrics::MetricsSnapshot;
use crate::models::review::ReviewInput;
use crate::state::AppState;

const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
const CACHE_STATUS: HeaderName = HeaderName::from_static("x-cache-status");

/// Events buffered between the generation task and the SSE response.
const STREAM_BUFFER: usize = 64;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

// ────────────────────────────────────────────────────────────────────────────
// Intake shared by both endpoints
// ────────────────────────────────────────────────────────────────────────────

pub fn quota_headers(decision: &QuotaDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    if let Ok(reset) = HeaderValue::from_str(&decision.reset_at.to_rfc3339()) {
        headers.insert(RATE_LIMIT_RESET, reset);
    }
    headers
}

/// Either an admitted job plus its quota headers, or the finished 429 response.
enum Admission {
    Admitted(ReviewJob, HeaderMap),
    Rejected(Response),
}

/// Sanitizes the body, then charges the caller's quota. Nothing reaches a
/// provider unless both pass.
async fn admit(state: &AppState, caller: &Caller, input: &ReviewInput) -> Result<Admission, AppError> {
    let request = prepare_request(input)?;

    let decision = state.admission.check(&caller.address).await;
    let headers = quota_headers(&decision);
    if !decision.allowed {
        info!(address = %caller.address, "Review rejected: quota exhausted");
        state.metrics.record_quota_rejection();
        let error = AppError::QuotaExceeded {
            retry_after: decision.retry_after_secs(),
        };
        return Ok(Admission::Rejected((headers, error).into_response()));
    }

    let job = ReviewJob {
        id: Uuid::new_v4(),
        owner: caller.owner.clone(),
        input_warnings: detect_pii(&request.resume),
        request,
        bypass_cache: input.bypass_cache,
    };
    info!(
        review_id = %job.id,
        mode = job.request.optimization_mode.as_str(),
        bypass_cache = job.bypass_cache,
        remaining = decision.remaining,
        "Review admitted"
    );
    Ok(Admission::Admitted(job, headers))
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/reviews
/// Runs the whole review and answers once with the result.
pub async fn handle_create_review(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<ReviewInput>,
) -> Result<Response, AppError> {
    let (job, mut headers) = match admit(&state, &caller, &input).await? {
        Admission::Admitted(job, headers) => (job, headers),
        Admission::Rejected(response) => return Ok(response),
    };

    match state.orchestrator.run(&job, &NullSink).await {
        RunOutcome::Completed(result) => {
            let status = if result.cached { "HIT" } else { "MISS" };
            headers.insert(CACHE_STATUS, HeaderValue::from_static(status));
            Ok((headers, Json(*result)).into_response())
        }
        RunOutcome::Failed { error, attempts } => {
            let error = AppError::Provider {
                message: format!("{error} ({attempts} attempts)"),
                retryable: error.is_transient(),
            };
            Ok((headers, error).into_response())
        }
        RunOutcome::Cancelled => Err(AppError::Internal(anyhow!(
            "review {} cancelled without a receiver",
            job.id
        ))),
    }
}

/// POST /api/v1/reviews/stream
/// Streams `section`, `progress`, `retry`, then `complete` + `parsed` or a single `error`.
pub async fn handle_stream_review(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<ReviewInput>,
) -> Result<Response, AppError> {
    let (job, headers) = match admit(&state, &caller, &input).await? {
        Admission::Admitted(job, headers) => (job, headers),
        Admission::Rejected(response) => return Ok(response),
    };

    let (sink, mut rx) = ChannelSink::new(STREAM_BUFFER);
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(
        async move {
            orchestrator.run(&job, &sink).await;
        }
        .instrument(Span::current()),
    );

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let event_type = event.event_type();
            match serde_json::to_string(&event) {
                Ok(data) => yield Ok::<Event, Infallible>(Event::default().event(event_type).data(data)),
                Err(e) => warn!("Failed to serialize {event_type} event: {e}"),
            }
        }
    };

    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    );
    Ok((headers, sse).into_response())
}

/// GET /api/v1/reviews/cache/stats
pub async fn handle_cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

/// GET /api/v1/reviews/metrics
pub async fn handle_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// DELETE /api/v1/reviews/metrics
pub async fn handle_reset_metrics(State(state): State<AppState>) -> StatusCode {
    state.metrics.reset();
    info!("Review metrics reset");
    StatusCode::NO_CONTENT
}
