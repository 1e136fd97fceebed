//! Generation Orchestrator: drives one review from request to result.
//!
//! Each run is an explicit state machine:
//!
//! ```text
//! Init ─► Calling ─► Streaming ─► Complete
//!            ▲           │
//!            └─ Retry ◄──┤ (transient, attempts left)
//!                        ▼
//!                     Fallback ─► Calling ─► Streaming ─► Complete
//!                                              │
//!                                              ▼
//!                                            Failed
//! ```
//!
//! A cache hit goes straight from `Init` to `Complete`. At most one provider
//! call is in flight per run, and all output flows through an [`EventSink`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{cache_key, CacheStore, CachedReview};
use crate::generation::events::{EventSink, GenerationEvent, SinkClosed};
use crate::generation::parser::{self, estimate_progress, CompletedSection, SectionTracker};
use crate::generation::prompts::build_review_prompt;
use crate::generation::retry::RetryPolicy;
use crate::history::{HistoryStore, NewHistoryVersion, ReviewSnapshot};
use crate::intake::sanitize::escape_for_display;
use crate::llm_client::{Prompt, ProviderError, TextProvider};
use crate::metrics::{ReviewMetrics, ReviewStatus};
use crate::models::review::{ParsedReview, ReviewRequest, ReviewResult};
use crate::validation::ValidationPipeline;

/// Increments between two `progress` events.
const PROGRESS_EVERY: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Calling,
    Streaming,
    Retry,
    Fallback,
    Complete,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Calling => "calling",
            Phase::Streaming => "streaming",
            Phase::Retry => "retry",
            Phase::Fallback => "fallback",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One admitted, sanitized review request.
#[derive(Debug, Clone)]
pub struct ReviewJob {
    pub id: Uuid,
    pub owner: String,
    pub request: ReviewRequest,
    pub bypass_cache: bool,
    pub input_warnings: Vec<String>,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(Box<ReviewResult>),
    Failed { error: ProviderError, attempts: u32 },
    /// The receiver went away; nothing was persisted.
    Cancelled,
}

/// Why a single provider attempt ended without text.
enum AttemptError {
    Provider(ProviderError),
    Cancelled,
}

impl From<ProviderError> for AttemptError {
    fn from(e: ProviderError) -> Self {
        AttemptError::Provider(e)
    }
}

impl From<SinkClosed> for AttemptError {
    fn from(_: SinkClosed) -> Self {
        AttemptError::Cancelled
    }
}

/// Per-run bookkeeping: current phase and provider calls made so far.
struct Run<'a> {
    job: &'a ReviewJob,
    sink: &'a dyn EventSink,
    phase: Phase,
    attempts: u32,
    started: Instant,
}

impl<'a> Run<'a> {
    fn enter(&mut self, next: Phase, provider: &str) {
        debug!(
            review_id = %self.job.id,
            provider,
            "Review phase {} -> {}",
            self.phase,
            next
        );
        self.phase = next;
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

pub struct Orchestrator {
    primary: Arc<dyn TextProvider>,
    secondary: Option<Arc<dyn TextProvider>>,
    cache: Arc<dyn CacheStore>,
    history: Arc<dyn HistoryStore>,
    validation: ValidationPipeline,
    retry: RetryPolicy,
    chunk_timeout: Duration,
    metrics: Arc<ReviewMetrics>,
}

impl Orchestrator {
    pub fn new(
        primary: Arc<dyn TextProvider>,
        secondary: Option<Arc<dyn TextProvider>>,
        cache: Arc<dyn CacheStore>,
        history: Arc<dyn HistoryStore>,
        validation: ValidationPipeline,
    ) -> Self {
        Self {
            primary,
            secondary,
            cache,
            history,
            validation,
            retry: RetryPolicy::default(),
            chunk_timeout: Duration::from_secs(30),
            metrics: Arc::new(ReviewMetrics::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_chunk_timeout(mut self, chunk_timeout: Duration) -> Self {
        self.chunk_timeout = chunk_timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ReviewMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Produces a review for `job`, reporting progress to `sink`.
    pub async fn run(&self, job: &ReviewJob, sink: &dyn EventSink) -> RunOutcome {
        let started = Instant::now();
        let outcome = self.execute(job, sink).await;
        let status = match &outcome {
            RunOutcome::Completed(result) if result.cached => ReviewStatus::Cached,
            RunOutcome::Completed(_) => ReviewStatus::Generated,
            RunOutcome::Failed { .. } => ReviewStatus::Failed,
            RunOutcome::Cancelled => ReviewStatus::Cancelled,
        };
        self.metrics.record_review(status, started.elapsed());
        outcome
    }

    async fn execute(&self, job: &ReviewJob, sink: &dyn EventSink) -> RunOutcome {
        let mut run = Run {
            job,
            sink,
            phase: Phase::Init,
            attempts: 0,
            started: Instant::now(),
        };
        let key = cache_key(&job.request.resume, &job.request.job_description);

        if !job.bypass_cache {
            if let Some(hit) = self.cache.get(&key).await {
                info!(review_id = %job.id, "Cache hit, skipping generation");
                return self.complete_from_cache(&mut run, hit).await;
            }
        }

        let prompt = build_review_prompt(&job.request);
        let mut last_error = None;

        for attempt in 1..=self.retry.max_attempts {
            match self.attempt(&mut run, self.primary.as_ref(), &prompt).await {
                Ok(text) => {
                    return self
                        .complete_fresh(&mut run, self.primary.name(), text, &key)
                        .await
                }
                Err(AttemptError::Cancelled) => return cancelled(&run),
                Err(AttemptError::Provider(e)) => {
                    warn!(
                        review_id = %job.id,
                        provider = self.primary.name(),
                        attempt,
                        "Generation attempt failed: {e}"
                    );
                    let retry = e.is_transient() && attempt < self.retry.max_attempts;
                    let reason = e.to_string();
                    last_error = Some(e);
                    if !retry {
                        break;
                    }

                    run.enter(Phase::Retry, self.primary.name());
                    let delay = self.retry.backoff(attempt);
                    let event = GenerationEvent::Retry {
                        attempt,
                        attempts_remaining: self.retry.attempts_remaining(attempt),
                        max_attempts: self.retry.max_attempts,
                        delay_ms: delay.as_millis() as u64,
                        provider: self.primary.name().to_string(),
                        reason,
                    };
                    if sink.emit(event).await.is_err() {
                        return cancelled(&run);
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = sink.closed() => return cancelled(&run),
                    }
                }
            }
        }

        if let Some(secondary) = &self.secondary {
            run.enter(Phase::Fallback, secondary.name());
            let notice = GenerationEvent::Progress {
                progress: 0,
                content: None,
                message: Some(format!(
                    "Primary provider unavailable, switching to {}",
                    secondary.name()
                )),
            };
            if sink.emit(notice).await.is_err() {
                return cancelled(&run);
            }

            match self.attempt(&mut run, secondary.as_ref(), &prompt).await {
                Ok(text) => {
                    return self
                        .complete_fresh(&mut run, secondary.name(), text, &key)
                        .await
                }
                Err(AttemptError::Cancelled) => return cancelled(&run),
                Err(AttemptError::Provider(e)) => {
                    warn!(
                        review_id = %job.id,
                        provider = secondary.name(),
                        "Fallback generation failed: {e}"
                    );
                    last_error = Some(e);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| {
            ProviderError::Permanent("no generation attempt was made".to_string())
        });
        run.enter(Phase::Failed, "");
        let _ = sink
            .emit(GenerationEvent::Error {
                error: error.to_string(),
                retryable: error.is_transient(),
                attempts: run.attempts,
            })
            .await;
        warn!(
            review_id = %job.id,
            attempts = run.attempts,
            "Review failed after all providers: {error}"
        );
        RunOutcome::Failed {
            error,
            attempts: run.attempts,
        }
    }

    /// One provider call, timed for the per-provider metrics. Cancelled calls
    /// are not counted.
    async fn attempt(
        &self,
        run: &mut Run<'_>,
        provider: &dyn TextProvider,
        prompt: &Prompt,
    ) -> Result<String, AttemptError> {
        let started = Instant::now();
        let result = self.consume(run, provider, prompt).await;
        match &result {
            Ok(_) => self
                .metrics
                .record_provider_call(provider.name(), true, started.elapsed()),
            Err(AttemptError::Provider(_)) => {
                self.metrics
                    .record_provider_call(provider.name(), false, started.elapsed())
            }
            Err(AttemptError::Cancelled) => {}
        }
        result
    }

    /// Consumes one provider call to completion. Sections and progress are
    /// emitted as the text arrives.
    async fn consume(
        &self,
        run: &mut Run<'_>,
        provider: &dyn TextProvider,
        prompt: &Prompt,
    ) -> Result<String, AttemptError> {
        let sink = run.sink;
        run.attempts += 1;
        run.enter(Phase::Calling, provider.name());

        let generation = tokio::select! {
            result = provider.generate(prompt) => result?,
            _ = sink.closed() => return Err(AttemptError::Cancelled),
        };

        run.enter(Phase::Streaming, provider.name());
        let mut increments = generation.into_stream();
        let mut accumulated = String::new();
        let mut tracker = SectionTracker::new();
        let mut chunks: u32 = 0;

        loop {
            let next = tokio::select! {
                next = tokio::time::timeout(self.chunk_timeout, increments.next()) => next,
                _ = sink.closed() => return Err(AttemptError::Cancelled),
            };
            let increment = match next {
                Err(_) => {
                    return Err(ProviderError::Transient(format!(
                        "{} sent nothing for {}s",
                        provider.name(),
                        self.chunk_timeout.as_secs()
                    ))
                    .into())
                }
                Ok(None) => break,
                Ok(Some(increment)) => increment?,
            };

            accumulated.push_str(&increment);
            chunks += 1;
            let progress = estimate_progress(accumulated.len());

            for section in tracker.observe(&accumulated) {
                sink.emit(section_event(section, progress)).await?;
            }
            if chunks % PROGRESS_EVERY == 0 {
                sink.emit(GenerationEvent::Progress {
                    progress,
                    content: None,
                    message: None,
                })
                .await?;
            }
        }

        if accumulated.trim().is_empty() {
            return Err(ProviderError::Transient(format!("{} returned no text", provider.name())).into());
        }

        let progress = estimate_progress(accumulated.len());
        for section in tracker.finish(&accumulated) {
            sink.emit(section_event(section, progress)).await?;
        }

        debug!(
            review_id = %run.job.id,
            provider = provider.name(),
            chunks,
            chars = accumulated.len(),
            "Generation stream finished"
        );
        Ok(accumulated)
    }

    async fn complete_fresh(
        &self,
        run: &mut Run<'_>,
        provider: &str,
        text: String,
        key: &str,
    ) -> RunOutcome {
        run.enter(Phase::Complete, provider);
        let complete = GenerationEvent::Complete {
            provider: provider.to_string(),
            full_text: Some(text.clone()),
            progress: 100,
            cached: false,
        };
        if run.sink.emit(complete).await.is_err() || run.sink.is_closed() {
            return cancelled(run);
        }

        let sections = parser::parse(&text);
        self.deliver(run, sections, provider, Some(key)).await
    }

    async fn complete_from_cache(&self, run: &mut Run<'_>, hit: CachedReview) -> RunOutcome {
        run.enter(Phase::Complete, &hit.provider);

        for (kind, content) in hit.sections.sections() {
            if content.is_empty() {
                continue;
            }
            let event = section_event(
                CompletedSection {
                    kind,
                    content: content.to_string(),
                },
                100,
            );
            if run.sink.emit(event).await.is_err() {
                return cancelled(run);
            }
        }

        let complete = GenerationEvent::Complete {
            provider: hit.provider.clone(),
            full_text: None,
            progress: 100,
            cached: true,
        };
        if run.sink.emit(complete).await.is_err() || run.sink.is_closed() {
            return cancelled(run);
        }

        self.deliver(run, hit.sections, &hit.provider, None).await
    }

    /// Validates, stores a fresh result under `cache_key`, records history and
    /// emits the final `parsed` event. `cache_key` is `None` for a result that
    /// came from the cache.
    async fn deliver(
        &self,
        run: &mut Run<'_>,
        sections: ParsedReview,
        provider: &str,
        cache_key: Option<&str>,
    ) -> RunOutcome {
        let job = run.job;
        let cached = cache_key.is_none();
        let validation = self.validation.run(&job.request, &sections);

        if let Some(key) = cache_key {
            let entry = CachedReview {
                sections: sections.clone(),
                provider: provider.to_string(),
                duration_ms: run.elapsed_ms(),
                created_at: Utc::now(),
            };
            self.cache.set(key, entry).await;
        }

        let display = sections.map_sections(escape_for_display);

        let entry = NewHistoryVersion {
            owner: job.owner.clone(),
            request: job.request.clone(),
            response: ReviewSnapshot {
                sections: display.clone(),
                validation: validation.clone(),
            },
            provider: provider.to_string(),
            cached,
        };
        let id = match self.history.append(entry).await {
            Ok(version) => Some(version.id),
            Err(e) => {
                warn!(review_id = %job.id, "Failed to record review history: {e:#}");
                None
            }
        };

        let result = ReviewResult {
            id,
            sections: display,
            validation,
            provider: provider.to_string(),
            cached,
            duration_ms: run.elapsed_ms(),
            optimization_mode: job.request.optimization_mode,
            input_warnings: job.input_warnings.clone(),
            created_at: Utc::now(),
        };

        let _ = run
            .sink
            .emit(GenerationEvent::Parsed {
                result: result.clone(),
            })
            .await;

        info!(
            review_id = %job.id,
            provider,
            cached,
            attempts = run.attempts,
            duration_ms = result.duration_ms,
            "Review complete"
        );
        RunOutcome::Completed(Box::new(result))
    }
}

fn section_event(section: CompletedSection, progress: u8) -> GenerationEvent {
    GenerationEvent::Section {
        section_number: section.kind.number(),
        section_name: section.kind.display_name().to_string(),
        content: escape_for_display(&section.content),
        progress,
    }
}

fn cancelled(run: &Run<'_>) -> RunOutcome {
    info!(
        review_id = %run.job.id,
        phase = %run.phase,
        "Receiver disconnected, abandoning review"
    );
    RunOutcome::Cancelled
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use futures::stream;
    use parking_lot::Mutex;

    use super::*;
    use crate::cache::memory::MemoryCacheStore;
    use crate::generation::events::testing::CollectSink;
    use crate::generation::events::{ChannelSink, NullSink};
    use crate::history::memory::MemoryHistoryStore;
    use crate::llm_client::Generation;
    use crate::models::review::SectionKind;
    use crate::validation::fixtures;

    #[derive(Clone)]
    enum Step {
        Text(String),
        Chunks(Vec<String>),
        Fail(ProviderError),
        /// Opens a stream that never yields.
        Hang,
    }

    /// Plays back a script of outcomes; the last step repeats once the script runs out.
    struct ScriptedProvider {
        name: &'static str,
        script: Mutex<VecDeque<Step>>,
        last: Step,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, steps: Vec<Step>) -> Arc<Self> {
            let last = steps
                .last()
                .cloned()
                .unwrap_or_else(|| Step::Fail(ProviderError::Permanent("empty script".into())));
            Arc::new(Self {
                name,
                script: Mutex::new(steps.into()),
                last,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextProvider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn generate(&self, _prompt: &Prompt) -> Result<Generation, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().pop_front().unwrap_or_else(|| self.last.clone());
            match step {
                Step::Text(text) => Ok(Generation::Complete(text)),
                Step::Chunks(chunks) => Ok(Generation::Stream(
                    stream::iter(chunks.into_iter().map(Ok)).boxed(),
                )),
                Step::Fail(e) => Err(e),
                Step::Hang => Ok(Generation::Stream(stream::pending().boxed())),
            }
        }
    }

    fn transient() -> Step {
        Step::Fail(ProviderError::Transient("status 503: overloaded".into()))
    }

    fn review_text() -> String {
        let bodies = [
            "Strong alignment with the automation role.",
            "1. Tell me about a release you blocked.",
            "1. How do you keep Selenium suites stable?",
            "Docker pipelines are not evidenced.",
            fixtures::CV,
            "Dear hiring team, I build regression suites.",
            "Recruiters see Selenium and Python first.",
        ];
        bodies
            .iter()
            .enumerate()
            .map(|(i, body)| format!("===== SECTION {}: TITLE =====\n{body}\n\n", i + 1))
            .collect()
    }

    struct Harness {
        cache: Arc<MemoryCacheStore>,
        history: Arc<MemoryHistoryStore>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                cache: Arc::new(MemoryCacheStore::new(10, Duration::from_secs(3600))),
                history: Arc::new(MemoryHistoryStore::new(10)),
            }
        }

        fn orchestrator(
            &self,
            primary: Arc<ScriptedProvider>,
            secondary: Option<Arc<ScriptedProvider>>,
        ) -> Orchestrator {
            Orchestrator::new(
                primary,
                secondary.map(|s| s as Arc<dyn TextProvider>),
                self.cache.clone(),
                self.history.clone(),
                ValidationPipeline::with_defaults(),
            )
        }
    }

    fn job() -> ReviewJob {
        ReviewJob {
            id: Uuid::new_v4(),
            owner: "203.0.113.7".into(),
            request: fixtures::request(),
            bypass_cache: false,
            input_warnings: vec![],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_transient_failures_then_success() {
        let harness = Harness::new();
        let primary = ScriptedProvider::new("gemini", vec![transient(), transient(), Step::Text(review_text())]);
        let orchestrator = harness.orchestrator(primary.clone(), None);
        let sink = CollectSink::default();

        let outcome = orchestrator.run(&job(), &sink).await;

        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(primary.calls(), 3);
        assert_eq!(sink.count("retry"), 2);
        assert_eq!(sink.count("complete"), 1);
        assert_eq!(sink.count("error"), 0);

        let retries: Vec<(u32, u32)> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                GenerationEvent::Retry {
                    attempt,
                    attempts_remaining,
                    ..
                } => Some((attempt, attempts_remaining)),
                _ => None,
            })
            .collect();
        assert_eq!(retries, vec![(1, 2), (2, 1)]);

        let types = sink.types();
        let complete = types.iter().position(|t| *t == "complete").unwrap();
        assert_eq!(types.last(), Some(&"parsed"));
        assert!(types[..complete].iter().all(|t| *t != "parsed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_exhausted_falls_back_once() {
        let harness = Harness::new();
        let primary = ScriptedProvider::new("gemini", vec![transient()]);
        let secondary = ScriptedProvider::new("huggingface", vec![Step::Text(review_text())]);
        let orchestrator = harness.orchestrator(primary.clone(), Some(secondary.clone()));
        let sink = CollectSink::default();

        let outcome = orchestrator.run(&job(), &sink).await;

        let RunOutcome::Completed(result) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(result.provider, "huggingface");
        assert_eq!(primary.calls(), 3);
        assert_eq!(secondary.calls(), 1);
        assert_eq!(sink.count("complete"), 1);
        assert!(sink.events().iter().any(|e| matches!(
            e,
            GenerationEvent::Progress { message: Some(m), .. } if m.contains("huggingface")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_providers_failing_emits_single_error() {
        let harness = Harness::new();
        let primary = ScriptedProvider::new("gemini", vec![transient()]);
        let secondary = ScriptedProvider::new("huggingface", vec![transient()]);
        let orchestrator = harness.orchestrator(primary.clone(), Some(secondary.clone()));
        let sink = CollectSink::default();

        let outcome = orchestrator.run(&job(), &sink).await;

        let RunOutcome::Failed { error, attempts } = outcome else {
            panic!("expected failure");
        };
        assert!(error.is_transient());
        assert_eq!(attempts, 4);
        assert_eq!(sink.count("error"), 1);
        assert_eq!(sink.count("complete"), 0);
        assert_eq!(sink.types().last(), Some(&"error"));
        assert!(harness.history.list("203.0.113.7").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_skips_retries() {
        let harness = Harness::new();
        let primary = ScriptedProvider::new(
            "gemini",
            vec![Step::Fail(ProviderError::Permanent("status 401: bad key".into()))],
        );
        let secondary = ScriptedProvider::new("huggingface", vec![Step::Text(review_text())]);
        let orchestrator = harness.orchestrator(primary.clone(), Some(secondary.clone()));
        let sink = CollectSink::default();

        let outcome = orchestrator.run(&job(), &sink).await;

        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 1);
        assert_eq!(sink.count("retry"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_request_is_served_from_cache() {
        let harness = Harness::new();
        let primary = ScriptedProvider::new("gemini", vec![Step::Text(review_text())]);
        let orchestrator = harness.orchestrator(primary.clone(), None);

        let first = orchestrator.run(&job(), &NullSink).await;
        let sink = CollectSink::default();
        let second = orchestrator.run(&job(), &sink).await;

        assert_eq!(primary.calls(), 1);
        let (RunOutcome::Completed(first), RunOutcome::Completed(second)) = (first, second) else {
            panic!("expected two completions");
        };
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.sections, second.sections);
        assert_eq!(first.validation, second.validation);
        assert!(sink.events().iter().any(|e| matches!(
            e,
            GenerationEvent::Complete { cached: true, full_text: None, .. }
        )));
        assert_eq!(sink.count("section"), 7);

        let versions = harness.history.list("203.0.113.7").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].meta.version, 2);
        assert!(versions[0].meta.cached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bypass_cache_regenerates_and_refreshes_entry() {
        let harness = Harness::new();
        let primary = ScriptedProvider::new("gemini", vec![Step::Text(review_text())]);
        let orchestrator = harness.orchestrator(primary.clone(), None);

        orchestrator.run(&job(), &NullSink).await;
        let mut regenerate = job();
        regenerate.bypass_cache = true;
        let outcome = orchestrator.run(&regenerate, &NullSink).await;

        assert_eq!(primary.calls(), 2);
        let RunOutcome::Completed(result) = outcome else {
            panic!("expected completion");
        };
        assert!(!result.cached);
        assert_eq!(harness.cache.stats().await.entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streamed_sections_arrive_in_order() {
        let harness = Harness::new();
        let text = review_text();
        let chunks: Vec<String> = text
            .split_inclusive("\n\n")
            .map(str::to_string)
            .collect();
        let primary = ScriptedProvider::new("gemini", vec![Step::Chunks(chunks)]);
        let orchestrator = harness.orchestrator(primary, None);
        let sink = CollectSink::default();

        let outcome = orchestrator.run(&job(), &sink).await;
        assert!(matches!(outcome, RunOutcome::Completed(_)));

        let numbers: Vec<u8> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                GenerationEvent::Section { section_number, .. } => Some(section_number),
                _ => None,
            })
            .collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6, 7]);
        assert!(sink.count("progress") >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_stream_is_retried() {
        let harness = Harness::new();
        let primary = ScriptedProvider::new("gemini", vec![Step::Hang, Step::Text(review_text())]);
        let orchestrator = harness.orchestrator(primary.clone(), None);
        let sink = CollectSink::default();

        let outcome = orchestrator.run(&job(), &sink).await;

        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(primary.calls(), 2);
        assert_eq!(sink.count("retry"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_sections_are_escaped_but_cache_is_raw() {
        let harness = Harness::new();
        let text = review_text().replace(
            "Dear hiring team,",
            "Dear <script>alert(1)</script>team & friends,",
        );
        let primary = ScriptedProvider::new("gemini", vec![Step::Text(text)]);
        let orchestrator = harness.orchestrator(primary, None);

        let RunOutcome::Completed(result) = orchestrator.run(&job(), &NullSink).await else {
            panic!("expected completion");
        };
        let letter = result.sections.section(SectionKind::CoverLetter);
        assert!(!letter.contains("<script>"));
        assert!(letter.contains("team &amp; friends"));

        let key = cache_key(&fixtures::RESUME, &fixtures::JOB);
        let cached = harness.cache.get(&key).await.unwrap();
        assert!(cached.sections.cover_letter.contains("team & friends"));
        assert!(result.id.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receiver_skips_persistence() {
        let harness = Harness::new();
        let primary = ScriptedProvider::new("gemini", vec![Step::Text(review_text())]);
        let orchestrator = harness.orchestrator(primary, None);
        let (sink, rx) = ChannelSink::new(16);
        drop(rx);

        let outcome = orchestrator.run(&job(), &sink).await;

        assert!(matches!(outcome, RunOutcome::Cancelled));
        assert_eq!(harness.cache.stats().await.entries, 0);
        assert!(harness.history.list("203.0.113.7").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_backoff_stops_retrying() {
        let harness = Harness::new();
        let primary = ScriptedProvider::new("gemini", vec![transient()]);
        let orchestrator = Arc::new(harness.orchestrator(primary.clone(), None));
        let (sink, mut rx) = ChannelSink::new(16);

        let task = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.run(&job(), &sink).await })
        };

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type(), "retry");
        drop(rx);

        let outcome = task.await.unwrap();
        assert!(matches!(outcome, RunOutcome::Cancelled));
        assert_eq!(primary.calls(), 1);
    }

    type Log = Arc<Mutex<Vec<&'static str>>>;

    /// Records writes into a shared log; never has an entry to return.
    struct RecordingCache {
        log: Log,
    }

    #[async_trait]
    impl CacheStore for RecordingCache {
        async fn get(&self, _key: &str) -> Option<CachedReview> {
            None
        }

        async fn set(&self, _key: &str, _value: CachedReview) {
            self.log.lock().push("cache_set");
        }

        async fn evict(&self, _key: &str) -> bool {
            false
        }

        async fn stats(&self) -> crate::cache::CacheStats {
            crate::cache::CacheStats::default()
        }
    }

    /// Every write fails, as when the database is unreachable.
    struct FailingHistory {
        log: Log,
    }

    #[async_trait]
    impl HistoryStore for FailingHistory {
        async fn append(&self, _entry: NewHistoryVersion) -> anyhow::Result<crate::history::HistoryVersion> {
            self.log.lock().push("history_append");
            anyhow::bail!("connection refused")
        }

        async fn list(&self, _owner: &str) -> anyhow::Result<Vec<crate::history::HistoryVersion>> {
            Ok(vec![])
        }

        async fn get(&self, _id: Uuid) -> anyhow::Result<Option<crate::history::HistoryVersion>> {
            Ok(None)
        }

        async fn delete(&self, _id: Uuid) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    struct RecordingValidator {
        log: Log,
    }

    impl crate::validation::Validator for RecordingValidator {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn validate(
            &self,
            _request: &ReviewRequest,
            _review: &ParsedReview,
        ) -> Result<serde_json::Value, crate::validation::ValidatorError> {
            self.log.lock().push("validate");
            Ok(serde_json::json!({ "ok": true }))
        }
    }

    fn recording_orchestrator(log: &Log, primary: Arc<ScriptedProvider>) -> Orchestrator {
        Orchestrator::new(
            primary,
            None,
            Arc::new(RecordingCache { log: log.clone() }),
            Arc::new(FailingHistory { log: log.clone() }),
            ValidationPipeline::new(vec![Box::new(RecordingValidator { log: log.clone() })]),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_failure_still_completes_without_id() {
        let log = Log::default();
        let primary = ScriptedProvider::new("gemini", vec![Step::Text(review_text())]);
        let orchestrator = recording_orchestrator(&log, primary);
        let sink = CollectSink::default();

        let outcome = orchestrator.run(&job(), &sink).await;

        let RunOutcome::Completed(result) = outcome else {
            panic!("expected completion");
        };
        assert!(result.id.is_none());
        assert!(!result.cached);
        assert_eq!(sink.count("error"), 0);

        let types = sink.types();
        assert_eq!(&types[types.len() - 2..], &["complete", "parsed"]);
        assert!(sink.events().iter().any(|e| matches!(
            e,
            GenerationEvent::Parsed { result } if result.id.is_none()
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_result_is_validated_before_cache_and_history_writes() {
        let log = Log::default();
        let primary = ScriptedProvider::new("gemini", vec![Step::Text(review_text())]);
        let orchestrator = recording_orchestrator(&log, primary);

        orchestrator.run(&job(), &NullSink).await;

        assert_eq!(*log.lock(), vec!["validate", "cache_set", "history_append"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_count_provider_calls_and_outcomes() {
        let harness = Harness::new();
        let metrics = Arc::new(ReviewMetrics::new());
        let primary = ScriptedProvider::new("gemini", vec![transient()]);
        let secondary = ScriptedProvider::new("huggingface", vec![Step::Text(review_text())]);
        let orchestrator = harness
            .orchestrator(primary, Some(secondary))
            .with_metrics(metrics.clone());

        orchestrator.run(&job(), &NullSink).await;
        orchestrator.run(&job(), &NullSink).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_reviews, 2);
        assert_eq!(snapshot.generated, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.failed, 0);
        let gemini = &snapshot.providers["gemini"];
        assert_eq!((gemini.successes, gemini.failures), (0, 3));
        assert_eq!(snapshot.providers["huggingface"].successes, 1);
    }
}
