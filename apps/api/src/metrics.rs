//! In-process review metrics: run outcomes, per-provider results and
//! generation times, quota rejections.
//!
//! Durations keep only the most recent samples; counters run until reset.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Duration samples kept per series.
const SAMPLE_WINDOW: usize = 1000;

/// How a review run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    Generated,
    Cached,
    Failed,
    Cancelled,
}

#[derive(Debug, Default)]
struct ProviderTally {
    successes: u64,
    failures: u64,
    generation_ms: VecDeque<u64>,
}

pub struct ReviewMetrics {
    started: Instant,
    reviews: AtomicU64,
    generated: AtomicU64,
    cached: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    quota_rejections: AtomicU64,
    review_ms: Mutex<VecDeque<u64>>,
    providers: Mutex<HashMap<String, ProviderTally>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStats {
    pub successes: u64,
    pub failures: u64,
    /// Percentage of calls that produced text.
    pub success_rate: f64,
    pub avg_generation_ms: f64,
    pub p95_generation_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_reviews: u64,
    pub generated: u64,
    pub cache_hits: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Failed runs as a percentage of all runs.
    pub error_rate: f64,
    pub quota_rejections: u64,
    pub avg_review_ms: f64,
    pub p50_review_ms: u64,
    pub p95_review_ms: u64,
    pub p99_review_ms: u64,
    pub providers: BTreeMap<String, ProviderStats>,
    pub uptime_secs: u64,
    pub timestamp: DateTime<Utc>,
}

impl Default for ReviewMetrics {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            reviews: AtomicU64::new(0),
            generated: AtomicU64::new(0),
            cached: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            quota_rejections: AtomicU64::new(0),
            review_ms: Mutex::new(VecDeque::new()),
            providers: Mutex::new(HashMap::new()),
        }
    }
}

impl ReviewMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_review(&self, status: ReviewStatus, elapsed: Duration) {
        self.reviews.fetch_add(1, Ordering::Relaxed);
        let counter = match status {
            ReviewStatus::Generated => &self.generated,
            ReviewStatus::Cached => &self.cached,
            ReviewStatus::Failed => &self.failed,
            ReviewStatus::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        push_sample(&mut self.review_ms.lock(), elapsed);
    }

    /// One provider call, successful or not.
    pub fn record_provider_call(&self, provider: &str, succeeded: bool, elapsed: Duration) {
        let mut providers = self.providers.lock();
        let tally = providers.entry(provider.to_string()).or_default();
        if succeeded {
            tally.successes += 1;
        } else {
            tally.failures += 1;
        }
        push_sample(&mut tally.generation_ms, elapsed);
    }

    pub fn record_quota_rejection(&self) {
        self.quota_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.reviews.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let review_ms: Vec<u64> = self.review_ms.lock().iter().copied().collect();

        let providers = self
            .providers
            .lock()
            .iter()
            .map(|(name, tally)| {
                let samples: Vec<u64> = tally.generation_ms.iter().copied().collect();
                let calls = tally.successes + tally.failures;
                let stats = ProviderStats {
                    successes: tally.successes,
                    failures: tally.failures,
                    success_rate: percentage(tally.successes, calls),
                    avg_generation_ms: mean(&samples),
                    p95_generation_ms: percentile(&samples, 95),
                };
                (name.clone(), stats)
            })
            .collect();

        MetricsSnapshot {
            total_reviews: total,
            generated: self.generated.load(Ordering::Relaxed),
            cache_hits: self.cached.load(Ordering::Relaxed),
            failed,
            cancelled: self.cancelled.load(Ordering::Relaxed),
            error_rate: percentage(failed, total),
            quota_rejections: self.quota_rejections.load(Ordering::Relaxed),
            avg_review_ms: mean(&review_ms),
            p50_review_ms: percentile(&review_ms, 50),
            p95_review_ms: percentile(&review_ms, 95),
            p99_review_ms: percentile(&review_ms, 99),
            providers,
            uptime_secs: self.started.elapsed().as_secs(),
            timestamp: Utc::now(),
        }
    }

    /// Zeroes every counter and drops all samples. Uptime is kept.
    pub fn reset(&self) {
        for counter in [
            &self.reviews,
            &self.generated,
            &self.cached,
            &self.failed,
            &self.cancelled,
            &self.quota_rejections,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.review_ms.lock().clear();
        self.providers.lock().clear();
    }
}

fn push_sample(samples: &mut VecDeque<u64>, elapsed: Duration) {
    if samples.len() == SAMPLE_WINDOW {
        samples.pop_front();
    }
    samples.push_back(elapsed.as_millis() as u64);
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn mean(samples: &[u64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<u64>() as f64 / samples.len() as f64
    }
}

/// Nearest-rank percentile; 0 for an empty series.
fn percentile(samples: &[u64], pct: u32) -> u64 {
    if samples.is_empty() {
        return 0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let rank = (pct as f64 / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
