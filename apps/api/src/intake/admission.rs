//! Admission Controller: fixed-window request quota per caller key.
//!
//! The counter store is pluggable: `MemoryQuotaStore` for a single process,
//! `RedisQuotaStore` when several API instances share one quota.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Counter state after one hit.
#[derive(Debug, Clone, Copy)]
pub struct WindowHit {
    /// Requests seen in the current window, including this one.
    pub count: u32,
    /// Time left until the window resets.
    pub resets_in: Duration,
}

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Atomically counts one request for `key`, opening a new window when the
    /// previous one has expired.
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowHit>;

    /// Drops windows that have expired. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-process store
// ────────────────────────────────────────────────────────────────────────────

struct Window {
    count: u32,
    expires_at: Instant,
}

#[derive(Default)]
pub struct MemoryQuotaStore {
    windows: DashMap<String, Window>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowHit> {
        let now = Instant::now();
        // The entry guard holds the shard lock, so reset + increment is atomic per key.
        let mut entry = self.windows.entry(key.to_string()).or_insert_with(|| Window {
            count: 0,
            expires_at: now + window,
        });
        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + window;
        }
        entry.count += 1;

        Ok(WindowHit {
            count: entry.count,
            resets_in: entry.expires_at.saturating_duration_since(now),
        })
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, w| w.expires_at > now);
        Ok(before.saturating_sub(self.windows.len()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Redis store
// ────────────────────────────────────────────────────────────────────────────

const HIT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
return {count, ttl}
"#;

pub struct RedisQuotaStore {
    client: redis::Client,
    script: redis::Script,
}

impl RedisQuotaStore {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            script: redis::Script::new(HIT_SCRIPT),
        }
    }
}

#[async_trait]
impl QuotaStore for RedisQuotaStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowHit> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;

        let (count, ttl_ms): (u32, i64) = self
            .script
            .key(format!("review_quota:{key}"))
            .arg(window.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .context("Quota script failed")?;

        let resets_in = if ttl_ms > 0 {
            Duration::from_millis(ttl_ms as u64)
        } else {
            window
        };
        Ok(WindowHit { count, resets_in })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Controller
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl QuotaDecision {
    /// Whole seconds until the window resets, at least 1.
    pub fn retry_after_secs(&self) -> u64 {
        (self.reset_at - Utc::now()).num_seconds().max(1) as u64
    }
}

#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn QuotaStore>,
    limit: u32,
    window: Duration,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn QuotaStore>, limit: u32, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Counts one request for `key`. A store failure admits the request.
    pub async fn check(&self, key: &str) -> QuotaDecision {
        match self.store.hit(key, self.window).await {
            Ok(hit) => {
                let allowed = hit.count <= self.limit;
                if !allowed {
                    debug!(key, count = hit.count, "Quota exhausted");
                }
                QuotaDecision {
                    allowed,
                    limit: self.limit,
                    remaining: self.limit.saturating_sub(hit.count),
                    reset_at: reset_at(hit.resets_in),
                }
            }
            Err(e) => {
                warn!("Quota store unavailable, admitting request: {e:#}");
                QuotaDecision {
                    allowed: true,
                    limit: self.limit,
                    remaining: self.limit,
                    reset_at: reset_at(self.window),
                }
            }
        }
    }

    /// Periodically purges expired windows until the runtime shuts down.
    pub fn spawn_purge_task(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.purge_expired().await {
                    Ok(0) => {}
                    Ok(n) => info!("Purged {n} expired quota windows"),
                    Err(e) => warn!("Quota purge failed: {e:#}"),
                }
            }
        })
    }
}

fn reset_at(resets_in: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(resets_in).unwrap_or_else(|_| chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStore;

    #[async_trait]
    impl QuotaStore for FailingStore {
        async fn hit(&self, _key: &str, _window: Duration) -> Result<WindowHit> {
            anyhow::bail!("connection refused")
        }
    }

    fn controller(limit: u32, window: Duration) -> (AdmissionController, Arc<MemoryQuotaStore>) {
        let store = Arc::new(MemoryQuotaStore::new());
        (AdmissionController::new(store.clone(), limit, window), store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_plus_one_is_rejected() {
        let (admission, _) = controller(10, Duration::from_secs(86_400));
        for i in 0..10 {
            let decision = admission.check("10.0.0.1").await;
            assert!(decision.allowed, "request {i} should be admitted");
            assert_eq!(decision.remaining, 9 - i);
        }
        let decision = admission.check("10.0.0.1").await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(decision.retry_after_secs() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reset_readmits_full_quota() {
        let window = Duration::from_secs(86_400);
        let (admission, _) = controller(3, window);
        for _ in 0..4 {
            admission.check("k").await;
        }
        assert!(!admission.check("k").await.allowed);

        tokio::time::advance(window + Duration::from_secs(1)).await;

        for _ in 0..3 {
            assert!(admission.check("k").await.allowed);
        }
        assert!(!admission.check("k").await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_counted_independently() {
        let (admission, _) = controller(1, Duration::from_secs(60));
        assert!(admission.check("a").await.allowed);
        assert!(admission.check("b").await.allowed);
        assert!(!admission.check("a").await.allowed);
    }

    #[tokio::test]
    async fn test_concurrent_hits_on_one_key_are_all_counted() {
        let (admission, _) = controller(50, Duration::from_secs(60));
        let mut handles = Vec::new();
        for _ in 0..60 {
            let admission = admission.clone();
            handles.push(tokio::spawn(async move { admission.check("shared").await }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_drops_expired_windows() {
        let (admission, store) = controller(5, Duration::from_secs(10));
        admission.check("old").await;
        tokio::time::advance(Duration::from_secs(11)).await;
        admission.check("fresh").await;

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.windows.len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_admits_request() {
        let admission = AdmissionController::new(Arc::new(FailingStore), 10, Duration::from_secs(60));
        let decision = admission.check("k").await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 10);
    }
}
