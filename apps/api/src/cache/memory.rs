use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::{CacheStats, CacheStore, CachedReview};

struct Slot {
    value: CachedReview,
    expires_at: Instant,
}

struct Inner {
    entries: LruCache<String, Slot>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// In-process LRU cache with a fixed TTL per entry.
pub struct MemoryCacheStore {
    inner: Mutex<Inner>,
    capacity: NonZeroUsize,
    ttl: Duration,
}

impl MemoryCacheStore {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            capacity,
            ttl,
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Option<CachedReview> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let expired = match inner.entries.get(key) {
            Some(slot) if slot.expires_at > Instant::now() => {
                let value = slot.value.clone();
                inner.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.pop(key);
            inner.evictions += 1;
            debug!(key, "Evicted expired cache entry");
        }
        inner.misses += 1;
        None
    }

    async fn set(&self, key: &str, value: CachedReview) {
        let slot = Slot {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some((evicted, _)) = inner.entries.push(key.to_string(), slot) {
            if evicted != key {
                inner.evictions += 1;
                debug!(key = %evicted, "Evicted least recently used cache entry");
            }
        }
    }

    async fn evict(&self, key: &str) -> bool {
        self.inner.lock().entries.pop(key).is_some()
    }

    async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let created = || inner.entries.iter().map(|(_, slot)| slot.value.created_at);
        let oldest_entry = created().min();
        let newest_entry = created().max();
        CacheStats {
            entries: inner.entries.len(),
            capacity: self.capacity.get(),
            ttl_secs: self.ttl.as_secs(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            oldest_entry,
            newest_entry,
        }
    }
}
