//! Result Cache: content-addressed store of finished reviews.
//!
//! Keys are derived from the normalized (resume, job description) pair, so an
//! identical pair never reaches a provider twice while the entry is live.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::review::ParsedReview;

/// Bumped when the cached value shape changes.
const KEY_VERSION: &str = "v1";

/// Stored value: the raw parse plus how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedReview {
    pub sections: ParsedReview,
    pub provider: String,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Live entry for `key`. Expired entries are dropped on read.
    async fn get(&self, key: &str) -> Option<CachedReview>;

    /// Inserts or replaces, evicting the least recently used entry when full.
    async fn set(&self, key: &str, value: CachedReview);

    async fn evict(&self, key: &str) -> bool;

    async fn stats(&self) -> CacheStats;
}

/// `v1_` + hex SHA-256 of the trimmed, lowercased pair joined by `|`.
pub fn cache_key(resume: &str, job_description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resume.trim().to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(job_description.trim().to_lowercase().as_bytes());
    format!("{KEY_VERSION}_{:x}", hasher.finalize())
}

/// Short content hash used to group history versions of the same input.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.trim().to_lowercase().as_bytes());
    format!("{digest:x}")[..16].to_string()
}
