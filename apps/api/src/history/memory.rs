use std::collections::{HashMap, VecDeque};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::history::{HistoryStore, HistoryVersion, NewHistoryVersion};

/// Per-owner deques, newest at the front.
pub struct MemoryHistoryStore {
    by_owner: RwLock<HashMap<String, VecDeque<HistoryVersion>>>,
    limit: usize,
}

impl MemoryHistoryStore {
    pub fn new(limit: usize) -> Self {
        Self {
            by_owner: RwLock::new(HashMap::new()),
            limit: limit.max(1),
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, entry: NewHistoryVersion) -> Result<HistoryVersion> {
        let (resume_hash, job_hash) = entry.hashes();
        let mut by_owner = self.by_owner.write();
        let versions = by_owner.entry(entry.owner.clone()).or_default();

        let prior = versions
            .iter()
            .filter(|v| v.meta.resume_hash == resume_hash && v.meta.job_hash == job_hash)
            .count();
        let version = entry.into_version(prior as i32 + 1);

        versions.push_front(version.clone());
        versions.truncate(self.limit);
        Ok(version)
    }

    async fn list(&self, owner: &str) -> Result<Vec<HistoryVersion>> {
        Ok(self
            .by_owner
            .read()
            .get(owner)
            .map(|versions| versions.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, id: Uuid) -> Result<Option<HistoryVersion>> {
        Ok(self
            .by_owner
            .read()
            .values()
            .flat_map(|versions| versions.iter())
            .find(|v| v.id == id)
            .cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut by_owner = self.by_owner.write();
        for versions in by_owner.values_mut() {
            if let Some(pos) = versions.iter().position(|v| v.id == id) {
                versions.remove(pos);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::fixtures::entry;

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let store = MemoryHistoryStore::new(10);
        let first = store.append(entry("alice", "resume one")).await.unwrap();
        let second = store.append(entry("alice", "resume two")).await.unwrap();

        let ids: Vec<Uuid> = store.list("alice").await.unwrap().iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert!(store.list("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_bounded_per_owner() {
        let store = MemoryHistoryStore::new(3);
        for i in 0..5 {
            store.append(entry("alice", &format!("resume {i}"))).await.unwrap();
        }
        store.append(entry("bob", "resume")).await.unwrap();

        let alice = store.list("alice").await.unwrap();
        assert_eq!(alice.len(), 3);
        assert_eq!(alice[0].request.resume, "resume 4");
        assert_eq!(store.list("bob").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_version_counts_same_inputs_per_owner() {
        let store = MemoryHistoryStore::new(10);
        let v1 = store.append(entry("alice", "same resume")).await.unwrap();
        let v2 = store.append(entry("alice", "Same Resume ")).await.unwrap();
        let other = store.append(entry("alice", "different resume")).await.unwrap();
        let bob = store.append(entry("bob", "same resume")).await.unwrap();

        assert_eq!(v1.meta.version, 1);
        assert_eq!(v2.meta.version, 2);
        assert_eq!(other.meta.version, 1);
        assert_eq!(bob.meta.version, 1);
        assert_eq!(v1.meta.resume_hash, v2.meta.resume_hash);
    }

    #[tokio::test]
    async fn test_get_and_delete_by_id() {
        let store = MemoryHistoryStore::new(10);
        let saved = store.append(entry("alice", "resume")).await.unwrap();
        assert_eq!(store.get(saved.id).await.unwrap().unwrap().id, saved.id);
        assert!(store.delete(saved.id).await.unwrap());
        assert!(store.get(saved.id).await.unwrap().is_none());
        assert!(!store.delete(saved.id).await.unwrap());
    }
}
