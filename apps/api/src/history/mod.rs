//! History Store: append-only, newest-first record of each caller's reviews.
//!
//! Every successful review (fresh or cached) appends one version. Versions
//! are only removed by an ownership-checked delete or by the per-owner bound.

pub mod handlers;
pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::content_hash;
use crate::errors::AppError;
use crate::models::review::{OptimizationMode, ParsedReview, ReviewRequest, ValidationReport};

/// Derived metadata used to group and label versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMeta {
    pub optimization_mode: OptimizationMode,
    pub resume_hash: String,
    pub job_hash: String,
    /// 1 + number of the owner's earlier versions for the same resume and job.
    pub version: i32,
    pub cached: bool,
    pub provider: String,
}

/// The stored response: display-ready sections plus the validation report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSnapshot {
    pub sections: ParsedReview,
    pub validation: ValidationReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryVersion {
    pub id: Uuid,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub request: ReviewRequest,
    pub response: ReviewSnapshot,
    pub meta: HistoryMeta,
}

/// What the orchestrator hands over; the store assigns id, time and version.
#[derive(Debug, Clone)]
pub struct NewHistoryVersion {
    pub owner: String,
    pub request: ReviewRequest,
    pub response: ReviewSnapshot,
    pub provider: String,
    pub cached: bool,
}

impl NewHistoryVersion {
    pub(crate) fn into_version(self, version: i32) -> HistoryVersion {
        let meta = HistoryMeta {
            optimization_mode: self.request.optimization_mode,
            resume_hash: content_hash(&self.request.resume),
            job_hash: content_hash(&self.request.job_description),
            version,
            cached: self.cached,
            provider: self.provider,
        };
        HistoryVersion {
            id: Uuid::new_v4(),
            owner: self.owner,
            created_at: Utc::now(),
            request: self.request,
            response: self.response,
            meta,
        }
    }

    pub(crate) fn hashes(&self) -> (String, String) {
        (
            content_hash(&self.request.resume),
            content_hash(&self.request.job_description),
        )
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends a version and trims the owner's history to the configured bound.
    async fn append(&self, entry: NewHistoryVersion) -> Result<HistoryVersion>;

    /// The owner's versions, newest first.
    async fn list(&self, owner: &str) -> Result<Vec<HistoryVersion>>;

    async fn get(&self, id: Uuid) -> Result<Option<HistoryVersion>>;

    /// Returns false when no version had this id.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

/// Loads a version on behalf of `owner`.
pub async fn restore(store: &dyn HistoryStore, id: Uuid, owner: &str) -> Result<HistoryVersion, AppError> {
    let version = store
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("History version {id} not found")))?;
    if version.owner != owner {
        return Err(AppError::Forbidden);
    }
    Ok(version)
}

/// Deletes a version on behalf of `owner`.
pub async fn remove(store: &dyn HistoryStore, id: Uuid, owner: &str) -> Result<(), AppError> {
    restore(store, id, owner).await?;
    if !store.delete(id).await? {
        return Err(AppError::NotFound(format!("History version {id} not found")));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde_json::json;

    pub fn entry(owner: &str, resume: &str) -> NewHistoryVersion {
        let mut validation = ValidationReport::new();
        validation.insert("structure".into(), json!({"correct_order": true}));
        NewHistoryVersion {
            owner: owner.to_string(),
            request: ReviewRequest {
                resume: resume.to_string(),
                job_description: "QA automation engineer for payments".to_string(),
                target_role: None,
                industry: None,
                optimization_mode: OptimizationMode::Balanced,
                user_instructions: None,
            },
            response: ReviewSnapshot {
                sections: ParsedReview {
                    cover_letter: "Dear team".to_string(),
                    ..ParsedReview::default()
                },
                validation,
            },
            provider: "gemini".to_string(),
            cached: false,
        }
    }
}
