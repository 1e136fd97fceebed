use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::history::{HistoryMeta, HistoryStore, HistoryVersion, NewHistoryVersion, ReviewSnapshot};
use crate::models::review::ReviewRequest;

const SELECT_COLUMNS: &str = r#"
    SELECT id, owner, created_at, request, response, optimization_mode,
           resume_hash, job_hash, version, cached, provider
    FROM review_versions
"#;

#[derive(Debug, FromRow)]
struct VersionRow {
    id: Uuid,
    owner: String,
    created_at: DateTime<Utc>,
    request: Json<ReviewRequest>,
    response: Json<ReviewSnapshot>,
    optimization_mode: String,
    resume_hash: String,
    job_hash: String,
    version: i32,
    cached: bool,
    provider: String,
}

impl TryFrom<VersionRow> for HistoryVersion {
    type Error = anyhow::Error;

    fn try_from(row: VersionRow) -> Result<Self> {
        let optimization_mode = row
            .optimization_mode
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .with_context(|| format!("Corrupt history row {}", row.id))?;
        Ok(HistoryVersion {
            id: row.id,
            owner: row.owner,
            created_at: row.created_at,
            request: row.request.0,
            response: row.response.0,
            meta: HistoryMeta {
                optimization_mode,
                resume_hash: row.resume_hash,
                job_hash: row.job_hash,
                version: row.version,
                cached: row.cached,
                provider: row.provider,
            },
        })
    }
}

/// History in the `review_versions` table. Rows are never updated; the
/// per-owner bound is enforced by deleting the oldest rows after each insert.
pub struct PgHistoryStore {
    pool: PgPool,
    limit: usize,
}

impl PgHistoryStore {
    pub fn new(pool: PgPool, limit: usize) -> Self {
        Self {
            pool,
            limit: limit.max(1),
        }
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn append(&self, entry: NewHistoryVersion) -> Result<HistoryVersion> {
        let (resume_hash, job_hash) = entry.hashes();
        let mut tx = self.pool.begin().await?;

        let prior: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM review_versions WHERE owner = $1 AND resume_hash = $2 AND job_hash = $3",
        )
        .bind(&entry.owner)
        .bind(&resume_hash)
        .bind(&job_hash)
        .fetch_one(&mut *tx)
        .await?;

        let version = entry.into_version(prior as i32 + 1);

        sqlx::query(
            r#"
            INSERT INTO review_versions
                (id, owner, created_at, request, response, optimization_mode,
                 resume_hash, job_hash, version, cached, provider)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(version.id)
        .bind(&version.owner)
        .bind(version.created_at)
        .bind(Json(&version.request))
        .bind(Json(&version.response))
        .bind(version.meta.optimization_mode.as_str())
        .bind(&version.meta.resume_hash)
        .bind(&version.meta.job_hash)
        .bind(version.meta.version)
        .bind(version.meta.cached)
        .bind(&version.meta.provider)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM review_versions
            WHERE owner = $1
              AND id NOT IN (
                  SELECT id FROM review_versions
                  WHERE owner = $1
                  ORDER BY created_at DESC, id DESC
                  LIMIT $2
              )
            "#,
        )
        .bind(&version.owner)
        .bind(self.limit as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(version)
    }

    async fn list(&self, owner: &str) -> Result<Vec<HistoryVersion>> {
        let rows: Vec<VersionRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE owner = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HistoryVersion::try_from).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<HistoryVersion>> {
        let row: Option<VersionRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(HistoryVersion::try_from).transpose()
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM review_versions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
