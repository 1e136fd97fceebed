use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Creates and returns a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Creates the history table and its owner index if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_versions (
            id                UUID PRIMARY KEY,
            owner             TEXT NOT NULL,
            created_at        TIMESTAMPTZ NOT NULL,
            request           JSONB NOT NULL,
            response          JSONB NOT NULL,
            optimization_mode TEXT NOT NULL,
            resume_hash       TEXT NOT NULL,
            job_hash          TEXT NOT NULL,
            version           INTEGER NOT NULL,
            cached            BOOLEAN NOT NULL DEFAULT FALSE,
            provider          TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create review_versions table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS review_versions_owner_created_idx \
         ON review_versions (owner, created_at DESC)",
    )
    .execute(pool)
    .await
    .context("Failed to create review_versions index")?;

    info!("History schema ready");
    Ok(())
}
