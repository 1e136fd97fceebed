mod cache;
mod config;
mod db;
mod errors;
mod generation;
mod history;
mod intake;
mod llm_client;
mod metrics;
mod models;
mod routes;
mod state;
mod validation;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cache::memory::MemoryCacheStore;
use crate::cache::CacheStore;
use crate::config::Config;
use crate::db::{create_pool, ensure_schema};
use crate::generation::orchestrator::Orchestrator;
use crate::generation::retry::RetryPolicy;
use crate::history::memory::MemoryHistoryStore;
use crate::history::postgres::PgHistoryStore;
use crate::history::HistoryStore;
use crate::intake::admission::{AdmissionController, MemoryQuotaStore, QuotaStore, RedisQuotaStore};
use crate::llm_client::gemini::GeminiProvider;
use crate::llm_client::huggingface::HuggingFaceProvider;
use crate::llm_client::TextProvider;
use crate::metrics::ReviewMetrics;
use crate::routes::build_router;
use crate::state::AppState;
use crate::validation::ValidationPipeline;

const QUOTA_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting review API v{}", env!("CARGO_PKG_VERSION"));

    // Quota store: Redis when configured
    let quota_store: Arc<dyn QuotaStore> = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            info!("Quota counters in Redis");
            Arc::new(RedisQuotaStore::new(client))
        }
        None => {
            info!("Quota counters in process");
            Arc::new(MemoryQuotaStore::new())
        }
    };
    let admission = AdmissionController::new(
        quota_store,
        config.quota_limit,
        Duration::from_secs(config.quota_window_secs),
    );
    info!(
        "Quota: {} reviews per {}s window",
        admission.limit(),
        config.quota_window_secs
    );

    // History store: PostgreSQL when configured
    let history: Arc<dyn HistoryStore> = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url).await?;
            ensure_schema(&pool).await?;
            Arc::new(PgHistoryStore::new(pool, config.history_limit))
        }
        None => {
            info!("History kept in process (limit {})", config.history_limit);
            Arc::new(MemoryHistoryStore::new(config.history_limit))
        }
    };

    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new(
        config.cache_capacity,
        Duration::from_secs(config.cache_ttl_secs),
    ));

    // Providers
    let primary: Arc<dyn TextProvider> = Arc::new(GeminiProvider::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
        config.gemini_base_url.clone(),
        Duration::from_secs(config.provider_timeout_secs),
    ));
    info!("Primary provider: gemini (model: {})", config.gemini_model);

    let secondary: Option<Arc<dyn TextProvider>> = match &config.huggingface_api_token {
        Some(token) => {
            info!("Fallback provider: huggingface (model: {})", config.huggingface_model);
            Some(Arc::new(HuggingFaceProvider::new(
                token.clone(),
                config.huggingface_model.clone(),
                config.huggingface_base_url.clone(),
                Duration::from_secs(config.provider_timeout_secs),
            )))
        }
        None => {
            warn!("HUGGINGFACE_API_TOKEN not set; running without a fallback provider");
            None
        }
    };

    let retry = RetryPolicy {
        max_attempts: config.retry_max_attempts.max(1),
        base_delay: Duration::from_millis(config.retry_base_delay_ms),
        max_delay: Duration::from_millis(config.retry_max_delay_ms),
        jitter: Duration::from_millis(config.retry_jitter_ms),
    };
    let validation = ValidationPipeline::with_defaults();
    info!("Validators: {}", validation.names().join(", "));

    let metrics = Arc::new(ReviewMetrics::new());
    let orchestrator = Orchestrator::new(primary, secondary, cache.clone(), history.clone(), validation)
        .with_retry_policy(retry)
        .with_chunk_timeout(Duration::from_secs(config.chunk_timeout_secs))
        .with_metrics(metrics.clone());

    let purge = admission.spawn_purge_task(QUOTA_PURGE_INTERVAL);

    // Build app state
    let state = AppState {
        admission,
        orchestrator: Arc::new(orchestrator),
        cache,
        history,
        metrics,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the web client has a fixed domain

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    purge.abort();
    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
