use std::str::FromStr;

use anyhow::{Context, Result};

use crate::llm_client::{gemini, huggingface};

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing or a value does not parse.
#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_base_url: String,
    /// Enables the fallback provider when set.
    pub huggingface_api_token: Option<String>,
    pub huggingface_model: String,
    pub huggingface_base_url: String,
    /// History goes to PostgreSQL when set, otherwise stays in process.
    pub database_url: Option<String>,
    /// Quota counters go to Redis when set, otherwise stay in process.
    pub redis_url: Option<String>,
    pub port: u16,
    pub rust_log: String,

    pub quota_limit: u32,
    pub quota_window_secs: u64,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub history_limit: usize,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter_ms: u64,
    pub chunk_timeout_secs: u64,
    pub provider_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            gemini_api_key: require_env("GEMINI_API_KEY")?,
            gemini_model: env_or("GEMINI_MODEL", gemini::DEFAULT_MODEL.to_string())?,
            gemini_base_url: env_or("GEMINI_BASE_URL", gemini::DEFAULT_BASE_URL.to_string())?,
            huggingface_api_token: optional_env("HUGGINGFACE_API_TOKEN"),
            huggingface_model: env_or("HUGGINGFACE_MODEL", huggingface::DEFAULT_MODEL.to_string())?,
            huggingface_base_url: env_or(
                "HUGGINGFACE_BASE_URL",
                huggingface::DEFAULT_BASE_URL.to_string(),
            )?,
            database_url: optional_env("DATABASE_URL"),
            redis_url: optional_env("REDIS_URL"),
            port: env_or("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),

            quota_limit: env_or("QUOTA_LIMIT", 10)?,
            quota_window_secs: env_or("QUOTA_WINDOW_SECS", 24 * 60 * 60)?,
            cache_capacity: env_or("CACHE_CAPACITY", 10)?,
            cache_ttl_secs: env_or("CACHE_TTL_SECS", 7 * 24 * 60 * 60)?,
            history_limit: env_or("HISTORY_LIMIT", 10)?,
            retry_max_attempts: env_or("RETRY_MAX_ATTEMPTS", 3)?,
            retry_base_delay_ms: env_or("RETRY_BASE_DELAY_MS", 1_000)?,
            retry_max_delay_ms: env_or("RETRY_MAX_DELAY_MS", 10_000)?,
            retry_jitter_ms: env_or("RETRY_JITTER_MS", 1_000)?,
            chunk_timeout_secs: env_or("STREAM_CHUNK_TIMEOUT_SECS", 30)?,
            provider_timeout_secs: env_or("PROVIDER_TIMEOUT_SECS", 120)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Unset and blank both count as absent.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value '{raw}'")),
        None => Ok(default),
    }
}
