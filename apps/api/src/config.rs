use anyhow::{Context, Result};

use crate::pipeline::render::RenderMode;

/// Application configuration loaded from environment variables.
/// Shared by the `api` and `worker` binaries; each reads the subset it needs.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    /// Number of concurrent worker tasks pulling from the job queue.
    pub worker_count: usize,
    /// Number of pooled renderer instances. Renderer startup dominates job
    /// cost, so instances are built once and reused.
    pub renderer_pool_size: usize,
    /// Attempt budget per job before it goes terminally failed.
    pub max_attempts: i32,
    /// Base delay for the retry backoff (doubles per attempt).
    pub retry_backoff_secs: u64,
    pub usage_cache_ttl_secs: u64,
    pub render_mode: RenderMode,
    /// Poll interval suggested to clients on submission.
    pub poll_interval_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: parsed_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            worker_count: parsed_env("WORKER_COUNT", 4)?,
            renderer_pool_size: parsed_env("RENDERER_POOL_SIZE", 2)?,
            max_attempts: parsed_env("MAX_ATTEMPTS", 3)?,
            retry_backoff_secs: parsed_env("RETRY_BACKOFF_SECS", 30)?,
            usage_cache_ttl_secs: parsed_env("USAGE_CACHE_TTL_SECS", 300)?,
            render_mode: std::env::var("RENDER_MODE")
                .unwrap_or_else(|_| "pdf".to_string())
                .parse()
                .map_err(|e: String| anyhow::anyhow!("RENDER_MODE: {e}"))?,
            poll_interval_ms: parsed_env("POLL_INTERVAL_MS", 2000)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value")),
        Err(_) => Ok(default),
    }
}
