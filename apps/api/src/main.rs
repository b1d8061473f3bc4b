use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use loom_api::config::Config;
use loom_api::db::create_pool;
use loom_api::llm_client::LlmClient;
use loom_api::pipeline::scoring::KeywordCompatibilityScorer;
use loom_api::quota::engine::RateLimitEngine;
use loom_api::quota::ledger::PgUsageLedger;
use loom_api::quota::rules::PgQuotaRuleStore;
use loom_api::queue::store::PgJobQueue;
use loom_api::results::{ArtifactStore, PgResultStore};
use loom_api::routes::build_router;
use loom_api::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("loom_api={}", &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Loom API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized");

    // Initialize LLM client
    let llm = LlmClient::new(config.anthropic_api_key.clone())?;
    info!("LLM client initialized (model: {})", loom_api::llm_client::MODEL);

    // Rate-limit engine: Postgres rules + ledger behind the bounded cache
    let engine = Arc::new(RateLimitEngine::new(
        Arc::new(PgQuotaRuleStore::new(db.clone())),
        Arc::new(PgUsageLedger::new(db.clone())),
        Duration::from_secs(config.usage_cache_ttl_secs),
    ));

    let queue = Arc::new(PgJobQueue::new(
        db.clone(),
        Duration::from_secs(config.retry_backoff_secs),
    ));
    let results = Arc::new(PgResultStore::new(db.clone()));
    let artifacts = ArtifactStore::new(s3, config.s3_bucket.clone());

    // Build app state
    let state = AppState {
        db,
        engine,
        queue,
        results,
        artifacts,
        llm,
        scorer: Arc::new(KeywordCompatibilityScorer),
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "loom-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
