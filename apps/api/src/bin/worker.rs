//! Worker binary — claims generation jobs, runs the pipeline, and hosts the
//! result-expiry sweep. Safe to run alongside other worker processes: the
//! queue claim is a database-level conditional update.

use std::sync::Arc;
use std::time::Duration;

use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use tracing_subscriber::EnvFilter;

use loom_api::config::Config;
use loom_api::db;
use loom_api::llm_client::LlmClient;
use loom_api::pipeline::content_selection::ContentSelector;
use loom_api::pipeline::orchestrator::GenerationPipeline;
use loom_api::pipeline::render::RendererPool;
use loom_api::pipeline::scoring::KeywordCompatibilityScorer;
use loom_api::quota::engine::RateLimitEngine;
use loom_api::quota::ledger::PgUsageLedger;
use loom_api::quota::rules::PgQuotaRuleStore;
use loom_api::queue::store::PgJobQueue;
use loom_api::results::{ArtifactStore, PgResultStore, ResultStore};
use loom_api::worker::{run_purge_sweep, run_worker_pool, WorkerContext};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting loom generation worker");

    // Load configuration
    let config = Config::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize S3
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
    let s3 = aws_sdk_s3::Client::new(&s3_config);
    let artifacts = ArtifactStore::new(s3, config.s3_bucket.clone());

    // Initialize LLM client
    let llm = LlmClient::new(config.anthropic_api_key.clone())
        .expect("Failed to initialize LLM client");

    // Renderer pool — built eagerly so startup cost is paid before the
    // first claim.
    tracing::info!(size = config.renderer_pool_size, "Building renderer pool");
    let renderers =
        RendererPool::new(config.renderer_pool_size).expect("Failed to build renderer pool");

    let engine = Arc::new(RateLimitEngine::new(
        Arc::new(PgQuotaRuleStore::new(pool.clone())),
        Arc::new(PgUsageLedger::new(pool.clone())),
        Duration::from_secs(config.usage_cache_ttl_secs),
    ));
    let queue = Arc::new(PgJobQueue::new(
        pool.clone(),
        Duration::from_secs(config.retry_backoff_secs),
    ));
    let results: Arc<dyn ResultStore> = Arc::new(PgResultStore::new(pool.clone()));

    let pipeline = GenerationPipeline::new(
        ContentSelector::new(pool.clone(), artifacts.clone()),
        llm,
        Arc::new(KeywordCompatibilityScorer),
        renderers,
        artifacts,
        config.render_mode,
    );

    // Result-expiry sweep runs independently of job traffic.
    tokio::spawn(run_purge_sweep(Arc::clone(&results)));

    let ctx = Arc::new(WorkerContext {
        queue,
        engine,
        pipeline,
    });

    tracing::info!(workers = config.worker_count, "Worker ready, starting job processing");
    run_worker_pool(ctx, config.worker_count).await;
}
