use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::llm_client::LlmClient;
use crate::pipeline::scoring::CompatibilityScorer;
use crate::queue::store::JobQueue;
use crate::quota::engine::RateLimitEngine;
use crate::results::{ArtifactStore, ResultStore};

/// Shared application state injected into all route handlers via Axum
/// extractors. Repositories are trait objects wired by the composition root
/// in `main` — no handler knows which storage engine sits behind them.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub engine: Arc<RateLimitEngine>,
    pub queue: Arc<dyn JobQueue>,
    pub results: Arc<dyn ResultStore>,
    pub artifacts: ArtifactStore,
    pub llm: LlmClient,
    /// Pluggable compatibility scorer for the synchronous scoring endpoint.
    pub scorer: Arc<dyn CompatibilityScorer>,
    pub config: Config,
}
