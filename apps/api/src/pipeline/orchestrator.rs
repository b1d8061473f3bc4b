//! Pipeline orchestration — runs the six stages in order for one claimed
//! job and packages the outcome into a result record.
//!
//! Every stage runs under its own timeout and every failure is caught and
//! typed; nothing escapes past this boundary, so a worker can always turn
//! the outcome into exactly one `succeed` or `fail` on the queue. Stages
//! are never retried in place — the queue's retry loop re-runs the whole
//! pipeline from content selection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::identity::IdentityKind;
use crate::llm_client::LlmClient;
use crate::pipeline::content_selection::ContentSelector;
use crate::pipeline::jd_analysis::analyze_job_description;
use crate::pipeline::optimizer::optimize_content;
use crate::pipeline::render::{DocumentArtifact, RenderMode, RendererPool};
use crate::pipeline::scoring::{CompatibilityReport, CompatibilityScorer};
use crate::pipeline::{StageError, StageKind, StageTimings};
use crate::queue::job::QueueJob;
use crate::results::{ArtifactStore, NewGenerationResult};

// Per-stage wall-clock budgets. Network-bound stages are the tightest
// relative to their expected latency; timeouts surface as retryable
// failures to the queue.
const SELECT_TIMEOUT: Duration = Duration::from_secs(20);
const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(60);
const OPTIMIZE_TIMEOUT: Duration = Duration::from_secs(150);
const RENDER_TIMEOUT: Duration = Duration::from_secs(90);
const SCORE_TIMEOUT: Duration = Duration::from_secs(20);
const PACKAGE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct GenerationPipeline {
    selector: ContentSelector,
    llm: LlmClient,
    scorer: Arc<dyn CompatibilityScorer>,
    renderers: RendererPool,
    artifacts: ArtifactStore,
    render_mode: RenderMode,
}

impl GenerationPipeline {
    pub fn new(
        selector: ContentSelector,
        llm: LlmClient,
        scorer: Arc<dyn CompatibilityScorer>,
        renderers: RendererPool,
        artifacts: ArtifactStore,
        render_mode: RenderMode,
    ) -> Self {
        Self {
            selector,
            llm,
            scorer,
            renderers,
            artifacts,
            render_mode,
        }
    }

    /// Runs the full stage sequence for a claimed job. The returned record
    /// is persisted by the caller inside the queue's completion transaction.
    pub async fn run(&self, job: &QueueJob) -> Result<NewGenerationResult, StageError> {
        let mut timings = StageTimings::default();

        // A payload that does not parse will not parse on the next attempt
        // either.
        let payload = job.payload().map_err(|e| {
            StageError::unrecoverable(StageKind::ContentSelection, format!("malformed payload: {e}"))
        })?;

        // 1. Content selection
        let selected = run_stage(
            &mut timings,
            StageKind::ContentSelection,
            SELECT_TIMEOUT,
            self.selector.select(
                &job.identity_key,
                job.identity_kind() == IdentityKind::Registered,
                &payload.content,
            ),
        )
        .await?;
        info!(job_id = %job.id, origin = selected.origin, "Source content selected");

        // 2. Job analysis
        let analysis = run_stage(
            &mut timings,
            StageKind::JobAnalysis,
            ANALYSIS_TIMEOUT,
            analyze_job_description(&payload.job_description, &self.llm),
        )
        .await?;
        info!(
            job_id = %job.id,
            keywords = analysis.keyword_inventory.len(),
            tone = ?analysis.detected_tone,
            "Job description analyzed"
        );

        // 3. Content optimization
        let outcome = run_stage(
            &mut timings,
            StageKind::ContentOptimization,
            OPTIMIZE_TIMEOUT,
            optimize_content(&selected.text, &analysis, &self.llm),
        )
        .await?;
        info!(
            job_id = %job.id,
            keywords_added = outcome.metrics.keywords_added,
            confidence = outcome.metrics.confidence,
            "Content optimized"
        );

        // 4. Document rendering — holds a pooled renderer; checkout wait
        // counts against the stage budget.
        let artifact = run_stage(
            &mut timings,
            StageKind::DocumentRendering,
            RENDER_TIMEOUT,
            async {
                let renderer = self.renderers.checkout().await?;
                renderer.render(&outcome.document, self.render_mode).await
            },
        )
        .await?;
        info!(job_id = %job.id, size = artifact.bytes.len(), "Document rendered");

        // 5. Compatibility scoring — independent of the rendering mode.
        let report = run_stage(
            &mut timings,
            StageKind::CompatibilityScoring,
            SCORE_TIMEOUT,
            self.scorer.score(&outcome.document, &analysis),
        )
        .await?;
        info!(job_id = %job.id, score = report.overall_score, "Compatibility scored");

        // 6. Packaging. The metrics snapshot cannot include packaging's own
        // duration — it is being measured while they are assembled.
        let metrics = outcome.metrics.clone();
        let completed_stages = timings.clone();
        let result = run_stage(
            &mut timings,
            StageKind::Packaging,
            PACKAGE_TIMEOUT,
            self.package(job, artifact, &report, &metrics, &completed_stages),
        )
        .await?;

        info!(
            job_id = %job.id,
            total_ms = timings.total_ms(),
            "Pipeline complete"
        );
        Ok(result)
    }

    async fn package(
        &self,
        job: &QueueJob,
        artifact: DocumentArtifact,
        report: &CompatibilityReport,
        metrics: &crate::pipeline::optimizer::OptimizationMetrics,
        timings: &StageTimings,
    ) -> Result<NewGenerationResult, StageError> {
        let artifact_key = ArtifactStore::artifact_key(job.id, artifact.extension);
        let size_bytes = artifact.bytes.len() as i64;
        let content_type = artifact.content_type;

        self.artifacts
            .put(&artifact_key, artifact.bytes, content_type)
            .await
            .map_err(|e| StageError::upstream(StageKind::Packaging, e.to_string()))?;

        let metrics_value = json!({
            "compatibility": report,
            "optimization": metrics,
            "stage_timings": timings.entries(),
            "total_ms": timings.total_ms(),
        });

        Ok(NewGenerationResult::build(
            job.id,
            &job.identity_key,
            artifact_key,
            result_filename(artifact.extension),
            size_bytes,
            content_type,
            metrics_value,
        ))
    }
}

/// Runs one stage under its budget, recording its wall-clock duration.
/// Elapsing the budget is a retryable `Timeout` for that stage.
async fn run_stage<T, F>(
    timings: &mut StageTimings,
    stage: StageKind,
    budget: Duration,
    fut: F,
) -> Result<T, StageError>
where
    F: std::future::Future<Output = Result<T, StageError>>,
{
    let started = Instant::now();
    let out = tokio::time::timeout(budget, fut)
        .await
        .map_err(|_| StageError::timeout(stage))??;
    timings.record(stage, started.elapsed());
    Ok(out)
}

fn result_filename(extension: &str) -> String {
    format!("tailored_resume_{}.{extension}", Utc::now().format("%Y-%m-%d"))
}
