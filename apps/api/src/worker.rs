//! Worker pool — claims jobs, runs the generation pipeline, and settles
//! each claim as exactly one `succeed` or `fail` on the queue.
//!
//! Usage is recorded only after the completion transaction commits; a
//! recording failure is logged and swallowed so a finished generation is
//! never retro-failed by bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::errors::AppError;
use crate::identity::Identity;
use crate::pipeline::orchestrator::GenerationPipeline;
use crate::queue::job::{JobStatus, QueueJob};
use crate::queue::store::JobQueue;
use crate::quota::engine::RateLimitEngine;
use crate::results::ResultStore;

const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const PURGE_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct WorkerContext {
    pub queue: Arc<dyn JobQueue>,
    pub engine: Arc<RateLimitEngine>,
    pub pipeline: GenerationPipeline,
}

/// Runs `count` worker tasks until the process exits. Parallelism is
/// bounded here; the renderer pool bounds the rendering stage further.
pub async fn run_worker_pool(ctx: Arc<WorkerContext>, count: usize) {
    info!(workers = count, "Starting worker pool");
    let mut handles = Vec::with_capacity(count);
    for worker_id in 0..count {
        let ctx = Arc::clone(&ctx);
        handles.push(tokio::spawn(worker_loop(worker_id, ctx)));
    }
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Worker task panicked: {e}");
        }
    }
}

async fn worker_loop(worker_id: usize, ctx: Arc<WorkerContext>) {
    info!(worker = worker_id, "Worker ready");
    loop {
        match process_next(&ctx).await {
            Ok(true) => {
                debug!(worker = worker_id, "Job settled, checking for next");
            }
            Ok(false) => {
                trace!(worker = worker_id, "Queue empty, sleeping");
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
            Err(e) => {
                error!(worker = worker_id, error = %e, "Claim failed, backing off");
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
        }
    }
}

/// Claims and settles at most one job. Returns `Ok(false)` when nothing was
/// eligible to claim.
pub async fn process_next(ctx: &WorkerContext) -> Result<bool, AppError> {
    let job = match ctx.queue.claim().await? {
        Some(job) => job,
        None => return Ok(false),
    };

    info!(
        job_id = %job.id,
        feature = %job.feature_kind,
        attempt = job.attempts + 1,
        max_attempts = job.max_attempts,
        "Processing claimed job"
    );
    settle(ctx, &job).await;
    Ok(true)
}

/// Runs the pipeline and resolves the claim. Every path ends in exactly one
/// queue transition; nothing is allowed to leave the job stuck in
/// `processing`.
async fn settle(ctx: &WorkerContext, job: &QueueJob) {
    match ctx.pipeline.run(job).await {
        Ok(new_result) => match ctx.queue.succeed(job.id, &new_result).await {
            Ok(result) => {
                info!(
                    job_id = %job.id,
                    result_id = %result.id,
                    size_bytes = result.size_bytes,
                    "Job completed"
                );
                record_usage(ctx, job).await;
            }
            Err(e) => {
                // The artifact blob is already uploaded, but without the
                // completion transaction the job is not completed. Burn an
                // attempt like any other failure.
                error!(job_id = %job.id, error = %e, "Completion transaction failed");
                fail_job(ctx, job, "failed to persist generation result", false).await;
            }
        },
        Err(stage_err) => {
            warn!(
                job_id = %job.id,
                stage = %stage_err.stage,
                unrecoverable = stage_err.is_unrecoverable(),
                "Pipeline failed: {stage_err}"
            );
            fail_job(ctx, job, &stage_err.to_string(), stage_err.is_unrecoverable()).await;
        }
    }
}

/// Success-gated usage recording. The generation already succeeded, so a
/// ledger failure here only under-counts — documented tradeoff.
async fn record_usage(ctx: &WorkerContext, job: &QueueJob) {
    let Some(feature) = job.feature() else {
        warn!(job_id = %job.id, feature = %job.feature_kind, "Unknown feature kind; skipping usage record");
        return;
    };
    let identity = Identity::from_parts(job.identity_kind(), &job.identity_key, &job.plan_tier);
    if let Err(e) = ctx.engine.record_usage(&identity, feature).await {
        warn!(job_id = %job.id, error = %e, "Usage recording failed after completion");
    }
}

async fn fail_job(ctx: &WorkerContext, job: &QueueJob, detail: &str, unrecoverable: bool) {
    match ctx.queue.fail(job.id, detail, unrecoverable).await {
        Ok(JobStatus::Retrying) => {
            info!(job_id = %job.id, "Job scheduled for retry");
        }
        Ok(status) => {
            info!(job_id = %job.id, status = status.as_str(), "Job terminally failed");
        }
        Err(e) => {
            error!(job_id = %job.id, error = %e, "Failed to record job failure");
        }
    }
}

/// Periodic physical deletion of expired results. Reads already treat
/// expired rows as absent, so the sweep's timing is a housekeeping detail.
pub async fn run_purge_sweep(results: Arc<dyn ResultStore>) {
    let mut interval = tokio::time::interval(PURGE_SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        match results.purge_expired().await {
            Ok(0) => debug!("Purge sweep: nothing expired"),
            Ok(deleted) => info!(deleted, "Purge sweep removed expired results"),
            Err(e) => error!(error = %e, "Purge sweep failed"),
        }
    }
}
