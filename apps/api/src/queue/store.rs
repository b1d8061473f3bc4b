//! Job queue persistence.
//!
//! The core correctness property is single-claimant ownership: `claim()` is
//! a single conditional `UPDATE` over a `FOR UPDATE SKIP LOCKED` selection,
//! so two workers racing for the same row observe exactly one winner and
//! the claim never holds a lock across the pipeline run. `succeed()` writes
//! the result row and the `completed` transition in one transaction — a
//! completed job with no result (or the reverse) cannot be observed.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::identity::Identity;
use crate::queue::job::{JobPayload, JobStatus, QueueJob};
use crate::quota::FeatureKind;
use crate::results::{GenerationResult, NewGenerationResult};

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Creates a job in `queued`. Fast — never runs pipeline work inline.
    async fn enqueue(
        &self,
        feature: FeatureKind,
        identity: &Identity,
        payload: &JobPayload,
        max_attempts: i32,
    ) -> Result<QueueJob, AppError>;

    /// Atomically claims the oldest eligible job (`queued`, or `retrying`
    /// whose backoff has elapsed) and transitions it to `processing`.
    /// Returns `None` when nothing is eligible.
    async fn claim(&self) -> Result<Option<QueueJob>, AppError>;

    /// Transitions `processing → completed` and persists the result row in
    /// the same transaction.
    async fn succeed(
        &self,
        job_id: Uuid,
        result: &NewGenerationResult,
    ) -> Result<GenerationResult, AppError>;

    /// Records a failed attempt. Transitions to `retrying` with a backoff
    /// delay while attempts remain, else terminally to `failed`.
    /// `unrecoverable` failures exhaust retries immediately.
    async fn fail(
        &self,
        job_id: Uuid,
        error_detail: &str,
        unrecoverable: bool,
    ) -> Result<JobStatus, AppError>;

    /// Ownership-checked read. Foreign callers observe absence, never a
    /// "forbidden" that would confirm the job exists.
    async fn get_for(&self, job_id: Uuid, identity: &Identity)
        -> Result<Option<QueueJob>, AppError>;
}

pub struct PgJobQueue {
    pool: PgPool,
    backoff_base: Duration,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, backoff_base: Duration) -> Self {
        Self { pool, backoff_base }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(
        &self,
        feature: FeatureKind,
        identity: &Identity,
        payload: &JobPayload,
        max_attempts: i32,
    ) -> Result<QueueJob, AppError> {
        let payload_value = serde_json::to_value(payload)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("payload serialization: {e}")))?;

        Ok(sqlx::query_as::<_, QueueJob>(
            r#"
            INSERT INTO queue_jobs
                (id, feature_kind, identity_key, identity_kind, plan_tier,
                 payload, status, attempts, max_attempts, queued_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'queued', 0, $7, now())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(feature.as_str())
        .bind(identity.usage_key())
        .bind(identity.kind().as_str())
        .bind(&identity.plan_tier)
        .bind(&payload_value)
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn claim(&self) -> Result<Option<QueueJob>, AppError> {
        // SKIP LOCKED makes concurrent claims pick disjoint rows; the outer
        // UPDATE is the only writer, so at most one worker ever owns a job.
        Ok(sqlx::query_as::<_, QueueJob>(
            r#"
            UPDATE queue_jobs
            SET status = 'processing', started_at = now()
            WHERE id = (
                SELECT id FROM queue_jobs
                WHERE status = 'queued'
                   OR (status = 'retrying' AND next_attempt_at <= now())
                ORDER BY queued_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn succeed(
        &self,
        job_id: Uuid,
        result: &NewGenerationResult,
    ) -> Result<GenerationResult, AppError> {
        let mut tx = self.pool.begin().await?;

        let updated: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE queue_jobs
            SET status = 'completed', completed_at = now()
            WHERE id = $1 AND status = 'processing'
            RETURNING id
            "#,
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;

        if updated.is_none() {
            // Not ours to complete: the job was never claimed by us, or a
            // transition already happened. Roll back rather than orphan a
            // result row.
            return Err(AppError::Internal(anyhow::anyhow!(
                "job {job_id} is not in processing; refusing to complete"
            )));
        }

        let persisted = sqlx::query_as::<_, GenerationResult>(
            r#"
            INSERT INTO generation_results
                (id, queue_job_id, identity_key, artifact_key, filename,
                 size_bytes, content_type, metrics, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(result.id)
        .bind(result.queue_job_id)
        .bind(&result.identity_key)
        .bind(&result.artifact_key)
        .bind(&result.filename)
        .bind(result.size_bytes)
        .bind(&result.content_type)
        .bind(&result.metrics)
        .bind(result.created_at)
        .bind(result.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(persisted)
    }

    async fn fail(
        &self,
        job_id: Uuid,
        error_detail: &str,
        unrecoverable: bool,
    ) -> Result<JobStatus, AppError> {
        // `attempts` on the right-hand side is the pre-update value, so the
        // backoff doubles per prior attempt: base, 2·base, 4·base, ...
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE queue_jobs
            SET attempts = attempts + 1,
                error_detail = $3,
                status = CASE
                    WHEN $2 OR attempts + 1 >= max_attempts THEN 'failed'
                    ELSE 'retrying'
                END,
                completed_at = CASE
                    WHEN $2 OR attempts + 1 >= max_attempts THEN now()
                    ELSE completed_at
                END,
                next_attempt_at = CASE
                    WHEN $2 OR attempts + 1 >= max_attempts THEN next_attempt_at
                    ELSE now() + make_interval(secs => $4 * power(2.0::double precision, attempts::double precision))
                END
            WHERE id = $1 AND status = 'processing'
            RETURNING status
            "#,
        )
        .bind(job_id)
        .bind(unrecoverable)
        .bind(error_detail)
        .bind(self.backoff_base.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        let status = status.ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "job {job_id} is not in processing; refusing to fail"
            ))
        })?;

        status
            .parse()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("unknown job status '{status}'")))
    }

    async fn get_for(
        &self,
        job_id: Uuid,
        identity: &Identity,
    ) -> Result<Option<QueueJob>, AppError> {
        Ok(sqlx::query_as::<_, QueueJob>(
            "SELECT * FROM queue_jobs WHERE id = $1 AND identity_key = $2",
        )
        .bind(job_id)
        .bind(identity.usage_key())
        .fetch_optional(&self.pool)
        .await?)
    }
}
