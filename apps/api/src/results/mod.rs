//! Result store — time-bounded storage of pipeline output.
//!
//! Rows live in Postgres; artifact blobs live in S3 under `artifacts/`.
//! Expiry is fixed at creation (`created_at + 7 days`) and is logical
//! first: reads treat an expired row as absent even before the periodic
//! sweep physically deletes it. Every read is ownership-checked against
//! the identity inherited from the originating job.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::errors::AppError;
use crate::identity::Identity;

/// Fixed retention policy. Not configurable per call.
pub const RESULT_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GenerationResult {
    pub id: Uuid,
    pub queue_job_id: Uuid,
    pub identity_key: String,
    pub artifact_key: String,
    pub filename: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub metrics: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A fully assembled result awaiting persistence. Built by the pipeline's
/// packaging stage; the row itself is written inside the job queue's
/// completion transaction so a completed job and its result appear together
/// or not at all.
#[derive(Debug, Clone)]
pub struct NewGenerationResult {
    pub id: Uuid,
    pub queue_job_id: Uuid,
    pub identity_key: String,
    pub artifact_key: String,
    pub filename: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub metrics: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewGenerationResult {
    pub fn build(
        queue_job_id: Uuid,
        identity_key: &str,
        artifact_key: String,
        filename: String,
        size_bytes: i64,
        content_type: &str,
        metrics: serde_json::Value,
    ) -> Self {
        let created_at = Utc::now();
        NewGenerationResult {
            id: Uuid::new_v4(),
            queue_job_id,
            identity_key: identity_key.to_string(),
            artifact_key,
            filename,
            size_bytes,
            content_type: content_type.to_string(),
            metrics,
            created_at,
            expires_at: created_at + Duration::days(RESULT_TTL_DAYS),
        }
    }
}

/// Read/purge seam for generation results. Creation rides the job queue's
/// completion transaction and is not part of this trait.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Ownership-checked lookup by originating job. Expired rows read as
    /// absent regardless of whether the sweep has deleted them yet.
    async fn get_by_job_id(
        &self,
        job_id: Uuid,
        identity: &Identity,
    ) -> Result<Option<GenerationResult>, AppError>;

    /// Ownership-checked lookup by result id.
    async fn get_by_id(
        &self,
        result_id: Uuid,
        identity: &Identity,
    ) -> Result<Option<GenerationResult>, AppError>;

    /// Physically deletes expired rows. Returns the number removed. Safe to
    /// run concurrently with reads, which already treat expired rows as
    /// absent.
    async fn purge_expired(&self) -> Result<u64, AppError>;
}

pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn get_by_job_id(
        &self,
        job_id: Uuid,
        identity: &Identity,
    ) -> Result<Option<GenerationResult>, AppError> {
        Ok(sqlx::query_as::<_, GenerationResult>(
            r#"
            SELECT * FROM generation_results
            WHERE queue_job_id = $1 AND identity_key = $2 AND expires_at > now()
            "#,
        )
        .bind(job_id)
        .bind(identity.usage_key())
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn get_by_id(
        &self,
        result_id: Uuid,
        identity: &Identity,
    ) -> Result<Option<GenerationResult>, AppError> {
        Ok(sqlx::query_as::<_, GenerationResult>(
            r#"
            SELECT * FROM generation_results
            WHERE id = $1 AND identity_key = $2 AND expires_at > now()
            "#,
        )
        .bind(result_id)
        .bind(identity.usage_key())
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn purge_expired(&self) -> Result<u64, AppError> {
        let deleted = sqlx::query("DELETE FROM generation_results WHERE expires_at < now()")
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected())
    }
}

/// S3-backed blob storage for rendered artifacts.
#[derive(Clone)]
pub struct ArtifactStore {
    s3: aws_sdk_s3::Client,
    bucket: String,
}

impl ArtifactStore {
    pub fn new(s3: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { s3, bucket }
    }

    pub fn artifact_key(job_id: Uuid, extension: &str) -> String {
        format!("artifacts/{job_id}.{extension}")
    }

    pub async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), AppError> {
        self.s3
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("artifact upload failed: {e}")))?;
        Ok(())
    }

    pub async fn fetch(&self, key: &str) -> Result<Bytes, AppError> {
        let object = self
            .s3
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("artifact download failed: {e}")))?;

        let data = object
            .body
            .collect()
            .await
            .map_err(|e| AppError::Storage(format!("artifact body read failed: {e}")))?;
        Ok(data.into_bytes())
    }

    /// Fetches an uploaded source file (`uploads/` keyspace is written by
    /// the out-of-scope upload endpoint).
    pub async fn fetch_upload(&self, file_key: &str) -> Result<Bytes, AppError> {
        self.fetch(file_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory store with the same logical-expiry semantics as the
    /// Postgres implementation.
    #[derive(Default)]
    struct InMemoryResultStore {
        rows: Mutex<HashMap<Uuid, GenerationResult>>,
    }

    impl InMemoryResultStore {
        fn insert(&self, result: GenerationResult) {
            self.rows.lock().unwrap().insert(result.id, result);
        }

        fn row_count(&self) -> usize {
            self.rows.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ResultStore for InMemoryResultStore {
        async fn get_by_job_id(
            &self,
            job_id: Uuid,
            identity: &Identity,
        ) -> Result<Option<GenerationResult>, AppError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .find(|r| {
                    r.queue_job_id == job_id
                        && r.identity_key == identity.usage_key()
                        && r.expires_at > Utc::now()
                })
                .cloned())
        }

        async fn get_by_id(
            &self,
            result_id: Uuid,
            identity: &Identity,
        ) -> Result<Option<GenerationResult>, AppError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .get(&result_id)
                .filter(|r| r.identity_key == identity.usage_key() && r.expires_at > Utc::now())
                .cloned())
        }

        async fn purge_expired(&self) -> Result<u64, AppError> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|_, r| r.expires_at >= Utc::now());
            Ok((before - rows.len()) as u64)
        }
    }

    fn guest(id: &str) -> Identity {
        Identity {
            registered_id: None,
            guest_id: Some(id.to_string()),
            source_addr: "10.0.0.1".to_string(),
            plan_tier: "free".to_string(),
        }
    }

    fn result_for(identity_key: &str, expires_at: DateTime<Utc>) -> GenerationResult {
        GenerationResult {
            id: Uuid::new_v4(),
            queue_job_id: Uuid::new_v4(),
            identity_key: identity_key.to_string(),
            artifact_key: "artifacts/x.pdf".to_string(),
            filename: "tailored_resume.pdf".to_string(),
            size_bytes: 2048,
            content_type: "application/pdf".to_string(),
            metrics: serde_json::json!({}),
            created_at: Utc::now(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_expired_result_reads_as_absent_before_purge() {
        let store = InMemoryResultStore::default();
        let expired = result_for("g-1", Utc::now() - Duration::minutes(1));
        let job_id = expired.queue_job_id;
        store.insert(expired);

        // The row physically exists, but logical expiry wins.
        assert_eq!(store.row_count(), 1);
        let read = store.get_by_job_id(job_id, &guest("g-1")).await.unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_live_result_requires_matching_identity() {
        let store = InMemoryResultStore::default();
        let result = result_for("g-1", Utc::now() + Duration::days(7));
        let id = result.id;
        store.insert(result);

        assert!(store.get_by_id(id, &guest("g-1")).await.unwrap().is_some());
        assert!(
            store.get_by_id(id, &guest("g-other")).await.unwrap().is_none(),
            "foreign identity must observe absence"
        );
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired_rows() {
        let store = InMemoryResultStore::default();
        store.insert(result_for("g-1", Utc::now() - Duration::minutes(1)));
        store.insert(result_for("g-1", Utc::now() + Duration::days(3)));

        let deleted = store.purge_expired().await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.row_count(), 1);
    }

    #[test]
    fn test_expiry_is_fixed_seven_days_from_creation() {
        let result = NewGenerationResult::build(
            Uuid::new_v4(),
            "u-1",
            "artifacts/x.pdf".to_string(),
            "tailored_resume.pdf".to_string(),
            1024,
            "application/pdf",
            serde_json::json!({}),
        );
        assert_eq!(result.expires_at - result.created_at, Duration::days(7));
    }

    #[test]
    fn test_ownership_key_comes_from_builder_argument() {
        let result = NewGenerationResult::build(
            Uuid::new_v4(),
            "g-9",
            "artifacts/x.pdf".to_string(),
            "tailored_resume.pdf".to_string(),
            1024,
            "application/pdf",
            serde_json::json!({}),
        );
        assert_eq!(result.identity_key, "g-9");
    }

    #[test]
    fn test_artifact_key_namespaces_by_job() {
        let job_id = Uuid::new_v4();
        let key = ArtifactStore::artifact_key(job_id, "pdf");
        assert_eq!(key, format!("artifacts/{job_id}.pdf"));
    }
}
