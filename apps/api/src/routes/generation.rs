//! Axum route handlers for the generation API: submit, poll, download, and
//! synchronous compatibility scoring.
//!
//! Submission validates and quota-checks before enqueueing and never runs
//! pipeline stages inline. All job and result reads are ownership-scoped;
//! a caller probing someone else's job id sees a plain not-found.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::identity::Identity;
use crate::pipeline::content_selection::extension_of;
use crate::pipeline::jd_analysis::analyze_job_description;
use crate::pipeline::optimizer::OptimizedDocument;
use crate::pipeline::scoring::CompatibilityReport;
use crate::queue::job::{ContentSource, JobPayload, JobStatus};
use crate::quota::FeatureKind;
use crate::state::AppState;

/// Upper bound on submitted job-description text.
const MAX_JD_CHARS: usize = 50_000;
/// Upper bound on inline resume text for synchronous scoring.
const MAX_RESUME_CHARS: usize = 100_000;
/// Rough end-to-end pipeline latency used for the remaining-time hint.
const EXPECTED_PIPELINE_SECS: i64 = 75;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub job_description: String,
    pub content: ContentSource,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: &'static str,
    pub poll_interval_ms: u64,
    pub status_url: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub progress_hint: &'static str,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResultSummary {
    pub result_id: Uuid,
    pub filename: String,
    pub size_bytes: i64,
    pub expires_at: DateTime<Utc>,
    pub download_url: String,
    pub metrics: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub job_description: String,
    pub resume_text: String,
}

#[derive(Debug, Serialize)]
pub struct ScoreResponse {
    pub report: CompatibilityReport,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/generations
///
/// Validates, quota-checks, and enqueues. Responds as soon as the job row
/// exists — the pipeline runs in the worker process.
pub async fn handle_submit(
    State(state): State<AppState>,
    identity: Identity,
    Json(request): Json<SubmitRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_submission(&identity, &request)?;

    // Pure check; usage is recorded by the worker once generation succeeds.
    state
        .engine
        .enforce(&identity, FeatureKind::DocumentGeneration)
        .await?;

    let payload = JobPayload {
        job_description: request.job_description,
        content: request.content,
    };
    let job = state
        .queue
        .enqueue(
            FeatureKind::DocumentGeneration,
            &identity,
            &payload,
            state.config.max_attempts,
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id,
            status: "queued",
            poll_interval_ms: state.config.poll_interval_ms,
            status_url: format!("/api/v1/generations/{}", job.id),
        }),
    ))
}

/// GET /api/v1/generations/:id
///
/// Ownership-checked status poll. Retry mechanics are internal: a
/// `retrying` job reads as `processing`.
pub async fn handle_status(
    State(state): State<AppState>,
    identity: Identity,
    Path(job_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, AppError> {
    let job = state
        .queue
        .get_for(job_id, &identity)
        .await?
        .ok_or(AppError::NotFound)?;

    let status = job.status();

    let result = if status == JobStatus::Completed {
        state
            .results
            .get_by_job_id(job.id, &identity)
            .await?
            .map(|r| ResultSummary {
                result_id: r.id,
                download_url: format!("/api/v1/generations/{}/download", job.id),
                filename: r.filename,
                size_bytes: r.size_bytes,
                expires_at: r.expires_at,
                metrics: r.metrics,
            })
    } else {
        None
    };

    let error = match status {
        JobStatus::Failed => job.error_detail.clone(),
        _ => None,
    };

    Ok(Json(StatusResponse {
        status: status.public_label(),
        progress_hint: progress_hint(status),
        created_at: job.queued_at,
        started_at: job.started_at,
        completed_at: job.completed_at,
        estimated_remaining_seconds: estimated_remaining(status, job.started_at),
        result,
        error,
    }))
}

/// GET /api/v1/generations/:id/download
///
/// Streams the artifact once the job is `completed`. An expired result
/// reads as not-found even if the purge sweep has not run yet.
pub async fn handle_download(
    State(state): State<AppState>,
    identity: Identity,
    Path(job_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let job = state
        .queue
        .get_for(job_id, &identity)
        .await?
        .ok_or(AppError::NotFound)?;

    if job.status() != JobStatus::Completed {
        return Err(AppError::NotReady);
    }

    let result = state
        .results
        .get_by_job_id(job.id, &identity)
        .await?
        .ok_or(AppError::NotFound)?;

    let bytes = state.artifacts.fetch(&result.artifact_key).await?;

    Ok((
        [
            (header::CONTENT_TYPE, result.content_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", result.filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// POST /api/v1/score
///
/// Synchronous compatibility scoring. Quota-checked up front; usage is
/// recorded only if the scoring call itself succeeds.
pub async fn handle_score(
    State(state): State<AppState>,
    identity: Identity,
    Json(request): Json<ScoreRequest>,
) -> Result<Json<ScoreResponse>, AppError> {
    validate_score_request(&request)?;

    state
        .engine
        .enforce(&identity, FeatureKind::CompatibilityScoring)
        .await?;

    let report = state
        .engine
        .record_after(&identity, FeatureKind::CompatibilityScoring, async {
            let analysis = analyze_job_description(&request.job_description, &state.llm)
                .await
                .map_err(|e| AppError::Llm(e.to_string()))?;
            let document = OptimizedDocument::from_raw_text(&request.resume_text);
            state
                .scorer
                .score(&document, &analysis)
                .await
                .map_err(|e| AppError::Llm(e.to_string()))
        })
        .await?;

    Ok(Json(ScoreResponse { report }))
}

// ────────────────────────────────────────────────────────────────────────────
// Validation
// ────────────────────────────────────────────────────────────────────────────

/// Rejects malformed submissions before they reach the queue. A rejected
/// submission never consumes quota.
fn validate_submission(identity: &Identity, request: &SubmitRequest) -> Result<(), AppError> {
    if request.job_description.trim().is_empty() {
        return Err(AppError::Validation(
            "job_description cannot be empty".to_string(),
        ));
    }
    if request.job_description.chars().count() > MAX_JD_CHARS {
        return Err(AppError::Validation(format!(
            "job_description exceeds {MAX_JD_CHARS} characters"
        )));
    }

    match &request.content {
        ContentSource::Upload { file_key, filename } => {
            if file_key.trim().is_empty() {
                return Err(AppError::Validation("file_key cannot be empty".to_string()));
            }
            if extension_of(filename).is_none() {
                return Err(AppError::Validation(format!(
                    "unsupported file type: {filename}"
                )));
            }
        }
        ContentSource::Stored | ContentSource::Document { .. } => {
            if !identity.is_registered() {
                return Err(AppError::Validation(
                    "guests must upload a file; stored content requires an account".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_score_request(request: &ScoreRequest) -> Result<(), AppError> {
    if request.job_description.trim().is_empty() {
        return Err(AppError::Validation(
            "job_description cannot be empty".to_string(),
        ));
    }
    if request.resume_text.trim().is_empty() {
        return Err(AppError::Validation(
            "resume_text cannot be empty".to_string(),
        ));
    }
    if request.resume_text.chars().count() > MAX_RESUME_CHARS {
        return Err(AppError::Validation(format!(
            "resume_text exceeds {MAX_RESUME_CHARS} characters"
        )));
    }
    Ok(())
}

fn progress_hint(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "waiting for a worker",
        JobStatus::Processing | JobStatus::Retrying => "generating your document",
        JobStatus::Completed => "ready for download",
        JobStatus::Failed => "generation failed; please resubmit",
    }
}

fn estimated_remaining(status: JobStatus, started_at: Option<DateTime<Utc>>) -> Option<i64> {
    match status {
        JobStatus::Queued => Some(EXPECTED_PIPELINE_SECS),
        JobStatus::Processing | JobStatus::Retrying => {
            let elapsed = started_at
                .map(|t| (Utc::now() - t).num_seconds())
                .unwrap_or(0);
            Some((EXPECTED_PIPELINE_SECS - elapsed).max(5))
        }
        JobStatus::Completed | JobStatus::Failed => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guest() -> Identity {
        Identity {
            registered_id: None,
            guest_id: Some("g-1".to_string()),
            source_addr: "10.0.0.1".to_string(),
            plan_tier: "free".to_string(),
        }
    }

    fn registered() -> Identity {
        Identity {
            registered_id: Some("u-1".to_string()),
            guest_id: None,
            source_addr: "10.0.0.1".to_string(),
            plan_tier: "pro".to_string(),
        }
    }

    fn upload_request(jd: &str, filename: &str) -> SubmitRequest {
        SubmitRequest {
            job_description: jd.to_string(),
            content: ContentSource::Upload {
                file_key: "uploads/abc".to_string(),
                filename: filename.to_string(),
            },
        }
    }

    #[test]
    fn test_empty_job_description_rejected() {
        let err = validate_submission(&guest(), &upload_request("  \n", "resume.pdf")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_oversized_job_description_rejected() {
        let jd = "x".repeat(MAX_JD_CHARS + 1);
        let err = validate_submission(&guest(), &upload_request(&jd, "resume.pdf")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_unsupported_file_type_rejected() {
        let err =
            validate_submission(&guest(), &upload_request("Rust role", "resume.docx")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_guest_upload_accepted() {
        assert!(validate_submission(&guest(), &upload_request("Rust role", "resume.pdf")).is_ok());
    }

    #[test]
    fn test_guest_stored_content_rejected() {
        let request = SubmitRequest {
            job_description: "Rust role".to_string(),
            content: ContentSource::Stored,
        };
        let err = validate_submission(&guest(), &request).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_registered_stored_content_accepted() {
        let request = SubmitRequest {
            job_description: "Rust role".to_string(),
            content: ContentSource::Stored,
        };
        assert!(validate_submission(&registered(), &request).is_ok());
    }

    #[test]
    fn test_registered_explicit_document_accepted() {
        let request = SubmitRequest {
            job_description: "Rust role".to_string(),
            content: ContentSource::Document {
                document_id: Uuid::new_v4(),
            },
        };
        assert!(validate_submission(&registered(), &request).is_ok());
    }

    #[test]
    fn test_score_request_requires_both_texts() {
        let err = validate_score_request(&ScoreRequest {
            job_description: "role".to_string(),
            resume_text: "".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert!(validate_score_request(&ScoreRequest {
            job_description: "role".to_string(),
            resume_text: "resume".to_string(),
        })
        .is_ok());
    }

    #[test]
    fn test_terminal_statuses_have_no_remaining_estimate() {
        assert_eq!(estimated_remaining(JobStatus::Completed, None), None);
        assert_eq!(estimated_remaining(JobStatus::Failed, None), None);
        assert!(estimated_remaining(JobStatus::Queued, None).is_some());
    }

    #[test]
    fn test_remaining_estimate_never_goes_negative() {
        let long_ago = Utc::now() - chrono::Duration::seconds(600);
        let remaining =
            estimated_remaining(JobStatus::Processing, Some(long_ago)).unwrap();
        assert!(remaining >= 5);
    }

    #[test]
    fn test_progress_hint_masks_retrying() {
        assert_eq!(
            progress_hint(JobStatus::Retrying),
            progress_hint(JobStatus::Processing)
        );
    }
}
