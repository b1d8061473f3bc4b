//! Queue job model and status state machine.
//!
//! Lifecycle: `queued → processing → completed` on success,
//! `processing → retrying → processing` while attempts remain, and
//! `processing → failed` once attempts are exhausted or the failure is
//! unrecoverable. Terminal states are immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::identity::IdentityKind;
use crate::quota::FeatureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Retrying,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Retrying => "retrying",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// The status shown to pollers. Retry mechanics are an internal detail,
    /// so `retrying` reads as `processing`.
    pub fn public_label(&self) -> &'static str {
        match self {
            JobStatus::Retrying => JobStatus::Processing.as_str(),
            other => other.as_str(),
        }
    }

    /// Whether `next` is a legal successor in the state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Retrying, Processing)
                | (Processing, Completed)
                | (Processing, Retrying)
                | (Processing, Failed)
        )
    }
}

impl std::str::FromStr for JobStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "retrying" => Ok(JobStatus::Retrying),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(()),
        }
    }
}

/// Where the pipeline should take its source content from.
/// Guests are restricted to `Upload`; the restriction is enforced both at
/// submission and inside the content-selection stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ContentSource {
    /// A file previously uploaded to blob storage.
    Upload { file_key: String, filename: String },
    /// The caller's most recent stored document.
    Stored,
    /// An explicit stored document id.
    Document { document_id: Uuid },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub job_description: String,
    pub content: ContentSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueueJob {
    pub id: Uuid,
    pub feature_kind: String,
    pub identity_key: String,
    pub identity_kind: String,
    pub plan_tier: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub error_detail: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl QueueJob {
    /// Typed view of the persisted status. Unknown strings read as `Failed`
    /// so a corrupted row can never look claimable.
    pub fn status(&self) -> JobStatus {
        self.status.parse().unwrap_or(JobStatus::Failed)
    }

    pub fn feature(&self) -> Option<FeatureKind> {
        self.feature_kind.parse().ok()
    }

    pub fn identity_kind(&self) -> IdentityKind {
        self.identity_kind.parse().unwrap_or(IdentityKind::Guest)
    }

    pub fn payload(&self) -> Result<JobPayload, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_persisted_form() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Retrying,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse(), Ok(status));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(!JobStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_retrying_reads_as_processing_to_pollers() {
        assert_eq!(JobStatus::Retrying.public_label(), "processing");
        assert_eq!(JobStatus::Failed.public_label(), "failed");
    }

    #[test]
    fn test_legal_transitions() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Retrying.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Retrying));
        assert!(Processing.can_transition_to(Failed));
    }

    #[test]
    fn test_terminal_states_have_no_successors() {
        use JobStatus::*;
        for next in [Queued, Processing, Retrying, Completed, Failed] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_queued_cannot_skip_to_terminal() {
        use JobStatus::*;
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Queued.can_transition_to(Failed));
        assert!(!Queued.can_transition_to(Retrying));
    }

    #[test]
    fn test_content_source_serde_tagging() {
        let upload = ContentSource::Upload {
            file_key: "uploads/abc.pdf".to_string(),
            filename: "resume.pdf".to_string(),
        };
        let json = serde_json::to_value(&upload).unwrap();
        assert_eq!(json["source"], "upload");

        let stored: ContentSource = serde_json::from_value(serde_json::json!({
            "source": "stored"
        }))
        .unwrap();
        assert!(matches!(stored, ContentSource::Stored));
    }

    #[test]
    fn test_unknown_persisted_status_reads_as_failed() {
        let job = QueueJob {
            id: Uuid::new_v4(),
            feature_kind: "document_generation".to_string(),
            identity_key: "g-1".to_string(),
            identity_kind: "guest".to_string(),
            plan_tier: "free".to_string(),
            payload: serde_json::json!({}),
            status: "banana".to_string(),
            attempts: 0,
            max_attempts: 3,
            error_detail: None,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            next_attempt_at: None,
        };
        assert_eq!(job.status(), JobStatus::Failed);
    }
}
