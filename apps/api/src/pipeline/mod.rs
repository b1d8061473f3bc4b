//! Generation pipeline — the fixed stage sequence that turns a claimed job
//! into a rendered, scored artifact.
//!
//! Stage order: content selection → job analysis → content optimization →
//! document rendering → compatibility scoring → packaging. Stages fail
//! independently with a typed cause; the orchestrator never retries a stage
//! in place — the job queue re-runs the whole pipeline on the next attempt.

pub mod content_selection;
pub mod jd_analysis;
pub mod optimizer;
pub mod orchestrator;
pub mod render;
pub mod scoring;

use serde::Serialize;
use thiserror::Error;

use crate::llm_client::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    ContentSelection,
    JobAnalysis,
    ContentOptimization,
    DocumentRendering,
    CompatibilityScoring,
    Packaging,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::ContentSelection => "content_selection",
            StageKind::JobAnalysis => "job_analysis",
            StageKind::ContentOptimization => "content_optimization",
            StageKind::DocumentRendering => "document_rendering",
            StageKind::CompatibilityScoring => "compatibility_scoring",
            StageKind::Packaging => "packaging",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a stage failed. `Timeout` and `UpstreamUnavailable` are retryable by
/// the queue; `Unrecoverable` exhausts retries immediately.
#[derive(Debug, Error)]
pub enum FailureCause {
    #[error("stage timed out")]
    Timeout,

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("unrecoverable: {0}")]
    Unrecoverable(String),
}

#[derive(Debug, Error)]
#[error("{stage} failed: {cause}")]
pub struct StageError {
    pub stage: StageKind,
    pub cause: FailureCause,
}

impl StageError {
    pub fn timeout(stage: StageKind) -> Self {
        StageError {
            stage,
            cause: FailureCause::Timeout,
        }
    }

    pub fn upstream(stage: StageKind, detail: impl Into<String>) -> Self {
        StageError {
            stage,
            cause: FailureCause::UpstreamUnavailable(detail.into()),
        }
    }

    pub fn unrecoverable(stage: StageKind, detail: impl Into<String>) -> Self {
        StageError {
            stage,
            cause: FailureCause::Unrecoverable(detail.into()),
        }
    }

    pub fn is_unrecoverable(&self) -> bool {
        matches!(self.cause, FailureCause::Unrecoverable(_))
    }
}

/// LLM failures are upstream failures from the pipeline's point of view:
/// the model dependency did not deliver usable output, and a later attempt
/// may well succeed.
pub(crate) fn llm_failure(stage: StageKind, err: LlmError) -> StageError {
    StageError::upstream(stage, err.to_string())
}

/// Wall-clock duration per executed stage, aggregated into result metrics.
/// Informational only — never used for control flow.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageTimings {
    entries: Vec<StageTiming>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: StageKind,
    pub duration_ms: u64,
}

impl StageTimings {
    pub fn record(&mut self, stage: StageKind, duration: std::time::Duration) {
        self.entries.push(StageTiming {
            stage,
            duration_ms: duration.as_millis() as u64,
        });
    }

    pub fn total_ms(&self) -> u64 {
        self.entries.iter().map(|t| t.duration_ms).sum()
    }

    pub fn entries(&self) -> &[StageTiming] {
        &self.entries
    }
}
