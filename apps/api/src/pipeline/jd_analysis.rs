//! Job Analysis — extracts structured requirements, weighted keywords, and
//! tone from a free-text job description via the LLM.

use serde::{Deserialize, Serialize};

use crate::llm_client::prompts::{JD_ANALYSIS_PROMPT_TEMPLATE, JD_ANALYSIS_SYSTEM};
use crate::llm_client::LlmClient;
use crate::pipeline::{llm_failure, StageError, StageKind};

/// Detected tone of a job description. Steers verb selection during
/// content optimization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleTone {
    AggressiveStartup,
    #[default]
    CollaborativeEnterprise,
    ResearchOriented,
    ProductOriented,
}

/// A single requirement extracted from the job description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementItem {
    pub text: String,
    pub is_required: bool,
}

/// A keyword weighted by frequency and where in the posting it appears.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordWeight {
    pub keyword: String,
    pub frequency: u32,
    /// title=1.0, requirements=0.8, responsibilities=0.6, about=0.3
    pub position_weight: f32,
    /// frequency * position_weight
    pub weighted_score: f32,
}

/// Full structured output of job-description analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAnalysis {
    pub hard_requirements: Vec<RequirementItem>,
    pub soft_signals: Vec<String>,
    pub seniority: String,
    pub keyword_inventory: Vec<KeywordWeight>,
    pub detected_tone: RoleTone,
}

impl JobAnalysis {
    /// Short prose summary used in downstream prompts and metrics.
    pub fn requirements_summary(&self) -> String {
        self.hard_requirements
            .iter()
            .take(5)
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Analyzes a job description with the LLM.
pub async fn analyze_job_description(
    jd_text: &str,
    llm: &LlmClient,
) -> Result<JobAnalysis, StageError> {
    let prompt = JD_ANALYSIS_PROMPT_TEMPLATE.replace("{jd_text}", jd_text);
    llm.call_json::<JobAnalysis>(&prompt, JD_ANALYSIS_SYSTEM)
        .await
        .map_err(|e| llm_failure(StageKind::JobAnalysis, e))
}
