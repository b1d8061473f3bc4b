//! Compatibility Scoring — measures the optimized document against the job
//! analysis, independent of how (or whether) the document was rendered.
//!
//! Behind a trait so the deterministic keyword scorer can be swapped for a
//! semantic backend without touching the orchestrator or the synchronous
//! scoring endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::pipeline::jd_analysis::JobAnalysis;
use crate::pipeline::optimizer::OptimizedDocument;
use crate::pipeline::StageError;

/// A keyword matched between the document and the analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDetail {
    pub keyword: String,
    pub strength: f32, // 0.0 – 1.0
}

/// A job-description keyword the document does not cover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gap {
    pub keyword: String,
    pub jd_frequency: u32,
}

/// Full compatibility report attached to the generation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub overall_score: u32, // 0 – 100
    pub strong_matches: Vec<MatchDetail>,  // strength ≥ 0.8
    pub partial_matches: Vec<MatchDetail>, // 0.4 – 0.79
    pub gaps: Vec<Gap>,                    // strength < 0.4
    pub recommendation: String,
}

#[async_trait]
pub trait CompatibilityScorer: Send + Sync {
    async fn score(
        &self,
        document: &OptimizedDocument,
        analysis: &JobAnalysis,
    ) -> Result<CompatibilityReport, StageError>;
}

/// Deterministic keyword-containment scorer.
///
/// Per keyword: heading hit → 1.0, body hit → 0.7, miss → 0.0.
/// overall = Σ(strength × weighted_score) / Σ(weighted_score) × 100.
pub struct KeywordCompatibilityScorer;

#[async_trait]
impl CompatibilityScorer for KeywordCompatibilityScorer {
    async fn score(
        &self,
        document: &OptimizedDocument,
        analysis: &JobAnalysis,
    ) -> Result<CompatibilityReport, StageError> {
        Ok(compute_keyword_compatibility(document, analysis))
    }
}

fn compute_keyword_compatibility(
    document: &OptimizedDocument,
    analysis: &JobAnalysis,
) -> CompatibilityReport {
    let keywords = &analysis.keyword_inventory;

    if keywords.is_empty() {
        return CompatibilityReport {
            overall_score: 0,
            strong_matches: vec![],
            partial_matches: vec![],
            gaps: vec![],
            recommendation: "No keywords found in the job description — cannot score."
                .to_string(),
        };
    }

    let headings: Vec<String> = document
        .sections
        .iter()
        .map(|s| s.heading.to_lowercase())
        .collect();
    let bodies: Vec<String> = document
        .sections
        .iter()
        .map(|s| s.body.to_lowercase())
        .collect();

    let mut strong_matches = Vec::new();
    let mut partial_matches = Vec::new();
    let mut gaps = Vec::new();

    let mut total_weighted = 0.0_f32;
    let mut total_score = 0.0_f32;

    for kw in keywords {
        let needle = kw.keyword.to_lowercase();
        total_weighted += kw.weighted_score;

        let heading_hit = headings.iter().any(|h| h.contains(&needle));
        let body_hit = bodies.iter().any(|b| b.contains(&needle));

        let strength = if heading_hit {
            1.0
        } else if body_hit {
            0.7
        } else {
            0.0
        };

        total_score += strength * kw.weighted_score;

        if strength >= 0.8 {
            strong_matches.push(MatchDetail {
                keyword: kw.keyword.clone(),
                strength,
            });
        } else if strength >= 0.4 {
            partial_matches.push(MatchDetail {
                keyword: kw.keyword.clone(),
                strength,
            });
        } else {
            gaps.push(Gap {
                keyword: kw.keyword.clone(),
                jd_frequency: kw.frequency,
            });
        }
    }

    let overall_score = if total_weighted > 0.0 {
        ((total_score / total_weighted) * 100.0).round() as u32
    } else {
        0
    };

    CompatibilityReport {
        recommendation: build_recommendation(overall_score, &gaps),
        overall_score,
        strong_matches,
        partial_matches,
        gaps,
    }
}

fn build_recommendation(score: u32, gaps: &[Gap]) -> String {
    let top_gaps: Vec<&str> = gaps.iter().take(3).map(|g| g.keyword.as_str()).collect();

    if score >= 80 {
        "Strong match. The tailored document covers the role's key requirements.".to_string()
    } else if score >= 60 {
        format!(
            "Moderate match ({score}/100). Consider adding material covering: {}.",
            top_gaps.join(", ")
        )
    } else {
        format!(
            "Low match ({score}/100). Significant gaps: {}. The source document may not fit this role.",
            top_gaps.join(", ")
        )
    }
}
