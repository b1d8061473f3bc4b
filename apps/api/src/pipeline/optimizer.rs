//! Content Optimization — rewrites the selected source content against the
//! job analysis via the LLM.
//!
//! Metrics are derived from the before/after texts, not taken from the
//! model: keyword deltas are a substring comparison between source and
//! output.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::llm_client::prompts::{OPTIMIZE_PROMPT_TEMPLATE, OPTIMIZE_SYSTEM};
use crate::llm_client::LlmClient;
use crate::pipeline::jd_analysis::{JobAnalysis, RoleTone};
use crate::pipeline::{llm_failure, StageError, StageKind};

const STAGE: StageKind = StageKind::ContentOptimization;

/// Retries when the model returns a structurally empty document.
const MAX_OPTIMIZE_RETRIES: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSection {
    pub heading: String,
    pub body: String,
}

/// The optimized document, ready for rendering and scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizedDocument {
    pub sections: Vec<DocumentSection>,
}

impl OptimizedDocument {
    /// All text content, lowercased, for keyword containment checks.
    pub fn searchable_text(&self) -> String {
        let mut text = String::new();
        for section in &self.sections {
            text.push_str(&section.heading.to_lowercase());
            text.push('\n');
            text.push_str(&section.body.to_lowercase());
            text.push('\n');
        }
        text
    }

    /// A single document built from raw text — used by the synchronous
    /// scoring endpoint, which has no section structure to preserve.
    pub fn from_raw_text(text: &str) -> Self {
        OptimizedDocument {
            sections: vec![DocumentSection {
                heading: "Document".to_string(),
                body: text.to_string(),
            }],
        }
    }
}

/// Quantified outcome of the optimization stage. `confidence` is in [0,100].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationMetrics {
    pub keywords_added: u32,
    pub sections_touched: u32,
    pub confidence: u32,
}

#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub document: OptimizedDocument,
    pub metrics: OptimizationMetrics,
}

/// What the model is asked to return.
#[derive(Debug, Deserialize)]
struct LlmOptimization {
    sections: Vec<DocumentSection>,
    confidence: u32,
}

/// Rewrites `source_text` against the analysis. Retries when the model
/// returns no usable sections; every other failure maps to the stage's
/// upstream contract.
pub async fn optimize_content(
    source_text: &str,
    analysis: &JobAnalysis,
    llm: &LlmClient,
) -> Result<OptimizationOutcome, StageError> {
    let prompt = build_prompt(source_text, analysis);

    for attempt in 0..=MAX_OPTIMIZE_RETRIES {
        let raw: LlmOptimization = llm
            .call_json(&prompt, OPTIMIZE_SYSTEM)
            .await
            .map_err(|e| llm_failure(STAGE, e))?;

        let usable: Vec<DocumentSection> = raw
            .sections
            .into_iter()
            .filter(|s| !s.body.trim().is_empty())
            .collect();

        if usable.is_empty() {
            warn!(
                "Optimization attempt {}/{} returned no usable sections — retrying",
                attempt + 1,
                MAX_OPTIMIZE_RETRIES + 1
            );
            continue;
        }

        let document = OptimizedDocument { sections: usable };
        let metrics = OptimizationMetrics {
            keywords_added: count_keywords_added(source_text, &document, analysis),
            sections_touched: count_sections_touched(source_text, &document),
            confidence: raw.confidence.min(100),
        };
        return Ok(OptimizationOutcome { document, metrics });
    }

    Err(StageError::upstream(
        STAGE,
        format!(
            "optimization returned no usable sections after {} attempts",
            MAX_OPTIMIZE_RETRIES + 1
        ),
    ))
}

fn build_prompt(source_text: &str, analysis: &JobAnalysis) -> String {
    let keywords: Vec<&str> = analysis
        .keyword_inventory
        .iter()
        .map(|k| k.keyword.as_str())
        .collect();
    let keywords_json = serde_json::to_string(&keywords).unwrap_or_else(|_| "[]".to_string());
    let (strong_verbs, avoid_verbs) = verb_guidance(analysis.detected_tone);

    OPTIMIZE_PROMPT_TEMPLATE
        .replace("{source_text}", source_text)
        .replace("{keywords_json}", &keywords_json)
        .replace("{requirements_summary}", &analysis.requirements_summary())
        .replace("{strong_verbs}", &strong_verbs.join(", "))
        .replace("{avoid_verbs}", &avoid_verbs.join(", "))
}

/// Tone-calibrated verb guidance for the optimization prompt.
pub fn verb_guidance(tone: RoleTone) -> (&'static [&'static str], &'static [&'static str]) {
    match tone {
        RoleTone::AggressiveStartup => (
            &["Architected", "Spearheaded", "Owned", "Drove", "Shipped", "Led"],
            &["assisted", "helped", "supported", "participated in"],
        ),
        RoleTone::CollaborativeEnterprise => (
            &["Contributed to", "Partnered with", "Enabled", "Collaborated on"],
            &["architected", "spearheaded", "solely built"],
        ),
        RoleTone::ResearchOriented => (
            &["Investigated", "Designed and evaluated", "Published", "Analyzed"],
            &["shipped", "launched", "disrupted"],
        ),
        RoleTone::ProductOriented => (
            &["Shipped", "Delivered", "Launched", "Improved"],
            &["investigated", "evaluated", "proposed"],
        ),
    }
}

/// Keywords from the analysis that appear in the optimized document but not
/// in the source. Case-insensitive substring containment.
fn count_keywords_added(
    source_text: &str,
    document: &OptimizedDocument,
    analysis: &JobAnalysis,
) -> u32 {
    let source = source_text.to_lowercase();
    let optimized = document.searchable_text();

    analysis
        .keyword_inventory
        .iter()
        .filter(|kw| {
            let needle = kw.keyword.to_lowercase();
            optimized.contains(&needle) && !source.contains(&needle)
        })
        .count() as u32
}

/// Sections whose body is not carried verbatim from the source.
fn count_sections_touched(source_text: &str, document: &OptimizedDocument) -> u32 {
    document
        .sections
        .iter()
        .filter(|s| !source_text.contains(s.body.trim()))
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::jd_analysis::KeywordWeight;

    fn analysis_with_keywords(keywords: &[&str]) -> JobAnalysis {
        JobAnalysis {
            hard_requirements: vec![],
            soft_signals: vec![],
            seniority: "senior".to_string(),
            keyword_inventory: keywords
                .iter()
                .map(|kw| KeywordWeight {
                    keyword: kw.to_string(),
                    frequency: 3,
                    position_weight: 0.8,
                    weighted_score: 2.4,
                })
                .collect(),
            detected_tone: RoleTone::AggressiveStartup,
        }
    }

    fn document(body: &str) -> OptimizedDocument {
        OptimizedDocument {
            sections: vec![DocumentSection {
                heading: "Experience".to_string(),
                body: body.to_string(),
            }],
        }
    }

    #[test]
    fn test_keywords_added_counts_only_new_keywords() {
        let source = "Built services in Rust for payments infrastructure";
        let doc = document("Architected Rust services on Kubernetes with Kafka pipelines");
        let analysis = analysis_with_keywords(&["Rust", "Kubernetes", "Kafka"]);

        // Rust was already in the source; Kubernetes and Kafka are new.
        assert_eq!(count_keywords_added(source, &doc, &analysis), 2);
    }

    #[test]
    fn test_keywords_added_is_case_insensitive() {
        let source = "built services";
        let doc = document("Deployed on KUBERNETES");
        let analysis = analysis_with_keywords(&["kubernetes"]);
        assert_eq!(count_keywords_added(source, &doc, &analysis), 1);
    }

    #[test]
    fn test_verbatim_section_is_not_touched() {
        let source = "Experience\n- Built the billing system\n";
        let doc = document("- Built the billing system");
        assert_eq!(count_sections_touched(source, &doc), 0);
    }

    #[test]
    fn test_rewritten_section_counts_as_touched() {
        let source = "Experience\n- Built the billing system\n";
        let doc = document("- Architected the billing platform end to end");
        assert_eq!(count_sections_touched(source, &doc), 1);
    }

    #[test]
    fn test_from_raw_text_wraps_single_section() {
        let doc = OptimizedDocument::from_raw_text("some resume text");
        assert_eq!(doc.sections.len(), 1);
        assert!(doc.searchable_text().contains("some resume text"));
    }

    #[test]
    fn test_verb_guidance_differs_by_tone() {
        let (startup, _) = verb_guidance(RoleTone::AggressiveStartup);
        let (enterprise, avoid) = verb_guidance(RoleTone::CollaborativeEnterprise);
        assert!(startup.contains(&"Architected"));
        assert!(avoid.contains(&"architected"));
        assert!(!enterprise.contains(&"Architected"));
    }

    #[test]
    fn test_llm_optimization_deserializes_model_shape() {
        let raw: LlmOptimization = serde_json::from_str(
            r#"{
                "sections": [{"heading": "Experience", "body": "- Shipped things"}],
                "confidence": 85
            }"#,
        )
        .unwrap();
        assert_eq!(raw.sections.len(), 1);
        assert_eq!(raw.confidence, 85);
    }
}
