//! Quota enforcement: rule lookup, the durable usage ledger, the bounded
//! read-through cache, and the rate-limit engine that ties them together.

pub mod cache;
pub mod engine;
pub mod ledger;
pub mod rules;

use serde::{Deserialize, Serialize};

/// The category of rate-limited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    DocumentGeneration,
    CompatibilityScoring,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 2] = [
        FeatureKind::DocumentGeneration,
        FeatureKind::CompatibilityScoring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::DocumentGeneration => "document_generation",
            FeatureKind::CompatibilityScoring => "compatibility_scoring",
        }
    }
}

impl std::fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FeatureKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document_generation" => Ok(FeatureKind::DocumentGeneration),
            "compatibility_scoring" => Ok(FeatureKind::CompatibilityScoring),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_kind_round_trips_persisted_form() {
        for feature in FeatureKind::ALL {
            assert_eq!(feature.as_str().parse(), Ok(feature));
        }
    }

    #[test]
    fn test_feature_kind_serde_uses_snake_case() {
        let json = serde_json::to_string(&FeatureKind::DocumentGeneration).unwrap();
        assert_eq!(json, r#""document_generation""#);
    }
}
