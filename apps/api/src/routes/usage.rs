//! Usage dashboard endpoint.

use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::Value;

use crate::errors::AppError;
use crate::identity::Identity;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub plan_tier: String,
    pub features: BTreeMap<&'static str, Value>,
}

/// GET /api/v1/usage
///
/// Current usage, limit, and reset date across every feature kind.
pub async fn handle_usage(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<UsageResponse>, AppError> {
    let snapshot = state.engine.usage_snapshot(&identity).await?;

    let mut features = BTreeMap::new();
    for (feature, decision) in snapshot {
        features.insert(
            feature,
            serde_json::json!({
                "allowed": decision.allowed,
                "used": decision.current_usage,
                "limit": decision.limit,
                "remaining": decision.remaining,
                "reset_date": decision.reset_date,
            }),
        );
    }

    Ok(Json(UsageResponse {
        plan_tier: identity.plan_tier.clone(),
        features,
    }))
}
