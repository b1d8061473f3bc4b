//! Quota rules: configured monthly allowances per (plan tier, identity kind,
//! feature). Read-only from this subsystem's perspective — rows are managed
//! by operators, never written here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::errors::AppError;
use crate::identity::IdentityKind;
use crate::quota::FeatureKind;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuotaRule {
    pub plan_tier: String,
    pub identity_kind: String,
    pub feature_kind: String,
    pub monthly_limit: i64,
    pub active: bool,
}

/// Lookup seam for quota rules, injected into the rate-limit engine.
#[async_trait]
pub trait QuotaRuleStore: Send + Sync {
    /// Returns the active monthly limit for the triple, or `None` when no
    /// rule is configured. The engine treats `None` as a configuration
    /// fault, not as a denial.
    async fn monthly_limit(
        &self,
        plan_tier: &str,
        identity_kind: IdentityKind,
        feature: FeatureKind,
    ) -> Result<Option<i64>, AppError>;
}

pub struct PgQuotaRuleStore {
    pool: PgPool,
}

impl PgQuotaRuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaRuleStore for PgQuotaRuleStore {
    async fn monthly_limit(
        &self,
        plan_tier: &str,
        identity_kind: IdentityKind,
        feature: FeatureKind,
    ) -> Result<Option<i64>, AppError> {
        let rule: Option<QuotaRule> = sqlx::query_as(
            r#"
            SELECT plan_tier, identity_kind, feature_kind, monthly_limit, active
            FROM quota_rules
            WHERE plan_tier = $1 AND identity_kind = $2 AND feature_kind = $3 AND active
            "#,
        )
        .bind(plan_tier)
        .bind(identity_kind.as_str())
        .bind(feature.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(rule.map(|r| r.monthly_limit))
    }
}
