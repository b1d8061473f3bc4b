//! Rate Limit Engine — decides whether a feature may run for an identity and
//! records consumption after the protected operation succeeds.
//!
//! `check` is a pure read (rule lookup + cached ledger read); it never
//! mutates state. `record_usage` is the only writer and writes through the
//! cache so the engine's own next read observes the increment. Recording is
//! success-gated: callers invoke it only after the protected operation
//! succeeded, and treat its failure as a bookkeeping problem, never as a
//! reason to fail the operation retroactively.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::warn;

use crate::errors::AppError;
use crate::identity::Identity;
use crate::quota::cache::{UsageCache, UsageKey};
use crate::quota::ledger::{Period, UsageLedger};
use crate::quota::rules::QuotaRuleStore;
use crate::quota::FeatureKind;

/// Outcome of a quota check. `allowed` is `current_usage < limit`.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub current_usage: i64,
    pub limit: i64,
    pub remaining: i64,
    pub reset_date: NaiveDate,
}

pub struct RateLimitEngine {
    rules: Arc<dyn QuotaRuleStore>,
    ledger: Arc<dyn UsageLedger>,
    cache: UsageCache,
}

impl RateLimitEngine {
    pub fn new(
        rules: Arc<dyn QuotaRuleStore>,
        ledger: Arc<dyn UsageLedger>,
        cache_ttl: Duration,
    ) -> Self {
        const CACHE_CAPACITY: usize = 4096;
        RateLimitEngine {
            rules,
            ledger,
            cache: UsageCache::new(cache_ttl, CACHE_CAPACITY),
        }
    }

    /// Pure quota check for the current calendar period.
    /// A missing rule is a configuration fault, not a denial.
    pub async fn check(
        &self,
        identity: &Identity,
        feature: FeatureKind,
    ) -> Result<QuotaDecision, AppError> {
        let limit = self
            .rules
            .monthly_limit(&identity.plan_tier, identity.kind(), feature)
            .await?
            .ok_or_else(|| {
                AppError::Configuration(format!(
                    "no quota rule for (plan={}, identity={}, feature={})",
                    identity.plan_tier,
                    identity.kind().as_str(),
                    feature
                ))
            })?;

        let period = Period::current();
        let current_usage = self.cached_count(identity.usage_key(), feature, period).await?;

        Ok(QuotaDecision {
            allowed: current_usage < limit,
            current_usage,
            limit,
            remaining: (limit - current_usage).max(0),
            reset_date: period.reset_date(),
        })
    }

    /// `check` that turns a denial into `AppError::QuotaExceeded`.
    pub async fn enforce(
        &self,
        identity: &Identity,
        feature: FeatureKind,
    ) -> Result<QuotaDecision, AppError> {
        let decision = self.check(identity, feature).await?;
        if !decision.allowed {
            return Err(AppError::QuotaExceeded {
                current_usage: decision.current_usage,
                limit: decision.limit,
                reset_date: decision.reset_date,
            });
        }
        Ok(decision)
    }

    /// Increments the period counter. Invoked at most once per accepted
    /// request, strictly after the protected operation succeeded.
    pub async fn record_usage(
        &self,
        identity: &Identity,
        feature: FeatureKind,
    ) -> Result<(), AppError> {
        let period = Period::current();
        let key = identity.usage_key();
        let count = self.ledger.increment(key, feature, period).await?;
        // Write through so our own next check sees the increment.
        self.cache.insert(UsageKey::new(key, feature, period), count);
        Ok(())
    }

    /// Runs `op` and records usage only if it returned `Ok`. Recording
    /// failures are logged and swallowed — the business operation already
    /// succeeded and must not fail because bookkeeping did.
    pub async fn record_after<T, F>(
        &self,
        identity: &Identity,
        feature: FeatureKind,
        op: F,
    ) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        let out = op.await?;
        if let Err(e) = self.record_usage(identity, feature).await {
            warn!(
                identity = identity.usage_key(),
                feature = %feature,
                "Usage recording failed after successful operation: {e}"
            );
        }
        Ok(out)
    }

    /// Current usage/limit/remaining across every feature kind.
    pub async fn usage_snapshot(
        &self,
        identity: &Identity,
    ) -> Result<BTreeMap<&'static str, QuotaDecision>, AppError> {
        let mut snapshot = BTreeMap::new();
        for feature in FeatureKind::ALL {
            snapshot.insert(feature.as_str(), self.check(identity, feature).await?);
        }
        Ok(snapshot)
    }

    async fn cached_count(
        &self,
        identity_key: &str,
        feature: FeatureKind,
        period: Period,
    ) -> Result<i64, AppError> {
        let key = UsageKey::new(identity_key, feature, period);
        if let Some(count) = self.cache.get(&key) {
            return Ok(count);
        }
        let count = self.ledger.current_count(identity_key, feature, period).await?;
        self.cache.insert(key, count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::identity::IdentityKind;

    struct FakeRules {
        limits: HashMap<(String, IdentityKind, FeatureKind), i64>,
    }

    impl FakeRules {
        fn with(plan: &str, kind: IdentityKind, feature: FeatureKind, limit: i64) -> Self {
            let mut limits = HashMap::new();
            limits.insert((plan.to_string(), kind, feature), limit);
            FakeRules { limits }
        }
    }

    #[async_trait]
    impl QuotaRuleStore for FakeRules {
        async fn monthly_limit(
            &self,
            plan_tier: &str,
            identity_kind: IdentityKind,
            feature: FeatureKind,
        ) -> Result<Option<i64>, AppError> {
            Ok(self
                .limits
                .get(&(plan_tier.to_string(), identity_kind, feature))
                .copied())
        }
    }

    #[derive(Default)]
    struct FakeLedger {
        counts: Mutex<HashMap<(String, FeatureKind, u32, i32), i64>>,
        fail_increments: bool,
    }

    impl FakeLedger {
        fn seed(&self, key: &str, feature: FeatureKind, period: Period, count: i64) {
            self.counts
                .lock()
                .unwrap()
                .insert((key.to_string(), feature, period.month, period.year), count);
        }
    }

    #[async_trait]
    impl UsageLedger for FakeLedger {
        async fn current_count(
            &self,
            identity_key: &str,
            feature: FeatureKind,
            period: Period,
        ) -> Result<i64, AppError> {
            Ok(*self
                .counts
                .lock()
                .unwrap()
                .get(&(identity_key.to_string(), feature, period.month, period.year))
                .unwrap_or(&0))
        }

        async fn increment(
            &self,
            identity_key: &str,
            feature: FeatureKind,
            period: Period,
        ) -> Result<i64, AppError> {
            if self.fail_increments {
                return Err(AppError::Storage("ledger write failed".to_string()));
            }
            let mut counts = self.counts.lock().unwrap();
            let entry = counts
                .entry((identity_key.to_string(), feature, period.month, period.year))
                .or_insert(0);
            *entry += 1;
            Ok(*entry)
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

    fn engine_with(limit: i64, ledger: FakeLedger) -> RateLimitEngine {
        let rules = FakeRules::with(
            "free",
            IdentityKind::Guest,
            FeatureKind::DocumentGeneration,
            limit,
        );
        RateLimitEngine::new(
            Arc::new(rules),
            Arc::new(ledger),
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn test_check_boundary_values_around_limit() {
        // allowed=false iff current_usage >= limit, for every boundary value.
        let limit = 5;
        for usage in 0..=limit + 1 {
            let ledger = FakeLedger::default();
            ledger.seed(
                "g-1",
                FeatureKind::DocumentGeneration,
                Period::current(),
                usage,
            );
            let engine = engine_with(limit, ledger);

            let decision = engine
                .check(&guest("g-1"), FeatureKind::DocumentGeneration)
                .await
                .unwrap();
            assert_eq!(decision.allowed, usage < limit, "usage={usage}");
            assert_eq!(decision.current_usage, usage);
            assert_eq!(decision.limit, limit);
            assert_eq!(decision.remaining, (limit - usage).max(0));
        }
    }

    #[tokio::test]
    async fn test_missing_rule_is_configuration_fault() {
        let engine = engine_with(5, FakeLedger::default());
        let mut identity = guest("g-1");
        identity.plan_tier = "enterprise".to_string(); // no rule configured

        let err = engine
            .check(&identity, FeatureKind::DocumentGeneration)
            .await
            .unwrap_err();
        assert!(
            matches!(err, AppError::Configuration(_)),
            "expected Configuration, got {err:?}"
        );
    }

    #[tokio::test]
    async fn test_record_usage_n_times_counts_n() {
        let engine = engine_with(100, FakeLedger::default());
        let identity = guest("g-1");

        for _ in 0..7 {
            engine
                .record_usage(&identity, FeatureKind::DocumentGeneration)
                .await
                .unwrap();
        }

        let decision = engine
            .check(&identity, FeatureKind::DocumentGeneration)
            .await
            .unwrap();
        assert_eq!(decision.current_usage, 7);
    }

    #[tokio::test]
    async fn test_writer_observes_its_own_write() {
        // The cache is primed with 0, then record_usage writes through.
        let engine = engine_with(5, FakeLedger::default());
        let identity = guest("g-1");

        let before = engine
            .check(&identity, FeatureKind::DocumentGeneration)
            .await
            .unwrap();
        assert_eq!(before.current_usage, 0);

        engine
            .record_usage(&identity, FeatureKind::DocumentGeneration)
            .await
            .unwrap();

        let after = engine
            .check(&identity, FeatureKind::DocumentGeneration)
            .await
            .unwrap();
        assert_eq!(after.current_usage, 1, "cached 0 must not shadow the write");
    }

    #[tokio::test]
    async fn test_enforce_denies_at_limit_with_usage_surface() {
        let ledger = FakeLedger::default();
        ledger.seed("g-1", FeatureKind::DocumentGeneration, Period::current(), 5);
        let engine = engine_with(5, ledger);

        let err = engine
            .enforce(&guest("g-1"), FeatureKind::DocumentGeneration)
            .await
            .unwrap_err();
        match err {
            AppError::QuotaExceeded {
                current_usage,
                limit,
                ..
            } => {
                assert_eq!(current_usage, 5);
                assert_eq!(limit, 5);
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_record_after_success_records_once() {
        let engine = engine_with(5, FakeLedger::default());
        let identity = guest("g-1");

        let out: i32 = engine
            .record_after(&identity, FeatureKind::DocumentGeneration, async { Ok(42) })
            .await
            .unwrap();
        assert_eq!(out, 42);

        let decision = engine
            .check(&identity, FeatureKind::DocumentGeneration)
            .await
            .unwrap();
        assert_eq!(decision.current_usage, 1);
    }

    #[tokio::test]
    async fn test_record_after_failure_does_not_record() {
        let engine = engine_with(5, FakeLedger::default());
        let identity = guest("g-1");

        let result: Result<i32, AppError> = engine
            .record_after(&identity, FeatureKind::DocumentGeneration, async {
                Err(AppError::Validation("bad input".to_string()))
            })
            .await;
        assert!(result.is_err());

        let decision = engine
            .check(&identity, FeatureKind::DocumentGeneration)
            .await
            .unwrap();
        assert_eq!(decision.current_usage, 0, "failed operations never charge quota");
    }

    #[tokio::test]
    async fn test_record_after_swallows_recording_failure() {
        let ledger = FakeLedger {
            fail_increments: true,
            ..FakeLedger::default()
        };
        let engine = engine_with(5, ledger);

        // The wrapped operation succeeded; a ledger write failure must not
        // surface to the caller.
        let out: i32 = engine
            .record_after(&guest("g-1"), FeatureKind::DocumentGeneration, async {
                Ok(7)
            })
            .await
            .unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn test_previous_month_usage_does_not_carry_over() {
        // Usage is keyed by (identity, feature, month, year): a full
        // previous-month counter leaves the current period untouched.
        let ledger = FakeLedger::default();
        let current = Period::current();
        let previous = if current.month == 1 {
            Period { month: 12, year: current.year - 1 }
        } else {
            Period { month: current.month - 1, year: current.year }
        };
        ledger.seed("g-1", FeatureKind::DocumentGeneration, previous, 5);
        let engine = engine_with(5, ledger);

        let decision = engine
            .check(&guest("g-1"), FeatureKind::DocumentGeneration)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.current_usage, 0, "new period starts fresh");

        engine
            .record_usage(&guest("g-1"), FeatureKind::DocumentGeneration)
            .await
            .unwrap();
        let decision = engine
            .check(&guest("g-1"), FeatureKind::DocumentGeneration)
            .await
            .unwrap();
        assert_eq!(decision.current_usage, 1, "fresh counter starts at 1");
    }

    #[tokio::test]
    async fn test_fifth_use_of_five_allows_then_sixth_denied() {
        // Guest at 4/5: the submit is allowed, completion records the 5th
        // use, and the 6th submit is denied with the usage surface.
        let ledger = FakeLedger::default();
        ledger.seed("g-1", FeatureKind::DocumentGeneration, Period::current(), 4);
        let engine = engine_with(5, ledger);
        let identity = guest("g-1");

        let decision = engine
            .enforce(&identity, FeatureKind::DocumentGeneration)
            .await
            .unwrap();
        assert_eq!(decision.current_usage, 4);

        engine
            .record_usage(&identity, FeatureKind::DocumentGeneration)
            .await
            .unwrap();

        let err = engine
            .enforce(&identity, FeatureKind::DocumentGeneration)
            .await
            .unwrap_err();
        match err {
            AppError::QuotaExceeded {
                current_usage,
                limit,
                ..
            } => {
                assert_eq!(current_usage, 5);
                assert_eq!(limit, 5);
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_snapshot_covers_all_features() {
        let mut limits = HashMap::new();
        for feature in FeatureKind::ALL {
            limits.insert(("free".to_string(), IdentityKind::Guest, feature), 10);
        }
        let engine = RateLimitEngine::new(
            Arc::new(FakeRules { limits }),
            Arc::new(FakeLedger::default()),
            Duration::from_secs(300),
        );

        let snapshot = engine.usage_snapshot(&guest("g-1")).await.unwrap();
        assert_eq!(snapshot.len(), FeatureKind::ALL.len());
        for feature in FeatureKind::ALL {
            assert!(snapshot.contains_key(feature.as_str()));
        }
    }
}
