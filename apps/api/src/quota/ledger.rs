//! Usage ledger: durable per-identity, per-feature counters keyed by
//! calendar month. Periods reset by the `(month, year)` key rolling over;
//! nothing is ever deleted.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::errors::AppError;
use crate::quota::FeatureKind;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageRecord {
    pub identity_key: String,
    pub feature_kind: String,
    pub month: i32,
    pub year: i32,
    pub count: i64,
    pub last_used_at: DateTime<Utc>,
}

/// A calendar accounting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Period {
    pub month: u32,
    pub year: i32,
}

impl Period {
    pub fn current() -> Self {
        let now = Utc::now();
        Period {
            month: now.month(),
            year: now.year(),
        }
    }

    /// First day of the following month — when counters naturally reset.
    pub fn reset_date(&self) -> NaiveDate {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        // Day 1 of a valid month always exists.
        NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MAX)
    }
}

/// Persistence seam for usage counters.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn current_count(
        &self,
        identity_key: &str,
        feature: FeatureKind,
        period: Period,
    ) -> Result<i64, AppError>;

    /// Increments the period's counter, creating the row on first use.
    /// Returns the new count.
    async fn increment(
        &self,
        identity_key: &str,
        feature: FeatureKind,
        period: Period,
    ) -> Result<i64, AppError>;
}

pub struct PgUsageLedger {
    pool: PgPool,
}

impl PgUsageLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageLedger for PgUsageLedger {
    async fn current_count(
        &self,
        identity_key: &str,
        feature: FeatureKind,
        period: Period,
    ) -> Result<i64, AppError> {
        let record: Option<UsageRecord> = sqlx::query_as(
            r#"
            SELECT identity_key, feature_kind, month, year, count, last_used_at
            FROM usage_records
            WHERE identity_key = $1 AND feature_kind = $2 AND month = $3 AND year = $4
            "#,
        )
        .bind(identity_key)
        .bind(feature.as_str())
        .bind(period.month as i32)
        .bind(period.year)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(|r| r.count).unwrap_or(0))
    }

    async fn increment(
        &self,
        identity_key: &str,
        feature: FeatureKind,
        period: Period,
    ) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO usage_records (identity_key, feature_kind, month, year, count, last_used_at)
            VALUES ($1, $2, $3, $4, 1, now())
            ON CONFLICT (identity_key, feature_kind, month, year)
            DO UPDATE SET count = usage_records.count + 1, last_used_at = now()
            RETURNING count
            "#,
        )
        .bind(identity_key)
        .bind(feature.as_str())
        .bind(period.month as i32)
        .bind(period.year)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
