//! Caller identity as produced by the external identity resolver.
//!
//! The resolver itself (sessions, tokens, guest cookies) lives upstream; this
//! module only consumes its output — forwarded headers — and fixes the one
//! rule the quota subsystem depends on: the usage-key precedence. The same
//! `usage_key()` is used on the check path and the record path; applying it
//! inconsistently would silently fragment quotas.

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

const REGISTERED_ID_HEADER: &str = "x-registered-id";
const GUEST_ID_HEADER: &str = "x-guest-id";
const PLAN_TIER_HEADER: &str = "x-plan-tier";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

const DEFAULT_PLAN_TIER: &str = "free";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Registered,
    Guest,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::Registered => "registered",
            IdentityKind::Guest => "guest",
        }
    }
}

impl std::str::FromStr for IdentityKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registered" => Ok(IdentityKind::Registered),
            "guest" => Ok(IdentityKind::Guest),
            _ => Err(()),
        }
    }
}

/// The resolved caller identity, derived per request and never persisted by
/// this subsystem beyond being a key on jobs, results, and usage rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub registered_id: Option<String>,
    pub guest_id: Option<String>,
    pub source_addr: String,
    pub plan_tier: String,
}

impl Identity {
    pub fn kind(&self) -> IdentityKind {
        if self.registered_id.is_some() {
            IdentityKind::Registered
        } else {
            IdentityKind::Guest
        }
    }

    pub fn is_registered(&self) -> bool {
        self.kind() == IdentityKind::Registered
    }

    /// The key usage and ownership are recorded under.
    /// Precedence: registered id, else guest id, else source address.
    pub fn usage_key(&self) -> &str {
        if let Some(id) = self.registered_id.as_deref() {
            if !id.is_empty() {
                return id;
            }
        }
        if let Some(id) = self.guest_id.as_deref() {
            if !id.is_empty() {
                return id;
            }
        }
        &self.source_addr
    }

    /// Rebuilds an identity from the parts persisted on a queue job row,
    /// for the worker-side usage-recording path.
    pub fn from_parts(kind: IdentityKind, usage_key: &str, plan_tier: &str) -> Self {
        let (registered_id, guest_id) = match kind {
            IdentityKind::Registered => (Some(usage_key.to_string()), None),
            IdentityKind::Guest => (None, Some(usage_key.to_string())),
        };
        Identity {
            registered_id,
            guest_id,
            source_addr: usage_key.to_string(),
            plan_tier: plan_tier.to_string(),
        }
    }
}

/// Extracts the identity tuple the upstream resolver forwarded on the request.
/// A request with neither a registered nor a guest id is treated as a guest
/// keyed by its source address.
#[axum::async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| -> Option<String> {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let source_addr = header(FORWARDED_FOR_HEADER)
            .map(|raw| {
                // First hop of a comma-separated forwarding chain.
                raw.split(',')
                    .next()
                    .unwrap_or(raw.as_str())
                    .trim()
                    .to_string()
            })
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Identity {
            registered_id: header(REGISTERED_ID_HEADER),
            guest_id: header(GUEST_ID_HEADER),
            source_addr,
            plan_tier: header(PLAN_TIER_HEADER).unwrap_or_else(|| DEFAULT_PLAN_TIER.to_string()),
        })
    }
}
