//! Admission Types
//!
//! Results exchanged between the quota ledger, its backing store and the
//! gateway session.

use serde::Serialize;
use std::fmt;

/// The quota axis that refused admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaDimension {
    Requests,
    Tokens,
    Budget,
}

impl fmt::Display for QuotaDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuotaDimension::Requests => "max_requests_per_minute",
            QuotaDimension::Tokens => "max_tokens_per_minute",
            QuotaDimension::Budget => "budget_cents",
        };
        f.write_str(name)
    }
}

/// A refused admission. Not an error: it drives fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDenial {
    pub key: String,
    pub dimension: QuotaDimension,
    pub limit: u64,
    pub current: u64,
    pub requested: u64,
}

impl fmt::Display for QuotaDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "quota denied for key '{}' on {} ({} used + {} requested > {})",
            self.key, self.dimension, self.current, self.requested, self.limit
        )
    }
}

/// Quota held for an admitted call until `record` reconciles it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub key: String,
    pub window: i64,
    pub tokens: u64,
    pub cost_cents: u64,
}

/// Outcome of an admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allow(Reservation),
    Deny(QuotaDenial),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allow(_))
    }
}

/// Consumption visible for a key in the current window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub requests: u64,
    pub tokens: u64,
    pub spent_cents: u64,
}
