//! Quota State Store
//!
//! Operation contract for the backend holding per-key counters, and the
//! in-process implementation.

use crate::config::QuotaSpec;
use crate::error::Result;
use crate::quota::admission::{Admission, QuotaDenial, QuotaDimension, QuotaUsage, Reservation};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Backing store for quota state.
///
/// `try_admit` must be atomic per key: check every axis and commit only if
/// all pass. A network-backed store implements it as a single server-side
/// script or transaction.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Establish connections. Called once by `Gateway::init`.
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Check `spec` for `key` in `window` and reserve on success
    async fn try_admit(
        &self,
        key: &str,
        spec: &QuotaSpec,
        window: i64,
        tokens: u64,
        cost_cents: u64,
    ) -> Result<Admission>;

    /// Replace a reservation's estimates with actual consumption
    async fn reconcile(
        &self,
        reservation: &Reservation,
        window: i64,
        actual_tokens: u64,
        actual_cost_cents: u64,
    ) -> Result<()>;

    /// Current consumption, `None` for keys never seen
    async fn usage(&self, key: &str, window: i64) -> Result<Option<QuotaUsage>>;

    /// Release connections. Must be idempotent.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Counters for one virtual key
#[derive(Debug, Default)]
struct KeyState {
    window: i64,
    requests: u64,
    tokens: u64,
    spent_cents: u64,
}

impl KeyState {
    fn new(window: i64) -> Self {
        Self {
            window,
            ..Default::default()
        }
    }

    /// Reset the rate counters when entering a later window
    fn roll(&mut self, window: i64) {
        if window > self.window {
            self.window = window;
            self.requests = 0;
            self.tokens = 0;
        }
    }

    fn check(
        &self,
        key: &str,
        spec: &QuotaSpec,
        tokens: u64,
        cost_cents: u64,
    ) -> Option<QuotaDenial> {
        if spec.is_unlimited() {
            return None;
        }

        let deny = |dimension, limit, current, requested| QuotaDenial {
            key: key.to_string(),
            dimension,
            limit,
            current,
            requested,
        };

        if let Some(limit) = spec.max_requests_per_minute {
            if self.requests.saturating_add(1) > limit {
                return Some(deny(QuotaDimension::Requests, limit, self.requests, 1));
            }
        }

        if let Some(limit) = spec.max_tokens_per_minute {
            if self.tokens.saturating_add(tokens) > limit {
                return Some(deny(QuotaDimension::Tokens, limit, self.tokens, tokens));
            }
        }

        if let Some(limit) = spec.budget_cents {
            if self.spent_cents.saturating_add(cost_cents) > limit {
                return Some(deny(QuotaDimension::Budget, limit, self.spent_cents, cost_cents));
            }
        }

        None
    }
}

/// In-process quota store.
///
/// One mutex per key; the outer map lock is only held to look up or insert
/// a key's slot, so unrelated keys never wait on each other's checks.
#[derive(Debug, Default)]
pub struct InMemoryQuotaStore {
    keys: RwLock<HashMap<String, Arc<Mutex<KeyState>>>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str, window: i64) -> Arc<Mutex<KeyState>> {
        if let Some(slot) = self.keys.read().get(key) {
            return slot.clone();
        }

        let mut keys = self.keys.write();
        keys.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(KeyState::new(window))))
            .clone()
    }

    /// Number of keys with state
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn try_admit(
        &self,
        key: &str,
        spec: &QuotaSpec,
        window: i64,
        tokens: u64,
        cost_cents: u64,
    ) -> Result<Admission> {
        let slot = self.slot(key, window);
        let mut state = slot.lock();
        state.roll(window);

        if let Some(denial) = state.check(key, spec, tokens, cost_cents) {
            return Ok(Admission::Deny(denial));
        }

        state.requests += 1;
        state.tokens = state.tokens.saturating_add(tokens);
        state.spent_cents = state.spent_cents.saturating_add(cost_cents);

        Ok(Admission::Allow(Reservation {
            key: key.to_string(),
            window: state.window,
            tokens,
            cost_cents,
        }))
    }

    async fn reconcile(
        &self,
        reservation: &Reservation,
        window: i64,
        actual_tokens: u64,
        actual_cost_cents: u64,
    ) -> Result<()> {
        let slot = self.slot(&reservation.key, window);
        let mut state = slot.lock();
        state.roll(window);

        if state.window == reservation.window {
            state.tokens = state
                .tokens
                .saturating_sub(reservation.tokens)
                .saturating_add(actual_tokens);
        } else {
            // The reserved window is gone; bill the actual usage to this one.
            state.tokens = state.tokens.saturating_add(actual_tokens);
        }

        state.spent_cents = state
            .spent_cents
            .saturating_sub(reservation.cost_cents)
            .saturating_add(actual_cost_cents);

        Ok(())
    }

    async fn usage(&self, key: &str, window: i64) -> Result<Option<QuotaUsage>> {
        let Some(slot) = self.keys.read().get(key).cloned() else {
            return Ok(None);
        };

        let state = slot.lock();
        let current = state.window >= window;
        Ok(Some(QuotaUsage {
            requests: if current { state.requests } else { 0 },
            tokens: if current { state.tokens } else { 0 },
            spent_cents: state.spent_cents,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(rpm: Option<u64>, tpm: Option<u64>, budget: Option<u64>) -> QuotaSpec {
        QuotaSpec {
            max_requests_per_minute: rpm,
            max_tokens_per_minute: tpm,
            budget_cents: budget,
        }
    }

    #[tokio::test]
    async fn test_request_limit() {
        let store = InMemoryQuotaStore::new();
        let spec = spec(Some(2), None, None);

        assert!(store.try_admit("k", &spec, 1, 0, 0).await.unwrap().is_allowed());
        assert!(store.try_admit("k", &spec, 1, 0, 0).await.unwrap().is_allowed());

        match store.try_admit("k", &spec, 1, 0, 0).await.unwrap() {
            Admission::Deny(denial) => {
                assert_eq!(denial.dimension, QuotaDimension::Requests);
                assert_eq!(denial.current, 2);
            }
            Admission::Allow(_) => panic!("third request admitted"),
        }
    }

    #[tokio::test]
    async fn test_unlimited_spec_admits_and_tracks() {
        let store = InMemoryQuotaStore::new();
        let unlimited = QuotaSpec::unlimited();

        for _ in 0..3 {
            let admission = store.try_admit("k", &unlimited, 1, u64::MAX, u64::MAX).await;
            assert!(admission.unwrap().is_allowed());
        }

        let usage = store.usage("k", 1).await.unwrap().unwrap();
        assert_eq!(usage.requests, 3);
        assert_eq!(usage.tokens, u64::MAX);
    }

    #[tokio::test]
    async fn test_denial_leaves_state_untouched() {
        let store = InMemoryQuotaStore::new();
        let spec = spec(Some(10), Some(100), None);

        store.try_admit("k", &spec, 1, 60, 0).await.unwrap();
        let denied = store.try_admit("k", &spec, 1, 50, 0).await.unwrap();
        assert!(!denied.is_allowed());

        let usage = store.usage("k", 1).await.unwrap().unwrap();
        assert_eq!(usage.requests, 1);
        assert_eq!(usage.tokens, 60);
    }

    #[tokio::test]
    async fn test_check_order_requests_then_tokens_then_budget() {
        let store = InMemoryQuotaStore::new();
        let spec = spec(Some(0), Some(0), Some(0));

        match store.try_admit("k", &spec, 1, 5, 5).await.unwrap() {
            Admission::Deny(denial) => assert_eq!(denial.dimension, QuotaDimension::Requests),
            Admission::Allow(_) => panic!("admitted"),
        }

        let spec = QuotaSpec {
            max_requests_per_minute: None,
            ..spec
        };
        match store.try_admit("k", &spec, 1, 5, 5).await.unwrap() {
            Admission::Deny(denial) => assert_eq!(denial.dimension, QuotaDimension::Tokens),
            Admission::Allow(_) => panic!("admitted"),
        }
    }

    #[tokio::test]
    async fn test_window_roll_resets_rates_not_budget() {
        let store = InMemoryQuotaStore::new();
        let spec = spec(Some(1), None, Some(10));

        store.try_admit("k", &spec, 1, 5, 4).await.unwrap();
        assert!(!store.try_admit("k", &spec, 1, 5, 4).await.unwrap().is_allowed());
        assert!(store.try_admit("k", &spec, 2, 5, 4).await.unwrap().is_allowed());

        let usage = store.usage("k", 2).await.unwrap().unwrap();
        assert_eq!(usage.requests, 1);
        assert_eq!(usage.tokens, 5);
        assert_eq!(usage.spent_cents, 8);

        match store.try_admit("k", &spec, 3, 5, 4).await.unwrap() {
            Admission::Deny(denial) => assert_eq!(denial.dimension, QuotaDimension::Budget),
            Admission::Allow(_) => panic!("budget overrun admitted"),
        }
    }

    #[tokio::test]
    async fn test_reconcile_refunds_without_going_negative() {
        let store = InMemoryQuotaStore::new();
        let unlimited = QuotaSpec::unlimited();

        let Admission::Allow(reservation) =
            store.try_admit("k", &unlimited, 1, 100, 20).await.unwrap()
        else {
            panic!("denied");
        };

        store.reconcile(&reservation, 1, 30, 5).await.unwrap();
        let usage = store.usage("k", 1).await.unwrap().unwrap();
        assert_eq!(usage.tokens, 30);
        assert_eq!(usage.spent_cents, 5);

        // A second reconcile of the same reservation clamps at zero.
        store.reconcile(&reservation, 1, 0, 0).await.unwrap();
        let usage = store.usage("k", 1).await.unwrap().unwrap();
        assert_eq!(usage.tokens, 0);
        assert_eq!(usage.spent_cents, 0);
    }

    #[tokio::test]
    async fn test_reconcile_after_window_roll_bills_current_window() {
        let store = InMemoryQuotaStore::new();
        let unlimited = QuotaSpec::unlimited();

        let Admission::Allow(reservation) =
            store.try_admit("k", &unlimited, 1, 100, 0).await.unwrap()
        else {
            panic!("denied");
        };

        store.reconcile(&reservation, 2, 40, 0).await.unwrap();
        let usage = store.usage("k", 2).await.unwrap().unwrap();
        assert_eq!(usage.tokens, 40);
        assert_eq!(usage.requests, 0);
    }

    #[tokio::test]
    async fn test_unseen_key_has_no_usage() {
        let store = InMemoryQuotaStore::new();
        assert!(store.usage("nobody", 1).await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
