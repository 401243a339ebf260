//! Quota Ledger
//!
//! Admission and usage recording per virtual key, on top of a [`QuotaStore`].

use crate::config::QuotaSpec;
use crate::error::Result;
use crate::quota::admission::{Admission, QuotaUsage, Reservation};
use crate::quota::store::QuotaStore;
use crate::quota::window::{window_id, Clock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Per-key admission decisions against configured quota specs
#[derive(Clone)]
pub struct QuotaLedger {
    specs: HashMap<String, QuotaSpec>,
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
}

impl QuotaLedger {
    pub fn new(
        specs: HashMap<String, QuotaSpec>,
        store: Arc<dyn QuotaStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            specs,
            store,
            clock,
        }
    }

    /// Spec for a key; keys without one are unlimited
    pub fn spec(&self, key: &str) -> QuotaSpec {
        self.specs.get(key).copied().unwrap_or_default()
    }

    /// Check request rate, token rate and budget, in that order, and reserve
    /// the estimate when all three pass.
    pub async fn admit(
        &self,
        key: &str,
        estimated_tokens: u64,
        estimated_cost_cents: u64,
    ) -> Result<Admission> {
        let spec = self.spec(key);
        let window = window_id(self.clock.now());

        let admission = self
            .store
            .try_admit(key, &spec, window, estimated_tokens, estimated_cost_cents)
            .await?;

        match &admission {
            Admission::Allow(_) => debug!(key = %key, window, estimated_tokens, "admitted"),
            Admission::Deny(denial) => debug!(key = %key, window, %denial, "denied"),
        }

        Ok(admission)
    }

    /// Reconcile a reservation with what the provider actually consumed
    pub async fn record(
        &self,
        reservation: &Reservation,
        actual_tokens: u64,
        actual_cost_cents: u64,
    ) -> Result<()> {
        let window = window_id(self.clock.now());
        self.store
            .reconcile(reservation, window, actual_tokens, actual_cost_cents)
            .await
    }

    pub async fn usage(&self, key: &str) -> Result<Option<QuotaUsage>> {
        let window = window_id(self.clock.now());
        self.store.usage(key, window).await
    }

    /// Same store and clock, new specs
    pub fn with_specs(&self, specs: HashMap<String, QuotaSpec>) -> Self {
        Self {
            specs,
            store: self.store.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl std::fmt::Debug for QuotaLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaLedger")
            .field("specs", &self.specs)
            .finish_non_exhaustive()
    }
}
