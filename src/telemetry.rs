//! Usage Telemetry
//!
//! One [`UsageEvent`] per served `chat` call, delivered to a [`UsageSink`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

/// A served chat call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageEvent {
    pub key: String,

    /// Model name as the caller sent it
    pub requested_model: String,

    /// Model name after alias resolution
    pub canonical_model: String,

    /// Fallback candidate that served the call
    pub candidate: String,

    pub provider: String,

    /// Model name sent upstream
    pub model: String,

    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,

    /// Tokens billed to the quota ledger
    pub tokens: u64,

    pub cost_cents: u64,

    /// Time spent in the upstream call
    pub latency_ms: u64,

    pub timestamp: DateTime<Utc>,
}

/// Receiver for usage events.
///
/// Called inline on the `chat` path after usage is recorded, so
/// implementations should hand off rather than block.
pub trait UsageSink: Send + Sync {
    fn record(&self, event: UsageEvent);
}

/// Logs every event at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUsageSink;

impl UsageSink for TracingUsageSink {
    fn record(&self, event: UsageEvent) {
        debug!(
            key = %event.key,
            model = %event.canonical_model,
            provider = %event.provider,
            tokens = event.tokens,
            cost_cents = event.cost_cents,
            latency_ms = event.latency_ms,
            "usage"
        );
    }
}

/// Keeps events in memory until drained
#[derive(Debug, Default)]
pub struct InMemoryUsageSink {
    events: Mutex<Vec<UsageEvent>>,
}

impl InMemoryUsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn events(&self) -> Vec<UsageEvent> {
        self.events.lock().clone()
    }

    pub fn events_for_key(&self, key: &str) -> Vec<UsageEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.key == key)
            .cloned()
            .collect()
    }

    /// Take every event, leaving the sink empty
    pub fn drain(&self) -> Vec<UsageEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl UsageSink for InMemoryUsageSink {
    fn record(&self, event: UsageEvent) {
        self.events.lock().push(event);
    }
}
