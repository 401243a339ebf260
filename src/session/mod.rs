//! Gateway Session
//!
//! Orchestrates one `chat` call: alias resolution, candidate selection,
//! admission, dispatch and usage recording.

use crate::api::{ChatMessage, ChatRequest, ChatResponse};
use crate::config::GatewayConfig;
use crate::error::{Attempt, AttemptFailure, GatewayError, Result};
use crate::provider::ProviderRegistry;
use crate::quota::{
    Admission, Clock, CostModel, InMemoryQuotaStore, NoCost, QuotaLedger, QuotaStore, QuotaUsage,
    SystemClock,
};
use crate::router::{AliasTable, ModelRoute, RoutingTable};
use crate::telemetry::{TracingUsageSink, UsageEvent, UsageSink};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

mod policy;

pub use policy::{PolicyAction, PolicyUpdate};
use policy::Revocations;

/// Lifecycle position of a [`Gateway`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Ready,
    Closed,
}

/// Everything derived from one configuration snapshot
struct Engine {
    config: Arc<GatewayConfig>,
    aliases: AliasTable,
    routes: RoutingTable,
    ledger: QuotaLedger,
}

impl Engine {
    fn new(config: GatewayConfig, ledger: QuotaLedger) -> Self {
        Self {
            aliases: AliasTable::new(config.model_aliases.clone()),
            routes: RoutingTable::new(config.routing_rules.clone()),
            config: Arc::new(config),
            ledger,
        }
    }
}

enum SessionState {
    Uninitialized,
    Ready(Arc<Engine>),
    Closed,
}

/// Shared entrypoint for concurrent `chat` calls
pub struct Gateway {
    config: GatewayConfig,
    registry: ProviderRegistry,
    store: Arc<dyn QuotaStore>,
    cost_model: Arc<dyn CostModel>,
    clock: Arc<dyn Clock>,
    usage_sink: Arc<dyn UsageSink>,
    revocations: Revocations,
    state: RwLock<SessionState>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl Gateway {
    /// An uninitialized session with an in-process quota store
    pub fn new(config: GatewayConfig, registry: ProviderRegistry) -> Self {
        Self {
            config,
            registry,
            store: Arc::new(InMemoryQuotaStore::new()),
            cost_model: Arc::new(NoCost),
            clock: Arc::new(SystemClock),
            usage_sink: Arc::new(TracingUsageSink),
            revocations: Revocations::default(),
            state: RwLock::new(SessionState::Uninitialized),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn QuotaStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_cost_model(mut self, cost_model: Arc<dyn CostModel>) -> Self {
        self.cost_model = cost_model;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Where per-call usage events go. Defaults to debug logging.
    pub fn with_usage_sink(mut self, usage_sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = usage_sink;
        self
    }

    pub fn status(&self) -> SessionStatus {
        match &*self.state.read() {
            SessionState::Uninitialized => SessionStatus::Uninitialized,
            SessionState::Ready(_) => SessionStatus::Ready,
            SessionState::Closed => SessionStatus::Closed,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Connect the quota store and move to `Ready`. A no-op when already ready.
    pub async fn init(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        match self.status() {
            SessionStatus::Ready => return Ok(()),
            SessionStatus::Closed => return Err(GatewayError::SessionClosed),
            SessionStatus::Uninitialized => {}
        }

        self.store.connect().await?;

        let ledger = QuotaLedger::new(
            self.config.quotas.clone(),
            self.store.clone(),
            self.clock.clone(),
        );
        let engine = Engine::new(self.config.clone(), ledger);
        *self.state.write() = SessionState::Ready(Arc::new(engine));

        info!(
            providers = ?self.registry.names(),
            rules = self.config.routing_rules.len(),
            aliases = self.config.model_aliases.len(),
            "gateway initialized"
        );
        Ok(())
    }

    /// Release the store and move to `Closed`. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let previous = std::mem::replace(&mut *self.state.write(), SessionState::Closed);
        match previous {
            SessionState::Ready(_) => {
                info!("gateway closed");
                self.store.close().await
            }
            SessionState::Uninitialized | SessionState::Closed => Ok(()),
        }
    }

    /// Swap in a new configuration. Quota counters carry over and calls
    /// already in flight finish on the snapshot they started with.
    pub fn reload(&self, config: GatewayConfig) -> Result<()> {
        let mut state = self.state.write();
        let ledger = match &*state {
            SessionState::Ready(engine) => engine.ledger.with_specs(config.quotas.clone()),
            SessionState::Uninitialized => return Err(GatewayError::NotInitialized),
            SessionState::Closed => return Err(GatewayError::SessionClosed),
        };

        info!(rules = config.routing_rules.len(), "gateway configuration reloaded");
        *state = SessionState::Ready(Arc::new(Engine::new(config, ledger)));
        Ok(())
    }

    /// Apply a revocation or restore.
    ///
    /// Revocations outlive `reload` and may be applied before `init`. Calls
    /// already admitted for the key run to completion.
    pub fn apply_policy(&self, update: PolicyUpdate) -> Result<()> {
        if self.status() == SessionStatus::Closed {
            return Err(GatewayError::SessionClosed);
        }

        let key = update.key.clone();
        let action = update.action;
        if self.revocations.apply(update) {
            info!(key = %key, ?action, "key policy updated");
        }
        Ok(())
    }

    /// Refuse every new call for `key`
    pub fn revoke(&self, key: &str, reason: Option<&str>) -> Result<()> {
        self.apply_policy(PolicyUpdate::revoke(key, reason.map(str::to_string)))
    }

    pub fn restore(&self, key: &str) -> Result<()> {
        self.apply_policy(PolicyUpdate::restore(key))
    }

    pub fn is_revoked(&self, key: &str) -> bool {
        self.revocations.is_revoked(key)
    }

    /// The snapshot new calls are served from
    pub fn config(&self) -> Result<Arc<GatewayConfig>> {
        Ok(self.engine()?.config.clone())
    }

    /// Current-window consumption for a virtual key
    pub async fn usage(&self, key: &str) -> Result<Option<QuotaUsage>> {
        let engine = self.engine()?;
        engine.ledger.usage(key).await
    }

    fn engine(&self) -> Result<Arc<Engine>> {
        match &*self.state.read() {
            SessionState::Ready(engine) => Ok(engine.clone()),
            SessionState::Uninitialized => Err(GatewayError::NotInitialized),
            SessionState::Closed => Err(GatewayError::SessionClosed),
        }
    }

    /// Serve a chat call for `key`, walking the fallback chain of `model`.
    ///
    /// Quota denials, unroutable candidates and retryable provider failures
    /// move on to the next candidate. A non-retryable provider failure ends
    /// the call immediately with [`GatewayError::Aborted`]. Revoked keys are
    /// refused before any candidate is tried.
    pub async fn chat(
        &self,
        key: &str,
        model: &str,
        messages: Vec<ChatMessage>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<ChatResponse> {
        let engine = self.engine()?;
        if let Err(err) = self.revocations.check(key) {
            warn!(key = %key, "call refused for revoked key");
            return Err(err);
        }

        let canonical = engine.aliases.resolve(model);
        let candidates = engine.routes.select(canonical);
        debug!(
            key = %key,
            requested = %model,
            canonical = %canonical,
            aliased = engine.aliases.is_alias(model),
            ?candidates,
            "routing"
        );

        let mut request = ChatRequest {
            model: String::new(),
            messages,
            temperature,
            max_tokens,
        };
        let mut attempts = Vec::new();
        let mut last_error: Option<GatewayError> = None;

        for candidate in candidates {
            let default_provider = engine.config.default_provider.as_deref();
            let Some(route) =
                ModelRoute::resolve(&candidate, &self.registry, default_provider)
            else {
                debug!(candidate = %candidate, "no provider for candidate");
                attempts.push(Attempt {
                    failure: AttemptFailure::Unroutable(format!(
                        "no provider registered for '{}'",
                        candidate
                    )),
                    candidate,
                });
                continue;
            };

            let (Some(adapter), Some(api_key)) = (
                self.registry.get(&route.provider),
                engine.config.api_key_for(&route.provider),
            ) else {
                debug!(
                    candidate = %candidate,
                    provider = %route.provider,
                    "no API key for provider"
                );
                attempts.push(Attempt {
                    failure: AttemptFailure::Unroutable(format!(
                        "no API key for provider '{}'",
                        route.provider
                    )),
                    candidate,
                });
                continue;
            };

            request.model = route.model.clone();
            let estimated_tokens = request.estimated_tokens();
            let estimated_cost = self
                .cost_model
                .estimate_cents(&route.model, estimated_tokens);

            let reservation = match engine
                .ledger
                .admit(key, estimated_tokens, estimated_cost)
                .await?
            {
                Admission::Allow(reservation) => reservation,
                Admission::Deny(denial) => {
                    warn!(
                        key = %key,
                        candidate = %candidate,
                        %denial,
                        "quota denied, falling back"
                    );
                    last_error = Some(GatewayError::from(denial.clone()));
                    attempts.push(Attempt {
                        candidate,
                        failure: AttemptFailure::Denied(denial),
                    });
                    continue;
                }
            };

            let started = Instant::now();
            match adapter.chat(&request, &api_key).await {
                Ok(response) => {
                    let latency = started.elapsed();
                    let (tokens, cost) = match &response.usage {
                        Some(usage) => (
                            usage.tokens(),
                            self.cost_model.actual_cents(&route.model, usage),
                        ),
                        None => (estimated_tokens, estimated_cost),
                    };

                    // The upstream call already happened, a bookkeeping
                    // failure must not discard its response.
                    if let Err(e) = engine.ledger.record(&reservation, tokens, cost).await {
                        warn!(key = %key, error = %e, "failed to record usage");
                    }

                    self.usage_sink.record(UsageEvent {
                        key: key.to_string(),
                        requested_model: model.to_string(),
                        canonical_model: canonical.to_string(),
                        candidate,
                        provider: route.provider.clone(),
                        model: route.model.clone(),
                        prompt_tokens: response.usage.as_ref().map(|u| u.prompt_tokens),
                        completion_tokens: response.usage.as_ref().map(|u| u.completion_tokens),
                        tokens,
                        cost_cents: cost,
                        latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        timestamp: self.clock.now(),
                    });

                    info!(key = %key, route = %route, tokens, cost_cents = cost, "chat served");
                    return Ok(response);
                }
                Err(err) if err.retryable => {
                    warn!(
                        key = %key,
                        route = %route,
                        error = %err,
                        "candidate failed, falling back"
                    );
                    attempts.push(Attempt {
                        candidate,
                        failure: AttemptFailure::Provider(err.clone()),
                    });
                    last_error = Some(GatewayError::Provider(err));
                }
                Err(err) => {
                    error!(
                        key = %key,
                        route = %route,
                        error = %err,
                        earlier_attempts = attempts.len(),
                        "non-retryable provider failure"
                    );
                    return Err(GatewayError::Aborted {
                        candidate,
                        error: err,
                        attempts,
                    });
                }
            }
        }

        warn!(
            key = %key,
            requested = %model,
            attempts = attempts.len(),
            "all candidates exhausted"
        );
        Err(GatewayError::AllCandidatesExhausted {
            attempts,
            last_error: last_error.map(Box::new),
        })
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("status", &self.status())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
