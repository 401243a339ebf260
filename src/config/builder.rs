//! Configuration Builder
//!
//! Fluent assembly of a [`GatewayConfig`]. No validation happens here:
//! negative priorities, empty fallback lists and unknown providers only
//! surface once the gateway uses them.

use crate::config::snapshot::{GatewayConfig, QuotaSpec, RoutingRule};

/// Accumulates configuration until [`ConfigBuilder::build`] detaches a snapshot
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: GatewayConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the secret for a provider
    pub fn with_api_key(
        &mut self,
        provider: impl Into<String>,
        key: impl Into<String>,
    ) -> &mut Self {
        self.config.api_keys.insert(provider.into(), key.into());
        self
    }

    /// Upsert an alias; a later target replaces an earlier one
    pub fn with_alias(&mut self, alias: impl Into<String>, target: impl Into<String>) -> &mut Self {
        self.config.model_aliases.insert(alias.into(), target.into());
        self
    }

    /// Append a routing rule. Duplicate names stay independent entries.
    pub fn with_routing_rule<I, S>(
        &mut self,
        name: impl Into<String>,
        priority: i64,
        fallbacks: I,
    ) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fallback_models = fallbacks.into_iter().map(Into::into).collect();
        self.config
            .routing_rules
            .push(RoutingRule::new(name, priority, fallback_models));
        self
    }

    /// Replace the quota spec of a key wholesale
    pub fn with_quota(
        &mut self,
        key: impl Into<String>,
        rpm: Option<u64>,
        tpm: Option<u64>,
        budget_cents: Option<u64>,
    ) -> &mut Self {
        self.config.quotas.insert(
            key.into(),
            QuotaSpec {
                max_requests_per_minute: rpm,
                max_tokens_per_minute: tpm,
                budget_cents,
            },
        );
        self
    }

    pub fn with_default_provider(&mut self, provider: impl Into<String>) -> &mut Self {
        self.config.default_provider = Some(provider.into());
        self
    }

    /// Detach an immutable snapshot. Leaves the builder untouched.
    pub fn build(&self) -> GatewayConfig {
        self.config.clone()
    }

    /// The snapshot in its serialized mapping form
    pub fn to_dict(&self) -> serde_json::Value {
        // A struct of maps, strings and integers always serializes.
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }
}

impl From<GatewayConfig> for ConfigBuilder {
    fn from(config: GatewayConfig) -> Self {
        Self { config }
    }
}
