//! Configuration Snapshot
//!
//! The immutable configuration consumed by the gateway engine. Its JSON form
//! is the boundary contract between the builder and the engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Root configuration structure
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Provider name -> upstream secret
    #[serde(default)]
    pub api_keys: HashMap<String, String>,

    /// Routing rules in registration order
    #[serde(default)]
    pub routing_rules: Vec<RoutingRule>,

    /// Virtual key -> quota limits
    #[serde(default)]
    pub quotas: HashMap<String, QuotaSpec>,

    /// Alias -> canonical model
    #[serde(default)]
    pub model_aliases: HashMap<String, String>,

    /// Provider used when a model cannot be attributed to one
    #[serde(default)]
    pub default_provider: Option<String>,
}

/// A named, prioritised fallback chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub name: String,

    /// Higher is preferred; negative values are accepted
    pub priority: i64,

    /// Canonical models to try in order, first is the primary
    #[serde(default)]
    pub fallback_models: Vec<String>,
}

impl RoutingRule {
    pub fn new(name: impl Into<String>, priority: i64, fallback_models: Vec<String>) -> Self {
        Self {
            name: name.into(),
            priority,
            fallback_models,
        }
    }

    /// The model this rule is selected for
    pub fn primary(&self) -> Option<&str> {
        self.fallback_models.first().map(String::as_str)
    }
}

/// Per-key limits. `None` means unlimited on that axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSpec {
    #[serde(default)]
    pub max_requests_per_minute: Option<u64>,

    #[serde(default)]
    pub max_tokens_per_minute: Option<u64>,

    #[serde(default)]
    pub budget_cents: Option<u64>,
}

impl QuotaSpec {
    /// A spec with no limits on any axis
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_requests_per_minute.is_none()
            && self.max_tokens_per_minute.is_none()
            && self.budget_cents.is_none()
    }
}

impl GatewayConfig {
    /// Parse a snapshot from its JSON form
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the snapshot to JSON
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Secret for a provider, falling back to `<PROVIDER>_API_KEY`
    pub fn api_key_for(&self, provider: &str) -> Option<String> {
        if let Some(key) = self.api_keys.get(provider) {
            return Some(key.clone());
        }
        std::env::var(env_var_name(provider, "API_KEY")).ok()
    }
}

/// `openai`, `API_KEY` -> `OPENAI_API_KEY`
pub(crate) fn env_var_name(provider: &str, suffix: &str) -> String {
    format!("{}_{}", provider.to_uppercase().replace('-', "_"), suffix)
}

// Secrets must never reach logs, so the derived Debug is not used.
impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut providers: Vec<&String> = self.api_keys.keys().collect();
        providers.sort();
        f.debug_struct("GatewayConfig")
            .field("api_keys", &RedactedKeys(providers))
            .field("routing_rules", &self.routing_rules)
            .field("quotas", &self.quotas)
            .field("model_aliases", &self.model_aliases)
            .field("default_provider", &self.default_provider)
            .finish()
    }
}

struct RedactedKeys<'a>(Vec<&'a String>);

impl fmt::Debug for RedactedKeys<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|p| (p, "<redacted>")))
            .finish()
    }
}
