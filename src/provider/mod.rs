//! Provider Adapters
//!
//! The seam between the routing core and upstream LLM APIs.

pub mod anthropic;
pub mod openai;

use crate::api::{ChatRequest, ChatResponse};
use crate::client::HttpClient;
use crate::config::snapshot::env_var_name;
use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub use anthropic::AnthropicAdapter;
pub use openai::OpenAiAdapter;

/// Performs the network call to one upstream provider
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider name (e.g., "openai", "anthropic")
    fn name(&self) -> &str;

    /// Whether a bare model name belongs to this provider
    fn supports_model(&self, model: &str) -> bool;

    /// Send a chat request. `request.model` is the upstream model id.
    async fn chat(
        &self,
        request: &ChatRequest,
        api_key: &str,
    ) -> std::result::Result<ChatResponse, ProviderError>;
}

/// Registered adapters, in registration order
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// OpenAI and Anthropic adapters sharing one HTTP client
    pub fn with_defaults() -> Result<Self> {
        let client = Arc::new(HttpClient::new()?);
        let mut registry = Self::new();
        registry.register(Arc::new(OpenAiAdapter::new(client.clone())));
        registry.register(Arc::new(AnthropicAdapter::new(client)));
        Ok(registry)
    }

    /// Add an adapter; one with the same name is replaced in place
    pub fn register(&mut self, provider: Arc<dyn ProviderAdapter>) {
        match self
            .providers
            .iter_mut()
            .find(|p| p.name() == provider.name())
        {
            Some(slot) => *slot = provider,
            None => self.providers.push(provider),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.iter().any(|p| p.name() == name)
    }

    /// First provider, in registration order, claiming a model name
    pub fn find_for_model(&self, model: &str) -> Option<&str> {
        self.providers
            .iter()
            .find(|p| p.supports_model(model))
            .map(|p| p.name())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

/// Base URL from `<PROVIDER>_API_BASE`, else the given default
pub(crate) fn base_url_for(provider: &str, default: &str) -> String {
    std::env::var(env_var_name(provider, "API_BASE"))
        .unwrap_or_else(|_| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_registered_in_order() {
        let registry = ProviderRegistry::with_defaults().unwrap();
        assert_eq!(registry.names(), vec!["openai", "anthropic"]);
        assert_eq!(registry.find_for_model("gpt-4o"), Some("openai"));
        assert_eq!(registry.find_for_model("claude-3-haiku"), Some("anthropic"));
        assert_eq!(registry.find_for_model("mistral-large"), None);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let client = Arc::new(HttpClient::new().unwrap());
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(OpenAiAdapter::new(client.clone())));
        registry.register(Arc::new(
            OpenAiAdapter::new(client).with_base_url("http://localhost:1"),
        ));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("openai"));
        assert!(registry.get("anthropic").is_none());
    }
}
