//! Model Routing
//!
//! Attributes a canonical candidate model to a registered provider.

use crate::provider::ProviderRegistry;

/// A candidate bound to the provider that will serve it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    /// Provider name (e.g., "openai", "anthropic")
    pub provider: String,

    /// Model id sent upstream (provider prefix stripped)
    pub model: String,
}

impl ModelRoute {
    /// Resolve a candidate in the form "provider/model" or a bare model name.
    ///
    /// An explicit prefix only counts when it names a registered provider, so
    /// upstream ids that contain slashes still fall through to inference.
    pub fn resolve(
        candidate: &str,
        registry: &ProviderRegistry,
        default_provider: Option<&str>,
    ) -> Option<Self> {
        if let Some((provider, model)) = candidate.split_once('/') {
            if registry.contains(provider) && !model.is_empty() {
                return Some(Self {
                    provider: provider.to_string(),
                    model: model.to_string(),
                });
            }
        }

        if let Some(provider) = registry.find_for_model(candidate) {
            return Some(Self {
                provider: provider.to_string(),
                model: candidate.to_string(),
            });
        }

        default_provider
            .filter(|p| registry.contains(p))
            .map(|provider| Self {
                provider: provider.to_string(),
                model: candidate.to_string(),
            })
    }
}

impl std::fmt::Display for ModelRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}
