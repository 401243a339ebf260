//! OpenAI-compatible adapter

use crate::api::{ChatRequest, ChatResponse};
use crate::client::HttpClient;
use crate::error::ProviderError;
use crate::provider::{base_url_for, ProviderAdapter};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const MODEL_PREFIXES: &[&str] = &["gpt-", "o1", "o3", "o4", "chatgpt-", "text-"];

/// Adapter for `/chat/completions` style APIs
pub struct OpenAiAdapter {
    name: String,
    base_url: String,
    model_prefixes: Vec<String>,
    client: Arc<HttpClient>,
}

impl OpenAiAdapter {
    /// The official OpenAI endpoint, overridable with `OPENAI_API_BASE`
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            name: "openai".to_string(),
            base_url: base_url_for("openai", DEFAULT_BASE_URL),
            model_prefixes: MODEL_PREFIXES.iter().map(|p| p.to_string()).collect(),
            client,
        }
    }

    /// Any other provider speaking the same protocol
    pub fn compatible(
        name: impl Into<String>,
        base_url: impl Into<String>,
        model_prefixes: Vec<String>,
        client: Arc<HttpClient>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model_prefixes,
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_model(&self, model: &str) -> bool {
        self.model_prefixes.iter().any(|p| model.starts_with(p.as_str()))
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        api_key: &str,
    ) -> Result<ChatResponse, ProviderError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| {
                ProviderError::fatal(&self.name, format!("Invalid API key format: {}", e))
            })?;
        headers.insert(AUTHORIZATION, auth);

        let url = format!("{}/chat/completions", self.base_url);
        let mut response: ChatResponse = self
            .client
            .post_json(&url, request, headers, &self.name)
            .await?;

        if response.model.is_empty() {
            response.model = request.model.clone();
        }
        Ok(response)
    }
}
