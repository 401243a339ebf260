//! Anthropic Messages API adapter

use crate::api::{ChatMessage, ChatRequest, ChatResponse, Choice, Role, Usage};
use crate::client::HttpClient;
use crate::error::ProviderError;
use crate::provider::{base_url_for, ProviderAdapter};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct AnthropicAdapter {
    base_url: String,
    client: Arc<HttpClient>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicAdapter {
    /// Overridable with `ANTHROPIC_API_BASE`
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            base_url: base_url_for("anthropic", DEFAULT_BASE_URL),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// System messages go to the top-level `system` field
    fn build_body(request: &ChatRequest) -> serde_json::Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let messages: Vec<_> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                };
                json!({"role": role, "content": m.content})
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });

        if !system.is_empty() {
            body["system"] = json!(system.join("\n"));
        }
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn supports_model(&self, model: &str) -> bool {
        model.starts_with("claude-")
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        api_key: &str,
    ) -> Result<ChatResponse, ProviderError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key)
            .map_err(|e| {
                ProviderError::fatal("anthropic", format!("Invalid API key format: {}", e))
            })?;
        headers.insert("x-api-key", key);
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));

        let url = format!("{}/messages", self.base_url);
        let body = Self::build_body(request);
        let data: MessagesResponse = self
            .client
            .post_json(&url, &body, headers, "anthropic")
            .await?;

        let content = data
            .content
            .into_iter()
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ChatResponse {
            id: data.id,
            model: if data.model.is_empty() {
                request.model.clone()
            } else {
                data.model
            },
            choices: vec![Choice {
                index: 0,
                message: Some(ChatMessage::assistant(content)),
                finish_reason: data.stop_reason.or_else(|| Some("stop".to_string())),
            }],
            usage: data
                .usage
                .map(|u| Usage::new(u.input_tokens, u.output_tokens)),
        })
    }
}
