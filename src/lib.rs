//! llmgate - LLM gateway core
//!
//! Routes chat calls from virtual keys to upstream LLM providers with model
//! aliases, priority-ordered fallback chains and per-key quota enforcement.
//! Exposed to Python through pyo3.

use pyo3::exceptions::PyKeyError;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod provider;
pub mod quota;
pub mod router;
pub mod session;
pub mod telemetry;

pub use api::{ChatMessage, ChatRequest, ChatResponse, Role, Usage};
pub use config::{ConfigBuilder, ConfigLoader, GatewayConfig, QuotaSpec, RoutingRule};
pub use error::{GatewayError, ProviderError, Result};
pub use provider::{ProviderAdapter, ProviderRegistry};
pub use session::{Gateway, PolicyAction, PolicyUpdate, SessionStatus};
pub use telemetry::{InMemoryUsageSink, UsageEvent, UsageSink};

/// Install a `tracing` subscriber filtered by `LLMGATE_LOG`, then `RUST_LOG`.
///
/// Defaults to `warn`. Does nothing if a global subscriber already exists.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env("LLMGATE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

// =============================================================================
// Python Bindings
// =============================================================================

/// Fluent configuration builder
#[pyclass(name = "Config")]
#[derive(Default)]
struct PyConfig {
    inner: ConfigBuilder,
}

#[pymethods]
impl PyConfig {
    #[new]
    fn new() -> Self {
        Self::default()
    }

    fn with_api_key<'py>(
        mut slf: PyRefMut<'py, Self>,
        provider: String,
        key: String,
    ) -> PyRefMut<'py, Self> {
        slf.inner.with_api_key(provider, key);
        slf
    }

    fn with_alias<'py>(
        mut slf: PyRefMut<'py, Self>,
        alias: String,
        target: String,
    ) -> PyRefMut<'py, Self> {
        slf.inner.with_alias(alias, target);
        slf
    }

    fn with_routing_rule<'py>(
        mut slf: PyRefMut<'py, Self>,
        name: String,
        priority: i64,
        fallback_models: Vec<String>,
    ) -> PyRefMut<'py, Self> {
        slf.inner.with_routing_rule(name, priority, fallback_models);
        slf
    }

    /// The long field names win over the short aliases when both are given
    #[allow(clippy::too_many_arguments)]
    #[pyo3(signature = (
        key,
        rpm=None,
        tpm=None,
        budget_cents=None,
        max_requests_per_minute=None,
        max_tokens_per_minute=None,
    ))]
    fn with_quota<'py>(
        mut slf: PyRefMut<'py, Self>,
        key: String,
        rpm: Option<u64>,
        tpm: Option<u64>,
        budget_cents: Option<u64>,
        max_requests_per_minute: Option<u64>,
        max_tokens_per_minute: Option<u64>,
    ) -> PyRefMut<'py, Self> {
        slf.inner.with_quota(
            key,
            max_requests_per_minute.or(rpm),
            max_tokens_per_minute.or(tpm),
            budget_cents,
        );
        slf
    }

    fn with_default_provider<'py>(
        mut slf: PyRefMut<'py, Self>,
        provider: String,
    ) -> PyRefMut<'py, Self> {
        slf.inner.with_default_provider(provider);
        slf
    }

    fn to_dict(&self, py: Python<'_>) -> PyResult<Py<PyAny>> {
        let json = self.inner.build().to_json()?;
        Ok(py.import("json")?.call_method1("loads", (json,))?.unbind())
    }

    fn to_json(&self) -> PyResult<String> {
        Ok(self.inner.build().to_json()?)
    }

    #[staticmethod]
    fn from_json(json: &str) -> PyResult<Self> {
        Ok(Self {
            inner: GatewayConfig::from_json(json)?.into(),
        })
    }

    fn __repr__(&self) -> String {
        format!("{:?}", self.inner.build())
    }
}

/// Python wrapper for the gateway session
#[pyclass(name = "Gateway")]
struct PyGateway {
    inner: Arc<Gateway>,
    runtime: tokio::runtime::Runtime,
}

#[pymethods]
impl PyGateway {
    #[new]
    #[pyo3(signature = (config=None, config_path=None))]
    fn new(config: Option<PyRef<'_, PyConfig>>, config_path: Option<&str>) -> PyResult<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let config = match (config, config_path) {
            (Some(config), _) => config.inner.build(),
            (None, Some(path)) => ConfigLoader::from_path(path)?.into_config(),
            (None, None) => ConfigLoader::new()?.into_config(),
        };

        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| GatewayError::Internal(format!("Failed to create runtime: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Gateway::new(config, ProviderRegistry::with_defaults()?)),
            runtime,
        })
    }

    fn init(&self, py: Python<'_>) -> PyResult<()> {
        let gateway = self.inner.clone();
        Ok(py.detach(|| self.runtime.block_on(async move { gateway.init().await }))?)
    }

    /// Make a chat request
    #[pyo3(signature = (key, model, messages, temperature=None, max_tokens=None))]
    fn chat(
        &self,
        py: Python<'_>,
        key: &str,
        model: &str,
        messages: &Bound<'_, PyList>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> PyResult<Py<PyAny>> {
        let messages = convert_messages(messages)?;

        let gateway = self.inner.clone();
        let key = key.to_string();
        let model = model.to_string();
        // Other Python threads keep running while the upstream call is in flight.
        let response = py.detach(|| {
            self.runtime.block_on(async move {
                gateway
                    .chat(&key, &model, messages, temperature, max_tokens)
                    .await
            })
        })?;

        response_to_dict(py, &response)
    }

    fn close(&self, py: Python<'_>) -> PyResult<()> {
        let gateway = self.inner.clone();
        Ok(py.detach(|| self.runtime.block_on(async move { gateway.close().await }))?)
    }

    /// Refuse every new call for `key` until `restore` is called
    #[pyo3(signature = (key, reason=None))]
    fn revoke(&self, key: &str, reason: Option<&str>) -> PyResult<()> {
        Ok(self.inner.revoke(key, reason)?)
    }

    fn restore(&self, key: &str) -> PyResult<()> {
        Ok(self.inner.restore(key)?)
    }

    /// Apply a JSON policy update, e.g. `{"key": "k", "action": "revoke"}`
    fn apply_policy(&self, update: &str) -> PyResult<()> {
        Ok(self.inner.apply_policy(PolicyUpdate::from_json(update)?)?)
    }

    fn is_revoked(&self, key: &str) -> bool {
        self.inner.is_revoked(key)
    }

    /// Current-window usage for a virtual key, `None` if never seen
    fn usage(&self, py: Python<'_>, key: &str) -> PyResult<Option<Py<PyAny>>> {
        let gateway = self.inner.clone();
        let key = key.to_string();
        let usage = py.detach(|| self.runtime.block_on(async move { gateway.usage(&key).await }))?;

        match usage {
            Some(usage) => {
                let dict = PyDict::new(py);
                dict.set_item("requests", usage.requests)?;
                dict.set_item("tokens", usage.tokens)?;
                dict.set_item("spent_cents", usage.spent_cents)?;
                Ok(Some(dict.into()))
            }
            None => Ok(None),
        }
    }

    fn __repr__(&self) -> String {
        format!("{:?}", self.inner)
    }
}

/// Convert a list of message dicts. The role comes from `role`, or from a
/// framework `type` tag such as `human` or `ai`.
fn convert_messages(messages: &Bound<'_, PyList>) -> PyResult<Vec<ChatMessage>> {
    let mut result = Vec::with_capacity(messages.len());

    for item in messages.iter() {
        let dict: &Bound<'_, PyDict> = item.cast()?;

        let tag: String = match dict.get_item("role")? {
            Some(role) => role.extract()?,
            None => dict
                .get_item("type")?
                .ok_or_else(|| PyKeyError::new_err("message needs a 'role' or 'type'"))?
                .extract()?,
        };

        let content = match dict.get_item("content")? {
            Some(content) if content.is_none() => String::new(),
            Some(content) => match content.extract::<String>() {
                Ok(s) => s,
                Err(_) => content.str()?.to_string(),
            },
            None => String::new(),
        };

        result.push(ChatMessage::new(Role::from_tag(&tag), content));
    }

    Ok(result)
}

/// `choices[0].message.content` is always present in the result
fn response_to_dict(py: Python<'_>, response: &ChatResponse) -> PyResult<Py<PyAny>> {
    let dict = PyDict::new(py);
    dict.set_item("id", &response.id)?;
    dict.set_item("model", &response.model)?;

    let choices = PyList::empty(py);
    if response.choices.is_empty() {
        let choice_dict = PyDict::new(py);
        choice_dict.set_item("index", 0)?;
        choice_dict.set_item("message", message_dict(py, Role::Assistant.as_str(), "")?)?;
        choices.append(choice_dict)?;
    }
    for choice in &response.choices {
        let choice_dict = PyDict::new(py);
        choice_dict.set_item("index", choice.index)?;
        choice_dict.set_item("finish_reason", &choice.finish_reason)?;

        let (role, content) = match &choice.message {
            Some(message) => (message.role.as_str(), message.content.as_str()),
            None => (Role::Assistant.as_str(), ""),
        };
        choice_dict.set_item("message", message_dict(py, role, content)?)?;
        choices.append(choice_dict)?;
    }
    dict.set_item("choices", choices)?;

    if let Some(usage) = &response.usage {
        let usage_dict = PyDict::new(py);
        usage_dict.set_item("prompt_tokens", usage.prompt_tokens)?;
        usage_dict.set_item("completion_tokens", usage.completion_tokens)?;
        usage_dict.set_item("total_tokens", usage.total_tokens)?;
        dict.set_item("usage", usage_dict)?;
    }

    Ok(dict.into())
}

fn message_dict<'py>(py: Python<'py>, role: &str, content: &str) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item("role", role)?;
    dict.set_item("content", content)?;
    Ok(dict)
}

/// Python module definition
#[pymodule]
fn _llmgate(m: &Bound<'_, PyModule>) -> PyResult<()> {
    init_logging();
    m.add_class::<PyConfig>()?;
    m.add_class::<PyGateway>()?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
