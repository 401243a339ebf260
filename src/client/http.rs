//! HTTP Client
//!
//! Pooled async HTTP client shared by provider adapters. Transport failures
//! are retried in place; HTTP status failures are classified and returned so
//! the gateway can decide whether to fall back.

use crate::client::rate_limiter::RateLimitTracker;
use crate::error::{GatewayError, ProviderError, Result};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Transport retries per call before giving up on a provider
pub const DEFAULT_TRANSPORT_RETRIES: u32 = 2;

/// HTTP client with retry and rate limit handling
pub struct HttpClient {
    /// Inner reqwest client
    client: Client,

    /// Upstream cooldown tracker
    rate_limiter: Arc<RateLimitTracker>,

    max_transport_retries: u32,

    initial_backoff: Duration,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(300))
    }

    /// Create a client with a custom request timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| GatewayError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            rate_limiter: Arc::new(RateLimitTracker::new()),
            max_transport_retries: DEFAULT_TRANSPORT_RETRIES,
            initial_backoff: Duration::from_millis(200),
        })
    }

    /// Override transport retry behaviour
    pub fn with_transport_retries(mut self, retries: u32, initial_backoff: Duration) -> Self {
        self.max_transport_retries = retries;
        self.initial_backoff = initial_backoff;
        self
    }

    /// POST a JSON body and decode a JSON response
    pub async fn post_json<T, R>(
        &self,
        url: &str,
        body: &T,
        mut headers: HeaderMap,
        provider: &str,
    ) -> std::result::Result<R, ProviderError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        if let Some(wait) = self.rate_limiter.remaining_cooldown(provider) {
            return Err(ProviderError::retryable(
                provider,
                format!("cooling down for another {}ms", wait.as_millis()),
            )
            .with_status(429));
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body_json = serde_json::to_string(body)
            .map_err(|e| ProviderError::fatal(provider, format!("Invalid request body: {}", e)))?;

        let mut backoff = ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(Duration::from_secs(30)),
            multiplier: 2.0,
            ..Default::default()
        };
        let mut retries = 0;

        loop {
            let response = self
                .client
                .post(url)
                .headers(headers.clone())
                .body(body_json.clone())
                .send()
                .await;

            match response {
                Ok(resp) => return self.handle_response(resp, provider).await,
                Err(e)
                    if (e.is_connect() || e.is_timeout())
                        && retries < self.max_transport_retries =>
                {
                    retries += 1;
                    let Some(wait) = backoff.next_backoff() else {
                        return Err(classify_transport_error(provider, &e));
                    };
                    debug!(provider, retries, error = %e, "transport error, retrying");
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(classify_transport_error(provider, &e)),
            }
        }
    }

    async fn handle_response<R: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
        provider: &str,
    ) -> std::result::Result<R, ProviderError> {
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp
            .text()
            .await
            .map_err(|e| classify_transport_error(provider, &e))?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                ProviderError::fatal(
                    provider,
                    format!(
                        "Failed to parse response: {}. Body: {}",
                        e,
                        truncate(&body, 500)
                    ),
                )
                .with_status(status.as_u16())
            });
        }

        let code = status.as_u16();
        if RateLimitTracker::is_rate_limit_error(code, &body) {
            if let Some(cooldown) = self.rate_limiter.record_rate_limit(provider, &headers) {
                warn!(provider, cooldown_ms = cooldown.as_millis() as u64, "upstream rate limited");
            }
            return Err(ProviderError::retryable(provider, truncate(&body, 500)).with_status(code));
        }

        let error = if is_transient_status(status) {
            ProviderError::retryable(provider, truncate(&body, 500))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            ProviderError::fatal(
                provider,
                format!("Authentication failed: {}", truncate(&body, 500)),
            )
        } else {
            ProviderError::fatal(provider, truncate(&body, 500))
        };
        Err(error.with_status(code))
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT
}

/// Timeouts and connection failures are worth a fallback, the rest are not
fn classify_transport_error(provider: &str, err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::retryable(provider, format!("Request timeout: {}", err))
    } else if err.is_connect() {
        ProviderError::retryable(provider, format!("Connection failed: {}", err))
    } else if err.is_decode() || err.is_builder() {
        ProviderError::fatal(provider, err.to_string())
    } else {
        ProviderError::retryable(provider, err.to_string())
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn client() -> HttpClient {
        HttpClient::new()
            .unwrap()
            .with_transport_retries(0, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_client_creation() {
        let client = HttpClient::new();
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_success_decodes_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ok")
            .match_header("content-type", "application/json")
            .with_status(200)
            .with_body(r#"{"answer": 42}"#)
            .create_async()
            .await;

        let value: Value = client()
            .post_json(&format!("{}/ok", server.url()), &json!({}), HeaderMap::new(), "p")
            .await
            .unwrap();

        assert_eq!(value["answer"], 42);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/fail")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let url = format!("{}/fail", server.url());
        let err = client()
            .post_json::<_, Value>(&url, &json!({}), HeaderMap::new(), "p")
            .await
            .unwrap_err();

        assert!(err.retryable);
        assert_eq!(err.status, Some(503));
    }

    #[tokio::test]
    async fn test_bad_request_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/bad")
            .with_status(400)
            .with_body(r#"{"error": "invalid model"}"#)
            .create_async()
            .await;

        let url = format!("{}/bad", server.url());
        let err = client()
            .post_json::<_, Value>(&url, &json!({}), HeaderMap::new(), "p")
            .await
            .unwrap_err();

        assert!(!err.retryable);
        assert_eq!(err.status, Some(400));
    }

    #[tokio::test]
    async fn test_rate_limit_starts_cooldown() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/limited")
            .with_status(429)
            .with_header("retry-after", "30")
            .with_body("slow down")
            .expect(1)
            .create_async()
            .await;

        let client = client();
        let url = format!("{}/limited", server.url());

        let first = client
            .post_json::<_, Value>(&url, &json!({}), HeaderMap::new(), "p")
            .await
            .unwrap_err();
        assert!(first.retryable);

        // The second call never reaches the server.
        let second = client
            .post_json::<_, Value>(&url, &json!({}), HeaderMap::new(), "p")
            .await
            .unwrap_err();
        assert!(second.retryable);
        assert!(second.message.contains("cooling down"));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_oversized_retry_after_is_capped() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/limited")
            .with_status(429)
            .with_header("retry-after", "18446744073709551615")
            .with_body("slow down")
            .expect(1)
            .create_async()
            .await;

        let client = client();
        let url = format!("{}/limited", server.url());

        let err = client
            .post_json::<_, Value>(&url, &json!({}), HeaderMap::new(), "p")
            .await
            .unwrap_err();
        assert!(err.retryable);
        assert_eq!(err.status, Some(429));

        let again = client
            .post_json::<_, Value>(&url, &json!({}), HeaderMap::new(), "p")
            .await
            .unwrap_err();
        assert!(again.message.contains("cooling down"));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unparseable_success_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/garbage")
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let url = format!("{}/garbage", server.url());
        let err = client()
            .post_json::<_, Value>(&url, &json!({}), HeaderMap::new(), "p")
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        // Port 9 (discard) on localhost is not expected to be listening.
        let err = client()
            .post_json::<_, Value>("http://127.0.0.1:9/x", &json!({}), HeaderMap::new(), "p")
            .await
            .unwrap_err();
        assert!(err.retryable);
    }
}
