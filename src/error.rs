//! Gateway Error Types
//!
//! Error taxonomy shared by the routing, quota and session layers.

use pyo3::exceptions::{PyConnectionError, PyPermissionError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use std::fmt;
use thiserror::Error;

use crate::quota::{QuotaDenial, QuotaDimension};

/// Failure reported by a provider adapter.
///
/// Whether a failure is retryable is decided by the adapter, never by the
/// routing core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Provider that produced the failure
    pub provider: String,

    /// Upstream HTTP status, if the request got that far
    pub status: Option<u16>,

    /// Whether the next fallback candidate should be tried
    pub retryable: bool,

    /// Human readable description
    pub message: String,
}

impl ProviderError {
    /// A transient failure (server error, rate limit, timeout)
    pub fn retryable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status: None,
            retryable: true,
            message: message.into(),
        }
    }

    /// A failure that will not go away by trying another model
    pub fn fatal(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status: None,
            retryable: false,
            message: message.into(),
        }
    }

    /// Attach the upstream status code
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.retryable { "retryable" } else { "fatal" };
        match self.status {
            Some(status) => write!(
                f,
                "{} error from '{}' (status {}): {}",
                kind, self.provider, status, self.message
            ),
            None => write!(f, "{} error from '{}': {}", kind, self.provider, self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Why a single fallback candidate was not used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// Quota ledger refused admission
    Denied(QuotaDenial),

    /// Provider call failed with a retryable error
    Provider(ProviderError),

    /// No adapter or credentials could be found for the candidate
    Unroutable(String),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Denied(denial) => write!(f, "{}", denial),
            AttemptFailure::Provider(err) => write!(f, "{}", err),
            AttemptFailure::Unroutable(msg) => write!(f, "unroutable: {}", msg),
        }
    }
}

/// One entry of the per-candidate diagnostic trail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub candidate: String,
    pub failure: AttemptFailure,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.candidate, self.failure)
    }
}

/// Main error type for gateway operations
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed or missing configuration, detected at use time
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// `chat` or `reload` called before `init`
    #[error("Gateway not initialized. Call init() first.")]
    NotInitialized,

    /// Operation attempted on a closed session
    #[error("Gateway session is closed")]
    SessionClosed,

    /// Admission refused on one quota axis
    #[error("Quota exceeded for key '{key}' on {dimension}")]
    QuotaDenied {
        dimension: QuotaDimension,
        key: String,
    },

    /// Provider failure outside the fallback loop
    #[error("Provider error: {0}")]
    Provider(ProviderError),

    /// A candidate failed fatally, ending the fallback chain early.
    ///
    /// `attempts` holds the candidates tried before `candidate`.
    #[error(
        "Aborted on '{candidate}': {error}; earlier attempts: {}",
        format_attempts(.attempts)
    )]
    Aborted {
        candidate: String,
        error: ProviderError,
        attempts: Vec<Attempt>,
    },

    /// The virtual key has been revoked
    #[error("Key '{key}' is revoked{}", format_reason(.reason))]
    KeyRevoked { key: String, reason: Option<String> },

    /// Every fallback candidate was denied or failed
    #[error("All candidates exhausted: {}", format_attempts(.attempts))]
    AllCandidatesExhausted {
        attempts: Vec<Attempt>,
        last_error: Option<Box<GatewayError>>,
    },

    /// Quota backing store failure
    #[error("Quota store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_attempts(attempts: &[Attempt]) -> String {
    if attempts.is_empty() {
        return "no candidates".to_string();
    }
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_reason(reason: &Option<String>) -> String {
    reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
}

impl From<QuotaDenial> for GatewayError {
    fn from(denial: QuotaDenial) -> Self {
        GatewayError::QuotaDenied {
            dimension: denial.dimension,
            key: denial.key,
        }
    }
}

impl From<ProviderError> for GatewayError {
    fn from(err: ProviderError) -> Self {
        GatewayError::Provider(err)
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Configuration(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Configuration(format!("IO error: {}", err))
    }
}

impl From<GatewayError> for PyErr {
    fn from(err: GatewayError) -> PyErr {
        let msg = err.to_string();
        match &err {
            GatewayError::Configuration(_) => PyValueError::new_err(msg),
            GatewayError::NotInitialized | GatewayError::SessionClosed => {
                PyRuntimeError::new_err(msg)
            }
            GatewayError::QuotaDenied { .. } => PyRuntimeError::new_err(msg),
            GatewayError::Provider(e) if e.retryable => PyConnectionError::new_err(msg),
            GatewayError::Provider(_) | GatewayError::Aborted { .. } => {
                PyRuntimeError::new_err(msg)
            }
            GatewayError::KeyRevoked { .. } => PyPermissionError::new_err(msg),
            GatewayError::AllCandidatesExhausted { .. } => PyConnectionError::new_err(msg),
            GatewayError::Store(_) => PyConnectionError::new_err(msg),
            GatewayError::Internal(_) => PyRuntimeError::new_err(msg),
        }
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_message_lists_every_attempt() {
        let err = GatewayError::AllCandidatesExhausted {
            attempts: vec![
                Attempt {
                    candidate: "gpt-4".to_string(),
                    failure: AttemptFailure::Denied(QuotaDenial {
                        key: "k".to_string(),
                        dimension: QuotaDimension::Budget,
                        limit: 10,
                        current: 10,
                        requested: 3,
                    }),
                },
                Attempt {
                    candidate: "claude-3".to_string(),
                    failure: AttemptFailure::Provider(
                        ProviderError::retryable("anthropic", "overloaded").with_status(529),
                    ),
                },
            ],
            last_error: None,
        };

        let msg = err.to_string();
        assert!(msg.contains("gpt-4 -> "));
        assert!(msg.contains("budget_cents"));
        assert!(msg.contains("claude-3 -> retryable error from 'anthropic' (status 529)"));
    }

    #[test]
    fn test_aborted_message_names_candidate_and_trail() {
        let err = GatewayError::Aborted {
            candidate: "claude-3".to_string(),
            error: ProviderError::fatal("anthropic", "invalid request").with_status(400),
            attempts: vec![Attempt {
                candidate: "gpt-4".to_string(),
                failure: AttemptFailure::Provider(
                    ProviderError::retryable("openai", "overloaded").with_status(503),
                ),
            }],
        };

        let msg = err.to_string();
        assert!(
            msg.starts_with("Aborted on 'claude-3': fatal error from 'anthropic' (status 400)"),
            "{msg}"
        );
        assert!(msg.contains("gpt-4 -> retryable error from 'openai' (status 503)"));
    }

    #[test]
    fn test_revoked_message_carries_reason() {
        let with_reason = GatewayError::KeyRevoked {
            key: "team-a".to_string(),
            reason: Some("leaked".to_string()),
        };
        assert_eq!(with_reason.to_string(), "Key 'team-a' is revoked: leaked");

        let bare = GatewayError::KeyRevoked {
            key: "team-a".to_string(),
            reason: None,
        };
        assert_eq!(bare.to_string(), "Key 'team-a' is revoked");
    }

    #[test]
    fn test_denial_converts_to_quota_denied() {
        let denial = QuotaDenial {
            key: "team-a".to_string(),
            dimension: QuotaDimension::Requests,
            limit: 2,
            current: 2,
            requested: 1,
        };
        match GatewayError::from(denial) {
            GatewayError::QuotaDenied { dimension, key } => {
                assert_eq!(dimension, QuotaDimension::Requests);
                assert_eq!(key, "team-a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
