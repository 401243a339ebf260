//! Key Policy
//!
//! Revocation of virtual keys through [`PolicyUpdate`] messages.

use crate::error::{GatewayError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    /// Refuse every new call for the key
    Revoke,

    /// Lift an earlier revocation
    Restore,
}

/// A policy change for one virtual key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    pub key: String,
    pub action: PolicyAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PolicyUpdate {
    pub fn revoke(key: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            key: key.into(),
            action: PolicyAction::Revoke,
            reason,
        }
    }

    pub fn restore(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            action: PolicyAction::Restore,
            reason: None,
        }
    }

    /// Parse an update such as `{"key": "k", "action": "revoke"}`
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Revoked keys and their reasons
#[derive(Debug, Default)]
pub(crate) struct Revocations {
    keys: RwLock<HashMap<String, Option<String>>>,
}

impl Revocations {
    /// Returns whether the key moved between revoked and active
    pub(crate) fn apply(&self, update: PolicyUpdate) -> bool {
        let mut keys = self.keys.write();
        match update.action {
            PolicyAction::Revoke => keys.insert(update.key, update.reason).is_none(),
            PolicyAction::Restore => keys.remove(&update.key).is_some(),
        }
    }

    pub(crate) fn is_revoked(&self, key: &str) -> bool {
        self.keys.read().contains_key(key)
    }

    pub(crate) fn check(&self, key: &str) -> Result<()> {
        match self.keys.read().get(key) {
            Some(reason) => Err(GatewayError::KeyRevoked {
                key: key.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}
