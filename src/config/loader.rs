//! Configuration Loader
//!
//! Loads gateway snapshots from JSON files and merges multiple sources.

use crate::config::snapshot::GatewayConfig;
use crate::error::{GatewayError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Accumulates snapshots from config files
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config: GatewayConfig,
}

impl ConfigLoader {
    /// Create a loader and merge every config file found at the default paths
    pub fn new() -> Result<Self> {
        let mut loader = Self::default();
        loader.merge_default_paths()?;
        Ok(loader)
    }

    /// Create a loader from one specific config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut loader = Self::default();
        loader.merge_file(path)?;
        Ok(loader)
    }

    /// Merge every default-path file that exists
    fn merge_default_paths(&mut self) -> Result<()> {
        for path in Self::default_paths() {
            if path.exists() {
                self.merge_file(&path)?;
            }
        }
        Ok(())
    }

    /// Get list of config paths to check, lowest precedence first
    fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".llmgate").join("config.json"));
        }

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("llmgate").join("config.json"));
        }

        paths.push(PathBuf::from("llmgate.json"));

        if let Ok(custom_path) = std::env::var("LLMGATE_CONFIG_PATH") {
            paths.push(PathBuf::from(custom_path));
        }

        paths
    }

    /// Parse one JSON file and merge it in
    fn merge_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: GatewayConfig = serde_json::from_str(&content).map_err(|e| {
            GatewayError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        debug!(path = %path.display(), "loaded gateway config");
        self.merge_config(config);
        Ok(())
    }

    /// Merge another config into this one (later configs override earlier)
    pub fn merge_config(&mut self, other: GatewayConfig) {
        self.config.api_keys.extend(other.api_keys);
        self.config.model_aliases.extend(other.model_aliases);
        self.config.quotas.extend(other.quotas);
        self.config.routing_rules.extend(other.routing_rules);

        if other.default_provider.is_some() {
            self.config.default_provider = other.default_provider;
        }
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Take ownership of the configuration
    pub fn into_config(self) -> GatewayConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::snapshot::{QuotaSpec, RoutingRule};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_from_custom_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "api_keys": {{"openai": "sk-file"}},
                "routing_rules": [{{"name": "r", "priority": 1, "fallback_models": ["gpt-4"]}}],
                "quotas": {{}},
                "model_aliases": {{"fast": "gpt-3.5-turbo"}},
                "default_provider": null
            }}"#
        )
        .unwrap();

        let loader = ConfigLoader::from_path(file.path()).unwrap();
        assert_eq!(loader.config().api_keys["openai"], "sk-file");
        assert_eq!(loader.config().model_aliases["fast"], "gpt-3.5-turbo");
        assert_eq!(loader.config().routing_rules.len(), 1);
    }

    #[test]
    fn test_invalid_file_is_configuration_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();

        match ConfigLoader::from_path(file.path()) {
            Err(GatewayError::Configuration(msg)) => assert!(msg.contains("Failed to parse")),
            other => panic!("unexpected result: {:?}", other.map(|l| l.into_config())),
        }
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let result = ConfigLoader::from_path("/definitely/not/here/llmgate.json");
        assert!(matches!(result, Err(GatewayError::Configuration(_))));
    }

    #[test]
    fn test_merge_configs() {
        let mut loader = ConfigLoader::default();
        loader.merge_config(GatewayConfig {
            api_keys: [("openai".to_string(), "old".to_string())].into_iter().collect(),
            routing_rules: vec![RoutingRule::new("a", 1, vec!["gpt-4".to_string()])],
            default_provider: Some("openai".to_string()),
            ..Default::default()
        });

        loader.merge_config(GatewayConfig {
            api_keys: [("openai".to_string(), "new".to_string())].into_iter().collect(),
            routing_rules: vec![RoutingRule::new("b", 2, vec!["claude-3".to_string()])],
            quotas: [("k".to_string(), QuotaSpec::unlimited())].into_iter().collect(),
            default_provider: None,
            ..Default::default()
        });

        let config = loader.into_config();
        assert_eq!(config.api_keys["openai"], "new");
        assert_eq!(config.routing_rules.len(), 2);
        assert!(config.quotas.contains_key("k"));
        assert_eq!(config.default_provider.as_deref(), Some("openai"));
    }
}
