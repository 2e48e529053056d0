use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use digger_classifier::ClassifierPolicy;
use digger_extract::{ExtractionStrategy, UnknownStrategy};
use digger_store::InferenceLimits;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    Parse(String),
    #[error(transparent)]
    Strategy(#[from] UnknownStrategy),
}

/// Runtime settings, read from YAML and overridden from the environment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiggerConfig {
    pub listen_addr: String,
    pub classifier: ClassifierPolicy,
    pub extraction: ExtractionStrategy,
    pub inference: InferenceLimits,
}

impl Default for DiggerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7400".into(),
            classifier: ClassifierPolicy::default(),
            extraction: ExtractionStrategy::default(),
            inference: InferenceLimits::default(),
        }
    }
}

impl DiggerConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// `DIGGER_CONFIG` (YAML file), then `DIGGER_ADDR`, `DIGGER_STRATEGY` and
    /// `DIGGER_METHODS` (comma separated) on top.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = match lookup("DIGGER_CONFIG") {
            Some(path) if !path.is_empty() => Self::from_path(path)?,
            _ => Self::default(),
        };
        if let Some(addr) = lookup("DIGGER_ADDR").filter(|v| !v.is_empty()) {
            cfg.listen_addr = addr;
        }
        if let Some(strategy) = lookup("DIGGER_STRATEGY").filter(|v| !v.is_empty()) {
            cfg.extraction = strategy.parse()?;
        }
        if let Some(methods) = lookup("DIGGER_METHODS") {
            let methods: Vec<String> = methods
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(|m| m.to_ascii_uppercase())
                .collect();
            if !methods.is_empty() {
                cfg.classifier.methods = methods;
            }
        }
        Ok(cfg)
    }
}
