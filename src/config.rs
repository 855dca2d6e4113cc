//! Engine configuration

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How many times a combo may match within one order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComboRepetition {
    /// Keep matching while the remaining lines still satisfy the combo.
    #[default]
    Greedy,

    /// Match each combo at most once.
    Once,
}

/// Tunables for the pricing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Extra compare-and-swap attempts after a lost usage race before the construct is
    /// treated as exhausted.
    pub cas_retries: u32,

    /// Combo repetition policy.
    pub combo_repetition: ComboRepetition,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cas_retries: 1,
            combo_repetition: ComboRepetition::Greedy,
        }
    }
}

/// Errors reading engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading the config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_norway::Error),
}

impl EngineConfig {
    /// Parse a YAML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the document is not valid YAML or has unknown keys.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_norway::from_str(contents)?)
    }

    /// Read and parse a YAML config file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_yaml(&fs::read_to_string(path)?)
    }
}
