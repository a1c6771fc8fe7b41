use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}

/// What to do with a storage class outside the known element table.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Copy, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub enum ElementTypePolicy {
    /// Fail the conversion.
    #[default]
    Strict,
    /// Reinterpret the storage as f32 and log a warning.
    Lenient,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(default, rename_all = "snake_case", deny_unknown_fields)]
pub struct ConversionConfig {
    pub element_types: ElementTypePolicy,
    /// Accept references written as `(tag, type, device, index)`.
    pub accept_device_first_layout: bool,
    /// Top-level keys that are unwrapped when they are the only entry.
    pub wrapper_keys: Vec<String>,
    pub output_wrapper_key: String,
    pub classifier_head: String,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            element_types: ElementTypePolicy::Strict,
            accept_device_first_layout: false,
            wrapper_keys: vec!["model".to_string()],
            output_wrapper_key: "model".to_string(),
            classifier_head: "classifier.1".to_string(),
        }
    }
}

impl ConversionConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn is_lenient(&self) -> bool {
        self.element_types == ElementTypePolicy::Lenient
    }

    pub fn is_wrapper_key(
        &self,
        key: &str,
    ) -> bool {
        self.wrapper_keys.iter().any(|wrapper| wrapper == key)
    }
}
