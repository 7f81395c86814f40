//! Runtime configuration types and defaults.
//!
//! This module defines the process-wide configuration for the reactor,
//! including the default render timeout, the script entry point and the
//! engine thread sizing.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default render timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default name of the global function invoked for every render
pub const DEFAULT_ENTRY_POINT: &str = "render";

/// Default label attached to loaded server code in error messages
pub const DEFAULT_SCRIPT_LABEL: &str = "server.js";

/// Default stack size for each engine thread (8 MB)
pub const DEFAULT_ENGINE_STACK_SIZE_BYTES: usize = 8 * 1024 * 1024;

/// Smallest engine stack size accepted by [`RuntimeConfig::validate`]
pub const MIN_ENGINE_STACK_SIZE_BYTES: usize = 256 * 1024;

/// Process-wide reactor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Timeout applied to requests that do not carry their own (default: 5000ms)
    #[serde(default = "default_timeout")]
    pub default_timeout_ms: u64,

    /// Global function called with the serialized request (default: `render`)
    #[serde(default = "default_entry_point")]
    pub entry_point: String,

    /// Label for loaded server code, surfaced in script errors (default: `server.js`)
    #[serde(default = "default_script_label")]
    pub script_label: String,

    /// Stack size of each engine thread in bytes (default: 8MB)
    #[serde(default = "default_engine_stack_size")]
    pub engine_stack_size_bytes: usize,

    /// Enable debug mode (default: false)
    #[serde(default)]
    pub debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            script_label: DEFAULT_SCRIPT_LABEL.to_string(),
            engine_stack_size_bytes: DEFAULT_ENGINE_STACK_SIZE_BYTES,
            debug: false,
        }
    }
}

impl RuntimeConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON text
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Set the default render timeout
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the entry point function name
    pub fn with_entry_point(mut self, name: impl Into<String>) -> Self {
        self.entry_point = name.into();
        self
    }

    /// Set the script label
    pub fn with_script_label(mut self, label: impl Into<String>) -> Self {
        self.script_label = label.into();
        self
    }

    /// Set the engine thread stack size
    pub fn with_engine_stack_size(mut self, bytes: usize) -> Self {
        self.engine_stack_size_bytes = bytes;
        self
    }

    /// Enable debug mode
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// The default render timeout as a [`Duration`]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "default_timeout_ms".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if !is_callable_path(&self.entry_point) {
            return Err(ConfigError::InvalidValue {
                field: "entry_point".into(),
                reason: format!("'{}' is not a valid function name", self.entry_point),
            });
        }

        if self.script_label.is_empty() {
            return Err(ConfigError::MissingField {
                field: "script_label".into(),
            });
        }

        if self.engine_stack_size_bytes < MIN_ENGINE_STACK_SIZE_BYTES {
            return Err(ConfigError::InvalidValue {
                field: "engine_stack_size_bytes".into(),
                reason: "must be at least 256KB".into(),
            });
        }

        Ok(())
    }
}

/// Accepts identifiers and dotted member paths such as `globalThis.render`.
fn is_callable_path(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => chars
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$'),
                _ => false,
            }
        })
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field name
        field: String,
        /// The reason it's invalid
        reason: String,
    },

    /// Missing required field
    #[error("Missing required configuration field: {field}")]
    MissingField {
        /// The field name
        field: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Default value functions for serde
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_entry_point() -> String {
    DEFAULT_ENTRY_POINT.to_string()
}

fn default_script_label() -> String {
    DEFAULT_SCRIPT_LABEL.to_string()
}

fn default_engine_stack_size() -> usize {
    DEFAULT_ENGINE_STACK_SIZE_BYTES
}
