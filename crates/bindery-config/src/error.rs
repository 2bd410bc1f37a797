//! Error types for configuration operations.

use std::io;
use std::path::PathBuf;

use bindery_core::TemplateError;
use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The key is not part of the known settings.
    #[error("unknown setting '{key}'")]
    UnknownKey {
        /// Key as supplied by the caller.
        key: String,
    },
    /// A required setting has no value.
    #[error("required setting '{key}' is not configured")]
    Missing {
        /// Storage key of the missing setting.
        key: &'static str,
    },
    /// A setting holds a value that cannot be used.
    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidField {
        /// Storage key of the setting.
        key: &'static str,
        /// Offending value.
        value: String,
        /// Static reason for the failure.
        reason: &'static str,
    },
    /// A template setting failed validation.
    #[error("invalid template for '{key}': {source}")]
    InvalidTemplate {
        /// Storage key of the template setting.
        key: &'static str,
        /// Validation failure.
        source: TemplateError,
    },
    /// The setting is pinned by an environment variable.
    #[error("setting '{key}' is overridden by environment variable {env_var}")]
    Overridden {
        /// Storage key of the setting.
        key: &'static str,
        /// Environment variable holding the override.
        env_var: &'static str,
    },
    /// File system operation failed.
    #[error("settings file operation {operation} failed for {}", path.display())]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// File involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// Settings file could not be encoded or decoded.
    #[error("settings file {} is not valid JSON", path.display())]
    Json {
        /// File involved in the failure.
        path: PathBuf,
        /// Source serde error.
        source: serde_json::Error,
    },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    /// Build an [`ConfigError::InvalidField`] for `value`.
    pub fn invalid(key: &'static str, value: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidField {
            key,
            value: value.into(),
            reason,
        }
    }
}
