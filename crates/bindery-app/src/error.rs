//! # Design
//!
//! - Centralize application-level errors for bootstrap, the monitor and the
//!   download service.
//! - Carry the operation that failed next to the source error; user-facing
//!   variants render their context.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use bindery_core::DownloadStatus;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration operations failed.
    #[error("configuration operation {operation} failed: {source}")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: bindery_config::ConfigError,
    },
    /// Record store operations failed.
    #[error("record store operation {operation} failed: {source}")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Source store error.
        source: bindery_core::StoreError,
    },
    /// Remote agent operations failed.
    #[error("{source}")]
    Agent {
        /// Operation identifier.
        operation: &'static str,
        /// Source agent error.
        source: bindery_core::AgentError,
    },
    /// An organize attempt failed.
    #[error("{source}")]
    Organize {
        /// Source organize error.
        #[from]
        source: bindery_library::OrganizeError,
    },
    /// An organize attempt exceeded its time budget.
    #[error("organize timed out after {timeout:?}")]
    OrganizeTimeout {
        /// Budget that elapsed.
        timeout: Duration,
    },
    /// A path template failed validation.
    #[error("invalid template: {source}")]
    Template {
        /// Source template error.
        #[from]
        source: bindery_core::TemplateError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation {operation} failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: bindery_telemetry::TelemetryError,
    },
    /// IO operations failed.
    #[error("io operation {operation} failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
    /// Command output could not be encoded.
    #[error("failed to encode {operation} output")]
    Encode {
        /// Operation identifier.
        operation: &'static str,
        /// Source serialization error.
        source: serde_json::Error,
    },
    /// Caller input failed validation.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Field that failed validation.
        field: &'static str,
        /// Human readable reason.
        reason: String,
    },
    /// The record is not in a status that allows the operation.
    #[error("download {id} is {status}; {operation} is not allowed")]
    InvalidState {
        /// Record identifier.
        id: Uuid,
        /// Current status.
        status: DownloadStatus,
        /// Operation that was refused.
        operation: &'static str,
    },
    /// The monitor stopped because it was cancelled.
    #[error("monitor cancelled")]
    Cancelled,
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: bindery_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn store(operation: &'static str, source: bindery_core::StoreError) -> Self {
        Self::Store { operation, source }
    }

    pub(crate) const fn agent(operation: &'static str, source: bindery_core::AgentError) -> Self {
        Self::Agent { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: bindery_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Process exit code for this error: 2 for caller mistakes, 3 otherwise.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } | Self::InvalidState { .. } | Self::Template { .. } => 2,
            Self::Config {
                source: bindery_config::ConfigError::UnknownKey { .. }
                | bindery_config::ConfigError::InvalidField { .. }
                | bindery_config::ConfigError::InvalidTemplate { .. }
                | bindery_config::ConfigError::Overridden { .. },
                ..
            } => 2,
            _ => 3,
        }
    }
}
