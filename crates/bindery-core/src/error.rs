//! Error types for the record store and remote agent contracts.
//!
//! # Design
//! - Each collaborator contract owns one error enum with structured fields.
//! - Agent errors render their context because they end up in a record's
//!   error text when an organize attempt fails.

use std::error::Error;

use thiserror::Error;
use uuid::Uuid;

use crate::model::DownloadStatus;

/// Boxed error used when the concrete transport error type must stay hidden.
pub type BoxedError = Box<dyn Error + Send + Sync>;

/// Errors produced by download record stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists with the requested identifier.
    #[error("download {id} not found")]
    NotFound {
        /// Identifier that was looked up.
        id: Uuid,
    },
    /// A record with the same identifier already exists.
    #[error("download {id} already exists")]
    Duplicate {
        /// Identifier that collided.
        id: Uuid,
    },
    /// The requested status change would move the record backwards.
    #[error("download {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Record identifier.
        id: Uuid,
        /// Status currently stored.
        from: DownloadStatus,
        /// Status that was requested.
        to: DownloadStatus,
    },
    /// The backing database rejected or failed an operation.
    #[error("record store operation {operation} failed: {source}")]
    Database {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying driver error.
        source: BoxedError,
    },
    /// A stored row could not be read back as a record.
    #[error("stored download is unreadable: {detail}")]
    Corrupt {
        /// What was wrong with the row.
        detail: String,
    },
}

impl StoreError {
    /// Wrap a driver failure.
    pub fn database(operation: &'static str, source: impl Into<BoxedError>) -> Self {
        Self::Database {
            operation,
            source: source.into(),
        }
    }
}

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors produced by remote agent clients.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The request never produced a response.
    #[error("remote agent unreachable during {operation}: {source}")]
    Unreachable {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying transport failure.
        source: BoxedError,
    },
    /// The agent answered with an unexpected HTTP status.
    #[error("remote agent returned status {status} during {operation}")]
    Status {
        /// Operation identifier.
        operation: &'static str,
        /// HTTP status code returned.
        status: u16,
    },
    /// Credentials were rejected.
    #[error("remote agent rejected credentials")]
    Authentication,
    /// The agent does not know the requested transfer.
    #[error("transfer {handle} not found in remote agent")]
    NotFound {
        /// Handle that was looked up.
        handle: String,
    },
    /// The response body could not be decoded.
    #[error("remote agent response could not be decoded during {operation}: {source}")]
    Decode {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying decode failure.
        source: BoxedError,
    },
    /// The agent rejected the request payload.
    #[error("remote agent rejected {operation}: {detail}")]
    Rejected {
        /// Operation identifier.
        operation: &'static str,
        /// Response text returned by the agent.
        detail: String,
    },
    /// The caller supplied an unusable value.
    #[error("invalid {field}: {reason}")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
    },
    /// The operation is not implemented by this agent.
    #[error("remote agent does not support {operation}")]
    Unsupported {
        /// Operation identifier.
        operation: &'static str,
    },
}

/// Convenience alias for remote agent results.
pub type AgentResult<T> = Result<T, AgentError>;

impl AgentError {
    /// Wrap a transport failure.
    pub fn unreachable(operation: &'static str, source: impl Into<BoxedError>) -> Self {
        Self::Unreachable {
            operation,
            source: source.into(),
        }
    }

    /// Wrap a decoding failure.
    pub fn decode(operation: &'static str, source: impl Into<BoxedError>) -> Self {
        Self::Decode {
            operation,
            source: source.into(),
        }
    }
}
