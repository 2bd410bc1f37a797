//! # Design
//!
//! - One variant per failure class of an organize attempt.
//! - Messages interpolate their context: the rendered text is stored on the
//!   download record and must be actionable on its own.

use std::io;
use std::path::PathBuf;

use bindery_config::{ConfigError, TransferMode};
use bindery_core::AgentError;
use thiserror::Error;

use crate::space::format_bytes;

/// Result type for organize operations.
pub type OrganizeResult<T> = Result<T, OrganizeError>;

/// Errors produced by the organization engine.
#[derive(Debug, Error)]
pub enum OrganizeError {
    /// Settings were missing or unusable.
    #[error("configuration error: {source}")]
    Configuration {
        /// Underlying configuration error.
        #[from]
        source: ConfigError,
    },
    /// The library root could not be created or reached.
    #[error("library root {} is unreachable: {source}", path.display())]
    DestinationUnreachable {
        /// Library root.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The resolved template does not describe a path inside the library.
    #[error("resolved path '{resolved}' is not usable: {reason}")]
    InvalidTarget {
        /// Offending path text.
        resolved: String,
        /// Static reason for the rejection.
        reason: &'static str,
    },
    /// The remote agent could not list the transfer's files.
    #[error("failed to get file list for {handle}: {source}")]
    ManifestUnavailable {
        /// Transfer handle.
        handle: String,
        /// Underlying agent error.
        source: AgentError,
    },
    /// The remote agent reported no files.
    #[error("transfer {handle} has no files")]
    EmptyManifest {
        /// Transfer handle.
        handle: String,
    },
    /// A source file does not exist locally.
    #[error("source file does not exist: {}", path.display())]
    SourceMissing {
        /// Local source path.
        path: PathBuf,
    },
    /// A source file exists but cannot be used.
    #[error("source file is not accessible: {}: {source}", path.display())]
    SourceUnreadable {
        /// Local source path.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A destination file already exists or two sources share a file name.
    #[error("destination file already exists: {}", path.display())]
    DestinationExists {
        /// Conflicting destination path.
        path: PathBuf,
    },
    /// Free space at the library root is below the requirement.
    #[error(
        "insufficient disk space: need {}, only {} available",
        format_bytes(*required),
        format_bytes(*available)
    )]
    InsufficientSpace {
        /// Bytes required including headroom.
        required: u64,
        /// Bytes available to unprivileged users.
        available: u64,
    },
    /// Free space could not be determined.
    #[error("failed to check disk space at {}: {source}", path.display())]
    SpaceProbe {
        /// Probed path.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The target directory could not be created.
    #[error("failed to create directory {}: {source}", path.display())]
    TargetDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A single file failed to copy or move.
    #[error(
        "failed to {mode} file {file} ({} -> {}): {source}",
        from.display(),
        to.display()
    )]
    Transfer {
        /// Transfer mode in effect.
        mode: TransferMode,
        /// Name of the file as reported by the remote agent.
        file: String,
        /// Source path.
        from: PathBuf,
        /// Destination path.
        to: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The attempt was stopped before it finished.
    #[error("organize cancelled")]
    Cancelled,
}
