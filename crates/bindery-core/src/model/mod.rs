//! Download records and the DTOs exchanged with the remote agent.
//!
//! # Design
//! - `DownloadStatus` owns the transition table so every store enforces the
//!   same forward-only lifecycle.
//! - Records are plain data; stores hand out clones and never shared handles.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle of a tracked download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Accepted by the remote agent, not transferring yet.
    Queued,
    /// The remote agent is fetching data.
    Downloading,
    /// The remote agent finished and is seeding or paused after finishing.
    Completed,
    /// Files are being placed into the library.
    Organizing,
    /// Files live in the library layout.
    Organized,
    /// The last organize attempt failed; may be retried.
    Failed,
}

impl DownloadStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Queued,
        Self::Downloading,
        Self::Completed,
        Self::Organizing,
        Self::Organized,
        Self::Failed,
    ];

    /// Render the status as its lowercase wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Organizing => "organizing",
            Self::Organized => "organized",
            Self::Failed => "failed",
        }
    }

    /// Position along the lifecycle; terminal states share the last rank.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Downloading => 1,
            Self::Completed => 2,
            Self::Organizing => 3,
            Self::Organized | Self::Failed => 4,
        }
    }

    /// Whether the monitor still reconciles records in this status.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Downloading | Self::Completed)
    }

    /// Whether moving from `self` to `next` respects the lifecycle.
    ///
    /// `failed → organizing` is the only backwards edge.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Downloading | Self::Completed)
                | (Self::Downloading, Self::Completed)
                | (Self::Completed | Self::Failed, Self::Organizing)
                | (Self::Organizing, Self::Organized | Self::Failed)
        )
    }
}

impl Display for DownloadStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Error)]
#[error("unknown download status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for DownloadStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| UnknownStatus(value.to_string()))
    }
}

/// Metadata supplied when a new acquisition is accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDownload {
    /// Book title.
    pub title: String,
    /// Book author.
    pub author: String,
    /// Series name, when the book belongs to one.
    pub series: Option<String>,
    /// Position within the series.
    pub series_number: Option<String>,
    /// Category forwarded to the remote agent.
    pub category: Option<String>,
}

/// A download tracked end-to-end, from queue to library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Opaque unique identifier.
    pub id: Uuid,
    /// Book title.
    pub title: String,
    /// Book author.
    pub author: String,
    /// Series name.
    pub series: Option<String>,
    /// Position within the series.
    pub series_number: Option<String>,
    /// Category forwarded to the remote agent.
    pub category: Option<String>,
    /// Correlation key inside the remote agent (info-hash). Immutable.
    pub remote_handle: String,
    /// Current lifecycle status.
    pub status: DownloadStatus,
    /// Transfer progress in percent, `0.0..=100.0`.
    pub progress: f64,
    /// Library directory, set after a successful organize.
    pub organized_path: Option<PathBuf>,
    /// Error text from the last failed organize attempt.
    pub error_message: Option<String>,
    /// When the record was created, to the microsecond.
    pub created_at: DateTime<Utc>,
    /// When the remote agent first reported the transfer finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the files were organized.
    pub organized_at: Option<DateTime<Utc>>,
}

impl DownloadRecord {
    /// Build a fresh `queued` record for a transfer the remote agent accepted.
    #[must_use]
    pub fn new(download: NewDownload, remote_handle: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: download.title,
            author: download.author,
            series: download.series,
            series_number: download.series_number,
            category: download.category,
            remote_handle: remote_handle.into(),
            status: DownloadStatus::Queued,
            progress: 0.0,
            organized_path: None,
            error_message: None,
            created_at: Utc::now().trunc_subsecs(6),
            completed_at: None,
            organized_at: None,
        }
    }

    /// Series name when present and not blank.
    #[must_use]
    pub fn series_name(&self) -> Option<&str> {
        self.series
            .as_deref()
            .map(str::trim)
            .filter(|series| !series.is_empty())
    }

    /// Progress value to store after the agent reported `reported` percent.
    ///
    /// Clamped to `0..=100` and never below the stored value.
    #[must_use]
    pub fn next_progress(&self, reported: f64) -> f64 {
        if !reported.is_finite() {
            return self.progress;
        }
        reported.clamp(0.0, 100.0).max(self.progress)
    }
}

/// Point-in-time view of a transfer inside the remote agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStatus {
    /// Free-form state string in the agent's vocabulary.
    pub state: String,
    /// Progress in percent.
    pub progress: f64,
}

/// One file of a transfer as reported by the remote agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Name relative to the transfer root.
    pub name: String,
    /// Path as seen by the remote agent.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
}

/// Where the remote agent should fetch a new transfer from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSource {
    /// Magnet URI; the handle is its `btih` value.
    Magnet(String),
    /// Plain `.torrent` URL with an optional known handle.
    Url {
        /// Location of the torrent file.
        url: String,
        /// Info-hash when the caller already knows it.
        handle: Option<String>,
    },
}
