//! Collaborator traits implemented by record stores and remote agent clients.

use std::path::Path;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{AgentError, AgentResult, StoreResult};
use crate::model::{DownloadRecord, DownloadStatus, RemoteFile, RemoteStatus, TransferSource};

/// Persistence contract for download records.
///
/// Implementations serialise writes per record and enforce
/// [`DownloadStatus::can_transition_to`]; writing the current status again is
/// a no-op.
#[async_trait]
pub trait DownloadStore: Send + Sync {
    /// Insert a new record.
    async fn create(&self, record: DownloadRecord) -> StoreResult<()>;

    /// Fetch a record by identifier.
    async fn get(&self, id: Uuid) -> StoreResult<DownloadRecord>;

    /// Every record, oldest first.
    async fn list(&self) -> StoreResult<Vec<DownloadRecord>>;

    /// Records the monitor still reconciles (`queued`, `downloading`, `completed`).
    async fn list_active(&self) -> StoreResult<Vec<DownloadRecord>>;

    /// Move a record to `status`. Entering `organized` stamps `organized_at`.
    async fn update_status(&self, id: Uuid, status: DownloadStatus) -> StoreResult<()>;

    /// Store a progress percentage; ignored outside the active statuses.
    async fn update_progress(&self, id: Uuid, progress: f64) -> StoreResult<()>;

    /// Replace (or clear, with `None`) the error text.
    async fn update_error(&self, id: Uuid, message: Option<String>) -> StoreResult<()>;

    /// Record the library directory a successful organize produced.
    async fn update_organized_path(&self, id: Uuid, path: &Path) -> StoreResult<()>;

    /// Move to `completed` and stamp `completed_at` if it is not set yet.
    async fn mark_completed(&self, id: Uuid) -> StoreResult<()>;

    /// Remove a record.
    async fn delete(&self, id: Uuid) -> StoreResult<()>;
}

/// Narrow view of the external download daemon.
#[async_trait]
pub trait RemoteAgent: Send + Sync {
    /// Current state and progress of a transfer.
    async fn status(&self, handle: &str) -> AgentResult<RemoteStatus>;

    /// File manifest of a transfer, paths as the agent sees them.
    async fn files(&self, handle: &str) -> AgentResult<Vec<RemoteFile>>;

    /// Remove a transfer, optionally deleting its data.
    async fn delete(&self, handle: &str, delete_files: bool) -> AgentResult<()>;

    /// Submit a new transfer and return its handle; default implementation
    /// reports lack of support.
    async fn add(&self, source: TransferSource, category: Option<&str>) -> AgentResult<String> {
        let _ = (source, category);
        Err(AgentError::Unsupported { operation: "add" })
    }
}
