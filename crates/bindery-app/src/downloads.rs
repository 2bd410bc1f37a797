//! Download operations exposed to the command line: add, inspect, cancel and
//! organize on demand.

use std::sync::Arc;

use bindery_core::{
    AgentError, DownloadRecord, DownloadStatus, DownloadStore, NewDownload, RemoteAgent,
    TransferSource,
};
use bindery_events::{Event, EventBus};
use bindery_library::OrganizeOutcome;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::lifecycle::{DEFAULT_ORGANIZE_TIMEOUT, OrganizeJob};

const MAX_TITLE_CHARS: usize = 500;
const MAX_AUTHOR_CHARS: usize = 200;
const MAX_SERIES_CHARS: usize = 200;
/// Largest batch accepted by [`DownloadService::create_batch`].
pub const MAX_BATCH_SIZE: usize = 50;

/// Request to start a new download.
#[derive(Debug, Clone)]
pub struct AddDownload {
    /// Book metadata.
    pub book: NewDownload,
    /// Where the remote agent fetches the transfer from.
    pub source: TransferSource,
}

impl AddDownload {
    /// Build a request from exactly one of a magnet link or a torrent URL.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] when both or neither source is given,
    /// or when a handle accompanies a magnet link.
    pub fn from_links(
        book: NewDownload,
        magnet: Option<String>,
        url: Option<String>,
        handle: Option<String>,
    ) -> AppResult<Self> {
        let magnet = magnet.filter(|value| !value.trim().is_empty());
        let url = url.filter(|value| !value.trim().is_empty());
        let handle = trimmed(handle.as_deref()).map(|handle| handle.to_ascii_lowercase());
        let source = match (magnet, url) {
            (Some(magnet), None) if handle.is_none() => {
                TransferSource::Magnet(magnet.trim().to_string())
            }
            (Some(_), None) => {
                return Err(AppError::validation("hash", "is taken from the magnet link"));
            }
            (None, Some(url)) => TransferSource::Url {
                url: url.trim().to_string(),
                handle,
            },
            (Some(_), Some(_)) => {
                return Err(AppError::validation(
                    "source",
                    "give either a magnet link or a torrent URL, not both",
                ));
            }
            (None, None) => {
                return Err(AppError::validation(
                    "source",
                    "a magnet link or a torrent URL is required",
                ));
            }
        };
        Ok(Self { book, source })
    }
}

/// Entry of a batch that could not be added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    /// Position in the submitted batch.
    pub index: usize,
    /// Why the entry was rejected.
    pub error: String,
}

/// Result of [`DownloadService::create_batch`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    /// Records created, in submission order.
    pub created: Vec<DownloadRecord>,
    /// Entries that failed.
    pub failed: Vec<BatchFailure>,
}

/// Application service over the record store and the remote agent.
#[derive(Clone)]
pub struct DownloadService {
    store: Arc<dyn DownloadStore>,
    agent: Arc<dyn RemoteAgent>,
    events: EventBus,
    job: OrganizeJob,
}

impl DownloadService {
    /// Service using the default organize timeout.
    #[must_use]
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            store: Arc::clone(&ctx.store),
            agent: Arc::clone(&ctx.agent),
            events: ctx.events.clone(),
            job: OrganizeJob::new(ctx, DEFAULT_ORGANIZE_TIMEOUT),
        }
    }

    /// Validate the request, hand the transfer to the remote agent and record
    /// it as `queued`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for bad metadata, and agent or store
    /// failures otherwise.
    pub async fn create(&self, request: AddDownload) -> AppResult<DownloadRecord> {
        let book = normalize(request.book)?;
        let handle = self
            .agent
            .add(request.source, book.category.as_deref())
            .await
            .map_err(|err| AppError::agent("downloads.add", err))?;

        let record = DownloadRecord::new(book, handle);
        self.store
            .create(record.clone())
            .await
            .map_err(|err| AppError::store("downloads.create", err))?;

        info!(
            download_id = %record.id,
            handle = %record.remote_handle,
            title = %record.title,
            "download queued"
        );
        self.events.publish(Event::DownloadAdded {
            download_id: record.id,
            title: record.title.clone(),
        });
        Ok(record)
    }

    /// Add several downloads one after another. A failing entry does not
    /// stop the rest.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for an empty batch or one larger than
    /// [`MAX_BATCH_SIZE`].
    pub async fn create_batch(
        &self,
        requests: Vec<AppResult<AddDownload>>,
    ) -> AppResult<BatchOutcome> {
        if requests.is_empty() {
            return Err(AppError::validation("batch", "must not be empty"));
        }
        if requests.len() > MAX_BATCH_SIZE {
            return Err(AppError::validation(
                "batch",
                format!("must hold {MAX_BATCH_SIZE} entries or fewer"),
            ));
        }

        let mut outcome = BatchOutcome::default();
        for (index, request) in requests.into_iter().enumerate() {
            match request {
                Ok(request) => match self.create(request).await {
                    Ok(record) => outcome.created.push(record),
                    Err(err) => outcome.failed.push(BatchFailure {
                        index,
                        error: err.to_string(),
                    }),
                },
                Err(err) => outcome.failed.push(BatchFailure {
                    index,
                    error: err.to_string(),
                }),
            }
        }
        info!(
            created = outcome.created.len(),
            failed = outcome.failed.len(),
            "batch processed"
        );
        Ok(outcome)
    }

    /// Fetch one record.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] when the record does not exist.
    pub async fn get(&self, id: Uuid) -> AppResult<DownloadRecord> {
        self.store
            .get(id)
            .await
            .map_err(|err| AppError::store("downloads.get", err))
    }

    /// Every record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] when the store cannot be read.
    pub async fn list(&self) -> AppResult<Vec<DownloadRecord>> {
        self.store
            .list()
            .await
            .map_err(|err| AppError::store("downloads.list", err))
    }

    /// Remove the transfer from the remote agent (keeping its files) and
    /// delete the record. A transfer the agent no longer knows is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns agent failures other than "not found", and store failures.
    pub async fn cancel(&self, id: Uuid) -> AppResult<()> {
        let record = self.get(id).await?;
        match self.agent.delete(&record.remote_handle, false).await {
            Ok(()) => {}
            Err(AgentError::NotFound { handle }) => {
                warn!(download_id = %id, handle = %handle, "transfer already gone from remote agent");
            }
            Err(err) => return Err(AppError::agent("downloads.cancel", err)),
        }
        self.store
            .delete(id)
            .await
            .map_err(|err| AppError::store("downloads.delete", err))?;

        info!(download_id = %id, "download cancelled");
        self.events
            .publish(Event::DownloadRemoved { download_id: id });
        Ok(())
    }

    /// Organize a `completed` or `failed` record now and wait for the result.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] for other statuses, otherwise the
    /// organize failure (which is also written to the record).
    pub async fn organize(&self, id: Uuid) -> AppResult<OrganizeOutcome> {
        let record = self.get(id).await?;
        if !matches!(
            record.status,
            DownloadStatus::Completed | DownloadStatus::Failed
        ) {
            return Err(AppError::InvalidState {
                id,
                status: record.status,
                operation: "organize",
            });
        }
        self.job.run(record).await
    }
}

fn normalize(book: NewDownload) -> AppResult<NewDownload> {
    let title = required("title", &book.title, MAX_TITLE_CHARS)?;
    let author = required("author", &book.author, MAX_AUTHOR_CHARS)?;
    let series = optional("series", book.series.as_deref(), MAX_SERIES_CHARS)?;
    Ok(NewDownload {
        title,
        author,
        series,
        series_number: trimmed(book.series_number.as_deref()),
        category: trimmed(book.category.as_deref()),
    })
}

fn required(field: &'static str, value: &str, max: usize) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::validation(field, "is required"));
    }
    within_limit(field, value, max)?;
    Ok(value.to_string())
}

fn optional(field: &'static str, value: Option<&str>, max: usize) -> AppResult<Option<String>> {
    let value = trimmed(value);
    if let Some(value) = &value {
        within_limit(field, value, max)?;
    }
    Ok(value)
}

fn within_limit(field: &'static str, value: &str, max: usize) -> AppResult<()> {
    if value.chars().count() > max {
        return Err(AppError::validation(
            field,
            format!("must be {max} characters or less"),
        ));
    }
    Ok(())
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
