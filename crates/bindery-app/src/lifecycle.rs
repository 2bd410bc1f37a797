//! Status writes and the organize job shared by the monitor and the manual
//! organize operation.
//!
//! # Design
//! - Every status change goes through [`Lifecycle::transition`], which
//!   publishes `StatusChanged` and counts the transition once the store
//!   accepted it.
//! - The organize job writes `organizing` first and aborts when that write
//!   fails. The remaining writes are best-effort and only logged.
//! - When the time budget elapses the organizer is cancelled and awaited, so
//!   a copy is rolled back before the record is marked failed. A move stops
//!   after the file in flight.

use std::sync::Arc;
use std::time::Duration;

use bindery_core::{DownloadRecord, DownloadStatus, DownloadStore, StoreResult};
use bindery_events::{Event, EventBus};
use bindery_library::{OrganizeError, OrganizeOutcome, OrganizeRequest, Organizer};
use bindery_telemetry::Metrics;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::AppContext;
use crate::error::{AppError, AppResult};

/// Time budget for one organize attempt.
pub const DEFAULT_ORGANIZE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Clone)]
pub(crate) struct Lifecycle {
    store: Arc<dyn DownloadStore>,
    events: EventBus,
    metrics: Metrics,
}

impl Lifecycle {
    pub(crate) fn new(ctx: &AppContext) -> Self {
        Self {
            store: Arc::clone(&ctx.store),
            events: ctx.events.clone(),
            metrics: ctx.metrics.clone(),
        }
    }

    /// Persist `to` for a record currently in `from`.
    pub(crate) async fn transition(
        &self,
        id: Uuid,
        from: DownloadStatus,
        to: DownloadStatus,
    ) -> StoreResult<()> {
        if to == DownloadStatus::Completed {
            self.store.mark_completed(id).await?;
        } else {
            self.store.update_status(id, to).await?;
        }
        if from != to {
            self.metrics.inc_status_transition(to.as_str());
            info!(download_id = %id, from = %from, to = %to, "download status changed");
            self.events.publish(Event::StatusChanged {
                download_id: id,
                from,
                to,
            });
        }
        Ok(())
    }
}

/// Runs the organizer for one record and writes the outcome back.
#[derive(Clone)]
pub struct OrganizeJob {
    store: Arc<dyn DownloadStore>,
    organizer: Organizer,
    lifecycle: Lifecycle,
    events: EventBus,
    metrics: Metrics,
    timeout: Duration,
}

impl OrganizeJob {
    /// Job bounded by `timeout`.
    #[must_use]
    pub fn new(ctx: &AppContext, timeout: Duration) -> Self {
        Self {
            store: Arc::clone(&ctx.store),
            organizer: ctx.organizer.clone(),
            lifecycle: Lifecycle::new(ctx),
            events: ctx.events.clone(),
            metrics: ctx.metrics.clone(),
            timeout,
        }
    }

    /// Organize `record`, which must be `completed` or `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] when the record cannot enter `organizing`,
    /// otherwise the organize failure or [`AppError::OrganizeTimeout`]. In
    /// the latter cases the record has been marked `failed`.
    pub async fn run(&self, record: DownloadRecord) -> AppResult<OrganizeOutcome> {
        let id = record.id;
        if let Err(err) = self.store.update_error(id, None).await {
            warn!(download_id = %id, error = %err, "failed to clear previous organize error");
        }
        self.lifecycle
            .transition(id, record.status, DownloadStatus::Organizing)
            .await
            .map_err(|err| {
                error!(download_id = %id, error = %err, "failed to mark download organizing");
                AppError::store("organize.begin", err)
            })?;

        let request = OrganizeRequest::from(&record);
        let result = self.organize_within_budget(&request).await;

        match result {
            Ok(outcome) => {
                self.finish(id, &outcome).await;
                self.metrics.inc_organize_outcome("organized");
                Ok(outcome)
            }
            Err(err) => {
                let label = if matches!(err, AppError::OrganizeTimeout { .. }) {
                    "timeout"
                } else {
                    "failed"
                };
                self.fail(id, &err).await;
                self.metrics.inc_organize_outcome(label);
                Err(err)
            }
        }
    }

    async fn organize_within_budget(&self, request: &OrganizeRequest) -> AppResult<OrganizeOutcome> {
        let cancel = CancellationToken::new();
        let organize = self.organizer.organize_until(request, &cancel);
        tokio::pin!(organize);

        tokio::select! {
            result = &mut organize => result.map_err(AppError::from),
            () = sleep(self.timeout) => {
                cancel.cancel();
                match organize.await {
                    Err(OrganizeError::Cancelled) => {
                        let err = AppError::OrganizeTimeout {
                            timeout: self.timeout,
                        };
                        self.events.publish(Event::OrganizeFailed {
                            download_id: request.id,
                            message: err.to_string(),
                        });
                        Err(err)
                    }
                    other => other.map_err(AppError::from),
                }
            }
        }
    }

    async fn finish(&self, id: Uuid, outcome: &OrganizeOutcome) {
        if let Err(err) = self.store.update_organized_path(id, &outcome.target).await {
            warn!(download_id = %id, error = %err, "failed to record organized path");
        }
        if let Err(err) = self
            .lifecycle
            .transition(id, DownloadStatus::Organizing, DownloadStatus::Organized)
            .await
        {
            warn!(download_id = %id, error = %err, "failed to mark download organized");
        }
    }

    async fn fail(&self, id: Uuid, err: &AppError) {
        warn!(download_id = %id, error = %err, "organize failed");
        if let Err(store_err) = self.store.update_error(id, Some(err.to_string())).await {
            warn!(download_id = %id, error = %store_err, "failed to record organize error");
        }
        if let Err(store_err) = self
            .lifecycle
            .transition(id, DownloadStatus::Organizing, DownloadStatus::Failed)
            .await
        {
            warn!(download_id = %id, error = %store_err, "failed to mark download failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use bindery_runtime::RecordStore;

    use super::*;
    use crate::testing::{
        ScriptedAgent, StallingTransfer, context, queued_record, settings_with_library,
    };

    #[tokio::test]
    async fn timed_out_copy_is_rolled_back_and_retryable() -> anyhow::Result<()> {
        let downloads = tempfile::tempdir()?;
        let library = tempfile::tempdir()?;
        let first = downloads.path().join("01.mp3");
        let second = downloads.path().join("02.mp3");
        std::fs::write(&first, b"one")?;
        std::fs::write(&second, b"two")?;

        let store = Arc::new(RecordStore::in_memory().await?);
        let agent = ScriptedAgent::new();
        agent.set_files(
            "hash-t",
            vec![("01.mp3".into(), first, 3), ("02.mp3".into(), second, 3)],
        );
        let record = queued_record("Warbreaker", "hash-t");
        let id = record.id;
        store.create(record).await?;
        store.mark_completed(id).await?;
        let settings = settings_with_library(library.path(), &[]);

        let ctx = context(store.clone(), agent.clone(), settings.clone())?;
        let stalling = Organizer::new(
            agent.clone(),
            settings.clone(),
            ctx.events.clone(),
            ctx.metrics.clone(),
        )
        .with_transfer(StallingTransfer::new());
        let ctx = ctx.with_organizer(stalling);
        let job = OrganizeJob::new(&ctx, Duration::from_millis(200));

        let result = job.run(store.get(id).await?).await;

        assert!(matches!(result, Err(AppError::OrganizeTimeout { .. })));
        let stored = store.get(id).await?;
        assert_eq!(stored.status, DownloadStatus::Failed);
        assert_eq!(
            stored.error_message.as_deref(),
            Some("organize timed out after 200ms")
        );
        assert!(!library.path().join("Brandon Sanderson").exists());

        let retry = OrganizeJob::new(
            &context(store.clone(), agent, settings)?,
            DEFAULT_ORGANIZE_TIMEOUT,
        );
        let outcome = retry.run(store.get(id).await?).await?;
        assert_eq!(std::fs::read(outcome.target.join("01.mp3"))?, b"one");
        assert_eq!(std::fs::read(outcome.target.join("02.mp3"))?, b"two");
        let stored = store.get(id).await?;
        assert_eq!(stored.status, DownloadStatus::Organized);
        assert!(stored.error_message.is_none());
        Ok(())
    }
}
