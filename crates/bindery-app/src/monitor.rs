//! Reconciliation loop between the remote agent and the record store.
//!
//! # Design
//! - One tick polls every active record. A failed query affects only that
//!   record; when every query fails the `remote_agent` component is marked
//!   degraded and the loop carries on at the next interval.
//! - Organize dispatch is edge-triggered: it happens only on the tick that
//!   moves a record into `completed`.
//! - Organize tasks run on a bounded `JoinSet`, deduplicated by record id.
//!   Cancelling the monitor stops new dispatches but never aborts a running
//!   task; [`Monitor::drain`] waits for them.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bindery_config::{MonitorSettings, SettingsProvider};
use bindery_core::{
    DownloadRecord, DownloadStatus, DownloadStore, RemoteAgent, RemoteStatus,
    translate_remote_state,
};
use bindery_events::{Event, EventBus, HealthRegistry};
use bindery_telemetry::Metrics;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::lifecycle::{DEFAULT_ORGANIZE_TIMEOUT, Lifecycle, OrganizeJob};

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
/// Default number of organize tasks allowed to run at once.
pub const DEFAULT_ORGANIZE_CONCURRENCY: usize = 3;

/// Health component toggled by remote agent reachability.
pub const REMOTE_AGENT_COMPONENT: &str = "remote_agent";

/// Counters describing one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Active records queried.
    pub polled: usize,
    /// Queries that failed.
    pub failed: usize,
    /// Records that entered `completed` on this tick.
    pub completed: usize,
    /// Organize tasks started on this tick.
    pub dispatched: usize,
}

/// Polls the remote agent and drives records through their lifecycle.
pub struct Monitor {
    store: Arc<dyn DownloadStore>,
    agent: Arc<dyn RemoteAgent>,
    settings: Arc<dyn SettingsProvider>,
    lifecycle: Lifecycle,
    job: OrganizeJob,
    events: EventBus,
    metrics: Metrics,
    health: HealthRegistry,
    interval: Duration,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    tasks: AsyncMutex<JoinSet<()>>,
}

impl Monitor {
    /// Monitor with the default interval, organize timeout and concurrency.
    #[must_use]
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            store: Arc::clone(&ctx.store),
            agent: Arc::clone(&ctx.agent),
            settings: Arc::clone(&ctx.settings),
            lifecycle: Lifecycle::new(ctx),
            job: OrganizeJob::new(ctx, DEFAULT_ORGANIZE_TIMEOUT),
            events: ctx.events.clone(),
            metrics: ctx.metrics.clone(),
            health: ctx.health.clone(),
            interval: DEFAULT_POLL_INTERVAL,
            permits: Arc::new(Semaphore::new(DEFAULT_ORGANIZE_CONCURRENCY)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tasks: AsyncMutex::new(JoinSet::new()),
        }
    }

    /// Set the poll interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Replace the organize job, e.g. to change its timeout.
    #[must_use]
    pub fn with_job(mut self, job: OrganizeJob) -> Self {
        self.job = job;
        self
    }

    /// Cap the number of concurrent organize tasks (at least one).
    #[must_use]
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    /// Poll interval in use.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Tick every interval until `shutdown` fires.
    ///
    /// The first tick happens one interval after the call. Cancellation is
    /// observed between ticks only.
    ///
    /// # Errors
    ///
    /// Always ends with [`AppError::Cancelled`].
    pub async fn run(&self, shutdown: CancellationToken) -> AppResult<()> {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "download monitor started");

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("download monitor stopping");
                    return Err(AppError::Cancelled);
                }
                _ = ticker.tick() => {
                    match self.reconcile(Some(&shutdown)).await {
                        Ok(report) => debug!(
                            polled = report.polled,
                            failed = report.failed,
                            completed = report.completed,
                            dispatched = report.dispatched,
                            "monitor tick finished"
                        ),
                        Err(err) => warn!(error = %err, "monitor tick failed"),
                    }
                }
            }
        }
    }

    /// Run one reconciliation pass.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] when the active records cannot be listed.
    /// Per-record failures are logged and counted in the report instead.
    pub async fn tick(&self) -> AppResult<TickReport> {
        self.reconcile(None).await
    }

    /// Wait for every dispatched organize task to finish.
    pub async fn drain(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "organize task panicked");
            }
        }
    }

    /// Organize tasks currently tracked.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn reconcile(&self, shutdown: Option<&CancellationToken>) -> AppResult<TickReport> {
        self.reap().await;
        let records = self
            .store
            .list_active()
            .await
            .map_err(|err| AppError::store("monitor.list_active", err))?;
        self.metrics.set_active_downloads(records.len());

        let mut report = TickReport::default();
        for record in records {
            report.polled += 1;
            match self.agent.status(&record.remote_handle).await {
                Ok(remote) => self.apply(record, &remote, shutdown, &mut report).await,
                Err(err) => {
                    report.failed += 1;
                    self.metrics.inc_remote_query_failure();
                    warn!(
                        download_id = %record.id,
                        handle = %record.remote_handle,
                        error = %err,
                        "remote status query failed"
                    );
                }
            }
        }

        if report.polled > 0 && report.failed == report.polled {
            error!(
                failed = report.failed,
                "every remote status query failed; remote agent may be down"
            );
            self.health.mark_degraded(
                REMOTE_AGENT_COMPONENT,
                "every status query failed in the last tick",
            );
        } else if report.polled > 0 {
            self.health.mark_recovered(REMOTE_AGENT_COMPONENT);
        }
        self.metrics.inc_monitor_tick();
        Ok(report)
    }

    async fn apply(
        &self,
        record: DownloadRecord,
        remote: &RemoteStatus,
        shutdown: Option<&CancellationToken>,
        report: &mut TickReport,
    ) {
        let id = record.id;
        let progress = record.next_progress(remote.progress);
        match self.store.update_progress(id, remote.progress).await {
            Ok(()) if progress.total_cmp(&record.progress).is_gt() => {
                self.events.publish(Event::Progress {
                    download_id: id,
                    percent: progress,
                });
            }
            Ok(()) => {}
            Err(err) => warn!(download_id = %id, error = %err, "failed to store progress"),
        }

        let Some(next) = translate_remote_state(&remote.state) else {
            debug!(download_id = %id, state = %remote.state, "remote state carries no lifecycle change");
            return;
        };
        if next.rank() <= record.status.rank() {
            return;
        }

        if let Err(err) = self.lifecycle.transition(id, record.status, next).await {
            warn!(download_id = %id, to = %next, error = %err, "failed to advance download status");
            return;
        }
        if next != DownloadStatus::Completed {
            return;
        }

        report.completed += 1;
        if shutdown.is_some_and(CancellationToken::is_cancelled) {
            debug!(download_id = %id, "monitor cancelled; not dispatching organize");
            return;
        }
        if !self.auto_organize().await {
            info!(download_id = %id, "auto-organize disabled; download left completed");
            return;
        }

        let mut record = record;
        record.status = DownloadStatus::Completed;
        if self.dispatch(record).await {
            report.dispatched += 1;
        }
    }

    async fn auto_organize(&self) -> bool {
        MonitorSettings::auto_organize(self.settings.as_ref())
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "failed to read auto-organize setting; assuming enabled");
                true
            })
    }

    async fn dispatch(&self, record: DownloadRecord) -> bool {
        let id = record.id;
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        if !inserted {
            debug!(download_id = %id, "organize already in flight");
            return false;
        }

        let job = self.job.clone();
        let permits = Arc::clone(&self.permits);
        let in_flight = Arc::clone(&self.in_flight);
        self.tasks.lock().await.spawn(async move {
            if let Ok(_permit) = permits.acquire_owned().await {
                // Failures are recorded on the download by the job itself.
                let _ = job.run(record).await;
            }
            in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        });
        info!(download_id = %id, "organize dispatched");
        true
    }

    async fn reap(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(joined) = tasks.try_join_next() {
            if let Err(err) = joined {
                error!(error = %err, "organize task panicked");
            }
        }
    }
}
