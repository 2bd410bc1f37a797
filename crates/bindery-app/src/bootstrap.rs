//! Service wiring from a state directory.
//!
//! The state directory holds `settings.json` and `downloads.db`. Settings
//! are always overlaid by `BINDERY_*` environment variables.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bindery_config::{AgentSettings, EnvOverlay, MonitorSettings, SettingsProvider, SettingsStore};
use bindery_events::EventBus;
use bindery_qbit::QbitClient;
use bindery_runtime::RecordStore;
use bindery_telemetry::Metrics;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::monitor::Monitor;

/// Environment variable naming the state directory.
pub const STATE_DIR_ENV: &str = "BINDERY_STATE_DIR";
/// State directory used when none is configured.
pub const DEFAULT_STATE_DIR: &str = "data";

const SETTINGS_FILE: &str = "settings.json";
const RECORDS_FILE: &str = "downloads.db";

/// Files kept in the state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    /// Paths rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The state directory itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persisted settings document.
    #[must_use]
    pub fn settings(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    /// Persisted download records.
    #[must_use]
    pub fn records(&self) -> PathBuf {
        self.root.join(RECORDS_FILE)
    }
}

/// Settings from the state directory with the environment overlaid.
///
/// # Errors
///
/// Returns [`AppError::Config`] when the settings file cannot be read.
pub async fn open_settings(paths: &StatePaths) -> AppResult<Arc<EnvOverlay<SettingsStore>>> {
    let store = SettingsStore::open(paths.settings())
        .await
        .map_err(|err| AppError::config("settings.open", err))?;
    Ok(Arc::new(EnvOverlay::new(store)))
}

/// Download records from the state directory.
///
/// # Errors
///
/// Returns [`AppError::Store`] when the records database cannot be opened.
pub async fn open_records(paths: &StatePaths) -> AppResult<Arc<RecordStore>> {
    RecordStore::open(paths.records())
        .await
        .map(Arc::new)
        .map_err(|err| AppError::store("records.open", err))
}

/// Wire the record store, the qBittorrent client and the shared event bus
/// and metrics.
///
/// # Errors
///
/// Returns an error when the records cannot be loaded, the qBittorrent
/// connection settings are missing or invalid, or metrics fail to register.
pub async fn build_context(
    paths: &StatePaths,
    settings: Arc<dyn SettingsProvider>,
) -> AppResult<AppContext> {
    let store = open_records(paths).await?;
    let agent_settings = AgentSettings::resolve(settings.as_ref())
        .await
        .map_err(|err| AppError::config("agent.resolve", err))?;
    debug!(agent = ?agent_settings, "remote agent configured");
    let agent = QbitClient::new(&agent_settings).map_err(|err| AppError::agent("agent.build", err))?;
    let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;

    Ok(AppContext::new(
        store,
        Arc::new(agent),
        settings,
        EventBus::new(),
        metrics,
    ))
}

/// Log every lifecycle event at debug level until `shutdown` fires.
pub fn spawn_event_logger(events: &EventBus, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut stream = events.subscribe(None);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                next = stream.next() => {
                    let Some(envelope) = next else { break };
                    debug!(
                        event_id = envelope.id,
                        kind = envelope.event.kind(),
                        download_id = ?envelope.event.download_id(),
                        "event published"
                    );
                }
            }
        }
    })
}

/// Run the monitor until `shutdown` fires, then wait for in-flight organize
/// tasks.
///
/// # Errors
///
/// Returns [`AppError::Config`] when the monitor settings are invalid.
pub async fn run_monitor(ctx: &AppContext, shutdown: CancellationToken) -> AppResult<()> {
    let settings = MonitorSettings::resolve(ctx.settings.as_ref())
        .await
        .map_err(|err| AppError::config("monitor.resolve", err))?;
    info!(
        interval_secs = settings.interval.as_secs(),
        auto_organize = settings.auto_organize,
        "starting download monitor"
    );

    let logger = spawn_event_logger(&ctx.events, shutdown.clone());
    let monitor = Monitor::new(ctx).with_interval(settings.interval);
    let result = monitor.run(shutdown).await;

    info!(in_flight = monitor.in_flight(), "waiting for organize tasks");
    monitor.drain().await;
    if let Err(err) = logger.await {
        warn!(error = %err, "event logger task failed");
    }
    info!(metrics = ?ctx.metrics.snapshot(), "download monitor stopped");

    match result {
        Err(AppError::Cancelled) => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bindery_config::SettingKey;

    use super::*;

    #[test]
    fn state_paths_live_under_the_root() {
        let paths = StatePaths::new("/var/lib/bindery");
        assert_eq!(paths.settings(), Path::new("/var/lib/bindery/settings.json"));
        assert_eq!(paths.records(), Path::new("/var/lib/bindery/downloads.db"));
    }

    #[tokio::test]
    async fn context_requires_an_agent_url() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = StatePaths::new(dir.path());
        let settings = Arc::new(SettingsStore::in_memory());
        let err = build_context(&paths, settings).await;
        assert!(matches!(
            err,
            Err(AppError::Config {
                operation: "agent.resolve",
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn monitor_stops_cleanly_on_shutdown() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = StatePaths::new(dir.path());
        let settings = Arc::new(SettingsStore::from_values([
            (SettingKey::QbittorrentUrl, "http://127.0.0.1:9"),
            (SettingKey::MonitorIntervalSeconds, "1"),
        ]));
        let ctx = build_context(&paths, settings).await?;

        let shutdown = CancellationToken::new();
        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        tokio::time::timeout(Duration::from_secs(5), run_monitor(&ctx, shutdown)).await??;
        Ok(())
    }
}
