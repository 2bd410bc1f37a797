//! Test doubles shared by the monitor and download service tests.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bindery_config::{SettingKey, SettingsProvider, SettingsStore};
use bindery_core::{
    AgentError, AgentResult, DownloadRecord, DownloadStore, NewDownload, RemoteAgent, RemoteFile,
    RemoteStatus, TransferSource,
};
use bindery_events::EventBus;
use bindery_library::{FileTransfer, LocalTransfer};
use bindery_qbit::magnet_hash;
use bindery_telemetry::Metrics;

use crate::context::AppContext;

/// Remote agent answering from in-memory scripts.
#[derive(Default)]
pub(crate) struct ScriptedAgent {
    statuses: Mutex<HashMap<String, RemoteStatus>>,
    missing: Mutex<HashSet<String>>,
    files: Mutex<HashMap<String, Vec<RemoteFile>>>,
    files_delay: Mutex<Option<Duration>>,
    unreachable: AtomicBool,
    files_calls: AtomicUsize,
    pub(crate) added: Mutex<Vec<(String, Option<String>)>>,
    pub(crate) deleted: Mutex<Vec<(String, bool)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedAgent {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_status(&self, handle: &str, state: &str, progress: f64) {
        lock(&self.statuses).insert(
            handle.to_string(),
            RemoteStatus {
                state: state.to_string(),
                progress,
            },
        );
    }

    pub(crate) fn set_missing(&self, handle: &str) {
        lock(&self.missing).insert(handle.to_string());
    }

    pub(crate) fn set_files(&self, handle: &str, files: Vec<(String, PathBuf, u64)>) {
        let files = files
            .into_iter()
            .map(|(name, path, size)| RemoteFile { name, path, size })
            .collect();
        lock(&self.files).insert(handle.to_string(), files);
    }

    pub(crate) fn delay_files(&self, delay: Duration) {
        *lock(&self.files_delay) = Some(delay);
    }

    pub(crate) fn fail_all(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub(crate) fn files_calls(&self) -> usize {
        self.files_calls.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &'static str, handle: &str) -> AgentResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AgentError::unreachable(
                operation,
                io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
            ));
        }
        if lock(&self.missing).contains(handle) {
            return Err(AgentError::NotFound {
                handle: handle.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteAgent for ScriptedAgent {
    async fn status(&self, handle: &str) -> AgentResult<RemoteStatus> {
        self.check("torrents.info", handle)?;
        lock(&self.statuses)
            .get(handle)
            .cloned()
            .ok_or_else(|| AgentError::NotFound {
                handle: handle.to_string(),
            })
    }

    async fn files(&self, handle: &str) -> AgentResult<Vec<RemoteFile>> {
        self.files_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.files_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check("torrents.files", handle)?;
        Ok(lock(&self.files).get(handle).cloned().unwrap_or_default())
    }

    async fn delete(&self, handle: &str, delete_files: bool) -> AgentResult<()> {
        self.check("torrents.delete", handle)?;
        lock(&self.deleted).push((handle.to_string(), delete_files));
        Ok(())
    }

    async fn add(&self, source: TransferSource, category: Option<&str>) -> AgentResult<String> {
        let handle = match source {
            TransferSource::Magnet(magnet) => magnet_hash(&magnet),
            TransferSource::Url { handle, .. } => handle,
        }
        .ok_or(AgentError::InvalidInput {
            field: "handle",
            reason: "missing",
        })?;
        self.check("torrents.add", &handle)?;
        lock(&self.added).push((handle.clone(), category.map(str::to_string)));
        Ok(handle)
    }
}

/// Copies the first file, then writes part of the next one and hangs.
#[derive(Default)]
pub(crate) struct StallingTransfer {
    copies: AtomicUsize,
}

impl StallingTransfer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl FileTransfer for StallingTransfer {
    async fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
        if self.copies.fetch_add(1, Ordering::SeqCst) == 0 {
            return LocalTransfer.copy_file(from, to).await;
        }
        std::fs::write(to, b"part")?;
        std::future::pending().await
    }

    async fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        LocalTransfer.move_file(from, to).await
    }
}

pub(crate) fn context(
    store: Arc<dyn DownloadStore>,
    agent: Arc<dyn RemoteAgent>,
    settings: Arc<dyn SettingsProvider>,
) -> anyhow::Result<AppContext> {
    Ok(AppContext::new(
        store,
        agent,
        settings,
        EventBus::new(),
        Metrics::new()?,
    ))
}

pub(crate) fn settings_with_library(
    library: &Path,
    extra: &[(SettingKey, &str)],
) -> Arc<SettingsStore> {
    let mut values = vec![(
        SettingKey::PathsDestination,
        library.to_string_lossy().into_owned(),
    )];
    values.extend(extra.iter().map(|(key, value)| (*key, (*value).to_string())));
    Arc::new(SettingsStore::from_values(values))
}

pub(crate) fn queued_record(title: &str, handle: &str) -> DownloadRecord {
    DownloadRecord::new(
        NewDownload {
            title: title.to_string(),
            author: "Brandon Sanderson".to_string(),
            ..NewDownload::default()
        },
        handle,
    )
}
