//! The organize pipeline.
//!
//! # Design
//! - Every check that can fail runs before the first filesystem mutation
//!   beneath the target: settings, target path, manifest, sources,
//!   destination collisions, free space.
//! - Copy is all-or-nothing: on failure every file this call copied, the
//!   partial file, and the directories this call created are removed.
//! - Move is per-file: files moved before a failure stay moved.
//! - Cancellation is observed between files and while a copy is in flight.
//!   A cancelled copy is rolled back like a failed one; a cancelled move
//!   finishes the file in flight and stops.
//! - Settings are resolved per invocation and dropped afterwards.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bindery_config::{OrganizeSettings, SettingsProvider, TransferMode};
use bindery_core::{DownloadRecord, RemoteAgent, RemoteFile, TemplateVars, resolve};
use bindery_events::{Event, EventBus, HealthRegistry};
use bindery_telemetry::Metrics;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{OrganizeError, OrganizeResult};
use crate::paths::{destination_name, library_relative, remap_to_mount};
use crate::space::{SpaceProbe, StatvfsProbe, required_space};
use crate::transfer::{FileTransfer, LocalTransfer, discard_partial};

const HEALTH_COMPONENT: &str = "organizer";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StepKind {
    ResolveSettings,
    PrepareRoot,
    ResolveTarget,
    FetchManifest,
    ValidateSources,
    CheckSpace,
    CreateTarget,
    Transfer,
}

impl StepKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::ResolveSettings => "resolve_settings",
            Self::PrepareRoot => "prepare_root",
            Self::ResolveTarget => "resolve_target",
            Self::FetchManifest => "fetch_manifest",
            Self::ValidateSources => "validate_sources",
            Self::CheckSpace => "check_space",
            Self::CreateTarget => "create_target",
            Self::Transfer => "transfer",
        }
    }
}

/// Book metadata needed to organize one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizeRequest {
    /// Record identifier, used for events and logs.
    pub id: Uuid,
    /// Book title.
    pub title: String,
    /// Book author.
    pub author: String,
    /// Series name.
    pub series: Option<String>,
    /// Position within the series.
    pub series_number: Option<String>,
    /// Transfer handle in the remote agent.
    pub remote_handle: String,
}

impl From<&DownloadRecord> for OrganizeRequest {
    fn from(record: &DownloadRecord) -> Self {
        Self {
            id: record.id,
            title: record.title.clone(),
            author: record.author.clone(),
            series: record.series_name().map(str::to_string),
            series_number: record.series_number.clone(),
            remote_handle: record.remote_handle.clone(),
        }
    }
}

impl OrganizeRequest {
    fn has_series(&self) -> bool {
        self.series
            .as_deref()
            .is_some_and(|series| !series.trim().is_empty())
    }

    fn template_vars(&self) -> TemplateVars {
        TemplateVars::book(
            &self.author,
            &self.title,
            self.series.as_deref(),
            self.series_number.as_deref(),
        )
        .sanitized()
    }
}

/// Result of a successful organize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizeOutcome {
    /// Library directory holding the files.
    pub target: PathBuf,
    /// Number of files placed.
    pub files: usize,
    /// Bytes placed.
    pub bytes: u64,
    /// Copy or move.
    pub mode: TransferMode,
}

#[derive(Debug)]
struct PlannedFile {
    name: String,
    source: PathBuf,
    destination: PathBuf,
}

#[derive(Debug)]
struct Plan {
    target: PathBuf,
    files: Vec<PlannedFile>,
    bytes: u64,
}

/// Places completed transfers into the library layout.
#[derive(Clone)]
pub struct Organizer {
    agent: Arc<dyn RemoteAgent>,
    settings: Arc<dyn SettingsProvider>,
    transfer: Arc<dyn FileTransfer>,
    space: Arc<dyn SpaceProbe>,
    events: EventBus,
    health: HealthRegistry,
    metrics: Metrics,
}

impl Organizer {
    /// Organizer using the local filesystem and `statvfs` for space checks.
    #[must_use]
    pub fn new(
        agent: Arc<dyn RemoteAgent>,
        settings: Arc<dyn SettingsProvider>,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        let health = HealthRegistry::new(events.clone());
        Self {
            agent,
            settings,
            transfer: Arc::new(LocalTransfer),
            space: Arc::new(StatvfsProbe),
            events,
            health,
            metrics,
        }
    }

    /// Replace the per-file transfer implementation.
    #[must_use]
    pub fn with_transfer(mut self, transfer: Arc<dyn FileTransfer>) -> Self {
        self.transfer = transfer;
        self
    }

    /// Replace the free space probe.
    #[must_use]
    pub fn with_space_probe(mut self, space: Arc<dyn SpaceProbe>) -> Self {
        self.space = space;
        self
    }

    /// Share a health registry with other components.
    #[must_use]
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    /// Organize one download's files into the library.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's [`OrganizeError`]. For copies nothing
    /// is left behind; for moves, files moved before the failure stay moved.
    pub async fn organize(&self, request: &OrganizeRequest) -> OrganizeResult<OrganizeOutcome> {
        self.organize_until(request, &CancellationToken::new()).await
    }

    /// [`Organizer::organize`], stopping early once `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`OrganizeError::Cancelled`] when stopped by `cancel`, after
    /// copied files have been removed. Otherwise as [`Organizer::organize`].
    pub async fn organize_until(
        &self,
        request: &OrganizeRequest,
        cancel: &CancellationToken,
    ) -> OrganizeResult<OrganizeOutcome> {
        self.events.publish(Event::OrganizeStarted {
            download_id: request.id,
        });

        match self.execute_pipeline(request, cancel).await {
            Ok(outcome) => {
                self.health.mark_recovered(HEALTH_COMPONENT);
                info!(
                    download_id = %request.id,
                    target = %outcome.target.display(),
                    files = outcome.files,
                    bytes = outcome.bytes,
                    mode = %outcome.mode,
                    "download organized"
                );
                self.events.publish(Event::OrganizeCompleted {
                    download_id: request.id,
                    path: outcome.target.to_string_lossy().into_owned(),
                    files: outcome.files,
                    bytes: outcome.bytes,
                });
                Ok(outcome)
            }
            Err(OrganizeError::Cancelled) => {
                debug!(download_id = %request.id, "organize cancelled");
                Err(OrganizeError::Cancelled)
            }
            Err(error) => {
                let detail = error.to_string();
                self.health.mark_degraded(HEALTH_COMPONENT, &detail);
                self.events.publish(Event::OrganizeFailed {
                    download_id: request.id,
                    message: detail,
                });
                Err(error)
            }
        }
    }

    async fn execute_pipeline(
        &self,
        request: &OrganizeRequest,
        cancel: &CancellationToken,
    ) -> OrganizeResult<OrganizeOutcome> {
        let settings = self.record_step(
            StepKind::ResolveSettings,
            OrganizeSettings::resolve(self.settings.as_ref())
                .await
                .map_err(OrganizeError::from),
        )?;
        let root = settings.destination.as_path();

        self.record_step(
            StepKind::PrepareRoot,
            fs::create_dir_all(root)
                .await
                .map_err(|source| OrganizeError::DestinationUnreachable {
                    path: root.to_path_buf(),
                    source,
                }),
        )?;

        let target = self.record_step(
            StepKind::ResolveTarget,
            Self::resolve_target(request, &settings),
        )?;

        let manifest = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(OrganizeError::Cancelled),
            manifest = self.fetch_manifest(request) => {
                self.record_step(StepKind::FetchManifest, manifest)?
            }
        };

        let plan = self.record_step(
            StepKind::ValidateSources,
            Self::plan(target, &manifest, settings.local_mount.as_deref()).await,
        )?;

        self.record_step(StepKind::CheckSpace, self.check_space(root, plan.bytes))?;
        if cancel.is_cancelled() {
            return Err(OrganizeError::Cancelled);
        }

        info!(
            download_id = %request.id,
            handle = %request.remote_handle,
            files = plan.files.len(),
            bytes = plan.bytes,
            target = %plan.target.display(),
            mode = %settings.mode,
            "organizing files"
        );

        let created = self.record_step(
            StepKind::CreateTarget,
            create_target(root, &plan.target).await,
        )?;

        let transferred = match settings.mode {
            TransferMode::Copy => self.copy_all(&plan, &created, cancel).await,
            TransferMode::Move => self.move_all(&plan, cancel).await,
        };
        self.record_step(StepKind::Transfer, transferred)?;

        Ok(OrganizeOutcome {
            target: plan.target,
            files: plan.files.len(),
            bytes: plan.bytes,
            mode: settings.mode,
        })
    }

    fn resolve_target(
        request: &OrganizeRequest,
        settings: &OrganizeSettings,
    ) -> OrganizeResult<PathBuf> {
        let template = if request.has_series() {
            &settings.template
        } else {
            &settings.no_series_template
        };
        let resolved = resolve(template, &request.template_vars());
        let relative = library_relative(&resolved)?;
        Ok(settings.destination.join(relative))
    }

    async fn fetch_manifest(
        &self,
        request: &OrganizeRequest,
    ) -> OrganizeResult<Vec<RemoteFile>> {
        let handle = &request.remote_handle;
        let files = self
            .agent
            .files(handle)
            .await
            .map_err(|source| OrganizeError::ManifestUnavailable {
                handle: handle.clone(),
                source,
            })?;
        if files.is_empty() {
            return Err(OrganizeError::EmptyManifest {
                handle: handle.clone(),
            });
        }
        Ok(files)
    }

    async fn plan(
        target: PathBuf,
        manifest: &[RemoteFile],
        mount: Option<&Path>,
    ) -> OrganizeResult<Plan> {
        let mut files = Vec::with_capacity(manifest.len());
        let mut names = HashSet::with_capacity(manifest.len());
        let mut bytes = 0_u64;

        for file in manifest {
            let source = remap_to_mount(mount, &file.path);
            let metadata = match fs::metadata(&source).await {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Err(OrganizeError::SourceMissing { path: source });
                }
                Err(source_err) => {
                    return Err(OrganizeError::SourceUnreadable {
                        path: source,
                        source: source_err,
                    });
                }
            };
            if !metadata.is_file() {
                return Err(OrganizeError::SourceUnreadable {
                    path: source,
                    source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
                });
            }

            let name = destination_name(&file.name)?;
            let destination = target.join(name);
            if !names.insert(name.to_os_string()) || fs::try_exists(&destination).await.unwrap_or(true)
            {
                return Err(OrganizeError::DestinationExists { path: destination });
            }

            bytes = bytes.saturating_add(metadata.len());
            files.push(PlannedFile {
                name: file.name.clone(),
                source,
                destination,
            });
        }

        Ok(Plan {
            target,
            files,
            bytes,
        })
    }

    fn check_space(&self, root: &Path, total: u64) -> OrganizeResult<()> {
        let available = self
            .space
            .available(root)
            .map_err(|source| OrganizeError::SpaceProbe {
                path: root.to_path_buf(),
                source,
            })?;
        let required = required_space(total);
        if available < required {
            return Err(OrganizeError::InsufficientSpace {
                required,
                available,
            });
        }
        Ok(())
    }

    async fn copy_all(
        &self,
        plan: &Plan,
        created: &[PathBuf],
        cancel: &CancellationToken,
    ) -> OrganizeResult<()> {
        let mut copied: Vec<&Path> = Vec::with_capacity(plan.files.len());
        for (index, file) in plan.files.iter().enumerate() {
            let copy = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = self.transfer.copy_file(&file.source, &file.destination) => Some(result),
            };
            let Some(copy) = copy else {
                warn!(
                    file = %file.name,
                    copied = copied.len(),
                    "copy cancelled; removing files copied so far"
                );
                copied.push(&file.destination);
                rollback_copy(&copied, created).await;
                return Err(OrganizeError::Cancelled);
            };
            match copy {
                Ok(_) => {
                    copied.push(&file.destination);
                    debug!(
                        file = %file.name,
                        position = index + 1,
                        total = plan.files.len(),
                        "file copied"
                    );
                }
                Err(source) => {
                    warn!(
                        file = %file.name,
                        error = %source,
                        copied = copied.len(),
                        "copy failed; removing files copied so far"
                    );
                    if source.kind() != io::ErrorKind::AlreadyExists {
                        copied.push(&file.destination);
                    }
                    rollback_copy(&copied, created).await;
                    return Err(OrganizeError::Transfer {
                        mode: TransferMode::Copy,
                        file: file.name.clone(),
                        from: file.source.clone(),
                        to: file.destination.clone(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    async fn move_all(&self, plan: &Plan, cancel: &CancellationToken) -> OrganizeResult<()> {
        for (index, file) in plan.files.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(
                    moved = index,
                    total = plan.files.len(),
                    "move cancelled; files already moved stay in the library"
                );
                return Err(OrganizeError::Cancelled);
            }
            if let Err(source) = self.transfer.move_file(&file.source, &file.destination).await {
                warn!(
                    file = %file.name,
                    error = %source,
                    moved = index,
                    "move failed; files already moved stay in the library"
                );
                return Err(OrganizeError::Transfer {
                    mode: TransferMode::Move,
                    file: file.name.clone(),
                    from: file.source.clone(),
                    to: file.destination.clone(),
                    source,
                });
            }
        }
        Ok(())
    }

    fn record_step<T>(&self, step: StepKind, result: OrganizeResult<T>) -> OrganizeResult<T> {
        let status = if result.is_ok() { "completed" } else { "failed" };
        self.metrics.inc_organize_step(step.as_str(), status);
        if let Err(error) = &result {
            debug!(step = step.as_str(), error = %error, "organize step failed");
        }
        result
    }
}

impl std::fmt::Debug for Organizer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Organizer")
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

/// Create `target` and its missing ancestors below `root`, returning the
/// directories that did not exist before, deepest first.
async fn create_target(root: &Path, target: &Path) -> OrganizeResult<Vec<PathBuf>> {
    let mut missing = Vec::new();
    let mut cursor = Some(target);
    while let Some(dir) = cursor {
        if dir == root || fs::try_exists(dir).await.unwrap_or(true) {
            break;
        }
        missing.push(dir.to_path_buf());
        cursor = dir.parent();
    }

    fs::create_dir_all(target)
        .await
        .map_err(|source| OrganizeError::TargetDirectory {
            path: target.to_path_buf(),
            source,
        })?;
    Ok(missing)
}

async fn rollback_copy(files: &[&Path], created: &[PathBuf]) {
    for path in files {
        discard_partial(path).await;
    }
    for dir in created {
        if let Err(err) = fs::remove_dir(dir).await {
            debug!(
                path = %dir.display(),
                error = %err,
                "left directory in place during rollback"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bindery_config::{SettingKey, SettingsStore};
    use bindery_core::{AgentError, AgentResult, RemoteStatus};
    use tokio::sync::Notify;

    use super::*;

    struct StubAgent {
        files: Mutex<Option<AgentResult<Vec<RemoteFile>>>>,
    }

    impl StubAgent {
        fn with_files(files: Vec<RemoteFile>) -> Arc<Self> {
            Arc::new(Self {
                files: Mutex::new(Some(Ok(files))),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                files: Mutex::new(Some(Err(AgentError::Status {
                    operation: "torrents.files",
                    status: 503,
                }))),
            })
        }
    }

    #[async_trait]
    impl RemoteAgent for StubAgent {
        async fn status(&self, handle: &str) -> AgentResult<RemoteStatus> {
            Err(AgentError::NotFound {
                handle: handle.to_string(),
            })
        }

        async fn files(&self, _handle: &str) -> AgentResult<Vec<RemoteFile>> {
            self.files
                .lock()
                .map_err(|_| AgentError::Unsupported { operation: "files" })?
                .take()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn delete(&self, _handle: &str, _delete_files: bool) -> AgentResult<()> {
            Ok(())
        }
    }

    struct FixedSpace(u64);

    impl SpaceProbe for FixedSpace {
        fn available(&self, _path: &Path) -> io::Result<u64> {
            Ok(self.0)
        }
    }

    /// Delegates to [`LocalTransfer`] and fails the call numbered `fail_on`
    /// (zero-based) after writing a partial destination file.
    struct FailingTransfer {
        calls: AtomicUsize,
        fail_on: usize,
    }

    impl FailingTransfer {
        fn new(fail_on: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_on,
            })
        }

        fn should_fail(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_on
        }
    }

    #[async_trait]
    impl FileTransfer for FailingTransfer {
        async fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
            if self.should_fail() {
                std::fs::write(to, b"partial")?;
                return Err(io::Error::other("disk went away"));
            }
            LocalTransfer.copy_file(from, to).await
        }

        async fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
            if self.should_fail() {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            LocalTransfer.move_file(from, to).await
        }
    }

    /// Copies the first file, then writes part of the second and never
    /// returns.
    struct StallingTransfer {
        calls: AtomicUsize,
        stalled: Notify,
    }

    impl StallingTransfer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                stalled: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl FileTransfer for StallingTransfer {
        async fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return LocalTransfer.copy_file(from, to).await;
            }
            std::fs::write(to, b"part")?;
            self.stalled.notify_one();
            std::future::pending().await
        }

        async fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
            LocalTransfer.move_file(from, to).await
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        downloads: PathBuf,
        library: PathBuf,
        events: EventBus,
        metrics: Metrics,
    }

    impl Fixture {
        fn new() -> anyhow::Result<Self> {
            let dir = tempfile::tempdir()?;
            let downloads = dir.path().join("downloads");
            let library = dir.path().join("library");
            std::fs::create_dir_all(&downloads)?;
            Ok(Self {
                downloads,
                library,
                _dir: dir,
                events: EventBus::with_capacity(32),
                metrics: Metrics::new()?,
            })
        }

        fn source(&self, name: &str, contents: &[u8]) -> anyhow::Result<RemoteFile> {
            let path = self.downloads.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, contents)?;
            Ok(RemoteFile {
                name: name.to_string(),
                path,
                size: contents.len() as u64,
            })
        }

        fn settings(&self, extra: &[(SettingKey, &str)]) -> Arc<SettingsStore> {
            let mut values = vec![(
                SettingKey::PathsDestination,
                self.library.to_string_lossy().into_owned(),
            )];
            values.extend(extra.iter().map(|(key, value)| (*key, (*value).to_string())));
            Arc::new(SettingsStore::from_values(values))
        }

        fn organizer(
            &self,
            agent: Arc<dyn RemoteAgent>,
            settings: Arc<SettingsStore>,
        ) -> Organizer {
            Organizer::new(agent, settings, self.events.clone(), self.metrics.clone())
                .with_space_probe(Arc::new(FixedSpace(u64::MAX)))
        }
    }

    fn request(series: Option<&str>) -> OrganizeRequest {
        OrganizeRequest {
            id: Uuid::new_v4(),
            title: "The Final Empire".into(),
            author: "Brandon Sanderson".into(),
            series: series.map(str::to_string),
            series_number: Some("1".into()),
            remote_handle: "abc123".into(),
        }
    }

    #[tokio::test]
    async fn series_books_use_the_primary_template() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let first = fixture.source("Mistborn/01.mp3", b"one")?;
        let second = fixture.source("Mistborn/02.mp3", b"two!")?;
        let organizer = fixture.organizer(
            StubAgent::with_files(vec![first.clone(), second]),
            fixture.settings(&[]),
        );

        let outcome = organizer.organize(&request(Some("Mistborn"))).await?;

        let expected = fixture
            .library
            .join("Brandon Sanderson/Mistborn/The Final Empire");
        assert_eq!(outcome.target, expected);
        assert_eq!(outcome.files, 2);
        assert_eq!(outcome.bytes, 7);
        assert_eq!(outcome.mode, TransferMode::Copy);
        assert_eq!(std::fs::read(expected.join("01.mp3"))?, b"one");
        assert_eq!(std::fs::read(expected.join("02.mp3"))?, b"two!");
        assert!(first.path.exists(), "copy keeps the sources");
        assert_eq!(fixture.metrics.organize_step_count("transfer", "completed"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn standalone_books_use_the_fallback_template() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let file = fixture.source("book.m4b", b"audio")?;
        let organizer = fixture.organizer(StubAgent::with_files(vec![file]), fixture.settings(&[]));

        let outcome = organizer.organize(&request(Some("   "))).await?;

        let expected = fixture.library.join("Brandon Sanderson/The Final Empire");
        assert_eq!(outcome.target, expected);
        assert!(expected.join("book.m4b").is_file());
        Ok(())
    }

    #[tokio::test]
    async fn metadata_is_sanitized_per_component() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let file = fixture.source("track.mp3", b"x")?;
        let organizer = fixture.organizer(StubAgent::with_files(vec![file]), fixture.settings(&[]));
        let mut request = request(None);
        request.author = "AC/DC".into();
        request.title = "Back: In  Black?".into();

        let outcome = organizer.organize(&request).await?;

        assert_eq!(outcome.target, fixture.library.join("AC-DC/Back- In Black-"));
        Ok(())
    }

    #[tokio::test]
    async fn traversal_titles_are_rejected_before_touching_disk() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let file = fixture.source("track.mp3", b"x")?;
        let organizer = fixture.organizer(StubAgent::with_files(vec![file]), fixture.settings(&[]));
        let mut request = request(None);
        request.title = "..".into();
        request.author = "..".into();

        let err = organizer.organize(&request).await;

        assert!(matches!(err, Err(OrganizeError::InvalidTarget { .. })));
        assert_eq!(std::fs::read_dir(&fixture.library)?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn mount_prefix_locates_remote_paths() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let local = fixture.source("seedbox/downloads/book.m4b", b"audio")?;
        let remote = RemoteFile {
            path: PathBuf::from("/downloads/book.m4b"),
            ..local
        };
        let mount = fixture.downloads.join("seedbox").to_string_lossy().into_owned();
        let settings = fixture.settings(&[(SettingKey::PathsLocalMount, mount.as_str())]);
        let organizer = fixture.organizer(StubAgent::with_files(vec![remote]), settings);

        let outcome = organizer.organize(&request(None)).await?;

        assert!(outcome.target.join("book.m4b").is_file());
        Ok(())
    }

    #[tokio::test]
    async fn failed_copy_leaves_nothing_behind() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let files = vec![
            fixture.source("01.mp3", b"one")?,
            fixture.source("02.mp3", b"two")?,
            fixture.source("03.mp3", b"three")?,
        ];
        let organizer = fixture
            .organizer(StubAgent::with_files(files.clone()), fixture.settings(&[]))
            .with_transfer(FailingTransfer::new(1));

        let err = organizer.organize(&request(Some("Mistborn"))).await;

        match err {
            Err(OrganizeError::Transfer { mode, file, .. }) => {
                assert_eq!(mode, TransferMode::Copy);
                assert_eq!(file, "02.mp3");
            }
            other => panic!("expected transfer error, got {other:?}"),
        }
        assert!(
            !fixture.library.join("Brandon Sanderson").exists(),
            "created directories are removed"
        );
        assert!(fixture.library.exists(), "library root stays");
        for file in &files {
            assert!(file.path.exists());
        }
        assert_eq!(fixture.metrics.organize_step_count("transfer", "failed"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn failed_copy_keeps_preexisting_directories() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let author_dir = fixture.library.join("Brandon Sanderson");
        std::fs::create_dir_all(&author_dir)?;
        std::fs::write(author_dir.join("notes.txt"), b"keep")?;
        let files = vec![fixture.source("01.mp3", b"one")?, fixture.source("02.mp3", b"two")?];
        let organizer = fixture
            .organizer(StubAgent::with_files(files), fixture.settings(&[]))
            .with_transfer(FailingTransfer::new(1));

        assert!(organizer.organize(&request(None)).await.is_err());

        assert!(author_dir.join("notes.txt").is_file());
        assert!(!author_dir.join("The Final Empire").exists());
        Ok(())
    }

    #[tokio::test]
    async fn failed_move_keeps_files_already_moved() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let files = vec![
            fixture.source("01.mp3", b"one")?,
            fixture.source("02.mp3", b"two")?,
            fixture.source("03.mp3", b"three")?,
        ];
        let settings = fixture.settings(&[(SettingKey::PathsOperation, "move")]);
        let organizer = fixture
            .organizer(StubAgent::with_files(files.clone()), settings)
            .with_transfer(FailingTransfer::new(1));

        let err = organizer.organize(&request(None)).await;

        assert!(matches!(
            err,
            Err(OrganizeError::Transfer {
                mode: TransferMode::Move,
                ref file,
                ..
            }) if file == "02.mp3"
        ));
        let target = fixture.library.join("Brandon Sanderson/The Final Empire");
        assert!(target.join("01.mp3").is_file());
        assert!(!files[0].path.exists());
        assert!(files[1].path.exists());
        assert!(files[2].path.exists());
        assert!(!target.join("03.mp3").exists());
        Ok(())
    }

    #[tokio::test]
    async fn insufficient_space_fails_before_any_transfer() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let file = fixture.source("big.m4b", &[0_u8; 1000])?;
        let organizer = fixture
            .organizer(StubAgent::with_files(vec![file]), fixture.settings(&[]))
            .with_space_probe(Arc::new(FixedSpace(1099)));

        let err = organizer.organize(&request(None)).await;

        assert!(matches!(
            err,
            Err(OrganizeError::InsufficientSpace {
                required: 1100,
                available: 1099
            })
        ));
        assert!(!fixture.library.join("Brandon Sanderson").exists());
        Ok(())
    }

    #[tokio::test]
    async fn exact_headroom_is_enough() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let file = fixture.source("big.m4b", &[0_u8; 1000])?;
        let organizer = fixture
            .organizer(StubAgent::with_files(vec![file]), fixture.settings(&[]))
            .with_space_probe(Arc::new(FixedSpace(1100)));

        assert!(organizer.organize(&request(None)).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn missing_sources_are_reported() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let present = fixture.source("01.mp3", b"one")?;
        let missing = RemoteFile {
            name: "02.mp3".into(),
            path: fixture.downloads.join("02.mp3"),
            size: 3,
        };
        let organizer = fixture.organizer(
            StubAgent::with_files(vec![present, missing.clone()]),
            fixture.settings(&[]),
        );

        let err = organizer.organize(&request(None)).await;

        assert!(matches!(err, Err(OrganizeError::SourceMissing { ref path }) if *path == missing.path));
        Ok(())
    }

    #[tokio::test]
    async fn directories_are_not_regular_files() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let folder = fixture.downloads.join("folder");
        std::fs::create_dir_all(&folder)?;
        let organizer = fixture.organizer(
            StubAgent::with_files(vec![RemoteFile {
                name: "folder".into(),
                path: folder,
                size: 0,
            }]),
            fixture.settings(&[]),
        );

        let err = organizer.organize(&request(None)).await;

        assert!(matches!(err, Err(OrganizeError::SourceUnreadable { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn existing_destinations_are_never_overwritten() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let file = fixture.source("01.mp3", b"new")?;
        let target = fixture.library.join("Brandon Sanderson/The Final Empire");
        std::fs::create_dir_all(&target)?;
        std::fs::write(target.join("01.mp3"), b"old")?;
        let organizer = fixture.organizer(StubAgent::with_files(vec![file]), fixture.settings(&[]));

        let err = organizer.organize(&request(None)).await;

        assert!(matches!(err, Err(OrganizeError::DestinationExists { .. })));
        assert_eq!(std::fs::read(target.join("01.mp3"))?, b"old");
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_file_names_collide() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let files = vec![
            fixture.source("CD1/track.mp3", b"one")?,
            fixture.source("CD2/track.mp3", b"two")?,
        ];
        let organizer = fixture.organizer(StubAgent::with_files(files), fixture.settings(&[]));

        let err = organizer.organize(&request(None)).await;

        assert!(matches!(err, Err(OrganizeError::DestinationExists { .. })));
        assert!(!fixture.library.join("Brandon Sanderson").exists());
        Ok(())
    }

    #[tokio::test]
    async fn empty_and_unavailable_manifests_fail() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;

        let organizer = fixture.organizer(StubAgent::with_files(Vec::new()), fixture.settings(&[]));
        assert!(matches!(
            organizer.organize(&request(None)).await,
            Err(OrganizeError::EmptyManifest { .. })
        ));

        let organizer = fixture.organizer(StubAgent::failing(), fixture.settings(&[]));
        let err = organizer.organize(&request(None)).await;
        assert!(matches!(err, Err(OrganizeError::ManifestUnavailable { .. })));
        assert!(err.is_err_and(|err| err.to_string().contains("503")));
        Ok(())
    }

    #[tokio::test]
    async fn missing_destination_is_a_configuration_error() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let organizer = fixture.organizer(
            StubAgent::with_files(Vec::new()),
            Arc::new(SettingsStore::in_memory()),
        );

        let err = organizer.organize(&request(None)).await;

        assert!(matches!(err, Err(OrganizeError::Configuration { .. })));
        assert_eq!(
            fixture.metrics.organize_step_count("resolve_settings", "failed"),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn outcomes_are_published_and_toggle_health() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let mut stream = fixture.events.subscribe(None);
        let health = HealthRegistry::new(fixture.events.clone());
        let failing = fixture
            .organizer(StubAgent::with_files(Vec::new()), fixture.settings(&[]))
            .with_health(health.clone());

        let request = request(None);
        assert!(failing.organize(&request).await.is_err());
        assert_eq!(health.degraded(), ["organizer"]);

        let file = fixture.source("book.m4b", b"audio")?;
        let working = fixture
            .organizer(StubAgent::with_files(vec![file]), fixture.settings(&[]))
            .with_health(health.clone());
        working.organize(&request).await?;
        assert!(health.degraded().is_empty());

        let mut kinds = Vec::new();
        while kinds.len() < 6 {
            match stream.next().await {
                Some(envelope) => kinds.push(envelope.event.kind()),
                None => break,
            }
        }
        assert_eq!(
            kinds,
            [
                "organize_started",
                "health_changed",
                "organize_failed",
                "organize_started",
                "health_changed",
                "organize_completed",
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_copy_is_rolled_back_and_retryable() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let files = vec![fixture.source("01.mp3", b"one")?, fixture.source("02.mp3", b"two")?];
        let transfer = StallingTransfer::new();
        let organizer = fixture
            .organizer(StubAgent::with_files(files.clone()), fixture.settings(&[]))
            .with_transfer(transfer.clone());
        let cancel = CancellationToken::new();
        let request = request(None);

        let (result, ()) = tokio::join!(organizer.organize_until(&request, &cancel), async {
            transfer.stalled.notified().await;
            cancel.cancel();
        });

        assert!(matches!(result, Err(OrganizeError::Cancelled)));
        assert!(!fixture.library.join("Brandon Sanderson").exists());
        for file in &files {
            assert!(file.path.exists());
        }

        let retry = fixture.organizer(StubAgent::with_files(files), fixture.settings(&[]));
        let outcome = retry.organize(&request).await?;
        assert_eq!(std::fs::read(outcome.target.join("01.mp3"))?, b"one");
        assert_eq!(std::fs::read(outcome.target.join("02.mp3"))?, b"two");
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_moves_leave_sources_in_place() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let file = fixture.source("01.mp3", b"one")?;
        let settings = fixture.settings(&[(SettingKey::PathsOperation, "move")]);
        let organizer = fixture.organizer(StubAgent::with_files(vec![file.clone()]), settings);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = organizer.organize_until(&request(None), &cancel).await;

        assert!(matches!(result, Err(OrganizeError::Cancelled)));
        assert!(file.path.exists(), "nothing was moved");
        assert_eq!(std::fs::read_dir(&fixture.library)?.count(), 0);
        Ok(())
    }
}
