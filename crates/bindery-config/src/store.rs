//! Settings providers: the JSON-backed store and the environment overlay.
//!
//! # Design
//! - A file-backed `SettingsStore` reads the file on every call, so a value
//!   written by one process (`bindery config set`) reaches another (`bindery
//!   run`) on its next lookup.
//! - Writes re-read the file, apply one key and replace the file atomically
//!   (temp file + rename). Writers in one process are serialised.
//! - `EnvOverlay` consults the environment first; a key pinned by the
//!   environment cannot be changed through it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::key::SettingKey;
use crate::validate::validate_value;

/// Source of raw setting values.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// Raw value for `key`, `None` when nothing is configured.
    async fn get(&self, key: SettingKey) -> ConfigResult<Option<String>>;

    /// Validate and store a value. An empty value clears the setting.
    async fn set(&self, key: SettingKey, value: &str) -> ConfigResult<()>;

    /// Every configured value.
    async fn all(&self) -> ConfigResult<BTreeMap<SettingKey, String>>;
}

#[derive(Debug)]
enum Backing {
    Memory(RwLock<BTreeMap<SettingKey, String>>),
    File { path: PathBuf, writer: Mutex<()> },
}

/// Flat key/value settings, held in memory or in a JSON document.
#[derive(Debug)]
pub struct SettingsStore {
    backing: Backing,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self {
            backing: Backing::Memory(RwLock::default()),
        }
    }
}

impl SettingsStore {
    /// Store that lives only in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// In-memory store seeded with values that bypass write validation.
    #[must_use]
    pub fn from_values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (SettingKey, V)>,
        V: Into<String>,
    {
        let values = values
            .into_iter()
            .map(|(key, value)| (key, value.into()))
            .collect();
        Self {
            backing: Backing::Memory(RwLock::new(values)),
        }
    }

    /// Store backed by the JSON document at `path`. A missing file reads as
    /// empty; the file is checked once here so a corrupt document fails early.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or decoded.
    pub async fn open(path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let path = path.into();
        let values = load(&path).await?;
        debug!(path = %path.display(), settings = values.len(), "settings file opened");
        Ok(Self {
            backing: Backing::File {
                path,
                writer: Mutex::new(()),
            },
        })
    }

    /// File backing this store, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Memory(_) => None,
            Backing::File { path, .. } => Some(path),
        }
    }
}

#[async_trait]
impl SettingsProvider for SettingsStore {
    async fn get(&self, key: SettingKey) -> ConfigResult<Option<String>> {
        Ok(self.all().await?.remove(&key))
    }

    async fn set(&self, key: SettingKey, value: &str) -> ConfigResult<()> {
        let value = value.trim();
        if !value.is_empty() {
            validate_value(key, value)?;
        }
        match &self.backing {
            Backing::Memory(values) => apply(&mut *values.write().await, key, value),
            Backing::File { path, writer } => {
                let _guard = writer.lock().await;
                let mut values = load(path).await?;
                apply(&mut values, key, value);
                persist(path, &values).await?;
            }
        }
        debug!(key = %key, "setting updated");
        Ok(())
    }

    async fn all(&self) -> ConfigResult<BTreeMap<SettingKey, String>> {
        match &self.backing {
            Backing::Memory(values) => Ok(values.read().await.clone()),
            Backing::File { path, .. } => load(path).await,
        }
    }
}

fn apply(values: &mut BTreeMap<SettingKey, String>, key: SettingKey, value: &str) {
    if value.is_empty() {
        values.remove(&key);
    } else {
        values.insert(key, value.to_string());
    }
}

async fn load(path: &Path) -> ConfigResult<BTreeMap<SettingKey, String>> {
    match fs::read(path).await {
        Ok(bytes) => decode(path, &bytes),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(source) => Err(ConfigError::Io {
            operation: "settings.read",
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn decode(path: &Path, bytes: &[u8]) -> ConfigResult<BTreeMap<SettingKey, String>> {
    let raw: BTreeMap<String, String> =
        serde_json::from_slice(bytes).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    let mut values = BTreeMap::new();
    for (name, value) in raw {
        match name.parse::<SettingKey>() {
            Ok(key) => {
                values.insert(key, value);
            }
            Err(_) => warn!(key = %name, path = %path.display(), "ignoring unknown setting"),
        }
    }
    Ok(values)
}

async fn persist(path: &Path, values: &BTreeMap<SettingKey, String>) -> ConfigResult<()> {
    let raw: BTreeMap<&str, &str> = values
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    let encoded = serde_json::to_vec_pretty(&raw).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| ConfigError::Io {
                operation: "settings.create_dir",
                path: parent.to_path_buf(),
                source,
            })?;
    }
    let staging = path.with_extension(format!("json.{}.tmp", std::process::id()));
    fs::write(&staging, encoded)
        .await
        .map_err(|source| ConfigError::Io {
            operation: "settings.write",
            path: staging.clone(),
            source,
        })?;
    fs::rename(&staging, path)
        .await
        .map_err(|source| ConfigError::Io {
            operation: "settings.rename",
            path: path.to_path_buf(),
            source,
        })
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Provider that prefers non-empty environment variables over `inner`.
pub struct EnvOverlay<P> {
    inner: P,
    lookup: EnvLookup,
}

impl<P> EnvOverlay<P> {
    /// Overlay the process environment on `inner`.
    pub fn new(inner: P) -> Self {
        Self::with_lookup(inner, |name| std::env::var(name).ok())
    }

    /// Overlay a custom variable source on `inner`.
    pub fn with_lookup<F>(inner: P, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            inner,
            lookup: Arc::new(lookup),
        }
    }

    /// Provider underneath the overlay.
    pub const fn inner(&self) -> &P {
        &self.inner
    }

    fn env_value(&self, key: SettingKey) -> Option<String> {
        (self.lookup)(key.env_var()).filter(|value| !value.trim().is_empty())
    }
}

impl<P> std::fmt::Debug for EnvOverlay<P>
where
    P: std::fmt::Debug,
{
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("EnvOverlay")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<P> SettingsProvider for EnvOverlay<P>
where
    P: SettingsProvider,
{
    async fn get(&self, key: SettingKey) -> ConfigResult<Option<String>> {
        match self.env_value(key) {
            Some(value) => Ok(Some(value)),
            None => self.inner.get(key).await,
        }
    }

    async fn set(&self, key: SettingKey, value: &str) -> ConfigResult<()> {
        if self.env_value(key).is_some() {
            return Err(ConfigError::Overridden {
                key: key.as_str(),
                env_var: key.env_var(),
            });
        }
        self.inner.set(key, value).await
    }

    async fn all(&self) -> ConfigResult<BTreeMap<SettingKey, String>> {
        let mut values = self.inner.all().await?;
        for key in SettingKey::ALL {
            if let Some(value) = self.env_value(key) {
                values.insert(key, value);
            }
        }
        Ok(values)
    }
}
