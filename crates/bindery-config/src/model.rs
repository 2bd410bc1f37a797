//! Typed views over the raw settings, resolved at the point of use.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::key::SettingKey;
use crate::store::SettingsProvider;
use crate::validate::{flag_enabled, parse_agent_url, parse_interval};

/// How organized files reach the library.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Duplicate files; the remote agent keeps seeding the originals.
    #[default]
    Copy,
    /// Relocate files.
    Move,
}

impl TransferMode {
    /// Lowercase setting value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Move => "move",
        }
    }
}

impl Display for TransferMode {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for TransferMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "copy" => Ok(Self::Copy),
            "move" => Ok(Self::Move),
            _ => Err(ConfigError::invalid(
                SettingKey::PathsOperation.as_str(),
                value,
                "must be 'copy' or 'move'",
            )),
        }
    }
}

/// Settings consumed by one organize invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizeSettings {
    /// Library root.
    pub destination: PathBuf,
    /// Layout for books in a series.
    pub template: String,
    /// Layout for standalone books.
    pub no_series_template: String,
    /// Copy or move.
    pub mode: TransferMode,
    /// Local prefix for the remote agent's paths.
    pub local_mount: Option<PathBuf>,
}

impl OrganizeSettings {
    /// Read and type-check the organize settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] without a destination and
    /// [`ConfigError::InvalidField`] for an unknown operation.
    pub async fn resolve(provider: &dyn SettingsProvider) -> ConfigResult<Self> {
        let destination = required(provider, SettingKey::PathsDestination).await?;
        let template = value_or_default(provider, SettingKey::PathsTemplate).await?;
        let no_series_template =
            value_or_default(provider, SettingKey::PathsNoSeriesTemplate).await?;
        let mode = value_or_default(provider, SettingKey::PathsOperation)
            .await?
            .parse()?;
        let local_mount = optional(provider, SettingKey::PathsLocalMount)
            .await?
            .map(PathBuf::from);

        Ok(Self {
            destination: PathBuf::from(destination),
            template,
            no_series_template,
            mode,
            local_mount,
        })
    }
}

/// Settings driving the download monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Time between ticks.
    pub interval: Duration,
    /// Whether completed downloads are organized automatically.
    pub auto_organize: bool,
}

impl MonitorSettings {
    /// Read both monitor settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the provider fails or the interval is invalid.
    pub async fn resolve(provider: &dyn SettingsProvider) -> ConfigResult<Self> {
        Ok(Self {
            interval: Self::interval(provider).await?,
            auto_organize: Self::auto_organize(provider).await?,
        })
    }

    /// Polling interval; 30 seconds when unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] for a non-positive value.
    pub async fn interval(provider: &dyn SettingsProvider) -> ConfigResult<Duration> {
        parse_interval(&value_or_default(provider, SettingKey::MonitorIntervalSeconds).await?)
    }

    /// Auto-organize flag; only `false`, `0`, `no` or `off` disable it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the provider fails.
    pub async fn auto_organize(provider: &dyn SettingsProvider) -> ConfigResult<bool> {
        Ok(flag_enabled(
            &value_or_default(provider, SettingKey::MonitorAutoOrganize).await?,
        ))
    }
}

/// Connection settings for the qBittorrent Web API.
#[derive(Clone, PartialEq, Eq)]
pub struct AgentSettings {
    /// Web UI base URL.
    pub url: Url,
    /// Login name; no login is attempted without one.
    pub username: Option<String>,
    /// Password sent with the login.
    pub password: Option<String>,
}

impl fmt::Debug for AgentSettings {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AgentSettings")
            .field("url", &self.url.as_str())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AgentSettings {
    /// Read the qBittorrent connection settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] without a URL.
    pub async fn resolve(provider: &dyn SettingsProvider) -> ConfigResult<Self> {
        let url = parse_agent_url(&required(provider, SettingKey::QbittorrentUrl).await?)?;
        Ok(Self {
            url,
            username: optional(provider, SettingKey::QbittorrentUsername).await?,
            password: optional(provider, SettingKey::QbittorrentPassword).await?,
        })
    }
}

async fn optional(provider: &dyn SettingsProvider, key: SettingKey) -> ConfigResult<Option<String>> {
    Ok(provider
        .get(key)
        .await?
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty()))
}

async fn required(provider: &dyn SettingsProvider, key: SettingKey) -> ConfigResult<String> {
    optional(provider, key)
        .await?
        .ok_or(ConfigError::Missing { key: key.as_str() })
}

async fn value_or_default(provider: &dyn SettingsProvider, key: SettingKey) -> ConfigResult<String> {
    match optional(provider, key).await? {
        Some(value) => Ok(value),
        None => key
            .default_value()
            .map(str::to_string)
            .ok_or(ConfigError::Missing { key: key.as_str() }),
    }
}
