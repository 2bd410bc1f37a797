//! The closed set of setting keys.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::ConfigError;

/// Every setting Bindery reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SettingKey {
    /// Library root directory.
    PathsDestination,
    /// Layout template for books in a series.
    PathsTemplate,
    /// Layout template for standalone books.
    PathsNoSeriesTemplate,
    /// `copy` or `move`.
    PathsOperation,
    /// Local prefix under which the remote agent's paths are visible.
    PathsLocalMount,
    /// Seconds between monitor ticks.
    MonitorIntervalSeconds,
    /// Whether completed downloads are organized automatically.
    MonitorAutoOrganize,
    /// Base URL of the qBittorrent Web UI.
    QbittorrentUrl,
    /// qBittorrent login name.
    QbittorrentUsername,
    /// qBittorrent password.
    QbittorrentPassword,
}

impl SettingKey {
    /// Every key, in display order.
    pub const ALL: [Self; 10] = [
        Self::PathsDestination,
        Self::PathsTemplate,
        Self::PathsNoSeriesTemplate,
        Self::PathsOperation,
        Self::PathsLocalMount,
        Self::MonitorIntervalSeconds,
        Self::MonitorAutoOrganize,
        Self::QbittorrentUrl,
        Self::QbittorrentUsername,
        Self::QbittorrentPassword,
    ];

    /// Dotted storage key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PathsDestination => "paths.destination",
            Self::PathsTemplate => "paths.template",
            Self::PathsNoSeriesTemplate => "paths.no_series_template",
            Self::PathsOperation => "paths.operation",
            Self::PathsLocalMount => "paths.local_mount",
            Self::MonitorIntervalSeconds => "monitor.interval_seconds",
            Self::MonitorAutoOrganize => "monitor.auto_organize",
            Self::QbittorrentUrl => "qbittorrent.url",
            Self::QbittorrentUsername => "qbittorrent.username",
            Self::QbittorrentPassword => "qbittorrent.password",
        }
    }

    /// Environment variable that overrides the stored value.
    #[must_use]
    pub const fn env_var(self) -> &'static str {
        match self {
            Self::PathsDestination => "BINDERY_PATHS_DESTINATION",
            Self::PathsTemplate => "BINDERY_PATHS_TEMPLATE",
            Self::PathsNoSeriesTemplate => "BINDERY_PATHS_NO_SERIES_TEMPLATE",
            Self::PathsOperation => "BINDERY_PATHS_OPERATION",
            Self::PathsLocalMount => "BINDERY_PATHS_LOCAL_MOUNT",
            Self::MonitorIntervalSeconds => "BINDERY_MONITOR_INTERVAL_SECONDS",
            Self::MonitorAutoOrganize => "BINDERY_MONITOR_AUTO_ORGANIZE",
            Self::QbittorrentUrl => "BINDERY_QBITTORRENT_URL",
            Self::QbittorrentUsername => "BINDERY_QBITTORRENT_USERNAME",
            Self::QbittorrentPassword => "BINDERY_QBITTORRENT_PASSWORD",
        }
    }

    /// Value used when nothing is stored.
    #[must_use]
    pub const fn default_value(self) -> Option<&'static str> {
        match self {
            Self::PathsTemplate => Some("{author}/{series}/{title}"),
            Self::PathsNoSeriesTemplate => Some("{author}/{title}"),
            Self::PathsOperation => Some("copy"),
            Self::MonitorIntervalSeconds => Some("30"),
            Self::MonitorAutoOrganize => Some("true"),
            _ => None,
        }
    }

    /// Whether listings should mask the value.
    #[must_use]
    pub const fn is_secret(self) -> bool {
        matches!(self, Self::QbittorrentPassword)
    }
}

impl Display for SettingKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == value)
            .ok_or_else(|| ConfigError::UnknownKey {
                key: value.to_string(),
            })
    }
}
