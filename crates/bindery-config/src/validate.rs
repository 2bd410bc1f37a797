//! Validation helpers and parsing utilities for setting values.

use std::path::Path;
use std::time::Duration;

use bindery_core::validate_template;
use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::key::SettingKey;
use crate::model::TransferMode;

const FALSE_WORDS: [&str; 4] = ["false", "0", "no", "off"];
const TRUE_WORDS: [&str; 4] = ["true", "1", "yes", "on"];

/// Check a value before it is stored under `key`.
///
/// # Errors
///
/// Returns [`ConfigError`] describing why the value is unusable.
pub fn validate_value(key: SettingKey, value: &str) -> ConfigResult<()> {
    match key {
        SettingKey::PathsTemplate | SettingKey::PathsNoSeriesTemplate => validate_template(value)
            .map_err(|source| ConfigError::InvalidTemplate {
                key: key.as_str(),
                source,
            }),
        SettingKey::PathsOperation => value.parse::<TransferMode>().map(|_| ()),
        SettingKey::PathsDestination | SettingKey::PathsLocalMount => {
            if Path::new(value).is_absolute() {
                Ok(())
            } else {
                Err(ConfigError::invalid(
                    key.as_str(),
                    value,
                    "must be an absolute path",
                ))
            }
        }
        SettingKey::MonitorIntervalSeconds => parse_interval(value).map(|_| ()),
        SettingKey::MonitorAutoOrganize => parse_flag(key, value).map(|_| ()),
        SettingKey::QbittorrentUrl => parse_agent_url(value).map(|_| ()),
        SettingKey::QbittorrentUsername | SettingKey::QbittorrentPassword => Ok(()),
    }
}

/// Parse the monitor interval in whole seconds.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] unless the value is a positive integer.
pub fn parse_interval(value: &str) -> ConfigResult<Duration> {
    let key = SettingKey::MonitorIntervalSeconds.as_str();
    let seconds = value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::invalid(key, value, "must be a whole number of seconds"))?;
    if seconds == 0 {
        return Err(ConfigError::invalid(key, value, "must be greater than zero"));
    }
    Ok(Duration::from_secs(seconds))
}

/// Strict boolean parsing used when a flag is written.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for anything but a boolean word.
pub fn parse_flag(key: SettingKey, value: &str) -> ConfigResult<bool> {
    let normalized = value.trim().to_ascii_lowercase();
    if TRUE_WORDS.contains(&normalized.as_str()) {
        Ok(true)
    } else if FALSE_WORDS.contains(&normalized.as_str()) {
        Ok(false)
    } else {
        Err(ConfigError::invalid(
            key.as_str(),
            value,
            "must be one of true/false/1/0/yes/no/on/off",
        ))
    }
}

/// Lenient reading of a stored flag: only an explicit false word disables it.
#[must_use]
pub fn flag_enabled(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    !FALSE_WORDS.contains(&normalized.as_str())
}

/// Parse the qBittorrent base URL.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for unparsable or non-HTTP URLs.
pub fn parse_agent_url(value: &str) -> ConfigResult<Url> {
    let key = SettingKey::QbittorrentUrl.as_str();
    let url = Url::parse(value.trim()).map_err(|_| ConfigError::invalid(key, value, "not a URL"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ConfigError::invalid(key, value, "scheme must be http or https")),
    }
}
