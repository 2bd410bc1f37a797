//! Response shapes returned by the qBittorrent Web API.

use serde::Deserialize;
use url::Url;

/// Entry of `/api/v2/torrents/info`.
#[derive(Debug, Clone, Deserialize)]
pub struct TorrentInfo {
    /// Info-hash.
    pub hash: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// qBittorrent state string (`downloading`, `stalledUP`, ...).
    pub state: String,
    /// Completion fraction in `0.0..=1.0`.
    pub progress: f64,
    /// Directory the transfer is written to.
    #[serde(default)]
    pub save_path: String,
}

/// Entry of `/api/v2/torrents/files`.
#[derive(Debug, Clone, Deserialize)]
pub struct FileEntry {
    /// Path relative to the save path.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// Info-hash carried in a magnet URI's `xt=urn:btih:` parameter, lowercased.
#[must_use]
pub fn magnet_hash(magnet: &str) -> Option<String> {
    let parsed = Url::parse(magnet.trim()).ok()?;
    if parsed.scheme() != "magnet" {
        return None;
    }
    parsed.query_pairs().find_map(|(name, value)| {
        if name != "xt" {
            return None;
        }
        value
            .strip_prefix("urn:btih:")
            .filter(|hash| !hash.is_empty())
            .map(str::to_ascii_lowercase)
    })
}
