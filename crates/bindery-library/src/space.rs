//! Free space probing and human-readable byte sizes.

use std::io;
use std::path::Path;

use nix::sys::statvfs::statvfs;

/// Reports the bytes available to unprivileged users under a path.
pub trait SpaceProbe: Send + Sync {
    /// Available bytes on the filesystem holding `path`.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error when the filesystem cannot be queried.
    fn available(&self, path: &Path) -> io::Result<u64>;
}

/// [`SpaceProbe`] backed by `statvfs(3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

impl SpaceProbe for StatvfsProbe {
    fn available(&self, path: &Path) -> io::Result<u64> {
        let stats = statvfs(path).map_err(io::Error::from)?;
        Ok(u64::from(stats.blocks_available()).saturating_mul(u64::from(stats.fragment_size())))
    }
}

/// Bytes needed to place `total` bytes: the payload plus 10% headroom,
/// rounded up.
#[must_use]
pub const fn required_space(total: u64) -> u64 {
    total.saturating_add(total.div_ceil(10))
}

/// Render a byte count with binary units and one decimal (`1.5 MB`).
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    const PREFIXES: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut divisor = UNIT;
    let mut exponent = 0;
    let mut remaining = bytes / UNIT;
    while remaining >= UNIT {
        divisor *= UNIT;
        exponent += 1;
        remaining /= UNIT;
    }
    #[allow(clippy::cast_precision_loss)]
    let scaled = bytes as f64 / divisor as f64;
    format!("{scaled:.1} {}B", PREFIXES[exponent])
}
