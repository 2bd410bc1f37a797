//! Path handling for organize targets and remote-reported sources.

use std::path::{Component, Path, PathBuf};

use crate::error::{OrganizeError, OrganizeResult};

/// Turn a resolved template into a path relative to the library root.
///
/// Only normal components are accepted; `.` segments and empty segments are
/// dropped.
///
/// # Errors
///
/// Returns [`OrganizeError::InvalidTarget`] for absolute paths, parent
/// references, or paths with no components.
pub fn library_relative(resolved: &str) -> OrganizeResult<PathBuf> {
    let invalid = |reason| OrganizeError::InvalidTarget {
        resolved: resolved.to_string(),
        reason,
    };

    let mut relative = PathBuf::new();
    for component in Path::new(resolved).components() {
        match component {
            Component::Normal(segment) => relative.push(segment),
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("parent directory reference")),
            Component::RootDir | Component::Prefix(_) => return Err(invalid("absolute path")),
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(invalid("no path components"));
    }
    Ok(relative)
}

/// Map a path reported by the remote agent into the local filesystem.
///
/// With a mount the reported path is re-rooted under it, so
/// `/downloads/book/a.mp3` under `/mnt/seedbox` becomes
/// `/mnt/seedbox/downloads/book/a.mp3`. Parent references never climb above
/// the mount.
#[must_use]
pub fn remap_to_mount(mount: Option<&Path>, reported: &Path) -> PathBuf {
    let Some(mount) = mount else {
        return reported.to_path_buf();
    };

    let mut local = mount.to_path_buf();
    let mut depth = 0_usize;
    for component in reported.components() {
        match component {
            Component::Normal(segment) => {
                local.push(segment);
                depth += 1;
            }
            Component::ParentDir if depth > 0 => {
                local.pop();
                depth -= 1;
            }
            _ => {}
        }
    }
    local
}

/// Final component of a manifest file name, used as the destination name.
///
/// # Errors
///
/// Returns [`OrganizeError::InvalidTarget`] when the name has no final
/// normal component (for example `..`).
pub fn destination_name(name: &str) -> OrganizeResult<&std::ffi::OsStr> {
    Path::new(name)
        .file_name()
        .ok_or_else(|| OrganizeError::InvalidTarget {
            resolved: name.to_string(),
            reason: "file name has no final component",
        })
}
