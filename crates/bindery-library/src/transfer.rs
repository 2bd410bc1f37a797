//! Per-file copy and move primitives.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tracing::{debug, warn};

/// Places one file at its destination.
///
/// Implementations never overwrite an existing destination through
/// [`FileTransfer::copy_file`].
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Copy `from` to a new file at `to` and flush it to disk. Returns the
    /// number of bytes written.
    async fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64>;

    /// Relocate `from` to `to`.
    async fn move_file(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// [`FileTransfer`] on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransfer;

#[async_trait]
impl FileTransfer for LocalTransfer {
    async fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let mut source = File::open(from).await?;
        let mut destination = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(to)
            .await?;
        let written = tokio::io::copy(&mut source, &mut destination).await?;
        destination.sync_all().await?;
        Ok(written)
    }

    async fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        match fs::rename(from, to).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
                debug!(
                    from = %from.display(),
                    to = %to.display(),
                    "rename crosses filesystems; copying instead"
                );
                if let Err(copy_err) = self.copy_file(from, to).await {
                    if copy_err.kind() != io::ErrorKind::AlreadyExists {
                        discard_partial(to).await;
                    }
                    return Err(copy_err);
                }
                fs::remove_file(from).await
            }
            Err(err) => Err(err),
        }
    }
}

/// Remove a destination file written by a failed transfer. Returns `false`
/// when the file is still there; the failure is logged.
pub(crate) async fn discard_partial(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "failed to remove destination file after a failed transfer"
            );
            false
        }
    }
}
