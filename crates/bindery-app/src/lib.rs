#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

//! Bindery application wiring: the download monitor, the organize job, the
//! download service and the `bindery` command line.
//!
//! Layout: `context.rs` (shared collaborators), `lifecycle.rs` (status
//! transitions and the organize job), `monitor.rs` (polling loop),
//! `downloads.rs` (download service), `bootstrap.rs` (state directory
//! wiring), `cli.rs` and `output.rs` (command line).

/// State directory wiring and the long-running monitor.
pub mod bootstrap;
/// Argument parsing and command dispatch.
pub mod cli;
/// Collaborators shared by the services.
pub mod context;
/// Download service used by the command line.
pub mod downloads;
/// Application error type.
pub mod error;
/// Status transitions and the organize job.
pub mod lifecycle;
/// Polling loop reconciling records with qBittorrent.
pub mod monitor;
/// Command output renderers.
pub mod output;

#[cfg(test)]
mod testing;

pub use cli::{Cli, execute, run};
pub use context::AppContext;
pub use downloads::{AddDownload, BatchFailure, BatchOutcome, DownloadService, MAX_BATCH_SIZE};
pub use error::{AppError, AppResult};
pub use lifecycle::{DEFAULT_ORGANIZE_TIMEOUT, OrganizeJob};
pub use monitor::{
    DEFAULT_ORGANIZE_CONCURRENCY, DEFAULT_POLL_INTERVAL, Monitor, REMOTE_AGENT_COMPONENT,
    TickReport,
};
