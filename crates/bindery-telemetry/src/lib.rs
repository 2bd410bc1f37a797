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

//! Logging setup and Prometheus metrics shared by the Bindery crates.
//!
//! Layout: `init.rs` (tracing subscriber installation), `metrics.rs`
//! (collector registry), `error.rs`.

pub mod error;
pub mod init;
pub mod metrics;

pub use error::{CollectorStage, Result, TelemetryError};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_version, init_logging};
pub use metrics::{Metrics, MetricsSnapshot};
