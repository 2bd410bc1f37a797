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

//! Flat key/value settings with environment overrides and typed views.
//!
//! Layout: `key.rs` (the closed set of setting keys), `store.rs`
//! (`SettingsProvider`, the JSON-backed `SettingsStore`, `EnvOverlay`),
//! `validate.rs` (write-time validation and value parsing), `model.rs`
//! (typed settings resolved per use).

pub mod error;
pub mod key;
pub mod model;
pub mod store;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use key::SettingKey;
pub use model::{AgentSettings, MonitorSettings, OrganizeSettings, TransferMode};
pub use store::{EnvOverlay, SettingsProvider, SettingsStore};
