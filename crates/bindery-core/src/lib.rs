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

//! Agent-agnostic download records, collaborator traits, and the pure helpers
//! (sanitizer, template resolver, status translator) shared across Bindery.
//!
//! Layout: `model/` (records and remote DTOs), `service/` (store and remote
//! agent traits), `status.rs`, `sanitize.rs`, `template.rs`, `error.rs`.

pub mod error;
pub mod model;
pub mod sanitize;
pub mod service;
pub mod status;
pub mod template;

pub use error::{AgentError, AgentResult, StoreError, StoreResult};
pub use model::{
    DownloadRecord, DownloadStatus, NewDownload, RemoteFile, RemoteStatus, TransferSource,
    UnknownStatus,
};
pub use sanitize::sanitize;
pub use service::{DownloadStore, RemoteAgent};
pub use status::translate_remote_state;
pub use template::{
    ALLOWED_PLACEHOLDERS, TemplateError, TemplateResult, TemplateVars, preview, resolve,
    validate_template,
};
