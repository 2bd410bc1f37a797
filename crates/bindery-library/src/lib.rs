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

//! Organization engine: places a completed transfer's files into the
//! templated library layout.
//!
//! Layout: `organizer.rs` (the step pipeline), `paths.rs` (target and mount
//! path handling), `transfer.rs` (per-file copy/move), `space.rs` (free space
//! probing and byte formatting), `error.rs`.

pub mod error;
pub mod organizer;
pub mod paths;
pub mod space;
pub mod transfer;

pub use error::{OrganizeError, OrganizeResult};
pub use organizer::{OrganizeOutcome, OrganizeRequest, Organizer};
pub use space::{SpaceProbe, StatvfsProbe, format_bytes, required_space};
pub use transfer::{FileTransfer, LocalTransfer};
