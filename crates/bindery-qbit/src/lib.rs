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

//! qBittorrent Web API v2 client implementing the Bindery remote agent
//! contract.
//!
//! Only the calls the download lifecycle needs are wrapped: login, transfer
//! info, file listing, delete and add.

pub mod client;
pub mod wire;

pub use client::{QbitClient, REQUEST_TIMEOUT};
pub use wire::magnet_hash;
