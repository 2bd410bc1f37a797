#![forbid(unsafe_code)]
#![deny(unused_must_use)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

//! Entrypoint for the `bindery` binary.

use std::process;

#[tokio::main]
async fn main() {
    let code = bindery_app::run().await;
    if code != 0 {
        process::exit(code);
    }
}
