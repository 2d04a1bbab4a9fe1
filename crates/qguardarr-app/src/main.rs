#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Binary entrypoint that wires qguardarr's services together and runs the
//! allocation cycle loop.

use anyhow::Result;
use qguardarr_app::bootstrap;

/// Bootstraps the qguardarr application and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::run_app().await
}
