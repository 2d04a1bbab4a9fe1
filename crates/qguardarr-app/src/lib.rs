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
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! qguardarr application bootstrap wiring.
//!
//! Layout: `bootstrap.rs` (service wiring and the binary's boot sequence),
//! `orchestrator.rs` (the cycle orchestrator), `webhook.rs` (webhook queue
//! and worker), `cross_seed.rs` (completion forwarding), `error.rs` (the
//! crate's error type).

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Forwards torrent-completion webhook events to a cross-seed helper.
pub mod cross_seed;
/// Application-level error type.
pub mod error;
/// Cycle orchestrator.
pub mod orchestrator;
/// Webhook ingress queue and worker.
pub mod webhook;

pub use bootstrap::run_app;
