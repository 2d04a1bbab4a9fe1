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
#![allow(clippy::module_name_repetitions)]
#![allow(unexpected_cfgs)]
#![allow(clippy::multiple_crate_versions)]

//! Async client for qBittorrent's Web API v2: session auth with a single
//! re-auth-on-403 retry, active-torrent listing, per-torrent tracker
//! resolution, batched upload-limit pushes, and a circuit breaker that
//! protects the allocation cycle from a wedged or overloaded instance.

pub mod circuit_breaker;
pub mod error;
pub mod model;
pub mod qbittorrent;

pub use circuit_breaker::CircuitBreaker;
pub use error::{ClientError, ClientResult};
pub use model::{primary_tracker, TorrentInfo, TrackerEntry};
pub use qbittorrent::{QbittorrentClient, ReqwestQbittorrentClient};
