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

//! Tracker matching, managed-torrent caching, and allocation strategies.
//!
//! This crate is the pure core of the allocation engine: given a list of
//! torrent snapshots and tracker configuration, it decides which torrents
//! are worth managing, what tracker each belongs to, what upload limit each
//! should receive, and whether a proposed limit change is worth shipping.
//! None of it performs I/O; the orchestrator in `qguardarr-app` drives these
//! pieces against the real client, journal, and dry-run store.

pub mod cache;
pub mod diff_gate;
pub mod error;
pub mod model;
pub mod rollout;
pub mod scorer;
pub mod strategy;
pub mod tracker_matcher;

pub use cache::ManagedTorrentCache;
pub use diff_gate::needs_update;
pub use error::{AllocError, AllocResult};
pub use model::{ManagedEntry, Score, ScoreBucket, TorrentSnapshot, UNLIMITED};
pub use rollout::admit;
pub use scorer::{score, should_manage};
pub use strategy::{equal, soft, weighted, SoftParams, SoftSmoothingState, SoftTrackerFigures};
pub use tracker_matcher::{MatcherStats, TrackerMatcher};
