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

//! File-based configuration for qguardarr.
//!
//! [`loader::ConfigLoader`] reads a TOML document, substitutes
//! `${VAR_NAME}` references against the process environment, and validates
//! it against [`validate::validate`]. [`loader::watch`] polls the file's
//! modification time and hands each newly valid snapshot to a callback,
//! leaving the previous snapshot live on a rejected reload.

mod error;
mod loader;
mod model;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, watch};
pub use model::{
    AllocationStrategy, CrossSeedSettings, GlobalSettings, LoggingSettings, QbittorrentSettings,
    QguardarrConfig, RollbackSettings, TrackerConfig, format_speed,
};
pub use validate::validate;
