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

//! Persistence layer for qguardarr: the rollback journal and the dry-run
//! simulated-limit store.

pub mod dry_run;
pub mod error;
pub mod rollback;

pub use dry_run::DryRunStore;
pub use error::{DataError, Result as DataResult};
pub use rollback::{PendingChange, RollbackEntry, RollbackJournal, RollbackStats};
