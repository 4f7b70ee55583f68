//! Keeps shell snapshot lookups working after the referenced snapshot is gone.
//!
//! Three front-ends share one resolution rule: a missing `snapshot-bash-*.sh`
//! name stands for the most recently modified real snapshot in the directory.
//!
//! - [`fs::SnapshotFs`] applies the rule inline, per request, behind a FUSE mount.
//! - [`reconcile::Reconciler`] periodically repoints dangling redirect symlinks.
//! - [`fix::OneShotFixer`] creates a single redirect named in an error message.

pub mod config;
pub mod disk;
pub mod error;
pub mod fix;
pub mod fs;
pub mod handle_table;
pub mod index;
pub mod link;
pub mod pattern;
pub mod reconcile;
pub mod resolver;
pub mod store;
pub mod util;

pub use error::{Result, SnapfixError};
pub use index::{SnapshotEntry, SnapshotIndex};
pub use pattern::SnapshotPattern;
pub use resolver::PathResolver;
