//! paperrank Merge crate - collapses duplicate author records.
//!
//! Authors sharing an identical name are merged into the oldest record.
//! Each duplicate group is merged in its own transaction; a failing group
//! is reported and skipped.

pub mod engine;
pub mod error;
pub mod report;
pub mod store;

pub use engine::MergeEngine;
pub use error::MergeError;
pub use report::{DuplicateReport, GroupFailure, MergeReport};
pub use store::{DuplicateGroup, EntityCounts, EntityStore, GroupMerge, SqliteEntityStore};
