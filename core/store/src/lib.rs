//! Local store for mirrored memos.
//!
//! A single SQLite file holds the memo rows, a tag index and the sync
//! metadata singleton. Every page of a sync is committed as one transaction.

pub mod database;
pub mod error;

pub use database::{Database, UpsertSummary, WriterLease};
pub use error::{Result, StoreError};
