//! couchpurge - purge document revisions from a CouchDB-compatible store.
//!
//! Each batch of document ids goes through the same fixed pipeline:
//!
//! 1. resolve every leaf revision (conflicts included) via the changes feed
//! 2. archive a full copy of each leaf into the cold storage database
//! 3. purge the leaves, retrying a bounded number of times
//! 4. rewarm known views when the primary database was purged
//!
//! Batches, database groups and input files are processed strictly in order.
pub mod archive;
pub mod client;
pub mod constants;
pub mod error;
pub mod input;
pub mod manager;
pub mod purge;
pub mod resolver;
pub mod users;
pub mod views;

pub use archive::{cold_storage_id, ArchiveSummary, ColdStorageRecord};
pub use client::StoreClient;
pub use error::HttpError;
pub use input::DocumentGroup;
pub use manager::{BatchOutcome, FileStats, LogLogger, PurgeConfig, PurgeEvent, PurgeLogger, PurgeManager};
pub use resolver::{DocumentSnapshot, ResolvedBatch, RevisionMap};
pub use views::ViewRef;
