//! Generic single-source-of-truth cache.
//!
//! This module provides a domain-agnostic synchronization mechanism that:
//! - Keeps a collection of records in durable SQLite storage
//! - Publishes the stored collection through a live query
//! - Refreshes the stored collection from a remote source, one fetch at a time
//! - Never lets a failed refresh touch the stored collection

mod error;
mod layer;
mod observer;
mod storage;
mod traits;

pub use error::{MalformedRecordError, NetworkError, RefreshError, StoreError};
pub use layer::{RefreshOutcome, SyncCache};
pub use observer::Observer;
pub use storage::{CollectionMeta, SqliteStore};
pub use traits::{CollectionKey, Persistable, PersistentStore, RemoteSource, Snapshot};
