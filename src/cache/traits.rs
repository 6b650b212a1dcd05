//! Core traits and types for the caching system.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use super::error::{NetworkError, StoreError};

/// An immutable view of a whole collection at one point in time.
pub type Snapshot<T> = Arc<Vec<T>>;

/// Trait for records that can be persisted.
///
/// Implementors must provide a unique cache key and optionally an updated_at
/// timestamp, which the store tracks per collection.
pub trait Persistable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique identifier for this record (e.g. a video URL)
  fn cache_key(&self) -> String;

  /// Last modification time, if the record tracks one.
  fn updated_at(&self) -> Option<DateTime<Utc>>;

  /// Entity type name for storage organization (e.g. "video")
  fn entity_type() -> &'static str;
}

/// Identifies one logical collection inside a store.
pub trait CollectionKey {
  /// Stable, fixed-length storage key
  fn cache_hash(&self) -> String;

  /// Human-readable description, kept alongside the hash for debugging
  fn description(&self) -> String;
}

/// The network side of a cache: one logical fetch of the whole collection.
///
/// Implementations own their timeout and retry policy and must end with a
/// terminal [`NetworkError`] instead of hanging.
#[async_trait]
pub trait RemoteSource: Send + Sync + 'static {
  type Record: Send + 'static;

  /// Label used in logs
  fn label(&self) -> &str;

  async fn fetch(&self) -> Result<Vec<Self::Record>, NetworkError>;
}

/// Durable storage for one collection.
#[async_trait]
pub trait PersistentStore: Send + Sync + 'static {
  type Record: Persistable;

  /// Subscribe to the collection. The receiver holds the current snapshot
  /// immediately and is notified on every committed change.
  fn live_query(&self) -> watch::Receiver<Snapshot<Self::Record>>;

  /// Atomically make `records` the complete contents of the collection.
  async fn replace_all(&self, records: Vec<Self::Record>) -> Result<(), StoreError>;
}
