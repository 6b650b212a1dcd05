//! Error types returned by the refresh protocol.
//!
//! Every variant is `Clone` so a single refresh result can be handed to every
//! caller that joined the same in-flight refresh.

use thiserror::Error;

/// The remote fetch did not produce a usable response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
  /// Could not reach the remote source
  #[error("connection failed: {0}")]
  Connect(String),

  /// The request did not complete in time
  #[error("request timed out after {0}s")]
  Timeout(u64),

  /// The remote answered with a non-success status
  #[error("remote returned HTTP {status}: {message}")]
  Status { status: u16, message: String },

  /// The response body could not be decoded
  #[error("failed to decode response: {0}")]
  Decode(String),

  /// The refresh was cancelled before the fetch completed
  #[error("fetch cancelled")]
  Cancelled,

  #[error("{0}")]
  Other(String),
}

impl NetworkError {
  /// Whether retrying the same request may succeed.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Connect(_) | Self::Timeout(_) => true,
      Self::Status { status, .. } => *status >= 500 || *status == 429,
      _ => false,
    }
  }
}

/// A fetched record could not be mapped into its persisted shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed record {key}: {reason}")]
pub struct MalformedRecordError {
  /// Identity of the offending record, or its index when the identity is missing
  pub key: String,
  pub reason: String,
}

impl MalformedRecordError {
  pub fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
    Self {
      key: key.into(),
      reason: reason.into(),
    }
  }
}

/// The persistent store failed to read or write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
  #[error("sqlite error: {0}")]
  Sqlite(String),

  #[error("failed to serialize record: {0}")]
  Serialization(String),

  #[error("lock poisoned: {0}")]
  LockPoisoned(String),

  #[error("I/O error: {0}")]
  Io(String),
}

impl From<rusqlite::Error> for StoreError {
  fn from(e: rusqlite::Error) -> Self {
    Self::Sqlite(e.to_string())
  }
}

impl From<serde_json::Error> for StoreError {
  fn from(e: serde_json::Error) -> Self {
    Self::Serialization(e.to_string())
  }
}

impl From<std::io::Error> for StoreError {
  fn from(e: std::io::Error) -> Self {
    Self::Io(e.to_string())
  }
}

/// Failure of one `refresh()` attempt. The store is left untouched in every case.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
  #[error(transparent)]
  Network(#[from] NetworkError),

  #[error(transparent)]
  Malformed(#[from] MalformedRecordError),

  #[error(transparent)]
  Store(#[from] StoreError),

  /// The refresh task panicked or was aborted before producing a result
  #[error("refresh task failed: {0}")]
  Task(String),
}

impl RefreshError {
  pub fn is_cancelled(&self) -> bool {
    matches!(self, Self::Network(NetworkError::Cancelled))
  }
}
