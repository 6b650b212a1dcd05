//! Caching implementations for DevBytes types.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::cache::{CollectionKey, Persistable};

use super::types::PersistedVideo;

impl Persistable for PersistedVideo {
  fn cache_key(&self) -> String {
    self.url.clone()
  }

  fn updated_at(&self) -> Option<DateTime<Utc>> {
    Some(self.updated)
  }

  fn entity_type() -> &'static str {
    "video"
  }
}

/// Collections kept by the DevBytes cache.
#[derive(Clone, Debug)]
pub enum DevBytesKey {
  /// The playlist served by one endpoint
  Playlist { endpoint: String },
}

impl CollectionKey for DevBytesKey {
  fn cache_hash(&self) -> String {
    let input = match self {
      Self::Playlist { endpoint } => format!("playlist:{}", normalize_endpoint(endpoint)),
    };

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  fn description(&self) -> String {
    match self {
      Self::Playlist { endpoint } => format!("playlist from {}", endpoint),
    }
  }
}

/// Trims whitespace and trailing slashes and lowercases, so equivalent
/// spellings of one endpoint share a collection.
fn normalize_endpoint(endpoint: &str) -> String {
  endpoint.trim().trim_end_matches('/').to_lowercase()
}
