use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A video as stored on disk. `url` is the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedVideo {
  pub url: String,
  pub updated: DateTime<Utc>,
  pub title: String,
  pub description: String,
  pub thumbnail: Option<String>,
}

/// A video as shown to the rest of the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Video {
  pub title: String,
  pub description: String,
  pub url: String,
  pub updated: DateTime<Utc>,
  pub thumbnail: Option<String>,
  /// Description cut at a word boundary for list views
  pub short_description: String,
}
