//! Serde-deserializable types matching the DevBytes playlist response.
//!
//! These types are separate from the persisted and domain types so the wire
//! format can change without touching anything downstream. Fields the
//! pipeline requires are still optional here: a record missing one is
//! rejected by the pipeline as malformed rather than failing the whole
//! response decode.

use serde::Deserialize;

/// Envelope of the playlist endpoint: `{ "videos": [...] }`.
#[derive(Debug, Deserialize)]
pub struct NetworkVideoContainer {
  #[serde(default)]
  pub videos: Vec<NetworkVideo>,
}

impl NetworkVideoContainer {
  pub fn into_records(self) -> Vec<NetworkVideo> {
    self.videos
  }
}

/// A video exactly as the remote returns it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkVideo {
  pub title: Option<String>,
  #[serde(default)]
  pub description: String,
  pub url: Option<String>,
  /// RFC 3339 timestamp
  pub updated: Option<String>,
  pub thumbnail: Option<String>,
  // Not carried downstream
  pub closed_captions: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_decode_playlist() {
    let body = r#"{
      "videos": [
        {
          "title": "Android Jetpack: EmojiCompat",
          "description": "With EmojiCompat you can ship new emoji.",
          "url": "https://www.youtube.com/watch?v=sYGKUtM2ga8",
          "updated": "2018-06-07T17:09:43+00:00",
          "thumbnail": "https://i4.ytimg.com/vi/sYGKUtM2ga8/hqdefault.jpg",
          "closedCaptions": null
        },
        { "title": "No url" }
      ]
    }"#;

    let videos = serde_json::from_str::<NetworkVideoContainer>(body)
      .unwrap()
      .into_records();
    assert_eq!(videos.len(), 2);
    assert_eq!(
      videos[0].url.as_deref(),
      Some("https://www.youtube.com/watch?v=sYGKUtM2ga8")
    );
    assert!(videos[0].closed_captions.is_none());
    assert!(videos[1].url.is_none());
    assert_eq!(videos[1].description, "");
  }

  #[test]
  fn test_missing_envelope_field_is_empty() {
    let container: NetworkVideoContainer = serde_json::from_str("{}").unwrap();
    assert!(container.into_records().is_empty());
  }
}
