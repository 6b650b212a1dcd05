//! Mappings between the wire, persisted, and domain shapes of a video.

use chrono::{DateTime, Utc};
use url::Url;

use crate::cache::MalformedRecordError;

use super::api_types::NetworkVideo;
use super::types::{PersistedVideo, Video};

/// Length the short description is cut at
pub const SHORT_DESCRIPTION_LENGTH: usize = 200;

/// Map a fetched video into its persisted shape.
///
/// `url`, `title` and an RFC 3339 `updated` are required. An empty key on the
/// error means the record had no usable url.
pub fn to_persisted(remote: NetworkVideo) -> Result<PersistedVideo, MalformedRecordError> {
  let url = required(remote.url)
    .ok_or_else(|| MalformedRecordError::new("", "missing url"))?;
  Url::parse(&url).map_err(|e| MalformedRecordError::new(&url, format!("invalid url: {}", e)))?;

  let title = required(remote.title).ok_or_else(|| MalformedRecordError::new(&url, "missing title"))?;

  let updated = required(remote.updated)
    .ok_or_else(|| MalformedRecordError::new(&url, "missing updated timestamp"))?;
  let updated = DateTime::parse_from_rfc3339(&updated)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| MalformedRecordError::new(&url, format!("invalid updated '{}': {}", updated, e)))?;

  let thumbnail = match required(remote.thumbnail) {
    Some(thumbnail) => {
      Url::parse(&thumbnail)
        .map_err(|e| MalformedRecordError::new(&url, format!("invalid thumbnail: {}", e)))?;
      Some(thumbnail)
    }
    None => None,
  };

  Ok(PersistedVideo {
    url,
    updated,
    title,
    description: remote.description,
    thumbnail,
  })
}

/// Map a stored video into the domain shape.
pub fn to_domain(persisted: &PersistedVideo) -> Video {
  Video {
    title: persisted.title.clone(),
    description: persisted.description.clone(),
    url: persisted.url.clone(),
    updated: persisted.updated,
    thumbnail: persisted.thumbnail.clone(),
    short_description: smart_truncate(&persisted.description, SHORT_DESCRIPTION_LENGTH),
  }
}

/// Cut `text` after the first word that takes it past `limit` characters,
/// dropping trailing separators and appending `...` when anything was cut.
pub fn smart_truncate(text: &str, limit: usize) -> String {
  let mut out = String::new();
  let mut length = 0;
  let mut truncated = false;

  for word in text.split(' ') {
    if length > limit {
      truncated = true;
      break;
    }
    out.push_str(word);
    out.push(' ');
    length += word.chars().count() + 1;
  }

  let mut out = out
    .trim_end()
    .trim_end_matches([',', ';', ':'])
    .to_string();
  if truncated {
    out.push_str("...");
  }
  out
}

fn required(value: Option<String>) -> Option<String> {
  value
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
}

impl TryFrom<NetworkVideo> for PersistedVideo {
  type Error = MalformedRecordError;

  fn try_from(remote: NetworkVideo) -> Result<Self, Self::Error> {
    to_persisted(remote)
  }
}

impl From<&PersistedVideo> for Video {
  fn from(persisted: &PersistedVideo) -> Self {
    to_domain(persisted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn network_video() -> NetworkVideo {
    NetworkVideo {
      title: Some("Android Jetpack: Room".into()),
      description: "Room is a persistence library.".into(),
      url: Some("https://www.youtube.com/watch?v=SKWh4ckvFPM".into()),
      updated: Some("2018-06-07T17:09:43+00:00".into()),
      thumbnail: Some("https://i4.ytimg.com/vi/SKWh4ckvFPM/hqdefault.jpg".into()),
      closed_captions: Some("https://example.com/cc.vtt".into()),
    }
  }

  #[test]
  fn test_to_persisted_keeps_required_fields() {
    let persisted = to_persisted(network_video()).unwrap();
    assert_eq!(persisted.url, "https://www.youtube.com/watch?v=SKWh4ckvFPM");
    assert_eq!(persisted.title, "Android Jetpack: Room");
    assert_eq!(persisted.updated.to_rfc3339(), "2018-06-07T17:09:43+00:00");
    assert_eq!(
      persisted.thumbnail.as_deref(),
      Some("https://i4.ytimg.com/vi/SKWh4ckvFPM/hqdefault.jpg")
    );
  }

  #[test]
  fn test_updated_is_normalized_to_utc() {
    let remote = NetworkVideo {
      updated: Some("2018-06-07T19:09:43+02:00".into()),
      ..network_video()
    };
    let persisted = to_persisted(remote).unwrap();
    assert_eq!(persisted.updated.to_rfc3339(), "2018-06-07T17:09:43+00:00");
  }

  #[test]
  fn test_missing_url_is_malformed() {
    let remote = NetworkVideo {
      url: Some("  ".into()),
      ..network_video()
    };
    let err = to_persisted(remote).unwrap_err();
    assert_eq!(err, MalformedRecordError::new("", "missing url"));
  }

  #[test]
  fn test_missing_title_is_malformed() {
    let remote = NetworkVideo {
      title: None,
      ..network_video()
    };
    let err = PersistedVideo::try_from(remote).unwrap_err();
    assert_eq!(err.key, "https://www.youtube.com/watch?v=SKWh4ckvFPM");
    assert_eq!(err.reason, "missing title");
  }

  #[test]
  fn test_bad_timestamp_is_malformed() {
    let remote = NetworkVideo {
      updated: Some("yesterday".into()),
      ..network_video()
    };
    let err = to_persisted(remote).unwrap_err();
    assert!(err.reason.starts_with("invalid updated 'yesterday'"));
  }

  #[test]
  fn test_missing_thumbnail_is_allowed() {
    let remote = NetworkVideo {
      thumbnail: None,
      ..network_video()
    };
    assert_eq!(to_persisted(remote).unwrap().thumbnail, None);

    let remote = NetworkVideo {
      thumbnail: Some("not a url".into()),
      ..network_video()
    };
    assert!(to_persisted(remote).is_err());
  }

  #[test]
  fn test_to_domain_adds_short_description() {
    let persisted = to_persisted(network_video()).unwrap();
    let video = Video::from(&persisted);
    assert_eq!(video.url, persisted.url);
    assert_eq!(video.updated, persisted.updated);
    assert_eq!(video.short_description, "Room is a persistence library.");
  }

  #[test]
  fn test_smart_truncate_short_text_unchanged() {
    assert_eq!(smart_truncate("a few words", 200), "a few words");
    assert_eq!(smart_truncate("", 200), "");
  }

  #[test]
  fn test_smart_truncate_cuts_at_word_boundary() {
    let text = "one two three, four five six";
    assert_eq!(smart_truncate(text, 10), "one two three...");
  }

  #[test]
  fn test_smart_truncate_long_description() {
    let text = "word ".repeat(100);
    let short = smart_truncate(text.trim_end(), SHORT_DESCRIPTION_LENGTH);
    assert!(short.ends_with("..."));
    assert!(short.chars().count() <= SHORT_DESCRIPTION_LENGTH + 5 + 3);
    assert!(!short.contains("  "));
  }
}
