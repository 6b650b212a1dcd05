//! The videos repository: the playlist endpoint cached in SQLite.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::cache::{Observer, SqliteStore, SyncCache};
use crate::config::Config;

use super::cache::DevBytesKey;
use super::remote::HttpVideoSource;
use super::types::{PersistedVideo, Video};

/// Offline-first access to the playlist. Observers read the store, refreshes
/// go to the network.
pub type VideosRepository = SyncCache<HttpVideoSource, SqliteStore<PersistedVideo>, Video>;

/// Live list of videos
pub type VideoObserver = Observer<PersistedVideo, Video>;

/// Build the repository described by `config`, storing into `database`.
pub fn open_repository(
  config: &Config,
  database: &Path,
  cancel: CancellationToken,
) -> Result<VideosRepository> {
  let source = HttpVideoSource::new(&config.remote)?;
  let key = DevBytesKey::Playlist {
    endpoint: source.endpoint().to_string(),
  };
  let store = SqliteStore::open(database, &key)
    .map_err(|e| eyre!("Failed to open video cache at {}: {}", database.display(), e))?
    .with_poll_interval(config.store.poll_interval());

  Ok(SyncCache::with_cancellation(source, store, cancel))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{NetworkError, RefreshError};
  use crate::config::RemoteConfig;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  const PLAYLIST: &str = r#"{"videos":[
    {"title":"Room","description":"Persistence","url":"https://www.youtube.com/watch?v=b","updated":"2018-06-07T17:09:43+00:00"},
    {"title":"Paging","description":"Lists","url":"https://www.youtube.com/watch?v=c","updated":"2018-06-08T17:09:43+00:00"}
  ]}"#;

  async fn serve_once(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut buf = [0u8; 4096];
      let _ = socket.read(&mut buf).await;
      let reply = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
      );
      let _ = socket.write_all(reply.as_bytes()).await;
      let _ = socket.shutdown().await;
    });
    format!("http://{}/", addr)
  }

  fn config_for(base_url: String) -> Config {
    Config {
      remote: RemoteConfig {
        base_url,
        timeout_secs: 1,
        retries: 0,
        retry_backoff_ms: 10,
      },
      ..Config::default()
    }
  }

  #[tokio::test]
  async fn test_refresh_then_reopen_offline() {
    let dir = tempfile::tempdir().unwrap();
    let database = dir.path().join("cache.db");
    let base_url = serve_once(PLAYLIST).await;

    {
      let repo = open_repository(&config_for(base_url.clone()), &database, CancellationToken::new())
        .unwrap();
      assert!(repo.observe().current().is_empty());

      let outcome = repo.refresh().await.unwrap();
      assert_eq!(outcome.record_count, 2);
    }

    // The server is gone; the cached playlist is still served
    let repo =
      open_repository(&config_for(base_url), &database, CancellationToken::new()).unwrap();
    let videos = repo.observe().current();
    let urls: Vec<_> = videos.iter().map(|v| v.url.as_str()).collect();
    assert_eq!(
      urls,
      vec!["https://www.youtube.com/watch?v=b", "https://www.youtube.com/watch?v=c"]
    );
    assert_eq!(videos[0].short_description, "Persistence");

    let err = repo.refresh().await.unwrap_err();
    assert!(matches!(
      err,
      RefreshError::Network(NetworkError::Connect(_)) | RefreshError::Network(NetworkError::Timeout(_))
    ));
    assert_eq!(repo.observe().current(), videos);
  }
}
