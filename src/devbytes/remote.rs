//! HTTP client for the DevBytes playlist.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{NetworkError, RemoteSource};
use crate::config::RemoteConfig;

use super::api_types::{NetworkVideo, NetworkVideoContainer};

/// Longest error body kept in a [`NetworkError::Status`]
const MAX_ERROR_BODY: usize = 200;

/// Cap on the wait between two attempts
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Playlist client
#[derive(Clone)]
pub struct HttpVideoSource {
  client: reqwest::Client,
  endpoint: Url,
  timeout: Duration,
  retries: u32,
  retry_backoff: Duration,
}

impl HttpVideoSource {
  pub fn new(config: &RemoteConfig) -> Result<Self> {
    config.validate()?;

    let client = reqwest::Client::builder()
      .timeout(config.timeout())
      .user_agent(concat!("devbytes-cache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      endpoint: config.endpoint()?,
      timeout: config.timeout(),
      retries: config.retries,
      retry_backoff: config.retry_backoff(),
    })
  }

  pub fn endpoint(&self) -> &Url {
    &self.endpoint
  }

  async fn fetch_once(&self) -> Result<Vec<NetworkVideo>, NetworkError> {
    let response = self
      .client
      .get(self.endpoint.clone())
      .send()
      .await
      .map_err(|e| self.classify(e))?;

    let status = response.status();
    if !status.is_success() {
      let mut message = response.text().await.unwrap_or_default();
      if let Some((cut, _)) = message.char_indices().nth(MAX_ERROR_BODY) {
        message.truncate(cut);
      }
      return Err(NetworkError::Status {
        status: status.as_u16(),
        message,
      });
    }

    let body = response.bytes().await.map_err(|e| self.classify(e))?;
    let container: NetworkVideoContainer =
      serde_json::from_slice(&body).map_err(|e| NetworkError::Decode(e.to_string()))?;

    Ok(container.into_records())
  }

  fn classify(&self, e: reqwest::Error) -> NetworkError {
    if e.is_timeout() {
      NetworkError::Timeout(self.timeout.as_secs())
    } else if e.is_connect() {
      NetworkError::Connect(e.to_string())
    } else if e.is_decode() || e.is_body() {
      NetworkError::Decode(e.to_string())
    } else {
      NetworkError::Other(e.to_string())
    }
  }
}

#[async_trait]
impl RemoteSource for HttpVideoSource {
  type Record = NetworkVideo;

  fn label(&self) -> &str {
    self.endpoint.as_str()
  }

  /// Get the playlist, retrying transient failures with linear backoff.
  async fn fetch(&self) -> Result<Vec<NetworkVideo>, NetworkError> {
    let mut attempt = 0;

    loop {
      match self.fetch_once().await {
        Ok(videos) => {
          debug!(count = videos.len(), attempt, "fetched playlist");
          return Ok(videos);
        }
        Err(e) if e.is_transient() && attempt < self.retries => {
          attempt += 1;
          let delay = retry_delay(self.retry_backoff, attempt);
          warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "retrying playlist fetch");
          tokio::time::sleep(delay).await;
        }
        Err(e) => return Err(e),
      }
    }
  }
}

/// Linear backoff, saturating at [`MAX_RETRY_DELAY`].
fn retry_delay(backoff: Duration, attempt: u32) -> Duration {
  backoff
    .checked_mul(attempt)
    .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  const PLAYLIST: &str = r#"{"videos":[{"title":"Room","description":"Persistence","url":"https://www.youtube.com/watch?v=SKWh4ckvFPM","updated":"2018-06-07T17:09:43+00:00","thumbnail":"https://i4.ytimg.com/vi/SKWh4ckvFPM/hqdefault.jpg"}]}"#;

  /// Minimal HTTP server answering each connection with the next canned
  /// response. `None` accepts the connection and never answers.
  async fn serve(responses: Vec<Option<(u16, &'static str)>>) -> (RemoteConfig, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hits);
    tokio::spawn(async move {
      for response in responses {
        let Ok((mut socket, _)) = listener.accept().await else {
          return;
        };
        counter.fetch_add(1, Ordering::SeqCst);

        let mut buf = vec![0u8; 4096];
        let mut read = 0;
        while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
          match socket.read(&mut buf[read..]).await {
            Ok(0) | Err(_) => break,
            Ok(n) => read += n,
          }
        }

        match response {
          Some((status, body)) => {
            let reply = format!(
              "HTTP/1.1 {} Test\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
              status,
              body.len(),
              body
            );
            let _ = socket.write_all(reply.as_bytes()).await;
            let _ = socket.shutdown().await;
          }
          None => {
            tokio::spawn(async move {
              tokio::time::sleep(Duration::from_secs(10)).await;
              drop(socket);
            });
          }
        }
      }
    });

    let config = RemoteConfig {
      base_url: format!("http://{}/", addr),
      timeout_secs: 1,
      retries: 0,
      retry_backoff_ms: 10,
    };
    (config, hits)
  }

  #[tokio::test]
  async fn test_fetch_decodes_playlist() {
    let (config, hits) = serve(vec![Some((200, PLAYLIST))]).await;
    let source = HttpVideoSource::new(&config).unwrap();
    assert!(source.label().ends_with("/devbytes.json"));

    let videos = source.fetch().await.unwrap();
    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0].title.as_deref(), Some("Room"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_server_error_is_retried() {
    let (config, hits) = serve(vec![Some((503, "busy")), Some((200, PLAYLIST))]).await;
    let source = HttpVideoSource::new(&RemoteConfig {
      retries: 1,
      ..config
    })
    .unwrap();

    assert_eq!(source.fetch().await.unwrap().len(), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_client_error_is_not_retried() {
    let (config, hits) = serve(vec![Some((404, "no such playlist")), Some((200, PLAYLIST))]).await;
    let source = HttpVideoSource::new(&RemoteConfig {
      retries: 3,
      ..config
    })
    .unwrap();

    let err = source.fetch().await.unwrap_err();
    assert_eq!(
      err,
      NetworkError::Status {
        status: 404,
        message: "no such playlist".into()
      }
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_bad_body_is_decode_error() {
    let (config, _) = serve(vec![Some((200, "<html>oops</html>"))]).await;
    let source = HttpVideoSource::new(&config).unwrap();

    assert!(matches!(
      source.fetch().await.unwrap_err(),
      NetworkError::Decode(_)
    ));
  }

  #[tokio::test]
  async fn test_silent_server_times_out() {
    let (config, _) = serve(vec![None]).await;
    let source = HttpVideoSource::new(&config).unwrap();

    assert_eq!(source.fetch().await.unwrap_err(), NetworkError::Timeout(1));
  }

  #[tokio::test]
  async fn test_unreachable_host_is_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let source = HttpVideoSource::new(&RemoteConfig {
      base_url: format!("http://{}/", addr),
      timeout_secs: 1,
      retries: 0,
      retry_backoff_ms: 10,
    })
    .unwrap();

    assert!(matches!(
      source.fetch().await.unwrap_err(),
      NetworkError::Connect(_)
    ));
  }

  #[test]
  fn test_retry_delay_grows_linearly_and_saturates() {
    let backoff = Duration::from_millis(500);
    assert_eq!(retry_delay(backoff, 1), Duration::from_millis(500));
    assert_eq!(retry_delay(backoff, 3), Duration::from_millis(1500));
    assert_eq!(retry_delay(backoff, 1_000), MAX_RETRY_DELAY);
    assert_eq!(retry_delay(Duration::MAX, u32::MAX), MAX_RETRY_DELAY);
  }

  #[test]
  fn test_invalid_settings_are_rejected_at_construction() {
    let zero_timeout = RemoteConfig {
      timeout_secs: 0,
      ..Default::default()
    };
    assert!(HttpVideoSource::new(&zero_timeout).is_err());

    let huge_backoff = RemoteConfig {
      retry_backoff_ms: u64::MAX,
      ..Default::default()
    };
    assert!(HttpVideoSource::new(&huge_backoff).is_err());
  }
}
