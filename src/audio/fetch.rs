//! Audio payload retrieval.
//!
//! [`AudioFetcher`] resolves an audio reference from the event stream into
//! fully buffered bytes.  [`HttpAudioFetcher`] performs a plain GET against
//! the configured backend; relative references are joined onto `base_url`.

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;

use crate::config::ServerConfig;

// ---------------------------------------------------------------------------
// FetchError
// ---------------------------------------------------------------------------

/// Errors that can occur while retrieving an audio payload.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The reference could not be turned into a URL.
    #[error("invalid audio url {0:?}")]
    InvalidUrl(String),

    /// HTTP transport or connection error.
    #[error("audio request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("audio request timed out")]
    Timeout,

    /// The server answered with a non-success status.
    #[error("audio request returned HTTP {0}")]
    Status(u16),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// AudioFetcher trait
// ---------------------------------------------------------------------------

/// Async retrieval of audio payloads.
///
/// Implementors must be `Send + Sync` so they can be shared by concurrent
/// fetch tasks behind an `Arc<dyn AudioFetcher>`.
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

// ---------------------------------------------------------------------------
// HttpAudioFetcher
// ---------------------------------------------------------------------------

/// GETs audio payloads from the narration backend.  No retries: a failed
/// segment leaves a gap in the narration instead of holding it up.
pub struct HttpAudioFetcher {
    client: reqwest::Client,
    base_url: Option<Url>,
}

impl HttpAudioFetcher {
    pub fn from_config(config: &ServerConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .timeout(std::time::Duration::from_secs(config.audio_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let base_url = match Url::parse(&config.base_url) {
            Ok(url) => Some(url),
            Err(e) => {
                log::warn!("fetch: base url {:?} is invalid ({e}); only absolute audio urls will work", config.base_url);
                None
            }
        };

        Self { client, base_url }
    }

    /// Resolve `reference` against the backend base URL.
    ///
    /// ```
    /// use flowist_player::audio::HttpAudioFetcher;
    /// use flowist_player::config::ServerConfig;
    ///
    /// let fetcher = HttpAudioFetcher::from_config(&ServerConfig::default());
    /// let url = fetcher.resolve("/api/v1/meditation/audio/s1/3").unwrap();
    /// assert_eq!(url.as_str(), "http://localhost:8000/api/v1/meditation/audio/s1/3");
    /// ```
    pub fn resolve(&self, reference: &str) -> Result<Url, FetchError> {
        if let Ok(absolute) = Url::parse(reference) {
            return Ok(absolute);
        }
        self.base_url
            .as_ref()
            .and_then(|base| base.join(reference).ok())
            .ok_or_else(|| FetchError::InvalidUrl(reference.to_string()))
    }
}

#[async_trait]
impl AudioFetcher for HttpAudioFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.resolve(url)?;
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

// ---------------------------------------------------------------------------
// MockFetcher (test only)
// ---------------------------------------------------------------------------

/// Test fetcher serving payloads from a map, with optional per-url delays.
/// Unknown urls answer 404.  Every call is recorded with the time it started.
#[cfg(test)]
#[derive(Default)]
pub struct MockFetcher {
    payloads: std::collections::HashMap<String, Vec<u8>>,
    delays: std::collections::HashMap<String, std::time::Duration>,
    calls: std::sync::Mutex<Vec<(String, tokio::time::Instant)>>,
}

#[cfg(test)]
impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, payload: Vec<u8>) -> Self {
        self.payloads.insert(url.to_string(), payload);
        self
    }

    pub fn with_delay(mut self, url: &str, delay: std::time::Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    /// URLs requested so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// When `url` was first requested.
    pub fn called_at(&self, url: &str) -> Option<tokio::time::Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, at)| *at)
    }
}

#[cfg(test)]
#[async_trait]
impl AudioFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), tokio::time::Instant::now()));
        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }
        self.payloads
            .get(url)
            .cloned()
            .ok_or(FetchError::Status(404))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> HttpAudioFetcher {
        HttpAudioFetcher::from_config(&ServerConfig::default())
    }

    #[test]
    fn resolves_relative_reference() {
        let url = fetcher().resolve("/api/v1/meditation/audio/abc/1").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/v1/meditation/audio/abc/1");
    }

    #[test]
    fn absolute_reference_is_kept() {
        let url = fetcher().resolve("https://cdn.example/a.mp3").unwrap();
        assert_eq!(url.as_str(), "https://cdn.example/a.mp3");
    }

    #[test]
    fn invalid_base_rejects_relative_reference() {
        let config = ServerConfig {
            base_url: "not a url".into(),
            ..ServerConfig::default()
        };
        let fetcher = HttpAudioFetcher::from_config(&config);
        let err = fetcher.resolve("/audio/1").unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }

    #[test]
    fn fetcher_is_object_safe() {
        let fetcher: Box<dyn AudioFetcher> = Box::new(fetcher());
        drop(fetcher);
    }

    #[tokio::test]
    async fn mock_fetcher_serves_known_and_rejects_unknown() {
        let mock = MockFetcher::new().with("a", vec![1, 2, 3]);
        assert_eq!(mock.fetch("a").await.unwrap(), vec![1, 2, 3]);
        assert!(matches!(mock.fetch("b").await, Err(FetchError::Status(404))));
        assert_eq!(mock.calls(), vec!["a".to_string(), "b".to_string()]);
    }
}
