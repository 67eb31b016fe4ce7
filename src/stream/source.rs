//! Narration backend seam: open an event stream and read it chunk by chunk.
//!
//! [`NarrationService`] is implemented by [`ApiNarrationService`] (HTTP, the
//! production backend) and by test doubles.  A service hands back a
//! [`ChunkSource`], which yields raw byte chunks until the producer closes
//! the connection.

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ServerConfig;

use super::request::SessionRequest;

// ---------------------------------------------------------------------------
// StreamError
// ---------------------------------------------------------------------------

/// Errors raised while opening or reading the event stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// HTTP transport or connection error.
    #[error("stream request failed: {0}")]
    Request(String),

    /// Connection could not be established in time.
    #[error("stream connection timed out")]
    Timeout,

    /// The backend answered with a non-success status.
    #[error("backend returned HTTP {0}")]
    Status(u16),

    /// The connection broke while reading.
    #[error("stream read failed: {0}")]
    Read(String),
}

impl From<reqwest::Error> for StreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StreamError::Timeout
        } else {
            StreamError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// An open event stream.
#[async_trait]
pub trait ChunkSource: Send {
    /// Next chunk of bytes, or `Ok(None)` once the producer closed the stream.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError>;
}

/// Opens narration streams for session requests.
#[async_trait]
pub trait NarrationService: Send + Sync {
    async fn open(&self, request: &SessionRequest) -> Result<Box<dyn ChunkSource>, StreamError>;
}

// ---------------------------------------------------------------------------
// ApiNarrationService
// ---------------------------------------------------------------------------

/// POSTs the request to the backend's audio-text stream endpoint.
///
/// Only the connect phase has a timeout; reads wait as long as the
/// connection stays open.
pub struct ApiNarrationService {
    client: reqwest::Client,
    stream_url: String,
}

impl ApiNarrationService {
    pub fn from_config(config: &ServerConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            stream_url: config.stream_url(),
        }
    }
}

#[async_trait]
impl NarrationService for ApiNarrationService {
    async fn open(&self, request: &SessionRequest) -> Result<Box<dyn ChunkSource>, StreamError> {
        log::info!("stream: opening {}", self.stream_url);

        let response = self
            .client
            .post(&self.stream_url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status(status.as_u16()));
        }

        Ok(Box::new(HttpChunkSource { response }))
    }
}

/// Reads the body of a streaming HTTP response.
struct HttpChunkSource {
    response: reqwest::Response,
}

#[async_trait]
impl ChunkSource for HttpChunkSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        match self.response.chunk().await {
            Ok(chunk) => Ok(chunk.map(|bytes| bytes.to_vec())),
            Err(e) => Err(StreamError::Read(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Scripted stream used by unit tests.
#[cfg(test)]
pub struct ScriptedSource {
    chunks: std::collections::VecDeque<Result<Vec<u8>, StreamError>>,
    /// When `true`, the source never ends after its chunks run out.
    hang: bool,
}

#[cfg(test)]
#[async_trait]
impl ChunkSource for ScriptedSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        match self.chunks.pop_front() {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(e),
            None if self.hang => {
                std::future::pending::<()>().await;
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

/// Service returning a [`ScriptedSource`] built from SSE records.
#[cfg(test)]
pub struct MockNarrationService {
    records: Vec<String>,
    fail_open: bool,
    hang: bool,
    read_error: bool,
    requests: std::sync::Mutex<Vec<SessionRequest>>,
}

#[cfg(test)]
impl MockNarrationService {
    /// Each record is a raw JSON payload (or sentinel); it is framed as
    /// `data: …\n\n` and delivered as its own chunk.
    pub fn with_records(records: &[&str]) -> Self {
        Self {
            records: records.iter().map(|r| r.to_string()).collect(),
            fail_open: false,
            hang: false,
            read_error: false,
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// `open` fails with HTTP 500.
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::with_records(&[])
        }
    }

    /// Keep the stream open after the last record.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Break the connection after the last record.
    pub fn with_read_error(mut self) -> Self {
        self.read_error = true;
        self
    }

    pub fn requests(&self) -> Vec<SessionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl NarrationService for MockNarrationService {
    async fn open(&self, request: &SessionRequest) -> Result<Box<dyn ChunkSource>, StreamError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail_open {
            return Err(StreamError::Status(500));
        }
        let mut chunks: std::collections::VecDeque<_> = self
            .records
            .iter()
            .map(|r| Ok(format!("data: {r}\n\n").into_bytes()))
            .collect();
        if self.read_error {
            chunks.push_back(Err(StreamError::Read("connection reset".into())));
        }
        Ok(Box::new(ScriptedSource {
            chunks,
            hang: self.hang,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
