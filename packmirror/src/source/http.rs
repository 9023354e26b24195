//! HTTP client abstraction for testability.
//!
//! Sources depend on this trait instead of a concrete client so tests can
//! inject canned responses without touching the network.

use std::fmt;
use std::time::Duration;

/// Default timeout for registry requests.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Errors from the HTTP seam.
#[derive(Debug, Clone)]
pub enum HttpError {
    /// The server answered 404; distinguished so sources can map it to
    /// "artifact withdrawn upstream".
    NotFound(String),
    /// Any other transport or status failure.
    Failed(String),
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(url) => write!(f, "404 from {url}"),
            Self::Failed(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for HttpError {}

/// Trait for HTTP GET operations.
pub trait HttpClient: Send + Sync {
    /// Perform an HTTP GET, returning the response body as bytes.
    fn get(&self, url: &str) -> Result<Vec<u8>, HttpError>;
}

/// Real HTTP client implementation using reqwest.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Create a client with the default timeout.
    pub fn new() -> Result<Self, HttpError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a client with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("packmirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HttpError::Failed(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> Result<Vec<u8>, HttpError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| HttpError::Failed(format!("request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(HttpError::NotFound(url.to_string()));
        }
        if !response.status().is_success() {
            return Err(HttpError::Failed(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| HttpError::Failed(format!("failed to read response: {e}")))
    }
}
