//! Error type shared by the crawl loop and the browser adapters.
//!
//! `SpiderError` is `Clone` so that a single stream failure can be handed to
//! every waiter queued on that stream.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SpiderError {
    /// A fetch did not resolve before its deadline. The connection has been aborted.
    #[error("Getting {url} took longer than {duration:?}.")]
    Timeout { url: String, duration: Duration },

    /// Connection-level failure: refused, reset, TLS handshake, body read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The render service answered the command with a non-success status.
    #[error("Render service at {url} answered with status {status}")]
    RenderService { url: String, status: u16 },

    /// A frame of the render stream could not be decoded.
    #[error("Failed to decode render frame: {0}")]
    Decode(String),

    /// The logical stream already delivered its terminal event or was torn down.
    #[error("Browser stream is closed")]
    StreamClosed,

    #[error("Invalid browser script: {0}")]
    InvalidScript(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("{0}")]
    GeneralError(String),
}

impl SpiderError {
    /// Whether the error was raised by a deadline rather than by the peer.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SpiderError::Timeout { .. })
    }
}

impl From<serde_json::Error> for SpiderError {
    fn from(err: serde_json::Error) -> Self {
        SpiderError::Json(err.to_string())
    }
}

impl From<reqwest::Error> for SpiderError {
    fn from(err: reqwest::Error) -> Self {
        SpiderError::Transport(err.to_string())
    }
}

impl From<http::Error> for SpiderError {
    fn from(err: http::Error) -> Self {
        SpiderError::GeneralError(err.to_string())
    }
}
