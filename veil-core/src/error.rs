//! Error taxonomy shared across Veil crates

use thiserror::Error;

/// The caller handed us a target that is not an http(s) URL
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid target URL {url:?}: {reason}")]
pub struct InvalidTargetError {
    pub url: String,
    pub reason: String,
}

impl InvalidTargetError {
    pub fn new(url: &str, reason: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// Transient failure fetching a listing or User-Agent pool
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Timeout fetching {0}")]
    Timeout(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}
