use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Browser unavailable: {0}")]
    BrowserUnavailable(String),

    #[error("Browser process died: {0}")]
    BrowserCrashed(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Page error: {0}")]
    Page(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Fetch failed for {url} after {attempts} attempts: {source}")]
    FetchFailed {
        url: String,
        attempts: usize,
        #[source]
        source: Box<FetchError>,
    },
}

impl FetchError {
    /// Whether the retry loops may try again after this error.
    /// Retryability is decided by variant alone.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_)
                | FetchError::Timeout(_)
                | FetchError::Navigation(_)
                | FetchError::Page(_)
                | FetchError::BrowserCrashed(_)
        )
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Serialization(err.to_string())
    }
}
