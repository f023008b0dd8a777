use thiserror::Error;

/// Failure taxonomy shared across the crawl engine. Fetch and normalization
/// outcomes are tagged here so callers can classify without downcasting.
#[derive(Debug, Error)]
pub enum SitesyncError {
    #[error("transient fetch failure: {0}")]
    TransientFetch(String),
    #[error("permanent fetch failure: {0}")]
    PermanentFetch(String),
    #[error("normalization rejected payload: {0}")]
    Normalization(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("duplicate task for url: {0}")]
    DuplicateTask(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cancelled")]
    Cancelled,
}

impl SitesyncError {
    /// Transient failures are retried with backoff; everything else is
    /// terminal for the task that hit it.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFetch(_))
    }
}
