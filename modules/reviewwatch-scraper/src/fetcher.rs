use async_trait::async_trait;
use thiserror::Error;

use reviewwatch_common::{FetchedReviews, Location};

#[derive(Debug, Error)]
pub enum FetchError {
    /// Network trouble, timeouts, throttling. Worth another attempt.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// The source answered conclusively, e.g. the listing no longer exists.
    #[error("definitive fetch failure: {0}")]
    Definitive(String),

    /// The fetcher itself crashed on this location. Not retried.
    #[error("fetcher panicked: {0}")]
    Panicked(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Retrieves the current reviews for one location from the remote source.
/// Implementations may be slow; callers bound each call with a timeout.
#[async_trait]
pub trait ReviewFetcher: Send + Sync {
    async fn fetch(&self, location: &Location) -> Result<FetchedReviews, FetchError>;

    fn name(&self) -> &str;
}
