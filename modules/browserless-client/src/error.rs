use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserlessError>;

#[derive(Debug, Error)]
pub enum BrowserlessError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out waiting for rendered content")]
    Timeout,

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl BrowserlessError {
    /// Whether retrying the same request could plausibly succeed.
    /// Network failures, timeouts, rate limiting and server errors are retryable;
    /// any other client error is a definitive answer about the target page.
    pub fn is_retryable(&self) -> bool {
        match self {
            BrowserlessError::Network(_) | BrowserlessError::Timeout => true,
            BrowserlessError::Api { status, .. } => *status == 429 || *status >= 500,
        }
    }

    /// The target page does not exist (anymore).
    pub fn is_not_found(&self) -> bool {
        matches!(self, BrowserlessError::Api { status: 404 | 410, .. })
    }
}

impl From<reqwest::Error> for BrowserlessError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BrowserlessError::Timeout
        } else {
            BrowserlessError::Network(err.to_string())
        }
    }
}
