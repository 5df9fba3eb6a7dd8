use thiserror::Error;

/// Failures talking to the photos record zone. The API is
/// reverse-engineered; anything off-shape fails loudly as
/// `UnexpectedResponse` rather than risking local state.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Session cookies expired; the caller re-authenticates and retries.
    #[error("Photos request rejected with HTTP 401")]
    Unauthorized,

    #[error("Photos request failed with HTTP {0}")]
    HttpStatus(u16),

    #[error("Remote library is still indexing, try again later")]
    IndexingInProgress,

    #[error("Unexpected response from photos service: {0}")]
    UnexpectedResponse(String),

    #[error("Re-authentication failed: {0}")]
    Reauth(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl QueryError {
    /// Transient failures worth another attempt at the HTTP level.
    pub fn is_retryable(&self) -> bool {
        match self {
            QueryError::HttpStatus(status) => *status == 429 || *status >= 500,
            QueryError::Http(_) => true,
            _ => false,
        }
    }

    pub fn exit_code(&self) -> i32 {
        10
    }
}
