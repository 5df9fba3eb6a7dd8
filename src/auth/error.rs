use thiserror::Error;

/// Fatal authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    BadCredentials,

    #[error("Unknown user")]
    UnknownUser,

    #[error("Unexpected HTTP status {0} during authentication")]
    UnexpectedHttp(u16),

    #[error("MFA required but --fail-on-mfa is set")]
    FailOnMfa,

    #[error("MFA input channel closed before a code arrived")]
    MfaChannelClosed,

    #[error("MFA code rejected: {0}")]
    BadMfaCode(String),

    #[error("Response is missing the {0} header")]
    MissingHeader(&'static str),

    #[error("Account setup response lacks the photos web service")]
    MissingPhotosService,

    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Unexpected response from Apple: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AuthError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AuthError::FailOnMfa | AuthError::BadMfaCode(_) | AuthError::MfaChannelClosed => 4,
            _ => 3,
        }
    }
}

/// Trust-token acquisition failures (the `TRUSTED` transition).
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Trust request failed with HTTP {0}")]
    TrustRejected(u16),

    #[error("Trust response is missing the {0} header")]
    MissingToken(&'static str),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl TokenError {
    pub fn exit_code(&self) -> i32 {
        8
    }
}
