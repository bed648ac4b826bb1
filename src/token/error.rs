use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid signing key")]
    InvalidKey,
    #[error("failed to sign access token")]
    Signing,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("session not found")]
    SessionNotFound,
    #[error("session expired")]
    SessionExpired,
    #[error("failed to generate refresh token")]
    Entropy,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
