//! Access/refresh token issuance backed by server-side sessions.

mod access;
mod error;
mod service;

pub use access::{AccessClaims, AccessToken, AccessTokenSigner};
pub use error::TokenError;
pub use service::{
    generate_refresh_token, hash_refresh_token, IssuedSession, Refreshed, TokenConfig,
    TokenService, DEFAULT_ACCESS_TTL_SECONDS, DEFAULT_AUDIENCE, DEFAULT_ISSUER,
    DEFAULT_SESSION_TTL_SECONDS,
};
