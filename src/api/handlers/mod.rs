//! Route handlers and shared request helpers.

pub mod auth;
pub mod error;
pub mod health;
pub mod sso;

pub use error::{ApiError, ErrorBody};

use axum::http::{header::AUTHORIZATION, HeaderMap};

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
