//! Error → HTTP mapping. Bodies carry a generic message only; details are
//! logged server-side.

use crate::sso::SsoError;
use crate::token::TokenError;
use axum::{
    http::{header::CACHE_CONTROL, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

const RETRY_LOGIN: &str = "session expired, please retry login";
const LOGIN_FAILED: &str = "login failed";
const REAUTHENTICATE: &str = "re-authentication required";
const INTERNAL: &str = "internal error";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiError {
    status: StatusCode,
    message: &'static str,
}

impl ApiError {
    #[must_use]
    pub const fn new(status: StatusCode, message: &'static str) -> Self {
        Self { status, message }
    }

    #[must_use]
    pub const fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, REAUTHENTICATE)
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> &'static str {
        self.message
    }
}

impl From<&SsoError> for ApiError {
    fn from(err: &SsoError) -> Self {
        match err {
            SsoError::Configuration(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "identity provider unavailable")
            }
            SsoError::ProviderNotFound(_) | SsoError::ProviderDisabled(_) => {
                Self::new(StatusCode::NOT_FOUND, "identity provider not found")
            }
            SsoError::InvalidRedirect => {
                Self::new(StatusCode::BAD_REQUEST, "invalid redirect target")
            }
            SsoError::ExpiredState
            | SsoError::MalformedState
            | SsoError::TamperedState
            | SsoError::StateReplayed => Self::new(StatusCode::UNAUTHORIZED, RETRY_LOGIN),
            SsoError::ProviderExchangeFailed(_)
            | SsoError::InvalidProviderResponse(_)
            | SsoError::IdentityIncomplete(_)
            | SsoError::AccountNotFound
            | SsoError::StateProviderMismatch { .. } => {
                Self::new(StatusCode::UNAUTHORIZED, LOGIN_FAILED)
            }
            SsoError::AccountLinkRequired => {
                Self::new(StatusCode::CONFLICT, "account linking required")
            }
            SsoError::Token(err) => Self::from(err),
            SsoError::Storage(err) => {
                error!("sso storage failure: {err:#}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL)
            }
        }
    }
}

impl From<&TokenError> for ApiError {
    fn from(err: &TokenError) -> Self {
        match err {
            TokenError::SessionNotFound
            | TokenError::SessionExpired
            | TokenError::Expired
            | TokenError::InvalidSignature => Self::unauthorized(),
            TokenError::Storage(err) => {
                error!("session storage failure: {err:#}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL)
            }
            other => {
                error!("token failure: {other}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(ErrorBody {
                error: self.message.to_string(),
            }),
        )
            .into_response();
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}
