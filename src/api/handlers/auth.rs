//! Session endpoints for API clients holding tokens from a completed login.

use super::{extract_bearer_token, ApiError};
use crate::token::TokenService;
use axum::{
    extract::{Extension, Json},
    http::{header::CACHE_CONTROL, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: String,
    /// Revoke every session of the caller. Requires a bearer access token.
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WhoAmI {
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = TokenResponse),
        (status = 401, description = "Session unknown, revoked or expired", body = super::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn refresh(
    tokens: Extension<Arc<TokenService>>,
    Json(request): Json<RefreshRequest>,
) -> Response {
    match tokens.refresh_access_token(&request.refresh_token).await {
        Ok(refreshed) => {
            let body = TokenResponse {
                access_token: refreshed.access_token.token,
                refresh_token: refreshed.refresh_token,
                token_type: "Bearer".to_string(),
                expires_in: tokens.config().access_ttl_seconds(),
            };
            let mut response = (StatusCode::OK, Json(body)).into_response();
            response
                .headers_mut()
                .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
        }
        Err(err) => ApiError::from(&err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 204, description = "Session revoked"),
        (status = 401, description = "Bearer token missing or invalid for `all`", body = super::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    tokens: Extension<Arc<TokenService>>,
    Json(request): Json<LogoutRequest>,
) -> Response {
    if request.all {
        let Some(token) = extract_bearer_token(&headers) else {
            return ApiError::unauthorized().into_response();
        };
        let claims = match tokens.validate_access_token(&token) {
            Ok(claims) => claims,
            Err(err) => return ApiError::from(&err).into_response(),
        };
        return match tokens.revoke_all(claims.user_id()).await {
            Ok(count) => {
                debug!(user_id = %claims.user_id(), count, "revoked all sessions");
                StatusCode::NO_CONTENT.into_response()
            }
            Err(err) => ApiError::from(&err).into_response(),
        };
    }

    match tokens.revoke(&request.refresh_token).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => ApiError::from(&err).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/whoami",
    responses(
        (status = 200, description = "Caller of a valid access token", body = WhoAmI),
        (status = 401, description = "Missing, expired or invalid token", body = super::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn whoami(headers: HeaderMap, tokens: Extension<Arc<TokenService>>) -> Response {
    let Some(token) = extract_bearer_token(&headers) else {
        return ApiError::unauthorized().into_response();
    };
    match tokens.validate_access_token(&token) {
        Ok(claims) => (
            StatusCode::OK,
            Json(WhoAmI {
                user_id: claims.user_id(),
                session_id: claims.sid,
            }),
        )
            .into_response(),
        Err(err) => ApiError::from(&err).into_response(),
    }
}
