//! Browser-facing login legs: redirect to the provider, then land back here.

use super::ApiError;
use crate::sso::{SsoError, SsoManager};
use axum::{
    extract::{Extension, Path, Query},
    http::{header::CACHE_CONTROL, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc};
use url::form_urlencoded;
use utoipa::IntoParams;

const DEFAULT_REDIRECT: &str = "/";

#[derive(Debug, Deserialize, IntoParams)]
pub struct BeginQuery {
    /// Where the browser lands after login; a local path or an allow-listed URL.
    pub redirect: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/sso/{provider}/begin",
    params(
        ("provider" = String, Path, description = "Provider type, e.g. `oidc`"),
        BeginQuery
    ),
    responses(
        (status = 303, description = "Redirect to the identity provider"),
        (status = 400, description = "Redirect target not allowed", body = super::ErrorBody),
        (status = 404, description = "Provider unknown or disabled", body = super::ErrorBody),
        (status = 503, description = "Provider misconfigured or unreachable", body = super::ErrorBody)
    ),
    tag = "sso"
)]
pub async fn begin(
    Path(provider): Path<String>,
    Query(query): Query<BeginQuery>,
    manager: Extension<Arc<SsoManager>>,
) -> Response {
    let target = query.redirect.as_deref().unwrap_or(DEFAULT_REDIRECT);
    match manager.begin(&provider, target).await {
        Ok(outcome) => no_store(Redirect::to(&outcome.redirect_url).into_response()),
        Err(err) => ApiError::from(&err).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/sso/{provider}/callback",
    params(
        ("provider" = String, Path, description = "Provider type the login started with"),
        ("state" = String, Query, description = "Redirect state issued by begin"),
        ("code" = Option<String>, Query, description = "Authorization code")
    ),
    responses(
        (status = 303, description = "Login complete; tokens appended to the redirect target"),
        (status = 401, description = "State or provider exchange rejected", body = super::ErrorBody),
        (status = 409, description = "Existing account must be linked first", body = super::ErrorBody)
    ),
    tag = "sso"
)]
pub async fn callback(
    Path(provider): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    manager: Extension<Arc<SsoManager>>,
) -> Response {
    let Some(state) = params.get("state").cloned() else {
        return ApiError::from(&SsoError::MalformedState).into_response();
    };

    match manager.callback(&provider, &state, params).await {
        Ok(outcome) => {
            let location = append_tokens(
                &outcome.redirect_target,
                &[
                    ("access_token", outcome.access_token.as_str()),
                    ("refresh_token", outcome.refresh_token.as_str()),
                    ("token_type", "Bearer"),
                    ("expires_in", outcome.expires_in.to_string().as_str()),
                ],
            );
            no_store(Redirect::to(&location).into_response())
        }
        Err(err) => ApiError::from(&err).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/sso/{provider}/check",
    params(("provider" = String, Path, description = "Provider type to check")),
    responses(
        (status = 204, description = "Connection builds and the provider answers"),
        (status = 404, description = "Provider unknown or disabled", body = super::ErrorBody),
        (status = 503, description = "Provider misconfigured or unreachable", body = super::ErrorBody)
    ),
    tag = "sso"
)]
pub async fn check(Path(provider): Path<String>, manager: Extension<Arc<SsoManager>>) -> Response {
    match manager.test_provider(&provider).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => ApiError::from(&err).into_response(),
    }
}

fn no_store(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Append `pairs` to the query of `target`, keeping any existing query and
/// fragment in place.
fn append_tokens(target: &str, pairs: &[(&str, &str)]) -> String {
    let (base, fragment) = match target.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (target, None),
    };

    let encoded = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();

    let separator = if !base.contains('?') {
        "?"
    } else if base.ends_with('?') || base.ends_with('&') {
        ""
    } else {
        "&"
    };

    let mut location = format!("{base}{separator}{encoded}");
    if let Some(fragment) = fragment {
        location.push('#');
        location.push_str(fragment);
    }
    location
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_to_plain_path() {
        assert_eq!(append_tokens("/app", &[("a", "1")]), "/app?a=1");
    }

    #[test]
    fn append_to_existing_query_and_fragment() {
        assert_eq!(
            append_tokens("/app?tab=2#top", &[("a", "1"), ("b", "x y")]),
            "/app?tab=2&a=1&b=x+y#top"
        );
        assert_eq!(append_tokens("/app?", &[("a", "1")]), "/app?a=1");
    }

    #[test]
    fn append_escapes_values() {
        assert_eq!(
            append_tokens("https://app.example.com/", &[("t", "v4.public.a+b/c=")]),
            "https://app.example.com/?t=v4.public.a%2Bb%2Fc%3D"
        );
    }
}
