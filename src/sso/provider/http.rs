//! HTTP plumbing shared by the authorization-code providers.

use super::oidc::DiscoveryCache;
use super::{CallbackRequest, ProviderError};
use reqwest::{header::ACCEPT, Client};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_PROVIDER_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_DISCOVERY_RETRY_BASE_MS: u64 = 1_000;

/// Client settings and caches handed to every provider the registry builds.
#[derive(Clone, Debug)]
pub struct ProviderHttp {
    client: Client,
    retry_base: Duration,
    discovery: Arc<DiscoveryCache>,
}

impl ProviderHttp {
    /// # Errors
    /// Returns `Configuration` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|err| ProviderError::Configuration(format!("http client: {err}")))?;
        Ok(Self {
            client,
            retry_base: Duration::from_millis(DEFAULT_DISCOVERY_RETRY_BASE_MS),
            discovery: Arc::new(DiscoveryCache::default()),
        })
    }

    /// Base delay between discovery attempts; doubled after each failure.
    #[must_use]
    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    pub(super) fn retry_base(&self) -> Duration {
        self.retry_base
    }

    pub(super) fn discovery(&self) -> &DiscoveryCache {
        &self.discovery
    }

    pub(super) async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ExchangeFailed(format!(
                "GET {url} returned {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))
    }

    /// Exchange an authorization code at the token endpoint. Never retried.
    pub(super) async fn exchange_code(
        &self,
        token_url: &str,
        client: &ClientCredentials,
        code: &str,
    ) -> Result<String, ProviderError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", client.redirect_url.as_str()),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
        ];

        let response = self
            .client
            .post(token_url)
            .header(ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ExchangeFailed(format!(
                "token endpoint returned {status}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;

        if let Some(error) = token.error {
            return Err(ProviderError::ExchangeFailed(format!(
                "token endpoint error: {error}"
            )));
        }
        match token.access_token {
            Some(access_token) if !access_token.is_empty() => {
                debug!(token_type = ?token.token_type, "authorization code exchanged");
                Ok(access_token)
            }
            _ => Err(ProviderError::InvalidResponse(
                "token response without access_token".to_string(),
            )),
        }
    }

    pub(super) async fn fetch_userinfo(
        &self,
        userinfo_url: &str,
        access_token: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        let response = self
            .client
            .get(userinfo_url)
            .header(ACCEPT, "application/json")
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ExchangeFailed(format!(
                "userinfo endpoint returned {status}"
            )));
        }

        let claims: serde_json::Value = response
            .json()
            .await
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;
        if !claims.is_object() {
            return Err(ProviderError::InvalidResponse(
                "userinfo is not a JSON object".to_string(),
            ));
        }
        Ok(claims)
    }
}

/// OAuth2 client registration shared by both provider families.
#[derive(Clone, Deserialize)]
pub(super) struct ClientCredentials {
    pub(super) client_id: String,
    pub(super) client_secret: String,
    pub(super) redirect_url: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("redirect_url", &self.redirect_url)
            .finish_non_exhaustive()
    }
}

impl ClientCredentials {
    pub(super) fn validate(&self) -> Result<(), ProviderError> {
        if self.client_id.trim().is_empty() {
            return Err(ProviderError::Configuration("client_id is empty".to_string()));
        }
        if self.client_secret.is_empty() {
            return Err(ProviderError::Configuration(
                "client_secret is empty".to_string(),
            ));
        }
        parse_endpoint("redirect_url", &self.redirect_url)?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    error: Option<String>,
}

/// Authorization URL with the standard code-flow parameters appended.
pub(super) fn authorization_url(
    endpoint: &str,
    client: &ClientCredentials,
    scopes: &[String],
    state: &str,
) -> Result<String, ProviderError> {
    let mut url = parse_endpoint("authorization endpoint", endpoint)?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs
            .append_pair("response_type", "code")
            .append_pair("client_id", &client.client_id)
            .append_pair("redirect_uri", &client.redirect_url)
            .append_pair("state", state);
        if !scopes.is_empty() {
            pairs.append_pair("scope", &scopes.join(" "));
        }
    }
    Ok(url.into())
}

/// Pull the authorization code out of a callback, surfacing IdP-side errors.
pub(super) fn callback_code(request: &CallbackRequest) -> Result<String, ProviderError> {
    if let Some(error) = request.params.get("error") {
        let description = request
            .params
            .get("error_description")
            .map_or("", String::as_str);
        warn!(error = %error, description = %description, "provider rejected the login");
        return Err(ProviderError::ExchangeFailed(format!(
            "provider returned {error}"
        )));
    }

    request
        .code
        .clone()
        .or_else(|| request.params.get("code").cloned())
        .filter(|code| !code.is_empty())
        .ok_or_else(|| ProviderError::InvalidResponse("missing authorization code".to_string()))
}

pub(super) fn parse_endpoint(name: &str, value: &str) -> Result<Url, ProviderError> {
    let url = Url::parse(value)
        .map_err(|err| ProviderError::Configuration(format!("invalid {name}: {err}")))?;
    match url.scheme() {
        "https" | "http" => Ok(url),
        other => Err(ProviderError::Configuration(format!(
            "invalid {name}: unsupported scheme {other}"
        ))),
    }
}

fn send_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::ExchangeFailed("request timed out".to_string())
    } else {
        ProviderError::ExchangeFailed(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn credentials() -> ClientCredentials {
        ClientCredentials {
            client_id: "client id".to_string(),
            client_secret: "secret".to_string(),
            redirect_url: "https://sso.test/v1/sso/oidc/callback".to_string(),
        }
    }

    #[test]
    fn authorization_url_encodes_parameters() {
        let url = authorization_url(
            "https://idp.test/authorize?prompt=login",
            &credentials(),
            &["openid".to_string(), "email".to_string()],
            "st/ate+1",
        )
        .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let pairs: HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert_eq!(pairs.get("prompt").map(String::as_str), Some("login"));
        assert_eq!(pairs.get("client_id").map(String::as_str), Some("client id"));
        assert_eq!(pairs.get("state").map(String::as_str), Some("st/ate+1"));
        assert_eq!(pairs.get("scope").map(String::as_str), Some("openid email"));
        assert_eq!(pairs.get("response_type").map(String::as_str), Some("code"));
    }

    #[test]
    fn authorization_url_rejects_bad_endpoint() {
        let err = authorization_url("not a url", &credentials(), &[], "s").err();
        assert!(matches!(err, Some(ProviderError::Configuration(_))));
        let err = authorization_url("ftp://idp.test/authorize", &credentials(), &[], "s").err();
        assert!(matches!(err, Some(ProviderError::Configuration(_))));
    }

    #[test]
    fn callback_code_prefers_explicit_code() {
        let mut request = CallbackRequest {
            code: Some("abc".to_string()),
            ..CallbackRequest::default()
        };
        request.params.insert("code".to_string(), "ignored".to_string());
        assert_eq!(callback_code(&request).unwrap(), "abc");

        request.code = None;
        assert_eq!(callback_code(&request).unwrap(), "ignored");
    }

    #[test]
    fn callback_code_maps_provider_error() {
        let mut request = CallbackRequest::default();
        request
            .params
            .insert("error".to_string(), "access_denied".to_string());
        assert!(matches!(
            callback_code(&request),
            Err(ProviderError::ExchangeFailed(msg)) if msg.contains("access_denied")
        ));
    }

    #[test]
    fn callback_code_missing() {
        assert!(matches!(
            callback_code(&CallbackRequest::default()),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let rendered = format!("{:?}", credentials());
        assert!(rendered.contains("client id"));
        assert!(!rendered.contains("\"secret\""));
    }

    #[test]
    fn credentials_validate() {
        assert!(credentials().validate().is_ok());
        let mut bad = credentials();
        bad.client_id = " ".to_string();
        assert!(bad.validate().is_err());
        let mut bad = credentials();
        bad.redirect_url = "/relative".to_string();
        assert!(bad.validate().is_err());
    }
}
