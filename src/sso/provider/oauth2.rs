//! Generic OAuth2 authorization-code provider with explicit endpoints.
//!
//! For IdPs without discovery (GitHub-style APIs). The userinfo response is
//! mapped to an [`Identity`] through a configurable [`ClaimMapping`].

use super::http::{authorization_url, callback_code, parse_endpoint, ClientCredentials};
use super::{
    async_trait, BeginRequest, BeginResponse, CallbackRequest, Identity, Provider, ProviderConfig,
    ProviderError, ProviderHttp, ProviderMetadata,
};
use serde::Deserialize;
use serde_json::Value;

pub const PROVIDER_TYPE: &str = "oauth2";

/// Where each identity field lives in the userinfo JSON. Dotted paths reach
/// into nested objects (`data.user.id`).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClaimMapping {
    pub subject: String,
    pub email: String,
    pub email_verified: Option<String>,
    pub display_name: Option<String>,
}

impl Default for ClaimMapping {
    fn default() -> Self {
        Self {
            subject: "sub".to_string(),
            email: "email".to_string(),
            email_verified: Some("email_verified".to_string()),
            display_name: Some("name".to_string()),
        }
    }
}

impl ClaimMapping {
    /// # Errors
    /// Returns `IdentityIncomplete` when subject or email is absent and
    /// `InvalidResponse` when a claim has an unusable type.
    pub fn identity(&self, provider_type: &str, claims: &Value) -> Result<Identity, ProviderError> {
        let subject = match lookup(claims, &self.subject) {
            None | Some(Value::Null) => None,
            Some(Value::String(value)) => Some(value.trim().to_string()),
            Some(Value::Number(value)) => Some(value.to_string()),
            Some(_) => {
                return Err(ProviderError::InvalidResponse(format!(
                    "claim {} is not a string",
                    self.subject
                )))
            }
        }
        .filter(|value| !value.is_empty())
        .ok_or(ProviderError::IdentityIncomplete("subject"))?;

        let email = match lookup(claims, &self.email) {
            None | Some(Value::Null) => None,
            Some(Value::String(value)) => Some(value.trim().to_string()),
            Some(_) => {
                return Err(ProviderError::InvalidResponse(format!(
                    "claim {} is not a string",
                    self.email
                )))
            }
        }
        .filter(|value| !value.is_empty())
        .ok_or(ProviderError::IdentityIncomplete("email"))?;

        let email_verified = self
            .email_verified
            .as_deref()
            .and_then(|path| lookup(claims, path))
            .and_then(|value| match value {
                Value::Bool(flag) => Some(*flag),
                Value::String(flag) => flag.parse().ok(),
                _ => None,
            });

        let display_name = self
            .display_name
            .as_deref()
            .and_then(|path| lookup(claims, path))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ToString::to_string);

        Ok(Identity {
            provider_type: provider_type.to_string(),
            subject,
            email,
            email_verified,
            display_name,
        })
    }
}

fn lookup<'a>(claims: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(claims, |value, segment| value.get(segment))
}

#[derive(Debug, Deserialize)]
struct OAuth2Settings {
    authorization_url: String,
    token_url: String,
    userinfo_url: String,
    #[serde(flatten)]
    client: ClientCredentials,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default)]
    claims: ClaimMapping,
}

#[derive(Debug)]
pub struct OAuth2Provider {
    settings: OAuth2Settings,
    http: ProviderHttp,
}

impl OAuth2Provider {
    /// # Errors
    /// Returns `Configuration` when settings are missing or endpoints invalid.
    pub fn from_config(config: &ProviderConfig, http: ProviderHttp) -> Result<Self, ProviderError> {
        let settings: OAuth2Settings = config.parse()?;
        settings.client.validate()?;
        parse_endpoint("authorization_url", &settings.authorization_url)?;
        parse_endpoint("token_url", &settings.token_url)?;
        parse_endpoint("userinfo_url", &settings.userinfo_url)?;
        Ok(Self { settings, http })
    }
}

#[async_trait]
impl Provider for OAuth2Provider {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            provider_type: PROVIDER_TYPE.to_string(),
            supports_login: true,
        }
    }

    async fn begin(&self, request: BeginRequest) -> Result<BeginResponse, ProviderError> {
        let redirect_url = authorization_url(
            &self.settings.authorization_url,
            &self.settings.client,
            &self.settings.scopes,
            &request.desired_state,
        )?;
        Ok(BeginResponse {
            redirect_url,
            state: request.desired_state,
        })
    }

    async fn callback(&self, request: CallbackRequest) -> Result<Identity, ProviderError> {
        let code = callback_code(&request)?;
        let access_token = self
            .http
            .exchange_code(&self.settings.token_url, &self.settings.client, &code)
            .await?;
        let claims = self
            .http
            .fetch_userinfo(&self.settings.userinfo_url, &access_token)
            .await?;
        self.settings.claims.identity(PROVIDER_TYPE, &claims)
    }

    async fn test(&self) -> Result<(), ProviderError> {
        // Endpoints were validated on construction; nothing is reachable
        // without a user token.
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn config() -> ProviderConfig {
        ProviderConfig::new(json!({
            "authorization_url": "https://git.test/login/oauth/authorize",
            "token_url": "https://git.test/login/oauth/access_token",
            "userinfo_url": "https://api.git.test/user",
            "client_id": "cid",
            "client_secret": "csecret",
            "redirect_url": "https://sso.test/v1/sso/oauth2/callback",
            "scopes": ["read:user", "user:email"],
            "claims": {"subject": "id", "email": "email", "display_name": "login"}
        }))
    }

    fn http() -> ProviderHttp {
        ProviderHttp::new(Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn default_mapping_reads_oidc_claims() {
        let claims = json!({
            "sub": "abc",
            "email": "User@Example.com",
            "email_verified": true,
            "name": "Ada"
        });
        let identity = ClaimMapping::default().identity("oidc", &claims).unwrap();
        assert_eq!(identity.subject, "abc");
        assert_eq!(identity.email, "User@Example.com");
        assert_eq!(identity.email_verified, Some(true));
        assert_eq!(identity.display_name.as_deref(), Some("Ada"));
    }

    #[test]
    fn mapping_handles_numeric_and_nested_claims() {
        let mapping = ClaimMapping {
            subject: "data.id".to_string(),
            email: "data.mail".to_string(),
            email_verified: Some("data.verified".to_string()),
            display_name: None,
        };
        let claims = json!({"data": {"id": 4242, "mail": "a@b.test", "verified": "false"}});
        let identity = mapping.identity("oauth2", &claims).unwrap();
        assert_eq!(identity.subject, "4242");
        assert_eq!(identity.email_verified, Some(false));
        assert_eq!(identity.display_name, None);
    }

    #[test]
    fn mapping_reports_missing_claims() {
        let mapping = ClaimMapping::default();
        assert_eq!(
            mapping.identity("oidc", &json!({"email": "a@b.test"})),
            Err(ProviderError::IdentityIncomplete("subject"))
        );
        assert_eq!(
            mapping.identity("oidc", &json!({"sub": "x", "email": ""})),
            Err(ProviderError::IdentityIncomplete("email"))
        );
        assert!(matches!(
            mapping.identity("oidc", &json!({"sub": {"x": 1}, "email": "a@b.test"})),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn begin_embeds_state_and_scopes() {
        let provider = OAuth2Provider::from_config(&config(), http()).unwrap();
        let response = provider
            .begin(BeginRequest {
                desired_state: "opaque".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(response.state, "opaque");
        assert!(response
            .redirect_url
            .starts_with("https://git.test/login/oauth/authorize?"));
        assert!(response.redirect_url.contains("state=opaque"));
        assert!(response.redirect_url.contains("scope=read%3Auser+user%3Aemail"));
    }

    #[test]
    fn from_config_rejects_incomplete_settings() {
        let config = ProviderConfig::new(json!({"client_id": "cid"}));
        assert!(matches!(
            OAuth2Provider::from_config(&config, http()),
            Err(ProviderError::Configuration(_))
        ));
    }
}
