//! Identity provider contract and the built-in protocol families.
//!
//! A [`Provider`] is built per request from stored configuration. It turns an
//! opaque state string into an authorization URL on `begin`, and exchanges the
//! echoed callback for a verified [`Identity`] on `callback`.

mod http;
pub mod oauth2;
pub mod oidc;

pub use http::{ProviderHttp, DEFAULT_PROVIDER_TIMEOUT_SECONDS};

pub use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider configuration error: {0}")]
    Configuration(String),
    #[error("provider exchange failed: {0}")]
    ExchangeFailed(String),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("identity incomplete: missing {0}")]
    IdentityIncomplete(&'static str),
}

/// Opaque provider settings, deserialized by each factory into its own type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderConfig(serde_json::Value);

impl ProviderConfig {
    #[must_use]
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// # Errors
    /// Returns `Configuration` when the settings do not match `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ProviderError> {
        T::deserialize(&self.0).map_err(|err| ProviderError::Configuration(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub provider_type: String,
    pub supports_login: bool,
}

#[derive(Debug, Clone)]
pub struct BeginRequest {
    /// Opaque value the provider must echo back unchanged.
    pub desired_state: String,
}

#[derive(Debug, Clone)]
pub struct BeginResponse {
    pub redirect_url: String,
    pub state: String,
}

#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    pub state: String,
    pub code: Option<String>,
    /// Every query parameter the provider sent back.
    pub params: HashMap<String, String>,
}

/// Verified claims about the authenticating principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub provider_type: String,
    pub subject: String,
    pub email: String,
    pub email_verified: Option<bool>,
    pub display_name: Option<String>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn metadata(&self) -> ProviderMetadata;

    /// # Errors
    /// Returns `Configuration` when the stored settings are unusable.
    async fn begin(&self, request: BeginRequest) -> Result<BeginResponse, ProviderError>;

    /// # Errors
    /// Returns `ExchangeFailed`, `InvalidResponse` or `IdentityIncomplete`.
    async fn callback(&self, request: CallbackRequest) -> Result<Identity, ProviderError>;

    /// Liveness and configuration check.
    ///
    /// # Errors
    /// Returns the first failure encountered.
    async fn test(&self) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Sample {
        client_id: String,
        #[serde(default)]
        scopes: Vec<String>,
    }

    #[test]
    fn parse_typed_settings() -> Result<(), ProviderError> {
        let config = ProviderConfig::new(json!({"client_id": "abc"}));
        let sample: Sample = config.parse()?;
        assert_eq!(sample.client_id, "abc");
        assert!(sample.scopes.is_empty());
        Ok(())
    }

    #[test]
    fn parse_reports_configuration_error() {
        let config = ProviderConfig::new(json!({"scopes": ["openid"]}));
        let err = config.parse::<Sample>().err();
        assert!(matches!(err, Some(ProviderError::Configuration(msg)) if msg.contains("client_id")));
    }

    #[test]
    fn config_serializes_transparently() -> Result<(), serde_json::Error> {
        let value = json!({"issuer": "https://idp.test"});
        let config = ProviderConfig::new(value.clone());
        assert_eq!(serde_json::to_value(&config)?, value);
        Ok(())
    }
}
