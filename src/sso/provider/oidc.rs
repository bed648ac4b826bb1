//! OpenID Connect authorization-code provider.
//!
//! Endpoints come from `{issuer}/.well-known/openid-configuration`. The
//! identity is read from the userinfo endpoint with the default claim names.

use super::http::{authorization_url, callback_code, parse_endpoint, ClientCredentials};
use super::oauth2::ClaimMapping;
use super::{
    async_trait, BeginRequest, BeginResponse, CallbackRequest, Identity, Provider, ProviderConfig,
    ProviderError, ProviderHttp, ProviderMetadata,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const PROVIDER_TYPE: &str = "oidc";

const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
const DISCOVERY_ATTEMPTS: u32 = 3;
const DISCOVERY_CACHE_TTL_SECONDS: u64 = 60 * 60;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: Option<String>,
}

#[derive(Debug)]
struct CachedDiscovery {
    document: Arc<DiscoveryDocument>,
    fetched_at: Instant,
}

impl CachedDiscovery {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Discovery documents keyed by issuer, shared by every provider instance.
#[derive(Debug)]
pub struct DiscoveryCache {
    entries: RwLock<HashMap<String, CachedDiscovery>>,
    ttl: Duration,
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(DISCOVERY_CACHE_TTL_SECONDS),
        }
    }
}

impl DiscoveryCache {
    async fn get(&self, issuer: &str) -> Option<Arc<DiscoveryDocument>> {
        let entries = self.entries.read().await;
        entries
            .get(issuer)
            .filter(|entry| entry.is_fresh(self.ttl))
            .map(|entry| Arc::clone(&entry.document))
    }

    async fn insert(&self, issuer: &str, document: Arc<DiscoveryDocument>) {
        let mut entries = self.entries.write().await;
        entries.insert(
            issuer.to_string(),
            CachedDiscovery {
                document,
                fetched_at: Instant::now(),
            },
        );
    }
}

#[derive(Debug, Deserialize)]
struct OidcSettings {
    issuer: String,
    #[serde(flatten)]
    client: ClientCredentials,
    #[serde(default = "default_scopes")]
    scopes: Vec<String>,
}

fn default_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "email".to_string(),
        "profile".to_string(),
    ]
}

#[derive(Debug)]
pub struct OidcProvider {
    settings: OidcSettings,
    http: ProviderHttp,
    claims: ClaimMapping,
}

impl OidcProvider {
    /// # Errors
    /// Returns `Configuration` when settings are missing or the issuer is not
    /// a URL.
    pub fn from_config(config: &ProviderConfig, http: ProviderHttp) -> Result<Self, ProviderError> {
        let mut settings: OidcSettings = config.parse()?;
        settings.client.validate()?;
        parse_endpoint("issuer", &settings.issuer)?;
        settings.issuer = settings.issuer.trim_end_matches('/').to_string();
        Ok(Self {
            settings,
            http,
            claims: ClaimMapping::default(),
        })
    }

    /// Discovery document for the configured issuer, fetched with backoff on
    /// the first use and cached afterwards.
    ///
    /// # Errors
    /// Returns `Configuration` when discovery keeps failing or the document
    /// names another issuer.
    pub async fn discover(&self) -> Result<Arc<DiscoveryDocument>, ProviderError> {
        let issuer = self.settings.issuer.as_str();
        if let Some(document) = self.http.discovery().get(issuer).await {
            return Ok(document);
        }

        let url = format!("{issuer}{DISCOVERY_PATH}");
        let mut delay = self.http.retry_base();
        let mut attempt = 1;
        let document: DiscoveryDocument = loop {
            match self.http.get_json(&url).await {
                Ok(document) => break document,
                Err(err) if attempt < DISCOVERY_ATTEMPTS => {
                    warn!(issuer = %issuer, attempt, error = %err, "OIDC discovery failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => {
                    return Err(ProviderError::Configuration(format!(
                        "discovery failed for {issuer}: {err}"
                    )));
                }
            }
        };

        if document.issuer.trim_end_matches('/') != issuer {
            return Err(ProviderError::Configuration(format!(
                "discovery issuer mismatch: expected {issuer}, got {}",
                document.issuer
            )));
        }
        parse_endpoint("authorization_endpoint", &document.authorization_endpoint)?;
        parse_endpoint("token_endpoint", &document.token_endpoint)?;

        debug!(issuer = %issuer, "OIDC discovery document cached");
        let document = Arc::new(document);
        self.http
            .discovery()
            .insert(issuer, Arc::clone(&document))
            .await;
        Ok(document)
    }
}

#[async_trait]
impl Provider for OidcProvider {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            provider_type: PROVIDER_TYPE.to_string(),
            supports_login: true,
        }
    }

    async fn begin(&self, request: BeginRequest) -> Result<BeginResponse, ProviderError> {
        let document = self.discover().await?;
        let redirect_url = authorization_url(
            &document.authorization_endpoint,
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
        let document = self.discover().await?;
        let userinfo_endpoint = document.userinfo_endpoint.as_deref().ok_or_else(|| {
            ProviderError::Configuration("issuer has no userinfo_endpoint".to_string())
        })?;

        let access_token = self
            .http
            .exchange_code(&document.token_endpoint, &self.settings.client, &code)
            .await?;
        let claims = self
            .http
            .fetch_userinfo(userinfo_endpoint, &access_token)
            .await?;
        self.claims.identity(PROVIDER_TYPE, &claims)
    }

    async fn test(&self) -> Result<(), ProviderError> {
        let document = self.discover().await?;
        if document.userinfo_endpoint.is_none() {
            return Err(ProviderError::Configuration(
                "issuer has no userinfo_endpoint".to_string(),
            ));
        }
        Ok(())
    }
}
