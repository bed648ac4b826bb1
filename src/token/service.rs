use super::{AccessClaims, AccessToken, AccessTokenSigner, TokenError};
use crate::clock::{Clock, SystemClock};
use crate::store::{RefreshLookup, SessionRecord, SessionStore};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

pub const DEFAULT_ISSUER: &str = "https://sso.passaggio.dev";
pub const DEFAULT_AUDIENCE: &str = "passaggio";
pub const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct TokenConfig {
    issuer: String,
    audience: String,
    access_ttl_seconds: i64,
    session_ttl_seconds: i64,
    rotate_refresh_tokens: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            rotate_refresh_tokens: true,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: String) -> Self {
        self.audience = audience;
        self
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_rotate_refresh_tokens(mut self, rotate: bool) -> Self {
        self.rotate_refresh_tokens = rotate;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn rotate_refresh_tokens(&self) -> bool {
        self.rotate_refresh_tokens
    }
}

/// A freshly minted session and the raw refresh token handed to the client.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub refresh_token: String,
    pub session: SessionRecord,
}

#[derive(Debug, Clone)]
pub struct Refreshed {
    pub access_token: AccessToken,
    /// The rotated refresh token, or the presented one when rotation is off.
    pub refresh_token: String,
    pub user_id: Uuid,
    pub session_id: Uuid,
}

pub struct TokenService {
    config: TokenConfig,
    signer: AccessTokenSigner,
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    /// # Errors
    /// Returns `InvalidKey` if the signing seed is rejected.
    pub fn new(
        config: TokenConfig,
        signing_seed: &[u8; 32],
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self, TokenError> {
        let signer = AccessTokenSigner::from_seed(
            signing_seed,
            config.issuer(),
            config.audience(),
            config.access_ttl_seconds(),
        )?;
        Ok(Self {
            config,
            signer,
            sessions,
            clock: Arc::new(SystemClock),
        })
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// # Errors
    /// Returns an error if signing fails.
    pub fn issue_access_token(
        &self,
        user_id: Uuid,
        session_id: Option<Uuid>,
    ) -> Result<AccessToken, TokenError> {
        self.signer
            .sign_at(user_id, session_id, self.clock.now_unix())
    }

    /// # Errors
    /// Returns `Expired` or `InvalidSignature`.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.signer.verify_at(token, self.clock.now_unix())
    }

    /// Mint a session without persisting it, for callers that commit it
    /// together with other rows.
    ///
    /// # Errors
    /// Returns `Entropy` if the OS RNG is unavailable.
    pub fn mint_session(&self, user_id: Uuid) -> Result<IssuedSession, TokenError> {
        let now = self.clock.now_unix();
        let refresh_token = generate_refresh_token()?;
        let session = SessionRecord {
            id: Uuid::now_v7(),
            user_id,
            token_hash: hash_refresh_token(&refresh_token),
            issued_at: now,
            expires_at: now.saturating_add(self.config.session_ttl_seconds),
        };
        Ok(IssuedSession {
            refresh_token,
            session,
        })
    }

    /// # Errors
    /// Returns an error if minting or persisting the session fails.
    #[instrument(skip(self))]
    pub async fn issue_session(&self, user_id: Uuid) -> Result<IssuedSession, TokenError> {
        let issued = self.mint_session(user_id)?;
        self.sessions.insert_session(&issued.session).await?;
        debug!(session_id = %issued.session.id, "session issued");
        Ok(issued)
    }

    /// Exchange a refresh token for a new access token, rotating the refresh
    /// token when configured.
    ///
    /// # Errors
    /// Returns `SessionNotFound` for unknown or revoked tokens and
    /// `SessionExpired` once the session TTL has passed.
    #[instrument(skip_all)]
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<Refreshed, TokenError> {
        let presented = refresh_token.trim();
        if presented.is_empty() {
            return Err(TokenError::SessionNotFound);
        }

        let now = self.clock.now_unix();
        let token_hash = hash_refresh_token(presented);
        let rotated = if self.config.rotate_refresh_tokens {
            Some(generate_refresh_token()?)
        } else {
            None
        };
        let rotated_hash = rotated.as_deref().map(hash_refresh_token);

        match self
            .sessions
            .use_session(&token_hash, rotated_hash.as_deref(), now)
            .await?
        {
            RefreshLookup::Active(session) => {
                let access_token = self.signer.sign_at(session.user_id, Some(session.id), now)?;
                debug!(session_id = %session.id, rotated = rotated.is_some(), "session refreshed");
                Ok(Refreshed {
                    access_token,
                    refresh_token: rotated.unwrap_or_else(|| presented.to_string()),
                    user_id: session.user_id,
                    session_id: session.id,
                })
            }
            RefreshLookup::Expired => Err(TokenError::SessionExpired),
            RefreshLookup::Missing => Err(TokenError::SessionNotFound),
        }
    }

    /// Revoke the session behind `refresh_token`. Revoking twice is fine.
    ///
    /// # Errors
    /// Returns an error only when the store fails.
    #[instrument(skip_all)]
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), TokenError> {
        let token_hash = hash_refresh_token(refresh_token.trim());
        self.sessions.delete_session(&token_hash).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error only when the store fails.
    #[instrument(skip(self))]
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64, TokenError> {
        Ok(self.sessions.delete_user_sessions(user_id).await?)
    }

    /// # Errors
    /// Returns an error when the store fails.
    pub async fn purge_expired(&self) -> Result<u64, TokenError> {
        Ok(self.sessions.purge_expired(self.clock.now_unix()).await?)
    }

    /// # Errors
    /// Returns an error when the session store is unreachable.
    pub async fn ping_store(&self) -> Result<(), TokenError> {
        Ok(self.sessions.ping().await?)
    }
}

/// Create a new refresh token. Only its hash is persisted.
///
/// # Errors
/// Returns `Entropy` if the OS RNG fails.
pub fn generate_refresh_token() -> Result<String, TokenError> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| TokenError::Entropy)?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Hash a refresh token so raw values never touch the database.
#[must_use]
pub fn hash_refresh_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}
