//! Begin/Callback orchestration.
//!
//! ```text
//! Idle -> AwaitingCallback -> Resolved
//!   \            \
//!    `-> Failed   `-> Failed
//! ```
//!
//! Nothing is kept between the two legs; the sealed [`RedirectState`] carries
//! the context. The only write on callback is the final `commit_login`, so a
//! failure at any earlier step leaves no account, link or session behind.

use super::provider::{BeginRequest, CallbackRequest, Provider};
use super::registry::ProviderRegistry;
use super::resolve::{plan_link, LinkPolicy};
use super::state::{RedirectState, StateCodec, DEFAULT_STATE_TTL_SECONDS};
use super::SsoError;
use crate::clock::{Clock, SystemClock};
use crate::store::memory::MemoryReplayGuard;
use crate::store::{AccountStore, CommitOutcome, ProviderConfigStore, ReplayGuard};
use crate::token::TokenService;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

const COMMIT_ATTEMPTS: usize = 2;

#[derive(Clone, Debug)]
pub struct SsoConfig {
    state_ttl_seconds: u64,
    allowed_redirect_origins: Vec<String>,
    link_policy: LinkPolicy,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SsoConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state_ttl_seconds: DEFAULT_STATE_TTL_SECONDS,
            allowed_redirect_origins: Vec::new(),
            link_policy: LinkPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_state_ttl_seconds(mut self, seconds: u64) -> Self {
        self.state_ttl_seconds = seconds;
        self
    }

    /// Absolute redirect targets are accepted only for these origins.
    #[must_use]
    pub fn with_allowed_redirect_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_redirect_origins = origins
            .iter()
            .map(|origin| normalize_origin(origin))
            .filter(|origin| !origin.is_empty())
            .collect();
        self
    }

    #[must_use]
    pub fn with_link_policy(mut self, policy: LinkPolicy) -> Self {
        self.link_policy = policy;
        self
    }

    #[must_use]
    pub fn state_ttl_seconds(&self) -> u64 {
        self.state_ttl_seconds
    }

    #[must_use]
    pub fn allowed_redirect_origins(&self) -> &[String] {
        &self.allowed_redirect_origins
    }

    #[must_use]
    pub fn link_policy(&self) -> LinkPolicy {
        self.link_policy
    }
}

fn normalize_origin(origin: &str) -> String {
    Url::parse(origin.trim()).map_or_else(
        |_| origin.trim().trim_end_matches('/').to_string(),
        |url| url.origin().ascii_serialization(),
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowStage {
    Idle,
    AwaitingCallback,
    Resolved,
    Failed,
}

impl FlowStage {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingCallback => "awaiting_callback",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BeginOutcome {
    pub redirect_url: String,
    pub state: String,
}

#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub access_token: String,
    pub refresh_token: String,
    pub redirect_target: String,
    pub user_id: Uuid,
    pub session_id: Uuid,
    /// Seconds until the access token expires.
    pub expires_in: i64,
}

pub struct SsoManager {
    config: SsoConfig,
    codec: StateCodec,
    registry: Arc<ProviderRegistry>,
    providers: Arc<dyn ProviderConfigStore>,
    accounts: Arc<dyn AccountStore>,
    replay: Arc<dyn ReplayGuard>,
    tokens: Arc<TokenService>,
    clock: Arc<dyn Clock>,
}

impl SsoManager {
    /// Manager with an in-process replay guard and the system clock.
    #[must_use]
    pub fn new(
        config: SsoConfig,
        state_key: &[u8; 32],
        registry: Arc<ProviderRegistry>,
        providers: Arc<dyn ProviderConfigStore>,
        accounts: Arc<dyn AccountStore>,
        tokens: Arc<TokenService>,
    ) -> Self {
        let codec = StateCodec::new(state_key, Duration::from_secs(config.state_ttl_seconds));
        Self {
            config,
            codec,
            registry,
            providers,
            accounts,
            replay: Arc::new(MemoryReplayGuard::default()),
            tokens,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_replay_guard(mut self, replay: Arc<dyn ReplayGuard>) -> Self {
        self.replay = replay;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    /// Start a login: seal the request context and ask the provider for its
    /// authorization URL.
    ///
    /// # Errors
    /// Returns `InvalidRedirect`, `ProviderNotFound`, `ProviderDisabled` or
    /// `Configuration`.
    #[instrument(skip(self))]
    pub async fn begin(
        &self,
        provider_type: &str,
        redirect_target: &str,
    ) -> Result<BeginOutcome, SsoError> {
        debug!(stage = %FlowStage::Idle, "sso begin");
        match self.try_begin(provider_type, redirect_target).await {
            Ok(outcome) => {
                info!(stage = %FlowStage::AwaitingCallback, "redirecting to provider");
                Ok(outcome)
            }
            Err(err) => {
                warn!(stage = %FlowStage::Failed, error = %err, "sso begin failed");
                Err(err)
            }
        }
    }

    async fn try_begin(
        &self,
        provider_type: &str,
        redirect_target: &str,
    ) -> Result<BeginOutcome, SsoError> {
        let redirect_target = self.validate_redirect(redirect_target)?;
        let provider = self.load_provider(provider_type).await?;

        let state = RedirectState::new(provider_type, redirect_target, self.clock.now_unix())?;
        let token = self.codec.encode(&state)?;

        let response = provider
            .begin(BeginRequest {
                desired_state: token.clone(),
            })
            .await?;
        if response.state != token {
            return Err(SsoError::Configuration(
                "provider did not keep the state value".to_string(),
            ));
        }

        Ok(BeginOutcome {
            redirect_url: response.redirect_url,
            state: token,
        })
    }

    /// Finish a login from the provider's callback parameters.
    ///
    /// The state is decoded, bound to `provider_type` and consumed before the
    /// provider is contacted.
    ///
    /// # Errors
    /// Returns a state error, a provider error, an account resolution error,
    /// or `Storage`/`Token` for internal failures.
    #[instrument(skip(self, raw_state, params))]
    pub async fn callback(
        &self,
        provider_type: &str,
        raw_state: &str,
        params: HashMap<String, String>,
    ) -> Result<CallbackOutcome, SsoError> {
        debug!(stage = %FlowStage::AwaitingCallback, "sso callback");
        match self.try_callback(provider_type, raw_state, params).await {
            Ok(outcome) => {
                info!(
                    stage = %FlowStage::Resolved,
                    user_id = %outcome.user_id,
                    session_id = %outcome.session_id,
                    "sso login resolved"
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(stage = %FlowStage::Failed, error = %err, "sso callback failed");
                Err(err)
            }
        }
    }

    async fn try_callback(
        &self,
        provider_type: &str,
        raw_state: &str,
        params: HashMap<String, String>,
    ) -> Result<CallbackOutcome, SsoError> {
        let now = self.clock.now_unix();
        let state = self.codec.decode_at(raw_state, now)?;

        if state.provider_type != provider_type {
            return Err(SsoError::StateProviderMismatch {
                expected: state.provider_type,
                actual: provider_type.to_string(),
            });
        }

        let expires_at = self.codec.expires_at(state.issued_at);
        if !self.replay.consume(&state.nonce, expires_at, now).await? {
            return Err(SsoError::StateReplayed);
        }

        let provider = self.load_provider(provider_type).await?;
        let code = params.get("code").cloned();
        let mut identity = provider
            .callback(CallbackRequest {
                state: raw_state.to_string(),
                code,
                params,
            })
            .await?;
        // Links are keyed by the connection's type, whatever the provider reports.
        identity.provider_type = provider_type.to_string();

        for attempt in 1..=COMMIT_ATTEMPTS {
            let plan = plan_link(self.accounts.as_ref(), &identity, self.config.link_policy).await?;
            let user_id = plan.user_id();
            let issued = self.tokens.mint_session(user_id)?;
            let access = self
                .tokens
                .issue_access_token(user_id, Some(issued.session.id))?;

            match self.accounts.commit_login(&plan, &issued.session).await? {
                CommitOutcome::Committed => {
                    return Ok(CallbackOutcome {
                        access_token: access.token,
                        refresh_token: issued.refresh_token,
                        redirect_target: state.redirect_target,
                        user_id,
                        session_id: issued.session.id,
                        expires_in: access.expires_at.saturating_sub(now),
                    });
                }
                CommitOutcome::Conflict => {
                    debug!(attempt, "concurrent login won the commit, resolving again");
                }
            }
        }

        Err(SsoError::Storage(anyhow::anyhow!(
            "login commit conflicted {COMMIT_ATTEMPTS} times"
        )))
    }

    /// Build the stored connection for `provider_type` and run its
    /// liveness check.
    ///
    /// # Errors
    /// Returns the same lookup errors as `begin`, or the provider's failure.
    #[instrument(skip(self))]
    pub async fn test_provider(&self, provider_type: &str) -> Result<(), SsoError> {
        let provider = self.load_provider(provider_type).await?;
        provider.test().await?;
        debug!("provider check passed");
        Ok(())
    }

    async fn load_provider(&self, provider_type: &str) -> Result<Arc<dyn Provider>, SsoError> {
        let stored = self
            .providers
            .load_provider(provider_type)
            .await?
            .ok_or_else(|| SsoError::ProviderNotFound(provider_type.to_string()))?;
        if !stored.enabled {
            return Err(SsoError::ProviderDisabled(provider_type.to_string()));
        }

        let descriptor = self
            .registry
            .descriptor(provider_type)
            .ok_or_else(|| SsoError::ProviderNotFound(provider_type.to_string()))?;
        if !descriptor.supports_login() {
            return Err(SsoError::ProviderDisabled(provider_type.to_string()));
        }

        let provider = self.registry.build(provider_type, stored.config)?;
        if !provider.metadata().supports_login {
            return Err(SsoError::ProviderDisabled(provider_type.to_string()));
        }
        Ok(provider)
    }

    /// Accept a same-site path or an absolute URL on an allow-listed origin.
    fn validate_redirect<'a>(&self, target: &'a str) -> Result<&'a str, SsoError> {
        let target = target.trim();
        if target.is_empty() || target.chars().any(|c| c.is_control() || c == '\\') {
            return Err(SsoError::InvalidRedirect);
        }

        if target.starts_with('/') {
            return if target.starts_with("//") {
                Err(SsoError::InvalidRedirect)
            } else {
                Ok(target)
            };
        }

        let url = Url::parse(target).map_err(|_| SsoError::InvalidRedirect)?;
        if !matches!(url.scheme(), "https" | "http") {
            return Err(SsoError::InvalidRedirect);
        }
        let origin = url.origin().ascii_serialization();
        if self
            .config
            .allowed_redirect_origins
            .iter()
            .any(|allowed| *allowed == origin)
        {
            Ok(target)
        } else {
            Err(SsoError::InvalidRedirect)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sso::provider::{
        async_trait, BeginResponse, Identity, ProviderConfig, ProviderError, ProviderMetadata,
    };
    use crate::sso::registry::ProviderDescriptor;
    use crate::store::memory::MemoryStore;
    use crate::store::{LinkPlan, LocalAccount, SessionRecord};
    use crate::token::TokenConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NOW: i64 = 1_700_000_000;
    const KEY: [u8; 32] = [5u8; 32];

    struct StubProvider {
        identity: Result<Identity, ProviderError>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn metadata(&self) -> ProviderMetadata {
            ProviderMetadata {
                provider_type: "oidc".to_string(),
                supports_login: true,
            }
        }

        async fn begin(&self, request: BeginRequest) -> Result<BeginResponse, ProviderError> {
            let mut url = Url::parse("https://idp.test/authorize").unwrap();
            url.query_pairs_mut()
                .append_pair("state", &request.desired_state);
            Ok(BeginResponse {
                redirect_url: url.into(),
                state: request.desired_state,
            })
        }

        async fn callback(&self, _request: CallbackRequest) -> Result<Identity, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.identity.clone()
        }

        async fn test(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    /// Account store that reports a lost race on the first commit.
    struct ConflictOnce {
        inner: Arc<MemoryStore>,
        conflicts: AtomicUsize,
    }

    #[async_trait]
    impl AccountStore for ConflictOnce {
        async fn find_link(&self, provider_type: &str, subject: &str) -> anyhow::Result<Option<Uuid>> {
            self.inner.find_link(provider_type, subject).await
        }

        async fn find_account_by_email(&self, email: &str) -> anyhow::Result<Option<LocalAccount>> {
            self.inner.find_account_by_email(email).await
        }

        async fn commit_login(
            &self,
            plan: &LinkPlan,
            session: &SessionRecord,
        ) -> anyhow::Result<CommitOutcome> {
            if self.conflicts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(CommitOutcome::Conflict);
            }
            self.inner.commit_login(plan, session).await
        }
    }

    struct Harness {
        manager: SsoManager,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        calls: Arc<AtomicUsize>,
    }

    fn identity(subject: &str, email: &str) -> Identity {
        Identity {
            provider_type: "oidc".to_string(),
            subject: subject.to_string(),
            email: email.to_string(),
            email_verified: Some(true),
            display_name: None,
        }
    }

    async fn harness_with(
        identity: Result<Identity, ProviderError>,
        config: SsoConfig,
        accounts: Option<Arc<dyn AccountStore>>,
    ) -> Harness {
        let clock = Arc::new(ManualClock::new(NOW));
        let store = Arc::new(MemoryStore::new());
        store
            .insert_provider("oidc", true, ProviderConfig::new(json!({})))
            .await;
        store
            .insert_provider("oauth2", true, ProviderConfig::new(json!({})))
            .await;
        store
            .insert_provider("legacy", false, ProviderConfig::new(json!({})))
            .await;

        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ProviderRegistry::new();
        for provider_type in ["oidc", "oauth2", "legacy"] {
            let identity = identity.clone();
            let calls = Arc::clone(&calls);
            registry
                .register(ProviderDescriptor::new(provider_type, true, move |_| {
                    Ok(Arc::new(StubProvider {
                        identity: identity.clone(),
                        calls: Arc::clone(&calls),
                    }) as Arc<dyn Provider>)
                }))
                .unwrap();
        }
        registry
            .register(ProviderDescriptor::new("directory", false, |_| {
                Err(ProviderError::Configuration("unused".to_string()))
            }))
            .unwrap();
        store
            .insert_provider("directory", true, ProviderConfig::new(json!({})))
            .await;

        let tokens = Arc::new(
            TokenService::new(TokenConfig::new(), &[9u8; 32], store.clone())
                .unwrap()
                .with_clock(clock.clone()),
        );
        let accounts = accounts.unwrap_or_else(|| store.clone() as Arc<dyn AccountStore>);
        let manager = SsoManager::new(
            config,
            &KEY,
            Arc::new(registry),
            store.clone(),
            accounts,
            tokens,
        )
        .with_clock(clock.clone());

        Harness {
            manager,
            store,
            clock,
            calls,
        }
    }

    async fn harness() -> Harness {
        harness_with(
            Ok(identity("sub-123", "user@example.com")),
            SsoConfig::new(),
            None,
        )
        .await
    }

    fn state_of(outcome: &BeginOutcome) -> String {
        let url = Url::parse(&outcome.redirect_url).unwrap();
        url.query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .unwrap()
    }

    #[tokio::test]
    async fn begin_embeds_state_in_provider_url() {
        let h = harness().await;
        let outcome = h.manager.begin("oidc", "/app").await.unwrap();
        assert!(outcome.redirect_url.starts_with("https://idp.test/authorize?"));
        assert_eq!(state_of(&outcome), outcome.state);
    }

    #[tokio::test]
    async fn begin_rejects_unsafe_redirects() {
        let config = SsoConfig::new()
            .with_allowed_redirect_origins(vec!["https://app.example.com/".to_string()]);
        let h = harness_with(Ok(identity("s", "user@example.com")), config, None).await;

        for target in [
            "",
            "//evil.test/app",
            "https://evil.test/app",
            "javascript:alert(1)",
            "/app\\..",
            "app",
        ] {
            assert!(
                matches!(
                    h.manager.begin("oidc", target).await,
                    Err(SsoError::InvalidRedirect)
                ),
                "{target}"
            );
        }
        assert!(h
            .manager
            .begin("oidc", "https://app.example.com/home?x=1")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn begin_reports_missing_and_disabled_providers() {
        let h = harness().await;
        assert!(matches!(
            h.manager.begin("saml", "/app").await,
            Err(SsoError::ProviderNotFound(_))
        ));
        assert!(matches!(
            h.manager.begin("legacy", "/app").await,
            Err(SsoError::ProviderDisabled(_))
        ));
        assert!(matches!(
            h.manager.begin("directory", "/app").await,
            Err(SsoError::ProviderDisabled(_))
        ));
    }

    #[tokio::test]
    async fn callback_links_existing_account_by_email() {
        let h = harness().await;
        let user_id = h.store.insert_account("user@example.com", None).await;

        let begin = h.manager.begin("oidc", "/app").await.unwrap();
        let outcome = h
            .manager
            .callback("oidc", &begin.state, HashMap::from([("code".to_string(), "c".to_string())]))
            .await
            .unwrap();

        assert_eq!(outcome.user_id, user_id);
        assert_eq!(outcome.redirect_target, "/app");
        assert!(!outcome.access_token.is_empty());
        assert!(!outcome.refresh_token.is_empty());
        assert_eq!(outcome.expires_in, TokenConfig::new().access_ttl_seconds());
        assert_eq!(h.store.session_count().await, 1);
        assert_eq!(h.store.link_count().await, 1);

        let claims = h
            .manager
            .tokens()
            .validate_access_token(&outcome.access_token)
            .unwrap();
        assert_eq!(claims.user_id(), user_id);
    }

    #[tokio::test]
    async fn callback_rejects_provider_mismatch_before_exchange() {
        let h = harness().await;
        let begin = h.manager.begin("oidc", "/app").await.unwrap();

        let err = h
            .manager
            .callback("oauth2", &begin.state, HashMap::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SsoError::StateProviderMismatch { ref expected, ref actual }
                if expected == "oidc" && actual == "oauth2"
        ));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn callback_rejects_altered_state_before_exchange() {
        let h = harness().await;
        let begin = h.manager.begin("oidc", "/app").await.unwrap();
        let mut chars: Vec<char> = begin.state.chars().collect();
        let mid = chars.len() / 2;
        chars[mid] = if chars[mid] == 'x' { 'y' } else { 'x' };
        let altered: String = chars.into_iter().collect();

        let err = h
            .manager
            .callback("oidc", &altered, HashMap::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SsoError::TamperedState | SsoError::MalformedState
        ));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn callback_rejects_expired_and_replayed_state() {
        let h = harness().await;
        h.store.insert_account("user@example.com", None).await;

        let stale = h.manager.begin("oidc", "/app").await.unwrap();
        let fresh = h.manager.begin("oidc", "/app").await.unwrap();
        h.clock.advance(i64::try_from(DEFAULT_STATE_TTL_SECONDS).unwrap());

        assert!(h
            .manager
            .callback("oidc", &fresh.state, HashMap::new())
            .await
            .is_ok());
        assert!(matches!(
            h.manager.callback("oidc", &fresh.state, HashMap::new()).await,
            Err(SsoError::StateReplayed)
        ));

        h.clock.advance(1);
        assert!(matches!(
            h.manager.callback("oidc", &stale.state, HashMap::new()).await,
            Err(SsoError::ExpiredState)
        ));
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_exchange_leaves_no_rows() {
        let h = harness_with(
            Err(ProviderError::ExchangeFailed("timeout".to_string())),
            SsoConfig::new(),
            None,
        )
        .await;
        let begin = h.manager.begin("oidc", "/app").await.unwrap();
        assert!(matches!(
            h.manager.callback("oidc", &begin.state, HashMap::new()).await,
            Err(SsoError::ProviderExchangeFailed(_))
        ));
        assert_eq!(h.store.session_count().await, 0);
        assert_eq!(h.store.link_count().await, 0);
    }

    #[tokio::test]
    async fn closed_signup_fails_without_rows() {
        let config = SsoConfig::new().with_link_policy(LinkPolicy {
            allow_signup: false,
            ..LinkPolicy::default()
        });
        let h = harness_with(Ok(identity("sub-1", "nobody@example.com")), config, None).await;
        let begin = h.manager.begin("oidc", "/app").await.unwrap();
        assert!(matches!(
            h.manager.callback("oidc", &begin.state, HashMap::new()).await,
            Err(SsoError::AccountNotFound)
        ));
        assert_eq!(h.store.session_count().await, 0);
    }

    #[tokio::test]
    async fn callback_creates_account_when_signup_allowed() {
        let h = harness_with(
            Ok(identity("sub-new", "New@Example.com")),
            SsoConfig::new(),
            None,
        )
        .await;
        let begin = h.manager.begin("oidc", "/welcome").await.unwrap();
        let outcome = h
            .manager
            .callback("oidc", &begin.state, HashMap::new())
            .await
            .unwrap();

        let account = h
            .store
            .find_account_by_email("new@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.id, outcome.user_id);
        assert_eq!(outcome.redirect_target, "/welcome");
    }

    #[tokio::test]
    async fn commit_conflict_is_retried_once() {
        let store = Arc::new(MemoryStore::new());
        let racing: Arc<dyn AccountStore> = Arc::new(ConflictOnce {
            inner: store.clone(),
            conflicts: AtomicUsize::new(0),
        });
        let h = harness_with(
            Ok(identity("sub-race", "race@example.com")),
            SsoConfig::new(),
            Some(racing),
        )
        .await;

        let begin = h.manager.begin("oidc", "/app").await.unwrap();
        let outcome = h
            .manager
            .callback("oidc", &begin.state, HashMap::new())
            .await
            .unwrap();
        assert_eq!(store.link_count().await, 1);
        assert_eq!(store.session_count().await, 1);
        assert_eq!(
            store.find_link("oidc", "sub-race").await.unwrap(),
            Some(outcome.user_id)
        );
    }

    #[tokio::test]
    async fn test_provider_checks_stored_connection() {
        let h = harness().await;
        h.manager.test_provider("oidc").await.unwrap();
        assert!(matches!(
            h.manager.test_provider("legacy").await,
            Err(SsoError::ProviderDisabled(_))
        ));
        assert!(matches!(
            h.manager.test_provider("saml").await,
            Err(SsoError::ProviderNotFound(_))
        ));
    }

    #[test]
    fn config_normalizes_origins() {
        let config = SsoConfig::new().with_allowed_redirect_origins(vec![
            "https://App.Example.com/".to_string(),
            "http://localhost:5173/path".to_string(),
            " ".to_string(),
        ]);
        assert_eq!(
            config.allowed_redirect_origins(),
            ["https://app.example.com", "http://localhost:5173"]
        );
    }
}
