//! Persistence seams used by the SSO core.
//!
//! The core never talks to a database directly. It goes through these traits,
//! which have a Postgres implementation ([`pg::PgStore`]) and an in-memory one
//! ([`memory::MemoryStore`]) used by tests and local runs.

pub mod memory;
pub mod pg;

use crate::sso::ProviderConfig;
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Provider connection as stored by the configuration owner.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredProvider {
    pub provider_type: String,
    pub enabled: bool,
    pub config: ProviderConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAccount {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityLink {
    pub provider_type: String,
    pub subject: String,
    pub user_id: Uuid,
}

/// Server-side record backing a refresh token. Only the token hash is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: Vec<u8>,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// How a callback identity maps onto local rows, decided before any write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkPlan {
    /// A link for `(provider_type, subject)` already exists.
    Existing { user_id: Uuid },
    /// Link the identity to an account found by email.
    Link { link: IdentityLink },
    /// Create the account and its first link.
    Create {
        account: LocalAccount,
        link: IdentityLink,
    },
}

impl LinkPlan {
    #[must_use]
    pub fn user_id(&self) -> Uuid {
        match self {
            Self::Existing { user_id } => *user_id,
            Self::Link { link } => link.user_id,
            Self::Create { account, .. } => account.id,
        }
    }
}

/// Outcome of committing a login (mirrors a unique-violation race).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    Conflict,
}

/// Result of looking up a refresh token for use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshLookup {
    Active(SessionRecord),
    Expired,
    Missing,
}

#[async_trait]
pub trait ProviderConfigStore: Send + Sync {
    async fn load_provider(&self, provider_type: &str) -> Result<Option<StoredProvider>>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Local user id linked to `(provider_type, subject)`, if any.
    async fn find_link(&self, provider_type: &str, subject: &str) -> Result<Option<Uuid>>;

    /// Account with the given normalized email, if any.
    async fn find_account_by_email(&self, email: &str) -> Result<Option<LocalAccount>>;

    /// Apply `plan` and persist `session` as one unit.
    ///
    /// Returns `Conflict` without writing anything when a concurrent login
    /// created the same link or account first.
    async fn commit_login(&self, plan: &LinkPlan, session: &SessionRecord)
        -> Result<CommitOutcome>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &SessionRecord) -> Result<()>;

    /// Look up an unrevoked session by hash and, when active, stamp it and
    /// optionally swap its hash to `rotate_to`. Expired rows are removed.
    async fn use_session(
        &self,
        token_hash: &[u8],
        rotate_to: Option<&[u8]>,
        now: i64,
    ) -> Result<RefreshLookup>;

    /// Idempotent; deleting a missing session is not an error.
    async fn delete_session(&self, token_hash: &[u8]) -> Result<()>;

    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<u64>;

    async fn purge_expired(&self, now: i64) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}

/// Records consumed redirect-state nonces until their state would expire.
#[async_trait]
pub trait ReplayGuard: Send + Sync {
    /// Returns `false` if the nonce was already consumed.
    async fn consume(&self, nonce: &str, expires_at: i64, now: i64) -> Result<bool>;
}
