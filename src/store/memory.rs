//! In-process stores for tests and single-node development runs.

use super::{
    AccountStore, CommitOutcome, IdentityLink, LinkPlan, LocalAccount, ProviderConfigStore,
    RefreshLookup, ReplayGuard, SessionRecord, SessionStore, StoredProvider,
};
use crate::sso::ProviderConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<Uuid, LocalAccount>,
    links: HashMap<(String, String), Uuid>,
    sessions: HashMap<Vec<u8>, SessionRecord>,
    providers: HashMap<String, StoredProvider>,
}

impl Tables {
    fn email_taken(&self, email: &str) -> bool {
        self.accounts.values().any(|account| account.email == email)
    }

    fn insert_link(&mut self, link: &IdentityLink) {
        self.links.insert(
            (link.provider_type.clone(), link.subject.clone()),
            link.user_id,
        );
    }
}

/// All four stores behind one lock, so `commit_login` is trivially atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_account(&self, email: &str, display_name: Option<&str>) -> Uuid {
        let id = Uuid::now_v7();
        let mut tables = self.tables.lock().await;
        tables.accounts.insert(
            id,
            LocalAccount {
                id,
                email: crate::sso::normalize_email(email),
                display_name: display_name.map(ToString::to_string),
            },
        );
        id
    }

    pub async fn insert_provider(&self, provider_type: &str, enabled: bool, config: ProviderConfig) {
        let mut tables = self.tables.lock().await;
        tables.providers.insert(
            provider_type.to_string(),
            StoredProvider {
                provider_type: provider_type.to_string(),
                enabled,
                config,
            },
        );
    }

    pub async fn link_identity(&self, provider_type: &str, subject: &str, user_id: Uuid) {
        let mut tables = self.tables.lock().await;
        tables.insert_link(&IdentityLink {
            provider_type: provider_type.to_string(),
            subject: subject.to_string(),
            user_id,
        });
    }

    pub async fn session_count(&self) -> usize {
        self.tables.lock().await.sessions.len()
    }

    pub async fn link_count(&self) -> usize {
        self.tables.lock().await.links.len()
    }
}

#[async_trait]
impl ProviderConfigStore for MemoryStore {
    async fn load_provider(&self, provider_type: &str) -> Result<Option<StoredProvider>> {
        Ok(self.tables.lock().await.providers.get(provider_type).cloned())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_link(&self, provider_type: &str, subject: &str) -> Result<Option<Uuid>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .links
            .get(&(provider_type.to_string(), subject.to_string()))
            .copied())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<LocalAccount>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn commit_login(&self, plan: &LinkPlan, session: &SessionRecord) -> Result<CommitOutcome> {
        let mut tables = self.tables.lock().await;
        if tables.sessions.contains_key(&session.token_hash) {
            return Err(anyhow!("duplicate session token hash"));
        }

        match plan {
            LinkPlan::Existing { user_id } => {
                if !tables.accounts.contains_key(user_id) {
                    return Err(anyhow!("linked account {user_id} does not exist"));
                }
            }
            LinkPlan::Link { link } => {
                let key = (link.provider_type.clone(), link.subject.clone());
                if tables.links.contains_key(&key) {
                    return Ok(CommitOutcome::Conflict);
                }
                if !tables.accounts.contains_key(&link.user_id) {
                    return Err(anyhow!("account {} does not exist", link.user_id));
                }
                tables.insert_link(link);
            }
            LinkPlan::Create { account, link } => {
                let key = (link.provider_type.clone(), link.subject.clone());
                if tables.links.contains_key(&key) || tables.email_taken(&account.email) {
                    return Ok(CommitOutcome::Conflict);
                }
                tables.accounts.insert(account.id, account.clone());
                tables.insert_link(link);
            }
        }

        tables
            .sessions
            .insert(session.token_hash.clone(), session.clone());
        Ok(CommitOutcome::Committed)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &SessionRecord) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.sessions.contains_key(&session.token_hash) {
            return Err(anyhow!("duplicate session token hash"));
        }
        tables
            .sessions
            .insert(session.token_hash.clone(), session.clone());
        Ok(())
    }

    async fn use_session(
        &self,
        token_hash: &[u8],
        rotate_to: Option<&[u8]>,
        now: i64,
    ) -> Result<RefreshLookup> {
        let mut tables = self.tables.lock().await;
        let Some(mut session) = tables.sessions.remove(token_hash) else {
            return Ok(RefreshLookup::Missing);
        };
        if session.expires_at <= now {
            return Ok(RefreshLookup::Expired);
        }

        if let Some(next) = rotate_to {
            session.token_hash = next.to_vec();
        }
        tables
            .sessions
            .insert(session.token_hash.clone(), session.clone());
        Ok(RefreshLookup::Active(session))
    }

    async fn delete_session(&self, token_hash: &[u8]) -> Result<()> {
        self.tables.lock().await.sessions.remove(token_hash);
        Ok(())
    }

    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, session| session.user_id != user_id);
        Ok(u64::try_from(before - tables.sessions.len()).unwrap_or(u64::MAX))
    }

    async fn purge_expired(&self, now: i64) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, session| session.expires_at > now);
        Ok(u64::try_from(before - tables.sessions.len()).unwrap_or(u64::MAX))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Consumed nonces held in memory; evicts entries whose state has expired.
#[derive(Debug, Default)]
pub struct MemoryReplayGuard {
    seen: Mutex<HashMap<String, i64>>,
}

#[async_trait]
impl ReplayGuard for MemoryReplayGuard {
    async fn consume(&self, nonce: &str, expires_at: i64, now: i64) -> Result<bool> {
        let mut seen = self.seen.lock().await;
        seen.retain(|_, expiry| *expiry >= now);
        if seen.contains_key(nonce) {
            return Ok(false);
        }
        seen.insert(nonce.to_string(), expires_at);
        Ok(true)
    }
}
