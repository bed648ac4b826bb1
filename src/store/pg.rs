//! Postgres-backed stores. Schema lives in `sql/schema.sql`.
//!
//! Timestamps cross the boundary as unix seconds: bound through
//! `to_timestamp($n)` and read back with `EXTRACT(EPOCH FROM ..)::BIGINT`.

use super::{
    AccountStore, CommitOutcome, IdentityLink, LinkPlan, LocalAccount, ProviderConfigStore,
    RefreshLookup, ReplayGuard, SessionRecord, SessionStore, StoredProvider,
};
use crate::sso::ProviderConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::Instrument;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Drop consumed state nonces whose state can no longer decode.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn purge_state_nonces(&self, now: i64) -> Result<u64> {
        let query = "DELETE FROM sso_state_nonces WHERE expires_at < to_timestamp($1)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge state nonces")?;
        Ok(result.rows_affected())
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl ProviderConfigStore for PgStore {
    async fn load_provider(&self, provider_type: &str) -> Result<Option<StoredProvider>> {
        let query =
            "SELECT provider_type, enabled, settings FROM sso_connections WHERE provider_type = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(provider_type)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load sso connection")?;

        row.map(|row| -> Result<StoredProvider> {
            Ok(StoredProvider {
                provider_type: row.try_get("provider_type")?,
                enabled: row.try_get("enabled")?,
                config: ProviderConfig::new(row.try_get("settings")?),
            })
        })
        .transpose()
        .context("failed to decode sso connection")
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn find_link(&self, provider_type: &str, subject: &str) -> Result<Option<Uuid>> {
        let query = "SELECT user_id FROM identity_links WHERE provider_type = $1 AND subject = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(provider_type)
            .bind(subject)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup identity link")?;

        Ok(row.map(|row| row.get("user_id")))
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<LocalAccount>> {
        let query = "SELECT id, email, display_name FROM accounts WHERE email = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup account by email")?;

        Ok(row.map(|row| LocalAccount {
            id: row.get("id"),
            email: row.get("email"),
            display_name: row.get("display_name"),
        }))
    }

    async fn commit_login(&self, plan: &LinkPlan, session: &SessionRecord) -> Result<CommitOutcome> {
        // Account, link and session land together or not at all.
        let mut tx = self.pool.begin().await.context("begin login transaction")?;

        let outcome = match plan {
            LinkPlan::Existing { .. } => CommitOutcome::Committed,
            LinkPlan::Link { link } => insert_link(&mut tx, link).await?,
            LinkPlan::Create { account, link } => match insert_account(&mut tx, account).await? {
                CommitOutcome::Committed => insert_link(&mut tx, link).await?,
                CommitOutcome::Conflict => CommitOutcome::Conflict,
            },
        };
        if outcome == CommitOutcome::Conflict {
            let _ = tx.rollback().await;
            return Ok(CommitOutcome::Conflict);
        }

        insert_session_row(&mut tx, session).await?;
        tx.commit().await.context("commit login transaction")?;
        Ok(CommitOutcome::Committed)
    }
}

async fn insert_account(
    tx: &mut Transaction<'_, Postgres>,
    account: &LocalAccount,
) -> Result<CommitOutcome> {
    let query = r"
        INSERT INTO accounts (id, email, display_name)
        VALUES ($1, $2, $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(account.id)
        .bind(account.email.as_str())
        .bind(account.display_name.as_deref())
        .execute(&mut **tx)
        .instrument(span)
        .await;

    match result {
        Ok(_) => Ok(CommitOutcome::Committed),
        Err(err) if is_unique_violation(&err) => Ok(CommitOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert account"),
    }
}

async fn insert_link(
    tx: &mut Transaction<'_, Postgres>,
    link: &IdentityLink,
) -> Result<CommitOutcome> {
    let query = r"
        INSERT INTO identity_links (provider_type, subject, user_id)
        VALUES ($1, $2, $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(link.provider_type.as_str())
        .bind(link.subject.as_str())
        .bind(link.user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await;

    match result {
        Ok(_) => Ok(CommitOutcome::Committed),
        Err(err) if is_unique_violation(&err) => Ok(CommitOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert identity link"),
    }
}

async fn insert_session_row(
    tx: &mut Transaction<'_, Postgres>,
    session: &SessionRecord,
) -> Result<()> {
    let query = r"
        INSERT INTO sessions (id, user_id, token_hash, issued_at, expires_at)
        VALUES ($1, $2, $3, to_timestamp($4), to_timestamp($5))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.token_hash.as_slice())
        .bind(session.issued_at)
        .bind(session.expires_at)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert session")?;
    Ok(())
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, session: &SessionRecord) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin session transaction")?;
        insert_session_row(&mut tx, session).await?;
        tx.commit().await.context("commit session transaction")?;
        Ok(())
    }

    async fn use_session(
        &self,
        token_hash: &[u8],
        rotate_to: Option<&[u8]>,
        now: i64,
    ) -> Result<RefreshLookup> {
        let mut tx = self.pool.begin().await.context("begin refresh transaction")?;

        let query = r"
            SELECT id, user_id,
                   EXTRACT(EPOCH FROM issued_at)::BIGINT AS issued_at,
                   EXTRACT(EPOCH FROM expires_at)::BIGINT AS expires_at
            FROM sessions
            WHERE token_hash = $1
            FOR UPDATE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to lookup session")?;

        let Some(row) = row else {
            let _ = tx.rollback().await;
            return Ok(RefreshLookup::Missing);
        };
        let mut session = SessionRecord {
            id: row.get("id"),
            user_id: row.get("user_id"),
            token_hash: token_hash.to_vec(),
            issued_at: row.get("issued_at"),
            expires_at: row.get("expires_at"),
        };

        if session.expires_at <= now {
            let query = "DELETE FROM sessions WHERE id = $1";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "DELETE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(session.id)
                .execute(&mut *tx)
                .instrument(span)
                .await
                .context("failed to delete expired session")?;
            tx.commit().await.context("commit refresh transaction")?;
            return Ok(RefreshLookup::Expired);
        }

        let query = r"
            UPDATE sessions
            SET token_hash = COALESCE($2, token_hash),
                last_seen_at = to_timestamp($3)
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session.id)
            .bind(rotate_to)
            .bind(now)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to update session")?;
        tx.commit().await.context("commit refresh transaction")?;

        if let Some(next) = rotate_to {
            session.token_hash = next.to_vec();
        }
        Ok(RefreshLookup::Active(session))
    }

    async fn delete_session(&self, token_hash: &[u8]) -> Result<()> {
        let query = "DELETE FROM sessions WHERE token_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session")?;
        Ok(())
    }

    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<u64> {
        let query = "DELETE FROM sessions WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete user sessions")?;
        Ok(result.rows_affected())
    }

    async fn purge_expired(&self, now: i64) -> Result<u64> {
        let query = "DELETE FROM sessions WHERE expires_at <= to_timestamp($1)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge expired sessions")?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        let query = "SELECT 1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("database ping failed")?;
        Ok(())
    }
}

#[async_trait]
impl ReplayGuard for PgStore {
    async fn consume(&self, nonce: &str, expires_at: i64, now: i64) -> Result<bool> {
        // A stale row for the same nonce is taken over; a live one wins.
        let query = r"
            INSERT INTO sso_state_nonces (nonce, expires_at)
            VALUES ($1, to_timestamp($2))
            ON CONFLICT (nonce) DO UPDATE
                SET expires_at = EXCLUDED.expires_at
                WHERE sso_state_nonces.expires_at < to_timestamp($3)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(nonce)
            .bind(expires_at)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to record state nonce")?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23503"),
        }));
        assert!(!is_unique_violation(&err));

        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    #[tokio::test]
    async fn store_builds_from_lazy_pool() -> Result<()> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://passaggio@localhost/passaggio")
            .context("lazy pool")?;
        let store = PgStore::new(pool);
        assert_eq!(store.pool().size(), 0);
        Ok(())
    }
}
