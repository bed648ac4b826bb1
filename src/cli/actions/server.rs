use crate::{
    api,
    cli::{commands::sso, commands::token, telemetry},
    clock::{Clock, SystemClock},
    sso::{ProviderHttp, ProviderRegistry, SsoConfig, SsoManager},
    store::pg::PgStore,
    token::{TokenConfig, TokenService},
};
use anyhow::{anyhow, Context, Result};
use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub sso: sso::Options,
    pub token: token::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if a key is invalid, the database is unreachable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let state_key = decode_key(&args.sso.state_key).context("invalid state key")?;
    let signing_seed = decode_key(&args.token.signing_seed).context("invalid signing seed")?;

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(args.dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;
    let store = Arc::new(PgStore::new(pool));

    let token_config = TokenConfig::new()
        .with_issuer(args.token.issuer.clone())
        .with_audience(args.token.audience.clone())
        .with_access_ttl_seconds(args.token.access_ttl_seconds)
        .with_session_ttl_seconds(args.token.session_ttl_seconds)
        .with_rotate_refresh_tokens(args.token.rotate_refresh_tokens);
    let tokens = Arc::new(
        TokenService::new(token_config, &signing_seed, store.clone())
            .context("Failed to build token service")?,
    );

    let http = ProviderHttp::new(Duration::from_secs(args.sso.provider_timeout_seconds))
        .context("Failed to build provider HTTP client")?;
    let registry = Arc::new(
        ProviderRegistry::with_builtin_providers(&http)
            .context("Failed to register providers")?,
    );
    debug!(providers = ?registry.types(), "provider registry ready");

    let sso_config = SsoConfig::new()
        .with_state_ttl_seconds(args.sso.state_ttl_seconds)
        .with_allowed_redirect_origins(args.sso.allowed_redirect_origins.clone())
        .with_link_policy(args.sso.link_policy);
    let manager = Arc::new(
        SsoManager::new(
            sso_config,
            &state_key,
            registry,
            store.clone(),
            store.clone(),
            tokens.clone(),
        )
        .with_replay_guard(store.clone()),
    );

    let reaper = spawn_reaper(
        tokens,
        store,
        Duration::from_secs(args.token.reap_interval_seconds),
    );

    let result = api::serve(args.port, api::app(manager), shutdown_signal()).await;

    reaper.abort();
    telemetry::shutdown_tracer();
    result
}

/// Decode a base64 (standard or URL-safe) 32 byte secret.
fn decode_key(value: &SecretString) -> Result<[u8; 32]> {
    let raw = value.expose_secret().trim();
    let bytes = Base64::decode_vec(raw)
        .or_else(|_| Base64UrlUnpadded::decode_vec(raw))
        .map_err(|_| anyhow!("value is not valid base64"))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| anyhow!("expected 32 bytes, got {}", bytes.len()))
}

fn spawn_reaper(tokens: Arc<TokenService>, store: Arc<PgStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match tokens.purge_expired().await {
                Ok(0) => {}
                Ok(count) => info!(count, "purged expired sessions"),
                Err(err) => error!("Failed to purge expired sessions: {err}"),
            }
            match store.purge_state_nonces(SystemClock.now_unix()).await {
                Ok(0) => {}
                Ok(count) => debug!(count, "purged state nonces"),
                Err(err) => error!("Failed to purge state nonces: {err:#}"),
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}

fn log_startup_args(args: &Args) {
    info!(
        port = args.port,
        state_ttl_seconds = args.sso.state_ttl_seconds,
        access_ttl_seconds = args.token.access_ttl_seconds,
        session_ttl_seconds = args.token.session_ttl_seconds,
        rotate_refresh_tokens = args.token.rotate_refresh_tokens,
        allow_signup = args.sso.link_policy.allow_signup,
        auto_link_by_email = args.sso.link_policy.auto_link_by_email,
        redirect_origins = args.sso.allowed_redirect_origins.len(),
        "Starting passaggio"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn decode_key_accepts_both_alphabets() {
        let bytes: Vec<u8> = (0u8..32).collect();
        let standard = SecretString::from(Base64::encode_string(&bytes));
        let url_safe = SecretString::from(Base64UrlUnpadded::encode_string(&bytes));
        assert_eq!(decode_key(&standard).unwrap().as_slice(), bytes.as_slice());
        assert_eq!(decode_key(&url_safe).unwrap().as_slice(), bytes.as_slice());
    }

    #[test]
    fn decode_key_rejects_wrong_length() {
        let short = SecretString::from(Base64::encode_string(&[1u8; 16]));
        let err = decode_key(&short).unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
        assert!(decode_key(&SecretString::from("not base64!".to_string())).is_err());
    }
}
