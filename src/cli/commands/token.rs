use crate::token::{
    DEFAULT_ACCESS_TTL_SECONDS, DEFAULT_AUDIENCE, DEFAULT_ISSUER, DEFAULT_SESSION_TTL_SECONDS,
};
use anyhow::bail;
use clap::{builder::BoolishValueParser, Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_SIGNING_SEED: &str = "signing-seed";
pub const ARG_ISSUER: &str = "token-issuer";
pub const ARG_AUDIENCE: &str = "token-audience";
pub const ARG_ACCESS_TTL_SECONDS: &str = "access-ttl-seconds";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_ROTATE_REFRESH_TOKENS: &str = "rotate-refresh-tokens";
pub const ARG_REAP_INTERVAL_SECONDS: &str = "reap-interval-seconds";

pub const DEFAULT_REAP_INTERVAL_SECONDS: u64 = 300;

#[derive(Debug, Clone)]
pub struct Options {
    pub signing_seed: SecretString,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_seconds: i64,
    pub session_ttl_seconds: i64,
    pub rotate_refresh_tokens: bool,
    pub reap_interval_seconds: u64,
}

impl Options {
    /// Parse token arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the signing seed is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let signing_seed = match matches.get_one::<String>(ARG_SIGNING_SEED) {
            Some(value) if !value.trim().is_empty() => SecretString::from(value.trim().to_string()),
            _ => bail!("missing required argument: --{ARG_SIGNING_SEED}"),
        };

        let get_string = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        Ok(Self {
            signing_seed,
            issuer: get_string(ARG_ISSUER).unwrap_or_else(|| DEFAULT_ISSUER.into()),
            audience: get_string(ARG_AUDIENCE).unwrap_or_else(|| DEFAULT_AUDIENCE.into()),
            access_ttl_seconds: matches
                .get_one::<i64>(ARG_ACCESS_TTL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_ACCESS_TTL_SECONDS),
            session_ttl_seconds: matches
                .get_one::<i64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_SESSION_TTL_SECONDS),
            rotate_refresh_tokens: matches
                .get_one::<bool>(ARG_ROTATE_REFRESH_TOKENS)
                .copied()
                .unwrap_or(true),
            reap_interval_seconds: matches
                .get_one::<u64>(ARG_REAP_INTERVAL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_REAP_INTERVAL_SECONDS),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SIGNING_SEED)
                .long(ARG_SIGNING_SEED)
                .help("Base64 encoded 32 byte Ed25519 seed for access tokens")
                .env("PASSAGGIO_SIGNING_SEED")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Access token issuer (iss)")
                .env("PASSAGGIO_TOKEN_ISSUER")
                .default_value(DEFAULT_ISSUER),
        )
        .arg(
            Arg::new(ARG_AUDIENCE)
                .long(ARG_AUDIENCE)
                .help("Access token audience (aud)")
                .env("PASSAGGIO_TOKEN_AUDIENCE")
                .default_value(DEFAULT_AUDIENCE),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL_SECONDS)
                .long(ARG_ACCESS_TTL_SECONDS)
                .help("Access token TTL in seconds")
                .env("PASSAGGIO_ACCESS_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Refresh session TTL in seconds")
                .env("PASSAGGIO_SESSION_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_ROTATE_REFRESH_TOKENS)
                .long(ARG_ROTATE_REFRESH_TOKENS)
                .help("Issue a new refresh token on every refresh")
                .env("PASSAGGIO_ROTATE_REFRESH_TOKENS")
                .default_value("true")
                .action(ArgAction::Set)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_REAP_INTERVAL_SECONDS)
                .long(ARG_REAP_INTERVAL_SECONDS)
                .help("Interval between purges of expired sessions and state nonces")
                .env("PASSAGGIO_REAP_INTERVAL_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
