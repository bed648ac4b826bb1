use crate::sso::LinkPolicy;
use anyhow::bail;
use clap::{builder::BoolishValueParser, Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_STATE_KEY: &str = "state-key";
pub const ARG_STATE_TTL_SECONDS: &str = "state-ttl-seconds";
pub const ARG_ALLOWED_REDIRECT_ORIGINS: &str = "allowed-redirect-origins";
pub const ARG_AUTO_LINK_BY_EMAIL: &str = "auto-link-by-email";
pub const ARG_REQUIRE_VERIFIED_EMAIL: &str = "require-verified-email";
pub const ARG_ALLOW_SIGNUP: &str = "allow-signup";
pub const ARG_PROVIDER_TIMEOUT_SECONDS: &str = "provider-timeout-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub state_key: SecretString,
    pub state_ttl_seconds: u64,
    pub allowed_redirect_origins: Vec<String>,
    pub link_policy: LinkPolicy,
    pub provider_timeout_seconds: u64,
}

impl Options {
    /// Parse SSO arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the state key is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let state_key = match matches.get_one::<String>(ARG_STATE_KEY) {
            Some(value) if !value.trim().is_empty() => SecretString::from(value.trim().to_string()),
            _ => bail!("missing required argument: --{ARG_STATE_KEY}"),
        };

        let flag = |id: &str, default: bool| matches.get_one::<bool>(id).copied().unwrap_or(default);

        Ok(Self {
            state_key,
            state_ttl_seconds: matches
                .get_one::<u64>(ARG_STATE_TTL_SECONDS)
                .copied()
                .unwrap_or(crate::sso::DEFAULT_STATE_TTL_SECONDS),
            allowed_redirect_origins: matches
                .get_many::<String>(ARG_ALLOWED_REDIRECT_ORIGINS)
                .map(|values| {
                    values
                        .map(|v| v.trim().to_string())
                        .filter(|v| !v.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            link_policy: LinkPolicy {
                auto_link_by_email: flag(ARG_AUTO_LINK_BY_EMAIL, true),
                require_verified_email: flag(ARG_REQUIRE_VERIFIED_EMAIL, true),
                allow_signup: flag(ARG_ALLOW_SIGNUP, true),
            },
            provider_timeout_seconds: matches
                .get_one::<u64>(ARG_PROVIDER_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(crate::sso::DEFAULT_PROVIDER_TIMEOUT_SECONDS),
        })
    }
}

fn bool_arg(id: &'static str, help: &'static str, env: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .help(help)
        .env(env)
        .default_value("true")
        .action(ArgAction::Set)
        .value_parser(BoolishValueParser::new())
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_STATE_KEY)
                .long(ARG_STATE_KEY)
                .help("Base64 encoded 32 byte key sealing the redirect state")
                .long_help(
                    "Base64 encoded 32 byte ChaCha20-Poly1305 key sealing the redirect state.\n\nEvery replica must share it; rotating it invalidates logins in flight.",
                )
                .env("PASSAGGIO_STATE_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_STATE_TTL_SECONDS)
                .long(ARG_STATE_TTL_SECONDS)
                .help("Redirect state lifetime in seconds")
                .env("PASSAGGIO_STATE_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_ALLOWED_REDIRECT_ORIGINS)
                .long(ARG_ALLOWED_REDIRECT_ORIGINS)
                .help("Comma separated origins accepted as absolute redirect targets")
                .env("PASSAGGIO_ALLOWED_REDIRECT_ORIGINS")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(bool_arg(
            ARG_AUTO_LINK_BY_EMAIL,
            "Link a new provider identity to the account with the same email",
            "PASSAGGIO_AUTO_LINK_BY_EMAIL",
        ))
        .arg(bool_arg(
            ARG_REQUIRE_VERIFIED_EMAIL,
            "Only link by email when the provider marks it verified",
            "PASSAGGIO_REQUIRE_VERIFIED_EMAIL",
        ))
        .arg(bool_arg(
            ARG_ALLOW_SIGNUP,
            "Create local accounts for identities without a match",
            "PASSAGGIO_ALLOW_SIGNUP",
        ))
        .arg(
            Arg::new(ARG_PROVIDER_TIMEOUT_SECONDS)
                .long(ARG_PROVIDER_TIMEOUT_SECONDS)
                .help("HTTP timeout for calls to identity providers")
                .env("PASSAGGIO_PROVIDER_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
