//! Map validated CLI arguments to the action to run.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{sso, token};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --dsn")?;

    let sso = sso::Options::parse(matches)?;
    let token = token::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        sso,
        token,
    }))
}
