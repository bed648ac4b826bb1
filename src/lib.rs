//! # Passaggio (SSO broker)
//!
//! `passaggio` signs users in through external identity providers and hands
//! back short-lived access tokens plus refresh tokens backed by server-side
//! sessions.
//!
//! ## Flow
//!
//! 1. `Begin`: the [`sso::SsoManager`] builds the provider named in the path,
//!    seals the request context into an encrypted redirect state and returns
//!    the provider's authorization URL.
//! 2. The browser visits the provider, which echoes the state back.
//! 3. `Callback`: the state is opened and checked (expiry, integrity, provider
//!    binding, single use), the provider exchanges its artifact for an
//!    [`sso::Identity`], and the identity is resolved to a local account.
//! 4. The [`token::TokenService`] mints a `v4.public` access token and a
//!    refresh token; account, link and session rows are committed together.
//!
//! ## Stateless redirect leg
//!
//! Nothing is stored between `Begin` and `Callback`. The redirect state is a
//! `ChaCha20-Poly1305` sealed blob carrying its own issue time, so any replica
//! holding the state key can validate it.

pub mod api;
pub mod cli;
pub mod clock;
pub mod sso;
pub mod store;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
