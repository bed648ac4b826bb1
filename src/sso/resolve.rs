//! Map a provider identity onto a local account without writing anything.

use super::provider::Identity;
use super::SsoError;
use crate::store::{AccountStore, IdentityLink, LinkPlan, LocalAccount};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkPolicy {
    /// Link a new identity to an existing account with the same email.
    pub auto_link_by_email: bool,
    /// Only auto-link when the provider asserts `email_verified == true`.
    pub require_verified_email: bool,
    /// Create an account when nothing matches.
    pub allow_signup: bool,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            auto_link_by_email: true,
            require_verified_email: true,
            allow_signup: true,
        }
    }
}

#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn valid_email(email: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(email))
}

/// Decide how `identity` maps onto local rows.
///
/// An existing `(provider_type, subject)` link always wins over an email
/// match, so a reused address at another provider cannot take over an
/// account.
///
/// # Errors
/// Returns `AccountLinkRequired`, `AccountNotFound`, `IdentityIncomplete` for
/// an unusable email, or `Storage`.
pub async fn plan_link(
    accounts: &dyn AccountStore,
    identity: &Identity,
    policy: LinkPolicy,
) -> Result<LinkPlan, SsoError> {
    if let Some(user_id) = accounts
        .find_link(&identity.provider_type, &identity.subject)
        .await?
    {
        debug!(%user_id, "identity already linked");
        return Ok(LinkPlan::Existing { user_id });
    }

    let email = normalize_email(&identity.email);
    if !valid_email(&email) {
        return Err(SsoError::IdentityIncomplete("email".to_string()));
    }

    if let Some(account) = accounts.find_account_by_email(&email).await? {
        if !policy.auto_link_by_email {
            return Err(SsoError::AccountLinkRequired);
        }
        if policy.require_verified_email && identity.email_verified != Some(true) {
            warn!(
                provider_type = %identity.provider_type,
                user_id = %account.id,
                "email matches an account but is not verified by the provider"
            );
            return Err(SsoError::AccountLinkRequired);
        }
        debug!(user_id = %account.id, "linking identity by email");
        return Ok(LinkPlan::Link {
            link: IdentityLink {
                provider_type: identity.provider_type.clone(),
                subject: identity.subject.clone(),
                user_id: account.id,
            },
        });
    }

    if !policy.allow_signup {
        return Err(SsoError::AccountNotFound);
    }

    let user_id = Uuid::now_v7();
    Ok(LinkPlan::Create {
        account: LocalAccount {
            id: user_id,
            email,
            display_name: identity.display_name.clone(),
        },
        link: IdentityLink {
            provider_type: identity.provider_type.clone(),
            subject: identity.subject.clone(),
            user_id,
        },
    })
}
