use super::provider::ProviderError;
use super::registry::RegistryError;
use super::state::StateError;
use crate::token::TokenError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SsoError {
    #[error("provider not found: {0}")]
    ProviderNotFound(String),
    #[error("provider disabled: {0}")]
    ProviderDisabled(String),
    #[error("invalid redirect target")]
    InvalidRedirect,
    #[error("provider configuration error: {0}")]
    Configuration(String),
    #[error("state expired")]
    ExpiredState,
    #[error("state malformed")]
    MalformedState,
    #[error("state tampered or sealed with another key")]
    TamperedState,
    #[error("state already used")]
    StateReplayed,
    #[error("state issued for {expected}, callback for {actual}")]
    StateProviderMismatch { expected: String, actual: String },
    #[error("provider exchange failed: {0}")]
    ProviderExchangeFailed(String),
    #[error("invalid provider response: {0}")]
    InvalidProviderResponse(String),
    #[error("identity incomplete: missing {0}")]
    IdentityIncomplete(String),
    #[error("no local account for identity")]
    AccountNotFound,
    #[error("identity must be linked explicitly")]
    AccountLinkRequired,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<StateError> for SsoError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Expired => Self::ExpiredState,
            StateError::Malformed => Self::MalformedState,
            StateError::TamperedOrWrongKey => Self::TamperedState,
            StateError::Encryption | StateError::Entropy => {
                Self::Storage(anyhow::anyhow!("failed to seal redirect state: {err}"))
            }
        }
    }
}

impl From<ProviderError> for SsoError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Configuration(msg) => Self::Configuration(msg),
            ProviderError::ExchangeFailed(msg) => Self::ProviderExchangeFailed(msg),
            ProviderError::InvalidResponse(msg) => Self::InvalidProviderResponse(msg),
            ProviderError::IdentityIncomplete(claim) => Self::IdentityIncomplete(claim.to_string()),
        }
    }
}

impl From<RegistryError> for SsoError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownType(provider_type) => Self::ProviderNotFound(provider_type),
            RegistryError::DuplicateType(provider_type) => {
                Self::Configuration(format!("duplicate provider type {provider_type}"))
            }
            RegistryError::Provider(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_errors_map_to_state_kinds() {
        assert!(matches!(
            SsoError::from(StateError::Expired),
            SsoError::ExpiredState
        ));
        assert!(matches!(
            SsoError::from(StateError::Malformed),
            SsoError::MalformedState
        ));
        assert!(matches!(
            SsoError::from(StateError::TamperedOrWrongKey),
            SsoError::TamperedState
        ));
        assert!(matches!(
            SsoError::from(StateError::Entropy),
            SsoError::Storage(_)
        ));
    }

    #[test]
    fn registry_errors_map() {
        assert!(matches!(
            SsoError::from(RegistryError::UnknownType("x".to_string())),
            SsoError::ProviderNotFound(t) if t == "x"
        ));
        assert!(matches!(
            SsoError::from(RegistryError::Provider(ProviderError::Configuration(
                "bad".to_string()
            ))),
            SsoError::Configuration(_)
        ));
    }
}
