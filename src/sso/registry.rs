//! Provider type → factory mapping, injected into the manager.

use super::provider::{
    oauth2::{self, OAuth2Provider},
    oidc::{self, OidcProvider},
    Provider, ProviderConfig, ProviderError, ProviderHttp,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

pub type ProviderFactory =
    Arc<dyn Fn(ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("provider type already registered: {0}")]
    DuplicateType(String),
    #[error("unknown provider type: {0}")]
    UnknownType(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Clone)]
pub struct ProviderDescriptor {
    provider_type: String,
    supports_login: bool,
    factory: ProviderFactory,
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("provider_type", &self.provider_type)
            .field("supports_login", &self.supports_login)
            .finish_non_exhaustive()
    }
}

impl ProviderDescriptor {
    pub fn new<F>(provider_type: impl Into<String>, supports_login: bool, factory: F) -> Self
    where
        F: Fn(ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync + 'static,
    {
        Self {
            provider_type: provider_type.into(),
            supports_login,
            factory: Arc::new(factory),
        }
    }

    #[must_use]
    pub fn provider_type(&self) -> &str {
        &self.provider_type
    }

    #[must_use]
    pub fn supports_login(&self) -> bool {
        self.supports_login
    }
}

#[derive(Debug, Default)]
pub struct ProviderRegistry {
    descriptors: RwLock<HashMap<String, ProviderDescriptor>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `oidc` and `oauth2` families wired to `http`.
    ///
    /// # Errors
    /// Never fails in practice; registration of the two built-ins is checked.
    pub fn with_builtin_providers(http: &ProviderHttp) -> Result<Self, RegistryError> {
        let registry = Self::new();

        let oidc_http = http.clone();
        registry.register(ProviderDescriptor::new(
            oidc::PROVIDER_TYPE,
            true,
            move |config| {
                let provider = OidcProvider::from_config(&config, oidc_http.clone())?;
                Ok(Arc::new(provider) as Arc<dyn Provider>)
            },
        ))?;

        let oauth2_http = http.clone();
        registry.register(ProviderDescriptor::new(
            oauth2::PROVIDER_TYPE,
            true,
            move |config| {
                let provider = OAuth2Provider::from_config(&config, oauth2_http.clone())?;
                Ok(Arc::new(provider) as Arc<dyn Provider>)
            },
        ))?;

        Ok(registry)
    }

    /// # Errors
    /// Returns `DuplicateType` if the type is already registered.
    pub fn register(&self, descriptor: ProviderDescriptor) -> Result<(), RegistryError> {
        let mut descriptors = self
            .descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if descriptors.contains_key(&descriptor.provider_type) {
            return Err(RegistryError::DuplicateType(descriptor.provider_type));
        }
        descriptors.insert(descriptor.provider_type.clone(), descriptor);
        Ok(())
    }

    #[must_use]
    pub fn descriptor(&self, provider_type: &str) -> Option<ProviderDescriptor> {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider_type)
            .cloned()
    }

    /// Registered types, sorted.
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// Build a provider. The factory runs outside the lock.
    ///
    /// # Errors
    /// Returns `UnknownType` or the factory's own error.
    pub fn build(
        &self,
        provider_type: &str,
        config: ProviderConfig,
    ) -> Result<Arc<dyn Provider>, RegistryError> {
        let descriptor = self
            .descriptor(provider_type)
            .ok_or_else(|| RegistryError::UnknownType(provider_type.to_string()))?;
        Ok((descriptor.factory)(config)?)
    }
}
