//! Single sign-on orchestration.

mod error;
mod manager;
pub mod provider;
pub mod registry;
mod resolve;
pub mod state;

pub use error::SsoError;
pub use manager::{BeginOutcome, CallbackOutcome, FlowStage, SsoConfig, SsoManager};
pub use provider::{
    BeginRequest, BeginResponse, CallbackRequest, Identity, Provider, ProviderConfig,
    ProviderError, ProviderHttp, ProviderMetadata, DEFAULT_PROVIDER_TIMEOUT_SECONDS,
};
pub use registry::{ProviderDescriptor, ProviderFactory, ProviderRegistry, RegistryError};
pub use resolve::{normalize_email, plan_link, LinkPolicy};
pub use state::{RedirectState, StateCodec, StateError, DEFAULT_STATE_TTL_SECONDS};
