//! Registry authentication.
//!
//! Logging in to a registry starts with an anonymous `GET /v2/` probe. A 200
//! means no credentials are needed, a 401 carries a `WWW-Authenticate`
//! challenge naming either Basic or Bearer authentication. Bearer tokens are
//! exchanged at the challenge's realm and cached process-wide until they
//! expire. Verified credentials are persisted through a [`CredentialStore`].

mod challenge;
mod credentials;
mod endpoint;
mod negotiator;
mod token_cache;

pub use challenge::{AuthChallenge, AuthScheme, BearerChallenge};
pub use credentials::{
    CONFIG_FILE_NAME, CredentialEntry, CredentialStore, FileCredentialStore, Secret,
};
pub use endpoint::{DOCKER_HUB_KEY, RegistryEndpoint, normalize_registry_key};
pub use negotiator::{AuthNegotiator, DEFAULT_TOKEN_TTL, REGISTRY_REQUEST_TIMEOUT};
pub use token_cache::{CachedToken, TokenCache, TokenKey};
