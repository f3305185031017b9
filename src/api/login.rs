//! Registry login and logout orchestration.

use tracing::info;

use crate::config::AppConfig;
use crate::error::Result as PodwireResult;
use crate::registry::{AuthNegotiator, CredentialStore, FileCredentialStore};

use super::CommandOutcome;

/// Parameters for [`login`].
pub struct LoginParams<'a, E: mockable::Env> {
    /// Application configuration (provides the credential directory).
    pub config: &'a AppConfig,
    /// Registry address.
    pub server: &'a str,
    /// Account name.
    pub username: &'a str,
    /// Password or access token.
    pub password: &'a str,
    /// Environment variable provider for locating the credential store.
    pub env: &'a E,
}

/// Verify credentials against a registry and store them.
///
/// # Errors
///
/// Returns `RegistryAuthError` variants from probing, token exchange, Basic
/// verification, or persisting the credentials.
pub async fn login<E: mockable::Env>(params: LoginParams<'_, E>) -> PodwireResult<CommandOutcome> {
    let LoginParams {
        config,
        server,
        username,
        password,
        env,
    } = params;

    let store = FileCredentialStore::locate(env, config.registry.config_dir.as_deref())?;
    let negotiator = AuthNegotiator::new(store)?;
    login_with_negotiator(&negotiator, server, username, password).await
}

/// Log in through an existing negotiator.
///
/// # Errors
///
/// Returns the errors described on [`login`].
pub async fn login_with_negotiator<S: CredentialStore>(
    negotiator: &AuthNegotiator<S>,
    server: &str,
    username: &str,
    password: &str,
) -> PodwireResult<CommandOutcome> {
    let scheme = negotiator
        .authorize_and_store(server, username, password)
        .await?;
    info!(server, scheme = ?scheme, "login complete");
    Ok(CommandOutcome::Success)
}

/// Remove stored credentials for a registry.
///
/// Succeeds whether or not credentials were stored.
///
/// # Errors
///
/// Returns `RegistryAuthError::InvalidEndpoint` for an unparseable address and
/// `RegistryAuthError::CredentialStore` when the store cannot be located or
/// updated.
pub fn logout<E: mockable::Env>(
    config: &AppConfig,
    server: &str,
    env: &E,
) -> PodwireResult<CommandOutcome> {
    let store = FileCredentialStore::locate(env, config.registry.config_dir.as_deref())?;
    let negotiator = AuthNegotiator::new(store)?;
    if !negotiator.logout(server)? {
        info!(server, "no stored credentials to remove");
    }
    Ok(CommandOutcome::Success)
}
