//! Then-step assertions for registry authentication scenarios.

use podwire::registry::{AuthScheme, CredentialStore, Secret};
use rstest_bdd_macros::then;

use super::state::{LoginResult, RegistryState};
use super::steps::StepResult;

fn parse_scheme(name: &str) -> StepResult<AuthScheme> {
    match name {
        "Anonymous" => Ok(AuthScheme::Anonymous),
        "Basic" => Ok(AuthScheme::Basic),
        "Bearer" => Ok(AuthScheme::Bearer),
        other => Err(format!("unknown scheme {other}")),
    }
}

fn registry_key(state: &RegistryState) -> StepResult<String> {
    state
        .registry_key
        .get()
        .ok_or_else(|| String::from("registry key should be recorded"))
}

#[then("the login succeeds with the {scheme} scheme")]
fn login_succeeds_with_scheme(registry_state: &RegistryState, scheme: String) -> StepResult<()> {
    let expected = parse_scheme(&scheme)?;
    match registry_state.login.get() {
        Some(LoginResult::Succeeded(actual)) if actual == expected => Ok(()),
        Some(LoginResult::Succeeded(actual)) => {
            Err(format!("expected {expected:?} login, got {actual:?}"))
        }
        Some(LoginResult::Failed { message }) => {
            Err(format!("expected login to succeed, got: {message}"))
        }
        None => Err(String::from("login result should be recorded")),
    }
}

// Matches `RegistryAuthError::CredentialsRejected`, rendered as
// "registry '{registry}' rejected credentials with status {status}".
#[then("the login fails because the credentials were rejected")]
fn login_fails_with_rejection(registry_state: &RegistryState) -> StepResult<()> {
    match registry_state.login.get() {
        Some(LoginResult::Failed { message }) if message.contains("rejected credentials") => {
            Ok(())
        }
        Some(LoginResult::Failed { message }) => {
            Err(format!("expected a credential rejection, got: {message}"))
        }
        Some(LoginResult::Succeeded(scheme)) => {
            Err(format!("expected login to fail, got {scheme:?}"))
        }
        None => Err(String::from("login result should be recorded")),
    }
}

#[then("credentials for {username} are stored")]
fn credentials_are_stored(registry_state: &RegistryState, username: String) -> StepResult<()> {
    let key = registry_key(registry_state)?;
    let entry = registry_state
        .credential_store()?
        .get(&key)
        .map_err(|error| error.to_string())?
        .ok_or_else(|| format!("expected credentials under {key}"))?;
    if entry.username == username {
        Ok(())
    } else {
        Err(format!("expected user {username}, got {}", entry.username))
    }
}

#[then("the stored secret is the registry token {token}")]
fn stored_secret_is_registry_token(registry_state: &RegistryState, token: String) -> StepResult<()> {
    let key = registry_key(registry_state)?;
    let entry = registry_state
        .credential_store()?
        .get(&key)
        .map_err(|error| error.to_string())?
        .ok_or_else(|| format!("expected credentials under {key}"))?;
    if entry.secret == Secret::RegistryToken(token) {
        Ok(())
    } else {
        Err(format!("expected the issued registry token, got {:?}", entry.secret))
    }
}

#[then("no credentials are stored")]
fn no_credentials_are_stored(registry_state: &RegistryState) -> StepResult<()> {
    let key = registry_key(registry_state)?;
    let entry = registry_state
        .credential_store()?
        .get(&key)
        .map_err(|error| error.to_string())?;
    match entry {
        None => Ok(()),
        Some(found) => Err(format!("expected no credentials, found {found:?}")),
    }
}

#[then("both headers carry the same bearer token")]
fn headers_carry_same_token(registry_state: &RegistryState) -> StepResult<()> {
    let headers = registry_state
        .headers
        .get()
        .ok_or_else(|| String::from("headers should be recorded"))?;
    let expected = Some(String::from("Bearer bdd-token"));
    if headers.len() == 2 && headers.iter().all(|value| *value == expected) {
        Ok(())
    } else {
        Err(format!("expected two identical bearer headers, got {headers:?}"))
    }
}

#[then("the token endpoint was called once")]
fn token_endpoint_called_once(registry_state: &RegistryState) -> StepResult<()> {
    match registry_state.token_requests.get() {
        Some(1) => Ok(()),
        Some(count) => Err(format!("expected one token request, got {count}")),
        None => Err(String::from("token request count should be recorded")),
    }
}
