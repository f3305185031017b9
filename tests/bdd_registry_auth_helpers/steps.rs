//! Given/When steps for registry authentication scenarios.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use mockable::MockEnv;
use podwire::api::logout;
use podwire::config::{AppConfig, RegistryConfig};
use podwire::registry::{
    AuthNegotiator, CredentialEntry, CredentialStore, FileCredentialStore, RegistryEndpoint,
    TokenCache,
};
use rstest_bdd_macros::{given, when};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::state::{LoginResult, RegistryMode, RegistryState};

pub type StepResult<T> = Result<T, String>;

const ACCEPTED_PASSWORD: &str = "s3cret";

#[given("a registry that issues bearer tokens")]
fn registry_issues_bearer_tokens(registry_state: &RegistryState) {
    registry_state.mode.set(RegistryMode::Bearer);
}

#[given("a registry that requires basic authentication")]
fn registry_requires_basic(registry_state: &RegistryState) {
    registry_state.mode.set(RegistryMode::Basic);
}

#[given("credentials for {username} are already stored for {registry}")]
fn credentials_already_stored(
    registry_state: &RegistryState,
    username: String,
    registry: String,
) -> StepResult<()> {
    let store = registry_state.credential_store()?;
    store
        .store(&registry, &CredentialEntry::password(username, "hunter2"))
        .map_err(|error| error.to_string())?;
    registry_state.registry_key.set(registry);
    Ok(())
}

/// Mounts the registry's `/v2/` and token endpoints for `mode`.
async fn mount_registry(server: &MockServer, mode: RegistryMode) {
    match mode {
        RegistryMode::Bearer => {
            let challenge = format!(
                r#"Bearer realm="{}/token",service="registry.test""#,
                server.uri()
            );
            Mock::given(method("GET"))
                .and(path("/v2/"))
                .respond_with(
                    ResponseTemplate::new(401).insert_header("WWW-Authenticate", challenge.as_str()),
                )
                .mount(server)
                .await;
            Mock::given(method("GET"))
                .and(path("/token"))
                .respond_with(ResponseTemplate::new(200).set_body_json(
                    serde_json::json!({ "token": "bdd-token", "expires_in": 300 }),
                ))
                .mount(server)
                .await;
        }
        RegistryMode::Basic => {
            let accepted = format!(
                "Basic {}",
                STANDARD.encode(format!("alice:{ACCEPTED_PASSWORD}"))
            );
            Mock::given(method("GET"))
                .and(path("/v2/"))
                .and(header("Authorization", accepted.as_str()))
                .respond_with(ResponseTemplate::new(200))
                .with_priority(1)
                .mount(server)
                .await;
            Mock::given(method("GET"))
                .and(path("/v2/"))
                .respond_with(ResponseTemplate::new(401))
                .mount(server)
                .await;
        }
    }
}

fn file_negotiator(
    registry_state: &RegistryState,
) -> StepResult<AuthNegotiator<FileCredentialStore>> {
    Ok(AuthNegotiator::with_client(
        reqwest::Client::new(),
        Arc::new(TokenCache::new()),
        registry_state.credential_store()?,
    ))
}

fn runtime() -> StepResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|error| format!("failed to create runtime: {error}"))
}

#[when("{username} logs in with password {password}")]
fn user_logs_in(
    registry_state: &RegistryState,
    username: String,
    password: String,
) -> StepResult<()> {
    let mode = registry_state
        .mode
        .get()
        .ok_or_else(|| String::from("registry mode should be configured"))?;
    let negotiator = file_negotiator(registry_state)?;

    let (registry_key, result) = runtime()?.block_on(async {
        let server = MockServer::start().await;
        mount_registry(&server, mode).await;
        let key = RegistryEndpoint::parse(&server.uri())
            .map(|endpoint| endpoint.registry_key())
            .map_err(|error| error.to_string())?;
        let result = negotiator
            .authorize_and_store(&server.uri(), &username, &password)
            .await;
        StepResult::Ok((key, result))
    })?;

    registry_state.registry_key.set(registry_key);
    registry_state.login.set(match result {
        Ok(scheme) => LoginResult::Succeeded(scheme),
        Err(error) => LoginResult::Failed {
            message: error.to_string(),
        },
    });
    Ok(())
}

#[when("an authorization header is requested twice")]
fn authorization_header_requested_twice(registry_state: &RegistryState) -> StepResult<()> {
    let mode = registry_state
        .mode
        .get()
        .ok_or_else(|| String::from("registry mode should be configured"))?;
    let negotiator = file_negotiator(registry_state)?;

    let (headers, token_requests) = runtime()?.block_on(async {
        let server = MockServer::start().await;
        mount_registry(&server, mode).await;
        let mut headers = Vec::new();
        for _ in 0..2 {
            let value = negotiator
                .authorization_header(&server.uri(), Some("repository:app:pull"), None)
                .await
                .map_err(|error| error.to_string())?;
            headers.push(value);
        }
        let token_requests = server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == "/token")
            .count();
        StepResult::Ok((headers, token_requests))
    })?;

    registry_state.headers.set(headers);
    registry_state.token_requests.set(token_requests);
    Ok(())
}

#[when("the user logs out of {registry}")]
fn user_logs_out(registry_state: &RegistryState, registry: String) -> StepResult<()> {
    let config = AppConfig {
        registry: RegistryConfig {
            config_dir: Some(registry_state.credential_store()?.dir().to_path_buf()),
        },
        ..AppConfig::default()
    };
    logout(&config, &registry, &MockEnv::new()).map_err(|error| error.to_string())?;
    Ok(())
}
