//! Steps and state for configuration scenarios.

use std::collections::HashMap;
use std::io::Write;

use camino::Utf8PathBuf;
use mockable::MockEnv;
use podwire::config::{AppConfig, Cli, Commands, LogoutArgs, load_config_with_env};
use rstest::fixture;
use rstest_bdd::Slot;
use rstest_bdd_macros::{ScenarioState, given, then, when};
use tempfile::NamedTempFile;

pub type StepResult<T> = Result<T, String>;

#[derive(Debug, Clone)]
enum LoadResult {
    Loaded(Box<AppConfig>),
    Failed { message: String },
}

/// State shared across configuration test scenarios.
#[derive(Default, ScenarioState)]
pub(crate) struct ConfigState {
    /// TOML written to the configuration file.
    file_contents: Slot<String>,
    /// Variables visible to the loader.
    env: Slot<HashMap<String, String>>,
    cli_engine_host: Slot<String>,
    cli_api_version: Slot<String>,
    cli_timeout_secs: Slot<u64>,
    result: Slot<LoadResult>,
}

/// Fixture providing a fresh configuration state.
#[fixture]
pub(crate) fn config_state() -> ConfigState {
    let state = ConfigState::default();
    state.env.set(HashMap::new());
    state
}

#[given("an empty configuration file")]
fn empty_configuration_file(config_state: &ConfigState) {
    config_state.file_contents.set(String::new());
}

#[given("a configuration file setting the engine host to {host}")]
fn file_sets_engine_host(config_state: &ConfigState, host: String) {
    config_state
        .file_contents
        .set(format!("engine_host = \"{host}\"\n"));
}

#[given("a configuration file with a client certificate but no key")]
fn file_with_half_client_identity(config_state: &ConfigState) {
    config_state
        .file_contents
        .set(String::from("[tls]\nclient_cert = \"/certs/cert.pem\"\n"));
}

#[given("the environment sets {name} to {value}")]
fn environment_sets(config_state: &ConfigState, name: String, value: String) {
    let mut env = config_state.env.get().unwrap_or_default();
    env.insert(name, value);
    config_state.env.set(env);
}

#[given("the command line sets the engine host to {host}")]
fn cli_sets_engine_host(config_state: &ConfigState, host: String) {
    config_state.cli_engine_host.set(host);
}

#[given("the command line sets the API version to {version}")]
fn cli_sets_api_version(config_state: &ConfigState, version: String) {
    config_state.cli_api_version.set(version);
}

#[given("the command line sets the timeout to {seconds} seconds")]
fn cli_sets_timeout(config_state: &ConfigState, seconds: u64) {
    config_state.cli_timeout_secs.set(seconds);
}

#[when("the configuration is loaded")]
fn configuration_is_loaded(config_state: &ConfigState) -> StepResult<()> {
    let contents = config_state
        .file_contents
        .get()
        .ok_or_else(|| String::from("a configuration file should be described"))?;
    let mut file = NamedTempFile::new().map_err(|error| error.to_string())?;
    file.write_all(contents.as_bytes())
        .map_err(|error| error.to_string())?;
    let path = Utf8PathBuf::from_path_buf(file.path().to_path_buf())
        .map_err(|path| format!("temporary path is not UTF-8: {}", path.display()))?;

    let cli = Cli {
        command: Commands::Logout(LogoutArgs {
            server: String::from("registry.test"),
        }),
        config: Some(path),
        engine_host: config_state.cli_engine_host.get(),
        api_version: config_state.cli_api_version.get(),
        timeout_secs: config_state.cli_timeout_secs.get(),
    };

    let vars = config_state.env.get().unwrap_or_default();
    let mut env = MockEnv::new();
    env.expect_string()
        .returning(move |name| vars.get(name).cloned());

    let result = match load_config_with_env(&cli, &env) {
        Ok(config) => LoadResult::Loaded(Box::new(config)),
        Err(error) => LoadResult::Failed {
            message: error.to_string(),
        },
    };
    config_state.result.set(result);
    Ok(())
}

fn loaded_config(config_state: &ConfigState) -> StepResult<AppConfig> {
    match config_state.result.get() {
        Some(LoadResult::Loaded(config)) => Ok(*config),
        Some(LoadResult::Failed { message }) => {
            Err(format!("expected configuration to load, got: {message}"))
        }
        None => Err(String::from("configuration should be loaded")),
    }
}

#[then("no engine host is configured")]
fn engine_host_is_unset(config_state: &ConfigState) -> StepResult<()> {
    let config = loaded_config(config_state)?;
    match config.engine_host {
        None => Ok(()),
        Some(host) => Err(format!("expected no engine host, got {host}")),
    }
}

#[then("the engine host is {host}")]
fn engine_host_is(config_state: &ConfigState, host: String) -> StepResult<()> {
    let config = loaded_config(config_state)?;
    if config.engine_host.as_deref() == Some(host.as_str()) {
        Ok(())
    } else {
        Err(format!("expected engine host {host}, got {:?}", config.engine_host))
    }
}

#[then("the request timeout is {seconds} seconds")]
fn request_timeout_is(config_state: &ConfigState, seconds: u64) -> StepResult<()> {
    let config = loaded_config(config_state)?;
    if config.timeout().as_secs() == seconds {
        Ok(())
    } else {
        Err(format!("expected {seconds}s timeout, got {:?}", config.timeout()))
    }
}

#[then("the API version is {version}")]
fn api_version_is(config_state: &ConfigState, version: String) -> StepResult<()> {
    let config = loaded_config(config_state)?;
    if config.api_version.as_deref() == Some(version.as_str()) {
        Ok(())
    } else {
        Err(format!("expected API version {version}, got {:?}", config.api_version))
    }
}

#[then("loading fails mentioning {text}")]
fn loading_fails_mentioning(config_state: &ConfigState, text: String) -> StepResult<()> {
    match config_state.result.get() {
        Some(LoadResult::Failed { message }) if message.contains(&text) => Ok(()),
        Some(LoadResult::Failed { message }) => {
            Err(format!("expected failure mentioning {text}, got: {message}"))
        }
        Some(LoadResult::Loaded(_)) => Err(String::from("expected configuration loading to fail")),
        None => Err(String::from("configuration should be loaded")),
    }
}
