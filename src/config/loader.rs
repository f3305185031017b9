//! Configuration loading with layered precedence.
//!
//! Layers are composed by hand with `MergeComposer` (lowest to highest):
//! application defaults, configuration file, environment variables,
//! command-line arguments. The `Cli` owns subcommand dispatch and the
//! `--config` flag, so discovery honours that path before falling back to
//! the XDG locations.
//!
//! # Environment Variable Handling
//!
//! Environment variables with unparseable values (e.g.,
//! `PODWIRE_TLS_VERIFY=maybe` instead of `true`/`false`) return an error
//! immediately rather than silently falling back to defaults.
//!
//! String fields (e.g., `PODWIRE_ENGINE_HOST`) are always accepted. Typed
//! fields like booleans (`PODWIRE_TLS_FORCE`) or integers
//! (`PODWIRE_TIMEOUT_SECS`) must have valid values.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use ortho_config::discovery::ConfigDiscovery;
use ortho_config::serde_json::{self, Map, Value};
use ortho_config::{MergeComposer, toml};
use tracing::debug;

use crate::config::{AppConfig, Cli};
use crate::error::{ConfigError, Result};

/// The type of value expected from an environment variable.
#[derive(Clone, Copy)]
enum EnvVarType {
    /// String value (always accepted).
    String,
    /// Boolean value (`true`/`false`). Invalid values return an error.
    Bool,
    /// Unsigned 64-bit integer. Invalid values return an error.
    U64,
}

/// Specification for a single environment variable mapping.
struct EnvVarSpec {
    env_var: &'static str,
    path: &'static [&'static str],
    var_type: EnvVarType,
}

/// Table of all environment variables and their JSON paths.
const ENV_VAR_SPECS: &[EnvVarSpec] = &[
    EnvVarSpec {
        env_var: "PODWIRE_ENGINE_HOST",
        path: &["engine_host"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "PODWIRE_API_VERSION",
        path: &["api_version"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "PODWIRE_TIMEOUT_SECS",
        path: &["timeout_secs"],
        var_type: EnvVarType::U64,
    },
    // TLS fields
    EnvVarSpec {
        env_var: "PODWIRE_TLS_FORCE",
        path: &["tls", "force"],
        var_type: EnvVarType::Bool,
    },
    EnvVarSpec {
        env_var: "PODWIRE_TLS_VERIFY",
        path: &["tls", "verify"],
        var_type: EnvVarType::Bool,
    },
    EnvVarSpec {
        env_var: "PODWIRE_TLS_SKIP_VERIFY",
        path: &["tls", "skip_verify"],
        var_type: EnvVarType::Bool,
    },
    EnvVarSpec {
        env_var: "PODWIRE_TLS_CA_CERT",
        path: &["tls", "ca_cert"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "PODWIRE_TLS_CLIENT_CERT",
        path: &["tls", "client_cert"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "PODWIRE_TLS_CLIENT_KEY",
        path: &["tls", "client_key"],
        var_type: EnvVarType::String,
    },
    // Registry fields
    EnvVarSpec {
        env_var: "PODWIRE_REGISTRY_CONFIG_DIR",
        path: &["registry", "config_dir"],
        var_type: EnvVarType::String,
    },
];

/// Returns the list of environment variable names recognised by the config loader.
///
/// Tests use this to clear every `PODWIRE_*` variable the loader reads.
#[must_use]
pub fn env_var_names() -> Vec<&'static str> {
    ENV_VAR_SPECS.iter().map(|spec| spec.env_var).collect()
}

/// Load a configuration file and push it to the composer.
fn load_config_file(path: &Utf8Path, composer: &mut MergeComposer) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().unwrap_or(path.as_str());

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|e| {
        ConfigError::ParseError {
            message: format!("failed to open directory {parent}: {e}"),
        }
    })?;

    let content = dir
        .read_to_string(file_name)
        .map_err(|e| ConfigError::ParseError {
            message: format!("failed to read {path}: {e}"),
        })?;

    let value =
        toml::from_str::<serde_json::Value>(&content).map_err(|e| ConfigError::ParseError {
            message: format!("failed to parse {path}: {e}"),
        })?;

    debug!(path = %path, "loaded configuration file");
    composer.push_file(value, Some(path.to_path_buf()));
    Ok(())
}

/// Load configuration with full layer precedence from the process environment.
///
/// # Errors
///
/// See [`load_config_with_env`].
pub fn load_config(cli: &Cli) -> Result<AppConfig> {
    load_config_with_env(cli, &mockable::DefaultEnv::new())
}

/// Load configuration with full layer precedence.
///
/// 1. Application defaults defined in the struct
/// 2. Configuration file (`--config`, `PODWIRE_CONFIG_PATH`, or discovery)
/// 3. Environment variables prefixed with `PODWIRE_`, read through `env`
/// 4. Command-line arguments (from the provided `Cli`)
///
/// Later sources override earlier ones. The merged configuration is
/// validated before it is returned.
///
/// # Errors
///
/// Returns `ConfigError` if configuration loading fails due to:
/// - Malformed configuration files
/// - Invalid typed environment variable values (e.g., non-boolean for
///   `PODWIRE_TLS_FORCE`)
/// - Settings rejected by [`AppConfig::validate`]
pub fn load_config_with_env<E: mockable::Env>(cli: &Cli, env: &E) -> Result<AppConfig> {
    let mut composer = MergeComposer::new();

    let defaults =
        serde_json::to_value(AppConfig::default()).map_err(|e| ConfigError::ParseError {
            message: format!("failed to serialise defaults: {e}"),
        })?;
    composer.push_defaults(defaults);

    let config_path: Option<Utf8PathBuf> =
        cli.config.clone().filter(|p| p.exists()).or_else(|| {
            let discovery = ConfigDiscovery::builder("podwire")
                .env_var("PODWIRE_CONFIG_PATH")
                .config_file_name("config.toml")
                .dotfile_name(".podwire.toml")
                .build();
            discovery
                .candidates()
                .into_iter()
                .filter(|p| p.exists())
                .find_map(|p| Utf8PathBuf::try_from(p).ok())
        });

    if let Some(ref path) = config_path {
        load_config_file(path, &mut composer)?;
    }

    let env_values = collect_env_vars(env)?;
    if !env_values.is_null() {
        composer.push_environment(env_values);
    }

    let cli_overrides = build_cli_overrides(cli);
    if !cli_overrides.is_null() {
        composer.push_cli(cli_overrides);
    }

    let config =
        AppConfig::merge_from_layers(composer.layers()).map_err(ConfigError::OrthoConfig)?;
    config.validate()?;
    Ok(config)
}

/// Collect `PODWIRE_*` environment variables into a JSON value.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` if a typed environment variable (bool, u64)
/// has an unparseable value.
fn collect_env_vars<E: mockable::Env>(env: &E) -> Result<Value> {
    let mut root = Map::new();

    for spec in ENV_VAR_SPECS {
        let Some(raw_value) = env.string(spec.env_var) else {
            continue;
        };

        let json_value = match spec.var_type {
            EnvVarType::String => Value::String(raw_value),
            EnvVarType::Bool => match raw_value.parse::<bool>() {
                Ok(b) => Value::Bool(b),
                Err(_) => {
                    return Err(ConfigError::InvalidValue {
                        field: spec.env_var.to_owned(),
                        reason: format!("expected bool (true/false), got '{raw_value}'"),
                    }
                    .into());
                }
            },
            EnvVarType::U64 => match raw_value.parse::<u64>() {
                Ok(n) => Value::Number(n.into()),
                Err(_) => {
                    return Err(ConfigError::InvalidValue {
                        field: spec.env_var.to_owned(),
                        reason: format!("expected unsigned integer, got '{raw_value}'"),
                    }
                    .into());
                }
            },
        };

        insert_at_path(&mut root, spec.path, json_value);
    }

    if root.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(Value::Object(root))
    }
}

/// Insert a value at a nested path in a JSON map, creating intermediate
/// objects as needed.
fn insert_at_path(root: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((&field, parents)) = path.split_last() else {
        return;
    };

    let mut current = root;
    for &segment in parents {
        let entry = current
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(obj) = entry.as_object_mut() else {
            return;
        };
        current = obj;
    }

    current.insert(field.to_owned(), value);
}

/// Build a JSON value containing CLI overrides.
fn build_cli_overrides(cli: &Cli) -> Value {
    let mut overrides = Map::new();

    if let Some(ref host) = cli.engine_host {
        overrides.insert("engine_host".to_owned(), Value::String(host.clone()));
    }
    if let Some(ref version) = cli.api_version {
        overrides.insert("api_version".to_owned(), Value::String(version.clone()));
    }
    if let Some(timeout) = cli.timeout_secs {
        overrides.insert("timeout_secs".to_owned(), Value::Number(timeout.into()));
    }

    if overrides.is_empty() {
        Value::Null
    } else {
        Value::Object(overrides)
    }
}
