//! Configuration data types for podwire.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoResult, PostMergeContext, PostMergeHook};
use serde::{Deserialize, Serialize};

use crate::engine::TlsOptions;
use crate::engine::endpoint::DEFAULT_TIMEOUT;
use crate::error::ConfigError;

/// TLS settings for TCP engine endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Use TLS for `tcp://`, `http://` and bare `host:port` endpoints.
    pub force: bool,

    /// Use TLS for `tcp://` endpoints when certificate material is configured.
    pub verify: bool,

    /// Accept any daemon certificate.
    pub skip_verify: bool,

    /// PEM bundle of trusted certificate authorities.
    pub ca_cert: Option<Utf8PathBuf>,

    /// PEM client certificate chain.
    pub client_cert: Option<Utf8PathBuf>,

    /// PEM private key for `client_cert`.
    pub client_key: Option<Utf8PathBuf>,
}

impl TlsConfig {
    /// Validates that client certificate and key are configured together.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingRequired` naming the absent half of the
    /// client identity.
    pub fn validate(&self) -> crate::error::Result<()> {
        match (&self.client_cert, &self.client_key) {
            (Some(_), None) => Err(ConfigError::MissingRequired {
                field: String::from("tls.client_key"),
            }
            .into()),
            (None, Some(_)) => Err(ConfigError::MissingRequired {
                field: String::from("tls.client_cert"),
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// Converts the settings into endpoint classification options.
    #[must_use]
    pub fn options(&self) -> TlsOptions {
        TlsOptions {
            force: self.force,
            verify: self.verify,
            skip_verify: self.skip_verify,
            ca_cert: self.ca_cert.clone(),
            client_cert: self.client_cert.clone(),
            client_key: self.client_key.clone(),
        }
    }
}

/// Registry credential configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory holding the credential `config.json`.
    ///
    /// Falls back to `PODWIRE_CONFIG_DIR`, `DOCKER_CONFIG`, then
    /// `~/.docker` when unset.
    pub config_dir: Option<Utf8PathBuf>,
}

/// Root application configuration.
///
/// This structure is loaded from configuration files, environment variables,
/// and command-line arguments with layered precedence. The precedence order
/// (lowest to highest) is: defaults, configuration file, environment variables,
/// command-line arguments.
///
/// Configuration files are discovered in this order:
/// 1. Path specified via `PODWIRE_CONFIG_PATH` environment variable
/// 2. `.podwire.toml` in the current working directory
/// 3. `.podwire.toml` in the home directory
/// 4. `~/.config/podwire/config.toml` (XDG default)
#[derive(Debug, Clone, Default, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(
    prefix = "PODWIRE",
    post_merge_hook,
    discovery(
        app_name = "podwire",
        env_var = "PODWIRE_CONFIG_PATH",
        config_file_name = "config.toml",
        dotfile_name = ".podwire.toml",
        config_cli_long = "config",
        config_cli_visible = true,
    )
)]
pub struct AppConfig {
    /// The engine host: `unix://`, `tcp://`, `http://`, `https://`, a bare
    /// socket path, or `host:port`.
    pub engine_host: Option<String>,

    /// Fixed API version such as `1.43`. Negotiated when unset.
    pub api_version: Option<String>,

    /// Per-request timeout in seconds.
    pub timeout_secs: Option<u64>,

    /// TLS configuration for TCP endpoints.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub tls: TlsConfig,

    /// Registry credential configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub registry: RegistryConfig,
}

impl AppConfig {
    /// Returns the per-request timeout, defaulting to two minutes.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout_secs.map_or(DEFAULT_TIMEOUT, Duration::from_secs)
    }

    /// Validates settings that cannot be checked field by field.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for a zero timeout and the errors
    /// described on [`TlsConfig::validate`].
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: String::from("timeout_secs"),
                reason: String::from("must be greater than zero"),
            }
            .into());
        }
        self.tls.validate()
    }
}

impl PostMergeHook for AppConfig {
    fn post_merge(&mut self, _ctx: &PostMergeContext) -> OrthoResult<()> {
        self.engine_host = normalise_optional(self.engine_host.take());
        self.api_version = normalise_optional(self.api_version.take())
            .map(|version| version.trim_start_matches('v').to_owned());
        Ok(())
    }
}

fn normalise_optional(value: Option<String>) -> Option<String> {
    value
        .map(|inner| inner.trim().to_owned())
        .filter(|inner| !inner.is_empty())
}
