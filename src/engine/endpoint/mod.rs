//! Engine host resolution and endpoint classification.
//!
//! This module turns the engine host string into an [`EndpointDescriptor`]
//! that the dialer can connect to. The host string itself is resolved through
//! a priority-based fallback chain:
//!
//! 1. Explicit configuration (`--engine-host`, `engine_host` in TOML, or
//!    `PODWIRE_ENGINE_HOST`)
//! 2. `DOCKER_HOST` environment variable
//! 3. `CONTAINER_HOST` environment variable
//! 4. `PODMAN_HOST` environment variable
//! 5. Platform default (`unix:///var/run/docker.sock`)

use std::fmt;
use std::time::Duration;

use camino::Utf8PathBuf;
use url::Url;

use crate::error::EngineError;

/// Environment variable names checked in fallback order after configuration sources.
const FALLBACK_ENV_VARS: &[&str] = &["DOCKER_HOST", "CONTAINER_HOST", "PODMAN_HOST"];

/// Default engine host for Unix platforms.
const DEFAULT_HOST: &str = "unix:///var/run/docker.sock";

/// Default port for plain-text TCP engine endpoints.
pub const DEFAULT_PLAIN_PORT: u16 = 2375;

/// Default port for TLS engine endpoints.
pub const DEFAULT_TLS_PORT: u16 = 2376;

/// Default per-call timeout applied to engine requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const UNIX_SCHEME_PREFIX: &str = "unix://";

/// Resolves the engine host string from environment variables.
///
/// The resolver checks a prioritised list of environment variables to find
/// the engine host when no explicit configuration is provided.
///
/// # Type Parameters
///
/// * `E` - An environment provider implementing the `mockable::Env` trait,
///   allowing for testable environment variable access.
pub struct HostResolver<'a, E: mockable::Env> {
    env: &'a E,
}

impl<'a, E: mockable::Env> HostResolver<'a, E> {
    /// Creates a new host resolver with the given environment provider.
    #[must_use]
    pub const fn new(env: &'a E) -> Self {
        Self { env }
    }

    /// Resolves the engine host from fallback environment variables.
    ///
    /// Returns `None` if no fallback variable is set or all are empty.
    #[must_use]
    pub fn resolve_from_env(&self) -> Option<String> {
        FALLBACK_ENV_VARS
            .iter()
            .filter_map(|var_name| self.env.string(var_name))
            .find(|value| !value.trim().is_empty())
    }

    /// Returns the platform default engine host.
    #[must_use]
    pub const fn default_host() -> &'static str {
        DEFAULT_HOST
    }

    /// Resolves the engine host without classifying it.
    ///
    /// Resolution order:
    /// 1. `config_host` (from CLI, config file, or `PODWIRE_ENGINE_HOST`)
    /// 2. `DOCKER_HOST`, `CONTAINER_HOST`, `PODMAN_HOST`
    /// 3. Platform default
    #[must_use]
    pub fn resolve_host(&self, config_host: Option<&str>) -> String {
        config_host
            .filter(|host| !host.trim().is_empty())
            .map(String::from)
            .or_else(|| self.resolve_from_env())
            .unwrap_or_else(|| Self::default_host().to_owned())
    }

    /// Resolves the engine host and classifies it into a dialable endpoint.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidEndpoint` when the resolved host cannot be
    /// classified.
    pub fn resolve(
        &self,
        config_host: Option<&str>,
        tls: &TlsOptions,
        timeout: Duration,
    ) -> Result<EndpointDescriptor, EngineError> {
        let host = self.resolve_host(config_host);
        EndpointDescriptor::parse(&host, tls, timeout)
    }
}

/// TLS settings supplied alongside the engine host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Use TLS for `tcp://`, `http://` and bare `host:port` endpoints.
    pub force: bool,
    /// Use TLS for `tcp://` endpoints when certificate material is supplied.
    pub verify: bool,
    /// Accept any server certificate.
    pub skip_verify: bool,
    /// PEM bundle of certificate authorities trusted for the daemon.
    pub ca_cert: Option<Utf8PathBuf>,
    /// PEM client certificate chain presented to the daemon.
    pub client_cert: Option<Utf8PathBuf>,
    /// PEM private key matching `client_cert`.
    pub client_key: Option<Utf8PathBuf>,
}

impl TlsOptions {
    const fn has_material(&self) -> bool {
        self.ca_cert.is_some() || self.client_cert.is_some() || self.client_key.is_some()
    }

    fn material(&self) -> TlsMaterial {
        TlsMaterial {
            ca_cert: self.ca_cert.clone(),
            client_cert: self.client_cert.clone(),
            client_key: self.client_key.clone(),
            skip_verify: self.skip_verify,
        }
    }
}

/// Certificate material used to establish a TLS session with the daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    /// Trusted certificate authorities. Public web roots are used when unset.
    pub ca_cert: Option<Utf8PathBuf>,
    /// Client certificate chain for mutual TLS.
    pub client_cert: Option<Utf8PathBuf>,
    /// Private key for the client certificate.
    pub client_key: Option<Utf8PathBuf>,
    /// Skip server certificate verification.
    pub skip_verify: bool,
}

/// Transport family selected for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Local interprocess Unix-domain socket.
    UnixSocket,
    /// TCP connection, optionally wrapped in TLS.
    Tcp,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnixSocket => f.write_str("unix"),
            Self::Tcp => f.write_str("tcp"),
        }
    }
}

/// An immutable, classified engine endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    kind: EndpointKind,
    address: String,
    server_name: String,
    tls: Option<TlsMaterial>,
    timeout: Duration,
}

impl EndpointDescriptor {
    /// Classifies a host string into an endpoint.
    ///
    /// Supported shapes:
    /// - `unix:///path/to/socket` or a bare absolute path select the Unix
    ///   socket transport. TLS options are ignored.
    /// - bare `host:port` is treated as `tcp://host:port`.
    /// - `tcp://` and `http://` are plain TCP unless TLS is forced. `tcp://`
    ///   also uses TLS when `verify` is set and certificate material exists.
    /// - `https://` always uses TLS.
    ///
    /// A missing port defaults to 2375, or 2376 when TLS is in use.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidEndpoint` when the string is empty, names
    /// an unsupported scheme, cannot be parsed, or lacks a hostname.
    pub fn parse(host: &str, tls: &TlsOptions, timeout: Duration) -> Result<Self, EngineError> {
        let trimmed = host.trim();
        if trimmed.is_empty() {
            return Err(invalid(host, "engine host is empty"));
        }

        if let Some(path) = trimmed.strip_prefix(UNIX_SCHEME_PREFIX) {
            return Self::unix(host, path, timeout);
        }
        if trimmed.starts_with('/') {
            return Self::unix(host, trimmed, timeout);
        }

        let (scheme, authority) = trimmed.split_once("://").unwrap_or(("", trimmed));
        let use_tls = match scheme.to_ascii_lowercase().as_str() {
            "" => tls.force,
            "tcp" => tls.force || (tls.verify && tls.has_material()),
            "http" => tls.force,
            "https" => true,
            other => {
                return Err(invalid(host, &format!("unsupported scheme '{other}'")));
            }
        };

        Self::tcp(host, authority, use_tls.then(|| tls.material()), timeout)
    }

    fn unix(original: &str, path: &str, timeout: Duration) -> Result<Self, EngineError> {
        if path.is_empty() {
            return Err(invalid(original, "missing socket path"));
        }

        Ok(Self {
            kind: EndpointKind::UnixSocket,
            address: path.to_owned(),
            server_name: String::from("localhost"),
            tls: None,
            timeout,
        })
    }

    fn tcp(
        original: &str,
        authority: &str,
        tls: Option<TlsMaterial>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        // A non-special scheme keeps explicit ports such as :80 or :443 that
        // `url` would otherwise normalise away for http and https.
        let parsed = Url::parse(&format!("tcp://{authority}"))
            .map_err(|error| invalid(original, &error.to_string()))?;

        let hostname = parsed
            .host_str()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| invalid(original, "missing hostname"))?;

        let default_port = if tls.is_some() {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PLAIN_PORT
        };
        let port = parsed.port().unwrap_or(default_port);

        Ok(Self {
            kind: EndpointKind::Tcp,
            address: format!("{hostname}:{port}"),
            server_name: hostname.trim_start_matches('[').trim_end_matches(']').to_owned(),
            tls,
            timeout,
        })
    }

    /// Returns the transport family.
    #[must_use]
    pub const fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Returns the socket path for Unix endpoints or `host:port` for TCP.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the hostname used for TLS server name indication.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Returns the TLS material when the endpoint uses TLS.
    #[must_use]
    pub const fn tls(&self) -> Option<&TlsMaterial> {
        self.tls.as_ref()
    }

    /// Returns the per-call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the value sent in the HTTP `Host` header.
    #[must_use]
    pub fn host_header(&self) -> &str {
        match self.kind {
            EndpointKind::UnixSocket => "localhost",
            EndpointKind::Tcp => &self.address,
        }
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.tls.is_some()) {
            (EndpointKind::UnixSocket, _) => write!(f, "unix://{}", self.address),
            (EndpointKind::Tcp, true) => write!(f, "https://{}", self.address),
            (EndpointKind::Tcp, false) => write!(f, "tcp://{}", self.address),
        }
    }
}

fn invalid(endpoint: &str, reason: &str) -> EngineError {
    EngineError::InvalidEndpoint {
        endpoint: endpoint.to_owned(),
        reason: reason.to_owned(),
    }
}
