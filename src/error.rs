//! Semantic error types for the podwire library.
//!
//! This module defines the error hierarchy for podwire, following the principle of
//! using semantic error enums (via `thiserror`) for conditions the caller might
//! inspect, retry, or map to an exit status, while reserving opaque errors
//! (`eyre::Report`) for the application boundary.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be parsed.
    #[error("failed to parse configuration file: {message}")]
    ParseError {
        /// A description of the parse error.
        message: String,
    },

    /// A required configuration value is missing.
    #[error("missing required configuration: {field}")]
    MissingRequired {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// The reason the value is invalid.
        reason: String,
    },

    /// The `OrthoConfig` library returned an error during configuration loading.
    #[error("configuration loading failed: {0}")]
    OrthoConfig(Arc<ortho_config::OrthoError>),
}

/// Errors raised while talking to the container engine daemon.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine host string or its TLS material could not be turned into a
    /// dialable endpoint.
    #[error("invalid engine endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// The endpoint as supplied by the caller.
        endpoint: String,
        /// Why the endpoint was rejected.
        reason: String,
    },

    /// Dialling or exchanging bytes with the daemon failed.
    #[error("engine transport error: {message}")]
    TransportError {
        /// A description of the network failure.
        message: String,
    },

    /// The engine socket was not found.
    #[error("container engine socket not found: {path}")]
    SocketNotFound {
        /// The path where the socket was expected.
        path: PathBuf,
    },

    /// Permission denied when accessing the engine socket.
    #[error("permission denied accessing container socket: {path}")]
    PermissionDenied {
        /// The path to the socket.
        path: PathBuf,
    },

    /// The daemon declined to upgrade a request into a raw stream.
    #[error("daemon rejected stream upgrade with status {status}: {message}")]
    HijackRejected {
        /// HTTP status code returned by the daemon.
        status: u16,
        /// Diagnostic text read from the response body.
        message: String,
    },

    /// Interactive TTY mode was requested but local stdin is not a terminal.
    #[error("the input device is not a TTY")]
    NotATerminal,

    /// A read or write on an established session failed before streaming began.
    #[error("session I/O failed: {message}")]
    SessionIo {
        /// A description of the I/O failure.
        message: String,
    },

    /// An ordinary API call returned a non-success status.
    #[error("{operation} failed with status {status}: {message}")]
    RequestFailed {
        /// The logical operation, for example `create exec`.
        operation: String,
        /// HTTP status code returned by the daemon.
        status: u16,
        /// Message extracted from the daemon's error body.
        message: String,
    },

    /// The daemon answered with a body that could not be decoded.
    #[error("failed to decode {operation} response: {message}")]
    InvalidResponse {
        /// The logical operation whose response was malformed.
        operation: String,
        /// A description of the decoding failure.
        message: String,
    },

    /// Health check failed - engine did not respond correctly.
    #[error("container engine health check failed: {message}")]
    HealthCheckFailed {
        /// A description of the health check failure.
        message: String,
    },

    /// Health check timed out.
    #[error("container engine health check timed out after {seconds} seconds")]
    HealthCheckTimeout {
        /// The timeout duration in seconds.
        seconds: u64,
    },

    /// Failed to create a runtime for a blocking entry point.
    #[error("failed to create async runtime: {message}")]
    RuntimeCreationFailed {
        /// A description of the runtime failure.
        message: String,
    },
}

/// Errors that can occur while negotiating registry authentication.
#[derive(Debug, Error)]
pub enum RegistryAuthError {
    /// The registry answered the probe with an unexpected status or named an
    /// authentication scheme this client does not speak.
    #[error("unsupported registry authentication scheme: {scheme}")]
    UnsupportedScheme {
        /// The scheme token, or a status description for unexpected probes.
        scheme: String,
    },

    /// A bearer challenge did not name a realm.
    #[error("bearer challenge is missing a realm")]
    MissingRealm,

    /// The realm refused to issue a token.
    #[error("token exchange with '{realm}' failed with status {status}")]
    TokenExchangeFailed {
        /// The realm URL that was contacted.
        realm: String,
        /// HTTP status code returned by the realm.
        status: u16,
    },

    /// The realm answered 200 but the envelope contained no token.
    #[error("token endpoint '{realm}' returned an empty token")]
    EmptyToken {
        /// The realm URL that was contacted.
        realm: String,
    },

    /// The registry rejected Basic credentials.
    #[error("registry '{registry}' rejected credentials with status {status}")]
    CredentialsRejected {
        /// The registry host.
        registry: String,
        /// HTTP status code returned by the registry.
        status: u16,
    },

    /// The registry endpoint string could not be parsed.
    #[error("invalid registry endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// The endpoint as supplied by the caller.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The HTTP exchange with the registry or realm failed.
    #[error("registry request failed: {message}")]
    RequestFailed {
        /// A description of the failure.
        message: String,
    },

    /// The credential store could not be read or updated.
    #[error("credential store error: {message}")]
    CredentialStore {
        /// A description of the store failure.
        message: String,
    },
}

/// Top-level error type for the podwire library.
///
/// This enum aggregates all domain-specific errors into a single type that can
/// be used throughout the library. At the application boundary (main.rs),
/// these errors are converted to `eyre::Report` for human-readable reporting.
#[derive(Debug, Error)]
pub enum PodwireError {
    /// An error occurred during configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error occurred while talking to the engine.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// An error occurred during registry authentication.
    #[error(transparent)]
    RegistryAuth(#[from] RegistryAuthError),
}

/// A specialised `Result` type for podwire operations.
pub type Result<T> = std::result::Result<T, PodwireError>;
