//! Container command execution orchestration.
//!
//! This module provides the library-facing exec orchestration functions that
//! connect to the container engine, run an exec session, and return the
//! command outcome. Terminal detection (whether stdin is a TTY) is the
//! caller's responsibility and travels in [`LocalStreams`].

use crate::config::AppConfig;
use crate::engine::{EngineClient, LocalStreams, Session, SessionConfig};
use crate::error::Result as PodwireResult;

use super::{CommandOutcome, connect};

/// Parameters for executing a command in a running container.
///
/// Groups the arguments required by [`exec`] into a single struct to
/// satisfy the "no more than four parameters" convention.
pub struct ExecParams<'a, E: mockable::Env> {
    /// Application configuration (provides the engine host and TLS).
    pub config: &'a AppConfig,
    /// Target container identifier or name.
    pub container: &'a str,
    /// Command argv to execute.
    pub command: Vec<String>,
    /// Terminal, input, and process options for the exec.
    pub session: SessionConfig,
    /// Local standard streams bridged to the exec.
    pub streams: LocalStreams,
    /// Environment variable provider for host resolution.
    pub env: &'a E,
}

/// Parameters for [`exec_with_client`].
pub struct ExecWithClientParams<'a> {
    /// Target container identifier or name.
    pub container: &'a str,
    /// Command argv to execute.
    pub command: Vec<String>,
    /// Terminal, input, and process options for the exec.
    pub session: SessionConfig,
    /// Local standard streams bridged to the exec.
    pub streams: LocalStreams,
}

/// Execute a command in a running container.
///
/// Resolves the engine host, builds a transport, runs the exec session, and
/// returns the command outcome.
///
/// # Errors
///
/// Returns `PodwireError` variants:
/// - `EngineError::InvalidEndpoint` if the engine host cannot be resolved.
/// - `EngineError::TransportError` / `SocketNotFound` / `PermissionDenied`
///   if the engine cannot be reached.
/// - `EngineError::NotATerminal` for an interactive TTY exec without a
///   terminal.
/// - `ConfigError::MissingRequired` if the command is empty.
pub async fn exec<E: mockable::Env>(params: ExecParams<'_, E>) -> PodwireResult<CommandOutcome> {
    let ExecParams {
        config,
        container,
        command,
        session,
        streams,
        env,
    } = params;

    let transport = connect(config, env)?;
    exec_with_client(
        &transport,
        ExecWithClientParams {
            container,
            command,
            session,
            streams,
        },
    )
    .await
}

/// Execute a command through an existing engine client.
///
/// # Errors
///
/// Returns the session errors described on [`exec`].
pub async fn exec_with_client<C: EngineClient + ?Sized>(
    client: &C,
    params: ExecWithClientParams<'_>,
) -> PodwireResult<CommandOutcome> {
    let ExecWithClientParams {
        container,
        command,
        session,
        streams,
    } = params;

    let outcome = Session::new(client, session)
        .exec(container, command, streams)
        .await?;
    Ok(outcome.into())
}
