//! Orchestration API for podwire commands.
//!
//! This module provides public orchestration functions for each podwire
//! command: [`exec`], [`attach`], [`run`], [`login`], and [`logout`]. They
//! hold the business logic behind the CLI adapter and are equally usable by
//! library embedders.
//!
//! All functions accept library-owned types (not clap types) and return
//! [`crate::error::Result<CommandOutcome>`]. They do not print to
//! stdout/stderr or call `std::process::exit`.

mod exec;
mod login;
mod session;

pub use exec::{ExecParams, ExecWithClientParams, exec, exec_with_client};
pub use login::{LoginParams, login, login_with_negotiator, logout};
pub use session::{
    AttachParams, ContainerSessionParams, attach, attach_with_client, run, run_with_client,
};

use crate::config::AppConfig;
use crate::engine::{HostResolver, SessionOutcome, Transport};
use crate::error::Result as PodwireResult;

/// Outcome of a podwire command.
///
/// Commands return either outright success or a command-specific exit code
/// that the CLI adapter maps to a process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command completed successfully (exit code 0).
    Success,
    /// The command completed but the remote process exited with a non-zero
    /// code.
    CommandExit {
        /// The exit code reported by the container engine.
        code: i64,
    },
}

impl CommandOutcome {
    /// Maps a remote exit code to an outcome.
    ///
    /// A missing code, as after a cancelled session, counts as success.
    #[must_use]
    pub const fn from_exit_code(code: Option<i64>) -> Self {
        match code {
            Some(code) if code != 0 => Self::CommandExit { code },
            _ => Self::Success,
        }
    }
}

impl From<SessionOutcome> for CommandOutcome {
    fn from(outcome: SessionOutcome) -> Self {
        Self::from_exit_code(outcome.exit_code)
    }
}

/// Resolves the engine endpoint from configuration and the environment and
/// builds a transport for it.
///
/// # Errors
///
/// Returns `EngineError::InvalidEndpoint` when the resolved host cannot be
/// classified or its TLS material cannot be loaded.
pub fn connect<E: mockable::Env>(config: &AppConfig, env: &E) -> PodwireResult<Transport> {
    let resolver = HostResolver::new(env);
    let endpoint = resolver.resolve(
        config.engine_host.as_deref(),
        &config.tls.options(),
        config.timeout(),
    )?;
    Ok(Transport::connect(endpoint, config.api_version.clone())?)
}
