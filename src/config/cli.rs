//! Command-line argument definitions for podwire.

use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

use crate::engine::SessionConfig;
use crate::registry::DOCKER_HUB_KEY;

/// Command-line interface for podwire.
#[derive(Debug, Parser)]
#[command(name = "podwire")]
#[command(
    author,
    version,
    about = "Talk to a Docker or Podman daemon directly over its HTTP API"
)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file.
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Engine host: unix:///path, tcp://host:port, https://host:port, or a
    /// socket path.
    #[arg(long, short = 'H', global = true)]
    pub engine_host: Option<String>,

    /// Fixed engine API version such as 1.43.
    #[arg(long, global = true)]
    pub api_version: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Execute a command in a running container.
    Exec(ExecArgs),

    /// Attach local standard streams to a running container.
    Attach(AttachArgs),

    /// Attach to a created container, start it, and wait for it to exit.
    Run(RunArgs),

    /// Log in to a registry and store the credentials.
    Login(LoginArgs),

    /// Remove stored credentials for a registry.
    Logout(LogoutArgs),
}

/// Terminal and input flags shared by the session subcommands.
#[derive(Debug, Clone, Default, Args)]
pub struct StreamArgs {
    /// Keep standard input open and forward it to the container.
    #[arg(short, long)]
    pub interactive: bool,

    /// Allocate a pseudo-terminal.
    #[arg(short, long)]
    pub tty: bool,

    /// Key sequence that detaches from the session.
    #[arg(long)]
    pub detach_keys: Option<String>,

    /// Do not forward received signals to the container.
    #[arg(long)]
    pub no_sig_proxy: bool,

    /// End the session after this many seconds of streaming.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub session_timeout: Option<u64>,
}

impl StreamArgs {
    /// Builds the session options these flags describe.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            tty: self.tty,
            interactive: self.interactive,
            detach_keys: self.detach_keys.clone(),
            proxy_signals: !self.no_sig_proxy,
            timeout: self.session_timeout.map(Duration::from_secs),
            ..SessionConfig::default()
        }
    }
}

/// Arguments for the `exec` subcommand.
#[derive(Debug, Parser)]
pub struct ExecArgs {
    /// Terminal and input flags.
    #[command(flatten)]
    pub stream: StreamArgs,

    /// User to run the command as.
    #[arg(short, long)]
    pub user: Option<String>,

    /// Environment variables in KEY=VALUE form.
    #[arg(short, long)]
    pub env: Vec<String>,

    /// Working directory inside the container.
    #[arg(short, long)]
    pub workdir: Option<String>,

    /// Container ID or name.
    #[arg(required = true)]
    pub container: String,

    /// Command to execute.
    #[arg(required = true, trailing_var_arg = true)]
    pub command: Vec<String>,
}

impl ExecArgs {
    /// Builds the session options for this exec.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            user: self.user.clone(),
            env: self.env.clone(),
            working_dir: self.workdir.clone(),
            ..self.stream.session_config()
        }
    }
}

/// Arguments for the `attach` subcommand.
#[derive(Debug, Parser)]
pub struct AttachArgs {
    /// Terminal and input flags.
    #[command(flatten)]
    pub stream: StreamArgs,

    /// Return as soon as the stream ends instead of collecting the exit code.
    #[arg(long)]
    pub no_wait: bool,

    /// Container ID or name.
    #[arg(required = true)]
    pub container: String,
}

impl AttachArgs {
    /// Builds the session options for this attach.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            wait_for_exit: !self.no_wait,
            ..self.stream.session_config()
        }
    }
}

/// Arguments for the `run` subcommand.
#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Terminal and input flags.
    #[command(flatten)]
    pub stream: StreamArgs,

    /// ID or name of a created, not yet started, container.
    #[arg(required = true)]
    pub container: String,
}

/// Arguments for the `login` subcommand.
#[derive(Debug, Parser)]
pub struct LoginArgs {
    /// Account name.
    #[arg(short, long, required = true)]
    pub username: String,

    /// Password or access token.
    #[arg(short, long, conflicts_with = "password_stdin")]
    pub password: Option<String>,

    /// Read the password from standard input.
    #[arg(long)]
    pub password_stdin: bool,

    /// Registry address.
    #[arg(default_value = DOCKER_HUB_KEY)]
    pub server: String,
}

/// Arguments for the `logout` subcommand.
#[derive(Debug, Parser)]
pub struct LogoutArgs {
    /// Registry address.
    #[arg(default_value = DOCKER_HUB_KEY)]
    pub server: String,
}
