//! `podwire` application entry point.
//!
//! The binary is a thin adapter over [`podwire::api`]. It uses `eyre` for
//! opaque error handling at the application boundary, converting
//! domain-specific errors into human-readable reports, and maps command
//! outcomes to the process exit code.
//!
//! Configuration is loaded with layered precedence via `OrthoConfig`:
//! 1. Application defaults
//! 2. Configuration file (`~/.config/podwire/config.toml` or path from `PODWIRE_CONFIG_PATH`)
//! 3. Environment variables (`PODWIRE_*`)
//! 4. Command-line arguments
//!
//! Diagnostics go to stderr through `tracing`, filtered by `PODWIRE_LOG`
//! (default `warn`).

use std::future::Future;
use std::io::BufRead;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use eyre::{Report, Result as EyreResult};
use mockable::DefaultEnv;
use podwire::api::{self, AttachParams, CommandOutcome, ExecParams, LoginParams};
use podwire::config::{AppConfig, Cli, Commands, LoginArgs, load_config};
use podwire::engine::LocalStreams;
use podwire::error::{ConfigError, EngineError, Result as PodwireResult};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directives.
const LOG_ENV_VAR: &str = "PODWIRE_LOG";

/// How long runtime shutdown waits for blocking work such as a pending
/// stdin read.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Application entry point.
///
/// Loads configuration with layered precedence via `OrthoConfig`, then dispatches
/// to the appropriate subcommand handler.
fn main() -> EyreResult<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    // The CLI is passed through to pick up --config, --engine-host and friends.
    let config = load_config(&cli).map_err(Report::from)?;

    let outcome = run(&cli, &config).map_err(Report::from)?;
    Ok(exit_code(outcome))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Execute the CLI command, returning domain-specific errors.
///
/// Keeps semantic errors inside the run loop so the CLI boundary owns
/// conversion to `eyre::Report`.
fn run(cli: &Cli, config: &AppConfig) -> PodwireResult<CommandOutcome> {
    let env = DefaultEnv::new();

    match &cli.command {
        Commands::Exec(args) => block_on(api::exec(ExecParams {
            config,
            container: &args.container,
            command: args.command.clone(),
            session: args.session_config(),
            streams: LocalStreams::process(),
            env: &env,
        })),
        Commands::Attach(args) => block_on(api::attach(AttachParams {
            config,
            container: &args.container,
            session: args.session_config(),
            streams: LocalStreams::process(),
            env: &env,
        })),
        Commands::Run(args) => block_on(api::run(AttachParams {
            config,
            container: &args.container,
            session: args.stream.session_config(),
            streams: LocalStreams::process(),
            env: &env,
        })),
        Commands::Login(args) => {
            let password = read_password(args)?;
            block_on(api::login(LoginParams {
                config,
                server: &args.server,
                username: &args.username,
                password: &password,
                env: &env,
            }))
        }
        Commands::Logout(args) => api::logout(config, &args.server, &env),
    }
}

/// Runs `future` on a fresh runtime and shuts the runtime down without
/// waiting on blocking reads that can never finish, such as tokio's stdin
/// once the remote side has ended the session.
fn block_on<F>(future: F) -> PodwireResult<CommandOutcome>
where
    F: Future<Output = PodwireResult<CommandOutcome>>,
{
    let runtime =
        tokio::runtime::Runtime::new().map_err(|error| EngineError::RuntimeCreationFailed {
            message: error.to_string(),
        })?;
    let outcome = runtime.block_on(future);
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    outcome
}

/// Returns the password from `--password` or the first line of stdin.
fn read_password(args: &LoginArgs) -> PodwireResult<String> {
    if !args.password_stdin {
        return args.password.clone().ok_or_else(|| {
            ConfigError::MissingRequired {
                field: String::from("password (use --password or --password-stdin)"),
            }
            .into()
        });
    }

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|error| ConfigError::InvalidValue {
            field: String::from("password-stdin"),
            reason: format!("failed to read standard input: {error}"),
        })?;
    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        return Err(ConfigError::MissingRequired {
            field: String::from("password"),
        }
        .into());
    }
    Ok(password.to_owned())
}

/// Maps a command outcome to the process exit status.
///
/// Remote exit codes outside `1..=255` report a generic failure.
fn exit_code(outcome: CommandOutcome) -> ExitCode {
    match outcome {
        CommandOutcome::Success => ExitCode::SUCCESS,
        CommandOutcome::CommandExit { code } => u8::try_from(code)
            .ok()
            .filter(|status| *status != 0)
            .map_or(ExitCode::FAILURE, ExitCode::from),
    }
}
