//! Interactive exec, attach, and run sessions over hijacked streams.
//!
//! A session moves through `Created → Attached → Streaming → Draining →
//! Closed`. While streaming it copies local input to the daemon, demultiplexes
//! or copies output back, and relays terminal resizes (with a TTY) or signals
//! (without one). Once the stream ends, or the session is cancelled, both copy
//! directions are joined, the terminal is restored, and the connection is
//! closed exactly once before the exit status is collected.

mod closer;
mod demux;
mod signals;
mod terminal;

use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bollard::container::LogOutput;
use bollard::exec::CreateExecOptions;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use self::closer::ConnectionCloser;
pub use self::demux::OutputCodec;
pub use self::signals::{ForwardedSignal, OsSignals, SignalSource};
pub use self::terminal::{SystemTerminalSizeProvider, TerminalSize, TerminalSizeProvider};
use self::terminal::RawModeGuard;
use super::client::{EngineClient, ResizeTarget, WaitCondition};
use super::hijack::{HijackRequest, HijackedConnection, HijackedReader, HijackedWriter};
use crate::error::{ConfigError, EngineError, PodwireError};

const EXEC_INSPECT_POLL_INTERVAL_MS: u64 = 100;

/// How long a run session waits for the `next-exit` result after the stream
/// ends before re-checking with `not-running`.
const RUN_WAIT_GRACE: Duration = Duration::from_secs(5);

/// Local input handed to a session.
pub type LocalReader = Box<dyn AsyncRead + Send + Unpin>;

/// Local output handed to a session.
pub type LocalWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Options controlling an interactive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Allocate a pseudo-terminal; output is then a raw byte stream.
    pub tty: bool,
    /// Forward local stdin to the remote process.
    pub interactive: bool,
    /// User to run an exec as.
    pub user: Option<String>,
    /// Extra environment in `KEY=value` form for an exec.
    pub env: Vec<String>,
    /// Working directory for an exec.
    pub working_dir: Option<String>,
    /// Key sequence that detaches from the session, such as `ctrl-p,ctrl-q`.
    pub detach_keys: Option<String>,
    /// Relay `SIGINT`, `SIGTERM`, `SIGHUP`, and `SIGQUIT` when no TTY is
    /// allocated.
    pub proxy_signals: bool,
    /// Report the container exit code after an attach session ends.
    pub wait_for_exit: bool,
    /// Cancel the session once it has streamed for this long.
    pub timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tty: false,
            interactive: false,
            user: None,
            env: Vec::new(),
            working_dir: None,
            detach_keys: None,
            proxy_signals: true,
            wait_for_exit: true,
            timeout: None,
        }
    }
}

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection has been opened.
    Created,
    /// The stream has been hijacked.
    Attached,
    /// Copy tasks are running.
    Streaming,
    /// The stream ended and tasks are being joined.
    Draining,
    /// The connection is closed and the terminal restored.
    Closed,
}

/// Why the stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The daemon ended the output stream.
    RemoteEof,
    /// The session was cancelled locally.
    Cancelled,
}

/// Result of a completed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Exit code of the remote process, when it could be determined.
    pub exit_code: Option<i64>,
    /// What ended the stream.
    pub closed_by: CloseReason,
}

/// Local streams bridged to the remote process.
pub struct LocalStreams {
    stdin: LocalReader,
    stdout: LocalWriter,
    stderr: LocalWriter,
    stdin_is_terminal: bool,
}

impl LocalStreams {
    /// Wraps arbitrary streams. The input is treated as a non-terminal.
    #[must_use]
    pub fn new(stdin: LocalReader, stdout: LocalWriter, stderr: LocalWriter) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
            stdin_is_terminal: false,
        }
    }

    /// Uses the process's standard streams.
    #[must_use]
    pub fn process() -> Self {
        Self {
            stdin: Box::new(tokio::io::stdin()),
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
            stdin_is_terminal: std::io::stdin().is_terminal(),
        }
    }

    /// Overrides whether the input is an interactive terminal.
    #[must_use]
    pub const fn with_terminal_input(mut self, is_terminal: bool) -> Self {
        self.stdin_is_terminal = is_terminal;
        self
    }

    /// Returns whether the input is an interactive terminal.
    #[must_use]
    pub const fn stdin_is_terminal(&self) -> bool {
        self.stdin_is_terminal
    }
}

impl std::fmt::Debug for LocalStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStreams")
            .field("stdin_is_terminal", &self.stdin_is_terminal)
            .finish_non_exhaustive()
    }
}

struct StateTracker<'a> {
    target: &'a str,
    state: SessionState,
}

impl<'a> StateTracker<'a> {
    const fn new(target: &'a str) -> Self {
        Self {
            target,
            state: SessionState::Created,
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug!(target_id = self.target, from = ?self.state, to = ?next, "session state changed");
        self.state = next;
    }
}

/// Drives one interactive session against an engine.
pub struct Session<'c, C: EngineClient + ?Sized> {
    client: &'c C,
    config: SessionConfig,
    size_provider: Box<dyn TerminalSizeProvider>,
    signals: Box<dyn SignalSource>,
    cancel: CancellationToken,
    closes: Arc<AtomicUsize>,
}

impl<'c, C: EngineClient + ?Sized> Session<'c, C> {
    /// Creates a session using the system terminal and OS signals.
    #[must_use]
    pub fn new(client: &'c C, config: SessionConfig) -> Self {
        Self {
            client,
            config,
            size_provider: Box::new(SystemTerminalSizeProvider),
            signals: Box::new(OsSignals),
            cancel: CancellationToken::new(),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replaces the terminal size source.
    #[must_use]
    pub fn with_size_provider(mut self, provider: impl TerminalSizeProvider + 'static) -> Self {
        self.size_provider = Box::new(provider);
        self
    }

    /// Replaces the signal source.
    #[must_use]
    pub fn with_signal_source(mut self, source: impl SignalSource + 'static) -> Self {
        self.signals = Box::new(source);
        self
    }

    /// Uses `token` to cancel the session from outside.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns a token that force-closes the session when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns how many hijacked connections this session has closed.
    #[must_use]
    pub fn connections_closed(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }

    /// Returns the session options.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs `command` in a running container and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotATerminal` before connecting when an
    /// interactive TTY session is requested without a terminal,
    /// `ConfigError::MissingRequired` for an empty command, and engine errors
    /// from creating, starting, or inspecting the exec instance.
    pub async fn exec(
        &self,
        container_id: &str,
        command: Vec<String>,
        streams: LocalStreams,
    ) -> Result<SessionOutcome, PodwireError> {
        self.ensure_terminal(&streams)?;
        let mut tracker = StateTracker::new(container_id);
        let options = self.create_exec_options(validate_command(command)?);

        let exec_id = self.client.create_exec(container_id, options).await?.id;
        let connection = self
            .client
            .hijack(exec_start_request(&exec_id, self.config.tty)?)
            .await?;
        tracker.advance(SessionState::Attached);
        info!(container_id, exec_id = %exec_id, tty = self.config.tty, "exec session attached");

        let closed_by = self
            .stream(
                &mut tracker,
                connection,
                &ResizeTarget::Exec(exec_id.clone()),
                container_id,
                streams,
            )
            .await?;
        let exit_code = self.exec_exit_code(&exec_id).await?;
        Ok(SessionOutcome {
            exit_code,
            closed_by,
        })
    }

    /// Attaches to a running container.
    ///
    /// When [`SessionConfig::wait_for_exit`] is set and the daemon ends the
    /// stream, the container's exit code is collected with a `not-running`
    /// wait.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotATerminal` before connecting when an
    /// interactive TTY session is requested without a terminal, and engine
    /// errors from the attach or wait calls.
    pub async fn attach(
        &self,
        container_id: &str,
        streams: LocalStreams,
    ) -> Result<SessionOutcome, PodwireError> {
        self.ensure_terminal(&streams)?;
        let mut tracker = StateTracker::new(container_id);

        let connection = self.client.hijack(self.attach_request(container_id)).await?;
        tracker.advance(SessionState::Attached);
        info!(container_id, tty = self.config.tty, "attach session attached");

        let closed_by = self
            .stream(
                &mut tracker,
                connection,
                &ResizeTarget::Container(container_id.to_owned()),
                container_id,
                streams,
            )
            .await?;

        let exit_code = if closed_by == CloseReason::RemoteEof && self.config.wait_for_exit {
            let response = self
                .client
                .wait_container(container_id, WaitCondition::NotRunning)
                .await?;
            Some(response.status_code)
        } else {
            None
        };
        Ok(SessionOutcome {
            exit_code,
            closed_by,
        })
    }

    /// Attaches to a created container, starts it, and waits for it to exit.
    ///
    /// The attach is established and the `next-exit` wait issued before the
    /// container starts so no output or exit status is missed.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotATerminal` before connecting when an
    /// interactive TTY session is requested without a terminal, and engine
    /// errors from the attach, start, or wait calls.
    pub async fn run(
        &self,
        container_id: &str,
        streams: LocalStreams,
    ) -> Result<SessionOutcome, PodwireError> {
        self.ensure_terminal(&streams)?;
        let mut tracker = StateTracker::new(container_id);

        let connection = self.client.hijack(self.attach_request(container_id)).await?;
        tracker.advance(SessionState::Attached);

        let wait = tokio::spawn(
            self.client
                .wait_container(container_id, WaitCondition::NextExit),
        );
        if let Err(error) = self.client.start_container(container_id).await {
            wait.abort();
            drop(connection);
            return Err(error.into());
        }
        info!(container_id, tty = self.config.tty, "run session started");

        let closed_by = self
            .stream(
                &mut tracker,
                connection,
                &ResizeTarget::Container(container_id.to_owned()),
                container_id,
                streams,
            )
            .await?;

        let exit_code = match closed_by {
            CloseReason::RemoteEof => Some(self.join_run_wait(container_id, wait).await?),
            CloseReason::Cancelled => {
                wait.abort();
                None
            }
        };
        Ok(SessionOutcome {
            exit_code,
            closed_by,
        })
    }

    fn ensure_terminal(&self, streams: &LocalStreams) -> Result<(), EngineError> {
        if self.config.interactive && self.config.tty && !streams.stdin_is_terminal {
            return Err(EngineError::NotATerminal);
        }
        Ok(())
    }

    fn create_exec_options(&self, command: Vec<String>) -> CreateExecOptions<String> {
        CreateExecOptions::<String> {
            attach_stdin: Some(self.config.interactive),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(self.config.tty),
            env: (!self.config.env.is_empty()).then(|| self.config.env.clone()),
            cmd: Some(command),
            user: self.config.user.clone(),
            working_dir: self.config.working_dir.clone(),
            detach_keys: self.config.detach_keys.clone(),
            ..CreateExecOptions::default()
        }
    }

    fn attach_request(&self, container_id: &str) -> HijackRequest {
        let stdin = if self.config.interactive { "1" } else { "0" };
        let request = HijackRequest::post(format!("/containers/{container_id}/attach"))
            .with_query("stream", "1")
            .with_query("stdin", stdin)
            .with_query("stdout", "1")
            .with_query("stderr", "1");
        match self.config.detach_keys.as_deref() {
            Some(keys) => request.with_query("detachKeys", keys),
            None => request,
        }
    }

    async fn stream(
        &self,
        tracker: &mut StateTracker<'_>,
        connection: HijackedConnection,
        resize_target: &ResizeTarget,
        container_id: &str,
        streams: LocalStreams,
    ) -> Result<CloseReason, EngineError> {
        let LocalStreams {
            stdin,
            mut stdout,
            mut stderr,
            stdin_is_terminal,
        } = streams;

        let raw_mode = if self.config.tty && stdin_is_terminal {
            Some(RawModeGuard::enable().map_err(|error| EngineError::SessionIo {
                message: format!("failed to enable raw terminal mode: {error}"),
            })?)
        } else {
            None
        };
        let mut events = self.subscribe_events()?;

        let (reader, writer) = connection.into_split();
        let closer = ConnectionCloser::new();
        let input_task = spawn_input_forwarding(
            self.config.interactive.then_some(stdin),
            writer,
            closer.clone(),
        );
        tracker.advance(SessionState::Streaming);

        if self.config.tty {
            self.resize_remote(resize_target).await;
        }

        let mut output = FramedRead::new(reader, OutputCodec::for_tty(self.config.tty));
        let closed_by = self
            .pump_output(
                &mut output,
                &mut stdout,
                &mut stderr,
                &mut events,
                resize_target,
                container_id,
            )
            .await;

        tracker.advance(SessionState::Draining);
        if closer.close() {
            self.closes.fetch_add(1, Ordering::AcqRel);
            debug!(container_id, reason = ?closed_by, "closing hijacked connection");
        }
        drop(output);
        match input_task.await {
            Ok(mut writer) => {
                if let Err(error) = writer.shutdown().await {
                    debug!(%error, "hijacked connection shutdown reported an error");
                }
            }
            Err(error) => warn!(%error, "input forwarding task failed"),
        }
        drop(raw_mode);
        tracker.advance(SessionState::Closed);
        Ok(closed_by)
    }

    fn subscribe_events(&self) -> Result<SessionEvents, EngineError> {
        let subscription_failed = |error: std::io::Error| EngineError::SessionIo {
            message: format!("failed to subscribe to local signals: {error}"),
        };
        let resizes = if self.config.tty {
            self.signals.resize_events().map_err(subscription_failed)?
        } else {
            stream::pending().boxed()
        };
        let forwarded = if !self.config.tty && self.config.proxy_signals {
            self.signals
                .forwarded_signals()
                .map_err(subscription_failed)?
        } else {
            stream::pending().boxed()
        };
        // With a TTY the local process owns the terminal, so termination
        // requests end the session instead of killing it in raw mode.
        let interrupts = if self.config.tty {
            self.signals.interrupts().map_err(subscription_failed)?
        } else {
            stream::pending().boxed()
        };
        Ok(SessionEvents {
            resizes,
            forwarded,
            interrupts,
        })
    }

    #[expect(
        clippy::integer_division_remainder_used,
        reason = "false positive triggered inside tokio::select! expansion"
    )]
    async fn pump_output(
        &self,
        output: &mut FramedRead<HijackedReader, OutputCodec>,
        stdout: &mut LocalWriter,
        stderr: &mut LocalWriter,
        events: &mut SessionEvents,
        resize_target: &ResizeTarget,
        container_id: &str,
    ) -> CloseReason {
        let deadline = async {
            match self.config.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return CloseReason::Cancelled,
                () = &mut deadline => {
                    info!(container_id, "session timed out; cancelling");
                    self.cancel.cancel();
                    return CloseReason::Cancelled;
                }
                interrupt = events.interrupts.next() => match interrupt {
                    Some(signal) => {
                        info!(container_id, signal = signal.name(), "local interrupt; cancelling session");
                        self.cancel.cancel();
                        return CloseReason::Cancelled;
                    }
                    None => events.interrupts = stream::pending().boxed(),
                },
                chunk = output.next() => match chunk {
                    Some(Ok(item)) => {
                        if let Err(error) = write_output(item, stdout, stderr).await {
                            warn!(%error, "local output failed; ending session");
                            return CloseReason::RemoteEof;
                        }
                    }
                    Some(Err(error)) => {
                        warn!(%error, "session stream failed; treating as end of stream");
                        return CloseReason::RemoteEof;
                    }
                    None => return CloseReason::RemoteEof,
                },
                resize = events.resizes.next() => match resize {
                    Some(()) => self.resize_remote(resize_target).await,
                    None => events.resizes = stream::pending().boxed(),
                },
                signal = events.forwarded.next() => match signal {
                    Some(forwarded) => self.forward_signal(container_id, forwarded).await,
                    None => events.forwarded = stream::pending().boxed(),
                },
            }
        }
    }

    async fn resize_remote(&self, target: &ResizeTarget) {
        let Some(size) = self.size_provider.terminal_size() else {
            return;
        };
        if let Err(error) = self.client.resize(target, size).await {
            warn!(%error, ?target, "failed to resize remote terminal");
        }
    }

    async fn forward_signal(&self, container_id: &str, signal: ForwardedSignal) {
        debug!(container_id, signal = signal.name(), "forwarding signal");
        if let Err(error) = self.client.kill_container(container_id, signal.name()).await {
            warn!(%error, container_id, signal = signal.name(), "failed to forward signal");
        }
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, EngineError> {
        loop {
            let inspect = self.client.inspect_exec(exec_id).await?;
            if !inspect.running.unwrap_or(false) {
                return inspect.exit_code.map(Some).ok_or_else(|| {
                    EngineError::InvalidResponse {
                        operation: String::from("inspect exec"),
                        message: format!("exec '{exec_id}' finished without an exit code"),
                    }
                });
            }
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(EXEC_INSPECT_POLL_INTERVAL_MS)).await;
        }
    }

    async fn join_run_wait(
        &self,
        container_id: &str,
        mut wait: JoinHandle<Result<bollard::models::ContainerWaitResponse, EngineError>>,
    ) -> Result<i64, EngineError> {
        let joined = match tokio::time::timeout(RUN_WAIT_GRACE, &mut wait).await {
            Ok(joined) => joined,
            Err(_) => {
                // The next-exit wait may have registered after the exit.
                wait.abort();
                debug!(container_id, "next-exit wait still pending; checking not-running");
                return self
                    .client
                    .wait_container(container_id, WaitCondition::NotRunning)
                    .await
                    .map(|response| response.status_code);
            }
        };
        let response = joined.map_err(|error| EngineError::SessionIo {
            message: format!("container wait task failed: {error}"),
        })??;
        if let Some(message) = response.error.as_ref().and_then(|error| error.message.as_deref()) {
            warn!(container_id, %message, "container wait reported an error");
        }
        Ok(response.status_code)
    }
}

struct SessionEvents {
    resizes: BoxStream<'static, ()>,
    forwarded: BoxStream<'static, ForwardedSignal>,
    interrupts: BoxStream<'static, ForwardedSignal>,
}

fn exec_start_request(exec_id: &str, tty: bool) -> Result<HijackRequest, EngineError> {
    HijackRequest::post(format!("/exec/{exec_id}/start"))
        .with_json(&serde_json::json!({"Detach": false, "Tty": tty}))
}

fn spawn_input_forwarding(
    stdin: Option<LocalReader>,
    writer: HijackedWriter,
    closer: ConnectionCloser,
) -> JoinHandle<HijackedWriter> {
    tokio::spawn(forward_input(stdin, writer, closer))
}

/// Copies local input until EOF, half-closing the write side, then holds the
/// writer until the connection closes.
#[expect(
    clippy::integer_division_remainder_used,
    reason = "false positive triggered inside tokio::select! expansion"
)]
async fn forward_input(
    stdin: Option<LocalReader>,
    mut writer: HijackedWriter,
    closer: ConnectionCloser,
) -> HijackedWriter {
    if let Some(mut input) = stdin {
        tokio::select! {
            copied = tokio::io::copy(&mut input, &mut writer) => match copied {
                Ok(bytes) => {
                    debug!(bytes, "local input reached EOF; half-closing");
                    if let Err(error) = writer.shutdown().await {
                        debug!(%error, "half-close failed");
                    }
                }
                Err(error) => warn!(%error, "input copy failed; treating as end of input"),
            },
            () = closer.closed() => return writer,
        }
    }
    closer.closed().await;
    writer
}

async fn write_output(
    item: LogOutput,
    stdout: &mut LocalWriter,
    stderr: &mut LocalWriter,
) -> std::io::Result<()> {
    let (target, message) = match item {
        LogOutput::StdErr { message } => (stderr, message),
        LogOutput::StdOut { message }
        | LogOutput::Console { message }
        | LogOutput::StdIn { message } => (stdout, message),
    };
    target.write_all(&message).await?;
    target.flush().await
}

fn validate_command(command: Vec<String>) -> Result<Vec<String>, ConfigError> {
    match command.first() {
        None => Err(ConfigError::MissingRequired {
            field: String::from("command"),
        }),
        Some(executable) if executable.trim().is_empty() => Err(ConfigError::InvalidValue {
            field: String::from("command"),
            reason: String::from("command executable must not be empty"),
        }),
        Some(_) => Ok(command),
    }
}
