//! Given/When steps for interactive session scenarios.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bollard::exec::{CreateExecOptions, CreateExecResults};
use bollard::models::{ContainerWaitResponse, ExecInspectResponse};
use bytes::{BufMut, BytesMut};
use http::{HeaderMap, StatusCode};
use mockall::mock;
use podwire::api::{
    CommandOutcome, ContainerSessionParams, ExecWithClientParams, attach_with_client,
    exec_with_client, run_with_client,
};
use podwire::engine::{
    EngineClient, EngineFuture, HijackRequest, HijackedConnection, LocalStreams, ResizeTarget,
    SessionConfig, TerminalSize, WaitCondition, WaitFuture,
};
use podwire::error::{EngineError, Result as PodwireResult};
use rstest_bdd_macros::{given, when};
use tokio::io::AsyncWriteExt;

use super::state::{SessionResult, SessionState};

pub type StepResult<T> = Result<T, String>;

const PIPE_CAPACITY: usize = 64 * 1024;

mock! {
    #[derive(Debug)]
    Engine {}

    impl EngineClient for Engine {
        fn create_exec(&self, container_id: &str, options: CreateExecOptions<String>) -> EngineFuture<'_, CreateExecResults>;
        fn inspect_exec(&self, exec_id: &str) -> EngineFuture<'_, ExecInspectResponse>;
        fn resize(&self, target: &ResizeTarget, size: TerminalSize) -> EngineFuture<'_, ()>;
        fn kill_container(&self, container_id: &str, signal: &str) -> EngineFuture<'_, ()>;
        fn start_container(&self, container_id: &str) -> EngineFuture<'_, ()>;
        fn wait_container(&self, container_id: &str, condition: WaitCondition) -> WaitFuture;
        fn hijack(&self, request: HijackRequest) -> EngineFuture<'_, HijackedConnection>;
    }
}

fn append_frame(state: &SessionState, selector: u8, payload: &str) -> StepResult<()> {
    let length = u32::try_from(payload.len()).map_err(|error| error.to_string())?;
    let mut frames = BytesMut::from(state.frames.get().unwrap_or_default().as_slice());
    frames.put_u8(selector);
    frames.put_bytes(0, 3);
    frames.put_u32(length);
    frames.put_slice(payload.as_bytes());
    state.frames.set(frames.to_vec());
    Ok(())
}

#[given("the remote process writes {text} to standard output")]
fn remote_writes_stdout(session_state: &SessionState, text: String) -> StepResult<()> {
    append_frame(session_state, 1, &text)
}

#[given("the remote process writes {text} to standard error")]
fn remote_writes_stderr(session_state: &SessionState, text: String) -> StepResult<()> {
    append_frame(session_state, 2, &text)
}

#[given("the remote process exits with code {code}")]
fn remote_exits_with_code(session_state: &SessionState, code: i64) {
    session_state.exit_code.set(code);
}

#[given("the daemon rejects exec creation")]
fn daemon_rejects_exec_creation(session_state: &SessionState) {
    session_state.reject_exec_creation.set(true);
}

/// Answers the hijack with an upgraded in-memory stream preloaded with
/// `frames`. The daemon side is dropped so the session sees end of stream.
fn expect_hijack(client: &mut MockEngine, path: String, frames: Vec<u8>) {
    client
        .expect_hijack()
        .times(1)
        .return_once(move |request| {
            assert_eq!(request.path(), path);
            Box::pin(async move {
                let (local, mut remote) = tokio::io::duplex(PIPE_CAPACITY);
                remote
                    .write_all(&frames)
                    .await
                    .map_err(|error| EngineError::SessionIo {
                        message: error.to_string(),
                    })?;
                drop(remote);
                Ok::<_, EngineError>(HijackedConnection::new(
                    local,
                    StatusCode::OK,
                    HeaderMap::new(),
                ))
            })
        });
}

fn expect_create_exec(client: &mut MockEngine, expected_command: Vec<String>) {
    client
        .expect_create_exec()
        .times(1)
        .returning(move |_, options| {
            assert_eq!(options.cmd.as_ref(), Some(&expected_command));
            Box::pin(async {
                Ok(CreateExecResults {
                    id: String::from("bdd-exec"),
                })
            })
        });
}

fn quiet_session() -> SessionConfig {
    SessionConfig {
        proxy_signals: false,
        ..SessionConfig::default()
    }
}

fn local_streams(state: &SessionState) -> LocalStreams {
    LocalStreams::new(
        Box::new(tokio::io::empty()),
        Box::new(state.stdout.get().unwrap_or_default()),
        Box::new(state.stderr.get().unwrap_or_default()),
    )
}

fn record(state: &SessionState, result: PodwireResult<CommandOutcome>) {
    match result {
        Ok(outcome) => state.result.set(SessionResult::Completed(outcome)),
        Err(error) => state.result.set(SessionResult::Failed {
            message: error.to_string(),
        }),
    }
}

fn runtime() -> StepResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|error| format!("failed to create runtime: {error}"))
}

#[when("exec of {command} is requested in container {container}")]
fn exec_is_requested(
    session_state: &SessionState,
    command: String,
    container: String,
) -> StepResult<()> {
    let exit_code = session_state.exit_code.get().unwrap_or(0);
    let mut client = MockEngine::new();

    if session_state.reject_exec_creation.get().unwrap_or(false) {
        client.expect_create_exec().times(1).returning(|_, _| {
            Box::pin(async {
                Err(EngineError::RequestFailed {
                    operation: String::from("create exec"),
                    status: 500,
                    message: String::from("container is paused"),
                })
            })
        });
        client.expect_hijack().never();
    } else {
        expect_create_exec(&mut client, vec![command.clone()]);
        expect_hijack(
            &mut client,
            String::from("/exec/bdd-exec/start"),
            session_state.frames.get().unwrap_or_default(),
        );
        client.expect_inspect_exec().returning(move |_| {
            Box::pin(async move {
                Ok(ExecInspectResponse {
                    running: Some(false),
                    exit_code: Some(exit_code),
                    ..ExecInspectResponse::default()
                })
            })
        });
    }

    let result = runtime()?.block_on(exec_with_client(
        &client,
        ExecWithClientParams {
            container: &container,
            command: vec![command],
            session: quiet_session(),
            streams: local_streams(session_state),
        },
    ));
    record(session_state, result);
    Ok(())
}

fn expect_wait(client: &mut MockEngine, condition: WaitCondition, exit_code: i64) {
    client
        .expect_wait_container()
        .withf(move |_, requested| *requested == condition)
        .times(1)
        .returning(move |_, _| {
            Box::pin(async move {
                Ok(ContainerWaitResponse {
                    status_code: exit_code,
                    ..ContainerWaitResponse::default()
                })
            })
        });
}

#[when("attach is requested to container {container}")]
fn attach_is_requested(session_state: &SessionState, container: String) -> StepResult<()> {
    let mut client = MockEngine::new();
    expect_hijack(
        &mut client,
        format!("/containers/{container}/attach"),
        session_state.frames.get().unwrap_or_default(),
    );
    expect_wait(
        &mut client,
        WaitCondition::NotRunning,
        session_state.exit_code.get().unwrap_or(0),
    );

    let result = runtime()?.block_on(attach_with_client(
        &client,
        ContainerSessionParams {
            container: &container,
            session: quiet_session(),
            streams: local_streams(session_state),
        },
    ));
    record(session_state, result);
    Ok(())
}

#[when("run is requested for container {container}")]
fn run_is_requested(session_state: &SessionState, container: String) -> StepResult<()> {
    let started = Arc::new(AtomicBool::new(false));
    let mut client = MockEngine::new();
    expect_hijack(
        &mut client,
        format!("/containers/{container}/attach"),
        session_state.frames.get().unwrap_or_default(),
    );
    expect_wait(
        &mut client,
        WaitCondition::NextExit,
        session_state.exit_code.get().unwrap_or(0),
    );
    let observed = Arc::clone(&started);
    client.expect_start_container().times(1).returning(move |_| {
        observed.store(true, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    });

    let result = runtime()?.block_on(run_with_client(
        &client,
        ContainerSessionParams {
            container: &container,
            session: quiet_session(),
            streams: local_streams(session_state),
        },
    ));
    record(session_state, result);
    session_state
        .container_started
        .set(started.load(Ordering::SeqCst));
    Ok(())
}
