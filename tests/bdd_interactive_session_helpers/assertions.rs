//! Then-step assertions for interactive session scenarios.

use podwire::api::CommandOutcome;
use rstest_bdd_macros::then;

use super::state::{SessionResult, SessionState};
use super::steps::StepResult;

fn recorded_outcome(state: &SessionState) -> StepResult<CommandOutcome> {
    match state.result.get() {
        Some(SessionResult::Completed(outcome)) => Ok(outcome),
        Some(SessionResult::Failed { message }) => {
            Err(format!("expected the session to complete, got failure: {message}"))
        }
        None => Err(String::from("session result should be recorded")),
    }
}

#[then("the outcome is a command exit with code {code}")]
fn outcome_is_command_exit(session_state: &SessionState, code: i64) -> StepResult<()> {
    let outcome = recorded_outcome(session_state)?;
    if outcome == (CommandOutcome::CommandExit { code }) {
        Ok(())
    } else {
        Err(format!("expected exit code {code}, got {outcome:?}"))
    }
}

#[then("the outcome is success")]
fn outcome_is_success(session_state: &SessionState) -> StepResult<()> {
    let outcome = recorded_outcome(session_state)?;
    if outcome == CommandOutcome::Success {
        Ok(())
    } else {
        Err(format!("expected success, got {outcome:?}"))
    }
}

#[then("local standard output contains {text}")]
fn stdout_contains(session_state: &SessionState, text: String) -> StepResult<()> {
    let stdout = session_state.stdout.get().unwrap_or_default().text();
    if stdout.contains(&text) {
        Ok(())
    } else {
        Err(format!("expected stdout to contain {text:?}, got {stdout:?}"))
    }
}

#[then("local standard error contains {text}")]
fn stderr_contains(session_state: &SessionState, text: String) -> StepResult<()> {
    let stderr = session_state.stderr.get().unwrap_or_default().text();
    if stderr.contains(&text) {
        Ok(())
    } else {
        Err(format!("expected stderr to contain {text:?}, got {stderr:?}"))
    }
}

#[then("local standard output is empty")]
fn stdout_is_empty(session_state: &SessionState) -> StepResult<()> {
    let stdout = session_state.stdout.get().unwrap_or_default().text();
    if stdout.is_empty() {
        Ok(())
    } else {
        Err(format!("expected empty stdout, got {stdout:?}"))
    }
}

// Matches `EngineError::RequestFailed`, rendered as
// "{operation} failed with status {status}: {message}".
#[then("the session fails with a daemon error")]
fn session_fails_with_daemon_error(session_state: &SessionState) -> StepResult<()> {
    match session_state.result.get() {
        Some(SessionResult::Failed { message })
            if message.contains("create exec failed with status 500") =>
        {
            Ok(())
        }
        Some(SessionResult::Failed { message }) => {
            Err(format!("expected a create exec failure, got: {message}"))
        }
        Some(SessionResult::Completed(outcome)) => {
            Err(format!("expected failure, got {outcome:?}"))
        }
        None => Err(String::from("session result should be recorded")),
    }
}

#[then("the container was started")]
fn container_was_started(session_state: &SessionState) -> StepResult<()> {
    if session_state.container_started.get().unwrap_or(false) {
        Ok(())
    } else {
        Err(String::from("expected the container to be started"))
    }
}
