//! Scenario state for interactive session behavioural tests.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use podwire::api::CommandOutcome;
use rstest::fixture;
use rstest_bdd::Slot;
use rstest_bdd_macros::ScenarioState;
use tokio::io::AsyncWrite;

#[derive(Debug, Clone)]
pub(crate) enum SessionResult {
    Completed(CommandOutcome),
    Failed { message: String },
}

/// An output sink whose contents a step can read back.
#[derive(Clone, Default)]
pub(crate) struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    pub(crate) fn text(&self) -> String {
        self.0
            .lock()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }
}

impl AsyncWrite for Captured {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if let Ok(mut bytes) = self.0.lock() {
            bytes.extend_from_slice(buf);
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Default, ScenarioState)]
pub(crate) struct SessionState {
    /// Multiplexed frames the daemon sends once the stream is upgraded.
    pub(crate) frames: Slot<Vec<u8>>,
    pub(crate) exit_code: Slot<i64>,
    pub(crate) reject_exec_creation: Slot<bool>,
    pub(crate) container_started: Slot<bool>,
    pub(crate) stdout: Slot<Captured>,
    pub(crate) stderr: Slot<Captured>,
    pub(crate) result: Slot<SessionResult>,
}

#[fixture]
pub(crate) fn session_state() -> SessionState {
    let state = SessionState::default();
    state.frames.set(Vec::new());
    state.exit_code.set(0);
    state.reject_exec_creation.set(false);
    state.container_started.set(false);
    state.stdout.set(Captured::default());
    state.stderr.set(Captured::default());
    state
}
