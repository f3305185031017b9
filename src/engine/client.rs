//! Daemon operations used by interactive sessions.
//!
//! The [`EngineClient`] trait is the seam between the session orchestrator
//! and the wire: [`Transport`] implements it against a real daemon and tests
//! substitute a mock.

use std::future::Future;
use std::pin::Pin;

use bollard::exec::{CreateExecOptions, CreateExecResults};
use bollard::models::{ContainerWaitResponse, ExecInspectResponse};
use http::StatusCode;

use super::hijack::{HijackRequest, HijackedConnection};
use super::session::TerminalSize;
use super::transport::{ApiRequest, Transport};
use crate::error::EngineError;

/// Boxed future returned by [`EngineClient`] operations.
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EngineError>> + Send + 'a>>;

/// Owned future returned by [`EngineClient::wait_container`].
///
/// The wait runs concurrently with the session, so it must not borrow the
/// client.
pub type WaitFuture = EngineFuture<'static, ContainerWaitResponse>;

/// Condition passed to `POST /containers/{id}/wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    /// Return once the container is not running.
    NotRunning,
    /// Return on the next exit, even if the container has not started yet.
    NextExit,
    /// Return once the container has been removed.
    Removed,
}

impl WaitCondition {
    /// Returns the query value understood by the daemon.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotRunning => "not-running",
            Self::NextExit => "next-exit",
            Self::Removed => "removed",
        }
    }
}

/// Pseudo-terminal owner targeted by a resize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResizeTarget {
    /// An exec instance.
    Exec(String),
    /// A container's primary process.
    Container(String),
}

impl ResizeTarget {
    fn path(&self) -> String {
        match self {
            Self::Exec(id) => format!("/exec/{id}/resize"),
            Self::Container(id) => format!("/containers/{id}/resize"),
        }
    }
}

/// Daemon operations required by the session orchestrator.
pub trait EngineClient: Send + Sync {
    /// Creates an exec instance in a running container.
    fn create_exec(
        &self,
        container_id: &str,
        options: CreateExecOptions<String>,
    ) -> EngineFuture<'_, CreateExecResults>;

    /// Inspects an exec instance for its running state and exit code.
    fn inspect_exec(&self, exec_id: &str) -> EngineFuture<'_, ExecInspectResponse>;

    /// Resizes the pseudo-terminal of an exec instance or container.
    fn resize(&self, target: &ResizeTarget, size: TerminalSize) -> EngineFuture<'_, ()>;

    /// Sends a named signal such as `SIGINT` to a container.
    fn kill_container(&self, container_id: &str, signal: &str) -> EngineFuture<'_, ()>;

    /// Starts a created container.
    fn start_container(&self, container_id: &str) -> EngineFuture<'_, ()>;

    /// Blocks until the container meets `condition`.
    fn wait_container(&self, container_id: &str, condition: WaitCondition) -> WaitFuture;

    /// Upgrades a request into a raw duplex stream.
    fn hijack(&self, request: HijackRequest) -> EngineFuture<'_, HijackedConnection>;
}

impl Transport {
    /// Creates an exec instance with `POST /containers/{id}/exec`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::RequestFailed` when the daemon rejects the
    /// request and transport errors from [`Self::call`].
    pub async fn create_exec(
        &self,
        container_id: &str,
        options: &CreateExecOptions<String>,
    ) -> Result<CreateExecResults, EngineError> {
        self.post_json(
            "create exec",
            &format!("/containers/{container_id}/exec"),
            options,
        )
        .await
    }

    /// Inspects an exec instance with `GET /exec/{id}/json`.
    ///
    /// # Errors
    ///
    /// See [`Self::call_json`].
    pub async fn inspect_exec(&self, exec_id: &str) -> Result<ExecInspectResponse, EngineError> {
        self.get_json("inspect exec", &format!("/exec/{exec_id}/json"))
            .await
    }

    /// Resizes an exec pseudo-terminal.
    ///
    /// # Errors
    ///
    /// See [`Self::call_ok`].
    pub async fn resize_exec(&self, exec_id: &str, size: TerminalSize) -> Result<(), EngineError> {
        self.resize_target(&ResizeTarget::Exec(exec_id.to_owned()), size)
            .await
    }

    /// Resizes a container pseudo-terminal.
    ///
    /// # Errors
    ///
    /// See [`Self::call_ok`].
    pub async fn resize_container(
        &self,
        container_id: &str,
        size: TerminalSize,
    ) -> Result<(), EngineError> {
        self.resize_target(&ResizeTarget::Container(container_id.to_owned()), size)
            .await
    }

    async fn resize_target(&self, target: &ResizeTarget, size: TerminalSize) -> Result<(), EngineError> {
        let request = ApiRequest::post(target.path())
            .with_query("h", size.height.to_string())
            .with_query("w", size.width.to_string());
        self.call_ok("resize", &request).await
    }

    /// Sends `signal` to a container with `POST /containers/{id}/kill`.
    ///
    /// # Errors
    ///
    /// See [`Self::call_ok`].
    pub async fn kill_container(&self, container_id: &str, signal: &str) -> Result<(), EngineError> {
        let request = ApiRequest::post(format!("/containers/{container_id}/kill"))
            .with_query("signal", signal);
        self.call_ok("kill container", &request).await
    }

    /// Starts a container.
    ///
    /// A container that is already running (`304 Not Modified`) counts as
    /// started.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::RequestFailed` for any other non-2xx status.
    pub async fn start_container(&self, container_id: &str) -> Result<(), EngineError> {
        let request = ApiRequest::post(format!("/containers/{container_id}/start"));
        let response = self.call(&request).await?;
        if response.status == StatusCode::NOT_MODIFIED {
            return Ok(());
        }
        response.into_success("start container").map(drop)
    }

    /// Waits for a container with `POST /containers/{id}/wait`.
    ///
    /// The call is exempt from the endpoint timeout.
    ///
    /// # Errors
    ///
    /// See [`Self::call_json`].
    pub async fn wait_container(
        &self,
        container_id: &str,
        condition: WaitCondition,
    ) -> Result<ContainerWaitResponse, EngineError> {
        let request = ApiRequest::post(format!("/containers/{container_id}/wait"))
            .with_query("condition", condition.as_str())
            .unbounded();
        self.call_json("wait container", &request).await
    }
}

impl EngineClient for Transport {
    fn create_exec(
        &self,
        container_id: &str,
        options: CreateExecOptions<String>,
    ) -> EngineFuture<'_, CreateExecResults> {
        let container_id_owned = String::from(container_id);
        Box::pin(async move { Self::create_exec(self, &container_id_owned, &options).await })
    }

    fn inspect_exec(&self, exec_id: &str) -> EngineFuture<'_, ExecInspectResponse> {
        let exec_id_owned = String::from(exec_id);
        Box::pin(async move { Self::inspect_exec(self, &exec_id_owned).await })
    }

    fn resize(&self, target: &ResizeTarget, size: TerminalSize) -> EngineFuture<'_, ()> {
        let target_owned = target.clone();
        Box::pin(async move { self.resize_target(&target_owned, size).await })
    }

    fn kill_container(&self, container_id: &str, signal: &str) -> EngineFuture<'_, ()> {
        let container_id_owned = String::from(container_id);
        let signal_owned = String::from(signal);
        Box::pin(async move {
            Self::kill_container(self, &container_id_owned, &signal_owned).await
        })
    }

    fn start_container(&self, container_id: &str) -> EngineFuture<'_, ()> {
        let container_id_owned = String::from(container_id);
        Box::pin(async move { Self::start_container(self, &container_id_owned).await })
    }

    fn wait_container(&self, container_id: &str, condition: WaitCondition) -> WaitFuture {
        let transport = self.clone();
        let container_id_owned = String::from(container_id);
        Box::pin(async move {
            Self::wait_container(&transport, &container_id_owned, condition).await
        })
    }

    fn hijack(&self, request: HijackRequest) -> EngineFuture<'_, HijackedConnection> {
        Box::pin(async move { Self::hijack(self, request).await })
    }
}
