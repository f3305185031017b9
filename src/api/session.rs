//! Attach and run orchestration.

use crate::config::AppConfig;
use crate::engine::{EngineClient, LocalStreams, Session, SessionConfig, Transport};
use crate::error::Result as PodwireResult;

use super::{CommandOutcome, connect};

/// Parameters for [`attach`] and [`run`].
pub struct AttachParams<'a, E: mockable::Env> {
    /// Application configuration (provides the engine host and TLS).
    pub config: &'a AppConfig,
    /// Target container identifier or name.
    pub container: &'a str,
    /// Terminal and input options. `tty` must match the container's own
    /// setting.
    pub session: SessionConfig,
    /// Local standard streams bridged to the container.
    pub streams: LocalStreams,
    /// Environment variable provider for host resolution.
    pub env: &'a E,
}

/// Parameters for [`attach_with_client`] and [`run_with_client`].
pub struct ContainerSessionParams<'a> {
    /// Target container identifier or name.
    pub container: &'a str,
    /// Terminal and input options.
    pub session: SessionConfig,
    /// Local standard streams bridged to the container.
    pub streams: LocalStreams,
}

impl<'a, E: mockable::Env> AttachParams<'a, E> {
    fn into_transport(self) -> PodwireResult<(Transport, ContainerSessionParams<'a>)> {
        let Self {
            config,
            container,
            session,
            streams,
            env,
        } = self;
        let transport = connect(config, env)?;
        Ok((
            transport,
            ContainerSessionParams {
                container,
                session,
                streams,
            },
        ))
    }
}

/// Attach local streams to a running container.
///
/// # Errors
///
/// Returns endpoint and transport errors from connecting, and the session
/// errors described on [`Session::attach`].
pub async fn attach<E: mockable::Env>(params: AttachParams<'_, E>) -> PodwireResult<CommandOutcome> {
    let (transport, session) = params.into_transport()?;
    attach_with_client(&transport, session).await
}

/// Attach through an existing engine client.
///
/// # Errors
///
/// Returns the session errors described on [`Session::attach`].
pub async fn attach_with_client<C: EngineClient + ?Sized>(
    client: &C,
    params: ContainerSessionParams<'_>,
) -> PodwireResult<CommandOutcome> {
    let ContainerSessionParams {
        container,
        session,
        streams,
    } = params;
    let outcome = Session::new(client, session)
        .attach(container, streams)
        .await?;
    Ok(outcome.into())
}

/// Start a created container with local streams attached and wait for it
/// to exit.
///
/// # Errors
///
/// Returns endpoint and transport errors from connecting, and the session
/// errors described on [`Session::run`].
pub async fn run<E: mockable::Env>(params: AttachParams<'_, E>) -> PodwireResult<CommandOutcome> {
    let (transport, session) = params.into_transport()?;
    run_with_client(&transport, session).await
}

/// Run through an existing engine client.
///
/// # Errors
///
/// Returns the session errors described on [`Session::run`].
pub async fn run_with_client<C: EngineClient + ?Sized>(
    client: &C,
    params: ContainerSessionParams<'_>,
) -> PodwireResult<CommandOutcome> {
    let ContainerSessionParams {
        container,
        session,
        streams,
    } = params;
    let outcome = Session::new(client, session).run(container, streams).await?;
    Ok(outcome.into())
}
