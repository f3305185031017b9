//! Container engine transport and interactive sessions.
//!
//! The daemon endpoint is resolved through a priority-based fallback chain:
//!
//! 1. CLI argument (`--engine-host`)
//! 2. Config file (`engine_host` in TOML)
//! 3. `PODWIRE_ENGINE_HOST` environment variable
//! 4. `DOCKER_HOST` environment variable
//! 5. `CONTAINER_HOST` environment variable
//! 6. `PODMAN_HOST` environment variable
//! 7. Platform default (`unix:///var/run/docker.sock`)
//!
//! Requests travel over [`Transport`], which negotiates the API version once
//! and dials a fresh connection per call. Exec, attach, and run sessions
//! upgrade a request into a raw stream with [`hijack`] and are driven by
//! [`Session`].

pub mod client;
mod dial;
pub mod endpoint;
pub mod hijack;
pub mod session;
#[cfg(test)]
pub(crate) mod test_support;
mod tls;
pub mod transport;

pub use client::{EngineClient, EngineFuture, ResizeTarget, WaitCondition, WaitFuture};
pub use dial::{Dialer, EngineStream};
pub use endpoint::{EndpointDescriptor, EndpointKind, HostResolver, TlsMaterial, TlsOptions};
pub use hijack::{HijackRequest, HijackedConnection};
pub use session::{
    CloseReason, LocalStreams, Session, SessionConfig, SessionOutcome, SessionState, TerminalSize,
};
pub use transport::{ApiRequest, RawResponse, Transport};
