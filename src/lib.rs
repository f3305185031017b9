//! Direct Docker and Podman engine API client.
//!
//! `podwire` talks to a container-engine daemon over its HTTP API without a
//! vendor SDK. It reaches the daemon over a Unix socket or TCP with optional
//! TLS, negotiates the API version, and upgrades exec and attach requests
//! into raw duplex streams that an interactive session bridges to the local
//! terminal. A registry negotiator handles anonymous, Basic, and Bearer
//! authentication with a process-wide token cache.
//!
//! # Modules
//!
//! - [`api`]: Orchestration entry points returning a [`api::CommandOutcome`]
//! - [`config`]: Configuration system with layered precedence (CLI > env > file > defaults)
//! - [`engine`]: Endpoint resolution, transport, stream hijacking, and sessions
//! - [`error`]: Semantic error types for the application
//! - [`registry`]: Registry authentication and credential storage

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
