//! Configuration system for podwire.
//!
//! This module provides the configuration structures, CLI definitions, and
//! layered loader for the podwire application. Precedence merging is handled
//! by the `ortho_config` crate: CLI flags override environment variables,
//! which override configuration files, which override defaults.
//!
//! The configuration file is expected at `~/.config/podwire/config.toml` by default.
//!
//! # Example Configuration
//!
//! ```toml
//! engine_host = "tcp://build-host:2376"
//! api_version = "1.43"
//! timeout_secs = 60
//!
//! [tls]
//! verify = true
//! ca_cert = "/home/user/.docker/ca.pem"
//! client_cert = "/home/user/.docker/cert.pem"
//! client_key = "/home/user/.docker/key.pem"
//!
//! [registry]
//! config_dir = "/home/user/.docker"
//! ```

mod cli;
mod loader;
mod types;


pub use cli::{
    AttachArgs, Cli, Commands, ExecArgs, LoginArgs, LogoutArgs, RunArgs, StreamArgs,
};
pub use loader::{env_var_names, load_config, load_config_with_env};
pub use types::{AppConfig, RegistryConfig, TlsConfig};
