//! Error classification helpers for engine dial and transport failures.
//!
//! This module converts low-level I/O and HTTP errors into semantic
//! `EngineError` variants so callers receive actionable diagnostics.

use std::io;
use std::path::Path;

use crate::engine::endpoint::{EndpointDescriptor, EndpointKind};
use crate::error::EngineError;

/// Returns the filesystem path of a Unix socket endpoint.
///
/// TCP endpoints have no filesystem path and yield `None`.
pub(crate) fn socket_path(endpoint: &EndpointDescriptor) -> Option<&Path> {
    match endpoint.kind() {
        EndpointKind::UnixSocket => Some(Path::new(endpoint.address())),
        EndpointKind::Tcp => None,
    }
}

/// Classify an I/O error kind into a semantic `EngineError`.
///
/// Maps specific `ErrorKind` variants to their corresponding `EngineError`
/// variants when a socket path is available, falling back to
/// `TransportError` for other error kinds or for TCP endpoints.
fn classify_io_error_kind(
    kind: io::ErrorKind,
    socket: Option<&Path>,
    error_msg: &str,
) -> EngineError {
    let transport = || EngineError::TransportError {
        message: error_msg.to_owned(),
    };
    match kind {
        io::ErrorKind::PermissionDenied => socket.map_or_else(transport, |path| {
            EngineError::PermissionDenied {
                path: path.to_path_buf(),
            }
        }),
        io::ErrorKind::NotFound => socket.map_or_else(transport, |path| {
            EngineError::SocketNotFound {
                path: path.to_path_buf(),
            }
        }),
        _ => transport(),
    }
}

/// Classify a failed dial into a semantic `EngineError`.
pub(crate) fn classify_dial_error(error: &io::Error, endpoint: &EndpointDescriptor) -> EngineError {
    let message = format!("failed to connect to {endpoint}: {error}");
    let kind = io_error_kind_in_chain(error).unwrap_or_else(|| error.kind());
    classify_io_error_kind(kind, socket_path(endpoint), &message)
}

/// Classify an HTTP exchange failure into a semantic `EngineError`.
///
/// The source chain is searched for an underlying `io::Error` so that a
/// vanished socket is still reported as such.
pub(crate) fn classify_exchange_error(
    error: &(dyn std::error::Error + 'static),
    endpoint: &EndpointDescriptor,
) -> EngineError {
    let message = format!("request to {endpoint} failed: {error}");
    let direct = error.downcast_ref::<io::Error>().map(io::Error::kind);
    match direct.or_else(|| io_error_kind_in_chain(error)) {
        Some(kind) => classify_io_error_kind(kind, socket_path(endpoint), &message),
        None => EngineError::TransportError { message },
    }
}

/// Walk the error source chain looking for an `io::Error` kind.
fn io_error_kind_in_chain(error: &dyn std::error::Error) -> Option<io::ErrorKind> {
    let mut current: Option<&(dyn std::error::Error + 'static)> = error.source();
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        current = err.source();
    }
    None
}
