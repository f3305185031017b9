//! Raw byte-stream dialling for engine endpoints.
//!
//! Every dial yields a fresh, unpooled connection. The request transport and
//! the stream hijacker both dial through the same [`Dialer`].

mod error_classification;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

pub(crate) use error_classification::classify_exchange_error;
use error_classification::classify_dial_error;

use super::endpoint::{EndpointDescriptor, EndpointKind};
use super::tls::build_connector;
use crate::error::EngineError;

/// A connected byte stream to the engine daemon.
#[derive(Debug)]
pub enum EngineStream {
    /// Unix-domain socket connection.
    #[cfg(unix)]
    Unix(UnixStream),
    /// Plain TCP connection.
    Tcp(TcpStream),
    /// TLS session over TCP.
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for EngineStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for EngineStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Opens connections to a single engine endpoint.
pub struct Dialer {
    endpoint: EndpointDescriptor,
    tls: Option<TlsConnector>,
}

impl Dialer {
    /// Creates a dialer, loading TLS material when the endpoint requires it.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidEndpoint` when TLS material cannot be
    /// loaded.
    pub fn new(endpoint: EndpointDescriptor) -> Result<Self, EngineError> {
        let tls = endpoint
            .tls()
            .map(|material| build_connector(material, &endpoint.to_string()))
            .transpose()?;
        Ok(Self { endpoint, tls })
    }

    /// Returns the endpoint this dialer connects to.
    #[must_use]
    pub const fn endpoint(&self) -> &EndpointDescriptor {
        &self.endpoint
    }

    /// Opens a new connection, bounded by the endpoint timeout.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::SocketNotFound` or `EngineError::PermissionDenied`
    /// for Unix socket failures, and `EngineError::TransportError` otherwise.
    pub async fn dial(&self) -> Result<EngineStream, EngineError> {
        let timeout = self.endpoint.timeout();
        let stream = tokio::time::timeout(timeout, self.connect())
            .await
            .map_err(|_| EngineError::TransportError {
                message: format!(
                    "timed out after {}s connecting to {}",
                    timeout.as_secs(),
                    self.endpoint
                ),
            })??;
        debug!(endpoint = %self.endpoint, "dialled engine");
        Ok(stream)
    }

    async fn connect(&self) -> Result<EngineStream, EngineError> {
        match self.endpoint.kind() {
            EndpointKind::UnixSocket => self.connect_unix().await,
            EndpointKind::Tcp => {
                let tcp = TcpStream::connect(self.endpoint.address())
                    .await
                    .map_err(|error| classify_dial_error(&error, &self.endpoint))?;
                // Interactive sessions send keystrokes one byte at a time.
                tcp.set_nodelay(true)
                    .map_err(|error| classify_dial_error(&error, &self.endpoint))?;
                match self.tls.as_ref() {
                    Some(connector) => self.wrap_tls(connector, tcp).await,
                    None => Ok(EngineStream::Tcp(tcp)),
                }
            }
        }
    }

    #[cfg(unix)]
    async fn connect_unix(&self) -> Result<EngineStream, EngineError> {
        UnixStream::connect(self.endpoint.address())
            .await
            .map(EngineStream::Unix)
            .map_err(|error| classify_dial_error(&error, &self.endpoint))
    }

    #[cfg(not(unix))]
    #[expect(
        clippy::unused_async,
        reason = "signature matches the Unix implementation"
    )]
    async fn connect_unix(&self) -> Result<EngineStream, EngineError> {
        Err(EngineError::TransportError {
            message: format!("Unix sockets are not supported on this platform: {}", self.endpoint),
        })
    }

    async fn wrap_tls(
        &self,
        connector: &TlsConnector,
        tcp: TcpStream,
    ) -> Result<EngineStream, EngineError> {
        let server_name = rustls::pki_types::ServerName::try_from(
            self.endpoint.server_name().to_owned(),
        )
        .map_err(|error| EngineError::InvalidEndpoint {
            endpoint: self.endpoint.to_string(),
            reason: format!("invalid TLS server name: {error}"),
        })?;

        connector
            .connect(server_name, tcp)
            .await
            .map(|stream| EngineStream::Tls(Box::new(stream)))
            .map_err(|error| EngineError::TransportError {
                message: format!("TLS handshake with {} failed: {error}", self.endpoint),
            })
    }
}
