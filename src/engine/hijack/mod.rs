//! Raw-stream hijacking of engine API requests.
//!
//! Exec start and container attach upgrade an ordinary HTTP request into a
//! long-lived duplex byte pipe. The request is serialised by hand and the
//! response head is parsed by hand so that every byte following the head is
//! left in the buffered reader for the session to consume.

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, HOST, UPGRADE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::Serialize;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use tracing::{debug, warn};

use super::dial::Dialer;
use crate::error::EngineError;

/// Upper bound on the size of a response head.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Upper bound on the diagnostic body read from a rejected upgrade.
const DIAGNOSTIC_BODY_LIMIT: usize = 4 * 1024;

/// Deadline for reading the diagnostic body of a rejected upgrade.
const DIAGNOSTIC_DEADLINE: std::time::Duration = std::time::Duration::from_secs(2);

/// A bidirectional byte stream that can back a hijacked connection.
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawStream for T {}

/// Buffered stream underlying a [`HijackedConnection`].
pub type HijackedStream = BufReader<Box<dyn RawStream>>;

/// Reading half of a split hijacked connection.
pub type HijackedReader = ReadHalf<HijackedStream>;

/// Writing half of a split hijacked connection.
pub type HijackedWriter = WriteHalf<HijackedStream>;

/// A request to be upgraded into a raw stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HijackRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Bytes,
    expect_upgrade: bool,
}

impl HijackRequest {
    /// Creates a request with no query, headers, or body.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Bytes::new(),
            expect_upgrade: true,
        }
    }

    /// Creates a `POST` request, the method used by exec start and attach.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Appends a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Appends a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a JSON body and the matching content type.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::TransportError` if the body cannot be serialised.
    pub fn with_json<T: Serialize>(self, body: &T) -> Result<Self, EngineError> {
        let encoded = serde_json::to_vec(body).map_err(|error| EngineError::TransportError {
            message: format!("failed to encode request body: {error}"),
        })?;
        Ok(Self {
            body: Bytes::from(encoded),
            ..self.with_header("Content-Type", "application/json")
        })
    }

    /// Sets whether the daemon is asked to switch protocols.
    ///
    /// When set, `101 Switching Protocols` is accepted in addition to 2xx.
    #[must_use]
    pub const fn with_upgrade(mut self, expect_upgrade: bool) -> Self {
        self.expect_upgrade = expect_upgrade;
        self
    }

    /// Returns the request path without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns whether a protocol upgrade is requested.
    #[must_use]
    pub const fn expect_upgrade(&self) -> bool {
        self.expect_upgrade
    }

    /// Prepends an API version prefix such as `/v1.43` to the path.
    #[must_use]
    pub(crate) fn with_path_prefix(mut self, prefix: &str) -> Self {
        self.path = format!("{prefix}{}", self.path);
        self
    }

    fn target(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.query)
            .finish();
        format!("{}?{query}", self.path)
    }

    fn has_header(&self, name: &HeaderName) -> bool {
        self.headers
            .iter()
            .any(|(existing, _)| existing.eq_ignore_ascii_case(name.as_str()))
    }

    /// Serialises the request head and body as literal HTTP/1.1 bytes.
    fn to_bytes(&self, host: &str) -> Vec<u8> {
        let mut head = format!("{} {} HTTP/1.1\r\n", self.method, self.target());
        let mut push = |name: &str, value: &str| {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        };

        if !self.has_header(&HOST) {
            push("Host", host);
        }
        for (name, value) in &self.headers {
            if !name.eq_ignore_ascii_case(CONTENT_LENGTH.as_str()) {
                push(name, value);
            }
        }
        if self.expect_upgrade {
            if !self.has_header(&CONNECTION) {
                push("Connection", "Upgrade");
            }
            if !self.has_header(&UPGRADE) {
                push("Upgrade", "tcp");
            }
        }
        push("Content-Length", &self.body.len().to_string());
        head.push_str("\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// A connection whose HTTP exchange has completed and which now carries raw
/// session bytes.
///
/// The buffered reader is positioned immediately past the response head, so
/// bytes the daemon sent in the same packet as its headers are not lost.
pub struct HijackedConnection {
    stream: HijackedStream,
    status: StatusCode,
    headers: HeaderMap,
}

impl std::fmt::Debug for HijackedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HijackedConnection")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HijackedConnection {
    /// Wraps a stream that has already been upgraded.
    #[must_use]
    pub fn new(stream: impl RawStream + 'static, status: StatusCode, headers: HeaderMap) -> Self {
        let boxed: Box<dyn RawStream> = Box::new(stream);
        Self {
            stream: BufReader::new(boxed),
            status,
            headers,
        }
    }

    /// Returns the status the daemon answered with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Splits the connection into exactly one reader and one writer.
    #[must_use]
    pub fn into_split(self) -> (HijackedReader, HijackedWriter) {
        tokio::io::split(self.stream)
    }
}

/// Dials the endpoint and upgrades `request` into a raw stream.
///
/// The dial and the HTTP exchange together are bounded by the endpoint
/// timeout. The returned connection itself has no deadline.
///
/// # Errors
///
/// Returns dial errors from [`Dialer::dial`], `EngineError::TransportError`
/// for malformed or oversized response heads, and
/// `EngineError::HijackRejected` when the daemon declines the upgrade.
pub async fn hijack(
    dialer: &Dialer,
    request: &HijackRequest,
) -> Result<HijackedConnection, EngineError> {
    let endpoint = dialer.endpoint();
    let timeout = endpoint.timeout();
    let exchange = async {
        let stream = dialer.dial().await?;
        handshake(stream, request, endpoint.host_header()).await
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| EngineError::TransportError {
            message: format!(
                "timed out after {}s upgrading {} on {endpoint}",
                timeout.as_secs(),
                request.path()
            ),
        })?
}

/// Performs the upgrade exchange over an already connected stream.
///
/// # Errors
///
/// Returns `EngineError::TransportError` when the exchange fails or the head
/// is malformed, and `EngineError::HijackRejected` when the daemon answers
/// with a status other than 101 or 2xx.
pub async fn handshake<S: RawStream + 'static>(
    mut stream: S,
    request: &HijackRequest,
    host: &str,
) -> Result<HijackedConnection, EngineError> {
    stream
        .write_all(&request.to_bytes(host))
        .await
        .map_err(|error| write_failed(&error))?;
    stream.flush().await.map_err(|error| write_failed(&error))?;

    let boxed: Box<dyn RawStream> = Box::new(stream);
    let mut reader = BufReader::new(boxed);
    let (status, headers) = read_response_head(&mut reader).await?;

    let accepted = status.is_success()
        || (request.expect_upgrade() && status == StatusCode::SWITCHING_PROTOCOLS);
    if accepted {
        debug!(path = request.path(), status = status.as_u16(), "stream hijacked");
        return Ok(HijackedConnection {
            stream: reader,
            status,
            headers,
        });
    }

    let message = read_diagnostic(&mut reader, &headers).await;
    if let Err(error) = reader.shutdown().await {
        debug!(%error, "closing rejected connection failed");
    }
    warn!(path = request.path(), status = status.as_u16(), %message, "daemon rejected upgrade");
    Err(EngineError::HijackRejected {
        status: status.as_u16(),
        message,
    })
}

fn write_failed(error: &std::io::Error) -> EngineError {
    EngineError::TransportError {
        message: format!("failed to send upgrade request: {error}"),
    }
}

fn malformed(detail: &str) -> EngineError {
    EngineError::TransportError {
        message: format!("malformed response head: {detail}"),
    }
}

async fn read_response_head(
    reader: &mut HijackedStream,
) -> Result<(StatusCode, HeaderMap), EngineError> {
    let mut budget = MAX_HEAD_BYTES;
    let status_line = read_head_line(reader, &mut budget).await?;
    let status = parse_status_line(&status_line)?;

    let mut headers = HeaderMap::new();
    loop {
        let line = read_head_line(reader, &mut budget).await?;
        if line.is_empty() {
            return Ok((status, headers));
        }
        let (name, value) = parse_header_line(&line)?;
        headers.append(name, value);
    }
}

/// Reads one CRLF- or LF-terminated line, charging its length to `budget`.
async fn read_head_line(
    reader: &mut HijackedStream,
    budget: &mut usize,
) -> Result<Vec<u8>, EngineError> {
    let mut line = Vec::new();
    let limit = u64::try_from(*budget).unwrap_or(u64::MAX);
    let read = (&mut *reader)
        .take(limit)
        .read_until(b'\n', &mut line)
        .await
        .map_err(|error| EngineError::TransportError {
            message: format!("failed to read response head: {error}"),
        })?;

    if read == 0 {
        return Err(EngineError::TransportError {
            message: String::from("connection closed before response head was complete"),
        });
    }
    if line.last() != Some(&b'\n') {
        if read >= *budget {
            return Err(EngineError::TransportError {
                message: format!("response head exceeds {MAX_HEAD_BYTES} bytes"),
            });
        }
        return Err(EngineError::TransportError {
            message: String::from("connection closed before response head was complete"),
        });
    }

    *budget = budget.saturating_sub(read);
    Ok(line.trim_ascii_end().to_vec())
}

fn parse_status_line(line: &[u8]) -> Result<StatusCode, EngineError> {
    let text = String::from_utf8_lossy(line);
    let mut parts = text.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(malformed(&format!("unexpected status line '{text}'")));
    }
    parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| malformed(&format!("invalid status code in '{text}'")))
}

fn parse_header_line(line: &[u8]) -> Result<(HeaderName, HeaderValue), EngineError> {
    let mut parts = line.splitn(2, |byte| *byte == b':');
    let name = parts.next().unwrap_or_default().trim_ascii();
    let value = parts
        .next()
        .ok_or_else(|| malformed("header line without a colon"))?
        .trim_ascii();

    let header_name = HeaderName::from_bytes(name)
        .map_err(|error| malformed(&format!("invalid header name: {error}")))?;
    let header_value = HeaderValue::from_bytes(value)
        .map_err(|error| malformed(&format!("invalid header value: {error}")))?;
    Ok((header_name, header_value))
}

/// Reads a bounded diagnostic snippet from a rejected upgrade.
///
/// The daemon's JSON `message` field is preferred over the raw body text.
async fn read_diagnostic(reader: &mut HijackedStream, headers: &HeaderMap) -> String {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    let limit = declared.map_or(DIAGNOSTIC_BODY_LIMIT, |length| {
        length.min(DIAGNOSTIC_BODY_LIMIT)
    });

    let mut body = Vec::with_capacity(limit);
    let mut limited = (&mut *reader).take(u64::try_from(limit).unwrap_or(u64::MAX));
    let read = limited.read_to_end(&mut body);
    match tokio::time::timeout(DIAGNOSTIC_DEADLINE, read).await {
        Ok(Ok(_)) => {}
        Ok(Err(error)) => debug!(%error, "diagnostic body read failed"),
        Err(_) => debug!("diagnostic body read timed out"),
    }

    diagnostic_message(&body)
}

pub(crate) fn diagnostic_message(body: &[u8]) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        message: String,
    }

    serde_json::from_slice::<ErrorBody>(body).map_or_else(
        |_| String::from_utf8_lossy(body).trim().to_owned(),
        |parsed| parsed.message,
    )
}
