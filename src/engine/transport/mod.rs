//! Versioned HTTP/1.1 request transport for the engine API.
//!
//! Each call dials a fresh connection, performs a single hyper HTTP/1.1
//! exchange, and collects the full response body. Non-2xx responses are
//! returned to the caller rather than raised.

use std::sync::Arc;
use std::time::Duration;

use bollard::models::SystemVersion;
use bytes::Bytes;
use http::header::HOST;
use http::{HeaderMap, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::dial::{Dialer, classify_exchange_error};
use super::endpoint::EndpointDescriptor;
use super::hijack::{self, HijackRequest, HijackedConnection, diagnostic_message};
use crate::error::EngineError;

/// Unversioned path used to discover the daemon's API version.
pub const VERSION_PATH: &str = "/version";

/// Path answered by the daemon's liveness probe.
pub const PING_PATH: &str = "/_ping";

/// Timeout in seconds for health check operations.
const HEALTH_CHECK_TIMEOUT_SECS: u64 = 10;

/// A single engine API request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Bytes,
    bounded: bool,
}

impl ApiRequest {
    /// Creates a request with no query, headers, or body.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Bytes::new(),
            bounded: true,
        }
    }

    /// Creates a `GET` request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Creates a `POST` request.
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

    /// Removes the endpoint timeout for long-polling calls such as
    /// container wait.
    #[must_use]
    pub const fn unbounded(mut self) -> Self {
        self.bounded = false;
        self
    }

    /// Returns the logical path without version prefix or query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the request method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Builds the request target with the given version prefix.
    #[must_use]
    pub fn target(&self, prefix: &str) -> String {
        if self.query.is_empty() {
            return format!("{prefix}{}", self.path);
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.query)
            .finish();
        format!("{prefix}{}?{query}", self.path)
    }
}

/// A fully collected engine API response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Complete response body.
    pub body: Bytes,
}

impl RawResponse {
    /// Returns whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns the daemon's error message, preferring the JSON `message` field.
    #[must_use]
    pub fn error_message(&self) -> String {
        let message = diagnostic_message(&self.body);
        if message.is_empty() {
            self.status
                .canonical_reason()
                .unwrap_or("no response body")
                .to_owned()
        } else {
            message
        }
    }

    /// Converts a non-2xx response into `EngineError::RequestFailed`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::RequestFailed` when the status is not 2xx.
    pub fn into_success(self, operation: &str) -> Result<Self, EngineError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(EngineError::RequestFailed {
            operation: operation.to_owned(),
            status: self.status.as_u16(),
            message: self.error_message(),
        })
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidResponse` if the body does not decode.
    pub fn json<T: DeserializeOwned>(&self, operation: &str) -> Result<T, EngineError> {
        serde_json::from_slice(&self.body).map_err(|error| EngineError::InvalidResponse {
            operation: operation.to_owned(),
            message: error.to_string(),
        })
    }
}

struct TransportInner {
    dialer: Dialer,
    version: OnceCell<Option<String>>,
}

/// Sends versioned requests to one engine endpoint.
///
/// Cloning is cheap and clones share the negotiated API version.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", self.inner.dialer.endpoint())
            .field("version", &self.inner.version.get())
            .finish()
    }
}

impl Transport {
    /// Creates a transport over `dialer`.
    ///
    /// An explicit `api_version` such as `1.43` skips negotiation.
    #[must_use]
    pub fn new(dialer: Dialer, api_version: Option<String>) -> Self {
        let version = api_version
            .filter(|value| !value.trim().is_empty())
            .map_or_else(OnceCell::new, |value| {
                OnceCell::new_with(Some(Some(normalise_version(&value))))
            });
        Self {
            inner: Arc::new(TransportInner { dialer, version }),
        }
    }

    /// Creates a transport for `endpoint`, loading TLS material as needed.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidEndpoint` when TLS material cannot be
    /// loaded.
    pub fn connect(
        endpoint: EndpointDescriptor,
        api_version: Option<String>,
    ) -> Result<Self, EngineError> {
        Ok(Self::new(Dialer::new(endpoint)?, api_version))
    }

    /// Returns the endpoint this transport talks to.
    #[must_use]
    pub fn endpoint(&self) -> &EndpointDescriptor {
        self.inner.dialer.endpoint()
    }

    /// Returns the negotiated API version, negotiating on first use.
    ///
    /// `None` means negotiation failed and paths are sent unversioned.
    pub async fn api_version(&self) -> Option<String> {
        self.inner
            .version
            .get_or_init(|| self.negotiate())
            .await
            .clone()
    }

    async fn version_prefix(&self) -> String {
        self.api_version()
            .await
            .map(|version| format!("/v{version}"))
            .unwrap_or_default()
    }

    async fn negotiate(&self) -> Option<String> {
        let request = ApiRequest::get(VERSION_PATH);
        let response = match self.send(&request, "").await {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "API version negotiation failed; using unversioned paths");
                return None;
            }
        };

        if !response.is_success() {
            warn!(
                status = response.status.as_u16(),
                "API version negotiation rejected; using unversioned paths"
            );
            return None;
        }

        match response.json::<SystemVersion>("version negotiation") {
            Ok(SystemVersion {
                api_version: Some(version),
                ..
            }) if !version.is_empty() => {
                debug!(%version, "negotiated engine API version");
                Some(normalise_version(&version))
            }
            Ok(_) => {
                warn!("daemon did not report an API version; using unversioned paths");
                None
            }
            Err(error) => {
                warn!(%error, "API version negotiation failed; using unversioned paths");
                None
            }
        }
    }

    /// Sends `request`, prefixing its path with the negotiated version.
    ///
    /// The negotiation path itself is always sent unversioned.
    ///
    /// # Errors
    ///
    /// Returns dial errors from [`Dialer::dial`] and
    /// `EngineError::TransportError` when the exchange fails or times out.
    pub async fn call(&self, request: &ApiRequest) -> Result<RawResponse, EngineError> {
        let prefix = if request.path() == VERSION_PATH {
            String::new()
        } else {
            self.version_prefix().await
        };
        self.send(request, &prefix).await
    }

    async fn send(&self, request: &ApiRequest, prefix: &str) -> Result<RawResponse, EngineError> {
        let target = request.target(prefix);
        let exchange = self.exchange(request, &target);
        if !request.bounded {
            return exchange.await;
        }

        let timeout = self.endpoint().timeout();
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| EngineError::TransportError {
                message: format!(
                    "{} {target} timed out after {}s",
                    request.method(),
                    timeout.as_secs()
                ),
            })?
    }

    async fn exchange(&self, request: &ApiRequest, target: &str) -> Result<RawResponse, EngineError> {
        let endpoint = self.endpoint();
        let stream = self.inner.dialer.dial().await?;
        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|error| classify_exchange_error(&error, endpoint))?;

        tokio::spawn(async move {
            if let Err(error) = connection.await {
                debug!(%error, "engine connection closed with error");
            }
        });

        let mut builder = http::Request::builder()
            .method(request.method().clone())
            .uri(target)
            .header(HOST, endpoint.host_header());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let http_request =
            builder
                .body(Full::new(request.body.clone()))
                .map_err(|error| EngineError::TransportError {
                    message: format!("failed to build request for {target}: {error}"),
                })?;

        let response = sender
            .send_request(http_request)
            .await
            .map_err(|error| classify_exchange_error(&error, endpoint))?;
        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|error| classify_exchange_error(&error, endpoint))?
            .to_bytes();

        debug!(method = %request.method(), %target, status = parts.status.as_u16(), "engine call");
        Ok(RawResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    /// Sends `request` and decodes a successful JSON response.
    ///
    /// # Errors
    ///
    /// Returns transport errors from [`Self::call`],
    /// `EngineError::RequestFailed` for non-2xx statuses, and
    /// `EngineError::InvalidResponse` for undecodable bodies.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: &ApiRequest,
    ) -> Result<T, EngineError> {
        self.call(request).await?.into_success(operation)?.json(operation)
    }

    /// Sends a `GET` and decodes the JSON response.
    ///
    /// # Errors
    ///
    /// See [`Self::call_json`].
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
    ) -> Result<T, EngineError> {
        self.call_json(operation, &ApiRequest::get(path)).await
    }

    /// Sends a `POST` with a JSON body and decodes the JSON response.
    ///
    /// # Errors
    ///
    /// See [`Self::call_json`].
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        body: &B,
    ) -> Result<T, EngineError> {
        self.call_json(operation, &ApiRequest::post(path).with_json(body)?)
            .await
    }

    /// Sends `request` and discards a successful response body.
    ///
    /// # Errors
    ///
    /// Returns transport errors from [`Self::call`] and
    /// `EngineError::RequestFailed` for non-2xx statuses.
    pub async fn call_ok(&self, operation: &str, request: &ApiRequest) -> Result<(), EngineError> {
        self.call(request).await?.into_success(operation).map(drop)
    }

    /// Verifies the daemon is responsive with `GET /_ping`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::HealthCheckFailed` if the daemon does not answer
    /// with a 2xx status and `EngineError::HealthCheckTimeout` if it does not
    /// answer within ten seconds.
    pub async fn ping(&self) -> Result<(), EngineError> {
        let timeout = Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS);
        let response = tokio::time::timeout(timeout, self.call(&ApiRequest::get(PING_PATH)))
            .await
            .map_err(|_| EngineError::HealthCheckTimeout {
                seconds: HEALTH_CHECK_TIMEOUT_SECS,
            })?
            .map_err(|error| EngineError::HealthCheckFailed {
                message: error.to_string(),
            })?;

        if response.is_success() {
            return Ok(());
        }
        Err(EngineError::HealthCheckFailed {
            message: format!(
                "ping returned status {}: {}",
                response.status.as_u16(),
                response.error_message()
            ),
        })
    }

    /// Upgrades `request` into a raw stream on a fresh connection.
    ///
    /// # Errors
    ///
    /// See [`hijack::hijack`].
    pub async fn hijack(&self, request: HijackRequest) -> Result<HijackedConnection, EngineError> {
        let prefix = self.version_prefix().await;
        let versioned = request.with_path_prefix(&prefix);
        hijack::hijack(&self.inner.dialer, &versioned).await
    }
}

/// Strips a leading `v` so both `1.43` and `v1.43` produce `/v1.43`.
fn normalise_version(version: &str) -> String {
    version.trim().trim_start_matches('v').to_owned()
}
