//! Challenge/response negotiation against a registry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::challenge::{AuthChallenge, AuthScheme, BearerChallenge};
use super::credentials::{CredentialEntry, CredentialStore, Secret};
use super::endpoint::RegistryEndpoint;
use super::token_cache::{CachedToken, TokenCache, TokenKey};
use crate::error::RegistryAuthError;

/// Lifetime assumed for tokens whose response omits `expires_in`.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60);

/// Timeout applied to every registry and realm request.
pub const REGISTRY_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client identifier sent with refresh-token grants.
const CLIENT_ID: &str = "podwire";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Negotiates registry authentication and persists the resulting secret.
///
/// Bearer tokens are shared through a [`TokenCache`], which defaults to the
/// process-wide instance.
#[derive(Debug)]
pub struct AuthNegotiator<S> {
    http: Client,
    cache: Arc<TokenCache>,
    store: S,
}

impl<S: CredentialStore> AuthNegotiator<S> {
    /// Creates a negotiator using the process-wide token cache.
    ///
    /// # Errors
    ///
    /// Returns `RegistryAuthError::RequestFailed` when the HTTP client cannot
    /// be built.
    pub fn new(store: S) -> Result<Self, RegistryAuthError> {
        let http = Client::builder()
            .timeout(REGISTRY_REQUEST_TIMEOUT)
            .build()
            .map_err(|error| request_failed(&error))?;
        Ok(Self::with_client(http, TokenCache::global(), store))
    }

    /// Creates a negotiator from explicit parts.
    #[must_use]
    pub const fn with_client(http: Client, cache: Arc<TokenCache>, store: S) -> Self {
        Self { http, cache, store }
    }

    /// Returns the credential store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Sends an anonymous `GET /v2/` and reports the challenge.
    ///
    /// # Errors
    ///
    /// Returns `RegistryAuthError::UnsupportedScheme` for statuses other than
    /// 200 and 401 or an unknown scheme, `RegistryAuthError::MissingRealm`
    /// for a Bearer challenge without a realm, and
    /// `RegistryAuthError::RequestFailed` when the registry is unreachable.
    pub async fn probe(
        &self,
        endpoint: &RegistryEndpoint,
    ) -> Result<AuthChallenge, RegistryAuthError> {
        let response = self
            .http
            .get(endpoint.probe_url())
            .send()
            .await
            .map_err(|error| request_failed(&error))?;
        let status = response.status();

        let challenge = if status.is_success() {
            AuthChallenge::None
        } else if status == StatusCode::UNAUTHORIZED {
            match response.headers().get(WWW_AUTHENTICATE) {
                None => AuthChallenge::Basic { realm: None },
                Some(value) => {
                    let header =
                        value
                            .to_str()
                            .map_err(|_| RegistryAuthError::UnsupportedScheme {
                                scheme: String::from("<non-ASCII challenge>"),
                            })?;
                    AuthChallenge::parse(header)?
                }
            }
        } else {
            return Err(RegistryAuthError::UnsupportedScheme {
                scheme: format!("unexpected probe status {}", status.as_u16()),
            });
        };

        debug!(registry = %endpoint.host(), scheme = ?challenge.scheme(), "registry probed");
        Ok(challenge)
    }

    /// Returns a bearer token for `challenge`, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Returns `RegistryAuthError::TokenExchangeFailed` when the realm answers
    /// with a non-success status, `RegistryAuthError::EmptyToken` when the
    /// response carries no token, and `RegistryAuthError::RequestFailed` when
    /// the realm is unreachable or answers with malformed JSON.
    pub async fn fetch_token(
        &self,
        challenge: &BearerChallenge,
        host: &str,
        credentials: Option<&CredentialEntry>,
    ) -> Result<CachedToken, RegistryAuthError> {
        let key = token_key(challenge, host);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let token = self.request_token(challenge, credentials, false).await?;
        self.cache.insert(key, token.clone());
        Ok(token)
    }

    /// Verifies credentials against a registry and stores them.
    ///
    /// Basic registries store the verified password. Bearer registries store
    /// the token issued by the realm as a registry token. A realm that refuses
    /// the credentials is retried once with Basic authentication.
    ///
    /// # Errors
    ///
    /// Returns the probe and token errors described on [`Self::probe`] and
    /// [`Self::fetch_token`], `RegistryAuthError::CredentialsRejected` when
    /// Basic verification fails, and `RegistryAuthError::CredentialStore`
    /// when the secret cannot be persisted.
    pub async fn authorize_and_store(
        &self,
        endpoint: &str,
        username: &str,
        password: &str,
    ) -> Result<AuthScheme, RegistryAuthError> {
        let registry = RegistryEndpoint::parse(endpoint)?;
        let credentials = CredentialEntry::password(username, password);

        let (scheme, secret) = match self.probe(&registry).await? {
            AuthChallenge::None => (
                AuthScheme::Anonymous,
                Secret::Password(password.to_owned()),
            ),
            AuthChallenge::Basic { .. } => {
                self.verify_basic(&registry, &credentials).await?;
                (AuthScheme::Basic, Secret::Password(password.to_owned()))
            }
            AuthChallenge::Bearer(challenge) => {
                match self.request_token(&challenge, Some(&credentials), true).await {
                    Ok(token) => {
                        let issued = Secret::RegistryToken(token.token().to_owned());
                        self.cache
                            .insert(token_key(&challenge, registry.host()), token);
                        (AuthScheme::Bearer, issued)
                    }
                    Err(RegistryAuthError::TokenExchangeFailed { realm, status }) => {
                        warn!(
                            registry = %registry.host(),
                            realm = %realm,
                            status,
                            "token exchange failed, retrying with basic authentication"
                        );
                        self.verify_basic(&registry, &credentials).await?;
                        (AuthScheme::Basic, Secret::Password(password.to_owned()))
                    }
                    Err(error) => return Err(error),
                }
            }
        };

        let stored = CredentialEntry {
            username: username.to_owned(),
            secret,
        };
        let key = registry.registry_key();
        self.store.store(&key, &stored)?;
        info!(registry = %key, scheme = ?scheme, "registry login succeeded");
        Ok(scheme)
    }

    /// Produces an `Authorization` header value for requests to `endpoint`.
    ///
    /// Uses `credentials` when given and otherwise the stored entry. A
    /// `scope` replaces the scope named in a Bearer challenge. A stored
    /// registry token is sent as is unless the cache holds a token for the
    /// challenge. Returns `None`
    /// when the registry allows anonymous access or no usable credentials
    /// exist for a Basic registry.
    ///
    /// # Errors
    ///
    /// Returns the probe and token errors described on [`Self::probe`] and
    /// [`Self::fetch_token`], and `RegistryAuthError::CredentialStore` when
    /// stored credentials cannot be read.
    pub async fn authorization_header(
        &self,
        endpoint: &str,
        scope: Option<&str>,
        credentials: Option<&CredentialEntry>,
    ) -> Result<Option<String>, RegistryAuthError> {
        let registry = RegistryEndpoint::parse(endpoint)?;
        let stored = match credentials {
            Some(entry) => Some(entry.clone()),
            None => self.store.get(&registry.registry_key())?,
        };

        match self.probe(&registry).await? {
            AuthChallenge::None => Ok(None),
            AuthChallenge::Basic { .. } => Ok(stored.as_ref().and_then(basic_header)),
            AuthChallenge::Bearer(mut challenge) => {
                if let Some(requested) = scope {
                    challenge.scope = Some(requested.to_owned());
                }
                if let Some(CredentialEntry {
                    secret: Secret::RegistryToken(token),
                    ..
                }) = &stored
                    && self
                        .cache
                        .get(&token_key(&challenge, registry.host()))
                        .is_none()
                {
                    return Ok(Some(format!("Bearer {token}")));
                }
                let token = self
                    .fetch_token(&challenge, registry.host(), stored.as_ref())
                    .await?;
                Ok(Some(format!("Bearer {}", token.token())))
            }
        }
    }

    /// Erases stored credentials for `endpoint` and drops its cached tokens.
    ///
    /// Returns whether an entry existed.
    ///
    /// # Errors
    ///
    /// Returns `RegistryAuthError::InvalidEndpoint` for an unparseable
    /// address and `RegistryAuthError::CredentialStore` when the store cannot
    /// be updated.
    pub fn logout(&self, endpoint: &str) -> Result<bool, RegistryAuthError> {
        let registry = RegistryEndpoint::parse(endpoint)?;
        self.cache.remove_host(registry.host());
        let removed = self.store.erase(&registry.registry_key())?;
        if removed {
            info!(registry = %registry.registry_key(), "removed stored credentials");
        }
        Ok(removed)
    }

    async fn verify_basic(
        &self,
        registry: &RegistryEndpoint,
        credentials: &CredentialEntry,
    ) -> Result<(), RegistryAuthError> {
        let request = self.http.get(registry.probe_url());
        let response = with_credentials(request, credentials)
            .send()
            .await
            .map_err(|error| request_failed(&error))?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(RegistryAuthError::CredentialsRejected {
            registry: registry.host().to_owned(),
            status: response.status().as_u16(),
        })
    }

    async fn request_token(
        &self,
        challenge: &BearerChallenge,
        credentials: Option<&CredentialEntry>,
        offline: bool,
    ) -> Result<CachedToken, RegistryAuthError> {
        let issued_at = Instant::now();
        let request = self.token_request(challenge, credentials, offline)?;
        let response = request
            .send()
            .await
            .map_err(|error| request_failed(&error))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RegistryAuthError::TokenExchangeFailed {
                realm: challenge.realm.clone(),
                status: status.as_u16(),
            });
        }

        let body: TokenResponse = response.json().await.map_err(|error| {
            RegistryAuthError::RequestFailed {
                message: format!("invalid token response from '{}': {error}", challenge.realm),
            }
        })?;
        let token = [body.token, body.access_token]
            .into_iter()
            .flatten()
            .find(|candidate| !candidate.is_empty())
            .ok_or_else(|| RegistryAuthError::EmptyToken {
                realm: challenge.realm.clone(),
            })?;
        let ttl = body
            .expires_in
            .map_or(DEFAULT_TOKEN_TTL, Duration::from_secs);

        debug!(realm = %challenge.realm, ttl_secs = ttl.as_secs(), "token issued");
        Ok(CachedToken::new(token, issued_at, ttl))
    }

    fn token_request(
        &self,
        challenge: &BearerChallenge,
        credentials: Option<&CredentialEntry>,
        offline: bool,
    ) -> Result<RequestBuilder, RegistryAuthError> {
        let mut realm =
            Url::parse(&challenge.realm).map_err(|error| RegistryAuthError::InvalidEndpoint {
                endpoint: challenge.realm.clone(),
                reason: error.to_string(),
            })?;

        if let Some(CredentialEntry {
            secret: Secret::IdentityToken(refresh),
            ..
        }) = credentials
        {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            form.append_pair("grant_type", "refresh_token");
            form.append_pair("refresh_token", refresh);
            form.append_pair("client_id", CLIENT_ID);
            form.extend_pairs(challenge.service.iter().map(|service| ("service", service)));
            form.extend_pairs(challenge.scope.iter().map(|scope| ("scope", scope)));
            return Ok(self
                .http
                .post(realm)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(form.finish()));
        }

        {
            let mut query = realm.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            if let Some(scope) = &challenge.scope {
                query.append_pair("scope", scope);
            }
            if offline {
                query.append_pair("offline_token", "true");
                query.append_pair("client_id", CLIENT_ID);
            }
        }
        let request = self.http.get(realm);
        let Some(entry) = credentials else {
            return Ok(request);
        };
        Ok(with_credentials(request, entry))
    }
}

fn token_key(challenge: &BearerChallenge, host: &str) -> TokenKey {
    TokenKey {
        realm: challenge.realm.clone(),
        service: challenge.service.clone(),
        scope: challenge.scope.clone(),
        host: host.to_owned(),
    }
}

fn with_credentials(request: RequestBuilder, credentials: &CredentialEntry) -> RequestBuilder {
    let Some(header) = basic_header(credentials) else {
        return request;
    };
    request.header(AUTHORIZATION, header)
}

fn basic_header(credentials: &CredentialEntry) -> Option<String> {
    match &credentials.secret {
        Secret::Password(password) => Some(format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{password}", credentials.username))
        )),
        Secret::IdentityToken(_) | Secret::RegistryToken(_) => None,
    }
}

fn request_failed(error: &reqwest::Error) -> RegistryAuthError {
    RegistryAuthError::RequestFailed {
        message: error.to_string(),
    }
}
