//! Registry endpoint parsing and credential-key normalisation.

use url::Url;

use crate::error::RegistryAuthError;

/// Credential key used for every Docker Hub alias.
pub const DOCKER_HUB_KEY: &str = "https://index.docker.io/v1/";

/// Host that serves the Docker Hub registry API.
const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";

const DOCKER_HUB_ALIASES: &[&str] = &[
    "docker.io",
    "index.docker.io",
    "registry-1.docker.io",
    DOCKER_HUB_KEY,
    "https://index.docker.io",
];

/// A parsed registry address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEndpoint {
    base: Url,
    host: String,
    docker_hub: bool,
}

impl RegistryEndpoint {
    /// Parses a registry address.
    ///
    /// Bare `host[:port]` values are reached over HTTPS. Docker Hub aliases
    /// resolve to the Hub API host.
    ///
    /// # Errors
    ///
    /// Returns `RegistryAuthError::InvalidEndpoint` for empty values,
    /// unsupported schemes, and addresses without a host.
    pub fn parse(endpoint: &str) -> Result<Self, RegistryAuthError> {
        let trimmed = endpoint.trim();
        let invalid = |reason: &str| RegistryAuthError::InvalidEndpoint {
            endpoint: endpoint.to_owned(),
            reason: reason.to_owned(),
        };
        if trimmed.is_empty() {
            return Err(invalid("registry address is empty"));
        }

        let docker_hub = DOCKER_HUB_ALIASES
            .iter()
            .any(|alias| alias.eq_ignore_ascii_case(trimmed.trim_end_matches('/')))
            || trimmed.eq_ignore_ascii_case(DOCKER_HUB_KEY);
        let address = if docker_hub {
            format!("https://{DOCKER_HUB_API_HOST}")
        } else if trimmed.contains("://") {
            trimmed.to_owned()
        } else {
            format!("https://{trimmed}")
        };

        let mut base = Url::parse(&address).map_err(|error| invalid(&error.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid("registry scheme must be http or https"));
        }
        let host_name = base
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("registry address has no host"))?;
        let host = base.port().map_or_else(
            || host_name.to_owned(),
            |port| format!("{host_name}:{port}"),
        );
        base.set_path("");
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self {
            base,
            host,
            docker_hub,
        })
    }

    /// Returns `host[:port]` of the registry.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the key credentials are stored under.
    #[must_use]
    pub fn registry_key(&self) -> String {
        if self.docker_hub {
            String::from(DOCKER_HUB_KEY)
        } else {
            self.host.clone()
        }
    }

    /// Returns the URL of the `/v2/` probe endpoint.
    #[must_use]
    pub fn probe_url(&self) -> Url {
        let mut url = self.base.clone();
        url.set_path("/v2/");
        url
    }
}

/// Normalises a registry address into its credential key.
///
/// `docker.io` and `index.docker.io` map to `https://index.docker.io/v1/`;
/// other registries map to their bare `host[:port]`.
///
/// # Errors
///
/// Returns `RegistryAuthError::InvalidEndpoint` when the address cannot be
/// parsed.
pub fn normalize_registry_key(endpoint: &str) -> Result<String, RegistryAuthError> {
    RegistryEndpoint::parse(endpoint).map(|parsed| parsed.registry_key())
}
