//! Registry credential persistence.
//!
//! [`FileCredentialStore`] reads and writes the `auths` map of a
//! Docker-compatible `config.json`, preserving any other keys in the file.

use std::io;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::RegistryAuthError;

/// Name of the credential file inside the configuration directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

const AUTHS_KEY: &str = "auths";

/// Secret half of a stored credential.
#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    /// A password used for Basic authentication and token requests.
    Password(String),
    /// A long-lived identity token exchanged at the realm with a refresh
    /// grant.
    IdentityToken(String),
    /// A bearer token issued by a realm at login, sent to the registry as is.
    RegistryToken(String),
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::IdentityToken(_) => f.write_str("IdentityToken(<redacted>)"),
            Self::RegistryToken(_) => f.write_str("RegistryToken(<redacted>)"),
        }
    }
}

/// Credentials stored for one registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialEntry {
    /// Account name.
    pub username: String,
    /// Password or identity token.
    pub secret: Secret,
}

impl CredentialEntry {
    /// Creates a username and password entry.
    #[must_use]
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: Secret::Password(password.into()),
        }
    }
}

/// Storage for registry credentials keyed by normalised registry name.
pub trait CredentialStore: Send + Sync {
    /// Returns the entry for `registry`, if any.
    ///
    /// # Errors
    ///
    /// Returns `RegistryAuthError::CredentialStore` when the store cannot be
    /// read.
    fn get(&self, registry: &str) -> Result<Option<CredentialEntry>, RegistryAuthError>;

    /// Stores `entry` for `registry`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns `RegistryAuthError::CredentialStore` when the store cannot be
    /// written.
    fn store(&self, registry: &str, entry: &CredentialEntry) -> Result<(), RegistryAuthError>;

    /// Removes the entry for `registry`, returning whether one existed.
    ///
    /// # Errors
    ///
    /// Returns `RegistryAuthError::CredentialStore` when the store cannot be
    /// written.
    fn erase(&self, registry: &str) -> Result<bool, RegistryAuthError>;
}

/// Credential store backed by a `config.json` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCredentialStore {
    dir: Utf8PathBuf,
}

impl FileCredentialStore {
    /// Creates a store for `config.json` inside `dir`.
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Locates the configuration directory.
    ///
    /// `override_dir` (from `registry.config_dir`) wins, then
    /// `PODWIRE_CONFIG_DIR`, then `DOCKER_CONFIG`, then `$HOME/.docker`.
    ///
    /// # Errors
    ///
    /// Returns `RegistryAuthError::CredentialStore` when no location can be
    /// determined.
    pub fn locate<E: mockable::Env>(
        env: &E,
        override_dir: Option<&Utf8Path>,
    ) -> Result<Self, RegistryAuthError> {
        if let Some(dir) = override_dir {
            return Ok(Self::new(dir));
        }
        if let Some(dir) = ["PODWIRE_CONFIG_DIR", "DOCKER_CONFIG"]
            .into_iter()
            .find_map(|name| non_empty_var(env, name))
        {
            return Ok(Self::new(dir));
        }
        non_empty_var(env, "HOME")
            .map(|home| Self::new(Utf8PathBuf::from(home).join(".docker")))
            .ok_or_else(|| RegistryAuthError::CredentialStore {
                message: String::from(
                    "cannot locate credential store: set DOCKER_CONFIG or HOME",
                ),
            })
    }

    /// Returns the configuration directory.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Returns the path of the credential file.
    #[must_use]
    pub fn path(&self) -> Utf8PathBuf {
        self.dir.join(CONFIG_FILE_NAME)
    }

    fn read_document(&self) -> Result<Map<String, Value>, RegistryAuthError> {
        let dir = match Dir::open_ambient_dir(&self.dir, ambient_authority()) {
            Ok(dir) => dir,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(error) => return Err(self.store_error("open", &error)),
        };
        let content = match dir.read_to_string(CONFIG_FILE_NAME) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(error) => return Err(self.store_error("read", &error)),
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(document)) => Ok(document),
            Ok(_) => Err(RegistryAuthError::CredentialStore {
                message: format!("{} is not a JSON object", self.path()),
            }),
            Err(error) => Err(RegistryAuthError::CredentialStore {
                message: format!("failed to parse {}: {error}", self.path()),
            }),
        }
    }

    fn write_document(&self, document: Map<String, Value>) -> Result<(), RegistryAuthError> {
        Dir::create_ambient_dir_all(&self.dir, ambient_authority())
            .map_err(|error| self.store_error("create directory for", &error))?;
        let dir = Dir::open_ambient_dir(&self.dir, ambient_authority())
            .map_err(|error| self.store_error("open", &error))?;

        let encoded = serde_json::to_vec_pretty(&Value::Object(document)).map_err(|error| {
            RegistryAuthError::CredentialStore {
                message: format!("failed to encode {}: {error}", self.path()),
            }
        })?;
        let temp_name = format!("{CONFIG_FILE_NAME}.tmp-{}", std::process::id());
        dir.write(&temp_name, encoded)
            .map_err(|error| self.store_error("write", &error))?;
        dir.rename(&temp_name, &dir, CONFIG_FILE_NAME)
            .map_err(|error| self.store_error("replace", &error))?;
        debug!(path = %self.path(), "credential store updated");
        Ok(())
    }

    fn store_error(&self, action: &str, error: &io::Error) -> RegistryAuthError {
        RegistryAuthError::CredentialStore {
            message: format!("failed to {action} {}: {error}", self.path()),
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, registry: &str) -> Result<Option<CredentialEntry>, RegistryAuthError> {
        let document = self.read_document()?;
        let Some(entry) = document
            .get(AUTHS_KEY)
            .and_then(|auths| auths.get(registry))
        else {
            return Ok(None);
        };
        decode_entry(entry).map(Some)
    }

    fn store(&self, registry: &str, entry: &CredentialEntry) -> Result<(), RegistryAuthError> {
        let mut document = self.read_document()?;
        let auths = document
            .entry(AUTHS_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(auths_map) = auths else {
            return Err(RegistryAuthError::CredentialStore {
                message: format!("'{AUTHS_KEY}' in {} is not a JSON object", self.path()),
            });
        };
        auths_map.insert(registry.to_owned(), encode_entry(entry));
        self.write_document(document)
    }

    fn erase(&self, registry: &str) -> Result<bool, RegistryAuthError> {
        let mut document = self.read_document()?;
        let removed = document
            .get_mut(AUTHS_KEY)
            .and_then(Value::as_object_mut)
            .and_then(|auths| auths.remove(registry))
            .is_some();
        if removed {
            self.write_document(document)?;
        }
        Ok(removed)
    }
}

fn encode_entry(entry: &CredentialEntry) -> Value {
    match &entry.secret {
        Secret::Password(password) => serde_json::json!({
            "auth": STANDARD.encode(format!("{}:{password}", entry.username)),
        }),
        Secret::IdentityToken(token) => serde_json::json!({
            "auth": STANDARD.encode(format!("{}:", entry.username)),
            "identitytoken": token,
        }),
        Secret::RegistryToken(token) => serde_json::json!({
            "auth": STANDARD.encode(format!("{}:", entry.username)),
            "registrytoken": token,
        }),
    }
}

fn decode_entry(entry: &Value) -> Result<CredentialEntry, RegistryAuthError> {
    let invalid = |reason: &str| RegistryAuthError::CredentialStore {
        message: format!("invalid credential entry: {reason}"),
    };

    let (username, password) = match entry.get("auth").and_then(Value::as_str) {
        Some(encoded) => {
            let decoded = STANDARD
                .decode(encoded)
                .map_err(|_| invalid("auth is not valid base64"))?;
            let text = String::from_utf8(decoded).map_err(|_| invalid("auth is not UTF-8"))?;
            let (user, secret) = text
                .split_once(':')
                .ok_or_else(|| invalid("auth is not user:secret"))?;
            (user.to_owned(), secret.to_owned())
        }
        None => (String::new(), String::new()),
    };

    if let Some(token) = entry
        .get("identitytoken")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
    {
        return Ok(CredentialEntry {
            username,
            secret: Secret::IdentityToken(token.to_owned()),
        });
    }
    if let Some(token) = entry
        .get("registrytoken")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
    {
        return Ok(CredentialEntry {
            username,
            secret: Secret::RegistryToken(token.to_owned()),
        });
    }
    if username.is_empty() {
        return Err(invalid("missing auth"));
    }
    Ok(CredentialEntry {
        username,
        secret: Secret::Password(password),
    })
}

fn non_empty_var<E: mockable::Env>(env: &E, name: &str) -> Option<String> {
    env.string(name).filter(|value| !value.trim().is_empty())
}
