//! Process-wide cache of bearer tokens.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

static GLOBAL: LazyLock<Arc<TokenCache>> = LazyLock::new(|| Arc::new(TokenCache::new()));

/// Identifies a token by the challenge it answers and the registry host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    /// Realm that issued the token.
    pub realm: String,
    /// Service named in the challenge.
    pub service: Option<String>,
    /// Scope named in the challenge.
    pub scope: Option<String>,
    /// Registry host the token is used against.
    pub host: String,
}

/// A bearer token and the instant it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    /// Creates a token that expires `ttl` after `issued_at`.
    #[must_use]
    pub fn new(token: impl Into<String>, issued_at: Instant, ttl: Duration) -> Self {
        Self {
            token: token.into(),
            expires_at: issued_at.checked_add(ttl).unwrap_or(issued_at),
        }
    }

    /// Returns the token value.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns the expiry instant.
    #[must_use]
    pub const fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Returns whether the token may still be used at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Thread-safe map from [`TokenKey`] to [`CachedToken`].
///
/// Expired entries are evicted when read. The lock is never held across an
/// await point.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: Mutex<HashMap<TokenKey, CachedToken>>,
}

impl TokenCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cache shared by the whole process.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Returns a valid token for `key`, evicting it if it has expired.
    #[must_use]
    pub fn get(&self, key: &TokenKey) -> Option<CachedToken> {
        self.get_at(key, Instant::now())
    }

    /// Returns a token for `key` that is valid at `now`.
    #[must_use]
    pub fn get_at(&self, key: &TokenKey, now: Instant) -> Option<CachedToken> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(cached) if cached.is_valid_at(now) => {
                debug!(realm = %key.realm, host = %key.host, "token cache hit");
                Some(cached.clone())
            }
            Some(_) => {
                entries.remove(key);
                debug!(realm = %key.realm, host = %key.host, "evicted expired token");
                None
            }
            None => {
                debug!(realm = %key.realm, host = %key.host, "token cache miss");
                None
            }
        }
    }

    /// Stores `token` under `key`, replacing any previous entry.
    pub fn insert(&self, key: TokenKey, token: CachedToken) {
        self.lock().insert(key, token);
    }

    /// Drops every token issued for `host`.
    pub fn remove_host(&self, host: &str) {
        self.lock().retain(|key, _| key.host != host);
    }

    /// Returns the number of stored entries, including expired ones not yet
    /// evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TokenKey, CachedToken>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
