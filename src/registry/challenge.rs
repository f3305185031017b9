//! `WWW-Authenticate` challenge parsing.

use std::collections::HashMap;

use crate::error::RegistryAuthError;

/// Authentication scheme a registry asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// The registry accepted an anonymous request.
    Anonymous,
    /// HTTP Basic authentication.
    Basic,
    /// Token authentication through a realm.
    Bearer,
}

/// Parameters of a `Bearer` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    /// Token endpoint URL. Never empty.
    pub realm: String,
    /// Service name passed to the realm.
    pub service: Option<String>,
    /// Access scope passed to the realm.
    pub scope: Option<String>,
}

/// What a registry's `/v2/` probe demanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChallenge {
    /// No authentication required.
    None,
    /// HTTP Basic authentication.
    Basic {
        /// Realm advertised by the registry, if any.
        realm: Option<String>,
    },
    /// Token authentication.
    Bearer(BearerChallenge),
}

impl AuthChallenge {
    /// Returns the scheme this challenge asks for.
    #[must_use]
    pub const fn scheme(&self) -> AuthScheme {
        match self {
            Self::None => AuthScheme::Anonymous,
            Self::Basic { .. } => AuthScheme::Basic,
            Self::Bearer(_) => AuthScheme::Bearer,
        }
    }

    /// Parses a `WWW-Authenticate` header value.
    ///
    /// Scheme names match case-insensitively. Parameters are `key=value` or
    /// `key="value"` pairs separated by commas outside quotes.
    ///
    /// # Errors
    ///
    /// Returns `RegistryAuthError::UnsupportedScheme` for schemes other than
    /// Basic and Bearer, and `RegistryAuthError::MissingRealm` for a Bearer
    /// challenge without a realm.
    pub fn parse(header: &str) -> Result<Self, RegistryAuthError> {
        let trimmed = header.trim();
        let (scheme, rest) = trimmed
            .split_once(char::is_whitespace)
            .unwrap_or((trimmed, ""));
        let mut params = parse_params(rest);

        if scheme.eq_ignore_ascii_case("basic") {
            return Ok(Self::Basic {
                realm: params.remove("realm"),
            });
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(RegistryAuthError::UnsupportedScheme {
                scheme: scheme.to_owned(),
            });
        }

        let realm = params
            .remove("realm")
            .filter(|realm| !realm.is_empty())
            .ok_or(RegistryAuthError::MissingRealm)?;
        Ok(Self::Bearer(BearerChallenge {
            realm,
            service: params.remove("service"),
            scope: params.remove("scope"),
        }))
    }
}

fn parse_params(input: &str) -> HashMap<String, String> {
    split_outside_quotes(input)
        .into_iter()
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            Some((key.trim().to_ascii_lowercase(), unquote(value.trim())))
        })
        .collect()
}

fn split_outside_quotes(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (index, ch) in input.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.extend(input.get(start..index));
                start = index.saturating_add(1);
            }
            _ => {}
        }
    }
    parts.extend(input.get(start..));
    parts.retain(|part| !part.trim().is_empty());
    parts
}

fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return value.to_owned();
    };

    let mut unescaped = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            unescaped.extend(chars.next());
        } else {
            unescaped.push(ch);
        }
    }
    unescaped
}
