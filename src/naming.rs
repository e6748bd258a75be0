//! Storage-safe identifiers
//!
//! Dependency names, cache namespaces and generator ids all end up as file
//! names under the state directory, so they are reduced to lowercase ASCII
//! alphanumerics, `-` and `_` before use.

use crate::error::{CardkeepError, CardkeepResult};
use std::fmt;

/// Sanitize an arbitrary identifier into a filesystem-safe token.
///
/// Disallowed characters become `-`, runs of `-` collapse, and leading or
/// trailing `-` are trimmed. Fails if nothing alphanumeric is left.
pub fn sanitize(raw: &str) -> CardkeepResult<String> {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            c
        } else {
            '-'
        };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches('-');
    if !trimmed.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err(CardkeepError::InvalidName(raw.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Stable identifier for one external service, e.g. `weather-api`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyName {
    raw: String,
    key: String,
}

impl DependencyName {
    /// Create a dependency name, sanitizing it into a storage key
    pub fn new(raw: &str) -> CardkeepResult<Self> {
        Ok(Self {
            raw: raw.to_string(),
            key: sanitize(raw)?,
        })
    }

    /// Name as given by the caller
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Sanitized token used to derive storage identifiers
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for DependencyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}
