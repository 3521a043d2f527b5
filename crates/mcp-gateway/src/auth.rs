//! Authentication hook for the gateway's HTTP surface.
//!
//! The wire contract (bearer token in a configurable header, 401 plus
//! `WWW-Authenticate: Bearer` on rejection) is fixed by the spec; how keys
//! are sourced and validated is left pluggable via [`KeyValidator`]. Key
//! file formats and rotation are out of scope here. [`StaticKeySet`] is the
//! simplest validator, built directly from the config document, and is what
//! the gateway wires up by default.

use std::collections::{BTreeMap, HashSet};

use axum::http::HeaderMap;

/// Validates a bearer token extracted from an inbound request.
pub trait KeyValidator: Send + Sync {
    fn validate(&self, token: &str) -> bool;
}

/// An in-memory set of accepted keys.
#[derive(Debug, Default)]
pub struct StaticKeySet(HashSet<String>);

impl StaticKeySet {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self(keys.into_iter().map(|k| k.trim().to_string()).filter(|k| !k.is_empty()).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl KeyValidator for StaticKeySet {
    fn validate(&self, token: &str) -> bool {
        self.0.contains(token)
    }
}

/// Header names forwarded from the inbound client request to the downstream
/// connection, minus whichever header the gateway itself uses for its own
/// auth (spec.md §4.4: a fixed list, not config-driven).
pub const PASSTHROUGH_HEADERS: &[&str] = &["authorization", "x-api-key", "x-auth-token"];

/// Captures the passthrough headers present on an inbound request, excluding
/// the gateway's own auth header so a client's gateway credential is never
/// forwarded downstream as if it were a downstream credential.
pub fn capture_passthrough_headers(headers: &HeaderMap, gateway_auth_header: &str) -> BTreeMap<String, String> {
    let excluded = gateway_auth_header.to_ascii_lowercase();
    PASSTHROUGH_HEADERS
        .iter()
        .filter(|name| **name != excluded)
        .filter_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()).map(|v| (name.to_string(), v.to_string())))
        .collect()
}

/// Strips a leading `Bearer ` prefix, if present, and trims whitespace.
pub fn strip_bearer_prefix(raw: &str) -> &str {
    raw.strip_prefix("Bearer ").map(str::trim).unwrap_or(raw.trim())
}
