//! Canonical counter keys: `prefix:routeIdentity:identifier`.

use std::fmt;

use crate::identity::Identifier;
use crate::policy::{RateLimitPolicy, RouteId};

/// Separator between a key and its algorithm-owned sub-keys (fixed window ids).
/// It is escaped inside key components, so `reset` on one key can never reach
/// another caller's sub-keys.
pub const SUBKEY_SEPARATOR: char = '#';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn build(policy: &RateLimitPolicy, route: &RouteId, identifier: &Identifier) -> Self {
        Self(format!(
            "{}:{}:{}",
            escape(policy.key_prefix()),
            escape(route.as_str()),
            escape(identifier.as_str())
        ))
    }

    /// Wrap an already-built key, e.g. one typed by an operator.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn escape(component: &str) -> String {
    if !component.contains(['%', SUBKEY_SEPARATOR]) {
        return component.to_string();
    }
    component.replace('%', "%25").replace(SUBKEY_SEPARATOR, "%23")
}

/// Fixed window counter key for `window_id`
pub fn window_key(key: &str, window_id: u64) -> String {
    format!("{}{}{}", key, SUBKEY_SEPARATOR, window_id)
}

/// Strip a fixed window suffix, giving back the base key
pub fn base_key(stored: &str) -> &str {
    match stored.rsplit_once(SUBKEY_SEPARATOR) {
        Some((base, _)) => base,
        None => stored,
    }
}
