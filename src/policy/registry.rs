// src/policy/registry.rs

use http::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::{PolicySpec, RateLimitPolicy};
use crate::error::{AdmissionError, Result};

/// Identity of a handler: `"<METHOD> <path template>"`, e.g. `"GET /posts/{id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteId(String);

impl RouteId {
    pub fn new(method: &Method, path: &str) -> Self {
        Self(format!("{} {}", method.as_str(), path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of the declarative route table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub method: String,
    pub path: String,
    pub policy: PolicySpec,
}

/// Declarative route table, usually loaded from JSON:
///
/// ```json
/// { "routes": [
///     { "method": "POST", "path": "/posts",
///       "policy": { "algorithm": "sliding_window", "windowSeconds": 60, "maxRequests": 5 } }
/// ] }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteTable {
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

/// Route-to-policy lookup table. Built once at startup, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    routes: HashMap<RouteId, Arc<RateLimitPolicy>>,
}

impl PolicyRegistry {
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::default()
    }

    /// Validate every entry of a route table. The first invalid entry aborts.
    pub fn from_route_table(table: RouteTable) -> Result<Self> {
        let mut builder = Self::builder();
        for entry in table.routes {
            let method = Method::from_bytes(entry.method.trim().to_ascii_uppercase().as_bytes())
                .map_err(|_| {
                    AdmissionError::Config(format!(
                        "invalid HTTP method '{}' for path {}",
                        entry.method, entry.path
                    ))
                })?;
            builder = builder.register(method, &entry.path, entry.policy)?;
        }
        Ok(builder.build())
    }

    /// Read and validate a JSON route table from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AdmissionError::Config(format!("cannot read policy file {}: {}", path.display(), e))
        })?;
        let table: RouteTable = serde_json::from_str(&raw).map_err(|e| {
            AdmissionError::Config(format!("cannot parse policy file {}: {}", path.display(), e))
        })?;
        let registry = Self::from_route_table(table)?;
        info!(
            routes = registry.len(),
            file = %path.display(),
            "Loaded admission policies"
        );
        Ok(registry)
    }

    /// Policy attached to a route, or `None` for pass-through.
    pub fn resolve(&self, route: &RouteId) -> Option<Arc<RateLimitPolicy>> {
        self.routes.get(route).cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RouteId, &Arc<RateLimitPolicy>)> {
        self.routes.iter()
    }
}

#[derive(Debug, Default)]
pub struct PolicyRegistryBuilder {
    routes: HashMap<RouteId, Arc<RateLimitPolicy>>,
}

impl PolicyRegistryBuilder {
    /// Attach a policy to `method path`. Fails on an invalid policy or a route
    /// that already has one.
    pub fn register(mut self, method: Method, path: &str, spec: PolicySpec) -> Result<Self> {
        if !path.starts_with('/') {
            return Err(AdmissionError::Config(format!(
                "route path must start with '/': {}",
                path
            )));
        }

        let route = RouteId::new(&method, path);
        let policy = RateLimitPolicy::try_from(spec)
            .map_err(|e| AdmissionError::Config(format!("route {}: {}", route, e)))?;

        if self.routes.contains_key(&route) {
            return Err(AdmissionError::Config(format!(
                "route {} already has a rate limit policy",
                route
            )));
        }

        self.routes.insert(route, Arc::new(policy));
        Ok(self)
    }

    pub fn build(self) -> PolicyRegistry {
        PolicyRegistry {
            routes: self.routes,
        }
    }
}
