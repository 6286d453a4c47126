//! Caller identification.
//!
//! The client IP comes from the first usable source in this order:
//! `X-Forwarded-For` (first entry), `X-Real-IP`, then the transport peer
//! address. The authenticated user id, if any, comes from the identity
//! collaborator through [`IdentityAccessor`].

use axum::extract::ConnectInfo;
use http::{Extensions, HeaderMap, Request};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

use crate::policy::IdentifierType;

pub const FORWARDED_FOR: &str = "x-forwarded-for";
pub const REAL_IP: &str = "x-real-ip";

/// Bucket shared by every caller whose address cannot be determined.
/// Such callers are throttled together rather than let through.
pub const UNKNOWN_IP: &str = "unknown";

/// Authenticated user id placed in request extensions by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Looks up the stable id of the authenticated caller, if there is one.
pub trait IdentityAccessor: Send + Sync {
    fn user_id(&self, extensions: &Extensions) -> Option<String>;
}

/// Reads [`AuthenticatedUser`] from the request extensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionIdentity;

impl IdentityAccessor for ExtensionIdentity {
    fn user_id(&self, extensions: &Extensions) -> Option<String> {
        extensions.get::<AuthenticatedUser>().map(|u| u.0.clone())
    }
}

/// Request data the resolver needs, detached from the HTTP types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestMeta {
    pub forwarded_for: Option<String>,
    pub real_ip: Option<String>,
    pub peer: Option<IpAddr>,
    pub user_id: Option<String>,
}

impl RequestMeta {
    pub fn from_request<B>(req: &Request<B>, identity: &dyn IdentityAccessor) -> Self {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip());

        Self {
            forwarded_for: header_value(req.headers(), FORWARDED_FOR),
            real_ip: header_value(req.headers(), REAL_IP),
            peer,
            user_id: identity.user_id(req.extensions()),
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Resolved caller identity used to shard quota state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client IP by header chain priority. Entries that do not parse are skipped.
pub fn resolve_client_ip(meta: &RequestMeta) -> Option<IpAddr> {
    meta.forwarded_for
        .as_deref()
        .and_then(|chain| chain.split(',').next())
        .and_then(parse_ip)
        .or_else(|| meta.real_ip.as_deref().and_then(parse_ip))
        .or(meta.peer)
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

/// Build the identifier for a request according to the policy's strategy.
pub fn resolve_identifier(meta: &RequestMeta, identifier_type: IdentifierType) -> Identifier {
    let ip = match resolve_client_ip(meta) {
        Some(ip) => ip.to_string(),
        None => {
            debug!("Client IP could not be resolved, using shared unknown bucket");
            UNKNOWN_IP.to_string()
        }
    };

    let user = meta
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());

    let id = match (identifier_type, user) {
        (IdentifierType::Ip, _) | (_, None) => format!("ip:{}", ip),
        (IdentifierType::UserId, Some(user)) => format!("user:{}", user),
        (IdentifierType::IpAndUserId, Some(user)) => format!("user:{}:ip:{}", user, ip),
    };

    Identifier(id)
}
