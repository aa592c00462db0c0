//! Caller identity and privilege derivation.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;

/// Header carrying the client chain when behind a proxy.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// The authenticated principal, inserted into request extensions by an
/// upstream authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Stable user identifier
    pub id: String,
    /// Role attribute, if the auth layer knows one
    pub role: Option<String>,
}

impl AuthenticatedUser {
    /// Create a principal without a role.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: None,
        }
    }

    /// Attach a role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// Per-request hook that names the caller.
///
/// Takes precedence over [`AuthenticatedUser`]. Returning `None` or an empty
/// string falls through to the next source.
pub trait IdentityResolver: Send + Sync {
    /// Identify the caller of `request`.
    fn resolve(&self, request: &Request) -> Option<String>;
}

impl<F> IdentityResolver for F
where
    F: Fn(&Request) -> Option<String> + Send + Sync,
{
    fn resolve(&self, request: &Request) -> Option<String> {
        self(request)
    }
}

/// The rate limit subject for one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity {
    /// `user:<id>` or `ip:<address>`
    pub key: String,
}

impl CallerIdentity {
    /// Identity for an authenticated subject.
    pub fn user(id: &str) -> Self {
        Self {
            key: format!("user:{}", id),
        }
    }

    /// Identity for an anonymous client address.
    pub fn ip(address: &str) -> Self {
        Self {
            key: format!("ip:{}", address),
        }
    }

    /// Derive the identity of the caller of `request`.
    ///
    /// Sources in order: the resolver, the [`AuthenticatedUser`] extension,
    /// the left-most `X-Forwarded-For` entry, the peer address.
    pub fn from_request(request: &Request, resolver: Option<&dyn IdentityResolver>) -> Self {
        if let Some(id) = resolver
            .and_then(|resolver| resolver.resolve(request))
            .filter(|id| !id.is_empty())
        {
            return Self::user(&id);
        }

        if let Some(user) = request
            .extensions()
            .get::<AuthenticatedUser>()
            .filter(|user| !user.id.is_empty())
        {
            return Self::user(&user.id);
        }

        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Self::ip(&client_address(request.headers(), peer))
    }
}

/// Best-effort client address: forwarded-for first, then the peer.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Whether the caller gets the privileged quota on `path`.
///
/// Requires both an administrative path and the privileged role.
pub fn is_privileged(
    path: &str,
    user: Option<&AuthenticatedUser>,
    admin_paths: &[String],
    admin_role: &str,
) -> bool {
    let admin_path = admin_paths.iter().any(|prefix| path.starts_with(prefix.as_str()));
    let admin_user = user
        .and_then(|user| user.role.as_deref())
        .is_some_and(|role| role == admin_role);
    admin_path && admin_user
}
