//! Acting principal, as resolved by the security layer in front of the engine.

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};

/// Development header carrying the principal id. Only honored when the trusted-header
/// middleware is installed.
pub const PRINCIPAL_ID_HEADER: &str = "X-Principal-Id";
pub const PRINCIPAL_ADMIN_HEADER: &str = "X-Principal-Admin";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub admin: bool,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Principal {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }
}

/// Extractor for the optional principal stored in request extensions.
#[derive(Clone, Debug, Default)]
pub struct CurrentPrincipal(pub Option<Principal>);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CurrentPrincipal(parts.extensions.get::<Principal>().cloned()))
    }
}

/// Map `X-Principal-Id` / `X-Principal-Admin` headers to a [`Principal`]. For development and
/// tests; never expose it without an authenticating proxy in front.
pub async fn trusted_header_principal(mut req: Request, next: Next) -> Response {
    let (id, admin) = {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let id = header(PRINCIPAL_ID_HEADER);
        let admin = header(PRINCIPAL_ADMIN_HEADER)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        (id, admin)
    };
    if let Some(id) = id {
        req.extensions_mut().insert(Principal::new(id).with_admin(admin));
    }
    next.run(req).await
}
