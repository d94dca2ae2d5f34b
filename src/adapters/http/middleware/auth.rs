//! Tenant identity for axum.
//!
//! Authentication happens upstream of this service. The gateway in front of
//! it forwards the authenticated tenant in `X-Tenant-Id`; this module turns
//! that header into an [`AuthenticatedTenant`] request extension, which the
//! rate-limit middleware and handlers read.
//!
//! ```text
//! Request → tenant_middleware → AuthenticatedTenant in extensions
//!                                      ↓
//!                    rate_limit_middleware / RequireTenant extractor
//! ```

use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::domain::foundation::TenantId;

/// Header the trusted gateway sets after authenticating the caller.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// The tenant an authenticated request belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedTenant {
    pub tenant_id: TenantId,
}

/// Copies the gateway's tenant header into request extensions.
///
/// A missing header leaves the request anonymous. A malformed one is
/// rejected with 400 rather than silently treated as anonymous.
pub async fn tenant_middleware(mut request: Request, next: Next) -> Response {
    let Some(raw) = request.headers().get(TENANT_HEADER) else {
        return next.run(request).await;
    };

    let tenant = raw
        .to_str()
        .ok()
        .and_then(|value| TenantId::new(value.trim()).ok());

    match tenant {
        Some(tenant_id) => {
            request
                .extensions_mut()
                .insert(AuthenticatedTenant { tenant_id });
            next.run(request).await
        }
        None => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "Invalid tenant identity",
                "code": "INVALID_TENANT"
            })),
        )
            .into_response(),
    }
}

/// Extractor that requires an authenticated tenant.
#[derive(Debug, Clone)]
pub struct RequireTenant(pub AuthenticatedTenant);

/// Rejection for [`RequireTenant`].
#[derive(Debug, Clone, Copy)]
pub struct TenantRequired;

impl IntoResponse for TenantRequired {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "Authentication required",
                "code": "AUTHENTICATION_REQUIRED"
            })),
        )
            .into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequireTenant
where
    S: Send + Sync,
{
    type Rejection = TenantRequired;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedTenant>()
            .cloned()
            .map(RequireTenant)
            .ok_or(TenantRequired)
    }
}
