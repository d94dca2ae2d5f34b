//! Rate limiting middleware for axum.
//!
//! Runs every non-exempt request through the [`RequestGate`]: the per-minute
//! and per-hour windows for the caller, then the tenant's period quota.
//!
//! Rate limit status is returned in HTTP headers:
//! - `X-RateLimit-Limit` / `-Remaining` / `-Reset` (Unix seconds) / `-Tier`
//! - `X-Quota-Limit` / `-Remaining` / `-Used` on admission, `X-Quota-Reset`
//!   (RFC 3339) on quota denial
//! - `X-RateLimit-Degraded: true` when admitted without consulting a store
//! - `Retry-After` on 429 and 503 responses
//!
//! # Example
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/api/resource", get(handler))
//!     .layer(middleware::from_fn_with_state(gate, rate_limit_middleware))
//!     .layer(middleware::from_fn(tenant_middleware));
//! ```

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::application::{GateVerdict, RequestGate};
use crate::domain::foundation::Timestamp;
use crate::domain::quota::{QuotaDecision, QuotaDenial};
use crate::domain::rate_limit::{CallerId, LimitError, RateLimitDecision};

use super::auth::AuthenticatedTenant;

/// Path prefixes that bypass rate limiting.
pub const EXEMPT_PREFIXES: [&str; 5] = [
    "/docs",
    "/redoc",
    "/openapi.json",
    "/healthz",
    "/api/webhooks",
];

/// `Retry-After` sent while the quota store is unreachable.
pub const QUOTA_UNAVAILABLE_RETRY_SECS: u64 = 30;

/// Rate limit and quota header names.
pub mod headers {
    use axum::http::HeaderName;

    pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
    pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
    pub static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
    pub static X_RATELIMIT_TIER: HeaderName = HeaderName::from_static("x-ratelimit-tier");
    pub static X_RATELIMIT_DEGRADED: HeaderName = HeaderName::from_static("x-ratelimit-degraded");
    pub static X_QUOTA_LIMIT: HeaderName = HeaderName::from_static("x-quota-limit");
    pub static X_QUOTA_REMAINING: HeaderName = HeaderName::from_static("x-quota-remaining");
    pub static X_QUOTA_USED: HeaderName = HeaderName::from_static("x-quota-used");
    pub static X_QUOTA_RESET: HeaderName = HeaderName::from_static("x-quota-reset");
}

/// JSON body of every limit denial.
#[derive(Debug, Clone, Serialize)]
pub struct DenialBody {
    pub error: String,
    pub code: &'static str,
    pub tier: Option<String>,
    pub retry_after_secs: Option<u64>,
}

/// Enforces the request gate on everything outside [`EXEMPT_PREFIXES`].
pub async fn rate_limit_middleware(
    State(gate): State<RequestGate>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    if is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let tenant = request
        .extensions()
        .get::<AuthenticatedTenant>()
        .map(|t| t.tenant_id.clone());
    let caller = match &tenant {
        Some(tenant_id) => CallerId::tenant(tenant_id.clone()),
        None => {
            let address = extract_client_ip(&request, connect_info.as_ref())
                .unwrap_or_else(|| "unknown".to_string());
            CallerId::anonymous(&address)
        }
    };

    let verdict = match gate.evaluate(&caller, tenant.as_ref()).await {
        Ok(verdict) => verdict,
        Err(e) => {
            error!(error = %e, "request gate could not resolve its services");
            return LimitRejection(e).into_response();
        }
    };

    match verdict {
        GateVerdict::RateLimited(decision) => {
            warn!(
                caller = %caller.redacted(),
                service = %decision.service,
                "rate limit exceeded"
            );
            rate_limited_response(&decision)
        }
        GateVerdict::QuotaDenied(decision) => {
            warn!(tenant = %decision.tenant_id, denial = ?decision.denial, "quota denied");
            quota_denied_response(&decision)
        }
        GateVerdict::Admitted {
            rate,
            quota,
            degraded,
        } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            if let Some(rate) = &rate {
                add_rate_limit_headers(headers, rate);
            }
            if let Some(quota) = &quota {
                add_quota_headers(headers, quota);
            }
            if degraded {
                headers.insert(
                    headers::X_RATELIMIT_DEGRADED.clone(),
                    HeaderValue::from_static("true"),
                );
            }
            response
        }
    }
}

fn is_exempt(path: &str) -> bool {
    EXEMPT_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// Extract client IP from request, checking forwarded headers first.
///
/// Order of precedence:
/// 1. X-Forwarded-For header (first IP in list)
/// 2. X-Real-IP header
/// 3. ConnectInfo socket address
fn extract_client_ip<B>(
    request: &axum::http::Request<B>,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
) -> Option<String> {
    if let Some(forwarded) = request
        .headers()
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
    {
        if let Some(first_ip) = forwarded.split(',').next() {
            let first_ip = first_ip.trim();
            if !first_ip.is_empty() {
                return Some(first_ip.to_string());
            }
        }
    }

    if let Some(real_ip) = request
        .headers()
        .get("X-Real-IP")
        .and_then(|h| h.to_str().ok())
    {
        return Some(real_ip.trim().to_string());
    }

    connect_info.map(|ci| ci.0.ip().to_string())
}

fn denial_response(
    status: StatusCode,
    code: &'static str,
    error: impl Into<String>,
    tier: Option<String>,
    retry_after_secs: Option<u64>,
) -> Response {
    let body = DenialBody {
        error: error.into(),
        code,
        tier,
        retry_after_secs,
    };
    let mut response = (status, Json(body)).into_response();
    if let Some(secs) = retry_after_secs {
        response
            .headers_mut()
            .insert("Retry-After", HeaderValue::from(secs));
    }
    response
}

/// 429 for a sliding-window denial.
fn rate_limited_response(decision: &RateLimitDecision) -> Response {
    let message = format!("Rate limit exceeded ({} window)", decision.tier);
    let mut response = denial_response(
        StatusCode::TOO_MANY_REQUESTS,
        "RATE_LIMIT_EXCEEDED",
        message,
        Some(decision.tier.as_str().to_string()),
        Some(decision.retry_after_secs()),
    );

    let headers = response.headers_mut();
    headers.insert(headers::X_RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
    headers.insert(headers::X_RATELIMIT_REMAINING.clone(), HeaderValue::from(0u32));
    headers.insert(
        headers::X_RATELIMIT_RESET.clone(),
        HeaderValue::from(decision.reset_at.as_unix_secs()),
    );
    headers.insert(
        headers::X_RATELIMIT_TIER.clone(),
        HeaderValue::from_static(decision.tier.as_str()),
    );
    response
}

/// 429, 403 or 503 for a quota denial, depending on its reason.
fn quota_denied_response(decision: &QuotaDecision) -> Response {
    let tier = decision.tier.map(|t| t.as_str().to_string());
    match &decision.denial {
        Some(QuotaDenial::StoreUnavailable { .. }) => denial_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "QUOTA_SERVICE_UNAVAILABLE",
            "Quota service temporarily unavailable",
            tier,
            Some(QUOTA_UNAVAILABLE_RETRY_SECS),
        ),
        Some(QuotaDenial::NoActiveSubscription) => denial_response(
            StatusCode::FORBIDDEN,
            "NO_ACTIVE_SUBSCRIPTION",
            "No active subscription",
            tier,
            None,
        ),
        Some(QuotaDenial::Exhausted) | None => {
            let retry_after = decision
                .period_end
                .map(|end| end.saturating_until(&Timestamp::now()).as_secs().max(1));
            let mut response = denial_response(
                StatusCode::TOO_MANY_REQUESTS,
                "QUOTA_EXCEEDED",
                "Monthly quota exceeded. Upgrade to Pro for higher limits.",
                tier,
                retry_after,
            );
            let headers = response.headers_mut();
            headers.insert(headers::X_QUOTA_LIMIT.clone(), HeaderValue::from(decision.limit));
            headers.insert(headers::X_QUOTA_REMAINING.clone(), HeaderValue::from(0u32));
            if let Some(end) = decision.period_end {
                if let Ok(value) = HeaderValue::from_str(&end.to_rfc3339()) {
                    headers.insert(headers::X_QUOTA_RESET.clone(), value);
                }
            }
            response
        }
    }
}

fn add_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(headers::X_RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
    headers.insert(
        headers::X_RATELIMIT_REMAINING.clone(),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        headers::X_RATELIMIT_RESET.clone(),
        HeaderValue::from(decision.reset_at.as_unix_secs()),
    );
    headers.insert(
        headers::X_RATELIMIT_TIER.clone(),
        HeaderValue::from_static(decision.tier.as_str()),
    );
}

fn add_quota_headers(headers: &mut HeaderMap, decision: &QuotaDecision) {
    if decision.degraded {
        return;
    }
    headers.insert(headers::X_QUOTA_LIMIT.clone(), HeaderValue::from(decision.limit));
    headers.insert(
        headers::X_QUOTA_REMAINING.clone(),
        HeaderValue::from(decision.remaining()),
    );
    headers.insert(headers::X_QUOTA_USED.clone(), HeaderValue::from(decision.used));
}

/// A `LimitError` rendered as an HTTP response.
#[derive(Debug, Clone)]
pub struct LimitRejection(pub LimitError);

impl From<LimitError> for LimitRejection {
    fn from(err: LimitError) -> Self {
        Self(err)
    }
}

impl IntoResponse for LimitRejection {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        match self.0 {
            LimitError::RateLimitExceeded {
                tier,
                limit,
                retry_after,
                ..
            } => {
                let mut response = denial_response(
                    StatusCode::TOO_MANY_REQUESTS,
                    "RATE_LIMIT_EXCEEDED",
                    message,
                    Some(tier.as_str().to_string()),
                    Some(crate::domain::rate_limit::ceil_secs(retry_after).max(1)),
                );
                let headers = response.headers_mut();
                headers.insert(headers::X_RATELIMIT_LIMIT.clone(), HeaderValue::from(limit));
                headers.insert(headers::X_RATELIMIT_REMAINING.clone(), HeaderValue::from(0u32));
                headers.insert(
                    headers::X_RATELIMIT_TIER.clone(),
                    HeaderValue::from_static(tier.as_str()),
                );
                response
            }
            LimitError::QuotaExceeded { .. } => denial_response(
                StatusCode::TOO_MANY_REQUESTS,
                "QUOTA_EXCEEDED",
                message,
                None,
                None,
            ),
            LimitError::UnknownService(_) => {
                denial_response(StatusCode::NOT_FOUND, "UNKNOWN_SERVICE", message, None, None)
            }
            LimitError::CoordinationStoreUnavailable { .. } => denial_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "QUOTA_SERVICE_UNAVAILABLE",
                "Quota service temporarily unavailable",
                None,
                Some(QUOTA_UNAVAILABLE_RETRY_SECS),
            ),
            LimitError::NoActiveSubscription(_) => denial_response(
                StatusCode::FORBIDDEN,
                "NO_ACTIVE_SUBSCRIPTION",
                message,
                None,
                None,
            ),
        }
    }
}
