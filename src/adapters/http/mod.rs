//! HTTP adapters - the service's own REST surface.

pub mod middleware;
pub mod quota;

use std::time::Duration;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use middleware::{rate_limit_middleware, tenant_middleware, AuthenticatedTenant};
pub use quota::QuotaAppState;

/// Builds the full application router.
///
/// Layer order, outermost first: request id, tracing, timeout, tenant
/// identity, rate limiting.
pub fn app_router(state: QuotaAppState, request_timeout: Duration) -> Router {
    Router::new()
        .nest("/api", quota::quota_routes())
        .merge(quota::health_routes())
        .layer(axum::middleware::from_fn_with_state(
            state.gate.clone(),
            rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn(tenant_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
}
