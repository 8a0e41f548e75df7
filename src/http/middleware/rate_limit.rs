//! Per-route request rate limiting.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::error::GatewayError;
use crate::http::request::client_ip;
use crate::observability::MetricsSink;
use crate::security::{rate_limit_key, AuthContext, RateLimiter};

#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub limiter: Arc<dyn RateLimiter>,
    /// Requests per second for this route.
    pub limit: u32,
    pub route: Arc<str>,
    pub metrics: Arc<dyn MetricsSink>,
}

pub async fn enforce(
    State(state): State<RateLimitState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    let user_id = req.extensions().get::<AuthContext>().map(|c| c.user_id.as_str());
    let key = rate_limit_key(&ip, user_id, req.uri().path());

    match state.limiter.allow(&key, state.limit).await {
        Ok(true) => {
            state.metrics.record_rate_limit(&state.route, true);
            next.run(req).await
        }
        Ok(false) => {
            state.metrics.record_rate_limit(&state.route, false);
            tracing::info!(
                route = %state.route,
                key = %key,
                limit = state.limit,
                "Rate limit exceeded"
            );
            too_many_requests(state.limit, state.limiter.retry_after().as_secs().max(1))
        }
        Err(e) => {
            tracing::error!(
                route = %state.route,
                error = %e,
                "Rate limiter unavailable, admitting request"
            );
            next.run(req).await
        }
    }
}

fn too_many_requests(limit: u32, retry_after_secs: u64) -> Response {
    let mut res = GatewayError::RateLimited.into_response();
    let headers = res.headers_mut();
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
    res
}
