use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::security::AuthError;

/// Errors surfaced to clients, each mapped to a fixed status code.
///
/// # Upstream Errors
///
/// - `NoBackendsAvailable` / `BackendSaturated` - nothing eligible to take the call (503)
/// - `Upstream` / `UpstreamTimeout` - the chosen backend failed (502); the
///   dispatcher has already marked it unhealthy
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("No route matches {0}")]
    RouteNotFound(String),

    #[error("Route `{0}` has no load balancer")]
    MissingLoadBalancer(String),

    #[error("No healthy backends available")]
    NoBackendsAvailable,

    #[error("Backend `{0}` is at its connection limit")]
    BackendSaturated(String),

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Upstream did not answer within {0:?}")]
    UpstreamTimeout(Duration),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound(_) | GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::MissingLoadBalancer(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::NoBackendsAvailable | GatewayError::BackendSaturated(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::Upstream(_) | GatewayError::UpstreamTimeout(_) => StatusCode::BAD_GATEWAY,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            GatewayError::RouteNotFound(_) => "route_not_found",
            GatewayError::MissingLoadBalancer(_) => "misconfigured_route",
            GatewayError::NoBackendsAvailable | GatewayError::BackendSaturated(_) => {
                "service_unavailable"
            }
            GatewayError::Upstream(_) => "bad_gateway",
            GatewayError::UpstreamTimeout(_) => "upstream_timeout",
            GatewayError::PayloadTooLarge(_) => "payload_too_large",
            GatewayError::RateLimited => "rate_limit_exceeded",
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::Forbidden(_) => "forbidden",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            // upstream and config details stay in the logs
            GatewayError::MissingLoadBalancer(_) | GatewayError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            GatewayError::Upstream(_) | GatewayError::UpstreamTimeout(_) => {
                "Backend service unavailable".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            error: self.kind(),
            message: self.client_message(),
        };
        (status, axum::Json(body)).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
