//! Response handling and transformation.
//!
//! # Responsibilities
//! - Transform backend response for client
//! - Tag responses with the gateway and the backend that served them
//!
//! # Design Decisions
//! - Upstream bodies are buffered up to `max_response_size`
//! - Hop-by-hop headers stripped automatically

use axum::{
    body::{Body, Bytes},
    http::{response::Parts, HeaderValue},
    response::Response,
};

use super::request::remove_hop_by_hop;

pub const X_GATEWAY: &str = "x-gateway";
pub const X_BACKEND: &str = "x-backend";
pub const GATEWAY_NAME: &str = "api-gateway";

/// Rebuild a buffered upstream response for the client.
pub fn from_upstream(mut parts: Parts, body: Bytes, backend_id: &str) -> Response {
    remove_hop_by_hop(&mut parts.headers);
    parts
        .headers
        .insert(X_GATEWAY, HeaderValue::from_static(GATEWAY_NAME));
    if let Ok(value) = HeaderValue::from_str(backend_id) {
        parts.headers.insert(X_BACKEND, value);
    }
    Response::from_parts(parts, Body::from(body))
}
