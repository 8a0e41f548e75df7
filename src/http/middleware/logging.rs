//! One structured access-log line per request.

use axum::{
    body::Body,
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::http::request::client_ip;

pub async fn log_request(req: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let ip = client_ip(&req);
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let res = next.run(req).await;

    let status = res.status();
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
    if status.is_server_error() {
        tracing::warn!(
            %method,
            %path,
            status = status.as_u16(),
            latency_ms,
            client_ip = %ip,
            user_agent = %user_agent,
            "request"
        );
    } else {
        tracing::info!(
            %method,
            %path,
            status = status.as_u16(),
            latency_ms,
            client_ip = %ip,
            user_agent = %user_agent,
            "request"
        );
    }
    res
}
