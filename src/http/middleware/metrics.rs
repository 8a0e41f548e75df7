//! Request metrics, recorded through the [`MetricsSink`].

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;

use crate::observability::metrics::track_active_request;
use crate::observability::{HttpRequestRecord, MetricsSink};

/// Route label attached to responses by the dispatcher.
#[derive(Debug, Clone)]
pub struct RouteLabel(pub Arc<str>);

/// Keeps the in-flight gauge balanced even if the request future is dropped.
struct ActiveRequest;

impl ActiveRequest {
    fn start() -> Self {
        track_active_request(true);
        ActiveRequest
    }
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        track_active_request(false);
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

pub async fn record_metrics(
    State(sink): State<Arc<dyn MetricsSink>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let _active = ActiveRequest::start();
    let started = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let request_size = content_length(req.headers())
        .or_else(|| req.body().size_hint().exact())
        .unwrap_or(0);

    let res = next.run(req).await;

    let route = res
        .extensions()
        .get::<RouteLabel>()
        .map(|l| l.0.to_string())
        .unwrap_or(path);
    let response_size = content_length(res.headers())
        .or_else(|| res.body().size_hint().exact())
        .unwrap_or(0);

    sink.record_http_request(&HttpRequestRecord {
        method,
        route,
        status: res.status().as_u16(),
        duration: started.elapsed(),
        request_size,
        response_size,
    });
    res
}
