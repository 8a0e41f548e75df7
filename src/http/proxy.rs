//! Forwarding a matched request to one backend of its route.
//!
//! # Responsibilities
//! - Pick a backend through the route's load balancer
//! - Hold a connection slot on it for the life of the call
//! - Rewrite the request for the backend and bound the call by the route timeout
//! - Isolate a backend that fails at the transport level
//!
//! # Design Decisions
//! - No retries: a failed call is a 502 and the backend leaves rotation
//!   until an active probe brings it back
//! - Request and response bodies are buffered with size limits

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{
        header, request::Parts, uri::PathAndQuery, HeaderValue, Request, Uri,
    },
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::client::HttpClient;
use super::request::{client_ip, peer_ip, remove_hop_by_hop, X_GATEWAY_REQUEST_ID};
use super::response;
use crate::error::GatewayError;
use crate::load_balancer::{Backend, BackendPools, LoadBalancer};
use crate::observability::{BackendOutcome, MetricsSink};
use crate::routing::CompiledRoute;

#[derive(Debug, Clone)]
pub struct ProxyState {
    pub pools: Arc<BackendPools>,
    pub client: HttpClient,
    pub metrics: Arc<dyn MetricsSink>,
    pub max_body_size: usize,
    pub max_response_size: usize,
}

/// Terminal handler of every route service. The route arrives as a request extension.
pub async fn proxy_handler(State(state): State<ProxyState>, req: Request<Body>) -> Response {
    let Some(route) = req.extensions().get::<Arc<CompiledRoute>>().cloned() else {
        return GatewayError::Internal("request reached the dispatcher without a route".into())
            .into_response();
    };
    match dispatch(&state, &route, req).await {
        Ok(res) => res,
        Err(e) => e.into_response(),
    }
}

async fn dispatch(
    state: &ProxyState,
    route: &CompiledRoute,
    req: Request<Body>,
) -> Result<Response, GatewayError> {
    let started = Instant::now();
    let lb = state.pools.get(route.name()).ok_or_else(|| {
        tracing::error!(route = %route.name(), "No load balancer registered for route");
        GatewayError::MissingLoadBalancer(route.name().to_string())
    })?;

    let ip = client_ip(&req);
    let backend = lb.next_backend(&ip).map_err(|_| {
        state
            .metrics
            .record_backend_request("unavailable", BackendOutcome::Unavailable, started.elapsed());
        tracing::warn!(route = %route.name(), "No eligible backend");
        GatewayError::NoBackendsAvailable
    })?;
    let _slot = backend
        .try_acquire()
        .ok_or_else(|| GatewayError::BackendSaturated(backend.id().to_string()))?;

    let peer = peer_ip(&req).unwrap_or(ip);
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, state.max_body_size)
        .await
        .map_err(|_| GatewayError::PayloadTooLarge(state.max_body_size))?;

    let upstream = build_upstream_request(parts, body, route, &backend, &peer)?;
    let timeout = Duration::from_secs(route.config().timeout_secs);

    tracing::debug!(
        route = %route.name(),
        backend = %backend.id(),
        uri = %upstream.uri(),
        "Forwarding request"
    );

    let result = tokio::time::timeout(timeout, state.client.request(upstream)).await;
    let upstream_res = match result {
        Ok(Ok(res)) => res,
        Ok(Err(e)) => {
            isolate(state, &lb, &backend, started, &e.to_string());
            return Err(GatewayError::Upstream(e.to_string()));
        }
        Err(_) => {
            isolate(state, &lb, &backend, started, "timed out");
            return Err(GatewayError::UpstreamTimeout(timeout));
        }
    };

    let status = upstream_res.status();
    let (parts, body) = upstream_res.into_parts();
    let body = axum::body::to_bytes(Body::new(body), state.max_response_size)
        .await
        .map_err(|e| {
            tracing::warn!(backend = %backend.id(), error = %e, "Failed to read backend response");
            GatewayError::Upstream(format!("reading response body: {e}"))
        })?;

    state.metrics.record_backend_request(
        backend.id(),
        BackendOutcome::Response(status.as_u16()),
        started.elapsed(),
    );
    Ok(response::from_upstream(parts, body, backend.id()))
}

/// Take a backend out of rotation after a transport failure.
fn isolate(
    state: &ProxyState,
    lb: &LoadBalancer,
    backend: &Backend,
    started: Instant,
    error: &str,
) {
    state
        .metrics
        .record_backend_request(backend.id(), BackendOutcome::Error, started.elapsed());
    if backend.set_healthy(false) {
        state.metrics.record_backend_health(backend.id(), false);
        tracing::warn!(
            backend = %backend.id(),
            strategy = %lb.strategy(),
            error = %error,
            "Backend marked unhealthy after failed request"
        );
    } else {
        tracing::error!(backend = %backend.id(), error = %error, "Upstream request failed");
    }
}

/// Path sent upstream: backend base path + route remainder + original query.
fn upstream_path(route: &CompiledRoute, backend: &Backend, uri: &Uri) -> String {
    let base = backend.url().path().trim_end_matches('/');
    let rest = route.strip_prefix(uri.path());
    match uri.query() {
        Some(q) => format!("{base}{rest}?{q}"),
        None => format!("{base}{rest}"),
    }
}

fn build_upstream_request(
    mut parts: Parts,
    body: Bytes,
    route: &CompiledRoute,
    backend: &Backend,
    client: &str,
) -> Result<Request<Body>, GatewayError> {
    let url = backend.url();
    let host = url
        .host_str()
        .ok_or_else(|| GatewayError::Internal(format!("backend `{}` has no host", backend.id())))?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let path = PathAndQuery::try_from(upstream_path(route, backend, &parts.uri))
        .map_err(|e| GatewayError::BadRequest(e.to_string()))?;

    let inbound_proto = parts
        .headers
        .get("x-forwarded-proto")
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("http"));

    parts.uri = Uri::builder()
        .scheme(url.scheme())
        .authority(authority.as_str())
        .path_and_query(path)
        .build()
        .map_err(|e| GatewayError::Internal(format!("building upstream uri: {e}")))?;

    let headers = &mut parts.headers;
    remove_hop_by_hop(headers);
    let host_value = HeaderValue::from_str(&authority)
        .map_err(|e| GatewayError::Internal(format!("invalid backend host: {e}")))?;
    headers.insert(header::HOST, host_value);

    let forwarded_for = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{prior}, {client}"),
        _ => client.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert("x-forwarded-for", value);
    }
    headers.insert("x-forwarded-proto", inbound_proto);
    if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
        headers.insert(X_GATEWAY_REQUEST_ID, value);
    }

    parts.extensions.clear();
    Ok(Request::from_parts(parts, Body::from(body)))
}
