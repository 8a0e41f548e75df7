//! Request inspection and preparation for forwarding.
//!
//! # Responsibilities
//! - Resolve the client IP (forwarding headers first, then the socket)
//! - Strip hop-by-hop headers before a message crosses the proxy
//!
//! # Design Decisions
//! - The first `X-Forwarded-For` entry is the original client
//! - Headers named in `Connection` are hop-by-hop too

use axum::{
    extract::ConnectInfo,
    http::{header, HeaderMap, HeaderName, Request},
};
use std::net::SocketAddr;

/// Correlation header added to every forwarded request.
pub const X_GATEWAY_REQUEST_ID: &str = "x-gateway-request-id";

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Best-effort client address: `X-Forwarded-For`, `X-Real-IP`, then the peer socket.
pub fn client_ip<B>(req: &Request<B>) -> String {
    let headers = req.headers();
    if let Some(first) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return real.to_string();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Peer socket IP only, ignoring forwarding headers.
pub fn peer_ip<B>(req: &Request<B>) -> Option<String> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn remove_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
