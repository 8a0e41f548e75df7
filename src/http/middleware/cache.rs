//! Response caching for GET requests.
//!
//! Entries live in the [`CounterStore`] under `response:<METHOD>:<path>[:<query>]`
//! and are framed as `<content-type>\n<body>`.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Duration;

use crate::error::GatewayError;
use crate::observability::MetricsSink;
use crate::store::CounterStore;

pub const X_CACHE: &str = "x-cache";

#[derive(Debug, Clone)]
pub struct CacheState {
    pub store: Arc<dyn CounterStore>,
    pub ttl: Duration,
    pub route: Arc<str>,
    pub metrics: Arc<dyn MetricsSink>,
}

pub fn cache_key(method: &Method, path: &str, query: Option<&str>) -> String {
    match query.filter(|q| !q.is_empty()) {
        Some(q) => format!("response:{method}:{path}:{q}"),
        None => format!("response:{method}:{path}"),
    }
}

fn encode(content_type: Option<&HeaderValue>, body: &[u8]) -> Bytes {
    let ct = content_type.map(HeaderValue::as_bytes).unwrap_or_default();
    let mut framed = Vec::with_capacity(ct.len() + 1 + body.len());
    framed.extend_from_slice(ct);
    framed.push(b'\n');
    framed.extend_from_slice(body);
    Bytes::from(framed)
}

fn decode(entry: Bytes) -> Option<(Option<HeaderValue>, Bytes)> {
    let split = entry.iter().position(|b| *b == b'\n')?;
    let content_type = if split == 0 {
        None
    } else {
        Some(HeaderValue::from_bytes(&entry[..split]).ok()?)
    };
    Some((content_type, entry.slice(split + 1..)))
}

fn with_cache_header(mut res: Response, value: &'static str) -> Response {
    res.headers_mut().insert(X_CACHE, HeaderValue::from_static(value));
    res
}

pub async fn cache_response(
    State(state): State<CacheState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() != Method::GET {
        return next.run(req).await;
    }

    let key = cache_key(req.method(), req.uri().path(), req.uri().query());
    match state.store.get(&key).await {
        Ok(Some(entry)) => {
            if let Some((content_type, body)) = decode(entry) {
                state.metrics.record_cache_request(&state.route, true);
                tracing::debug!(key = %key, "Cache hit");
                let mut res = (StatusCode::OK, body).into_response();
                match content_type {
                    Some(ct) => {
                        res.headers_mut().insert(header::CONTENT_TYPE, ct);
                    }
                    None => {
                        res.headers_mut().remove(header::CONTENT_TYPE);
                    }
                }
                return with_cache_header(res, "HIT");
            }
            tracing::warn!(key = %key, "Discarding unreadable cache entry");
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(key = %key, error = %e, "Cache lookup failed"),
    }

    state.metrics.record_cache_request(&state.route, false);
    let res = next.run(req).await;
    // encoded bodies would be replayed without their Content-Encoding
    if res.status() != StatusCode::OK || res.headers().contains_key(header::CONTENT_ENCODING) {
        return with_cache_header(res, "MISS");
    }

    let (parts, body) = res.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(e) => {
            let msg = format!("reading response for cache: {e}");
            return GatewayError::Upstream(msg).into_response();
        }
    };
    let entry = encode(parts.headers.get(header::CONTENT_TYPE), &bytes);
    if let Err(e) = state.store.set(&key, entry, Some(state.ttl)).await {
        tracing::warn!(key = %key, error = %e, "Cache store failed");
    }

    with_cache_header(Response::from_parts(parts, Body::from(bytes)), "MISS")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::metrics::testing::RecordingSink;
    use crate::store::MemoryStore;
    use axum::{middleware, routing::get, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn app(store: Arc<MemoryStore>, hits: Arc<AtomicUsize>, sink: Arc<RecordingSink>) -> Router {
        let state = CacheState {
            store,
            ttl: Duration::from_secs(60),
            route: Arc::from("catalog"),
            metrics: sink,
        };
        Router::new()
            .route(
                "/items",
                get(move || {
                    let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        let body = format!("{{\"n\":{n}}}");
                        ([(header::CONTENT_TYPE, "application/json")], body)
                    }
                })
                .post(|| async { "posted" }),
            )
            .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "nope") }))
            .route(
                "/packed",
                get(|| async { ([(header::CONTENT_ENCODING, "gzip")], vec![0x1f, 0x8b, 0x08]) }),
            )
            .layer(middleware::from_fn_with_state(state, cache_response))
    }

    fn request(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn quiet() -> Arc<RecordingSink> {
        Arc::new(RecordingSink::default())
    }

    async fn body(res: Response) -> String {
        let b = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        String::from_utf8(b.to_vec()).unwrap()
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key(&Method::GET, "/a", None), "response:GET:/a");
        assert_eq!(cache_key(&Method::GET, "/a", Some("x=1")), "response:GET:/a:x=1");
        assert_eq!(cache_key(&Method::GET, "/a", Some("")), "response:GET:/a");
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(RecordingSink::default());
        let app = app(Arc::new(MemoryStore::new()), hits.clone(), sink.clone());

        let res = app.clone().oneshot(request("/items")).await.unwrap();
        assert_eq!(res.headers()["x-cache"], "MISS");
        assert_eq!(body(res).await, "{\"n\":1}");

        let res = app.oneshot(request("/items")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["x-cache"], "HIT");
        assert_eq!(res.headers()["content-type"], "application/json");
        assert_eq!(body(res).await, "{\"n\":1}");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            *sink.cache.lock(),
            vec![("catalog".to_string(), false), ("catalog".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_query_is_part_of_key() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app(Arc::new(MemoryStore::new()), hits.clone(), quiet());
        for uri in ["/items?page=1", "/items?page=2", "/items?page=1"] {
            app.clone().oneshot(request(uri)).await.unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_only_200_is_stored() {
        let store = Arc::new(MemoryStore::new());
        let app = app(store.clone(), Arc::new(AtomicUsize::new(0)), quiet());
        let res = app.oneshot(request("/missing")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.headers()["x-cache"], "MISS");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_encoded_response_is_not_stored() {
        let store = Arc::new(MemoryStore::new());
        let app = app(store.clone(), Arc::new(AtomicUsize::new(0)), quiet());
        let res = app.oneshot(request("/packed")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["x-cache"], "MISS");
        assert_eq!(res.headers()["content-encoding"], "gzip");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_non_get_bypasses() {
        let store = Arc::new(MemoryStore::new());
        let app = app(store.clone(), Arc::new(AtomicUsize::new(0)), quiet());
        let res = app
            .oneshot(Request::post("/items").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(res.headers().get("x-cache").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_frame_roundtrip_without_content_type() {
        let (ct, body) = decode(encode(None, b"a\nb")).unwrap();
        assert!(ct.is_none());
        assert_eq!(&body[..], b"a\nb");
    }
}
