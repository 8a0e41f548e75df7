//! Security response headers and CORS.
//!
//! # Responsibilities
//! - Add the standard hardening headers to every response
//! - Strip headers that fingerprint the upstream stack
//! - Build the CORS layer from configuration
//!
//! # Design Decisions
//! - HSTS only when the client reached us over TLS (`X-Forwarded-Proto: https`)
//! - A wildcard origin combined with credentials mirrors the request origin

use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::time::Duration;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders};

use crate::config::CorsConfig;

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'";
const REFERRER_POLICY: &str = "strict-origin-when-cross-origin";
const HSTS: &str = "max-age=31536000; includeSubDomains";

/// Adds hardening headers and removes `Server` / `X-Powered-By`.
pub async fn security_headers(req: Request<Body>, next: Next) -> Response {
    let over_tls = req
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|p| p.eq_ignore_ascii_case("https"));

    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static(REFERRER_POLICY));
    if over_tls {
        headers.insert(header::STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS));
    }

    headers.remove(header::SERVER);
    headers.remove("x-powered-by");

    response
}

fn is_wildcard(values: &[String]) -> bool {
    values.iter().any(|v| v == "*")
}

/// Build the CORS layer. Entries that are not valid header values are skipped.
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origin = if is_wildcard(&config.allowed_origins) {
        if config.allow_credentials {
            AllowOrigin::mirror_request()
        } else {
            AllowOrigin::any()
        }
    } else {
        AllowOrigin::list(config.allowed_origins.iter().filter_map(|o| {
            HeaderValue::from_str(o)
                .inspect_err(|_| tracing::warn!(origin = %o, "Ignoring invalid CORS origin"))
                .ok()
        }))
    };

    let methods = if is_wildcard(&config.allowed_methods) {
        AllowMethods::mirror_request()
    } else {
        AllowMethods::list(
            config
                .allowed_methods
                .iter()
                .filter_map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok()),
        )
    };

    let headers = if is_wildcard(&config.allowed_headers) {
        AllowHeaders::mirror_request()
    } else {
        AllowHeaders::list(header_names(&config.allowed_headers))
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(methods)
        .allow_headers(headers)
        .expose_headers(ExposeHeaders::list(header_names(&config.exposed_headers)))
        .allow_credentials(config.allow_credentials)
        .max_age(Duration::from_secs(config.max_age_secs))
}

fn header_names(names: &[String]) -> Vec<HeaderName> {
    names
        .iter()
        .filter(|n| n.as_str() != "*")
        .filter_map(|n| HeaderName::from_bytes(n.as_bytes()).ok())
        .collect()
}

/// Answered CORS preflights carry no body, so report them as 204.
pub async fn preflight_no_content(req: Request<Body>, next: Next) -> Response {
    let preflight = req.method() == Method::OPTIONS
        && req.headers().contains_key(header::ORIGIN)
        && req.headers().contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    let mut response = next.run(req).await;
    if preflight && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app(cors: CorsConfig) -> Router {
        Router::new()
            .route(
                "/",
                get(|| async { ([("server", "nginx"), ("x-powered-by", "php")], "ok") }),
            )
            .layer(middleware::from_fn(security_headers))
            .layer(cors_layer(&cors))
            .layer(middleware::from_fn(preflight_no_content))
    }

    #[tokio::test]
    async fn test_security_headers_applied() {
        let res = app(CorsConfig::default())
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let h = res.headers();
        assert_eq!(h["x-frame-options"], "DENY");
        assert_eq!(h["x-content-type-options"], "nosniff");
        assert_eq!(h["content-security-policy"], "default-src 'self'");
        assert_eq!(h["referrer-policy"], "strict-origin-when-cross-origin");
        assert!(h.get("server").is_none());
        assert!(h.get("x-powered-by").is_none());
        assert!(h.get("strict-transport-security").is_none());
    }

    #[tokio::test]
    async fn test_hsts_behind_tls() {
        let res = app(CorsConfig::default())
            .oneshot(
                Request::get("/")
                    .header("x-forwarded-proto", "https")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(res.headers().contains_key("strict-transport-security"));
    }

    #[tokio::test]
    async fn test_preflight_short_circuits() {
        let cors = CorsConfig {
            allowed_origins: vec!["https://app.example".to_string()],
            ..CorsConfig::default()
        };
        let res = app(cors)
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/")
                    .header("origin", "https://app.example")
                    .header("access-control-request-method", "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert_eq!(res.headers()["access-control-allow-origin"], "https://app.example");
    }

    #[tokio::test]
    async fn test_unlisted_origin_not_echoed() {
        let cors = CorsConfig {
            allowed_origins: vec!["https://app.example".to_string()],
            ..CorsConfig::default()
        };
        let res = app(cors)
            .oneshot(
                Request::get("/")
                    .header("origin", "https://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn test_wildcard_with_credentials_mirrors() {
        let cors = CorsConfig {
            allow_credentials: true,
            ..CorsConfig::default()
        };
        let res = app(cors)
            .oneshot(
                Request::get("/")
                    .header("origin", "https://any.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.headers()["access-control-allow-origin"], "https://any.example");
        assert_eq!(res.headers()["access-control-allow-credentials"], "true");
    }
}
