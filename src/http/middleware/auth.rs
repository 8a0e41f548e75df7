//! Bearer-token authentication.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::error::GatewayError;
use crate::observability::MetricsSink;
use crate::routing::matcher::PathPrefixMatcher;
use crate::security::{parse_bearer, TokenValidator};

#[derive(Debug, Clone)]
pub struct AuthState {
    pub validator: Arc<dyn TokenValidator>,
    /// Path prefixes that skip authentication, matched on segment boundaries.
    pub exempt_paths: Arc<[PathPrefixMatcher]>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl AuthState {
    fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|p| p.strip(path).is_some())
    }
}

/// Compile configured exempt prefixes.
pub fn exempt_matchers(paths: &[String]) -> Arc<[PathPrefixMatcher]> {
    paths.iter().map(|p| PathPrefixMatcher::new(p.as_str())).collect()
}

/// Validates the bearer token and attaches the caller's `AuthContext`.
pub async fn require_auth(
    State(state): State<AuthState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if state.is_exempt(req.uri().path()) {
        return next.run(req).await;
    }

    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let result = match parse_bearer(header) {
        Ok(token) => state.validator.validate(token).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(ctx) => {
            state.metrics.record_auth(true);
            tracing::debug!(
                user_id = %ctx.user_id,
                path = %req.uri().path(),
                "Request authenticated"
            );
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(e) => {
            state.metrics.record_auth(false);
            tracing::debug!(error = %e, path = %req.uri().path(), "Authentication failed");
            let mut res = GatewayError::Unauthorized(e).into_response();
            res.headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            res
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::observability::metrics::testing::RecordingSink;
    use crate::security::{AuthContext, SessionTokenService, StaticUserDirectory};
    use axum::{http::StatusCode, middleware, routing::get, Extension, Router};
    use tower::ServiceExt;

    fn setup() -> (Router, Arc<SessionTokenService>, Arc<RecordingSink>) {
        let config = AuthConfig::default();
        let users = Arc::new(StaticUserDirectory::from_config(&config.users));
        let sessions = Arc::new(SessionTokenService::new(users, &config));
        let sink = Arc::new(RecordingSink::default());
        let state = AuthState {
            validator: sessions.clone(),
            exempt_paths: exempt_matchers(&config.exempt_paths),
            metrics: sink.clone(),
        };
        let app = Router::new()
            .route(
                "/private",
                get(|Extension(ctx): Extension<AuthContext>| async move { ctx.username }),
            )
            .route("/health", get(|| async { "up" }))
            .route("/health/detailed", get(|| async { "details" }))
            .route("/healthcare", get(|| async { "records" }))
            .route("/authz/grant", get(|| async { "granted" }))
            .layer(middleware::from_fn_with_state(state, require_auth));
        (app, sessions, sink)
    }

    fn get_req(path: &str, auth: Option<&str>) -> Request<Body> {
        let mut b = Request::get(path);
        if let Some(a) = auth {
            b = b.header("authorization", a);
        }
        b.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_rejected() {
        let (app, _, sink) = setup();
        let res = app.oneshot(get_req("/private", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(res.headers()["www-authenticate"], "Bearer");
        assert_eq!(*sink.auth.lock(), vec![false]);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_tokens_rejected() {
        let (app, _, _) = setup();
        let res = app.clone().oneshot(get_req("/private", Some("Basic abc"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let res = app.oneshot(get_req("/private", Some("Bearer nope"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_token_attaches_context() {
        let (app, sessions, _) = setup();
        let pair = sessions.login("user", "password123").unwrap();
        let bearer = format!("Bearer {}", pair.access_token);
        let res = app.oneshot(get_req("/private", Some(&bearer))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"user");
    }

    #[tokio::test]
    async fn test_exempt_prefix_passes() {
        let (app, _, sink) = setup();
        for path in ["/health", "/health/detailed"] {
            let res = app.clone().oneshot(get_req(path, None)).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK, "{path}");
        }
        assert!(sink.auth.lock().is_empty());
    }

    #[tokio::test]
    async fn test_exempt_prefix_stops_at_segment_boundary() {
        let (app, _, sink) = setup();
        for path in ["/healthcare", "/authz/grant"] {
            let res = app.clone().oneshot(get_req(path, None)).await.unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{path}");
        }
        assert_eq!(*sink.auth.lock(), vec![false, false]);
    }

    #[test]
    fn test_trailing_slash_in_exempt_path() {
        let state = AuthState {
            validator: Arc::new(SessionTokenService::new(
                Arc::new(StaticUserDirectory::from_config(&[])),
                &AuthConfig::default(),
            )),
            exempt_paths: exempt_matchers(&["/public/".to_string()]),
            metrics: Arc::new(RecordingSink::default()),
        };
        assert!(state.is_exempt("/public"));
        assert!(state.is_exempt("/public/docs"));
        assert!(!state.is_exempt("/publication"));
    }
}
