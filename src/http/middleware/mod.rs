//! Request interceptors.
//!
//! # Data Flow
//! ```text
//! Global (every request, outermost first):
//!     metrics → logging → security headers → CORS → panic recovery
//!
//! Route-scoped (resolved once per route at startup):
//!     auth → rate_limit → named extras → cache
//!     → proxy dispatcher
//! ```
//!
//! # Design Decisions
//! - Closed registry: unknown names are rejected by config validation
//! - Route flags come first, explicit names follow, duplicates are dropped
//! - Cache is always innermost so it stores the handler's unencoded body
//! - Each interceptor may act before, after, or short-circuit the chain

pub mod auth;
pub mod cache;
pub mod logging;
pub mod metrics;
pub mod rate_limit;

use axum::{middleware, Router};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;

use crate::config::{CorsConfig, RouteConfig};
use crate::observability::MetricsSink;
use crate::routing::matcher::PathPrefixMatcher;
use crate::security::headers::{cors_layer, preflight_no_content, security_headers};
use crate::security::{RateLimiter, TokenValidator};
use crate::store::CounterStore;

pub use auth::AuthState;
pub use cache::CacheState;
pub use rate_limit::RateLimitState;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown middleware `{0}`")]
pub struct UnknownMiddleware(pub String);

/// Every middleware a route may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MiddlewareKind {
    Auth,
    RateLimit,
    Cache,
    Compression,
    Logging,
    Security,
    Cors,
}

impl MiddlewareKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MiddlewareKind::Auth => "auth",
            MiddlewareKind::RateLimit => "rate_limit",
            MiddlewareKind::Cache => "cache",
            MiddlewareKind::Compression => "compression",
            MiddlewareKind::Logging => "logging",
            MiddlewareKind::Security => "security",
            MiddlewareKind::Cors => "cors",
        }
    }

    /// Ordered chain for a route, outermost first.
    pub fn chain_for(route: &RouteConfig) -> Result<Vec<MiddlewareKind>, UnknownMiddleware> {
        let mut chain = Vec::new();
        if route.auth_required {
            chain.push(MiddlewareKind::Auth);
        }
        if route.rate_limit > 0 {
            chain.push(MiddlewareKind::RateLimit);
        }
        let mut cache = route.cache_enabled;
        for name in &route.middleware {
            let kind = name.parse::<MiddlewareKind>()?;
            if kind == MiddlewareKind::Cache {
                cache = true;
            } else if !chain.contains(&kind) {
                chain.push(kind);
            }
        }
        if cache {
            chain.push(MiddlewareKind::Cache);
        }
        Ok(chain)
    }
}

impl fmt::Display for MiddlewareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MiddlewareKind {
    type Err = UnknownMiddleware;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auth" => Ok(MiddlewareKind::Auth),
            "rate_limit" | "ratelimit" => Ok(MiddlewareKind::RateLimit),
            "cache" => Ok(MiddlewareKind::Cache),
            "compression" | "gzip" => Ok(MiddlewareKind::Compression),
            "logging" => Ok(MiddlewareKind::Logging),
            "security" => Ok(MiddlewareKind::Security),
            "cors" => Ok(MiddlewareKind::Cors),
            _ => Err(UnknownMiddleware(s.to_string())),
        }
    }
}

/// Shared collaborators the route-scoped middleware are built from.
#[derive(Debug, Clone)]
pub struct MiddlewareServices {
    pub validator: Arc<dyn TokenValidator>,
    pub exempt_paths: Arc<[PathPrefixMatcher]>,
    pub limiter: Arc<dyn RateLimiter>,
    pub store: Arc<dyn CounterStore>,
    pub metrics: Arc<dyn MetricsSink>,
    pub cors: CorsConfig,
}

impl MiddlewareServices {
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            validator: self.validator.clone(),
            exempt_paths: self.exempt_paths.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Wrap a route's service in its middleware chain. `chain[0]` ends up outermost.
pub fn apply_route_middleware(
    mut router: Router,
    chain: &[MiddlewareKind],
    services: &MiddlewareServices,
    route_name: &str,
    route: &RouteConfig,
) -> Router {
    for kind in chain.iter().rev() {
        router = match kind {
            MiddlewareKind::Auth => router.layer(middleware::from_fn_with_state(
                services.auth_state(),
                auth::require_auth,
            )),
            MiddlewareKind::RateLimit => {
                if route.rate_limit == 0 {
                    tracing::warn!(
                        route = %route_name,
                        "rate_limit middleware named without a limit, skipping"
                    );
                    continue;
                }
                let state = RateLimitState {
                    limiter: services.limiter.clone(),
                    limit: route.rate_limit,
                    route: Arc::from(route_name),
                    metrics: services.metrics.clone(),
                };
                router.layer(middleware::from_fn_with_state(state, rate_limit::enforce))
            }
            MiddlewareKind::Cache => {
                let state = CacheState {
                    store: services.store.clone(),
                    ttl: Duration::from_secs(route.cache_ttl_secs),
                    route: Arc::from(route_name),
                    metrics: services.metrics.clone(),
                };
                router.layer(middleware::from_fn_with_state(state, cache::cache_response))
            }
            MiddlewareKind::Compression => router.layer(CompressionLayer::new()),
            MiddlewareKind::Logging => router.layer(middleware::from_fn(logging::log_request)),
            MiddlewareKind::Security => router.layer(middleware::from_fn(security_headers)),
            MiddlewareKind::Cors => router
                .layer(cors_layer(&services.cors))
                .layer(middleware::from_fn(preflight_no_content)),
        };
    }
    router
}
