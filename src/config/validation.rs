//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, weights >= 1)
//! - Resolve middleware names against the closed registry
//! - Detect duplicate route names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::Method;
use url::Url;

use crate::config::schema::GatewayConfig;
use crate::http::middleware::MiddlewareKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid bind address `{0}`")]
    BindAddress(String),
    #[error("route #{index}: path must start with '/'")]
    RoutePath { index: usize },
    #[error("route `{route}`: invalid method `{method}`")]
    RouteMethod { route: String, method: String },
    #[error("route `{route}`: no backends configured")]
    NoBackends { route: String },
    #[error("route `{route}`: duplicate route name")]
    DuplicateRoute { route: String },
    #[error("route `{route}`: unknown middleware `{name}`")]
    UnknownMiddleware { route: String, name: String },
    #[error("route `{route}`: timeout must be greater than 0")]
    RouteTimeout { route: String },
    #[error("route `{route}`: invalid backend url `{url}`")]
    BackendUrl { route: String, url: String },
    #[error("route `{route}`: backend `{url}` weight must be at least 1")]
    BackendWeight { route: String, url: String },
    #[error("health_check.interval_secs must be greater than 0")]
    HealthInterval,
    #[error("health_check.timeout_secs must be greater than 0")]
    HealthTimeout,
    #[error("rate_limit.window_secs must be greater than 0")]
    RateLimitWindow,
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.server.bind_address.clone()));
    }
    if config.health_check.interval_secs == 0 {
        errors.push(ValidationError::HealthInterval);
    }
    if config.health_check.timeout_secs == 0 {
        errors.push(ValidationError::HealthTimeout);
    }
    if config.rate_limit.window_secs == 0 {
        errors.push(ValidationError::RateLimitWindow);
    }

    let mut names = HashSet::new();
    for (index, route) in config.routes.iter().enumerate() {
        let name = route.display_name().to_string();

        if !route.path.starts_with('/') {
            errors.push(ValidationError::RoutePath { index });
        }
        if !is_valid_method(&route.method) {
            errors.push(ValidationError::RouteMethod {
                route: name.clone(),
                method: route.method.clone(),
            });
        }
        if !names.insert(name.clone()) {
            errors.push(ValidationError::DuplicateRoute { route: name.clone() });
        }
        if route.timeout_secs == 0 {
            errors.push(ValidationError::RouteTimeout { route: name.clone() });
        }
        if route.backends.is_empty() {
            errors.push(ValidationError::NoBackends { route: name.clone() });
        }
        for backend in &route.backends {
            if Url::parse(&backend.url).map(|u| u.host().is_none()).unwrap_or(true) {
                errors.push(ValidationError::BackendUrl {
                    route: name.clone(),
                    url: backend.url.clone(),
                });
            }
            if backend.weight == 0 {
                errors.push(ValidationError::BackendWeight {
                    route: name.clone(),
                    url: backend.url.clone(),
                });
            }
        }
        for middleware in &route.middleware {
            if middleware.parse::<MiddlewareKind>().is_err() {
                errors.push(ValidationError::UnknownMiddleware {
                    route: name.clone(),
                    name: middleware.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_valid_method(method: &str) -> bool {
    matches!(method, "ANY" | "*") || Method::from_bytes(method.as_bytes()).is_ok()
}
