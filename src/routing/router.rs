//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the matching route for a method + path
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Longest prefix wins; declaration order breaks ties
//! - O(n) prefix scan (acceptable for typical route counts)

use axum::http::Method;
use std::sync::Arc;

use super::matcher::{AndMatcher, Matcher, MethodMatcher, PathPrefixMatcher};
use crate::config::RouteConfig;

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("route '{route}' has invalid method '{method}'")]
    InvalidMethod { route: String, method: String },
}

/// A route compiled for lookup.
#[derive(Debug)]
pub struct CompiledRoute {
    name: String,
    config: Arc<RouteConfig>,
    prefix: PathPrefixMatcher,
    matcher: AndMatcher,
}

impl CompiledRoute {
    pub fn compile(config: RouteConfig) -> Result<Self, RouteError> {
        let method = MethodMatcher::new(&config.method).map_err(|_| RouteError::InvalidMethod {
            route: config.display_name().to_string(),
            method: config.method.clone(),
        })?;
        let prefix = PathPrefixMatcher::new(config.path.clone());
        let matcher = AndMatcher::new(vec![Box::new(prefix.clone()), Box::new(method)]);
        Ok(Self {
            name: config.display_name().to_string(),
            config: Arc::new(config),
            prefix,
            matcher,
        })
    }

    /// Key used for the route's load balancer and metrics labels.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Arc<RouteConfig> {
        &self.config
    }

    pub fn prefix(&self) -> &str {
        self.prefix.prefix()
    }

    /// Path forwarded upstream once the route prefix is removed.
    pub fn strip_prefix<'a>(&self, path: &'a str) -> &'a str {
        self.prefix.strip(path).unwrap_or(path)
    }
}

/// Immutable route table.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<CompiledRoute>>,
}

impl RouteTable {
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self, RouteError> {
        let routes = routes
            .iter()
            .cloned()
            .map(|r| CompiledRoute::compile(r).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { routes })
    }

    pub fn routes(&self) -> &[Arc<CompiledRoute>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn match_request(&self, method: &Method, path: &str) -> Option<&Arc<CompiledRoute>> {
        let mut best: Option<&Arc<CompiledRoute>> = None;
        for route in &self.routes {
            if !route.matcher.matches(method, path) {
                continue;
            }
            // strictly longer only, so the earlier declaration keeps ties
            if best.map_or(true, |b| route.prefix().len() > b.prefix().len()) {
                best = Some(route);
            }
        }
        best
    }
}
