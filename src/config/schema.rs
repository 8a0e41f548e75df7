//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::load_balancer::StrategyKind;
use crate::security::rate_limit::RateLimitAlgorithm;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener and request limits.
    pub server: ServerConfig,

    /// Route definitions, each with its own backend pool.
    pub routes: Vec<RouteConfig>,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Rate limiting algorithm shared by all routes.
    pub rate_limit: RateLimitConfig,

    /// Counter/cache store settings.
    pub store: StoreConfig,

    /// Session tokens and user accounts.
    pub auth: AuthConfig,

    pub cors: CorsConfig,

    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Upper bound on total request handling time, in seconds.
    pub request_timeout_secs: u64,

    /// Largest backend response body that will be relayed, in bytes.
    pub max_response_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 60,
            max_response_size: 10 * 1024 * 1024,
        }
    }
}

/// A path-prefix policy bundle.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics. Defaults to the path.
    #[serde(default)]
    pub name: String,

    /// Path prefix to match.
    pub path: String,

    /// HTTP method to match, or "ANY".
    #[serde(default = "default_method")]
    pub method: String,

    /// Ordered backend list.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    #[serde(default)]
    pub auth_required: bool,

    /// Requests per second per rate-limit key, 0 disables limiting.
    #[serde(default)]
    pub rate_limit: u32,

    #[serde(default)]
    pub cache_enabled: bool,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Timeout for the forwarded backend call, in seconds.
    #[serde(default = "default_route_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub load_balancer: StrategyKind,

    /// Extra middleware by name, applied after the flag-driven ones.
    #[serde(default)]
    pub middleware: Vec<String>,
}

impl RouteConfig {
    /// Minimal route with defaults for every optional field.
    pub fn new(path: impl Into<String>, backends: Vec<BackendConfig>) -> Self {
        Self {
            name: String::new(),
            path: path.into(),
            method: default_method(),
            backends,
            auth_required: false,
            rate_limit: 0,
            cache_enabled: false,
            cache_ttl_secs: default_cache_ttl(),
            timeout_secs: default_route_timeout(),
            load_balancer: StrategyKind::default(),
            middleware: Vec::new(),
        }
    }

    /// Name used as the route's key, falling back to its path.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.path
        } else {
            &self.name
        }
    }
}

fn default_method() -> String {
    "ANY".to_string()
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_route_timeout() -> u64 {
    30
}

/// Backend server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Upstream base URL (e.g., "http://127.0.0.1:3000").
    pub url: String,

    /// Weight for weighted load balancing (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Maximum concurrent connections to this backend, 0 for unlimited.
    #[serde(default = "default_max_backend_conns")]
    pub max_connections: usize,

    #[serde(default)]
    pub health_check: BackendHealthCheckConfig,
}

impl BackendConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            weight: default_weight(),
            max_connections: default_max_backend_conns(),
            health_check: BackendHealthCheckConfig::default(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

fn default_weight() -> u32 {
    1
}

fn default_max_backend_conns() -> usize {
    100
}

/// Per-backend probe overrides. Unset fields fall back to [`HealthCheckConfig`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendHealthCheckConfig {
    pub enabled: bool,
    pub path: Option<String>,
    /// Rounded up to a whole number of global check intervals.
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
}

impl Default for BackendHealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            interval_secs: None,
            timeout_secs: None,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,

    /// Deadline for each dependency check on `/health/detailed`, in seconds.
    pub dependency_timeout_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 5,
            path: "/health".to_string(),
            unhealthy_threshold: 1,
            healthy_threshold: 1,
            dependency_timeout_secs: 10,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub algorithm: RateLimitAlgorithm,

    /// Window length for the window-based algorithms, in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            algorithm: RateLimitAlgorithm::TokenBucket,
            window_secs: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How often expired entries are swept, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
        }
    }
}

/// Session token and account settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token_expiry_secs: u64,
    pub refresh_expiry_secs: u64,
    pub issuer: String,

    /// Path prefixes that never require a token.
    pub exempt_paths: Vec<String>,

    pub users: Vec<UserConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_expiry_secs: 24 * 3600,
            refresh_expiry_secs: 7 * 24 * 3600,
            issuer: "api-gateway".to_string(),
            exempt_paths: vec![
                "/health".to_string(),
                "/metrics".to_string(),
                "/auth".to_string(),
            ],
            users: vec![
                UserConfig {
                    id: "1".to_string(),
                    username: "admin".to_string(),
                    // WARNING: demo credentials, override in production.
                    password: "password123".to_string(),
                    roles: vec!["admin".to_string(), "user".to_string()],
                    active: true,
                },
                UserConfig {
                    id: "2".to_string(),
                    username: "user".to_string(),
                    password: "password123".to_string(),
                    roles: vec!["user".to_string()],
                    active: true,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    pub id: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins, "*" allows any.
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: vec![
                "authorization".to_string(),
                "content-type".to_string(),
                "x-request-id".to_string(),
            ],
            exposed_headers: vec![
                "x-request-id".to_string(),
                "x-cache".to_string(),
                "x-ratelimit-limit".to_string(),
                "x-ratelimit-remaining".to_string(),
            ],
            allow_credentials: false,
            max_age_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Add the standard security response headers.
    pub enable_headers: bool,

    /// Largest accepted request body, in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
