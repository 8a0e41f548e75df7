//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, backend outcomes, limits, cache)
//! - Expose a Prometheus-compatible scrape endpoint
//! - Provide the fire-and-forget [`MetricsSink`] used by the request path
//!
//! # Metrics
//! - `gateway_http_requests_total` (counter): method, route, status
//! - `gateway_http_request_duration_seconds` (histogram): method, route
//! - `gateway_http_request_size_bytes` / `gateway_http_response_size_bytes` (histograms)
//! - `gateway_backend_requests_total` (counter): backend, outcome
//! - `gateway_backend_request_duration_seconds` (histogram): backend
//! - `gateway_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `gateway_rate_limit_requests_total` (counter): route, result
//! - `gateway_cache_requests_total` (counter): route, result
//! - `gateway_auth_requests_total` (counter): result
//! - `gateway_active_requests` (gauge)

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "gateway_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "gateway_http_request_duration_seconds";
    pub const HTTP_REQUEST_SIZE_BYTES: &str = "gateway_http_request_size_bytes";
    pub const HTTP_RESPONSE_SIZE_BYTES: &str = "gateway_http_response_size_bytes";
    pub const BACKEND_REQUESTS_TOTAL: &str = "gateway_backend_requests_total";
    pub const BACKEND_REQUEST_DURATION_SECONDS: &str = "gateway_backend_request_duration_seconds";
    pub const BACKEND_HEALTH: &str = "gateway_backend_health";
    pub const RATE_LIMIT_REQUESTS_TOTAL: &str = "gateway_rate_limit_requests_total";
    pub const CACHE_REQUESTS_TOTAL: &str = "gateway_cache_requests_total";
    pub const AUTH_REQUESTS_TOTAL: &str = "gateway_auth_requests_total";
    pub const ACTIVE_REQUESTS: &str = "gateway_active_requests";
}

/// Initialize the Prometheus metrics exporter.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(names::HTTP_REQUESTS_TOTAL, "Total HTTP requests handled");
    describe_histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "End-to-end request latency in seconds"
    );
    describe_histogram!(names::HTTP_REQUEST_SIZE_BYTES, "Request body size in bytes");
    describe_histogram!(names::HTTP_RESPONSE_SIZE_BYTES, "Response body size in bytes");
    describe_counter!(
        names::BACKEND_REQUESTS_TOTAL,
        "Forwarded backend calls by outcome"
    );
    describe_histogram!(
        names::BACKEND_REQUEST_DURATION_SECONDS,
        "Backend call latency in seconds"
    );
    describe_gauge!(
        names::BACKEND_HEALTH,
        "Backend health (1 = healthy, 0 = unhealthy)"
    );
    describe_counter!(
        names::RATE_LIMIT_REQUESTS_TOTAL,
        "Rate limiter decisions by result"
    );
    describe_counter!(names::CACHE_REQUESTS_TOTAL, "Response cache lookups by result");
    describe_counter!(names::AUTH_REQUESTS_TOTAL, "Authentication attempts by result");
    describe_gauge!(names::ACTIVE_REQUESTS, "Requests currently in flight");

    tracing::info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        tracing::error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// One completed client request.
#[derive(Debug, Clone)]
pub struct HttpRequestRecord {
    pub method: String,
    /// Route name, or the raw path for fixed endpoints.
    pub route: String,
    pub status: u16,
    pub duration: Duration,
    pub request_size: u64,
    pub response_size: u64,
}

/// Result of one attempt to reach a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOutcome {
    /// The backend answered, with any status.
    Response(u16),
    /// Transport failure or timeout.
    Error,
    /// No eligible backend could be selected.
    Unavailable,
}

impl BackendOutcome {
    fn label(self) -> &'static str {
        match self {
            BackendOutcome::Response(status) if status < 500 => "success",
            BackendOutcome::Response(_) => "server_error",
            BackendOutcome::Error => "error",
            BackendOutcome::Unavailable => "unavailable",
        }
    }
}

/// Fire-and-forget observation sink. Implementations must not block or fail.
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    fn record_http_request(&self, record: &HttpRequestRecord);
    fn record_backend_request(&self, backend: &str, outcome: BackendOutcome, duration: Duration);
    fn record_rate_limit(&self, route: &str, allowed: bool);
    fn record_cache_request(&self, route: &str, hit: bool);
    fn record_backend_health(&self, backend: &str, healthy: bool);
    fn record_auth(&self, success: bool);
}

/// Sink backed by the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn record_http_request(&self, record: &HttpRequestRecord) {
        counter!(
            names::HTTP_REQUESTS_TOTAL,
            "method" => record.method.clone(),
            "route" => record.route.clone(),
            "status" => record.status.to_string()
        )
        .increment(1);
        histogram!(
            names::HTTP_REQUEST_DURATION_SECONDS,
            "method" => record.method.clone(),
            "route" => record.route.clone()
        )
        .record(record.duration.as_secs_f64());
        histogram!(names::HTTP_REQUEST_SIZE_BYTES, "route" => record.route.clone())
            .record(record.request_size as f64);
        histogram!(names::HTTP_RESPONSE_SIZE_BYTES, "route" => record.route.clone())
            .record(record.response_size as f64);
    }

    fn record_backend_request(&self, backend: &str, outcome: BackendOutcome, duration: Duration) {
        counter!(
            names::BACKEND_REQUESTS_TOTAL,
            "backend" => backend.to_string(),
            "outcome" => outcome.label()
        )
        .increment(1);
        if outcome != BackendOutcome::Unavailable {
            histogram!(names::BACKEND_REQUEST_DURATION_SECONDS, "backend" => backend.to_string())
                .record(duration.as_secs_f64());
        }
    }

    fn record_rate_limit(&self, route: &str, allowed: bool) {
        let result = if allowed { "allowed" } else { "denied" };
        counter!(names::RATE_LIMIT_REQUESTS_TOTAL, "route" => route.to_string(), "result" => result)
            .increment(1);
    }

    fn record_cache_request(&self, route: &str, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        counter!(names::CACHE_REQUESTS_TOTAL, "route" => route.to_string(), "result" => result)
            .increment(1);
    }

    fn record_backend_health(&self, backend: &str, healthy: bool) {
        gauge!(names::BACKEND_HEALTH, "backend" => backend.to_string())
            .set(if healthy { 1.0 } else { 0.0 });
    }

    fn record_auth(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        counter!(names::AUTH_REQUESTS_TOTAL, "result" => result).increment(1);
    }
}

/// Adjust the in-flight request gauge.
pub fn track_active_request(started: bool) {
    let g = gauge!(names::ACTIVE_REQUESTS);
    if started {
        g.increment(1.0);
    } else {
        g.decrement(1.0);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Captures observations for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub http: Mutex<Vec<HttpRequestRecord>>,
        pub backend: Mutex<Vec<(String, BackendOutcome)>>,
        pub rate_limit: Mutex<Vec<(String, bool)>>,
        pub cache: Mutex<Vec<(String, bool)>>,
        pub health: Mutex<Vec<(String, bool)>>,
        pub auth: Mutex<Vec<bool>>,
    }

    impl MetricsSink for RecordingSink {
        fn record_http_request(&self, record: &HttpRequestRecord) {
            self.http.lock().push(record.clone());
        }
        fn record_backend_request(&self, backend: &str, outcome: BackendOutcome, _: Duration) {
            self.backend.lock().push((backend.to_string(), outcome));
        }
        fn record_rate_limit(&self, route: &str, allowed: bool) {
            self.rate_limit.lock().push((route.to_string(), allowed));
        }
        fn record_cache_request(&self, route: &str, hit: bool) {
            self.cache.lock().push((route.to_string(), hit));
        }
        fn record_backend_health(&self, backend: &str, healthy: bool) {
            self.health.lock().push((backend.to_string(), healthy));
        }
        fn record_auth(&self, success: bool) {
            self.auth.lock().push(success);
        }
    }
}
