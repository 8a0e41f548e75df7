//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms through MetricsSink)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows from the request-id layer into logs and forwarded headers
//! - Metrics are fire-and-forget and never fail a request

pub mod logging;
pub mod metrics;

pub use metrics::{BackendOutcome, HttpRequestRecord, MetricsSink, PrometheusSink};
