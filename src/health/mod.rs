//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe every (route, backend) target concurrently
//!     → Apply results to Backend + owning LoadBalancer
//!     → Update state.rs snapshots
//!
//! Passive failure isolation (http/proxy.rs):
//!     Transport error on a forwarded call
//!     → Backend marked unhealthy immediately
//!
//! System checks (system.rs):
//!     /health/detailed request
//!     → Run dependency checks with a deadline
//! ```
//!
//! # Design Decisions
//! - State transitions require consecutive successes/failures
//! - Transitions are logged once, on the edge
//! - Health state is per-backend; probe results are per (route, backend)

pub mod active;
pub mod state;
pub mod system;

pub use active::{HealthChecker, ProbeSettings};
pub use state::{HealthStatus, TargetHealth};
pub use system::{DependencyCheck, HealthError, StoreCheck, SystemHealthChecker, SystemHealthReport};
