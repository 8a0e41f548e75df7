//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → route's LoadBalancer (pool.rs)
//!     → filter eligible backends (healthy AND under connection cap)
//!     → apply selection strategy:
//!         - round_robin.rs (rotate through eligible backends)
//!         - weighted.rs (smooth weighted round robin)
//!         - least_conn.rs (pick backend with fewest connections)
//!         - ip_hash.rs (FNV-1a of client IP)
//!         - random.rs (uniform pick)
//!     → backend.rs (acquire connection guard)
//!     → Return backend or NoBackendsAvailable
//! ```
//!
//! # Design Decisions
//! - Strategies are a closed set selected once at startup from configuration
//! - Strategies never see ineligible backends
//! - Backend list is guarded by a reader/writer lock; counters and health flags are atomics

pub mod backend;
pub mod ip_hash;
pub mod least_conn;
pub mod pool;
pub mod random;
pub mod round_robin;
pub mod weighted;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use backend::{Backend, BackendConnectionGuard};
pub use pool::{BackendPools, LoadBalancer};

/// Errors returned by backend selection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadBalancerError {
    #[error("no backends available")]
    NoBackendsAvailable,
}

/// A selection algorithm over the eligible subset of a pool.
pub trait SelectionStrategy: Send + Sync + fmt::Debug {
    /// Pick one backend. `eligible` is never empty.
    fn next_server(&self, eligible: &[Arc<Backend>], client_ip: &str) -> Option<Arc<Backend>>;

    /// Drop any per-backend state kept for a backend that left the pool.
    fn forget(&self, _backend_id: &str) {}

    fn name(&self) -> &'static str;
}

/// Closed set of strategies available to routes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    RoundRobin,
    #[serde(alias = "weighted_round")]
    WeightedRoundRobin,
    LeastConn,
    IpHash,
    Random,
}

impl StrategyKind {
    /// Factory for the strategy implementation.
    pub fn build(self) -> Box<dyn SelectionStrategy> {
        match self {
            StrategyKind::RoundRobin => Box::new(round_robin::RoundRobin::new()),
            StrategyKind::WeightedRoundRobin => Box::new(weighted::WeightedRoundRobin::new()),
            StrategyKind::LeastConn => Box::new(least_conn::LeastConnections::new()),
            StrategyKind::IpHash => Box::new(ip_hash::IpHash::new()),
            StrategyKind::Random => Box::new(random::Random::new()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::RoundRobin => "round_robin",
            StrategyKind::WeightedRoundRobin => "weighted_round_robin",
            StrategyKind::LeastConn => "least_conn",
            StrategyKind::IpHash => "ip_hash",
            StrategyKind::Random => "random",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(StrategyKind::RoundRobin),
            "weighted_round_robin" | "weighted_round" => Ok(StrategyKind::WeightedRoundRobin),
            "least_conn" => Ok(StrategyKind::LeastConn),
            "ip_hash" => Ok(StrategyKind::IpHash),
            "random" => Ok(StrategyKind::Random),
            other => Err(format!("unknown load balancer strategy: {other}")),
        }
    }
}
