//! Least Connections load balancing strategy.

use crate::load_balancer::{backend::Backend, SelectionStrategy};
use std::sync::Arc;

/// Least connections selector.
/// Selects the backend with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionStrategy for LeastConnections {
    fn next_server(&self, eligible: &[Arc<Backend>], _client_ip: &str) -> Option<Arc<Backend>> {
        // Strict comparison keeps the first encountered on ties.
        let mut best: Option<&Arc<Backend>> = None;
        for backend in eligible {
            match best {
                Some(b) if b.active_connections() <= backend.active_connections() => {}
                _ => best = Some(backend),
            }
        }
        best.cloned()
    }

    fn name(&self) -> &'static str {
        "least_conn"
    }
}
