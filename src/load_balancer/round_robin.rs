//! Round-robin load balancing strategy.

use crate::load_balancer::{backend::Backend, SelectionStrategy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Round-robin selector.
/// Stores a monotonic counter and indexes the eligible subset with it.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for RoundRobin {
    fn next_server(&self, eligible: &[Arc<Backend>], _client_ip: &str) -> Option<Arc<Backend>> {
        if eligible.is_empty() {
            return None;
        }
        // Fairness is approximate when the eligible set changes between calls.
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        eligible.get(n % eligible.len()).cloned()
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
