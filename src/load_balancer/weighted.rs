//! Smooth weighted round-robin strategy.
//!
//! Each call adds every eligible backend's weight to its running weight,
//! picks the largest running weight (first wins ties) and subtracts the
//! eligible total from the winner. Over `k * sum(weights)` calls backend `i`
//! is picked exactly `k * weight_i` times, interleaved rather than in bursts.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::load_balancer::{backend::Backend, SelectionStrategy};

#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    /// Running weight per backend id.
    current: Mutex<HashMap<String, i64>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for WeightedRoundRobin {
    fn next_server(&self, eligible: &[Arc<Backend>], _client_ip: &str) -> Option<Arc<Backend>> {
        let mut current = self.current.lock();
        let mut total: i64 = 0;
        let mut best: Option<(usize, i64)> = None;

        for (idx, backend) in eligible.iter().enumerate() {
            let weight = i64::from(backend.weight());
            total += weight;
            let running = current.entry(backend.id().to_string()).or_insert(0);
            *running += weight;
            match best {
                Some((_, max)) if *running <= max => {}
                _ => best = Some((idx, *running)),
            }
        }

        let (idx, _) = best?;
        let winner = &eligible[idx];
        if let Some(running) = current.get_mut(winner.id()) {
            *running -= total;
        }
        Some(winner.clone())
    }

    fn forget(&self, backend_id: &str) {
        self.current.lock().remove(backend_id);
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}
