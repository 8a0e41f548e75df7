//! Uniform random strategy.

use rand::Rng;
use std::sync::Arc;

use crate::load_balancer::{backend::Backend, SelectionStrategy};

#[derive(Debug, Default)]
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionStrategy for Random {
    fn next_server(&self, eligible: &[Arc<Backend>], _client_ip: &str) -> Option<Arc<Backend>> {
        if eligible.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..eligible.len());
        eligible.get(idx).cloned()
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
