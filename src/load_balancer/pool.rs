//! Backend pool management.
//!
//! # Responsibilities
//! - Hold the backend list of one route behind a reader/writer lock
//! - Filter the eligible subset and delegate selection to the route's strategy
//! - Keep the per-route pools addressable by route name

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::load_balancer::{
    backend::Backend, LoadBalancerError, SelectionStrategy, StrategyKind,
};

/// A strategy-polymorphic selector over one backend pool.
pub struct LoadBalancer {
    kind: StrategyKind,
    backends: RwLock<Vec<Arc<Backend>>>,
    strategy: Box<dyn SelectionStrategy>,
}

impl fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("strategy", &self.kind)
            .field("backends", &self.backends.read().len())
            .finish()
    }
}

impl LoadBalancer {
    pub fn new(kind: StrategyKind) -> Self {
        Self::with_backends(kind, Vec::new())
    }

    pub fn with_backends(kind: StrategyKind, backends: Vec<Arc<Backend>>) -> Self {
        Self {
            kind,
            backends: RwLock::new(backends),
            strategy: kind.build(),
        }
    }

    pub fn strategy(&self) -> StrategyKind {
        self.kind
    }

    /// Select a backend for the given client.
    pub fn next_backend(&self, client_ip: &str) -> Result<Arc<Backend>, LoadBalancerError> {
        let backends = self.backends.read();
        let eligible: Vec<Arc<Backend>> = backends
            .iter()
            .filter(|b| b.can_accept_connection())
            .cloned()
            .collect();
        drop(backends);

        if eligible.is_empty() {
            return Err(LoadBalancerError::NoBackendsAvailable);
        }
        self.strategy
            .next_server(&eligible, client_ip)
            .ok_or(LoadBalancerError::NoBackendsAvailable)
    }

    /// Add a backend. A backend with an id already in the pool replaces it.
    pub fn add_backend(&self, backend: Arc<Backend>) {
        let mut backends = self.backends.write();
        match backends.iter_mut().find(|b| b.id() == backend.id()) {
            Some(existing) => *existing = backend,
            None => backends.push(backend),
        }
    }

    /// Remove a backend by id. Returns true if it was present.
    pub fn remove_backend(&self, id: &str) -> bool {
        let mut backends = self.backends.write();
        let before = backends.len();
        backends.retain(|b| b.id() != id);
        let removed = backends.len() != before;
        drop(backends);
        if removed {
            self.strategy.forget(id);
        }
        removed
    }

    /// Snapshot of the pool in configured order.
    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.backends.read().clone()
    }

    pub fn backend(&self, id: &str) -> Option<Arc<Backend>> {
        self.backends.read().iter().find(|b| b.id() == id).cloned()
    }

    /// Flip a backend's health flag in place. Returns false if the id is unknown.
    pub fn update_backend_health(&self, id: &str, healthy: bool) -> bool {
        let backends = self.backends.read();
        match backends.iter().find(|b| b.id() == id) {
            Some(backend) => {
                backend.set_healthy(healthy);
                true
            }
            None => false,
        }
    }

    pub fn healthy_count(&self) -> usize {
        self.backends.read().iter().filter(|b| b.is_healthy()).count()
    }
}

/// Load balancers keyed by route name.
#[derive(Debug, Default)]
pub struct BackendPools {
    pools: HashMap<String, Arc<LoadBalancer>>,
}

impl BackendPools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, route: impl Into<String>, lb: Arc<LoadBalancer>) {
        self.pools.insert(route.into(), lb);
    }

    pub fn get(&self, route: &str) -> Option<Arc<LoadBalancer>> {
        self.pools.get(route).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<LoadBalancer>)> {
        self.pools.iter()
    }

    /// Flip the health flag of every backend with this id, across all routes.
    /// Returns the number of pools that held it.
    pub fn set_backend_health(&self, id: &str, healthy: bool) -> usize {
        self.pools
            .values()
            .filter(|lb| lb.update_backend_health(id, healthy))
            .count()
    }
}
