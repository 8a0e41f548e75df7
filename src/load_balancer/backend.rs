//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream service instance, identified by its URL
//! - Track active connections (for Least Connections LB and connection caps)
//! - Track health state and probe streaks for threshold-based transitions
//!
//! # Invariants
//! - `active_connections` is never decremented below zero
//! - A backend accepts new traffic only if `healthy && (max == 0 || active < max)`

use chrono::{DateTime, TimeZone, Utc};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

use crate::config::BackendConfig;

/// A single upstream server.
#[derive(Debug)]
pub struct Backend {
    /// Identity used by admin calls, logs and metrics labels.
    id: String,
    /// Parsed base URL used to rewrite forwarded requests.
    url: Url,
    weight: u32,
    /// Maximum concurrent connections allowed, 0 means unlimited.
    max_connections: usize,
    active_connections: AtomicUsize,
    healthy: AtomicBool,
    /// Unix millis of the last probe, 0 if never probed.
    last_check: AtomicI64,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
}

impl Backend {
    /// Create a new backend. Backends start healthy.
    pub fn new(url: Url, weight: u32, max_connections: usize) -> Self {
        let id = url.as_str().trim_end_matches('/').to_string();
        Self {
            id,
            url,
            weight: weight.max(1),
            max_connections,
            active_connections: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
            last_check: AtomicI64::new(0),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
        }
    }

    /// Build a backend from its configuration entry.
    pub fn from_config(config: &BackendConfig) -> Result<Self, url::ParseError> {
        let url = Url::parse(&config.url)?;
        Ok(Self::new(url, config.weight, config.max_connections))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Get the current number of active connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Set the health flag. Returns true if the flag changed.
    pub fn set_healthy(&self, healthy: bool) -> bool {
        let previous = self.healthy.swap(healthy, Ordering::AcqRel);
        if previous != healthy {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            self.consecutive_successes.store(0, Ordering::Relaxed);
        }
        previous != healthy
    }

    /// Eligible for selection: healthy and under its connection cap.
    pub fn can_accept_connection(&self) -> bool {
        self.is_healthy()
            && (self.max_connections == 0 || self.active_connections() < self.max_connections)
    }

    /// Timestamp of the most recent probe.
    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        match self.last_check.load(Ordering::Relaxed) {
            0 => None,
            millis => Utc.timestamp_millis_opt(millis).single(),
        }
    }

    pub fn touch_last_check(&self, at: DateTime<Utc>) {
        self.last_check.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    /// Try to reserve a connection slot.
    ///
    /// Fails if the cap was reached between selection and acquisition.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BackendConnectionGuard> {
        let mut prev = self.active_connections.load(Ordering::Acquire);
        loop {
            if self.max_connections != 0 && prev >= self.max_connections {
                return None;
            }
            match self.active_connections.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => prev = actual,
            }
        }
        Some(BackendConnectionGuard {
            backend: self.clone(),
        })
    }

    /// Saturating decrement, a stray release never wraps the counter.
    fn release(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    // --- Health Logic ---

    /// Feed one probe result into the streak counters.
    ///
    /// Returns `Some(new_state)` when the result flips the health flag, `None`
    /// otherwise. Thresholds below 1 are treated as 1.
    pub fn record_probe(
        &self,
        success: bool,
        healthy_threshold: u32,
        unhealthy_threshold: u32,
    ) -> Option<bool> {
        if success {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            if self.is_healthy() {
                return None;
            }
            let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
            if successes >= healthy_threshold.max(1) && self.set_healthy(true) {
                return Some(true);
            }
        } else {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            if !self.is_healthy() {
                return None;
            }
            let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if failures >= unhealthy_threshold.max(1) && self.set_healthy(false) {
                return Some(false);
            }
        }
        None
    }
}

/// RAII guard holding one connection slot on a backend.
#[derive(Debug)]
pub struct BackendConnectionGuard {
    backend: Arc<Backend>,
}

impl BackendConnectionGuard {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Deref for BackendConnectionGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for BackendConnectionGuard {
    fn drop(&mut self) {
        self.backend.release();
    }
}
