//! On-demand dependency health aggregation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::store::CounterStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HealthError {
    #[error("{0}")]
    Failed(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// A named dependency the gateway relies on.
#[async_trait]
pub trait DependencyCheck: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self) -> Result<(), HealthError>;
}

/// Reachability of the counter/cache store.
#[derive(Debug, Clone)]
pub struct StoreCheck {
    store: Arc<dyn CounterStore>,
}

impl StoreCheck {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DependencyCheck for StoreCheck {
    fn name(&self) -> &str {
        "store"
    }

    async fn check(&self) -> Result<(), HealthError> {
        self.store
            .ping()
            .await
            .map_err(|e| HealthError::Failed(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub status: Status,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealthReport {
    pub status: Status,
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<String, CheckResult>,
}

impl SystemHealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == Status::Healthy
    }
}

/// Runs every registered check concurrently, each under the same deadline.
pub struct SystemHealthChecker {
    checks: Vec<Arc<dyn DependencyCheck>>,
    timeout: Duration,
}

impl SystemHealthChecker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            checks: Vec::new(),
            timeout,
        }
    }

    pub fn register(&mut self, check: Arc<dyn DependencyCheck>) {
        self.checks.push(check);
    }

    pub async fn check_all(&self) -> SystemHealthReport {
        let results = join_all(self.checks.iter().map(|check| {
            let timeout = self.timeout;
            async move {
                let started = Instant::now();
                let result = match tokio::time::timeout(timeout, check.check()).await {
                    Ok(r) => r,
                    Err(_) => Err(HealthError::Timeout(timeout)),
                };
                (check.name().to_string(), started.elapsed(), result)
            }
        }))
        .await;

        let mut status = Status::Healthy;
        let mut checks = BTreeMap::new();
        for (name, elapsed, result) in results {
            let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
            let entry = match result {
                Ok(()) => CheckResult {
                    status: Status::Healthy,
                    duration_ms,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(check = %name, error = %e, "Dependency check failed");
                    status = Status::Unhealthy;
                    CheckResult {
                        status: Status::Unhealthy,
                        duration_ms,
                        error: Some(e.to_string()),
                    }
                }
            };
            checks.insert(name, entry);
        }

        SystemHealthReport {
            status,
            timestamp: Utc::now(),
            checks,
        }
    }
}
