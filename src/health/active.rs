//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every registered `(route, backend)` target concurrently
//! - Apply results once the whole tick has finished
//! - Push health transitions into the owning load balancer (edge-triggered)

use axum::body::Body;
use axum::http::{header, Method, Request};
use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::{BackendHealthCheckConfig, HealthCheckConfig};
use crate::health::state::{HealthStatus, ProbeOutcome, TargetHealth};
use crate::http::client::{build_http_client, HttpClient};
use crate::load_balancer::{Backend, LoadBalancer};
use crate::observability::MetricsSink;

/// `(route name, backend id)`.
type TargetKey = (String, String);

/// How one target is probed.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub enabled: bool,
    pub path: String,
    pub timeout: Duration,
    /// Probe on every n-th tick.
    pub every_ticks: u64,
}

impl ProbeSettings {
    pub fn resolve(global: &HealthCheckConfig, backend: &BackendHealthCheckConfig) -> Self {
        let interval = global.interval_secs.max(1);
        let every_ticks = backend
            .interval_secs
            .map(|secs| secs.div_ceil(interval).max(1))
            .unwrap_or(1);
        Self {
            enabled: backend.enabled,
            path: backend.path.clone().unwrap_or_else(|| global.path.clone()),
            timeout: Duration::from_secs(backend.timeout_secs.unwrap_or(global.timeout_secs)),
            every_ticks,
        }
    }
}

#[derive(Debug, Clone)]
struct Target {
    backend: Arc<Backend>,
    lb: Arc<LoadBalancer>,
    probe: ProbeSettings,
}

/// Background prober keeping backend health flags current.
pub struct HealthChecker {
    config: HealthCheckConfig,
    targets: RwLock<HashMap<TargetKey, Target>>,
    statuses: RwLock<HashMap<TargetKey, HealthStatus>>,
    client: HttpClient,
    metrics: Arc<dyn MetricsSink>,
    running: AtomicBool,
    stop: watch::Sender<bool>,
    ticks: AtomicU64,
}

impl HealthChecker {
    pub fn new(config: HealthCheckConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            config,
            targets: RwLock::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
            client: build_http_client(),
            metrics,
            running: AtomicBool::new(false),
            stop,
            ticks: AtomicU64::new(0),
        }
    }

    /// Register a backend with the global probe settings.
    pub fn add_backend(&self, route: &str, backend: Arc<Backend>, lb: Arc<LoadBalancer>) {
        let probe = ProbeSettings::resolve(&self.config, &BackendHealthCheckConfig::default());
        self.add_backend_with(route, backend, lb, probe);
    }

    pub fn add_backend_with(
        &self,
        route: &str,
        backend: Arc<Backend>,
        lb: Arc<LoadBalancer>,
        probe: ProbeSettings,
    ) {
        let key = (route.to_string(), backend.id().to_string());
        self.statuses.write().insert(key.clone(), HealthStatus::initial());
        self.targets.write().insert(key, Target { backend, lb, probe });
    }

    /// Returns true if the target was registered.
    pub fn remove_backend(&self, route: &str, backend_id: &str) -> bool {
        let key = (route.to_string(), backend_id.to_string());
        self.statuses.write().remove(&key);
        self.targets.write().remove(&key).is_some()
    }

    pub fn status(&self, route: &str, backend_id: &str) -> Option<HealthStatus> {
        self.statuses
            .read()
            .get(&(route.to_string(), backend_id.to_string()))
            .cloned()
    }

    /// Every target's latest status, sorted by route then backend.
    pub fn all_statuses(&self) -> Vec<TargetHealth> {
        let mut all: Vec<TargetHealth> = self
            .statuses
            .read()
            .iter()
            .map(|((route, backend), status)| TargetHealth {
                route: route.clone(),
                backend: backend.clone(),
                status: status.clone(),
            })
            .collect();
        all.sort_by(|a, b| (&a.route, &a.backend).cmp(&(&b.route, &b.backend)));
        all
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn the probe loop. Returns `None` if it is already running.
    pub fn start(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::debug!("Health checker already running");
            return None;
        }
        self.stop.send_replace(false);
        let mut stop_rx = self.stop.subscribe();
        let this = Arc::clone(self);

        Some(tokio::spawn(async move {
            let period = Duration::from_secs(this.config.interval_secs.max(1));
            tracing::info!(
                interval_secs = period.as_secs(),
                path = %this.config.path,
                "Health checker starting"
            );
            let mut ticker = time::interval(period);
            // A slow tick delays the next one instead of overlapping it.
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => this.check_all().await,
                    // the watch guard is not Send, so drop it inside the branch
                    _ = async {
                        let _ = stop_rx.wait_for(|stopped| *stopped).await;
                    } => {
                        tracing::info!("Health checker stopped");
                        break;
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Health checker received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
            this.running.store(false, Ordering::Release);
        }))
    }

    /// Signal the loop to exit. Safe to call any number of times.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Run one tick: probe all due targets concurrently, then apply results.
    pub async fn check_all(&self) {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed);
        let due: Vec<(TargetKey, Target)> = self
            .targets
            .read()
            .iter()
            .filter(|(_, t)| t.probe.enabled && tick % t.probe.every_ticks == 0)
            .map(|(k, t)| (k.clone(), t.clone()))
            .collect();

        if due.is_empty() {
            return;
        }

        let outcomes = join_all(
            due.iter()
                .map(|(_, t)| self.check_backend(&t.backend, &t.probe.path, t.probe.timeout)),
        )
        .await;

        for ((key, target), outcome) in due.into_iter().zip(outcomes) {
            self.apply(key, target, outcome);
        }
    }

    fn apply(&self, key: TargetKey, target: Target, outcome: ProbeOutcome) {
        if let Some(status) = self.statuses.write().get_mut(&key) {
            *status = HealthStatus::from(&outcome);
        }
        let backend = &target.backend;
        backend.touch_last_check(outcome.checked_at);

        let transition = backend.record_probe(
            outcome.healthy,
            self.config.healthy_threshold,
            self.config.unhealthy_threshold,
        );
        let Some(healthy) = transition else {
            return;
        };

        target.lb.update_backend_health(backend.id(), healthy);
        self.metrics.record_backend_health(backend.id(), healthy);
        if healthy {
            tracing::info!(route = %key.0, backend = %backend.id(), "Backend recovered");
        } else {
            tracing::warn!(
                route = %key.0,
                backend = %backend.id(),
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "Backend marked unhealthy"
            );
        }
    }

    /// Probe a single backend with `GET <backend><path>`; healthy on 2xx.
    pub async fn check_backend(
        &self,
        backend: &Backend,
        path: &str,
        timeout: Duration,
    ) -> ProbeOutcome {
        let started = Instant::now();
        let uri = format!("{}{}", backend.id(), path);

        let request = match Request::builder()
            .method(Method::GET)
            .uri(&uri)
            .header(header::USER_AGENT, "api-gateway-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                return ProbeOutcome {
                    healthy: false,
                    checked_at: Utc::now(),
                    response_time: started.elapsed(),
                    error: Some(format!("invalid probe request: {e}")),
                }
            }
        };

        let (healthy, error) = match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) if response.status().is_success() => (true, None),
            Ok(Ok(response)) => {
                tracing::debug!(
                    backend = %backend.id(),
                    status = %response.status(),
                    "Health check failed: non-success status"
                );
                (false, Some(format!("unexpected status {}", response.status())))
            }
            Ok(Err(e)) => {
                tracing::debug!(
                    backend = %backend.id(),
                    error = %e,
                    "Health check failed: connection error"
                );
                (false, Some(e.to_string()))
            }
            Err(_) => {
                tracing::debug!(backend = %backend.id(), "Health check failed: timeout");
                (false, Some(format!("timed out after {}ms", timeout.as_millis())))
            }
        };

        ProbeOutcome {
            healthy,
            checked_at: Utc::now(),
            response_time: started.elapsed(),
            error,
        }
    }
}
