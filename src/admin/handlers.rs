use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::auth::AdminUser;
use crate::error::{GatewayError, GatewayResult};
use crate::http::server::AppState;
use crate::load_balancer::Backend;

#[derive(Serialize)]
pub struct BackendStatus {
    pub url: String,
    pub healthy: bool,
    pub active_connections: usize,
    pub max_connections: usize,
    pub weight: u32,
    pub last_check: Option<DateTime<Utc>>,
}

impl From<&Backend> for BackendStatus {
    fn from(b: &Backend) -> Self {
        Self {
            url: b.id().to_string(),
            healthy: b.is_healthy(),
            active_connections: b.active_connections(),
            max_connections: b.max_connections(),
            weight: b.weight(),
            last_check: b.last_check(),
        }
    }
}

#[derive(Serialize)]
pub struct RoutePool {
    pub strategy: String,
    pub healthy: usize,
    pub backends: Vec<BackendStatus>,
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub health_checker_running: bool,
    pub cache_entries: usize,
    pub load_balancers: BTreeMap<String, RoutePool>,
}

fn backend_map(state: &AppState) -> BTreeMap<String, Vec<BackendStatus>> {
    state
        .pools
        .iter()
        .map(|(route, lb)| {
            let backends = lb.backends().iter().map(|b| BackendStatus::from(b.as_ref())).collect();
            (route.clone(), backends)
        })
        .collect()
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let load_balancers = state
        .pools
        .iter()
        .map(|(route, lb)| {
            let pool = RoutePool {
                strategy: lb.strategy().to_string(),
                healthy: lb.healthy_count(),
                backends: lb.backends().iter().map(|b| BackendStatus::from(b.as_ref())).collect(),
            };
            (route.clone(), pool)
        })
        .collect();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        health_checker_running: state.health.is_running(),
        cache_entries: state.store.len(),
        load_balancers,
    })
}

pub async fn get_backends(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, Vec<BackendStatus>>> {
    Json(backend_map(&state))
}

#[derive(Debug, Deserialize)]
pub struct SetHealthRequest {
    pub backend: String,
    pub healthy: bool,
}

#[derive(Serialize)]
pub struct SetHealthResponse {
    pub backend: String,
    pub healthy: bool,
    /// Number of route pools that held the backend.
    pub updated_pools: usize,
}

pub async fn set_backend_health(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    payload: Result<Json<SetHealthRequest>, JsonRejection>,
) -> GatewayResult<Json<SetHealthResponse>> {
    let Json(req) = payload.map_err(|e| GatewayError::BadRequest(e.body_text()))?;
    let id = req.backend.trim_end_matches('/');

    let updated = state.pools.set_backend_health(id, req.healthy);
    if updated == 0 {
        return Err(GatewayError::NotFound(format!("backend `{id}`")));
    }
    state.metrics.record_backend_health(id, req.healthy);
    tracing::info!(
        backend = %id,
        healthy = req.healthy,
        pools = updated,
        admin = %admin.username,
        "Backend health set manually"
    );

    Ok(Json(SetHealthResponse {
        backend: id.to_string(),
        healthy: req.healthy,
        updated_pools: updated,
    }))
}
