//! Fixed gateway endpoints: liveness, detailed health and session management.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::health::{SystemHealthReport, TargetHealth};
use crate::http::server::AppState;
use crate::security::{parse_bearer, TokenPair};

#[derive(Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
}

pub async fn health() -> Json<Liveness> {
    Json(Liveness {
        status: "healthy",
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct DetailedHealth {
    pub system: SystemHealthReport,
    pub backends: Vec<TargetHealth>,
}

pub async fn health_detailed(State(state): State<AppState>) -> Response {
    let system = state.system.check_all().await;
    let status = if system.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = DetailedHealth {
        system,
        backends: state.health.all_statuses(),
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> GatewayResult<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| GatewayError::BadRequest(e.body_text()))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> GatewayResult<Json<TokenPair>> {
    let req = json_body(payload)?;
    match state.sessions.login(&req.username, &req.password) {
        Ok(pair) => {
            state.metrics.record_auth(true);
            Ok(Json(pair))
        }
        Err(e) => {
            state.metrics.record_auth(false);
            tracing::info!(username = %req.username, error = %e, "Login rejected");
            Err(e.into())
        }
    }
}

pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> GatewayResult<Json<TokenPair>> {
    let req = json_body(payload)?;
    let pair = state.sessions.refresh(&req.refresh_token)?;
    Ok(Json(pair))
}

#[derive(Serialize)]
pub struct Message {
    pub message: &'static str,
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> GatewayResult<Json<Message>> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let token = parse_bearer(header)?;
    if !state.sessions.logout(token) {
        return Err(crate::security::AuthError::InvalidToken.into());
    }
    Ok(Json(Message {
        message: "logged out",
    }))
}
