//! `GET /health` and `GET /stats`.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::app::AppState;

#[derive(Serialize)]
struct HealthStatistics {
    #[serde(rename = "totalRequests")]
    total_requests: u64,
    #[serde(rename = "successRequests")]
    success_requests: u64,
    #[serde(rename = "failedRequests")]
    failed_requests: u64,
    #[serde(rename = "activeConnections")]
    active_connections: u64,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime: u64,
    statistics: HealthStatistics,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let snap = state.stats.snapshot();
    Json(HealthResponse {
        status: "ok",
        uptime: state.stats.uptime_secs(),
        statistics: HealthStatistics {
            total_requests: snap.total_requests,
            success_requests: snap.success_requests,
            failed_requests: snap.failed_requests,
            active_connections: snap.active_connections,
        },
    })
}

#[derive(Serialize)]
struct StatsResponse {
    uptime: u64,
    #[serde(rename = "totalRequests")]
    total_requests: u64,
    #[serde(rename = "successRequests")]
    success_requests: u64,
    #[serde(rename = "failedRequests")]
    failed_requests: u64,
    #[serde(rename = "activeConnections")]
    active_connections: u64,
    #[serde(rename = "perModel")]
    per_model: std::collections::HashMap<String, u64>,
    #[serde(rename = "perProvider")]
    per_provider: std::collections::HashMap<String, u64>,
    #[serde(rename = "perAccount")]
    per_account: std::collections::HashMap<String, u64>,
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let snap = state.stats.snapshot();
    Json(StatsResponse {
        uptime: state.stats.uptime_secs(),
        total_requests: snap.total_requests,
        success_requests: snap.success_requests,
        failed_requests: snap.failed_requests,
        active_connections: snap.active_connections,
        per_model: snap.per_model,
        per_provider: snap.per_provider,
        per_account: snap.per_account,
    })
}
