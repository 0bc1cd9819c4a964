use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ServiceInfo {
    pub ok: bool,
    pub service: String,
    pub routes: Vec<String>,
}

pub const ROUTES: &[&str] = &[
    "/health",
    "/api/heart_rate",
    "/events",
    "/ws/{meetingId}/{userId}",
];

#[utoipa::path(
    get,
    path = "/",
    tag = "Health",
    responses((status = 200, description = "Service descriptor", body = ServiceInfo)),
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        ok: true,
        service: "magheart".to_string(),
        routes: ROUTES.iter().map(|r| r.to_string()).collect(),
    })
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
