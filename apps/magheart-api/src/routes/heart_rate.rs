//! Telemetry ingest: `POST /api/heart_rate`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::device::{self, DEVICE_SEND_TIMEOUT};
use crate::error::{ApiError, ApiErrorBody};
use crate::models::heart_rate::HeartRateReading;
use crate::telemetry::TelemetryEvent;
use crate::AppState;

pub const DEFAULT_USER: &str = "demo";
pub const USER_HEADER: &str = "x-user-id";

pub fn router() -> Router<AppState> {
    Router::new().route("/heart_rate", post(post_heart_rate))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HeartRateAck {
    pub ok: bool,
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Server receive time, epoch milliseconds.
    pub received_at: i64,
}

/// `X-User-Id` header, then `?userId=`, then the demo user.
pub fn resolve_user(headers: &HeaderMap, query: &UserQuery) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| query.user_id.clone().filter(|u| !u.is_empty()))
        .unwrap_or_else(|| DEFAULT_USER.to_string())
}

// ---------------------------------------------------------------------------
// POST /api/heart_rate
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/heart_rate",
    tag = "Telemetry",
    params(
        UserQuery,
        ("X-User-Id" = Option<String>, Header, description = "Producer user id"),
    ),
    request_body = HeartRateReading,
    responses(
        (status = 200, description = "Reading accepted", body = HeartRateAck),
        (status = 400, description = "Invalid reading", body = ApiErrorBody),
    ),
)]
pub async fn post_heart_rate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserQuery>,
    body: Result<Json<HeartRateReading>, JsonRejection>,
) -> Result<Json<HeartRateAck>, ApiError> {
    let Json(reading) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    reading.validate()?;
    let user_id = resolve_user(&headers, &query);

    if let Err(e) = state.archive.append(&user_id, &reading).await {
        tracing::warn!(%user_id, error = %e, "archive append failed");
    }

    let data = serde_json::to_value(&reading)?;
    state
        .telemetry
        .set_latest(&user_id, &data, state.config.latest_ttl)
        .await?;
    let delivered = state
        .telemetry
        .publish(&user_id, TelemetryEvent::heart_rate(&reading)?);

    device::send_best_effort(state.device.as_ref(), reading.bpm, DEVICE_SEND_TIMEOUT).await;

    tracing::debug!(%user_id, bpm = reading.bpm, ts = reading.ts, delivered, "heart rate received");

    Ok(Json(HeartRateAck {
        ok: true,
        user_id,
        received_at: chrono::Utc::now().timestamp_millis(),
    }))
}
