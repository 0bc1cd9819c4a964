//! Push feed of telemetry events: `GET /events`.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::Value;
use utoipa::IntoParams;

use crate::error::{ApiError, ApiErrorBody};
use crate::telemetry::TelemetryEvent;
use crate::AppState;

pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(20);
pub const INIT_EVENT_ID: &str = "init";

pub fn router() -> Router<AppState> {
    Router::new().route("/events", get(events))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EventsQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// Cached latest reading, falling back to the newest archived row.
async fn initial_value(state: &AppState, user_id: &str) -> Option<Value> {
    match state.telemetry.get_latest(user_id).await {
        Ok(Some(value)) => return Some(value),
        Ok(None) => {}
        Err(e) => tracing::warn!(%user_id, error = %e, "latest value lookup failed"),
    }

    match state.archive.read_latest(user_id).await {
        Ok(Some(reading)) => serde_json::to_value(reading).ok(),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(%user_id, error = %e, "archive read failed");
            None
        }
    }
}

fn to_sse(event: &TelemetryEvent) -> Event {
    Event::default()
        .id(event.id.as_str())
        .event(event.event_type.as_str())
        .data(event.data.to_string())
}

// ---------------------------------------------------------------------------
// GET /events?userId=
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/events",
    tag = "Telemetry",
    params(EventsQuery),
    responses(
        (status = 200, description = "text/event-stream of `hr` events", content_type = "text/event-stream", body = String),
        (status = 400, description = "Missing userId", body = ApiErrorBody),
    ),
)]
pub async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let user_id = query
        .user_id
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::bad_request("userId is required"))?;

    // Subscribe before reading the latest value so nothing published in
    // between is lost.
    let mut subscription = state.telemetry.subscribe(&user_id);
    let initial = initial_value(&state, &user_id).await;

    tracing::debug!(%user_id, sub_id = %subscription.id, "event stream opened");

    let stream = async_stream::stream! {
        if let Some(value) = initial {
            yield Ok::<_, Infallible>(Event::default()
                .id(INIT_EVENT_ID)
                .event(TelemetryEvent::HEART_RATE)
                .data(value.to_string()));
        }

        while let Some(event) = subscription.recv().await {
            yield Ok(to_sse(&event));
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keepalive"),
    ))
}
