pub mod events;
pub mod health;
pub mod heart_rate;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(events::router())
        .merge(crate::gateway::server::router())
        .nest("/api", heart_rate::router())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::root,
        health::health,
        // Telemetry
        heart_rate::post_heart_rate,
        events::events,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            // Models
            crate::models::heart_rate::HeartRateReading,
            // Route request/response types
            health::HealthResponse,
            health::ServiceInfo,
            heart_rate::HeartRateAck,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Telemetry", description = "Heart-rate ingest and push feed"),
    )
)]
pub struct ApiDoc;
