use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use magheart_api::config::Config;
use magheart_api::db::archive::CsvArchive;
use magheart_api::db::kv::{KeyValueStore, MemoryStore};
use magheart_api::gateway::sweeper;
use magheart_api::{device, AppState};

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let archive = Arc::new(CsvArchive::new(config.data_dir.clone()));
    let device = device::from_config(&config);

    tracing::info!(
        data_dir = %config.data_dir.display(),
        latest_ttl_secs = config.latest_ttl.as_secs(),
        sweep_interval_secs = config.sweep_interval.as_secs(),
        "magheart-api configured"
    );

    let cors = cors_layer(&config.cors_allow_origins);
    let sweep_interval = config.sweep_interval;
    let state = AppState::new(config, kv, archive, device);

    let sweeper = sweeper::spawn(state.presence.clone(), state.kv.clone(), sweep_interval);

    let app = Router::new()
        .merge(magheart_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "magheart-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    sweeper.abort();
    tracing::info!("magheart-api stopped");
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
