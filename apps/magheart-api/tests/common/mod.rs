#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use magheart_api::config::Config;
use magheart_api::db::archive::MemoryArchive;
use magheart_api::db::kv::{KeyValueStore, MemoryStore};
use magheart_api::device::DisabledDevice;
use magheart_api::AppState;

/// Build a test AppState with in-memory KV and archive and no device.
pub fn test_state() -> (AppState, Arc<MemoryArchive>) {
    let config = Config {
        send_timeout: Duration::from_millis(500),
        ..Config::default()
    };
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let archive = Arc::new(MemoryArchive::new());
    let state = AppState::new(config, kv, archive.clone(), Arc::new(DisabledDevice));
    (state, archive)
}

pub fn test_app(state: AppState) -> Router {
    magheart_api::routes::router().with_state(state)
}

/// Start an actual TCP server for streaming and WebSocket tests.
/// The server runs in the background.
pub async fn start_server() -> (SocketAddr, AppState, Arc<MemoryArchive>) {
    let (state, archive) = test_state();
    let app = test_app(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state, archive)
}
