pub mod config;
pub mod db;
pub mod device;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;
pub mod telemetry;

use std::sync::Arc;

use config::Config;
use db::archive::HeartRateArchive;
use db::kv::KeyValueStore;
use device::DeviceControl;
use gateway::presence::PresenceEngine;
use gateway::session::StalenessPolicy;
use telemetry::TelemetryChannel;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub kv: Arc<dyn KeyValueStore>,
    pub archive: Arc<dyn HeartRateArchive>,
    pub device: Arc<dyn DeviceControl>,
    pub telemetry: Arc<TelemetryChannel>,
    pub presence: Arc<PresenceEngine>,
}

impl AppState {
    /// Wire the realtime engines on top of the given collaborators.
    pub fn new(
        config: Config,
        kv: Arc<dyn KeyValueStore>,
        archive: Arc<dyn HeartRateArchive>,
        device: Arc<dyn DeviceControl>,
    ) -> Self {
        let telemetry = TelemetryChannel::new(kv.clone(), config.subscriber_queue_capacity);
        let policy = StalenessPolicy {
            offline_after: config.offline_after,
            remove_after: config.remove_after,
        };
        let presence = PresenceEngine::new(config.send_timeout, policy);

        Self {
            config: Arc::new(config),
            kv,
            archive,
            device,
            telemetry: Arc::new(telemetry),
            presence: Arc::new(presence),
        }
    }
}
