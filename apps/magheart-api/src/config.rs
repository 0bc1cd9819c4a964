use std::path::PathBuf;
use std::time::Duration;

/// MagHeart API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Directory holding the per-user heart-rate CSV archives.
    pub data_dir: PathBuf,
    /// Allowed CORS origins. Empty means any origin.
    pub cors_allow_origins: Vec<String>,
    /// How long the cached latest reading stays valid.
    pub latest_ttl: Duration,
    /// Heartbeat age after which a participant is shown as offline.
    pub offline_after: Duration,
    /// Heartbeat age after which a participant is removed from the meeting.
    pub remove_after: Duration,
    /// Period of the background staleness sweep.
    pub sweep_interval: Duration,
    /// Upper bound for handing one message to one connection.
    pub send_timeout: Duration,
    /// Per-subscriber queue depth on the telemetry feed.
    pub subscriber_queue_capacity: usize,
    /// Whether heart-rate readings are forwarded to the actuator device.
    pub device_enabled: bool,
    /// Serial device node of the actuator (e.g. `/dev/ttyUSB0`).
    pub device_port: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable has a default, so an empty environment yields a
    /// working local setup.
    pub fn from_env() -> Self {
        Self {
            port: parsed_var("PORT").unwrap_or(4010),
            data_dir: std::env::var("MAGHEART_DATA_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            cors_allow_origins: std::env::var("CORS_ALLOW_ORIGINS")
                .map(|v| parse_origins(&v))
                .unwrap_or_default(),
            latest_ttl: Duration::from_secs(parsed_var("LATEST_TTL_SECS").unwrap_or(120)),
            offline_after: Duration::from_secs(
                parsed_var("PRESENCE_OFFLINE_AFTER_SECS").unwrap_or(30),
            ),
            remove_after: Duration::from_secs(
                parsed_var("PRESENCE_REMOVE_AFTER_SECS").unwrap_or(300),
            ),
            sweep_interval: Duration::from_secs(
                parsed_var("PRESENCE_SWEEP_INTERVAL_SECS").unwrap_or(15),
            ),
            send_timeout: Duration::from_millis(
                parsed_var("BROADCAST_SEND_TIMEOUT_MS").unwrap_or(2000),
            ),
            subscriber_queue_capacity: parsed_var("SUBSCRIBER_QUEUE_CAPACITY").unwrap_or(64),
            device_enabled: parsed_var("DEVICE_ENABLED").unwrap_or(false),
            device_port: std::env::var("DEVICE_PORT").ok().filter(|s| !s.is_empty()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4010,
            data_dir: PathBuf::from("data"),
            cors_allow_origins: Vec::new(),
            latest_ttl: Duration::from_secs(120),
            offline_after: Duration::from_secs(30),
            remove_after: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(15),
            send_timeout: Duration::from_millis(2000),
            subscriber_queue_capacity: 64,
            device_enabled: false,
            device_port: None,
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// `*` (or nothing) allows every origin; otherwise a comma-separated list.
fn parse_origins(raw: &str) -> Vec<String> {
    if raw.trim() == "*" {
        return Vec::new();
    }
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_origin_means_any() {
        assert!(parse_origins("*").is_empty());
        assert!(parse_origins(" * ").is_empty());
    }

    #[test]
    fn origin_list_is_trimmed() {
        assert_eq!(
            parse_origins("http://a.test, http://b.test ,,"),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }
}
