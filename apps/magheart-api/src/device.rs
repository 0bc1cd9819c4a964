//! Heart-rate actuator on a serial device node.
//!
//! The device takes one decimal BPM per line. Delivery is best-effort: a
//! failed write drops the handle and the next reading reopens the node.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::ApiError;

/// BPM range the actuator accepts.
pub const DEVICE_MIN_BPM: i64 = 0;
pub const DEVICE_MAX_BPM: i64 = 200;

/// Upper bound for one actuation, open included.
pub const DEVICE_SEND_TIMEOUT: Duration = Duration::from_millis(500);

#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Forward a reading. `Ok(false)` when the device is disabled or
    /// unreachable.
    async fn send_bpm(&self, bpm: i64) -> Result<bool, ApiError>;
    fn is_connected(&self) -> bool;
}

pub fn clamp_bpm(bpm: i64) -> i64 {
    bpm.clamp(DEVICE_MIN_BPM, DEVICE_MAX_BPM)
}

/// Forward a reading without letting a stuck device hold up the caller.
/// Failures and timeouts are logged and reported as `false`.
pub async fn send_best_effort(device: &dyn DeviceControl, bpm: i64, limit: Duration) -> bool {
    match tokio::time::timeout(limit, device.send_bpm(bpm)).await {
        Ok(Ok(sent)) => sent,
        Ok(Err(e)) => {
            tracing::warn!(bpm, error = %e, "device send failed");
            false
        }
        Err(_) => {
            tracing::warn!(bpm, timeout_ms = limit.as_millis() as u64, "device send timed out");
            false
        }
    }
}

/// Build the configured device. Disabled unless enabled and a port is set.
pub fn from_config(config: &Config) -> Arc<dyn DeviceControl> {
    match (&config.device_port, config.device_enabled) {
        (Some(port), true) => {
            tracing::info!(port = %port, "device control enabled");
            Arc::new(TtyDevice::new(port))
        }
        (None, true) => {
            tracing::warn!("DEVICE_ENABLED is set but DEVICE_PORT is not; device control disabled");
            Arc::new(DisabledDevice)
        }
        _ => Arc::new(DisabledDevice),
    }
}

pub struct DisabledDevice;

#[async_trait]
impl DeviceControl for DisabledDevice {
    async fn send_bpm(&self, _bpm: i64) -> Result<bool, ApiError> {
        Ok(false)
    }

    fn is_connected(&self) -> bool {
        false
    }
}

pub struct TtyDevice {
    path: PathBuf,
    file: Mutex<Option<File>>,
    connected: parking_lot::Mutex<bool>,
}

impl TtyDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
            connected: parking_lot::Mutex::new(false),
        }
    }

    async fn open(&self) -> Result<File, ApiError> {
        OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                tracing::warn!(path = %self.path.display(), error = %e, "device open failed");
                ApiError::unavailable("Device unavailable")
            })
    }
}

#[async_trait]
impl DeviceControl for TtyDevice {
    async fn send_bpm(&self, bpm: i64) -> Result<bool, ApiError> {
        let bpm = clamp_bpm(bpm);
        let mut slot = self.file.lock().await;

        if slot.is_none() {
            match self.open().await {
                Ok(file) => {
                    tracing::info!(path = %self.path.display(), "device connected");
                    *slot = Some(file);
                }
                Err(_) => {
                    *self.connected.lock() = false;
                    return Ok(false);
                }
            }
        }

        let Some(file) = slot.as_mut() else {
            return Ok(false);
        };
        let line = format!("{bpm}\n");
        let written = match file.write_all(line.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                *self.connected.lock() = true;
                tracing::debug!(bpm, "bpm sent to device");
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "device write failed, will reconnect");
                *slot = None;
                *self.connected.lock() = false;
                Ok(false)
            }
        }
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }
}
