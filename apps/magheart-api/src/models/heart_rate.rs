use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ApiError, FieldError};

/// Accepted heart-rate range for posted readings.
pub const MIN_BPM: i64 = 20;
pub const MAX_BPM: i64 = 250;

/// One heart-rate sample as posted by a watch/phone producer.
///
/// Also the archive row format and the `data` blob of feed events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HeartRateReading {
    pub bpm: i64,
    /// Sample time, epoch milliseconds.
    pub ts: i64,
    #[serde(default)]
    pub device: Option<String>,
}

impl HeartRateReading {
    pub fn validate(&self) -> Result<(), ApiError> {
        if !(MIN_BPM..=MAX_BPM).contains(&self.bpm) {
            return Err(ApiError::validation(vec![FieldError::new(
                "bpm",
                format!("must be between {MIN_BPM} and {MAX_BPM}"),
            )]));
        }
        Ok(())
    }
}
