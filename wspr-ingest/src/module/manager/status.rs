use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::BandConfig;
use crate::module::job::{JobStatus, RecordingState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BandState {
    Disabled,
    Waiting,
    Connected,
    Failed,
}

impl From<RecordingState> for BandState {
    fn from(state: RecordingState) -> Self {
        match state {
            RecordingState::Waiting => Self::Waiting,
            RecordingState::Success => Self::Connected,
            RecordingState::Failed => Self::Failed,
        }
    }
}

/// One row of the fleet status document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandStatus {
    pub name: String,
    pub frequency_khz: f64,
    pub receiver: String,
    pub enabled: bool,
    pub state: BandState,
    pub last_decode_time: Option<DateTime<Utc>>,
    pub last_decode_count: usize,
    pub error: Option<String>,
}

impl BandStatus {
    /// Row for a band without a running job.
    pub fn disabled(band: &BandConfig) -> Self {
        Self {
            name: band.name.clone(),
            frequency_khz: band.frequency_khz,
            receiver: band.receiver_name.clone(),
            enabled: band.enabled,
            state: BandState::Disabled,
            last_decode_time: None,
            last_decode_count: 0,
            error: None,
        }
    }

    pub fn running(band: &BandConfig, status: JobStatus) -> Self {
        Self {
            state: status.recording_state.into(),
            last_decode_time: status.last_decode_time,
            last_decode_count: status.last_decode_count,
            error: status.last_error,
            ..Self::disabled(band)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(BandState::from(RecordingState::Waiting), BandState::Waiting);
        assert_eq!(BandState::from(RecordingState::Success), BandState::Connected);
        assert_eq!(BandState::from(RecordingState::Failed), BandState::Failed);
        assert_eq!(serde_json::to_value(BandState::Connected).unwrap(), "connected");
    }
}
