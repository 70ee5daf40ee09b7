//! Job state types

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ReceiverConfig;
use crate::module::publisher::SpotPublisher;
use crate::module::recorder::RecordingHandle;

/// Health of the last recording attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordingState {
    /// No cycle finished yet
    Waiting,
    Success,
    Failed,
}

/// Consistent snapshot of a job, taken under its lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub last_decode_time: Option<DateTime<Utc>>,
    pub last_decode_count: usize,
    pub recording_state: RecordingState,
    pub last_error: Option<String>,
}

/// Timing of one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleTiming {
    /// Capture length; WSPR transmissions last about 110.6 s
    pub record_window: Duration,
    /// Wait after closing the recorder before looking for the file
    pub flush_delay: Duration,
    /// Pause after a failed recording before re-aligning
    pub failure_cooldown: Duration,
    /// Offset between recordings that share a receiver
    pub receiver_stagger: Duration,
}

impl Default for CycleTiming {
    fn default() -> Self {
        Self {
            record_window: Duration::from_secs(115),
            flush_delay: Duration::from_millis(100),
            failure_cooldown: Duration::from_secs(10),
            receiver_stagger: Duration::from_millis(100),
        }
    }
}

/// Mutable job fields, guarded by the job's lock.
pub(super) struct JobState {
    pub receiver: ReceiverConfig,
    pub recording_state: RecordingState,
    pub last_decode_time: Option<DateTime<Utc>>,
    pub last_decode_count: usize,
    pub last_error: Option<String>,
    pub active_recording: Option<Box<dyn RecordingHandle>>,
    pub publisher: Option<Arc<dyn SpotPublisher>>,
    pub topic_prefix_override: String,
    /// Audio still waiting for, or going through, the decoder
    pub owned_audio: HashSet<PathBuf>,
    pub stopped: bool,
}

impl JobState {
    pub fn new(receiver: ReceiverConfig, publisher: Option<Arc<dyn SpotPublisher>>) -> Self {
        let topic_prefix_override = receiver.topic_prefix_override.clone();
        Self {
            receiver,
            recording_state: RecordingState::Waiting,
            last_decode_time: None,
            last_decode_count: 0,
            last_error: None,
            active_recording: None,
            publisher,
            topic_prefix_override,
            owned_audio: HashSet::new(),
            stopped: false,
        }
    }

    pub fn snapshot(&self) -> JobStatus {
        JobStatus {
            last_decode_time: self.last_decode_time,
            last_decode_count: self.last_decode_count,
            recording_state: self.recording_state,
            last_error: self.last_error.clone(),
        }
    }
}
