//! Audio capture collaborators
//!
//! The SDR streaming client and the resampler are external programs.
//! Jobs talk to them through the [`Recorder`] and [`Resampler`] traits so
//! the cycle logic does not depend on a particular tool.

mod command;
pub use command::CommandRecorder;

mod resample;
pub use resample::{CommandResampler, DECODER_SAMPLE_RATE, Resampler, wav_sample_rate};
#[cfg(test)]
pub(crate) use resample::tests::wav_bytes;

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Passband and gain used for every WSPR capture.
pub const WSPR_MODULATION: &str = "usb";
pub const WSPR_LOW_CUT_HZ: i32 = 300;
pub const WSPR_HIGH_CUT_HZ: i32 = 2700;
/// AGC off
pub const WSPR_AGC_GAIN: i32 = -1;

/// Everything the recorder needs for one capture.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRequest {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub frequency_khz: f64,
    pub modulation: String,
    pub low_cut_hz: i32,
    pub high_cut_hz: i32,
    pub agc_gain: i32,
    pub compression: bool,
    pub duration: Duration,
    pub output_dir: PathBuf,
    pub filename: String,
}

impl RecordRequest {
    /// Request with the fixed WSPR passband and AGC settings.
    #[allow(clippy::too_many_arguments)]
    pub fn wspr(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        frequency_khz: f64,
        compression: bool,
        duration: Duration,
        output_dir: PathBuf,
        filename: String,
    ) -> Self {
        Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.to_string(),
            frequency_khz,
            modulation: WSPR_MODULATION.to_string(),
            low_cut_hz: WSPR_LOW_CUT_HZ,
            high_cut_hz: WSPR_HIGH_CUT_HZ,
            agc_gain: WSPR_AGC_GAIN,
            compression,
            duration,
            output_dir,
            filename,
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.filename)
    }
}

/// A running capture. Closing it must leave a complete file behind.
#[async_trait]
pub trait RecordingHandle: Send + Sync {
    async fn close(&mut self) -> Result<()>;
}

/// Starts captures from a remote receiver.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn record(&self, request: RecordRequest) -> Result<Box<dyn RecordingHandle>>;
}
