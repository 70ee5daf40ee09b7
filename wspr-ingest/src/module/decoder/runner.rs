//! Decoder process invocation

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Decoder cycle cap passed as `-C`.
const DECODER_CYCLES: &str = "10000";

/// How a decoder run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderOutcome {
    Success,
    /// Non-zero exit or killed by a signal
    Failed { code: Option<i32>, stderr: String },
}

/// Argument vector for one decode: `-f <MHz> -C 10000 -w <file>`.
pub fn decoder_args(frequency_khz: f64, filename: &str) -> Vec<String> {
    vec![
        "-f".to_string(),
        format!("{:.6}", frequency_khz / 1000.0),
        "-C".to_string(),
        DECODER_CYCLES.to_string(),
        "-w".to_string(),
        filename.to_string(),
    ]
}

/// The external decoder binary.
#[derive(Debug, Clone)]
pub struct DecoderCommand {
    path: PathBuf,
}

impl DecoderCommand {
    /// A relative `path` is resolved against the current directory here,
    /// since the decoder itself runs inside a job's work directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let path = std::path::absolute(&path).unwrap_or(path);
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the decoder on `filename` inside `work_dir` and wait for it.
    ///
    /// `Err` only when the process could not be started at all.
    pub async fn run(&self, work_dir: &Path, frequency_khz: f64, filename: &str) -> Result<DecoderOutcome> {
        let args = decoder_args(frequency_khz, filename);
        debug!("Running {} {}", self.path.display(), args.join(" "));

        let output = Command::new(&self.path)
            .args(&args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to start decoder {}", self.path.display()))?;

        if output.status.success() {
            Ok(DecoderOutcome::Success)
        } else {
            Ok(DecoderOutcome::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
