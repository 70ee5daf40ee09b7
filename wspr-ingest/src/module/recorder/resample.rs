//! Sample-rate conversion ahead of decoding

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// The decoder only accepts 12 kHz input.
pub const DECODER_SAMPLE_RATE: u32 = 12_000;

/// Header bytes scanned for the `fmt ` chunk.
const HEADER_SCAN_BYTES: u64 = 4096;

#[async_trait]
pub trait Resampler: Send + Sync {
    /// Convert `path` to `target_rate`, returning the file to decode.
    /// Input already at `target_rate` comes back unchanged.
    async fn resample(&self, path: &Path, target_rate: u32) -> Result<PathBuf>;
}

/// Read the sample rate from a RIFF/WAVE header.
pub async fn wav_sample_rate(path: &Path) -> Result<u32> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut header = Vec::new();
    file.take(HEADER_SCAN_BYTES).read_to_end(&mut header).await?;

    parse_sample_rate(&header).ok_or_else(|| anyhow!("{} is not a WAVE file", path.display()))
}

fn parse_sample_rate(header: &[u8]) -> Option<u32> {
    if header.len() < 12 || &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return None;
    }

    let le32 = |at: usize| -> Option<u32> {
        header.get(at..at + 4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    };

    let mut pos = 12;
    while pos + 8 <= header.len() {
        let size = le32(pos + 4)? as usize;
        if &header[pos..pos + 4] == b"fmt " {
            // audio format (2) + channels (2), then the rate
            return le32(pos + 12);
        }
        pos += 8 + size + (size & 1);
    }
    None
}

/// Resampler that shells out to a sox-compatible program.
#[derive(Debug, Clone)]
pub struct CommandResampler {
    program: PathBuf,
}

impl CommandResampler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    fn output_path(path: &Path) -> PathBuf {
        let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        path.with_file_name(format!("{}_12k.wav", stem))
    }
}

#[async_trait]
impl Resampler for CommandResampler {
    async fn resample(&self, path: &Path, target_rate: u32) -> Result<PathBuf> {
        let rate = wav_sample_rate(path).await?;
        if rate == target_rate {
            return Ok(path.to_path_buf());
        }

        let output = Self::output_path(path);
        tracing::debug!("Resampling {} from {} Hz to {} Hz", path.display(), rate, target_rate);

        let status = Command::new(&self.program)
            .arg(path)
            .args(["-r", &target_rate.to_string()])
            .arg(&output)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("Failed to start resampler {}", self.program.display()))?;

        if !status.success() {
            bail!("Resampler exited with {} for {}", status, path.display());
        }
        if !output.exists() {
            bail!("Resampler produced no output at {}", output.display());
        }
        Ok(output)
    }
}
