//! Recorder backed by an external streaming client process

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

use super::{RecordRequest, Recorder, RecordingHandle};

/// How long `close()` lets the client finish writing before killing it.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Runs a kiwirecorder-compatible client for each capture.
#[derive(Debug, Clone)]
pub struct CommandRecorder {
    program: PathBuf,
}

impl CommandRecorder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    pub fn args(request: &RecordRequest) -> Vec<String> {
        let mut args = vec![
            "--server-host".to_string(),
            request.host.clone(),
            "--server-port".to_string(),
            request.port.to_string(),
        ];
        if !request.user.is_empty() {
            args.extend(["--user".to_string(), request.user.clone()]);
        }
        if !request.password.is_empty() {
            args.extend(["--password".to_string(), request.password.clone()]);
        }
        args.extend([
            "--freq".to_string(),
            format!("{:.3}", request.frequency_khz),
            "--modulation".to_string(),
            request.modulation.clone(),
            "--lp-cutoff".to_string(),
            request.low_cut_hz.to_string(),
            "--hp-cutoff".to_string(),
            request.high_cut_hz.to_string(),
            "--agc-gain".to_string(),
            request.agc_gain.to_string(),
            "--tlimit".to_string(),
            request.duration.as_secs().to_string(),
            "--dir".to_string(),
            request.output_dir.display().to_string(),
            "--filename".to_string(),
            request.filename.clone(),
        ]);
        if !request.compression {
            args.push("--ncomp".to_string());
        }
        args
    }
}

struct ChildHandle {
    child: Option<Child>,
}

#[async_trait]
impl RecordingHandle for ChildHandle {
    async fn close(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
            Ok(status) => {
                let status = status.context("Failed to wait for recorder")?;
                tracing::debug!("Recorder exited with {}", status);
            }
            Err(_) => {
                tracing::debug!("Recorder still running after {:?}, killing it", CLOSE_GRACE);
                child.kill().await.context("Failed to kill recorder")?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Recorder for CommandRecorder {
    async fn record(&self, request: RecordRequest) -> Result<Box<dyn RecordingHandle>> {
        let child = Command::new(&self.program)
            .args(Self::args(&request))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start recorder {}", self.program.display()))?;

        tracing::debug!(
            "Recorder started for {} kHz on {}:{} -> {}",
            request.frequency_khz,
            request.host,
            request.port,
            request.output_path().display()
        );

        Ok(Box::new(ChildHandle { child: Some(child) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::write_script;
    use tempfile::TempDir;

    fn request(dir: &std::path::Path) -> RecordRequest {
        RecordRequest::wspr(
            "kiwi.local",
            8073,
            "",
            "pw",
            14097.0,
            false,
            Duration::from_secs(115),
            dir.to_path_buf(),
            "20251227_100000_14097_wspr.wav".to_string(),
        )
    }

    #[test]
    fn test_args() {
        let args = CommandRecorder::args(&request(std::path::Path::new("/tmp/w")));
        let joined = args.join(" ");
        assert!(joined.starts_with("--server-host kiwi.local --server-port 8073 --password pw"));
        assert!(!joined.contains("--user"));
        assert!(joined.contains("--freq 14097.000 --modulation usb --lp-cutoff 300 --hp-cutoff 2700 --agc-gain -1"));
        assert!(joined.contains("--tlimit 115 --dir /tmp/w --filename 20251227_100000_14097_wspr.wav"));
        assert!(joined.ends_with("--ncomp"));
    }

    #[tokio::test]
    async fn test_record_and_close() {
        let dir = TempDir::new().unwrap();
        // Writes the file named after --filename into --dir, then exits
        let script = write_script(
            dir.path(),
            "recorder",
            r#"while [ $# -gt 0 ]; do case "$1" in --dir) d="$2";; --filename) f="$2";; esac; shift; done; echo RIFF > "$d/$f""#,
        );

        let recorder = CommandRecorder::new(&script);
        let req = request(dir.path());
        let mut handle = recorder.record(req.clone()).await.unwrap();
        handle.close().await.unwrap();
        assert!(req.output_path().exists());

        // Second close is a no-op
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_kills_stuck_recorder() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "recorder", "sleep 30");

        let mut handle = CommandRecorder::new(&script).record(request(dir.path())).await.unwrap();
        let started = std::time::Instant::now();
        handle.close().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
