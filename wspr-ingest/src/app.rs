//! The two run modes behind the CLI

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use wspr_common::recording_filename;

use crate::cli::{DecodeArgs, RecordArgs};
use crate::config::FleetConfig;
use crate::module::dxcc::DxccTable;
use crate::module::job::JobDeps;
use crate::module::manager::Manager;
use crate::module::publisher::MqttPublisherFactory;
use crate::module::recorder::{RecordRequest, Recorder, WSPR_AGC_GAIN};
use crate::status::{self, AppState, HealthPoller};

pub const LOG_DIR: &str = "logs";
pub const LOG_PREFIX: &str = "wspr-ingest";

/// Capture request for a standalone recording started at `now`.
pub fn record_request(args: &RecordArgs, now: DateTime<Utc>) -> RecordRequest {
    RecordRequest {
        host: args.host.clone(),
        port: args.port,
        user: String::new(),
        password: String::new(),
        frequency_khz: args.frequency,
        modulation: args.mode.clone(),
        low_cut_hz: args.low_cut,
        high_cut_hz: args.high_cut,
        agc_gain: WSPR_AGC_GAIN,
        compression: !args.no_compression,
        duration: Duration::from_secs(args.duration),
        output_dir: args.output_dir.clone(),
        filename: recording_filename(now, args.frequency),
    }
}

/// Make one recording and return where it was written.
pub async fn run_record(args: &RecordArgs, recorder: &dyn Recorder) -> Result<PathBuf> {
    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;

    let request = record_request(args, Utc::now());
    let path = request.output_path();
    info!(
        "Recording {} kHz ({}) from {}:{} for {} s",
        args.frequency, args.mode, args.host, args.port, args.duration
    );

    let mut handle = recorder.record(request).await?;
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration)) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            warn!("Interrupted, closing recording early");
        }
    }
    handle.close().await?;

    if !path.exists() {
        bail!("Recorder produced no file at {}", path.display());
    }
    info!("Saved {}", path.display());
    Ok(path)
}

/// Run the decoder service until Ctrl-C, or until the one-shot run
/// completes.
pub async fn run_decode(args: &DecodeArgs, config: FleetConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let dxcc = if args.status_only {
        DxccTable::default()
    } else {
        DxccTable::load(&config.decoder.cty_path).await?
    };
    let deps = JobDeps::system(&config.decoder, Arc::new(dxcc));
    let manager = Arc::new(Manager::new(
        config,
        deps,
        Arc::new(MqttPublisherFactory),
        args.one_shot,
    ));

    let listener = status::bind(args.port).await?;
    let poller = Arc::new(HealthPoller::new()?);
    let state = AppState {
        manager: manager.clone(),
        health: poller.snapshot_handle(),
        config_path: args.config.clone(),
    };
    let server = tokio::spawn(async move {
        if let Err(e) = status::serve(listener, state).await {
            error!("Status surface stopped: {:#}", e);
        }
    });
    let poller_task = poller.spawn(manager.clone());

    if args.status_only {
        info!("Status-only mode, no bands will run");
    } else if let Err(e) = manager.start_all().await {
        manager.shutdown().await?;
        return Err(e);
    }

    if args.one_shot {
        tokio::select! {
            _ = manager.wait_for_one_shot() => info!("One-shot run complete"),
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Shutdown signal received");
            }
        }
    } else {
        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
        info!("Shutdown signal received");
    }

    manager.shutdown().await?;
    poller_task.abort();
    server.abort();
    Ok(())
}
