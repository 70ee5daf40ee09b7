//! Decode queue and the decode half of a cycle

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use wspr_common::{Spot, band_label, decoder_filename};

use super::files::remove_files;
use super::runner::{JobInner, cancelled};
use crate::module::decoder::{DecoderOutcome, SPOTS_FILE, read_spots_file};
use crate::module::publisher::{PublishError, publish_spot};
use crate::module::recorder::DECODER_SAMPLE_RATE;

/// One captured cycle waiting for the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeRequest {
    pub audio_path: PathBuf,
    pub boundary: DateTime<Utc>,
}

/// Single-slot mailbox. A request not yet picked up is displaced by the
/// next one.
#[derive(Debug, Default)]
pub(super) struct DecodeQueue {
    slot: Mutex<Option<DecodeRequest>>,
    notify: Notify,
}

impl DecodeQueue {
    /// Queue `request`, returning whatever it displaced.
    pub fn submit(&self, request: DecodeRequest) -> Option<DecodeRequest> {
        let displaced = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(request);
        self.notify.notify_one();
        displaced
    }

    pub fn take(&self) -> Option<DecodeRequest> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

impl JobInner {
    /// Decode queued cycles one at a time until the job is cancelled and
    /// the queue is empty.
    pub(super) async fn run_decode_worker(self: Arc<Self>) {
        let mut cancel = self.cancel.subscribe();
        loop {
            if let Some(request) = self.decode_queue.take() {
                self.decode(request).await;
                continue;
            }
            if *cancel.borrow() {
                break;
            }
            tokio::select! {
                _ = self.decode_queue.notified() => {}
                _ = cancelled(&mut cancel) => {}
            }
        }
        debug!("[{}] Decode worker stopped", self.id);
        self.decode_done.send_replace(true);
    }

    async fn decode(&self, request: DecodeRequest) {
        let mut files = vec![request.audio_path.clone()];
        let spots = match self.decode_spots(&request, &mut files).await {
            Ok(spots) => spots,
            Err(e) => {
                warn!("[{}] Decoding {} failed: {:#}", self.id, request.audio_path.display(), e);
                Vec::new()
            }
        };

        let (publisher, prefix_override) = {
            let mut state = self.state.lock().await;
            state.last_decode_time = Some(self.deps.clock.now());
            state.last_decode_count = spots.len();
            (state.publisher.clone(), state.topic_prefix_override.clone())
        };
        info!("[{}] Cycle {} decoded: {} spot(s)", self.id, request.boundary.format("%H:%M"), spots.len());

        let band = band_label(self.band.frequency_khz);
        for spot in spots {
            let enriched = self.deps.dxcc.enrich(spot);
            let result = publish_spot(
                publisher.as_ref(),
                &prefix_override,
                &enriched,
                band,
                self.band.frequency_khz,
            )
            .await;
            match result {
                Ok(()) => debug!("[{}] Published {}", self.id, enriched.spot.callsign),
                Err(PublishError::Disabled) => {
                    debug!("[{}] Publisher disabled, not sending {}", self.id, enriched.spot.callsign)
                }
                Err(e) => warn!("[{}] Failed to publish {}: {}", self.id, enriched.spot.callsign, e),
            }
        }

        if !self.settings.retain_audio() {
            remove_files(&files).await;
        }
        {
            let mut state = self.state.lock().await;
            for file in &files {
                state.owned_audio.remove(file);
            }
        }

        if self.settings.one_shot {
            if let Some(barrier) = &self.barrier {
                barrier.arrive();
            }
        }
    }

    /// Keep `path` out of the purge in `stop` while this decode uses it.
    async fn own(&self, path: &Path) {
        self.state.lock().await.owned_audio.insert(path.to_path_buf());
    }

    /// Resample, rename, run the decoder and read its listing. Every file
    /// created on the way is appended to `files`.
    async fn decode_spots(&self, request: &DecodeRequest, files: &mut Vec<PathBuf>) -> Result<Vec<Spot>> {
        let size = fs::metadata(&request.audio_path)
            .await
            .with_context(|| format!("Missing audio {}", request.audio_path.display()))?
            .len();
        if size == 0 {
            bail!("{} is empty", request.audio_path.display());
        }
        debug!("[{}] Decoding {} ({} bytes)", self.id, request.audio_path.display(), size);

        let resampled = self
            .deps
            .resampler
            .resample(&request.audio_path, DECODER_SAMPLE_RATE)
            .await?;
        if resampled != request.audio_path {
            self.own(&resampled).await;
            files.push(resampled.clone());
        }

        let input_name = decoder_filename(request.boundary);
        let input = self.work_dir.join(&input_name);
        self.own(&input).await;
        files.push(input.clone());
        fs::rename(&resampled, &input)
            .await
            .with_context(|| format!("Failed to rename {} to {}", resampled.display(), input.display()))?;

        let spots_path = self.work_dir.join(SPOTS_FILE);
        match fs::remove_file(&spots_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("[{}] Failed to remove stale {}: {}", self.id, spots_path.display(), e),
        }

        match self
            .settings
            .decoder
            .run(&self.work_dir, self.band.frequency_khz, &input_name)
            .await?
        {
            DecoderOutcome::Success => read_spots_file(&spots_path).await,
            DecoderOutcome::Failed { code, stderr } => {
                warn!("[{}] Decoder exited with {:?}: {}", self.id, code, stderr);
                Ok(Vec::new())
            }
        }
    }
}
