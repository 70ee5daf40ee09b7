//! Job lifecycle and the cycle loop

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::fs;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use wspr_common::recording_filename;

use super::decode::{DecodeQueue, DecodeRequest};
use super::files::{purge_audio, remove_files};
use super::state::{CycleTiming, JobState, JobStatus, RecordingState};
use crate::config::{ActiveBand, BandConfig, DecoderConfig, ReceiverConfig};
use crate::module::clock::{Clock, SystemClock, next_boundary, wait_until};
use crate::module::decoder::DecoderCommand;
use crate::module::dxcc::DxccTable;
use crate::module::manager::OneShotBarrier;
use crate::module::publisher::SpotPublisher;
use crate::module::recorder::{CommandRecorder, CommandResampler, RecordRequest, Recorder, RecordingHandle, Resampler};

/// How long `stop` waits for the cycle loop before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Collaborators shared by every job.
#[derive(Clone)]
pub struct JobDeps {
    pub clock: Arc<dyn Clock>,
    pub recorder: Arc<dyn Recorder>,
    pub resampler: Arc<dyn Resampler>,
    pub dxcc: Arc<DxccTable>,
    pub timing: CycleTiming,
}

impl JobDeps {
    /// Wall clock plus the external recorder and resampler named in `config`.
    pub fn system(config: &DecoderConfig, dxcc: Arc<DxccTable>) -> Self {
        Self {
            clock: Arc::new(SystemClock),
            recorder: Arc::new(CommandRecorder::new(&config.recorder_path)),
            resampler: Arc::new(CommandResampler::new(&config.resampler_path)),
            dxcc,
            timing: CycleTiming::default(),
        }
    }
}

/// Decoder-section settings a job is created with.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub decoder: DecoderCommand,
    pub work_root: PathBuf,
    pub compression: bool,
    pub keep_audio: bool,
    pub one_shot: bool,
}

impl JobSettings {
    pub fn new(config: &DecoderConfig, one_shot: bool) -> Self {
        Self {
            decoder: DecoderCommand::new(&config.decoder_path),
            work_root: config.work_dir.clone(),
            compression: config.compression,
            keep_audio: config.keep_audio,
            one_shot,
        }
    }

    /// Audio is left on disk after decoding.
    pub fn retain_audio(&self) -> bool {
        self.one_shot || self.keep_audio
    }
}

pub(super) struct JobInner {
    pub id: String,
    pub band: BandConfig,
    pub work_dir: PathBuf,
    pub receiver_slot: usize,
    pub record_offset: Duration,
    pub settings: JobSettings,
    pub deps: JobDeps,
    pub barrier: Option<Arc<OneShotBarrier>>,
    pub state: Mutex<JobState>,
    pub cancel: watch::Sender<bool>,
    pub decode_queue: DecodeQueue,
    /// Set once the decode worker has exited
    pub decode_done: watch::Sender<bool>,
    /// Set once stale audio was purged and the work dir belongs to this job
    pub claimed: AtomicBool,
}

enum CycleOutcome {
    Recorded(PathBuf),
    Failed(String),
    Cancelled,
}

/// Resolve once `cancel` carries `true` or its sender is gone.
pub(super) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// Run `fut` unless the job is cancelled first.
async fn until_cancelled<F: Future>(cancel: &mut watch::Receiver<bool>, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancelled(cancel) => None,
        out = fut => Some(out),
    }
}

async fn close_recording(id: &str, mut handle: Box<dyn RecordingHandle>) {
    if let Err(e) = handle.close().await {
        warn!("[{}] Failed to close recording: {:#}", id, e);
    }
}

impl JobInner {
    async fn purge_stale(&self) -> Result<()> {
        let purged = purge_audio(&self.work_dir, &HashSet::new()).await?;
        if purged > 0 {
            info!("[{}] Removed {} stale audio file(s)", self.id, purged);
        }
        self.claimed.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub(super) async fn run_cycles(self: Arc<Self>) {
        let mut cancel = self.cancel.subscribe();
        loop {
            let boundary = next_boundary(self.deps.clock.now());
            debug!("[{}] Waiting for cycle {}", self.id, boundary);
            if until_cancelled(&mut cancel, wait_until(self.deps.clock.as_ref(), boundary))
                .await
                .is_none()
            {
                break;
            }
            if !self.record_offset.is_zero()
                && until_cancelled(&mut cancel, sleep(self.record_offset)).await.is_none()
            {
                break;
            }

            match self.record_cycle(boundary, &mut cancel).await {
                CycleOutcome::Cancelled => break,
                CycleOutcome::Recorded(audio_path) => {
                    self.state.lock().await.recording_state = RecordingState::Success;
                    self.submit_decode(DecodeRequest { audio_path, boundary }).await;
                    if self.settings.one_shot {
                        info!("[{}] One-shot capture finished", self.id);
                        break;
                    }
                }
                CycleOutcome::Failed(reason) => {
                    warn!("[{}] {}", self.id, reason);
                    {
                        let mut state = self.state.lock().await;
                        state.recording_state = RecordingState::Failed;
                        state.last_error = Some(reason);
                    }
                    if until_cancelled(&mut cancel, sleep(self.deps.timing.failure_cooldown))
                        .await
                        .is_none()
                    {
                        break;
                    }
                }
            }
        }
        debug!("[{}] Cycle loop stopped", self.id);
    }

    async fn record_cycle(&self, boundary: DateTime<Utc>, cancel: &mut watch::Receiver<bool>) -> CycleOutcome {
        let receiver = self.state.lock().await.receiver.clone();
        let request = RecordRequest::wspr(
            &receiver.host,
            receiver.port,
            &receiver.user,
            &receiver.password,
            self.band.frequency_khz,
            self.settings.compression,
            self.deps.timing.record_window,
            self.work_dir.clone(),
            recording_filename(boundary, self.band.frequency_khz),
        );
        let path = request.output_path();
        info!("[{}] Recording cycle {} from {}:{}", self.id, boundary.format("%H:%M"), receiver.host, receiver.port);

        let handle = match self.deps.recorder.record(request).await {
            Ok(handle) => handle,
            Err(e) => return CycleOutcome::Failed(format!("Recorder failed to start: {:#}", e)),
        };

        let mut state = self.state.lock().await;
        if state.stopped {
            drop(state);
            close_recording(&self.id, handle).await;
            return CycleOutcome::Cancelled;
        }
        state.active_recording = Some(handle);
        drop(state);

        let completed = until_cancelled(cancel, sleep(self.deps.timing.record_window))
            .await
            .is_some();

        let handle = self.state.lock().await.active_recording.take();
        if let Some(handle) = handle {
            close_recording(&self.id, handle).await;
        }
        if !completed {
            return CycleOutcome::Cancelled;
        }

        sleep(self.deps.timing.flush_delay).await;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return CycleOutcome::Failed(format!("No audio file at {} after recording", path.display()));
        }
        CycleOutcome::Recorded(path)
    }

    async fn submit_decode(&self, request: DecodeRequest) {
        self.state.lock().await.owned_audio.insert(request.audio_path.clone());

        let Some(displaced) = self.decode_queue.submit(request) else {
            return;
        };
        warn!(
            "[{}] Decoder is behind, dropping cycle {}",
            self.id,
            displaced.boundary.format("%H:%M")
        );
        self.state.lock().await.owned_audio.remove(&displaced.audio_path);
        if !self.settings.retain_audio() {
            remove_files(&[displaced.audio_path]).await;
        }
    }
}

/// One band on one receiver.
pub struct JobRunner {
    inner: Arc<JobInner>,
    cycle_task: StdMutex<Option<JoinHandle<()>>>,
}

impl JobRunner {
    pub fn new(
        active: ActiveBand,
        settings: JobSettings,
        deps: JobDeps,
        publisher: Option<Arc<dyn SpotPublisher>>,
        barrier: Option<Arc<OneShotBarrier>>,
    ) -> Self {
        let ActiveBand { band, receiver, receiver_index } = active;
        let id = band.unique_id();
        let work_dir = settings.work_root.join(&id);
        let record_offset = deps.timing.receiver_stagger * receiver_index as u32;
        let (cancel, _) = watch::channel(false);
        let (decode_done, _) = watch::channel(false);

        Self {
            inner: Arc::new(JobInner {
                id,
                band,
                work_dir,
                receiver_slot: receiver_index,
                record_offset,
                settings,
                deps,
                barrier,
                state: Mutex::new(JobState::new(receiver, publisher)),
                cancel,
                decode_queue: DecodeQueue::default(),
                decode_done,
                claimed: AtomicBool::new(false),
            }),
            cycle_task: StdMutex::new(None),
        }
    }

    /// `<receiver>_<kHz>`
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn band(&self) -> &BandConfig {
        &self.inner.band
    }

    pub fn work_dir(&self) -> &Path {
        &self.inner.work_dir
    }

    /// Position among the jobs on this receiver; sets `record_offset`.
    pub fn receiver_slot(&self) -> usize {
        self.inner.receiver_slot
    }

    pub fn record_offset(&self) -> Duration {
        self.inner.record_offset
    }

    /// Prepare the work directory and spawn the cycle loop and decode worker.
    pub async fn start(&self) -> Result<()> {
        self.start_after(None).await
    }

    /// Like [`start`](Self::start), but when `predecessor` used the same
    /// work directory nothing touches it until that job's decode worker
    /// has exited.
    pub async fn start_after(&self, predecessor: Option<Arc<JobRunner>>) -> Result<()> {
        if self.cycle_task.lock().unwrap_or_else(PoisonError::into_inner).is_some() {
            return Ok(());
        }

        let inner = self.inner.clone();
        fs::create_dir_all(&inner.work_dir)
            .await
            .with_context(|| format!("Failed to create work dir {}", inner.work_dir.display()))?;

        let handle = match predecessor.filter(|previous| previous.work_dir() == inner.work_dir) {
            None => {
                inner.purge_stale().await?;
                tokio::spawn(inner.clone().run_decode_worker());
                tokio::spawn(inner.clone().run_cycles())
            }
            Some(previous) => {
                let inner = inner.clone();
                tokio::spawn(async move {
                    let mut cancel = inner.cancel.subscribe();
                    if until_cancelled(&mut cancel, previous.decode_finished()).await.is_none() {
                        inner.decode_done.send_replace(true);
                        return;
                    }
                    if let Err(e) = inner.purge_stale().await {
                        warn!("[{}] Failed to clean {}: {:#}", inner.id, inner.work_dir.display(), e);
                    }
                    tokio::spawn(inner.clone().run_decode_worker());
                    inner.run_cycles().await;
                })
            }
        };
        *self.cycle_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(
            "[{}] Started {} at {} kHz, offset {:?}",
            inner.id, inner.band.name, inner.band.frequency_khz, inner.record_offset
        );
        Ok(())
    }

    /// Resolve once the decode worker has exited, which happens only after
    /// `stop` and after any pending decode has finished.
    pub async fn decode_finished(&self) {
        let mut done = self.inner.decode_done.subscribe();
        let _ = done.wait_for(|done| *done).await;
    }

    /// Cancel the loop, close any capture in progress and clear leftover
    /// audio. Later calls do nothing.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let recording = {
            let mut state = inner.state.lock().await;
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.active_recording.take()
        };
        inner.cancel.send_replace(true);

        if let Some(handle) = recording {
            close_recording(&inner.id, handle).await;
        }

        let task = self.cycle_task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            let abort = task.abort_handle();
            if timeout(STOP_TIMEOUT, task).await.is_err() {
                warn!("[{}] Cycle loop did not exit in {:?}, aborting", inner.id, STOP_TIMEOUT);
                abort.abort();
            }
        }

        if !inner.settings.retain_audio() && inner.claimed.load(Ordering::SeqCst) {
            let keep = inner.state.lock().await.owned_audio.clone();
            match purge_audio(&inner.work_dir, &keep).await {
                Ok(0) => {}
                Ok(n) => info!("[{}] Removed {} audio file(s)", inner.id, n),
                Err(e) => warn!("[{}] Failed to clean {}: {:#}", inner.id, inner.work_dir.display(), e),
            }
        }
        info!("[{}] Stopped", inner.id);
    }

    pub async fn status(&self) -> JobStatus {
        self.inner.state.lock().await.snapshot()
    }

    /// Point later publishes at `publisher` with the given prefix override.
    pub async fn update_publisher(&self, publisher: Option<Arc<dyn SpotPublisher>>, topic_prefix_override: String) {
        let mut state = self.inner.state.lock().await;
        state.publisher = publisher;
        state.topic_prefix_override = topic_prefix_override;
    }

    /// Use new receiver details from the next recording on.
    pub async fn update_receiver(&self, receiver: ReceiverConfig) {
        self.inner.state.lock().await.receiver = receiver;
    }
}
