use anyhow::{Result, anyhow};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use super::barrier::OneShotBarrier;
use super::status::BandStatus;
use crate::config::{ActiveBand, FleetConfig, PublisherConfig};
use crate::module::job::{JobDeps, JobRunner, JobSettings};
use crate::module::publisher::{PublisherFactory, SpotPublisher};

/// Time given to the publisher to flush before it is dropped.
const PUBLISHER_GRACE: Duration = Duration::from_millis(250);

struct ManagerState {
    config: FleetConfig,
    jobs: HashMap<String, Arc<JobRunner>>,
    publisher: Option<Arc<dyn SpotPublisher>>,
}

pub struct Manager {
    state: RwLock<ManagerState>,
    deps: JobDeps,
    factory: Arc<dyn PublisherFactory>,
    one_shot: bool,
    barrier: Arc<OneShotBarrier>,
}

impl Manager {
    pub fn new(config: FleetConfig, deps: JobDeps, factory: Arc<dyn PublisherFactory>, one_shot: bool) -> Self {
        Self {
            state: RwLock::new(ManagerState {
                config,
                jobs: HashMap::new(),
                publisher: None,
            }),
            deps,
            factory,
            one_shot,
            barrier: Arc::new(OneShotBarrier::new(0)),
        }
    }

    pub fn is_one_shot(&self) -> bool {
        self.one_shot
    }

    pub async fn config(&self) -> FleetConfig {
        self.state.read().await.config.clone()
    }

    pub async fn job(&self, band_name: &str) -> Option<Arc<JobRunner>> {
        self.state.read().await.jobs.get(band_name).cloned()
    }

    fn create_publisher(&self, config: &PublisherConfig) -> Option<Arc<dyn SpotPublisher>> {
        match self.factory.create(config) {
            Ok(publisher) => publisher,
            Err(e) => {
                error!("Failed to create publisher for {}:{}: {:#}", config.host, config.port, e);
                None
            }
        }
    }

    /// Start jobs for `bands` in order, pausing between consecutive bands
    /// on the same receiver. Each job takes the lowest receiver slot no
    /// running job on that receiver holds. A job whose work directory a
    /// retired job in `predecessors` still uses waits for it. Bands that
    /// fail to start are collected.
    async fn start_jobs(
        &self,
        state: &mut ManagerState,
        bands: Vec<ActiveBand>,
        barrier: Option<Arc<OneShotBarrier>>,
        mut predecessors: HashMap<String, Arc<JobRunner>>,
    ) -> Vec<String> {
        let settings = JobSettings::new(&state.config.decoder, self.one_shot);
        let mut previous_receiver: Option<String> = None;
        let mut failures = Vec::new();

        for mut active in bands {
            if previous_receiver.as_deref() == Some(active.receiver.name.as_str()) {
                sleep(self.deps.timing.receiver_stagger).await;
            }
            previous_receiver = Some(active.receiver.name.clone());
            active.receiver_index = free_slot(&state.jobs, &active.receiver.name);

            let name = active.band.name.clone();
            let predecessor = predecessors.remove(&active.band.unique_id());
            let job = JobRunner::new(
                active,
                settings.clone(),
                self.deps.clone(),
                state.publisher.clone(),
                barrier.clone(),
            );
            match job.start_after(predecessor).await {
                Ok(()) => {
                    state.jobs.insert(name, Arc::new(job));
                }
                Err(e) => {
                    error!("Failed to start band {}: {:#}", name, e);
                    failures.push(format!("{}: {:#}", name, e));
                }
            }
        }
        failures
    }

    /// Create and start a job for every active band.
    pub async fn start_all(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.jobs.is_empty() {
            warn!("Jobs already running, start_all ignored");
            return Ok(());
        }

        if state.publisher.is_none() {
            state.publisher = self.create_publisher(&state.config.publisher);
        }

        let bands = state.config.active_bands();
        info!("Starting {} band(s)", bands.len());
        let barrier = self.one_shot.then(|| {
            self.barrier.reset(bands.len());
            self.barrier.clone()
        });

        let failures = self.start_jobs(&mut state, bands, barrier, HashMap::new()).await;
        if !failures.is_empty() {
            return Err(anyhow!("Failed to start bands: {}", failures.join("; ")));
        }
        Ok(())
    }

    /// Stop every job and forget them.
    pub async fn stop_all(&self) {
        let mut state = self.state.write().await;
        for (name, job) in state.jobs.drain() {
            info!("Stopping band {}", name);
            job.stop().await;
        }
    }

    /// Apply a new configuration.
    ///
    /// Bands are matched by name; a band whose frequency or receiver
    /// changed is restarted, the rest keep running with refreshed
    /// receiver details. The publisher is rebuilt only when its own
    /// settings changed.
    pub async fn reload(&self, new_config: FleetConfig) -> Result<()> {
        let mut state = self.state.write().await;
        let mut new_bands: HashMap<String, ActiveBand> = new_config
            .active_bands()
            .into_iter()
            .map(|active| (active.band.name.clone(), active))
            .collect();

        let retired: Vec<String> = state
            .jobs
            .iter()
            .filter(|(name, job)| {
                new_bands
                    .get(name.as_str())
                    .is_none_or(|active| job.band().needs_restart(&active.band))
            })
            .map(|(name, _)| name.clone())
            .collect();
        let mut predecessors = HashMap::new();
        for name in retired {
            if let Some(job) = state.jobs.remove(&name) {
                info!("Stopping band {} ({})", name, job.id());
                job.stop().await;
                predecessors.insert(job.id().to_string(), job);
            }
        }

        let publisher_changed = state.config.publisher != new_config.publisher;
        let added: Vec<ActiveBand> = new_config
            .active_bands()
            .into_iter()
            .filter(|active| !state.jobs.contains_key(&active.band.name))
            .collect();
        state.config = new_config;

        if publisher_changed {
            info!("Publisher settings changed, reconnecting");
            if let Some(old) = state.publisher.take() {
                disconnect(old).await;
            }
            state.publisher = self.create_publisher(&state.config.publisher);
        }

        for (name, job) in &state.jobs {
            if let Some(active) = new_bands.remove(name.as_str()) {
                job.update_receiver(active.receiver.clone()).await;
                job.update_publisher(state.publisher.clone(), active.receiver.topic_prefix_override)
                    .await;
            }
        }

        if !added.is_empty() {
            info!("Starting {} new band(s)", added.len());
        }
        let failures = self.start_jobs(&mut state, added, None, predecessors).await;
        if !failures.is_empty() {
            return Err(anyhow!("Failed to start bands: {}", failures.join("; ")));
        }
        Ok(())
    }

    pub fn notify_one_shot_complete(&self) {
        self.barrier.arrive();
    }

    /// Resolve once every band started by `start_all` decoded one cycle.
    pub async fn wait_for_one_shot(&self) {
        if !self.one_shot {
            warn!("Not in one-shot mode, nothing to wait for");
            return;
        }
        self.barrier.wait().await;
    }

    /// One row per configured band, in config order.
    pub async fn detailed_status(&self) -> Vec<BandStatus> {
        let state = self.state.read().await;
        let mut rows = Vec::with_capacity(state.config.bands.len());
        for band in &state.config.bands {
            let row = match state.jobs.get(&band.name) {
                Some(job) => BandStatus::running(band, job.status().await),
                None => BandStatus::disabled(band),
            };
            rows.push(row);
        }
        rows
    }

    /// Stop all jobs, then disconnect the publisher.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_all().await;
        let publisher = self.state.write().await.publisher.take();
        if let Some(publisher) = publisher {
            disconnect(publisher).await;
        }
        info!("Manager shut down");
        Ok(())
    }
}

fn free_slot(jobs: &HashMap<String, Arc<JobRunner>>, receiver: &str) -> usize {
    let taken: HashSet<usize> = jobs
        .values()
        .filter(|job| job.band().receiver_name == receiver)
        .map(|job| job.receiver_slot())
        .collect();
    (0..).find(|slot| !taken.contains(slot)).unwrap_or(taken.len())
}

async fn disconnect(publisher: Arc<dyn SpotPublisher>) {
    if timeout(PUBLISHER_GRACE, publisher.disconnect()).await.is_err() {
        warn!("Publisher did not disconnect within {:?}", PUBLISHER_GRACE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::clock::SystemClock;
    use crate::config::tests::write_script;
    use crate::module::job::test_support::{SPOT_LINE, StubRecorder, decoder_script, eventually, test_deps};
    use crate::module::publisher::tests::MemoryPublisherFactory;
    use crate::module::manager::BandState;
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn fleet(dir: &Path, decoder: &Path, bands: &[(&str, f64, bool)]) -> FleetConfig {
        let mut yaml = String::from(
            "publisher:\n  enabled: true\n  host: broker.local\nreceivers:\n  - name: r1\n    host: kiwi.local\nbands:\n",
        );
        for (name, khz, enabled) in bands {
            yaml.push_str(&format!(
                "  - name: {}\n    frequency_khz: {}\n    receiver_name: r1\n    enabled: {}\n",
                name, khz, enabled
            ));
        }
        yaml.push_str(&format!(
            "decoder:\n  decoder_path: {}\n  work_dir: {}\n",
            decoder.display(),
            dir.join("work").display()
        ));
        FleetConfig::from_yaml(&yaml).unwrap()
    }

    /// Manager whose jobs sit waiting for the next real boundary.
    fn idle_manager(config: FleetConfig, factory: Arc<MemoryPublisherFactory>) -> Manager {
        let mut deps = test_deps(StubRecorder::new(true));
        deps.clock = Arc::new(SystemClock);
        Manager::new(config, deps, factory, false)
    }

    #[tokio::test]
    async fn test_reload_adds_band_and_keeps_existing_job() {
        let dir = TempDir::new().unwrap();
        let decoder = decoder_script(dir.path(), SPOT_LINE, 0);
        let manager = idle_manager(
            fleet(dir.path(), &decoder, &[("b20", 14097.0, true)]),
            Arc::new(MemoryPublisherFactory::default()),
        );
        manager.start_all().await.unwrap();
        let b20 = manager.job("b20").await.unwrap();

        manager
            .reload(fleet(dir.path(), &decoder, &[("b20", 14097.0, true), ("b40", 7040.0, true)]))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&b20, &manager.job("b20").await.unwrap()));
        let b40 = manager.job("b40").await.unwrap();
        assert_eq!(b40.work_dir(), dir.path().join("work").join("r1_7040"));
        assert!(b40.work_dir().is_dir());
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_restarts_band_on_frequency_change() {
        let dir = TempDir::new().unwrap();
        let decoder = decoder_script(dir.path(), SPOT_LINE, 0);
        let manager = idle_manager(
            fleet(dir.path(), &decoder, &[("b20", 14097.0, true)]),
            Arc::new(MemoryPublisherFactory::default()),
        );
        manager.start_all().await.unwrap();
        let old = manager.job("b20").await.unwrap();
        let leftover = old.work_dir().join("20251227_100000_14097_wspr.wav");
        std::fs::write(&leftover, "x").unwrap();

        manager
            .reload(fleet(dir.path(), &decoder, &[("b20", 14095.6, true)]))
            .await
            .unwrap();

        let new = manager.job("b20").await.unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(!leftover.exists());
        assert_eq!(new.work_dir(), dir.path().join("work").join("r1_14095"));
        manager.shutdown().await.unwrap();
    }

    async fn offsets(manager: &Manager, names: &[&str]) -> Vec<Duration> {
        let mut offsets = Vec::new();
        for name in names {
            offsets.push(manager.job(name).await.unwrap().record_offset());
        }
        offsets
    }

    #[tokio::test]
    async fn test_reload_keeps_offsets_distinct_per_receiver() {
        let dir = TempDir::new().unwrap();
        let decoder = decoder_script(dir.path(), SPOT_LINE, 0);
        let manager = idle_manager(
            fleet(dir.path(), &decoder, &[("b20", 14097.0, true), ("b40", 7040.0, true)]),
            Arc::new(MemoryPublisherFactory::default()),
        );
        manager.start_all().await.unwrap();
        assert_eq!(
            offsets(&manager, &["b20", "b40"]).await,
            vec![Duration::ZERO, Duration::from_millis(1)]
        );

        // b40 survives in slot 1, so the new band takes the freed slot 0
        manager
            .reload(fleet(dir.path(), &decoder, &[("b40", 7040.0, true), ("b30", 10140.1, true)]))
            .await
            .unwrap();
        assert_eq!(
            offsets(&manager, &["b40", "b30"]).await,
            vec![Duration::from_millis(1), Duration::ZERO]
        );

        manager
            .reload(fleet(
                dir.path(),
                &decoder,
                &[("b40", 7040.0, true), ("b30", 10140.1, true), ("b17", 18104.6, true)],
            ))
            .await
            .unwrap();
        let all = offsets(&manager, &["b40", "b30", "b17"]).await;
        let distinct: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(distinct.len(), all.len(), "{:?}", all);
        assert_eq!(all[2], Duration::from_millis(2));

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_within_same_khz_waits_for_previous_decode() {
        let dir = TempDir::new().unwrap();
        // Slow decoder that fails unless its input survives the whole run
        let decoder = write_script(
            dir.path(),
            "wsprd",
            &format!(
                "touch started\nsleep 0.5\n[ -f \"$6\" ] || exit 3\n\
                 printf '%s\\n' '{}' > wspr_spots.txt\nexit 0",
                SPOT_LINE
            ),
        );
        let factory = Arc::new(MemoryPublisherFactory::default());
        let manager = Manager::new(
            fleet(dir.path(), &decoder, &[("b20", 14097.0, true)]),
            test_deps(StubRecorder::new(true)),
            factory.clone(),
            false,
        );
        manager.start_all().await.unwrap();
        let old = manager.job("b20").await.unwrap();
        let started = old.work_dir().join("started");
        let marker = &started;
        assert!(eventually(|| async move { marker.exists() }).await);

        manager
            .reload(fleet(dir.path(), &decoder, &[("b20", 14097.4, true)]))
            .await
            .unwrap();
        let new = manager.job("b20").await.unwrap();
        assert_eq!(new.work_dir(), old.work_dir());

        timeout(Duration::from_secs(5), old.decode_finished()).await.unwrap();
        let publisher = factory.latest().unwrap();
        let sent = &publisher;
        assert!(
            eventually(|| async move {
                sent.messages().iter().any(|(_, payload)| payload.contains("\"frequency\":14097000"))
            })
            .await
        );
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_removes_band_and_swaps_publisher() {
        let dir = TempDir::new().unwrap();
        let decoder = decoder_script(dir.path(), SPOT_LINE, 0);
        let factory = Arc::new(MemoryPublisherFactory::default());
        let manager = idle_manager(
            fleet(dir.path(), &decoder, &[("b20", 14097.0, true), ("b40", 7040.0, true)]),
            factory.clone(),
        );
        manager.start_all().await.unwrap();
        let first = factory.latest().unwrap();

        // Same publisher settings: no reconnect
        manager
            .reload(fleet(dir.path(), &decoder, &[("b20", 14097.0, true), ("b40", 7040.0, false)]))
            .await
            .unwrap();
        assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
        assert!(manager.job("b40").await.is_none());

        let mut changed = fleet(dir.path(), &decoder, &[("b20", 14097.0, true)]);
        changed.publisher.topic_prefix = "station".to_string();
        manager.reload(changed).await.unwrap();
        assert_eq!(factory.calls.load(Ordering::SeqCst), 2);
        assert!(first.disconnected.load(Ordering::SeqCst));
        assert_eq!(factory.latest().unwrap().prefix, "station");

        manager.shutdown().await.unwrap();
        assert!(factory.latest().unwrap().disconnected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_detailed_status_includes_disabled_bands() {
        let dir = TempDir::new().unwrap();
        let decoder = decoder_script(dir.path(), SPOT_LINE, 0);
        let manager = idle_manager(
            fleet(dir.path(), &decoder, &[("b20", 14097.0, true), ("b40", 7040.0, false)]),
            Arc::new(MemoryPublisherFactory::default()),
        );
        manager.start_all().await.unwrap();

        let rows = manager.detailed_status().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "b20");
        assert_eq!(rows[0].state, BandState::Waiting);
        assert_eq!(rows[0].receiver, "r1");
        assert_eq!(rows[1].name, "b40");
        assert_eq!(rows[1].state, BandState::Disabled);
        assert!(!rows[1].enabled);

        manager.stop_all().await;
        let rows = manager.detailed_status().await;
        assert!(rows.iter().all(|r| r.state == BandState::Disabled));
    }

    #[tokio::test]
    async fn test_one_shot_across_three_bands() {
        let dir = TempDir::new().unwrap();
        let decoder = decoder_script(dir.path(), SPOT_LINE, 0);
        let config = fleet(
            dir.path(),
            &decoder,
            &[("b20", 14097.0, true), ("b30", 10140.1, true), ("b40", 7040.0, true)],
        );
        let recorder = StubRecorder::new(true);
        let manager = Manager::new(
            config,
            test_deps(recorder.clone()),
            Arc::new(MemoryPublisherFactory::default()),
            true,
        );
        manager.start_all().await.unwrap();

        timeout(Duration::from_secs(10), manager.wait_for_one_shot()).await.unwrap();
        assert_eq!(recorder.calls(), 3);

        let mut offsets = Vec::new();
        for name in ["b20", "b30", "b40"] {
            let job = manager.job(name).await.unwrap();
            offsets.push(job.record_offset());
            let audio = std::fs::read_dir(job.work_dir())
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|x| x == "wav"))
                .count();
            assert_eq!(audio, 1, "{} should keep its audio", name);
        }
        assert_eq!(offsets, vec![Duration::ZERO, Duration::from_millis(1), Duration::from_millis(2)]);

        // Extra notifications leave the barrier open
        manager.notify_one_shot_complete();
        manager.wait_for_one_shot().await;
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_all_fails_when_work_dir_cannot_be_created() {
        let dir = TempDir::new().unwrap();
        let decoder = decoder_script(dir.path(), SPOT_LINE, 0);
        // A regular file where the work root should be
        std::fs::write(dir.path().join("work"), "x").unwrap();
        let manager = idle_manager(
            fleet(dir.path(), &decoder, &[("b20", 14097.0, true)]),
            Arc::new(MemoryPublisherFactory::default()),
        );
        assert!(manager.start_all().await.is_err());
        assert!(manager.job("b20").await.is_none());
    }
}
