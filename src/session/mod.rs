//! Camera sessions.
//!
//! `SessionRegistry` owns every live session, keyed by camera index. At most
//! one session per index is live at any instant: `start` retires the old
//! session before it opens the device for the new one, and a session only
//! removes its own registry entry, never a successor's.
//!
//! Each session runs on its own thread (see `worker`) and publishes
//! annotated frames through a `FrameStream`.

mod state;
mod stream;
mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

pub use state::{ExitReason, SessionState};
pub use stream::{FrameStream, Timeout};

use crate::alert::{AlertDispatcher, AlertSink};
use crate::clock::{Clock, SystemClock};
use crate::config::WatchConfig;
use crate::detect::DetectorFactory;
use crate::ingest::CaptureChain;
use crate::plate::CooldownTracker;
use crate::storage::{StoreError, TargetPlateStore};
use crate::CameraIndex;
use state::SessionShared;
use worker::{CaptureSlot, SessionWorker};

const DEFAULT_STREAM_CAPACITY: usize = 2;
const DEFAULT_ALERT_QUEUE: usize = 8;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("camera {index} unavailable: {cause:#}")]
    DeviceUnavailable {
        index: CameraIndex,
        cause: anyhow::Error,
    },
    #[error("target plate list unavailable: {0}")]
    TargetsUnavailable(#[source] StoreError),
    #[error("failed to spawn session thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("session registry is shut down")]
    Closed,
}

/// Per-session tuning, shared by every session of one registry.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    /// Indices probed by `list_available`.
    pub probe_limit: u32,
    pub frame_interval: Duration,
    pub reopen_delay: Duration,
    /// How long `start` waits for a superseded session to stop.
    pub retire_timeout: Duration,
    pub jpeg_quality: u8,
    pub cooldown: Duration,
    pub log_non_targets: bool,
    pub non_target_interval: Duration,
    /// Encoded frames buffered for the consumer; later frames are dropped.
    pub stream_capacity: usize,
    pub alert_queue: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            probe_limit: 5,
            frame_interval: Duration::from_millis(100),
            reopen_delay: Duration::from_millis(500),
            retire_timeout: Duration::from_millis(300),
            jpeg_quality: 80,
            cooldown: Duration::from_secs(30),
            log_non_targets: false,
            non_target_interval: Duration::from_secs(10),
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            alert_queue: DEFAULT_ALERT_QUEUE,
        }
    }
}

impl SessionSettings {
    pub fn from_config(cfg: &WatchConfig) -> Self {
        Self {
            probe_limit: cfg.camera.probe_limit,
            frame_interval: cfg.camera.frame_interval(),
            reopen_delay: cfg.camera.reopen_delay,
            retire_timeout: cfg.camera.retire_timeout,
            jpeg_quality: cfg.camera.jpeg_quality,
            cooldown: cfg.alert.cooldown,
            log_non_targets: cfg.alert.log_non_targets,
            non_target_interval: cfg.alert.non_target_interval,
            ..Self::default()
        }
    }
}

/// Collaborators shared by all sessions.
///
/// The cooldown trackers live here, not in a session, so a plate seen by
/// two cameras still alerts once per window.
pub struct Pipeline {
    targets: Arc<dyn TargetPlateStore>,
    detectors: DetectorFactory,
    alerts: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    cooldown: CooldownTracker,
    sightings: CooldownTracker,
}

impl Pipeline {
    pub fn new(
        targets: Arc<dyn TargetPlateStore>,
        detectors: DetectorFactory,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            targets,
            detectors,
            alerts,
            clock: Arc::new(SystemClock),
            cooldown: CooldownTracker::new(),
            sightings: CooldownTracker::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }
}

struct SessionEntry {
    shared: Arc<SessionShared>,
    capture: Arc<CaptureSlot>,
    join: Option<JoinHandle<()>>,
}

pub(crate) struct RegistryInner {
    sessions: Mutex<HashMap<CameraIndex, SessionEntry>>,
    chain: CaptureChain,
    pipeline: Arc<Pipeline>,
    settings: SessionSettings,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<CameraIndex, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Called by a worker on exit.
    pub(crate) fn remove_if_current(&self, index: CameraIndex, generation: u64) {
        let mut sessions = self.lock();
        if sessions
            .get(&index)
            .is_some_and(|entry| entry.shared.generation == generation)
        {
            sessions.remove(&index);
        }
    }
}

/// Thread-safe table of live camera sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(chain: CaptureChain, pipeline: Pipeline, settings: SessionSettings) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                chain,
                pipeline: Arc::new(pipeline),
                settings,
                next_generation: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Start a session on `index`, superseding any session already there.
    ///
    /// Nothing is registered unless the device opened and the target list
    /// loaded.
    pub fn start(&self, index: CameraIndex) -> Result<FrameStream, StreamError> {
        let inner = &self.inner;
        let mut sessions = inner.lock();
        if inner.closed.load(Ordering::SeqCst) {
            return Err(StreamError::Closed);
        }

        if let Some(old) = sessions.remove(&index) {
            self.retire(index, old);
        }

        let opened = inner
            .chain
            .open(index)
            .map_err(|cause| StreamError::DeviceUnavailable { index, cause })?;
        let targets = inner
            .pipeline
            .targets
            .list_targets()
            .map_err(StreamError::TargetsUnavailable)?;

        let generation = inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::new(SessionShared::new(index, generation));
        let capture = Arc::new(CaptureSlot::new(opened.source));
        let alerts = AlertDispatcher::spawn(
            inner.pipeline.alerts.clone(),
            inner.settings.alert_queue,
            format!("camera-{}", index),
        )
        .map_err(StreamError::Spawn)?;
        let (tx, rx) = sync_channel(inner.settings.stream_capacity.max(1));

        let worker = SessionWorker {
            shared: shared.clone(),
            capture: capture.clone(),
            chain: inner.chain.clone(),
            pipeline: inner.pipeline.clone(),
            settings: inner.settings.clone(),
            targets,
            detector: (inner.pipeline.detectors)(),
            alerts,
            frames: tx,
            registry: Arc::downgrade(inner),
            first_frame: Some(opened.first_frame),
        };
        let join = std::thread::Builder::new()
            .name(format!("camera-{}", index))
            .spawn(move || worker.run())
            .map_err(StreamError::Spawn)?;

        log::info!(
            "camera {}: session {} started via {}",
            index,
            generation,
            opened.backend
        );
        sessions.insert(
            index,
            SessionEntry {
                shared: shared.clone(),
                capture,
                join: Some(join),
            },
        );
        Ok(FrameStream::new(shared, rx))
    }

    /// Cancel, wait briefly, then force the device closed if still held.
    ///
    /// A worker busy in a slow read gets a second window to leave the
    /// device; only a read that outlasts both is evicted with the device
    /// still open.
    fn retire(&self, index: CameraIndex, old: SessionEntry) {
        let timeout = self.inner.settings.retire_timeout;
        old.shared.cancel();
        if old.shared.wait_stopped(timeout) {
            log::debug!(
                "camera {}: session {} retired",
                index,
                old.shared.generation
            );
            return;
        }
        if old.capture.release_within(timeout) {
            log::warn!(
                "camera {}: session {} did not stop in time; capture released",
                index,
                old.shared.generation
            );
        } else {
            log::warn!(
                "camera {}: session {} stuck in a device read; evicted",
                index,
                old.shared.generation
            );
        }
    }

    /// Signal the session on `index` to stop. Returns whether one existed.
    pub fn stop(&self, index: CameraIndex) -> bool {
        match self.inner.lock().get(&index) {
            Some(entry) => {
                entry.shared.cancel();
                log::info!("camera {}: stop requested", index);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, index: CameraIndex) -> bool {
        self.inner.lock().contains_key(&index)
    }

    /// Indices with a registered session, ascending.
    pub fn active(&self) -> Vec<CameraIndex> {
        let mut out: Vec<_> = self.inner.lock().keys().copied().collect();
        out.sort_unstable();
        out
    }

    pub fn state(&self, index: CameraIndex) -> Option<SessionState> {
        self.inner.lock().get(&index).map(|entry| entry.shared.state())
    }

    /// Indices in `0..probe_limit` that can be opened right now.
    ///
    /// Indices with a live session are reported without being touched.
    pub fn list_available(&self) -> Vec<CameraIndex> {
        let sessions = self.inner.lock();
        (0..self.inner.settings.probe_limit)
            .filter(|index| sessions.contains_key(index) || self.inner.chain.probe(*index))
            .collect()
    }

    /// `"Camera <i>"` labels for `list_available`.
    pub fn list_cameras(&self) -> Vec<String> {
        self.list_available()
            .into_iter()
            .map(|index| format!("Camera {}", index))
            .collect()
    }

    /// Stop every session and wait for the workers. Later starts fail.
    pub fn shutdown(&self) -> usize {
        self.inner.closed.store(true, Ordering::SeqCst);
        let entries: Vec<SessionEntry> = self.inner.lock().drain().map(|(_, e)| e).collect();
        for entry in &entries {
            entry.shared.request_shutdown();
        }
        let count = entries.len();
        for mut entry in entries {
            if let Some(join) = entry.join.take() {
                if join.join().is_err() {
                    log::error!("camera {}: session thread panicked", entry.shared.index);
                }
            }
        }
        if count > 0 {
            log::info!("stopped {} camera session(s)", count);
        }
        count
    }
}
