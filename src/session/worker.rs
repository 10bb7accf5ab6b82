//! The per-session capture, detect, alert and emit loop.

use anyhow::{anyhow, Result};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use super::state::{ExitReason, SessionShared, SessionState};
use super::{Pipeline, RegistryInner, SessionSettings};
use crate::alert::{AlertDispatcher, AlertJob};
use crate::detect::{PlateDetector, PlateReading};
use crate::frame::{annotate_and_encode, EncodedFrame, Frame, Overlay};
use crate::ingest::{CaptureChain, FrameSource};
use crate::plate::{normalize, TargetPlateSet};

/// The session's capture device.
///
/// The worker locks the slot only for the duration of one read, so the
/// registry can take the device away between reads.
pub(crate) struct CaptureSlot {
    source: Mutex<Option<Box<dyn FrameSource>>>,
}

impl CaptureSlot {
    pub(crate) fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source: Mutex::new(Some(source)),
        }
    }

    /// `None` when the device has been released.
    fn read_frame(&self) -> Option<Result<Frame>> {
        let mut guard = self.source.lock().unwrap_or_else(|e| e.into_inner());
        guard.as_mut().map(|source| source.read_frame())
    }

    fn replace(&self, source: Box<dyn FrameSource>) {
        *self.source.lock().unwrap_or_else(|e| e.into_inner()) = Some(source);
    }

    /// Drop the device. Blocks while a read is in progress.
    pub(crate) fn release(&self) -> bool {
        self.source
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some()
    }

    /// Drop the device unless a read is in progress.
    pub(crate) fn try_release(&self) -> bool {
        match self.source.try_lock() {
            Ok(mut guard) => {
                guard.take();
                true
            }
            Err(std::sync::TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().take();
                true
            }
            Err(std::sync::TryLockError::WouldBlock) => false,
        }
    }

    /// Keep trying to drop the device until `timeout` elapses.
    ///
    /// A cancelled worker finishes at most the read in flight, so a slow
    /// device frees the slot within one read. False means the read is stuck.
    pub(crate) fn release_within(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_release() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

pub(crate) struct SessionWorker {
    pub(crate) shared: Arc<SessionShared>,
    pub(crate) capture: Arc<CaptureSlot>,
    pub(crate) chain: CaptureChain,
    pub(crate) pipeline: Arc<Pipeline>,
    pub(crate) settings: SessionSettings,
    pub(crate) targets: TargetPlateSet,
    pub(crate) detector: Box<dyn PlateDetector>,
    pub(crate) alerts: AlertDispatcher,
    pub(crate) frames: SyncSender<EncodedFrame>,
    pub(crate) registry: Weak<RegistryInner>,
    pub(crate) first_frame: Option<Frame>,
}

impl SessionWorker {
    pub(crate) fn run(mut self) {
        let index = self.shared.index;
        if let Err(err) = self.detector.warm_up() {
            log::warn!("camera {}: detector warm-up failed: {:#}", index, err);
        }
        self.shared.set_state(SessionState::Running);
        log::info!(
            "camera {}: session {} running ({} targets, detector {})",
            index,
            self.shared.generation,
            self.targets.len(),
            self.detector.name()
        );

        let reason = self.run_loop();

        self.shared.set_state(SessionState::Stopping);
        self.capture.release();
        let Self {
            shared,
            alerts,
            frames,
            registry,
            ..
        } = self;
        drop(alerts);
        shared.finish(reason);
        match reason {
            ExitReason::DeviceLost => {
                log::warn!("camera {}: session {} ended, device lost", index, shared.generation)
            }
            _ => log::info!(
                "camera {}: session {} stopped ({:?})",
                index,
                shared.generation,
                reason
            ),
        }
        if let Some(registry) = registry.upgrade() {
            registry.remove_if_current(index, shared.generation);
        }
        drop(frames);
    }

    fn run_loop(&mut self) -> ExitReason {
        loop {
            if self.shared.is_cancelled() {
                return self.shared.cancel_reason();
            }
            let started = Instant::now();

            let frame = match self.first_frame.take() {
                Some(frame) => frame,
                None => match self.next_frame() {
                    Ok(frame) => frame,
                    Err(reason) => return reason,
                },
            };

            let overlay = self.evaluate(&frame);
            match annotate_and_encode(&frame, &overlay, self.settings.jpeg_quality) {
                Ok(encoded) => match self.frames.try_send(encoded) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => return ExitReason::ConsumerGone,
                },
                Err(err) => log::debug!("camera {}: encode failed: {:#}", self.shared.index, err),
            }

            let elapsed = started.elapsed();
            if elapsed < self.settings.frame_interval {
                std::thread::sleep(self.settings.frame_interval - elapsed);
            }
        }
    }

    /// Read one frame, re-opening the device once if the read fails.
    fn next_frame(&mut self) -> Result<Frame, ExitReason> {
        let err = match self.capture.read_frame() {
            Some(Ok(frame)) => return Ok(frame),
            Some(Err(err)) => err,
            // Released by the registry while we were elsewhere.
            None => return Err(self.shared.cancel_reason()),
        };
        let index = self.shared.index;
        log::warn!("camera {}: frame read failed: {:#}; re-opening", index, err);
        self.capture.release();

        if !self.pause(self.settings.reopen_delay) {
            return Err(self.shared.cancel_reason());
        }
        match self.reopen() {
            Ok(frame) => Ok(frame),
            Err(err) => {
                log::warn!("camera {}: re-open failed: {:#}", index, err);
                Err(ExitReason::DeviceLost)
            }
        }
    }

    fn reopen(&mut self) -> Result<Frame> {
        let opened = self.chain.open(self.shared.index)?;
        if self.shared.is_cancelled() {
            return Err(anyhow!("cancelled during re-open"));
        }
        log::info!(
            "camera {}: re-opened {} via {}",
            self.shared.index,
            opened.source.describe(),
            opened.backend
        );
        self.capture.replace(opened.source);
        Ok(opened.first_frame)
    }

    /// Sleep for `delay` in short slices. False if cancelled meanwhile.
    fn pause(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        while Instant::now() < deadline {
            if self.shared.is_cancelled() {
                return false;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(left.min(Duration::from_millis(20)));
        }
        !self.shared.is_cancelled()
    }

    /// Detect, normalise, match and alert. Returns the overlay to draw.
    fn evaluate(&mut self, frame: &Frame) -> Overlay {
        let reading = match self.detector.detect(frame) {
            Ok(reading) => reading,
            Err(err) => {
                log::debug!(
                    "camera {}: detector error on frame {}: {:#}",
                    self.shared.index,
                    frame.sequence,
                    err
                );
                PlateReading::none()
            }
        };
        let plate = normalize(&reading.raw_text);
        if plate.is_empty() {
            return Overlay::searching();
        }

        let now = self.pipeline.clock.now();
        if self.targets.contains(&plate) {
            if self
                .pipeline
                .cooldown
                .should_alert(&plate, now, self.settings.cooldown)
            {
                log::info!("camera {}: target plate {} detected", self.shared.index, plate);
                self.alerts.dispatch(AlertJob::Target {
                    frame: frame.clone(),
                    plate: plate.clone(),
                    at: now,
                });
            }
            return Overlay::target(&plate, reading.bbox);
        }

        if self.settings.log_non_targets
            && self
                .pipeline
                .sightings
                .should_alert(&plate, now, self.settings.non_target_interval)
        {
            self.alerts.dispatch(AlertJob::Sighting {
                plate: plate.clone(),
                at: now,
            });
        }
        Overlay::plate(&plate, reading.bbox)
    }
}
