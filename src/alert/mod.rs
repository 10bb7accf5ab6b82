//! Alert side effects: screenshots, detection log rows and the audible cue.
//!
//! Everything here is best effort. Failures are logged and never reach the
//! session loop, which hands jobs to an `AlertDispatcher` and moves on.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::frame::Frame;
use crate::plate::CanonicalPlate;
use crate::storage::{DetectionLogStore, NewDetection};

/// Screenshot quality; independent of the stream quality.
const SCREENSHOT_JPEG_QUALITY: u8 = 90;

pub trait AlertSink: Send + Sync {
    /// Append a detection log row.
    fn log(
        &self,
        at: DateTime<Local>,
        plate: &CanonicalPlate,
        is_target: bool,
        screenshot: Option<&Path>,
    ) -> Result<()>;

    /// Persist `frame` and return where it was written.
    fn save_screenshot(
        &self,
        frame: &Frame,
        plate: &CanonicalPlate,
        at: DateTime<Local>,
    ) -> Result<PathBuf>;

    fn play_alert_sound(&self) -> Result<()>;
}

/// `<plate with spaces replaced by underscores>_<YYYYMMDD_HHMMSS>.jpg`
pub fn screenshot_filename(plate: &CanonicalPlate, at: DateTime<Local>) -> String {
    format!("{}_{}.jpg", plate.file_stem(), at.format("%Y%m%d_%H%M%S"))
}

// ----------------------------------------------------------------------------
// Sound
// ----------------------------------------------------------------------------

/// Plays the alert cue by spawning an external command, or rings the
/// terminal bell when none is configured.
#[derive(Clone, Debug, Default)]
pub struct SoundPlayer {
    command: Option<Vec<String>>,
}

impl SoundPlayer {
    pub fn new(command: Option<Vec<String>>) -> Self {
        Self {
            command: command.filter(|cmd| !cmd.is_empty()),
        }
    }

    pub fn play(&self) -> Result<()> {
        let Some(cmd) = &self.command else {
            let mut out = std::io::stdout();
            out.write_all(b"\x07")?;
            out.flush()?;
            return Ok(());
        };
        let mut child = Command::new(&cmd[0])
            .args(&cmd[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn sound command {}", cmd[0]))?;
        // Reap in the background so the player never blocks the caller.
        std::thread::spawn(move || {
            if let Err(err) = child.wait() {
                log::debug!("sound command wait failed: {}", err);
            }
        });
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// LocalAlertSink
// ----------------------------------------------------------------------------

/// Screenshots on the local filesystem, rows in the detection log store.
pub struct LocalAlertSink {
    screenshot_dir: PathBuf,
    logs: Arc<dyn DetectionLogStore>,
    sound: SoundPlayer,
}

impl LocalAlertSink {
    pub fn new(
        screenshot_dir: impl Into<PathBuf>,
        logs: Arc<dyn DetectionLogStore>,
        sound: SoundPlayer,
    ) -> Self {
        Self {
            screenshot_dir: screenshot_dir.into(),
            logs,
            sound,
        }
    }

    pub fn screenshot_dir(&self) -> &Path {
        &self.screenshot_dir
    }
}

impl AlertSink for LocalAlertSink {
    fn log(
        &self,
        at: DateTime<Local>,
        plate: &CanonicalPlate,
        is_target: bool,
        screenshot: Option<&Path>,
    ) -> Result<()> {
        self.logs
            .append(&NewDetection {
                at,
                plate: plate.clone(),
                is_target,
                screenshot_path: screenshot.map(Path::to_path_buf),
            })
            .map_err(|err| anyhow!("append detection log: {}", err))?;
        Ok(())
    }

    fn save_screenshot(
        &self,
        frame: &Frame,
        plate: &CanonicalPlate,
        at: DateTime<Local>,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.screenshot_dir).with_context(|| {
            format!("create screenshot dir {}", self.screenshot_dir.display())
        })?;
        let path = self.screenshot_dir.join(screenshot_filename(plate, at));
        let jpeg = frame.encode_jpeg(SCREENSHOT_JPEG_QUALITY)?;
        std::fs::write(&path, jpeg)
            .with_context(|| format!("write screenshot {}", path.display()))?;
        Ok(path)
    }

    fn play_alert_sound(&self) -> Result<()> {
        self.sound.play()
    }
}

// ----------------------------------------------------------------------------
// AlertDispatcher
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub enum AlertJob {
    /// A target plate cleared its cooldown: screenshot, log, sound.
    Target {
        frame: Frame,
        plate: CanonicalPlate,
        at: DateTime<Local>,
    },
    /// A non-target plate worth a log row.
    Sighting {
        plate: CanonicalPlate,
        at: DateTime<Local>,
    },
}

/// Runs alert side effects on a dedicated thread.
///
/// The queue is bounded; when it is full new jobs are dropped. Dropping the
/// dispatcher finishes every queued job before returning.
pub struct AlertDispatcher {
    tx: Option<SyncSender<AlertJob>>,
    join: Option<JoinHandle<()>>,
    label: String,
}

impl AlertDispatcher {
    pub fn spawn(
        sink: Arc<dyn AlertSink>,
        capacity: usize,
        label: impl Into<String>,
    ) -> std::io::Result<Self> {
        let label = label.into();
        let (tx, rx) = sync_channel(capacity.max(1));
        let join = std::thread::Builder::new()
            .name(format!("{}-alerts", label))
            .spawn(move || run_alert_jobs(rx, sink))?;
        Ok(Self {
            tx: Some(tx),
            join: Some(join),
            label,
        })
    }

    /// Queue `job`. Returns false when it was dropped.
    pub fn dispatch(&self, job: AlertJob) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                log::warn!("{}: alert queue full, dropping {}", self.label, job.describe());
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("{}: alert worker gone", self.label);
                false
            }
        }
    }
}

impl Drop for AlertDispatcher {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("{}: alert worker panicked", self.label);
            }
        }
    }
}

impl AlertJob {
    fn describe(&self) -> String {
        match self {
            AlertJob::Target { plate, .. } => format!("target alert for {}", plate),
            AlertJob::Sighting { plate, .. } => format!("log row for {}", plate),
        }
    }
}

fn run_alert_jobs(rx: Receiver<AlertJob>, sink: Arc<dyn AlertSink>) {
    for job in rx {
        match job {
            AlertJob::Target { frame, plate, at } => {
                let screenshot = match sink.save_screenshot(&frame, &plate, at) {
                    Ok(path) => {
                        log::info!("screenshot saved: {}", path.display());
                        Some(path)
                    }
                    Err(err) => {
                        log::warn!("screenshot for {} failed: {:#}", plate, err);
                        None
                    }
                };
                if let Err(err) = sink.log(at, &plate, true, screenshot.as_deref()) {
                    log::warn!("detection log for {} failed: {:#}", plate, err);
                }
                if let Err(err) = sink.play_alert_sound() {
                    log::warn!("alert sound failed: {:#}", err);
                }
            }
            AlertJob::Sighting { plate, at } => {
                if let Err(err) = sink.log(at, &plate, false, None) {
                    log::warn!("detection log for {} failed: {:#}", plate, err);
                }
            }
        }
    }
}
