//! Plate Watch
//!
//! Watches camera feeds for registered vehicle license plates and raises an
//! alert (screenshot, detection log row, audible cue) the first time a
//! target plate is seen, then stays quiet for a cooldown window.
//!
//! # Architecture
//!
//! - `ingest`: capture backends and the ordered `CaptureChain`
//! - `detect`: the `PlateDetector` seam (localisation + OCR)
//! - `plate`: OCR text normalisation, target sets, alert cooldown
//! - `session`: `SessionRegistry`, one worker thread per camera index
//! - `alert`: screenshot/log/sound side effects off the frame path
//! - `storage`: target plates and the detection log (SQLite)
//! - `api`: HTTP front end (MJPEG feeds, logs, target administration)
//!
//! The registry guarantees at most one live session per camera index. Each
//! session reads its target list once at start.

pub mod alert;
pub mod api;
pub mod clock;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod plate;
pub mod session;
pub mod storage;

/// Camera identifier, e.g. `3` for `/dev/video3`.
pub type CameraIndex = u32;

pub use alert::{AlertDispatcher, AlertJob, AlertSink, LocalAlertSink, SoundPlayer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::WatchConfig;
pub use detect::{BoundingBox, DetectorRegistry, PlateDetector, PlateReading};
pub use frame::{EncodedFrame, Frame, Overlay, OverlayStatus};
pub use ingest::{CaptureBackend, CaptureChain, FrameSource};
pub use plate::{normalize, CanonicalPlate, CooldownTracker, TargetPlateSet};
pub use session::{
    ExitReason, FrameStream, Pipeline, SessionRegistry, SessionSettings, SessionState,
    StreamError,
};
pub use storage::{
    DetectionLogEntry, DetectionLogStore, InMemoryStore, SqliteStore, StoreError, TargetPlate,
    TargetPlateStore,
};
