use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::CameraIndex;

const STATE_POLL: Duration = Duration::from_millis(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    Starting = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SessionState::Starting,
            1 => SessionState::Running,
            2 => SessionState::Stopping,
            _ => SessionState::Stopped,
        }
    }
}

/// Why a session loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// `stop`, a superseding `start`, or the stream was dropped.
    Cancelled,
    /// The device failed and could not be re-opened.
    DeviceLost,
    /// The frame receiver went away.
    ConsumerGone,
    /// The registry is shutting down.
    Shutdown,
}

/// State visible to both the worker and whoever holds the session.
#[derive(Debug)]
pub(crate) struct SessionShared {
    pub(crate) index: CameraIndex,
    pub(crate) generation: u64,
    state: AtomicU8,
    cancel: AtomicBool,
    shutdown: AtomicBool,
    exit: Mutex<Option<ExitReason>>,
}

impl SessionShared {
    pub(crate) fn new(index: CameraIndex, generation: u64) -> Self {
        Self {
            index,
            generation,
            state: AtomicU8::new(SessionState::Starting as u8),
            cancel: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            exit: Mutex::new(None),
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Exit reason for an observed cancellation.
    pub(crate) fn cancel_reason(&self) -> ExitReason {
        if self.shutdown.load(Ordering::SeqCst) {
            ExitReason::Shutdown
        } else {
            ExitReason::Cancelled
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Record `reason` and mark the session stopped.
    pub(crate) fn finish(&self, reason: ExitReason) {
        *self.exit.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason);
        self.set_state(SessionState::Stopped);
    }

    pub(crate) fn exit_reason(&self) -> Option<ExitReason> {
        *self.exit.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait up to `timeout` for the session to reach `Stopped`.
    pub(crate) fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.state() == SessionState::Stopped {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(STATE_POLL.min(deadline - now));
        }
    }
}
