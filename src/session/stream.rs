use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::state::{ExitReason, SessionShared, SessionState};
use crate::frame::EncodedFrame;
use crate::CameraIndex;

/// The live output of one session.
///
/// Frames arrive in capture order. The iterator ends when the session
/// stops for any reason; `end_reason` then says why. Dropping the stream
/// cancels the session.
pub struct FrameStream {
    shared: Arc<SessionShared>,
    rx: Receiver<EncodedFrame>,
}

impl FrameStream {
    pub(crate) fn new(shared: Arc<SessionShared>, rx: Receiver<EncodedFrame>) -> Self {
        Self { shared, rx }
    }

    pub fn index(&self) -> CameraIndex {
        self.shared.index
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Why the session ended, once it has.
    pub fn end_reason(&self) -> Option<ExitReason> {
        self.shared.exit_reason()
    }

    /// Ask the session to stop. Frames already queued stay readable.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Next frame, waiting at most `timeout`.
    ///
    /// `Ok(None)` means the stream has ended.
    pub fn next_timeout(&mut self, timeout: Duration) -> Result<Option<EncodedFrame>, Timeout> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Err(Timeout),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}

impl Iterator for FrameStream {
    type Item = EncodedFrame;

    fn next(&mut self) -> Option<EncodedFrame> {
        self.rx.recv().ok()
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.shared.cancel();
    }
}

impl std::fmt::Debug for FrameStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStream")
            .field("index", &self.shared.index)
            .field("generation", &self.shared.generation)
            .field("state", &self.shared.state())
            .finish()
    }
}

/// No frame arrived within the requested wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("timed out waiting for a frame")]
pub struct Timeout;
