use anyhow::Result;

use crate::detect::result::PlateReading;
use crate::frame::Frame;

/// Plate localisation plus OCR for a single frame.
///
/// Each session owns its own detector instance, so implementations may keep
/// per-stream state behind `&mut self`. `detect` must return promptly; an
/// error is treated by the caller as "no plate this frame".
pub trait PlateDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Read the most prominent plate in `frame`.
    fn detect(&mut self, frame: &Frame) -> Result<PlateReading>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
